//! Info command - identity directory statistics.
//!
//! Reads only shared, non-secret-bearing reference data; no login required.

use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::instrument;

use ledgervault_core::AppContext;

use crate::output::create_table;

#[derive(ClapArgs, Clone)]
pub struct Args {}

#[instrument(level = "info", name = "cmd::info", skip_all)]
pub fn execute(ctx: &AppContext, _args: &Args) -> Result<()> {
    let (identities, scripts) = ctx.with_directory(|conn| {
        let identities: i64 =
            conn.query_row("SELECT count(*) FROM identities", [], |row| row.get(0))?;
        let scripts: i64 =
            conn.query_row("SELECT count(*) FROM vault_scripts", [], |row| row.get(0))?;
        Ok((identities, scripts))
    })?;

    let mut table = create_table();
    table.set_header(vec!["Property", "Value"]);
    table.add_row(vec!["Registered identities".to_string(), identities.to_string()]);
    table.add_row(vec!["Vault template scripts".to_string(), scripts.to_string()]);
    println!("{table}");
    Ok(())
}
