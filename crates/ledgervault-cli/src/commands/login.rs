//! Login command - authenticate and print a summary of the unlocked vault.

use anyhow::{Result, bail};
use clap::Args as ClapArgs;
use tracing::instrument;

use ledgervault_core::{AppContext, CredentialKind};

use crate::output::create_table;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Username to log in as
    pub username: String,

    /// Authenticate with the recovery secret instead of the password
    #[arg(long)]
    pub recovery: bool,
}

#[instrument(level = "info", name = "cmd::login", skip_all, fields(username = %args.username))]
pub fn execute(ctx: &AppContext, args: &Args) -> Result<()> {
    let (prompt, kind) = if args.recovery {
        ("Recovery secret: ", CredentialKind::Recovery)
    } else {
        ("Password: ", CredentialKind::Password)
    };
    let secret = rpassword::prompt_password(prompt)?;

    if let Err(e) = ctx.login(&args.username, &secret, kind) {
        bail!("{}", e.user_message());
    }

    let summary = ctx.with_vault(|conn| {
        let count = |table: &str| -> ledgervault_core::rusqlite::Result<i64> {
            conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |row| {
                row.get(0)
            })
        };
        Ok(vec![
            ("Accounts", count("accounts")?),
            ("Transactions", count("transactions")?),
            ("Categories", count("categories")?),
            ("Currencies", count("currencies")?),
        ])
    })?;

    println!("Vault unlocked.");
    let mut table = create_table();
    table.set_header(vec!["Table", "Rows"]);
    for (name, rows) in summary {
        table.add_row(vec![name.to_string(), rows.to_string()]);
    }
    println!("{table}");
    Ok(())
}
