//! Register command - create a new user and provision their vault.

use anyhow::{Result, bail};
use clap::Args as ClapArgs;
use tracing::instrument;

use ledgervault_core::AppContext;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Username for the new account
    pub username: String,
}

#[instrument(level = "info", name = "cmd::register", skip_all, fields(username = %args.username))]
pub fn execute(ctx: &AppContext, args: &Args) -> Result<()> {
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }

    let recovery = match ctx.register(&args.username, &password) {
        Ok(recovery) => recovery,
        Err(e) => bail!("{}", e.user_message()),
    };

    println!("Account created and vault provisioned.");
    println!();
    println!("Recovery secret (shown exactly once, store it somewhere safe):");
    println!();
    println!("    {}", recovery.expose());
    println!();
    println!("Anyone holding this secret can unlock the vault without the");
    println!("password. If both the password and this secret are lost, the");
    println!("vault is unrecoverable.");
    Ok(())
}
