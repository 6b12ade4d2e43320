//! Session Commands

use anyhow::{bail, Result};
use clap::Subcommand;
use std::io::BufRead;
use std::path::Path;

use crate::client::{save_token, DaemonClient};
use crate::output::{print_success, print_warning};

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Log in and store the session token
    Login {
        /// Admin password; read from stdin when omitted
        #[arg(long, env = "WGUI_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// End the current session
    Logout,

    /// Change the admin password
    Passwd {
        /// Current password
        #[arg(long)]
        current: String,

        /// New password (at least 8 characters)
        #[arg(long)]
        new: String,
    },
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("no password given");
    }
    Ok(password)
}

pub async fn execute(cmd: AuthCommands, client: DaemonClient, token_file: &Path) -> Result<()> {
    match cmd {
        AuthCommands::Login { password } => {
            let password = match password {
                Some(p) => p,
                None => read_password()?,
            };
            let session = client.login(&password).await?;
            save_token(token_file, &session.token)?;
            print_success(&format!("Logged in, token saved to {}", token_file.display()));
        }

        AuthCommands::Logout => {
            client.logout().await?;
            if token_file.exists() {
                std::fs::remove_file(token_file)?;
            }
            print_success("Logged out");
        }

        AuthCommands::Passwd { current, new } => {
            if new.chars().count() < 8 {
                print_warning("The daemon rejects passwords shorter than 8 characters");
            }
            client.change_password(&current, &new).await?;
            print_success("Password changed");
        }
    }

    Ok(())
}
