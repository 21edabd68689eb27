//! CLI module for Cartwise
//!
//! Provides commands:
//! - `ask`: Handle one message and print the response envelope
//! - `repl`: Interactive shopping session on stdin
//! - `config`: Print the effective configuration

use crate::app::{self, App};
use anyhow::{Context, Result};
use cartwise_core::ShoppingRequest;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod repl;

/// Cartwise shopping assistant CLI
#[derive(Parser, Debug)]
#[command(name = "cartwise")]
#[command(about = "Personalized shopping assistant with long-term memory")]
#[command(version)]
pub struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Extra configuration file layered over the defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Handle one message and print the JSON envelope
    Ask {
        #[arg(long)]
        user: String,
        #[arg(long)]
        session: String,
        /// Message text
        text: String,
    },
    /// Interactive session: plain text, or /add, /remove, /set, /cart, /confirm
    Repl {
        #[arg(long)]
        user: String,
        /// Session to continue (a new one by default)
        #[arg(long)]
        session: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> Result<()> {
    let config = app::load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Ask {
            user,
            session,
            text,
        }) => {
            let app = App::start(&config).await?;
            let envelope = app
                .handle(ShoppingRequest::text(user, session, text))
                .await;
            println!("{}", envelope.to_json_pretty()?);
            app.shutdown().await;
            Ok(())
        }
        Some(Commands::Repl { user, session }) => {
            let app = App::start(&config).await?;
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let result = repl::run(&app, &user, &session).await;
            app.shutdown().await;
            result
        }
        Some(Commands::Config) => {
            app::validate_config(&config)?;
            let rendered =
                serde_json::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{rendered}");
            Ok(())
        }
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
