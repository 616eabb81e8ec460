//! Chatops CLI - Database migrations and card inspection.
//!
//! # Usage
//!
//! ```bash
//! # Apply database migrations
//! chatops-cli migrate
//!
//! # Print the card a request file renders to
//! chatops-cli render-card --file request.json --request-id req_1
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "chatops-cli")]
#[command(author, version, about = "Chatops operator tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Render a release request file to card JSON
    RenderCard {
        /// Release request JSON (bare, or wrapped in `card_data`)
        #[arg(short, long)]
        file: PathBuf,

        /// Request id embedded in the buttons (generated when omitted)
        #[arg(short, long)]
        request_id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::RenderCard { file, request_id } => {
            let card = commands::render::render_file(&file, request_id)?;
            #[allow(clippy::print_stdout)]
            {
                println!("{card}");
            }
        }
    }
    Ok(())
}
