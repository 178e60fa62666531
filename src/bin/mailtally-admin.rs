use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use mailtally::analytics::BounceCategory;
use mailtally::config::Config;
use mailtally::models::{CampaignLinkManifest, RawEvent};
use mailtally::storage::{self, StorageError};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mailtally-admin")]
#[command(about = "mailtally data management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database tables
    Init,
    /// Append mail log rows from a JSON-lines file
    ImportEvents {
        /// Campaign (mailing) id
        #[arg(long)]
        mailing: i64,
        /// File with one event object per line
        #[arg(long)]
        file: PathBuf,
    },
    /// Store the link manifest of a sent campaign
    ImportManifest {
        /// Campaign (mailing) id
        #[arg(long)]
        mailing: i64,
        /// JSON manifest file
        #[arg(long)]
        file: PathBuf,
    },
    /// Delete the stored recipient summaries of a campaign
    Clear {
        /// Campaign (mailing) id
        #[arg(long)]
        mailing: i64,
    },
    /// List recipients whose mail came back
    Bounced {
        /// Campaign (mailing) id
        #[arg(long)]
        mailing: i64,
        /// Only this bounce category (e.g. unknown-recipient, mailbox-full)
        #[arg(long)]
        category: Option<BounceCategory>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Ensure database is initialized
    let storage = storage::connect(&config).await?;

    match cli.command {
        Commands::Init => {
            println!("✓ Database initialized at {}", config.database.url);
        }
        Commands::ImportEvents { mailing, file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;

            let mut events = Vec::new();
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let event: RawEvent = serde_json::from_str(line)
                    .with_context(|| format!("invalid event on line {}", line_no + 1))?;
                events.push(event);
            }

            let inserted = storage.append_events(mailing, &events).await?;
            println!("✓ Imported {} events for mailing {}", inserted, mailing);

            let first = events.iter().map(|e| e.timestamp).min();
            let last = events.iter().map(|e| e.timestamp).max();
            if let (Some(first), Some(last)) = (first, last) {
                println!("  from {} to {}", format_time(first), format_time(last));
            }
        }
        Commands::ImportManifest { mailing, file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let manifest: CampaignLinkManifest =
                serde_json::from_str(&content).context("invalid link manifest")?;

            match storage.put_manifest(mailing, &manifest).await {
                Ok(()) => println!(
                    "✓ Stored manifest for mailing {} ({} html, {} plain links)",
                    mailing,
                    manifest.html_links.len(),
                    manifest.plain_links.len()
                ),
                Err(StorageError::Conflict(_)) => {
                    println!("⚠ Mailing {} already has a link manifest; left unchanged", mailing)
                }
                Err(StorageError::Other(e)) => return Err(e),
            }
        }
        Commands::Clear { mailing } => {
            let removed = storage.clear_summaries(mailing).await?;
            println!("✓ Removed {} recipient summaries of mailing {}", removed, mailing);
        }
        Commands::Bounced { mailing, category } => {
            let recipients = storage.bounced_recipients(mailing, category).await?;
            if recipients.is_empty() {
                println!("No returned mails found.");
            } else {
                let mut by_table: BTreeMap<String, Vec<i64>> = BTreeMap::new();
                for key in recipients {
                    by_table.entry(key.table).or_default().push(key.id);
                }

                println!("{:<24} {:>8}  {}", "Table", "Count", "Recipient IDs");
                println!("{}", "-".repeat(80));
                for (table, ids) in by_table {
                    let list = ids
                        .iter()
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>()
                        .join(",");
                    println!("{:<24} {:>8}  {}", table, ids.len(), list);
                }
            }
        }
    }

    Ok(())
}

fn format_time(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}
