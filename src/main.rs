use anyhow::Result;
use clap::{Parser, Subcommand};
use mailtally::analytics::CampaignReport;
use mailtally::config::Config;
use mailtally::engine::Engine;
use mailtally::storage;
use tracing::info;

#[derive(Parser)]
#[command(name = "mailtally")]
#[command(about = "Campaign response aggregation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the per-recipient summaries of a campaign from its mail log
    Recompute {
        /// Campaign (mailing) id
        #[arg(long)]
        mailing: i64,
    },
    /// Print the statistics and link report of a campaign
    Report {
        /// Campaign (mailing) id
        #[arg(long)]
        mailing: i64,
        /// Recompute the summaries before reporting
        #[arg(long)]
        recompute: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    let storage = storage::connect(&config).await?;
    let engine = Engine::new(storage);

    match cli.command {
        Commands::Recompute { mailing } => {
            let written = engine.recompute(mailing).await?;
            println!("✓ Stored {} recipient summaries for mailing {}", written, mailing);
        }
        Commands::Report {
            mailing,
            recompute,
            json,
        } => {
            let report = engine.report(mailing, recompute).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }

    Ok(())
}

fn print_report(report: &CampaignReport) {
    let stats = &report.stats;

    println!("Mailing {}", report.mailing_id);
    println!();
    println!("{:<24} {:>22} {:>22} {:>22}", "", "Total", "HTML", "Plain");
    println!("{}", "-".repeat(92));
    println!(
        "{:<24} {:>22} {:>22} {:>22}",
        "Sent", stats.total_sent, stats.html_sent, stats.plain_sent
    );
    println!("{:<24} {:>22}", "Returned", stats.returned.to_string());
    println!(
        "{:<24} {:>22} {:>22}",
        "HTML viewed",
        "",
        stats.html_viewed.to_string()
    );
    println!(
        "{:<24} {:>22} {:>22} {:>22}",
        "Unique responses",
        stats.unique_responses.total.to_string(),
        stats.unique_responses.html.to_string(),
        stats.unique_responses.plain.to_string()
    );
    println!(
        "{:<24} {:>22} {:>22} {:>22}",
        "Total responses",
        stats.total_responses.total,
        stats.total_responses.html,
        stats.total_responses.plain
    );
    println!(
        "{:<24} {:>22} {:>22} {:>22}",
        "Links per respondent",
        stats.links_per_respondent.total,
        stats.links_per_respondent.html,
        stats.links_per_respondent.plain
    );

    println!();
    if report.links.is_empty() {
        println!("No link responses recorded.");
    } else {
        println!("{:<48} {:>10} {:>10} {:>10}", "Link", "HTML", "Plain", "Total");
        println!("{}", "-".repeat(81));
        for row in &report.links.rows {
            println!(
                "{:<48} {:>10} {:>10} {:>10}",
                truncate(&row.label, 48),
                row.html_clicks,
                row.plain_clicks,
                row.total_clicks
            );
        }
    }

    println!();
    println!("Returned mails ({})", stats.bounces.total);
    println!("{}", "-".repeat(48));
    for row in &stats.bounces.rows {
        println!("{:<24} {:>22}", row.category.to_string(), row.share.to_string());
    }

    for supplement in &report.supplements {
        println!();
        println!("[{}]", supplement.hook);
        println!("{}", supplement.content);
    }
}

fn truncate(label: &str, width: usize) -> String {
    if label.chars().count() <= width {
        return label.to_string();
    }
    let mut short: String = label.chars().take(width.saturating_sub(1)).collect();
    short.push('…');
    short
}
