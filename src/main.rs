mod crawler;
mod db;
mod ledger;
mod parser;
mod record;
mod server;
mod sink;
mod supervisor;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use crate::crawler::CrawlConfig;
use crate::supervisor::{LogBuffer, ProcessLauncher, StopTimeouts, Supervisor};

#[derive(Parser)]
#[command(name = "review_scraper", about = "Polite otzovik.com review crawler and loader")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl all listing pages and save new reviews as JSON
    Crawl {
        /// First listing page; its pager gives the page count
        #[arg(long, default_value = crawler::DEFAULT_START_URL)]
        start_url: String,
        /// Directory holding one {id}.json per review
        #[arg(long, env = "INTERMEDIATE_DATASET_DIR", default_value = "intermediate_dataset")]
        dataset_dir: PathBuf,
        /// Minimum delay between requests, in milliseconds
        #[arg(long, default_value_t = 10_000)]
        delay_ms: u64,
        /// Concurrent fetch workers (pacing still applies globally)
        #[arg(short, long, default_value_t = 2)]
        workers: usize,
        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
        /// Override the User-Agent header
        #[arg(long)]
        user_agent: Option<String>,
    },
    /// Load the JSON dataset into a fresh SQLite database
    Organize {
        #[arg(long, env = "INTERMEDIATE_DATASET_DIR", default_value = "intermediate_dataset")]
        input_dir: PathBuf,
        #[arg(long, env = "REVIEWS_DB", default_value = db::DEFAULT_DB_PATH)]
        output_db: PathBuf,
    },
    /// Run the control HTTP server
    Serve {
        #[arg(long, env = "REVIEWS_BIND", default_value = "127.0.0.1:11001")]
        bind: String,
        /// Database used by /organize and /charts when a request names none
        #[arg(long, env = "REVIEWS_DB", default_value = db::DEFAULT_DB_PATH)]
        db: PathBuf,
    },
    /// Show dataset and database statistics
    Stats {
        #[arg(long, env = "INTERMEDIATE_DATASET_DIR", default_value = "intermediate_dataset")]
        dataset_dir: PathBuf,
        #[arg(long, env = "REVIEWS_DB", default_value = db::DEFAULT_DB_PATH)]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Crawl {
            start_url,
            dataset_dir,
            delay_ms,
            workers,
            timeout_secs,
            user_agent,
        } => {
            let defaults = CrawlConfig::default();
            let config = CrawlConfig {
                start_url,
                dataset_dir,
                delay: Duration::from_millis(delay_ms),
                workers,
                timeout: Duration::from_secs(timeout_secs.max(1)),
                user_agent: user_agent.unwrap_or(defaults.user_agent.clone()),
                ..defaults
            };
            let stats = crawler::run(config).await?;
            println!(
                "Done: {} new reviews ({} duplicates, {} already known, {} fetch errors, {} parse failures, {} write failures).",
                stats.written,
                stats.duplicates,
                stats.skipped_known,
                stats.fetch_errors,
                stats.parse_failures,
                stats.write_failures
            );
            Ok(())
        }
        Commands::Organize {
            input_dir,
            output_db,
        } => {
            if let Some(parent) = output_db.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let n = tokio::task::spawn_blocking(move || db::organize(&input_dir, &output_db))
                .await??;
            println!("Loaded {} reviews.", n);
            Ok(())
        }
        Commands::Serve { bind, db } => {
            let logs = Arc::new(LogBuffer::default());
            let launcher = ProcessLauncher::current_exe()?.with_workdir(std::env::current_dir()?);
            let supervisor = Supervisor::new(Box::new(launcher), logs, StopTimeouts::default());
            let state = server::AppState {
                supervisor: Arc::new(supervisor),
                default_db: db,
            };
            server::serve(&bind, state).await
        }
        Commands::Stats { dataset_dir, db } => {
            let ledger = ledger::Ledger::seed_from_dir(&dataset_dir)?;
            println!("Dataset:   {} reviews in {}", ledger.len(), dataset_dir.display());
            if db.is_file() {
                let conn = db::connect(&db)?;
                println!("Database:  {} reviews in {}", db::count_reviews(&conn)?, db.display());
                for b in db::histogram(&conn, db::HistogramKind::Stars)? {
                    println!("  {} stars: {} reviews", b.value, b.count);
                }
            } else {
                println!("Database:  not built yet ({})", db.display());
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
