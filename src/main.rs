use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};

use podsync::{
    CheckInterval, CreateChannelOutcome, Database, NoopReporter, PodcastConfig, PodcastService,
    ProgressEvent, ProgressReporter, ReqwestClient, RunMode, SharedProgressReporter, SyncStats,
    http::DEFAULT_TIMEOUT,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

/// Keep podcast subscriptions in sync with their RSS feeds
#[derive(Parser, Debug)]
#[command(name = "podsync")]
#[command(about = "Keep podcast subscriptions in sync with their RSS feeds")]
#[command(version)]
struct Args {
    /// SQLite database holding channels and episodes
    #[arg(long, default_value = "podsync.db", global = true)]
    db: PathBuf,

    /// How long a channel stays fresh: hourly, daily, weekly or a number of hours
    #[arg(long, default_value = "daily", global = true)]
    check_interval: CheckInterval,

    /// Maximum number of episodes kept per channel
    #[arg(long, default_value = "10", global = true)]
    retention: usize,

    /// Quiet mode - suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed and import its episodes
    Add {
        /// RSS feed URL (file:// URLs are read locally)
        url: String,
    },

    /// Show subscribed channels
    List {
        /// Include each channel's episodes
        #[arg(short, long)]
        episodes: bool,

        /// Only show this channel
        #[arg(long)]
        id: Option<i64>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Remove a channel and its episodes
    DeleteChannel { id: i64 },

    /// Remove a single episode
    DeleteEpisode { id: i64 },

    /// Synchronize due channels once
    Refresh {
        /// Synchronize every channel, fresh or not
        #[arg(short, long)]
        force: bool,
    },

    /// Synchronize due channels periodically until interrupted
    Daemon {
        /// Minutes between checks for due channels
        #[arg(long, default_value = "60")]
        poll_minutes: u64,
    },
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let bar = ProgressBar::new_spinner();
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { mode, due_channels } => {
                self.bar.set_message(format!(
                    "{HEADPHONES}{} run • {} channels due",
                    mode.to_string().bold(),
                    due_channels.to_string().cyan()
                ));
            }

            ProgressEvent::ChannelStarted {
                url, index, total, ..
            } => {
                self.bar.set_message(format!(
                    "{SEARCH}[{}/{}] {}",
                    (index + 1).to_string().cyan(),
                    total.to_string().cyan(),
                    truncate_title(&url, 60)
                ));
            }

            ProgressEvent::ChannelCompleted { url, summary, .. } => {
                self.bar.println(format!(
                    "  {SUCCESS}{} {} new, {} pruned",
                    truncate_title(&url, 50).green(),
                    summary.created.to_string().green().bold(),
                    summary.pruned.to_string().yellow()
                ));
            }

            ProgressEvent::ChannelFailed { url, error, .. } => {
                self.bar.println(format!(
                    "  {FAILURE}{} - {}",
                    truncate_title(&url, 40).red(),
                    error.red()
                ));
            }

            ProgressEvent::RunCompleted {
                channels,
                episodes,
                failed,
            } => {
                self.bar.finish_and_clear();
                println!(
                    "\n{PARTY}{} {} channels, {} new episodes, {} failed",
                    "Sync complete:".bold().green(),
                    channels.to_string().cyan(),
                    episodes.to_string().green().bold(),
                    if failed > 0 {
                        failed.to_string().red().bold()
                    } else {
                        failed.to_string().green()
                    }
                );
            }
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let head: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

fn print_failures(stats: &SyncStats) {
    if stats.errors.is_empty() {
        return;
    }
    println!("\n{}", "Failed channels:".red().bold());
    for failure in &stats.errors {
        println!(
            "  {}{} - {}",
            CROSS,
            failure.url.yellow(),
            failure.message.dimmed()
        );
    }
}

async fn list(service: &PodcastService, episodes: bool, id: Option<i64>, json: bool) -> Result<()> {
    let listings = service
        .list_channels(episodes, id)
        .await
        .context("Failed to list channels")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    if listings.is_empty() {
        println!("No channels subscribed");
        return Ok(());
    }

    for listing in &listings {
        let channel = &listing.channel;
        println!(
            "{:>4}  {} [{}] {} episodes",
            channel.id.to_string().dimmed(),
            channel.title.as_deref().unwrap_or(&channel.url).bold(),
            channel.status.to_string().cyan(),
            listing.episode_count
        );
        if let Some(message) = &channel.error_message {
            println!("      {}", message.red());
        }
        for episode in listing.episodes.iter().flatten() {
            println!(
                "      {:>5}  {}  {} [{}]",
                episode.id.to_string().dimmed(),
                episode.publish_date.format("%Y-%m-%d"),
                truncate_title(&episode.title, 60),
                episode.status.to_string().yellow()
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = PodcastConfig {
        check_interval: args.check_interval,
        episode_retention_count: args.retention,
        ..PodcastConfig::default()
    };

    let db = Database::open(&args.db)
        .await
        .with_context(|| format!("Failed to open database {}", args.db.display()))?;
    let client = ReqwestClient::with_timeout(DEFAULT_TIMEOUT).context("Failed to build HTTP client")?;

    // The daemon reports through tracing only
    let reporter: SharedProgressReporter =
        if !args.quiet && matches!(args.command, Command::Refresh { .. }) {
            Arc::new(IndicatifReporter::new())
        } else {
            NoopReporter::shared()
        };
    let service = PodcastService::new(db.clone(), Arc::new(client), config).with_reporter(reporter);

    let result = run(&service, &args).await;
    db.close().await;
    result
}

async fn run(service: &PodcastService, args: &Args) -> Result<()> {
    match &args.command {
        Command::Add { url } => {
            match service
                .create_channel(url)
                .await
                .with_context(|| format!("Failed to add {url}"))?
            {
                CreateChannelOutcome::Created { channel, summary } => {
                    if !args.quiet {
                        println!(
                            "{SUCCESS}{} (id {}) • {} episodes",
                            channel.title.as_deref().unwrap_or(&channel.url).bold().green(),
                            channel.id,
                            summary.created.saturating_sub(summary.pruned as usize)
                        );
                    }
                }
                CreateChannelOutcome::AlreadyExists => {
                    println!("{}", "Channel already subscribed".yellow());
                }
            }
        }

        Command::List { episodes, id, json } => list(service, *episodes, *id, *json).await?,

        Command::DeleteChannel { id } => {
            service
                .delete_channel(*id)
                .await
                .context("Failed to delete channel")?;
        }

        Command::DeleteEpisode { id } => {
            service
                .delete_episode(*id)
                .await
                .context("Failed to delete episode")?;
        }

        Command::Refresh { force } => {
            if !args.quiet {
                println!(
                    "\n{}{} {}\n",
                    MICROPHONE,
                    "podsync".bold().magenta(),
                    "- Podcast Synchronizer".dimmed()
                );
            }

            let mode = if *force { RunMode::Forced } else { RunMode::Scheduled };
            let stats = service.refresh(mode).await.context("Synchronization failed")?;

            if !args.quiet {
                print_failures(&stats);
            }
            if !stats.errors.is_empty() && stats.errors.len() == stats.channels {
                anyhow::bail!("All {} channels failed to synchronize", stats.channels);
            }
        }

        Command::Daemon { poll_minutes } => {
            let every = Duration::from_secs((*poll_minutes).max(1).saturating_mul(60));
            tracing::info!(
                poll_minutes = every.as_secs() / 60,
                check_interval = %args.check_interval,
                "Starting daemon"
            );
            service
                .worker()
                .run_scheduled(every, async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "Failed to listen for shutdown signal");
                        std::future::pending::<()>().await;
                    }
                })
                .await;
        }
    }

    Ok(())
}
