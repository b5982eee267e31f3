use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use feedrelay::config::Config;
use feedrelay::engine::{CycleOutcome, Engine, Scheduler};
use feedrelay::feed::{opml, DateNormalizer, HttpSource};
use feedrelay::notify::{
    DispatchError, JsonLinesSink, Notifier, OutboxDispatch, TemplateRenderer,
    DEFAULT_OUTBOX_CAPACITY,
};
use feedrelay::storage::{Database, StoreError};
use feedrelay::subscriptions::{SubscribeOutcome, SubscriptionService};
use feedrelay::util::extract_addresses;

/// Get the config directory path (~/.config/feedrelay/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedrelay"))
}

#[derive(Parser, Debug)]
#[command(name = "feedrelay", version, about = "Relays new feed items to subscribers")]
struct Args {
    /// Config file (default: ~/.config/feedrelay/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check feeds on a schedule until interrupted, writing notifications to stdout
    Run {
        /// Seconds between cycles
        #[arg(long)]
        interval: Option<u64>,
        /// Feeds checked per cycle
        #[arg(long)]
        feeds_per_cycle: Option<usize>,
    },
    /// Run a single update cycle and exit
    Check {
        #[arg(long)]
        feeds_per_cycle: Option<usize>,
    },
    /// Subscribe to one or more feed addresses
    Subscribe {
        #[arg(long)]
        subscriber: i64,
        #[arg(long, default_value = "en")]
        locale: String,
        /// Feed addresses; anything that is not an http(s) URL is ignored
        #[arg(required = true)]
        addresses: Vec<String>,
    },
    /// Drop a subscription by feed address or slug
    Unsubscribe {
        #[arg(long)]
        subscriber: i64,
        feed: String,
    },
    /// List a subscriber's feeds
    List {
        #[arg(long)]
        subscriber: i64,
    },
    /// Subscribe to every feed in an OPML file
    Import {
        #[arg(long)]
        subscriber: i64,
        #[arg(long, default_value = "en")]
        locale: String,
        file: PathBuf,
    },
    /// Remove all of a subscriber's subscriptions
    Forget {
        #[arg(long)]
        subscriber: i64,
    },
    /// Subscriber and feed counts
    Stats,
    /// Send an announcement to every subscriber, writing messages to stdout
    Broadcast {
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Forward a subscriber's message to the operator, writing it to stdout
    Feedback {
        #[arg(long)]
        subscriber: i64,
        /// Operator subscriber id (default: operator_id from the config)
        #[arg(long)]
        operator: Option<i64>,
        #[arg(required = true)]
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    // Logging is not up yet, so load problems surface through the error chain
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    match &args.command {
        Command::Run {
            interval,
            feeds_per_cycle,
        } => {
            if let Some(interval) = interval {
                config.refresh_interval_seconds = *interval;
            }
            if let Some(n) = feeds_per_cycle {
                config.feeds_per_cycle = *n;
            }
        }
        Command::Check { feeds_per_cycle } => {
            if let Some(n) = feeds_per_cycle {
                config.feeds_per_cycle = *n;
            }
        }
        _ => {}
    }
    config.validate()?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    prepare_config_dir(&config_dir)?;
    let db_path = config.database_path_or(&config_dir);
    let db = open_database(&db_path).await?;

    let dates = DateNormalizer::new(Some(&config.date_locale));
    let client = HttpSource::build_client(config.request_timeout())
        .context("Failed to build HTTP client")?;
    let source = Arc::new(HttpSource::new(client, config.request_timeout(), dates));

    match args.command {
        Command::Run { .. } => run(db, source, &config).await,
        Command::Check { .. } => check(db, source, &config).await,
        Command::Subscribe {
            subscriber,
            locale,
            addresses,
        } => {
            let service = SubscriptionService::new(db, source);
            let addresses = extract_addresses(&addresses.join(" "));
            if addresses.is_empty() {
                anyhow::bail!("No http(s) feed addresses found in the arguments");
            }
            for address in addresses {
                match service.subscribe(subscriber, &address, &locale).await {
                    Ok(SubscribeOutcome::Created(feed)) => {
                        println!("Subscribed to {} ({})", feed.title, feed.slug);
                    }
                    Ok(SubscribeOutcome::AlreadySubscribed(feed)) => {
                        println!("Already subscribed to {} ({})", feed.title, feed.slug);
                    }
                    Err(e) => eprintln!("Error: {e:#}"),
                }
            }
            Ok(())
        }
        Command::Unsubscribe { subscriber, feed } => {
            let service = SubscriptionService::new(db, source);
            match service.unsubscribe(subscriber, &feed).await? {
                Some(feed) => println!("Unsubscribed from {} ({})", feed.title, feed.url),
                None => println!("Not subscribed to '{feed}'"),
            }
            Ok(())
        }
        Command::List { subscriber } => {
            let feeds = SubscriptionService::new(db, source).list(subscriber).await?;
            if feeds.is_empty() {
                println!("No subscriptions");
            }
            for feed in feeds {
                let health = if feed.healthy { "" } else { " [broken]" };
                println!("{}\t{}\t{}{}", feed.slug, feed.title, feed.url, health);
            }
            Ok(())
        }
        Command::Import {
            subscriber,
            locale,
            file,
        } => {
            // SEC-008: Canonicalize to resolve symlinks and prevent path traversal
            let file = file
                .canonicalize()
                .with_context(|| format!("Failed to resolve import file: {}", file.display()))?;
            let entries = opml::read_file(&file)
                .await
                .with_context(|| format!("Failed to read OPML file: {}", file.display()))?;
            if entries.is_empty() {
                eprintln!("Warning: No valid feeds found in OPML file");
                return Ok(());
            }

            let service = SubscriptionService::new(db, source);
            let report = service.import(subscriber, &locale, &entries).await?;
            for (address, reason) in &report.failed {
                eprintln!("Skipped {address}: {reason}");
            }
            println!(
                "Imported {} feeds ({} already subscribed, {} failed)",
                report.created,
                report.existing,
                report.failed.len()
            );
            Ok(())
        }
        Command::Forget { subscriber } => {
            let removed = SubscriptionService::new(db, source).forget(subscriber).await?;
            println!("Removed {removed} subscriptions");
            Ok(())
        }
        Command::Stats => {
            let stats = SubscriptionService::new(db, source).stats().await?;
            println!("subscribers: {}\nfeeds: {}", stats.subscribers, stats.feeds);
            Ok(())
        }
        Command::Broadcast { text } => {
            let (outbox, sink) = outbox();
            let report = SubscriptionService::new(db, source)
                .with_messaging(Arc::new(TemplateRenderer::new()), Arc::new(outbox))
                .broadcast(&text.join(" "))
                .await?;
            drain(sink).await?;
            eprintln!("sent {} announcements, {} failed", report.sent, report.failed);
            Ok(())
        }
        Command::Feedback {
            subscriber,
            operator,
            text,
        } => {
            let operator = operator
                .or(config.operator_id)
                .context("No operator: pass --operator or set operator_id in the config")?;
            let (outbox, sink) = outbox();
            SubscriptionService::new(db, source)
                .with_messaging(Arc::new(TemplateRenderer::new()), Arc::new(outbox))
                .feedback(subscriber, &text.join(" "), operator)
                .await?;
            drain(sink).await
        }
    }
}

fn prepare_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    Ok(())
}

async fn open_database(path: &Path) -> Result<Database> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(StoreError::InstanceLocked) => {
            eprintln!("Error: The feedrelay database is locked by another process. Try again later.");
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

type SinkTask = tokio::task::JoinHandle<Result<u64, DispatchError>>;

/// Outbox whose consumer prints JSON lines to stdout. The consumer finishes
/// once every clone of the outbox is dropped.
fn outbox() -> (OutboxDispatch, SinkTask) {
    let (outbox, rx) = OutboxDispatch::new(DEFAULT_OUTBOX_CAPACITY);
    (outbox, tokio::spawn(JsonLinesSink::stdout().run(rx)))
}

/// Engine wired to a stdout outbox; dropping the engine ends the consumer.
fn build_engine(db: Database, source: Arc<HttpSource>, config: &Config) -> (Engine, SinkTask) {
    let (outbox, sink) = outbox();
    let notifier = Notifier::new(Arc::new(TemplateRenderer::new()), Arc::new(outbox));
    let engine = Engine::new(Arc::new(db), source, notifier, config.feeds_per_cycle);
    (engine, sink)
}

async fn drain(sink: SinkTask) -> Result<()> {
    let written = sink
        .await
        .context("Notification writer panicked")?
        .context("Failed to write notifications")?;
    tracing::debug!(written, "Notification writer finished");
    Ok(())
}

async fn run(db: Database, source: Arc<HttpSource>, config: &Config) -> Result<()> {
    if config.worst_case_cycle() > config.refresh_interval() {
        tracing::warn!(
            worst_case_secs = config.worst_case_cycle().as_secs(),
            interval_secs = config.refresh_interval_seconds,
            "A cycle of timed-out fetches would outlast the refresh interval; ticks will be skipped"
        );
    }

    let (engine, sink) = build_engine(db, source, config);
    let handle = Scheduler::start(Arc::new(engine), config.refresh_interval());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down, waiting for the current feed to finish");

    handle.shutdown().await.context("Scheduler task failed")?;
    drain(sink).await
}

async fn check(db: Database, source: Arc<HttpSource>, config: &Config) -> Result<()> {
    let (engine, sink) = build_engine(db, source, config);
    let outcome = engine.run_cycle().await.context("Update cycle failed")?;
    drop(engine);
    drain(sink).await?;

    if let CycleOutcome::Completed(report) = outcome {
        eprintln!(
            "checked {} of {} feeds: {} failed, {} updated, {} messages",
            report.checked, report.selected, report.failed, report.updated, report.sent
        );
    }
    Ok(())
}
