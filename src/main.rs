use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use vpa_anomaly_detector::app::{bootstrap_trackers, start_workers};
use vpa_anomaly_detector::config::{Config, LoggingConfig, DEFAULT_CONFIG_PATH};
use vpa_anomaly_detector::feed::{BarUpdate, ReplayFeed, WsFeedClient};
use vpa_anomaly_detector::history::{
    HistoricalDataSource, IgRestHistory, MarketSummary, SyntheticHistory,
};
use vpa_anomaly_detector::notify::{
    DeliveryChannel, LogSink, NotificationDispatcher, NotificationSink, WebhookChannel,
};
use vpa_anomaly_detector::runtime::route_updates;

#[derive(Parser)]
#[command(
    name = "vpa-anomaly-detector",
    version,
    about = "Flags high-volume reversal candles on streaming market data",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap all markets and monitor the live feed until Ctrl+C
    Monitor(PipelineArgs),
    /// Run the pipeline over a recorded JSON-lines feed
    Replay(ReplayArgs),
    /// Print configured markets and the feed items they subscribe to
    Markets(ConfigArgs),
    /// Search the REST gateway for instruments matching a term
    Search(SearchArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// Path to the TOML configuration
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(Args)]
struct PipelineArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Seed rolling windows from configured distributions instead of the REST price history
    #[arg(long, default_value_t = false)]
    synthetic_history: bool,

    /// Deliver anomalies through the notification queue (webhook from VPA_WEBHOOK_URL)
    #[arg(long, default_value_t = false)]
    notify: bool,
}

#[derive(Args)]
struct ReplayArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,

    /// JSON-lines file of recorded bar updates
    #[arg(long)]
    input: PathBuf,
}

#[derive(Args)]
struct SearchArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Instrument name or epic fragment, e.g. "gold"
    term: String,
}

enum FeedSource {
    Live,
    Replay(PathBuf),
}

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Markets(args) => {
            let config = Config::load(&args.config)?;
            print_markets(&config);
            Ok(())
        }
        Commands::Search(args) => {
            let config = Config::load(&args.config.config)?;
            search_markets(&config, &args.term).await
        }
        Commands::Monitor(args) => {
            let config = load_with_logging(&args.config.config)?;
            run_pipeline(config, &args, FeedSource::Live).await
        }
        Commands::Replay(args) => {
            let config = load_with_logging(&args.pipeline.config.config)?;
            run_pipeline(config, &args.pipeline, FeedSource::Replay(args.input)).await
        }
    }
}

fn load_with_logging(path: &Path) -> Result<Config> {
    let config = match Config::load(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging)?;
    tracing::info!(
        config = %path.display(),
        markets = config.markets.len(),
        ws_url = %config.feed.ws_url,
        "Starting vpa-anomaly-detector"
    );
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    match &logging.file {
        Some(file) => {
            let path = Path::new(file);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let log_file = std::fs::File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(log_file)
                .with_ansi(false)
                .json()
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn print_markets(config: &Config) {
    for market in &config.markets {
        println!(
            "{:<24} {:<28} {:<9} {}",
            market.name,
            market.epic,
            market.resolution.to_string(),
            market.subscription_key()
        );
    }
    println!();
    for key in config.subscription_keys() {
        println!("subscribe {}", key);
    }
}

async fn search_markets(config: &Config, term: &str) -> Result<()> {
    let credentials = config
        .ig
        .credentials()
        .context("market search needs session credentials")?;
    let client = IgRestHistory::new(&config.ig.rest_base_url, credentials)?;
    let markets = client.search_markets(term).await?;
    print_search_results(&markets);
    Ok(())
}

fn print_search_results(markets: &[MarketSummary]) {
    let price = |p: Option<f64>| p.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v));
    println!(
        "{:<28} {:<32} {:<12} {:<8} {:>10} {:>10} {}",
        "EPIC", "NAME", "TYPE", "EXPIRY", "BID", "OFFER", "STATUS"
    );
    for market in markets {
        println!(
            "{:<28} {:<32} {:<12} {:<8} {:>10} {:>10} {}",
            market.epic,
            market.instrument_name,
            market.instrument_type,
            market.expiry,
            price(market.bid),
            price(market.offer),
            market.market_status
        );
    }
    if markets.is_empty() {
        println!("no markets found");
    }
}

fn history_source(config: &Config, synthetic: bool) -> Result<Box<dyn HistoricalDataSource>> {
    if synthetic {
        return Ok(Box::new(SyntheticHistory::new(
            config.history.synthetic.clone(),
            config.tracker.window,
            config.history.seed,
        )));
    }
    let credentials = config
        .ig
        .credentials()
        .context("REST price history needs session credentials (or use --synthetic-history)")?;
    Ok(Box::new(IgRestHistory::new(&config.ig.rest_base_url, credentials)?))
}

fn notification_sinks(
    config: &Config,
    notify: bool,
) -> Result<(Vec<Arc<dyn NotificationSink>>, Option<JoinHandle<()>>)> {
    let mut sinks: Vec<Arc<dyn NotificationSink>> = Vec::new();
    if config.notifications.log {
        sinks.push(Arc::new(LogSink));
    }
    if !notify {
        return Ok((sinks, None));
    }

    let mut channels: Vec<Box<dyn DeliveryChannel>> = Vec::new();
    match &config.notifications.webhook_url {
        Some(url) => channels.push(Box::new(WebhookChannel::new(url)?)),
        None => tracing::warn!("--notify set but VPA_WEBHOOK_URL is not configured"),
    }
    if channels.is_empty() {
        return Ok((sinks, None));
    }
    let (sink, handle) =
        NotificationDispatcher::spawn(channels, config.notifications.queue_capacity);
    sinks.push(Arc::new(sink));
    Ok((sinks, Some(handle)))
}

async fn run_pipeline(config: Config, args: &PipelineArgs, feed: FeedSource) -> Result<()> {
    let source = history_source(&config, args.synthetic_history)?;
    let (sinks, dispatcher) = notification_sinks(&config, args.notify)?;

    let (trackers, failures) = bootstrap_trackers(
        &config.markets,
        config.tracker_settings(),
        source.as_ref(),
        &sinks,
        chrono::Utc::now(),
    )
    .await;
    drop(sinks);
    if trackers.is_empty() {
        bail!("no tracker could be bootstrapped ({} failed)", failures.len());
    }

    let (registry, workers) = start_workers(trackers, config.feed.channel_capacity, true);
    let (feed_tx, feed_rx) = mpsc::channel::<BarUpdate>(config.feed.channel_capacity);
    let router = tokio::spawn(route_updates(registry, feed_rx));

    match feed {
        FeedSource::Live => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let client = WsFeedClient::new(&config.feed.ws_url, config.subscription_keys())?;
            let mut feed_task =
                tokio::spawn(async move { client.connect_and_run(feed_tx, shutdown_rx).await });

            let interrupted = tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    res.context("failed to listen for Ctrl+C")?;
                    true
                }
                res = &mut feed_task => {
                    res.context("feed task panicked")??;
                    false
                }
            };
            if interrupted {
                tracing::info!("Ctrl+C received, shutting down");
                let _ = shutdown_tx.send(true);
                feed_task.await.context("feed task panicked")??;
            }
        }
        FeedSource::Replay(path) => {
            ReplayFeed::new(&path).run(feed_tx).await?;
        }
    }

    router.await.context("router task panicked")?;
    for worker in workers {
        let (tracker, stats) = worker.await.context("tracker worker panicked")?;
        println!(
            "{}",
            serde_json::json!({
                "tracker": tracker.name(),
                "resolution": tracker.resolution(),
                "received": stats.received,
                "candles": stats.candles,
                "anomalies": stats.anomalies,
                "rejected": stats.rejected,
                "volume": tracker.volume_stats(),
                "spread": tracker.spread_stats(),
            })
        );
    }
    if let Some(dispatcher) = dispatcher {
        dispatcher.await.context("notification dispatcher panicked")?;
    }
    Ok(())
}
