//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use namex_core::pipeline::{PipelineStats, ProgressReporter};
use namex_core::queue::{self, NatsQueue};
use namex_core::{Dispatcher, EnrichmentWorker, StorageSink};
use namex_shared::{
    AppConfig, EnrichmentResult, PipelineConfig, QueueConfig, WhoisConfig, init_config,
    init_config_at, load_config, load_config_from,
};
use namex_storage::Storage;
use namex_whois::{TldRegistry, WhoisResolver};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// namex: domain metadata and WHOIS expiry enrichment.
#[derive(Parser)]
#[command(
    name = "namex",
    version,
    about = "Enrich domain records with page metadata and WHOIS expiry dates.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.namex/namex.toml).
    #[arg(long, global = true, env = "NAMEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding `[store] path`.
    #[arg(long, global = true, env = "NAMEX_DB")]
    pub db: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Load domains (one per line, `#` comments allowed) into the store.
    Import {
        /// Path to the domain list.
        file: PathBuf,
    },

    /// Enrich all pending records in-process.
    Run {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Publish pending records to the work queue.
    Publish {
        /// Also publish records whose stored expiry has passed.
        #[arg(long)]
        refresh_expired: bool,

        /// NATS server URL, overriding `[queue] url`.
        #[arg(long)]
        queue_url: Option<String>,
    },

    /// Consume the work queue: enrich, persist, ack.
    Work {
        /// NATS server URL, overriding `[queue] url`.
        #[arg(long)]
        queue_url: Option<String>,
    },

    /// Query WHOIS for one domain and print the expiry date.
    Whois {
        domain: String,

        /// Print the raw server response.
        #[arg(long)]
        raw: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Pipeline sizing flags; unset values come from the config file.
#[derive(clap::Args)]
pub(crate) struct PipelineArgs {
    /// Concurrent enrichment workers.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Concurrent sink tasks.
    #[arg(long)]
    sink_workers: Option<usize>,

    /// Buffer capacity between stages.
    #[arg(long)]
    buffer: Option<usize>,

    /// Also re-enrich records whose stored expiry has passed.
    #[arg(long)]
    refresh_expired: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "namex=info",
        1 => "namex=debug",
        _ => "namex=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(cli.config.as_deref()).await,
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()).await,
        };
    }

    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(db) = &cli.db {
        config.store.path = db.to_string_lossy().into_owned();
    }

    match cli.command {
        Command::Import { file } => cmd_import(&config, &file).await,
        Command::Run { pipeline } => cmd_run(&config, pipeline).await,
        Command::Publish {
            refresh_expired,
            queue_url,
        } => cmd_publish(&mut config, refresh_expired, queue_url).await,
        Command::Work { queue_url } => cmd_work(&mut config, queue_url).await,
        Command::Whois { domain, raw } => cmd_whois(&config, &domain, raw).await,
        Command::Config { .. } => Ok(()),
    }
}

/// Open the record store configured in `[store]`.
async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = config.store.resolved_path()?;
    info!(path = %path.display(), "opening record store");
    Ok(Arc::new(Storage::open(&path).await?))
}

/// Token cancelled on the first Ctrl-C.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight records");
            child.cancel();
        }
    });
    token
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_import(config: &AppConfig, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;

    let storage = open_storage(config).await?;
    let stats = storage.import_domains(content.lines()).await?;

    info!(inserted = stats.inserted, skipped = stats.skipped, "import finished");
    println!();
    println!("  Imported: {}", stats.inserted);
    println!("  Skipped:  {}", stats.skipped);
    println!("  Pending:  {}", storage.count_pending(false).await?);
    println!();
    Ok(())
}

async fn cmd_run(config: &AppConfig, args: PipelineArgs) -> Result<()> {
    let mut pipeline = PipelineConfig::from(config);
    if let Some(workers) = args.workers {
        pipeline.workers = workers.max(1);
    }
    if let Some(sink_workers) = args.sink_workers {
        pipeline.sink_workers = sink_workers.max(1);
    }
    if let Some(buffer) = args.buffer {
        pipeline.buffer = buffer.max(1);
    }
    pipeline.refresh_expired |= args.refresh_expired;

    let storage = open_storage(config).await?;
    let enricher = Arc::new(EnrichmentWorker::from_config(config)?);
    let sink = Arc::new(StorageSink::new(storage.clone()));
    let dispatcher = Dispatcher::new(storage, pipeline.refresh_expired);

    let stats = namex_core::run_pipeline(
        dispatcher,
        enricher,
        sink,
        &pipeline,
        Arc::new(CliProgress::new()),
        shutdown_on_ctrl_c(),
    )
    .await?;

    println!();
    println!("  Enrichment finished");
    println!("  Dispatched: {}", stats.dispatched);
    println!("  Persisted:  {}", stats.persisted);
    println!("  Degraded:   {}", stats.degraded);
    println!("  Failed:     {}", stats.failed);
    println!("  Time:       {:.1}s", stats.elapsed.as_secs_f64());
    println!();
    Ok(())
}

async fn cmd_publish(
    config: &mut AppConfig,
    refresh_expired: bool,
    queue_url: Option<String>,
) -> Result<()> {
    if let Some(url) = queue_url {
        config.queue.url = url;
    }
    let pipeline = PipelineConfig::from(&*config);
    let refresh_expired = refresh_expired || pipeline.refresh_expired;

    let storage = open_storage(config).await?;
    let nats = NatsQueue::connect(&QueueConfig::from(&*config)).await?;
    let dispatcher = Dispatcher::new(storage, refresh_expired);

    let published =
        queue::run_producer(&dispatcher, &nats, pipeline.buffer, shutdown_on_ctrl_c()).await?;

    println!("  Published {published} record(s) to '{}'", config.queue.subject);
    Ok(())
}

async fn cmd_work(config: &mut AppConfig, queue_url: Option<String>) -> Result<()> {
    if let Some(url) = queue_url {
        config.queue.url = url;
    }
    let queue_config = QueueConfig::from(&*config);

    let storage = open_storage(config).await?;
    let enricher = EnrichmentWorker::from_config(config)?;
    let sink = StorageSink::new(storage);

    let nats = NatsQueue::connect(&queue_config).await?;
    let mut consumer = nats.consumer().await?;

    let stats = queue::run_worker(
        &mut consumer,
        &enricher,
        &sink,
        queue_config.max_deliveries,
        shutdown_on_ctrl_c(),
    )
    .await?;

    println!();
    println!("  Worker stopped");
    println!("  Acked:    {}", stats.acked);
    println!("  Degraded: {}", stats.degraded);
    println!("  Retried:  {}", stats.retried);
    println!("  Dropped:  {}", stats.dropped + stats.poisoned);
    println!();
    Ok(())
}

async fn cmd_whois(config: &AppConfig, domain: &str, raw: bool) -> Result<()> {
    let whois_config = WhoisConfig::from(config);
    let registry = Arc::new(TldRegistry::with_overrides(&whois_config.servers));
    let resolver = WhoisResolver::new(registry, &whois_config);

    let (normalized, server) = resolver.server_for(domain)?;
    println!("  Domain: {normalized}");
    println!("  Server: {server}");

    let response = resolver.query(&normalized).await?;
    if raw {
        println!();
        println!("{response}");
    }

    match namex_whois::extract_expiry(&response) {
        Some(expiry) => println!("  Expiry: {expiry}"),
        None => println!("  Expiry: (not reported)"),
    }
    Ok(())
}

async fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => init_config_at(path)?,
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config: AppConfig = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}",
            )
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn started(&self, pending: u64) {
        self.bar.set_length(pending);
        self.bar.set_message("enriching");
    }

    fn record_done(&self, result: &EnrichmentResult, persisted: bool) {
        self.bar.inc(1);
        if !persisted {
            self.bar
                .set_message(format!("persist failed for id {}", result.domain_id));
        }
    }

    fn finished(&self, _stats: &PipelineStats) {
        self.bar.finish_and_clear();
    }
}
