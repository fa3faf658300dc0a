//! ReportWatch - alerts on report metrics that grew since the last run
//!
//! A scheduled CLI job that pulls report captures, compares them with the
//! day's stored snapshot and notifies about new spend, leads and sales.
//!
//! Exit codes:
//!   0 - Success (with or without alerts)
//!   1 - Runtime error (configuration, snapshot save failure, etc.)

mod analysis;
mod cli;
mod config;
mod models;
mod normalize;
mod pipeline;
mod report;
mod source;
mod store;

use analysis::{DeltaEngine, EngineConfig};
use anyhow::{Context, Result};
use chrono::Utc;
use cli::Args;
use config::{Config, NotifierKind, SourceKind, StateBackend};
use normalize::{NormalizerConfig, RowNormalizer};
use pipeline::Pipeline;
use report::{
    AlertComposer, ComposerConfig, Notifier, StdoutNotifier, TelegramConfig, TelegramNotifier,
};
use source::{FileSource, HttpSource, HttpSourceConfig, ReportSource};
use std::path::PathBuf;
use store::gist::GistConfig;
use store::{FileStateStore, GistStateStore, SnapshotStore, StateStore};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Config comes first so `general.verbose` can set the log level
    let (mut config, origin) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    init_logging(&args, &config);

    info!("ReportWatch v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    match origin {
        ConfigOrigin::File(path) => info!("Loaded config from {}", path.display()),
        ConfigOrigin::Defaults => debug!("No config file found, using defaults"),
        ConfigOrigin::Fallback(e) => warn!("Failed to load config, using defaults: {:#}", e),
    }

    if let Err(e) = run(args, config).await {
        error!("Run failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .reportwatch.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(config::DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  .reportwatch.toml already exists. Remove it first or edit it manually.");
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).context("Failed to write .reportwatch.toml")?;

    println!("✅ Created .reportwatch.toml with default settings.");
    println!("   Edit it to set the source, state backend, chat and thresholds.");
    Ok(())
}

/// Initialize logging based on verbosity settings. `RUST_LOG` wins when set.
fn init_logging(args: &Args, config: &Config) {
    let level = args
        .log_level(config.general.verbose)
        .to_string()
        .to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Validate configuration, wire the collaborators and execute one run.
async fn run(args: Args, config: Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let today = match args.run_date() {
        Some(day) => day,
        None => {
            let offset = config.reference_offset()?;
            Utc::now().with_timezone(&offset).format("%Y-%m-%d").to_string()
        }
    };
    info!("Run date {} (UTC{})", today, config.general.tz_offset);

    let display_dimensions = if config.rows.display_dimensions.is_empty() {
        config.rows.key_dimensions.clone()
    } else {
        config.rows.display_dimensions.clone()
    };

    let pipeline = Pipeline {
        source: build_source(&config)?,
        normalizer: RowNormalizer::new(NormalizerConfig::from(&config.rows)),
        engine: DeltaEngine::new(EngineConfig::from(&config.thresholds)),
        store: SnapshotStore::new(build_state_store(&config)?, config.state.key.clone()),
        composer: AlertComposer::new(ComposerConfig {
            display_dimensions,
            max_message_len: config.notifier.max_message_len,
        }),
        notifier: build_notifier(&config, args.dry_run)?,
        on_empty: config.policy.on_empty,
        persist: !args.dry_run,
    };

    let summary = pipeline.run(&today).await?;

    match summary.mode {
        Some(mode) => info!(
            "Done ({}): {} rows, {} spend / {} lead / {} sale alerts, {} message(s), saved: {}",
            mode,
            summary.rows,
            summary.spend,
            summary.leads,
            summary.sales,
            summary.messages,
            summary.saved
        ),
        None => info!("Done: no rows, state untouched"),
    }

    Ok(())
}

/// Where the configuration came from, reported once logging is up.
enum ConfigOrigin {
    File(PathBuf),
    Defaults,
    /// The default file exists but could not be loaded.
    Fallback(anyhow::Error),
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigOrigin)> {
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigOrigin::File(config_path.clone())));
    }

    Ok(match Config::load_default() {
        Ok(Some(config)) => (
            config,
            ConfigOrigin::File(PathBuf::from(config::DEFAULT_CONFIG_FILE)),
        ),
        Ok(None) => (Config::default(), ConfigOrigin::Defaults),
        Err(e) => (Config::default(), ConfigOrigin::Fallback(e)),
    })
}

/// Read a secret from the environment variable named in the config.
fn secret(var: &str) -> Result<String> {
    std::env::var(var).with_context(|| format!("Environment variable {} is not set", var))
}

fn build_source(config: &Config) -> Result<Box<dyn ReportSource>> {
    let source: Box<dyn ReportSource> = match config.source.kind {
        SourceKind::File => Box::new(FileSource::new(&config.source.path)),
        SourceKind::Http => {
            let url = config
                .source
                .url
                .clone()
                .context("source.url is required for the http source")?;
            let token = match config.source.token_env {
                Some(ref var) => Some(secret(var)?),
                None => None,
            };
            Box::new(HttpSource::new(HttpSourceConfig {
                url,
                token,
                timeout_seconds: config.source.timeout_seconds,
            })?)
        }
    };
    info!("Report source: {}", source.describe());
    Ok(source)
}

fn build_state_store(config: &Config) -> Result<Box<dyn StateStore>> {
    let store: Box<dyn StateStore> = match config.state.backend {
        StateBackend::File => Box::new(FileStateStore::new(&config.state.dir)),
        StateBackend::Gist => {
            let gist_id = config
                .state
                .gist_id
                .clone()
                .context("state.gist_id is required for the gist backend")?;
            Box::new(GistStateStore::new(GistConfig {
                gist_id,
                token: secret(&config.state.token_env)?,
                timeout_seconds: config.state.timeout_seconds,
                ..Default::default()
            })?)
        }
    };
    info!("State store: {}", store.describe());
    Ok(store)
}

fn build_notifier(config: &Config, dry_run: bool) -> Result<Box<dyn Notifier>> {
    if dry_run {
        info!("Dry run: alerts go to stdout");
        return Ok(Box::new(StdoutNotifier));
    }

    match (config.notifier.kind, config.notifier.chat_id.clone()) {
        (NotifierKind::Stdout, _) => Ok(Box::new(StdoutNotifier)),
        (NotifierKind::Telegram, None) => {
            warn!("notifier.chat_id not set, alerts go to stdout");
            Ok(Box::new(StdoutNotifier))
        }
        (NotifierKind::Telegram, Some(chat_id)) => {
            let notifier = TelegramNotifier::new(TelegramConfig {
                token: secret(&config.notifier.token_env)?,
                chat_id,
                timeout_seconds: config.notifier.timeout_seconds,
            })?;
            info!("Notifier: {}", notifier.describe());
            Ok(Box::new(notifier))
        }
    }
}
