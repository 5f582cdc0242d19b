use clap::Parser;
use marlin::broker::AlpacaBroker;
use marlin::cli::{Cli, Commands};
use marlin::config::{AppConfig, LoggingConfig};
use marlin::data::CandleFeed;
use marlin::engine::{BacktestEngine, EmergencyStop, Orchestrator, PositionRegistry, Reconciler};
use marlin::error::{MarlinError, Result};
use marlin::execution::{ExecutionAdapter, LiveExecution, PaperExecution};
use marlin::risk::RiskPolicy;
use marlin::store::SqliteStore;
use marlin::strategy;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)?;
    let _log_guard = init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for problem in &errors {
            error!("Config error: {problem}");
        }
        return Err(MarlinError::Validation(format!(
            "{} configuration errors",
            errors.len()
        )));
    }

    match cli.command {
        Commands::Run => run_bot(config).await,
        Commands::Backtest { limit, from, to } => run_backtest(config, limit, from, to).await,
    }
}

async fn run_bot(config: AppConfig) -> Result<()> {
    let store = Arc::new(
        SqliteStore::connect(&config.database.url, config.database.max_connections).await?,
    );

    let strategies = strategy::build_registry(&config.trading.strategies)?;
    let risk = RiskPolicy::new(config.risk.clone());
    let registry = PositionRegistry::load(Arc::clone(&store)).await?;
    let emergency = EmergencyStop::new(Arc::clone(&store), &config.emergency);

    let broker = Arc::new(AlpacaBroker::new(
        &std::env::var("ALPACA_API_KEY").unwrap_or_default(),
        &std::env::var("ALPACA_SECRET_KEY").unwrap_or_default(),
        config.paper.enabled,
        &config.trading.timeframe,
    )?);
    broker.check_connection().await?;

    let adapter: Arc<dyn ExecutionAdapter> = if config.paper.enabled {
        info!("Paper trading mode");
        Arc::new(PaperExecution::new(Arc::clone(&store), config.paper.starting_balance).await?)
    } else {
        Arc::new(LiveExecution::new(
            Arc::clone(&broker) as Arc<dyn marlin::broker::BrokerClient>,
            config.execution.max_retries,
            Duration::from_millis(config.execution.retry_base_delay_ms),
        ))
    };

    let mut orchestrator = Orchestrator::new(
        strategies,
        risk,
        registry,
        adapter,
        Arc::clone(&store),
        emergency,
        config.trading.clone(),
        config.execution.clone(),
    );

    // Reconciliation only makes sense against a real broker book
    let reconciler = if config.paper.enabled {
        None
    } else {
        let reconciler = Reconciler::new(
            Arc::clone(&broker) as Arc<dyn marlin::broker::BrokerClient>,
            Arc::clone(&store),
        );
        info!("Running startup reconciliation");
        // Startup reconciliation failures are not fatal; the periodic pass
        // will retry
        match orchestrator_reconcile(&mut orchestrator, &reconciler).await {
            Ok(()) => {}
            Err(e) => error!("Startup reconciliation failed: {e}"),
        }
        Some(reconciler)
    };

    let feed: Arc<dyn CandleFeed> = broker;
    orchestrator.run_live(feed, reconciler).await
}

async fn orchestrator_reconcile(
    orchestrator: &mut Orchestrator,
    reconciler: &Reconciler,
) -> Result<()> {
    let report = orchestrator.reconcile_now(reconciler).await?;
    info!(
        "Reconciliation: adopted={}, stale_closed={}, matched={}",
        report.adopted.len(),
        report.stale_closed.len(),
        report.matched.len()
    );
    Ok(())
}

async fn run_backtest(
    config: AppConfig,
    limit: usize,
    from: Option<chrono::DateTime<chrono::Utc>>,
    to: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<()> {
    let strategies = strategy::build_registry(&config.trading.strategies)?;

    let feed = AlpacaBroker::new(
        &std::env::var("ALPACA_API_KEY").unwrap_or_default(),
        &std::env::var("ALPACA_SECRET_KEY").unwrap_or_default(),
        true,
        &config.trading.timeframe,
    )?;

    info!(
        "Fetching {limit} candles per pair for {}",
        config.trading.pairs.join(", ")
    );
    let candles = feed.fetch_recent(&config.trading.pairs, limit).await?;

    let mut engine = BacktestEngine::new(&config, strategies).await?;
    let report = engine.run(candles, from, to).await?;

    println!("{report}");
    Ok(())
}

fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    if let Some(file) = &config.file {
        let path = Path::new(file);
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let name = path.file_name().map(|n| n.to_string_lossy().to_string());
        let appender =
            tracing_appender::rolling::never(dir, name.unwrap_or_else(|| "marlin.log".to_string()));
        let (writer, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        return Some(guard);
    }

    if config.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    None
}
