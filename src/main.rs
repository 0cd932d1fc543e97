//! Trade analytics - main entry point
//!
//! This binary provides four subcommands:
//! - refresh: Pull the latest records from the remote datastore
//! - metrics: Print aggregate statistics for a filtered view
//! - stats: Print cache occupancy and freshness
//! - watch: Run the periodic sync check in a loop

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trade_analytics::engine::RefreshOutcome;
use trade_analytics::filter::{FilterSpec, Period};
use trade_analytics::{AnalyticsEngine, Config, Outcome};

#[derive(Parser, Debug)]
#[command(name = "trade-analytics")]
#[command(about = "Portfolio analytics core for the trading dashboard", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "configs/default.json")]
    config: String,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pull the latest records from the remote datastore
    Refresh {
        /// Fetch only records newer than the last sync
        #[arg(long)]
        incremental: bool,
    },

    /// Print aggregate statistics for a filtered view
    Metrics {
        /// Period selector: today, 7d, 30d, custom
        #[arg(short, long, default_value = "30d")]
        period: Period,

        /// Custom range start (YYYY-MM-DD), requires --period custom
        #[arg(long)]
        start: Option<chrono::NaiveDate>,

        /// Custom range end (YYYY-MM-DD), requires --period custom
        #[arg(long)]
        end: Option<chrono::NaiveDate>,

        /// Restrict to one symbol
        #[arg(short, long)]
        symbol: Option<String>,

        /// Restrict to one outcome: win, loss, open
        #[arg(short, long)]
        outcome: Option<String>,
    },

    /// Print cache occupancy, hit rate and freshness
    Stats,

    /// Run the periodic sync check in a loop
    Watch {
        /// Seconds between sync checks
        #[arg(long, default_value = "30")]
        interval: u64,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );

    // Filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

fn parse_outcome(s: &str) -> Result<Outcome> {
    match s {
        "win" => Ok(Outcome::Win),
        "loss" => Ok(Outcome::Loss),
        "open" => Ok(Outcome::Open),
        other => anyhow::bail!("unknown outcome: {} (expected win, loss, open)", other),
    }
}

fn load_engine(config_path: &str) -> Result<AnalyticsEngine> {
    let config = if std::path::Path::new(config_path).exists() {
        Config::from_file(config_path)?
    } else {
        warn!("Config file {} not found, using defaults", config_path);
        Config::default()
    };
    AnalyticsEngine::from_config(&config)
}

fn report_refresh(outcome: RefreshOutcome) {
    match outcome {
        RefreshOutcome::Completed { report } => {
            info!(
                "Refresh complete: {} records loaded, {} skipped",
                report.inserted, report.skipped
            );
        }
        RefreshOutcome::ServedCached { message } => {
            warn!("Serving cached data: {}", message);
        }
        RefreshOutcome::Degraded { message } => {
            warn!("Degraded refresh: {}", message);
        }
        RefreshOutcome::Superseded => info!("Refresh superseded by a newer load"),
        RefreshOutcome::AlreadyRunning => info!("Refresh already in flight, trigger dropped"),
        RefreshOutcome::Noop => info!("Store fresh, nothing to do"),
    }
}

async fn run_refresh(config_path: &str, incremental: bool) -> Result<()> {
    let mut engine = load_engine(config_path)?;
    let outcome = if incremental {
        engine.refresh_incremental().await?
    } else {
        engine.refresh_full().await?
    };
    report_refresh(outcome);

    for note in engine.take_notifications() {
        warn!("[{:?}] {}", note.severity, note.message);
    }
    Ok(())
}

async fn run_metrics(
    config_path: &str,
    period: Period,
    start: Option<chrono::NaiveDate>,
    end: Option<chrono::NaiveDate>,
    symbol: Option<String>,
    outcome: Option<String>,
) -> Result<()> {
    let mut engine = load_engine(config_path)?;
    report_refresh(engine.refresh_full().await?);

    let spec = FilterSpec {
        period,
        start,
        end,
        symbol,
        outcome: outcome.as_deref().map(parse_outcome).transpose()?,
    };

    let snapshot = engine.get_metrics(&spec)?;
    println!("Trades:           {} completed, {} active", snapshot.total_trades, snapshot.active_trades);
    println!("Win rate:         {:.2}%", snapshot.win_rate);
    println!("Net P&L:          {:.2}", snapshot.net_pnl);
    println!("Invested:         {:.2}", snapshot.total_investment);
    println!("Recovered:        {:.2}", snapshot.total_recovery);
    println!("Average return:   {:.2}%", snapshot.average_return);
    println!("Best / worst:     {:.2}% / {:.2}%", snapshot.best_trade, snapshot.worst_trade);
    println!("Profit factor:    {:.2}", snapshot.profit_factor);
    println!("Sharpe (simpl.):  {:.2}", snapshot.sharpe_ratio);
    println!("Max drawdown:     {:.2}%", snapshot.max_drawdown);
    Ok(())
}

async fn run_stats(config_path: &str) -> Result<()> {
    let engine = load_engine(config_path)?;
    let stats = engine.get_statistics();
    println!("State:            {}", stats.state);
    println!("Occupancy:        {}/{}", stats.occupancy, stats.max_records);
    println!("Hit rate:         {:.1}%", stats.hit_rate * 100.0);
    match stats.freshness_age_secs {
        Some(age) => println!("Freshness age:    {}s", age),
        None => println!("Freshness age:    never loaded"),
    }
    println!("Est. memory:      {} bytes", stats.estimated_bytes);
    println!("Anomalies:        {}", stats.anomalies);
    println!("Evictions:        {}", stats.evictions);
    Ok(())
}

async fn run_watch(config_path: &str, interval: u64) -> Result<()> {
    let mut engine = load_engine(config_path)?;
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval.max(1)));

    info!("Watching datastore every {}s (ctrl-c to stop)", interval);
    loop {
        ticker.tick().await;
        match engine.tick().await {
            Ok(outcome) => report_refresh(outcome),
            Err(e) => warn!("Sync check failed: {}", e),
        }
        for note in engine.take_notifications() {
            warn!("[{:?}] {}", note.severity, note.message);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let command_name = match &cli.command {
        Commands::Refresh { .. } => "refresh",
        Commands::Metrics { .. } => "metrics",
        Commands::Stats => "stats",
        Commands::Watch { .. } => "watch",
    };
    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Refresh { incremental } => run_refresh(&cli.config, incremental).await,
        Commands::Metrics {
            period,
            start,
            end,
            symbol,
            outcome,
        } => run_metrics(&cli.config, period, start, end, symbol, outcome).await,
        Commands::Stats => run_stats(&cli.config).await,
        Commands::Watch { interval } => run_watch(&cli.config, interval).await,
    }
}
