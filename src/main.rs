//! StreamTrader - Main Entry Point
//!
//! Connects to the venue, authorizes, and runs one bot session until the
//! run finishes or Ctrl-C is pressed.

use anyhow::{bail, Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use stream_trader::bot::EngineSettings;
use stream_trader::config::load_config;
use stream_trader::{
    BotSession, ConnectionStatus, TracingObserver, TradeConfig, TradeProgram, VenueConnection,
    VenueGateway,
};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// API token used to authorize the session
    #[arg(long, env = "VENUE_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Instrument to trade, overrides the config file
    #[arg(long)]
    symbol: Option<String>,

    /// Initial stake, overrides the config file
    #[arg(long)]
    stake: Option<Decimal>,

    /// Path to a JSON trade-intent program
    #[arg(long)]
    program: Option<String>,
}

fn init_logging(log_level: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let config = load_config(Some(&args.config)).context("loading configuration")?;
    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.settings.log_level.clone());
    init_logging(&log_level)?;

    info!("Starting StreamTrader");
    info!("Configuration file: {}", args.config);

    let token = args
        .token
        .clone()
        .or_else(|| config.venue.api_token.clone())
        .context("an API token is required (--token or VENUE_API_TOKEN)")?;

    let section = config.bot.clone();
    let mut trade = match (section.as_ref(), &args.symbol, args.stake) {
        (Some(section), _, _) => section.trade.clone(),
        (None, Some(symbol), Some(stake)) => TradeConfig::new(symbol.clone(), stake),
        (None, _, _) => bail!("no [bot] section in the config; pass --symbol and --stake"),
    };
    if let Some(symbol) = &args.symbol {
        trade.symbol = symbol.clone();
    }
    if let Some(stake) = args.stake {
        trade.initial_stake = stake;
    }

    let program_path = args
        .program
        .clone()
        .or_else(|| section.and_then(|section| section.program));
    let program = match program_path {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading trade program {}", path))?;
            Some(TradeProgram::from_json(&json)?)
        }
        None => None,
    };

    let connection = VenueConnection::from_config(&config.venue, &config.connection)?;
    connection.connect().await?;

    let mut status = connection.status_events();
    tokio::spawn(async move {
        while let Ok(event) = status.recv().await {
            match event {
                ConnectionStatus::Disconnected(reason) => warn!(?reason, "Venue disconnected"),
                other => info!(?other, "Connection status"),
            }
        }
    });

    let gateway = VenueGateway::new(Arc::new(connection.clone()));
    let account = gateway.authorize(&token).await?;
    info!(
        "Authorized as {} ({} {})",
        account.loginid, account.balance, account.currency
    );
    if trade.currency != account.currency {
        info!("Using account currency {}", account.currency);
        trade.currency = account.currency.clone();
    }

    let mut session = BotSession::new(Arc::new(gateway), Arc::new(TracingObserver))
        .with_settings(EngineSettings::from(&config.engine));
    session.start(trade, program)?;

    let mut state = match session.run() {
        Some(run) => run.watch_state(),
        None => bail!("bot run did not start"),
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, cleaning up...");
        }
        _ = state.wait_for(|state| !state.is_active()) => {
            info!("Bot run ended");
        }
    }

    if let Some(stats) = session.shutdown().await? {
        info!(
            "Final stats: {} runs, {} won, {} lost, profit {}",
            stats.runs,
            stats.won,
            stats.lost,
            stats.profit()
        );
    }
    connection.close().await?;

    Ok(())
}
