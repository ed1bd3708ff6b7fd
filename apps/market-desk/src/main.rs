//! Market Desk Binary
//!
//! Runs the console core against the paper exchange with a line-based
//! operator console on stdin.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-desk
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_DESK_QUOTE_ASSET`: Quote asset for all pairs (default: USDT)
//! - `MARKET_DESK_PREFERENCES`: Preferences file (default: preferences.conf)
//! - `MARKET_DESK_LEDGER_DIR`: Trade ledger root (default: data/ledger)
//! - `MARKET_DESK_PRICE_DUMP`: Price cache dump written on shutdown
//! - `MARKET_DESK_RECONNECT_DELAY_SECS`: Reconnect delay (default: 5)
//! - `MARKET_DESK_WATCHDOG_TIMEOUT_SECS`: Tick silence limit (default: 30)
//! - `MARKET_DESK_CALL_TIMEOUT_SECS`: Exchange call timeout (default: 10)
//! - `MARKET_DESK_PRICE_STALENESS_SECS`: Price freshness window (default: 60)
//! - `ORDER_QUANTITY_ROUNDING`: down | half_even (default: down)
//! - `MARKET_DESK_PAPER_MIN_NOTIONAL`: Paper minimum order amount (default: 5)
//! - `MARKET_DESK_METRICS_PORT`: Prometheus metrics port (default: 0, disabled)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-desk)
//! - `RUST_LOG`: Log level (default: info)
//!
//! Send SIGHUP to reload the preferences file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Days, Utc};
use market_desk::application::ports::TradeLedger;
use market_desk::infrastructure::console::{ConsoleCommand, HELP};
use market_desk::infrastructure::metrics::{self, MetricsConfig};
use market_desk::infrastructure::telemetry;
use market_desk::{
    ConsoleConfig, IdempotencyToken, JsonlTradeLedger, OrderExecutor, OrderRequest, PaperExchange,
    PortfolioRecorder, Preferences, PriceCache, RiskGate, StreamConnection, StreamHandle,
    SubscriptionChanges, SubscriptionSet, Symbol, WatchlistService,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// How long the stream task gets to wind down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type Watchlist = WatchlistService<PaperExchange, StreamHandle>;
type Executor = OrderExecutor<PaperExchange, JsonlTradeLedger>;
type Recorder = PortfolioRecorder<PaperExchange, JsonlTradeLedger>;

/// Everything the console and the reload handler act on.
struct Desk {
    quote_asset: String,
    preferences_path: PathBuf,
    prices: Arc<PriceCache>,
    risk: Arc<RiskGate>,
    ledger: Arc<JsonlTradeLedger>,
    watchlist: Watchlist,
    executor: Executor,
    portfolio: Recorder,
}

enum Flow {
    Continue,
    Quit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting market desk");

    let config = ConsoleConfig::from_env()?;
    log_config(&config);

    if config.metrics_port != 0 {
        metrics::init_metrics(&MetricsConfig::with_port(config.metrics_port))?;
    }

    let preferences = match Preferences::load(&config.storage.preferences_path).await {
        Ok(preferences) => Some(preferences),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Preferences unavailable, starting with an empty watchlist and no risk limits"
            );
            None
        }
    };

    let subscriptions = Arc::new(SubscriptionSet::new());
    let prices = Arc::new(PriceCache::new(config.execution.price_staleness));
    let risk = Arc::new(RiskGate::new(
        preferences.as_ref().and_then(|p| p.risk_limits().ok()),
        config.execution.rounding,
    ));
    let exchange = Arc::new(
        PaperExchange::seeded(&config.quote_asset, &config.paper)
            .context("invalid quote asset for paper markets")?,
    );
    let ledger = Arc::new(
        JsonlTradeLedger::open(config.storage.ledger_dir.clone())
            .await
            .context("failed to open trade ledger")?,
    );

    let shutdown = CancellationToken::new();
    let (connection, stream) = StreamConnection::new(
        Arc::clone(&exchange),
        Arc::clone(&subscriptions),
        Arc::clone(&prices),
        config.stream.stream_config(),
        shutdown.clone(),
    );
    let stream_task = tokio::spawn(connection.run());

    let desk = Arc::new(Desk {
        quote_asset: config.quote_asset.clone(),
        preferences_path: config.storage.preferences_path.clone(),
        prices: Arc::clone(&prices),
        risk: Arc::clone(&risk),
        ledger: Arc::clone(&ledger),
        watchlist: WatchlistService::new(
            Arc::clone(&exchange),
            Arc::new(stream),
            Arc::clone(&subscriptions),
            config.watchlist_config(),
        ),
        executor: OrderExecutor::new(
            Arc::clone(&exchange),
            Arc::clone(&ledger),
            Arc::clone(&prices),
            Arc::clone(&risk),
            config.execution.executor_config(),
        ),
        portfolio: PortfolioRecorder::new(
            Arc::clone(&exchange),
            Arc::clone(&ledger),
            Arc::clone(&prices),
            config.quote_asset.clone(),
            config.execution.call_timeout,
        ),
    });

    if let Some(preferences) = &preferences {
        desk.executor.order_types().set_preferred(preferences.order_type());
        desk.apply_symbols(preferences).await;
    }

    let hangup_task = tokio::spawn(reload_on_hangup(Arc::clone(&desk)));

    tracing::info!("Market desk ready");

    tokio::select! {
        () = run_console(&desk) => {}
        () = await_shutdown() => {}
    }

    hangup_task.abort();
    shutdown.cancel();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, stream_task).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Stream task did not stop in time"
        );
    }

    desk.prices.force_save(&config.storage.price_dump_path);
    match desk.portfolio.record_snapshot().await {
        Ok(snapshot) => tracing::info!(
            total_value = %snapshot.total_value,
            quote_asset = %snapshot.quote_asset,
            "Final portfolio snapshot recorded"
        ),
        Err(e) => tracing::warn!(error = %e, "Final portfolio snapshot failed"),
    }

    tracing::info!("Market desk stopped");
    Ok(())
}

impl Desk {
    async fn apply_symbols(&self, preferences: &Preferences) {
        match self
            .watchlist
            .reload_symbols(preferences.favorite_coins(), preferences.dynamic_coin())
            .await
        {
            Ok(outcome) => tracing::info!(?outcome, "Watchlist applied"),
            Err(e) => tracing::warn!(error = %e, "Watchlist could not be applied"),
        }
    }

    async fn reload(&self) {
        let preferences = match Preferences::load(&self.preferences_path).await {
            Ok(preferences) => preferences,
            Err(e) => {
                tracing::warn!(error = %e, "Preferences reload failed, keeping current settings");
                return;
            }
        };

        self.risk.replace_limits(preferences.risk_limits().ok());
        self.executor.order_types().set_preferred(preferences.order_type());
        self.apply_symbols(&preferences).await;
    }

    async fn handle(&self, command: ConsoleCommand) -> anyhow::Result<Flow> {
        match command {
            ConsoleCommand::Order {
                side,
                coin,
                size,
                order_type,
                limit_price,
            } => {
                let symbol = Symbol::with_quote(&coin, &self.quote_asset)?;
                let mut request = OrderRequest::new(symbol, side, size);
                if let Some(order_type) = order_type {
                    request = request.with_order_type(order_type);
                }
                if let Some(price) = limit_price {
                    request = request.with_limit_price(price);
                }
                match self.executor.execute(IdempotencyToken::random(), request).await {
                    Ok(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                    Err(e) => println!("order failed [{}]: {e}", e.kind()),
                }
            }
            ConsoleCommand::ShowOrderType => {
                let order_types = self.executor.order_types();
                println!(
                    "order type {} (preferred {}, session {})",
                    order_types.effective(),
                    order_types.preferred(),
                    order_types
                        .session_override()
                        .map_or("none", |t| t.as_str())
                );
            }
            ConsoleCommand::SetOrderType(order_type) => {
                let order_types = self.executor.order_types();
                order_types.set_session_override(order_type);
                println!("order type {}", order_types.effective());
            }
            ConsoleCommand::OpenOrders(coin) => {
                let symbol = coin
                    .map(|coin| Symbol::with_quote(&coin, &self.quote_asset))
                    .transpose()?;
                let orders = self.executor.open_orders(symbol).await?;
                println!("{}", serde_json::to_string_pretty(&orders)?);
            }
            ConsoleCommand::Cancel { coin, order_id } => {
                let symbol = Symbol::with_quote(&coin, &self.quote_asset)?;
                match self.executor.cancel_order(&symbol, &order_id).await {
                    Ok(order) => println!("cancelled {}", order.exchange_order_id),
                    Err(e) => println!("cancel failed [{}]: {e}", e.kind()),
                }
            }
            ConsoleCommand::Favorite(coin) => {
                print_changes(&self.watchlist.add_favorite(&coin).await?);
            }
            ConsoleCommand::Unfavorite(coin) => {
                print_changes(&self.watchlist.remove_favorite(&coin)?);
            }
            ConsoleCommand::Dynamic(coin) => {
                print_changes(&self.watchlist.set_dynamic(coin.as_deref()).await?);
            }
            ConsoleCommand::Price(coin) => {
                let symbol = Symbol::with_quote(&coin, &self.quote_asset)?;
                match self.prices.get_price(&symbol) {
                    Ok(price) => println!("{symbol} {price}"),
                    Err(e) => println!("{e}"),
                }
            }
            ConsoleCommand::Status => {
                println!("{}", serde_json::to_string_pretty(&self.watchlist.status())?);
            }
            ConsoleCommand::Snapshot => {
                let snapshot = self.portfolio.record_snapshot().await?;
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
            ConsoleCommand::Trades { days } => {
                let to = Utc::now().date_naive();
                let from = to
                    .checked_sub_days(Days::new(u64::from(days.saturating_sub(1))))
                    .unwrap_or(to);
                let summary = self.ledger.summary(from, to).await?;
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            ConsoleCommand::Reload => self.reload().await,
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }
}

fn print_changes(changes: &SubscriptionChanges) {
    if changes.is_empty() {
        println!("no change");
        return;
    }
    for symbol in &changes.unsubscribe {
        println!("- {symbol}");
    }
    for symbol in &changes.subscribe {
        println!("+ {symbol}");
    }
}

/// Read commands from stdin until `quit`. When stdin closes the console
/// goes quiet and the process waits for a signal instead.
async fn run_console(desk: &Desk) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match ConsoleCommand::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{e}\n{HELP}");
                continue;
            }
        };

        match desk.handle(command).await {
            Ok(Flow::Quit) => return,
            Ok(Flow::Continue) => {}
            Err(e) => println!("error: {e:#}"),
        }
    }

    tracing::info!("Console input closed, waiting for shutdown signal");
    std::future::pending::<()>().await;
}

#[cfg(unix)]
async fn reload_on_hangup(desk: Arc<Desk>) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!(error = %e, "SIGHUP handler unavailable, hot reload disabled");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        tracing::info!("Received SIGHUP, reloading preferences");
        desk.reload().await;
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_desk: Arc<Desk>) {}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ConsoleConfig) {
    tracing::info!(
        quote_asset = %config.quote_asset,
        rounding = config.execution.rounding.as_str(),
        reconnect_delay_secs = config.stream.reconnect_delay.as_secs(),
        watchdog_timeout_secs = config.stream.watchdog_timeout.as_secs(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        preferences = %config.storage.preferences_path.display(),
        ledger_dir = %config.storage.ledger_dir.display(),
        price_dump = %config.storage.price_dump_path.display(),
        "File locations"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed.
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
