// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Desk - Trading Console Core
//!
//! Live market-data subscription manager and risk-bounded order executor.
//! A front end issues buy/sell orders and edits a watchlist; this crate keeps
//! one streaming connection subscribed to exactly that watchlist, holds the
//! latest price per symbol, and sends an order to the exchange only after it
//! has been sized within the configured share of equity.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and rules
//!   - `market`: symbols, quotes, lot-size rules, connection state
//!   - `subscription`: the static + dynamic watchlist
//!   - `risk`: risk limits and order sizing
//!   - `trading`: orders and order types, wallets, trade records, portfolio
//!     snapshots
//!
//! - **Application**: Ports and services
//!   - `ports`: `AccountGateway`, `StreamTransport`, `MarketStream`, `TradeLedger`
//!   - `services`: `PriceCache`, `OrderExecutor`, `WatchlistService`,
//!     `PortfolioRecorder`
//!
//! - **Infrastructure**: Adapters and process concerns
//!   - `stream`: the reconnecting stream task
//!   - `paper`: simulated exchange
//!   - `ledger`: JSONL and in-memory ledgers
//!   - `config`, `console`, `telemetry`, `metrics`
//!
//! # Data Flow
//!
//! ```text
//!  StreamTransport ──ticks──► StreamConnection ──► PriceCache ◄── OrderExecutor
//!        ▲                        ▲                                   │
//!        │ subscribe/unsubscribe  │ commands                          ▼
//!        └────────────────── StreamHandle ◄── WatchlistService   AccountGateway
//!                                                                     │
//!                                                                TradeLedger
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{ConnectionState, PriceQuote, Symbol, SymbolError, SymbolRules};
pub use domain::risk::{QuantityRounding, RiskError, RiskGate, RiskLimits};
pub use domain::subscription::{SubscriptionChanges, SubscriptionError, SubscriptionSet};
pub use domain::trading::{
    IdempotencyToken, OrderKind, OrderRequest, OrderSize, OrderType, OrderTypePreference,
    PortfolioSnapshot, Side, TradeRecord, TradeStatus, TradeSummary, Wallet,
};

// Application services
pub use application::services::{
    ExecutorConfig, OrderError, OrderExecutor, PortfolioRecorder, PriceCache, ReloadOutcome,
    WatchlistConfig, WatchlistService, WatchlistStatus,
};

// Infrastructure
pub use infrastructure::config::{ConfigError, ConsoleConfig, Preferences};
pub use infrastructure::ledger::{InMemoryTradeLedger, JsonlTradeLedger};
pub use infrastructure::paper::PaperExchange;
pub use infrastructure::stream::{StreamConfig, StreamConnection, StreamHandle};
