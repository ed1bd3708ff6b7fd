//! Application Services
//!
//! Use cases built on the ports: price caching, order execution, watchlist
//! edits and portfolio snapshots.

pub mod order_executor;
pub mod portfolio;
pub mod price_cache;
pub mod watchlist;

pub use order_executor::{ExecutorConfig, OrderError, OrderExecutor};
pub use portfolio::{PortfolioError, PortfolioRecorder};
pub use price_cache::{DEFAULT_STALENESS, PriceCache, PriceCacheError};
pub use watchlist::{
    ReloadOutcome, WatchlistConfig, WatchlistError, WatchlistService, WatchlistStatus,
};
