//! Market Stream Control Port
//!
//! Commands the application layer sends to the running stream task. All
//! calls enqueue and return immediately; the stream applies them in order.

use crate::domain::market::{ConnectionState, Symbol};

/// The stream task is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("market stream task has stopped")]
pub struct StreamClosed;

/// Control surface of a running market data stream.
#[cfg_attr(test, mockall::automock)]
pub trait MarketStream: Send + Sync {
    /// Start streaming `symbol` on the current session.
    fn subscribe(&self, symbol: Symbol) -> Result<(), StreamClosed>;

    /// Stop streaming `symbol` and drop its cached price.
    fn unsubscribe(&self, symbol: Symbol) -> Result<(), StreamClosed>;

    /// Tear down the session and reconnect with the full watchlist.
    fn force_restart(&self) -> Result<(), StreamClosed>;

    /// Current connection state.
    fn status(&self) -> ConnectionState;

    /// Whether the stream is subscribed and healthy.
    fn is_connected(&self) -> bool {
        self.status().is_connected()
    }
}
