//! Market Data Stream
//!
//! The long-lived task that keeps the price cache fed: connection state
//! machine, reconnect delay schedule and tick watchdog.

mod connection;
pub mod reconnect;
pub mod watchdog;

pub use connection::{StreamConfig, StreamConnection, StreamHandle};
pub use reconnect::{DEFAULT_RECONNECT_DELAY, ReconnectConfig, ReconnectPolicy};
pub use watchdog::{DEFAULT_WATCHDOG_TIMEOUT, TickWatchdog};
