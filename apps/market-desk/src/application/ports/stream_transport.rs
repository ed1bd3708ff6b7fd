//! Streaming Transport Port
//!
//! Semantic contract of the exchange's streaming endpoint: connect, then
//! subscribe/unsubscribe symbols on the live session and pull events from
//! it. Wire encoding belongs to the adapter.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::market::{PriceQuote, Symbol, SymbolError};

/// Opens streaming sessions.
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Session type produced by [`connect`](Self::connect).
    type Session: StreamSession;

    /// Perform the transport handshake.
    async fn connect(&self) -> Result<Self::Session, TransportError>;
}

/// One live streaming session. Dropping it closes the transport.
#[async_trait]
pub trait StreamSession: Send + 'static {
    /// Subscribe symbols on this session.
    async fn subscribe(&mut self, symbols: &[Symbol]) -> Result<(), TransportError>;

    /// Unsubscribe symbols on this session.
    async fn unsubscribe(&mut self, symbols: &[Symbol]) -> Result<(), TransportError>;

    /// Wait for the next event.
    ///
    /// Must be cancel safe: the stream task races it against commands and
    /// the watchdog and drops it when another branch wins.
    async fn next_event(&mut self) -> Result<StreamEvent, TransportError>;
}

/// Event delivered by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Price update, not yet validated.
    Tick(RawTick),
    /// Server closed the session.
    Closed {
        /// Close reason, if any.
        reason: String,
    },
}

/// Price update as received from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTick {
    /// Symbol as sent by the exchange.
    pub symbol: String,
    /// Price text as sent by the exchange.
    pub price: String,
    /// Exchange event time.
    pub event_time: Option<DateTime<Utc>>,
}

impl RawTick {
    /// Create a tick.
    #[must_use]
    pub fn new(symbol: impl Into<String>, price: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            price: price.into(),
            event_time: None,
        }
    }

    /// Validate into a quote received now.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol or price is malformed or the price is
    /// not positive.
    pub fn parse(&self) -> Result<PriceQuote, TickError> {
        let symbol = Symbol::new(&self.symbol).map_err(|source| TickError::InvalidSymbol {
            raw: self.symbol.clone(),
            source,
        })?;

        let price: Decimal = self
            .price
            .trim()
            .parse()
            .map_err(|_| TickError::InvalidPrice {
                raw: self.price.clone(),
            })?;

        if price <= Decimal::ZERO {
            return Err(TickError::NonPositivePrice { price });
        }

        Ok(PriceQuote::new(symbol, price).with_exchange_time(self.event_time))
    }
}

/// Malformed tick.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickError {
    /// Symbol failed validation.
    #[error("invalid tick symbol {raw:?}: {source}")]
    InvalidSymbol {
        /// Raw symbol.
        raw: String,
        /// Validation failure.
        source: SymbolError,
    },
    /// Price was not a decimal number.
    #[error("invalid tick price {raw:?}")]
    InvalidPrice {
        /// Raw price.
        raw: String,
    },
    /// Price was zero or negative.
    #[error("non-positive tick price {price}")]
    NonPositivePrice {
        /// Parsed price.
        price: Decimal,
    },
}

/// Streaming transport failure. Always recoverable by reconnecting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Handshake failed.
    #[error("connect failed: {message}")]
    Connect {
        /// Error details.
        message: String,
    },
    /// Session closed by the server.
    #[error("session closed: {reason}")]
    Closed {
        /// Close reason.
        reason: String,
    },
    /// Unexpected frame or subscription failure.
    #[error("protocol error: {message}")]
    Protocol {
        /// Error details.
        message: String,
    },
    /// Transport call exceeded its bound.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Bound that elapsed.
        after: Duration,
    },
}
