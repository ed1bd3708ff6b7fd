//! Market Domain Types
//!
//! Symbols, price quotes, per-symbol lot-size rules and the streaming
//! connection state shared by the stream task and its observers.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// =============================================================================
// Symbol
// =============================================================================

/// A tradable pair identifier such as `BTCUSDT`.
///
/// Always uppercase, non-empty and ASCII alphanumeric. Whether the exchange
/// actually lists the pair is checked at the watchlist boundary, not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Parse a symbol, trimming whitespace and uppercasing.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty or contains non-alphanumeric
    /// characters.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, SymbolError> {
        let normalized = raw.as_ref().trim().to_ascii_uppercase();

        if normalized.is_empty() {
            return Err(SymbolError::Empty);
        }

        if !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SymbolError::InvalidCharacters { raw: normalized });
        }

        Ok(Self(normalized))
    }

    /// Parse a coin or pair, appending `quote_asset` when it is missing.
    ///
    /// `"pepe"` with quote `USDT` becomes `PEPEUSDT`; `"ethusdt"` stays
    /// `ETHUSDT`.
    ///
    /// # Errors
    ///
    /// Returns an error if either part fails symbol validation.
    pub fn with_quote(raw: impl AsRef<str>, quote_asset: &str) -> Result<Self, SymbolError> {
        let symbol = Self::new(raw)?;
        let quote = Self::new(quote_asset)?;

        if symbol.0.len() > quote.0.len() && symbol.0.ends_with(&quote.0) {
            Ok(symbol)
        } else {
            Ok(Self(format!("{}{}", symbol.0, quote.0)))
        }
    }

    /// The symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The base asset, if the symbol is quoted in `quote_asset`.
    #[must_use]
    pub fn base_asset<'a>(&'a self, quote_asset: &str) -> Option<&'a str> {
        self.0
            .strip_suffix(quote_asset)
            .filter(|base| !base.is_empty())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

/// Symbol validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Symbol was empty after trimming.
    #[error("symbol cannot be empty")]
    Empty,
    /// Symbol contained characters other than ASCII letters and digits.
    #[error("symbol {raw:?} must be ASCII alphanumeric")]
    InvalidCharacters {
        /// The normalized input.
        raw: String,
    },
}

// =============================================================================
// Price Quote
// =============================================================================

/// Latest traded price for a symbol.
///
/// `received_at` uses tokio's clock so paused-time tests can age quotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuote {
    /// Pair this quote belongs to.
    pub symbol: Symbol,
    /// Last price.
    pub price: Decimal,
    /// Monotonic receive time.
    pub received_at: Instant,
    /// Exchange event time, when the feed reports one.
    pub exchange_time: Option<DateTime<Utc>>,
}

impl PriceQuote {
    /// Create a quote received now.
    #[must_use]
    pub fn new(symbol: Symbol, price: Decimal) -> Self {
        Self {
            symbol,
            price,
            received_at: Instant::now(),
            exchange_time: None,
        }
    }

    /// Attach the exchange event time.
    #[must_use]
    pub const fn with_exchange_time(mut self, time: Option<DateTime<Utc>>) -> Self {
        self.exchange_time = time;
        self
    }

    /// Time elapsed since the quote was received.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }

    /// Whether the quote is no older than `window`.
    #[must_use]
    pub fn is_fresh(&self, window: Duration) -> bool {
        self.age() <= window
    }
}

// =============================================================================
// Symbol Rules
// =============================================================================

/// Lot-size and price filters the exchange enforces for a pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRules {
    /// Pair the rules apply to.
    pub symbol: Symbol,
    /// Asset being bought or sold.
    pub base_asset: String,
    /// Asset the price is quoted in.
    pub quote_asset: String,
    /// Quantity increment. Zero means any precision.
    pub step_size: Decimal,
    /// Smallest accepted order quantity.
    pub min_quantity: Decimal,
    /// Price increment for limit orders. Zero means any precision.
    #[serde(default)]
    pub tick_size: Decimal,
    /// Smallest accepted `quantity × price`. Zero disables the check.
    #[serde(default)]
    pub min_notional: Decimal,
}

impl SymbolRules {
    /// Create rules for a pair with no tick size or notional filter.
    #[must_use]
    pub fn new(
        symbol: Symbol,
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
        step_size: Decimal,
        min_quantity: Decimal,
    ) -> Self {
        Self {
            symbol,
            base_asset: base_asset.into(),
            quote_asset: quote_asset.into(),
            step_size,
            min_quantity,
            tick_size: Decimal::ZERO,
            min_notional: Decimal::ZERO,
        }
    }

    /// Set the price increment.
    #[must_use]
    pub const fn with_tick_size(mut self, tick_size: Decimal) -> Self {
        self.tick_size = tick_size;
        self
    }

    /// Set the minimum order notional.
    #[must_use]
    pub const fn with_min_notional(mut self, min_notional: Decimal) -> Self {
        self.min_notional = min_notional;
        self
    }

    /// Round `price` to the nearest tick. Prices too large to divide by the
    /// tick are returned unrounded.
    #[must_use]
    pub fn round_price(&self, price: Decimal) -> Decimal {
        if self.tick_size <= Decimal::ZERO {
            return price.normalize();
        }
        price
            .checked_div(self.tick_size)
            .and_then(|ticks| ticks.round().checked_mul(self.tick_size))
            .map_or(price, |rounded| rounded.normalize())
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// State of the market data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session. A reconnect may be scheduled.
    #[default]
    Disconnected,
    /// Transport handshake or initial subscription in progress.
    Connecting,
    /// Session established and the watchlist subscribed.
    Subscribed,
    /// Subscribed but no ticks within the watchdog window.
    Degraded,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Degraded => "degraded",
        }
    }

    /// Whether ticks are expected to be flowing.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Subscribed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    #[test_case(" btcusdt ", "BTCUSDT" ; "trims and uppercases")]
    #[test_case("EthUsdt", "ETHUSDT" ; "mixed case")]
    #[test_case("1000SATSUSDT", "1000SATSUSDT" ; "leading digits")]
    fn symbol_normalizes(raw: &str, expected: &str) {
        assert_eq!(Symbol::new(raw).unwrap().as_str(), expected);
    }

    #[test]
    fn symbol_rejects_empty_and_separators() {
        assert_eq!(Symbol::new("   "), Err(SymbolError::Empty));
        assert!(matches!(
            Symbol::new("BTC/USDT"),
            Err(SymbolError::InvalidCharacters { .. })
        ));
    }

    #[test_case("pepe", "PEPEUSDT" ; "bare coin gets quote")]
    #[test_case("ethusdt", "ETHUSDT" ; "pair is kept")]
    #[test_case("usdt", "USDTUSDT" ; "quote alone is not a pair")]
    fn symbol_with_quote(raw: &str, expected: &str) {
        assert_eq!(Symbol::with_quote(raw, "usdt").unwrap().as_str(), expected);
    }

    #[test]
    fn base_asset_strips_quote() {
        let symbol = Symbol::new("SOLUSDT").unwrap();
        assert_eq!(symbol.base_asset("USDT"), Some("SOL"));
        assert_eq!(symbol.base_asset("BTC"), None);
    }

    #[test]
    fn symbol_serde_round_trips_through_string() {
        let symbol = Symbol::new("bnbusdt").unwrap();
        let json = serde_json::to_string(&symbol).unwrap();
        assert_eq!(json, "\"BNBUSDT\"");

        let bad: Result<Symbol, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn quote_ages_with_tokio_clock() {
        let quote = PriceQuote::new(Symbol::new("BTCUSDT").unwrap(), dec!(60000));
        assert!(quote.is_fresh(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!quote.is_fresh(Duration::from_secs(1)));
        assert!(quote.age() >= Duration::from_secs(5));
    }

    #[test_case(dec!(60006.0042), dec!(0.01), dec!(60006) ; "nearest tick")]
    #[test_case(dec!(0.000010001), dec!(0.00000001), dec!(0.00001) ; "small tick")]
    #[test_case(dec!(123.456), dec!(0), dec!(123.456) ; "zero tick keeps precision")]
    fn round_price_to_tick(price: Decimal, tick: Decimal, expected: Decimal) {
        let rules = SymbolRules::new(Symbol::new("BTCUSDT").unwrap(), "BTC", "USDT", dec!(0.00001), dec!(0.00001))
            .with_tick_size(tick);
        assert_eq!(rules.round_price(price), expected);
    }

    #[test]
    fn rules_without_filters_deserialize_with_zero_defaults() {
        let json = r#"{"symbol":"BTCUSDT","base_asset":"BTC","quote_asset":"USDT","step_size":"0.001","min_quantity":"0.001"}"#;
        let rules: SymbolRules = serde_json::from_str(json).unwrap();
        assert_eq!(rules.tick_size, Decimal::ZERO);
        assert_eq!(rules.min_notional, Decimal::ZERO);
    }

    #[test]
    fn connection_state_names() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Degraded.to_string(), "degraded");
        assert!(ConnectionState::Subscribed.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
    }
}
