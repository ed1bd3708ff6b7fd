//! Trading Domain Types
//!
//! Orders as the caller expresses them, wallet snapshots and the immutable
//! audit records written for every order attempt.

mod order_type;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::market::Symbol;
use crate::domain::risk::ClampReason;

pub use order_type::{AUTO_LIMIT_OFFSET, OrderKind, OrderType, OrderTypePreference, auto_limit_price};

// =============================================================================
// Orders
// =============================================================================

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Spend quote asset to acquire base asset.
    Buy,
    /// Sell base asset for quote asset.
    Sell,
}

impl Side {
    /// Get the side name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much the caller wants to trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum OrderSize {
    /// Base-asset quantity.
    Quantity(Decimal),
    /// Notional in the quote asset.
    QuoteAmount(Decimal),
    /// Let the soft risk limit choose the size.
    RiskDefault,
}

/// Order as submitted by the caller. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Pair to trade.
    pub symbol: Symbol,
    /// Buy or sell.
    pub side: Side,
    /// Requested size.
    pub size: OrderSize,
    /// Market or limit. `None` follows the effective order type preference.
    #[serde(default)]
    pub order_type: Option<OrderType>,
    /// Explicit limit price. Derived from the cached price when absent.
    #[serde(default)]
    pub limit_price: Option<Decimal>,
}

impl OrderRequest {
    /// Create an order request that follows the order type preference.
    #[must_use]
    pub const fn new(symbol: Symbol, side: Side, size: OrderSize) -> Self {
        Self {
            symbol,
            side,
            size,
            order_type: None,
            limit_price: None,
        }
    }

    /// Force the order type for this request.
    #[must_use]
    pub const fn with_order_type(mut self, order_type: OrderType) -> Self {
        self.order_type = Some(order_type);
        self
    }

    /// Make this a limit order at `price`.
    #[must_use]
    pub const fn with_limit_price(mut self, price: Decimal) -> Self {
        self.order_type = Some(OrderType::Limit);
        self.limit_price = Some(price);
        self
    }
}

/// Caller-supplied identifier of one user action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyToken(String);

impl IdempotencyToken {
    /// Wrap a token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Generate a random token.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The token string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Wallet
// =============================================================================

/// Free balance of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Asset code, e.g. `USDT`.
    pub asset: String,
    /// Free amount.
    pub free: Decimal,
}

/// Point-in-time snapshot of free balances, keyed by asset.
///
/// Ordered so that two equal wallets serialize to identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wallet(BTreeMap<String, Decimal>);

impl Wallet {
    /// Create an empty wallet.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Free amount of `asset`, zero when absent.
    #[must_use]
    pub fn free(&self, asset: &str) -> Decimal {
        self.0.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    /// Iterate balances in asset order.
    pub fn balances(&self) -> impl Iterator<Item = Balance> + '_ {
        self.0.iter().map(|(asset, free)| Balance {
            asset: asset.clone(),
            free: *free,
        })
    }

    /// Number of assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the wallet holds no assets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Balance> for Wallet {
    fn from_iter<I: IntoIterator<Item = Balance>>(iter: I) -> Self {
        Self(iter.into_iter().map(|b| (b.asset, b.free)).collect())
    }
}

impl<S: Into<String>> FromIterator<(S, Decimal)> for Wallet {
    fn from_iter<I: IntoIterator<Item = (S, Decimal)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(a, f)| (a.into(), f)).collect())
    }
}

// =============================================================================
// Trade Records
// =============================================================================

/// Outcome of an order attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    /// Exchange confirmed the fill.
    Filled,
    /// Limit order accepted and resting on the book. Not executed yet.
    Open,
    /// Rejected, timed out or lost. Treated as not filled.
    Failed,
}

/// Immutable audit record of one order attempt that reached the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Unique per attempt; also sent as the client order id.
    pub order_id: Uuid,
    /// Exchange-assigned id, when the exchange answered.
    pub exchange_order_id: Option<String>,
    /// Token of the user action that triggered the order.
    pub idempotency_token: IdempotencyToken,
    /// Pair traded.
    pub symbol: Symbol,
    /// Buy or sell.
    pub side: Side,
    /// Market, or limit with its price.
    #[serde(default)]
    pub kind: OrderKind,
    /// Filled, open or failed.
    pub status: TradeStatus,
    /// Filled quantity, or the submitted quantity for failures.
    pub quantity: Decimal,
    /// Average fill price, the limit price of an open order, or the
    /// reference price for failures.
    pub price: Decimal,
    /// `quantity × price`.
    pub total: Decimal,
    /// Size the caller asked for.
    pub requested: OrderSize,
    /// Notional allowed by the risk gate.
    pub effective_amount: Decimal,
    /// Limit that reduced the request, if any.
    pub clamp: Option<ClampReason>,
    /// Balances captured before submission.
    pub wallet_before: Wallet,
    /// Balances captured after the exchange answered; equal to
    /// `wallet_before` on failure.
    pub wallet_after: Wallet,
    /// Why the attempt failed.
    pub failure_reason: Option<String>,
    /// Exchange outcome is unknown and must be checked by hand.
    pub needs_reconciliation: bool,
    /// When the record was written.
    pub timestamp: DateTime<Utc>,
}

impl TradeRecord {
    /// Whether the order filled.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.status == TradeStatus::Filled
    }
}

/// Aggregate over a set of trade records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeSummary {
    /// All attempts.
    pub total_trades: usize,
    /// Filled attempts.
    pub filled: usize,
    /// Limit orders left resting on the book.
    #[serde(default)]
    pub open: usize,
    /// Failed attempts.
    pub failed: usize,
    /// Attempts flagged for reconciliation.
    pub needs_reconciliation: usize,
    /// Quote notional bought.
    pub buy_volume: Decimal,
    /// Quote notional sold.
    pub sell_volume: Decimal,
}

impl TradeSummary {
    /// Summarize `records`. Only filled trades count toward volume.
    #[must_use]
    pub fn from_records(records: &[TradeRecord]) -> Self {
        records.iter().fold(Self::default(), |mut summary, record| {
            summary.total_trades += 1;
            if record.needs_reconciliation {
                summary.needs_reconciliation += 1;
            }
            match (record.status, record.side) {
                (TradeStatus::Filled, Side::Buy) => {
                    summary.filled += 1;
                    summary.buy_volume += record.total;
                }
                (TradeStatus::Filled, Side::Sell) => {
                    summary.filled += 1;
                    summary.sell_volume += record.total;
                }
                (TradeStatus::Open, _) => summary.open += 1,
                (TradeStatus::Failed, _) => summary.failed += 1,
            }
            summary
        })
    }
}

// =============================================================================
// Portfolio Snapshots
// =============================================================================

/// One asset in a portfolio snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    /// Free amount.
    pub amount: Decimal,
    /// Value in the quote asset; `None` when no fresh price was cached.
    pub value: Option<Decimal>,
}

/// Valued wallet at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    /// Unique snapshot id.
    pub snapshot_id: Uuid,
    /// When the snapshot was taken.
    pub recorded_at: DateTime<Utc>,
    /// Asset values are expressed in.
    pub quote_asset: String,
    /// Per-asset holdings.
    pub holdings: BTreeMap<String, Holding>,
    /// Sum of all priced holdings.
    pub total_value: Decimal,
}

impl PortfolioSnapshot {
    /// Assets that could not be valued.
    pub fn unpriced_assets(&self) -> impl Iterator<Item = &str> {
        self.holdings
            .iter()
            .filter(|(_, holding)| holding.value.is_none())
            .map(|(asset, _)| asset.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
