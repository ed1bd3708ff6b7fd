//! Account Gateway Port
//!
//! Request/response access to balances, symbol rules, order placement and
//! the book of resting limit orders.
//! Every call made by the core is bounded with [`call_with_timeout`] so that
//! a slow exchange surfaces as [`GatewayError::Timeout`], distinct from an
//! explicit rejection.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::market::{Symbol, SymbolRules};
use crate::domain::trading::{OrderKind, Side, Wallet};

/// Order to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceOrder {
    /// Our id for the order, unique per attempt.
    pub client_order_id: Uuid,
    /// Pair to trade.
    pub symbol: Symbol,
    /// Buy or sell.
    pub side: Side,
    /// Base-asset quantity, already rounded to the step size.
    pub quantity: Decimal,
    /// Market, or limit with a tick-rounded price.
    pub kind: OrderKind,
}

/// Where an accepted order stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    /// Executed in full.
    Filled,
    /// Limit order resting on the book.
    Open,
}

/// Exchange acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFill {
    /// Exchange-assigned order id.
    pub exchange_order_id: String,
    /// Filled, or resting on the book.
    pub status: FillStatus,
    /// Quantity executed. Zero for an order still resting.
    pub filled_quantity: Decimal,
    /// Volume-weighted fill price. Zero when the exchange omits it or
    /// nothing executed.
    pub avg_price: Decimal,
}

impl OrderFill {
    /// Fully executed order.
    #[must_use]
    pub fn filled(exchange_order_id: impl Into<String>, quantity: Decimal, avg_price: Decimal) -> Self {
        Self {
            exchange_order_id: exchange_order_id.into(),
            status: FillStatus::Filled,
            filled_quantity: quantity,
            avg_price,
        }
    }

    /// Limit order accepted onto the book.
    #[must_use]
    pub fn resting(exchange_order_id: impl Into<String>) -> Self {
        Self {
            exchange_order_id: exchange_order_id.into(),
            status: FillStatus::Open,
            filled_quantity: Decimal::ZERO,
            avg_price: Decimal::ZERO,
        }
    }
}

/// A limit order waiting on the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenOrder {
    /// Exchange-assigned order id.
    pub exchange_order_id: String,
    /// Our id for the order.
    pub client_order_id: Uuid,
    /// Pair.
    pub symbol: Symbol,
    /// Buy or sell.
    pub side: Side,
    /// Quantity still to fill.
    pub quantity: Decimal,
    /// Limit price.
    pub limit_price: Decimal,
    /// When the exchange accepted the order.
    pub placed_at: DateTime<Utc>,
}

/// Account gateway errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Exchange refused the order.
    #[error("order rejected: {reason}")]
    Rejected {
        /// Exchange-provided reason.
        reason: String,
    },

    /// Exchange does not list the symbol.
    #[error("unknown symbol: {symbol}")]
    UnknownSymbol {
        /// Requested symbol.
        symbol: Symbol,
    },

    /// No open order with this id for the symbol.
    #[error("no open order {order_id} for {symbol}")]
    UnknownOrder {
        /// Pair the order was looked up under.
        symbol: Symbol,
        /// Exchange order id.
        order_id: String,
    },

    /// Not enough free balance for the order.
    #[error("insufficient {asset} balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Asset short.
        asset: String,
        /// Amount needed.
        required: Decimal,
        /// Amount free.
        available: Decimal,
    },

    /// No answer within the bound.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Gateway call that timed out.
        operation: &'static str,
        /// Bound that elapsed.
        after: Duration,
    },

    /// Transport failure talking to the exchange.
    #[error("connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },
}

impl GatewayError {
    /// Whether the exchange may have acted on the request anyway.
    #[must_use]
    pub const fn is_outcome_unknown(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connection { .. })
    }
}

/// Exchange account operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountGateway: Send + Sync {
    /// Free balance of one asset.
    async fn get_balance(&self, asset: &str) -> Result<Decimal, GatewayError>;

    /// Free balances of every asset with a non-zero amount.
    async fn get_all_balances(&self) -> Result<Wallet, GatewayError>;

    /// Submit an order. A limit order that cannot execute immediately is
    /// acknowledged with [`FillStatus::Open`].
    async fn place_order(&self, order: &PlaceOrder) -> Result<OrderFill, GatewayError>;

    /// Cancel a resting limit order, returning it as it stood.
    async fn cancel_order(
        &self,
        symbol: &Symbol,
        exchange_order_id: &str,
    ) -> Result<OpenOrder, GatewayError>;

    /// Resting limit orders, for one symbol or all of them.
    async fn open_orders(&self, symbol: Option<Symbol>) -> Result<Vec<OpenOrder>, GatewayError>;

    /// Lot-size rules for a pair. Fails with
    /// [`GatewayError::UnknownSymbol`] if the exchange does not list it.
    async fn symbol_rules(&self, symbol: &Symbol) -> Result<SymbolRules, GatewayError>;
}

/// Run a gateway call with a bound, mapping expiry to
/// [`GatewayError::Timeout`].
pub async fn call_with_timeout<T, F>(
    limit: Duration,
    operation: &'static str,
    call: F,
) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| GatewayError::Timeout {
            operation,
            after: limit,
        })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn call_with_timeout_maps_expiry() {
        let result: Result<(), _> = call_with_timeout(
            Duration::from_secs(1),
            "get_all_balances",
            std::future::pending(),
        )
        .await;

        assert_eq!(
            result,
            Err(GatewayError::Timeout {
                operation: "get_all_balances",
                after: Duration::from_secs(1),
            })
        );
    }

    #[tokio::test]
    async fn call_with_timeout_passes_inner_error_through() {
        let result: Result<(), _> = call_with_timeout(Duration::from_secs(1), "place_order", async {
            Err(GatewayError::Rejected {
                reason: "MIN_NOTIONAL".to_string(),
            })
        })
        .await;

        assert!(matches!(result, Err(GatewayError::Rejected { .. })));
    }

    #[test]
    fn unknown_outcome_classification() {
        assert!(
            GatewayError::Timeout {
                operation: "place_order",
                after: Duration::from_secs(1)
            }
            .is_outcome_unknown()
        );
        assert!(
            GatewayError::Connection {
                message: "reset".to_string()
            }
            .is_outcome_unknown()
        );
        assert!(
            !GatewayError::Rejected {
                reason: "no".to_string()
            }
            .is_outcome_unknown()
        );
    }
}
