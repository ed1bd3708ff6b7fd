//! Market and limit order types, the derived limit price and the session
//! preference that picks between them.

use std::fmt;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::Side;
use crate::domain::market::SymbolRules;

/// Distance from the reference price of a derived limit price: buys are
/// priced 0.01% above, sells 0.01% below.
pub const AUTO_LIMIT_OFFSET: Decimal = dec!(0.0001);

/// Order type, without a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Execute immediately at the market price.
    #[default]
    Market,
    /// Execute at the limit price or better.
    Limit,
}

impl OrderType {
    /// Parse `market` or `limit` in any case.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MARKET" => Some(Self::Market),
            "LIMIT" => Some(Self::Limit),
            _ => None,
        }
    }

    /// Get the type name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type as sent to the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum OrderKind {
    /// Market order.
    #[default]
    Market,
    /// Limit order, good until cancelled.
    Limit {
        /// Limit price, already rounded to the tick size.
        price: Decimal,
    },
}

impl OrderKind {
    /// The type without its price.
    #[must_use]
    pub const fn order_type(&self) -> OrderType {
        match self {
            Self::Market => OrderType::Market,
            Self::Limit { .. } => OrderType::Limit,
        }
    }

    /// Limit price, for limit orders.
    #[must_use]
    pub const fn limit_price(&self) -> Option<Decimal> {
        match self {
            Self::Market => None,
            Self::Limit { price } => Some(*price),
        }
    }
}

/// Limit price used when the caller gives none: the reference price moved
/// by [`AUTO_LIMIT_OFFSET`] toward the other side of the book, rounded to
/// the symbol's tick.
#[must_use]
pub fn auto_limit_price(side: Side, reference: Decimal, rules: &SymbolRules) -> Decimal {
    let factor = match side {
        Side::Buy => Decimal::ONE + AUTO_LIMIT_OFFSET,
        Side::Sell => Decimal::ONE - AUTO_LIMIT_OFFSET,
    };
    rules.round_price(reference.saturating_mul(factor))
}

// =============================================================================
// Preference
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
struct Selection {
    preferred: OrderType,
    session: Option<OrderType>,
}

/// Which order type an order uses when the request does not say.
///
/// The preferred type comes from the preferences file and survives reloads;
/// a session override, set from the console, wins over it until cleared.
#[derive(Debug, Default)]
pub struct OrderTypePreference {
    selection: RwLock<Selection>,
}

impl OrderTypePreference {
    /// Start with `preferred` and no override.
    #[must_use]
    pub fn new(preferred: OrderType) -> Self {
        Self {
            selection: RwLock::new(Selection {
                preferred,
                session: None,
            }),
        }
    }

    /// Type used by orders that do not name one.
    #[must_use]
    pub fn effective(&self) -> OrderType {
        let selection = *self.selection.read();
        selection.session.unwrap_or(selection.preferred)
    }

    /// Type from the preferences file.
    #[must_use]
    pub fn preferred(&self) -> OrderType {
        self.selection.read().preferred
    }

    /// Current session override.
    #[must_use]
    pub fn session_override(&self) -> Option<OrderType> {
        self.selection.read().session
    }

    /// Replace the preferred type, e.g. after a preferences reload. An
    /// active override keeps winning.
    pub fn set_preferred(&self, order_type: OrderType) {
        self.selection.write().preferred = order_type;
    }

    /// Set or clear (`None`) the session override.
    pub fn set_session_override(&self, order_type: Option<OrderType>) {
        self.selection.write().session = order_type;
        tracing::info!(
            session_override = order_type.map(|t| t.as_str()),
            effective = self.effective().as_str(),
            "Order type changed"
        );
    }
}
