//! Risk-Bounded Order Sizing
//!
//! Turns an [`OrderRequest`] into an [`AdjustedOrder`] whose notional never
//! exceeds the configured share of equity.
//!
//! # Sizing
//!
//! ```text
//! soft_cap  = equity × soft_risk_pct      (default size)
//! hard_cap  = equity × hard_risk_pct      (absolute ceiling)
//! effective = min(requested, soft_cap, hard_cap)
//! quantity  = round_to_step(effective / price)
//! ```
//!
//! A request larger than equity is refused outright rather than clamped, as
//! is one whose rounded notional falls under the symbol's minimum. Every
//! product and quotient is checked: a size too large to represent is a
//! rejection, never a panic.
//! Missing limits are a hard error: the gate never falls back to a default
//! percentage.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::market::SymbolRules;
use crate::domain::trading::{OrderRequest, OrderSize};

// =============================================================================
// Risk Limits
// =============================================================================

/// Fractions of equity an order may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskLimits {
    soft_risk_pct: Decimal,
    hard_risk_pct: Decimal,
}

impl RiskLimits {
    /// Validate and build limits. Each fraction must lie in `(0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending limit.
    pub fn new(soft_risk_pct: Decimal, hard_risk_pct: Decimal) -> Result<Self, RiskLimitsError> {
        validate_fraction("soft_risk", soft_risk_pct)?;
        validate_fraction("hard_risk", hard_risk_pct)?;

        Ok(Self {
            soft_risk_pct,
            hard_risk_pct,
        })
    }

    /// Default sizing fraction.
    #[must_use]
    pub const fn soft_risk_pct(&self) -> Decimal {
        self.soft_risk_pct
    }

    /// Absolute ceiling fraction.
    #[must_use]
    pub const fn hard_risk_pct(&self) -> Decimal {
        self.hard_risk_pct
    }
}

fn validate_fraction(name: &'static str, value: Decimal) -> Result<(), RiskLimitsError> {
    if value <= Decimal::ZERO || value > Decimal::ONE {
        return Err(RiskLimitsError::OutOfRange { name, value });
    }
    Ok(())
}

/// Invalid risk limit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RiskLimitsError {
    /// Fraction outside `(0, 1]`.
    #[error("{name} must be greater than 0% and at most 100%, got {value}")]
    OutOfRange {
        /// Limit name.
        name: &'static str,
        /// Rejected value.
        value: Decimal,
    },
}

// =============================================================================
// Rounding
// =============================================================================

/// How a computed quantity is fitted to the symbol's step size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityRounding {
    /// Truncate toward zero. Never spends more than the effective amount.
    #[default]
    Down,
    /// Round to the nearest step, ties to even. May exceed the effective
    /// amount by up to half a step.
    HalfEven,
}

impl QuantityRounding {
    /// Parse from configuration (`down` or `half_even`).
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "down" | "floor" | "truncate" => Some(Self::Down),
            "half_even" | "nearest" | "bankers" => Some(Self::HalfEven),
            _ => None,
        }
    }

    /// Get the mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Down => "down",
            Self::HalfEven => "half_even",
        }
    }

    const fn strategy(self) -> RoundingStrategy {
        match self {
            Self::Down => RoundingStrategy::ToZero,
            Self::HalfEven => RoundingStrategy::MidpointNearestEven,
        }
    }

    /// Fit `quantity` to a multiple of `step`. A zero step leaves the
    /// quantity untouched. `None` when the step count overflows.
    #[must_use]
    pub fn apply(self, quantity: Decimal, step: Decimal) -> Option<Decimal> {
        if step <= Decimal::ZERO {
            return Some(quantity.normalize());
        }
        let steps = quantity
            .checked_div(step)?
            .round_dp_with_strategy(0, self.strategy());
        steps.checked_mul(step).map(|d| d.normalize())
    }
}

// =============================================================================
// Adjusted Order
// =============================================================================

/// Which limit reduced the requested size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClampReason {
    /// Reduced to `equity × soft_risk_pct`.
    SoftLimit,
    /// Reduced to `equity × hard_risk_pct`.
    HardLimit,
}

impl fmt::Display for ClampReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SoftLimit => f.write_str("soft risk limit"),
            Self::HardLimit => f.write_str("hard risk limit"),
        }
    }
}

/// Order after risk sizing. The original request is carried unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustedOrder {
    /// Caller's request.
    pub request: OrderRequest,
    /// Allowed notional in the quote asset, before step rounding.
    pub effective_amount: Decimal,
    /// Base quantity to submit, rounded to the step size.
    pub quantity: Decimal,
    /// Price the order was sized against.
    pub reference_price: Decimal,
    /// Set when a limit reduced the request.
    pub clamp: Option<ClampReason>,
}

impl AdjustedOrder {
    /// Notional of the rounded quantity at the reference price.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.quantity.saturating_mul(self.reference_price)
    }
}

// =============================================================================
// Risk Gate
// =============================================================================

/// Market inputs the gate sizes against.
#[derive(Debug, Clone)]
pub struct SizingContext<'a> {
    /// Spendable value in the quote asset.
    pub equity: Decimal,
    /// Current price of the symbol.
    pub price: Decimal,
    /// Lot-size rules for the symbol.
    pub rules: &'a SymbolRules,
}

/// Why the gate refused an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskRejection {
    /// Effective size was zero or negative.
    NonPositiveSize,
    /// Requested notional exceeds available equity.
    InsufficientFunds {
        /// Requested notional.
        requested: Decimal,
        /// Available equity.
        available: Decimal,
    },
    /// Rounded quantity fell below the exchange minimum.
    BelowMinimumQuantity {
        /// Rounded quantity.
        quantity: Decimal,
        /// Exchange minimum.
        minimum: Decimal,
    },
    /// Rounded notional fell below the exchange minimum.
    BelowMinimumNotional {
        /// `quantity × price`.
        notional: Decimal,
        /// Exchange minimum.
        minimum: Decimal,
    },
    /// Requested size is too large to price.
    SizeOverflow,
}

impl fmt::Display for RiskRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveSize => f.write_str("effective order size is not positive"),
            Self::InsufficientFunds {
                requested,
                available,
            } => write!(f, "requested {requested} exceeds available {available}"),
            Self::BelowMinimumQuantity { quantity, minimum } => {
                write!(f, "quantity {quantity} is below minimum {minimum}")
            }
            Self::BelowMinimumNotional { notional, minimum } => {
                write!(f, "order amount {notional} is below minimum notional {minimum}")
            }
            Self::SizeOverflow => f.write_str("requested size is too large to evaluate"),
        }
    }
}

/// Risk gate error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RiskError {
    /// No risk limits are configured.
    #[error("risk limits are not configured")]
    NotConfigured,
    /// Order refused by the limits.
    #[error("risk exceeded: {0}")]
    Exceeded(RiskRejection),
    /// Price was not positive.
    #[error("cannot size against non-positive price {0}")]
    InvalidPrice(Decimal),
}

/// Sizes orders against hot-swappable risk limits.
#[derive(Debug)]
pub struct RiskGate {
    limits: ArcSwapOption<RiskLimits>,
    rounding: QuantityRounding,
}

impl RiskGate {
    /// Create a gate. `None` limits reject every order until replaced.
    #[must_use]
    pub fn new(limits: Option<RiskLimits>, rounding: QuantityRounding) -> Self {
        Self {
            limits: ArcSwapOption::new(limits.map(Arc::new)),
            rounding,
        }
    }

    /// Current limits.
    #[must_use]
    pub fn limits(&self) -> Option<RiskLimits> {
        self.limits.load().as_deref().copied()
    }

    /// Configured rounding mode.
    #[must_use]
    pub const fn rounding(&self) -> QuantityRounding {
        self.rounding
    }

    /// Swap the limits, e.g. after a preferences reload.
    pub fn replace_limits(&self, limits: Option<RiskLimits>) {
        self.limits.store(limits.map(Arc::new));
    }

    /// Size `request` against the current limits.
    ///
    /// # Errors
    ///
    /// Returns [`RiskError::NotConfigured`] when no limits are set and
    /// [`RiskError::Exceeded`] when the order falls outside them.
    pub fn evaluate(
        &self,
        request: &OrderRequest,
        context: &SizingContext<'_>,
    ) -> Result<AdjustedOrder, RiskError> {
        let limits = self.limits().ok_or(RiskError::NotConfigured)?;
        let SizingContext {
            equity,
            price,
            rules,
        } = *context;

        if price <= Decimal::ZERO {
            return Err(RiskError::InvalidPrice(price));
        }

        let overflow = || RiskError::Exceeded(RiskRejection::SizeOverflow);

        let requested = match request.size {
            OrderSize::Quantity(quantity) => Some(quantity.checked_mul(price).ok_or_else(overflow)?),
            OrderSize::QuoteAmount(amount) => Some(amount),
            OrderSize::RiskDefault => None,
        };

        if let Some(requested) = requested
            && requested > equity
        {
            return Err(RiskError::Exceeded(RiskRejection::InsufficientFunds {
                requested,
                available: equity,
            }));
        }

        let soft_cap = equity.checked_mul(limits.soft_risk_pct).ok_or_else(overflow)?;
        let hard_cap = equity.checked_mul(limits.hard_risk_pct).ok_or_else(overflow)?;
        let wanted = requested.map_or(soft_cap, |r| r.min(soft_cap));
        let effective = wanted.min(hard_cap);

        if effective <= Decimal::ZERO {
            return Err(RiskError::Exceeded(RiskRejection::NonPositiveSize));
        }

        let clamp = if hard_cap < wanted {
            Some(ClampReason::HardLimit)
        } else if requested.is_some_and(|r| r > soft_cap) {
            Some(ClampReason::SoftLimit)
        } else {
            None
        };

        let raw_quantity = match (request.size, clamp) {
            (OrderSize::Quantity(quantity), None) => quantity,
            _ => effective.checked_div(price).ok_or_else(overflow)?,
        };
        let quantity = self
            .rounding
            .apply(raw_quantity, rules.step_size)
            .ok_or_else(overflow)?;

        if quantity <= Decimal::ZERO || quantity < rules.min_quantity {
            return Err(RiskError::Exceeded(RiskRejection::BelowMinimumQuantity {
                quantity,
                minimum: rules.min_quantity,
            }));
        }

        let notional = quantity.checked_mul(price).ok_or_else(overflow)?;
        if notional < rules.min_notional {
            return Err(RiskError::Exceeded(RiskRejection::BelowMinimumNotional {
                notional,
                minimum: rules.min_notional,
            }));
        }

        Ok(AdjustedOrder {
            request: request.clone(),
            effective_amount: effective,
            quantity,
            reference_price: price,
            clamp,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
