//! User Preferences File
//!
//! Flat `key = value` file holding the watchlist, risk percentages and the
//! preferred order type:
//!
//! ```text
//! # lines starting with '#' are comments
//! favorite_coins = BTC, ETH, SOL
//! dynamic_coin = PEPE
//! soft_risk = 5%
//! hard_risk = 10%
//! order_type = LIMIT
//! ```
//!
//! `order_type` is `MARKET` or `LIMIT` in any case; absent or unknown
//! values mean `MARKET`.
//!
//! Risk values accept a percentage (`5%`) or a bare fraction (`0.05`). A
//! missing or invalid risk value does not fail the load: the symbols are
//! still usable for streaming and the error is kept for the order path.

use std::path::Path;

use rust_decimal::Decimal;

use super::settings::ConfigError;
use crate::domain::risk::RiskLimits;
use crate::domain::trading::OrderType;

/// Parsed preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
    favorite_coins: Vec<String>,
    dynamic_coin: Option<String>,
    risk: Result<RiskLimits, ConfigError>,
    order_type: OrderType,
}

impl Preferences {
    /// Read and parse a preferences file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read. Risk problems
    /// are reported through [`Self::risk_limits`] instead.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let preferences = Self::parse(&text);
        tracing::info!(
            path = %path.display(),
            favorites = preferences.favorite_coins.len(),
            dynamic = ?preferences.dynamic_coin,
            risk_configured = preferences.risk.is_ok(),
            order_type = preferences.order_type.as_str(),
            "Loaded preferences"
        );
        Ok(preferences)
    }

    /// Parse preferences text. Later duplicates of a key win.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut favorite_coins = Vec::new();
        let mut dynamic_coin = None;
        let mut soft_risk = None;
        let mut hard_risk = None;
        let mut order_type = OrderType::Market;

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                tracing::debug!(line = number + 1, "Ignoring preference line without '='");
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "favorite_coins" => {
                    favorite_coins = value
                        .split(',')
                        .map(str::trim)
                        .filter(|coin| !coin.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "dynamic_coin" => {
                    dynamic_coin = (!value.is_empty()).then(|| value.to_string());
                }
                "soft_risk" => soft_risk = Some(value.to_string()),
                "hard_risk" => hard_risk = Some(value.to_string()),
                "order_type" => {
                    order_type = OrderType::from_str_case_insensitive(value).unwrap_or_else(|| {
                        tracing::warn!(value, "Unknown order_type, using MARKET");
                        OrderType::Market
                    });
                }
                other => tracing::debug!(key = other, "Ignoring unknown preference"),
            }
        }

        let risk = build_limits(soft_risk.as_deref(), hard_risk.as_deref());
        if let Err(ref e) = risk {
            tracing::warn!(error = %e, "Risk limits unavailable, orders will be refused");
        }

        Self {
            favorite_coins,
            dynamic_coin,
            risk,
            order_type,
        }
    }

    /// Favorite coins in file order, as written.
    #[must_use]
    pub fn favorite_coins(&self) -> &[String] {
        &self.favorite_coins
    }

    /// Dynamic coin, if set.
    #[must_use]
    pub fn dynamic_coin(&self) -> Option<&str> {
        self.dynamic_coin.as_deref()
    }

    /// Validated risk limits.
    ///
    /// # Errors
    ///
    /// Returns the error found while loading if either value was missing or
    /// invalid.
    pub fn risk_limits(&self) -> Result<RiskLimits, ConfigError> {
        self.risk.clone()
    }

    /// Preferred order type.
    #[must_use]
    pub const fn order_type(&self) -> OrderType {
        self.order_type
    }
}

fn build_limits(soft: Option<&str>, hard: Option<&str>) -> Result<RiskLimits, ConfigError> {
    let soft = parse_fraction("soft_risk", soft.ok_or(ConfigError::MissingKey("soft_risk"))?)?;
    let hard = parse_fraction("hard_risk", hard.ok_or(ConfigError::MissingKey("hard_risk"))?)?;
    Ok(RiskLimits::new(soft, hard)?)
}

/// `5%` → 0.05, `0.05` → 0.05.
fn parse_fraction(key: &str, raw: &str) -> Result<Decimal, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        reason: "expected a percentage like 5% or a fraction like 0.05".to_string(),
    };

    let (number, is_percent) = match raw.strip_suffix('%') {
        Some(number) => (number.trim(), true),
        None => (raw, false),
    };
    let value: Decimal = number.parse().map_err(|_| invalid())?;

    Ok(if is_percent {
        value / Decimal::ONE_HUNDRED
    } else {
        value
    })
}
