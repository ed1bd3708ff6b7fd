//! Console Configuration Settings
//!
//! Configuration types for the console core, loaded from environment
//! variables. Every value has a default so an empty environment runs the
//! paper exchange with a fixed 5 second reconnect delay.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::application::services::{DEFAULT_STALENESS, ExecutorConfig, WatchlistConfig};
use crate::domain::risk::{QuantityRounding, RiskLimitsError};
use crate::infrastructure::stream::{
    DEFAULT_RECONNECT_DELAY, DEFAULT_WATCHDOG_TIMEOUT, ReconnectConfig, StreamConfig,
};

/// Streaming settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Delay before the first reconnect attempt.
    pub reconnect_delay: Duration,
    /// Upper bound on the reconnect delay.
    pub reconnect_delay_max: Duration,
    /// Delay growth per attempt (1.0 = fixed).
    pub reconnect_delay_multiplier: f64,
    /// Delay randomization as a fraction.
    pub reconnect_jitter: f64,
    /// Tick silence tolerated before the session is replaced.
    pub watchdog_timeout: Duration,
    /// Bound on the transport handshake.
    pub connect_timeout: Duration,
    /// Bound on subscribe/unsubscribe calls.
    pub subscribe_timeout: Duration,
    /// Reload deltas at least this large force a restart.
    pub restart_threshold: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            reconnect_delay_max: DEFAULT_RECONNECT_DELAY,
            reconnect_delay_multiplier: 1.0,
            reconnect_jitter: 0.0,
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            subscribe_timeout: Duration::from_secs(10),
            restart_threshold: 5,
        }
    }
}

impl StreamSettings {
    /// Connection settings for the stream task.
    #[must_use]
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            reconnect: ReconnectConfig {
                initial_delay: self.reconnect_delay,
                max_delay: self.reconnect_delay_max.max(self.reconnect_delay),
                multiplier: self.reconnect_delay_multiplier,
                jitter_factor: self.reconnect_jitter,
            },
            watchdog_timeout: self.watchdog_timeout,
            connect_timeout: self.connect_timeout,
            subscribe_timeout: self.subscribe_timeout,
        }
    }
}

/// Order path settings.
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Bound on every exchange request.
    pub call_timeout: Duration,
    /// Submitted tokens remembered for duplicate detection.
    pub remembered_tokens: usize,
    /// How quantities are fitted to the step size.
    pub rounding: QuantityRounding,
    /// Age after which a cached price is refused.
    pub price_staleness: Duration,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        let executor = ExecutorConfig::default();
        Self {
            call_timeout: executor.call_timeout,
            remembered_tokens: executor.remembered_tokens,
            rounding: QuantityRounding::default(),
            price_staleness: DEFAULT_STALENESS,
        }
    }
}

impl ExecutionSettings {
    /// Executor settings.
    #[must_use]
    pub const fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            call_timeout: self.call_timeout,
            remembered_tokens: self.remembered_tokens,
        }
    }
}

/// File locations.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Root of the trade ledger.
    pub ledger_dir: PathBuf,
    /// User preferences file.
    pub preferences_path: PathBuf,
    /// Diagnostic price cache dump written on shutdown.
    pub price_dump_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            ledger_dir: PathBuf::from("data/ledger"),
            preferences_path: PathBuf::from("preferences.conf"),
            price_dump_path: PathBuf::from("data/diagnostics/prices.json"),
        }
    }
}

/// Simulated exchange settings.
#[derive(Debug, Clone)]
pub struct PaperSettings {
    /// Starting free balance of the quote asset.
    pub starting_quote_balance: Decimal,
    /// Interval between simulated ticks per session.
    pub tick_interval: Duration,
    /// Largest relative price move per tick.
    pub max_step_pct: Decimal,
    /// Smallest order notional every paper market accepts.
    pub min_notional: Decimal,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            starting_quote_balance: dec!(10000),
            tick_interval: Duration::from_millis(1000),
            max_step_pct: dec!(0.002),
            min_notional: dec!(5),
        }
    }
}

/// Complete console configuration.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Quote asset appended to bare coin names and used for valuation.
    pub quote_asset: String,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
    /// Streaming settings.
    pub stream: StreamSettings,
    /// Order path settings.
    pub execution: ExecutionSettings,
    /// File locations.
    pub storage: StorageSettings,
    /// Simulated exchange settings.
    pub paper: PaperSettings,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".to_string(),
            metrics_port: 0,
            stream: StreamSettings::default(),
            execution: ExecutionSettings::default(),
            storage: StorageSettings::default(),
            paper: PaperSettings::default(),
        }
    }
}

impl ConsoleConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `ORDER_QUANTITY_ROUNDING` names an unknown mode or
    /// the quote asset is empty. Other unparsable values fall back to their
    /// defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let quote_asset = lookup("MARKET_DESK_QUOTE_ASSET")
            .map_or(defaults.quote_asset, |v| v.trim().to_uppercase());
        if quote_asset.is_empty() {
            return Err(ConfigError::EmptyValue("MARKET_DESK_QUOTE_ASSET".to_string()));
        }

        let rounding = match lookup("ORDER_QUANTITY_ROUNDING") {
            Some(raw) => QuantityRounding::from_str_case_insensitive(&raw).ok_or_else(|| {
                ConfigError::InvalidValue {
                    key: "ORDER_QUANTITY_ROUNDING".to_string(),
                    value: raw.clone(),
                    reason: "expected `down` or `half_even`".to_string(),
                }
            })?,
            None => defaults.execution.rounding,
        };

        let stream = StreamSettings {
            reconnect_delay: parse_duration_secs(
                &lookup,
                "MARKET_DESK_RECONNECT_DELAY_SECS",
                defaults.stream.reconnect_delay,
            ),
            reconnect_delay_max: parse_duration_secs(
                &lookup,
                "MARKET_DESK_RECONNECT_DELAY_MAX_SECS",
                defaults.stream.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env(
                &lookup,
                "MARKET_DESK_RECONNECT_DELAY_MULTIPLIER",
                defaults.stream.reconnect_delay_multiplier,
            ),
            reconnect_jitter: parse_env(
                &lookup,
                "MARKET_DESK_RECONNECT_JITTER",
                defaults.stream.reconnect_jitter,
            ),
            watchdog_timeout: parse_duration_secs(
                &lookup,
                "MARKET_DESK_WATCHDOG_TIMEOUT_SECS",
                defaults.stream.watchdog_timeout,
            ),
            connect_timeout: parse_duration_secs(
                &lookup,
                "MARKET_DESK_CONNECT_TIMEOUT_SECS",
                defaults.stream.connect_timeout,
            ),
            subscribe_timeout: parse_duration_secs(
                &lookup,
                "MARKET_DESK_SUBSCRIBE_TIMEOUT_SECS",
                defaults.stream.subscribe_timeout,
            ),
            restart_threshold: parse_env(
                &lookup,
                "MARKET_DESK_RESTART_THRESHOLD",
                defaults.stream.restart_threshold,
            ),
        };

        let execution = ExecutionSettings {
            call_timeout: parse_duration_secs(
                &lookup,
                "MARKET_DESK_CALL_TIMEOUT_SECS",
                defaults.execution.call_timeout,
            ),
            remembered_tokens: parse_env(
                &lookup,
                "MARKET_DESK_REMEMBERED_TOKENS",
                defaults.execution.remembered_tokens,
            ),
            rounding,
            price_staleness: parse_duration_secs(
                &lookup,
                "MARKET_DESK_PRICE_STALENESS_SECS",
                defaults.execution.price_staleness,
            ),
        };

        let storage = StorageSettings {
            ledger_dir: lookup("MARKET_DESK_LEDGER_DIR")
                .map_or(defaults.storage.ledger_dir, PathBuf::from),
            preferences_path: lookup("MARKET_DESK_PREFERENCES")
                .map_or(defaults.storage.preferences_path, PathBuf::from),
            price_dump_path: lookup("MARKET_DESK_PRICE_DUMP")
                .map_or(defaults.storage.price_dump_path, PathBuf::from),
        };

        let paper = PaperSettings {
            starting_quote_balance: parse_env(
                &lookup,
                "MARKET_DESK_PAPER_QUOTE_BALANCE",
                defaults.paper.starting_quote_balance,
            ),
            tick_interval: parse_duration_millis(
                &lookup,
                "MARKET_DESK_PAPER_TICK_INTERVAL_MS",
                defaults.paper.tick_interval,
            ),
            max_step_pct: parse_env(
                &lookup,
                "MARKET_DESK_PAPER_MAX_STEP_PCT",
                defaults.paper.max_step_pct,
            ),
            min_notional: parse_env(
                &lookup,
                "MARKET_DESK_PAPER_MIN_NOTIONAL",
                defaults.paper.min_notional,
            ),
        };

        Ok(Self {
            quote_asset,
            metrics_port: parse_env(&lookup, "MARKET_DESK_METRICS_PORT", defaults.metrics_port),
            stream,
            execution,
            storage,
            paper,
        })
    }

    /// Watchlist settings derived from the stream and execution sections.
    #[must_use]
    pub fn watchlist_config(&self) -> WatchlistConfig {
        WatchlistConfig {
            quote_asset: self.quote_asset.clone(),
            call_timeout: self.execution.call_timeout,
            restart_threshold: self.stream.restart_threshold,
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),

    /// A value could not be interpreted.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable or preference key.
        key: String,
        /// Raw value.
        value: String,
        /// What was expected.
        reason: String,
    },

    /// Required preference is absent.
    #[error("missing required preference: {0}")]
    MissingKey(&'static str),

    /// Risk percentages out of range.
    #[error(transparent)]
    Risk(#[from] RiskLimitsError),

    /// Preferences file could not be read.
    #[error("cannot read {path}: {message}")]
    Io {
        /// File path.
        path: PathBuf,
        /// OS error text.
        message: String,
    },
}

fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<ConsoleConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ConsoleConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = from_pairs(&[]).unwrap();

        assert_eq!(config.quote_asset, "USDT");
        assert_eq!(config.metrics_port, 0);
        assert_eq!(config.execution.rounding, QuantityRounding::Down);
        assert_eq!(config.execution.call_timeout, Duration::from_secs(10));
        assert_eq!(config.stream.restart_threshold, 5);
    }

    #[test]
    fn default_reconnect_is_fixed_five_seconds() {
        let config = StreamSettings::default().stream_config();

        assert_eq!(config.reconnect, ReconnectConfig::fixed(Duration::from_secs(5)));
        assert_eq!(config.watchdog_timeout, Duration::from_secs(30));
    }

    #[test]
    fn overrides_are_applied() {
        let config = from_pairs(&[
            ("MARKET_DESK_QUOTE_ASSET", " busd "),
            ("MARKET_DESK_METRICS_PORT", "9464"),
            ("MARKET_DESK_RECONNECT_DELAY_SECS", "2"),
            ("MARKET_DESK_RECONNECT_DELAY_MAX_SECS", "30"),
            ("MARKET_DESK_RECONNECT_DELAY_MULTIPLIER", "2.0"),
            ("ORDER_QUANTITY_ROUNDING", "HALF_EVEN"),
            ("MARKET_DESK_PAPER_TICK_INTERVAL_MS", "250"),
            ("MARKET_DESK_PAPER_MIN_NOTIONAL", "10"),
            ("MARKET_DESK_LEDGER_DIR", "/tmp/ledger"),
        ])
        .unwrap();

        assert_eq!(config.quote_asset, "BUSD");
        assert_eq!(config.metrics_port, 9464);
        assert_eq!(config.execution.rounding, QuantityRounding::HalfEven);
        assert_eq!(config.paper.tick_interval, Duration::from_millis(250));
        assert_eq!(config.paper.min_notional, dec!(10));
        assert_eq!(config.storage.ledger_dir, PathBuf::from("/tmp/ledger"));

        let stream = config.stream.stream_config();
        assert_eq!(stream.reconnect.initial_delay, Duration::from_secs(2));
        assert_eq!(stream.reconnect.max_delay, Duration::from_secs(30));
        assert!((stream.reconnect.multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unparsable_numbers_fall_back() {
        let config = from_pairs(&[
            ("MARKET_DESK_METRICS_PORT", "not-a-port"),
            ("MARKET_DESK_WATCHDOG_TIMEOUT_SECS", "-1"),
        ])
        .unwrap();

        assert_eq!(config.metrics_port, 0);
        assert_eq!(config.stream.watchdog_timeout, Duration::from_secs(30));
    }

    #[test]
    fn unknown_rounding_mode_is_an_error() {
        let err = from_pairs(&[("ORDER_QUANTITY_ROUNDING", "up")]).unwrap_err();

        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "ORDER_QUANTITY_ROUNDING"));
    }

    #[test]
    fn empty_quote_asset_is_an_error() {
        let err = from_pairs(&[("MARKET_DESK_QUOTE_ASSET", "  ")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::EmptyValue("MARKET_DESK_QUOTE_ASSET".to_string())
        );
    }

    #[test]
    fn watchlist_config_follows_settings() {
        let config = from_pairs(&[("MARKET_DESK_RESTART_THRESHOLD", "8")]).unwrap();
        let watchlist = config.watchlist_config();

        assert_eq!(watchlist.quote_asset, "USDT");
        assert_eq!(watchlist.restart_threshold, 8);
    }
}
