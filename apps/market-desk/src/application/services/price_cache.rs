//! Price Cache
//!
//! Latest quote per symbol, written by the stream task and read by every
//! other task. The map is published as an immutable snapshot through
//! `arc_swap`: readers never block the writer and never see a half-applied
//! update.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::market::{PriceQuote, Symbol};

/// Default window after which a quote no longer prices orders.
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(60);

/// Price lookup error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceCacheError {
    /// No quote has been received for the symbol.
    #[error("no price cached for {symbol}")]
    NotFound {
        /// Requested symbol.
        symbol: Symbol,
    },
    /// The cached quote is older than the staleness window.
    #[error("price for {symbol} is stale ({age:?} old, limit {limit:?})")]
    Stale {
        /// Requested symbol.
        symbol: Symbol,
        /// Age of the cached quote.
        age: Duration,
        /// Configured window.
        limit: Duration,
    },
}

/// Thread-safe symbol → latest quote map with staleness tracking.
#[derive(Debug)]
pub struct PriceCache {
    quotes: ArcSwap<HashMap<Symbol, PriceQuote>>,
    staleness: Duration,
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new(DEFAULT_STALENESS)
    }
}

impl PriceCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(staleness: Duration) -> Self {
        Self {
            quotes: ArcSwap::from_pointee(HashMap::new()),
            staleness,
        }
    }

    /// Configured staleness window.
    #[must_use]
    pub const fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Replace the quote for its symbol.
    pub fn update(&self, quote: PriceQuote) {
        self.quotes.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(quote.symbol.clone(), quote.clone());
            next
        });
    }

    /// Latest quote for `symbol`, however old.
    #[must_use]
    pub fn get(&self, symbol: &Symbol) -> Option<PriceQuote> {
        self.quotes.load().get(symbol).cloned()
    }

    /// Latest price for `symbol` if it is within the staleness window.
    ///
    /// # Errors
    ///
    /// Returns [`PriceCacheError::NotFound`] if nothing is cached and
    /// [`PriceCacheError::Stale`] if the quote is too old.
    pub fn get_price(&self, symbol: &Symbol) -> Result<Decimal, PriceCacheError> {
        let quotes = self.quotes.load();
        let quote = quotes.get(symbol).ok_or_else(|| PriceCacheError::NotFound {
            symbol: symbol.clone(),
        })?;

        let age = quote.age();
        if age > self.staleness {
            return Err(PriceCacheError::Stale {
                symbol: symbol.clone(),
                age,
                limit: self.staleness,
            });
        }

        Ok(quote.price)
    }

    /// Drop the quote for `symbol`.
    pub fn remove(&self, symbol: &Symbol) -> Option<PriceQuote> {
        let previous = self.quotes.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(symbol);
            next
        });
        previous.get(symbol).cloned()
    }

    /// Keep only the quotes whose symbol satisfies `keep`, returning the
    /// symbols that were dropped.
    pub fn retain(&self, keep: impl Fn(&Symbol) -> bool) -> Vec<Symbol> {
        if self.quotes.load().keys().all(&keep) {
            return Vec::new();
        }

        let previous = self.quotes.rcu(|current| {
            current
                .iter()
                .filter(|(symbol, _)| keep(symbol))
                .map(|(symbol, quote)| (symbol.clone(), quote.clone()))
                .collect::<HashMap<_, _>>()
        });
        let mut dropped: Vec<Symbol> = previous.keys().filter(|s| !keep(s)).cloned().collect();
        dropped.sort();
        dropped
    }

    /// Drop every quote.
    pub fn clear(&self) {
        self.quotes.store(Arc::new(HashMap::new()));
    }

    /// Point-in-time copy of all quotes, sorted by symbol.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PriceQuote> {
        let mut quotes: Vec<PriceQuote> = self.quotes.load().values().cloned().collect();
        quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        quotes
    }

    /// Number of cached symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.load().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.load().is_empty()
    }

    /// Write every cached quote to `path` as JSON.
    ///
    /// Best effort: failures are logged and swallowed so a diagnostic dump
    /// never disturbs shutdown or crash handling.
    pub fn force_save(&self, path: &Path) {
        match self.write_dump(path) {
            Ok(count) => {
                tracing::info!(path = %path.display(), quotes = count, "Price cache saved");
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to save price cache");
            }
        }
    }

    fn write_dump(&self, path: &Path) -> Result<usize, DumpError> {
        let quotes = self.snapshot();
        let dump = CacheDump {
            saved_at: Utc::now(),
            staleness_ms: duration_millis(self.staleness),
            quotes: quotes
                .iter()
                .map(|q| DumpedQuote {
                    symbol: q.symbol.as_str(),
                    price: q.price,
                    age_ms: duration_millis(q.age()),
                    exchange_time: q.exchange_time,
                })
                .collect(),
        };

        let json = serde_json::to_vec_pretty(&dump)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;

        Ok(dump.quotes.len())
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Serialize)]
struct CacheDump<'a> {
    saved_at: DateTime<Utc>,
    staleness_ms: u64,
    quotes: Vec<DumpedQuote<'a>>,
}

#[derive(Serialize)]
struct DumpedQuote<'a> {
    symbol: &'a str,
    price: Decimal,
    age_ms: u64,
    exchange_time: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
enum DumpError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Tests
// =============================================================================
