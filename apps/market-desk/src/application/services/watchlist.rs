//! Watchlist Service
//!
//! User-facing edits of the streamed symbol list. Each edit normalizes the
//! input, checks that the exchange lists the pair, mutates the
//! [`SubscriptionSet`] and forwards the resulting delta to the running
//! stream.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;

use crate::application::ports::{
    AccountGateway, GatewayError, MarketStream, StreamClosed, call_with_timeout,
};
use crate::domain::market::{ConnectionState, Symbol, SymbolError};
use crate::domain::subscription::{SubscriptionChanges, SubscriptionError, SubscriptionSet};

/// Watchlist settings.
#[derive(Debug, Clone)]
pub struct WatchlistConfig {
    /// Quote asset appended to bare coin names.
    pub quote_asset: String,
    /// Bound on symbol validation calls.
    pub call_timeout: Duration,
    /// Reload deltas at least this large restart the stream instead of
    /// being applied symbol by symbol.
    pub restart_threshold: usize,
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".to_string(),
            call_timeout: Duration::from_secs(10),
            restart_threshold: 5,
        }
    }
}

/// Watchlist edit errors.
#[derive(Debug, thiserror::Error)]
pub enum WatchlistError {
    /// Input is not a valid symbol.
    #[error("invalid symbol {input:?}: {source}")]
    InvalidSymbol {
        /// Raw user input.
        input: String,
        /// Validation failure.
        source: SymbolError,
    },

    /// Exchange does not list the pair.
    #[error("{symbol} is not traded on the exchange")]
    UnknownSymbol {
        /// Normalized symbol.
        symbol: Symbol,
    },

    /// Validation call failed.
    #[error("symbol validation failed: {0}")]
    Gateway(GatewayError),

    /// Edit would duplicate a symbol across slots.
    #[error(transparent)]
    Conflict(#[from] SubscriptionError),

    /// Stream task is gone.
    #[error(transparent)]
    StreamClosed(#[from] StreamClosed),
}

/// How a reload was applied to the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The watchlist already matched.
    Unchanged,
    /// Delta sent as individual commands.
    Incremental {
        /// Symbols subscribed plus unsubscribed.
        changes: usize,
    },
    /// Delta large enough to restart the session.
    Restarted {
        /// Symbols subscribed plus unsubscribed.
        changes: usize,
    },
}

/// Stream and watchlist status for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchlistStatus {
    /// Stream state.
    pub state: ConnectionState,
    /// Whether the stream is subscribed and healthy.
    pub connected: bool,
    /// Streamed symbols, favorites first.
    pub symbols: Vec<Symbol>,
    /// The dynamic slot.
    pub dynamic: Option<Symbol>,
}

/// Applies watchlist edits and preference reloads.
pub struct WatchlistService<G, M>
where
    G: AccountGateway,
    M: MarketStream,
{
    gateway: Arc<G>,
    stream: Arc<M>,
    subscriptions: Arc<SubscriptionSet>,
    config: WatchlistConfig,
}

impl<G, M> WatchlistService<G, M>
where
    G: AccountGateway,
    M: MarketStream,
{
    /// Create a new service.
    pub const fn new(
        gateway: Arc<G>,
        stream: Arc<M>,
        subscriptions: Arc<SubscriptionSet>,
        config: WatchlistConfig,
    ) -> Self {
        Self {
            gateway,
            stream,
            subscriptions,
            config,
        }
    }

    /// Add a favorite.
    pub async fn add_favorite(&self, input: &str) -> Result<SubscriptionChanges, WatchlistError> {
        let symbol = self.normalize(input)?;
        if !self.subscriptions.contains(&symbol) {
            self.validate(&symbol).await?;
        }

        let changes = self.subscriptions.add_static(symbol)?;
        self.forward(&changes)?;
        Ok(changes)
    }

    /// Remove a favorite. Removing a symbol that is not a favorite is a
    /// no-op.
    pub fn remove_favorite(&self, input: &str) -> Result<SubscriptionChanges, WatchlistError> {
        let symbol = self.normalize(input)?;
        let changes = self.subscriptions.remove_static(&symbol);
        self.forward(&changes)?;
        Ok(changes)
    }

    /// Set or clear the dynamic symbol.
    pub async fn set_dynamic(
        &self,
        input: Option<&str>,
    ) -> Result<SubscriptionChanges, WatchlistError> {
        let symbol = input.map(|raw| self.normalize(raw)).transpose()?;
        if let Some(symbol) = &symbol
            && !self.subscriptions.contains(symbol)
        {
            self.validate(symbol).await?;
        }

        let changes = self.subscriptions.set_dynamic(symbol)?;
        self.forward(&changes)?;
        Ok(changes)
    }

    /// Replace the watchlist with reloaded preferences.
    ///
    /// Malformed and unlisted symbols are skipped with a warning so one bad
    /// entry does not block the rest of the file.
    pub async fn reload_symbols(
        &self,
        favorites: &[String],
        dynamic: Option<&str>,
    ) -> Result<ReloadOutcome, WatchlistError> {
        let favorites = self.accept_all(favorites.iter().map(String::as_str)).await?;
        let dynamic = match dynamic {
            Some(raw) => self.accept_all(std::iter::once(raw)).await?.pop(),
            None => None,
        };

        let changes = self.subscriptions.replace(favorites, dynamic);
        if changes.is_empty() {
            tracing::debug!("Watchlist reload made no changes");
            return Ok(ReloadOutcome::Unchanged);
        }

        let count = changes.len();
        if count >= self.config.restart_threshold {
            tracing::info!(
                changes = count,
                threshold = self.config.restart_threshold,
                "Large watchlist change, restarting stream"
            );
            self.stream.force_restart()?;
            return Ok(ReloadOutcome::Restarted { changes: count });
        }

        self.forward(&changes)?;
        tracing::info!(
            subscribed = changes.subscribe.len(),
            unsubscribed = changes.unsubscribe.len(),
            "Watchlist reloaded"
        );
        Ok(ReloadOutcome::Incremental { changes: count })
    }

    /// Current stream and watchlist status.
    #[must_use]
    pub fn status(&self) -> WatchlistStatus {
        let snapshot = self.subscriptions.snapshot();
        let state = self.stream.status();
        WatchlistStatus {
            state,
            connected: state.is_connected(),
            symbols: snapshot.symbols().cloned().collect(),
            dynamic: snapshot.dynamic().cloned(),
        }
    }

    fn normalize(&self, input: &str) -> Result<Symbol, WatchlistError> {
        Symbol::with_quote(input, &self.config.quote_asset).map_err(|source| {
            WatchlistError::InvalidSymbol {
                input: input.to_string(),
                source,
            }
        })
    }

    async fn validate(&self, symbol: &Symbol) -> Result<(), WatchlistError> {
        match call_with_timeout(
            self.config.call_timeout,
            "symbol_rules",
            self.gateway.symbol_rules(symbol),
        )
        .await
        {
            Ok(_) => Ok(()),
            Err(GatewayError::UnknownSymbol { .. }) => Err(WatchlistError::UnknownSymbol {
                symbol: symbol.clone(),
            }),
            Err(e) => Err(WatchlistError::Gateway(e)),
        }
    }

    /// Normalize and validate `inputs`, keeping the ones the exchange lists.
    /// Symbols already in the set are not checked again.
    async fn accept_all<'a>(
        &self,
        inputs: impl Iterator<Item = &'a str>,
    ) -> Result<Vec<Symbol>, WatchlistError> {
        let mut symbols = Vec::new();
        for raw in inputs {
            match self.normalize(raw) {
                Ok(symbol) => symbols.push(symbol),
                Err(e) => tracing::warn!(error = %e, "Skipping watchlist entry"),
            }
        }

        let checks = symbols.iter().map(|symbol| async move {
            if self.subscriptions.contains(symbol) {
                Ok(())
            } else {
                self.validate(symbol).await
            }
        });
        let results = join_all(checks).await;

        let mut accepted = Vec::with_capacity(symbols.len());
        for (symbol, result) in symbols.into_iter().zip(results) {
            match result {
                Ok(()) => accepted.push(symbol),
                Err(WatchlistError::UnknownSymbol { symbol }) => {
                    tracing::warn!(symbol = %symbol, "Skipping symbol not listed on the exchange");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(accepted)
    }

    fn forward(&self, changes: &SubscriptionChanges) -> Result<(), StreamClosed> {
        for symbol in &changes.unsubscribe {
            self.stream.unsubscribe(symbol.clone())?;
        }
        for symbol in &changes.subscribe {
            self.stream.subscribe(symbol.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MockAccountGateway, MockMarketStream};
    use crate::domain::market::SymbolRules;
    use mockall::Sequence;
    use mockall::predicate::eq;
    use rust_decimal_macros::dec;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn listing_gateway(listed: &'static [&'static str]) -> MockAccountGateway {
        let mut gateway = MockAccountGateway::new();
        gateway.expect_symbol_rules().returning(move |symbol| {
            if listed.iter().any(|listed| *listed == symbol.as_str()) {
                let base = symbol.base_asset("USDT").unwrap_or_default().to_string();
                Ok(SymbolRules::new(
                    symbol.clone(),
                    base,
                    "USDT",
                    dec!(0.001),
                    dec!(0.001),
                ))
            } else {
                Err(GatewayError::UnknownSymbol {
                    symbol: symbol.clone(),
                })
            }
        });
        gateway
    }

    fn service(
        gateway: MockAccountGateway,
        stream: MockMarketStream,
        subscriptions: Arc<SubscriptionSet>,
    ) -> WatchlistService<MockAccountGateway, MockMarketStream> {
        WatchlistService::new(
            Arc::new(gateway),
            Arc::new(stream),
            subscriptions,
            WatchlistConfig {
                restart_threshold: 3,
                ..WatchlistConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn add_favorite_normalizes_validates_and_subscribes() {
        let mut stream = MockMarketStream::new();
        stream
            .expect_subscribe()
            .with(eq(sym("SOLUSDT")))
            .times(1)
            .returning(|_| Ok(()));
        let set = Arc::new(SubscriptionSet::new());
        let svc = service(listing_gateway(&["SOLUSDT"]), stream, Arc::clone(&set));

        let changes = svc.add_favorite(" sol ").await.unwrap();

        assert_eq!(changes.subscribe, vec![sym("SOLUSDT")]);
        assert_eq!(set.current_symbols(), vec![sym("SOLUSDT")]);
    }

    #[tokio::test]
    async fn unknown_symbol_is_rejected_without_touching_the_set() {
        let mut stream = MockMarketStream::new();
        stream.expect_subscribe().never();
        let set = Arc::new(SubscriptionSet::new());
        let svc = service(listing_gateway(&[]), stream, Arc::clone(&set));

        let err = svc.add_favorite("nope").await.unwrap_err();

        assert!(matches!(err, WatchlistError::UnknownSymbol { ref symbol } if *symbol == sym("NOPEUSDT")));
        assert!(set.current_symbols().is_empty());
    }

    #[tokio::test]
    async fn swapping_dynamic_unsubscribes_before_subscribing() {
        let mut seq = Sequence::new();
        let mut stream = MockMarketStream::new();
        stream
            .expect_unsubscribe()
            .with(eq(sym("PEPEUSDT")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        stream
            .expect_subscribe()
            .with(eq(sym("WIFUSDT")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let set = Arc::new(SubscriptionSet::with_symbols([sym("BTCUSDT")], Some(sym("PEPEUSDT"))));
        let svc = service(listing_gateway(&["WIFUSDT"]), stream, set);

        let changes = svc.set_dynamic(Some("wif")).await.unwrap();

        assert_eq!(changes.len(), 2);
    }

    #[tokio::test]
    async fn dynamic_that_is_a_favorite_conflicts() {
        let stream = MockMarketStream::new();
        let set = Arc::new(SubscriptionSet::with_symbols([sym("BTCUSDT")], None));
        let svc = service(MockAccountGateway::new(), stream, set);

        let err = svc.set_dynamic(Some("BTC")).await.unwrap_err();

        assert!(matches!(
            err,
            WatchlistError::Conflict(SubscriptionError::AlreadyStatic(_))
        ));
    }

    #[tokio::test]
    async fn small_reload_is_incremental() {
        let mut stream = MockMarketStream::new();
        stream.expect_force_restart().never();
        stream
            .expect_unsubscribe()
            .with(eq(sym("ETHUSDT")))
            .times(1)
            .returning(|_| Ok(()));
        stream
            .expect_subscribe()
            .with(eq(sym("SOLUSDT")))
            .times(1)
            .returning(|_| Ok(()));
        let set = Arc::new(SubscriptionSet::with_symbols(
            [sym("BTCUSDT"), sym("ETHUSDT")],
            None,
        ));
        let svc = service(listing_gateway(&["SOLUSDT"]), stream, Arc::clone(&set));

        let outcome = svc
            .reload_symbols(&["BTC".to_string(), "SOL".to_string()], None)
            .await
            .unwrap();

        assert_eq!(outcome, ReloadOutcome::Incremental { changes: 2 });
        assert_eq!(set.current_symbols(), vec![sym("BTCUSDT"), sym("SOLUSDT")]);
    }

    #[tokio::test]
    async fn large_reload_restarts_the_stream() {
        let mut stream = MockMarketStream::new();
        stream.expect_force_restart().times(1).returning(|| Ok(()));
        stream.expect_subscribe().never();
        stream.expect_unsubscribe().never();
        let set = Arc::new(SubscriptionSet::new());
        let svc = service(
            listing_gateway(&["BTCUSDT", "ETHUSDT", "SOLUSDT", "PEPEUSDT"]),
            stream,
            Arc::clone(&set),
        );

        let favorites = ["btc", "eth", "sol"].map(String::from);
        let outcome = svc.reload_symbols(&favorites, Some("pepe")).await.unwrap();

        assert_eq!(outcome, ReloadOutcome::Restarted { changes: 4 });
        assert_eq!(set.stats().total, 4);
    }

    #[tokio::test]
    async fn reload_skips_bad_entries_and_reports_unchanged() {
        let stream = MockMarketStream::new();
        let set = Arc::new(SubscriptionSet::with_symbols([sym("BTCUSDT")], None));
        let svc = service(listing_gateway(&[]), stream, set);

        let favorites = ["BTC", "bad-coin", "DELISTED"].map(String::from);
        let outcome = svc.reload_symbols(&favorites, None).await.unwrap();

        assert_eq!(outcome, ReloadOutcome::Unchanged);
    }

    #[tokio::test]
    async fn reload_fails_when_validation_cannot_reach_exchange() {
        let mut gateway = MockAccountGateway::new();
        gateway.expect_symbol_rules().returning(|_| {
            Err(GatewayError::Connection {
                message: "down".to_string(),
            })
        });
        let set = Arc::new(SubscriptionSet::with_symbols([sym("BTCUSDT")], None));
        let svc = service(gateway, MockMarketStream::new(), Arc::clone(&set));

        let err = svc
            .reload_symbols(&["ETH".to_string()], None)
            .await
            .unwrap_err();

        assert!(matches!(err, WatchlistError::Gateway(_)));
        assert_eq!(set.current_symbols(), vec![sym("BTCUSDT")]);
    }

    #[test]
    fn status_reports_stream_state_and_symbols() {
        let mut stream = MockMarketStream::new();
        stream
            .expect_status()
            .return_const(ConnectionState::Degraded);
        let set = Arc::new(SubscriptionSet::with_symbols([sym("BTCUSDT")], Some(sym("PEPEUSDT"))));
        let svc = service(MockAccountGateway::new(), stream, set);

        let status = svc.status();

        assert_eq!(status.state, ConnectionState::Degraded);
        assert!(!status.connected);
        assert_eq!(status.symbols, vec![sym("BTCUSDT"), sym("PEPEUSDT")]);
        assert_eq!(status.dynamic, Some(sym("PEPEUSDT")));
    }
}
