//! Portfolio Recorder
//!
//! Values the wallet with cached prices and appends the result to the
//! trade ledger.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::application::ports::{
    AccountGateway, GatewayError, LedgerError, TradeLedger, call_with_timeout,
};
use crate::application::services::price_cache::PriceCache;
use crate::domain::market::Symbol;
use crate::domain::trading::{Holding, PortfolioSnapshot};

/// Portfolio recording errors.
#[derive(Debug, thiserror::Error)]
pub enum PortfolioError {
    /// Balances could not be fetched.
    #[error("balance snapshot failed: {0}")]
    Gateway(#[from] GatewayError),

    /// Snapshot could not be stored.
    #[error("snapshot write failed: {0}")]
    Ledger(#[from] LedgerError),
}

/// Takes valued wallet snapshots.
pub struct PortfolioRecorder<G, L>
where
    G: AccountGateway,
    L: TradeLedger,
{
    gateway: Arc<G>,
    ledger: Arc<L>,
    prices: Arc<PriceCache>,
    quote_asset: String,
    call_timeout: Duration,
}

impl<G, L> PortfolioRecorder<G, L>
where
    G: AccountGateway,
    L: TradeLedger,
{
    /// Create a new recorder valuing holdings in `quote_asset`.
    pub fn new(
        gateway: Arc<G>,
        ledger: Arc<L>,
        prices: Arc<PriceCache>,
        quote_asset: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            ledger,
            prices,
            quote_asset: quote_asset.into(),
            call_timeout,
        }
    }

    /// Value the current wallet and store the snapshot.
    ///
    /// The quote asset counts at face value. Other assets are priced from
    /// the `ASSET` + quote pair in the cache; assets without a fresh price
    /// are kept with no value and listed as unpriced.
    pub async fn record_snapshot(&self) -> Result<PortfolioSnapshot, PortfolioError> {
        let wallet = call_with_timeout(
            self.call_timeout,
            "get_all_balances",
            self.gateway.get_all_balances(),
        )
        .await?;

        let mut holdings = BTreeMap::new();
        let mut total_value = Decimal::ZERO;

        for balance in wallet.balances().filter(|b| !b.free.is_zero()) {
            let value = self.value_of(&balance.asset, balance.free);
            if let Some(value) = value {
                total_value = total_value.saturating_add(value);
            }
            holdings.insert(
                balance.asset,
                Holding {
                    amount: balance.free,
                    value,
                },
            );
        }

        let snapshot = PortfolioSnapshot {
            snapshot_id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            quote_asset: self.quote_asset.clone(),
            holdings,
            total_value,
        };

        self.ledger.save_snapshot(&snapshot).await?;

        let unpriced: Vec<&str> = snapshot.unpriced_assets().collect();
        tracing::info!(
            snapshot_id = %snapshot.snapshot_id,
            total_value = %snapshot.total_value,
            assets = snapshot.holdings.len(),
            unpriced = ?unpriced,
            "Portfolio snapshot recorded"
        );

        Ok(snapshot)
    }

    fn value_of(&self, asset: &str, amount: Decimal) -> Option<Decimal> {
        if asset == self.quote_asset {
            return Some(amount);
        }
        let pair = Symbol::with_quote(asset, &self.quote_asset).ok()?;
        let price = self.prices.get_price(&pair).ok()?;
        amount.checked_mul(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockAccountGateway;
    use crate::domain::market::PriceQuote;
    use crate::domain::trading::Wallet;
    use crate::infrastructure::ledger::InMemoryTradeLedger;
    use rust_decimal_macros::dec;

    fn recorder(
        gateway: MockAccountGateway,
        prices: Arc<PriceCache>,
    ) -> (
        PortfolioRecorder<MockAccountGateway, InMemoryTradeLedger>,
        Arc<InMemoryTradeLedger>,
    ) {
        let ledger = Arc::new(InMemoryTradeLedger::new());
        let recorder = PortfolioRecorder::new(
            Arc::new(gateway),
            Arc::clone(&ledger),
            prices,
            "USDT",
            Duration::from_secs(5),
        );
        (recorder, ledger)
    }

    #[tokio::test]
    async fn values_holdings_and_lists_unpriced() {
        let mut gateway = MockAccountGateway::new();
        gateway.expect_get_all_balances().returning(|| {
            Ok([
                ("USDT", dec!(500)),
                ("BTC", dec!(0.01)),
                ("DUST", dec!(3)),
                ("ETH", dec!(0)),
            ]
            .into_iter()
            .collect::<Wallet>())
        });
        let prices = Arc::new(PriceCache::default());
        prices.update(PriceQuote::new(Symbol::new("BTCUSDT").unwrap(), dec!(60000)));
        let (recorder, ledger) = recorder(gateway, prices);

        let snapshot = recorder.record_snapshot().await.unwrap();

        assert_eq!(snapshot.total_value, dec!(1100));
        assert_eq!(snapshot.holdings["BTC"].value, Some(dec!(600)));
        assert_eq!(snapshot.unpriced_assets().collect::<Vec<_>>(), vec!["DUST"]);
        assert!(!snapshot.holdings.contains_key("ETH"));
        assert_eq!(ledger.latest_snapshot().await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn balance_failure_writes_nothing() {
        let mut gateway = MockAccountGateway::new();
        gateway.expect_get_all_balances().returning(|| {
            Err(GatewayError::Connection {
                message: "down".to_string(),
            })
        });
        let (recorder, ledger) = recorder(gateway, Arc::new(PriceCache::default()));

        let err = recorder.record_snapshot().await.unwrap_err();

        assert!(matches!(err, PortfolioError::Gateway(_)));
        assert_eq!(ledger.latest_snapshot().await.unwrap(), None);
    }
}
