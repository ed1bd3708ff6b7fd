//! In-memory trade ledger for tests and ephemeral runs.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;

use crate::application::ports::{LedgerError, TradeLedger, check_range};
use crate::domain::market::Symbol;
use crate::domain::trading::{PortfolioSnapshot, TradeRecord};

/// Ledger that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct InMemoryTradeLedger {
    trades: RwLock<Vec<TradeRecord>>,
    snapshots: RwLock<Vec<PortfolioSnapshot>>,
    fail_writes: AtomicBool,
}

impl InMemoryTradeLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All trades in append order.
    #[must_use]
    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.read().clone()
    }

    /// Make every subsequent write fail, to exercise error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), LedgerError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Io(std::io::Error::other(
                "ledger writes disabled",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TradeLedger for InMemoryTradeLedger {
    async fn append_trade(&self, record: &TradeRecord) -> Result<(), LedgerError> {
        self.check_writable()?;
        self.trades.write().push(record.clone());
        Ok(())
    }

    async fn trades_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TradeRecord>, LedgerError> {
        check_range(from, to)?;
        Ok(self
            .trades
            .read()
            .iter()
            .filter(|r| (from..=to).contains(&r.timestamp.date_naive()))
            .cloned()
            .collect())
    }

    async fn trades_for_symbol(&self, symbol: &Symbol) -> Result<Vec<TradeRecord>, LedgerError> {
        Ok(self
            .trades
            .read()
            .iter()
            .filter(|r| &r.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), LedgerError> {
        self.check_writable()?;
        self.snapshots.write().push(snapshot.clone());
        Ok(())
    }

    async fn latest_snapshot(&self) -> Result<Option<PortfolioSnapshot>, LedgerError> {
        Ok(self.snapshots.read().last().cloned())
    }
}
