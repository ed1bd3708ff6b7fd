//! Trade Ledger Port
//!
//! Append-only storage of trade records and portfolio snapshots. Adapters
//! must make a successful `append_trade` durable before returning.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::market::Symbol;
use crate::domain::trading::{PortfolioSnapshot, TradeRecord, TradeSummary};

/// Ledger storage errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Filesystem or database I/O failed.
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded.
    #[error("ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Query arguments were inconsistent.
    #[error("invalid ledger query: {0}")]
    InvalidQuery(String),
}

/// Durable, append-only trade and portfolio history.
#[async_trait]
pub trait TradeLedger: Send + Sync {
    /// Append one trade record.
    async fn append_trade(&self, record: &TradeRecord) -> Result<(), LedgerError>;

    /// Records whose UTC date lies in `from..=to`, oldest first.
    async fn trades_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TradeRecord>, LedgerError>;

    /// All records for `symbol`, oldest first.
    async fn trades_for_symbol(&self, symbol: &Symbol) -> Result<Vec<TradeRecord>, LedgerError>;

    /// Append a portfolio snapshot and make it the latest.
    async fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), LedgerError>;

    /// Most recently saved snapshot.
    async fn latest_snapshot(&self) -> Result<Option<PortfolioSnapshot>, LedgerError>;

    /// Summary of the records in `from..=to`.
    async fn summary(&self, from: NaiveDate, to: NaiveDate) -> Result<TradeSummary, LedgerError> {
        let records = self.trades_between(from, to).await?;
        Ok(TradeSummary::from_records(&records))
    }
}

/// Reject ranges whose end precedes their start.
pub(crate) fn check_range(from: NaiveDate, to: NaiveDate) -> Result<(), LedgerError> {
    if to < from {
        return Err(LedgerError::InvalidQuery(format!(
            "range end {to} precedes start {from}"
        )));
    }
    Ok(())
}
