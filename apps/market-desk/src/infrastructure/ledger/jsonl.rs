//! JSON-lines Trade Ledger
//!
//! Layout under the ledger root:
//!
//! ```text
//! trades/YYYY-MM-DD.jsonl      one TradeRecord per line
//! portfolio/YYYY-MM-DD.jsonl   one PortfolioSnapshot per line
//! portfolio/latest.json        most recent snapshot, replaced atomically
//! ```
//!
//! Appends are serialized and fsynced before returning. A crash mid-append
//! leaves at most one torn trailing line, which readers skip and the next
//! append terminates.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::application::ports::{LedgerError, TradeLedger, check_range};
use crate::domain::market::Symbol;
use crate::domain::trading::{PortfolioSnapshot, TradeRecord};

const TRADES_DIR: &str = "trades";
const PORTFOLIO_DIR: &str = "portfolio";
const LATEST_SNAPSHOT: &str = "latest.json";

/// File-backed, append-only ledger.
#[derive(Debug)]
pub struct JsonlTradeLedger {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlTradeLedger {
    /// Open a ledger rooted at `root`, creating its directories.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let root = root.into();
        fs::create_dir_all(root.join(TRADES_DIR)).await?;
        fs::create_dir_all(root.join(PORTFOLIO_DIR)).await?;

        tracing::info!(root = %root.display(), "Trade ledger opened");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Ledger root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn day_file(&self, dir: &str, date: NaiveDate) -> PathBuf {
        self.root
            .join(dir)
            .join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    async fn append_line<T: Serialize + Sync>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .await?;

        if ends_with_torn_line(&mut file).await? {
            tracing::warn!(path = %path.display(), "Terminating torn trailing ledger line");
            line.insert(0, b'\n');
        }

        file.write_all(&line).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, LedgerError> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut values = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(value) => values.push(value),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping unreadable ledger line"
                ),
            }
        }
        Ok(values)
    }

    async fn trade_files(&self) -> Result<Vec<PathBuf>, LedgerError> {
        let mut entries = fs::read_dir(self.root.join(TRADES_DIR)).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                files.push(path);
            }
        }
        // Date-named, so lexical order is chronological.
        files.sort();
        Ok(files)
    }
}

async fn ends_with_torn_line(file: &mut fs::File) -> Result<bool, LedgerError> {
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    Ok(file.read_u8().await? != b'\n')
}

#[async_trait]
impl TradeLedger for JsonlTradeLedger {
    async fn append_trade(&self, record: &TradeRecord) -> Result<(), LedgerError> {
        let path = self.day_file(TRADES_DIR, record.timestamp.date_naive());
        let _guard = self.write_lock.lock().await;
        self.append_line(&path, record).await?;

        tracing::debug!(
            order_id = %record.order_id,
            status = ?record.status,
            path = %path.display(),
            "Trade record appended"
        );
        Ok(())
    }

    async fn trades_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TradeRecord>, LedgerError> {
        check_range(from, to)?;

        let mut records = Vec::new();
        for date in from.iter_days().take_while(|date| *date <= to) {
            records.extend(Self::read_lines::<TradeRecord>(&self.day_file(TRADES_DIR, date)).await?);
        }
        Ok(records)
    }

    async fn trades_for_symbol(&self, symbol: &Symbol) -> Result<Vec<TradeRecord>, LedgerError> {
        let mut records = Vec::new();
        for path in self.trade_files().await? {
            records.extend(
                Self::read_lines::<TradeRecord>(&path)
                    .await?
                    .into_iter()
                    .filter(|r| &r.symbol == symbol),
            );
        }
        Ok(records)
    }

    async fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), LedgerError> {
        let history = self.day_file(PORTFOLIO_DIR, snapshot.recorded_at.date_naive());
        let latest = self.root.join(PORTFOLIO_DIR).join(LATEST_SNAPSHOT);
        let tmp = latest.with_extension("json.tmp");

        let _guard = self.write_lock.lock().await;
        self.append_line(&history, snapshot).await?;

        let json = serde_json::to_vec_pretty(snapshot)?;
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        fs::rename(&tmp, &latest).await?;

        tracing::debug!(snapshot_id = %snapshot.snapshot_id, "Portfolio snapshot saved");
        Ok(())
    }

    async fn latest_snapshot(&self) -> Result<Option<PortfolioSnapshot>, LedgerError> {
        let path = self.root.join(PORTFOLIO_DIR).join(LATEST_SNAPSHOT);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
