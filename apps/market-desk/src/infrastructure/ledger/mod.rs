//! Trade Ledger Adapters
//!
//! - [`JsonlTradeLedger`]: durable daily JSON-lines files
//! - [`InMemoryTradeLedger`]: process memory, for tests and ephemeral runs

mod in_memory;
mod jsonl;

pub use in_memory::InMemoryTradeLedger;
pub use jsonl::JsonlTradeLedger;
