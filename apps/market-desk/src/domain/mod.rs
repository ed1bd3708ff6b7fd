//! Domain Layer - Core trading console types and rules.
//!
//! Nothing in here performs I/O. Concurrency primitives appear only where a
//! domain object is itself shared state (`SubscriptionSet`, `RiskGate`).

/// Symbols, quotes, lot-size rules and connection state.
pub mod market;

/// The authoritative watchlist of streamed symbols.
pub mod subscription;

/// Risk limits and order sizing.
pub mod risk;

/// Orders, wallets, trade records and portfolio snapshots.
pub mod trading;
