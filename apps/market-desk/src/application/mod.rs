//! Application Layer - Use cases and port definitions.
//!
//! Ports describe what the core needs from the exchange and from storage;
//! services coordinate domain objects through those ports.

/// Port definitions (exchange and storage boundaries).
pub mod ports;

/// Application services.
pub mod services;
