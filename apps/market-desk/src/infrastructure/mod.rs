//! Infrastructure Layer
//!
//! Adapters for the ports defined in the application layer, plus the
//! cross-cutting concerns of the binary:
//!
//! - **Driven adapters**
//!   - `stream/`: stream connection task, reconnect policy, tick watchdog
//!   - `paper/`: simulated exchange (gateway and stream transport)
//!   - `ledger/`: JSONL and in-memory trade ledgers
//!
//! - **Operator surface**
//!   - `console/`: stdin command parser
//!   - `config/`: environment settings and the preferences file
//!
//! - **Observability**
//!   - `telemetry/`: tracing subscriber and optional OTLP export
//!   - `metrics/`: Prometheus metrics

pub mod config;
pub mod console;
pub mod ledger;
pub mod metrics;
pub mod paper;
pub mod stream;
pub mod telemetry;
