//! Port Definitions
//!
//! Interfaces the core depends on. Adapters live in the infrastructure layer.

mod account_gateway;
mod market_stream;
mod stream_transport;
mod trade_ledger;

pub use account_gateway::{
    AccountGateway, FillStatus, GatewayError, OpenOrder, OrderFill, PlaceOrder, call_with_timeout,
};
pub use market_stream::{MarketStream, StreamClosed};
pub use stream_transport::{
    RawTick, StreamEvent, StreamSession, StreamTransport, TickError, TransportError,
};
pub use trade_ledger::{LedgerError, TradeLedger};
pub(crate) use trade_ledger::check_range;

#[cfg(test)]
pub use account_gateway::MockAccountGateway;
#[cfg(test)]
pub use market_stream::MockMarketStream;
