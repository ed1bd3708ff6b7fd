//! Order Executor
//!
//! Runs one order attempt end to end:
//!
//! 1. claim the caller's idempotency token
//! 2. wait for the symbol's queue slot
//! 3. snapshot the wallet, resolve the price and order type, size through
//!    the risk gate
//! 4. place the order
//! 5. snapshot the wallet again and append the trade record
//!
//! Nothing is written before step 4. Once an order has been sent, exactly
//! one record is appended whatever the exchange answered.
//!
//! Limit orders are sized against their limit price. Without an explicit
//! price the limit is derived from the cached price; a limit order the
//! exchange leaves on the book is recorded as OPEN.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::application::ports::{
    AccountGateway, FillStatus, GatewayError, LedgerError, OpenOrder, OrderFill, PlaceOrder,
    TradeLedger, call_with_timeout,
};
use crate::application::services::price_cache::PriceCache;
use crate::domain::market::{Symbol, SymbolRules};
use crate::domain::risk::{AdjustedOrder, RiskError, RiskGate, RiskRejection, SizingContext};
use crate::domain::trading::{
    IdempotencyToken, OrderKind, OrderRequest, OrderType, OrderTypePreference, Side,
    TradeRecord, TradeStatus, Wallet, auto_limit_price,
};
use crate::infrastructure::metrics;

// =============================================================================
// Configuration and Errors
// =============================================================================

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Bound on every exchange call.
    pub call_timeout: Duration,
    /// How many submitted tokens are remembered for duplicate detection.
    pub remembered_tokens: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            remembered_tokens: 1024,
        }
    }
}

/// Order path errors. Every variant is a failed user action.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    /// Token is in flight or its order was already sent.
    #[error("duplicate request for token {token}")]
    DuplicateRequest {
        /// Repeated token.
        token: IdempotencyToken,
    },

    /// No fresh price to size against.
    #[error("price unavailable for {symbol}: {reason}")]
    PriceUnavailable {
        /// Requested symbol.
        symbol: Symbol,
        /// Why no price could be used.
        reason: String,
    },

    /// Risk gate refused the order.
    #[error("risk exceeded: {0}")]
    RiskExceeded(RiskRejection),

    /// Risk limits are missing.
    #[error("configuration error: {message}")]
    Config {
        /// Error details.
        message: String,
    },

    /// Exchange call failed before or during placement.
    #[error("{operation} failed: {source}")]
    Gateway {
        /// Gateway call that failed.
        operation: &'static str,
        /// Underlying failure.
        source: GatewayError,
    },

    /// Exchange rejected the order.
    #[error("order {order_id} rejected: {reason}")]
    OrderRejected {
        /// Our order id.
        order_id: Uuid,
        /// Exchange reason.
        reason: String,
    },

    /// No answer to the order in time. Outcome unknown.
    #[error("order {order_id} timed out after {after:?}; needs reconciliation")]
    OrderTimeout {
        /// Our order id.
        order_id: Uuid,
        /// Bound that elapsed.
        after: Duration,
    },

    /// Order filled but its record could not be written.
    #[error("order {order_id} filled but the trade record was not written: {source}")]
    LedgerWrite {
        /// Our order id.
        order_id: Uuid,
        /// Storage failure.
        source: LedgerError,
    },

    /// Order failed at the exchange and its FAILED record could not be
    /// written either.
    #[error("{source}; FAILED trade record for order {order_id} was not written: {ledger}")]
    Unrecorded {
        /// Our order id.
        order_id: Uuid,
        /// Why the order failed.
        source: Box<OrderError>,
        /// Storage failure.
        ledger: LedgerError,
    },
}

impl OrderError {
    /// Short label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateRequest { .. } => "duplicate_request",
            Self::PriceUnavailable { .. } => "price_unavailable",
            Self::RiskExceeded(_) => "risk_exceeded",
            Self::Config { .. } => "config",
            Self::Gateway { .. } => "gateway",
            Self::OrderRejected { .. } => "order_rejected",
            Self::OrderTimeout { .. } => "order_timeout",
            Self::LedgerWrite { .. } => "ledger_write",
            Self::Unrecorded { .. } => "unrecorded",
        }
    }

    /// Storage failure that kept the attempt out of the ledger, if any.
    #[must_use]
    pub const fn ledger_failure(&self) -> Option<&LedgerError> {
        match self {
            Self::LedgerWrite { source, .. } => Some(source),
            Self::Unrecorded { ledger, .. } => Some(ledger),
            _ => None,
        }
    }

    fn from_risk(error: RiskError, symbol: &Symbol) -> Self {
        match error {
            RiskError::NotConfigured => Self::Config {
                message: error.to_string(),
            },
            RiskError::Exceeded(rejection) => Self::RiskExceeded(rejection),
            RiskError::InvalidPrice(_) => Self::PriceUnavailable {
                symbol: symbol.clone(),
                reason: error.to_string(),
            },
        }
    }
}

// =============================================================================
// Idempotency Tokens
// =============================================================================

#[derive(Debug, Default)]
struct TokenRegistry {
    in_flight: HashSet<IdempotencyToken>,
    submitted: HashSet<IdempotencyToken>,
    submitted_order: VecDeque<IdempotencyToken>,
}

impl TokenRegistry {
    fn claim(&mut self, token: &IdempotencyToken) -> bool {
        if self.in_flight.contains(token) || self.submitted.contains(token) {
            return false;
        }
        self.in_flight.insert(token.clone())
    }

    fn release(&mut self, token: &IdempotencyToken, submitted: bool, capacity: usize) {
        self.in_flight.remove(token);
        if submitted && self.submitted.insert(token.clone()) {
            self.submitted_order.push_back(token.clone());
            while self.submitted_order.len() > capacity {
                if let Some(oldest) = self.submitted_order.pop_front() {
                    self.submitted.remove(&oldest);
                }
            }
        }
    }
}

/// Releases a claimed token when the attempt ends, including when the
/// caller drops the future.
struct TokenClaim<'a> {
    registry: &'a Mutex<TokenRegistry>,
    token: IdempotencyToken,
    capacity: usize,
    submitted: bool,
}

impl TokenClaim<'_> {
    const fn mark_submitted(&mut self) {
        self.submitted = true;
    }
}

impl Drop for TokenClaim<'_> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .release(&self.token, self.submitted, self.capacity);
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Risk-gated, per-symbol serialized order execution.
pub struct OrderExecutor<G, L>
where
    G: AccountGateway,
    L: TradeLedger,
{
    gateway: Arc<G>,
    ledger: Arc<L>,
    prices: Arc<PriceCache>,
    risk: Arc<RiskGate>,
    order_types: OrderTypePreference,
    config: ExecutorConfig,
    tokens: Mutex<TokenRegistry>,
    symbol_queues: Mutex<HashMap<Symbol, Arc<tokio::sync::Mutex<()>>>>,
}

impl<G, L> OrderExecutor<G, L>
where
    G: AccountGateway,
    L: TradeLedger,
{
    /// Create a new executor.
    pub fn new(
        gateway: Arc<G>,
        ledger: Arc<L>,
        prices: Arc<PriceCache>,
        risk: Arc<RiskGate>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            gateway,
            ledger,
            prices,
            risk,
            order_types: OrderTypePreference::default(),
            config,
            tokens: Mutex::new(TokenRegistry::default()),
            symbol_queues: Mutex::new(HashMap::new()),
        }
    }

    /// Order type used by requests that do not name one. Starts at
    /// [`OrderType::Market`].
    #[must_use]
    pub const fn order_types(&self) -> &OrderTypePreference {
        &self.order_types
    }

    /// Execute one order attempt.
    ///
    /// Orders for the same symbol run one at a time in arrival order; orders
    /// for different symbols run concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError`] describing why the attempt did not fill. When
    /// the order reached the exchange, a FAILED record has been written.
    pub async fn execute(
        &self,
        token: IdempotencyToken,
        request: OrderRequest,
    ) -> Result<TradeRecord, OrderError> {
        if !self.tokens.lock().claim(&token) {
            tracing::warn!(token = %token, symbol = %request.symbol, "Duplicate order request rejected");
            metrics::record_order(request.side, "duplicate_request", Duration::ZERO);
            return Err(OrderError::DuplicateRequest { token });
        }
        let mut claim = TokenClaim {
            registry: &self.tokens,
            token,
            capacity: self.config.remembered_tokens,
            submitted: false,
        };

        let started = tokio::time::Instant::now();
        let result = self.run(&mut claim, &request).await;

        let outcome = match &result {
            Ok(record) if record.status == TradeStatus::Open => "open",
            Ok(_) => "filled",
            Err(e) => e.kind(),
        };
        metrics::record_order(request.side, outcome, started.elapsed());

        match &result {
            Ok(record) if record.status == TradeStatus::Open => tracing::info!(
                order_id = %record.order_id,
                exchange_order_id = record.exchange_order_id.as_deref(),
                symbol = %record.symbol,
                side = %record.side,
                quantity = %record.quantity,
                limit_price = %record.price,
                "Limit order resting on the book"
            ),
            Ok(record) => tracing::info!(
                order_id = %record.order_id,
                symbol = %record.symbol,
                side = %record.side,
                order_type = %record.kind.order_type(),
                quantity = %record.quantity,
                price = %record.price,
                needs_reconciliation = record.needs_reconciliation,
                "Order filled"
            ),
            Err(e) => tracing::warn!(
                token = %claim.token,
                symbol = %request.symbol,
                side = %request.side,
                kind = e.kind(),
                error = %e,
                "Order failed"
            ),
        }

        result
    }

    async fn run(
        &self,
        claim: &mut TokenClaim<'_>,
        request: &OrderRequest,
    ) -> Result<TradeRecord, OrderError> {
        let symbol = &request.symbol;
        let queue = self.symbol_queue(symbol);
        let _turn = queue.lock().await;

        let wallet_before = self
            .gateway_call("get_all_balances", self.gateway.get_all_balances())
            .await?;

        let price = self
            .prices
            .get_price(symbol)
            .map_err(|e| OrderError::PriceUnavailable {
                symbol: symbol.clone(),
                reason: e.to_string(),
            })?;

        let rules = self
            .gateway_call("symbol_rules", self.gateway.symbol_rules(symbol))
            .await?;

        let kind = self.order_kind(request, price, &rules);
        let sizing_price = kind.limit_price().unwrap_or(price);

        let context = SizingContext {
            equity: equity_for(request.side, &wallet_before, &rules, sizing_price),
            price: sizing_price,
            rules: &rules,
        };
        let adjusted = self
            .risk
            .evaluate(request, &context)
            .map_err(|e| OrderError::from_risk(e, symbol))?;

        if let Some(clamp) = adjusted.clamp {
            tracing::info!(
                symbol = %symbol,
                reason = %clamp,
                effective_amount = %adjusted.effective_amount,
                "Order size reduced by risk limits"
            );
        }

        let order = PlaceOrder {
            client_order_id: Uuid::new_v4(),
            symbol: symbol.clone(),
            side: request.side,
            quantity: adjusted.quantity,
            kind,
        };

        claim.mark_submitted();
        tracing::debug!(
            order_id = %order.client_order_id,
            symbol = %symbol,
            side = %order.side,
            order_type = %kind.order_type(),
            limit_price = ?kind.limit_price(),
            quantity = %order.quantity,
            "Submitting order"
        );

        let placed = call_with_timeout(
            self.config.call_timeout,
            "place_order",
            self.gateway.place_order(&order),
        )
        .await;

        match placed {
            Ok(fill) => {
                self.record_fill(&claim.token, &adjusted, &order, fill, wallet_before)
                    .await
            }
            Err(error) => {
                Err(self
                    .record_failure(&claim.token, &adjusted, &order, wallet_before, error)
                    .await)
            }
        }
    }

    async fn record_fill(
        &self,
        token: &IdempotencyToken,
        adjusted: &AdjustedOrder,
        order: &PlaceOrder,
        fill: OrderFill,
        wallet_before: Wallet,
    ) -> Result<TradeRecord, OrderError> {
        let (wallet_after, needs_reconciliation) = match self
            .gateway_call("get_all_balances", self.gateway.get_all_balances())
            .await
        {
            Ok(wallet) => (wallet, false),
            Err(e) => {
                tracing::warn!(
                    order_id = %order.client_order_id,
                    error = %e,
                    "Post-trade balance snapshot failed, flagging for reconciliation"
                );
                (wallet_before.clone(), true)
            }
        };

        let (status, quantity, price) = match fill.status {
            FillStatus::Filled if fill.avg_price > Decimal::ZERO => {
                (TradeStatus::Filled, fill.filled_quantity, fill.avg_price)
            }
            FillStatus::Filled => (
                TradeStatus::Filled,
                fill.filled_quantity,
                adjusted.reference_price,
            ),
            FillStatus::Open => (
                TradeStatus::Open,
                order.quantity,
                order.kind.limit_price().unwrap_or(adjusted.reference_price),
            ),
        };

        let record = TradeRecord {
            order_id: order.client_order_id,
            exchange_order_id: Some(fill.exchange_order_id),
            idempotency_token: token.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            kind: order.kind,
            status,
            quantity,
            price,
            total: quantity.saturating_mul(price),
            requested: adjusted.request.size,
            effective_amount: adjusted.effective_amount,
            clamp: adjusted.clamp,
            wallet_before,
            wallet_after,
            failure_reason: None,
            needs_reconciliation,
            timestamp: Utc::now(),
        };

        self.ledger
            .append_trade(&record)
            .await
            .map_err(|source| OrderError::LedgerWrite {
                order_id: record.order_id,
                source,
            })?;

        Ok(record)
    }

    async fn record_failure(
        &self,
        token: &IdempotencyToken,
        adjusted: &AdjustedOrder,
        order: &PlaceOrder,
        wallet_before: Wallet,
        error: GatewayError,
    ) -> OrderError {
        let record = TradeRecord {
            order_id: order.client_order_id,
            exchange_order_id: None,
            idempotency_token: token.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            kind: order.kind,
            status: TradeStatus::Failed,
            quantity: order.quantity,
            price: adjusted.reference_price,
            total: adjusted.notional(),
            requested: adjusted.request.size,
            effective_amount: adjusted.effective_amount,
            clamp: adjusted.clamp,
            wallet_after: wallet_before.clone(),
            wallet_before,
            failure_reason: Some(error.to_string()),
            needs_reconciliation: error.is_outcome_unknown(),
            timestamp: Utc::now(),
        };

        let order_id = record.order_id;
        let failure = match error {
            GatewayError::Timeout { after, .. } => OrderError::OrderTimeout { order_id, after },
            GatewayError::Connection { .. } => OrderError::Gateway {
                operation: "place_order",
                source: error,
            },
            GatewayError::Rejected { reason } => OrderError::OrderRejected { order_id, reason },
            other => OrderError::OrderRejected {
                order_id,
                reason: other.to_string(),
            },
        };

        match self.ledger.append_trade(&record).await {
            Ok(()) => failure,
            Err(ledger) => {
                tracing::error!(
                    order_id = %order_id,
                    error = %ledger,
                    "Failed to write FAILED trade record"
                );
                OrderError::Unrecorded {
                    order_id,
                    source: Box::new(failure),
                    ledger,
                }
            }
        }
    }

    /// Resting limit orders, for one symbol or all of them.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::Gateway`] if the exchange call fails.
    pub async fn open_orders(&self, symbol: Option<Symbol>) -> Result<Vec<OpenOrder>, OrderError> {
        self.gateway_call("open_orders", self.gateway.open_orders(symbol))
            .await
    }

    /// Cancel a resting limit order. Waits for the symbol's queue slot, so
    /// it never overlaps an order being placed on the same symbol.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::Gateway`] if the order is not open or the
    /// exchange call fails.
    pub async fn cancel_order(
        &self,
        symbol: &Symbol,
        exchange_order_id: &str,
    ) -> Result<OpenOrder, OrderError> {
        let queue = self.symbol_queue(symbol);
        let _turn = queue.lock().await;

        let cancelled = self
            .gateway_call(
                "cancel_order",
                self.gateway.cancel_order(symbol, exchange_order_id),
            )
            .await?;

        tracing::info!(
            exchange_order_id,
            symbol = %symbol,
            side = %cancelled.side,
            quantity = %cancelled.quantity,
            limit_price = %cancelled.limit_price,
            "Limit order cancelled"
        );
        Ok(cancelled)
    }

    /// Resolve market or limit. An explicit limit price is rounded to the
    /// tick; a missing one is derived from `reference`.
    fn order_kind(&self, request: &OrderRequest, reference: Decimal, rules: &SymbolRules) -> OrderKind {
        match request
            .order_type
            .unwrap_or_else(|| self.order_types.effective())
        {
            OrderType::Market => OrderKind::Market,
            OrderType::Limit => OrderKind::Limit {
                price: request.limit_price.map_or_else(
                    || auto_limit_price(request.side, reference, rules),
                    |price| rules.round_price(price),
                ),
            },
        }
    }

    async fn gateway_call<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, OrderError> {
        call_with_timeout(self.config.call_timeout, operation, call)
            .await
            .map_err(|source| OrderError::Gateway { operation, source })
    }

    fn symbol_queue(&self, symbol: &Symbol) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.symbol_queues.lock().entry(symbol.clone()).or_default())
    }
}

/// Spendable value in the quote asset for `side`.
fn equity_for(side: Side, wallet: &Wallet, rules: &SymbolRules, price: Decimal) -> Decimal {
    match side {
        Side::Buy => wallet.free(&rules.quote_asset),
        Side::Sell => wallet.free(&rules.base_asset).saturating_mul(price),
    }
}

// =============================================================================
// Tests
// =============================================================================
