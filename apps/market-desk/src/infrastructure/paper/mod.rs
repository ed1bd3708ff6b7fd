//! Paper Exchange
//!
//! Simulated venue that lets the console run end to end without a real
//! exchange. It serves both sides of the exchange boundary:
//!
//! - [`AccountGateway`]: balances, lot-size rules, market fills at the
//!   current simulated price and a book of resting limit orders. A limit
//!   order that is marketable on arrival fills at the current price; any
//!   other rests with its funds reserved and fills at its limit price once
//!   a tick crosses it.
//! - [`StreamTransport`]: sessions that emit one tick per subscribed symbol
//!   every tick interval, each price moving by a bounded random step.
//!
//! Prices stay within half and double their seed so a long run cannot walk
//! a market to zero.

mod session;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;

pub use session::PaperSession;

use crate::application::ports::{
    AccountGateway, GatewayError, OpenOrder, OrderFill, PlaceOrder, StreamTransport,
    TransportError,
};
use crate::domain::market::{Symbol, SymbolError, SymbolRules};
use crate::domain::trading::{Side, Wallet};
use crate::infrastructure::config::PaperSettings;

/// A listed market and its seed price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperMarket {
    /// Base asset, e.g. `BTC`.
    pub base_asset: String,
    /// Opening price in the quote asset.
    pub seed_price: Decimal,
    /// Price increment.
    pub tick_size: Decimal,
    /// Quantity increment.
    pub step_size: Decimal,
    /// Smallest accepted quantity.
    pub min_quantity: Decimal,
}

impl PaperMarket {
    /// Describe a market.
    #[must_use]
    pub fn new(
        base_asset: impl Into<String>,
        seed_price: Decimal,
        tick_size: Decimal,
        step_size: Decimal,
        min_quantity: Decimal,
    ) -> Self {
        Self {
            base_asset: base_asset.into(),
            seed_price,
            tick_size,
            step_size,
            min_quantity,
        }
    }
}

/// Markets listed by [`PaperExchange::seeded`].
#[must_use]
pub fn default_markets() -> Vec<PaperMarket> {
    vec![
        PaperMarket::new("BTC", dec!(65000), dec!(0.01), dec!(0.00001), dec!(0.00001)),
        PaperMarket::new("ETH", dec!(3200), dec!(0.01), dec!(0.0001), dec!(0.0001)),
        PaperMarket::new("SOL", dec!(150), dec!(0.01), dec!(0.001), dec!(0.001)),
        PaperMarket::new("BNB", dec!(580), dec!(0.01), dec!(0.001), dec!(0.001)),
        PaperMarket::new("XRP", dec!(0.6), dec!(0.0001), dec!(0.1), dec!(1)),
        PaperMarket::new("ADA", dec!(0.45), dec!(0.0001), dec!(0.1), dec!(1)),
        PaperMarket::new("DOGE", dec!(0.15), dec!(0.00001), dec!(1), dec!(1)),
        PaperMarket::new("PEPE", dec!(0.00001), dec!(0.00000001), dec!(1), dec!(1)),
    ]
}

#[derive(Debug)]
struct Listing {
    rules: SymbolRules,
    seed_price: Decimal,
}

/// Free balances and the resting limit orders whose funds they no longer
/// include.
#[derive(Debug, Default)]
struct Account {
    balances: BTreeMap<String, Decimal>,
    resting: Vec<OpenOrder>,
}

/// Market state shared with open sessions.
#[derive(Debug)]
struct Shared {
    listings: HashMap<Symbol, Listing>,
    prices: RwLock<HashMap<Symbol, Decimal>>,
    account: Mutex<Account>,
    max_step_pct: Decimal,
    /// Bumped to close every open session.
    generation: AtomicU64,
    offline: AtomicBool,
}

impl Shared {
    fn is_listed(&self, symbol: &Symbol) -> bool {
        self.listings.contains_key(symbol)
    }

    fn current_price(&self, symbol: &Symbol) -> Option<Decimal> {
        let listing = self.listings.get(symbol)?;
        Some(
            self.prices
                .read()
                .get(symbol)
                .copied()
                .unwrap_or(listing.seed_price),
        )
    }

    /// Advance one symbol's random walk and return the new price.
    fn step_price(&self, symbol: &Symbol) -> Option<Decimal> {
        let listing = self.listings.get(symbol)?;
        let change = random_change(self.max_step_pct);

        let price = {
            let mut prices = self.prices.write();
            let price = prices.entry(symbol.clone()).or_insert(listing.seed_price);
            let floor = listing.seed_price / Decimal::TWO;
            let ceiling = listing.seed_price * Decimal::TWO;
            *price = (*price * (Decimal::ONE + change))
                .round_dp(12)
                .clamp(floor, ceiling)
                .normalize();
            *price
        };
        self.match_resting(symbol, price);
        Some(price)
    }

    /// Fill every resting order on `symbol` that `price` has crossed, at
    /// its limit price. Its funds were reserved when it was placed.
    fn match_resting(&self, symbol: &Symbol, price: Decimal) {
        let Some(listing) = self.listings.get(symbol) else {
            return;
        };
        let rules = &listing.rules;

        let mut account = self.account.lock();
        let (crossed, resting): (Vec<_>, Vec<_>) = std::mem::take(&mut account.resting)
            .into_iter()
            .partition(|order| {
                order.symbol == *symbol && crosses(order.side, order.limit_price, price)
            });
        account.resting = resting;

        for order in crossed {
            match order.side {
                Side::Buy => credit(&mut account.balances, &rules.base_asset, order.quantity),
                Side::Sell => credit(
                    &mut account.balances,
                    &rules.quote_asset,
                    order.quantity.saturating_mul(order.limit_price),
                ),
            }
            tracing::info!(
                exchange_order_id = %order.exchange_order_id,
                symbol = %order.symbol,
                side = %order.side,
                quantity = %order.quantity,
                price = %order.limit_price,
                "Paper limit order filled"
            );
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Whether a limit order at `limit` can execute against `price`.
fn crosses(side: Side, limit: Decimal, price: Decimal) -> bool {
    match side {
        Side::Buy => price <= limit,
        Side::Sell => price >= limit,
    }
}

fn random_change(max_step_pct: Decimal) -> Decimal {
    let unit: f64 = rand::rng().random_range(-1.0..=1.0);
    Decimal::from_f64(unit).map_or(Decimal::ZERO, |unit| (unit * max_step_pct).round_dp(12))
}

/// Simulated exchange.
#[derive(Debug)]
pub struct PaperExchange {
    quote_asset: String,
    shared: Arc<Shared>,
    tick_interval: Duration,
    order_sequence: AtomicU64,
}

impl PaperExchange {
    /// Create an exchange listing `markets` against `quote_asset`, funded
    /// with the configured starting quote balance.
    ///
    /// # Errors
    ///
    /// Returns an error if a market's base asset does not form a valid
    /// symbol.
    pub fn new(
        quote_asset: &str,
        settings: &PaperSettings,
        markets: impl IntoIterator<Item = PaperMarket>,
    ) -> Result<Self, SymbolError> {
        let mut listings = HashMap::new();
        for market in markets {
            let symbol = Symbol::with_quote(&market.base_asset, quote_asset)?;
            let rules = SymbolRules::new(
                symbol.clone(),
                market.base_asset.to_uppercase(),
                quote_asset,
                market.step_size,
                market.min_quantity,
            )
            .with_tick_size(market.tick_size)
            .with_min_notional(settings.min_notional);
            listings.insert(
                symbol,
                Listing {
                    rules,
                    seed_price: market.seed_price,
                },
            );
        }

        let mut balances = BTreeMap::new();
        balances.insert(quote_asset.to_string(), settings.starting_quote_balance);

        Ok(Self {
            quote_asset: quote_asset.to_string(),
            shared: Arc::new(Shared {
                listings,
                prices: RwLock::new(HashMap::new()),
                account: Mutex::new(Account {
                    balances,
                    resting: Vec::new(),
                }),
                max_step_pct: settings.max_step_pct,
                generation: AtomicU64::new(0),
                offline: AtomicBool::new(false),
            }),
            tick_interval: settings.tick_interval.max(Duration::from_millis(1)),
            order_sequence: AtomicU64::new(0),
        })
    }

    /// Exchange listing [`default_markets`].
    ///
    /// # Errors
    ///
    /// Returns an error if the quote asset does not form valid symbols.
    pub fn seeded(quote_asset: &str, settings: &PaperSettings) -> Result<Self, SymbolError> {
        Self::new(quote_asset, settings, default_markets())
    }

    /// Quote asset all markets are priced in.
    #[must_use]
    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }

    /// Current simulated price of a listed symbol.
    #[must_use]
    pub fn price(&self, symbol: &Symbol) -> Option<Decimal> {
        self.shared.current_price(symbol)
    }

    /// Pin a listed symbol's price until the next tick moves it. Resting
    /// orders the new price crosses are filled.
    pub fn set_price(&self, symbol: &Symbol, price: Decimal) {
        if self.shared.is_listed(symbol) {
            self.shared.prices.write().insert(symbol.clone(), price);
            self.shared.match_resting(symbol, price);
        }
    }

    /// Overwrite a free balance.
    pub fn set_balance(&self, asset: &str, amount: Decimal) {
        self.shared
            .account
            .lock()
            .balances
            .insert(asset.to_uppercase(), amount);
    }

    /// Close every open stream session. New connections still succeed.
    pub fn drop_sessions(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        tracing::info!("Paper exchange closed all stream sessions");
    }

    /// Take the exchange offline or bring it back. Going offline closes open
    /// sessions; while offline every call fails with a connection error.
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
        if offline {
            self.drop_sessions();
        }
        tracing::info!(offline, "Paper exchange availability changed");
    }

    fn ensure_online(&self) -> Result<(), GatewayError> {
        if self.shared.offline.load(Ordering::SeqCst) {
            return Err(GatewayError::Connection {
                message: "paper exchange offline".to_string(),
            });
        }
        Ok(())
    }

    fn listing(&self, symbol: &Symbol) -> Result<&Listing, GatewayError> {
        self.shared
            .listings
            .get(symbol)
            .ok_or_else(|| GatewayError::UnknownSymbol {
                symbol: symbol.clone(),
            })
    }

    fn next_order_id(&self) -> String {
        let sequence = self.order_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("PAPER-{sequence}")
    }
}

fn rejected(reason: String) -> GatewayError {
    GatewayError::Rejected { reason }
}

fn is_multiple(value: Decimal, increment: Decimal) -> bool {
    increment.is_zero() || value.checked_rem(increment).is_some_and(|r| r.is_zero())
}

/// Exchange-side filters on quantity and limit price.
fn check_filters(order: &PlaceOrder, rules: &SymbolRules) -> Result<(), GatewayError> {
    if order.quantity <= Decimal::ZERO || order.quantity < rules.min_quantity {
        return Err(rejected(format!(
            "quantity {} below minimum {}",
            order.quantity, rules.min_quantity
        )));
    }
    if !is_multiple(order.quantity, rules.step_size) {
        return Err(rejected(format!(
            "quantity {} is not a multiple of step {}",
            order.quantity, rules.step_size
        )));
    }
    if let Some(limit) = order.kind.limit_price() {
        if limit <= Decimal::ZERO {
            return Err(rejected(format!("limit price {limit} is not positive")));
        }
        if !is_multiple(limit, rules.tick_size) {
            return Err(rejected(format!(
                "limit price {limit} is not a multiple of tick {}",
                rules.tick_size
            )));
        }
    }
    Ok(())
}

fn debit(
    balances: &mut BTreeMap<String, Decimal>,
    asset: &str,
    amount: Decimal,
) -> Result<(), GatewayError> {
    let available = balances.get(asset).copied().unwrap_or(Decimal::ZERO);
    if available < amount {
        return Err(GatewayError::InsufficientBalance {
            asset: asset.to_string(),
            required: amount,
            available,
        });
    }
    balances.insert(asset.to_string(), available - amount);
    Ok(())
}

fn credit(balances: &mut BTreeMap<String, Decimal>, asset: &str, amount: Decimal) {
    *balances.entry(asset.to_string()).or_insert(Decimal::ZERO) += amount;
}

#[async_trait]
impl AccountGateway for PaperExchange {
    async fn get_balance(&self, asset: &str) -> Result<Decimal, GatewayError> {
        self.ensure_online()?;
        Ok(self
            .shared
            .account
            .lock()
            .balances
            .get(&asset.to_uppercase())
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn get_all_balances(&self) -> Result<Wallet, GatewayError> {
        self.ensure_online()?;
        Ok(self
            .shared
            .account
            .lock()
            .balances
            .iter()
            .map(|(asset, free)| (asset.clone(), *free))
            .collect())
    }

    async fn place_order(&self, order: &PlaceOrder) -> Result<OrderFill, GatewayError> {
        self.ensure_online()?;
        let listing = self.listing(&order.symbol)?;
        let rules = &listing.rules;
        check_filters(order, rules)?;

        let market_price = self
            .shared
            .current_price(&order.symbol)
            .unwrap_or(listing.seed_price);
        let rest_at = order
            .kind
            .limit_price()
            .filter(|limit| !crosses(order.side, *limit, market_price));
        let price = rest_at.unwrap_or(market_price);

        let notional = order
            .quantity
            .checked_mul(price)
            .ok_or_else(|| rejected(format!("notional of {} overflows", order.quantity)))?;
        if notional < rules.min_notional {
            return Err(rejected(format!(
                "notional {notional} below minimum {}",
                rules.min_notional
            )));
        }

        let mut account = self.shared.account.lock();
        match order.side {
            Side::Buy => debit(&mut account.balances, &rules.quote_asset, notional)?,
            Side::Sell => debit(&mut account.balances, &rules.base_asset, order.quantity)?,
        }
        let exchange_order_id = self.next_order_id();

        if let Some(limit_price) = rest_at {
            account.resting.push(OpenOrder {
                exchange_order_id: exchange_order_id.clone(),
                client_order_id: order.client_order_id,
                symbol: order.symbol.clone(),
                side: order.side,
                quantity: order.quantity,
                limit_price,
                placed_at: Utc::now(),
            });
            drop(account);

            tracing::info!(
                exchange_order_id = %exchange_order_id,
                client_order_id = %order.client_order_id,
                symbol = %order.symbol,
                side = %order.side,
                quantity = %order.quantity,
                limit_price = %limit_price,
                market_price = %market_price,
                "Paper limit order resting"
            );
            return Ok(OrderFill::resting(exchange_order_id));
        }

        match order.side {
            Side::Buy => credit(&mut account.balances, &rules.base_asset, order.quantity),
            Side::Sell => credit(&mut account.balances, &rules.quote_asset, notional),
        }
        drop(account);

        tracing::info!(
            exchange_order_id = %exchange_order_id,
            client_order_id = %order.client_order_id,
            symbol = %order.symbol,
            side = %order.side,
            order_type = %order.kind.order_type(),
            quantity = %order.quantity,
            price = %price,
            "Paper order filled"
        );

        Ok(OrderFill::filled(exchange_order_id, order.quantity, price))
    }

    async fn cancel_order(
        &self,
        symbol: &Symbol,
        exchange_order_id: &str,
    ) -> Result<OpenOrder, GatewayError> {
        self.ensure_online()?;
        let rules = &self.listing(symbol)?.rules;

        let mut account = self.shared.account.lock();
        let position = account
            .resting
            .iter()
            .position(|o| o.symbol == *symbol && o.exchange_order_id == exchange_order_id)
            .ok_or_else(|| GatewayError::UnknownOrder {
                symbol: symbol.clone(),
                order_id: exchange_order_id.to_string(),
            })?;
        let order = account.resting.remove(position);
        match order.side {
            Side::Buy => credit(
                &mut account.balances,
                &rules.quote_asset,
                order.quantity.saturating_mul(order.limit_price),
            ),
            Side::Sell => credit(&mut account.balances, &rules.base_asset, order.quantity),
        }
        drop(account);

        tracing::info!(
            exchange_order_id = %order.exchange_order_id,
            symbol = %order.symbol,
            side = %order.side,
            "Paper limit order cancelled"
        );
        Ok(order)
    }

    async fn open_orders(&self, symbol: Option<Symbol>) -> Result<Vec<OpenOrder>, GatewayError> {
        self.ensure_online()?;
        Ok(self
            .shared
            .account
            .lock()
            .resting
            .iter()
            .filter(|order| symbol.as_ref().is_none_or(|s| order.symbol == *s))
            .cloned()
            .collect())
    }

    async fn symbol_rules(&self, symbol: &Symbol) -> Result<SymbolRules, GatewayError> {
        self.ensure_online()?;
        Ok(self.listing(symbol)?.rules.clone())
    }
}

#[async_trait]
impl StreamTransport for PaperExchange {
    type Session = PaperSession;

    async fn connect(&self) -> Result<Self::Session, TransportError> {
        if self.shared.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                message: "paper exchange offline".to_string(),
            });
        }
        Ok(PaperSession::new(Arc::clone(&self.shared), self.tick_interval))
    }
}
