//! Stream Connection
//!
//! One long-lived task owns the streaming session and is the only writer to
//! the price cache. It is an explicit state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed -> (tick silence) Degraded
//!      ^              |              |                 |
//!      +-- delay <----+---- error ---+      immediate reconnect
//! ```
//!
//! Every new session subscribes the full watchlist in one call. Commands
//! from [`StreamHandle`]s that arrive while connecting or backing off are
//! queued and replayed once the session is up; a per-session symbol set
//! makes replays of already-covered symbols no-ops.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::watchdog::{DEFAULT_WATCHDOG_TIMEOUT, TickWatchdog};
use crate::application::ports::{
    MarketStream, RawTick, StreamClosed, StreamEvent, StreamSession, StreamTransport,
    TransportError,
};
use crate::application::services::PriceCache;
use crate::domain::market::{ConnectionState, Symbol};
use crate::domain::subscription::SubscriptionSet;
use crate::infrastructure::metrics::{self, ReconnectCause, TickDropReason};

// =============================================================================
// Configuration
// =============================================================================

/// Stream connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Delay schedule between reconnect attempts.
    pub reconnect: ReconnectConfig,
    /// Tick silence tolerated while at least one symbol is subscribed.
    pub watchdog_timeout: Duration,
    /// Bound on the transport handshake.
    pub connect_timeout: Duration,
    /// Bound on each subscribe/unsubscribe call.
    pub subscribe_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            subscribe_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamCommand {
    Subscribe(Symbol),
    Unsubscribe(Symbol),
    ForceRestart,
}

/// Cloneable control handle for a running [`StreamConnection`].
#[derive(Debug, Clone)]
pub struct StreamHandle {
    commands: mpsc::UnboundedSender<StreamCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl StreamHandle {
    /// Receiver for state changes.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the stream reaches `state`.
    pub async fn wait_for(&self, state: ConnectionState) -> Result<(), StreamClosed> {
        let mut rx = self.state.clone();
        rx.wait_for(|current| *current == state)
            .await
            .map(|_| ())
            .map_err(|_| StreamClosed)
    }

    fn send(&self, command: StreamCommand) -> Result<(), StreamClosed> {
        self.commands.send(command).map_err(|_| StreamClosed)
    }
}

impl MarketStream for StreamHandle {
    fn subscribe(&self, symbol: Symbol) -> Result<(), StreamClosed> {
        self.send(StreamCommand::Subscribe(symbol))
    }

    fn unsubscribe(&self, symbol: Symbol) -> Result<(), StreamClosed> {
        self.send(StreamCommand::Unsubscribe(symbol))
    }

    fn force_restart(&self) -> Result<(), StreamClosed> {
        self.send(StreamCommand::ForceRestart)
    }

    fn status(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

// =============================================================================
// Connection Task
// =============================================================================

/// Why a wait was cut short.
enum Interrupt {
    Shutdown,
    Restart,
}

/// What ended a session.
enum SessionEnd {
    Shutdown,
    Restart,
    Degraded,
    Failed(TransportError),
}

/// Next thing the session loop has to handle.
enum Step {
    Shutdown,
    Command(Option<StreamCommand>),
    WatchdogExpired,
    Event(Result<StreamEvent, TransportError>),
}

/// Owner of the streaming session.
pub struct StreamConnection<T: StreamTransport> {
    transport: Arc<T>,
    subscriptions: Arc<SubscriptionSet>,
    cache: Arc<PriceCache>,
    config: StreamConfig,
    commands: mpsc::UnboundedReceiver<StreamCommand>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl<T: StreamTransport> StreamConnection<T> {
    /// Create the connection and its control handle. Nothing happens until
    /// [`run`](Self::run) is polled.
    pub fn new(
        transport: Arc<T>,
        subscriptions: Arc<SubscriptionSet>,
        cache: Arc<PriceCache>,
        config: StreamConfig,
        cancel: CancellationToken,
    ) -> (Self, StreamHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let connection = Self {
            transport,
            subscriptions,
            cache,
            config,
            commands: command_rx,
            state: state_tx,
            cancel,
        };
        let handle = StreamHandle {
            commands: command_tx,
            state: state_rx,
        };
        (connection, handle)
    }

    /// Run until cancelled or every handle is dropped. Ends `Disconnected`.
    pub async fn run(mut self) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let mut pending = Vec::new();

        tracing::info!("Market stream started");

        loop {
            self.set_state(ConnectionState::Connecting);
            self.prune_cache(|symbol| self.subscriptions.contains(symbol));

            let opened = interruptible(
                &self.cancel,
                &mut self.commands,
                &mut pending,
                open_session(
                    self.transport.as_ref(),
                    &self.subscriptions,
                    &self.config,
                ),
            )
            .await;

            let end = match opened {
                Err(Interrupt::Shutdown) => break,
                Err(Interrupt::Restart) => {
                    tracing::info!("Restart requested while connecting");
                    metrics::record_reconnect(ReconnectCause::Forced);
                    continue;
                }
                Ok(Err(e)) => SessionEnd::Failed(e),
                Ok(Ok((session, active))) => {
                    policy.reset();
                    self.run_session(session, active, &mut pending).await
                }
            };

            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::Restart => {
                    tracing::info!("Stream restart requested");
                    metrics::record_reconnect(ReconnectCause::Forced);
                }
                SessionEnd::Degraded => {
                    metrics::record_reconnect(ReconnectCause::Watchdog);
                }
                SessionEnd::Failed(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    metrics::record_reconnect(ReconnectCause::Error);

                    let delay = policy.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt = policy.attempt_count(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Market stream disconnected, reconnecting"
                    );

                    match interruptible(
                        &self.cancel,
                        &mut self.commands,
                        &mut pending,
                        tokio::time::sleep(delay),
                    )
                    .await
                    {
                        Ok(()) => {}
                        Err(Interrupt::Shutdown) => break,
                        Err(Interrupt::Restart) => {
                            tracing::info!("Restart requested during reconnect delay");
                            metrics::record_reconnect(ReconnectCause::Forced);
                        }
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        metrics::set_subscribed_symbols(0);
        tracing::info!("Market stream stopped");
    }

    async fn run_session(
        &mut self,
        mut session: T::Session,
        mut active: HashSet<Symbol>,
        pending: &mut Vec<StreamCommand>,
    ) -> SessionEnd {
        let mut watchdog = TickWatchdog::new(self.config.watchdog_timeout);
        self.prune_cache(|symbol| active.contains(symbol));

        self.set_state(ConnectionState::Subscribed);
        metrics::set_subscribed_symbols(active.len());
        tracing::info!(symbols = active.len(), "Market stream subscribed");

        for command in pending.drain(..) {
            if let Err(e) = self
                .apply_command(&mut session, &mut active, &mut watchdog, command)
                .await
            {
                return SessionEnd::Failed(e);
            }
        }

        loop {
            let step = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Step::Shutdown,
                command = self.commands.recv() => Step::Command(command),
                () = watchdog.expired(), if !active.is_empty() => Step::WatchdogExpired,
                event = session.next_event() => Step::Event(event),
            };

            match step {
                Step::Shutdown | Step::Command(None) => return SessionEnd::Shutdown,
                Step::Command(Some(StreamCommand::ForceRestart)) => return SessionEnd::Restart,
                Step::Command(Some(command)) => {
                    if let Err(e) = self
                        .apply_command(&mut session, &mut active, &mut watchdog, command)
                        .await
                    {
                        return SessionEnd::Failed(e);
                    }
                }
                Step::WatchdogExpired => {
                    tracing::warn!(
                        silence_secs = watchdog.silence().as_secs(),
                        symbols = active.len(),
                        "No ticks within watchdog timeout, forcing reconnect"
                    );
                    self.set_state(ConnectionState::Degraded);
                    return SessionEnd::Degraded;
                }
                Step::Event(Ok(StreamEvent::Tick(raw))) => {
                    self.apply_tick(&raw, &active, &mut watchdog);
                }
                Step::Event(Ok(StreamEvent::Closed { reason })) => {
                    return SessionEnd::Failed(TransportError::Closed { reason });
                }
                Step::Event(Err(e)) => return SessionEnd::Failed(e),
            }
        }
    }

    async fn apply_command(
        &self,
        session: &mut T::Session,
        active: &mut HashSet<Symbol>,
        watchdog: &mut TickWatchdog,
        command: StreamCommand,
    ) -> Result<(), TransportError> {
        match command {
            StreamCommand::Subscribe(symbol) => {
                if active.contains(&symbol) {
                    return Ok(());
                }
                bounded(
                    self.config.subscribe_timeout,
                    "subscribe",
                    session.subscribe(std::slice::from_ref(&symbol)),
                )
                .await?;
                if active.is_empty() {
                    watchdog.reset();
                }
                tracing::debug!(symbol = %symbol, "Subscribed");
                active.insert(symbol);
            }
            StreamCommand::Unsubscribe(symbol) => {
                if active.remove(&symbol) {
                    bounded(
                        self.config.subscribe_timeout,
                        "unsubscribe",
                        session.unsubscribe(std::slice::from_ref(&symbol)),
                    )
                    .await?;
                    tracing::debug!(symbol = %symbol, "Unsubscribed");
                }
                self.cache.remove(&symbol);
            }
            // Handled by the caller before it gets here.
            StreamCommand::ForceRestart => {}
        }
        metrics::set_subscribed_symbols(active.len());
        Ok(())
    }

    fn apply_tick(&self, raw: &RawTick, active: &HashSet<Symbol>, watchdog: &mut TickWatchdog) {
        let quote = match raw.parse() {
            Ok(quote) => quote,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed tick");
                metrics::record_tick_dropped(TickDropReason::Malformed);
                return;
            }
        };

        if !active.contains(&quote.symbol) {
            tracing::debug!(symbol = %quote.symbol, "Dropping tick for unsubscribed symbol");
            metrics::record_tick_dropped(TickDropReason::Unsubscribed);
            return;
        }

        watchdog.record_tick();
        self.cache.update(quote);
        metrics::record_tick_received();
    }

    /// Drop cached quotes for symbols that left the watchlist while no
    /// unsubscribe was sent, as happens across a forced restart.
    fn prune_cache(&self, keep: impl Fn(&Symbol) -> bool) {
        let dropped = self.cache.retain(keep);
        if !dropped.is_empty() {
            tracing::debug!(symbols = ?dropped, "Dropped cached prices for removed symbols");
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = *self.state.borrow();
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            metrics::set_connection_state(next);
            tracing::info!(from = %previous, to = %next, "Market stream state changed");
        }
    }
}

/// Connect and subscribe the full current watchlist in one call.
async fn open_session<T: StreamTransport>(
    transport: &T,
    subscriptions: &SubscriptionSet,
    config: &StreamConfig,
) -> Result<(T::Session, HashSet<Symbol>), TransportError> {
    let mut session = bounded(config.connect_timeout, "connect", transport.connect()).await?;

    let symbols = subscriptions.current_symbols();
    if !symbols.is_empty() {
        bounded(
            config.subscribe_timeout,
            "subscribe",
            session.subscribe(&symbols),
        )
        .await?;
    }

    Ok((session, symbols.into_iter().collect()))
}

/// Drive `work` while queueing incoming commands. A restart request or
/// cancellation abandons `work`.
async fn interruptible<F: Future>(
    cancel: &CancellationToken,
    commands: &mut mpsc::UnboundedReceiver<StreamCommand>,
    pending: &mut Vec<StreamCommand>,
    work: F,
) -> Result<F::Output, Interrupt> {
    tokio::pin!(work);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Interrupt::Shutdown),
            command = commands.recv() => match command {
                None => return Err(Interrupt::Shutdown),
                Some(StreamCommand::ForceRestart) => return Err(Interrupt::Restart),
                Some(command) => pending.push(command),
            },
            output = &mut work => return Ok(output),
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    operation: &'static str,
    call: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| TransportError::Timeout {
            operation,
            after: limit,
        })?
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Subscribe(usize, Vec<String>),
        Unsubscribe(usize, Vec<String>),
    }

    /// Transport whose sessions emit events pushed by the test.
    #[derive(Default)]
    struct ScriptedTransport {
        sessions: AtomicUsize,
        refuse: AtomicUsize,
        calls: Arc<Mutex<Vec<Call>>>,
        feeds: Arc<Mutex<Vec<mpsc::UnboundedSender<Result<StreamEvent, TransportError>>>>>,
    }

    impl ScriptedTransport {
        fn push(&self, event: Result<StreamEvent, TransportError>) {
            if let Some(feed) = self.feeds.lock().last() {
                let _ = feed.send(event);
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    struct ScriptedSession {
        id: usize,
        calls: Arc<Mutex<Vec<Call>>>,
        events: mpsc::UnboundedReceiver<Result<StreamEvent, TransportError>>,
    }

    fn names(symbols: &[Symbol]) -> Vec<String> {
        symbols.iter().map(ToString::to_string).collect()
    }

    #[async_trait]
    impl StreamTransport for ScriptedTransport {
        type Session = ScriptedSession;

        async fn connect(&self) -> Result<ScriptedSession, TransportError> {
            if self
                .refuse
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TransportError::Connect {
                    message: "refused".to_string(),
                });
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.feeds.lock().push(tx);
            Ok(ScriptedSession {
                id: self.sessions.fetch_add(1, Ordering::SeqCst) + 1,
                calls: Arc::clone(&self.calls),
                events: rx,
            })
        }
    }

    #[async_trait]
    impl StreamSession for ScriptedSession {
        async fn subscribe(&mut self, symbols: &[Symbol]) -> Result<(), TransportError> {
            self.calls.lock().push(Call::Subscribe(self.id, names(symbols)));
            Ok(())
        }

        async fn unsubscribe(&mut self, symbols: &[Symbol]) -> Result<(), TransportError> {
            self.calls.lock().push(Call::Unsubscribe(self.id, names(symbols)));
            Ok(())
        }

        async fn next_event(&mut self) -> Result<StreamEvent, TransportError> {
            match self.events.recv().await {
                Some(event) => event,
                None => std::future::pending().await,
            }
        }
    }

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    struct Running {
        transport: Arc<ScriptedTransport>,
        cache: Arc<PriceCache>,
        handle: StreamHandle,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(set: SubscriptionSet, config: StreamConfig) -> Running {
        let transport = Arc::new(ScriptedTransport::default());
        start_with(transport, set, config)
    }

    fn start_with(
        transport: Arc<ScriptedTransport>,
        set: SubscriptionSet,
        config: StreamConfig,
    ) -> Running {
        let cache = Arc::new(PriceCache::default());
        let cancel = CancellationToken::new();
        let (connection, handle) = StreamConnection::new(
            Arc::clone(&transport),
            Arc::new(set),
            Arc::clone(&cache),
            config,
            cancel.clone(),
        );
        let task = tokio::spawn(connection.run());
        Running {
            transport,
            cache,
            handle,
            cancel,
            task,
        }
    }

    fn quiet_config() -> StreamConfig {
        StreamConfig {
            watchdog_timeout: Duration::ZERO,
            ..StreamConfig::default()
        }
    }

    /// Returns once the first connect attempt has been refused and the
    /// task is sleeping in its reconnect delay.
    async fn wait_for_refusal(transport: &ScriptedTransport) {
        while transport.refuse.load(Ordering::SeqCst) > 0 {
            tokio::task::yield_now().await;
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn subscribes_full_set_once_per_session() {
        let set = SubscriptionSet::with_symbols([sym("BTCUSDT"), sym("ETHUSDT")], Some(sym("PEPEUSDT")));
        let run = start(set, quiet_config());

        run.handle.wait_for(ConnectionState::Subscribed).await.unwrap();

        assert_eq!(
            run.transport.calls(),
            vec![Call::Subscribe(
                1,
                vec!["BTCUSDT".into(), "ETHUSDT".into(), "PEPEUSDT".into()]
            )]
        );
        assert!(run.handle.is_connected());
        run.cancel.cancel();
        run.task.await.unwrap();
        assert_eq!(run.handle.status(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_update_cache_and_unsubscribed_ticks_are_dropped() {
        let run = start(SubscriptionSet::with_symbols([sym("BTCUSDT")], None), quiet_config());
        run.handle.wait_for(ConnectionState::Subscribed).await.unwrap();

        run.transport.push(Ok(StreamEvent::Tick(RawTick::new("BTCUSDT", "64000.5"))));
        run.transport.push(Ok(StreamEvent::Tick(RawTick::new("DOGEUSDT", "0.1"))));
        run.transport.push(Ok(StreamEvent::Tick(RawTick::new("BTCUSDT", "garbage"))));
        settle().await;

        assert_eq!(run.cache.get_price(&sym("BTCUSDT")), Ok(dec!(64000.5)));
        assert!(run.cache.get(&sym("DOGEUSDT")).is_none());
        assert_eq!(run.cache.len(), 1);
        run.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_subscribe_is_a_no_op_and_unsubscribe_clears_cache() {
        let run = start(SubscriptionSet::with_symbols([sym("BTCUSDT")], None), quiet_config());
        run.handle.wait_for(ConnectionState::Subscribed).await.unwrap();
        run.transport.push(Ok(StreamEvent::Tick(RawTick::new("BTCUSDT", "1"))));
        settle().await;

        run.handle.subscribe(sym("BTCUSDT")).unwrap();
        run.handle.subscribe(sym("SOLUSDT")).unwrap();
        run.handle.unsubscribe(sym("BTCUSDT")).unwrap();
        settle().await;

        assert_eq!(
            run.transport.calls(),
            vec![
                Call::Subscribe(1, vec!["BTCUSDT".into()]),
                Call::Subscribe(1, vec!["SOLUSDT".into()]),
                Call::Unsubscribe(1, vec!["BTCUSDT".into()]),
            ]
        );
        assert!(run.cache.get(&sym("BTCUSDT")).is_none());
        run.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_fixed_delay_and_resubscribes() {
        let run = start(SubscriptionSet::with_symbols([sym("BTCUSDT")], None), quiet_config());
        run.handle.wait_for(ConnectionState::Subscribed).await.unwrap();
        let mut states = run.handle.watch_status();

        run.transport.push(Err(TransportError::Closed {
            reason: "server restart".to_string(),
        }));
        states
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        let dropped_at = tokio::time::Instant::now();

        run.handle.wait_for(ConnectionState::Subscribed).await.unwrap();

        assert!(dropped_at.elapsed() >= Duration::from_secs(5));
        assert_eq!(
            run.transport.calls(),
            vec![
                Call::Subscribe(1, vec!["BTCUSDT".into()]),
                Call::Subscribe(2, vec!["BTCUSDT".into()]),
            ]
        );
        run.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn long_outage_never_stops_the_stream() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.refuse.store(200, Ordering::SeqCst);
        let started = tokio::time::Instant::now();
        let run = start_with(
            transport,
            SubscriptionSet::with_symbols([sym("BTCUSDT")], None),
            quiet_config(),
        );

        run.handle.wait_for(ConnectionState::Subscribed).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(200 * 5));
        assert!(!run.task.is_finished());
        assert_eq!(run.transport.sessions.load(Ordering::SeqCst), 1);
        run.handle.subscribe(sym("ETHUSDT")).unwrap();
        run.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn commands_during_backoff_are_replayed_after_resubscribe() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.refuse.store(1, Ordering::SeqCst);
        let set = SubscriptionSet::with_symbols([sym("BTCUSDT")], None);
        let run = start_with(transport, set, quiet_config());
        wait_for_refusal(&run.transport).await;

        // BTC is already covered by the snapshot; ETH is new.
        run.handle.subscribe(sym("BTCUSDT")).unwrap();
        run.handle.subscribe(sym("ETHUSDT")).unwrap();

        run.handle.wait_for(ConnectionState::Subscribed).await.unwrap();
        settle().await;

        assert_eq!(
            run.transport.calls(),
            vec![
                Call::Subscribe(1, vec!["BTCUSDT".into()]),
                Call::Subscribe(1, vec!["ETHUSDT".into()]),
            ]
        );
        run.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn force_restart_cuts_backoff_short() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.refuse.store(1, Ordering::SeqCst);
        let run = start_with(transport, SubscriptionSet::new(), quiet_config());
        wait_for_refusal(&run.transport).await;
        assert_eq!(run.handle.status(), ConnectionState::Disconnected);
        let started = tokio::time::Instant::now();

        run.handle.force_restart().unwrap();
        run.handle.wait_for(ConnectionState::Subscribed).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        run.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn force_restart_opens_a_new_session() {
        let run = start(SubscriptionSet::with_symbols([sym("ETHUSDT")], None), quiet_config());
        run.handle.wait_for(ConnectionState::Subscribed).await.unwrap();

        run.handle.force_restart().unwrap();
        settle().await;
        run.handle.wait_for(ConnectionState::Subscribed).await.unwrap();

        assert_eq!(run.transport.sessions.load(Ordering::SeqCst), 2);
        assert_eq!(
            run.transport.calls().last(),
            Some(&Call::Subscribe(2, vec!["ETHUSDT".into()]))
        );
        run.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn restart_drops_prices_of_symbols_no_longer_watched() {
        let transport = Arc::new(ScriptedTransport::default());
        let set = Arc::new(SubscriptionSet::with_symbols(
            [sym("BTCUSDT"), sym("ETHUSDT")],
            Some(sym("PEPEUSDT")),
        ));
        let cache = Arc::new(PriceCache::default());
        let cancel = CancellationToken::new();
        let (connection, handle) = StreamConnection::new(
            Arc::clone(&transport),
            Arc::clone(&set),
            Arc::clone(&cache),
            quiet_config(),
            cancel.clone(),
        );
        tokio::spawn(connection.run());
        handle.wait_for(ConnectionState::Subscribed).await.unwrap();

        for symbol in ["BTCUSDT", "ETHUSDT", "PEPEUSDT"] {
            transport.push(Ok(StreamEvent::Tick(RawTick::new(symbol, "1"))));
        }
        settle().await;
        assert_eq!(cache.len(), 3);

        // A large reload swaps the set and restarts without unsubscribes.
        let changes = set.replace([sym("ETHUSDT")], None);
        assert_eq!(changes.unsubscribe.len(), 2);
        handle.force_restart().unwrap();
        settle().await;
        handle.wait_for(ConnectionState::Subscribed).await.unwrap();

        assert_eq!(transport.sessions.load(Ordering::SeqCst), 2);
        assert!(transport.calls().iter().all(|c| !matches!(c, Call::Unsubscribe(..))));
        assert!(cache.get(&sym("BTCUSDT")).is_none());
        assert!(cache.get(&sym("PEPEUSDT")).is_none());
        assert_eq!(cache.get_price(&sym("ETHUSDT")), Ok(dec!(1)));

        set.replace(Vec::<Symbol>::new(), None);
        handle.force_restart().unwrap();
        settle().await;
        handle.wait_for(ConnectionState::Subscribed).await.unwrap();
        assert!(cache.is_empty());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_session_is_replaced_without_backoff() {
        let config = StreamConfig {
            watchdog_timeout: Duration::from_secs(30),
            ..StreamConfig::default()
        };
        let run = start(SubscriptionSet::with_symbols([sym("BTCUSDT")], None), config);
        run.handle.wait_for(ConnectionState::Subscribed).await.unwrap();
        let subscribed_at = tokio::time::Instant::now();

        while run.transport.sessions.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        // Watchdog timeout, then straight back to Connecting.
        let elapsed = subscribed_at.elapsed();
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(35));
        run.handle.wait_for(ConnectionState::Subscribed).await.unwrap();
        run.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn empty_watchlist_never_trips_the_watchdog() {
        let config = StreamConfig {
            watchdog_timeout: Duration::from_secs(1),
            ..StreamConfig::default()
        };
        let run = start(SubscriptionSet::new(), config);
        run.handle.wait_for(ConnectionState::Subscribed).await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(run.handle.status(), ConnectionState::Subscribed);
        assert_eq!(run.transport.sessions.load(Ordering::SeqCst), 1);
        run.cancel.cancel();
    }

    #[tokio::test]
    async fn handle_reports_closed_stream() {
        let run = start(SubscriptionSet::new(), quiet_config());
        run.cancel.cancel();
        run.task.await.unwrap();

        assert_eq!(run.handle.subscribe(sym("BTCUSDT")), Err(StreamClosed));
    }
}
