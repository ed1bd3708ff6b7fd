//! Simulated stream session.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{Interval, MissedTickBehavior};

use super::Shared;
use crate::application::ports::{RawTick, StreamEvent, StreamSession, TransportError};
use crate::domain::market::Symbol;

/// One open session on the [`PaperExchange`](super::PaperExchange).
#[derive(Debug)]
pub struct PaperSession {
    shared: Arc<Shared>,
    generation: u64,
    interval: Interval,
    subscribed: Vec<Symbol>,
    pending: VecDeque<RawTick>,
}

impl PaperSession {
    pub(super) fn new(shared: Arc<Shared>, tick_interval: Duration) -> Self {
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let generation = shared.generation();

        Self {
            shared,
            generation,
            interval,
            subscribed: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    fn is_reset(&self) -> bool {
        self.shared.generation() != self.generation
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_reset() {
            return Err(TransportError::Closed {
                reason: "paper session reset".to_string(),
            });
        }
        Ok(())
    }

    /// Symbols this session is streaming.
    #[must_use]
    pub fn subscribed(&self) -> &[Symbol] {
        &self.subscribed
    }
}

#[async_trait]
impl StreamSession for PaperSession {
    async fn subscribe(&mut self, symbols: &[Symbol]) -> Result<(), TransportError> {
        self.ensure_open()?;
        for symbol in symbols {
            if !self.shared.is_listed(symbol) {
                tracing::debug!(symbol = %symbol, "Paper session ignoring unlisted symbol");
                continue;
            }
            if !self.subscribed.contains(symbol) {
                self.subscribed.push(symbol.clone());
            }
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, symbols: &[Symbol]) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.subscribed.retain(|s| !symbols.contains(s));
        self.pending
            .retain(|tick| !symbols.iter().any(|s| s.as_str() == tick.symbol));
        Ok(())
    }

    async fn next_event(&mut self) -> Result<StreamEvent, TransportError> {
        loop {
            if self.is_reset() {
                return Ok(StreamEvent::Closed {
                    reason: "paper session reset".to_string(),
                });
            }
            if let Some(tick) = self.pending.pop_front() {
                return Ok(StreamEvent::Tick(tick));
            }

            // Only state change happens after the await completes, so a
            // cancelled call loses nothing.
            self.interval.tick().await;

            let event_time = Some(Utc::now());
            for symbol in &self.subscribed {
                if let Some(price) = self.shared.step_price(symbol) {
                    self.pending.push_back(RawTick {
                        symbol: symbol.to_string(),
                        price: price.to_string(),
                        event_time,
                    });
                }
            }
        }
    }
}
