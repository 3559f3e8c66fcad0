//! Event router: three queues (inbound, outbound, ledger) and the workers that drain them.
//!
//! A single inbound worker owns the conversation state and applies events strictly in
//! submission order. Replies and ledger rows fan out to independent worker pools; a failed
//! reply or row is retried when the error allows it, then logged and dropped. Nothing on the
//! outbound side ever feeds back into the conversation state.

use crate::config::WorkersConfig;
use crate::conversation::{transition, ConversationState};
use crate::ledger::{LedgerError, LedgerSink};
use crate::message::{InboundEvent, LedgerRow, LedgerTarget, OutboundMessage};
use crate::messenger::{DeliveryError, MessageSender};
use futures_util::future::join_all;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Returned by `submit` once the inbound worker has stopped.
#[derive(Debug, Error)]
#[error("event router is shut down")]
pub struct RouterClosed;

/// Pool sizes and retry policy.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub outbound_workers: usize,
    pub ledger_workers: usize,
    pub max_attempts: u32,
    pub retry_base: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::from(&WorkersConfig::default())
    }
}

impl From<&WorkersConfig> for RouterSettings {
    fn from(w: &WorkersConfig) -> Self {
        Self {
            outbound_workers: w.outbound,
            ledger_workers: w.ledger,
            max_attempts: w.max_attempts,
            retry_base: Duration::from_millis(w.retry_base_ms),
        }
    }
}

/// Errors that can say whether another attempt might succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for DeliveryError {
    fn is_retryable(&self) -> bool {
        DeliveryError::is_retryable(self)
    }
}

impl Retryable for LedgerError {
    fn is_retryable(&self) -> bool {
        LedgerError::is_retryable(self)
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails permanently, or runs out of attempts. Backoff doubles each retry.
    async fn run<F, Fut, E>(&self, what: &str, mut op: F) -> Result<(), E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Retryable + Display,
    {
        let mut attempt = 1;
        let mut delay = self.base_delay;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_attempts && e.is_retryable() => {
                    log::debug!(
                        "{}: attempt {} failed, retrying in {:?}: {}",
                        what,
                        attempt,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

type SharedReceiver<T> = Arc<Mutex<mpsc::UnboundedReceiver<T>>>;

/// Next item for a pool worker. The lock is only held while waiting, never while working.
async fn next_item<T>(rx: &SharedReceiver<T>) -> Option<T> {
    rx.lock().await.recv().await
}

/// Cheap clonable handle for submitting inbound events.
#[derive(Clone)]
pub struct EventRouter {
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
}

/// Join handles for every worker; consumed by `drain` on shutdown.
pub struct RouterWorkers {
    inbound: JoinHandle<()>,
    outbound: Vec<JoinHandle<()>>,
    ledger: Vec<JoinHandle<()>>,
}

impl EventRouter {
    /// Create the queues and start all workers. Must be called inside a tokio runtime.
    pub fn spawn(
        settings: RouterSettings,
        target: LedgerTarget,
        sender: Arc<dyn MessageSender>,
        sink: Arc<dyn LedgerSink>,
    ) -> (Self, RouterWorkers) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<InboundEvent>();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();
        let (ledger_tx, ledger_rx) = mpsc::unbounded_channel::<LedgerRow>();

        let policy = RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.retry_base,
        };

        let inbound = tokio::spawn(run_inbound_worker(inbound_rx, target, outbound_tx, ledger_tx));

        let outbound_rx: SharedReceiver<OutboundMessage> = Arc::new(Mutex::new(outbound_rx));
        let outbound = (0..settings.outbound_workers.max(1))
            .map(|id| {
                tokio::spawn(run_outbound_worker(
                    id,
                    outbound_rx.clone(),
                    sender.clone(),
                    policy,
                ))
            })
            .collect::<Vec<_>>();

        let ledger_rx: SharedReceiver<LedgerRow> = Arc::new(Mutex::new(ledger_rx));
        let ledger = (0..settings.ledger_workers.max(1))
            .map(|id| tokio::spawn(run_ledger_worker(id, ledger_rx.clone(), sink.clone(), policy)))
            .collect::<Vec<_>>();

        log::info!(
            "event router started ({} outbound worker(s), {} ledger worker(s), {} attempt(s) per item)",
            outbound.len(),
            ledger.len(),
            policy.max_attempts
        );

        (
            Self { inbound_tx },
            RouterWorkers {
                inbound,
                outbound,
                ledger,
            },
        )
    }

    /// Queue an event for the state machine. Never waits; fails only after shutdown.
    pub fn submit(&self, event: InboundEvent) -> Result<(), RouterClosed> {
        self.inbound_tx.send(event).map_err(|_| RouterClosed)
    }
}

impl RouterWorkers {
    /// Wait for every queue to empty and every worker to stop. Workers stop once all
    /// `EventRouter` handles are dropped. Returns false if `timeout` elapsed first.
    pub async fn drain(self, timeout: Duration) -> bool {
        let RouterWorkers {
            inbound,
            outbound,
            ledger,
        } = self;
        let all = async move {
            if let Err(e) = inbound.await {
                log::error!("inbound worker ended abnormally: {}", e);
            }
            join_all(outbound.into_iter().chain(ledger)).await;
        };
        match tokio::time::timeout(timeout, all).await {
            Ok(()) => {
                log::info!("event router drained");
                true
            }
            Err(_) => {
                log::warn!("event router did not drain within {:?}", timeout);
                false
            }
        }
    }
}

/// Sole owner of the conversation state. Dropping the outbound/ledger senders on exit lets the pools finish.
async fn run_inbound_worker(
    mut rx: mpsc::UnboundedReceiver<InboundEvent>,
    target: LedgerTarget,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    ledger_tx: mpsc::UnboundedSender<LedgerRow>,
) {
    let mut state = ConversationState::Clear;
    while let Some(event) = rx.recv().await {
        state = apply_event(state, &event, &target, &outbound_tx, &ledger_tx);
    }
    log::info!("inbound worker stopped (final state {})", state);
}

fn apply_event(
    state: ConversationState,
    event: &InboundEvent,
    target: &LedgerTarget,
    outbound_tx: &mpsc::UnboundedSender<OutboundMessage>,
    ledger_tx: &mpsc::UnboundedSender<LedgerRow>,
) -> ConversationState {
    let result = match transition(state, event, target) {
        Ok(r) => r,
        Err(e) => {
            log::error!(
                "conversation: transition failed in state {} (sender {:?}, recipient {:?}, timestamp {}, text {:?}): {}; resetting to {}",
                state,
                event.sender_id,
                event.recipient_id,
                event.timestamp,
                event.text,
                e,
                ConversationState::Clear
            );
            return ConversationState::Clear;
        }
    };
    log::debug!(
        "conversation: {} -> {} ({} row(s), {} reply(ies))",
        state,
        result.next,
        result.ledger_rows.len(),
        result.replies.len()
    );
    for row in result.ledger_rows {
        if ledger_tx.send(row).is_err() {
            log::warn!("ledger queue closed, dropping row");
        }
    }
    for reply in result.replies {
        if outbound_tx.send(reply).is_err() {
            log::warn!("outbound queue closed, dropping reply");
        }
    }
    result.next
}

async fn run_outbound_worker(
    id: usize,
    rx: SharedReceiver<OutboundMessage>,
    sender: Arc<dyn MessageSender>,
    policy: RetryPolicy,
) {
    while let Some(message) = next_item(&rx).await {
        let sender = &sender;
        let msg = &message;
        if let Err(e) = policy.run("outbound", move || sender.send(msg)).await {
            log::warn!(
                "outbound: dropping reply to {}: {}",
                message.recipient_id,
                e
            );
        }
    }
    log::debug!("outbound worker {} stopped", id);
}

async fn run_ledger_worker(
    id: usize,
    rx: SharedReceiver<LedgerRow>,
    sink: Arc<dyn LedgerSink>,
    policy: RetryPolicy,
) {
    while let Some(row) = next_item(&rx).await {
        let sink = &sink;
        let r = &row;
        if let Err(e) = policy.run("ledger", move || sink.append(r)).await {
            log::warn!(
                "ledger: dropping row {:?} for {} {}: {}",
                row.values,
                row.spreadsheet_id,
                row.range,
                e
            );
        }
    }
    log::debug!("ledger worker {} stopped", id);
}
