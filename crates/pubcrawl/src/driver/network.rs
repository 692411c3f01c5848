//! Per-request network event bookkeeping.
//!
//! CDP reports one response as several events on independent streams:
//! `requestWillBeSent`, `responseReceived`, then `loadingFinished` or
//! `loadingFailed`. A redirect hop arrives only as the `redirectResponse` of
//! the next `requestWillBeSent`. [`ResponseJoin`] pairs these up in whatever
//! order they are consumed and tracks which requests are still in flight.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// No requests in flight for this long counts as network idle.
pub const NETWORK_IDLE_WINDOW: Duration = Duration::from_millis(500);

/// Polling interval while waiting for network idle.
const NETWORK_IDLE_POLL: Duration = Duration::from_millis(50);

/// How a response's load ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Finished,
    /// `errorText` of `loadingFailed`.
    Failed(String),
    /// A redirect hop; it has no body of its own.
    Redirected,
}

/// A response whose load has ended and can be handed to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Settled<K, R> {
    pub id: K,
    pub response: R,
    pub outcome: LoadOutcome,
}

/// Joins response metadata with the end of its load.
#[derive(Debug)]
pub struct ResponseJoin<K, R> {
    /// Requests sent but neither finished nor failed.
    open: HashSet<K>,
    /// Responses whose load has not ended yet.
    received: HashMap<K, R>,
    /// Loads that ended before their response event was consumed.
    ended_early: HashMap<K, LoadOutcome>,
}

impl<K, R> Default for ResponseJoin<K, R> {
    fn default() -> Self {
        Self {
            open: HashSet::new(),
            received: HashMap::new(),
            ended_early: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, R> ResponseJoin<K, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A request went out. `redirect` is the response of the hop it replaces.
    pub fn request_sent(&mut self, id: K, redirect: Option<R>) -> Option<Settled<K, R>> {
        self.open.insert(id.clone());
        redirect.map(|response| Settled {
            id,
            response,
            outcome: LoadOutcome::Redirected,
        })
    }

    /// Response headers arrived.
    pub fn response_received(&mut self, id: K, response: R) -> Option<Settled<K, R>> {
        match self.ended_early.remove(&id) {
            Some(outcome) => Some(Settled {
                id,
                response,
                outcome,
            }),
            None => {
                self.received.insert(id, response);
                None
            }
        }
    }

    pub fn loading_finished(&mut self, id: K) -> Option<Settled<K, R>> {
        self.end(id, LoadOutcome::Finished)
    }

    pub fn loading_failed(&mut self, id: K, error_text: String) -> Option<Settled<K, R>> {
        self.end(id, LoadOutcome::Failed(error_text))
    }

    fn end(&mut self, id: K, outcome: LoadOutcome) -> Option<Settled<K, R>> {
        self.open.remove(&id);
        match self.received.remove(&id) {
            Some(response) => Some(Settled {
                id,
                response,
                outcome,
            }),
            None => {
                self.ended_early.insert(id, outcome);
                None
            }
        }
    }

    /// Requests still loading; drives the network-idle wait.
    pub fn inflight(&self) -> usize {
        self.open.len()
    }

    /// Responses seen whose load has not ended.
    pub fn awaiting_body(&self) -> usize {
        self.received.len()
    }
}

/// Resolve once `inflight` has stayed at zero for [`NETWORK_IDLE_WINDOW`].
pub async fn wait_for_network_idle(inflight: &AtomicUsize) {
    let mut idle_for = Duration::ZERO;
    while idle_for < NETWORK_IDLE_WINDOW {
        tokio::time::sleep(NETWORK_IDLE_POLL).await;
        if inflight.load(Ordering::SeqCst) == 0 {
            idle_for += NETWORK_IDLE_POLL;
        } else {
            idle_for = Duration::ZERO;
        }
    }
}
