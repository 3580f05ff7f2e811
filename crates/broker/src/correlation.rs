//! Per-worker request/response correlation
//!
//! Each worker connection multiplexes many in-flight dispatches. This table
//! ties every outbound request id to exactly one waiting caller: a response
//! is delivered to its waiter or dropped, and a waiter is woken by its
//! response, a timeout, or a drain — never left blocked.

use modelgrid_common::{ModelGridError, Result, METRICS};
use modelgrid_proto::ResponseStatus;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Terminal outcome of one dispatched request, as reported by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub status: ResponseStatus,
    pub text: String,
}

/// Handle held by the dispatching task while its response is in flight.
pub struct Waiter {
    id: u64,
    rx: oneshot::Receiver<Result<DispatchOutcome>>,
}

impl Waiter {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Correlation table for a single worker connection.
///
/// Ids are monotonic from 1 and never reused. The pending map is guarded by
/// a plain mutex; nothing holds it across an await point.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<DispatchOutcome>>>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Mint the next request id for this worker.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a pending entry for `id`.
    ///
    /// Ids are monotonic so a collision cannot happen; the check is kept as
    /// an invariant guard.
    pub fn register(&self, id: u64) -> Result<Waiter> {
        let (tx, rx) = oneshot::channel();

        let mut pending = self.pending.lock();
        if pending.contains_key(&id) {
            return Err(ModelGridError::DuplicateId(id));
        }
        pending.insert(id, tx);
        drop(pending);

        METRICS.broker.pending_requests.inc();
        Ok(Waiter { id, rx })
    }

    /// Deliver a worker response to its waiter.
    ///
    /// A late or unknown id (already timed out, never issued) is dropped;
    /// it must never reach a different caller.
    pub fn fulfill(&self, id: u64, outcome: DispatchOutcome) {
        let sender = self.pending.lock().remove(&id);
        match sender {
            Some(tx) => {
                METRICS.broker.pending_requests.dec();
                if tx.send(Ok(outcome)).is_err() {
                    debug!("waiter for request {} vanished before delivery", id);
                }
            }
            None => {
                debug!("dropping response for unknown or expired request id {}", id);
            }
        }
    }

    /// Block the calling task until the response arrives or `deadline`
    /// elapses. On timeout the pending entry is removed, so a late response
    /// is discarded by [`fulfill`](Self::fulfill).
    pub async fn await_outcome(&self, waiter: Waiter, deadline: Duration) -> Result<DispatchOutcome> {
        match tokio::time::timeout(deadline, waiter.rx).await {
            Ok(Ok(delivered)) => delivered,
            Ok(Err(_)) => {
                // Sender dropped without a send; should be unreachable since
                // every removal path sends first.
                self.remove(waiter.id);
                Err(ModelGridError::Internal(format!(
                    "pending entry for request {} disappeared",
                    waiter.id
                )))
            }
            Err(_) => {
                self.remove(waiter.id);
                Err(ModelGridError::timeout(format!(
                    "no response for request {} within {:?}",
                    waiter.id, deadline
                )))
            }
        }
    }

    /// Fail every still-pending entry. Used on worker removal and broker
    /// shutdown so no caller blocks past the worker's lifetime.
    pub fn drain_all(&self, make_err: impl Fn() -> ModelGridError) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };

        for (id, tx) in drained {
            METRICS.broker.pending_requests.dec();
            if tx.send(Err(make_err())).is_err() {
                debug!("waiter for request {} vanished during drain", id);
            }
        }
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn remove(&self, id: u64) {
        if self.pending.lock().remove(&id).is_some() {
            METRICS.broker.pending_requests.dec();
        }
    }
}
