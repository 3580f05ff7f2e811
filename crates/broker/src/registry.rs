//! Worker registry
//!
//! The single owner of all live worker connections. A worker enters at the
//! registration handshake and leaves on disconnect, I/O fault, or shutdown;
//! removal force-frees its model slots and fails its pending requests so no
//! dispatcher blocks on a machine that is gone.
//!
//! Structural changes go through the registry-wide lock; per-worker state
//! (slots, correlation, resources) carries its own finer guard so dispatch
//! across independent workers does not serialize globally.

use crate::correlation::CorrelationTable;
use crate::slots::{ModelSlot, SlotTable};
use modelgrid_common::{ModelGridError, Result, METRICS};
use modelgrid_proto::{ModelDescriptor, ResourceSnapshot, WireMessage};
use parking_lot::RwLock as SyncRwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Stable identity of one worker connection.
pub type WorkerId = Uuid;

/// One connected worker. Always handled through `Arc` so the scheduler and
/// the session observe the same mutable state.
#[derive(Debug)]
pub struct Worker {
    id: WorkerId,
    seq: u64,
    remote_addr: SocketAddr,
    pub slots: SlotTable,
    pub correlation: CorrelationTable,
    resources: SyncRwLock<ResourceSnapshot>,
    outbox: mpsc::Sender<WireMessage>,
    outstanding: AtomicUsize,
    connected: AtomicBool,
}

impl Worker {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Registration order, used for deterministic scheduler iteration.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Queue a frame for the connection's writer task. Fails with
    /// `SendFailed` once the writer is gone.
    pub async fn send(&self, message: WireMessage) -> Result<()> {
        self.outbox.send(message).await.map_err(|_| {
            ModelGridError::send_failed(format!("worker {} writer is gone", self.id))
        })
    }

    pub fn resources(&self) -> ResourceSnapshot {
        *self.resources.read()
    }

    pub fn update_resources(&self, snapshot: ResourceSnapshot) {
        *self.resources.write() = snapshot;
    }

    pub fn model_slots(&self) -> Vec<ModelSlot> {
        self.slots.snapshot()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    pub fn begin_request(&self) {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
    }

    pub fn end_request(&self) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }
}

/// Registry of live workers, constructed once at broker startup and shared
/// by reference with the scheduler and every broker session.
#[derive(Debug)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, Arc<Worker>>>,
    next_seq: AtomicU64,
    draining: AtomicBool,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            draining: AtomicBool::new(false),
        }
    }

    /// Admit a freshly registered worker. Refused while draining.
    pub async fn add(
        &self,
        remote_addr: SocketAddr,
        models: Vec<ModelDescriptor>,
        resources: ResourceSnapshot,
        outbox: mpsc::Sender<WireMessage>,
    ) -> Result<Arc<Worker>> {
        if self.draining.load(Ordering::Relaxed) {
            return Err(ModelGridError::ShuttingDown);
        }

        let worker = Arc::new(Worker {
            id: Uuid::new_v4(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            remote_addr,
            slots: SlotTable::new(models),
            correlation: CorrelationTable::new(),
            resources: SyncRwLock::new(resources),
            outbox,
            outstanding: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
        });

        let count = {
            let mut workers = self.workers.write().await;
            workers.insert(worker.id, worker.clone());
            workers.len()
        };
        METRICS.broker.connected_workers.set(count as i64);

        info!(
            "Registered worker {} from {} with {} model slots",
            worker.id,
            remote_addr,
            worker.slots.len()
        );

        Ok(worker)
    }

    /// Evict a worker: force-free its slots and fail its pending requests.
    /// Safe to call twice; the second call finds nothing.
    pub async fn remove(&self, id: WorkerId, reason: &str) -> Option<Arc<Worker>> {
        let (worker, count) = {
            let mut workers = self.workers.write().await;
            let worker = workers.remove(&id)?;
            (worker, workers.len())
        };

        worker.mark_disconnected();
        worker.slots.release_all();
        let detail = format!("worker {} removed: {}", id, reason);
        worker
            .correlation
            .drain_all(|| ModelGridError::send_failed(detail.clone()));

        METRICS.broker.connected_workers.set(count as i64);
        METRICS.broker.workers_evicted_total.inc();

        info!("Removed worker {} ({})", id, reason);
        Some(worker)
    }

    /// Live workers in registration order. A listed worker is connected at
    /// the instant of listing but may vanish immediately after; callers must
    /// treat downstream acquisition/send failures as normal and retriable.
    pub async fn list(&self) -> Vec<Arc<Worker>> {
        let workers = self.workers.read().await;
        let mut listed: Vec<_> = workers.values().cloned().collect();
        listed.sort_by_key(|worker| worker.seq);
        listed
    }

    pub async fn get(&self, id: WorkerId) -> Option<Arc<Worker>> {
        self.workers.read().await.get(&id).cloned()
    }

    /// Replace a worker's last-reported resource figures.
    pub async fn update_resources(&self, id: WorkerId, snapshot: ResourceSnapshot) -> bool {
        match self.get(id).await {
            Some(worker) => {
                worker.update_resources(snapshot);
                debug!("Updated resources for worker {}", id);
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    /// Begin graceful shutdown: refuse new registrations and dispatches,
    /// then fail every pending request on every worker with `ShuttingDown`.
    pub async fn shutdown_drain(&self) {
        self.draining.store(true, Ordering::Relaxed);

        let drained: Vec<_> = {
            let mut workers = self.workers.write().await;
            workers.drain().map(|(_, worker)| worker).collect()
        };
        METRICS.broker.connected_workers.set(0);

        for worker in drained {
            worker.mark_disconnected();
            worker.slots.release_all();
            worker.correlation.drain_all(|| ModelGridError::ShuttingDown);
        }

        info!("Worker registry drained for shutdown");
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
