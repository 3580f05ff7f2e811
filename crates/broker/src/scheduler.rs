//! Model selection and dispatch
//!
//! Scores every free model slot across all workers against the incoming
//! request and dispatches to the best one. Selection and acquisition are
//! deliberately separate: `select_best` only reads, and the caller races
//! other dispatches (and disconnects) for the slot, retrying selection a
//! bounded number of times before giving up.

use crate::registry::{Worker, WorkerRegistry};
use modelgrid_common::config::{BrokerConfig, ScoringWeights};
use modelgrid_common::{ModelGridError, Result, METRICS};
use modelgrid_proto::{ModelDescriptor, ResponseStatus, WireMessage};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Caller-supplied generation request. Immutable once submitted.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub prompt: String,
    pub context: String,
    pub n: u32,
    pub temperature: f32,
}

/// Weighted score of one model against one request.
///
/// Terms: context fit, speed per requested token, creativity scaled by
/// temperature, and reasoning-or-coding depending on prompt length.
pub fn score_model(
    model: &ModelDescriptor,
    request: &DispatchRequest,
    weights: &ScoringWeights,
    long_prompt_threshold: usize,
) -> f64 {
    let ctx_len = request.context.len() as f64;
    let ctx_win = f64::from(model.context_window);
    let ctx_fit = ctx_win.min(ctx_len) / ctx_win.max(ctx_len).max(1.0);

    let per_token = model.speed / f64::max(1.0, f64::from(request.n));

    let creativity = model.creativity * f64::from(request.temperature);

    let prompt_fit = if request.prompt.len() > long_prompt_threshold {
        model.reasoning
    } else {
        model.coding
    };

    weights.w_ctx * ctx_fit + weights.w_n * per_token + weights.w_t * creativity + weights.w_p * prompt_fit
}

/// Releases the acquired slot (and the worker's outstanding counter) on
/// every exit path: success, worker error, timeout, send failure.
struct SlotGuard {
    worker: Arc<Worker>,
    model_id: String,
}

impl SlotGuard {
    fn new(worker: Arc<Worker>, model_id: String) -> Self {
        worker.begin_request();
        Self { worker, model_id }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.worker.slots.release(&self.model_id);
        self.worker.end_request();
    }
}

/// Scores candidates and runs dispatches against the worker registry.
pub struct Scheduler {
    registry: Arc<WorkerRegistry>,
    weights: ScoringWeights,
    dispatch_timeout: Duration,
    selection_retries: u32,
    long_prompt_threshold: usize,
}

impl Scheduler {
    pub fn new(registry: Arc<WorkerRegistry>, config: &BrokerConfig) -> Self {
        Self {
            registry,
            weights: config.scoring,
            dispatch_timeout: Duration::from_secs(config.dispatch_timeout_secs),
            selection_retries: config.selection_retries,
            long_prompt_threshold: config.long_prompt_threshold,
        }
    }

    /// Pick the free slot with the strictly highest score.
    ///
    /// Does not acquire. Ties resolve to the first worker in registration
    /// order — a documented tie-break, not a fairness guarantee.
    pub async fn select_best(&self, request: &DispatchRequest) -> Result<(Arc<Worker>, String)> {
        let workers = self.registry.list().await;

        let mut best: Option<(f64, Arc<Worker>, String)> = None;
        for worker in workers {
            for slot in worker.slots.snapshot() {
                if slot.busy {
                    continue;
                }

                let score = score_model(
                    &slot.descriptor,
                    request,
                    &self.weights,
                    self.long_prompt_threshold,
                );
                if best.as_ref().map_or(true, |(top, _, _)| score > *top) {
                    best = Some((score, worker.clone(), slot.descriptor.id));
                }
            }
        }

        match best {
            Some((score, worker, model_id)) => {
                debug!(
                    "Selected model {} on worker {} (score {:.4})",
                    model_id,
                    worker.id(),
                    score
                );
                Ok((worker, model_id))
            }
            None => Err(ModelGridError::no_candidate(
                "no free model slot matches the request",
            )),
        }
    }

    /// Select, acquire, send, and await the correlated response.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<String> {
        METRICS.broker.dispatches_total.inc();
        let timer = METRICS.broker.dispatch_duration.start_timer();

        let result = self.dispatch_inner(request).await;
        timer.observe_duration();

        match &result {
            Ok(_) => METRICS.broker.dispatches_success.inc(),
            Err(ModelGridError::NoCandidate(_)) => {
                METRICS.broker.no_candidate_total.inc();
                METRICS.broker.dispatches_failed.inc();
            }
            Err(ModelGridError::Timeout(_)) => {
                METRICS.broker.timeouts_total.inc();
                METRICS.broker.dispatches_failed.inc();
            }
            Err(_) => METRICS.broker.dispatches_failed.inc(),
        }

        result
    }

    async fn dispatch_inner(&self, request: DispatchRequest) -> Result<String> {
        if self.registry.is_draining() {
            return Err(ModelGridError::ShuttingDown);
        }

        // Acquisition can lose to a concurrent dispatch or a disconnect
        // between scoring and claiming; re-select a bounded number of times.
        let mut attempts = 0u32;
        let (worker, model_id) = loop {
            let (worker, model_id) = self.select_best(&request).await?;
            if worker.slots.try_acquire(&model_id) {
                break (worker, model_id);
            }

            attempts += 1;
            if attempts > self.selection_retries {
                return Err(ModelGridError::no_candidate(
                    "every selected slot was claimed by a concurrent dispatch",
                ));
            }
            debug!(
                "Lost acquisition race for model {} on worker {}, reselecting",
                model_id,
                worker.id()
            );
        };

        let _guard = SlotGuard::new(worker.clone(), model_id.clone());

        let id = worker.correlation.next_id();
        let waiter = worker.correlation.register(id)?;

        let message = WireMessage::Dispatch {
            id,
            model: model_id.clone(),
            prompt: request.prompt,
            context: request.context,
            n: request.n,
            temp: request.temperature,
        };

        if let Err(err) = worker.send(message).await {
            // The connection is dead; evicting also drains our own waiter.
            self.registry.remove(worker.id(), "dispatch send failed").await;
            return Err(err);
        }

        debug!(
            "Dispatched request {} to worker {} model {}",
            id,
            worker.id(),
            model_id
        );

        let outcome = worker
            .correlation
            .await_outcome(waiter, self.dispatch_timeout)
            .await?;

        match outcome.status {
            ResponseStatus::Ok => Ok(outcome.text),
            ResponseStatus::Error => Err(ModelGridError::inference(outcome.text)),
            ResponseStatus::Timeout => Err(ModelGridError::timeout(outcome.text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::DispatchOutcome;
    use modelgrid_proto::ResourceSnapshot;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    fn broker_config() -> BrokerConfig {
        BrokerConfig {
            http_port: 0,
            api_key: "secret".to_string(),
            dispatch_timeout_secs: 60,
            handshake_timeout_secs: 10,
            selection_retries: 3,
            scoring: ScoringWeights::default(),
            long_prompt_threshold: 100,
        }
    }

    fn model(id: &str, speed: f64) -> ModelDescriptor {
        ModelDescriptor {
            id: id.to_string(),
            context_window: 4096,
            coding: 0.5,
            reasoning: 0.5,
            creativity: 0.5,
            speed,
        }
    }

    fn request(context_len: usize, n: u32, temperature: f32) -> DispatchRequest {
        DispatchRequest {
            prompt: "write a haiku".to_string(),
            context: "x".repeat(context_len),
            n,
            temperature,
        }
    }

    /// Registers a worker whose outbox is serviced by an in-process task
    /// that replies `text` to every dispatch.
    async fn reply_worker(
        registry: &Arc<WorkerRegistry>,
        models: Vec<ModelDescriptor>,
        text: &'static str,
    ) -> Arc<Worker> {
        let (tx, mut rx) = mpsc::channel(8);
        let worker = registry
            .add(
                "127.0.0.1:40000".parse().unwrap(),
                models,
                ResourceSnapshot::default(),
                tx,
            )
            .await
            .unwrap();

        let handle = worker.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let WireMessage::Dispatch { id, .. } = message {
                    handle.correlation.fulfill(
                        id,
                        DispatchOutcome {
                            status: ResponseStatus::Ok,
                            text: text.to_string(),
                        },
                    );
                }
            }
        });

        worker
    }

    #[test]
    fn test_score_formula_spot_value() {
        let request = request(2048, 50, 0.7);
        let score = score_model(&model("m1", 5.0), &request, &ScoringWeights::default(), 100);

        // 0.3 * (2048/4096) + 0.2 * (5/50) + 0.3 * (0.5 * 0.7) + 0.2 * 0.5
        let expected = 0.3 * 0.5 + 0.2 * 0.1 + 0.3 * 0.35 + 0.2 * 0.5;
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_long_prompt_uses_reasoning() {
        let mut descriptor = model("m1", 1.0);
        descriptor.coding = 0.9;
        descriptor.reasoning = 0.1;

        let short = request(0, 10, 0.0);
        let mut long = request(0, 10, 0.0);
        long.prompt = "p".repeat(200);

        let weights = ScoringWeights::default();
        let short_score = score_model(&descriptor, &short, &weights, 100);
        let long_score = score_model(&descriptor, &long, &weights, 100);
        assert!(short_score > long_score);
    }

    #[tokio::test]
    async fn test_dispatch_single_candidate_round_trip() {
        let registry = Arc::new(WorkerRegistry::new());
        let scheduler = Scheduler::new(registry.clone(), &broker_config());

        // Single advertised model: scenario with contextWindow=4096, speed=5.
        let (tx, mut rx) = mpsc::channel(8);
        let worker = registry
            .add(
                "127.0.0.1:40000".parse().unwrap(),
                vec![model("m1", 5.0)],
                ResourceSnapshot::default(),
                tx,
            )
            .await
            .unwrap();

        let busy_during_flight = Arc::new(AtomicBool::new(false));
        let observed = busy_during_flight.clone();
        let handle = worker.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let WireMessage::Dispatch { id, model, .. } = message {
                    assert_eq!(model, "m1");
                    let slot_busy = handle.model_slots().iter().any(|s| s.busy);
                    observed.store(slot_busy, Ordering::Relaxed);
                    handle.correlation.fulfill(
                        id,
                        DispatchOutcome {
                            status: ResponseStatus::Ok,
                            text: "hi".to_string(),
                        },
                    );
                }
            }
        });

        let text = scheduler.dispatch(request(2048, 50, 0.7)).await.unwrap();
        assert_eq!(text, "hi");

        // The slot was busy while the request was in flight and is free again.
        assert!(busy_during_flight.load(Ordering::Relaxed));
        assert!(worker.slots.try_acquire("m1"));
    }

    #[tokio::test]
    async fn test_higher_score_wins_deterministically() {
        let registry = Arc::new(WorkerRegistry::new());
        let scheduler = Scheduler::new(registry.clone(), &broker_config());

        reply_worker(&registry, vec![model("m-slow", 1.0)], "from-slow").await;
        reply_worker(&registry, vec![model("m-fast", 10.0)], "from-fast").await;

        for _ in 0..4 {
            let text = scheduler.dispatch(request(0, 10, 0.0)).await.unwrap();
            assert_eq!(text, "from-fast");
        }
    }

    #[tokio::test]
    async fn test_empty_registry_is_no_candidate() {
        let registry = Arc::new(WorkerRegistry::new());
        let scheduler = Scheduler::new(registry.clone(), &broker_config());

        let result = scheduler.dispatch(request(0, 10, 0.0)).await;
        assert!(matches!(result, Err(ModelGridError::NoCandidate(_))));
    }

    #[tokio::test]
    async fn test_busy_slot_is_no_candidate() {
        let registry = Arc::new(WorkerRegistry::new());
        let scheduler = Scheduler::new(registry.clone(), &broker_config());

        let worker = reply_worker(&registry, vec![model("m1", 5.0)], "hi").await;
        assert!(worker.slots.try_acquire("m1"));

        let result = scheduler.dispatch(request(0, 10, 0.0)).await;
        assert!(matches!(result, Err(ModelGridError::NoCandidate(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_worker_times_out_and_slot_is_freed() {
        let registry = Arc::new(WorkerRegistry::new());
        let scheduler = Scheduler::new(registry.clone(), &broker_config());

        // Outbox is drained but never answered.
        let (tx, mut rx) = mpsc::channel(8);
        let worker = registry
            .add(
                "127.0.0.1:40000".parse().unwrap(),
                vec![model("m1", 5.0)],
                ResourceSnapshot::default(),
                tx,
            )
            .await
            .unwrap();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let result = scheduler.dispatch(request(0, 10, 0.0)).await;
        assert!(matches!(result, Err(ModelGridError::Timeout(_))));

        // Timeout releases the slot; the worker stays registered.
        assert!(worker.slots.try_acquire("m1"));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_send_failure_evicts_worker() {
        let registry = Arc::new(WorkerRegistry::new());
        let scheduler = Scheduler::new(registry.clone(), &broker_config());

        // Writer already gone: the outbox receiver is dropped immediately.
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        registry
            .add(
                "127.0.0.1:40000".parse().unwrap(),
                vec![model("m1", 5.0)],
                ResourceSnapshot::default(),
                tx,
            )
            .await
            .unwrap();

        let result = scheduler.dispatch(request(0, 10, 0.0)).await;
        assert!(matches!(result, Err(ModelGridError::SendFailed(_))));
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_worker_reported_error_surfaces() {
        let registry = Arc::new(WorkerRegistry::new());
        let scheduler = Scheduler::new(registry.clone(), &broker_config());

        let (tx, mut rx) = mpsc::channel(8);
        let worker = registry
            .add(
                "127.0.0.1:40000".parse().unwrap(),
                vec![model("m1", 5.0)],
                ResourceSnapshot::default(),
                tx,
            )
            .await
            .unwrap();
        let handle = worker.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let WireMessage::Dispatch { id, .. } = message {
                    handle.correlation.fulfill(
                        id,
                        DispatchOutcome {
                            status: ResponseStatus::Error,
                            text: "model exploded".to_string(),
                        },
                    );
                }
            }
        });

        let result = scheduler.dispatch(request(0, 10, 0.0)).await;
        match result {
            Err(ModelGridError::Inference(text)) => assert_eq!(text, "model exploded"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert!(worker.slots.try_acquire("m1"));
    }
}
