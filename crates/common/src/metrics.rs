//! Metrics collection for ModelGrid
//!
//! This module provides Prometheus metrics for observability.
//! All metrics are carefully designed to minimize overhead in the hot path.

use lazy_static::lazy_static;
use prometheus::{Histogram, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics registry for ModelGrid
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub broker: BrokerMetrics,
    pub agent: AgentMetrics,
}

/// Broker-side metrics
#[derive(Debug, Clone)]
pub struct BrokerMetrics {
    /// Total number of dispatch requests
    pub dispatches_total: IntCounter,

    /// Total number of successful dispatches
    pub dispatches_success: IntCounter,

    /// Total number of failed dispatches
    pub dispatches_failed: IntCounter,

    /// Dispatch duration histogram
    pub dispatch_duration: Histogram,

    /// Requests rejected because no free model matched
    pub no_candidate_total: IntCounter,

    /// Dispatches that hit the deadline
    pub timeouts_total: IntCounter,

    /// Workers evicted on I/O failure or disconnect
    pub workers_evicted_total: IntCounter,

    /// Currently connected workers
    pub connected_workers: IntGauge,

    /// Requests currently awaiting a correlated response
    pub pending_requests: IntGauge,
}

/// Worker-agent metrics
#[derive(Debug, Clone)]
pub struct AgentMetrics {
    /// Dispatches served by this agent
    pub requests_served_total: IntCounter,

    /// Dispatches that failed in the local backend
    pub requests_failed_total: IntCounter,

    /// Local inference duration
    pub infer_duration: Histogram,

    /// Reconnect attempts after losing the broker link
    pub reconnects_total: IntCounter,

    /// Resource updates pushed to the broker
    pub resource_updates_total: IntCounter,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        // Broker metrics
        let dispatches_total = IntCounter::new(
            "broker_dispatches_total",
            "Total number of dispatch requests",
        )
        .unwrap();

        let dispatches_success = IntCounter::new(
            "broker_dispatches_success_total",
            "Total number of successful dispatches",
        )
        .unwrap();

        let dispatches_failed = IntCounter::new(
            "broker_dispatches_failed_total",
            "Total number of failed dispatches",
        )
        .unwrap();

        let dispatch_duration = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "broker_dispatch_duration_seconds",
                "Dispatch duration in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )
        .unwrap();

        let no_candidate_total = IntCounter::new(
            "broker_no_candidate_total",
            "Dispatches rejected because no free model matched",
        )
        .unwrap();

        let timeouts_total = IntCounter::new(
            "broker_dispatch_timeouts_total",
            "Dispatches that hit the deadline",
        )
        .unwrap();

        let workers_evicted_total = IntCounter::new(
            "broker_workers_evicted_total",
            "Workers evicted on I/O failure or disconnect",
        )
        .unwrap();

        let connected_workers = IntGauge::new(
            "broker_connected_workers",
            "Currently connected workers",
        )
        .unwrap();

        let pending_requests = IntGauge::new(
            "broker_pending_requests",
            "Requests awaiting a correlated response",
        )
        .unwrap();

        // Agent metrics
        let requests_served_total = IntCounter::new(
            "agent_requests_served_total",
            "Dispatches served by this agent",
        )
        .unwrap();

        let requests_failed_total = IntCounter::new(
            "agent_requests_failed_total",
            "Dispatches that failed in the local backend",
        )
        .unwrap();

        let infer_duration = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "agent_infer_duration_seconds",
                "Local inference duration in seconds",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )
        .unwrap();

        let reconnects_total = IntCounter::new(
            "agent_reconnects_total",
            "Reconnect attempts after losing the broker link",
        )
        .unwrap();

        let resource_updates_total = IntCounter::new(
            "agent_resource_updates_total",
            "Resource updates pushed to the broker",
        )
        .unwrap();

        // Register all metrics
        registry.register(Box::new(dispatches_total.clone())).unwrap();
        registry.register(Box::new(dispatches_success.clone())).unwrap();
        registry.register(Box::new(dispatches_failed.clone())).unwrap();
        registry.register(Box::new(dispatch_duration.clone())).unwrap();
        registry.register(Box::new(no_candidate_total.clone())).unwrap();
        registry.register(Box::new(timeouts_total.clone())).unwrap();
        registry.register(Box::new(workers_evicted_total.clone())).unwrap();
        registry.register(Box::new(connected_workers.clone())).unwrap();
        registry.register(Box::new(pending_requests.clone())).unwrap();

        registry.register(Box::new(requests_served_total.clone())).unwrap();
        registry.register(Box::new(requests_failed_total.clone())).unwrap();
        registry.register(Box::new(infer_duration.clone())).unwrap();
        registry.register(Box::new(reconnects_total.clone())).unwrap();
        registry.register(Box::new(resource_updates_total.clone())).unwrap();

        let broker = BrokerMetrics {
            dispatches_total,
            dispatches_success,
            dispatches_failed,
            dispatch_duration,
            no_candidate_total,
            timeouts_total,
            workers_evicted_total,
            connected_workers,
            pending_requests,
        };

        let agent = AgentMetrics {
            requests_served_total,
            requests_failed_total,
            infer_duration,
            reconnects_total,
            resource_updates_total,
        };

        MetricsRegistry {
            registry,
            broker,
            agent,
        }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
