//! Worker agent
//!
//! Keeps a durable link to the broker. The lifecycle is an explicit state
//! machine — Disconnected, Connecting, Registered, Serving — with a fixed
//! backoff between attempts; the agent retries indefinitely and never gives
//! up on the broker.
//!
//! While serving, a periodic task pushes resource updates and every dispatch
//! is answered on its own task, so a slow generation never blocks the read
//! loop or other dispatches. Replies always carry the request id verbatim:
//! the id is the sole correlation key on the shared connection.

use crate::inference::{InferenceBackend, InferenceCall};
use crate::resources::ResourceProbe;
use modelgrid_common::config::{ModelEntry, WorkerConfig};
use modelgrid_common::{ModelGridError, Result, METRICS};
use modelgrid_proto::{
    write_message, FramedReader, ModelDescriptor, ResponseStatus, WireMessage,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Connection lifecycle of the agent.
enum AgentState {
    /// No link; waiting out the backoff.
    Disconnected,

    /// Dialing the broker and sending the register frame.
    Connecting,

    /// Link established, registration sent.
    Registered(TcpStream),

    /// Answering dispatches on the live link.
    Serving(TcpStream),
}

/// The remote counterpart of the broker: registers a model catalog and
/// serves dispatches by invoking the local inference backend.
pub struct Agent {
    config: WorkerConfig,
    backend: Arc<InferenceBackend>,
    catalog: Vec<ModelDescriptor>,
    probe: ResourceProbe,
}

impl Agent {
    pub fn new(config: WorkerConfig) -> Result<Self> {
        let backend = Arc::new(InferenceBackend::from_config(&config)?);
        let catalog = config.models.iter().map(descriptor_from_entry).collect();
        let probe = ResourceProbe::from_config(&config.resources);

        Ok(Self {
            config,
            backend,
            catalog,
            probe,
        })
    }

    /// Drive the state machine forever.
    pub async fn run(self) -> Result<()> {
        let backoff = Duration::from_secs(self.config.reconnect_backoff_secs);
        let mut state = AgentState::Connecting;

        loop {
            state = match state {
                AgentState::Disconnected => {
                    METRICS.agent.reconnects_total.inc();
                    info!("Reconnecting to broker in {:?}", backoff);
                    tokio::time::sleep(backoff).await;
                    AgentState::Connecting
                }
                AgentState::Connecting => match self.connect_and_register().await {
                    Ok(stream) => AgentState::Registered(stream),
                    Err(err) => {
                        warn!("Connection to broker failed: {}", err);
                        AgentState::Disconnected
                    }
                },
                AgentState::Registered(stream) => {
                    info!(
                        "Registered {} models with broker at {}",
                        self.catalog.len(),
                        self.config.broker_addr
                    );
                    AgentState::Serving(stream)
                }
                AgentState::Serving(stream) => {
                    match self.serve(stream).await {
                        Ok(()) => info!("Broker closed the connection"),
                        Err(err) => warn!("Broker link lost: {}", err),
                    }
                    AgentState::Disconnected
                }
            };
        }
    }

    async fn connect_and_register(&self) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(&self.config.broker_addr).await?;
        debug!("Connected to broker at {}", self.config.broker_addr);

        let register = WireMessage::Register {
            resources: self.probe.current(),
            models: self.catalog.clone(),
        };
        write_message(&mut stream, &register)
            .await
            .map_err(|err| ModelGridError::protocol(err.to_string()))?;

        Ok(stream)
    }

    async fn serve(&self, stream: TcpStream) -> Result<()> {
        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(Mutex::new(write_half));

        let push_task = tokio::spawn(push_resources(
            writer.clone(),
            self.probe.clone(),
            Duration::from_secs(self.config.resource_interval_secs),
        ));

        let mut reader = FramedReader::new(read_half);
        let served = loop {
            match reader.next_message().await {
                Ok(Some(WireMessage::Dispatch {
                    id,
                    model,
                    prompt,
                    context,
                    n,
                    temp,
                })) => {
                    let backend = self.backend.clone();
                    let writer = writer.clone();
                    let call = InferenceCall {
                        model,
                        prompt,
                        context,
                        n,
                        temp,
                    };
                    tokio::spawn(serve_dispatch(backend, writer, id, call));
                }
                Ok(Some(other)) => {
                    break Err(ModelGridError::protocol(format!(
                        "unexpected {} frame from broker",
                        other.kind()
                    )))
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(ModelGridError::protocol(err.to_string())),
            }
        };

        push_task.abort();
        served
    }
}

fn descriptor_from_entry(entry: &ModelEntry) -> ModelDescriptor {
    ModelDescriptor {
        id: entry.id.clone(),
        context_window: entry.context_window,
        coding: entry.coding,
        reasoning: entry.reasoning,
        creativity: entry.creativity,
        speed: entry.speed,
    }
}

/// Periodic resource push. Registration already carried a snapshot, so the
/// first tick is skipped.
async fn push_resources(
    writer: Arc<Mutex<OwnedWriteHalf>>,
    probe: ResourceProbe,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let update = WireMessage::ResourceUpdate {
            resources: probe.current(),
        };
        let mut writer = writer.lock().await;
        if let Err(err) = write_message(&mut *writer, &update).await {
            debug!("Resource push failed, leaving cleanup to the read loop: {}", err);
            break;
        }
        METRICS.agent.resource_updates_total.inc();
    }
}

/// Answer one dispatch. The id is echoed verbatim, and a backend failure
/// becomes an error response — never a dropped reply.
async fn serve_dispatch(
    backend: Arc<InferenceBackend>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    id: u64,
    call: InferenceCall,
) {
    debug!("Serving dispatch {} for model {}", id, call.model);

    let start = Instant::now();
    let outcome = backend.infer(call).await;
    METRICS
        .agent
        .infer_duration
        .observe(start.elapsed().as_secs_f64());

    let (status, text) = match outcome {
        Ok(text) => {
            METRICS.agent.requests_served_total.inc();
            (ResponseStatus::Ok, text)
        }
        Err(err) => {
            METRICS.agent.requests_failed_total.inc();
            warn!("Inference failed for request {}: {}", id, err);
            (ResponseStatus::Error, err.to_string())
        }
    };

    let response = WireMessage::Response { id, status, text };
    let mut writer = writer.lock().await;
    if let Err(err) = write_message(&mut *writer, &response).await {
        warn!("Failed to send response for request {}: {}", id, err);
    }
}
