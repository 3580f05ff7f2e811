//! Broker-side worker sessions
//!
//! One session per accepted TCP connection. The first frame must be a
//! `register`; anything else closes the connection without touching the
//! registry. After registration a reader task routes incoming frames and a
//! writer task owns the write half, so concurrent dispatches never
//! interleave partial frames on the wire. Reader termination — clean EOF,
//! decode error, protocol violation — evicts the worker and drains its
//! pending requests.

use crate::correlation::DispatchOutcome;
use crate::registry::{Worker, WorkerRegistry};
use modelgrid_common::{ModelGridError, Result};
use modelgrid_proto::{write_message, FramedReader, WireMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Outbound frames queued per connection before `send` applies backpressure.
const OUTBOX_DEPTH: usize = 64;

/// Accept loop for the worker transport. Runs until the shutdown signal.
pub async fn run_listener(
    listener: TcpListener,
    registry: Arc<WorkerRegistry>,
    handshake_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Worker listener stopping");
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted worker connection from {}", addr);
                        let registry = registry.clone();
                        tokio::spawn(async move {
                            if let Err(err) =
                                serve_connection(stream, addr, registry, handshake_timeout).await
                            {
                                warn!("Worker connection {} closed: {}", addr, err);
                            }
                        });
                    }
                    Err(err) => warn!("Accept failed: {}", err),
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<WorkerRegistry>,
    handshake_timeout: Duration,
) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedReader::new(read_half);

    // Registration handshake: exactly one register frame, promptly.
    let first = match tokio::time::timeout(handshake_timeout, reader.next_message()).await {
        Err(_) => return Err(ModelGridError::registration("handshake timed out")),
        Ok(Err(err)) => {
            return Err(ModelGridError::registration(format!(
                "handshake failed: {}",
                err
            )))
        }
        Ok(Ok(None)) => {
            return Err(ModelGridError::registration(
                "connection closed before register",
            ))
        }
        Ok(Ok(Some(message))) => message,
    };

    let (resources, models) = match first {
        WireMessage::Register { resources, models } => (resources, models),
        other => {
            return Err(ModelGridError::registration(format!(
                "first message must be register, got {}",
                other.kind()
            )))
        }
    };
    if models.is_empty() {
        return Err(ModelGridError::registration("register carried no models"));
    }

    let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_DEPTH);
    let worker = registry.add(addr, models, resources, outbox_tx).await?;

    let writer_task = tokio::spawn(write_loop(write_half, outbox_rx));

    let served = read_loop(&mut reader, &worker, &registry).await;

    let reason = match &served {
        Ok(()) => "disconnected".to_string(),
        Err(err) => err.to_string(),
    };
    registry.remove(worker.id(), &reason).await;
    writer_task.abort();

    served
}

/// Owns the write half: every outbound frame for this worker funnels
/// through here, one at a time.
async fn write_loop(mut writer: OwnedWriteHalf, mut outbox: mpsc::Receiver<WireMessage>) {
    while let Some(message) = outbox.recv().await {
        if let Err(err) = write_message(&mut writer, &message).await {
            warn!("Worker write failed: {}", err);
            break;
        }
    }
}

async fn read_loop(
    reader: &mut FramedReader<OwnedReadHalf>,
    worker: &Arc<Worker>,
    registry: &Arc<WorkerRegistry>,
) -> Result<()> {
    loop {
        match reader.next_message().await {
            Ok(Some(WireMessage::ResourceUpdate { resources })) => {
                registry.update_resources(worker.id(), resources).await;
            }
            Ok(Some(WireMessage::Response { id, status, text })) => {
                worker.correlation.fulfill(id, DispatchOutcome { status, text });
            }
            Ok(Some(other)) => {
                return Err(ModelGridError::protocol(format!(
                    "unexpected {} frame from worker",
                    other.kind()
                )))
            }
            Ok(None) => return Ok(()),
            Err(err) => return Err(ModelGridError::protocol(err.to_string())),
        }
    }
}
