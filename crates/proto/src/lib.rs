//! ModelGrid wire protocol
//!
//! Message types exchanged between the broker and its workers, together with
//! the length-prefixed framing that carries them over TCP. Every frame is a
//! 4-byte big-endian body length followed by a UTF-8 JSON body, so partial
//! reads and several logical messages inside one transport read decode
//! deterministically.

use serde::{Deserialize, Serialize};

pub mod codec;
pub mod io;

pub use codec::{CodecError, FrameDecoder, MAX_FRAME_BYTES};
pub use io::{write_message, FramedReader, TransportError};

/// Self-reported RAM/VRAM availability for one worker, in bytes.
///
/// Purely informational: resource figures never affect slot busy/free state,
/// but they are carried on every registration and periodic update so scoring
/// policies can use them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub total_ram: u64,
    pub free_ram: u64,
    pub total_vram: u64,
    pub free_vram: u64,
}

/// One worker-hosted model and its static capability scores.
///
/// Scores are unitless weights in `[0, 1]` except `speed`, which is an
/// open-ended throughput figure, and `context_window`, a token count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    pub context_window: u32,
    pub coding: f64,
    pub reasoning: f64,
    pub creativity: f64,
    pub speed: f64,
}

/// Outcome tag carried on every `response` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
    Timeout,
}

impl ResponseStatus {
    /// Stable string form, matching the wire encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Ok => "ok",
            ResponseStatus::Error => "error",
            ResponseStatus::Timeout => "timeout",
        }
    }
}

/// A single broker<->worker protocol message.
///
/// `register` must be the first message on a new connection; the broker
/// refuses anything else. `dispatch` ids are minted by the broker,
/// monotonically per worker, and must be echoed verbatim on the matching
/// `response` — the id is the sole correlation key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    Register {
        resources: ResourceSnapshot,
        models: Vec<ModelDescriptor>,
    },
    ResourceUpdate {
        resources: ResourceSnapshot,
    },
    Dispatch {
        id: u64,
        model: String,
        prompt: String,
        context: String,
        n: u32,
        temp: f32,
    },
    Response {
        id: u64,
        status: ResponseStatus,
        text: String,
    },
}

impl WireMessage {
    /// Wire-level tag of this message, for logs and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Register { .. } => "register",
            WireMessage::ResourceUpdate { .. } => "resource_update",
            WireMessage::Dispatch { .. } => "dispatch",
            WireMessage::Response { .. } => "response",
        }
    }
}
