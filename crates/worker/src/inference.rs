//! Inference backends
//!
//! The seam between the agent and whatever actually generates text. The
//! broker never sees this: the agent maps dispatch frames onto a backend
//! call and wraps the outcome in a response frame, echoing the request id.

use modelgrid_common::config::WorkerConfig;
use modelgrid_common::{ModelGridError, Result};
use serde::Deserialize;

/// One generation call, as received in a dispatch frame.
#[derive(Debug, Clone)]
pub struct InferenceCall {
    pub model: String,
    pub prompt: String,
    pub context: String,
    pub n: u32,
    pub temp: f32,
}

/// Text-generation backend, selected by worker configuration.
#[derive(Debug)]
pub enum InferenceBackend {
    /// Deterministic canned completions, for development and tests.
    Echo(EchoBackend),

    /// POSTs to a local inference engine (llama.cpp/ollama-style server).
    Http(HttpBackend),
}

impl InferenceBackend {
    pub fn from_config(config: &WorkerConfig) -> Result<Self> {
        match config.backend.as_str() {
            "echo" => Ok(InferenceBackend::Echo(EchoBackend)),
            "http" => {
                let engine_url = config.engine_url.clone().ok_or_else(|| {
                    ModelGridError::config("http backend requires engine_url")
                })?;
                Ok(InferenceBackend::Http(HttpBackend::new(engine_url)))
            }
            other => Err(ModelGridError::config(format!("Unknown backend: {}", other))),
        }
    }

    pub async fn infer(&self, call: InferenceCall) -> Result<String> {
        match self {
            InferenceBackend::Echo(backend) => backend.infer(call).await,
            InferenceBackend::Http(backend) => backend.infer(call).await,
        }
    }
}

/// Echoes the prompt back, tagged with the model id.
#[derive(Debug, Default)]
pub struct EchoBackend;

impl EchoBackend {
    pub async fn infer(&self, call: InferenceCall) -> Result<String> {
        Ok(format!("[{}] {}", call.model, call.prompt))
    }
}

/// Engine reply body: `{"text": "..."}`.
#[derive(Debug, Deserialize)]
struct EngineReply {
    text: String,
}

/// Client for a locally running inference HTTP server.
#[derive(Debug)]
pub struct HttpBackend {
    client: reqwest::Client,
    engine_url: String,
}

impl HttpBackend {
    pub fn new(engine_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            engine_url,
        }
    }

    pub async fn infer(&self, call: InferenceCall) -> Result<String> {
        let response = self
            .client
            .post(&self.engine_url)
            .json(&serde_json::json!({
                "model": call.model,
                "prompt": call.prompt,
                "context": call.context,
                "n": call.n,
                "temperature": call.temp,
            }))
            .send()
            .await
            .map_err(|err| ModelGridError::inference(format!("engine unreachable: {}", err)))?;

        if !response.status().is_success() {
            return Err(ModelGridError::inference(format!(
                "engine returned {}",
                response.status()
            )));
        }

        let reply: EngineReply = response
            .json()
            .await
            .map_err(|err| ModelGridError::inference(format!("bad engine reply: {}", err)))?;

        Ok(reply.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgrid_common::config::ResourceConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn call(prompt: &str) -> InferenceCall {
        InferenceCall {
            model: "m1".to_string(),
            prompt: prompt.to_string(),
            context: String::new(),
            n: 16,
            temp: 0.2,
        }
    }

    fn worker_config(backend: &str, engine_url: Option<String>) -> WorkerConfig {
        WorkerConfig {
            broker_addr: "127.0.0.1:9999".to_string(),
            reconnect_backoff_secs: 5,
            resource_interval_secs: 60,
            backend: backend.to_string(),
            engine_url,
            models: Vec::new(),
            resources: ResourceConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_echo_backend_is_deterministic() {
        let backend = EchoBackend;
        let text = backend.infer(call("ping")).await.unwrap();
        assert_eq!(text, "[m1] ping");
    }

    #[test]
    fn test_from_config_rejects_unknown_backend() {
        let result = InferenceBackend::from_config(&worker_config("cuda", None));
        assert!(matches!(result, Err(ModelGridError::Config(_))));
    }

    #[test]
    fn test_http_backend_requires_engine_url() {
        let result = InferenceBackend::from_config(&worker_config("http", None));
        assert!(matches!(result, Err(ModelGridError::Config(_))));
    }

    /// Minimal one-shot HTTP server that answers `{"text":"pong"}`.
    async fn fake_engine() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/generate", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            // Consume the whole request: headers, then content-length bytes.
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = stream.read(&mut chunk).await.unwrap();
                request.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text
                        .lines()
                        .find(|line| line.to_ascii_lowercase().starts_with("content-length:"))
                        .and_then(|line| line.split(':').nth(1))
                        .and_then(|value| value.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }

            let body = r#"{"text":"pong"}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });

        url
    }

    #[tokio::test]
    async fn test_http_backend_round_trip() {
        let url = fake_engine().await;
        let backend = HttpBackend::new(url);

        let text = backend.infer(call("ping")).await.unwrap();
        assert_eq!(text, "pong");
    }

    #[tokio::test]
    async fn test_http_backend_reports_unreachable_engine() {
        // Nothing listens on this port.
        let backend = HttpBackend::new("http://127.0.0.1:1/generate".to_string());
        let result = backend.infer(call("ping")).await;
        assert!(matches!(result, Err(ModelGridError::Inference(_))));
    }
}
