//! HTTP client for a local coding-agent server speaking JSON + server-sent events.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::types::{
    AgentBackend, AgentSession, HeraldAgentError, SessionEvent, SessionEventStream,
};

#[derive(Debug, Clone)]
/// Public struct `AgentServerConfig` used across Herald components.
pub struct AgentServerConfig {
    pub base_url: String,
    pub model: Option<String>,
    pub agent: Option<String>,
    pub request_timeout_ms: u64,
}

#[derive(Clone)]
/// Public struct `AgentServerClient` used across Herald components.
pub struct AgentServerClient {
    inner: Arc<AgentServerInner>,
}

struct AgentServerInner {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base_url: String,
    model: Option<(String, String)>,
    agent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedSession {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    parts: Vec<Value>,
}

impl AgentServerClient {
    pub fn new(config: AgentServerConfig) -> Result<Self, HeraldAgentError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        // The event stream stays open for the whole session; no overall timeout.
        let stream_http = reqwest::Client::builder().build()?;
        let model = config.model.as_deref().and_then(split_model_ref);
        Ok(Self {
            inner: Arc::new(AgentServerInner {
                http,
                stream_http,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                model,
                agent: config.agent.filter(|agent| !agent.trim().is_empty()),
            }),
        })
    }

    async fn create_remote_session(
        &self,
        directory: Option<&Path>,
    ) -> Result<String, HeraldAgentError> {
        let mut request = self
            .inner
            .http
            .post(format!("{}/session", self.inner.base_url))
            .json(&json!({ "title": "herald" }));
        if let Some(directory) = directory {
            request = request.query(&[("directory", directory.display().to_string())]);
        }
        let response = ensure_success(request.send().await?).await?;
        let created = response.json::<CreatedSession>().await?;
        Ok(created.id)
    }
}

impl AgentServerClient {
    async fn send_message(&self, session_id: &str, prompt: &str) -> Result<String, HeraldAgentError> {
        let response = self
            .inner
            .http
            .post(format!(
                "{}/session/{}/message",
                self.inner.base_url, session_id
            ))
            .json(&prompt_payload(&self.inner, prompt))
            .send()
            .await?;
        let message = ensure_success(response)
            .await?
            .json::<MessageResponse>()
            .await?;
        Ok(collect_text_parts(&message.parts))
    }

    async fn delete_remote_session(&self, session_id: &str) {
        let result = match self
            .inner
            .http
            .delete(format!("{}/session/{}", self.inner.base_url, session_id))
            .send()
            .await
        {
            Ok(response) => ensure_success(response).await.map(|_| ()),
            Err(error) => Err(error.into()),
        };
        if let Err(error) = result {
            warn!(session_id, %error, "failed to delete classification session");
        }
    }
}

/// Splits `provider/model` into its parts.
fn split_model_ref(raw: &str) -> Option<(String, String)> {
    let (provider, model) = raw.trim().split_once('/')?;
    if provider.is_empty() || model.is_empty() {
        return None;
    }
    Some((provider.to_string(), model.to_string()))
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, HeraldAgentError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(HeraldAgentError::HttpStatus {
        status: status.as_u16(),
        body,
    })
}

fn prompt_payload(inner: &AgentServerInner, text: &str) -> Value {
    let mut payload = json!({
        "parts": [{ "type": "text", "text": text }],
    });
    if let Some((provider, model)) = inner.model.as_ref() {
        payload["model"] = json!({ "providerID": provider, "modelID": model });
    }
    if let Some(agent) = inner.agent.as_ref() {
        payload["agent"] = json!(agent);
    }
    payload
}

#[async_trait]
impl AgentBackend for AgentServerClient {
    /// Asks in a throwaway session, which is deleted whatever the outcome.
    async fn complete_once(&self, prompt: &str) -> Result<String, HeraldAgentError> {
        let session_id = self.create_remote_session(None).await?;
        let reply = self.send_message(&session_id, prompt).await;
        self.delete_remote_session(&session_id).await;
        reply
    }

    async fn create_session(
        &self,
        workdir: &Path,
    ) -> Result<Arc<dyn AgentSession>, HeraldAgentError> {
        let id = self.create_remote_session(Some(workdir)).await?;
        debug!(session_id = %id, workdir = %workdir.display(), "agent session created");
        Ok(Arc::new(AgentServerSession {
            inner: self.inner.clone(),
            id,
            directory: workdir.to_path_buf(),
        }))
    }
}

struct AgentServerSession {
    inner: Arc<AgentServerInner>,
    id: String,
    directory: PathBuf,
}

#[async_trait]
impl AgentSession for AgentServerSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn subscribe(&self) -> Result<SessionEventStream, HeraldAgentError> {
        let response = self
            .inner
            .stream_http
            .get(format!("{}/event", self.inner.base_url))
            .query(&[("directory", self.directory.display().to_string())])
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = self.id.clone();
        tokio::spawn(async move {
            pump_event_stream(response, session_id, tx).await;
        });
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn prompt(&self, text: &str) -> Result<(), HeraldAgentError> {
        let response = self
            .inner
            .http
            .post(format!(
                "{}/session/{}/prompt_async",
                self.inner.base_url, self.id
            ))
            .query(&[("directory", self.directory.display().to_string())])
            .json(&prompt_payload(&self.inner, text))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn abort(&self) -> Result<(), HeraldAgentError> {
        let response = self
            .inner
            .http
            .post(format!("{}/session/{}/abort", self.inner.base_url, self.id))
            .query(&[("directory", self.directory.display().to_string())])
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

/// Raw SSE bytes; lines are decoded only once their terminating newline arrived.
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<Result<String, std::str::Utf8Error>> {
        let end = self.pending.iter().position(|byte| *byte == b'\n')?;
        let line = self.pending.drain(..=end).collect::<Vec<_>>();
        Some(std::str::from_utf8(&line).map(|line| line.trim().to_string()))
    }

    fn finish(&mut self) -> Option<Result<String, std::str::Utf8Error>> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(std::str::from_utf8(&rest).map(|line| line.trim().to_string()))
    }
}

async fn pump_event_stream(
    response: reqwest::Response,
    session_id: String,
    tx: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut stream = response.bytes_stream();
    let mut lines = SseLineBuffer::default();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(error) => {
                warn!(session_id = %session_id, error = %error, "agent event stream failed");
                return;
            }
        };
        lines.push(chunk.as_ref());
        while let Some(line) = lines.next_line() {
            if !forward_decoded_line(line, &session_id, &tx) {
                return;
            }
        }
    }
    if let Some(line) = lines.finish() {
        forward_decoded_line(line, &session_id, &tx);
    }
}

fn forward_decoded_line(
    line: Result<String, std::str::Utf8Error>,
    session_id: &str,
    tx: &mpsc::UnboundedSender<SessionEvent>,
) -> bool {
    match line {
        Ok(line) => forward_sse_line(&line, session_id, tx),
        Err(error) => {
            warn!(session_id = %session_id, %error, "skipping agent event line with invalid UTF-8");
            !tx.is_closed()
        }
    }
}

/// Forwards one SSE line; returns false once the receiver is gone.
fn forward_sse_line(line: &str, session_id: &str, tx: &mpsc::UnboundedSender<SessionEvent>) -> bool {
    let Some(data) = line.strip_prefix("data:") else {
        return true;
    };
    let payload = match serde_json::from_str::<Value>(data.trim()) {
        Ok(payload) => payload,
        Err(error) => {
            debug!(error = %error, "skipping undecodable agent event");
            return true;
        }
    };
    match decode_server_event(&payload) {
        Some(event) if event.session_id() == session_id => tx.send(event).is_ok(),
        _ => !tx.is_closed(),
    }
}

fn collect_text_parts(parts: &[Value]) -> String {
    parts
        .iter()
        .filter(|part| part["type"] == "text")
        .filter_map(|part| part["text"].as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Decodes one `{type, properties}` server event into a [`SessionEvent`].
pub fn decode_server_event(payload: &Value) -> Option<SessionEvent> {
    let properties = payload.get("properties")?;
    match payload.get("type")?.as_str()? {
        "message.part.updated" => {
            let part = properties.get("part")?;
            let session_id = str_field(part, "sessionID")?;
            match part.get("type")?.as_str()? {
                "text" => {
                    let text = str_field(properties, "delta")?;
                    Some(SessionEvent::TextDelta { session_id, text })
                }
                "tool" => {
                    let call_id = str_field(part, "callID")?;
                    let tool = str_field(part, "tool")?;
                    let state = part.get("state")?;
                    match state.get("status")?.as_str()? {
                        "completed" => Some(SessionEvent::ToolCompleted {
                            session_id,
                            call_id,
                            tool,
                            input: state.get("input").cloned().unwrap_or(Value::Null),
                        }),
                        "error" => Some(SessionEvent::ToolErrored {
                            session_id,
                            call_id,
                            tool,
                            error: str_field(state, "error")
                                .unwrap_or_else(|| "unknown tool error".to_string()),
                        }),
                        _ => None,
                    }
                }
                _ => None,
            }
        }
        "session.idle" => Some(SessionEvent::Idle {
            session_id: str_field(properties, "sessionID")?,
        }),
        "session.error" => {
            let session_id = str_field(properties, "sessionID")?;
            let error = properties.get("error");
            let message = error
                .and_then(|error| error.pointer("/data/message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| error.and_then(|error| str_field(error, "name")))
                .unwrap_or_else(|| "agent session failed".to_string());
            Some(SessionEvent::Error {
                session_id,
                message,
            })
        }
        _ => None,
    }
}
