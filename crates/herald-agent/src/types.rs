use std::{path::Path, pin::Pin, sync::Arc};

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
/// Events observed on an agent session's stream.
pub enum SessionEvent {
    TextDelta {
        session_id: String,
        text: String,
    },
    ToolCompleted {
        session_id: String,
        call_id: String,
        tool: String,
        input: Value,
    },
    ToolErrored {
        session_id: String,
        call_id: String,
        tool: String,
        error: String,
    },
    Idle {
        session_id: String,
    },
    Error {
        session_id: String,
        message: String,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::TextDelta { session_id, .. }
            | Self::ToolCompleted { session_id, .. }
            | Self::ToolErrored { session_id, .. }
            | Self::Idle { session_id }
            | Self::Error { session_id, .. } => session_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ToolCompleted { .. } => "tool_completed",
            Self::ToolErrored { .. } => "tool_errored",
            Self::Idle { .. } => "session_idle",
            Self::Error { .. } => "session_error",
        }
    }
}

#[derive(Debug, Error)]
/// Enumerates supported `HeraldAgentError` values.
pub enum HeraldAgentError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("agent server returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type SessionEventStream = Pin<Box<dyn Stream<Item = SessionEvent> + Send>>;

#[async_trait]
/// One agent work context bound to a single workspace.
pub trait AgentSession: Send + Sync {
    fn id(&self) -> &str;

    /// Opens the event stream. Events emitted before this returns may be lost.
    async fn subscribe(&self) -> Result<SessionEventStream, HeraldAgentError>;

    /// Queues a prompt without waiting for the session to finish.
    async fn prompt(&self, text: &str) -> Result<(), HeraldAgentError>;

    async fn abort(&self) -> Result<(), HeraldAgentError>;
}

#[async_trait]
/// Trait contract for the AI collaborator.
pub trait AgentBackend: Send + Sync {
    /// Single-shot completion used for intent classification.
    async fn complete_once(&self, prompt: &str) -> Result<String, HeraldAgentError>;

    async fn create_session(
        &self,
        workdir: &Path,
    ) -> Result<Arc<dyn AgentSession>, HeraldAgentError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::SessionEvent;

    #[test]
    fn unit_session_event_exposes_session_id_and_kind() {
        let events = [
            SessionEvent::TextDelta {
                session_id: "s1".to_string(),
                text: "hi".to_string(),
            },
            SessionEvent::ToolCompleted {
                session_id: "s1".to_string(),
                call_id: "c1".to_string(),
                tool: "post_finding".to_string(),
                input: json!({}),
            },
            SessionEvent::Idle {
                session_id: "s1".to_string(),
            },
        ];
        assert!(events.iter().all(|event| event.session_id() == "s1"));
        assert_eq!(events[1].kind(), "tool_completed");
        assert_eq!(events[2].kind(), "session_idle");
    }
}
