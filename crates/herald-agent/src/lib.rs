//! AI collaborator contract for Herald: session traits, stream events, and the
//! HTTP adapter for a local coding-agent server.
mod agent_server;
mod types;

pub use agent_server::{decode_server_event, AgentServerClient, AgentServerConfig};
pub use types::{AgentBackend, AgentSession, HeraldAgentError, SessionEvent, SessionEventStream};
