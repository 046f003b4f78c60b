//! Drives one agent session from creation to a terminal event and forwards
//! each completed finding exactly once.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use herald_agent::{AgentBackend, AgentSession, HeraldAgentError, SessionEvent, SessionEventStream};
use herald_mentions::prompt_helpers::{render_tool_rejection_prompt, ToolRejectionView};
use herald_mentions::{parse_finding_arguments, Finding, FINDING_TOOL_NAME};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionStatus {
    Created,
    Streaming,
    Idle,
    Errored,
}

#[derive(Debug, Error)]
pub(crate) enum SessionError {
    #[error("prompt sent before the session event stream was subscribed")]
    PromptBeforeSubscribe,
    #[error("agent session reported an error: {0}")]
    Remote(String),
    #[error("agent session did not finish within {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("agent session event stream closed before the session finished")]
    StreamClosed,
    #[error(transparent)]
    Agent(#[from] HeraldAgentError),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionSettings {
    /// `None` waits indefinitely.
    pub(crate) timeout: Option<Duration>,
    pub(crate) max_correction_rounds: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30 * 60)),
            max_correction_rounds: 1,
        }
    }
}

#[async_trait]
/// Destination for validated findings (a platform comment API).
pub(crate) trait FindingSink: Send + Sync {
    async fn post_finding(&self, finding: &Finding) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SessionOutcome {
    pub(crate) session_id: String,
    pub(crate) response_text: String,
    pub(crate) findings_dispatched: usize,
    pub(crate) sink_failures: usize,
    pub(crate) rejected_calls: usize,
    pub(crate) policy_violations: usize,
    pub(crate) correction_rounds: usize,
}

struct RejectedCall {
    call_id: String,
    reason: String,
}

pub(crate) struct SessionDriver {
    session: Arc<dyn AgentSession>,
    resource_id: String,
    workdir: PathBuf,
    status: SessionStatus,
    events: Option<SessionEventStream>,
    response_text: String,
    processed_call_ids: HashSet<String>,
    pending_rejections: Vec<RejectedCall>,
}

impl SessionDriver {
    /// Allocates a session bound to `workdir`.
    pub(crate) async fn create(
        backend: &dyn AgentBackend,
        resource_id: &str,
        workdir: &Path,
    ) -> Result<Self, SessionError> {
        let session = backend.create_session(workdir).await?;
        debug!(
            session_id = session.id(),
            resource_id,
            workdir = %workdir.display(),
            "agent session created"
        );
        Ok(Self {
            session,
            resource_id: resource_id.to_string(),
            workdir: workdir.to_path_buf(),
            status: SessionStatus::Created,
            events: None,
            response_text: String::new(),
            processed_call_ids: HashSet::new(),
            pending_rejections: Vec::new(),
        })
    }

    pub(crate) fn id(&self) -> &str {
        self.session.id()
    }

    pub(crate) async fn subscribe(&mut self) -> Result<(), SessionError> {
        if self.events.is_none() {
            self.events = Some(self.session.subscribe().await?);
        }
        Ok(())
    }

    /// Queues the prompt; completion is observed through the event stream.
    pub(crate) async fn send(&mut self, prompt: &str) -> Result<(), SessionError> {
        if self.events.is_none() {
            return Err(SessionError::PromptBeforeSubscribe);
        }
        self.session.prompt(prompt).await?;
        self.status = SessionStatus::Streaming;
        Ok(())
    }

    async fn abort_best_effort(&mut self) {
        if let Err(error) = self.session.abort().await {
            warn!(session_id = self.id(), %error, "failed to abort agent session");
        }
    }

    fn fail(&mut self, error: SessionError) -> SessionError {
        self.status = SessionStatus::Errored;
        warn!(
            session_id = self.id(),
            resource_id = %self.resource_id,
            status = ?self.status,
            %error,
            "agent session ended with error"
        );
        error
    }

    async fn handle_finding_call(
        &mut self,
        call_id: String,
        input: serde_json::Value,
        sink: &dyn FindingSink,
        outcome: &mut SessionOutcome,
    ) {
        if !self.processed_call_ids.insert(call_id.clone()) {
            debug!(session_id = self.id(), %call_id, "ignoring repeated tool completion");
            return;
        }
        let finding = match parse_finding_arguments(&input) {
            Ok(finding) => finding,
            Err(error) => {
                warn!(
                    session_id = self.id(),
                    %call_id,
                    reason_code = "finding_arguments_rejected",
                    %error,
                    "rejected finding tool call"
                );
                outcome.rejected_calls += 1;
                self.pending_rejections.push(RejectedCall {
                    call_id,
                    reason: error.to_string(),
                });
                return;
            }
        };
        if finding.missing_suggestion() {
            warn!(
                session_id = self.id(),
                %call_id,
                severity = finding.severity.as_str(),
                reason_code = "finding_missing_suggestion",
                "non-praise finding has no suggested code"
            );
            outcome.policy_violations += 1;
        }
        match sink.post_finding(&finding).await {
            Ok(()) => outcome.findings_dispatched += 1,
            Err(error) => {
                warn!(
                    session_id = self.id(),
                    %call_id,
                    error = %format!("{error:#}"),
                    "failed to post finding"
                );
                outcome.sink_failures += 1;
            }
        }
    }

    async fn next_event(
        events: &mut SessionEventStream,
        deadline: Option<Instant>,
    ) -> Result<Option<SessionEvent>, ()> {
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, events.next())
                .await
                .map_err(|_| ()),
            None => Ok(events.next().await),
        }
    }

    /// Consumes events until the session goes idle or errors.
    pub(crate) async fn run_to_completion(
        mut self,
        sink: &dyn FindingSink,
        settings: &SessionSettings,
    ) -> Result<SessionOutcome, SessionError> {
        let mut events = self.events.take().ok_or(SessionError::PromptBeforeSubscribe)?;
        let deadline = settings
            .timeout
            .filter(|timeout| !timeout.is_zero())
            .map(|timeout| Instant::now() + timeout);
        let mut outcome = SessionOutcome {
            session_id: self.id().to_string(),
            ..SessionOutcome::default()
        };

        loop {
            let event = match Self::next_event(&mut events, deadline).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(self.fail(SessionError::StreamClosed)),
                Err(()) => {
                    self.abort_best_effort().await;
                    return Err(self.fail(SessionError::TimedOut(
                        settings.timeout.unwrap_or_default(),
                    )));
                }
            };
            if event.session_id() != self.id() {
                continue;
            }

            match event {
                SessionEvent::TextDelta { text, .. } => self.response_text.push_str(&text),
                SessionEvent::ToolCompleted {
                    call_id,
                    tool,
                    input,
                    ..
                } => {
                    if tool == FINDING_TOOL_NAME {
                        self.handle_finding_call(call_id, input, sink, &mut outcome)
                            .await;
                    }
                }
                SessionEvent::ToolErrored {
                    call_id,
                    tool,
                    error,
                    ..
                } => {
                    debug!(
                        session_id = self.id(),
                        %call_id,
                        %tool,
                        %error,
                        "agent tool call failed"
                    );
                }
                SessionEvent::Idle { .. } => {
                    if !self.pending_rejections.is_empty()
                        && outcome.correction_rounds < settings.max_correction_rounds
                    {
                        let rejections = std::mem::take(&mut self.pending_rejections);
                        let views = rejections
                            .iter()
                            .map(|rejection| ToolRejectionView {
                                call_id: &rejection.call_id,
                                reason: &rejection.reason,
                            })
                            .collect::<Vec<_>>();
                        let prompt = render_tool_rejection_prompt(&views);
                        outcome.correction_rounds += 1;
                        if let Err(error) = self.session.prompt(&prompt).await {
                            return Err(self.fail(error.into()));
                        }
                        continue;
                    }
                    self.status = SessionStatus::Idle;
                    break;
                }
                SessionEvent::Error { message, .. } => {
                    return Err(self.fail(SessionError::Remote(message)));
                }
            }
        }

        outcome.response_text = std::mem::take(&mut self.response_text);
        info!(
            session_id = %outcome.session_id,
            resource_id = %self.resource_id,
            workdir = %self.workdir.display(),
            status = ?self.status,
            findings = outcome.findings_dispatched,
            rejected = outcome.rejected_calls,
            sink_failures = outcome.sink_failures,
            "agent session finished"
        );
        Ok(outcome)
    }
}

/// Creates a session, subscribes, sends `prompt`, and waits for the outcome.
pub(crate) async fn run_session(
    backend: &dyn AgentBackend,
    resource_id: &str,
    workdir: &Path,
    prompt: &str,
    sink: &dyn FindingSink,
    settings: &SessionSettings,
) -> Result<SessionOutcome, SessionError> {
    let mut driver = SessionDriver::create(backend, resource_id, workdir).await?;
    driver.subscribe().await?;
    driver.send(prompt).await?;
    driver.run_to_completion(sink, settings).await
}

/// Sink for sessions whose intent does not emit findings.
pub(crate) struct DiscardFindings;

#[async_trait]
impl FindingSink for DiscardFindings {
    async fn post_finding(&self, finding: &Finding) -> anyhow::Result<()> {
        debug!(severity = finding.severity.as_str(), "discarding finding");
        Ok(())
    }
}
