//! Per-work-item routing: classify, provision, run the session for the
//! intent, publish, and reply.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::anyhow;
use herald_agent::AgentBackend;
use herald_core::current_unix_timestamp_ms;
use herald_mentions::error_comment::{render_run_error_comment, render_unlinked_project_comment};
use herald_mentions::prompt_helpers::{
    render_session_prompt, response_or_placeholder, SessionPromptView,
};
use herald_mentions::work_item::gitlab_todo_id;
use herald_mentions::{
    build_classification_prompt, resolve_intent, Intent, ResourceRef, WorkItem,
};
use thiserror::Error;
use tracing::{info, warn};

use super::finding_sinks::{GitlabReviewSink, JiraFindingSink};
use super::gitlab_api_client::{GitlabDiscussion, GitlabMergeRequest, GitlabProject};
use super::jira_api_client::{jira_mention, JiraIssue};
use super::mention_scanner::{GitlabSource, JiraSource};
use super::resource_guard::ResourceLease;
use super::session_orchestrator::{
    run_session, DiscardFindings, FindingSink, SessionError, SessionOutcome, SessionSettings,
};
use super::workspace::{PublishOutcome, Workspace, WorkspaceProvisioner, WorkspaceRequest};

#[derive(Debug, Error)]
pub(crate) enum WorkflowError {
    #[error("platform request failed: {0:#}")]
    Transport(anyhow::Error),
    #[error("agent session failed: {0}")]
    Session(#[from] SessionError),
    #[error("jira project {project_key} has no linked repository")]
    Configuration { project_key: String },
    #[error("workspace operation failed: {0:#}")]
    Workspace(anyhow::Error),
}

impl WorkflowError {
    pub(crate) fn reason_code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport_error",
            Self::Session(_) => "session_error",
            Self::Configuration { .. } => "unlinked_project",
            Self::Workspace(_) => "workspace_error",
        }
    }
}

/// Shared collaborators for running work items.
#[derive(Clone)]
pub(crate) struct WorkflowContext {
    pub(crate) gitlab: Option<GitlabSource>,
    pub(crate) jira: Option<JiraSource>,
    pub(crate) agent: Arc<dyn AgentBackend>,
    pub(crate) provisioner: Arc<dyn WorkspaceProvisioner>,
    /// Jira project key -> GitLab project path.
    pub(crate) project_links: BTreeMap<String, String>,
    pub(crate) session: SessionSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WorkItemStatus {
    Completed,
    /// Short-circuited with an informational reply; not a failure.
    Informational,
    Failed,
}

#[derive(Debug, Clone)]
pub(crate) struct WorkItemReport {
    pub(crate) message_id: String,
    pub(crate) resource_id: String,
    pub(crate) intent: Intent,
    pub(crate) status: WorkItemStatus,
    pub(crate) findings_posted: usize,
}

struct ActionResult {
    reply: String,
    findings_posted: usize,
}

/// Maps the mention text to an intent; a failed classification call yields the default.
pub(crate) async fn classify_intent(agent: &dyn AgentBackend, item: &WorkItem) -> Intent {
    let prompt = build_classification_prompt(&item.body, item.platform);
    match agent.complete_once(&prompt).await {
        Ok(raw) => resolve_intent(&raw, item.platform),
        Err(error) => {
            warn!(
                message_id = %item.triggering_message_id,
                %error,
                "intent classification failed; using default intent"
            );
            item.platform.default_intent()
        }
    }
}

/// Returns the discussion holding the triggering note, if it can be identified.
pub(crate) fn find_thread_for_message(
    item: &WorkItem,
    discussions: &[GitlabDiscussion],
) -> Option<String> {
    let hinted_note_id = item
        .thread_hint
        .as_deref()
        .and_then(|hint| hint.parse::<u64>().ok());
    if let Some(note_id) = hinted_note_id {
        if let Some(discussion) = discussions
            .iter()
            .find(|discussion| discussion.notes.iter().any(|note| note.id == note_id))
        {
            return Some(discussion.id.clone());
        }
    }
    let body = item.body.trim();
    discussions
        .iter()
        .find(|discussion| {
            discussion.notes.iter().any(|note| {
                note.author.username.eq_ignore_ascii_case(&item.author_id)
                    && note.body.trim() == body
            })
        })
        .map(|discussion| discussion.id.clone())
}

fn new_run_id() -> String {
    format!("run-{}", current_unix_timestamp_ms())
}

fn branch_stamp() -> u64 {
    current_unix_timestamp_ms() / 1_000
}

/// Runs one admitted work item to completion. The lease is released when this returns.
pub(crate) async fn run_work_item(
    context: &WorkflowContext,
    item: WorkItem,
    lease: ResourceLease,
) -> WorkItemReport {
    let run_id = new_run_id();
    let intent = classify_intent(context.agent.as_ref(), &item).await;
    info!(
        message_id = %item.triggering_message_id,
        resource_id = lease.resource_id(),
        %run_id,
        %intent,
        "dispatching work item"
    );

    let result = match &item.resource {
        ResourceRef::MergeRequest { project_id, iid } => {
            run_gitlab_item(context, &item, intent, *project_id, *iid).await
        }
        ResourceRef::Issue { project_key, key } => {
            run_jira_item(context, &item, intent, project_key, key).await
        }
    };

    let mut report = WorkItemReport {
        message_id: item.triggering_message_id.clone(),
        resource_id: item.resource_id(),
        intent,
        status: WorkItemStatus::Completed,
        findings_posted: 0,
    };
    match result {
        Ok(action) => {
            report.findings_posted = action.findings_posted;
            if let Err(error) = post_reply(context, &item, &action.reply).await {
                warn!(
                    message_id = %item.triggering_message_id,
                    error = %format!("{error:#}"),
                    "failed to post reply"
                );
                report.status = WorkItemStatus::Failed;
            }
        }
        Err(WorkflowError::Configuration { project_key }) => {
            info!(
                message_id = %item.triggering_message_id,
                %project_key,
                reason_code = "unlinked_project",
                "jira project has no linked repository"
            );
            report.status = WorkItemStatus::Informational;
            if let Err(error) =
                post_reply(context, &item, &render_unlinked_project_comment(&project_key)).await
            {
                warn!(
                    message_id = %item.triggering_message_id,
                    error = %format!("{error:#}"),
                    "failed to post informational reply"
                );
            }
        }
        Err(error) => {
            warn!(
                message_id = %item.triggering_message_id,
                %run_id,
                reason_code = error.reason_code(),
                %error,
                "work item failed"
            );
            report.status = WorkItemStatus::Failed;
            let body = render_run_error_comment(
                &item.triggering_message_id,
                &run_id,
                &error.to_string(),
            );
            if let Err(post_error) = post_reply(context, &item, &body).await {
                warn!(
                    message_id = %item.triggering_message_id,
                    error = %format!("{post_error:#}"),
                    "failed to post error comment"
                );
            }
        }
    }
    drop(lease);
    report
}

fn gitlab_source(context: &WorkflowContext) -> Result<&GitlabSource, WorkflowError> {
    context
        .gitlab
        .as_ref()
        .ok_or_else(|| WorkflowError::Transport(anyhow!("gitlab access is not configured")))
}

fn jira_source(context: &WorkflowContext) -> Result<&JiraSource, WorkflowError> {
    context
        .jira
        .as_ref()
        .ok_or_else(|| WorkflowError::Transport(anyhow!("jira access is not configured")))
}

async fn run_gitlab_item(
    context: &WorkflowContext,
    item: &WorkItem,
    intent: Intent,
    project_id: u64,
    iid: u64,
) -> Result<ActionResult, WorkflowError> {
    let source = gitlab_source(context)?;
    if let Some(todo_id) = gitlab_todo_id(&item.triggering_message_id) {
        if let Err(error) = source.client.mark_todo_done(todo_id).await {
            warn!(todo_id, error = %format!("{error:#}"), "failed to mark gitlab todo as done");
        }
    }
    let merge_request = source
        .client
        .get_merge_request(project_id, iid)
        .await
        .map_err(WorkflowError::Transport)?;
    let project = source
        .client
        .get_project(&project_id.to_string())
        .await
        .map_err(WorkflowError::Transport)?;

    let workspace = context
        .provisioner
        .provision(&WorkspaceRequest {
            clone_url: project.http_url_to_repo.clone(),
            git_ref: merge_request.source_branch.clone(),
            label: item.resource_id(),
        })
        .await
        .map_err(WorkflowError::Workspace)?;
    let result = run_gitlab_intent(
        context,
        source,
        item,
        intent,
        &project,
        &merge_request,
        &workspace,
    )
    .await;
    cleanup_workspace(workspace).await;
    result
}

async fn run_gitlab_intent(
    context: &WorkflowContext,
    source: &GitlabSource,
    item: &WorkItem,
    intent: Intent,
    project: &GitlabProject,
    merge_request: &GitlabMergeRequest,
    workspace: &Workspace,
) -> Result<ActionResult, WorkflowError> {
    let resource_label = format!("{}!{}", project.path_with_namespace, merge_request.iid);
    let prompt = render_session_prompt(&SessionPromptView {
        intent,
        resource_label: &resource_label,
        title: &merge_request.title,
        requester: &item.author_id,
        request: &item.body,
        base_ref: Some(&merge_request.target_branch),
    });
    let review_sink;
    let sink: &dyn FindingSink = if intent == Intent::Review {
        review_sink = GitlabReviewSink::new(
            source.client.clone(),
            merge_request.project_id,
            merge_request.iid,
        );
        &review_sink
    } else {
        &DiscardFindings
    };
    let outcome = execute_session(context, item, workspace, &prompt, sink).await?;

    match intent {
        Intent::Review => Ok(ActionResult {
            reply: review_summary(&outcome),
            findings_posted: outcome.findings_dispatched,
        }),
        Intent::WriteTests => {
            let branch = format!("herald/tests-{}-{}", merge_request.iid, branch_stamp());
            let message = format!("Add tests for !{}", merge_request.iid);
            let reply = match publish(context, workspace, &branch, &message).await? {
                PublishOutcome::NoChanges => format!(
                    "{}\n\n_No test changes were produced._",
                    response_or_placeholder(&outcome.response_text)
                ),
                PublishOutcome::Pushed { branch } => {
                    let created = source
                        .client
                        .create_merge_request(
                            project.id,
                            &branch,
                            &merge_request.source_branch,
                            &format!("Tests for !{}: {}", merge_request.iid, merge_request.title),
                            &outcome.response_text,
                        )
                        .await
                        .map_err(WorkflowError::Transport)?;
                    format!(
                        "{}\n\nProposed tests in !{}: {}",
                        response_or_placeholder(&outcome.response_text),
                        created.iid,
                        created.web_url
                    )
                }
            };
            Ok(ActionResult {
                reply,
                findings_posted: 0,
            })
        }
        _ => Ok(ActionResult {
            reply: response_or_placeholder(&outcome.response_text),
            findings_posted: 0,
        }),
    }
}

async fn run_jira_item(
    context: &WorkflowContext,
    item: &WorkItem,
    intent: Intent,
    project_key: &str,
    issue_key: &str,
) -> Result<ActionResult, WorkflowError> {
    let Some(repository) = context.project_links.get(project_key) else {
        return Err(WorkflowError::Configuration {
            project_key: project_key.to_string(),
        });
    };
    let jira = jira_source(context)?;
    let gitlab = context.gitlab.as_ref().ok_or_else(|| {
        WorkflowError::Workspace(anyhow!(
            "gitlab access is required to clone linked repository {repository}"
        ))
    })?;
    let issue = jira
        .client
        .get_issue(issue_key)
        .await
        .map_err(WorkflowError::Transport)?;
    let project = gitlab
        .client
        .get_project(repository)
        .await
        .map_err(WorkflowError::Transport)?;
    let default_branch = project
        .default_branch
        .clone()
        .unwrap_or_else(|| "main".to_string());

    let workspace = context
        .provisioner
        .provision(&WorkspaceRequest {
            clone_url: project.http_url_to_repo.clone(),
            git_ref: default_branch.clone(),
            label: item.resource_id(),
        })
        .await
        .map_err(WorkflowError::Workspace)?;
    let result = run_jira_intent(
        context,
        jira,
        gitlab,
        item,
        intent,
        &issue,
        &project,
        &default_branch,
        &workspace,
    )
    .await;
    cleanup_workspace(workspace).await;
    result
}

#[allow(clippy::too_many_arguments)]
async fn run_jira_intent(
    context: &WorkflowContext,
    jira: &JiraSource,
    gitlab: &GitlabSource,
    item: &WorkItem,
    intent: Intent,
    issue: &JiraIssue,
    project: &GitlabProject,
    default_branch: &str,
    workspace: &Workspace,
) -> Result<ActionResult, WorkflowError> {
    let mut request = item.body.clone();
    if let Some(description) = issue.fields.description.as_deref() {
        if !description.trim().is_empty() {
            request = format!("{request}\n\nIssue description:\n{}", description.trim());
        }
    }
    let prompt = render_session_prompt(&SessionPromptView {
        intent,
        resource_label: &issue.key,
        title: &issue.fields.summary,
        requester: &item.author_id,
        request: &request,
        base_ref: Some(default_branch),
    });
    let finding_sink;
    let sink: &dyn FindingSink = if intent == Intent::Analyze {
        finding_sink = JiraFindingSink::new(jira.client.clone(), issue.key.clone());
        &finding_sink
    } else {
        &DiscardFindings
    };
    let outcome = execute_session(context, item, workspace, &prompt, sink).await?;

    match intent {
        Intent::FixAndPropose => {
            let branch = format!(
                "herald/{}-{}",
                issue.key.to_ascii_lowercase(),
                branch_stamp()
            );
            let message = format!("{}: {}", issue.key, issue.fields.summary);
            let reply = match publish(context, workspace, &branch, &message).await? {
                PublishOutcome::NoChanges => format!(
                    "{}\n\nNo code changes were produced.",
                    response_or_placeholder(&outcome.response_text)
                ),
                PublishOutcome::Pushed { branch } => {
                    let created = gitlab
                        .client
                        .create_merge_request(
                            project.id,
                            &branch,
                            default_branch,
                            &message,
                            &outcome.response_text,
                        )
                        .await
                        .map_err(WorkflowError::Transport)?;
                    format!(
                        "{}\n\nProposed fix: {}",
                        response_or_placeholder(&outcome.response_text),
                        created.web_url
                    )
                }
            };
            Ok(ActionResult {
                reply,
                findings_posted: 0,
            })
        }
        _ => Ok(ActionResult {
            reply: response_or_placeholder(&outcome.response_text),
            findings_posted: outcome.findings_dispatched,
        }),
    }
}

async fn execute_session(
    context: &WorkflowContext,
    item: &WorkItem,
    workspace: &Workspace,
    prompt: &str,
    sink: &dyn FindingSink,
) -> Result<SessionOutcome, WorkflowError> {
    Ok(run_session(
        context.agent.as_ref(),
        &item.resource_id(),
        workspace.path(),
        prompt,
        sink,
        &context.session,
    )
    .await?)
}

async fn publish(
    context: &WorkflowContext,
    workspace: &Workspace,
    branch: &str,
    message: &str,
) -> Result<PublishOutcome, WorkflowError> {
    context
        .provisioner
        .publish(workspace, branch, message)
        .await
        .map_err(WorkflowError::Workspace)
}

async fn cleanup_workspace(workspace: Workspace) {
    let path = workspace.path().display().to_string();
    if let Err(error) = workspace.cleanup().await {
        warn!(%path, error = %format!("{error:#}"), "failed to clean up workspace");
    }
}

fn review_summary(outcome: &SessionOutcome) -> String {
    let mut summary = response_or_placeholder(&outcome.response_text);
    if outcome.findings_dispatched > 0 {
        summary.push_str(&format!(
            "\n\n_Posted {} finding(s) on this merge request._",
            outcome.findings_dispatched
        ));
    }
    summary
}

/// Posts `body` as a reply to the triggering message.
pub(crate) async fn post_reply(
    context: &WorkflowContext,
    item: &WorkItem,
    body: &str,
) -> anyhow::Result<()> {
    match &item.resource {
        ResourceRef::MergeRequest { project_id, iid } => {
            let source = context
                .gitlab
                .as_ref()
                .ok_or_else(|| anyhow!("gitlab access is not configured"))?;
            let thread = match source.client.list_discussions(*project_id, *iid).await {
                Ok(discussions) => find_thread_for_message(item, &discussions),
                Err(error) => {
                    warn!(
                        message_id = %item.triggering_message_id,
                        error = %format!("{error:#}"),
                        "failed to list discussions; replying at top level"
                    );
                    None
                }
            };
            match thread {
                Some(discussion_id) => {
                    source
                        .client
                        .reply_to_discussion(*project_id, *iid, &discussion_id, body)
                        .await?;
                }
                None => {
                    source.client.create_note(*project_id, *iid, body).await?;
                }
            }
        }
        ResourceRef::Issue { key, .. } => {
            let source = context
                .jira
                .as_ref()
                .ok_or_else(|| anyhow!("jira access is not configured"))?;
            let body = format!("{} {body}", jira_mention(&item.author_id));
            source.client.add_comment(key, &body).await?;
        }
    }
    Ok(())
}
