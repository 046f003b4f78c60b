//! Poll loop that turns platform mentions into agent work.

mod diff_version;
mod finding_sinks;
mod gitlab_api_client;
mod jira_api_client;
mod mention_scanner;
mod platform_http;
mod processed_store;
mod resource_guard;
mod session_orchestrator;
mod workflow;
mod workspace;


use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context, Result};
use herald_agent::AgentBackend;
use herald_core::days_to_ms;
use herald_mentions::WorkItem;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use gitlab_api_client::GitlabApiClient;
use jira_api_client::JiraApiClient;
use mention_scanner::{GitlabSource, JiraSource, MentionScanner};
use processed_store::{DurableProcessedStore, IdempotencyTracker, JIRA_PROCESSED_STORE_FILE};
use resource_guard::{ResourceGuard, ResourceLease};
use session_orchestrator::SessionSettings;
use workflow::{run_work_item, WorkItemStatus, WorkflowContext};

pub use workspace::{
    GitCliProvisioner, PublishOutcome, Workspace, WorkspaceProvisioner, WorkspaceRequest,
};

#[derive(Debug, Clone)]
pub struct GitlabSettings {
    pub api_base: String,
    pub token: String,
    /// Resolved from the token owner when unset.
    pub bot_username: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JiraSettings {
    pub api_base: String,
    pub email: String,
    pub token: String,
    /// Resolved from the token owner when unset.
    pub bot_account_id: Option<String>,
}

#[derive(Clone)]
/// Public struct `MentionRuntimeConfig` used across Herald components.
pub struct MentionRuntimeConfig {
    pub gitlab: Option<GitlabSettings>,
    pub jira: Option<JiraSettings>,
    pub agent: Arc<dyn AgentBackend>,
    pub provisioner: Arc<dyn WorkspaceProvisioner>,
    pub state_dir: PathBuf,
    pub poll_interval: Duration,
    pub poll_once: bool,
    pub scan_window: Duration,
    pub dedup_max_age_days: u64,
    /// Zero disables the session deadline.
    pub session_timeout: Duration,
    pub max_correction_rounds: usize,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    /// Jira project key -> GitLab project path (`group/repo`).
    pub project_links: BTreeMap<String, String>,
}

pub(crate) enum Admission {
    Duplicate,
    Busy,
    Admitted(ResourceLease),
}

/// Dedup tracker and exclusion guard shared by every poll cycle.
pub struct RuntimeState {
    tracker: Mutex<IdempotencyTracker>,
    guard: ResourceGuard,
}

impl RuntimeState {
    /// `durable_store` persists issue-tracker message ids across restarts.
    pub fn new(max_age_days: u64, durable_store: Option<PathBuf>) -> Self {
        let max_age_ms = days_to_ms(max_age_days);
        Self {
            tracker: Mutex::new(IdempotencyTracker::new(
                max_age_ms,
                durable_store.map(|path| DurableProcessedStore::new(path, max_age_ms)),
            )),
            guard: ResourceGuard::default(),
        }
    }

    fn lock_tracker(&self) -> Result<std::sync::MutexGuard<'_, IdempotencyTracker>> {
        self.tracker
            .lock()
            .map_err(|_| anyhow!("processed-message tracker mutex is poisoned"))
    }

    /// Filters through the tracker then the guard; marks the message processed
    /// only when the resource lease was obtained.
    pub(crate) fn admit(&self, item: &WorkItem) -> Result<Admission> {
        let mut tracker = self.lock_tracker()?;
        if tracker.is_processed(item)? {
            return Ok(Admission::Duplicate);
        }
        let Some(lease) = self.guard.try_acquire(&item.resource_id()) else {
            return Ok(Admission::Busy);
        };
        tracker.mark_processed(item)?;
        Ok(Admission::Admitted(lease))
    }

    pub(crate) fn sweep(&self) -> Result<usize> {
        self.lock_tracker()?.sweep()
    }

    pub(crate) fn active_resources(&self) -> usize {
        self.guard.active_count()
    }

    #[cfg(test)]
    pub(crate) fn guard(&self) -> &ResourceGuard {
        &self.guard
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PollCycleReport {
    pub(crate) discovered: usize,
    pub(crate) dispatched: usize,
    pub(crate) skipped_duplicate: usize,
    pub(crate) skipped_busy: usize,
    pub(crate) completed: usize,
    pub(crate) informational: usize,
    pub(crate) failed: usize,
    pub(crate) scan_failures: usize,
}

/// Runs the mention runtime until ctrl-c, or for one cycle with `poll_once`.
pub async fn run_mention_runtime(config: MentionRuntimeConfig) -> Result<()> {
    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("failed to create {}", config.state_dir.display()))?;
    let state = Arc::new(RuntimeState::new(
        config.dedup_max_age_days,
        Some(config.state_dir.join(JIRA_PROCESSED_STORE_FILE)),
    ));
    let runtime = MentionRuntime::new(config, state).await?;
    runtime.run().await
}

#[derive(Clone)]
pub(crate) struct MentionRuntime {
    inner: Arc<MentionRuntimeInner>,
}

struct MentionRuntimeInner {
    scanner: MentionScanner,
    context: WorkflowContext,
    state: Arc<RuntimeState>,
    poll_interval: Duration,
    poll_once: bool,
    scan_window: Duration,
}

impl MentionRuntime {
    pub(crate) async fn new(config: MentionRuntimeConfig, state: Arc<RuntimeState>) -> Result<Self> {
        if config.gitlab.is_none() && config.jira.is_none() {
            bail!("at least one of gitlab or jira must be configured");
        }
        let gitlab = match config.gitlab.as_ref() {
            Some(settings) => Some(
                build_gitlab_source(
                    settings,
                    config.request_timeout_ms,
                    config.retry_max_attempts,
                    config.retry_base_delay_ms,
                )
                .await?,
            ),
            None => None,
        };
        let jira = match config.jira.as_ref() {
            Some(settings) => Some(
                build_jira_source(
                    settings,
                    config.request_timeout_ms,
                    config.retry_max_attempts,
                    config.retry_base_delay_ms,
                )
                .await?,
            ),
            None => None,
        };
        info!(
            gitlab = gitlab.as_ref().map(|source| source.bot_username.as_str()),
            jira = jira.as_ref().map(|source| source.bot_account_id.as_str()),
            state_dir = %config.state_dir.display(),
            linked_projects = config.project_links.len(),
            resource_guard = "in_process",
            "mention runtime configured; run a single instance per project set"
        );

        let context = WorkflowContext {
            gitlab: gitlab.clone(),
            jira: jira.clone(),
            agent: config.agent.clone(),
            provisioner: config.provisioner.clone(),
            project_links: config
                .project_links
                .iter()
                .map(|(key, path)| (key.trim().to_ascii_uppercase(), path.trim().to_string()))
                .collect(),
            session: SessionSettings {
                timeout: (!config.session_timeout.is_zero()).then_some(config.session_timeout),
                max_correction_rounds: config.max_correction_rounds,
            },
        };
        Ok(Self {
            inner: Arc::new(MentionRuntimeInner {
                scanner: MentionScanner::new(gitlab, jira),
                context,
                state,
                poll_interval: config.poll_interval,
                poll_once: config.poll_once,
                scan_window: config.scan_window,
            }),
        })
    }

    pub(crate) async fn run(&self) -> Result<()> {
        if self.inner.poll_once {
            let report = self.poll_once().await;
            if report.scan_failures > 0 && report.discovered == 0 {
                bail!(
                    "mention scan failed for {} platform(s)",
                    report.scan_failures
                );
            }
            info!(
                completed = report.completed,
                failed = report.failed,
                "mention runtime one-shot complete"
            );
            return Ok(());
        }

        let mut cycles = JoinSet::new();
        let mut ticker = tokio::time::interval(self.inner.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!(in_flight_cycles = cycles.len(), "mention runtime shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let runtime = self.clone();
                    cycles.spawn(async move { runtime.poll_once().await });
                }
            }
            while let Some(joined) = cycles.try_join_next() {
                if let Err(error) = joined {
                    warn!(%error, "poll cycle task failed");
                }
            }
        }
        while let Some(joined) = cycles.join_next().await {
            if let Err(error) = joined {
                warn!(%error, "poll cycle task failed");
            }
        }
        Ok(())
    }

    pub(crate) async fn poll_once(&self) -> PollCycleReport {
        let cycle_started = Instant::now();
        let inner = &self.inner;
        let mut report = PollCycleReport::default();

        match inner.state.sweep() {
            Ok(removed) if removed > 0 => debug!(removed, "expired processed markers"),
            Ok(_) => {}
            Err(error) => warn!(error = %format!("{error:#}"), "failed to sweep processed markers"),
        }

        let scan = inner.scanner.scan(inner.scan_window).await;
        report.discovered = scan.items.len();
        report.scan_failures = scan.failed_platforms.len();

        let mut work = JoinSet::new();
        for item in scan.items {
            match inner.state.admit(&item) {
                Ok(Admission::Duplicate) => {
                    debug!(message_id = %item.triggering_message_id, "skipping processed mention");
                    report.skipped_duplicate += 1;
                }
                Ok(Admission::Busy) => {
                    debug!(
                        message_id = %item.triggering_message_id,
                        resource_id = %item.resource_id(),
                        "skipping mention for busy resource"
                    );
                    report.skipped_busy += 1;
                }
                Ok(Admission::Admitted(lease)) => {
                    report.dispatched += 1;
                    let context = inner.context.clone();
                    work.spawn(async move { run_work_item(&context, item, lease).await });
                }
                Err(error) => {
                    warn!(
                        message_id = %item.triggering_message_id,
                        error = %format!("{error:#}"),
                        "failed to record processed mention"
                    );
                    report.failed += 1;
                }
            }
        }

        while let Some(joined) = work.join_next().await {
            match joined {
                Ok(item_report) => {
                    debug!(
                        message_id = %item_report.message_id,
                        resource_id = %item_report.resource_id,
                        intent = %item_report.intent,
                        findings = item_report.findings_posted,
                        status = ?item_report.status,
                        "work item finished"
                    );
                    match item_report.status {
                        WorkItemStatus::Completed => report.completed += 1,
                        WorkItemStatus::Informational => report.informational += 1,
                        WorkItemStatus::Failed => report.failed += 1,
                    }
                }
                Err(error) => {
                    warn!(%error, "work item task failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            discovered = report.discovered,
            dispatched = report.dispatched,
            duplicate_skips = report.skipped_duplicate,
            busy_skips = report.skipped_busy,
            completed = report.completed,
            informational = report.informational,
            failed = report.failed,
            scan_failures = report.scan_failures,
            active_resources = inner.state.active_resources(),
            duration_ms = cycle_started.elapsed().as_millis() as u64,
            "mention poll cycle finished"
        );
        report
    }
}

async fn build_gitlab_source(
    settings: &GitlabSettings,
    request_timeout_ms: u64,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
) -> Result<GitlabSource> {
    let client = GitlabApiClient::new(
        settings.api_base.clone(),
        settings.token.clone(),
        request_timeout_ms,
        retry_max_attempts,
        retry_base_delay_ms,
    )?;
    let bot_username = match settings.bot_username.as_deref() {
        Some(username) if !username.trim().is_empty() => username.trim().to_string(),
        _ => {
            client
                .current_user()
                .await
                .context("failed to resolve gitlab bot user")?
                .username
        }
    };
    Ok(GitlabSource {
        client,
        bot_username,
    })
}

async fn build_jira_source(
    settings: &JiraSettings,
    request_timeout_ms: u64,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
) -> Result<JiraSource> {
    let client = JiraApiClient::new(
        settings.api_base.clone(),
        settings.email.clone(),
        settings.token.clone(),
        request_timeout_ms,
        retry_max_attempts,
        retry_base_delay_ms,
    )?;
    let bot_account_id = match settings.bot_account_id.as_deref() {
        Some(account_id) if !account_id.trim().is_empty() => account_id.trim().to_string(),
        _ => {
            client
                .current_user()
                .await
                .context("failed to resolve jira bot account")?
                .account_id
        }
    };
    Ok(JiraSource {
        client,
        bot_account_id,
    })
}
