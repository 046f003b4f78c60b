use std::path::PathBuf;

use clap::{ArgAction, Parser};
use tracing::level_filters::LevelFilter;

use crate::bootstrap_helpers::parse_log_level;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

/// Parses `KEY=group/repo` into an uppercase Jira project key and a GitLab path.
pub(crate) fn parse_project_link(value: &str) -> Result<(String, String), String> {
    let (key, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=group/repo, got '{value}'"))?;
    let key = key.trim().to_ascii_uppercase();
    let path = path.trim().trim_matches('/').to_string();
    if key.is_empty() || path.is_empty() {
        return Err(format!("expected KEY=group/repo, got '{value}'"));
    }
    if !path.contains('/') {
        return Err(format!("gitlab project path '{path}' must include a namespace"));
    }
    Ok((key, path))
}

#[derive(Debug, Parser)]
#[command(
    name = "herald",
    about = "Turns GitLab and Jira mentions into coding-agent work",
    version
)]
/// Public struct `Cli` used across Herald components.
pub struct Cli {
    #[arg(
        long = "log-level",
        env = "HERALD_LOG_LEVEL",
        default_value = "info",
        value_parser = parse_log_level,
        help = "Default log level when RUST_LOG is unset"
    )]
    pub log_level: LevelFilter,

    #[arg(
        long = "gitlab-enabled",
        env = "HERALD_GITLAB_ENABLED",
        default_value_t = true,
        action = ArgAction::Set,
        help = "Scan GitLab merge request mentions"
    )]
    pub gitlab_enabled: bool,

    #[arg(
        long = "gitlab-api-base",
        env = "HERALD_GITLAB_API_BASE",
        default_value = "https://gitlab.com/api/v4",
        help = "GitLab REST API base URL"
    )]
    pub gitlab_api_base: String,

    #[arg(
        long = "gitlab-token",
        env = "GITLAB_TOKEN",
        hide_env_values = true,
        help = "GitLab token used for API access and repository clones"
    )]
    pub gitlab_token: Option<String>,

    #[arg(
        long = "gitlab-bot-username",
        env = "HERALD_GITLAB_BOT_USERNAME",
        help = "Bot username; resolved from the token owner when omitted"
    )]
    pub gitlab_bot_username: Option<String>,

    #[arg(
        long = "jira-enabled",
        env = "HERALD_JIRA_ENABLED",
        default_value_t = true,
        action = ArgAction::Set,
        help = "Scan Jira issue comment mentions"
    )]
    pub jira_enabled: bool,

    #[arg(
        long = "jira-api-base",
        env = "HERALD_JIRA_API_BASE",
        help = "Jira site base URL, e.g. https://example.atlassian.net"
    )]
    pub jira_api_base: Option<String>,

    #[arg(
        long = "jira-email",
        env = "HERALD_JIRA_EMAIL",
        help = "Account email paired with the Jira API token"
    )]
    pub jira_email: Option<String>,

    #[arg(
        long = "jira-token",
        env = "JIRA_TOKEN",
        hide_env_values = true,
        help = "Jira API token"
    )]
    pub jira_token: Option<String>,

    #[arg(
        long = "jira-bot-account-id",
        env = "HERALD_JIRA_BOT_ACCOUNT_ID",
        help = "Bot account id; resolved from the token owner when omitted"
    )]
    pub jira_bot_account_id: Option<String>,

    #[arg(
        long = "jira-project-link",
        env = "HERALD_JIRA_PROJECT_LINKS",
        value_delimiter = ',',
        value_parser = parse_project_link,
        help = "Link a Jira project to a GitLab repository as KEY=group/repo (repeatable)"
    )]
    pub jira_project_link: Vec<(String, String)>,

    #[arg(
        long = "agent-server-url",
        env = "HERALD_AGENT_SERVER_URL",
        default_value = "http://127.0.0.1:4096",
        help = "Base URL of the coding-agent server"
    )]
    pub agent_server_url: String,

    #[arg(
        long = "agent-model",
        env = "HERALD_AGENT_MODEL",
        help = "Model for agent sessions as provider/model"
    )]
    pub agent_model: Option<String>,

    #[arg(
        long = "agent-name",
        env = "HERALD_AGENT_NAME",
        help = "Named agent profile on the agent server"
    )]
    pub agent_name: Option<String>,

    #[arg(
        long = "state-dir",
        env = "HERALD_STATE_DIR",
        default_value = ".herald",
        help = "Directory for the durable dedup store"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long = "workspace-dir",
        env = "HERALD_WORKSPACE_DIR",
        help = "Directory for repository checkouts (defaults to <state-dir>/workspaces)"
    )]
    pub workspace_dir: Option<PathBuf>,

    #[arg(
        long = "git-author-name",
        env = "HERALD_GIT_AUTHOR_NAME",
        default_value = "Herald",
        help = "Author name for commits pushed by the bot"
    )]
    pub git_author_name: String,

    #[arg(
        long = "git-author-email",
        env = "HERALD_GIT_AUTHOR_EMAIL",
        default_value = "herald@localhost",
        help = "Author email for commits pushed by the bot"
    )]
    pub git_author_email: String,

    #[arg(
        long = "poll-interval-seconds",
        env = "HERALD_POLL_INTERVAL_SECONDS",
        default_value_t = 30,
        value_parser = parse_positive_u64,
        help = "Seconds between poll cycles"
    )]
    pub poll_interval_seconds: u64,

    #[arg(
        long = "poll-once",
        env = "HERALD_POLL_ONCE",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Run one poll cycle, wait for its work items, and exit"
    )]
    pub poll_once: bool,

    #[arg(
        long = "scan-window-minutes",
        env = "HERALD_SCAN_WINDOW_MINUTES",
        default_value_t = 60,
        value_parser = parse_positive_u64,
        help = "Only mentions newer than this many minutes are considered"
    )]
    pub scan_window_minutes: u64,

    #[arg(
        long = "dedup-max-age-days",
        env = "HERALD_DEDUP_MAX_AGE_DAYS",
        default_value_t = 7,
        value_parser = parse_positive_u64,
        help = "Days a processed-message marker is retained"
    )]
    pub dedup_max_age_days: u64,

    #[arg(
        long = "session-timeout-seconds",
        env = "HERALD_SESSION_TIMEOUT_SECONDS",
        default_value_t = 1_800,
        help = "Deadline for one agent session in seconds (0 disables)"
    )]
    pub session_timeout_seconds: u64,

    #[arg(
        long = "max-correction-rounds",
        env = "HERALD_MAX_CORRECTION_ROUNDS",
        default_value_t = 1,
        help = "Follow-up prompts allowed for rejected finding tool calls"
    )]
    pub max_correction_rounds: usize,

    #[arg(
        long = "request-timeout-ms",
        env = "HERALD_REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Timeout for platform and agent API requests in milliseconds"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "HERALD_RETRY_MAX_ATTEMPTS",
        default_value_t = 4,
        value_parser = parse_positive_usize,
        help = "Maximum attempts for retryable platform api failures (429/5xx/transport)"
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long = "retry-base-delay-ms",
        env = "HERALD_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64,
        help = "Base backoff delay in milliseconds for platform api retries"
    )]
    pub retry_base_delay_ms: u64,
}
