use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use herald_agent::{AgentServerClient, AgentServerConfig};
use herald_runtime::{GitCliProvisioner, GitlabSettings, JiraSettings, MentionRuntimeConfig};

use crate::cli_args::Cli;

fn required(value: &Option<String>, flag: &str, env: &str, platform: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => bail!("{platform} is enabled but {flag} (or {env}) is not set"),
    }
}

fn gitlab_settings(cli: &Cli) -> Result<Option<GitlabSettings>> {
    if !cli.gitlab_enabled {
        return Ok(None);
    }
    Ok(Some(GitlabSettings {
        api_base: cli.gitlab_api_base.trim().to_string(),
        token: required(&cli.gitlab_token, "--gitlab-token", "GITLAB_TOKEN", "gitlab")?,
        bot_username: cli.gitlab_bot_username.clone(),
    }))
}

fn jira_settings(cli: &Cli) -> Result<Option<JiraSettings>> {
    if !cli.jira_enabled {
        return Ok(None);
    }
    Ok(Some(JiraSettings {
        api_base: required(
            &cli.jira_api_base,
            "--jira-api-base",
            "HERALD_JIRA_API_BASE",
            "jira",
        )?,
        email: required(&cli.jira_email, "--jira-email", "HERALD_JIRA_EMAIL", "jira")?,
        token: required(&cli.jira_token, "--jira-token", "JIRA_TOKEN", "jira")?,
        bot_account_id: cli.jira_bot_account_id.clone(),
    }))
}

/// Validates the CLI and assembles the runtime configuration with its adapters.
pub(crate) fn build_runtime_config(cli: &Cli) -> Result<MentionRuntimeConfig> {
    let gitlab = gitlab_settings(cli)?;
    let jira = jira_settings(cli)?;
    if gitlab.is_none() && jira.is_none() {
        bail!("both gitlab and jira are disabled; enable at least one platform");
    }
    if jira.is_some() && gitlab.is_none() && !cli.jira_project_link.is_empty() {
        bail!("--jira-project-link requires gitlab access to clone linked repositories");
    }

    let agent = AgentServerClient::new(AgentServerConfig {
        base_url: cli.agent_server_url.clone(),
        model: cli.agent_model.clone(),
        agent: cli.agent_name.clone(),
        request_timeout_ms: cli.request_timeout_ms,
    })
    .context("failed to create agent server client")?;

    let workspace_dir = cli
        .workspace_dir
        .clone()
        .unwrap_or_else(|| cli.state_dir.join("workspaces"));
    let clone_token = gitlab
        .as_ref()
        .map(|settings| settings.token.clone())
        .unwrap_or_default();
    let provisioner = GitCliProvisioner::new(workspace_dir, clone_token)
        .with_author(cli.git_author_name.clone(), cli.git_author_email.clone());

    Ok(MentionRuntimeConfig {
        gitlab,
        jira,
        agent: Arc::new(agent),
        provisioner: Arc::new(provisioner),
        state_dir: cli.state_dir.clone(),
        poll_interval: Duration::from_secs(cli.poll_interval_seconds),
        poll_once: cli.poll_once,
        scan_window: Duration::from_secs(cli.scan_window_minutes.saturating_mul(60)),
        dedup_max_age_days: cli.dedup_max_age_days,
        session_timeout: Duration::from_secs(cli.session_timeout_seconds),
        max_correction_rounds: cli.max_correction_rounds,
        request_timeout_ms: cli.request_timeout_ms,
        retry_max_attempts: cli.retry_max_attempts,
        retry_base_delay_ms: cli.retry_base_delay_ms,
        project_links: cli.jira_project_link.iter().cloned().collect(),
    })
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::build_runtime_config;
    use crate::cli_args::Cli;

    #[test]
    fn functional_build_runtime_config_accepts_gitlab_only() {
        let cli = Cli::try_parse_from([
            "herald",
            "--gitlab-token",
            "glpat-x",
            "--jira-enabled",
            "false",
            "--scan-window-minutes",
            "15",
        ])
        .expect("cli");
        let config = build_runtime_config(&cli).expect("config");
        assert!(config.gitlab.is_some());
        assert!(config.jira.is_none());
        assert_eq!(config.scan_window.as_secs(), 900);
        assert_eq!(config.dedup_max_age_days, 7);
    }

    #[test]
    fn regression_build_runtime_config_rejects_missing_jira_credentials() {
        let cli = Cli::try_parse_from([
            "herald",
            "--gitlab-enabled",
            "false",
            "--jira-api-base",
            "https://example.atlassian.net",
            "--jira-email",
            "bot@example.com",
        ])
        .expect("cli");
        let error = build_runtime_config(&cli).err().expect("missing token");
        assert!(error.to_string().contains("--jira-token"));
    }

    #[test]
    fn regression_build_runtime_config_rejects_all_platforms_disabled() {
        let cli = Cli::try_parse_from([
            "herald",
            "--gitlab-enabled",
            "false",
            "--jira-enabled",
            "false",
        ])
        .expect("cli");
        let error = build_runtime_config(&cli).err().expect("nothing enabled");
        assert!(error.to_string().contains("enable at least one platform"));
    }
}
