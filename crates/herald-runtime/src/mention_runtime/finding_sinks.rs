//! Platform comment sinks for validated findings.

use anyhow::Result;
use async_trait::async_trait;
use herald_mentions::{build_comment, build_unpositioned_comment, render_jira_finding, Finding};
use tracing::warn;

use super::diff_version::DiffVersionCache;
use super::gitlab_api_client::GitlabApiClient;
use super::jira_api_client::JiraApiClient;
use super::platform_http::status_error;
use super::session_orchestrator::FindingSink;

/// Posts review findings as merge request discussions, inline when possible.
pub(crate) struct GitlabReviewSink {
    client: GitlabApiClient,
    project_id: u64,
    iid: u64,
    versions: DiffVersionCache,
}

impl GitlabReviewSink {
    pub(crate) fn new(client: GitlabApiClient, project_id: u64, iid: u64) -> Self {
        Self {
            versions: DiffVersionCache::new(client.clone(), project_id, iid),
            client,
            project_id,
            iid,
        }
    }
}

#[async_trait]
impl FindingSink for GitlabReviewSink {
    async fn post_finding(&self, finding: &Finding) -> Result<()> {
        let version = if finding.is_positionable() {
            match self.versions.resolve().await {
                Ok(version) => Some(version),
                Err(error) => {
                    warn!(
                        project_id = self.project_id,
                        iid = self.iid,
                        error = %format!("{error:#}"),
                        "diff version unavailable; posting finding without position"
                    );
                    None
                }
            }
        } else {
            None
        };

        let descriptor = build_comment(finding, version);
        let Some(position) = descriptor.position.as_ref() else {
            self.client
                .create_discussion(self.project_id, self.iid, &descriptor.body, None)
                .await?;
            return Ok(());
        };

        match self
            .client
            .create_discussion(self.project_id, self.iid, &descriptor.body, Some(position))
            .await
        {
            Ok(_) => Ok(()),
            Err(error) if status_error(&error).is_some_and(|status| status.is_client_error()) => {
                warn!(
                    project_id = self.project_id,
                    iid = self.iid,
                    path = %position.path,
                    line = position.line,
                    reason_code = "finding_position_rejected",
                    error = %format!("{error:#}"),
                    "inline position rejected; posting finding at thread level"
                );
                let fallback = build_unpositioned_comment(finding);
                self.client
                    .create_discussion(self.project_id, self.iid, &fallback.body, None)
                    .await?;
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}

/// Posts findings as wiki-markup comments on a Jira issue.
pub(crate) struct JiraFindingSink {
    client: JiraApiClient,
    issue_key: String,
}

impl JiraFindingSink {
    pub(crate) fn new(client: JiraApiClient, issue_key: String) -> Self {
        Self { client, issue_key }
    }
}

#[async_trait]
impl FindingSink for JiraFindingSink {
    async fn post_finding(&self, finding: &Finding) -> Result<()> {
        self.client
            .add_comment(&self.issue_key, &render_jira_finding(finding))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::{GitlabReviewSink, JiraFindingSink};
    use crate::mention_runtime::gitlab_api_client::GitlabApiClient;
    use crate::mention_runtime::jira_api_client::JiraApiClient;
    use crate::mention_runtime::session_orchestrator::FindingSink;
    use herald_mentions::{Finding, Severity};

    fn finding() -> Finding {
        Finding {
            severity: Severity::Critical,
            file: Some("src/db.rs".to_string()),
            line: Some(12),
            comment: "SQL built from user input.".to_string(),
            suggested_code: Some("query.bind(id)".to_string()),
            lines_above: None,
            lines_below: None,
        }
    }

    fn gitlab_client(server: &MockServer) -> GitlabApiClient {
        GitlabApiClient::new(server.base_url(), "t".to_string(), 2_000, 1, 1).expect("client")
    }

    #[tokio::test]
    async fn functional_gitlab_sink_posts_positioned_discussion() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/projects/3/merge_requests/8/versions");
            then.status(200).json_body(json!([{
                "base_commit_sha": "b", "start_commit_sha": "s", "head_commit_sha": "h"
            }]));
        });
        let positioned = server.mock(|when, then| {
            when.method(POST)
                .path("/projects/3/merge_requests/8/discussions")
                .json_body_includes(
                    json!({ "position": { "new_path": "src/db.rs", "new_line": 12, "head_sha": "h" } })
                        .to_string(),
                );
            then.status(201).json_body(json!({ "id": "d1" }));
        });
        GitlabReviewSink::new(gitlab_client(&server), 3, 8)
            .post_finding(&finding())
            .await
            .expect("posted");
        positioned.assert();
    }

    #[tokio::test]
    async fn integration_gitlab_sink_falls_back_to_thread_comment_on_rejected_position() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/projects/3/merge_requests/8/versions");
            then.status(200).json_body(json!([{
                "base_commit_sha": "b", "start_commit_sha": "s", "head_commit_sha": "h"
            }]));
        });
        let rejected = server.mock(|when, then| {
            when.method(POST)
                .path("/projects/3/merge_requests/8/discussions")
                .body_includes("\"position\"");
            then.status(400)
                .json_body(json!({ "message": "line_code can't be blank" }));
        });
        let fallback = server.mock(|when, then| {
            when.method(POST)
                .path("/projects/3/merge_requests/8/discussions")
                .body_includes("`src/db.rs:12`");
            then.status(201).json_body(json!({ "id": "d2" }));
        });
        GitlabReviewSink::new(gitlab_client(&server), 3, 8)
            .post_finding(&finding())
            .await
            .expect("fallback posted");
        assert_eq!(rejected.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn regression_gitlab_sink_posts_discussion_once_when_response_is_slow() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/projects/3/merge_requests/8/versions");
            then.status(200).json_body(json!([{
                "base_commit_sha": "b", "start_commit_sha": "s", "head_commit_sha": "h"
            }]));
        });
        let created = server.mock(|when, then| {
            when.method(POST).path("/projects/3/merge_requests/8/discussions");
            then.status(201)
                .delay(std::time::Duration::from_millis(400))
                .json_body(json!({ "id": "d1" }));
        });
        let client =
            GitlabApiClient::new(server.base_url(), "t".to_string(), 150, 3, 1).expect("client");
        let result = GitlabReviewSink::new(client, 3, 8)
            .post_finding(&finding())
            .await;
        assert!(result.is_err());
        assert_eq!(created.calls(), 1);
    }

    #[tokio::test]
    async fn functional_jira_sink_renders_wiki_markup() {
        let server = MockServer::start();
        let comment = server.mock(|when, then| {
            when.method(POST)
                .path("/rest/api/2/issue/OPS-4/comment")
                .body_includes("*Critical*: SQL built from user input.")
                .body_includes("{{src/db.rs:12}}");
            then.status(201).json_body(json!({ "id": "900" }));
        });
        let client = JiraApiClient::new(
            server.base_url(),
            "bot@example.com".to_string(),
            "t".to_string(),
            2_000,
            1,
            1,
        )
        .expect("client");
        JiraFindingSink::new(client, "OPS-4".to_string())
            .post_finding(&finding())
            .await
            .expect("posted");
        comment.assert();
    }
}
