use std::time::Duration;

use anyhow::{Context, Result};
use herald_mentions::DiffCoordinate;
use serde::Deserialize;
use serde_json::{json, Value};

use super::platform_http::PlatformHttp;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabUser {
    pub(crate) username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabTodoTarget {
    pub(crate) iid: u64,
    pub(crate) project_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabTodo {
    pub(crate) id: u64,
    pub(crate) author: GitlabUser,
    #[serde(default)]
    pub(crate) body: String,
    pub(crate) created_at: String,
    #[serde(default)]
    pub(crate) target_type: String,
    #[serde(default)]
    pub(crate) target_url: Option<String>,
    pub(crate) target: GitlabTodoTarget,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabMergeRequest {
    pub(crate) iid: u64,
    pub(crate) project_id: u64,
    pub(crate) title: String,
    pub(crate) source_branch: String,
    pub(crate) target_branch: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabProject {
    pub(crate) id: u64,
    pub(crate) path_with_namespace: String,
    pub(crate) http_url_to_repo: String,
    #[serde(default)]
    pub(crate) default_branch: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabMergeRequestVersion {
    pub(crate) base_commit_sha: String,
    pub(crate) start_commit_sha: String,
    pub(crate) head_commit_sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabNote {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) body: String,
    pub(crate) author: GitlabUser,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabDiscussion {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) notes: Vec<GitlabNote>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabCreatedMergeRequest {
    pub(crate) iid: u64,
    pub(crate) web_url: String,
}

/// Encodes a `group/project` path for use as a project id segment.
pub(crate) fn encode_project_path(path: &str) -> String {
    path.trim().trim_matches('/').replace('/', "%2F")
}

fn position_payload(position: &DiffCoordinate) -> Value {
    json!({
        "position_type": "text",
        "base_sha": position.base_sha,
        "start_sha": position.start_sha,
        "head_sha": position.head_sha,
        "old_path": position.path,
        "new_path": position.path,
        "new_line": position.line,
    })
}

#[derive(Clone)]
pub(crate) struct GitlabApiClient {
    transport: PlatformHttp,
    api_base: String,
}

impl GitlabApiClient {
    pub(crate) fn new(
        api_base: String,
        token: String,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("herald-mention-runtime"),
        );
        headers.insert(
            "private-token",
            reqwest::header::HeaderValue::from_str(token.trim())
                .context("invalid gitlab token header")?,
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create gitlab api client")?;
        Ok(Self {
            transport: PlatformHttp::new(http, "gitlab", retry_max_attempts, retry_base_delay_ms),
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn http(&self) -> &reqwest::Client {
        &self.transport.http
    }

    fn merge_request_url(&self, project_id: u64, iid: u64) -> String {
        format!(
            "{}/projects/{project_id}/merge_requests/{iid}",
            self.api_base
        )
    }

    pub(crate) async fn current_user(&self) -> Result<GitlabUser> {
        self.transport
            .request_json("resolve bot user", || {
                self.http().get(format!("{}/user", self.api_base))
            })
            .await
    }

    pub(crate) async fn list_pending_mention_todos(&self) -> Result<Vec<GitlabTodo>> {
        let todos: Vec<GitlabTodo> = self
            .transport
            .request_json("list todos", || {
                self.http()
                    .get(format!("{}/todos", self.api_base))
                    .query(&[
                        ("action", "directly_addressed"),
                        ("state", "pending"),
                        ("type", "MergeRequest"),
                        ("per_page", "100"),
                    ])
            })
            .await?;
        Ok(todos
            .into_iter()
            .filter(|todo| todo.target_type.is_empty() || todo.target_type == "MergeRequest")
            .collect())
    }

    pub(crate) async fn mark_todo_done(&self, todo_id: u64) -> Result<()> {
        self.transport
            .request_empty("mark todo done", || {
                self.http()
                    .post(format!("{}/todos/{todo_id}/mark_as_done", self.api_base))
            })
            .await
    }

    pub(crate) async fn get_merge_request(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<GitlabMergeRequest> {
        self.transport
            .request_json("get merge request", || {
                self.http().get(self.merge_request_url(project_id, iid))
            })
            .await
    }

    pub(crate) async fn get_project(&self, project: &str) -> Result<GitlabProject> {
        let project = encode_project_path(project);
        self.transport
            .request_json("get project", || {
                self.http()
                    .get(format!("{}/projects/{project}", self.api_base))
            })
            .await
    }

    pub(crate) async fn latest_merge_request_version(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<Option<GitlabMergeRequestVersion>> {
        let versions: Vec<GitlabMergeRequestVersion> = self
            .transport
            .request_json("list merge request versions", || {
                self.http()
                    .get(format!("{}/versions", self.merge_request_url(project_id, iid)))
            })
            .await?;
        Ok(versions.into_iter().next())
    }

    pub(crate) async fn list_discussions(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<Vec<GitlabDiscussion>> {
        let mut page = 1_u32;
        let mut rows = Vec::new();
        loop {
            let page_value = page.to_string();
            let chunk: Vec<GitlabDiscussion> = self
                .transport
                .request_json("list discussions", || {
                    self.http()
                        .get(format!(
                            "{}/discussions",
                            self.merge_request_url(project_id, iid)
                        ))
                        .query(&[("per_page", "100"), ("page", page_value.as_str())])
                })
                .await?;
            let chunk_len = chunk.len();
            rows.extend(chunk);
            if chunk_len < 100 {
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(rows)
    }

    pub(crate) async fn create_discussion(
        &self,
        project_id: u64,
        iid: u64,
        body: &str,
        position: Option<&DiffCoordinate>,
    ) -> Result<()> {
        let mut payload = json!({ "body": body });
        if let Some(position) = position {
            payload["position"] = position_payload(position);
        }
        self.transport
            .create_empty("create discussion", || {
                self.http()
                    .post(format!(
                        "{}/discussions",
                        self.merge_request_url(project_id, iid)
                    ))
                    .json(&payload)
            })
            .await
    }

    pub(crate) async fn reply_to_discussion(
        &self,
        project_id: u64,
        iid: u64,
        discussion_id: &str,
        body: &str,
    ) -> Result<()> {
        let payload = json!({ "body": body });
        self.transport
            .create_empty("reply to discussion", || {
                self.http()
                    .post(format!(
                        "{}/discussions/{discussion_id}/notes",
                        self.merge_request_url(project_id, iid)
                    ))
                    .json(&payload)
            })
            .await
    }

    pub(crate) async fn create_note(
        &self,
        project_id: u64,
        iid: u64,
        body: &str,
    ) -> Result<()> {
        let payload = json!({ "body": body });
        self.transport
            .create_empty("create note", || {
                self.http()
                    .post(format!("{}/notes", self.merge_request_url(project_id, iid)))
                    .json(&payload)
            })
            .await
    }

    pub(crate) async fn create_merge_request(
        &self,
        project_id: u64,
        source_branch: &str,
        target_branch: &str,
        title: &str,
        description: &str,
    ) -> Result<GitlabCreatedMergeRequest> {
        let payload = json!({
            "source_branch": source_branch,
            "target_branch": target_branch,
            "title": title,
            "description": description,
            "remove_source_branch": true,
        });
        self.transport
            .create_json("create merge request", || {
                self.http()
                    .post(format!(
                        "{}/projects/{project_id}/merge_requests",
                        self.api_base
                    ))
                    .json(&payload)
            })
            .await
    }
}
