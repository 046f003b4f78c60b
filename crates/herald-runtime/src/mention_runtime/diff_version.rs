use anyhow::{anyhow, Result};
use herald_mentions::DiffVersion;
use tokio::sync::OnceCell;

use super::gitlab_api_client::GitlabApiClient;

/// Latest diff version of one merge request, resolved at most once per review pass.
pub(crate) struct DiffVersionCache {
    client: GitlabApiClient,
    project_id: u64,
    iid: u64,
    cell: OnceCell<DiffVersion>,
}

impl DiffVersionCache {
    pub(crate) fn new(client: GitlabApiClient, project_id: u64, iid: u64) -> Self {
        Self {
            client,
            project_id,
            iid,
            cell: OnceCell::new(),
        }
    }

    pub(crate) async fn resolve(&self) -> Result<&DiffVersion> {
        self.cell
            .get_or_try_init(|| async {
                let version = self
                    .client
                    .latest_merge_request_version(self.project_id, self.iid)
                    .await?
                    .ok_or_else(|| {
                        anyhow!(
                            "merge request {}!{} has no diff versions",
                            self.project_id,
                            self.iid
                        )
                    })?;
                Ok::<_, anyhow::Error>(DiffVersion {
                    base_sha: version.base_commit_sha,
                    start_sha: version.start_commit_sha,
                    head_sha: version.head_commit_sha,
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::DiffVersionCache;
    use crate::mention_runtime::gitlab_api_client::GitlabApiClient;

    #[tokio::test]
    async fn functional_resolve_fetches_versions_once_per_pass() {
        let server = MockServer::start();
        let versions = server.mock(|when, then| {
            when.method(GET).path("/projects/7/merge_requests/2/versions");
            then.status(200).json_body(json!([{
                "base_commit_sha": "base",
                "start_commit_sha": "start",
                "head_commit_sha": "head"
            }]));
        });
        let client = GitlabApiClient::new(server.base_url(), "t".to_string(), 2_000, 1, 1)
            .expect("client");
        let cache = DiffVersionCache::new(client, 7, 2);
        let first = cache.resolve().await.expect("first").clone();
        let second = cache.resolve().await.expect("second").clone();
        assert_eq!(first, second);
        assert_eq!(first.head_sha, "head");
        assert_eq!(versions.calls(), 1);
    }

    #[tokio::test]
    async fn regression_resolve_errors_on_empty_version_list() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/projects/7/merge_requests/2/versions");
            then.status(200).json_body(json!([]));
        });
        let client = GitlabApiClient::new(server.base_url(), "t".to_string(), 2_000, 1, 1)
            .expect("client");
        let error = DiffVersionCache::new(client, 7, 2)
            .resolve()
            .await
            .expect_err("no versions");
        assert!(error.to_string().contains("no diff versions"));
    }
}
