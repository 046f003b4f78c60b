//! Candidate work-item discovery across both platforms.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use herald_mentions::work_item::{gitlab_message_id, jira_message_id, jira_project_key};
use herald_mentions::{Platform, ResourceRef, WorkItem};
use tracing::{debug, warn};

use super::gitlab_api_client::{GitlabApiClient, GitlabTodo};
use super::jira_api_client::{jira_mention, parse_jira_timestamp, JiraApiClient, JiraComment};

#[derive(Clone)]
pub(crate) struct GitlabSource {
    pub(crate) client: GitlabApiClient,
    pub(crate) bot_username: String,
}

#[derive(Clone)]
pub(crate) struct JiraSource {
    pub(crate) client: JiraApiClient,
    pub(crate) bot_account_id: String,
}

#[derive(Debug, Default)]
pub(crate) struct ScanOutcome {
    pub(crate) items: Vec<WorkItem>,
    pub(crate) failed_platforms: Vec<Platform>,
}

/// Extracts the note id from a to-do target url such as `.../merge_requests/4#note_991`.
pub(crate) fn note_id_from_target_url(target_url: &str) -> Option<String> {
    let (_, fragment) = target_url.rsplit_once("#note_")?;
    let digits = fragment
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect::<String>();
    (!digits.is_empty()).then_some(digits)
}

fn window_minutes(window: Duration) -> u64 {
    window.as_secs().div_ceil(60).max(1)
}

/// Converts pending GitLab to-dos into work items, dropping self-authored and stale ones.
pub(crate) fn gitlab_work_items(
    todos: Vec<GitlabTodo>,
    bot_username: &str,
    window_start: DateTime<Utc>,
) -> Vec<WorkItem> {
    let mut items = Vec::new();
    for todo in todos {
        if todo.author.username.eq_ignore_ascii_case(bot_username) {
            debug!(todo_id = todo.id, "skipping self-authored gitlab mention");
            continue;
        }
        if let Ok(created_at) = DateTime::parse_from_rfc3339(&todo.created_at) {
            if created_at.with_timezone(&Utc) < window_start {
                debug!(todo_id = todo.id, "skipping gitlab mention outside scan window");
                continue;
            }
        }
        items.push(WorkItem {
            platform: Platform::Gitlab,
            resource: ResourceRef::MergeRequest {
                project_id: todo.target.project_id,
                iid: todo.target.iid,
            },
            triggering_message_id: gitlab_message_id(todo.id),
            author_id: todo.author.username,
            body: todo.body,
            created_at: todo.created_at,
            thread_hint: todo
                .target_url
                .as_deref()
                .and_then(note_id_from_target_url),
        });
    }
    items
}

/// Converts the comments of one Jira issue into work items for those addressing the bot.
pub(crate) fn jira_work_items(
    issue_key: &str,
    comments: Vec<JiraComment>,
    bot_account_id: &str,
    window_start: DateTime<Utc>,
) -> Vec<WorkItem> {
    let mention = jira_mention(bot_account_id);
    let mut items = Vec::new();
    for comment in comments {
        if comment.author.account_id == bot_account_id {
            continue;
        }
        if !comment.body.contains(&mention) {
            continue;
        }
        match parse_jira_timestamp(&comment.created) {
            Some(created_at) if created_at >= window_start => {}
            _ => continue,
        }
        items.push(WorkItem {
            platform: Platform::Jira,
            resource: ResourceRef::Issue {
                project_key: jira_project_key(issue_key),
                key: issue_key.to_string(),
            },
            triggering_message_id: jira_message_id(issue_key, &comment.id),
            author_id: comment.author.account_id,
            body: comment.body,
            created_at: comment.created,
            thread_hint: Some(comment.id),
        });
    }
    items
}

pub(crate) struct MentionScanner {
    gitlab: Option<GitlabSource>,
    jira: Option<JiraSource>,
}

impl MentionScanner {
    pub(crate) fn new(gitlab: Option<GitlabSource>, jira: Option<JiraSource>) -> Self {
        Self { gitlab, jira }
    }

    async fn scan_gitlab(source: &GitlabSource, window_start: DateTime<Utc>) -> Result<Vec<WorkItem>> {
        let todos = source.client.list_pending_mention_todos().await?;
        Ok(gitlab_work_items(todos, &source.bot_username, window_start))
    }

    async fn scan_jira(
        source: &JiraSource,
        window: Duration,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<WorkItem>> {
        let issues = source
            .client
            .search_mentioned_issues(&source.bot_account_id, window_minutes(window))
            .await?;
        let mut items = Vec::new();
        for issue in issues {
            let comments = source.client.list_comments(&issue.key).await?;
            items.extend(jira_work_items(
                &issue.key,
                comments,
                &source.bot_account_id,
                window_start,
            ));
        }
        Ok(items)
    }

    /// Lists candidate work items; a failing platform contributes nothing this cycle.
    pub(crate) async fn scan(&self, window: Duration) -> ScanOutcome {
        let window_start = Utc::now()
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        let mut outcome = ScanOutcome::default();

        if let Some(source) = self.gitlab.as_ref() {
            match Self::scan_gitlab(source, window_start).await {
                Ok(items) => outcome.items.extend(items),
                Err(error) => {
                    warn!(platform = "gitlab", error = %format!("{error:#}"), "mention scan failed");
                    outcome.failed_platforms.push(Platform::Gitlab);
                }
            }
        }
        if let Some(source) = self.jira.as_ref() {
            match Self::scan_jira(source, window, window_start).await {
                Ok(items) => outcome.items.extend(items),
                Err(error) => {
                    warn!(platform = "jira", error = %format!("{error:#}"), "mention scan failed");
                    outcome.failed_platforms.push(Platform::Jira);
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{gitlab_work_items, jira_work_items, note_id_from_target_url, window_minutes};
    use crate::mention_runtime::gitlab_api_client::GitlabTodo;
    use crate::mention_runtime::jira_api_client::JiraComment;
    use herald_mentions::{Platform, ResourceRef};

    fn todo(id: u64, author: &str, created_at: &str) -> GitlabTodo {
        serde_json::from_value(json!({
            "id": id,
            "author": { "id": 1, "username": author },
            "body": "@herald review please",
            "created_at": created_at,
            "target_type": "MergeRequest",
            "target_url": format!("https://gitlab.example/g/app/-/merge_requests/4#note_{}", id * 10),
            "target": { "iid": 4, "project_id": 12 }
        }))
        .expect("todo")
    }

    fn comment(id: &str, account_id: &str, body: &str, created: &str) -> JiraComment {
        serde_json::from_value(json!({
            "id": id,
            "author": { "accountId": account_id },
            "body": body,
            "created": created
        }))
        .expect("comment")
    }

    #[test]
    fn unit_note_id_from_target_url_reads_fragment() {
        assert_eq!(
            note_id_from_target_url("https://g/x/-/merge_requests/1#note_552").as_deref(),
            Some("552")
        );
        assert_eq!(note_id_from_target_url("https://g/x/-/merge_requests/1"), None);
        assert_eq!(window_minutes(Duration::from_secs(61)), 2);
        assert_eq!(window_minutes(Duration::from_secs(0)), 1);
    }

    #[test]
    fn functional_gitlab_work_items_drop_bot_authored_and_stale_todos() {
        let window_start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single().expect("ts");
        let items = gitlab_work_items(
            vec![
                todo(1, "alice", "2026-03-01T10:05:00Z"),
                todo(2, "Herald-Bot", "2026-03-01T10:06:00Z"),
                todo(3, "bob", "2026-03-01T09:00:00Z"),
            ],
            "herald-bot",
            window_start,
        );
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.triggering_message_id, "gitlab-todo:1");
        assert_eq!(item.resource_id(), "gitlab:12!4");
        assert_eq!(item.thread_hint.as_deref(), Some("10"));
        assert_eq!(item.platform, Platform::Gitlab);
    }

    #[test]
    fn integration_jira_work_items_require_mention_and_window() {
        let window_start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single().expect("ts");
        let items = jira_work_items(
            "OPS-7",
            vec![
                comment("1", "u-1", "[~accountid:bot-1] analyze this", "2026-03-01T10:01:00.000+0000"),
                comment("2", "u-1", "no mention here", "2026-03-01T10:02:00.000+0000"),
                comment("3", "bot-1", "[~accountid:bot-1] self", "2026-03-01T10:03:00.000+0000"),
                comment("4", "u-2", "[~accountid:bot-1] old", "2026-03-01T09:59:59.000+0000"),
            ],
            "bot-1",
            window_start,
        );
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].triggering_message_id, "jira-comment:OPS-7:1");
        assert_eq!(
            items[0].resource,
            ResourceRef::Issue {
                project_key: "OPS".to_string(),
                key: "OPS-7".to_string()
            }
        );
    }
}
