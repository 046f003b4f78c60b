use std::fmt;

use serde::{Deserialize, Serialize};

use crate::intent::Intent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Platforms a mention can arrive from.
pub enum Platform {
    Gitlab,
    Jira,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gitlab => "gitlab",
            Self::Jira => "jira",
        }
    }

    /// Closed intent set for this platform, in tie-break order.
    pub fn intent_set(self) -> &'static [Intent] {
        match self {
            Self::Gitlab => &[Intent::Review, Intent::WriteTests, Intent::GeneralQuestion],
            Self::Jira => &[
                Intent::Analyze,
                Intent::FixAndPropose,
                Intent::GeneralQuestion,
            ],
        }
    }

    pub fn default_intent(self) -> Intent {
        Intent::GeneralQuestion
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Coordinates of the resource a mention was made on.
pub enum ResourceRef {
    MergeRequest { project_id: u64, iid: u64 },
    Issue { project_key: String, key: String },
}

impl ResourceRef {
    pub fn platform(&self) -> Platform {
        match self {
            Self::MergeRequest { .. } => Platform::Gitlab,
            Self::Issue { .. } => Platform::Jira,
        }
    }

    /// Stable id used by the exclusion guard and in logs.
    pub fn resource_id(&self) -> String {
        match self {
            Self::MergeRequest { project_id, iid } => format!("gitlab:{project_id}!{iid}"),
            Self::Issue { key, .. } => format!("jira:{key}"),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One detected mention that requires processing.
pub struct WorkItem {
    pub platform: Platform,
    pub resource: ResourceRef,
    pub triggering_message_id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: String,
    /// Platform id of the message to reply under (GitLab note id, Jira comment id).
    #[serde(default)]
    pub thread_hint: Option<String>,
}

impl WorkItem {
    pub fn resource_id(&self) -> String {
        self.resource.resource_id()
    }
}

pub fn gitlab_message_id(todo_id: u64) -> String {
    format!("gitlab-todo:{todo_id}")
}

pub fn jira_message_id(issue_key: &str, comment_id: &str) -> String {
    format!("jira-comment:{issue_key}:{comment_id}")
}

/// Parses the numeric to-do id back out of a GitLab message id.
pub fn gitlab_todo_id(message_id: &str) -> Option<u64> {
    message_id
        .strip_prefix("gitlab-todo:")
        .and_then(|raw| raw.parse::<u64>().ok())
}

/// Returns the project key portion of a Jira issue key (`ABC-12` -> `ABC`).
pub fn jira_project_key(issue_key: &str) -> String {
    issue_key
        .rsplit_once('-')
        .map(|(project, _)| project)
        .unwrap_or(issue_key)
        .to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::{gitlab_message_id, gitlab_todo_id, jira_project_key, Platform, ResourceRef};
    use crate::intent::Intent;

    #[test]
    fn unit_resource_id_is_platform_scoped() {
        let merge_request = ResourceRef::MergeRequest {
            project_id: 12,
            iid: 7,
        };
        let issue = ResourceRef::Issue {
            project_key: "OPS".to_string(),
            key: "OPS-44".to_string(),
        };
        assert_eq!(merge_request.resource_id(), "gitlab:12!7");
        assert_eq!(issue.resource_id(), "jira:OPS-44");
        assert_eq!(issue.platform(), Platform::Jira);
    }

    #[test]
    fn functional_gitlab_message_id_round_trips_todo_id() {
        assert_eq!(gitlab_todo_id(&gitlab_message_id(991)), Some(991));
        assert_eq!(gitlab_todo_id("jira-comment:A-1:2"), None);
    }

    #[test]
    fn integration_intent_sets_end_with_shared_default() {
        for platform in [Platform::Gitlab, Platform::Jira] {
            let set = platform.intent_set();
            assert_eq!(set.last(), Some(&Intent::GeneralQuestion));
            assert!(set.contains(&platform.default_intent()));
        }
    }

    #[test]
    fn regression_jira_project_key_handles_multi_dash_keys() {
        assert_eq!(jira_project_key("ops-12"), "OPS");
        assert_eq!(jira_project_key("DATA-PLAT-3"), "DATA-PLAT");
        assert_eq!(jira_project_key("NOKEY"), "NOKEY");
    }
}
