//! Mention runtime for Herald: polls GitLab and Jira for messages addressed to
//! the bot and drives one agent session per admitted mention.

mod mention_runtime;

pub use mention_runtime::{
    run_mention_runtime, GitCliProvisioner, GitlabSettings, JiraSettings, MentionRuntimeConfig,
    PublishOutcome, RuntimeState, Workspace, WorkspaceProvisioner, WorkspaceRequest,
};
