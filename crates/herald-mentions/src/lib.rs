//! Shared domain helpers for Herald mention handling.
//! This crate provides the work-item model, intent resolution, finding
//! validation, and comment rendering consumed by the runtime crate.

pub mod comment_render;
pub mod error_comment;
pub mod finding;
pub mod intent;
pub mod prompt_helpers;
pub mod transport_helpers;
pub mod work_item;

pub use comment_render::{
    build_comment, build_unpositioned_comment, render_jira_finding, render_suggestion_block,
    CommentDescriptor, DiffCoordinate, DiffVersion,
};
pub use finding::{
    finding_tool_schema, parse_finding_arguments, Finding, Severity, ToolArgumentError,
    FINDING_TOOL_NAME,
};
pub use intent::{build_classification_prompt, resolve_intent, Intent};
pub use work_item::{Platform, ResourceRef, WorkItem};
