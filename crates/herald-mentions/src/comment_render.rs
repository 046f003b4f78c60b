//! Rendering of findings into platform comment bodies and positioned descriptors.

use serde::{Deserialize, Serialize};

use crate::finding::Finding;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Commit triple identifying one diff version of a merge request.
pub struct DiffVersion {
    pub base_sha: String,
    pub start_sha: String,
    pub head_sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Anchor for an inline comment on a specific diff version.
pub struct DiffCoordinate {
    pub base_sha: String,
    pub start_sha: String,
    pub head_sha: String,
    pub path: String,
    pub line: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentDescriptor {
    pub body: String,
    pub position: Option<DiffCoordinate>,
}

/// Renders the one-click-apply suggestion block.
///
/// The header must be exactly `suggestion:-{above}+{below}`; an empty payload
/// closes the fence immediately, which replaces the anchored lines with nothing.
pub fn render_suggestion_block(code: &str, lines_above: u32, lines_below: u32) -> String {
    let header = format!("```suggestion:-{lines_above}+{lines_below}");
    if code.is_empty() {
        return format!("{header}\n```");
    }
    let payload = code.strip_suffix('\n').unwrap_or(code);
    format!("{header}\n{payload}\n```")
}

fn severity_prefix(finding: &Finding) -> String {
    format!("**{}**: {}", finding.severity.label(), finding.comment.trim())
}

/// Builds the GitLab comment for one finding.
///
/// A position is produced only when the finding names both file and line and a
/// diff version is available; otherwise the body is thread-level and mentions
/// whatever location the finding carries.
pub fn build_comment(finding: &Finding, version: Option<&DiffVersion>) -> CommentDescriptor {
    let position = match (finding.file.as_deref(), finding.line, version) {
        (Some(file), Some(line), Some(version)) if !file.is_empty() => Some(DiffCoordinate {
            base_sha: version.base_sha.clone(),
            start_sha: version.start_sha.clone(),
            head_sha: version.head_sha.clone(),
            path: file.to_string(),
            line,
        }),
        _ => None,
    };

    let mut body = severity_prefix(finding);
    if position.is_none() {
        if let Some(location) = render_location(finding) {
            body = format!("`{location}`\n\n{body}");
        }
    }
    if let Some(code) = finding.suggested_code.as_deref() {
        body.push_str("\n\n");
        body.push_str(&render_suggestion_block(
            code,
            finding.lines_above.unwrap_or(0),
            finding.lines_below.unwrap_or(0),
        ));
    }
    CommentDescriptor { body, position }
}

/// Builds the thread-level fallback used when an inline position is rejected.
pub fn build_unpositioned_comment(finding: &Finding) -> CommentDescriptor {
    build_comment(finding, None)
}

fn render_location(finding: &Finding) -> Option<String> {
    let file = finding.file.as_deref().filter(|file| !file.is_empty())?;
    Some(match finding.line {
        Some(line) => format!("{file}:{line}"),
        None => file.to_string(),
    })
}

/// Renders a finding with Jira wiki markup.
pub fn render_jira_finding(finding: &Finding) -> String {
    let mut body = format!("*{}*: {}", finding.severity.label(), finding.comment.trim());
    if let Some(location) = render_location(finding) {
        body = format!("{{{{{location}}}}}\n{body}");
    }
    if let Some(code) = finding.suggested_code.as_deref() {
        if code.is_empty() {
            body.push_str("\n\nSuggested change: remove the referenced lines.");
        } else {
            body.push_str("\n\n{code}\n");
            body.push_str(code.strip_suffix('\n').unwrap_or(code));
            body.push_str("\n{code}");
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::{
        build_comment, build_unpositioned_comment, render_jira_finding, render_suggestion_block,
        DiffVersion,
    };
    use crate::finding::{Finding, Severity};

    fn version() -> DiffVersion {
        DiffVersion {
            base_sha: "base1".to_string(),
            start_sha: "start1".to_string(),
            head_sha: "head1".to_string(),
        }
    }

    fn finding() -> Finding {
        Finding {
            severity: Severity::Warning,
            file: Some("src/main.rs".to_string()),
            line: Some(40),
            comment: "Unused import.".to_string(),
            suggested_code: None,
            lines_above: None,
            lines_below: None,
        }
    }

    #[test]
    fn unit_render_suggestion_block_encodes_context_header() {
        assert_eq!(
            render_suggestion_block("let x = 1;\n", 2, 0),
            "```suggestion:-2+0\nlet x = 1;\n```"
        );
    }

    #[test]
    fn functional_build_comment_empty_suggestion_renders_deletion_block() {
        let finding = Finding {
            suggested_code: Some(String::new()),
            lines_above: Some(1),
            lines_below: Some(1),
            ..finding()
        };
        let descriptor = build_comment(&finding, Some(&version()));
        assert!(descriptor.body.contains("```suggestion:-1+1\n```"));
        let block_start = descriptor.body.find("```suggestion").expect("block");
        let payload = descriptor.body[block_start..]
            .lines()
            .skip(1)
            .take_while(|line| *line != "```")
            .collect::<Vec<_>>();
        assert!(payload.is_empty());
    }

    #[test]
    fn functional_build_comment_positions_when_file_line_and_version_present() {
        let descriptor = build_comment(&finding(), Some(&version()));
        let position = descriptor.position.expect("position");
        assert_eq!(position.base_sha, "base1");
        assert_eq!(position.start_sha, "start1");
        assert_eq!(position.head_sha, "head1");
        assert_eq!(position.path, "src/main.rs");
        assert_eq!(position.line, 40);
        assert_eq!(descriptor.body, "**Warning**: Unused import.");
    }

    #[test]
    fn integration_build_comment_mentions_file_when_line_missing() {
        let finding = Finding {
            line: None,
            ..finding()
        };
        let descriptor = build_comment(&finding, Some(&version()));
        assert!(descriptor.position.is_none());
        assert!(descriptor.body.starts_with("`src/main.rs`\n\n**Warning**"));
    }

    #[test]
    fn integration_build_comment_defaults_missing_context_to_zero() {
        let finding = Finding {
            suggested_code: Some("use std::fmt;".to_string()),
            ..finding()
        };
        let descriptor = build_comment(&finding, Some(&version()));
        assert!(descriptor
            .body
            .ends_with("```suggestion:-0+0\nuse std::fmt;\n```"));
    }

    #[test]
    fn regression_build_unpositioned_comment_keeps_file_and_line_in_body() {
        let descriptor = build_unpositioned_comment(&finding());
        assert!(descriptor.position.is_none());
        assert!(descriptor.body.starts_with("`src/main.rs:40`"));
    }

    #[test]
    fn unit_render_jira_finding_uses_wiki_markup() {
        let finding = Finding {
            suggested_code: Some("return None;".to_string()),
            ..finding()
        };
        let body = render_jira_finding(&finding);
        assert!(body.starts_with("{{src/main.rs:40}}\n*Warning*: Unused import."));
        assert!(body.ends_with("{code}\nreturn None;\n{code}"));
    }
}
