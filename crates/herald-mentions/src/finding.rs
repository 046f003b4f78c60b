//! Structured reviewer findings emitted through the `post_finding` tool.

use std::fmt;

use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Name of the tool the agent calls once per finding.
pub const FINDING_TOOL_NAME: &str = "post_finding";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Suggestion,
    Praise,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Suggestion => "suggestion",
            Self::Praise => "praise",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::Warning => "Warning",
            Self::Suggestion => "Suggestion",
            Self::Praise => "Praise",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
/// One reviewer observation.
///
/// `suggested_code` distinguishes absent (`None`) from an empty replacement
/// (`Some("")`), which deletes the anchored lines.
pub struct Finding {
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_above: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_below: Option<u32>,
}

impl Finding {
    /// True when the finding can be anchored to a diff line.
    pub fn is_positionable(&self) -> bool {
        self.file.as_deref().is_some_and(|file| !file.is_empty()) && self.line.is_some()
    }

    /// Non-praise findings are expected to carry a suggestion.
    pub fn missing_suggestion(&self) -> bool {
        self.severity != Severity::Praise && self.suggested_code.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Rejection of a malformed `post_finding` payload.
pub enum ToolArgumentError {
    #[error("arguments are not valid JSON: {0}")]
    InvalidJson(String),
    #[error("arguments failed schema validation: {0}")]
    Schema(String),
    #[error("arguments could not be decoded: {0}")]
    Decode(String),
    #[error("comment must not be blank")]
    BlankComment,
}

/// JSON schema advertised for the `post_finding` tool.
pub fn finding_tool_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["severity", "comment"],
        "properties": {
            "severity": {
                "type": "string",
                "enum": ["critical", "warning", "suggestion", "praise"]
            },
            "file": { "type": "string", "minLength": 1 },
            "line": { "type": "integer", "minimum": 1 },
            "comment": { "type": "string", "minLength": 1 },
            "suggestedCode": { "type": "string" },
            "linesAbove": { "type": "integer", "minimum": 0 },
            "linesBelow": { "type": "integer", "minimum": 0 }
        }
    })
}

/// Validates loosely-typed tool arguments and decodes them into a [`Finding`].
///
/// Arguments delivered as a JSON-encoded string are parsed first.
pub fn parse_finding_arguments(arguments: &Value) -> Result<Finding, ToolArgumentError> {
    let decoded;
    let arguments = match arguments {
        Value::String(raw) => {
            decoded = serde_json::from_str::<Value>(raw)
                .map_err(|error| ToolArgumentError::InvalidJson(error.to_string()))?;
            &decoded
        }
        other => other,
    };

    let schema = finding_tool_schema();
    let validator = validator_for(&schema)
        .map_err(|error| ToolArgumentError::Schema(format!("invalid finding schema: {error}")))?;
    if let Some(first) = validator.iter_errors(arguments).next() {
        return Err(ToolArgumentError::Schema(first.to_string()));
    }

    let finding = serde_json::from_value::<Finding>(arguments.clone())
        .map_err(|error| ToolArgumentError::Decode(error.to_string()))?;
    if finding.comment.trim().is_empty() {
        return Err(ToolArgumentError::BlankComment);
    }
    Ok(finding)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_finding_arguments, Severity, ToolArgumentError};

    #[test]
    fn unit_parse_finding_arguments_decodes_minimal_payload() {
        let finding = parse_finding_arguments(&json!({
            "severity": "praise",
            "comment": "Nice cleanup."
        }))
        .expect("finding");
        assert_eq!(finding.severity, Severity::Praise);
        assert!(finding.file.is_none());
        assert!(!finding.is_positionable());
        assert!(!finding.missing_suggestion());
    }

    #[test]
    fn functional_parse_finding_arguments_keeps_empty_suggestion_distinct() {
        let finding = parse_finding_arguments(&json!({
            "severity": "warning",
            "file": "src/lib.rs",
            "line": 12,
            "comment": "Dead code.",
            "suggestedCode": "",
            "linesAbove": 1,
            "linesBelow": 1
        }))
        .expect("finding");
        assert_eq!(finding.suggested_code.as_deref(), Some(""));
        assert_eq!(finding.lines_above, Some(1));
        assert!(finding.is_positionable());
        assert!(!finding.missing_suggestion());
    }

    #[test]
    fn integration_parse_finding_arguments_accepts_json_encoded_string() {
        let raw = json!(r#"{"severity":"critical","comment":"Overflow","file":"a.rs","line":3}"#);
        let finding = parse_finding_arguments(&raw).expect("finding");
        assert_eq!(finding.severity, Severity::Critical);
        assert!(finding.missing_suggestion());
    }

    #[test]
    fn regression_parse_finding_arguments_rejects_schema_violations() {
        let unknown_severity = parse_finding_arguments(&json!({
            "severity": "nit",
            "comment": "x"
        }));
        assert!(matches!(unknown_severity, Err(ToolArgumentError::Schema(_))));

        let negative_context = parse_finding_arguments(&json!({
            "severity": "warning",
            "comment": "x",
            "linesAbove": -1
        }));
        assert!(matches!(negative_context, Err(ToolArgumentError::Schema(_))));

        let extra_field = parse_finding_arguments(&json!({
            "severity": "warning",
            "comment": "x",
            "path": "src/lib.rs"
        }));
        assert!(matches!(extra_field, Err(ToolArgumentError::Schema(_))));
    }

    #[test]
    fn regression_parse_finding_arguments_rejects_blank_comment_and_bad_json() {
        let blank = parse_finding_arguments(&json!({
            "severity": "warning",
            "comment": "   "
        }));
        assert_eq!(blank, Err(ToolArgumentError::BlankComment));

        let garbage = parse_finding_arguments(&json!("{not json"));
        assert!(matches!(garbage, Err(ToolArgumentError::InvalidJson(_))));
    }
}
