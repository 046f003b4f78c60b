use crate::finding::FINDING_TOOL_NAME;
use crate::intent::Intent;

/// Context rendered into the prompt of one agent session.
pub struct SessionPromptView<'a> {
    pub intent: Intent,
    pub resource_label: &'a str,
    pub title: &'a str,
    pub requester: &'a str,
    pub request: &'a str,
    pub base_ref: Option<&'a str>,
}

/// One rejected tool call reported back to the agent.
pub struct ToolRejectionView<'a> {
    pub call_id: &'a str,
    pub reason: &'a str,
}

fn intent_instructions(intent: Intent, base_ref: Option<&str>) -> String {
    match intent {
        Intent::Review => format!(
            "Review the changes of this merge request{}. Call the `{FINDING_TOOL_NAME}` tool once for every finding. Use file paths relative to the repository root and line numbers of the new file. Include `suggestedCode` for every finding that is not praise; an empty string removes the referenced lines. Finish with a short overall summary.",
            base_ref
                .map(|base| format!(" against `{base}`"))
                .unwrap_or_default()
        ),
        Intent::WriteTests => "Write or extend tests covering the changed code in the working tree. Follow the conventions of the existing test suite and do not commit; the changes are published for you. Finish with a summary of the tests you added.".to_string(),
        Intent::Analyze => format!(
            "Investigate the codebase to answer the request. Report concrete observations through the `{FINDING_TOOL_NAME}` tool where they point at specific code, then finish with a concise analysis."
        ),
        Intent::FixAndPropose => "Implement a fix for the issue in the working tree. Keep the change focused, do not commit; the changes are proposed for you. Finish with a summary of what you changed and why.".to_string(),
        Intent::GeneralQuestion => "Answer the request using the repository as context. Reply in a form suitable for a comment.".to_string(),
    }
}

/// Renders the prompt sent to the agent session for one mention.
pub fn render_session_prompt(view: &SessionPromptView<'_>) -> String {
    format!(
        "You are Herald, an automated engineer working in a cloned repository.\nResource: {}\nTitle: {}\nRequested by: {}\nIntent: {}\n\nRequest:\n{}\n\n{}",
        view.resource_label,
        view.title,
        view.requester,
        view.intent.keyword(),
        view.request.trim(),
        intent_instructions(view.intent, view.base_ref)
    )
}

/// Renders the follow-up prompt listing malformed tool calls.
pub fn render_tool_rejection_prompt(rejections: &[ToolRejectionView<'_>]) -> String {
    let mut prompt = format!(
        "Some `{FINDING_TOOL_NAME}` calls were rejected and nothing was posted for them. Call the tool again with corrected arguments for each:\n"
    );
    for rejection in rejections {
        prompt.push_str(&format!("- call `{}`: {}\n", rejection.call_id, rejection.reason));
    }
    prompt
}

/// Fallback body when a session produced no text.
pub fn response_or_placeholder(response: &str) -> String {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        "I couldn't generate a textual response for this request.".to_string()
    } else {
        trimmed.to_string()
    }
}
