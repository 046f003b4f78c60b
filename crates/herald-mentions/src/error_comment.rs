use crate::transport_helpers::truncate_for_error;

/// Render the single comment posted when a mention workflow fails.
pub fn render_run_error_comment(message_id: &str, run_id: &str, error_message: &str) -> String {
    format!(
        "Sorry, I couldn't finish this request.\n\nError: `{}`\n\n_Herald run `{}` | message `{}` | status `failed`_",
        truncate_for_error(error_message.trim(), 600),
        run_id,
        message_id
    )
}

/// Render the informational reply for a Jira project without a linked repository.
pub fn render_unlinked_project_comment(project_key: &str) -> String {
    format!(
        "Jira project `{project_key}` is not linked to a repository, so I can't look at the code for this issue. Ask an operator to add a project link for `{project_key}`."
    )
}

#[cfg(test)]
mod tests {
    use super::{render_run_error_comment, render_unlinked_project_comment};

    #[test]
    fn unit_render_run_error_comment_includes_core_identifiers() {
        let rendered = render_run_error_comment("gitlab-todo:9", "run-1", "session exploded");
        assert!(rendered.contains("Error: `session exploded`"));
        assert!(rendered.contains("run `run-1`"));
        assert!(rendered.contains("message `gitlab-todo:9`"));
    }

    #[test]
    fn integration_render_run_error_comment_truncates_large_errors() {
        let rendered = render_run_error_comment("m", "r", &"x".repeat(2_000));
        assert!(rendered.contains("..."));
        assert!(rendered.len() < 1_000);
    }

    #[test]
    fn regression_render_unlinked_project_comment_names_project_twice() {
        let rendered = render_unlinked_project_comment("OPS");
        assert_eq!(rendered.matches("`OPS`").count(), 2);
    }
}
