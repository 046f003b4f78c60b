use std::fmt;

use serde::{Deserialize, Serialize};

use crate::work_item::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Closed set of actions a mention can request.
///
/// Each platform exposes a subset through [`Platform::intent_set`].
pub enum Intent {
    Review,
    WriteTests,
    Analyze,
    FixAndPropose,
    GeneralQuestion,
}

impl Intent {
    /// Keyword the classifier response is searched for.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::WriteTests => "write_tests",
            Self::Analyze => "analyze",
            Self::FixAndPropose => "fix_and_propose",
            Self::GeneralQuestion => "question",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::Review => "review the merge request diff and leave findings",
            Self::WriteTests => "write or extend tests for the changed code",
            Self::Analyze => "investigate the codebase and explain the cause or impact",
            Self::FixAndPropose => "change the code and propose the fix as a merge request",
            Self::GeneralQuestion => "answer a question or anything else",
        }
    }

    /// True for intents whose session edits the working tree.
    pub fn produces_changes(self) -> bool {
        matches!(self, Self::WriteTests | Self::FixAndPropose)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Maps a raw classifier response onto the platform intent set.
///
/// The first intent in declaration order whose keyword appears in the lowercased
/// response wins; anything else resolves to the platform default.
pub fn resolve_intent(raw_response: &str, platform: Platform) -> Intent {
    let normalized = raw_response.trim().to_ascii_lowercase();
    platform
        .intent_set()
        .iter()
        .copied()
        .find(|intent| normalized.contains(intent.keyword()))
        .unwrap_or_else(|| platform.default_intent())
}

fn few_shot_examples(platform: Platform) -> &'static [(&'static str, Intent)] {
    match platform {
        Platform::Gitlab => &[
            ("@bot can you take a look at this MR?", Intent::Review),
            ("@bot please add unit tests for the parser", Intent::WriteTests),
            ("@bot why is this function async?", Intent::GeneralQuestion),
        ],
        Platform::Jira => &[
            ("[~bot] what is causing this timeout?", Intent::Analyze),
            ("[~bot] please fix this and open an MR", Intent::FixAndPropose),
            ("[~bot] which team owns this service?", Intent::GeneralQuestion),
        ],
    }
}

/// Builds the single-shot classification prompt for one mention.
pub fn build_classification_prompt(text: &str, platform: Platform) -> String {
    let mut prompt = format!(
        "Classify the intent of a {} mention. Reply with exactly one label.\n\nLabels:\n",
        platform.as_str()
    );
    for intent in platform.intent_set() {
        prompt.push_str(&format!("- {}: {}\n", intent.keyword(), intent.description()));
    }
    prompt.push_str("\nExamples:\n");
    for (example, intent) in few_shot_examples(platform) {
        prompt.push_str(&format!("Message: {example}\nLabel: {}\n", intent.keyword()));
    }
    prompt.push_str(&format!("\nMessage: {}\nLabel:", text.trim()));
    prompt
}
