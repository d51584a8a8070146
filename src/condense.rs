//! Follow-up question condensation.
//!
//! Retrieval only sees a single query string, so a follow-up such as "any
//! shorter ones?" is first rewritten into a standalone question using the
//! conversation so far.

use tracing::debug;

use crate::completion::{CompletionModel, CompletionOptions};
use crate::error::Result;
use crate::models::ConversationHistory;

/// Build the condensation prompt for a non-empty history.
pub fn condense_prompt(history: &ConversationHistory, input: &str) -> String {
    format!(
        "Given the following conversation and a follow up question, rephrase the follow up question to be a standalone question.\n\n\
         Chat History:\n{}\n\
         Follow Up Input: {}\n\
         Standalone question:",
        history.render(),
        input
    )
}

/// Rewrite `input` into a standalone query.
///
/// With no prior turns the input is returned as-is and the model is never
/// called. Otherwise the model output is returned unmodified.
pub async fn condense(
    model: &dyn CompletionModel,
    history: &ConversationHistory,
    input: &str,
    options: &CompletionOptions,
) -> Result<String> {
    if history.is_empty() {
        return Ok(input.to_string());
    }

    let query = model
        .complete(&condense_prompt(history, input), options)
        .await?;
    debug!(turns = history.len(), %query, "condensed follow-up");
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::models::Turn;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingModel {
        reply: std::result::Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl RecordingModel {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionModel for RecordingModel {
        fn model_name(&self) -> &str {
            "recording"
        }

        async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(PipelineError::Completion)
        }
    }

    fn history() -> ConversationHistory {
        let mut history = ConversationHistory::new();
        history.push(Turn {
            input: "something with mechs".to_string(),
            answer: "Try Gurren Lagann.".to_string(),
        });
        history.push(Turn {
            input: "older?".to_string(),
            answer: "Mobile Suit Gundam.".to_string(),
        });
        history
    }

    #[tokio::test]
    async fn empty_history_skips_the_model() {
        let model = RecordingModel::replying("unused");
        let options = CompletionOptions::deterministic(1);
        let query = condense(&model, &ConversationHistory::new(), "a cozy slice of life", &options)
            .await
            .unwrap();
        assert_eq!(query, "a cozy slice of life");
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn returns_model_output_unmodified() {
        let model = RecordingModel::replying("  Which older mecha anime are short?\n");
        let query = condense(
            &model,
            &history(),
            "shorter ones?",
            &CompletionOptions::deterministic(1),
        )
        .await
        .unwrap();
        assert_eq!(query, "  Which older mecha anime are short?\n");
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }

    #[test]
    fn prompt_lists_turns_in_order() {
        let prompt = condense_prompt(&history(), "shorter ones?");
        assert!(prompt.starts_with("Given the following conversation and a follow up question"));
        assert!(prompt.contains(
            "Chat History:\nUser: something with mechs\nBot: Try Gurren Lagann.\nUser: older?\nBot: Mobile Suit Gundam.\n"
        ));
        assert!(prompt.ends_with("Follow Up Input: shorter ones?\nStandalone question:"));
    }

    #[tokio::test]
    async fn completion_failure_propagates() {
        let model = RecordingModel {
            reply: Err("rate limited".to_string()),
            prompts: Mutex::new(Vec::new()),
        };
        let err = condense(&model, &history(), "x", &CompletionOptions::deterministic(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Completion(_)));
    }
}
