//! Grounded answer generation.
//!
//! The model is told to recommend only from the retrieved candidates and to
//! answer with [`REFUSAL_SENTENCE`] when none of them fits. Whether it obeys
//! is left to the model; [`is_refusal`] exists for logging only.

use tracing::debug;

use crate::completion::{CompletionModel, CompletionOptions};
use crate::error::Result;
use crate::models::RetrievalResult;

/// The fixed sentence the model is instructed to use when it cannot help.
pub const REFUSAL_SENTENCE: &str = "I'm sorry, I'm not able to respond to your request";

/// Build the answer prompt from the standalone query and ranked candidates.
pub fn answer_prompt(query: &str, candidates: &RetrievalResult) -> String {
    let list = candidates.texts().collect::<Vec<_>>().join("\n");
    format!(
        "You are an anime expert and your goal is to provide the user the best anime based on their requirements, provide a conversational answer to the user.\n\
         You already have a list below with any possible anime that you can recommend to the user.\n\
         But if you think that the user is not looking for any of the anime below just respond \"{refusal}\".\n\n\
         Here is the list of anime that you can recommend to the user:\n{list}\n\n\
         User:{query}\n\n\
         Answer in markdown:",
        refusal = REFUSAL_SENTENCE,
        list = list,
        query = query,
    )
}

/// Produce the answer for one turn. The model output is returned verbatim.
pub async fn generate(
    model: &dyn CompletionModel,
    query: &str,
    candidates: &RetrievalResult,
    options: &CompletionOptions,
) -> Result<String> {
    let answer = model
        .complete(&answer_prompt(query, candidates), options)
        .await?;
    if is_refusal(&answer) {
        debug!(candidates = candidates.len(), "model declined to recommend");
    }
    Ok(answer)
}

/// Whether `answer` is the scripted refusal.
pub fn is_refusal(answer: &str) -> bool {
    answer.contains(REFUSAL_SENTENCE)
}
