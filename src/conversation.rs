//! The interactive conversation loop.
//!
//! Each turn runs condense → retrieve → generate strictly in sequence, then
//! appends the turn and prints `answer: <text>`. The loop is a small state
//! machine:
//!
//! ```text
//! AwaitingInput ──line──▶ Processing ──ok──▶ AwaitingInput
//!      │                      │
//!      │ EOF / exit / limit   │ error
//!      ▼                      ▼
//!  Terminated             (session error)
//! ```
//!
//! A failed turn prints nothing and is not recorded.

use async_trait::async_trait;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tracing::{info, warn};

use crate::answer::generate;
use crate::completion::{CompletionModel, CompletionOptions};
use crate::condense::condense;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{PipelineError, Result};
use crate::index::SemanticIndex;
use crate::models::{ConversationHistory, Turn};
use crate::retrieve::retrieve;

/// Where user lines come from.
#[async_trait]
pub trait InputSource: Send {
    /// Next line without its terminator, or `None` when input is exhausted
    /// or unreadable.
    async fn next_line(&mut self) -> Result<Option<String>>;
}

/// Line reader over any buffered async reader, optionally printing a prompt.
pub struct LineInput<R> {
    reader: R,
    prompt: Option<String>,
}

/// Interactive stdin with a `User:` prompt.
pub type StdinInput = LineInput<BufReader<Stdin>>;

impl StdinInput {
    pub fn stdin() -> Self {
        LineInput {
            reader: BufReader::new(tokio::io::stdin()),
            prompt: Some("User: ".to_string()),
        }
    }
}

impl<R> LineInput<R> {
    /// Read from `reader` without prompting.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            prompt: None,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> InputSource for LineInput<R> {
    async fn next_line(&mut self) -> Result<Option<String>> {
        if let Some(prompt) = &self.prompt {
            let mut stdout = std::io::stdout();
            write!(stdout, "{}", prompt)
                .and_then(|()| stdout.flush())
                .map_err(PipelineError::Output)?;
        }

        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }

        match String::from_utf8(buf) {
            Ok(line) => Ok(Some(line)),
            Err(_) => {
                warn!("input is not valid UTF-8, ending conversation");
                Ok(None)
            }
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    EndOfInput,
    ExitToken,
    TurnLimit,
}

#[derive(Debug)]
enum LoopState {
    AwaitingInput,
    Processing(String),
    Terminated(TerminationReason),
}

/// Completed turns and the reason the session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub history: ConversationHistory,
    pub reason: TerminationReason,
}

/// Loop parameters.
#[derive(Debug, Clone)]
pub struct ConversationSettings {
    pub top_k: usize,
    pub max_turns: usize,
    pub exit_token: String,
    pub options: CompletionOptions,
}

impl ConversationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            max_turns: config.conversation.max_turns,
            exit_token: config.conversation.exit_token.clone(),
            options: CompletionOptions::deterministic(config.completion.max_retries),
        }
    }
}

/// One conversation session over a fixed index.
pub struct Conversation<'a> {
    index: &'a SemanticIndex,
    embedder: &'a dyn Embedder,
    model: &'a dyn CompletionModel,
    settings: ConversationSettings,
}

impl<'a> Conversation<'a> {
    pub fn new(
        index: &'a SemanticIndex,
        embedder: &'a dyn Embedder,
        model: &'a dyn CompletionModel,
        settings: ConversationSettings,
    ) -> Self {
        Self {
            index,
            embedder,
            model,
            settings,
        }
    }

    /// Run until input ends, the exit token is read or the turn limit is hit.
    ///
    /// # Errors
    ///
    /// The first failing stage ends the session. Answers printed before the
    /// failure stay printed.
    pub async fn run<W: Write>(
        &self,
        input: &mut dyn InputSource,
        out: &mut W,
    ) -> Result<SessionSummary> {
        let mut history = ConversationHistory::new();
        let mut state = LoopState::AwaitingInput;

        loop {
            state = match state {
                LoopState::AwaitingInput => {
                    if history.len() >= self.settings.max_turns {
                        LoopState::Terminated(TerminationReason::TurnLimit)
                    } else {
                        match input.next_line().await? {
                            None => LoopState::Terminated(TerminationReason::EndOfInput),
                            Some(line) if line == self.settings.exit_token => {
                                LoopState::Terminated(TerminationReason::ExitToken)
                            }
                            Some(line) => LoopState::Processing(line),
                        }
                    }
                }
                LoopState::Processing(line) => {
                    let answer = self.turn(&history, &line).await?;
                    writeln!(out, "answer: {}", answer)
                        .and_then(|()| out.flush())
                        .map_err(PipelineError::Output)?;
                    history.push(Turn {
                        input: line,
                        answer,
                    });
                    LoopState::AwaitingInput
                }
                LoopState::Terminated(reason) => {
                    info!(turns = history.len(), ?reason, "conversation ended");
                    return Ok(SessionSummary { history, reason });
                }
            };
        }
    }

    async fn turn(&self, history: &ConversationHistory, input: &str) -> Result<String> {
        let options = &self.settings.options;
        let query = condense(self.model, history, input, options).await?;
        let candidates = retrieve(self.index, self.embedder, &query, self.settings.top_k).await?;
        generate(self.model, &query, &candidates, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CatalogRecord, IndexedDocument};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ConstEmbedder;

    #[async_trait]
    impl Embedder for ConstEmbedder {
        fn model_name(&self) -> &str {
            "const"
        }

        fn dims(&self) -> usize {
            1
        }

        async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    /// Replies "condensed" to condense prompts and "reply N" to answer prompts.
    /// Fails the answer call numbered `fail_on` (1-based).
    struct CountingModel {
        answers: AtomicUsize,
        calls: AtomicUsize,
        fail_on: Option<usize>,
        condense_prompts: Mutex<Vec<String>>,
    }

    impl CountingModel {
        fn new(fail_on: Option<usize>) -> Self {
            Self {
                answers: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                fail_on,
                condense_prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionModel for CountingModel {
        fn model_name(&self) -> &str {
            "counting"
        }

        async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if prompt.contains("Standalone question:") {
                self.condense_prompts.lock().unwrap().push(prompt.to_string());
                return Ok("condensed".to_string());
            }
            let n = self.answers.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(n) {
                return Err(PipelineError::Completion("upstream 503".to_string()));
            }
            Ok(format!("reply {}", n))
        }
    }

    fn index() -> SemanticIndex {
        let record: CatalogRecord = serde_json::from_value(serde_json::json!({
            "mal_id": 1,
            "title": "Frieren",
            "synopsis": "An elf mage outlives her party.",
        }))
        .unwrap();
        SemanticIndex::new("const", 1, 0, vec![IndexedDocument::new(record, vec![1.0])]).unwrap()
    }

    fn settings(max_turns: usize) -> ConversationSettings {
        ConversationSettings {
            top_k: 10,
            max_turns,
            exit_token: "exit".to_string(),
            options: CompletionOptions::deterministic(1),
        }
    }

    async fn run_with(
        lines: &'static [u8],
        model: &CountingModel,
        max_turns: usize,
    ) -> (Result<SessionSummary>, String) {
        let index = index();
        let conversation = Conversation::new(&index, &ConstEmbedder, model, settings(max_turns));
        let mut input = LineInput::new(lines);
        let mut out = Vec::new();
        let result = conversation.run(&mut input, &mut out).await;
        (result, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn exit_on_first_line_does_nothing() {
        let model = CountingModel::new(None);
        let (result, out) = run_with(b"exit\nfantasy\n", &model, 10).await;
        let summary = result.unwrap();
        assert_eq!(summary.reason, TerminationReason::ExitToken);
        assert!(summary.history.is_empty());
        assert!(out.is_empty());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exit_token_must_match_exactly() {
        let model = CountingModel::new(None);
        let (result, _) = run_with(b"exit \nEXIT\r\nexit\r\n", &model, 10).await;
        let summary = result.unwrap();
        assert_eq!(summary.reason, TerminationReason::ExitToken);
        let inputs: Vec<&str> = summary
            .history
            .turns()
            .iter()
            .map(|t| t.input.as_str())
            .collect();
        assert_eq!(inputs, vec!["exit ", "EXIT"]);
    }

    #[tokio::test]
    async fn threads_history_and_prints_answers() {
        let model = CountingModel::new(None);
        let (result, out) = run_with(b"fantasy\nshorter?\n", &model, 10).await;
        let summary = result.unwrap();
        assert_eq!(summary.reason, TerminationReason::EndOfInput);
        assert_eq!(
            summary.history.turns(),
            &[
                Turn {
                    input: "fantasy".to_string(),
                    answer: "reply 1".to_string()
                },
                Turn {
                    input: "shorter?".to_string(),
                    answer: "reply 2".to_string()
                },
            ]
        );
        assert_eq!(out, "answer: reply 1\nanswer: reply 2\n");
        // first turn: answer only; second turn: condense + answer
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn condensation_sees_exactly_the_prior_turns() {
        let model = CountingModel::new(None);
        let (result, _) = run_with(b"mecha\nolder ones?\nany short ones?\n", &model, 10).await;
        assert_eq!(result.unwrap().history.len(), 3);

        let prompts = model.condense_prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);

        let third = &prompts[1];
        let history = third
            .split_once("Chat History:\n")
            .and_then(|(_, rest)| rest.split_once("\nFollow Up Input: "))
            .map(|(history, _)| history)
            .unwrap();
        assert_eq!(
            history,
            "User: mecha\nBot: reply 1\nUser: older ones?\nBot: reply 2"
        );
        assert!(third.ends_with("Follow Up Input: any short ones?\nStandalone question:"));
    }

    #[tokio::test]
    async fn stops_at_turn_limit() {
        let model = CountingModel::new(None);
        let (result, out) = run_with(b"a\nb\nc\nd\n", &model, 2).await;
        let summary = result.unwrap();
        assert_eq!(summary.reason, TerminationReason::TurnLimit);
        assert_eq!(summary.history.len(), 2);
        assert_eq!(out.lines().count(), 2);
    }

    #[tokio::test]
    async fn failed_turn_prints_nothing() {
        let model = CountingModel::new(Some(2));
        let (result, out) = run_with(b"one\ntwo\nthree\n", &model, 10).await;
        assert!(matches!(result, Err(PipelineError::Completion(_))));
        assert_eq!(out, "answer: reply 1\n");
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_answer_write_is_an_output_error() {
        let index = index();
        let model = CountingModel::new(None);
        let conversation = Conversation::new(&index, &ConstEmbedder, &model, settings(10));
        let mut input = LineInput::new(&b"fantasy
"[..]);

        let err = conversation
            .run(&mut input, &mut BrokenPipe)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Output(_)));
    }

    #[tokio::test]
    async fn empty_line_is_a_normal_turn() {
        let model = CountingModel::new(None);
        let (result, _) = run_with(b"\n", &model, 10).await;
        let summary = result.unwrap();
        assert_eq!(summary.history.len(), 1);
        assert_eq!(summary.history.turns()[0].input, "");
    }

    #[tokio::test]
    async fn invalid_utf8_ends_input() {
        let mut input = LineInput::new(&b"ok\n\xff\xfe\nlater\n"[..]);
        assert_eq!(input.next_line().await.unwrap().as_deref(), Some("ok"));
        assert_eq!(input.next_line().await.unwrap(), None);
    }
}
