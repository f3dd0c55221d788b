//! Turn orchestration: stream → parse → execute → follow up.
//!
//! The [`TurnEngine`] drives one model response end-to-end. Display text
//! is yielded to the caller the moment it parses; each completed tool
//! call is executed one at a time in detection order, its outcome is
//! appended to conversation history, and a follow-up model request
//! (restricted to the tool-result context) produces the text that
//! continues the reply.
//!
//! # State Flow
//!
//! ```text
//! Idle → Streaming → ExecutingTool → FollowUp → Streaming → … → Idle
//! ```
//!
//! One engine serves one conversation at a time; engines are plain
//! values with no shared state, so hosts create one per conversation.
//! Tool execution failures end up as data in history and the follow-up,
//! never as errors out of the turn; only stream-source, model, and
//! history failures are fatal.

use std::sync::Arc;

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::executor::{ToolExecutor, ToolInvoker};
use crate::history::{ConversationHistory, HistoryMessage};
use crate::model::{ChatModel, Message, Role, TokenStream};
use crate::observability::{FIELD_CONVERSATION_ID, SPAN_TURN};
use crate::parser::StreamToolParser;
use crate::types::{RetryPolicy, ToolCall, ToolCallStatus};

/// Separator emitted before every follow-up text.
pub const FOLLOW_UP_SEPARATOR: &str = "\n\n";

/// Note shown to the user when the stream ends inside a tool block.
pub const INCOMPLETE_TOOL_NOTE: &str =
    "\n\n[Note: An incomplete tool call was detected and could not be executed]";

/// Instructions for the follow-up request after tool execution.
const FOLLOW_UP_SYSTEM_PROMPT: &str = "You are a voice assistant continuing your reply after \
     running tools. Using only the tool results below, continue the response to the user in a \
     natural, conversational way.";

/// Orchestrates one conversation's turns.
pub struct TurnEngine {
    model: Arc<dyn ChatModel>,
    executor: ToolExecutor,
    history: Arc<dyn ConversationHistory>,
    cancel: CancellationToken,
}

impl TurnEngine {
    /// Create an engine for one conversation.
    pub fn new(
        model: Arc<dyn ChatModel>,
        invoker: Arc<dyn ToolInvoker>,
        history: Arc<dyn ConversationHistory>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            model,
            executor: ToolExecutor::new(invoker, policy),
            history,
            cancel: CancellationToken::new(),
        }
    }

    /// Signal cancellation. The engine stops at the next fragment
    /// boundary and clears any buffered partial block.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token for external cancellation control.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start a streamed turn: request the model's primary response for
    /// `messages` and drive it through [`run_turn`](Self::run_turn).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the primary model request fails.
    pub async fn stream_turn<'a>(
        &'a self,
        conversation_id: &'a str,
        messages: &[Message],
    ) -> Result<impl Stream<Item = Result<String, PipelineError>> + 'a, PipelineError> {
        let tokens = self.model.stream(messages).await?;
        Ok(self.run_turn(conversation_id, tokens))
    }

    /// Drive a token stream through one turn.
    ///
    /// The returned stream yields display text as soon as it parses —
    /// always before any tool side effects triggered by the same
    /// fragment — then one follow-up text (prefixed with
    /// [`FOLLOW_UP_SEPARATOR`]) per executed tool call. The sequence is
    /// finite and not restartable. Stream-source, model, and history
    /// failures surface as the stream's terminal `Err`.
    pub fn run_turn<'a>(
        &'a self,
        conversation_id: &'a str,
        mut tokens: TokenStream,
    ) -> impl Stream<Item = Result<String, PipelineError>> + 'a {
        try_stream! {
            let span = tracing::info_span!(
                SPAN_TURN,
                { FIELD_CONVERSATION_ID } = conversation_id,
            );
            let _enter = span.enter();

            let mut parser = StreamToolParser::new(conversation_id);

            while !self.cancel.is_cancelled() {
                let next = match tokens.next().await {
                    Some(next) => next,
                    None => break,
                };
                let fragment = next?;
                let processed = parser.process_fragment(&fragment);

                if !processed.display_text.is_empty() {
                    yield processed.display_text;
                }

                for mut call in processed.completed_calls {
                    let follow_up = self
                        .execute_and_follow_up(conversation_id, &mut call)
                        .await?;
                    yield follow_up;
                }
            }

            if self.cancel.is_cancelled() {
                parser.reset();
                tracing::info!(conversation_id, "turn cancelled, parser state cleared");
            } else if let Some(raw) = parser.finalize() {
                tracing::warn!(
                    conversation_id,
                    unsent_len = raw.len(),
                    "stream ended inside an unterminated tool block"
                );
                yield INCOMPLETE_TOOL_NOTE.to_string();
            }
        }
    }

    /// Run one full response string through the same logic in a single
    /// pass. Tool calls execute sequentially and a single follow-up
    /// request aggregates all their results.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the history sink or the follow-up
    /// model request fails.
    pub async fn run_turn_text(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<String, PipelineError> {
        let mut parser = StreamToolParser::new(conversation_id);
        let processed = parser.process_fragment(text);

        let mut output = processed.display_text;
        let mut calls = processed.completed_calls;

        for call in &mut calls {
            self.executor.execute(call).await;
            self.record_outcome(conversation_id, call).await?;
        }

        if let Some(raw) = parser.finalize() {
            tracing::warn!(
                conversation_id,
                unsent_len = raw.len(),
                "response ended inside an unterminated tool block"
            );
            output.push_str(INCOMPLETE_TOOL_NOTE);
        }

        if !calls.is_empty() {
            let response = self.model.invoke(&follow_up_messages(&calls)).await?;
            output.push_str(FOLLOW_UP_SEPARATOR);
            output.push_str(&response.content);
        }

        Ok(output)
    }

    /// Execute one call, persist its outcome, and fetch the follow-up
    /// text (separator included).
    async fn execute_and_follow_up(
        &self,
        conversation_id: &str,
        call: &mut ToolCall,
    ) -> Result<String, PipelineError> {
        self.executor.execute(call).await;
        self.record_outcome(conversation_id, call).await?;

        let response = self
            .model
            .invoke(&follow_up_messages(std::slice::from_ref(call)))
            .await?;
        Ok(format!("{FOLLOW_UP_SEPARATOR}{}", response.content))
    }

    /// Append a terminal call's outcome to conversation history.
    async fn record_outcome(
        &self,
        conversation_id: &str,
        call: &ToolCall,
    ) -> Result<(), PipelineError> {
        self.history
            .add_message(
                HistoryMessage::new(conversation_id, Role::Tool, format_outcome(call))
                    .with_tool_name(call.name.clone()),
            )
            .await
    }
}

/// Human-readable summary of a call's terminal outcome.
fn format_outcome(call: &ToolCall) -> String {
    match call.status {
        ToolCallStatus::Completed => {
            let result = call.result.as_ref().map(value_to_text).unwrap_or_default();
            format!(
                "Tool '{}' completed in {}s: {result}",
                call.name,
                call.duration_secs().unwrap_or(0)
            )
        }
        ToolCallStatus::Failed => format!(
            "Tool '{}' failed: {}",
            call.name,
            call.error.as_deref().unwrap_or("unknown error")
        ),
        _ => format!("Tool '{}' did not reach a terminal status", call.name),
    }
}

/// Render a result payload for prose contexts: bare strings stay bare,
/// everything else is compact JSON.
fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build the follow-up request: tool results only, not the full
/// conversation.
fn follow_up_messages(calls: &[ToolCall]) -> Vec<Message> {
    let mut results = String::new();
    for call in calls {
        if !results.is_empty() {
            results.push('\n');
        }
        results.push_str(&format_outcome(call));
    }
    vec![
        Message::system(FOLLOW_UP_SYSTEM_PROMPT),
        Message::user(results),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::history::MemoryHistory;
    use crate::model::ChatResponse;

    // ── Mock collaborators ───────────────────────────────────

    /// Model whose invoke() answers with a fixed text and records the
    /// messages it was sent.
    struct MockModel {
        follow_up_text: String,
        seen: Mutex<Vec<Vec<Message>>>,
        stream_fragments: Vec<String>,
    }

    impl MockModel {
        fn new(follow_up_text: &str) -> Self {
            Self {
                follow_up_text: follow_up_text.to_string(),
                seen: Mutex::new(Vec::new()),
                stream_fragments: Vec::new(),
            }
        }

        fn with_stream(mut self, fragments: &[&str]) -> Self {
            self.stream_fragments = fragments.iter().map(|s| (*s).to_string()).collect();
            self
        }

        fn seen_requests(&self) -> Vec<Vec<Message>> {
            self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
    }

    #[async_trait]
    impl ChatModel for MockModel {
        async fn invoke(&self, messages: &[Message]) -> Result<ChatResponse, PipelineError> {
            self.seen
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(messages.to_vec());
            Ok(ChatResponse {
                content: self.follow_up_text.clone(),
            })
        }

        async fn stream(&self, _messages: &[Message]) -> Result<TokenStream, PipelineError> {
            let fragments: Vec<Result<String, PipelineError>> =
                self.stream_fragments.iter().cloned().map(Ok).collect();
            Ok(Box::pin(tokio_stream::iter(fragments)))
        }
    }

    /// Invoker answering calculate with 4, recording invocation order.
    struct MockInvoker {
        calls: AtomicU32,
        invoked_names: Mutex<Vec<String>>,
    }

    impl MockInvoker {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                invoked_names: Mutex::new(Vec::new()),
            }
        }

        fn invoked_names(&self) -> Vec<String> {
            self.invoked_names
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }
    }

    #[async_trait]
    impl ToolInvoker for MockInvoker {
        async fn invoke(
            &self,
            name: &str,
            _parameters: &serde_json::Value,
        ) -> Result<serde_json::Value, PipelineError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.invoked_names
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(name.to_string());
            match name {
                "calculate" => Ok(serde_json::json!(4)),
                "broken" => Err(PipelineError::ToolError("invalid parameters".into())),
                other => Ok(serde_json::json!(format!("ran {other}"))),
            }
        }
    }

    struct Fixture {
        model: Arc<MockModel>,
        invoker: Arc<MockInvoker>,
        history: Arc<MemoryHistory>,
        engine: TurnEngine,
    }

    fn fixture(model: MockModel) -> Fixture {
        let model = Arc::new(model);
        let invoker = Arc::new(MockInvoker::new());
        let history = Arc::new(MemoryHistory::new());
        let engine = TurnEngine::new(
            Arc::clone(&model) as Arc<dyn ChatModel>,
            Arc::clone(&invoker) as Arc<dyn ToolInvoker>,
            Arc::clone(&history) as Arc<dyn ConversationHistory>,
            RetryPolicy::new().with_base_delay_ms(1).with_max_delay_ms(5),
        );
        Fixture {
            model,
            invoker,
            history,
            engine,
        }
    }

    fn token_stream(fragments: &[&str]) -> TokenStream {
        let items: Vec<Result<String, PipelineError>> =
            fragments.iter().map(|s| Ok((*s).to_string())).collect();
        Box::pin(tokio_stream::iter(items))
    }

    async fn collect(
        stream: impl Stream<Item = Result<String, PipelineError>>,
    ) -> Vec<Result<String, PipelineError>> {
        futures_util::pin_mut!(stream);
        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item);
        }
        items
    }

    // ── End-to-end streamed turn ─────────────────────────────

    #[tokio::test]
    async fn streamed_turn_with_torn_marker() {
        let f = fixture(MockModel::new("The answer is 4."));
        let tokens = token_stream(&[
            "Sure, let me check. <too",
            "l>{\"name\":\"calculate\",\"parameters\":{\"expression\":\"2+2\"}}</tool>",
        ]);

        let items = collect(f.engine.run_turn("conv-1", tokens)).await;

        assert_eq!(items.len(), 2);
        match &items[0] {
            Ok(text) => assert_eq!(text, "Sure, let me check. "),
            Err(_) => unreachable!("display text yielded"),
        }
        match &items[1] {
            Ok(text) => {
                assert!(text.starts_with("\n\n"));
                assert_eq!(text, "\n\nThe answer is 4.");
            }
            Err(_) => unreachable!("follow-up yielded"),
        }
        assert_eq!(f.invoker.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn display_text_precedes_tool_side_effects() {
        let f = fixture(MockModel::new("Done."));
        let tokens = token_stream(&["before <tool>{\"name\":\"calculate\"}</tool> after"]);

        let items = collect(f.engine.run_turn("conv-1", tokens)).await;

        // The fragment's display text (all of it) is yielded before the
        // tool execution it triggered.
        let texts: Vec<String> = items
            .into_iter()
            .map(|i| i.unwrap_or_default())
            .collect();
        assert_eq!(texts, vec!["before  after".to_string(), "\n\nDone.".to_string()]);
    }

    #[tokio::test]
    async fn plain_text_turn_has_no_side_effects() {
        let f = fixture(MockModel::new("unused"));
        let tokens = token_stream(&["Just ", "prose, no tools."]);

        let items = collect(f.engine.run_turn("conv-1", tokens)).await;

        let texts: Vec<String> = items.into_iter().map(|i| i.unwrap_or_default()).collect();
        assert_eq!(texts.concat(), "Just prose, no tools.");
        assert_eq!(f.invoker.calls.load(Ordering::Relaxed), 0);
        assert!(f.history.messages().is_empty());
        assert!(f.model.seen_requests().is_empty());
    }

    #[tokio::test]
    async fn follow_up_sees_only_tool_result_context() {
        let f = fixture(MockModel::new("It's 4."));
        let tokens = token_stream(&[
            "Sure, let me check. <tool>{\"name\":\"calculate\",\"parameters\":{}}</tool>",
        ]);

        let _ = collect(f.engine.run_turn("conv-1", tokens)).await;

        let requests = f.model.seen_requests();
        assert_eq!(requests.len(), 1);
        let messages = &requests[0];
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
        assert!(messages[1].content.contains("calculate"));
        assert!(messages[1].content.contains('4'));
        // The conversation's own prose is not included.
        assert!(!messages[1].content.contains("Sure, let me check"));
    }

    #[tokio::test]
    async fn tool_outcomes_recorded_in_order() {
        let f = fixture(MockModel::new("ok"));
        let tokens = token_stream(&[
            "<tool>{\"name\":\"calculate\"}</tool><tool>{\"name\":\"search\"}</tool>",
        ]);

        let _ = collect(f.engine.run_turn("conv-1", tokens)).await;

        assert_eq!(f.invoker.invoked_names(), vec!["calculate", "search"]);
        let messages = f.history.for_conversation("conv-1");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].tool_name.as_deref(), Some("calculate"));
        assert_eq!(messages[1].tool_name.as_deref(), Some("search"));
        assert_eq!(messages[0].role, Role::Tool);
    }

    // ── Failure semantics ────────────────────────────────────

    #[tokio::test]
    async fn failed_tool_is_reported_not_thrown() {
        let f = fixture(MockModel::new("Sorry, that tool failed."));
        let tokens = token_stream(&["<tool>{\"name\":\"broken\"}</tool>"]);

        let items = collect(f.engine.run_turn("conv-1", tokens)).await;

        // The failure is reported through the follow-up, not as an Err.
        assert!(items.iter().all(Result::is_ok));
        let messages = f.history.for_conversation("conv-1");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("failed"));
        assert!(messages[0].content.contains("invalid parameters"));
    }

    #[tokio::test]
    async fn malformed_block_degrades_to_display_text() {
        let f = fixture(MockModel::new("unused"));
        let tokens = token_stream(&["<tool>{\"name\":\"\"}</tool>"]);

        let items = collect(f.engine.run_turn("conv-1", tokens)).await;

        let texts: Vec<String> = items.into_iter().map(|i| i.unwrap_or_default()).collect();
        assert_eq!(texts.concat(), "<tool>{\"name\":\"\"}</tool>");
        assert_eq!(f.invoker.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn stream_error_is_fatal_for_the_turn() {
        let f = fixture(MockModel::new("unused"));
        let items: Vec<Result<String, PipelineError>> = vec![
            Ok("partial ".to_string()),
            Err(PipelineError::StreamError("connection lost".into())),
        ];
        let tokens: TokenStream = Box::pin(tokio_stream::iter(items));

        let collected = collect(f.engine.run_turn("conv-1", tokens)).await;

        assert_eq!(collected.len(), 2);
        assert!(collected[0].is_ok());
        match &collected[1] {
            Err(e) => assert_eq!(e.code(), "STREAM_FAILED"),
            Ok(_) => unreachable!("stream error propagated"),
        }
    }

    #[tokio::test]
    async fn unterminated_block_yields_diagnostic_note() {
        let f = fixture(MockModel::new("unused"));
        let tokens = token_stream(&["Working on it. <tool>{\"name\":\"calcul"]);

        let items = collect(f.engine.run_turn("conv-1", tokens)).await;

        let texts: Vec<String> = items.into_iter().map(|i| i.unwrap_or_default()).collect();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0], "Working on it. ");
        assert_eq!(texts[1], INCOMPLETE_TOOL_NOTE);
        assert_eq!(f.invoker.calls.load(Ordering::Relaxed), 0);
    }

    // ── Cancellation ─────────────────────────────────────────

    #[tokio::test]
    async fn cancellation_stops_before_next_fragment() {
        let f = fixture(MockModel::new("unused"));
        f.engine.cancel();
        let tokens = token_stream(&["never ", "seen"]);

        let items = collect(f.engine.run_turn("conv-1", tokens)).await;

        assert!(items.is_empty());
    }

    // ── stream_turn ──────────────────────────────────────────

    #[tokio::test]
    async fn stream_turn_drives_the_primary_model_stream() {
        let f = fixture(
            MockModel::new("Four.").with_stream(&[
                "Let me see. ",
                "<tool>{\"name\":\"calculate\",\"parameters\":{\"expression\":\"2+2\"}}</tool>",
            ]),
        );

        let messages = vec![Message::user("what is 2+2?")];
        let stream = f.engine.stream_turn("conv-1", &messages).await;
        let stream = match stream {
            Ok(s) => s,
            Err(_) => unreachable!("primary request succeeded"),
        };
        let items = collect(stream).await;

        let texts: Vec<String> = items.into_iter().map(|i| i.unwrap_or_default()).collect();
        assert_eq!(texts, vec!["Let me see. ".to_string(), "\n\nFour.".to_string()]);
    }

    // ── Non-streaming mode ───────────────────────────────────

    #[tokio::test]
    async fn text_turn_aggregates_results_into_one_follow_up() {
        let f = fixture(MockModel::new("Both tools ran."));

        let output = f
            .engine
            .run_turn_text(
                "conv-1",
                "A <tool>{\"name\":\"calculate\"}</tool> B <tool>{\"name\":\"search\"}</tool> C",
            )
            .await;

        let output = match output {
            Ok(o) => o,
            Err(_) => unreachable!("turn succeeded"),
        };
        assert_eq!(output, "A  B  C\n\nBoth tools ran.");
        assert_eq!(f.invoker.calls.load(Ordering::Relaxed), 2);

        // One aggregate follow-up request carrying both results.
        let requests = f.model.seen_requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0][1].content.contains("calculate"));
        assert!(requests[0][1].content.contains("search"));
    }

    #[tokio::test]
    async fn text_turn_without_tools_returns_text_verbatim() {
        let f = fixture(MockModel::new("unused"));

        let output = f.engine.run_turn_text("conv-1", "No tools here.").await;

        match output {
            Ok(o) => assert_eq!(o, "No tools here."),
            Err(_) => unreachable!("turn succeeded"),
        }
        assert!(f.model.seen_requests().is_empty());
    }

    #[tokio::test]
    async fn text_turn_flags_unterminated_block() {
        let f = fixture(MockModel::new("unused"));

        let output = f
            .engine
            .run_turn_text("conv-1", "Checking <tool>{\"name\":\"x\"")
            .await;

        match output {
            Ok(o) => assert_eq!(o, format!("Checking {INCOMPLETE_TOOL_NOTE}")),
            Err(_) => unreachable!("turn succeeded"),
        }
    }

    // ── Per-conversation isolation ───────────────────────────

    #[tokio::test]
    async fn conversations_do_not_share_state() {
        let f = fixture(MockModel::new("ok"));

        let items_a = collect(f.engine.run_turn(
            "conv-a",
            token_stream(&["<tool>{\"name\":\"calculate\"}</tool>"]),
        ))
        .await;
        let items_b = collect(f.engine.run_turn(
            "conv-b",
            token_stream(&["<tool>{\"name\":\"calculate\"}</tool>"]),
        ))
        .await;

        assert_eq!(items_a.len(), 1);
        assert_eq!(items_b.len(), 1);
        assert_eq!(f.history.for_conversation("conv-a").len(), 1);
        assert_eq!(f.history.for_conversation("conv-b").len(), 1);
    }

    // ── Outcome formatting ───────────────────────────────────

    #[test]
    fn format_outcome_completed() {
        let mut call = ToolCall::pending("tool-c-0", "calculate", serde_json::json!({}));
        call.status = ToolCallStatus::Completed;
        call.result = Some(serde_json::json!(4));
        call.end_time = Some(call.start_time + chrono::Duration::seconds(2));

        let text = format_outcome(&call);
        assert_eq!(text, "Tool 'calculate' completed in 2s: 4");
    }

    #[test]
    fn format_outcome_string_results_stay_bare() {
        let mut call = ToolCall::pending("tool-c-0", "search", serde_json::json!({}));
        call.status = ToolCallStatus::Completed;
        call.result = Some(serde_json::json!("three results"));
        call.end_time = Some(call.start_time);

        let text = format_outcome(&call);
        assert!(text.ends_with(": three results"));
    }

    #[test]
    fn format_outcome_failed() {
        let mut call = ToolCall::pending("tool-c-0", "search", serde_json::json!({}));
        call.status = ToolCallStatus::Failed;
        call.error = Some("Failed after 4 attempts. Last error: timeout".into());

        let text = format_outcome(&call);
        assert!(text.starts_with("Tool 'search' failed:"));
        assert!(text.contains("timeout"));
    }

    // ── Send + Sync ──────────────────────────────────────────

    #[test]
    fn engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TurnEngine>();
    }
}
