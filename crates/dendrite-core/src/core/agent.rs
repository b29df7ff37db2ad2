//! Request orchestration.
//!
//! `process_request` drives exactly one request: it brackets the engine run
//! with tool-server acquire/release, consumes the step sequence in
//! production order, appends every part to history as it arrives, and
//! funnels all non-success exits through one repair path so the history
//! invariant holds whether the request succeeded, was cancelled, or failed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tokio::sync::Notify;

use crate::core::confirm::DeniedError;
use crate::core::engine::{
    ConfirmAction, Engine, EngineRequest, RequestDeps, StatusSink, Step, create_step_channel,
};
use crate::core::history::{Request, RequestPart, ResponsePart};
use crate::core::interrupt::InterruptedError;
use crate::core::mcp::{self, McpLifecycle};
use crate::core::session::{SharedHistory, SharedUsage};

/// Content of the synthetic tool return appended when a request is cancelled
/// while a tool call is unanswered.
pub const CANCELLATION_MESSAGE: &str = "Request cancelled by user";

/// Cooperative per-request cancellation signal.
///
/// The interrupt handler (or the session loop acting on it) only calls
/// `cancel`; the orchestrator observes the flag at its own suspension points.
#[derive(Debug, Default)]
pub struct CancelFlag {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.notify.notified().await;
        }
    }
}

/// Everything one request needs, constructed by the session loop.
pub struct RequestContext {
    pub engine: Arc<dyn Engine>,
    pub servers: Arc<McpLifecycle>,
    pub history: SharedHistory,
    pub usage: SharedUsage,
    pub confirm: Arc<dyn ConfirmAction>,
    pub status: Arc<dyn StatusSink>,
    pub model: String,
    pub cancel: Arc<CancelFlag>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs one request to completion, cancellation, or normalized error.
///
/// On success returns the engine's final text and records its usage sample.
/// Cancellation (external signal, tool denial, or a closed tool-server
/// transport) repairs the history and surfaces as [`InterruptedError`]. Any
/// other failure repairs the history before propagating. Tool servers are
/// released on every exit path.
pub async fn process_request(ctx: &RequestContext, prompt: &str) -> Result<String> {
    ctx.servers.acquire().await?;
    let result = run_steps(ctx, prompt).await;
    ctx.servers.release().await;

    match result {
        Ok(text) => Ok(text),
        Err(err) => Err(handle_failure(ctx, err)),
    }
}

async fn run_steps(ctx: &RequestContext, prompt: &str) -> Result<String> {
    let engine_history = {
        let mut history = lock(&ctx.history);
        history.add_request(Request::user_prompt(prompt));
        history.for_engine()
    };

    let (tx, mut rx) = create_step_channel();
    let request = EngineRequest {
        model: ctx.model.clone(),
        prompt: prompt.to_string(),
        history: engine_history,
        deps: RequestDeps {
            confirm: Arc::clone(&ctx.confirm),
            status: Arc::clone(&ctx.status),
            servers: Arc::clone(&ctx.servers),
        },
    };

    let mut engine_task = tokio::spawn(ctx.engine.run(request, tx));

    loop {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => {
                drop(rx);
                engine_task.abort();
                let _ = (&mut engine_task).await;
                return Err(InterruptedError.into());
            }
            step = rx.recv() => match step {
                Some(step) => consume_step(ctx, step),
                None => break,
            },
        }
    }

    let outcome = match engine_task.await {
        Ok(result) => result?,
        Err(join_err) if join_err.is_cancelled() => return Err(InterruptedError.into()),
        Err(join_err) => return Err(anyhow::anyhow!("engine task failed: {join_err}")),
    };

    lock(&ctx.usage).record_usage(&ctx.model, &outcome.usage);
    Ok(outcome.final_text)
}

fn consume_step(ctx: &RequestContext, step: Step) {
    match step {
        Step::Response(response) => {
            let narrate_text = response.parts.len() > 1;
            for part in &response.parts {
                match part {
                    ResponsePart::ToolCall {
                        tool_name, args, ..
                    } => {
                        ctx.status
                            .status("Tool call", &[
                                ("tool", tool_name.clone()),
                                ("args", args.to_string()),
                            ]);
                    }
                    // A text part sharing its step with other parts is
                    // interim thinking; a lone text part is final content.
                    ResponsePart::Text { content } if narrate_text => {
                        ctx.status.status("Thinking", &[("text", content.clone())]);
                    }
                    ResponsePart::Text { .. } => {}
                }
            }
            lock(&ctx.history).add_response(response);
        }
        Step::Request(request) => {
            for part in &request.parts {
                if let RequestPart::Retry { message } = part {
                    ctx.status.status("Retrying", &[("message", message.clone())]);
                }
            }
            lock(&ctx.history).add_request(request);
        }
    }
}

fn is_cancellation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<InterruptedError>().is_some()
        || err.downcast_ref::<DeniedError>().is_some()
        || mcp::is_transport_closed(err)
}

/// Single funnel for every non-success exit. Repairs the history so no
/// unanswered tool call remains trailing, then hands back the error to
/// surface: cancellations collapse to [`InterruptedError`], everything else
/// propagates unchanged.
fn handle_failure(ctx: &RequestContext, err: anyhow::Error) -> anyhow::Error {
    let mut history = lock(&ctx.history);
    if is_cancellation(&err) {
        tracing::debug!("request cancelled, repairing history");
        history.patch_on_error(CANCELLATION_MESSAGE);
        history.add_cancellation_note();
        InterruptedError.into()
    } else {
        tracing::error!(error = %err, "request failed");
        history.patch_on_error(&format!("Error: {err}"));
        err
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use futures_util::future::BoxFuture;
    use serde_json::{Value, json};

    use super::*;
    use crate::core::engine::{EngineOutcome, StepTx};
    use crate::core::history::{Message, MessageHistory, Response};
    use crate::core::session::{shared_history, shared_usage};
    use crate::core::usage::{UsageDetail, UsageSample, UsageTracker};

    struct AlwaysConfirm;

    impl ConfirmAction for AlwaysConfirm {
        fn confirm(&self, _tool: &str, _args: &Value, _remote: bool) -> BoxFuture<'_, bool> {
            Box::pin(async { true })
        }
    }

    #[derive(Default)]
    struct RecordingStatus {
        titles: StdMutex<Vec<String>>,
    }

    impl StatusSink for RecordingStatus {
        fn status(&self, title: &str, _fields: &[(&str, String)]) {
            self.titles
                .lock()
                .unwrap()
                .push(title.to_string());
        }
    }

    /// Emits a scripted step sequence, then resolves with a fixed outcome.
    #[derive(Debug)]
    struct ScriptedEngine {
        steps: StdMutex<Vec<Step>>,
        outcome: StdMutex<Option<anyhow::Result<EngineOutcome>>>,
    }

    impl ScriptedEngine {
        fn new(steps: Vec<Step>, outcome: anyhow::Result<EngineOutcome>) -> Self {
            Self {
                steps: StdMutex::new(steps),
                outcome: StdMutex::new(Some(outcome)),
            }
        }
    }

    impl Engine for ScriptedEngine {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn run(
            &self,
            _request: EngineRequest,
            tx: StepTx,
        ) -> BoxFuture<'static, anyhow::Result<EngineOutcome>> {
            let steps = std::mem::take(&mut *self.steps.lock().unwrap());
            let outcome = self.outcome.lock().unwrap().take().unwrap();
            Box::pin(async move {
                for step in steps {
                    if tx.send(step).await.is_err() {
                        break;
                    }
                }
                outcome
            })
        }
    }

    /// Emits one tool-call response, then never completes.
    #[derive(Debug)]
    struct HangingEngine;

    impl Engine for HangingEngine {
        fn name(&self) -> &'static str {
            "hanging"
        }

        fn run(
            &self,
            _request: EngineRequest,
            tx: StepTx,
        ) -> BoxFuture<'static, anyhow::Result<EngineOutcome>> {
            Box::pin(async move {
                let step = Step::Response(Response {
                    parts: vec![ResponsePart::ToolCall {
                        tool_name: "search".to_string(),
                        tool_call_id: "call-1".to_string(),
                        args: json!({}),
                    }],
                });
                let _ = tx.send(step).await;
                std::future::pending::<()>().await;
                unreachable!()
            })
        }
    }

    fn context(engine: Arc<dyn Engine>, status: Arc<dyn StatusSink>) -> RequestContext {
        RequestContext {
            engine,
            servers: Arc::new(McpLifecycle::new(Vec::new())),
            history: shared_history(MessageHistory::new()),
            usage: shared_usage(UsageTracker::new()),
            confirm: Arc::new(AlwaysConfirm),
            status,
            model: "openai:gpt-4.1".to_string(),
            cancel: Arc::new(CancelFlag::new()),
        }
    }

    fn outcome(text: &str) -> anyhow::Result<EngineOutcome> {
        Ok(EngineOutcome {
            final_text: text.to_string(),
            usage: UsageSample {
                input_tokens: 100,
                output_tokens: 50,
                details: vec![UsageDetail { cached_tokens: 20 }],
            },
        })
    }

    #[tokio::test]
    async fn test_success_appends_in_order_and_records_usage() {
        let engine = Arc::new(ScriptedEngine::new(
            vec![
                Step::Response(Response {
                    parts: vec![ResponsePart::ToolCall {
                        tool_name: "search".to_string(),
                        tool_call_id: "call-1".to_string(),
                        args: json!({"q": "x"}),
                    }],
                }),
                Step::Request(Request {
                    parts: vec![RequestPart::ToolReturn {
                        tool_name: "search".to_string(),
                        tool_call_id: "call-1".to_string(),
                        content: "results".to_string(),
                    }],
                }),
                Step::Response(Response {
                    parts: vec![ResponsePart::Text {
                        content: "done".to_string(),
                    }],
                }),
            ],
            outcome("done"),
        ));
        let ctx = context(engine, Arc::new(RecordingStatus::default()));

        let text = process_request(&ctx, "find x").await.unwrap();
        assert_eq!(text, "done");

        let history = ctx.history.lock().unwrap();
        assert_eq!(history.len(), 4);
        assert!(matches!(history.iter().next(), Some(Message::Request(_))));
        assert!(!history.has_unanswered_tool_call());
        drop(history);

        let usage = ctx.usage.lock().unwrap();
        assert_eq!(usage.total_requests(), 1);
        assert_eq!(usage.total_tokens(), 150);
        // Servers were released.
        assert!(!ctx.servers.is_active().await);
    }

    #[tokio::test]
    async fn test_thinking_narrated_only_with_cooccurring_parts() {
        let status = Arc::new(RecordingStatus::default());
        let engine = Arc::new(ScriptedEngine::new(
            vec![
                // Text alongside a tool call: narrated as thinking.
                Step::Response(Response {
                    parts: vec![
                        ResponsePart::Text {
                            content: "let me check".to_string(),
                        },
                        ResponsePart::ToolCall {
                            tool_name: "read".to_string(),
                            tool_call_id: "call-1".to_string(),
                            args: json!({}),
                        },
                    ],
                }),
                Step::Request(Request {
                    parts: vec![RequestPart::ToolReturn {
                        tool_name: "read".to_string(),
                        tool_call_id: "call-1".to_string(),
                        content: "ok".to_string(),
                    }],
                }),
                // Lone text: final content, not thinking.
                Step::Response(Response {
                    parts: vec![ResponsePart::Text {
                        content: "answer".to_string(),
                    }],
                }),
            ],
            outcome("answer"),
        ));
        let ctx = context(engine, Arc::clone(&status) as Arc<dyn StatusSink>);

        process_request(&ctx, "go").await.unwrap();

        let titles = status.titles.lock().unwrap();
        assert_eq!(
            titles.iter().filter(|t| *t == "Thinking").count(),
            1,
            "exactly one thinking narration expected"
        );
        assert_eq!(titles.iter().filter(|t| *t == "Tool call").count(), 1);
    }

    #[tokio::test]
    async fn test_retry_part_triggers_transient_narration() {
        let status = Arc::new(RecordingStatus::default());
        let engine = Arc::new(ScriptedEngine::new(
            vec![Step::Request(Request {
                parts: vec![RequestPart::Retry {
                    message: "trying another approach".to_string(),
                }],
            })],
            outcome("ok"),
        ));
        let ctx = context(engine, Arc::clone(&status) as Arc<dyn StatusSink>);

        process_request(&ctx, "go").await.unwrap();

        assert!(status.titles.lock().unwrap().contains(&"Retrying".to_string()));
    }

    #[tokio::test]
    async fn test_cancellation_repairs_history() {
        let ctx = context(Arc::new(HangingEngine), Arc::new(RecordingStatus::default()));
        let cancel = Arc::clone(&ctx.cancel);

        // Cancel once the tool-call response has landed in history.
        let history = Arc::clone(&ctx.history);
        tokio::spawn(async move {
            loop {
                if history.lock().unwrap().len() >= 2 {
                    cancel.cancel();
                    return;
                }
                tokio::task::yield_now().await;
            }
        });

        let err = process_request(&ctx, "find x").await.unwrap_err();
        assert!(err.downcast_ref::<InterruptedError>().is_some());

        let history = ctx.history.lock().unwrap();
        let messages: Vec<_> = history.iter().collect();
        // prompt, tool-call response, synthetic tool return, cancellation note
        assert_eq!(messages.len(), 4);
        let Message::Request(patch) = messages[2] else {
            panic!("expected repair request");
        };
        assert_eq!(
            patch.parts,
            vec![RequestPart::ToolReturn {
                tool_name: "search".to_string(),
                tool_call_id: "call-1".to_string(),
                content: CANCELLATION_MESSAGE.to_string(),
            }]
        );
        let Message::Request(note) = messages[3] else {
            panic!("expected cancellation note");
        };
        assert_eq!(
            note.parts,
            vec![RequestPart::UserPrompt {
                content: crate::core::history::CANCELLATION_NOTE.to_string(),
            }]
        );
        drop(history);
        assert!(!ctx.servers.is_active().await);
    }

    #[tokio::test]
    async fn test_engine_error_funnels_through_repair() {
        let engine = Arc::new(ScriptedEngine::new(
            vec![Step::Response(Response {
                parts: vec![ResponsePart::ToolCall {
                    tool_name: "write".to_string(),
                    tool_call_id: "call-9".to_string(),
                    args: json!({}),
                }],
            })],
            Err(anyhow::anyhow!("model rejected the request")),
        ));
        let ctx = context(engine, Arc::new(RecordingStatus::default()));

        let err = process_request(&ctx, "go").await.unwrap_err();
        assert!(err.downcast_ref::<InterruptedError>().is_none());
        assert!(err.to_string().contains("model rejected"));

        let history = ctx.history.lock().unwrap();
        assert!(!history.has_unanswered_tool_call());
        let Some(Message::Request(patch)) = history.iter().last() else {
            panic!("expected repair request");
        };
        let RequestPart::ToolReturn { content, .. } = &patch.parts[0] else {
            panic!("expected tool return");
        };
        assert!(content.contains("model rejected"));
    }

    #[tokio::test]
    async fn test_transport_closed_normalized_to_cancellation() {
        let engine = Arc::new(ScriptedEngine::new(
            Vec::new(),
            Err(anyhow::anyhow!("Connection closed")),
        ));
        let ctx = context(engine, Arc::new(RecordingStatus::default()));

        let err = process_request(&ctx, "go").await.unwrap_err();
        assert!(err.downcast_ref::<InterruptedError>().is_some());
    }

    #[tokio::test]
    async fn test_tool_denial_surfaces_as_cancellation() {
        let engine = Arc::new(ScriptedEngine::new(
            Vec::new(),
            Err(DeniedError {
                tool_name: "write".to_string(),
            }
            .into()),
        ));
        let ctx = context(engine, Arc::new(RecordingStatus::default()));

        let err = process_request(&ctx, "go").await.unwrap_err();
        assert!(err.downcast_ref::<InterruptedError>().is_some());
    }
}
