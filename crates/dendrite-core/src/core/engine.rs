//! Step-sequence contract between the orchestrator and the model engine.
//!
//! An engine drives one request end to end: it talks to the model, executes
//! tool calls through the dependency bundle it is handed, and publishes each
//! resulting history entry as a [`Step`] in production order. The
//! orchestrator consumes steps, appends them to history immediately, and
//! never reorders or batches them.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::history::{Message, Request, Response, ResponsePart};
use crate::core::mcp::McpLifecycle;
use crate::core::usage::UsageSample;

/// One unit of progress from the engine, in production order.
#[derive(Debug)]
pub enum Step {
    /// Model output: text and tool calls.
    Response(Response),
    /// Outbound parts produced while handling the response: tool returns and
    /// retry markers.
    Request(Request),
}

pub type StepTx = mpsc::Sender<Step>;
pub type StepRx = mpsc::Receiver<Step>;

/// Bounded channel for the engine's step sequence. The small buffer keeps
/// history appends close behind production without letting the engine run
/// arbitrarily far ahead of a cancelled consumer.
pub fn create_step_channel() -> (StepTx, StepRx) {
    mpsc::channel(32)
}

/// Asks the user whether a pending tool call may run.
///
/// `remote` marks calls forwarded to a tool-server subprocess, which are
/// confirmed regardless of the session's global confirmation toggle.
pub trait ConfirmAction: Send + Sync {
    fn confirm(&self, tool_name: &str, args: &Value, remote: bool) -> BoxFuture<'_, bool>;
}

/// Fire-and-forget status narration (tool-call announcements, interim
/// thinking). May be invoked any number of times per request.
pub trait StatusSink: Send + Sync {
    fn status(&self, title: &str, fields: &[(&str, String)]);
}

/// Per-request dependency bundle handed to the engine.
#[derive(Clone)]
pub struct RequestDeps {
    pub confirm: Arc<dyn ConfirmAction>,
    pub status: Arc<dyn StatusSink>,
    pub servers: Arc<McpLifecycle>,
}

/// Everything the engine needs for one request.
pub struct EngineRequest {
    pub model: String,
    pub prompt: String,
    pub history: Vec<Message>,
    pub deps: RequestDeps,
}

/// Result of a normally completed request.
#[derive(Debug)]
pub struct EngineOutcome {
    pub final_text: String,
    pub usage: UsageSample,
}

/// A model engine. `run` publishes steps on `steps` as they are produced and
/// resolves with the final text and usage once the sequence is complete.
pub trait Engine: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn run(
        &self,
        request: EngineRequest,
        steps: StepTx,
    ) -> BoxFuture<'static, anyhow::Result<EngineOutcome>>;
}

/// Offline engine that echoes the prompt back as a single response step.
///
/// Selected with `engine = "echo"` in the configuration; useful for
/// exercising the session loop without network access.
#[derive(Debug)]
pub struct EchoEngine;

impl Engine for EchoEngine {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn run(
        &self,
        request: EngineRequest,
        steps: StepTx,
    ) -> BoxFuture<'static, anyhow::Result<EngineOutcome>> {
        Box::pin(async move {
            let reply = request.prompt.clone();
            let step = Step::Response(Response {
                parts: vec![ResponsePart::Text {
                    content: reply.clone(),
                }],
            });
            // A closed receiver means the consumer is unwinding; stop quietly.
            if steps.send(step).await.is_err() {
                return Ok(EngineOutcome {
                    final_text: String::new(),
                    usage: UsageSample::default(),
                });
            }
            Ok(EngineOutcome {
                final_text: reply,
                usage: UsageSample {
                    input_tokens: request.prompt.len() as u64,
                    output_tokens: request.prompt.len() as u64,
                    details: Vec::new(),
                },
            })
        })
    }
}
