//! Interactive confirmation prompt backed by the session's gate.

use std::sync::{Mutex, MutexGuard, PoisonError};

use dendrite_core::core::confirm::PromptOutcome;
use dendrite_core::core::engine::ConfirmAction;
use dendrite_core::core::session::SharedSession;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::input;
use crate::ui::SpinnerPause;

/// Asks on stderr before a gated tool call runs. The prompt blocks the whole
/// session loop by design; there is never a concurrent task to starve. The
/// spinner is paused while the prompt owns the terminal.
pub struct GateConfirm {
    session: SharedSession,
    spinner: SpinnerPause,
}

impl GateConfirm {
    pub fn new(session: SharedSession, spinner: SpinnerPause) -> Self {
        Self { session, spinner }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConfirmAction for GateConfirm {
    fn confirm(&self, tool_name: &str, args: &Value, remote: bool) -> BoxFuture<'_, bool> {
        let tool_name = tool_name.to_string();
        let args = args.clone();
        Box::pin(async move {
            {
                let session = lock(&self.session);
                let skip = if remote {
                    session.gate.precheck_remote(&tool_name)
                } else {
                    session.gate.precheck(&tool_name)
                };
                if skip {
                    return true;
                }
            }

            self.spinner.pause();
            eprintln!("\nTool: {tool_name}");
            eprintln!("Args: {args}");
            eprintln!("  y: Yes, execute this tool");
            eprintln!("  a: Always allow this tool");
            eprintln!("  n: No, cancel this execution");

            // Answers come from the shared stdin queue; if this future is
            // cancelled mid-prompt, the user's next line stays queued for
            // the session loop instead of being swallowed. The gate lock is
            // never held across the read.
            let approved = loop {
                eprint!("Continue? (y): ");
                let line = input::next_line().await;
                match lock(&self.session)
                    .gate
                    .handle_line(&tool_name, line.as_deref())
                {
                    PromptOutcome::Approved => break true,
                    PromptOutcome::Denied => break false,
                    PromptOutcome::Reprompt => eprintln!("Please answer y, a, or n."),
                }
            };
            self.spinner.resume();
            approved
        })
    }
}
