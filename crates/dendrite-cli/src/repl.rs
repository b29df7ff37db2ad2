//! Interactive session loop.
//!
//! Single-threaded cooperative read-dispatch-render loop with at most one
//! request task in flight. The interrupt controller is armed for the loop's
//! duration: during a request, Ctrl+C cancels the tracked task; at the
//! prompt, it exits the loop.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use dendrite_core::core::agent::{CancelFlag, RequestContext, process_request};
use dendrite_core::core::engine::Engine;
use dendrite_core::core::interrupt::{self, InterruptedError};
use dendrite_core::core::mcp::{McpLifecycle, ToolInfo};
use dendrite_core::core::session::{SharedHistory, SharedSession, SharedUsage};

use crate::commands::{self, CommandContext};
use crate::confirm::GateConfirm;
use crate::input;
use crate::ui::{CliStatus, Spinner, SpinnerPause};

const PROMPT_PREFIX: &str = "you> ";

pub struct ReplContext {
    pub engine: Arc<dyn Engine>,
    pub servers: Arc<McpLifecycle>,
    pub history: SharedHistory,
    pub usage: SharedUsage,
    pub session: SharedSession,
    pub config_path: PathBuf,
    pub working_dir: PathBuf,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub async fn run(ctx: ReplContext) -> Result<()> {
    interrupt::arm();
    let result = run_loop(&ctx).await;
    interrupt::disarm();
    result
}

async fn run_loop(ctx: &ReplContext) -> Result<()> {
    {
        let session = lock(&ctx.session);
        eprintln!(
            "dendrite session (model: {}). Type /help for commands.",
            session.current_model
        );
    }
    announce_servers(ctx).await;

    loop {
        {
            let mut stdout = std::io::stdout();
            write!(stdout, "{PROMPT_PREFIX}")?;
            stdout.flush()?;
        }

        let input = tokio::select! {
            biased;
            () = interrupt::wait_for_interrupt() => {
                interrupt::reset();
                eprintln!();
                break;
            }
            line = read_input() => match line {
                None => break,
                Some(line) => line,
            },
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }
        if is_exit_token(trimmed) {
            break;
        }

        if let Some(command) = commands::parse(trimmed) {
            let cmd_ctx = CommandContext {
                session: &ctx.session,
                history: &ctx.history,
                usage: &ctx.usage,
                config_path: &ctx.config_path,
                working_dir: &ctx.working_dir,
            };
            let mut stdout = std::io::stdout();
            if let Err(err) = commands::dispatch(&command, &cmd_ctx, &mut stdout) {
                eprintln!("Error: {err:#}");
            }
            continue;
        }

        run_request(ctx, trimmed).await;
    }

    Ok(())
}

fn is_exit_token(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

/// Lists the configured tool servers' tools at session start. Servers come
/// up, advertise, and go back down; each request re-acquires them.
async fn announce_servers(ctx: &ReplContext) {
    if !ctx.servers.is_configured() {
        return;
    }
    if let Err(err) = ctx.servers.acquire().await {
        eprintln!("Warning: failed to start tool servers: {err:#}");
        return;
    }
    let tools = ctx.servers.tools().await;
    if tools.is_empty() {
        eprintln!("Tool servers configured, but no tools are available.");
    } else {
        let names: Vec<String> = tools.iter().map(ToolInfo::display_name).collect();
        eprintln!("Tools: {}", names.join(", "));
    }
    ctx.servers.release().await;
}

/// Reads one input from the shared stdin queue, joining lines whose trailing
/// backslash marks a continuation. Returns `None` at end of input.
async fn read_input() -> Option<String> {
    let mut collected = String::new();
    loop {
        let Some(line) = input::next_line().await else {
            return if collected.is_empty() {
                None
            } else {
                Some(collected)
            };
        };
        let line = line.trim_end_matches(['\n', '\r']);
        if let Some(stripped) = line.strip_suffix('\\') {
            collected.push_str(stripped);
            collected.push('\n');
            continue;
        }
        collected.push_str(line);
        return Some(collected);
    }
}

/// Spawns one orchestrator task and tracks it until completion or interrupt.
async fn run_request(ctx: &ReplContext, prompt: &str) {
    let cancel = Arc::new(CancelFlag::new());
    let pause = SpinnerPause::default();
    let model = lock(&ctx.session).current_model.clone();

    let request_ctx = RequestContext {
        engine: Arc::clone(&ctx.engine),
        servers: Arc::clone(&ctx.servers),
        history: Arc::clone(&ctx.history),
        usage: Arc::clone(&ctx.usage),
        confirm: Arc::new(GateConfirm::new(Arc::clone(&ctx.session), pause.clone())),
        status: Arc::new(CliStatus),
        model,
        cancel: Arc::clone(&cancel),
    };
    let prompt = prompt.to_string();
    let mut task = tokio::spawn(async move { process_request(&request_ctx, &prompt).await });
    let spinner = Spinner::start("working...", pause.clone());

    let outcome = tokio::select! {
        biased;
        () = interrupt::wait_for_interrupt() => {
            // Progress indicator first, then subprocesses: tool servers may
            // be mid-call; taking them down lets the task's pending I/O
            // resolve so it can unwind.
            pause.pause();
            kill_descendants();
            cancel.cancel();
            let outcome = (&mut task).await;
            interrupt::reset();
            outcome
        }
        outcome = &mut task => outcome,
    };
    spinner.stop().await;

    match outcome {
        Ok(Ok(text)) => {
            if !text.is_empty() {
                println!("{text}");
            }
        }
        Ok(Err(err)) if err.downcast_ref::<InterruptedError>().is_some() => {
            eprintln!("Interrupted.");
        }
        Ok(Err(err)) => {
            eprintln!("Error: {err:#}");
        }
        Err(join_err) => {
            eprintln!("Error: request task failed: {join_err}");
        }
    }
}

/// Best-effort termination of descendant subprocesses. Failures are ignored;
/// a server that survives is reaped by the lifecycle release anyway.
fn kill_descendants() {
    #[cfg(unix)]
    {
        let _ = std::process::Command::new("pkill")
            .args(["-P", &std::process::id().to_string()])
            .status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_tokens_case_insensitive() {
        assert!(is_exit_token("exit"));
        assert!(is_exit_token("QUIT"));
        assert!(is_exit_token("Exit"));
        assert!(!is_exit_token("exit now"));
        assert!(!is_exit_token("/exit"));
    }
}
