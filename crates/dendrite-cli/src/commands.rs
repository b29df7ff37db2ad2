//! Slash command parsing and dispatch.
//!
//! Commands are a closed set; an unknown `/token` still counts as handled so
//! it never falls through to the engine as a prompt.

use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use dendrite_core::config::Config;
use dendrite_core::core::dump;
use dendrite_core::core::session::{SharedHistory, SharedSession, SharedUsage};
use dendrite_core::models;

/// One parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/model [n] [default]`
    Model { index: Option<usize>, default: bool },
    Usage,
    Clear,
    Yolo,
    Help,
    Dump,
    Unknown(String),
}

/// Parses one input line. Returns `None` for non-command input.
pub fn parse(input: &str) -> Option<Command> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut tokens = trimmed.split_whitespace();
    let name = tokens.next().unwrap_or_default();
    let command = match name {
        "/model" => {
            let mut index = None;
            let mut default = false;
            for token in tokens {
                if token.eq_ignore_ascii_case("default") {
                    default = true;
                } else if let Ok(n) = token.parse::<usize>() {
                    index = Some(n);
                }
            }
            Command::Model { index, default }
        }
        "/usage" => Command::Usage,
        "/clear" => Command::Clear,
        "/yolo" => Command::Yolo,
        "/help" => Command::Help,
        "/dump" => Command::Dump,
        other => Command::Unknown(other.to_string()),
    };
    Some(command)
}

pub struct CommandContext<'a> {
    pub session: &'a SharedSession,
    pub history: &'a SharedHistory,
    pub usage: &'a SharedUsage,
    pub config_path: &'a Path,
    pub working_dir: &'a Path,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Executes one command, writing user-facing output to `out`.
pub fn dispatch(command: &Command, ctx: &CommandContext<'_>, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Model { index: None, .. } => list_models(ctx, out)?,
        Command::Model {
            index: Some(n),
            default,
        } => select_model(ctx, *n, *default, out)?,
        Command::Usage => show_usage(ctx, out)?,
        Command::Clear => {
            lock(ctx.history).clear();
            writeln!(out, "History cleared.")?;
        }
        Command::Yolo => {
            let enabled = lock(ctx.session).gate.toggle();
            if enabled {
                writeln!(out, "Tool confirmations enabled.")?;
            } else {
                writeln!(out, "Tool confirmations disabled.")?;
            }
        }
        Command::Help => show_help(out)?,
        Command::Dump => {
            let history = lock(ctx.history);
            let path = dump::write_dump(&history, ctx.working_dir)?;
            writeln!(out, "Conversation written to {}", path.display())?;
        }
        Command::Unknown(name) => {
            writeln!(out, "Unknown command: {name}")?;
            writeln!(out, "Type /help for available commands.")?;
        }
    }
    Ok(())
}

fn show_help(out: &mut impl Write) -> Result<()> {
    writeln!(out, "Commands:")?;
    writeln!(
        out,
        "  /model [n] [default]  List models, switch the session model, or set the default"
    )?;
    writeln!(out, "  /usage                Show token usage and cost")?;
    writeln!(out, "  /clear                Clear conversation history")?;
    writeln!(out, "  /yolo                 Toggle tool confirmations")?;
    writeln!(out, "  /dump                 Write the conversation to dump.log")?;
    writeln!(out, "  /help                 Show this help")?;
    writeln!(out, "  exit | quit           Leave the session")?;
    Ok(())
}

fn list_models(ctx: &CommandContext<'_>, out: &mut impl Write) -> Result<()> {
    let current = lock(ctx.session).current_model.clone();
    writeln!(out, "Models:")?;
    for (i, model) in models::MODELS.iter().enumerate() {
        let marker = if model.id == current { "*" } else { " " };
        writeln!(
            out,
            "{marker} {:2}. {}  ({}k context)",
            i + 1,
            model.id,
            model.context_window / 1_000
        )?;
    }
    Ok(())
}

fn select_model(
    ctx: &CommandContext<'_>,
    index: usize,
    default: bool,
    out: &mut impl Write,
) -> Result<()> {
    let Some(model) = index.checked_sub(1).and_then(|i| models::MODELS.get(i)) else {
        writeln!(out, "Invalid model number: {index}")?;
        writeln!(out, "Use /model to list available models.")?;
        return Ok(());
    };

    if default {
        Config::save_default_model_to(ctx.config_path, model.id)?;
        writeln!(out, "Default model set to {}", model.id)?;
    } else {
        lock(ctx.session).current_model = model.id.to_string();
        writeln!(out, "Session model set to {}", model.id)?;
    }
    Ok(())
}

fn show_usage(ctx: &CommandContext<'_>, out: &mut impl Write) -> Result<()> {
    let usage = lock(ctx.usage);
    if usage.total_requests() == 0 {
        writeln!(out, "No requests recorded yet.")?;
        return Ok(());
    }

    writeln!(out, "Usage by model:")?;
    for (model, totals) in usage.per_model() {
        writeln!(
            out,
            "  {model}  requests={} input={} cached={} output={} cost=${:.4}",
            totals.requests,
            totals.input_tokens,
            totals.cached_tokens,
            totals.output_tokens,
            totals.total_cost,
        )?;
    }
    if let Some(last) = usage.last_request() {
        writeln!(
            out,
            "Last request: {}  input={} cached={} output={} cost=${:.4}",
            last.model_id, last.input_tokens, last.cached_tokens, last.output_tokens, last.request_cost,
        )?;
    }
    writeln!(
        out,
        "Total: requests={} tokens={} cost=${:.4}",
        usage.total_requests(),
        usage.total_tokens(),
        usage.total_cost(),
    )?;
    Ok(())
}
