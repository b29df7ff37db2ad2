//! Mutable per-session state.

use std::sync::{Arc, Mutex};

use crate::core::confirm::ConfirmationGate;
use crate::core::history::MessageHistory;
use crate::core::usage::UsageTracker;

/// State mutated by command handlers across the session's lifetime.
#[derive(Debug)]
pub struct SessionState {
    pub current_model: String,
    pub gate: ConfirmationGate,
}

impl SessionState {
    pub fn new(current_model: impl Into<String>) -> Self {
        Self {
            current_model: current_model.into(),
            gate: ConfirmationGate::new(),
        }
    }
}

/// Session state shared between the loop and the in-flight request task.
///
/// Locks are held only for the duration of one read or append, never across
/// an await point. The session loop guarantees at most one request task, so
/// contention is limited to status reads.
pub type SharedSession = Arc<Mutex<SessionState>>;

/// Conversation log shared the same way.
pub type SharedHistory = Arc<Mutex<MessageHistory>>;

/// Usage accumulator shared the same way.
pub type SharedUsage = Arc<Mutex<UsageTracker>>;

pub fn shared_session(state: SessionState) -> SharedSession {
    Arc::new(Mutex::new(state))
}

pub fn shared_history(history: MessageHistory) -> SharedHistory {
    Arc::new(Mutex::new(history))
}

pub fn shared_usage(usage: UsageTracker) -> SharedUsage {
    Arc::new(Mutex::new(usage))
}
