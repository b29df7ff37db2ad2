//! Per-tool confirmation policy.
//!
//! The gate holds pure policy state; reading the user's answer is the
//! caller's concern. Local tool calls skip the prompt entirely while the
//! gate is disabled. Remote tool-server calls consult only the per-tool
//! exemption set, never the global toggle.

use std::collections::BTreeSet;

/// The user declined a pending tool execution.
///
/// Surfaced as a cancellation of the request, not a failure.
#[derive(Debug)]
pub struct DeniedError {
    pub tool_name: String,
}

impl std::fmt::Display for DeniedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tool execution denied: {}", self.tool_name)
    }
}

impl std::error::Error for DeniedError {}

/// Result of handling one line of prompt input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    Approved,
    Denied,
    /// Unrecognized input; ask for another line.
    Reprompt,
}

/// Outcome of mapping one prompt answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    /// Approve this call only.
    Once,
    /// Approve this call and exempt the tool for the rest of the session.
    Always,
    /// Deny the call.
    Deny,
}

/// Confirmation state for one session.
#[derive(Debug)]
pub struct ConfirmationGate {
    enabled: bool,
    always_allow: BTreeSet<String>,
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self {
            enabled: true,
            always_allow: BTreeSet::new(),
        }
    }
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True if a local tool call may run without prompting.
    pub fn precheck(&self, tool_name: &str) -> bool {
        !self.enabled || self.always_allow.contains(tool_name)
    }

    /// True if a remote tool-server call may run without prompting.
    ///
    /// Remote calls are confirmed unconditionally with respect to the global
    /// toggle; only an explicit "always" answer for the tool skips the
    /// prompt.
    pub fn precheck_remote(&self, tool_name: &str) -> bool {
        self.always_allow.contains(tool_name)
    }

    /// Maps one line of prompt input to an answer.
    ///
    /// Blank input approves once. Returns `None` for unrecognized input,
    /// which the caller answers with a reprompt.
    pub fn parse_answer(input: &str) -> Option<Answer> {
        match input.trim().to_lowercase().as_str() {
            "" | "y" | "yes" => Some(Answer::Once),
            "a" | "always" => Some(Answer::Always),
            "n" | "no" => Some(Answer::Deny),
            _ => None,
        }
    }

    /// Applies an answer for a tool, returning whether the call may run.
    pub fn apply_answer(&mut self, tool_name: &str, answer: Answer) -> bool {
        match answer {
            Answer::Once => true,
            Answer::Always => {
                self.always_allow.insert(tool_name.to_string());
                true
            }
            Answer::Deny => false,
        }
    }

    /// Handles one line of prompt input for `tool_name`. `None` (end of
    /// input) denies. Callers own the prompt loop; this owns the policy.
    pub fn handle_line(&mut self, tool_name: &str, line: Option<&str>) -> PromptOutcome {
        let Some(line) = line else {
            return PromptOutcome::Denied;
        };
        match Self::parse_answer(line) {
            Some(answer) => {
                if self.apply_answer(tool_name, answer) {
                    PromptOutcome::Approved
                } else {
                    PromptOutcome::Denied
                }
            }
            None => PromptOutcome::Reprompt,
        }
    }

    /// Flips the gate. Re-enabling starts from a clean slate: the exemption
    /// set is cleared when the flip lands on `enabled == true`.
    pub fn toggle(&mut self) -> bool {
        self.enabled = !self.enabled;
        if self.enabled {
            self.always_allow.clear();
        }
        tracing::debug!(enabled = self.enabled, "toggled confirmation gate");
        self.enabled
    }
}
