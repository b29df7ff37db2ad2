//! Cooperative interrupt handling.
//!
//! The Ctrl+C handler only sets a flag and wakes waiters; it never touches
//! task or history state. The session loop and the orchestrator observe the
//! flag on their own turn via `wait_for_interrupt` in a biased select.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

static ARMED: AtomicBool = AtomicBool::new(false);
static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static INTERRUPT_NOTIFY: OnceLock<Notify> = OnceLock::new();

/// Marker error for user-driven cancellation. Never reported as a failure.
#[derive(Debug)]
pub struct InterruptedError;

impl std::fmt::Display for InterruptedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interrupted")
    }
}

impl std::error::Error for InterruptedError {}

/// Installs the Ctrl+C handler.
///
/// While disarmed the handler behaves like the default one and exits with
/// status 130. While armed it sets the interrupt flag; a second Ctrl+C before
/// the flag is consumed force-exits.
///
/// # Panics
/// Panics if registering the Ctrl+C handler fails.
pub fn init() {
    ctrlc::set_handler(move || {
        trigger_ctrl_c();
    })
    .expect("Error setting Ctrl+C handler");
}

/// Enables interactive interrupt handling for the session loop's duration.
pub fn arm() {
    INTERRUPTED.store(false, Ordering::SeqCst);
    ARMED.store(true, Ordering::SeqCst);
}

/// Restores default-like Ctrl+C behavior (immediate exit).
pub fn disarm() {
    ARMED.store(false, Ordering::SeqCst);
}

fn notify_waiters() {
    INTERRUPT_NOTIFY.get_or_init(Notify::new).notify_waiters();
}

/// Triggers an interrupt, force-exiting on a second Ctrl+C.
pub fn trigger_ctrl_c() {
    if !ARMED.load(Ordering::SeqCst) {
        std::process::exit(130);
    }
    if INTERRUPTED.swap(true, Ordering::SeqCst) {
        // Second interrupt while unwinding - force exit.
        std::process::exit(130);
    }
    notify_waiters();
}

/// Checks if an interrupt has been requested.
pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Waits until an interrupt is triggered.
pub async fn wait_for_interrupt() {
    loop {
        if is_interrupted() {
            return;
        }
        INTERRUPT_NOTIFY.get_or_init(Notify::new).notified().await;
    }
}

/// Resets the interrupt flag.
pub fn reset() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// Sets the interrupt flag directly, bypassing the signal handler.
///
/// Used by tests and by code paths that must cancel the in-flight request
/// without a real Ctrl+C.
pub fn trigger() {
    INTERRUPTED.store(true, Ordering::SeqCst);
    notify_waiters();
}
