//! Terminal output helpers.
//!
//! Output contract: assistant text goes to stdout, everything else (status,
//! spinner, prompts, errors) goes to stderr.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dendrite_core::core::engine::StatusSink;
use tokio::task::JoinHandle;

const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Shared pause switch for a spinner. Paused means the spinner stops
/// drawing and clears its line, so a prompt can use the terminal.
#[derive(Clone, Debug, Default)]
pub struct SpinnerPause(Arc<AtomicBool>);

impl SpinnerPause {
    pub fn pause(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress indicator on stderr while a request is in flight.
pub struct Spinner {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Spinner {
    pub fn start(message: &str, pause: SpinnerPause) -> Self {
        Self::start_with_writer(message, pause, std::io::stderr())
    }

    fn start_with_writer<W>(message: &str, pause: SpinnerPause, mut writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let message = message.to_string();
        let handle = tokio::spawn(async move {
            let mut frame = 0;
            let mut drawing = false;
            let mut interval = tokio::time::interval(Duration::from_millis(120));
            loop {
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                if pause.is_paused() {
                    if drawing {
                        let _ = write!(writer, "\r\x1b[2K");
                        let _ = writer.flush();
                        drawing = false;
                    }
                } else {
                    let _ = write!(
                        writer,
                        "\r{} {message}",
                        SPINNER_FRAMES[frame % SPINNER_FRAMES.len()]
                    );
                    let _ = writer.flush();
                    frame += 1;
                    drawing = true;
                }
                interval.tick().await;
            }
            if drawing {
                let _ = write!(writer, "\r\x1b[2K");
                let _ = writer.flush();
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stops the spinner and waits for its line to be cleared.
    pub async fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

const MAX_FIELD_LEN: usize = 120;

/// Status narration on stderr.
pub struct CliStatus;

impl StatusSink for CliStatus {
    fn status(&self, title: &str, fields: &[(&str, String)]) {
        let mut line = format!("⚙ {title}");
        for (key, value) in fields {
            let mut value = value.replace('\n', " ");
            if value.chars().count() > MAX_FIELD_LEN {
                value = value.chars().take(MAX_FIELD_LEN).collect();
                value.push('…');
            }
            line.push_str(&format!(" {key}={value}"));
        }
        // Leading \r + clear in case a spinner frame occupies the line.
        eprintln!("\r\x1b[2K{line}");
    }
}
