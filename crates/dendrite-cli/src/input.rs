//! Shared stdin line queue.
//!
//! All line input (REPL prompts and confirmation answers) flows through one
//! long-lived reader thread feeding a channel. A consumer that is cancelled
//! while awaiting a line leaves the line in the channel for the next
//! consumer, so an abandoned confirmation prompt can never swallow the
//! user's next input.

use std::io::BufRead;
use std::sync::OnceLock;

use tokio::sync::{Mutex, mpsc};

/// Line queue fed by a dedicated reader thread.
pub struct LineQueue {
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl LineQueue {
    /// Spawns the reader thread over `reader`. The channel closes at end of
    /// input or on a read error.
    pub fn spawn(mut reader: impl BufRead + Send + 'static) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(line.clone()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self {
            rx: Mutex::new(rx),
        }
    }

    /// Next raw line (with its terminator), or `None` at end of input.
    ///
    /// `recv` is cancel-safe: dropping this future mid-wait loses nothing.
    pub async fn next_line(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }
}

static STDIN: OnceLock<LineQueue> = OnceLock::new();

/// Next line from the process's stdin queue.
pub async fn next_line() -> Option<String> {
    STDIN
        .get_or_init(|| LineQueue::spawn(std::io::BufReader::new(std::io::stdin())))
        .next_line()
        .await
}
