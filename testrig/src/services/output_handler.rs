//! Helpers to handle child process stdout/stderr output
//!
//! Both pipes of a supervised child are always piped and drained by their own
//! task, so a child that only writes one stream can never block on the other.
//! Each line is:
//! - appended to an in-memory [`OutputBuffer`]
//! - forwarded to a live receiver once one has been requested
//! - echoed to the log when the command asked for it

use std::fmt;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// Captured lines of one stream, shared between the drain task and the handle
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<BufferState>>,
}

#[derive(Debug, Default)]
struct BufferState {
    lines: Vec<String>,
    live: Option<mpsc::UnboundedSender<String>>,
    closed: bool,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BufferState> {
        // A panicking reader must not hide output from the caller
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, line: String) {
        let mut state = self.state();
        if let Some(live) = &state.live {
            if live.send(line.clone()).is_err() {
                state.live = None;
            }
        }
        state.lines.push(line);
    }

    /// Stop forwarding; live receivers end once they have read everything
    fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        state.live = None;
    }

    /// Receiver yielding every line captured so far, then each new one until
    /// the stream ends. Nothing is queued for live delivery before this is
    /// called.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        for line in &state.lines {
            let _ = tx.send(line.clone());
        }
        if !state.closed {
            state.live = Some(tx);
        }
        rx
    }

    pub fn has_subscriber(&self) -> bool {
        self.state().live.is_some()
    }

    /// Copy of every line captured so far
    pub fn snapshot(&self) -> Vec<String> {
        self.state().lines.clone()
    }

    /// Last `n` captured lines
    pub fn tail(&self, n: usize) -> Vec<String> {
        let state = self.state();
        let start = state.lines.len().saturating_sub(n);
        state.lines[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.state().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Configure stdio for a supervised child
pub fn configure_child_stdio(cmd: &mut tokio::process::Command) {
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null());
}

/// Spawn a task draining `reader` line by line until EOF
pub fn spawn_output_drain<R>(
    reader: R,
    kind: StreamKind,
    program: String,
    echo: bool,
    buffer: OutputBuffer,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut raw = Vec::new();

        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    // Tools are not obliged to write UTF-8; keep draining regardless
                    let line = String::from_utf8_lossy(&raw)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    if echo {
                        tracing::info!(program = %program, stream = %kind, "{}", line);
                    }
                    buffer.push(line);
                }
                Err(e) => {
                    tracing::debug!(program = %program, stream = %kind, "stopped draining: {}", e);
                    break;
                }
            }
        }
        buffer.close();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_preserves_order() {
        let input: &[u8] = b"one\ntwo\r\nthree";
        let buffer = OutputBuffer::new();

        spawn_output_drain(input, StreamKind::Stdout, "test".to_string(), false, buffer.clone())
            .await
            .unwrap();

        assert_eq!(buffer.snapshot(), vec!["one", "two", "three"]);
        assert_eq!(buffer.tail(2), vec!["two", "three"]);
        assert!(!buffer.has_subscriber());
    }

    #[tokio::test]
    async fn test_drain_survives_invalid_utf8_and_dropped_receiver() {
        let input: &[u8] = b"ok\n\xff\xfe\nafter\n";
        let buffer = OutputBuffer::new();
        drop(buffer.subscribe());

        spawn_output_drain(input, StreamKind::Stderr, "test".to_string(), true, buffer.clone())
            .await
            .unwrap();

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.snapshot()[2], "after");
        assert!(!buffer.has_subscriber());
    }

    #[tokio::test]
    async fn test_subscriber_gets_backlog_then_new_lines() {
        let buffer = OutputBuffer::new();
        buffer.push("early".to_string());

        let mut rx = buffer.subscribe();
        buffer.push("late".to_string());
        buffer.close();

        assert_eq!(rx.recv().await.as_deref(), Some("early"));
        assert_eq!(rx.recv().await.as_deref(), Some("late"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_subscribe_after_close_replays_and_ends() {
        let buffer = OutputBuffer::new();
        buffer.push("only".to_string());
        buffer.close();

        let mut rx = buffer.subscribe();
        assert!(!buffer.has_subscriber());
        assert_eq!(rx.recv().await.as_deref(), Some("only"));
        assert_eq!(rx.recv().await, None);
    }
}
