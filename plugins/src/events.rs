//! JSONL event sink: one serialized `PlanEvent` per line, written by a
//! background task so `emit` never blocks the executor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use conductor_core::config::EventsOutConfig;
use conductor_core::executor::traits::{PlanEvent, PlanEventSink};

pub const STDOUT_PATH: &str = "stdout:";

enum LineTx {
    /// Full channel drops the line and bumps the counter.
    Lossy(mpsc::Sender<String>),
    Lossless(mpsc::UnboundedSender<String>),
}

enum LineRx {
    Lossy(mpsc::Receiver<String>),
    Lossless(mpsc::UnboundedReceiver<String>),
}

impl LineRx {
    async fn recv(&mut self) -> Option<String> {
        match self {
            Self::Lossy(rx) => rx.recv().await,
            Self::Lossless(rx) => rx.recv().await,
        }
    }
}

pub struct JsonlEventSink {
    tx: Mutex<Option<LineTx>>,
    dropped: AtomicU64,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl JsonlEventSink {
    /// Opens the target and spawns the writer task. Must run inside a tokio
    /// runtime. `Ok(None)` when events-out is disabled.
    pub async fn start(cfg: &EventsOutConfig) -> Result<Option<Self>> {
        let path = cfg.path.trim();
        if !cfg.enabled || path.is_empty() {
            return Ok(None);
        }

        let writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = if path == STDOUT_PATH {
            Box::new(tokio::io::stdout())
        } else {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .with_context(|| format!("open events file {path}"))?;
            Box::new(file)
        };

        let (tx, rx) = if cfg.drop_when_full {
            let (tx, rx) = mpsc::channel::<String>(cfg.channel_capacity.max(1));
            (LineTx::Lossy(tx), LineRx::Lossy(rx))
        } else {
            let (tx, rx) = mpsc::unbounded_channel::<String>();
            (LineTx::Lossless(tx), LineRx::Lossless(rx))
        };
        let handle = tokio::spawn(write_lines(writer, rx));

        Ok(Some(Self {
            tx: Mutex::new(Some(tx)),
            dropped: AtomicU64::new(0),
            writer: Mutex::new(Some(handle)),
        }))
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Closes the channel and waits until every queued line is flushed.
    pub async fn shutdown(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        let handle = self.writer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "events writer task failed");
            }
        }
    }

    fn send_line(&self, line: String) {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(LineTx::Lossy(tx)) => {
                if tx.try_send(line).is_err() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Some(LineTx::Lossless(tx)) => {
                if tx.send(line).is_err() {
                    // writer closed
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

async fn write_lines(mut writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send>, mut rx: LineRx) {
    while let Some(mut line) = rx.recv().await {
        if !line.ends_with('\n') {
            line.push('\n');
        }
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::warn!(error = %e, "events writer stopped");
            return;
        }
    }
    let _ = writer.flush().await;
}

impl PlanEventSink for JsonlEventSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn emit(&self, event: &PlanEvent) {
        match serde_json::to_string(event) {
            Ok(line) => self.send_line(line),
            Err(e) => tracing::warn!(event = event.kind(), error = %e, "event not serializable"),
        }
    }
}
