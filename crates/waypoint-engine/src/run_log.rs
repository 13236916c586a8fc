use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use waypoint_core::config::LogConfig;
use waypoint_core::event::EventBus;
use waypoint_core::types::{RunEvent, RunId};

/// JSONL run audit trail.
///
/// Subscribes to the EventBus and writes one JSON object per line to
/// `{log_dir}/{run_id}/{timestamp}.jsonl`. Lines are flushed as they are
/// written, so a crash mid-run leaves every earlier line intact.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

/// A single log entry written to the JSONL file.
#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    /// `level` controls verbosity: 1 = run summary, 2 = + steps, 3 = + transitions.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    pub fn from_config(config: &LogConfig) -> Self {
        Self::new(config.dir_path(), config.level)
    }

    /// Where the log for `run_id` started at `timestamp` is written.
    pub fn log_path(&self, run_id: &RunId, timestamp: &str) -> PathBuf {
        self.log_dir
            .join(&run_id.0)
            .join(format!("{}.jsonl", timestamp))
    }

    /// Write entries for `run_id` until its final event, the bus closing,
    /// or cancellation. Returns the file path if one was opened.
    ///
    /// Subscribe before starting the run (call this via `tokio::spawn`
    /// first) or early events are missed.
    pub async fn run(
        self,
        event_bus: Arc<EventBus>,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> Option<PathBuf> {
        let rx = event_bus.subscribe();
        self.run_with_receiver(rx, run_id, cancel).await
    }

    /// Like [`RunLogger::run`], with a receiver subscribed by the caller.
    pub async fn run_with_receiver(
        self,
        mut rx: tokio::sync::broadcast::Receiver<RunEvent>,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> Option<PathBuf> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = self.log_path(&run_id, &timestamp);
        let mut writer = match open(&log_path).await {
            Ok(writer) => writer,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open run log");
                return None;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if event.run_id() != &run_id {
                                continue;
                            }
                            if let Some(entry) = self.event_to_entry(&event) {
                                if let Ok(json) = serde_json::to_string(&entry) {
                                    let line = format!("{}\n", json);
                                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                                        error!(error = %e, "Failed to write run log entry");
                                        break;
                                    }
                                    if let Err(e) = writer.flush().await {
                                        error!(error = %e, "Failed to flush run log");
                                    }
                                }
                            }
                            if event.is_final() {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
        Some(log_path)
    }

    /// Convert a RunEvent to a log entry (None if filtered by level).
    fn event_to_entry(&self, event: &RunEvent) -> Option<LogEntry> {
        let entry = |event_type, step: Option<&String>, detail| LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            run_id: event.run_id().to_string(),
            event_type,
            step: step.cloned(),
            detail,
        };

        match event {
            // L1: run summary
            RunEvent::RunStarted { start, .. } => Some(entry(
                "run_started",
                None,
                Some(serde_json::json!({ "start": start })),
            )),
            RunEvent::RunFinished {
                status,
                steps_executed,
                ..
            } => Some(entry(
                "run_finished",
                None,
                Some(serde_json::json!({
                    "status": status,
                    "steps_executed": steps_executed,
                })),
            )),
            RunEvent::RunFailed { error, .. } => Some(entry(
                "run_failed",
                None,
                Some(serde_json::json!({ "error": error })),
            )),

            // L2: per-step events
            RunEvent::StepStarted {
                step, iteration, ..
            } if self.level >= 2 => Some(entry(
                "step_started",
                Some(step),
                Some(serde_json::json!({ "iteration": iteration })),
            )),
            RunEvent::StepCompleted {
                step,
                elapsed_ms,
                log_records,
                ..
            } if self.level >= 2 => Some(entry(
                "step_completed",
                Some(step),
                Some(serde_json::json!({
                    "elapsed_ms": elapsed_ms,
                    "log_records": log_records,
                })),
            )),
            RunEvent::StepFailed { step, error, .. } if self.level >= 2 => Some(entry(
                "step_failed",
                Some(step),
                Some(serde_json::json!({ "error": truncate_str(error, 500) })),
            )),

            // L3: routing decisions
            RunEvent::Transition {
                from, to, reason, ..
            } if self.level >= 3 => Some(entry(
                "transition",
                Some(from),
                Some(serde_json::json!({ "to": to, "reason": reason })),
            )),

            _ => None,
        }
    }
}

async fn open(path: &Path) -> std::io::Result<tokio::io::BufWriter<tokio::fs::File>> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(tokio::io::BufWriter::new(file))
}

/// Truncate a string for logging, on a character boundary.
fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
