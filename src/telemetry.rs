//! Newline-delimited JSON telemetry for detection/escalation events, with
//! the teacher's size-triggered rotation and single gzip-compressed
//! backup. Where the teacher's `TelemetrySink` distinguished "telemetry"
//! records from "audit" records, this sink has only one stream: every
//! `DetectionEvent` a `Channel` records.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::session::DetectionEvent;

pub struct RotatingWriter {
    path: PathBuf,
    file: fs::File,
    max_bytes: Option<u64>,
    keep: usize,
    compress: bool,
}

impl RotatingWriter {
    pub fn open(path: &str, max_bytes: Option<u64>, keep: usize, compress: bool) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: PathBuf::from(path),
            file,
            max_bytes,
            keep,
            compress,
        })
    }

    fn check_rotate(&mut self) {
        if let Some(limit) = self.max_bytes {
            if self.exceeds_limit(limit) {
                self.rotate_backups();
                self.compress_latest_backup();
                self.reopen_current();
            }
        }
    }

    fn write_line_result(&mut self, line: &str) -> std::io::Result<()> {
        self.check_rotate();
        writeln!(self.file, "{}", line)
    }

    fn current_size(&self) -> Option<u64> {
        self.path.metadata().ok().map(|m| m.len())
    }

    fn exceeds_limit(&self, limit: u64) -> bool {
        self.path.metadata().map(|meta| meta.len() >= limit).unwrap_or(false)
    }

    fn rotate_backups(&self) {
        if self.keep == 0 {
            return;
        }
        for idx in (1..=self.keep).rev() {
            let old = if idx == 1 {
                self.path.clone()
            } else {
                self.path.with_extension(format!("{}", idx - 1))
            };
            if old.exists() {
                let new = self.path.with_extension(format!("{}", idx));
                let _ = fs::rename(&old, &new);
            }
        }
    }

    fn compress_latest_backup(&self) {
        if !self.compress || self.keep == 0 {
            return;
        }
        let rotated = self.path.with_extension("1");
        if let Ok(data) = fs::read(&rotated) {
            let gz_path = rotated.with_extension("1.gz");
            let mut gz = GzEncoder::new(Vec::new(), Compression::default());
            if gz.write_all(&data).is_ok() {
                if let Ok(buf) = gz.finish() {
                    let _ = fs::write(&gz_path, buf);
                    let _ = fs::remove_file(&rotated);
                }
            }
        }
    }

    fn reopen_current(&mut self) {
        if let Ok(newf) = fs::OpenOptions::new().create(true).write(true).truncate(true).open(&self.path) {
            self.file = newf;
        }
    }
}

/// Mirrors detection/escalation events to a rotating file and/or stdout.
/// Owned by the driver, handed a `Vec<DetectionEvent>` once a run against
/// one target finishes (a `Channel`'s own event list is the source of
/// truth while the run is in progress).
pub struct TelemetrySink {
    writer: Option<Arc<Mutex<RotatingWriter>>>,
    log_stdout: bool,
    lines_total: Arc<AtomicU64>,
    write_errors_total: Arc<AtomicU64>,
}

impl TelemetrySink {
    pub fn new(writer: Option<RotatingWriter>, log_stdout: bool) -> Self {
        Self {
            writer: writer.map(|w| Arc::new(Mutex::new(w))),
            log_stdout,
            lines_total: Arc::new(AtomicU64::new(0)),
            write_errors_total: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record(&self, target: &str, event: &DetectionEvent) {
        let line = serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "target": target,
            "kind": event.kind,
            "detail": event.detail,
        })
        .to_string();

        let mut wrote = false;
        if let Some(writer) = &self.writer {
            if let Ok(mut guard) = writer.lock() {
                match guard.write_line_result(&line) {
                    Ok(_) => {
                        self.lines_total.fetch_add(1, Ordering::Relaxed);
                        wrote = true;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to write telemetry line");
                        self.write_errors_total.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        if (wrote || self.writer.is_none()) && self.log_stdout {
            tracing::info!(target = "telemetry", kind = %event.kind, detail = %event.detail, "detection event");
        }
    }

    pub fn record_all(&self, target: &str, events: &[DetectionEvent]) {
        for event in events {
            self.record(target, event);
        }
    }

    pub fn lines_total(&self) -> u64 {
        self.lines_total.load(Ordering::Relaxed)
    }

    pub fn write_errors_total(&self) -> u64 {
        self.write_errors_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_without_writer_still_counts_stdout_path() {
        let sink = TelemetrySink::new(None, false);
        let event = DetectionEvent {
            kind: "render".to_string(),
            detail: serde_json::json!({"engine": "nunjucks"}),
        };
        sink.record("https://target.example", &event);
        assert_eq!(sink.lines_total(), 0);
        assert_eq!(sink.write_errors_total(), 0);
    }

    #[test]
    fn record_writes_newline_delimited_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.log");
        let writer = RotatingWriter::open(path.to_str().unwrap(), None, 1, false).unwrap();
        let sink = TelemetrySink::new(Some(writer), false);
        let event = DetectionEvent {
            kind: "blind".to_string(),
            detail: serde_json::json!({"engine": "jinja2"}),
        };
        sink.record("https://target.example", &event);
        assert_eq!(sink.lines_total(), 1);
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"kind\":\"blind\""));
    }
}
