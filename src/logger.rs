use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Daemon event sink. Every hook defaults to doing nothing.
pub trait Logger: Send + Sync {
    fn connected(&self, _peer: &str) {}
    fn upload_done(&self, _peer: &str, _name: &str, _bytes: u64) {}
    fn download_done(&self, _peer: &str, _name: &str, _bytes: u64) {}
    fn rejected(&self, _peer: &str, _header: &str, _reason: &str) {}
    fn error(&self, _peer: &str, _context: &str, _msg: &str) {}
    fn closed(&self, _peer: &str, _stats: &SessionStats) {}
}

/// Per-connection counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub commands: u64,
    pub files_received: u64,
    pub files_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Event<'a> {
    Connected { peer: &'a str },
    Upload { peer: &'a str, name: &'a str, bytes: u64 },
    Download { peer: &'a str, name: &'a str, bytes: u64 },
    Rejected { peer: &'a str, header: &'a str, reason: &'a str },
    Error { peer: &'a str, context: &'a str, msg: &'a str },
    Closed { peer: &'a str, stats: &'a SessionStats },
}

#[derive(Serialize)]
struct Entry<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: Event<'a>,
}

/// One JSON object per line, appended.
pub struct JsonlLogger {
    file: Mutex<File>,
}

impl JsonlLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .with_context(|| format!("Failed to open log file: {}", path.as_ref().display()))?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, event: Event<'_>) {
        let entry = Entry {
            timestamp: Utc::now().to_rfc3339(),
            event,
        };
        if let Ok(s) = serde_json::to_string(&entry) {
            let mut f = self.file.lock();
            let _ = writeln!(f, "{}", s);
        }
    }
}

impl Logger for JsonlLogger {
    fn connected(&self, peer: &str) {
        self.line(Event::Connected { peer });
    }
    fn upload_done(&self, peer: &str, name: &str, bytes: u64) {
        self.line(Event::Upload { peer, name, bytes });
    }
    fn download_done(&self, peer: &str, name: &str, bytes: u64) {
        self.line(Event::Download { peer, name, bytes });
    }
    fn rejected(&self, peer: &str, header: &str, reason: &str) {
        self.line(Event::Rejected { peer, header, reason });
    }
    fn error(&self, peer: &str, context: &str, msg: &str) {
        self.line(Event::Error { peer, context, msg });
    }
    fn closed(&self, peer: &str, stats: &SessionStats) {
        self.line(Event::Closed { peer, stats });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_json_object_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("ferryd.jsonl");
        let logger = JsonlLogger::new(&path).unwrap();
        logger.connected("127.0.0.1:5000");
        logger.upload_done("127.0.0.1:5000", "report.txt", 13);
        logger.closed(
            "127.0.0.1:5000",
            &SessionStats {
                commands: 1,
                files_received: 1,
                bytes_received: 13,
                ..SessionStats::default()
            },
        );

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event"], "connected");
        assert_eq!(lines[1]["event"], "upload");
        assert_eq!(lines[1]["name"], "report.txt");
        assert_eq!(lines[1]["bytes"], 13);
        assert_eq!(lines[2]["stats"]["bytes_received"], 13);
        assert!(lines[0]["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn appends_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferryd.jsonl");
        JsonlLogger::new(&path).unwrap().connected("a");
        JsonlLogger::new(&path).unwrap().connected("b");
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
