//! AD-015: Append-only audit log of inference attempts.
//!
//! Entries are appended one per attempt and never rewritten. Ordering across
//! records is not preserved; a single record's attempts are appended in order
//! by the task that owns the record.

use crate::core::types::AuditEntry;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Append-only sink for audit entries. Shared across concurrent record pipelines.
pub trait AuditLog: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> Result<(), String>;
}

/// Generate an ISO 8601 timestamp.
pub fn now_iso8601() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = dur.as_secs();
    let days = secs / 86400;
    let time_secs = secs % 86400;
    let hours = time_secs / 3600;
    let minutes = (time_secs % 3600) / 60;
    let seconds = time_secs % 60;
    let millis = dur.subsec_millis();

    let (y, m, d) = civil_from_days(days as i64);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        y, m, d, hours, minutes, seconds, millis
    )
}

/// Days since 1970-01-01 to (year, month, day).
fn civil_from_days(days: i64) -> (i64, usize, i64) {
    let mut y = 1970i64;
    let mut remaining = days;
    loop {
        let year_days = if is_leap(y) { 366 } else { 365 };
        if remaining < year_days {
            break;
        }
        remaining -= year_days;
        y += 1;
    }
    let feb = if is_leap(y) { 29 } else { 28 };
    let month_days = [31, feb, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut m = 12;
    for (i, &md) in month_days.iter().enumerate() {
        if remaining < md {
            m = i + 1;
            break;
        }
        remaining -= md;
    }
    (y, m, remaining + 1)
}

fn is_leap(y: i64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

/// Generate a run ID, optionally prefixed with a label.
pub fn generate_run_id(label: Option<&str>) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    match label {
        Some(l) => format!("{}-r-{:012x}", l, nanos & 0xFFFF_FFFF_FFFF),
        None => format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF),
    }
}

/// JSON-lines audit file. One line per attempt.
pub struct JsonlAuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditLog {
    /// Open (or create) the log for appending. Parent directories are created.
    pub fn open(path: &Path) -> Result<Self, String> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("cannot create audit dir: {}", e))?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("cannot open audit log {}: {}", path.display(), e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditLog for JsonlAuditLog {
    fn append(&self, entry: &AuditEntry) -> Result<(), String> {
        let json = serde_json::to_string(entry).map_err(|e| format!("JSON serialize error: {}", e))?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| format!("audit log {} lock poisoned", self.path.display()))?;
        writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))?;
        Ok(())
    }
}

/// In-memory audit log.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Entries of one record, in append order.
    pub fn for_record(&self, record_id: u64) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.record_id == record_id)
            .collect()
    }
}

impl AuditLog for MemoryAuditLog {
    fn append(&self, entry: &AuditEntry) -> Result<(), String> {
        self.entries
            .lock()
            .map_err(|_| "audit log lock poisoned".to_string())?
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AttemptOutcome, Disposition, TypedValue, Verb};

    fn entry(record_id: u64, attempt: u32, disposition: Disposition) -> AuditEntry {
        AuditEntry {
            ts: now_iso8601(),
            run_id: "r-test".into(),
            record_id,
            step: 0,
            verb: Verb::Extract,
            attempt,
            input_ref: "blake3:00".into(),
            raw_response: Some("\"travel\"".into()),
            outcome: AttemptOutcome::Valid,
            disposition,
            output: Some(TypedValue::Enum("travel".into())),
            failure: None,
        }
    }

    #[test]
    fn test_ad015_now_iso8601() {
        let ts = now_iso8601();
        assert!(ts.starts_with("20"));
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
        assert_eq!(ts.len(), "2026-02-16T14:00:00.000Z".len());
    }

    #[test]
    fn test_ad015_civil_from_days() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(31), (1970, 2, 1));
        // 2000-02-29 is day 11016
        assert_eq!(civil_from_days(11016), (2000, 2, 29));
        assert_eq!(civil_from_days(11017), (2000, 3, 1));
        assert_eq!(civil_from_days(365), (1971, 1, 1));
    }

    #[test]
    fn test_ad015_is_leap() {
        assert!(is_leap(2000));
        assert!(!is_leap(1900));
        assert!(!is_leap(2100));
        assert!(is_leap(2024));
        assert!(!is_leap(2026));
    }

    #[test]
    fn test_ad015_generate_run_id() {
        let id = generate_run_id(None);
        assert!(id.starts_with("r-"));
        assert!(id.len() > 4);
        let labelled = generate_run_id(Some("nightly"));
        assert!(labelled.starts_with("nightly-r-"));
    }

    #[test]
    fn test_ad015_jsonl_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit/run.jsonl");
        let log = JsonlAuditLog::open(&path).unwrap();
        log.append(&entry(1, 1, Disposition::Valid)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"run_id\":\"r-test\""));
        assert!(content.contains("\"result\":\"valid\""));
        assert!(content.contains("\"output\":\"travel\""));
    }

    #[test]
    fn test_ad015_jsonl_append_multiple_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        {
            let log = JsonlAuditLog::open(&path).unwrap();
            log.append(&entry(1, 1, Disposition::Retry)).unwrap();
            log.append(&entry(1, 2, Disposition::Valid)).unwrap();
        }
        let log = JsonlAuditLog::open(&path).unwrap();
        log.append(&entry(2, 1, Disposition::Valid)).unwrap();
        assert_eq!(log.path(), path.as_path());

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(v["attempt"].is_u64());
        }
    }

    #[test]
    fn test_ad015_memory_log_for_record() {
        let log = MemoryAuditLog::new();
        log.append(&entry(1, 1, Disposition::Retry)).unwrap();
        log.append(&entry(2, 1, Disposition::Valid)).unwrap();
        log.append(&entry(1, 2, Disposition::Terminal)).unwrap();
        assert_eq!(log.entries().len(), 3);
        let r1 = log.for_record(1);
        assert_eq!(r1.len(), 2);
        assert_eq!(r1[0].attempt, 1);
        assert_eq!(r1[1].disposition, Disposition::Terminal);
    }
}
