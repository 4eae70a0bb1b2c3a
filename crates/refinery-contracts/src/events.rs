use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Every line the session log can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionStarted,
    ExecuteRejected,
    CredentialMissing,
    AnalysisStarted,
    AnalysisFinished,
    AnalysisFailed,
    StageChanged,
    RenderStarted,
    JobSubmitted,
    JobPolled,
    RenderFinished,
    RenderFailed,
    DiagnosticFinished,
    DiagnosticSkipped,
    LibrarySaved,
    LibraryDeleted,
    LibraryImported,
    LibraryImportFailed,
}

impl EventKind {
    pub const ALL: [EventKind; 18] = [
        EventKind::SessionStarted,
        EventKind::ExecuteRejected,
        EventKind::CredentialMissing,
        EventKind::AnalysisStarted,
        EventKind::AnalysisFinished,
        EventKind::AnalysisFailed,
        EventKind::StageChanged,
        EventKind::RenderStarted,
        EventKind::JobSubmitted,
        EventKind::JobPolled,
        EventKind::RenderFinished,
        EventKind::RenderFailed,
        EventKind::DiagnosticFinished,
        EventKind::DiagnosticSkipped,
        EventKind::LibrarySaved,
        EventKind::LibraryDeleted,
        EventKind::LibraryImported,
        EventKind::LibraryImportFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session_started",
            EventKind::ExecuteRejected => "execute_rejected",
            EventKind::CredentialMissing => "credential_missing",
            EventKind::AnalysisStarted => "analysis_started",
            EventKind::AnalysisFinished => "analysis_finished",
            EventKind::AnalysisFailed => "analysis_failed",
            EventKind::StageChanged => "stage_changed",
            EventKind::RenderStarted => "render_started",
            EventKind::JobSubmitted => "job_submitted",
            EventKind::JobPolled => "job_polled",
            EventKind::RenderFinished => "render_finished",
            EventKind::RenderFailed => "render_failed",
            EventKind::DiagnosticFinished => "diagnostic_finished",
            EventKind::DiagnosticSkipped => "diagnostic_skipped",
            EventKind::LibrarySaved => "library_saved",
            EventKind::LibraryDeleted => "library_deleted",
            EventKind::LibraryImported => "library_imported",
            EventKind::LibraryImportFailed => "library_import_failed",
        }
    }

    pub fn is_library(self) -> bool {
        matches!(
            self,
            EventKind::LibrarySaved
                | EventKind::LibraryDeleted
                | EventKind::LibraryImported
                | EventKind::LibraryImportFailed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only JSONL log for one session.
///
/// An object payload becomes the body of the line; any other value is kept
/// under `payload`. `type`, `session_id` and `ts` are written last and always
/// describe the event itself.
///
/// Clones share one lock, so the pipeline and the diagnostic thread never
/// interleave partial lines.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    session_id: String,
    append: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                path: path.into(),
                session_id: session_id.into(),
                append: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn emit(&self, kind: EventKind, payload: Value) -> anyhow::Result<Value> {
        let mut line = match payload {
            Value::Object(body) => body,
            Value::Null => Map::new(),
            other => {
                let mut body = Map::new();
                body.insert("payload".to_string(), other);
                body
            }
        };
        line.insert("type".to_string(), Value::String(kind.as_str().to_string()));
        line.insert(
            "session_id".to_string(),
            Value::String(self.shared.session_id.clone()),
        );
        line.insert("ts".to_string(), Value::String(now_utc_iso()));
        let event = Value::Object(line);

        let mut encoded = serde_json::to_string(&event)?;
        encoded.push('\n');
        self.append(encoded.as_bytes())?;
        Ok(event)
    }

    fn append(&self, bytes: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = self.shared.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _guard = self
            .shared
            .append
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.shared.path)?
            .write_all(bytes)?;
        Ok(())
    }
}

/// Emit through an optional writer. Log failures never reach the caller.
pub fn emit_quiet(events: Option<&EventWriter>, kind: EventKind, payload: Value) {
    if let Some(writer) = events {
        let _ = writer.emit(kind, payload);
    }
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    fn read_lines(path: &Path) -> anyhow::Result<Vec<Value>> {
        fs::read_to_string(path)?
            .lines()
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }

    #[test]
    fn emit_writes_one_compact_line_per_event() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let emitted = writer.emit(EventKind::AnalysisStarted, json!({ "domain": "image" }))?;

        let lines = read_lines(&path)?;
        assert_eq!(lines, vec![emitted]);
        assert_eq!(lines[0]["type"], json!("analysis_started"));
        assert_eq!(lines[0]["session_id"], json!("session-123"));
        assert_eq!(lines[0]["domain"], json!("image"));
        DateTime::parse_from_rfc3339(lines[0]["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn payload_cannot_relabel_the_event() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "session-123");

        let emitted = writer.emit(
            EventKind::StageChanged,
            json!({ "type": "forged", "session_id": "other", "to": "complete" }),
        )?;

        assert_eq!(emitted["type"], json!("stage_changed"));
        assert_eq!(emitted["session_id"], json!("session-123"));
        assert_eq!(emitted["to"], json!("complete"));
        Ok(())
    }

    #[test]
    fn non_object_payloads_are_nested() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "s");

        let listed = writer.emit(EventKind::JobPolled, json!([1, 2]))?;
        assert_eq!(listed["payload"], json!([1, 2]));

        let empty = writer.emit(EventKind::CredentialMissing, Value::Null)?;
        assert!(empty.get("payload").is_none());
        Ok(())
    }

    #[test]
    fn clones_append_to_the_same_log() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");
        let clone = writer.clone();

        writer.emit(EventKind::SessionStarted, json!({}))?;
        clone.emit(EventKind::DiagnosticFinished, json!({}))?;
        emit_quiet(Some(&writer), EventKind::LibrarySaved, json!({}));
        emit_quiet(None, EventKind::LibraryDeleted, json!({}));

        let types: Vec<Value> = read_lines(&path)?
            .into_iter()
            .map(|row| row["type"].clone())
            .collect();
        assert_eq!(
            types,
            vec![
                json!("session_started"),
                json!("diagnostic_finished"),
                json!("library_saved")
            ]
        );
        Ok(())
    }

    #[test]
    fn kind_names_are_unique_snake_case() {
        let names: HashSet<&str> = EventKind::ALL.iter().map(|kind| kind.as_str()).collect();
        assert_eq!(names.len(), EventKind::ALL.len());
        for name in names {
            assert!(name
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch == '_'));
        }
        assert_eq!(
            EventKind::ALL.iter().filter(|kind| kind.is_library()).count(),
            4
        );
    }
}
