use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only JSONL event log shared by the rewrite and generation paths.
///
/// - every line carries `type`, `run_id` and `ts`
/// - caller payload is merged last and can override those keys
/// - a writer built with [`EventWriter::disabled`] accepts events and drops them
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: Option<PathBuf>,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self::with_sink(Some(path.into()), run_id.into())
    }

    pub fn disabled() -> Self {
        Self::with_sink(None, String::new())
    }

    fn with_sink(path: Option<PathBuf>, run_id: String) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path,
                run_id,
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        let Some(path) = self.inner.path.as_ref() else {
            return Ok(Value::Object(event));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }

    /// Like [`EventWriter::emit`] for paths that must not fail because of the
    /// log; write errors are reported on stderr and swallowed.
    pub fn record(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.emit(event_type, payload) {
            eprintln!("nanoprompt warning: failed to record {event_type} event: {err:#}");
        }
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let writer = EventWriter::new(&path, "run-123");

        let mut payload = EventPayload::new();
        payload.insert("prompt".to_string(), Value::String("a cat".to_string()));
        let emitted = writer.emit("rewrite_started", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("rewrite_started".to_string()));
        assert_eq!(parsed["run_id"], Value::String("run-123".to_string()));
        assert_eq!(parsed["prompt"], Value::String("a cat".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "run-123");

        let mut payload = EventPayload::new();
        payload.insert("run_id".to_string(), Value::String("other".to_string()));
        let emitted = writer.emit("rewrite_fallback", payload)?;

        assert_eq!(emitted["type"], Value::String("rewrite_fallback".to_string()));
        assert_eq!(emitted["run_id"], Value::String("other".to_string()));
        Ok(())
    }

    #[test]
    fn emit_appends_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "run-123");

        writer.emit("one", EventPayload::new())?;
        writer.clone().emit("two", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let types: Vec<String> = content
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(types, vec!["one", "two"]);
        Ok(())
    }

    #[test]
    fn disabled_writer_touches_nothing() -> anyhow::Result<()> {
        let writer = EventWriter::disabled();
        assert!(writer.path().is_none());
        let emitted = writer.emit("rewrite_started", EventPayload::new())?;
        assert_eq!(emitted["type"], Value::String("rewrite_started".to_string()));
        writer.record("rewrite_completed", EventPayload::new());
        Ok(())
    }
}
