use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Generation lifecycle events recorded in `events.jsonl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudioEvent {
    GenerationStarted,
    PromptImproved,
    GenerationBlocked,
    PromptRephrased,
    GenerationSucceeded,
    GenerationFailed,
}

impl StudioEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenerationStarted => "generation_started",
            Self::PromptImproved => "prompt_improved",
            Self::GenerationBlocked => "generation_blocked",
            Self::PromptRephrased => "prompt_rephrased",
            Self::GenerationSucceeded => "generation_succeeded",
            Self::GenerationFailed => "generation_failed",
        }
    }
}

/// Generation history, one JSON object per line.
///
/// Every line starts with `type`, `session_id` and `ts`; payload keys are
/// written after them and win on collision. Clones append to the same file
/// under one lock.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<SharedLog>,
}

#[derive(Debug)]
struct SharedLog {
    path: PathBuf,
    session_id: String,
    append: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(SharedLog {
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

    pub fn record(&self, event: StudioEvent, payload: EventPayload) -> anyhow::Result<Value> {
        self.emit(event.as_str(), payload)
    }

    /// Appends one line and returns the object that was written.
    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut line = envelope(event_type, &self.shared.session_id);
        line.extend(payload);
        let encoded = serde_json::to_string(&line)?;

        let log = &self.shared;
        if let Some(dir) = log.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let _held = log
            .append
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log.path)
            .with_context(|| format!("failed to open {}", log.path.display()))?;
        writeln!(file, "{encoded}")?;

        Ok(Value::Object(line))
    }
}

fn envelope(event_type: &str, session_id: &str) -> EventPayload {
    let mut line = Map::new();
    line.insert("type".to_string(), Value::from(event_type));
    line.insert("session_id".to_string(), Value::from(session_id));
    line.insert("ts".to_string(), Value::from(now_utc_iso()));
    line
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
    fn record_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-1");

        let mut payload = EventPayload::new();
        payload.insert("mode".to_string(), Value::String("text-to-image".to_string()));
        let emitted = writer.record(StudioEvent::GenerationStarted, payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("generation_started".to_string()));
        assert_eq!(parsed["session_id"], Value::String("session-1".to_string()));
        assert_eq!(parsed["mode"], Value::String("text-to-image".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "session-1");

        let mut payload = EventPayload::new();
        payload.insert(
            "session_id".to_string(),
            Value::String("request-42".to_string()),
        );
        let emitted = writer.emit("prompt_improved", payload)?;

        assert_eq!(emitted["type"], Value::String("prompt_improved".to_string()));
        assert_eq!(emitted["session_id"], Value::String("request-42".to_string()));
        Ok(())
    }

    #[test]
    fn clones_append_to_the_same_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "session-1");
        let other = writer.clone();

        writer.record(StudioEvent::GenerationBlocked, EventPayload::new())?;
        other.record(StudioEvent::PromptRephrased, EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let types = content
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).map(|value| value["type"].clone()))
            .collect::<Result<Vec<Value>, _>>()?;
        assert_eq!(
            types,
            vec![
                Value::String("generation_blocked".to_string()),
                Value::String("prompt_rephrased".to_string()),
            ]
        );
        Ok(())
    }
}
