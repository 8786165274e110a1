use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only session event log.
///
/// - default fields are `type`, `session_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line when file backed
///
/// Clones share the sink, so the suggestion worker and the controller write
/// through the same lock.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    sink: Sink,
    session_id: Mutex<String>,
}

#[derive(Debug)]
enum Sink {
    File { path: PathBuf, lock: Mutex<()> },
    Memory(Mutex<Vec<Value>>),
    Disabled,
}

impl EventLog {
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self::with_sink(Sink::File {
            path: path.into(),
            lock: Mutex::new(()),
        })
    }

    pub fn in_memory() -> Self {
        Self::with_sink(Sink::Memory(Mutex::new(Vec::new())))
    }

    pub fn disabled() -> Self {
        Self::with_sink(Sink::Disabled)
    }

    fn with_sink(sink: Sink) -> Self {
        Self {
            inner: Arc::new(EventLogInner {
                sink,
                session_id: Mutex::new(String::new()),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.inner.sink {
            Sink::File { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn session_id(&self) -> String {
        self.inner
            .session_id
            .lock()
            .map(|id| id.clone())
            .unwrap_or_default()
    }

    pub fn set_session_id(&self, session_id: impl Into<String>) {
        if let Ok(mut current) = self.inner.session_id.lock() {
            *current = session_id.into();
        }
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert("session_id".to_string(), Value::String(self.session_id()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }
        let event = Value::Object(event);

        match &self.inner.sink {
            Sink::File { path, lock } => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let line = serde_json::to_string(&event)?;
                let _guard = lock
                    .lock()
                    .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
            }
            Sink::Memory(rows) => {
                rows.lock()
                    .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?
                    .push(event.clone());
            }
            Sink::Disabled => {}
        }

        Ok(event)
    }

    /// Events captured by a memory-backed log; empty for other sinks.
    pub fn snapshot(&self) -> Vec<Value> {
        match &self.inner.sink {
            Sink::Memory(rows) => rows.lock().map(|rows| rows.clone()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn types(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
