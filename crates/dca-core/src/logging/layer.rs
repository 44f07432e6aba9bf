//! Custom tracing layers.
//!
//! - [`JsonlLayer`]: one JSON object per event, on stderr by default, keeping
//!   stdout clean for command payloads.
//! - [`FileSinkLayer`]: append-only plain text diagnostic file. Each line is
//!   prefixed with seconds since start and a running line number. Failures to
//!   open or write are swallowed.

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use super::events::{Level, Stage};

/// A visitor that extracts field values from tracing events.
struct JsonFieldVisitor {
    fields: serde_json::Map<String, serde_json::Value>,
    message: Option<String>,
}

impl JsonFieldVisitor {
    fn new() -> Self {
        JsonFieldVisitor {
            fields: serde_json::Map::new(),
            message: None,
        }
    }
}

impl Visit for JsonFieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let s = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(s);
        } else {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::String(s));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

/// JSONL tracing layer.
pub struct JsonlLayer<W = io::Stderr> {
    writer: Mutex<W>,
}

impl JsonlLayer<io::Stderr> {
    pub fn stderr() -> Self {
        JsonlLayer {
            writer: Mutex::new(io::stderr()),
        }
    }
}

impl<W: Write> JsonlLayer<W> {
    pub fn new(writer: W) -> Self {
        JsonlLayer {
            writer: Mutex::new(writer),
        }
    }
}

impl<S, W> Layer<S> for JsonlLayer<W>
where
    S: Subscriber,
    W: Write + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let ts = Utc::now();
        let mut visitor = JsonFieldVisitor::new();
        event.record(&mut visitor);

        let target = event.metadata().target();
        let level: Level = (*event.metadata().level()).into();
        let mut obj = serde_json::Map::new();
        obj.insert("ts".to_string(), serde_json::json!(ts.to_rfc3339()));
        obj.insert("level".to_string(), serde_json::json!(level));
        obj.insert("event".to_string(), serde_json::json!(target));
        if let Some(stage) = Stage::of_event(target) {
            obj.insert("stage".to_string(), serde_json::json!(stage));
        }
        if let Some(msg) = visitor.message {
            obj.insert("message".to_string(), serde_json::json!(msg));
        }
        if !visitor.fields.is_empty() {
            obj.insert("fields".to_string(), serde_json::Value::Object(visitor.fields));
        }

        let json = serde_json::to_string(&serde_json::Value::Object(obj)).unwrap_or_default();
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", json);
        }
    }
}

/// Formats an event as `message key=value key=value`.
struct TextVisitor {
    message: String,
    fields: String,
}

impl Visit for TextVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

struct FileSinkState {
    file: Option<File>,
    line: u64,
}

/// Append-only diagnostic log file.
pub struct FileSinkLayer {
    path: PathBuf,
    started: Instant,
    state: Mutex<FileSinkState>,
}

impl FileSinkLayer {
    /// The file is opened lazily on the first event.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSinkLayer {
            path: path.into(),
            started: Instant::now(),
            state: Mutex::new(FileSinkState {
                file: None,
                line: 0,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Option<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .ok()
    }

    /// Write one line. Never fails; a broken handle is dropped and the file
    /// reopened on the next call.
    pub fn write_line(&self, text: &str) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.file.is_none() {
            state.file = self.open();
        }
        let secs = self.started.elapsed().as_secs();
        let line = state.line;
        let Some(file) = state.file.as_mut() else {
            return;
        };
        let written = writeln!(file, "[{} s] [line={}] {}", secs, line, text);
        if written.is_err() {
            state.file = None;
        }
        state.line += 1;
    }
}

impl<S: Subscriber> Layer<S> for FileSinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = TextVisitor {
            message: String::new(),
            fields: String::new(),
        };
        event.record(&mut visitor);
        let level: Level = (*event.metadata().level()).into();
        self.write_line(&format!("{} {}{}", level, visitor.message, visitor.fields));
    }
}
