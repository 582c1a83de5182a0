//! Hive Log: structured event log for the activity core.
//!
//! Every dispatched action and growth cycle produces one [`LogEntry`] that is
//! fanned out to the attached sinks. `tracing` stays the diagnostic channel;
//! this log is the operator-facing event stream. Sinks: [`TracingSink`]
//! forwards to `tracing`, [`MemorySink`] buffers for tests and admin views,
//! and [`CallbackSink`] hands entries to arbitrary code.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::BotId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => f.write_str("trace"),
            LogLevel::Debug => f.write_str("debug"),
            LogLevel::Info => f.write_str("info"),
            LogLevel::Warn => f.write_str("warn"),
            LogLevel::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Emitting component, e.g. "dispatch", "growth", "admin"
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<BotId>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            source: source.into(),
            bot_id: None,
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_bot(mut self, bot_id: BotId) -> Self {
        self.bot_id = Some(bot_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn format_line(&self) -> String {
        let ts = self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let bot = self
            .bot_id
            .map(|b| format!(" [{b}]"))
            .unwrap_or_default();
        format!("{ts} {} {}{} {}", self.level, self.source, bot, self.message)
    }
}

pub trait LogSink: Send + Sync {
    fn write(&self, entry: &LogEntry);

    fn flush(&self) {}
}

pub struct HiveLogger {
    sinks: Vec<Arc<dyn LogSink>>,
    min_level: LogLevel,
}

impl HiveLogger {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            min_level: LogLevel::Trace,
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn LogSink>) {
        self.sinks.push(sink);
    }

    pub fn log(&self, entry: &LogEntry) {
        if entry.level < self.min_level {
            return;
        }
        for sink in &self.sinks {
            sink.write(entry);
        }
    }

    pub fn info(&self, source: &str, message: &str) {
        self.log(&LogEntry::new(LogLevel::Info, source, message));
    }

    pub fn warn(&self, source: &str, message: &str) {
        self.log(&LogEntry::new(LogLevel::Warn, source, message));
    }

    pub fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

impl Default for HiveLogger {
    fn default() -> Self {
        Self::new()
    }
}

// Sinks

/// Forwards entries to `tracing` at the matching level
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, entry: &LogEntry) {
        let bot = entry.bot_id.map(|b| b.to_string()).unwrap_or_default();
        let payload = entry
            .payload
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_default();
        match entry.level {
            LogLevel::Trace => tracing::trace!(source = %entry.source, bot = %bot, payload = %payload, "{}", entry.message),
            LogLevel::Debug => tracing::debug!(source = %entry.source, bot = %bot, payload = %payload, "{}", entry.message),
            LogLevel::Info => tracing::info!(source = %entry.source, bot = %bot, payload = %payload, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(source = %entry.source, bot = %bot, payload = %payload, "{}", entry.message),
            LogLevel::Error => tracing::error!(source = %entry.source, bot = %bot, payload = %payload, "{}", entry.message),
        }
    }
}

/// Collects entries in memory (tests and admin inspection)
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl LogSink for MemorySink {
    fn write(&self, entry: &LogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
    }
}

pub struct CallbackSink {
    callback: Box<dyn Fn(&LogEntry) + Send + Sync>,
}

impl CallbackSink {
    pub fn new(callback: impl Fn(&LogEntry) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl LogSink for CallbackSink {
    fn write(&self, entry: &LogEntry) {
        (self.callback)(entry);
    }
}
