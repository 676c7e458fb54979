//! Log record types.
//!
//! Every line written by the sink is one [`LogEntry`] serialized as JSON:
//! `{ timestamp, level, message, ...context, hostname }`.

use chrono::Utc;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Keys owned by the record itself. Context keys with these names are
/// renamed with a `ctx_` prefix so they never shadow the envelope.
const RESERVED_KEYS: [&str; 4] = ["timestamp", "level", "message", "hostname"];

/// Severity of a log record. `Queue` is a dedicated channel for retry-queue
/// lifecycle events rather than a severity in the usual sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Queue,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Queue => "queue",
        }
    }

    /// The file a record of this level is routed to.
    pub fn channel(&self) -> LogChannel {
        match self {
            LogLevel::Debug => LogChannel::Debug,
            LogLevel::Info => LogChannel::Success,
            LogLevel::Warn | LogLevel::Error => LogChannel::Error,
            LogLevel::Queue => LogChannel::Queue,
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE | tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Target log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogChannel {
    Debug,
    Success,
    Error,
    Queue,
}

impl LogChannel {
    pub const ALL: [LogChannel; 4] = [
        LogChannel::Debug,
        LogChannel::Success,
        LogChannel::Error,
        LogChannel::Queue,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            LogChannel::Debug => "debug.log",
            LogChannel::Success => "success.log",
            LogChannel::Error => "error.log",
            LogChannel::Queue => "queue.log",
        }
    }
}

/// A single structured log record.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// RFC 3339 timestamp (UTC, microseconds)
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    /// Free-form context, flattened into the record
    #[serde(flatten)]
    pub context: Map<String, Value>,
    pub hostname: String,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        message: impl Into<String>,
        context: Map<String, Value>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            level,
            message: message.into(),
            context: escape_reserved(context),
            hostname: hostname.into(),
        }
    }

    pub fn to_json_line(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

fn escape_reserved(context: Map<String, Value>) -> Map<String, Value> {
    if !context.keys().any(|key| RESERVED_KEYS.contains(&key.as_str())) {
        return context;
    }

    context
        .into_iter()
        .map(|(key, value)| {
            if RESERVED_KEYS.contains(&key.as_str()) {
                (format!("ctx_{key}"), value)
            } else {
                (key, value)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_levels_route_to_channels() {
        assert_eq!(LogLevel::Debug.channel(), LogChannel::Debug);
        assert_eq!(LogLevel::Info.channel(), LogChannel::Success);
        assert_eq!(LogLevel::Warn.channel(), LogChannel::Error);
        assert_eq!(LogLevel::Error.channel(), LogChannel::Error);
        assert_eq!(LogLevel::Queue.channel(), LogChannel::Queue);
    }

    #[test]
    fn test_entry_flattens_context_between_message_and_hostname() {
        let mut context = Map::new();
        context.insert("request_id".into(), json!("req_1"));
        context.insert("status".into(), json!(200));

        let entry = LogEntry::new(LogLevel::Info, "delivered", context, "devbox");
        let line = entry.to_json_line().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["level"], "info");
        assert_eq!(value["message"], "delivered");
        assert_eq!(value["request_id"], "req_1");
        assert_eq!(value["status"], 200);
        assert_eq!(value["hostname"], "devbox");

        let message_at = line.find("\"message\"").unwrap();
        let hostname_at = line.find("\"hostname\"").unwrap();
        let context_at = line.find("\"request_id\"").unwrap();
        assert!(message_at < context_at && context_at < hostname_at);
    }

    #[test]
    fn test_reserved_context_keys_do_not_shadow_envelope() {
        let mut context = Map::new();
        context.insert("level".into(), json!("bogus"));

        let entry = LogEntry::new(LogLevel::Warn, "m", context, "h");
        let value: Value = serde_json::from_str(&entry.to_json_line().unwrap()).unwrap();

        assert_eq!(value["level"], "warn");
        assert_eq!(value["ctx_level"], "bogus");
    }

    #[test]
    fn test_tracing_levels_collapse_trace_into_debug() {
        assert_eq!(LogLevel::from(tracing::Level::TRACE), LogLevel::Debug);
        assert_eq!(LogLevel::from(tracing::Level::ERROR), LogLevel::Error);
    }
}
