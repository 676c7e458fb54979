//! Hook events and the payloads sent for them.

use crate::error::{HookError, HookResult};
use crate::input::HookInput;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

pub const UNKNOWN_SESSION: &str = "unknown";

/// Marker set on a payload when any field was cut to the size limit.
pub const TRUNCATED_FIELD: &str = "truncated";

/// A tool invocation as reported by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub params: Value,
}

/// Outcome of a finished tool invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutcome {
    pub result: Option<Value>,
    pub duration_ms: Option<u64>,
    pub status: Option<String>,
    pub error: Option<String>,
}

/// A decoded host event.
#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    SessionStart,
    UserPromptSubmit { prompt: String },
    PreToolUse { tool: ToolCall },
    PostToolUse { tool: ToolCall, outcome: ToolOutcome },
    Stop,
    SessionEnd,
    /// Any other event type, kept under its raw name.
    Other(String),
}

/// Fields shared by every event.
#[derive(Debug, Clone, PartialEq)]
pub struct HookContext {
    pub session_id: String,
    pub project_path: String,
    pub transcript_path: Option<String>,
}

impl HookEvent {
    /// Decode the raw input. Fails only when the event type is missing.
    pub fn decode(input: HookInput) -> HookResult<(HookEvent, HookContext)> {
        let raw_name = input.event.ok_or(HookError::MissingEvent)?;

        let context = HookContext {
            session_id: input
                .session_id
                .unwrap_or_else(|| UNKNOWN_SESSION.to_string()),
            project_path: input.project_dir.unwrap_or_else(current_dir),
            transcript_path: input.transcript_path,
        };

        let tool = || ToolCall {
            name: input.tool_name.clone().unwrap_or_default(),
            params: input.tool_input.clone().unwrap_or(Value::Null),
        };

        let event = match normalize(&raw_name).as_str() {
            "sessionstart" => HookEvent::SessionStart,
            "userpromptsubmit" => HookEvent::UserPromptSubmit {
                prompt: input.prompt.clone().unwrap_or_default(),
            },
            "pretooluse" => HookEvent::PreToolUse { tool: tool() },
            "posttooluse" => HookEvent::PostToolUse {
                tool: tool(),
                outcome: ToolOutcome {
                    result: input.tool_output.clone(),
                    duration_ms: input.tool_duration_ms,
                    status: input.tool_status.clone(),
                    error: input.tool_error.clone(),
                },
            },
            "stop" => HookEvent::Stop,
            "sessionend" => HookEvent::SessionEnd,
            _ => HookEvent::Other(raw_name),
        };

        Ok((event, context))
    }

    /// Name sent as the payload `event` field.
    pub fn name(&self) -> &str {
        match self {
            HookEvent::SessionStart => "session-start",
            HookEvent::UserPromptSubmit { .. } => "user-prompt-submit",
            HookEvent::PreToolUse { .. } => "pre-tool-use",
            HookEvent::PostToolUse { .. } => "post-tool-use",
            HookEvent::Stop => "stop",
            HookEvent::SessionEnd => "session-end",
            HookEvent::Other(raw) => raw,
        }
    }

    /// Build the outbound payload. Free-text fields longer than
    /// `max_field_bytes` are cut on a char boundary.
    pub fn payload(&self, context: &HookContext, max_field_bytes: usize) -> Value {
        let mut payload = Map::new();
        payload.insert("event".into(), json!(self.name()));
        payload.insert(
            "timestamp".into(),
            json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        payload.insert("sessionId".into(), json!(context.session_id));
        payload.insert("projectPath".into(), json!(context.project_path));
        payload.insert("transcriptPath".into(), json!(context.transcript_path));

        let mut fields = FieldWriter {
            payload: &mut payload,
            limit: max_field_bytes,
            truncated: false,
        };

        match self {
            HookEvent::SessionStart => {
                fields.put("platform", json!(std::env::consts::OS));
                fields.put("arch", json!(std::env::consts::ARCH));
                fields.put("agentVersion", json!(env!("CARGO_PKG_VERSION")));
            }
            HookEvent::UserPromptSubmit { prompt } => {
                fields.put("promptLength", json!(prompt.chars().count()));
                fields.put_text("prompt", prompt);
            }
            HookEvent::PreToolUse { tool } => {
                fields.put_text("toolName", &tool.name);
                fields.put_value("toolParams", &tool.params);
            }
            HookEvent::PostToolUse { tool, outcome } => {
                fields.put_text("toolName", &tool.name);
                fields.put_value("toolParams", &tool.params);
                fields.put_value("toolResult", outcome.result.as_ref().unwrap_or(&Value::Null));
                fields.put("durationMs", json!(outcome.duration_ms));
                let status = match (&outcome.status, &outcome.error) {
                    (Some(status), _) => status.as_str(),
                    (None, Some(_)) => "error",
                    (None, None) => "success",
                };
                fields.put("status", json!(status));
                match &outcome.error {
                    Some(error) => fields.put_text("error", error),
                    None => fields.put("error", Value::Null),
                }
            }
            HookEvent::Stop | HookEvent::SessionEnd | HookEvent::Other(_) => {}
        }

        if fields.truncated {
            payload.insert(TRUNCATED_FIELD.into(), Value::Bool(true));
        }

        Value::Object(payload)
    }
}

struct FieldWriter<'a> {
    payload: &'a mut Map<String, Value>,
    limit: usize,
    truncated: bool,
}

impl FieldWriter<'_> {
    fn put(&mut self, key: &str, value: Value) {
        self.payload.insert(key.to_string(), value);
    }

    fn put_text(&mut self, key: &str, text: &str) {
        let cut = truncate_str(text, self.limit);
        self.truncated |= cut.len() < text.len();
        self.put(key, json!(cut));
    }

    /// Structured values over the limit are replaced by their truncated
    /// serialization.
    fn put_value(&mut self, key: &str, value: &Value) {
        match value {
            Value::String(text) => self.put_text(key, text),
            Value::Null | Value::Bool(_) | Value::Number(_) => self.put(key, value.clone()),
            _ => {
                let serialized = value.to_string();
                if serialized.len() > self.limit {
                    self.put_text(key, &serialized);
                } else {
                    self.put(key, value.clone());
                }
            }
        }
    }
}

/// Longest prefix of `text` within `max_bytes` that ends on a char boundary.
pub fn truncate_str(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn current_dir() -> String {
    std::env::current_dir()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|_| ".".to_string())
}
