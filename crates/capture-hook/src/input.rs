//! Raw hook input, as handed over by the host tool.
//!
//! The host sets `CLAUDE_*` environment variables and may also write a JSON
//! document to stdin. Environment values win; stdin only fills gaps.

use serde_json::Value;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::warn;

pub const EVENT_ENV: &str = "CLAUDE_HOOK_EVENT";
pub const SESSION_ID_ENV: &str = "CLAUDE_SESSION_ID";
pub const PROJECT_DIR_ENV: &str = "CLAUDE_PROJECT_DIR";
pub const TRANSCRIPT_PATH_ENV: &str = "CLAUDE_TRANSCRIPT_PATH";
pub const USER_PROMPT_ENV: &str = "CLAUDE_USER_PROMPT";
pub const TOOL_NAME_ENV: &str = "CLAUDE_TOOL_NAME";
pub const TOOL_INPUT_ENV: &str = "CLAUDE_TOOL_INPUT";
pub const TOOL_OUTPUT_ENV: &str = "CLAUDE_TOOL_OUTPUT";
pub const TOOL_DURATION_MS_ENV: &str = "CLAUDE_TOOL_DURATION_MS";
pub const TOOL_STATUS_ENV: &str = "CLAUDE_TOOL_STATUS";
pub const TOOL_ERROR_ENV: &str = "CLAUDE_TOOL_ERROR";

/// How long `--stdin` waits for the host to close the pipe.
const STDIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Undecoded hook fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookInput {
    pub event: Option<String>,
    pub session_id: Option<String>,
    pub project_dir: Option<String>,
    pub transcript_path: Option<String>,
    pub prompt: Option<String>,
    pub tool_name: Option<String>,
    /// Parsed as JSON when possible, otherwise kept as a string.
    pub tool_input: Option<Value>,
    pub tool_output: Option<Value>,
    pub tool_duration_ms: Option<u64>,
    pub tool_status: Option<String>,
    pub tool_error: Option<String>,
}

impl HookInput {
    /// Read the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read variables through `lookup`. Blank values count as absent.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        Self {
            event: get(EVENT_ENV).map(|value| value.trim().to_string()),
            session_id: get(SESSION_ID_ENV),
            project_dir: get(PROJECT_DIR_ENV),
            transcript_path: get(TRANSCRIPT_PATH_ENV),
            prompt: get(USER_PROMPT_ENV),
            tool_name: get(TOOL_NAME_ENV),
            tool_input: get(TOOL_INPUT_ENV).map(json_or_string),
            tool_output: get(TOOL_OUTPUT_ENV).map(json_or_string),
            tool_duration_ms: get(TOOL_DURATION_MS_ENV).and_then(|raw| raw.trim().parse().ok()),
            tool_status: get(TOOL_STATUS_ENV),
            tool_error: get(TOOL_ERROR_ENV),
        }
    }

    /// Fill missing fields from a stdin document such as
    /// `{"hook_event_name": "Stop", "session_id": "...", "cwd": "..."}`.
    pub fn merge_stdin(&mut self, document: &Value) {
        let Value::Object(fields) = document else {
            return;
        };
        let text = |key: &str| {
            fields
                .get(key)
                .and_then(Value::as_str)
                .filter(|value| !value.trim().is_empty())
                .map(str::to_string)
        };

        fill(&mut self.event, text("hook_event_name"));
        fill(&mut self.session_id, text("session_id"));
        fill(&mut self.transcript_path, text("transcript_path"));
        fill(&mut self.project_dir, text("cwd"));
        fill(&mut self.prompt, text("prompt"));
        fill(&mut self.tool_name, text("tool_name"));
        fill(&mut self.tool_input, fields.get("tool_input").cloned());
        fill(&mut self.tool_output, fields.get("tool_response").cloned());
    }
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

fn json_or_string(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

/// Read one JSON document from stdin. Empty, unreadable, slow or malformed
/// input yields `None`; the capture continues with the environment alone.
pub async fn read_stdin_json() -> Option<Value> {
    let mut raw = String::new();
    let read = tokio::time::timeout(STDIN_TIMEOUT, tokio::io::stdin().read_to_string(&mut raw))
        .await;

    match read {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => {
            warn!(error = %err, "Failed to read hook input from stdin");
            return None;
        }
        Err(_) => {
            warn!(
                timeout_ms = STDIN_TIMEOUT.as_millis() as u64,
                "Timed out reading hook input from stdin"
            );
            return None;
        }
    }

    if raw.trim().is_empty() {
        return None;
    }

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(error = %err, "Ignoring malformed hook input on stdin");
            None
        }
    }
}
