//! HTTP delivery with bounded immediate retries.

use crate::error::{DeliveryError, SendResult};
use capture_config::{Config, ConfigResult, TraceContext};
use reqwest::Client;
use serde_json::Value;
use std::error::Error as StdError;
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Field carrying the trace context in outbound payloads.
pub const TRACE_FIELD: &str = "_trace";
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Longest response body kept in a [`DeliveryError::Status`].
const MAX_ERROR_BODY_CHARS: usize = 512;

pub const DEFAULT_RETRYABLE_CODES: [&str; 5] =
    ["ECONNREFUSED", "ETIMEDOUT", "ENOTFOUND", "ECONNRESET", "EAI_AGAIN"];
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 5] = [500, 502, 503, 504, 429];

/// Delivery client configuration.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Collection endpoint.
    pub endpoint: Url,
    /// Bearer token, sent when present.
    pub api_token: Option<String>,
    /// Hard timeout per attempt.
    pub timeout: Duration,
    /// Attempts per delivery, including the first.
    pub max_attempts: u32,
    /// Sleep between attempts.
    pub retry_delay: Duration,
    pub retryable_codes: Vec<String>,
    pub retryable_statuses: Vec<u16>,
}

impl DeliveryConfig {
    /// Defaults for everything but the endpoint.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            api_token: None,
            timeout: Duration::from_millis(capture_config::DEFAULT_TIMEOUT_MS),
            max_attempts: capture_config::DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(capture_config::DEFAULT_RETRY_DELAY_MS),
            retryable_codes: DEFAULT_RETRYABLE_CODES.iter().map(|c| c.to_string()).collect(),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }

    pub fn from_config(config: &Config) -> ConfigResult<Self> {
        Ok(Self {
            api_token: config.api_token.clone(),
            timeout: config.timeout(),
            max_attempts: config.max_retries.max(1),
            retry_delay: config.retry_delay(),
            ..Self::new(config.endpoint_url()?)
        })
    }

    /// Whether a failure is transient and worth retrying or queueing.
    pub fn is_retryable(&self, error: &DeliveryError) -> bool {
        match error {
            DeliveryError::Status { status, .. } => self.retryable_statuses.contains(status),
            DeliveryError::Network { .. } | DeliveryError::Timeout(_) => error
                .code()
                .is_some_and(|code| self.retryable_codes.iter().any(|c| c == code)),
            DeliveryError::InvalidPayload(_) | DeliveryError::Client(_) => false,
        }
    }
}

/// Outcome of [`DeliveryClient::send`]. Never persisted.
#[derive(Debug, Clone)]
pub enum DeliveryResult {
    Delivered {
        status: u16,
        duration: Duration,
        attempts: u32,
        trace: TraceContext,
    },
    Failed {
        error: DeliveryError,
        duration: Duration,
        attempts: u32,
        /// True when the failure is retryable and belongs in the retry queue.
        should_queue: bool,
        trace: TraceContext,
    },
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryResult::Delivered { .. })
    }

    pub fn should_queue(&self) -> bool {
        matches!(self, DeliveryResult::Failed { should_queue: true, .. })
    }

    pub fn trace(&self) -> &TraceContext {
        match self {
            DeliveryResult::Delivered { trace, .. } | DeliveryResult::Failed { trace, .. } => trace,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            DeliveryResult::Delivered { duration, .. }
            | DeliveryResult::Failed { duration, .. } => *duration,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryResult::Delivered { attempts, .. }
            | DeliveryResult::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn error(&self) -> Option<&DeliveryError> {
        match self {
            DeliveryResult::Failed { error, .. } => Some(error),
            DeliveryResult::Delivered { .. } => None,
        }
    }
}

/// Sends event payloads to the collection endpoint.
pub struct DeliveryClient {
    config: DeliveryConfig,
    client: Client,
}

impl DeliveryClient {
    /// Create a new delivery client.
    pub fn new(config: DeliveryConfig) -> SendResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| DeliveryError::Client(err.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Inject `_trace` into `payload` and deliver it.
    pub async fn send(&self, payload: &Value, trace: TraceContext) -> DeliveryResult {
        let mut body = match payload {
            Value::Object(fields) => fields.clone(),
            other => {
                let error = DeliveryError::InvalidPayload(format!(
                    "expected a JSON object, got {}",
                    json_kind(other)
                ));
                return DeliveryResult::Failed {
                    error,
                    duration: Duration::ZERO,
                    attempts: 0,
                    should_queue: false,
                    trace,
                };
            }
        };

        match serde_json::to_value(&trace) {
            Ok(value) => {
                body.insert(TRACE_FIELD.to_string(), value);
            }
            Err(err) => {
                return DeliveryResult::Failed {
                    error: DeliveryError::InvalidPayload(err.to_string()),
                    duration: Duration::ZERO,
                    attempts: 0,
                    should_queue: false,
                    trace,
                };
            }
        }

        self.send_with_retry(&Value::Object(body), trace).await
    }

    /// Deliver `body` as-is, retrying transient failures up to
    /// `max_attempts` times.
    pub async fn send_with_retry(&self, body: &Value, trace: TraceContext) -> DeliveryResult {
        let started = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.attempt(body, &trace.request_id).await {
                Ok(status) => {
                    return DeliveryResult::Delivered {
                        status,
                        duration: started.elapsed(),
                        attempts: attempt,
                        trace,
                    };
                }
                Err(error) => {
                    let retryable = self.config.is_retryable(&error);

                    if !retryable || attempt >= max_attempts {
                        return DeliveryResult::Failed {
                            error,
                            duration: started.elapsed(),
                            attempts: attempt,
                            should_queue: retryable,
                            trace,
                        };
                    }

                    warn!(
                        request_id = %trace.request_id,
                        attempt,
                        max_attempts,
                        delay_ms = self.config.retry_delay.as_millis() as u64,
                        error = %error,
                        "Delivery attempt failed, retrying"
                    );

                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    /// One POST under the hard timeout.
    async fn attempt(&self, body: &Value, request_id: &str) -> SendResult<u16> {
        debug!(url = %self.config.endpoint, request_id = %request_id, "Sending event");

        match tokio::time::timeout(self.config.timeout, self.post(body, request_id)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.config.timeout)),
        }
    }

    async fn post(&self, body: &Value, request_id: &str) -> SendResult<u16> {
        let mut request = self
            .client
            .post(self.config.endpoint.clone())
            .header("Content-Type", "application/json")
            .header(REQUEST_ID_HEADER, request_id)
            .json(body);

        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| classify_transport(&err, self.config.timeout))?;

        let status = response.status();
        if status.is_success() {
            return Ok(status.as_u16());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Status {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        })
    }
}

/// Map a transport failure onto a network code.
pub fn classify_transport(err: &reqwest::Error, timeout: Duration) -> DeliveryError {
    if err.is_timeout() {
        return DeliveryError::Timeout(timeout);
    }
    if err.is_builder() {
        return DeliveryError::Client(err.to_string());
    }

    let message = error_chain(err);
    let code = io_code(err)
        .or_else(|| message_code(&message))
        .unwrap_or(if err.is_connect() { "ECONNFAILED" } else { "EUNKNOWN" });

    DeliveryError::Network {
        code: code.to_string(),
        message,
    }
}

fn io_code(err: &(dyn StdError + 'static)) -> Option<&'static str> {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused => return Some("ECONNREFUSED"),
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof => return Some("ECONNRESET"),
                io::ErrorKind::TimedOut => return Some("ETIMEDOUT"),
                _ => {}
            }
        }
        source = current.source();
    }
    None
}

fn message_code(message: &str) -> Option<&'static str> {
    let lower = message.to_ascii_lowercase();
    if lower.contains("temporary failure in name resolution") {
        Some("EAI_AGAIN")
    } else if lower.contains("dns error")
        || lower.contains("failed to lookup")
        || lower.contains("no such host")
        || lower.contains("name or service not known")
    {
        Some("ENOTFOUND")
    } else if lower.contains("connection refused") {
        Some("ECONNREFUSED")
    } else if lower.contains("connection reset") || lower.contains("connection closed") {
        Some("ECONNRESET")
    } else {
        None
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(current) = source {
        let text = current.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = current.source();
    }
    message
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
