//! One capture run: decode, deliver, persist on failure, exit.
//!
//! Every path exits 0 except a missing event type. Delivery and persistence
//! failures are logged and swallowed so the host tool is never blocked.
//!
//! ```text
//! INIT -> BUILD_PAYLOAD -> DELIVER -> COMPLETE
//!                             |
//!                             +-> ENQUEUE      (retryable)
//!                             +-> LOG_FAILURE  (terminal)
//!                      (any error or panic) -> CATCH_ALL
//! ```
//!
//! A termination signal during the run abandons the pipeline, but the log
//! buffers are still flushed.

use crate::config::HookConfig;
use crate::error::HookError;
use crate::event::{HookContext, HookEvent};
use crate::input::HookInput;
use capture_config::TraceContext;
use capture_delivery::{DeliveryClient, DeliveryError, DeliveryResult};
use capture_queue::{EnqueueOutcome, FsRetryQueue, QueuedError, RetryQueue};
use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::sync::{Arc, Mutex, Once};
use tokio::task::JoinError;
use tracing::instrument::WithSubscriber;
use tracing::{error, info, info_span, warn, Instrument};

/// Terminal state of a capture run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Capture is switched off; nothing was done
    Disabled,
    /// No event type was supplied
    MissingEvent,
    /// The endpoint accepted the event
    Complete,
    /// Delivery failed in a retryable way and the event was queued
    Enqueued,
    /// Delivery failed in a retryable way but the queue refused the entry
    EnqueueRejected,
    /// Delivery failed terminally
    LoggedFailure,
    /// An unexpected error or panic was caught
    CaughtError,
    /// A termination signal arrived before the run finished
    Interrupted,
}

/// What a capture run reached, plus degraded-mode flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub state: CaptureState,
    pub request_id: Option<String>,
    pub logger_degraded: bool,
    pub queue_degraded: bool,
}

impl CaptureOutcome {
    fn bare(state: CaptureState) -> Self {
        Self {
            state,
            request_id: None,
            logger_degraded: false,
            queue_degraded: false,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self.state {
            CaptureState::MissingEvent => 1,
            _ => 0,
        }
    }
}

/// Delivery plus fallback persistence for decoded events.
pub struct Orchestrator {
    queue: Arc<dyn RetryQueue>,
    delivery: Result<Arc<DeliveryClient>, String>,
    max_field_bytes: usize,
}

impl Orchestrator {
    /// Build the filesystem queue and the HTTP client. A client that cannot
    /// be built is remembered and reported on each capture.
    pub fn new(settings: &HookConfig) -> Self {
        let queue: Arc<dyn RetryQueue> = Arc::new(FsRetryQueue::new(settings.queue_config()));
        Self::with_queue(settings, queue)
    }

    pub fn with_queue(settings: &HookConfig, queue: Arc<dyn RetryQueue>) -> Self {
        let delivery = settings
            .delivery_config()
            .and_then(|config| Ok(DeliveryClient::new(config)?))
            .map(Arc::new)
            .map_err(|err| err.to_string());

        if let Err(reason) = &delivery {
            error!(error = %reason, "Delivery client unavailable");
        }

        Self {
            queue,
            delivery,
            max_field_bytes: settings.config.max_field_bytes,
        }
    }

    pub fn queue(&self) -> &Arc<dyn RetryQueue> {
        &self.queue
    }

    /// Deliver one event. Errors and panics never escape.
    pub async fn capture(&self, event: HookEvent, context: HookContext) -> (CaptureState, String) {
        let trace = TraceContext::for_session(&context.session_id, "capture");
        let request_id = trace.request_id.clone();

        let span = info_span!(
            "capture",
            request_id = %trace.request_id,
            trace_id = %trace.trace_id,
            span_id = %trace.span_id,
            event = %event.name(),
        );

        let delivery = match &self.delivery {
            Ok(client) => Arc::clone(client),
            Err(reason) => {
                span.in_scope(|| error!(error = %reason, "Event not delivered"));
                return (CaptureState::LoggedFailure, request_id);
            }
        };

        install_panic_hook();
        let queue = Arc::clone(&self.queue);
        let max_field_bytes = self.max_field_bytes;
        let task = async move {
            let payload = event.payload(&context, max_field_bytes);
            let result = delivery.send(&payload, trace).await;
            settle(queue.as_ref(), &payload, result).await
        };

        let joined = tokio::spawn(task.instrument(span.clone()).with_current_subscriber()).await;

        let state = match joined {
            Ok(state) => state,
            Err(err) => {
                let err = caught(err);
                span.in_scope(|| error!(error = %err, "Capture failed unexpectedly"));
                CaptureState::CaughtError
            }
        };

        (state, request_id)
    }
}

/// Act on a delivery result: log success, queue retryable failures, log
/// terminal ones.
async fn settle(
    queue: &dyn RetryQueue,
    payload: &serde_json::Value,
    result: DeliveryResult,
) -> CaptureState {
    match result {
        DeliveryResult::Delivered {
            status,
            duration,
            attempts,
            ..
        } => {
            info!(
                status,
                duration_ms = duration.as_millis() as u64,
                attempts,
                "Event delivered"
            );
            CaptureState::Complete
        }
        DeliveryResult::Failed {
            error,
            duration,
            attempts,
            should_queue: true,
            trace,
        } => {
            let outcome = queue
                .enqueue(&trace.request_id, payload, &queued_error(&error), 0)
                .await;

            match outcome {
                EnqueueOutcome::Enqueued { next_retry_at, .. } => {
                    warn!(
                        error = %error,
                        attempts,
                        duration_ms = duration.as_millis() as u64,
                        next_retry_at = %next_retry_at,
                        "Delivery failed, event queued for retry"
                    );
                    CaptureState::Enqueued
                }
                EnqueueOutcome::Rejected(reason) => {
                    error!(
                        error = %error,
                        attempts,
                        reason = %reason,
                        "Delivery failed and the event could not be queued"
                    );
                    CaptureState::EnqueueRejected
                }
            }
        }
        DeliveryResult::Failed {
            error,
            duration,
            attempts,
            ..
        } => {
            error!(
                error = %error,
                code = error.code().unwrap_or_default(),
                status = error.status().unwrap_or_default(),
                attempts,
                duration_ms = duration.as_millis() as u64,
                "Delivery failed"
            );
            CaptureState::LoggedFailure
        }
    }
}

/// The error recorded on a queue entry.
pub fn queued_error(error: &DeliveryError) -> QueuedError {
    let mut queued = QueuedError::new(error.to_string());
    if let Some(code) = error.code() {
        queued = queued.with_code(code);
    }
    if let Some(status) = error.status() {
        queued = queued.with_status(status);
    }
    queued
}

/// Backtrace of the latest panic, left by the hook from [`install_panic_hook`].
static LAST_PANIC_BACKTRACE: Mutex<Option<String>> = Mutex::new(None);

/// Chain a panic hook that records a backtrace for CATCH_ALL to log. The
/// previous hook still runs.
fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Ok(mut slot) = LAST_PANIC_BACKTRACE.lock() {
                *slot = Some(Backtrace::capture().to_string());
            }
            previous(info);
        }));
    });
}

/// The error CATCH_ALL logs for a task that did not complete.
fn caught(err: JoinError) -> HookError {
    if !err.is_panic() {
        return HookError::Panicked(err.to_string());
    }

    let message = panic_message(err.into_panic());
    let backtrace = LAST_PANIC_BACKTRACE
        .lock()
        .ok()
        .and_then(|mut slot| slot.take())
        .unwrap_or_else(|| Backtrace::capture().to_string());
    HookError::Panicked(format!("{message}\nbacktrace:\n{backtrace}"))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Full capture: logging up, decode, deliver, logging flushed.
pub async fn run_capture(settings: &HookConfig, input: HookInput) -> CaptureOutcome {
    guarded_capture(settings, input, None, std::future::pending()).await
}

/// [`run_capture`] that gives up when `shutdown` resolves.
pub async fn run_capture_until<F>(
    settings: &HookConfig,
    input: HookInput,
    shutdown: F,
) -> CaptureOutcome
where
    F: Future<Output = ()>,
{
    guarded_capture(settings, input, None, shutdown).await
}

/// [`run_capture`] against a caller-supplied retry queue.
pub async fn run_capture_with_queue(
    settings: &HookConfig,
    input: HookInput,
    queue: Arc<dyn RetryQueue>,
) -> CaptureOutcome {
    guarded_capture(settings, input, Some(queue), std::future::pending()).await
}

async fn guarded_capture<F>(
    settings: &HookConfig,
    input: HookInput,
    queue: Option<Arc<dyn RetryQueue>>,
    shutdown: F,
) -> CaptureOutcome
where
    F: Future<Output = ()>,
{
    if input.event.is_none() {
        let logging = capture_config::init_logging(&settings.config, &settings.paths);
        error!(error = %HookError::MissingEvent, "Hook invoked without an event type");
        let logger_degraded = logging.is_degraded();
        logging.shutdown().await;
        return CaptureOutcome {
            logger_degraded,
            ..CaptureOutcome::bare(CaptureState::MissingEvent)
        };
    }

    if !settings.config.enabled {
        return CaptureOutcome::bare(CaptureState::Disabled);
    }

    let logging = capture_config::init_logging(&settings.config, &settings.paths);
    install_panic_hook();

    let work = pipeline(settings.clone(), input, queue);
    let mut task = tokio::spawn(work.with_current_subscriber());
    tokio::pin!(shutdown);

    let outcome = tokio::select! {
        joined = &mut task => match joined {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %caught(err), "Capture failed unexpectedly");
                CaptureOutcome::bare(CaptureState::CaughtError)
            }
        },
        _ = &mut shutdown => {
            task.abort();
            warn!("Capture interrupted by shutdown signal");
            CaptureOutcome::bare(CaptureState::Interrupted)
        }
    };

    let logger_degraded = logging.is_degraded();
    logging.shutdown().await;

    CaptureOutcome {
        logger_degraded,
        ..outcome
    }
}

/// Decode, deliver and settle. Runs inside the CATCH_ALL task.
async fn pipeline(
    settings: HookConfig,
    input: HookInput,
    queue: Option<Arc<dyn RetryQueue>>,
) -> CaptureOutcome {
    let (event, context) = match HookEvent::decode(input) {
        Ok(decoded) => decoded,
        Err(err) => {
            error!(error = %err, "Hook input rejected");
            return CaptureOutcome::bare(CaptureState::MissingEvent);
        }
    };

    let orchestrator = match queue {
        Some(queue) => Orchestrator::with_queue(&settings, queue),
        None => Orchestrator::new(&settings),
    };
    let (state, request_id) = orchestrator.capture(event, context).await;
    let queue_degraded = !orchestrator.queue().status().await.enabled;

    CaptureOutcome {
        state,
        request_id: Some(request_id),
        logger_degraded: false,
        queue_degraded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_missing_event_exits_nonzero() {
        for state in [
            CaptureState::Disabled,
            CaptureState::Complete,
            CaptureState::Enqueued,
            CaptureState::EnqueueRejected,
            CaptureState::LoggedFailure,
            CaptureState::CaughtError,
            CaptureState::Interrupted,
        ] {
            assert_eq!(CaptureOutcome::bare(state).exit_code(), 0, "{state:?}");
        }
        assert_eq!(CaptureOutcome::bare(CaptureState::MissingEvent).exit_code(), 1);
    }

    #[test]
    fn test_queued_error_carries_code_and_status() {
        let network = queued_error(&DeliveryError::Network {
            code: "ECONNREFUSED".into(),
            message: "connection refused".into(),
        });
        assert_eq!(network.code.as_deref(), Some("ECONNREFUSED"));
        assert!(network.status_code.is_none());

        let status = queued_error(&DeliveryError::Status {
            status: 503,
            body: "busy".into(),
        });
        assert_eq!(status.status_code, Some(503));
        assert!(status.code.is_none());
        assert_eq!(status.message, "HTTP 503: busy");
    }

    #[test]
    fn test_panic_messages_are_extracted() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "unknown panic");
    }

    #[tokio::test]
    async fn test_caught_panic_carries_message_and_backtrace() {
        install_panic_hook();
        let err = tokio::spawn(async { panic!("queue exploded") })
            .await
            .unwrap_err();

        let message = caught(err).to_string();

        assert!(message.contains("queue exploded"), "{message}");
        assert!(message.contains("backtrace:"), "{message}");
    }
}
