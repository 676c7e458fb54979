//! Capture hook: records host tool events and ships them to the collection
//! endpoint without ever blocking the host.
//!
//! Each host event runs one short-lived capture. Failed deliveries that are
//! worth retrying land in the on-disk retry queue, and `drain` resubmits
//! them later.
//!
//! # Architecture
//!
//! ```text
//! host tool -> capture -> DeliveryClient -> endpoint
//!                  |
//!                  +--(retryable failure)--> RetryQueue
//!                                                |
//! drain ---------------------------------------->+--> DeliveryClient
//! ```

pub mod config;
pub mod drainer;
pub mod error;
pub mod event;
pub mod input;
pub mod orchestrator;
pub mod shutdown;
pub mod status;

pub use config::{DrainConfig, HookConfig};
pub use drainer::{DrainReport, Drainer};
pub use error::{HookError, HookResult};
pub use event::{HookContext, HookEvent, ToolCall, ToolOutcome};
pub use input::HookInput;
pub use orchestrator::{
    run_capture, run_capture_until, run_capture_with_queue, CaptureOutcome, CaptureState,
    Orchestrator,
};
pub use shutdown::shutdown_signal;
pub use status::{status_report, StatusReport};
