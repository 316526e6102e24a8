mod accumulator;
mod capture;
mod constants;
mod deps;
mod magnitude;
mod observer;
mod session;

pub use accumulator::{AppendOutcome, SampleAccumulator};
pub use capture::StopCause;
pub use constants::*;
pub use deps::{AlwaysGranted, DelayReclaim, PermissionGate, ReclaimStrategy, SessionDeps};
pub use magnitude::{Magnitude, MagnitudeContext, MagnitudeState, MagnitudeTracker};
pub use observer::SessionObserver;
pub use session::{Recognizer, SessionConfig};

/// Terminal outcome delivered through [`SessionObserver::on_ended`] when a
/// session does not finish with a transcript.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndReason {
    /// Caller-initiated teardown; not an error.
    #[error("cancelled")]
    Cancelled,
    #[error("capture permission denied")]
    PermissionDenied,
    #[error("capture device failed to initialize: {message}")]
    DeviceInitFailed { message: String },
    /// Backend misconfiguration. For the local backend `missing_models`
    /// names the models a caller could acquire to remediate.
    #[error("engine configuration error: {message}")]
    EngineConfiguration {
        missing_models: Vec<String>,
        message: String,
    },
    #[error("transport failure: {message}")]
    TransportFailed { message: String },
    #[error("recognition failed: {message}")]
    EngineFailed { message: String },
}
