use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Decoding strategy for backends that support more than one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodingMode {
    #[default]
    Greedy,
    Beam,
}

/// Coarse recognition-progress phase reported by a backend.
///
/// Consumed by callers for progress display; the orchestrator interprets
/// only [`RunState::OutOfMemory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Initializing,
    Encoding,
    Decoding,
    OutOfMemory,
}

/// Immutable snapshot handed to exactly one engine instance at stop-time.
///
/// Samples are shared so OOM retries against a fresh engine instance reuse
/// the same frozen buffer.
#[derive(Clone)]
pub struct RecognitionRequest {
    /// Normalized mono samples at 16kHz.
    pub samples: Arc<[f32]>,
    /// Free-text phrase hints for the backend.
    pub glossary: String,
    /// Forced language code; `None` lets the backend detect.
    pub language: Option<String>,
    pub mode: DecodingMode,
}

pub type PartialResultFn = Arc<dyn Fn(String) + Send + Sync>;
pub type StatusFn = Arc<dyn Fn(RunState) + Send + Sync>;

/// One recognition backend instance.
///
/// Holds model or connection resources for a single session and supports a
/// single in-flight `transcribe` at a time. `close` is idempotent and is
/// invoked exactly once per instance regardless of outcome. Callbacks are
/// registered before the call and may fire zero or more times from the
/// engine's execution context.
#[async_trait::async_trait]
pub trait RecognitionEngine: Send {
    async fn transcribe(&mut self, request: &RecognitionRequest) -> crate::Result<String>;

    async fn close(&mut self);

    fn set_partial_result_callback(&mut self, callback: PartialResultFn);

    fn set_status_callback(&mut self, callback: StatusFn);
}

/// Builds one engine instance per attempt.
///
/// Sessions construct engines lazily and rebuild from scratch on
/// out-of-memory recovery, so factories must be reusable.
#[async_trait::async_trait]
pub trait EngineFactory: Send + Sync {
    async fn build(&self) -> crate::Result<Box<dyn RecognitionEngine>>;
}
