//! Recognition backends behind one capability contract.
//!
//! The orchestrator depends only on [`RecognitionEngine`] and
//! [`EngineFactory`]; the local (on-device model) and remote (network
//! service) variants are interchangeable behind them.

mod local;
mod remote;
mod types;
mod wav;

pub use local::{
    DecodeOptions, LocalEngine, LocalEngineFactory, ModelEvent, ModelKind, ModelLoader,
    ModelOutput, SpeechModel,
};
pub use remote::{
    BatchEngine, BatchHttp, BatchRequest, ClientFrame, HttpResponse, RemoteConfig,
    RemoteEngineFactory, ReqwestBatchHttp, ServerFrame, SpeechContext, StreamingConfig,
    StreamingConnector, StreamingEngine, TransportMode, TransportReceiver, TransportSender,
    WebSocketConnector,
};
pub use types::{
    DecodingMode, EngineFactory, PartialResultFn, RecognitionEngine, RecognitionRequest, RunState,
    StatusFn,
};
pub use wav::{encode_wav, pcm16_bytes};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    Configuration(String),
    #[error("missing model files: {}", format_kinds(.0))]
    ModelsMissing(Vec<ModelKind>),
    #[error("out of memory")]
    OutOfMemory,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("inference failed: {0}")]
    Inference(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("rate limited")]
    RateLimited,
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("timed out waiting for final result")]
    Timeout,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("service returned status {0}")]
    Status(u16),
}

fn format_kinds(kinds: &[ModelKind]) -> String {
    kinds
        .iter()
        .map(|k| k.name())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, EngineError>;
