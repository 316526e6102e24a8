mod batch;
mod stream;
mod wire;
mod ws;

pub use batch::{BatchEngine, BatchHttp, BatchRequest, HttpResponse, ReqwestBatchHttp};
pub use stream::{StreamingConnector, StreamingEngine, TransportReceiver, TransportSender};
pub use wire::{ClientFrame, ServerFrame, SpeechContext, StreamingConfig};
pub use ws::WebSocketConnector;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{EngineFactory, RecognitionEngine};

/// Transport flavor of the remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// One multipart request per utterance; no partial results.
    Batch,
    /// Persistent duplex channel with interim results.
    Streaming,
}

/// Connection parameters for the remote backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub credential: String,
    pub mode: TransportMode,
    /// Default language when the session does not force one.
    pub language: Option<String>,
}

impl RemoteConfig {
    /// A remote backend with missing connection parameters must fail at
    /// construction, never fall back to the local backend.
    pub fn validate(&self) -> crate::Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(crate::EngineError::Configuration(
                "remote endpoint is not configured".into(),
            ));
        }
        if self.credential.trim().is_empty() {
            return Err(crate::EngineError::Configuration(
                "remote credential is not configured".into(),
            ));
        }
        Ok(())
    }
}

/// [`EngineFactory`] for the remote backend; picks the engine flavor from
/// the configured transport mode.
pub struct RemoteEngineFactory {
    config: RemoteConfig,
    http: Arc<dyn BatchHttp>,
    connector: Arc<dyn StreamingConnector>,
}

impl RemoteEngineFactory {
    pub fn new(config: RemoteConfig) -> Self {
        Self::with_transports(
            config,
            Arc::new(ReqwestBatchHttp::new()),
            Arc::new(WebSocketConnector),
        )
    }

    /// Injectable transports, used by tests and custom hosts.
    pub fn with_transports(
        config: RemoteConfig,
        http: Arc<dyn BatchHttp>,
        connector: Arc<dyn StreamingConnector>,
    ) -> Self {
        Self {
            config,
            http,
            connector,
        }
    }
}

#[async_trait::async_trait]
impl EngineFactory for RemoteEngineFactory {
    async fn build(&self) -> crate::Result<Box<dyn RecognitionEngine>> {
        self.config.validate()?;
        match self.config.mode {
            TransportMode::Batch => Ok(Box::new(BatchEngine::new(
                self.config.clone(),
                Arc::clone(&self.http),
            ))),
            TransportMode::Streaming => Ok(Box::new(StreamingEngine::new(
                self.config.clone(),
                Arc::clone(&self.connector),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str, credential: &str) -> RemoteConfig {
        RemoteConfig {
            endpoint: endpoint.into(),
            credential: credential.into(),
            mode: TransportMode::Batch,
            language: None,
        }
    }

    #[test]
    fn test_blank_endpoint_is_rejected() {
        let err = config("  ", "key").validate().unwrap_err();
        assert!(matches!(err, crate::EngineError::Configuration(_)));
    }

    #[test]
    fn test_blank_credential_is_rejected() {
        let err = config("wss://stt.example.com", "").validate().unwrap_err();
        assert!(matches!(err, crate::EngineError::Configuration(_)));
    }

    #[test]
    fn test_complete_config_passes() {
        assert!(config("https://stt.example.com", "key").validate().is_ok());
    }

    #[tokio::test]
    async fn test_factory_rejects_incomplete_config() {
        let factory = RemoteEngineFactory::new(config("https://stt.example.com", " "));
        match factory.build().await {
            Err(crate::EngineError::Configuration(_)) => {}
            other => panic!("expected Configuration error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_factory_builds_engine_per_mode() {
        for mode in [TransportMode::Batch, TransportMode::Streaming] {
            let factory = RemoteEngineFactory::new(RemoteConfig {
                mode,
                ..config("https://stt.example.com", "key")
            });
            assert!(factory.build().await.is_ok());
        }
    }
}
