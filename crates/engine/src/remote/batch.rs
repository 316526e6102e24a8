use std::sync::Arc;

use serde::Deserialize;

use crate::remote::RemoteConfig;
use crate::types::{PartialResultFn, RecognitionEngine, RecognitionRequest, RunState, StatusFn};
use crate::TransportError;

/// One utterance upload: WAV payload plus optional hints.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub wav: Vec<u8>,
    pub language: Option<String>,
    pub prompt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// HTTP side of the batch transport; reqwest in production, synthetic in
/// tests.
#[async_trait::async_trait]
pub trait BatchHttp: Send + Sync {
    async fn post(
        &self,
        endpoint: &str,
        credential: &str,
        request: BatchRequest,
    ) -> Result<HttpResponse, TransportError>;
}

pub struct ReqwestBatchHttp {
    client: reqwest::Client,
}

impl ReqwestBatchHttp {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestBatchHttp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BatchHttp for ReqwestBatchHttp {
    async fn post(
        &self,
        endpoint: &str,
        credential: &str,
        request: BatchRequest,
    ) -> Result<HttpResponse, TransportError> {
        let file_part = reqwest::multipart::Part::bytes(request.wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| TransportError::Protocol(format!("multipart audio part: {e}")))?;

        let mut form = reqwest::multipart::Form::new().part("audio", file_part);
        if let Some(language) = request.language {
            form = form.text("language", language);
        }
        if let Some(prompt) = request.prompt {
            form = form.text("prompt", prompt);
        }

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(credential)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

#[derive(Deserialize)]
struct TranscriptionBody {
    text: String,
}

/// Single-shot remote backend. Partial-result registration is accepted but
/// never fires; the transport has no interim results.
pub struct BatchEngine {
    config: RemoteConfig,
    http: Arc<dyn BatchHttp>,
    status_callback: Option<StatusFn>,
    closed: bool,
}

impl BatchEngine {
    pub fn new(config: RemoteConfig, http: Arc<dyn BatchHttp>) -> Self {
        Self {
            config,
            http,
            status_callback: None,
            closed: false,
        }
    }

    fn status(&self, state: RunState) {
        if let Some(cb) = &self.status_callback {
            cb(state);
        }
    }
}

fn map_status(status: u16) -> TransportError {
    match status {
        401 | 403 => TransportError::Unauthorized,
        429 => TransportError::RateLimited,
        413 => TransportError::PayloadTooLarge,
        other => TransportError::Status(other),
    }
}

#[async_trait::async_trait]
impl RecognitionEngine for BatchEngine {
    async fn transcribe(&mut self, request: &RecognitionRequest) -> crate::Result<String> {
        if self.closed {
            return Err(crate::EngineError::Inference("engine is closed".into()));
        }

        self.status(RunState::Encoding);
        let wav = crate::wav::encode_wav(&request.samples, 16000)?;
        let upload = BatchRequest {
            wav,
            language: request
                .language
                .clone()
                .or_else(|| self.config.language.clone()),
            prompt: (!request.glossary.is_empty()).then(|| request.glossary.clone()),
        };

        tracing::debug!(
            endpoint = %self.config.endpoint,
            samples = request.samples.len(),
            "uploading utterance"
        );
        self.status(RunState::Decoding);
        let response = self
            .http
            .post(&self.config.endpoint, &self.config.credential, upload)
            .await?;

        if !(200..300).contains(&response.status) {
            return Err(map_status(response.status).into());
        }

        let body: TranscriptionBody = serde_json::from_str(&response.body).map_err(|e| {
            TransportError::Protocol(format!("malformed transcription response: {e}"))
        })?;
        Ok(body.text)
    }

    async fn close(&mut self) {
        self.closed = true;
    }

    fn set_partial_result_callback(&mut self, _callback: PartialResultFn) {
        // Batch mode has no interim results.
    }

    fn set_status_callback(&mut self, callback: StatusFn) {
        self.status_callback = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::TransportMode;
    use crate::types::DecodingMode;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct SyntheticHttp {
        status: u16,
        body: String,
        seen: Mutex<Option<BatchRequest>>,
    }

    impl SyntheticHttp {
        fn new(status: u16, body: &str) -> Self {
            Self {
                status,
                body: body.into(),
                seen: Mutex::new(None),
            }
        }
    }

    #[async_trait::async_trait]
    impl BatchHttp for SyntheticHttp {
        async fn post(
            &self,
            _endpoint: &str,
            _credential: &str,
            request: BatchRequest,
        ) -> Result<HttpResponse, TransportError> {
            *self.seen.lock().unwrap() = Some(request);
            Ok(HttpResponse {
                status: self.status,
                body: self.body.clone(),
            })
        }
    }

    fn config() -> RemoteConfig {
        RemoteConfig {
            endpoint: "https://stt.example.com/recognize".into(),
            credential: "token".into(),
            mode: TransportMode::Batch,
            language: None,
        }
    }

    fn request() -> RecognitionRequest {
        RecognitionRequest {
            samples: std::sync::Arc::from(vec![0.25f32; 320].into_boxed_slice()),
            glossary: "orange juice".into(),
            language: Some("et".into()),
            mode: DecodingMode::Greedy,
        }
    }

    #[tokio::test]
    async fn test_success_returns_transcript() {
        let http = Arc::new(SyntheticHttp::new(200, r#"{"text": "hello"}"#));
        let mut engine = BatchEngine::new(config(), http.clone());

        assert_eq!(engine.transcribe(&request()).await.unwrap(), "hello");

        let seen = http.seen.lock().unwrap();
        let upload = seen.as_ref().unwrap();
        assert_eq!(&upload.wav[0..4], b"RIFF");
        assert_eq!(upload.language.as_deref(), Some("et"));
        assert_eq!(upload.prompt.as_deref(), Some("orange juice"));
    }

    #[tokio::test]
    async fn test_unauthorized_maps_and_fires_no_partials() {
        let http = Arc::new(SyntheticHttp::new(401, "denied"));
        let mut engine = BatchEngine::new(config(), http);
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        engine.set_partial_result_callback(Arc::new(move |_| {
            flag.store(true, Ordering::SeqCst);
        }));

        match engine.transcribe(&request()).await {
            Err(crate::EngineError::Transport(TransportError::Unauthorized)) => {}
            other => panic!("expected Unauthorized, got {other:?}"),
        }
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_status_code_mapping() {
        for (status, want_rate_limited, want_too_large) in
            [(429, true, false), (413, false, true)]
        {
            let http = Arc::new(SyntheticHttp::new(status, ""));
            let mut engine = BatchEngine::new(config(), http);
            match engine.transcribe(&request()).await {
                Err(crate::EngineError::Transport(TransportError::RateLimited)) => {
                    assert!(want_rate_limited)
                }
                Err(crate::EngineError::Transport(TransportError::PayloadTooLarge)) => {
                    assert!(want_too_large)
                }
                other => panic!("unexpected result {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_protocol_error() {
        let http = Arc::new(SyntheticHttp::new(200, "not json"));
        let mut engine = BatchEngine::new(config(), http);
        match engine.transcribe(&request()).await {
            Err(crate::EngineError::Transport(TransportError::Protocol(_))) => {}
            other => panic!("expected Protocol error, got {other:?}"),
        }
    }
}
