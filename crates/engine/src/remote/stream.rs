use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio_util::sync::CancellationToken;

use crate::remote::wire::{parse_server_frame, ClientFrame, ServerFrame, SpeechContext, StreamingConfig};
use crate::remote::RemoteConfig;
use crate::types::{PartialResultFn, RecognitionEngine, RecognitionRequest, RunState, StatusFn};
use crate::TransportError;

/// Audio is sliced into one-second chunks on the wire.
const CHUNK_SAMPLES: usize = 16000;

/// Fixed pacing delay between chunk sends.
const CHUNK_PACING: Duration = Duration::from_millis(25);

/// Maximum wait for the final result after the end-of-audio marker.
const FINAL_RESULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Outbound half of a duplex transport.
#[async_trait::async_trait]
pub trait TransportSender: Send {
    async fn send(&mut self, message: String) -> Result<(), TransportError>;

    async fn close(&mut self);
}

/// Inbound half of a duplex transport. `None` means the channel closed.
#[async_trait::async_trait]
pub trait TransportReceiver: Send {
    async fn receive(&mut self) -> Option<Result<String, TransportError>>;
}

/// Opens one duplex channel per transcription.
#[async_trait::async_trait]
pub trait StreamingConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        credential: &str,
    ) -> Result<(Box<dyn TransportSender>, Box<dyn TransportReceiver>), TransportError>;
}

/// Streaming remote backend over a duplex channel.
pub struct StreamingEngine {
    config: RemoteConfig,
    connector: Arc<dyn StreamingConnector>,
    partial_callback: Option<PartialResultFn>,
    status_callback: Option<StatusFn>,
    teardown: CancellationToken,
    closed: bool,
}

impl StreamingEngine {
    pub fn new(config: RemoteConfig, connector: Arc<dyn StreamingConnector>) -> Self {
        Self {
            config,
            connector,
            partial_callback: None,
            status_callback: None,
            teardown: CancellationToken::new(),
            closed: false,
        }
    }

    fn status(&self, state: RunState) {
        if let Some(cb) = &self.status_callback {
            cb(state);
        }
    }

    fn streaming_config(&self, request: &RecognitionRequest) -> StreamingConfig {
        let language_code = request
            .language
            .clone()
            .or_else(|| self.config.language.clone())
            .unwrap_or_else(|| "en-US".into());
        let phrases: Vec<String> = request
            .glossary
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        StreamingConfig {
            encoding: "LINEAR16".into(),
            sample_rate_hertz: 16000,
            language_code,
            speech_contexts: (!phrases.is_empty()).then(|| vec![SpeechContext { phrases }]),
        }
    }
}

#[async_trait::async_trait]
impl RecognitionEngine for StreamingEngine {
    async fn transcribe(&mut self, request: &RecognitionRequest) -> crate::Result<String> {
        if self.closed {
            return Err(crate::EngineError::Inference("engine is closed".into()));
        }

        self.status(RunState::Initializing);
        let (mut sink, mut stream) = self
            .connector
            .connect(&self.config.endpoint, &self.config.credential)
            .await?;

        let token = CancellationToken::new();
        self.teardown = token.clone();

        let (final_tx, final_rx) = tokio::sync::oneshot::channel();
        let partial_callback = self.partial_callback.clone();
        let recv_token = token.clone();
        let receiver = tokio::spawn(async move {
            let mut final_tx = Some(final_tx);
            loop {
                let message = tokio::select! {
                    biased;
                    _ = recv_token.cancelled() => break,
                    message = stream.receive() => message,
                };
                let resolved = match message {
                    Some(Ok(text)) => match parse_server_frame(&text) {
                        Ok(ServerFrame::Partial { partial }) => {
                            if let Some(cb) = &partial_callback {
                                cb(partial);
                            }
                            continue;
                        }
                        Ok(ServerFrame::Final { transcript }) => Ok(transcript),
                        Err(e) => Err(e),
                    },
                    Some(Err(e)) => Err(e),
                    None => Err(TransportError::Protocol(
                        "channel closed before final result".into(),
                    )),
                };
                if let Some(tx) = final_tx.take() {
                    let _ = tx.send(resolved);
                }
                break;
            }
        });

        self.status(RunState::Encoding);
        let config_frame = ClientFrame::Config(self.streaming_config(request));
        let samples = Arc::clone(&request.samples);
        let send_result: Result<(), TransportError> = {
            let sink = &mut sink;
            async move {
                sink.send(config_frame.into_message()).await?;
                for chunk in samples.chunks(CHUNK_SAMPLES) {
                    let encoded = BASE64.encode(crate::wav::pcm16_bytes(chunk));
                    sink.send(ClientFrame::Audio(encoded).into_message()).await?;
                    tokio::time::sleep(CHUNK_PACING).await;
                }
                sink.send(ClientFrame::EndOfAudio.into_message()).await?;
                Ok(())
            }
            .await
        };

        let outcome: crate::Result<String> = match send_result {
            Err(e) => Err(e.into()),
            Ok(()) => {
                self.status(RunState::Decoding);
                match tokio::time::timeout(FINAL_RESULT_TIMEOUT, final_rx).await {
                    Err(_) => Err(TransportError::Timeout.into()),
                    Ok(Err(_)) => {
                        Err(TransportError::Protocol("receiver task dropped".into()).into())
                    }
                    Ok(Ok(Ok(text))) => Ok(text),
                    Ok(Ok(Err(e))) => Err(e.into()),
                }
            }
        };

        // The transport is torn down on success and failure alike.
        token.cancel();
        sink.close().await;
        let _ = receiver.await;

        if outcome.is_err() {
            tracing::warn!(endpoint = %self.config.endpoint, "streaming transcription failed");
        }
        outcome
    }

    async fn close(&mut self) {
        self.closed = true;
        self.teardown.cancel();
    }

    fn set_partial_result_callback(&mut self, callback: PartialResultFn) {
        self.partial_callback = Some(callback);
    }

    fn set_status_callback(&mut self, callback: StatusFn) {
        self.status_callback = Some(callback);
    }
}
