//! Wire frames for the streaming transport.
//!
//! Outbound: one JSON configuration frame, then base64 PCM chunks as plain
//! text frames, then an end-of-audio marker. Inbound: interim results as
//! `{"partial": ...}` and exactly one `{"transcript": ...}`.

use serde::{Deserialize, Serialize};

use crate::TransportError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingConfig {
    pub encoding: String,
    pub sample_rate_hertz: u32,
    pub language_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_contexts: Option<Vec<SpeechContext>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeechContext {
    pub phrases: Vec<String>,
}

/// Caller-to-service frame.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Config(StreamingConfig),
    /// Base64-encoded little-endian 16-bit PCM chunk.
    Audio(String),
    EndOfAudio,
}

#[derive(Serialize)]
struct ConfigEnvelope<'a> {
    config: &'a StreamingConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EndOfAudioMarker {
    end_of_audio: bool,
}

impl ClientFrame {
    pub fn into_message(self) -> String {
        match self {
            ClientFrame::Config(config) => {
                serde_json::to_string(&ConfigEnvelope { config: &config })
                    .unwrap_or_else(|_| "{}".into())
            }
            ClientFrame::Audio(chunk) => chunk,
            ClientFrame::EndOfAudio => {
                serde_json::to_string(&EndOfAudioMarker { end_of_audio: true })
                    .unwrap_or_else(|_| "{}".into())
            }
        }
    }
}

/// Service-to-caller frame.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ServerFrame {
    Final { transcript: String },
    Partial { partial: String },
}

pub fn parse_server_frame(text: &str) -> Result<ServerFrame, TransportError> {
    serde_json::from_str(text)
        .map_err(|e| TransportError::Protocol(format!("unrecognized frame {text:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_frame_shape() {
        let frame = ClientFrame::Config(StreamingConfig {
            encoding: "LINEAR16".into(),
            sample_rate_hertz: 16000,
            language_code: "en-US".into(),
            speech_contexts: Some(vec![SpeechContext {
                phrases: vec!["utterance".into()],
            }]),
        });
        let value: serde_json::Value = serde_json::from_str(&frame.into_message()).unwrap();
        assert_eq!(value["config"]["encoding"], "LINEAR16");
        assert_eq!(value["config"]["sampleRateHertz"], 16000);
        assert_eq!(value["config"]["languageCode"], "en-US");
        assert_eq!(value["config"]["speechContexts"][0]["phrases"][0], "utterance");
    }

    #[test]
    fn test_config_omits_empty_contexts() {
        let frame = ClientFrame::Config(StreamingConfig {
            encoding: "LINEAR16".into(),
            sample_rate_hertz: 16000,
            language_code: "en-US".into(),
            speech_contexts: None,
        });
        let value: serde_json::Value = serde_json::from_str(&frame.into_message()).unwrap();
        assert!(value["config"].get("speechContexts").is_none());
    }

    #[test]
    fn test_end_of_audio_marker() {
        let value: serde_json::Value =
            serde_json::from_str(&ClientFrame::EndOfAudio.into_message()).unwrap();
        assert_eq!(value, serde_json::json!({"endOfAudio": true}));
    }

    #[test]
    fn test_audio_frame_passes_through() {
        let frame = ClientFrame::Audio("AAAA".into());
        assert_eq!(frame.into_message(), "AAAA");
    }

    #[test]
    fn test_parse_partial_and_final() {
        assert_eq!(
            parse_server_frame(r#"{"partial": "a b"}"#).unwrap(),
            ServerFrame::Partial {
                partial: "a b".into()
            }
        );
        assert_eq!(
            parse_server_frame(r#"{"transcript": "a b c"}"#).unwrap(),
            ServerFrame::Final {
                transcript: "a b c".into()
            }
        );
    }

    #[test]
    fn test_unknown_frame_is_protocol_error() {
        assert!(parse_server_frame(r#"{"status": "ok"}"#).is_err());
    }
}
