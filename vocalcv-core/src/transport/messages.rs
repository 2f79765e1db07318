//! JSON wire format of the bidirectional live API.
//!
//! | direction | message |
//! |-----------|---------|
//! | client → server | `{"setup": {...}}` once, then `{"realtimeInput": {"mediaChunks": [...]}}` |
//! | server → client | `{"setupComplete": {}}`, then `{"serverContent": {...}}` |

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::SessionSetup;
use crate::{buffering::frame::EncodedChunk, session::events::SessionEvent};

// ---------------------------------------------------------------------------
// Client messages
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

// ---------------------------------------------------------------------------
// Shared pieces
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Base64 payload with its MIME type.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

// ---------------------------------------------------------------------------
// Server messages
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    pub interrupted: bool,
    pub turn_complete: bool,
}

impl From<&SessionSetup> for SetupMessage {
    fn from(setup: &SessionSetup) -> Self {
        SetupMessage {
            setup: Setup {
                model: setup.model.clone(),
                generation_config: GenerationConfig {
                    response_modalities: vec![setup.response_modality.as_wire().to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: setup.voice_name.clone(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![Part {
                        text: Some(setup.system_instruction.clone()),
                        inline_data: None,
                    }],
                },
            },
        }
    }
}

pub fn setup_json(setup: &SessionSetup) -> serde_json::Result<String> {
    serde_json::to_string(&SetupMessage::from(setup))
}

pub fn realtime_input_json(chunk: &EncodedChunk) -> serde_json::Result<String> {
    serde_json::to_string(&RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: chunk.mime_type.clone(),
                data: BASE64.encode(&chunk.data),
            }],
        },
    })
}

/// Translate one server frame into session events, in the order they apply:
/// acknowledgment, speech parts, interruption, end of turn.
///
/// # Errors
/// Returns the JSON error for frames that are not a server message at all.
pub fn parse_server_message(raw: &str) -> serde_json::Result<Vec<SessionEvent>> {
    let msg: ServerMessage = serde_json::from_str(raw)?;
    let mut events = Vec::new();

    if msg.setup_complete.is_some() {
        events.push(SessionEvent::TransportOpened);
    }

    if let Some(content) = msg.server_content {
        let parts = content.model_turn.map(|t| t.parts).unwrap_or_default();
        for blob in parts.into_iter().filter_map(|p| p.inline_data) {
            if !blob.mime_type.is_empty() && !blob.mime_type.starts_with("audio/pcm") {
                continue;
            }
            match BASE64.decode(blob.data.as_bytes()) {
                Ok(bytes) => events.push(SessionEvent::SpeechChunk(bytes)),
                Err(e) => warn!("dropping speech part with invalid base64: {e}"),
            }
        }
        if content.interrupted {
            events.push(SessionEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(SessionEvent::TurnComplete);
        }
    }

    if msg.go_away.is_some() {
        warn!("voice service announced it will close the stream soon");
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_message_carries_modality_voice_and_instruction() {
        let setup = SessionSetup::new("Answer from the resume.").with_voice("Puck");
        let json: serde_json::Value = serde_json::from_str(&setup_json(&setup).unwrap()).unwrap();

        let s = &json["setup"];
        assert_eq!(s["model"], "models/gemini-2.0-flash-exp");
        assert_eq!(s["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            s["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
        assert_eq!(s["systemInstruction"]["parts"][0]["text"], "Answer from the resume.");
        assert!(s["systemInstruction"]["parts"][0].get("inlineData").is_none());
    }

    #[test]
    fn realtime_input_is_base64_pcm() {
        let chunk = EncodedChunk {
            data: vec![0x01, 0x02, 0x03, 0x04],
            mime_type: "audio/pcm;rate=16000".into(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&realtime_input_json(&chunk).unwrap()).unwrap();
        let blob = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(blob["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(blob["data"], "AQIDBA==");
    }

    #[test]
    fn setup_complete_becomes_transport_opened() {
        let events = parse_server_message(r#"{"setupComplete":{}}"#).unwrap();
        assert_eq!(events, vec![SessionEvent::TransportOpened]);
    }

    #[test]
    fn speech_then_interruption_keep_order() {
        let raw = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAD/fw=="}},
            {"text":"ignored"}
        ]},"interrupted":true,"turnComplete":true}}"#;
        let events = parse_server_message(raw).unwrap();
        assert_eq!(
            events,
            vec![
                SessionEvent::SpeechChunk(vec![0x00, 0x00, 0xFF, 0x7F]),
                SessionEvent::Interrupted,
                SessionEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn invalid_base64_part_is_skipped() {
        let raw = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm","data":"%%%"}}]}}}"#;
        assert!(parse_server_message(raw).unwrap().is_empty());
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let events = parse_server_message(r#"{"usageMetadata":{"totalTokenCount":12}}"#).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn non_json_is_an_error() {
        assert!(parse_server_message("not json").is_err());
    }
}
