//! JSON wire messages exchanged over the call socket.
//!
//! Outbound frames are adjacently tagged: `{"type": "...", "data": {...}}`.
//! Inbound frames mix top-level fields and a `data` object depending on the
//! event, so [`ServerMessage::parse`] reads the `type` first and then
//! deserializes the matching wire shape.  Unknown types and frames missing
//! required fields come back as [`ProtocolError`] for the caller to log and
//! drop.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ProtocolError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has no string `type` field")]
    MissingType,

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("invalid '{kind}' message: {source}")]
    Invalid {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// CallPhase
// ---------------------------------------------------------------------------

/// Conversation phase as reported by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallPhase {
    #[default]
    Idle,
    Listening,
    Thinking,
    Speaking,
    Interrupted,
}

impl CallPhase {
    pub fn label(self) -> &'static str {
        match self {
            CallPhase::Idle => "idle",
            CallPhase::Listening => "listening",
            CallPhase::Thinking => "thinking",
            CallPhase::Speaking => "speaking",
            CallPhase::Interrupted => "interrupted",
        }
    }
}

// ---------------------------------------------------------------------------
// ClientMessage
// ---------------------------------------------------------------------------

/// Client → peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "client.hello")]
    Hello,

    /// 20 ms of 16 kHz mono PCM16, base64 encoded.
    #[serde(rename = "input.audio_chunk")]
    AudioChunk { chunk: String },

    #[serde(rename = "input.text")]
    Text { text: String },

    #[serde(rename = "control.interrupt")]
    Interrupt,
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// ServerMessage
// ---------------------------------------------------------------------------

/// Playback tunables advised by the peer; each is optional and unclamped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct PlaybackAdvisory {
    #[serde(default)]
    pub startup_buffer_ms: Option<f64>,
    #[serde(default)]
    pub startup_max_wait_ms: Option<f64>,
    #[serde(default)]
    pub schedule_lead_ms: Option<f64>,
}

/// Peer → client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Hello {
        session_id: String,
    },
    Config {
        playback: PlaybackAdvisory,
    },
    StateUpdate {
        state: CallPhase,
    },
    AvatarState {
        emotion: String,
        source: Option<String>,
        turn_id: Option<String>,
    },
    TextUpdate {
        text: String,
        is_final: bool,
    },
    /// One complete synthesized payload.
    TtsAudio {
        seq: Option<u64>,
        text: Option<String>,
        audio: String,
        is_final: bool,
    },
    /// One piece of a streamed utterance; several may share a `seq`.
    TtsAudioChunk {
        seq: Option<u64>,
        is_final: bool,
        chunk: String,
        sample_rate: Option<u32>,
    },
    TtsTextStream {
        seq: Option<u64>,
        text: String,
    },
    Error {
        message: String,
    },
}

#[derive(Deserialize)]
struct HelloWire {
    session_id: String,
}

#[derive(Deserialize)]
struct ConfigWire {
    #[serde(default)]
    data: ConfigData,
}

#[derive(Deserialize, Default)]
struct ConfigData {
    #[serde(default)]
    playback: PlaybackAdvisory,
}

#[derive(Deserialize)]
struct StateWire {
    state: CallPhase,
}

#[derive(Deserialize)]
struct AvatarWire {
    emotion: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    turn_id: Option<Value>,
}

#[derive(Deserialize)]
struct TextUpdateWire {
    text: String,
    #[serde(default)]
    is_final: bool,
}

#[derive(Deserialize)]
struct TtsAudioWire {
    #[serde(default)]
    seq: Option<u64>,
    #[serde(default)]
    text: Option<String>,
    audio: String,
    /// A standalone payload is complete unless told otherwise.
    #[serde(default = "default_true")]
    is_final: bool,
}

#[derive(Deserialize)]
struct TtsChunkWire {
    #[serde(default)]
    seq: Option<u64>,
    #[serde(default)]
    is_final: bool,
    data: TtsChunkData,
}

#[derive(Deserialize)]
struct TtsChunkData {
    chunk: String,
    #[serde(default)]
    sample_rate: Option<u32>,
}

#[derive(Deserialize)]
struct TextStreamWire {
    #[serde(default)]
    seq: Option<u64>,
    data: TextStreamData,
}

#[derive(Deserialize)]
struct TextStreamData {
    text: String,
    #[serde(default)]
    seq: Option<u64>,
}

#[derive(Deserialize)]
struct ErrorWire {
    #[serde(default)]
    message: String,
}

fn default_true() -> bool {
    true
}

/// Turn ids arrive as numbers or strings; keep them as text.
fn turn_id_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl ServerMessage {
    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_owned();

        fn wire<T: for<'de> Deserialize<'de>>(kind: &str, value: Value) -> Result<T, ProtocolError> {
            serde_json::from_value(value).map_err(|source| ProtocolError::Invalid {
                kind: kind.to_owned(),
                source,
            })
        }

        let message = match kind.as_str() {
            "server.hello" => {
                let w: HelloWire = wire(&kind, value)?;
                ServerMessage::Hello {
                    session_id: w.session_id,
                }
            }
            "client.config" => {
                let w: ConfigWire = wire(&kind, value)?;
                ServerMessage::Config {
                    playback: w.data.playback,
                }
            }
            "state.update" => {
                let w: StateWire = wire(&kind, value)?;
                ServerMessage::StateUpdate { state: w.state }
            }
            "avatar.state" => {
                let w: AvatarWire = wire(&kind, value)?;
                ServerMessage::AvatarState {
                    emotion: w.emotion,
                    source: w.source,
                    turn_id: turn_id_text(w.turn_id),
                }
            }
            "input.text_update" => {
                let w: TextUpdateWire = wire(&kind, value)?;
                ServerMessage::TextUpdate {
                    text: w.text,
                    is_final: w.is_final,
                }
            }
            "tts.audio" => {
                let w: TtsAudioWire = wire(&kind, value)?;
                ServerMessage::TtsAudio {
                    seq: w.seq,
                    text: w.text,
                    audio: w.audio,
                    is_final: w.is_final,
                }
            }
            "tts.audio_chunk" => {
                let w: TtsChunkWire = wire(&kind, value)?;
                ServerMessage::TtsAudioChunk {
                    seq: w.seq,
                    is_final: w.is_final,
                    chunk: w.data.chunk,
                    sample_rate: w.data.sample_rate,
                }
            }
            "tts.text_stream" => {
                let w: TextStreamWire = wire(&kind, value)?;
                ServerMessage::TtsTextStream {
                    seq: w.seq.or(w.data.seq),
                    text: w.data.text,
                }
            }
            "error" => {
                let w: ErrorWire = wire(&kind, value)?;
                ServerMessage::Error { message: w.message }
            }
            _ => return Err(ProtocolError::UnknownType(kind)),
        };
        Ok(message)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_frames_match_wire_shape() {
        assert_eq!(ClientMessage::Hello.to_json().unwrap(), r#"{"type":"client.hello"}"#);
        assert_eq!(
            ClientMessage::Interrupt.to_json().unwrap(),
            r#"{"type":"control.interrupt"}"#
        );

        let text: Value =
            serde_json::from_str(&ClientMessage::Text { text: "hi".into() }.to_json().unwrap()).unwrap();
        assert_eq!(text["type"], "input.text");
        assert_eq!(text["data"]["text"], "hi");

        let audio: Value = serde_json::from_str(
            &ClientMessage::AudioChunk { chunk: "AAA=".into() }.to_json().unwrap(),
        )
        .unwrap();
        assert_eq!(audio["type"], "input.audio_chunk");
        assert_eq!(audio["data"]["chunk"], "AAA=");
    }

    #[test]
    fn parses_handshake_and_config() {
        assert_eq!(
            ServerMessage::parse(r#"{"type":"server.hello","session_id":"abc"}"#).unwrap(),
            ServerMessage::Hello {
                session_id: "abc".into()
            }
        );

        let msg = ServerMessage::parse(
            r#"{"type":"client.config","data":{"playback":{"startup_buffer_ms":200,"schedule_lead_ms":40.5}}}"#,
        )
        .unwrap();
        let ServerMessage::Config { playback } = msg else {
            panic!("expected config, got {msg:?}");
        };
        assert_eq!(playback.startup_buffer_ms, Some(200.0));
        assert_eq!(playback.startup_max_wait_ms, None);
        assert_eq!(playback.schedule_lead_ms, Some(40.5));
    }

    #[test]
    fn parses_audio_variants() {
        let chunk = ServerMessage::parse(
            r#"{"type":"tts.audio_chunk","seq":3,"is_final":true,"data":{"chunk":"UklG","sample_rate":24000}}"#,
        )
        .unwrap();
        assert_eq!(
            chunk,
            ServerMessage::TtsAudioChunk {
                seq: Some(3),
                is_final: true,
                chunk: "UklG".into(),
                sample_rate: Some(24_000),
            }
        );

        let full = ServerMessage::parse(r#"{"type":"tts.audio","text":"hello","audio":"UklG"}"#).unwrap();
        assert_eq!(
            full,
            ServerMessage::TtsAudio {
                seq: None,
                text: Some("hello".into()),
                audio: "UklG".into(),
                is_final: true,
            }
        );
    }

    #[test]
    fn text_stream_seq_may_live_in_data() {
        let msg = ServerMessage::parse(r#"{"type":"tts.text_stream","data":{"seq":7,"text":"hey"}}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::TtsTextStream {
                seq: Some(7),
                text: "hey".into()
            }
        );
    }

    #[test]
    fn avatar_turn_id_accepts_numbers() {
        let msg = ServerMessage::parse(
            r#"{"type":"avatar.state","emotion":"happy","source":"llm","turn_id":12}"#,
        )
        .unwrap();
        let ServerMessage::AvatarState { turn_id, .. } = msg else {
            panic!("expected avatar state");
        };
        assert_eq!(turn_id.as_deref(), Some("12"));
    }

    #[test]
    fn bad_frames_are_errors_not_panics() {
        assert!(matches!(
            ServerMessage::parse("not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            ServerMessage::parse(r#"{"session_id":"x"}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(
            ServerMessage::parse(r#"{"type":"server.bogus"}"#),
            Err(ProtocolError::UnknownType(t)) if t == "server.bogus"
        ));
        assert!(matches!(
            ServerMessage::parse(r#"{"type":"tts.audio_chunk","seq":1}"#),
            Err(ProtocolError::Invalid { .. })
        ));
        assert!(matches!(
            ServerMessage::parse(r#"{"type":"state.update","state":"dancing"}"#),
            Err(ProtocolError::Invalid { .. })
        ));
    }
}
