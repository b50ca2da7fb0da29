//! Wire protocol envelopes for the realtime streaming endpoint.
//!
//! Every frame is a JSON object discriminated by a dotted `type` field.
//! Client frames are a small fixed set; server frames are an open set, so
//! anything we do not model deserializes to `ServerEvent::Unknown` and is
//! skipped by the dispatcher.

use crate::diagram::generate_diagram_tool;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames sent to the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Configure the session (instructions, audio formats, tools).
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// Append one base64 PCM16 chunk to the input buffer.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    /// Cancel the in-flight response (interruption).
    #[serde(rename = "response.cancel")]
    ResponseCancel {},
}

/// Frames received from the endpoint. Unmodeled types map to `Unknown`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// One base64 PCM16 chunk of synthesized speech.
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    /// One fragment of streamed function-call arguments.
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        call_id: String,
        #[serde(default)]
        name: Option<String>,
        delta: String,
    },

    /// Function-call arguments are complete for this call id.
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: Option<String>,
    },

    /// Incremental transcript of the synthesized speech.
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { delta: String },

    /// Final transcript of the user's speech for one turn.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },

    /// Error envelope from the endpoint. The session stays open.
    #[serde(rename = "error")]
    Error { error: ErrorBody },

    #[serde(rename = "session.created")]
    SessionCreated {},

    #[serde(rename = "session.updated")]
    SessionUpdated {},

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
}

/// Session parameters pushed in `session.update` right after connecting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub turn_detection: TurnDetection,
    pub tools: Vec<Value>,
    pub tool_choice: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
}

impl SessionConfig {
    /// Voice + text session with server-side turn detection and the
    /// diagram tool advertised.
    pub fn for_diagram(instructions: impl Into<String>) -> Self {
        Self {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: instructions.into(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            turn_detection: TurnDetection {
                kind: "server_vad".to_string(),
            },
            tools: vec![generate_diagram_tool()],
            tool_choice: "auto".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_serialize_with_dotted_types() {
        let append = ClientEvent::InputAudioBufferAppend {
            audio: "AAAA".to_string(),
        };
        let json: Value = serde_json::to_value(&append).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        assert_eq!(json["audio"], "AAAA");

        let cancel = serde_json::to_value(ClientEvent::ResponseCancel {}).unwrap();
        assert_eq!(cancel["type"], "response.cancel");
    }

    #[test]
    fn session_update_carries_tool_definition() {
        let event = ClientEvent::SessionUpdate {
            session: SessionConfig::for_diagram("Draw what I say."),
        };
        let json: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["input_audio_format"], "pcm16");
        assert_eq!(json["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(json["session"]["tools"][0]["name"], "generate_diagram");
        assert_eq!(json["session"]["tool_choice"], "auto");
    }

    #[test]
    fn audio_delta_parses() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"response.audio.delta","delta":"UE9O"}"#).unwrap();
        assert!(matches!(event, ServerEvent::AudioDelta { delta } if delta == "UE9O"));
    }

    #[test]
    fn function_call_fragments_parse_without_name() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"response.function_call_arguments.delta","call_id":"c1","delta":"{\"dia"}"#,
        )
        .unwrap();
        match event {
            ServerEvent::FunctionCallArgumentsDelta {
                call_id,
                name,
                delta,
            } => {
                assert_eq!(call_id, "c1");
                assert!(name.is_none());
                assert_eq!(delta, "{\"dia");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn done_event_parses_with_full_arguments() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"response.function_call_arguments.done","call_id":"c1","name":"generate_diagram","arguments":"{}"}"#,
        )
        .unwrap();
        match event {
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => {
                assert_eq!(call_id, "c1");
                assert_eq!(name, "generate_diagram");
                assert_eq!(arguments.as_deref(), Some("{}"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn error_envelope_parses() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"error","error":{"message":"rate limited","code":"rate_limit"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::Error { error } => assert_eq!(error.message, "rate limited"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn lifecycle_events_tolerate_extra_fields() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"session.created","session":{"id":"sess_1","model":"x"}}"#,
        )
        .unwrap();
        assert!(matches!(event, ServerEvent::SessionCreated {}));
    }

    #[test]
    fn unmodeled_types_map_to_unknown() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
    }
}
