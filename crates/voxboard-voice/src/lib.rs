//! # Voxboard Voice - Realtime Voice-to-Diagram Sessions
//!
//! This crate implements the voice session engine behind Voxboard's
//! voice-driven diagramming: press-to-talk microphone capture, a realtime
//! WebSocket session with a speech model, ordered audio playback, and
//! streamed tool-call accumulation that turns spoken descriptions into
//! validated diagrams.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Voice Session                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │   Mic In     │→ │ PCM16/base64 │→ │  Connection  │ ⇄ ws  │
//! │  │   (cpal)     │  │    codec     │  │   Manager    │       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! │         ↓                                     ↓              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │  Audio Out   │← │ Ordered play │  │  Tool call   │       │
//! │  │   (rodio)    │  │    queue     │  │ accumulator  │       │
//! │  └──────────────┘  └──────────────┘  └──────┬───────┘       │
//! │                                             ↓               │
//! │                                      ┌──────────────┐       │
//! │                                      │   Diagram    │       │
//! │                                      │   renderer   │       │
//! │                                      └──────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod connection;
pub mod diagram;
pub mod error;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod toolcall;

pub use audio::{AudioChunk, AudioConfig, AudioLevel, CaptureHandle, CaptureSource, MicCapture};
pub use codec::{decode_base64, decode_pcm16, encode_base64, encode_pcm16};
pub use connection::{
    ConnectionManager, ConnectionState, CredentialProvider, EphemeralCredential,
    HttpCredentialProvider, RealtimeTransport, TransportPipe, WsTransport,
};
pub use diagram::{
    generate_diagram_tool, DiagramData, DiagramEdge, DiagramNode, DiagramRenderer,
    GenerateDiagramArgs, NodeKind,
};
pub use error::{VoiceError, VoiceResult};
pub use playback::{AudioPlayer, PlaybackEvent, PlaybackSink, RodioSink};
pub use protocol::{ClientEvent, ServerEvent, SessionConfig, TurnDetection};
pub use session::{SessionOptions, SessionStatus, VoiceSession};
pub use toolcall::{AccumulatorConfig, ToolCallAccumulator, ToolCallCompletion};
