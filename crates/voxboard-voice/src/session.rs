//! Session orchestration: wires capture, transport, playback, tool-call
//! accumulation, and diagram rendering into one press-to-talk lifecycle.

use crate::audio::{AudioConfig, AudioLevel, CaptureHandle, CaptureSource, MicCapture};
use crate::codec;
use crate::connection::{
    ConnectionManager, ConnectionState, HttpCredentialProvider, WsTransport,
};
use crate::diagram::DiagramRenderer;
use crate::error::{VoiceError, VoiceResult};
use crate::playback::{AudioPlayer, RodioSink};
use crate::protocol::{ClientEvent, ServerEvent, SessionConfig};
use crate::toolcall::{AccumulatorConfig, ToolCallAccumulator, ToolCallCompletion};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const DEFAULT_CREDENTIAL_URL: &str = "http://localhost:3000/api/realtime/session";
const DEFAULT_ENDPOINT: &str =
    "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-12-17";

const DEFAULT_INSTRUCTIONS: &str = "You are a software architecture assistant. \
When the user describes a system, call generate_diagram with nodes and edges \
that capture it. Keep labels short. Answer briefly in speech; put detail in \
the diagram.";

/// Session-level configuration
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// System instructions pushed in `session.update`
    pub instructions: String,

    /// Credential broker URL (GET returns an ephemeral client secret)
    pub credential_url: String,

    /// WebSocket endpoint of the realtime model
    pub endpoint: String,

    /// Fail tool calls whose buffers do not parse at completion instead of
    /// waiting for more fragments
    pub strict_tool_calls: bool,

    /// Settle time between disconnect and reconnect during a reset
    pub reconnect_delay: Duration,

    pub audio: AudioConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            credential_url: DEFAULT_CREDENTIAL_URL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            strict_tool_calls: false,
            reconnect_delay: Duration::from_millis(500),
            audio: AudioConfig::default(),
        }
    }
}

impl SessionOptions {
    /// Build options from `VOXBOARD_*` environment variables, falling back
    /// to defaults. Call `dotenvy::dotenv()` first to pick up a `.env`.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(url) = std::env::var("VOXBOARD_CREDENTIAL_URL") {
            options.credential_url = url;
        }
        if let Ok(endpoint) = std::env::var("VOXBOARD_REALTIME_ENDPOINT") {
            options.endpoint = endpoint;
        }
        if let Ok(instructions) = std::env::var("VOXBOARD_INSTRUCTIONS") {
            options.instructions = instructions;
        }
        if let Ok(strict) = std::env::var("VOXBOARD_STRICT_TOOL_CALLS") {
            options.strict_tool_calls = matches!(strict.as_str(), "1" | "true" | "yes");
        }
        options
    }
}

/// Point-in-time view of the session for status displays.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub connection: ConnectionState,
    pub capturing: bool,
    pub audio_level: f32,
    pub last_error: Option<String>,
    /// Raw JSON of the most recent inbound envelopes, oldest first.
    pub recent_events: Vec<String>,
}

/// The voice session engine. One instance per user-facing session; all
/// methods take `&self` and are safe to call from any task.
pub struct VoiceSession {
    connection: Arc<ConnectionManager>,
    capture: Arc<dyn CaptureSource>,
    player: Arc<AudioPlayer>,
    accumulator: Arc<ToolCallAccumulator>,
    renderer: Arc<dyn DiagramRenderer>,
    options: SessionOptions,
    capture_handle: Mutex<Option<CaptureHandle>>,
    audio_level: AudioLevel,
    last_error: Arc<Mutex<Option<String>>>,
}

impl VoiceSession {
    /// Wire a session from injected collaborators. Tests pass mocks here;
    /// production uses `with_defaults`.
    pub fn new(
        connection: Arc<ConnectionManager>,
        capture: Arc<dyn CaptureSource>,
        player: Arc<AudioPlayer>,
        renderer: Arc<dyn DiagramRenderer>,
        options: SessionOptions,
    ) -> Arc<Self> {
        let accumulator = Arc::new(ToolCallAccumulator::new(AccumulatorConfig {
            strict: options.strict_tool_calls,
        }));

        let session = Arc::new(Self {
            connection,
            capture,
            player,
            accumulator,
            renderer,
            options,
            capture_handle: Mutex::new(None),
            audio_level: AudioLevel::new(),
            last_error: Arc::new(Mutex::new(None)),
        });

        session.subscribe_routing();
        session
    }

    /// Production wiring: microphone, speakers, HTTP credential broker,
    /// WebSocket transport.
    pub fn with_defaults(
        renderer: Arc<dyn DiagramRenderer>,
        options: SessionOptions,
    ) -> VoiceResult<Arc<Self>> {
        let connection = Arc::new(ConnectionManager::new(
            Arc::new(HttpCredentialProvider::new(options.credential_url.clone())),
            Arc::new(WsTransport::new(options.endpoint.clone())),
        ));
        let sink = Arc::new(RodioSink::new()?);
        let player = Arc::new(AudioPlayer::new(sink, options.audio.sample_rate));
        Ok(Self::new(
            connection,
            Arc::new(MicCapture::new()),
            player,
            renderer,
            options,
        ))
    }

    fn subscribe_routing(self: &Arc<Self>) {
        let player = Arc::clone(&self.player);
        let accumulator = Arc::clone(&self.accumulator);
        let renderer = Arc::clone(&self.renderer);
        let last_error = Arc::clone(&self.last_error);

        self.connection.subscribe(Arc::new(move |event| {
            route_event(event, &player, &accumulator, &renderer, &last_error)
        }));
    }

    /// Begin a turn. Connects on first use; on an already-open session this
    /// is an interruption: queued playback is discarded and the in-flight
    /// response is cancelled before the microphone opens.
    pub async fn start_voice_session(&self) -> VoiceResult<()> {
        match self.connection.state() {
            ConnectionState::Open => {
                info!("Interrupting in-flight response");
                self.player.stop();
                self.connection.send(&ClientEvent::ResponseCancel {})?;
            }
            _ => {
                self.connection
                    .connect(&SessionConfig::for_diagram(&self.options.instructions))
                    .await?;
            }
        }

        let mut guard = self
            .capture_handle
            .lock()
            .map_err(|_| VoiceError::Capture("capture handle lock poisoned".to_string()))?;
        if guard.is_some() {
            debug!("Capture already running");
            return Ok(());
        }

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
        let handle = match self
            .capture
            .start(&self.options.audio, chunk_tx, self.audio_level.clone())
        {
            Ok(h) => h,
            Err(e) => {
                if let Ok(mut slot) = self.last_error.lock() {
                    *slot = Some(e.to_string());
                }
                return Err(e);
            }
        };
        *guard = Some(handle);
        drop(guard);

        let connection = Arc::clone(&self.connection);
        tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                let audio = codec::encode_base64(&chunk.samples);
                if let Err(e) = connection.send(&ClientEvent::InputAudioBufferAppend { audio }) {
                    warn!("Failed to forward captured audio: {}", e);
                    break;
                }
            }
            debug!("Capture forwarding stopped");
        });

        info!("Voice turn started");
        Ok(())
    }

    /// End the user's turn: release the microphone. The connection stays
    /// open and the model's response continues to stream.
    pub fn stop_voice_session(&self) {
        if let Ok(mut guard) = self.capture_handle.lock() {
            if let Some(mut handle) = guard.take() {
                handle.stop();
                info!("Voice turn ended");
            }
        }
        self.audio_level.reset();
    }

    /// Full teardown in dependency order: microphone, then transport, then
    /// playback and buffered state.
    pub fn disconnect(&self) {
        self.stop_voice_session();
        self.connection.disconnect();
        self.player.cleanup();
        self.accumulator.clear();
    }

    /// Tear the session down, wipe rendered state, and reconnect fresh.
    pub async fn reset_session(&self) -> VoiceResult<()> {
        info!("Resetting session");
        self.renderer.clear();
        self.disconnect();
        tokio::time::sleep(self.options.reconnect_delay).await;
        self.connection
            .connect(&SessionConfig::for_diagram(&self.options.instructions))
            .await
    }

    /// Aggregated status snapshot. Pure projection; no side effects.
    pub fn status(&self) -> SessionStatus {
        let capturing = self
            .capture_handle
            .lock()
            .map(|g| g.is_some())
            .unwrap_or(false);
        let last_error = self
            .last_error
            .lock()
            .ok()
            .and_then(|g| g.clone())
            .or_else(|| self.player.last_error())
            .or_else(|| self.connection.last_error());
        SessionStatus {
            connection: self.connection.state(),
            capturing,
            audio_level: self.audio_level.get(),
            last_error,
            recent_events: self.connection.recent_events(),
        }
    }
}

fn route_event(
    event: &ServerEvent,
    player: &AudioPlayer,
    accumulator: &ToolCallAccumulator,
    renderer: &Arc<dyn DiagramRenderer>,
    last_error: &Arc<Mutex<Option<String>>>,
) {
    match event {
        ServerEvent::AudioDelta { delta } => {
            if let Err(e) = player.enqueue(delta) {
                warn!("Dropping undecodable audio chunk: {}", e);
                if let Ok(mut guard) = last_error.lock() {
                    *guard = Some(e.to_string());
                }
            }
        }
        ServerEvent::FunctionCallArgumentsDelta {
            call_id,
            name,
            delta,
        } => {
            accumulator.on_fragment(call_id, name.as_deref(), delta);
        }
        ServerEvent::FunctionCallArgumentsDone {
            call_id,
            name,
            arguments,
        } => match accumulator.on_done(call_id, name, arguments.as_deref()) {
            Ok(ToolCallCompletion::Ready(args)) => {
                info!(
                    "Rendering diagram: {} nodes, {} edges",
                    args.diagram_data.nodes.len(),
                    args.diagram_data.edges.len()
                );
                let explanation = args
                    .explanation
                    .as_deref()
                    .or(args.diagram_data.explanation.as_deref());
                renderer.render(&args.diagram_data, explanation);
            }
            Ok(ToolCallCompletion::Incomplete) => {}
            Err(e) => {
                warn!("Tool call {} rejected: {}", call_id, e);
                if let Ok(mut guard) = last_error.lock() {
                    *guard = Some(e.to_string());
                }
            }
        },
        ServerEvent::AudioTranscriptDelta { delta } => {
            debug!("Assistant transcript delta: {}", delta);
        }
        ServerEvent::InputAudioTranscriptionCompleted { transcript } => {
            debug!("User said: {}", transcript);
        }
        ServerEvent::Error { error } => {
            if let Ok(mut guard) = last_error.lock() {
                *guard = Some(error.message.clone());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_to_lenient_tool_calls() {
        let options = SessionOptions::default();
        assert!(!options.strict_tool_calls);
        assert_eq!(options.reconnect_delay, Duration::from_millis(500));
        assert_eq!(options.audio.sample_rate, 24_000);
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("VOXBOARD_CREDENTIAL_URL", "http://broker.test/session");
        std::env::set_var("VOXBOARD_STRICT_TOOL_CALLS", "true");
        let options = SessionOptions::from_env();
        std::env::remove_var("VOXBOARD_CREDENTIAL_URL");
        std::env::remove_var("VOXBOARD_STRICT_TOOL_CALLS");

        assert_eq!(options.credential_url, "http://broker.test/session");
        assert!(options.strict_tool_calls);
    }
}
