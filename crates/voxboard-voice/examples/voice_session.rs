//! Minimal interactive session: talk, watch diagrams land on stdout.
//!
//! Requires a credential broker (VOXBOARD_CREDENTIAL_URL) and working audio
//! devices. Press Enter to start a turn, Enter again to end it, `q` to quit.

use std::sync::Arc;
use voxboard_voice::{DiagramData, DiagramRenderer, SessionOptions, VoiceSession};

struct StdoutRenderer;

impl DiagramRenderer for StdoutRenderer {
    fn render(&self, data: &DiagramData, explanation: Option<&str>) {
        println!("--- diagram ---");
        for node in &data.nodes {
            println!("  [{}] {} ({:?})", node.id, node.label, node.kind);
        }
        for edge in &data.edges {
            println!(
                "  {} -> {} {}",
                edge.source,
                edge.target,
                edge.label.as_deref().unwrap_or("")
            );
        }
        if let Some(text) = explanation {
            println!("  {}", text);
        }
    }

    fn clear(&self) {
        println!("--- cleared ---");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxboard_voice=info".into()),
        )
        .init();

    let session = VoiceSession::with_defaults(
        Arc::new(StdoutRenderer),
        SessionOptions::from_env(),
    )?;

    let stdin = std::io::stdin();
    let mut talking = false;
    let mut line = String::new();
    println!("Enter = toggle talking, q = quit");

    loop {
        line.clear();
        stdin.read_line(&mut line)?;
        if line.trim() == "q" {
            break;
        }
        if talking {
            session.stop_voice_session();
            talking = false;
            println!("(listening for the response)");
        } else {
            session.start_voice_session().await?;
            talking = true;
            println!("(talking, level meter: {:.2})", session.status().audio_level);
        }
    }

    session.disconnect();
    Ok(())
}
