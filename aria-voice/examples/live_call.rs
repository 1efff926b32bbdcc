//! Live call against a real agent using the default microphone and speaker.
//!
//! ```bash
//! ARIA_AGENT_ID=agent_xxx cargo run -p aria-voice --example live_call --features desktop-audio
//! ```
//!
//! Press Ctrl+C to hang up.

use aria_voice::device::CpalBackend;
use aria_voice::{CallController, CallPhase, VoiceConfig, WebSocketConnector};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = VoiceConfig::from_env()?;
    println!("Calling agent {}", config.endpoint.agent_id);

    let controller = CallController::new(
        config,
        Arc::new(CpalBackend::new()),
        Arc::new(WebSocketConnector::new()),
    );
    controller.open().await;

    let Some(mut updates) = controller.subscribe() else {
        return Ok(());
    };

    loop {
        let snapshot = updates.borrow_and_update().clone();
        println!(
            "phase={:?} connection={:?} speaking={} conversation={}",
            snapshot.phase,
            snapshot.connection,
            snapshot.agent_speaking,
            snapshot.conversation_id.as_deref().unwrap_or("-")
        );
        if snapshot.phase == CallPhase::Ended {
            if let Some(error) = snapshot.error {
                eprintln!("Call failed: {}", error.message);
            }
            break;
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Hanging up");
                controller.close().await;
            }
        }
    }

    controller.close().await;
    Ok(())
}
