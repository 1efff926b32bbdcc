use crate::cli::CallArgs;
use crate::config;
use anyhow::Result;
use aria_voice::device::CpalBackend;
use aria_voice::{CallController, CallPhase, CallSnapshot, WebSocketConnector};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Mute,
    Status,
    Help,
    HangUp,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "m" | "mute" | "unmute" => Some(Self::Mute),
            "s" | "status" => Some(Self::Status),
            "h" | "help" | "?" => Some(Self::Help),
            "q" | "quit" | "hangup" | "bye" => Some(Self::HangUp),
            _ => None,
        }
    }
}

/// Run one live call in the terminal until the user hangs up or the call ends.
pub async fn run_call(args: CallArgs) -> Result<()> {
    let config = config::resolve(&args)?;

    let mut backend = CpalBackend::new();
    if let Some(name) = &args.input_device {
        backend = backend.with_input_device(name.clone());
    }
    if let Some(name) = &args.output_device {
        backend = backend.with_output_device(name.clone());
    }

    let agent_id = config.endpoint.agent_id.clone();
    let controller =
        CallController::new(config, Arc::new(backend), Arc::new(WebSocketConnector::new()));

    println!("ARIA voice call");
    println!("Agent: {}", agent_id);
    println!("Commands: m = mute/unmute, s = status, q = hang up. Ctrl+C also hangs up.\n");

    if args.muted {
        controller.open_muted().await;
    } else {
        controller.open().await;
    }

    let Some(mut updates) = controller.subscribe() else {
        return Ok(());
    };

    let (commands_tx, mut commands) = mpsc::unbounded_channel();
    // rustyline blocks; a plain thread keeps runtime shutdown from waiting on stdin.
    std::thread::Builder::new().name("aria-console".into()).spawn(move || read_commands(commands_tx))?;

    let mut last = updates.borrow_and_update().clone();
    render(None, &last);

    while last.phase != CallPhase::Ended {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                render(Some(&last), &snapshot);
                last = snapshot;
            }
            command = commands.recv() => match command {
                Some(Command::Mute) => {
                    let muted = controller.toggle_mute();
                    tracing::debug!(muted, "mute toggled from console");
                }
                Some(Command::Status) => print_status(&controller.snapshot()),
                Some(Command::Help) => print_help(),
                Some(Command::HangUp) | None => controller.close().await,
            }
        }
    }

    controller.close().await;
    if let Some(error) = controller.snapshot().error {
        anyhow::bail!("call ended: {}", error.message);
    }
    println!("\nCall ended.");
    Ok(())
}

fn read_commands(commands: mpsc::UnboundedSender<Command>) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            tracing::warn!(error = %e, "console input unavailable");
            return;
        }
    };

    loop {
        let command = match rl.readline("") {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => match Command::parse(&line) {
                Some(command) => command,
                None => {
                    println!("Unknown command '{}'. Type h for help.", line.trim());
                    continue;
                }
            },
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Command::HangUp,
            Err(e) => {
                tracing::warn!(error = %e, "console read failed");
                Command::HangUp
            }
        };

        if commands.send(command).is_err() || command == Command::HangUp {
            break;
        }
    }
}

fn render(previous: Option<&CallSnapshot>, snapshot: &CallSnapshot) {
    if previous.is_none_or(|p| p.phase != snapshot.phase) {
        println!("[{}]", phase_label(snapshot.phase));
    }
    if previous.is_some_and(|p| p.muted != snapshot.muted) {
        println!("{}", if snapshot.muted { "Microphone muted" } else { "Microphone live" });
    }
    if previous.is_none_or(|p| p.conversation_id != snapshot.conversation_id) {
        if let Some(id) = &snapshot.conversation_id {
            println!("Conversation: {}", id);
        }
    }
}

fn print_status(snapshot: &CallSnapshot) {
    println!(
        "phase={} connection={:?} muted={} agent_speaking={}",
        phase_label(snapshot.phase),
        snapshot.connection,
        snapshot.muted,
        snapshot.agent_speaking
    );
}

fn print_help() {
    println!("  m   toggle mute");
    println!("  s   show call status");
    println!("  q   hang up");
}

fn phase_label(phase: CallPhase) -> &'static str {
    match phase {
        CallPhase::Idle => "idle",
        CallPhase::Connecting => "connecting",
        CallPhase::Listening => "listening",
        CallPhase::Speaking => "agent speaking",
        CallPhase::Ended => "ended",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse(" M "), Some(Command::Mute));
        assert_eq!(Command::parse("status"), Some(Command::Status));
        assert_eq!(Command::parse("q"), Some(Command::HangUp));
        assert_eq!(Command::parse("?"), Some(Command::Help));
        assert_eq!(Command::parse("dance"), None);
    }
}
