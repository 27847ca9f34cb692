//! Command source: Ctrl-C and line commands on stdin.
//!
//! | input | effect |
//! |---|---|
//! | `q`, `quit`, `exit` | end the session |
//! | `i`, `interrupt` | cancel the assistant's current reply |
//! | Ctrl-C | end the session |

use std::io::BufRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    Interrupt,
    Quit,
}

/// Parse one input line. Unknown input yields `None`.
pub fn parse_command(line: &str) -> Option<UserCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "q" | "quit" | "exit" => Some(UserCommand::Quit),
        "i" | "interrupt" => Some(UserCommand::Interrupt),
        _ => None,
    }
}

/// Start listening for commands.
///
/// Ctrl-C cancels `shutdown` directly. Stdin is read on a detached thread,
/// since a blocking read cannot observe cancellation; it ends with the
/// process or when the receiver is dropped.
pub fn spawn_command_source(shutdown: CancellationToken) -> mpsc::Receiver<UserCommand> {
    let (tx, rx) = mpsc::channel(8);

    let signal_stop = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = signal_stop.cancelled() => {}
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    tracing::info!("Interrupt signal received, shutting down");
                    signal_stop.cancel();
                }
                Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl-C"),
            },
        }
    });

    let spawned = std::thread::Builder::new()
        .name("parlar-stdin".into())
        .spawn(move || read_commands(std::io::stdin().lock(), &tx));
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "Failed to start stdin reader; only Ctrl-C will work");
    }

    rx
}

/// Forward parsed commands from `reader` until EOF or the receiver closes.
fn read_commands(reader: impl BufRead, tx: &mpsc::Sender<UserCommand>) {
    for line in reader.lines() {
        let Ok(line) = line else { break };
        match parse_command(&line) {
            Some(command) => {
                if tx.blocking_send(command).is_err() {
                    break;
                }
            }
            None if !line.trim().is_empty() => {
                tracing::debug!(input = %line.trim(), "Unknown command");
            }
            None => {}
        }
    }
}
