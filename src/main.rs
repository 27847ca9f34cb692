//! `parlar`: talk to a realtime voice model from the terminal.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use parlar::audio;
use parlar::commands;
use parlar::voice::session::run_session;
use parlar::voice::SessionEvent;
use parlar::Config;

/// Full-duplex voice assistant with barge-in
#[derive(Parser, Debug)]
#[command(name = "parlar", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Realtime model name
    #[arg(long)]
    model: Option<String>,

    /// Assistant voice
    #[arg(long)]
    voice: Option<String>,

    /// Mic level (0.0-1.0) that interrupts the assistant
    #[arg(long)]
    barge_threshold: Option<f32>,

    /// Input device name (see `parlar devices`)
    #[arg(long)]
    input_device: Option<String>,

    /// Output device name (see `parlar devices`)
    #[arg(long)]
    output_device: Option<String>,

    /// Log filter, e.g. `debug` or `parlar=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List audio input and output devices
    Devices,
    /// Print the effective configuration (API key redacted)
    Config,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(model) = &self.model {
            config.remote.model.clone_from(model);
        }
        if let Some(voice) = &self.voice {
            config.remote.voice.clone_from(voice);
        }
        if let Some(threshold) = self.barge_threshold {
            config.barge_in.threshold = threshold;
        }
        if self.input_device.is_some() {
            config.audio.input_device.clone_from(&self.input_device);
        }
        if self.output_device.is_some() {
            config.audio.output_device.clone_from(&self.output_device);
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parlar=info"))
        }
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let mut config =
        Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);

    match cli.command {
        Some(Command::Devices) => print_devices(),
        Some(Command::Config) => {
            print!("{}", config.redacted().to_toml_string()?);
            Ok(())
        }
        None => converse(config).await,
    }
}

fn print_devices() -> anyhow::Result<()> {
    let devices = audio::list_devices()?;
    let mark = |name: &str, default: &Option<String>| {
        if default.as_deref() == Some(name) {
            " (default)"
        } else {
            ""
        }
    };

    println!("Input devices:");
    for name in &devices.inputs {
        println!("  {name}{}", mark(name, &devices.default_input));
    }
    println!("Output devices:");
    for name in &devices.outputs {
        println!("  {name}{}", mark(name, &devices.default_output));
    }
    Ok(())
}

async fn converse(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let shutdown = CancellationToken::new();
    let user_commands = commands::spawn_command_source(shutdown.clone());

    println!(
        "parlar: {} / {} | barge-in ≥ {:.2} | type 'i' + Enter to interrupt, 'q' + Enter to quit",
        config.remote.model, config.remote.voice, config.barge_in.threshold
    );

    let mut printer = ConsolePrinter::default();
    run_session(config, shutdown, user_commands, move |event| printer.print(event)).await
}

/// Renders session events as a running transcript on stdout.
#[derive(Default)]
struct ConsolePrinter {
    mid_line: bool,
}

impl ConsolePrinter {
    fn print(&mut self, event: &SessionEvent) {
        let mut out = std::io::stdout().lock();
        let _ = match event {
            SessionEvent::Ready => writeln!(out, "[ready] start talking"),
            SessionEvent::AssistantText { delta } => {
                if !self.mid_line {
                    let _ = write!(out, "assistant: ");
                    self.mid_line = true;
                }
                write!(out, "{delta}")
            }
            SessionEvent::AssistantDone => {
                if self.mid_line {
                    self.mid_line = false;
                    writeln!(out)
                } else {
                    Ok(())
                }
            }
            SessionEvent::UserTranscript { text } => {
                self.break_line(&mut out);
                writeln!(out, "you: {text}")
            }
            SessionEvent::Interrupted { source } => {
                self.break_line(&mut out);
                writeln!(out, "[barge-in: {}] assistant cancelled", source.as_str())
            }
            SessionEvent::Error { code, message } => {
                self.break_line(&mut out);
                writeln!(
                    out,
                    "[realtime error] {} {message}",
                    code.as_deref().unwrap_or("")
                )
            }
            SessionEvent::Disconnected => {
                self.break_line(&mut out);
                writeln!(out, "[disconnected]")
            }
        };
        let _ = out.flush();
    }

    fn break_line(&mut self, out: &mut impl Write) {
        if self.mid_line {
            let _ = writeln!(out);
            self.mid_line = false;
        }
    }
}
