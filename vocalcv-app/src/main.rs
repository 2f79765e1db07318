//! vocalcv terminal host.
//!
//! Reads commands from stdin (`c` connect, `d` disconnect, `devices`,
//! `status`, `q` quit), prints status changes, and draws the agent's
//! voice as a one-line spectrum while connected.

mod display;
mod settings;

use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use vocalcv_core::{
    audio::device::{list_devices, DeviceDirection},
    CpalBackend, LiveTransport, LiveTransportConfig, ResumeData, SessionState, VoiceAgent,
    Visualizer,
};

use settings::{default_settings_path, load_settings, save_settings};

/// Spectrum redraw period (about 20 frames per second).
const FRAME_INTERVAL: Duration = Duration::from_millis(50);

fn print_devices() {
    let devices = list_devices();
    if devices.is_empty() {
        println!("no audio devices found");
    }
    for device in devices {
        let direction = match device.direction {
            DeviceDirection::Input => "in ",
            DeviceDirection::Output => "out",
        };
        let mut flags = Vec::new();
        if device.is_default {
            flags.push("default");
        }
        if device.is_loopback_like {
            flags.push("loopback?");
        }
        println!("{direction}  {}  {}", device.name, flags.join(","));
    }
}

fn print_help() {
    println!("commands: c(onnect)  d(isconnect)  devices  status  q(uit)");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vocalcv=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // ── Settings + resume ─────────────────────────────────────────────────
    let settings_path = std::env::var_os("VOCALCV_SETTINGS")
        .map(PathBuf::from)
        .unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);
    if !settings_path.exists() {
        match save_settings(&settings_path, &settings) {
            Ok(()) => info!("wrote default settings to {}", settings_path.display()),
            Err(e) => warn!("could not write default settings: {e}"),
        }
    }

    let resume_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| settings.resume_path(&settings_path));
    let resume = ResumeData::load(&resume_path)
        .with_context(|| format!("loading resume from {}", resume_path.display()))?;

    let Some(api_key) = settings.resolve_api_key() else {
        bail!("no API key: set GEMINI_API_KEY or apiKey in {}", settings_path.display());
    };

    // ── Agent ─────────────────────────────────────────────────────────────
    let config = settings.agent_config();
    let fft_size = config.fft_size;
    let setup = config.session_setup(resume.system_instruction());
    let transport = LiveTransport::on_current_runtime(LiveTransportConfig {
        outbound_queue: config.outbound_queue_frames,
        ..LiveTransportConfig::new(api_key)
    })?;
    let agent = VoiceAgent::spawn(config, setup, Box::new(CpalBackend::new()), Box::new(transport))?;
    info!(resume = resume.name.as_str(), "voice agent ready");

    // ── Status printer ────────────────────────────────────────────────────
    let mut status_rx = agent.subscribe_status();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(status) => println!("\r{}", display::status_line(&status)),
                Err(RecvError::Lagged(n)) => warn!("status receiver lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // ── Spectrum ──────────────────────────────────────────────────────────
    let tap = agent.analysis_tap();
    let (state_tx, state_rx) = tokio::sync::watch::channel(SessionState::Disconnected);
    let mut visualizer = Visualizer::new(
        fft_size,
        f32::from(settings.visualizer_width),
        display::CANVAS_HEIGHT,
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(FRAME_INTERVAL);
        loop {
            ticker.tick().await;
            if state_rx.has_changed().is_err() {
                break;
            }
            let state = *state_rx.borrow();
            print!("\r{}", display::spectrum_tick(&mut visualizer, &tap, state));
            let _ = std::io::stdout().flush();
        }
    });

    // ── Commands ──────────────────────────────────────────────────────────
    print_help();
    println!("{}", display::status_line(&agent.status()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status_watch = agent.subscribe_status();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "c" | "connect" => agent.connect()?,
                    "d" | "disconnect" => agent.disconnect()?,
                    "devices" => print_devices(),
                    "status" => println!("{}", display::status_line(&agent.status())),
                    "q" | "quit" | "exit" => break,
                    "" => {}
                    other => {
                        println!("unknown command: {other}");
                        print_help();
                    }
                }
            }
            status = status_watch.recv() => match status {
                Ok(status) => {
                    let _ = state_tx.send(status.state);
                }
                Err(RecvError::Lagged(_)) => {
                    let _ = state_tx.send(agent.status().state);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    drop(state_tx);
    agent.shutdown().await;
    info!("bye");
    Ok(())
}
