//! MatrixLink Daemon - console front end for a remote VBAN matrix engine.
//!
//! Loads presets and endpoint settings, opens the command channel, keeps the
//! RT-packet subscription alive and drives preset switches and control
//! changes from commands typed on stdin.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;
mod console;
mod signals;

use console::{ConsoleCommand, Reply, Session};
use matrixlink_vban::{ChannelOptions, CommandChannel, Endpoint, PresetSequencer, TelemetryEvent};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = with_crate_directives(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))?;
    let (filter, reload) = tracing_subscriber::reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting MatrixLink daemon");

    let config_path = config::config_path()?;
    let config = config::load_from(&config_path)
        .inspect_err(|e| error!(path = ?config_path, error = %e, "Failed to load configuration"))?;
    info!(path = ?config_path, presets = config.presets.len(), "Configuration loaded");

    // The settings log level applies unless RUST_LOG was given
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_none() {
        match EnvFilter::try_new(&config.daemon.log_level).map_err(anyhow::Error::from).and_then(with_crate_directives) {
            Ok(filter) => {
                if let Err(e) = reload.reload(filter) {
                    warn!(error = %e, "Failed to apply log level from settings");
                }
            }
            Err(e) => warn!(level = %config.daemon.log_level, error = %e, "Invalid log level in settings"),
        }
    }

    if !config.vban.enabled {
        info!("VBAN disabled in settings, nothing to do");
        return Ok(());
    }

    let endpoint = Endpoint::parse(&config.vban.remote_ip, config.vban.remote_port, &config.vban.stream_name)
        .context("Invalid VBAN endpoint in settings")?;
    let options = ChannelOptions { resubscribe_interval: Duration::from_secs(config.vban.resubscribe_secs.max(1)) };
    let channel = Arc::new(
        CommandChannel::connect_with_options(endpoint, options).context("Failed to open command channel")?,
    );
    let mut events = channel.subscribe();
    channel.start().context("Failed to start telemetry")?;

    let sequencer = PresetSequencer::new(Arc::clone(&channel))
        .with_step_delay(Duration::from_millis(config.vban.step_delay_ms));
    let mut session = Session::new(config, Some(config_path), sequencer);
    session.restore().await;
    if let Some(active) = session.sequencer().active_preset() {
        info!(preset = %active, presets = session.config().presets.len(), "Active preset");
    }

    let mut shutdown_rx = signals::setup_signal_handlers()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    info!("Daemon running. Type help for commands, Ctrl+C to exit.");

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if run_line(&line, &mut session, &channel).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("Console input closed, waiting for a signal");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read console input");
                        stdin_open = false;
                    }
                }
            }

            event = events.recv() => {
                match event {
                    Ok(TelemetryEvent::State(state)) => {
                        trace!(
                            sample_rate = state.sample_rate,
                            buffer_size = state.buffer_size,
                            "Engine state"
                        );
                    }
                    Ok(TelemetryEvent::TextReply(text)) => info!(reply = %text, "Engine reply"),
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "Telemetry consumer lagged"),
                    Err(RecvError::Closed) => {
                        error!("Telemetry channel closed");
                        break;
                    }
                }
            }

            Some(signal) = shutdown_rx.recv() => {
                info!(signal, "Shutdown signal received");
                break;
            }
        }
    }

    // Cleanup
    info!("Shutting down...");
    channel.shutdown().await;
    if let Err(e) = session.save() {
        error!(error = %e, "Failed to save settings");
    }

    info!("MatrixLink daemon stopped");
    Ok(())
}

fn with_crate_directives(filter: EnvFilter) -> Result<EnvFilter> {
    Ok(filter
        .add_directive("matrixlink=info".parse()?)
        .add_directive("matrixlink_daemon=debug".parse()?)
        .add_directive("matrixlink_vban=debug".parse()?))
}

/// Run one console line. Returns true when the daemon should exit.
async fn run_line(line: &str, session: &mut Session<CommandChannel>, channel: &CommandChannel) -> bool {
    let command = match ConsoleCommand::parse(line) {
        Ok(Some(command)) => command,
        Ok(None) => return false,
        Err(e) => {
            println!("error: {e}");
            return false;
        }
    };

    let is_status = command == ConsoleCommand::Status;
    match session.handle(command).await {
        Ok(Reply::Quit) => true,
        Ok(Reply::Text(mut text)) => {
            if is_status {
                text.push('\n');
                text.push_str(&channel_status(channel));
            }
            println!("{text}");
            false
        }
        Err(e) => {
            warn!(error = %e, line, "Console command failed");
            println!("error: {e:#}");
            false
        }
    }
}

fn channel_status(channel: &CommandChannel) -> String {
    let mut out = format!(
        "local {} frames sent {} telemetry {}",
        channel.local_addr(),
        channel.frame_counter(),
        if channel.is_running() { "running" } else { "stopped" },
    );
    match channel.latest_state() {
        Some(state) => {
            let (major, minor, patch, build) = state.version_parts();
            let _ = write!(
                out,
                "\nengine v{major}.{minor}.{patch}.{build} {} Hz buffer {}",
                state.sample_rate, state.buffer_size
            );
            for index in 0..matrixlink_vban::telemetry::CHANNELS {
                if let (Some(label), Some(gain)) = (state.bus_label(index), state.bus_gain_db(index))
                    && !label.is_empty()
                {
                    let _ = write!(out, "\n  bus {index} {label:<12} {gain:+.1} dB");
                }
            }
        }
        None => out.push_str("\nno telemetry received yet"),
    }
    out
}
