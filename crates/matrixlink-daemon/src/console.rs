//! Line-oriented console commands.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use matrixlink_core::{GainStep, MatrixCommand, MatrixControl, PatchPoint, export_points, import_points};
use matrixlink_vban::{CommandSink, PresetSequencer};
use tracing::{debug, info, warn};

use crate::config::{self, Config};

/// Usage text printed by `help`.
pub const HELP: &str = "\
presets                     list presets (* marks the active one)
status                      show channel and preset status
select <name>               switch the engine to a preset
gain <label> <dB>           set a control of the active preset
nudge <label> up|down       move a control by 1 dB
mute <label> on|off         mute or unmute a control
send <command>              send a raw text command
index <name> <n>            set the engine patch slot of a preset
move <name> <position>      reorder a preset (1-based)
remove <name>               delete a preset
import <file.json> [name]   add a preset from a JSON patch point list
export <name> <file.json>   write a preset as a JSON patch point list
quit                        exit";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Help,
    Presets,
    Status,
    Select(String),
    Gain { label: String, db: f64 },
    Nudge { label: String, step: GainStep },
    Mute { label: String, muted: bool },
    Send(String),
    Index { name: String, index: u32 },
    Move { name: String, position: usize },
    Remove(String),
    Import { path: PathBuf, name: Option<String> },
    Export { name: String, path: PathBuf },
    Quit,
}

impl ConsoleCommand {
    /// Parse one input line. Blank lines yield `None`.
    ///
    /// Preset names may contain spaces; trailing numeric arguments are split
    /// off from the right.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        let command = match verb {
            "help" | "?" => Self::Help,
            "presets" | "ls" => Self::Presets,
            "status" => Self::Status,
            "quit" | "exit" => Self::Quit,
            "select" => Self::Select(required(rest, "preset name")?.to_string()),
            "send" => Self::Send(required(rest, "command text")?.to_string()),
            "remove" => Self::Remove(required(rest, "preset name")?.to_string()),
            "gain" => {
                let (label, value) = split_last(rest, "gain <label> <dB>")?;
                let db: f64 = value.parse().with_context(|| format!("Invalid dB value: {value}"))?;
                if !db.is_finite() {
                    bail!("Invalid dB value: {value}");
                }
                Self::Gain { label: label.to_string(), db }
            }
            "nudge" => {
                let (label, dir) = split_last(rest, "nudge <label> up|down")?;
                let step = match dir {
                    "up" | "+" => GainStep::Up,
                    "down" | "-" => GainStep::Down,
                    other => bail!("Expected up or down, got {other}"),
                };
                Self::Nudge { label: label.to_string(), step }
            }
            "mute" => {
                let (label, state) = split_last(rest, "mute <label> on|off")?;
                let muted = match state {
                    "on" | "1" => true,
                    "off" | "0" => false,
                    other => bail!("Expected on or off, got {other}"),
                };
                Self::Mute { label: label.to_string(), muted }
            }
            "index" => {
                let (name, value) = split_last(rest, "index <name> <n>")?;
                let index = value.parse().with_context(|| format!("Invalid index: {value}"))?;
                Self::Index { name: name.to_string(), index }
            }
            "move" => {
                let (name, value) = split_last(rest, "move <name> <position>")?;
                let position: usize =
                    value.parse().with_context(|| format!("Invalid position: {value}"))?;
                if position == 0 {
                    bail!("Positions start at 1");
                }
                Self::Move { name: name.to_string(), position }
            }
            "import" => {
                let path = required(rest, "file path")?;
                match path.split_once(char::is_whitespace) {
                    Some((path, name)) => {
                        Self::Import { path: PathBuf::from(path), name: Some(name.trim().to_string()) }
                    }
                    None => Self::Import { path: PathBuf::from(path), name: None },
                }
            }
            "export" => {
                let (name, path) = split_last(rest, "export <name> <file.json>")?;
                Self::Export { name: name.to_string(), path: PathBuf::from(path) }
            }
            other => bail!("Unknown command: {other} (try help)"),
        };
        Ok(Some(command))
    }
}

fn required<'a>(rest: &'a str, what: &str) -> Result<&'a str> {
    if rest.is_empty() { Err(anyhow!("Missing {what}")) } else { Ok(rest) }
}

fn split_last<'a>(rest: &'a str, usage: &str) -> Result<(&'a str, &'a str)> {
    rest.rsplit_once(char::is_whitespace)
        .map(|(head, last)| (head.trim(), last))
        .filter(|(head, _)| !head.is_empty())
        .ok_or_else(|| anyhow!("Usage: {usage}"))
}

/// What the caller should do after a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Quit,
}

/// Presets, settings and the sequencer driven by console commands.
pub struct Session<S> {
    config: Config,
    store: Option<PathBuf>,
    sequencer: PresetSequencer<S>,
}

impl<S: CommandSink> Session<S> {
    /// Create a session; `store` is where settings are saved, if anywhere.
    pub fn new(config: Config, store: Option<PathBuf>, sequencer: PresetSequencer<S>) -> Self {
        Self { config, store, sequencer }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sequencer(&self) -> &PresetSequencer<S> {
        &self.sequencer
    }

    /// Mark the last active preset as applied without sending anything.
    pub async fn restore(&self) {
        let Some(name) = self.config.session.last_active_preset.as_deref() else {
            debug!("No preset to restore");
            return;
        };
        match self.config.presets.get(name) {
            Some(preset) => {
                // Restoring never fails; nothing is sent.
                let _ = self.sequencer.apply_preset(preset, false).await;
                info!(preset = %name, "Restored last active preset");
            }
            None => warn!(preset = %name, "Last active preset no longer exists"),
        }
    }

    /// Persist settings, recording the active preset.
    pub fn save(&mut self) -> Result<()> {
        self.config.session.last_active_preset = self.sequencer.active_preset();
        match &self.store {
            Some(path) => config::save_to(&self.config, path),
            None => Ok(()),
        }
    }

    /// Preset part of the `status` output.
    pub fn status(&self) -> String {
        let active = self.sequencer.active_preset();
        let mut out = format!(
            "engine {}:{} stream {}\nactive preset: {}",
            self.config.vban.remote_ip,
            self.config.vban.remote_port,
            self.config.vban.stream_name,
            active.as_deref().unwrap_or("none"),
        );
        if let Some(preset) = active.as_deref().and_then(|name| self.config.presets.get(name)) {
            for control in &preset.controls {
                let _ = write!(out, "\n  {:<4} {} point(s)", control.label, control.routing_points.len());
            }
        }
        out
    }

    /// Run one command.
    ///
    /// `status` yields only the preset part; callers add channel details.
    pub async fn handle(&mut self, command: ConsoleCommand) -> Result<Reply> {
        let text = match command {
            ConsoleCommand::Quit => return Ok(Reply::Quit),
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Status => self.status(),
            ConsoleCommand::Presets => self.list_presets(),
            ConsoleCommand::Select(name) => {
                let preset = self
                    .config
                    .presets
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| anyhow!("Unknown preset: {name}"))?;
                let sent = self.sequencer.apply_preset(&preset, true).await;
                self.save()?;
                sent.context("Preset switch incomplete")?;
                format!("switched to {} (patch {})", preset.name, preset.vban_index)
            }
            ConsoleCommand::Gain { label, db } => {
                self.sequencer.set_gain(self.active_control(&label)?, db)?;
                format!("{label} gain {db} dB")
            }
            ConsoleCommand::Nudge { label, step } => {
                self.sequencer.nudge_gain(self.active_control(&label)?, step)?;
                format!("{label} nudged {:+.1} dB", step.delta())
            }
            ConsoleCommand::Mute { label, muted } => {
                self.sequencer.set_mute(self.active_control(&label)?, muted)?;
                format!("{label} {}", if muted { "muted" } else { "unmuted" })
            }
            ConsoleCommand::Send(raw) => {
                self.sequencer.sink().send_command(&MatrixCommand::Raw(raw).to_string())?;
                "sent".to_string()
            }
            ConsoleCommand::Index { name, index } => {
                self.config.presets.set_vban_index(&name, index)?;
                self.save()?;
                format!("{name} now uses patch {index}")
            }
            ConsoleCommand::Move { name, position } => {
                self.config.presets.move_to(&name, position.saturating_sub(1))?;
                self.save()?;
                self.list_presets()
            }
            ConsoleCommand::Remove(name) => {
                self.config.presets.remove(&name)?;
                if self.sequencer.active_preset().as_deref() == Some(name.as_str()) {
                    self.sequencer.clear_active();
                }
                self.save()?;
                format!("removed {name}")
            }
            ConsoleCommand::Import { path, name } => self.import(&path, name)?,
            ConsoleCommand::Export { name, path } => {
                let preset =
                    self.config.presets.get(&name).ok_or_else(|| anyhow!("Unknown preset: {name}"))?;
                let points = export_points(preset);
                let json = serde_json::to_string_pretty(&points).context("Failed to encode patch points")?;
                std::fs::write(&path, json).with_context(|| format!("Failed to write {path:?}"))?;
                format!("exported {} point(s) to {}", points.len(), path.display())
            }
        };
        Ok(Reply::Text(text))
    }

    fn list_presets(&self) -> String {
        let active = self.sequencer.active_preset();
        self.config
            .presets
            .iter()
            .map(|p| {
                let marker = if active.as_deref() == Some(p.name.as_str()) { '*' } else { ' ' };
                format!("{marker} {} [patch {}]", p.name, p.vban_index)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn active_control(&self, label: &str) -> Result<&MatrixControl> {
        let name = self.sequencer.active_preset().ok_or_else(|| anyhow!("No active preset"))?;
        let preset = self
            .config
            .presets
            .get(&name)
            .ok_or_else(|| anyhow!("Active preset {name} no longer exists"))?;
        preset.control(label).ok_or_else(|| anyhow!("{name} has no control {label}"))
    }

    fn import(&mut self, path: &Path, name: Option<String>) -> Result<String> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {path:?}"))?;
        let points: Vec<PatchPoint> =
            serde_json::from_str(&content).with_context(|| format!("Failed to parse {path:?}"))?;
        let name = name
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .ok_or_else(|| anyhow!("Cannot derive a preset name from {path:?}"))?;

        let imported = import_points(&name, &points)?;
        let added = self.config.presets.add(imported.name, imported.controls)?;
        let text = format!(
            "imported {} with {} control(s) as patch {}",
            added.name,
            added.controls.len(),
            added.vban_index
        );
        self.save()?;
        Ok(text)
    }
}
