//! Timed preset switching and per-control actions.

use std::sync::Arc;
use std::time::Duration;

use matrixlink_core::{GainStep, MatrixCommand, MatrixControl, Preset, join_commands};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::VbanResult;

/// Pause between the steps of a preset switch.
pub const STEP_DELAY: Duration = Duration::from_millis(50);

/// Destination for framed text commands.
pub trait CommandSink: Send + Sync {
    /// Send one command datagram.
    ///
    /// # Errors
    /// Returns an error if the datagram could not be handed to the OS.
    fn send_command(&self, text: &str) -> VbanResult<()>;
}

/// Drives preset switches and control changes through a [`CommandSink`].
///
/// A switch is three separate datagrams spaced by the step delay. Switches
/// on one sequencer never interleave; a second call waits for the first to
/// finish. The active preset is tracked by name.
pub struct PresetSequencer<S> {
    sink: Arc<S>,
    step_delay: Duration,
    active: RwLock<Option<String>>,
    switching: tokio::sync::Mutex<()>,
}

impl<S: CommandSink> PresetSequencer<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self {
            sink,
            step_delay: STEP_DELAY,
            active: RwLock::new(None),
            switching: tokio::sync::Mutex::new(()),
        }
    }

    /// Override the pause between switch steps.
    #[must_use]
    pub fn with_step_delay(mut self, step_delay: Duration) -> Self {
        self.step_delay = step_delay;
        self
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    /// Name of the preset applied last, if any.
    #[must_use]
    pub fn active_preset(&self) -> Option<String> {
        self.active.read().clone()
    }

    /// Forget the active preset.
    pub fn clear_active(&self) {
        self.active.write().take();
    }

    /// Switch to `preset`.
    ///
    /// With `send_commands` false nothing is sent and only the active
    /// preset is recorded; this is how a previous session is restored. When
    /// sending, a failed step is logged and the remaining steps still go out.
    /// The active preset is recorded either way.
    ///
    /// # Errors
    /// Returns the first send error, after the whole sequence has run.
    pub async fn apply_preset(&self, preset: &Preset, send_commands: bool) -> VbanResult<()> {
        let _guard = self.switching.lock().await;
        let mut result = Ok(());

        if send_commands {
            info!(preset = %preset.name, index = preset.vban_index, "Switching preset");
            for (step, command) in preset.switch_commands().iter().enumerate() {
                if step > 0 {
                    tokio::time::sleep(self.step_delay).await;
                }
                if let Err(e) = self.sink.send_command(&command.to_string()) {
                    warn!(preset = %preset.name, %command, error = %e, "Preset switch step failed");
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        } else {
            debug!(preset = %preset.name, "Restoring preset without sending");
        }

        *self.active.write() = Some(preset.name.clone());
        result
    }

    /// Set every routing point of `control` to `db` in one datagram.
    ///
    /// # Errors
    /// Returns [`VbanError::Preset`] without sending anything if `db` is not
    /// a valid crosspoint gain, or an error if the datagram could not be sent.
    ///
    /// [`VbanError::Preset`]: crate::VbanError::Preset
    pub fn set_gain(&self, control: &MatrixControl, db: f64) -> VbanResult<()> {
        let commands = control.gain_commands(db)?;
        self.send_joined(&control.label, &commands)
    }

    /// Move every routing point of `control` one dB in one datagram.
    ///
    /// # Errors
    /// Returns an error if the datagram could not be sent.
    pub fn nudge_gain(&self, control: &MatrixControl, step: GainStep) -> VbanResult<()> {
        self.send_joined(&control.label, &control.nudge_commands(step))
    }

    /// Mute or unmute every routing point of `control` in one datagram.
    ///
    /// # Errors
    /// Returns an error if the datagram could not be sent.
    pub fn set_mute(&self, control: &MatrixControl, muted: bool) -> VbanResult<()> {
        self.send_joined(&control.label, &control.mute_commands(muted))
    }

    fn send_joined(&self, label: &str, commands: &[MatrixCommand]) -> VbanResult<()> {
        if commands.is_empty() {
            debug!(label, "Control has no routing points, nothing sent");
            return Ok(());
        }
        let text = join_commands(commands);
        debug!(label, command = %text, "Sending control change");
        self.sink.send_command(&text)
    }
}
