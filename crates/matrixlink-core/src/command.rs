//! Matrix text commands.
//!
//! Commands render to the engine's ASCII grammar through `Display`:
//! `<target>.<property> = <value>`, `<target>.<property> += <delta>`,
//! `Command.ResetGrid`, `PresetPatch[<n>].Apply` and `PresetPatch[<n>].Select`.
//! Several commands travel in one datagram joined with `;`.

use std::fmt;

use crate::error::{Error, Result};
use crate::routing::RoutingPoint;

/// Lowest absolute gain a crosspoint accepts, in dB.
pub const MIN_GAIN_DB: f64 = -100.0;

/// Highest absolute gain a crosspoint accepts, in dB.
pub const MAX_GAIN_DB: f64 = 0.0;

/// Separator between commands sharing one datagram.
pub const COMMAND_SEPARATOR: &str = ";";

/// A single matrix text command.
#[derive(Debug, Clone, PartialEq)]
pub enum MatrixCommand {
    /// Set the absolute gain of a crosspoint in whole dB
    SetGain { point: RoutingPoint, db: i32 },
    /// Move the gain of a crosspoint by a relative amount
    NudgeGain { point: RoutingPoint, delta: f64 },
    /// Set the mute state of a crosspoint
    SetMute { point: RoutingPoint, muted: bool },
    /// Clear every active crosspoint assignment
    ResetGrid,
    /// Load a stored preset patch into the grid
    ApplyPatch { index: u32 },
    /// Mark a stored preset patch as selected
    SelectPatch { index: u32 },
    /// Free-form command text, sent verbatim
    Raw(String),
}

impl fmt::Display for MatrixCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetGain { point, db } => write!(f, "{point}.dBGain = {db}"),
            Self::NudgeGain { point, delta } => write!(f, "{point}.dBGain += {delta:.1}"),
            Self::SetMute { point, muted } => write!(f, "{point}.Mute = {}", u8::from(*muted)),
            Self::ResetGrid => f.write_str("Command.ResetGrid"),
            Self::ApplyPatch { index } => write!(f, "PresetPatch[{index}].Apply"),
            Self::SelectPatch { index } => write!(f, "PresetPatch[{index}].Select"),
            Self::Raw(text) => f.write_str(text),
        }
    }
}

/// Direction of a one-step relative gain change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainStep {
    /// +1 dB
    Up,
    /// -1 dB
    Down,
}

impl GainStep {
    /// Signed dB delta for this step.
    #[must_use]
    pub fn delta(self) -> f64 {
        match self {
            Self::Up => 1.0,
            Self::Down => -1.0,
        }
    }
}

/// Convert a dB value to the whole-dB integer the engine expects.
///
/// Fractions are truncated toward zero.
///
/// # Errors
/// Returns [`Error::InvalidGain`] for NaN, infinities and values outside
/// [`MIN_GAIN_DB`]..=[`MAX_GAIN_DB`].
#[allow(clippy::cast_possible_truncation)]
pub fn whole_db(db: f64) -> Result<i32> {
    if !(MIN_GAIN_DB..=MAX_GAIN_DB).contains(&db) {
        return Err(Error::InvalidGain(db));
    }
    Ok(db.trunc() as i32)
}

/// Join commands into one `;`-separated datagram payload.
#[must_use]
pub fn join_commands(commands: &[MatrixCommand]) -> String {
    commands.iter().map(ToString::to_string).collect::<Vec<_>>().join(COMMAND_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn point() -> RoutingPoint {
        RoutingPoint::new("Point(A.IN[1],B.OUT[1])")
    }

    #[test]
    fn test_set_gain_grammar() {
        let cmd = MatrixCommand::SetGain { point: point(), db: -3 };
        assert_eq!(cmd.to_string(), "Point(A.IN[1],B.OUT[1]).dBGain = -3");
    }

    #[test]
    fn test_nudge_grammar() {
        let up = MatrixCommand::NudgeGain { point: point(), delta: GainStep::Up.delta() };
        let down = MatrixCommand::NudgeGain { point: point(), delta: GainStep::Down.delta() };

        assert_eq!(up.to_string(), "Point(A.IN[1],B.OUT[1]).dBGain += 1.0");
        assert_eq!(down.to_string(), "Point(A.IN[1],B.OUT[1]).dBGain += -1.0");
    }

    #[test]
    fn test_mute_grammar() {
        let on = MatrixCommand::SetMute { point: point(), muted: true };
        let off = MatrixCommand::SetMute { point: point(), muted: false };

        assert_eq!(on.to_string(), "Point(A.IN[1],B.OUT[1]).Mute = 1");
        assert_eq!(off.to_string(), "Point(A.IN[1],B.OUT[1]).Mute = 0");
    }

    #[test]
    fn test_patch_commands() {
        assert_eq!(MatrixCommand::ResetGrid.to_string(), "Command.ResetGrid");
        assert_eq!(MatrixCommand::ApplyPatch { index: 4 }.to_string(), "PresetPatch[4].Apply");
        assert_eq!(MatrixCommand::SelectPatch { index: 4 }.to_string(), "PresetPatch[4].Select");
    }

    #[test]
    fn test_whole_db_truncates_toward_zero() {
        assert_eq!(whole_db(-3.0).ok(), Some(-3));
        assert_eq!(whole_db(-3.7).ok(), Some(-3));
        assert_eq!(whole_db(-0.4).ok(), Some(0));
        assert_eq!(whole_db(-100.0).ok(), Some(-100));
        assert_eq!(whole_db(0.0).ok(), Some(0));
    }

    #[test]
    fn test_whole_db_rejects_non_finite_and_out_of_range() {
        for db in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 0.5, 2.9, -100.1, 1e12] {
            assert_matches!(whole_db(db), Err(Error::InvalidGain(_)), "{db} accepted");
        }
    }

    #[test]
    fn test_join_commands() {
        let joined = join_commands(&[
            MatrixCommand::SetMute { point: RoutingPoint::new("P1"), muted: true },
            MatrixCommand::SetMute { point: RoutingPoint::new("P2"), muted: true },
        ]);
        assert_eq!(joined, "P1.Mute = 1;P2.Mute = 1");
        assert_eq!(join_commands(&[]), "");
    }
}
