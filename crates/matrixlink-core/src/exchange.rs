//! Preset exchange with numbered routing-slot patch files.
//!
//! Patch files describe a preset as a flat list of crosspoints. Importing
//! groups them by input channel into the six surround labels; exporting
//! flattens controls back into points. File parsing itself lives outside
//! this crate.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::preset::{MatrixControl, Preset};
use crate::routing::{PointRef, RoutingPoint};

/// Input channel number to control label.
const INPUT_LABELS: [(u32, &str); 6] = [(1, "FL"), (2, "FR"), (3, "C"), (4, "S"), (5, "RL"), (6, "RR")];

/// One numbered crosspoint of a patch file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchPoint {
    /// Input slot name (e.g. "VAIO2")
    pub slot_in: String,
    /// 1-based input channel
    pub input: u32,
    /// Output slot name (e.g. "WIN1")
    pub slot_out: String,
    /// 1-based output channel
    pub output: u32,
    /// Crosspoint gain in dB
    pub gain_db: f64,
    /// Crosspoint mute state
    #[serde(default)]
    pub muted: bool,
}

impl PatchPoint {
    fn routing_point(&self) -> RoutingPoint {
        RoutingPoint::from(PointRef {
            in_slot: self.slot_in.clone(),
            input: self.input,
            out_slot: self.slot_out.clone(),
            output: self.output,
        })
    }
}

fn label_for_input(input: u32) -> Option<&'static str> {
    INPUT_LABELS.iter().find(|(n, _)| *n == input).map(|(_, label)| *label)
}

/// Build a preset from patch points.
///
/// Points on inputs 1-6 become controls labelled FL, FR, C, S, RL, RR in
/// input order; points on other inputs are ignored. The returned preset has
/// `vban_index` 1; callers normally reassign it when inserting.
///
/// # Errors
/// Returns an error if the name is empty.
pub fn import_points(name: &str, points: &[PatchPoint]) -> Result<Preset> {
    let controls: Vec<MatrixControl> = INPUT_LABELS
        .iter()
        .filter_map(|(input, label)| {
            let group: Vec<&PatchPoint> = points.iter().filter(|p| p.input == *input).collect();
            if group.is_empty() {
                return None;
            }
            Some(MatrixControl {
                label: (*label).to_string(),
                routing_points: group.iter().map(|p| p.routing_point()).collect(),
                initial_gains: group.iter().map(|p| p.gain_db).collect(),
            })
        })
        .collect();

    let skipped = points.iter().filter(|p| label_for_input(p.input).is_none()).count();
    if skipped > 0 {
        debug!(name, skipped, "Ignored patch points outside the surround inputs");
    }

    Preset::new(name, 1, controls)
}

/// Flatten a preset into patch points, in control order.
///
/// Routing points that do not follow the crosspoint syntax are skipped.
#[must_use]
pub fn export_points(preset: &Preset) -> Vec<PatchPoint> {
    preset
        .controls
        .iter()
        .flat_map(MatrixControl::points_with_gains)
        .filter_map(|(point, gain_db)| match point.parse() {
            Ok(parsed) => Some(PatchPoint {
                slot_in: parsed.in_slot,
                input: parsed.input,
                slot_out: parsed.out_slot,
                output: parsed.output,
                gain_db,
                muted: false,
            }),
            Err(e) => {
                warn!(preset = %preset.name, error = %e, "Skipping routing point on export");
                None
            }
        })
        .collect()
}
