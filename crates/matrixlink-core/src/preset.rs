//! Preset model: labelled matrix controls grouped into named presets.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::command::{GainStep, MatrixCommand, whole_db};
use crate::error::{Error, Result};
use crate::routing::RoutingPoint;

/// A labelled control driving one or more crosspoints.
///
/// `routing_points[i]` pairs with `initial_gains[i]`. Every gain or mute
/// action on the label is applied to all of its routing points at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixControl {
    /// Label shown to the user (e.g. "FL", "S")
    pub label: String,
    /// Crosspoints driven by this control, in send order
    pub routing_points: Vec<RoutingPoint>,
    /// Initial gain in dB for each routing point
    pub initial_gains: Vec<f64>,
}

impl MatrixControl {
    /// Create a control, checking that points and gains pair up.
    ///
    /// # Errors
    /// Returns [`Error::GainCountMismatch`] if the two lists differ in length.
    pub fn new(
        label: impl Into<String>,
        routing_points: Vec<RoutingPoint>,
        initial_gains: Vec<f64>,
    ) -> Result<Self> {
        let control = Self { label: label.into(), routing_points, initial_gains };
        control.validate()?;
        Ok(control)
    }

    /// Check the point/gain pairing invariant.
    ///
    /// # Errors
    /// Returns [`Error::GainCountMismatch`] if the two lists differ in length.
    pub fn validate(&self) -> Result<()> {
        if self.routing_points.len() == self.initial_gains.len() {
            Ok(())
        } else {
            Err(Error::GainCountMismatch {
                label: self.label.clone(),
                points: self.routing_points.len(),
                gains: self.initial_gains.len(),
            })
        }
    }

    /// Routing points paired with their initial gains.
    pub fn points_with_gains(&self) -> impl Iterator<Item = (&RoutingPoint, f64)> {
        self.routing_points.iter().zip(self.initial_gains.iter().copied())
    }

    /// Absolute gain commands, one per routing point.
    ///
    /// # Errors
    /// Returns [`Error::InvalidGain`] if `db` is not a finite value in the
    /// crosspoint gain range.
    pub fn gain_commands(&self, db: f64) -> Result<Vec<MatrixCommand>> {
        let db = whole_db(db)?;
        Ok(self
            .routing_points
            .iter()
            .map(|point| MatrixCommand::SetGain { point: point.clone(), db })
            .collect())
    }

    /// Relative gain commands, one per routing point.
    #[must_use]
    pub fn nudge_commands(&self, step: GainStep) -> Vec<MatrixCommand> {
        self.routing_points
            .iter()
            .map(|point| MatrixCommand::NudgeGain { point: point.clone(), delta: step.delta() })
            .collect()
    }

    /// Mute commands, one per routing point.
    #[must_use]
    pub fn mute_commands(&self, muted: bool) -> Vec<MatrixCommand> {
        self.routing_points
            .iter()
            .map(|point| MatrixCommand::SetMute { point: point.clone(), muted })
            .collect()
    }
}

/// A named routing preset, addressable remotely as `PresetPatch[vban_index]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    /// Unique display name
    pub name: String,
    /// Patch slot number on the engine (1-based, independent of display order)
    pub vban_index: u32,
    /// Controls in display order
    #[serde(default)]
    pub controls: Vec<MatrixControl>,
}

impl Preset {
    /// Create a validated preset.
    ///
    /// # Errors
    /// Returns an error if the name is empty, the index is 0, or a control
    /// breaks the point/gain pairing.
    pub fn new(name: impl Into<String>, vban_index: u32, controls: Vec<MatrixControl>) -> Result<Self> {
        let preset = Self { name: name.into(), vban_index, controls };
        preset.validate()?;
        Ok(preset)
    }

    /// Check the preset invariants.
    ///
    /// # Errors
    /// Returns an error if the name is empty, the index is 0, or a control
    /// breaks the point/gain pairing.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::EmptyPresetName);
        }
        if self.vban_index == 0 {
            return Err(Error::InvalidPresetIndex(self.vban_index));
        }
        self.controls.iter().try_for_each(MatrixControl::validate)
    }

    /// Look up a control by label.
    #[must_use]
    pub fn control(&self, label: &str) -> Option<&MatrixControl> {
        self.controls.iter().find(|c| c.label == label)
    }

    /// The three commands that switch the engine to this preset, in order.
    #[must_use]
    pub fn switch_commands(&self) -> [MatrixCommand; 3] {
        [
            MatrixCommand::ResetGrid,
            MatrixCommand::ApplyPatch { index: self.vban_index },
            MatrixCommand::SelectPatch { index: self.vban_index },
        ]
    }
}

/// Ordered set of presets with unique names.
///
/// Display order is the vector order and is unrelated to `vban_index`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Preset>", into = "Vec<Preset>")]
pub struct PresetCollection {
    presets: Vec<Preset>,
}

impl TryFrom<Vec<Preset>> for PresetCollection {
    type Error = Error;

    fn try_from(presets: Vec<Preset>) -> Result<Self> {
        Self::new(presets)
    }
}

impl From<PresetCollection> for Vec<Preset> {
    fn from(collection: PresetCollection) -> Self {
        collection.presets
    }
}

impl PresetCollection {
    /// Build a collection, validating every preset and name uniqueness.
    ///
    /// # Errors
    /// Returns the first invariant violation found.
    pub fn new(presets: Vec<Preset>) -> Result<Self> {
        let mut collection = Self::default();
        for preset in presets {
            collection.insert(preset)?;
        }
        Ok(collection)
    }

    /// The built-in presets seeded when no presets are stored.
    #[must_use]
    pub fn builtin() -> Self {
        Self { presets: builtin_presets() }
    }

    /// Number of presets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.presets.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// Presets in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.iter()
    }

    /// Preset names in display order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.presets.iter().map(|p| p.name.as_str()).collect()
    }

    /// Look up a preset by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.name == name)
    }

    /// Look up a preset by name for in-place edits.
    ///
    /// Callers must keep the preset invariants intact.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Preset> {
        self.presets.iter_mut().find(|p| p.name == name)
    }

    /// Append a preset with an explicit index.
    ///
    /// # Errors
    /// Returns an error if the preset is invalid or its name is taken.
    pub fn insert(&mut self, preset: Preset) -> Result<&Preset> {
        preset.validate()?;
        if self.get(&preset.name).is_some() {
            return Err(Error::DuplicatePresetName(preset.name));
        }
        debug!(name = %preset.name, vban_index = preset.vban_index, "Preset added");
        self.presets.push(preset);
        Ok(&self.presets[self.presets.len() - 1])
    }

    /// Append a preset, assigning the default index (its 1-based position).
    ///
    /// # Errors
    /// Returns an error if the name is empty or taken, or a control is invalid.
    pub fn add(&mut self, name: impl Into<String>, controls: Vec<MatrixControl>) -> Result<&Preset> {
        let vban_index = u32::try_from(self.presets.len() + 1).unwrap_or(u32::MAX);
        self.insert(Preset::new(name, vban_index, controls)?)
    }

    /// Remove a preset by name.
    ///
    /// # Errors
    /// Returns [`Error::PresetNotFound`] if no preset has that name.
    pub fn remove(&mut self, name: &str) -> Result<Preset> {
        let pos = self.position(name)?;
        info!(name, "Preset removed");
        Ok(self.presets.remove(pos))
    }

    /// Reassign the engine patch slot of a preset.
    ///
    /// # Errors
    /// Returns an error if the preset is unknown or the index is 0.
    pub fn set_vban_index(&mut self, name: &str, vban_index: u32) -> Result<()> {
        if vban_index == 0 {
            return Err(Error::InvalidPresetIndex(vban_index));
        }
        let preset =
            self.get_mut(name).ok_or_else(|| Error::PresetNotFound(name.to_string()))?;
        preset.vban_index = vban_index;
        debug!(name, vban_index, "Preset index changed");
        Ok(())
    }

    /// Move a preset to a new display position (clamped to the end).
    ///
    /// # Errors
    /// Returns [`Error::PresetNotFound`] if no preset has that name.
    pub fn move_to(&mut self, name: &str, position: usize) -> Result<()> {
        let from = self.position(name)?;
        let preset = self.presets.remove(from);
        let to = position.min(self.presets.len());
        self.presets.insert(to, preset);
        Ok(())
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.presets
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| Error::PresetNotFound(name.to_string()))
    }
}

fn control(label: &str, point: &str, gain: f64) -> MatrixControl {
    MatrixControl {
        label: label.to_string(),
        routing_points: vec![RoutingPoint::new(point)],
        initial_gains: vec![gain],
    }
}

fn builtin_presets() -> Vec<Preset> {
    vec![
        Preset {
            name: "PC 5.1".to_string(),
            vban_index: 1,
            controls: vec![
                control("FL", "Point(VAIO2.IN[1],WIN1.OUT[1])", -10.0),
                control("FR", "Point(VAIO2.IN[2],WIN1.OUT[2])", -9.0),
                control("C", "Point(VAIO2.IN[3],WIN3.OUT[1])", -6.0),
                control("S", "Point(VAIO2.IN[3],WIN3.OUT[2])", -4.5),
                control("RL", "Point(VAIO2.IN[5],WIN4.OUT[1])", 0.0),
                control("RR", "Point(VAIO2.IN[6],WIN4.OUT[2])", -1.0),
            ],
        },
        // Stereo mixdown of every channel onto the main pair
        Preset {
            name: "PC 2.0".to_string(),
            vban_index: 2,
            controls: vec![
                control("FL", "Point(VAIO2.IN[1],WIN1.OUT[1])", 0.0),
                control("FR", "Point(VAIO2.IN[2],WIN1.OUT[2])", 0.0),
                control("C", "Point(VAIO2.IN[3],WIN1.OUT[1])", 0.0),
                control("S", "Point(VAIO2.IN[3],WIN1.OUT[2])", 0.0),
                control("RL", "Point(VAIO2.IN[5],WIN1.OUT[1])", 0.0),
                control("RR", "Point(VAIO2.IN[6],WIN1.OUT[2])", 0.0),
            ],
        },
        Preset {
            name: "Beamer 5.1".to_string(),
            vban_index: 3,
            controls: vec![
                control("FL", "Point(VAIO2.IN[1],WIN4.OUT[2])", -1.0),
                control("FR", "Point(VAIO2.IN[2],WIN4.OUT[1])", 0.0),
                control("C", "Point(VAIO2.IN[3],WIN3.OUT[1])", -6.0),
                control("S", "Point(VAIO2.IN[3],WIN3.OUT[2])", -4.5),
                control("RL", "Point(VAIO2.IN[5],WIN1.OUT[2])", -9.0),
                control("RR", "Point(VAIO2.IN[6],WIN1.OUT[1])", -10.0),
            ],
        },
    ]
}
