//! Matrix routing points.
//!
//! A routing point names one input-to-output crosspoint of the engine's
//! routing matrix, e.g. `Point(VAIO2.IN[1],WIN1.OUT[1])`. The protocol layer
//! treats it as an opaque string; the structured form is only needed when
//! presets are exchanged with other tools.

use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::error::{Error, Result};

fn point_regex() -> Option<&'static regex::Regex> {
    static RE: OnceLock<Option<regex::Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        match regex::Regex::new(r"^Point\((\w+)\.IN\[(\d+)\],(\w+)\.OUT\[(\d+)\]\)$") {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(error = %e, "Invalid routing point pattern");
                None
            }
        }
    })
    .as_ref()
}

/// A string-encoded reference to one matrix crosspoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingPoint(String);

impl RoutingPoint {
    /// Wrap a routing point string without validating it.
    #[must_use]
    pub fn new(point: impl Into<String>) -> Self {
        Self(point.into())
    }

    /// The raw command target, as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the `Point(<slot>.IN[n],<slot>.OUT[m])` form.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRoutingPoint`] if the string does not follow
    /// the crosspoint syntax.
    pub fn parse(&self) -> Result<PointRef> {
        let caps = point_regex()
            .and_then(|re| re.captures(&self.0))
            .ok_or_else(|| Error::InvalidRoutingPoint(self.0.clone()))?;

        let number = |i: usize| {
            caps[i].parse::<u32>().map_err(|_| Error::InvalidRoutingPoint(self.0.clone()))
        };

        let point = PointRef {
            in_slot: caps[1].to_string(),
            input: number(2)?,
            out_slot: caps[3].to_string(),
            output: number(4)?,
        };
        trace!(point = %self, "Parsed routing point");
        Ok(point)
    }
}

impl fmt::Display for RoutingPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoutingPoint {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<PointRef> for RoutingPoint {
    fn from(point: PointRef) -> Self {
        Self(point.to_string())
    }
}

/// Structured form of a routing point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PointRef {
    /// Input slot name (e.g. "VAIO2")
    pub in_slot: String,
    /// 1-based input channel within the slot
    pub input: u32,
    /// Output slot name (e.g. "WIN1")
    pub out_slot: String,
    /// 1-based output channel within the slot
    pub output: u32,
}

impl fmt::Display for PointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Point({}.IN[{}],{}.OUT[{}])", self.in_slot, self.input, self.out_slot, self.output)
    }
}
