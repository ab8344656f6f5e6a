//! MatrixLink Core - Presets, routing points and the matrix command grammar.
//!
//! This crate contains the domain model shared by the protocol client and
//! the daemon. It performs no I/O.

pub mod command;
pub mod error;
pub mod exchange;
pub mod preset;
pub mod routing;

pub use command::{GainStep, MatrixCommand, join_commands};
pub use error::{Error, Result};
pub use exchange::{PatchPoint, export_points, import_points};
pub use preset::{MatrixControl, Preset, PresetCollection};
pub use routing::{PointRef, RoutingPoint};
