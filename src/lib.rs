//! Damped scalar wave propagation on a fixed 2D grid.
//!
//! Explicit finite-difference stepping with a clamped (zero-gradient)
//! boundary, rendered to RGBA frames on a schedule, optionally driven by a
//! 16-bit PCM signal injected at one cell and sampled back out at another.

pub mod audio;
pub mod config;
pub mod error;
pub mod forcing;
pub mod grid;
pub mod runner;
pub mod schedule;
pub mod simulation;
pub mod visualisation;
pub mod wavefield;

pub use error::{Result, WaveError};
pub use grid::{Cell, Grid};
pub use runner::{CancelToken, RunOutcome, RunReport, Runner};
pub use simulation::{Simulation, SimulationParams, StabilityPolicy};
pub use wavefield::{InitialCondition, Wavefield};
