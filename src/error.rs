//! Error types for the wave modeller.

use thiserror::Error;

/// Result type for simulation and artifact I/O.
pub type Result<T> = std::result::Result<T, WaveError>;

/// Errors that can abort a run.
///
/// Numerical blow-up is deliberately absent: an unstable configuration keeps
/// running unless the stability policy asks for a pre-flight rejection.
#[derive(Error, Debug)]
pub enum WaveError {
    /// Configuration rejected before any work started.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input audio does not match mono 16-bit PCM at the expected rate.
    #[error("Unsupported audio input: {0}")]
    UnsupportedAudio(String),

    /// Input audio could not be parsed.
    #[error("Failed to read audio input: {0}")]
    AudioRead(#[from] hound::Error),

    /// A grid or buffer could not be allocated.
    #[error("Failed to allocate {what} ({cells} cells)")]
    Allocation { what: &'static str, cells: usize },

    /// CFL pre-flight check failed.
    #[error("Unstable configuration: Courant number {courant:.4} exceeds limit {limit:.4}")]
    Unstable { courant: f64, limit: f64 },

    /// Frame encoding failed.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// The frame encoding worker stopped before the run finished.
    #[error("Frame encoder stopped unexpectedly")]
    EncoderStopped,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
