use crate::audio::{load_pcm16, WavFileWriter};
use crate::forcing::{ForcingSource, SAMPLE_RATE};
use crate::grid::{Cell, Grid};
use crate::runner::{CancelToken, Runner};
use crate::schedule::{FrameCount, FrameSchedule, SchedulePolicy};
use crate::simulation::{Simulation, SimulationParams, StabilityPolicy};
use crate::visualisation::{Normalization, Palette, PngFrameWriter, WavefieldVisualiser};
use crate::wavefield::InitialCondition;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Grid configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_width")]
    pub width: usize,
    #[serde(default = "default_height")]
    pub height: usize,
    pub h: f64,
}

fn default_width() -> usize {
    1000
}

fn default_height() -> usize {
    700
}

impl GridConfig {
    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!(
                "Grid dimensions must be positive (width={}, height={})",
                self.width,
                self.height
            ));
        }
        if self.h <= 0.0 || !self.h.is_finite() {
            return Err(anyhow!("Grid spacing must be positive (h={})", self.h));
        }
        Ok(())
    }

    pub fn grid(&self) -> Grid {
        Grid::new(self.width, self.height, self.h)
    }
}

/// Time stepping and material constants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicsConfig {
    pub dt: f64,
    pub c: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damping: Option<f64>, // Displacement multiplier per sub-step, absent = undamped
    #[serde(default)]
    pub stability: StabilityPolicy,
}

impl PhysicsConfig {
    fn validate(&self) -> Result<()> {
        if self.dt <= 0.0 || !self.dt.is_finite() {
            return Err(anyhow!("dt must be positive, got {}", self.dt));
        }
        if self.c <= 0.0 || !self.c.is_finite() {
            return Err(anyhow!("Wave speed c must be positive, got {}", self.c));
        }
        if let Some(damping) = self.damping {
            if damping <= 0.0 || damping > 1.0 {
                return Err(anyhow!("damping must be in (0, 1], got {}", damping));
            }
        }
        Ok(())
    }
}

/// External signal injected at a cell, one sample per sub-step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForcingConfig {
    #[serde(default)]
    pub wav: Option<PathBuf>,
    #[serde(default)]
    pub x: Option<usize>, // Default: grid centre
    #[serde(default)]
    pub y: Option<usize>,
}

/// Cell read into the output audio every sub-step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub x: Option<usize>, // Default: centre column
    #[serde(default)]
    pub y: Option<usize>, // Default: 50 rows below centre
}

/// Probe sits this many rows below the centre unless told otherwise.
const PROBE_ROW_OFFSET: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Fixed sub-step count per frame. When absent it is derived from fps and dt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substeps_per_frame: Option<usize>,
    /// Frame count. When absent it is derived from the forcing signal length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames: Option<usize>,
    #[serde(default)]
    pub emit_initial_frame: bool,
}

fn default_fps() -> u32 {
    25
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            substeps_per_frame: None,
            frames: None,
            emit_initial_frame: false,
        }
    }
}

impl ScheduleConfig {
    fn validate(&self, forced: bool) -> Result<()> {
        if self.fps == 0 {
            return Err(anyhow!("fps must be positive"));
        }
        if self.substeps_per_frame == Some(0) {
            return Err(anyhow!("substeps_per_frame must be positive"));
        }
        if self.substeps_per_frame.is_some() && self.frames.is_none() {
            return Err(anyhow!(
                "A fixed substeps_per_frame needs an explicit frame count"
            ));
        }
        if self.frames.is_none() && !forced {
            return Err(anyhow!(
                "frames can only be derived from a forcing signal; set schedule.frames"
            ));
        }
        Ok(())
    }

    /// Pick the policy. `signal` is (sample count, sample rate) of the forcing input.
    pub fn policy(&self, signal: Option<(usize, u32)>) -> Result<SchedulePolicy> {
        let policy = match (self.substeps_per_frame, self.frames) {
            (Some(substeps_per_frame), Some(frames)) => SchedulePolicy::FixedCount {
                substeps_per_frame,
                frames,
            },
            (Some(_), None) => {
                return Err(anyhow!(
                    "A fixed substeps_per_frame needs an explicit frame count"
                ))
            }
            (None, Some(frames)) => SchedulePolicy::RateDerived {
                fps: self.fps,
                frames: FrameCount::Fixed(frames),
            },
            (None, None) => {
                let (sample_count, sample_rate) = signal.ok_or_else(|| {
                    anyhow!("frames can only be derived from a forcing signal; set schedule.frames")
                })?;
                SchedulePolicy::RateDerived {
                    fps: self.fps,
                    frames: FrameCount::FromSignal {
                        sample_count,
                        sample_rate,
                    },
                }
            }
        };
        Ok(policy)
    }
}

/// Artifact configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_frame_prefix")]
    pub frame_prefix: String,
    #[serde(default = "default_wav")]
    pub wav: PathBuf, // Relative to dir
    #[serde(default)]
    pub normalization: Normalization,
    #[serde(default)]
    pub palette: Palette,
    #[serde(default = "default_probe_marker")]
    pub probe_marker: bool,
    #[serde(default)]
    pub checkpoint_audio: bool,
}

fn default_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_frame_prefix() -> String {
    "tt".to_string()
}

fn default_wav() -> PathBuf {
    PathBuf::from("write.wav")
}

fn default_probe_marker() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            frame_prefix: default_frame_prefix(),
            wav: default_wav(),
            normalization: Normalization::default(),
            palette: Palette::default(),
            probe_marker: default_probe_marker(),
            checkpoint_audio: false,
        }
    }
}

impl OutputConfig {
    fn validate(&self) -> Result<()> {
        let divisor = self.normalization.0;
        if divisor <= 0.0 || !divisor.is_finite() {
            return Err(anyhow!("normalization must be positive, got {}", divisor));
        }
        if self.frame_prefix.is_empty() {
            return Err(anyhow!("frame_prefix must not be empty"));
        }
        Ok(())
    }

    pub fn wav_path(&self) -> PathBuf {
        self.dir.join(&self.wav)
    }
}

/// The three classic set-ups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Gaussian pulse, 416 sub-steps per frame, 500 images including the initial state.
    Free,
    /// Gaussian pulse stepped in real time at 25 fps for 10 frames.
    Realtime,
    /// Silent membrane driven by a WAV file, with a probe recording the response.
    Audio,
}

/// Complete simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub grid: GridConfig,
    pub physics: PhysicsConfig,
    #[serde(default)]
    pub initial: InitialCondition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forcing: Option<ForcingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeConfig>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file '{}': {}", path, e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| anyhow!("Failed to parse TOML config: {}", e))?;

        // Validate before returning
        config.validate()?;

        Ok(config)
    }

    pub fn preset(preset: Preset) -> Self {
        let grid = GridConfig {
            width: default_width(),
            height: default_height(),
            h: 4.0,
        };
        match preset {
            Preset::Free => Config {
                grid,
                physics: PhysicsConfig {
                    dt: 0.0001,
                    c: 89.0,
                    damping: None,
                    stability: StabilityPolicy::Warn,
                },
                initial: InitialCondition::gaussian(),
                forcing: None,
                probe: None,
                schedule: ScheduleConfig {
                    substeps_per_frame: Some(416),
                    frames: Some(499),
                    emit_initial_frame: true,
                    ..ScheduleConfig::default()
                },
                output: OutputConfig::default(),
            },
            Preset::Realtime => Config {
                grid,
                physics: PhysicsConfig {
                    dt: 0.01,
                    c: 89.0,
                    damping: None,
                    stability: StabilityPolicy::Warn,
                },
                initial: InitialCondition::gaussian(),
                forcing: None,
                probe: None,
                schedule: ScheduleConfig {
                    frames: Some(10),
                    ..ScheduleConfig::default()
                },
                output: OutputConfig::default(),
            },
            Preset::Audio => Config {
                grid: GridConfig { h: 1.0, ..grid },
                physics: PhysicsConfig {
                    dt: 1.0 / f64::from(SAMPLE_RATE),
                    c: 1900.0,
                    damping: Some(0.999),
                    stability: StabilityPolicy::Warn,
                },
                initial: InitialCondition::Zero,
                forcing: Some(ForcingConfig::default()),
                probe: Some(ProbeConfig::default()),
                schedule: ScheduleConfig::default(),
                output: OutputConfig {
                    normalization: Normalization::PCM16,
                    ..OutputConfig::default()
                },
            },
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<()> {
        self.grid.validate()?;
        self.physics.validate()?;
        self.schedule.validate(self.forcing.is_some())?;
        self.output.validate()?;

        let grid = self.grid.grid();
        for (name, cell) in [("Forcing", self.forcing_cell()), ("Probe", self.probe_cell())] {
            if let Some(cell) = cell {
                if !grid.in_bounds(cell) {
                    return Err(anyhow!(
                        "{} position ({}, {}) is outside grid bounds ({}, {})",
                        name,
                        cell.x,
                        cell.y,
                        grid.width,
                        grid.height
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn forcing_cell(&self) -> Option<Cell> {
        let center = self.grid.grid().center();
        self.forcing.as_ref().map(|f| {
            Cell::new(f.x.unwrap_or(center.x), f.y.unwrap_or(center.y))
        })
    }

    pub fn probe_cell(&self) -> Option<Cell> {
        let center = self.grid.grid().center();
        self.probe.as_ref().map(|p| {
            Cell::new(
                p.x.unwrap_or(center.x),
                p.y.unwrap_or(center.y + PROBE_ROW_OFFSET),
            )
        })
    }

    pub fn params(&self) -> SimulationParams {
        SimulationParams {
            dt: self.physics.dt,
            c: self.physics.c,
            damping: self.physics.damping,
            forcing_cell: self.forcing_cell(),
            probe_cell: self.probe_cell(),
        }
    }

    /// Point the forcing at `path`, enabling forcing if it was off.
    pub fn set_forcing_input(&mut self, path: PathBuf) {
        self.forcing.get_or_insert_with(ForcingConfig::default).wav = Some(path);
    }

    /// Load inputs and assemble the runner. Input errors surface here, before
    /// any output file or directory is created.
    pub fn build(&self, cancel: CancelToken) -> Result<Runner<PngFrameWriter>> {
        self.validate()?;

        let forcing = match &self.forcing {
            Some(forcing) => {
                let path = forcing
                    .wav
                    .as_ref()
                    .ok_or_else(|| anyhow!("Forcing is enabled but no input WAV was given"))?;
                let signal = load_pcm16(path)
                    .with_context(|| format!("Failed to load forcing input '{}'", path.display()))?;
                Some(signal)
            }
            None => None,
        };

        let signal = forcing
            .as_ref()
            .map(|s| (s.samples().len(), s.sample_rate()));
        let policy = self.schedule.policy(signal)?;
        let schedule = FrameSchedule::new(policy, self.physics.dt)?;

        let simulation = Simulation::new(
            self.grid.grid(),
            self.params(),
            &self.initial,
            self.physics.stability,
        )?;

        let marker = if self.output.probe_marker {
            self.probe_cell()
        } else {
            None
        };
        let visualiser = WavefieldVisualiser::new(self.output.normalization, self.output.palette)
            .with_marker(marker);
        let frames = PngFrameWriter::new(&self.output.dir, &self.output.frame_prefix)?;

        let mut runner = Runner::new(simulation, schedule, visualiser, frames)
            .with_cancel_token(cancel)
            .emit_initial_frame(self.schedule.emit_initial_frame)
            .checkpoint_audio(self.output.checkpoint_audio);
        if let Some(signal) = forcing {
            runner = runner.with_forcing(Box::new(signal));
        }
        if self.probe.is_some() {
            runner = runner.with_audio_output(Box::new(WavFileWriter::new(self.output.wav_path())));
        }
        Ok(runner)
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        let grid = self.grid.grid();
        let params = self.params();
        info!("=== Simulation Configuration ===");
        info!(
            "Grid: {}x{} (h={}, {} x {})",
            grid.width,
            grid.height,
            grid.h,
            grid.x_coord(grid.width),
            grid.y_coord(grid.height)
        );
        info!(
            "Physics: dt={} s, c={}, damping={}, Courant={:.4}",
            params.dt,
            params.c,
            params
                .damping
                .map_or_else(|| "none".to_string(), |d| d.to_string()),
            params.courant_number(grid.h)
        );
        info!("Initial condition: {:?}", self.initial);
        if let Some(cell) = params.forcing_cell {
            info!("Forcing at ({}, {})", cell.x, cell.y);
        }
        if let Some(cell) = params.probe_cell {
            info!("Probe at ({}, {})", cell.x, cell.y);
        }
        info!(
            "Schedule: fps={}, substeps_per_frame={}, frames={}",
            self.schedule.fps,
            self.schedule
                .substeps_per_frame
                .map_or_else(|| "from fps".to_string(), |n| n.to_string()),
            self.schedule
                .frames
                .map_or_else(|| "from signal".to_string(), |n| n.to_string())
        );
        info!(
            "Output: {}/{}-NNN.png, normalization={}, palette={:?}",
            self.output.dir.display(),
            self.output.frame_prefix,
            self.output.normalization.0,
            self.output.palette
        );
        info!("================================");
    }
}
