use crate::error::{Result, WaveError};
use crate::grid::{Cell, Grid};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// How the displacement field is seeded before the first sub-step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitialCondition {
    /// Everything at rest. Used when an external signal drives the run.
    Zero,
    /// `amplitude * exp(-sharpness * r² / spread)` around `center`
    /// (grid midpoint when absent), with `r` measured in cells.
    Gaussian {
        #[serde(default = "default_amplitude")]
        amplitude: f64,
        #[serde(default = "default_sharpness")]
        sharpness: f64,
        #[serde(default = "default_spread")]
        spread: f64,
        #[serde(default)]
        center: Option<Cell>,
    },
}

fn default_amplitude() -> f64 {
    1.0
}

fn default_sharpness() -> f64 {
    6.0
}

fn default_spread() -> f64 {
    10900.0
}

impl Default for InitialCondition {
    fn default() -> Self {
        InitialCondition::gaussian()
    }
}

impl InitialCondition {
    /// Centred pulse with the default shape.
    pub fn gaussian() -> Self {
        InitialCondition::Gaussian {
            amplitude: default_amplitude(),
            sharpness: default_sharpness(),
            spread: default_spread(),
            center: None,
        }
    }

    pub fn value(&self, grid: &Grid, x: usize, y: usize) -> f64 {
        match *self {
            InitialCondition::Zero => 0.0,
            InitialCondition::Gaussian {
                amplitude,
                sharpness,
                spread,
                center,
            } => {
                let (cx, cy) = match center {
                    Some(c) => (c.x as f64, c.y as f64),
                    None => (grid.width as f64 / 2.0, grid.height as f64 / 2.0),
                };
                let r2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                amplitude * (-sharpness * r2 / spread).exp()
            }
        }
    }
}

/// The two simulated fields, both indexed `[y, x]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Wavefield {
    pub displacement: Array2<f64>,
    pub velocity: Array2<f64>,
}

/// Allocate a zeroed `height × width` field, reporting failure instead of aborting.
pub(crate) fn try_zeros(grid: &Grid, what: &'static str) -> Result<Array2<f64>> {
    let cells = grid.cells().ok_or(WaveError::Allocation {
        what,
        cells: usize::MAX,
    })?;
    let mut data: Vec<f64> = Vec::new();
    data.try_reserve_exact(cells)
        .map_err(|_| WaveError::Allocation { what, cells })?;
    data.resize(cells, 0.0);
    Array2::from_shape_vec((grid.height, grid.width), data)
        .map_err(|e| WaveError::InvalidConfig(format!("{} shape: {}", what, e)))
}

impl Wavefield {
    pub fn new(grid: &Grid) -> Result<Self> {
        Ok(Wavefield {
            displacement: try_zeros(grid, "displacement field")?,
            velocity: try_zeros(grid, "velocity field")?,
        })
    }

    /// Allocate both fields and seed the displacement; velocity starts at rest.
    pub fn with_initial(grid: &Grid, initial: &InitialCondition) -> Result<Self> {
        let mut field = Self::new(grid)?;
        if *initial != InitialCondition::Zero {
            Zip::indexed(&mut field.displacement)
                .par_for_each(|(y, x), u| *u = initial.value(grid, x, y));
        }
        Ok(field)
    }

    /// (width, height)
    pub fn dim(&self) -> (usize, usize) {
        let (height, width) = self.displacement.dim();
        (width, height)
    }

    pub fn displacement_at(&self, cell: Cell) -> f64 {
        self.displacement[Grid::index(cell)]
    }

    pub fn is_finite(&self) -> bool {
        self.displacement.iter().all(|v| v.is_finite()) && self.velocity.iter().all(|v| v.is_finite())
    }

    pub fn max_abs_displacement(&self) -> f64 {
        self.displacement.iter().map(|&v| v.abs()).fold(0.0_f64, f64::max)
    }
}
