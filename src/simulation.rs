use crate::error::{Result, WaveError};
use crate::grid::{clamped_neighbours, Cell, Grid};
use crate::wavefield::{InitialCondition, Wavefield};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Courant limit for the 5-point stencil in two dimensions: c·dt/h <= 1/sqrt(2).
pub const COURANT_LIMIT_2D: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// What to do when c·dt/h exceeds [`COURANT_LIMIT_2D`] before the run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityPolicy {
    /// Run anyway, silently.
    Ignore,
    /// Run anyway, but log the violation.
    #[default]
    Warn,
    /// Refuse to build the simulation.
    Reject,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParams {
    pub dt: f64,                   // Time step per sub-step (seconds)
    pub c: f64,                    // Wave speed
    pub damping: Option<f64>,      // Multiplier applied to displacement each sub-step, in (0, 1]
    pub forcing_cell: Option<Cell>, // Where forcing samples are injected
    pub probe_cell: Option<Cell>,   // Where output audio is read
}

impl SimulationParams {
    pub fn new(dt: f64, c: f64) -> Self {
        Self {
            dt,
            c,
            damping: None,
            forcing_cell: None,
            probe_cell: None,
        }
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = Some(damping);
        self
    }

    pub fn with_forcing_at(mut self, cell: Cell) -> Self {
        self.forcing_cell = Some(cell);
        self
    }

    pub fn with_probe_at(mut self, cell: Cell) -> Self {
        self.probe_cell = Some(cell);
        self
    }

    /// c·dt/h
    pub fn courant_number(&self, h: f64) -> f64 {
        self.c * self.dt / h
    }

    pub fn check_cfl(&self, h: f64) -> bool {
        self.courant_number(h) <= COURANT_LIMIT_2D
    }

    /// Largest dt that keeps the stencil stable for this wave speed and spacing.
    pub fn compute_stable_dt(&self, h: f64) -> f64 {
        COURANT_LIMIT_2D * h / self.c
    }

    fn validate(&self, grid: &Grid) -> Result<()> {
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(WaveError::InvalidConfig(format!(
                "dt must be positive, got {}",
                self.dt
            )));
        }
        if !(self.c > 0.0 && self.c.is_finite()) {
            return Err(WaveError::InvalidConfig(format!(
                "wave speed must be positive, got {}",
                self.c
            )));
        }
        if let Some(d) = self.damping {
            if !(d > 0.0 && d <= 1.0) {
                return Err(WaveError::InvalidConfig(format!(
                    "damping must be in (0, 1], got {}",
                    d
                )));
            }
        }
        for (name, cell) in [("forcing", self.forcing_cell), ("probe", self.probe_cell)] {
            if let Some(cell) = cell {
                if !grid.in_bounds(cell) {
                    return Err(WaveError::InvalidConfig(format!(
                        "{} cell ({}, {}) is outside grid bounds ({}, {})",
                        name, cell.x, cell.y, grid.width, grid.height
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Owned simulation state: geometry, fields, parameters and the sub-step counter.
#[derive(Debug, Clone)]
pub struct Simulation {
    pub grid: Grid,
    pub wavefield: Wavefield,
    pub params: SimulationParams,
    current_substep: usize,
}

impl Simulation {
    pub fn new(
        grid: Grid,
        params: SimulationParams,
        initial: &InitialCondition,
        stability: StabilityPolicy,
    ) -> Result<Self> {
        if grid.width == 0 || grid.height == 0 {
            return Err(WaveError::InvalidConfig(format!(
                "grid dimensions must be positive (width={}, height={})",
                grid.width, grid.height
            )));
        }
        if !(grid.h > 0.0 && grid.h.is_finite()) {
            return Err(WaveError::InvalidConfig(format!(
                "grid spacing must be positive, got {}",
                grid.h
            )));
        }
        params.validate(&grid)?;

        if !params.check_cfl(grid.h) {
            let courant = params.courant_number(grid.h);
            match stability {
                StabilityPolicy::Ignore => {}
                StabilityPolicy::Warn => warn!(
                    courant,
                    limit = COURANT_LIMIT_2D,
                    stable_dt = params.compute_stable_dt(grid.h),
                    "CFL condition violated, the field will diverge"
                ),
                StabilityPolicy::Reject => {
                    return Err(WaveError::Unstable {
                        courant,
                        limit: COURANT_LIMIT_2D,
                    })
                }
            }
        }

        let wavefield = Wavefield::with_initial(&grid, initial)?;
        Ok(Self {
            grid,
            wavefield,
            params,
            current_substep: 0,
        })
    }

    pub fn current_substep(&self) -> usize {
        self.current_substep
    }

    pub fn current_time(&self) -> f64 {
        self.current_substep as f64 * self.params.dt
    }

    /// Advance by one sub-step, injecting `forcing` at the forcing cell first.
    pub fn step(&mut self, forcing: Option<f64>) {
        step(&mut self.wavefield, &self.grid, &self.params, forcing);
        self.current_substep += 1;
    }

    /// Same update as [`Simulation::step`] on a single thread.
    pub fn step_serial(&mut self, forcing: Option<f64>) {
        step_serial(&mut self.wavefield, &self.grid, &self.params, forcing);
        self.current_substep += 1;
    }

    /// Displacement at the probe cell, if one is configured.
    pub fn probe_value(&self) -> Option<f64> {
        self.params
            .probe_cell
            .map(|cell| self.wavefield.displacement_at(cell))
    }
}

/// 5-point Laplacian of `u` at (x, y) with clamped neighbours.
#[inline(always)]
fn laplacian(u: &Array2<f64>, x: usize, y: usize, width: usize, height: usize) -> f64 {
    let (left, right) = clamped_neighbours(x, width);
    let (up, down) = clamped_neighbours(y, height);
    u[[up, x]] + u[[down, x]] + u[[y, left]] + u[[y, right]] - 4.0 * u[[y, x]]
}

fn inject(field: &mut Wavefield, params: &SimulationParams, forcing: Option<f64>) {
    if let (Some(value), Some(cell)) = (forcing, params.forcing_cell) {
        field.displacement[Grid::index(cell)] += value;
    }
}

/// One parallel sub-step.
///
/// Phase A writes only velocity and reads only displacement; phase B writes
/// only displacement. The two `par_for_each` calls are the barrier between
/// them, so no cell ever sees a neighbour that has already moved this step.
pub fn step(field: &mut Wavefield, grid: &Grid, params: &SimulationParams, forcing: Option<f64>) {
    inject(field, params, forcing);

    let (width, height) = (grid.width, grid.height);
    let dt = params.dt;
    let c2 = params.c * params.c;
    let h2 = grid.h * grid.h;

    // Phase A: velocity from the curvature of the pre-step displacement
    let displacement = &field.displacement;
    Zip::indexed(&mut field.velocity).par_for_each(|(y, x), v| {
        *v += dt * c2 * (laplacian(displacement, x, y, width, height) / h2);
    });

    // Phase B: displacement from the updated velocity
    match params.damping {
        Some(damping) => Zip::from(&mut field.displacement)
            .and(&field.velocity)
            .par_for_each(|u, &v| {
                *u += dt * v;
                *u *= damping;
            }),
        None => Zip::from(&mut field.displacement)
            .and(&field.velocity)
            .par_for_each(|u, &v| *u += dt * v),
    }
}

/// Reference single-threaded sub-step, kept bit-for-bit identical to [`step`].
pub fn step_serial(
    field: &mut Wavefield,
    grid: &Grid,
    params: &SimulationParams,
    forcing: Option<f64>,
) {
    inject(field, params, forcing);

    let (width, height) = (grid.width, grid.height);
    let dt = params.dt;
    let c2 = params.c * params.c;
    let h2 = grid.h * grid.h;

    for y in 0..height {
        for x in 0..width {
            let lap = laplacian(&field.displacement, x, y, width, height);
            field.velocity[[y, x]] += dt * c2 * (lap / h2);
        }
    }

    for y in 0..height {
        for x in 0..width {
            let u = &mut field.displacement[[y, x]];
            *u += dt * field.velocity[[y, x]];
            if let Some(damping) = params.damping {
                *u *= damping;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_sim(width: usize, height: usize) -> Simulation {
        Simulation::new(
            Grid::new(width, height, 1.0),
            SimulationParams::new(1.0, 1.0),
            &InitialCondition::Zero,
            StabilityPolicy::Ignore,
        )
        .unwrap()
    }

    #[test]
    fn test_stable_run_stays_finite() {
        let grid = Grid::new(48, 32, 4.0);
        let params = SimulationParams::new(0.01, 89.0);
        assert!(params.check_cfl(grid.h));
        let mut sim = Simulation::new(
            grid,
            params,
            &InitialCondition::gaussian(),
            StabilityPolicy::Reject,
        )
        .unwrap();

        for _ in 0..10_000 {
            sim.step(None);
        }
        assert_eq!(sim.current_substep(), 10_000);
        assert!(sim.wavefield.is_finite());
        // Undamped and reflecting: the pulse neither vanishes nor explodes
        let peak = sim.wavefield.max_abs_displacement();
        assert!(peak > 0.0 && peak < 10.0, "peak = {}", peak);
    }

    #[test]
    fn test_edge_cells_mirror_exterior_neighbour() {
        // Pulse one cell in from the left edge
        let mut sim = unit_sim(5, 3);
        sim.wavefield.displacement[[1, 1]] = 1.0;
        sim.step(None);

        let v = &sim.wavefield.velocity;
        // Pulse cell: four neighbours at 0 -> lap = -4
        assert_eq!(v[[1, 1]], -4.0);
        // Edge cell (0, 1): exterior neighbour is itself (0), right neighbour is the pulse
        assert_eq!(v[[1, 0]], 1.0);
        // Corner (0, 0): only (0, 0)'s exterior copies and zeros, nothing from the pulse
        assert_eq!(v[[0, 0]], 0.0);
        // (1, 0) sits above the pulse
        assert_eq!(v[[0, 1]], 1.0);
        assert!(sim.wavefield.is_finite());
    }

    #[test]
    fn test_uniform_field_is_stationary_at_boundaries() {
        // Zero-gradient boundary: a constant field has zero curvature everywhere
        let mut sim = unit_sim(6, 4);
        sim.wavefield.displacement.fill(0.5);
        sim.step(None);
        assert!(sim.wavefield.velocity.iter().all(|&v| v == 0.0));
        assert!(sim.wavefield.displacement.iter().all(|&u| u == 0.5));
    }

    #[test]
    fn test_velocity_reads_pre_step_displacement() {
        // 3x1 strip, u = [0, 1, 0], v = [1, 0, 0], dt = c = h = 1
        let mut sim = unit_sim(3, 1);
        sim.wavefield.displacement[[0, 1]] = 1.0;
        sim.wavefield.velocity[[0, 0]] = 1.0;
        sim.step(None);

        // Phase A on u = [0, 1, 0]: lap = [1, -2, 1]; v -> [2, -2, 1]
        // Phase B: u -> [2, -1, 1]
        let u: Vec<f64> = sim.wavefield.displacement.iter().copied().collect();
        let v: Vec<f64> = sim.wavefield.velocity.iter().copied().collect();
        assert_eq!(v, vec![2.0, -2.0, 1.0]);
        assert_eq!(u, vec![2.0, -1.0, 1.0]);

        // Displacement first would have given u = [1, 1, 0], lap = [0, -1, 1],
        // v = [1, -1, 1], which differs from the above.
        assert_ne!(v, vec![1.0, -1.0, 1.0]);
    }

    #[test]
    fn test_forcing_lands_before_laplacian() {
        let grid = Grid::new(5, 5, 1.0);
        let center = grid.center();
        let params = SimulationParams::new(0.1, 1.0).with_forcing_at(center);
        let mut sim =
            Simulation::new(grid, params, &InitialCondition::Zero, StabilityPolicy::Reject)
                .unwrap();
        sim.step(Some(2.0));

        // lap at the forced cell = -8, v = 0.1 * -8
        let v = sim.wavefield.velocity[[2, 2]];
        assert!((v - (-0.8)).abs() < 1e-12);
        let u = sim.wavefield.displacement_at(center);
        assert!((u - (2.0 + 0.1 * -0.8)).abs() < 1e-12);
        // Neighbours already picked up velocity in the same sub-step
        assert!((sim.wavefield.velocity[[2, 3]] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_forcing_without_cell_is_ignored() {
        let mut sim = unit_sim(4, 4);
        sim.step(Some(100.0));
        assert_eq!(sim.wavefield.max_abs_displacement(), 0.0);
    }

    #[test]
    fn test_damping_scales_displacement_after_integration() {
        let grid = Grid::new(3, 3, 1.0);
        let params = SimulationParams::new(0.5, 1.0).with_damping(0.5);
        let mut sim =
            Simulation::new(grid, params, &InitialCondition::Zero, StabilityPolicy::Ignore)
                .unwrap();
        sim.wavefield.displacement.fill(1.0);
        sim.wavefield.velocity.fill(2.0);
        sim.step(None);
        // (1 + 0.5 * 2) * 0.5
        assert!(sim.wavefield.displacement.iter().all(|&u| u == 1.0));
        assert!(sim.wavefield.velocity.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_parallel_matches_serial_bit_for_bit() {
        let grid = Grid::new(64, 40, 4.0);
        let params = SimulationParams::new(0.01, 89.0)
            .with_damping(0.999)
            .with_forcing_at(Cell::new(20, 10));
        let initial = InitialCondition::gaussian();
        let mut parallel =
            Simulation::new(grid, params.clone(), &initial, StabilityPolicy::Reject).unwrap();
        let mut serial = Simulation::new(grid, params, &initial, StabilityPolicy::Reject).unwrap();

        for i in 0..200 {
            let f = if i % 3 == 0 { Some(0.25) } else { None };
            parallel.step(f);
            serial.step_serial(f);
        }
        assert_eq!(parallel.wavefield, serial.wavefield);
    }

    #[test]
    fn test_cfl_policy() {
        let grid = Grid::new(10, 10, 1.0);
        let params = SimulationParams::new(1.0, 1.0);
        assert!((params.courant_number(1.0) - 1.0).abs() < 1e-12);
        assert!(!params.check_cfl(1.0));
        assert!((params.compute_stable_dt(1.0) - COURANT_LIMIT_2D).abs() < 1e-12);

        let rejected = Simulation::new(
            grid,
            params.clone(),
            &InitialCondition::Zero,
            StabilityPolicy::Reject,
        );
        assert!(matches!(rejected, Err(WaveError::Unstable { .. })));

        let warned = Simulation::new(grid, params, &InitialCondition::Zero, StabilityPolicy::Warn);
        assert!(warned.is_ok());
    }

    #[test]
    fn test_cells_outside_grid_are_rejected() {
        let grid = Grid::new(10, 10, 1.0);
        let params = SimulationParams::new(0.1, 1.0).with_probe_at(Cell::new(10, 0));
        let result =
            Simulation::new(grid, params, &InitialCondition::Zero, StabilityPolicy::Ignore);
        assert!(matches!(result, Err(WaveError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_damping_is_rejected() {
        let grid = Grid::new(10, 10, 1.0);
        for damping in [0.0, 1.5, -0.1] {
            let params = SimulationParams::new(0.1, 1.0).with_damping(damping);
            let result =
                Simulation::new(grid, params, &InitialCondition::Zero, StabilityPolicy::Ignore);
            assert!(result.is_err(), "damping {} accepted", damping);
        }
    }

    #[test]
    fn test_probe_reads_displacement() {
        let grid = Grid::new(4, 4, 1.0);
        let params = SimulationParams::new(0.1, 1.0).with_probe_at(Cell::new(1, 2));
        let mut sim =
            Simulation::new(grid, params, &InitialCondition::Zero, StabilityPolicy::Ignore)
                .unwrap();
        sim.wavefield.displacement[[2, 1]] = 7.5;
        assert_eq!(sim.probe_value(), Some(7.5));
        assert!((sim.current_time() - 0.0).abs() < f64::EPSILON);
    }
}
