use serde::{Deserialize, Serialize};

/// Fixed rectangular domain: `width` columns by `height` rows with square cells of side `h`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    pub width: usize,  // Number of cells in x
    pub height: usize, // Number of cells in y
    pub h: f64,        // Spatial step (same in x and y)
}

/// A cell address, `x` along a row and `y` down the columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: usize,
    pub y: usize,
}

impl Cell {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

impl Grid {
    pub fn new(width: usize, height: usize, h: f64) -> Self {
        Grid { width, height, h }
    }

    pub fn cells(&self) -> Option<usize> {
        self.width.checked_mul(self.height)
    }

    pub fn in_bounds(&self, cell: Cell) -> bool {
        cell.x < self.width && cell.y < self.height
    }

    pub fn center(&self) -> Cell {
        Cell::new(self.width / 2, self.height / 2)
    }

    /// Array index for `ndarray` fields, which are stored row-major as `[y, x]`.
    #[inline(always)]
    pub fn index(cell: Cell) -> [usize; 2] {
        [cell.y, cell.x]
    }

    pub fn x_coord(&self, x: usize) -> f64 {
        self.h * x as f64
    }

    pub fn y_coord(&self, y: usize) -> f64 {
        self.h * y as f64
    }
}

/// Neighbour indices `(lower, upper)` of `i` along an axis of length `n`,
/// clamped so that out-of-range neighbours fall back onto `i` itself.
///
/// This is what makes the boundary zero-gradient: an edge cell sees its
/// missing exterior neighbour as a copy of itself.
#[inline(always)]
pub fn clamped_neighbours(i: usize, n: usize) -> (usize, usize) {
    let lower = i.saturating_sub(1);
    let upper = if i + 1 >= n { i } else { i + 1 };
    (lower, upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamped_neighbours_interior() {
        assert_eq!(clamped_neighbours(5, 10), (4, 6));
    }

    #[test]
    fn test_clamped_neighbours_edges() {
        assert_eq!(clamped_neighbours(0, 10), (0, 1));
        assert_eq!(clamped_neighbours(9, 10), (8, 9));
        // Single-cell axis: both neighbours are the cell itself
        assert_eq!(clamped_neighbours(0, 1), (0, 0));
    }

    #[test]
    fn test_bounds_and_center() {
        let grid = Grid::new(1000, 700, 1.0);
        assert_eq!(grid.center(), Cell::new(500, 350));
        assert!(grid.in_bounds(Cell::new(999, 699)));
        assert!(!grid.in_bounds(Cell::new(1000, 0)));
        assert!(!grid.in_bounds(Cell::new(0, 700)));
        assert_eq!(grid.cells(), Some(700_000));
        assert_eq!(Grid::index(Cell::new(3, 7)), [7, 3]);
    }

    #[test]
    fn test_cell_count_overflow() {
        let grid = Grid::new(usize::MAX, 2, 1.0);
        assert_eq!(grid.cells(), None);
    }
}
