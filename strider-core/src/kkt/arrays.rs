//! Array-of-stages containers for the event-aware grid.
//!
//! One slot per regular grid stage (terminal included) plus side arrays
//! indexed by impulse, aux (post-impulse), and lift event. All slots are
//! allocated at construction; events only select which side slots are live.

use std::ops::{Index, IndexMut};

use crate::robot::RobotModel;

use super::{SplitDirection, SplitKktMatrix, SplitKktResidual, SplitSolution};

/// Stage array with impulse/aux/lift side arrays.
#[derive(Debug, Clone)]
pub struct HybridArray<T> {
    /// Regular grid stages `0..=N`.
    pub grid: Vec<T>,
    /// Impulse stages, by impulse index.
    pub impulse: Vec<T>,
    /// Post-impulse (aux) stages, by impulse index.
    pub aux: Vec<T>,
    /// Lift stages, by lift index.
    pub lift: Vec<T>,
}

impl<T> HybridArray<T> {
    /// Builds `n + 1` grid slots and `max_events` slots in each side array.
    pub fn generate(n: usize, max_events: usize, mut make: impl FnMut() -> T) -> Self {
        Self {
            grid: (0..=n).map(|_| make()).collect(),
            impulse: (0..max_events).map(|_| make()).collect(),
            aux: (0..max_events).map(|_| make()).collect(),
            lift: (0..max_events).map(|_| make()).collect(),
        }
    }

    /// Number of regular grid slots (`N + 1`).
    pub fn num_grid(&self) -> usize {
        self.grid.len()
    }
}

impl<T> Index<usize> for HybridArray<T> {
    type Output = T;

    fn index(&self, i: usize) -> &T {
        &self.grid[i]
    }
}

impl<T> IndexMut<usize> for HybridArray<T> {
    fn index_mut(&mut self, i: usize) -> &mut T {
        &mut self.grid[i]
    }
}

/// Trajectory solution over the event-aware grid.
pub type Solution = HybridArray<SplitSolution>;
/// Newton direction over the event-aware grid.
pub type Direction = HybridArray<SplitDirection>;
/// KKT matrices over the event-aware grid.
pub type KktMatrix = HybridArray<SplitKktMatrix>;
/// KKT residuals over the event-aware grid.
pub type KktResidual = HybridArray<SplitKktResidual>;

impl Solution {
    pub fn new(robot: &dyn RobotModel, n: usize, max_events: usize) -> Self {
        HybridArray::generate(n, max_events, || SplitSolution::new(robot))
    }
}

impl Direction {
    pub fn new(robot: &dyn RobotModel, n: usize, max_events: usize) -> Self {
        HybridArray::generate(n, max_events, || SplitDirection::new(robot))
    }
}

impl KktMatrix {
    pub fn new(robot: &dyn RobotModel, n: usize, max_events: usize) -> Self {
        HybridArray::generate(n, max_events, || SplitKktMatrix::new(robot))
    }
}

impl KktResidual {
    pub fn new(robot: &dyn RobotModel, n: usize, max_events: usize) -> Self {
        HybridArray::generate(n, max_events, || SplitKktResidual::new(robot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::LinearChainModel;

    #[test]
    fn test_generate_sizes() {
        let robot = LinearChainModel::new(2);
        let s = Solution::new(&robot, 10, 3);
        assert_eq!(s.num_grid(), 11);
        assert_eq!(s.impulse.len(), 3);
        assert_eq!(s.aux.len(), 3);
        assert_eq!(s.lift.len(), 3);
    }
}
