//! Least-squares solver interface, used as a black box by polynomial fit.
//!
//! The protocol is initiate → insert rows of `nx + nz` values → finalise,
//! after which the caller reads the solution coefficients and the per-target
//! standard deviation. Implementations may refuse `initiate` (size bounds)
//! or `finalise` (singular system); both are reported as `false` and the
//! caller aborts the fit.

pub trait LeastSquares {
    /// Prepare for a system of `nx` unknowns and `nz` targets. `cascades`
    /// bounds internal refinement passes; 1 is always acceptable.
    fn initiate(&mut self, cascades: usize, nx: usize, nz: usize) -> bool;

    /// Feed one observation row of `nx + nz` values.
    fn insert(&mut self, row: &[f64]) -> bool;

    /// Solve. Returns false when the system is unsolvable.
    fn finalise(&mut self) -> bool;

    /// Solution coefficient `i` of the last solved system.
    fn coeff(&self, i: usize) -> f64;

    /// Standard deviation of target `z` over the fed observations.
    fn std_dev(&self, z: usize) -> f64;
}
