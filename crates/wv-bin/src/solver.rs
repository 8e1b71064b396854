//! Demo-grade least-squares solver: normal equations with Gaussian
//! elimination. A windowing frontend would bring its own numerically
//! hardened implementation; this one is good enough to drive polynomial
//! fits over well-conditioned demo data.

use core_surface::LeastSquares;
use tracing::warn;

const NX_MAX: usize = 16;

#[derive(Debug, Default)]
pub struct NormalSolver {
    nx: usize,
    nz: usize,
    /// Normal matrix `AᵀA`, row-major `nx × nx`.
    ata: Vec<f64>,
    /// Right-hand sides `Aᵀz`, `nx × nz`.
    atz: Vec<f64>,
    /// Residual accumulators per target: count, Σz, Σz².
    stats: Vec<(usize, f64, f64)>,
    coeffs: Vec<f64>,
    solved: bool,
}

impl LeastSquares for NormalSolver {
    fn initiate(&mut self, _cascades: usize, nx: usize, nz: usize) -> bool {
        if nx == 0 || nx > NX_MAX || nz == 0 {
            warn!(target: "runtime", nx, nz, "solver geometry rejected");
            return false;
        }
        self.nx = nx;
        self.nz = nz;
        self.ata = vec![0.0; nx * nx];
        self.atz = vec![0.0; nx * nz];
        self.stats = vec![(0, 0.0, 0.0); nz];
        self.coeffs.clear();
        self.solved = false;
        true
    }

    fn insert(&mut self, row: &[f64]) -> bool {
        if row.len() != self.nx + self.nz {
            return false;
        }
        let (a, z) = row.split_at(self.nx);
        for i in 0..self.nx {
            for j in 0..self.nx {
                self.ata[i * self.nx + j] += a[i] * a[j];
            }
            for (k, zk) in z.iter().enumerate() {
                self.atz[i * self.nz + k] += a[i] * zk;
            }
        }
        for (k, zk) in z.iter().enumerate() {
            let s = &mut self.stats[k];
            s.0 += 1;
            s.1 += zk;
            s.2 += zk * zk;
        }
        true
    }

    fn finalise(&mut self) -> bool {
        // Solve (AᵀA) b = Aᵀz for the first target by Gaussian elimination
        // with partial pivoting.
        let n = self.nx;
        let mut m = self.ata.clone();
        let mut b: Vec<f64> = (0..n).map(|i| self.atz[i * self.nz]).collect();
        for col in 0..n {
            let pivot = (col..n)
                .max_by(|&p, &q| {
                    m[p * n + col]
                        .abs()
                        .total_cmp(&m[q * n + col].abs())
                })
                .expect("non-empty pivot range");
            if m[pivot * n + col].abs() < 1e-12 {
                warn!(target: "runtime", col, "normal matrix is singular");
                return false;
            }
            if pivot != col {
                for j in 0..n {
                    m.swap(col * n + j, pivot * n + j);
                }
                b.swap(col, pivot);
            }
            for r in col + 1..n {
                let f = m[r * n + col] / m[col * n + col];
                for j in col..n {
                    m[r * n + j] -= f * m[col * n + j];
                }
                b[r] -= f * b[col];
            }
        }
        for col in (0..n).rev() {
            let mut acc = b[col];
            for j in col + 1..n {
                acc -= m[col * n + j] * b[j];
            }
            b[col] = acc / m[col * n + col];
        }
        self.coeffs = b;
        self.solved = true;
        true
    }

    fn coeff(&self, i: usize) -> f64 {
        if self.solved {
            self.coeffs.get(i).copied().unwrap_or(f64::NAN)
        } else {
            f64::NAN
        }
    }

    fn std_dev(&self, z: usize) -> f64 {
        match self.stats.get(z) {
            Some(&(n, sum, sq)) if n > 1 => {
                let mean = sum / n as f64;
                ((sq / n as f64 - mean * mean).max(0.0)).sqrt()
            }
            _ => f64::NAN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_line_coefficients() {
        let mut s = NormalSolver::default();
        assert!(s.initiate(1, 2, 1));
        // z = 3 + 2x, exact.
        for x in 0..10 {
            let x = x as f64;
            assert!(s.insert(&[1.0, x, 3.0 + 2.0 * x]));
        }
        assert!(s.finalise());
        assert!((s.coeff(0) - 3.0).abs() < 1e-9);
        assert!((s.coeff(1) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn quadratic_fit() {
        let mut s = NormalSolver::default();
        assert!(s.initiate(1, 3, 1));
        for x in -5..=5 {
            let x = x as f64;
            assert!(s.insert(&[1.0, x, x * x, 1.0 - x + 0.5 * x * x]));
        }
        assert!(s.finalise());
        assert!((s.coeff(0) - 1.0).abs() < 1e-9);
        assert!((s.coeff(1) + 1.0).abs() < 1e-9);
        assert!((s.coeff(2) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn singular_system_refused() {
        let mut s = NormalSolver::default();
        assert!(s.initiate(1, 2, 1));
        // Only one distinct abscissa: rank deficient.
        for _ in 0..5 {
            assert!(s.insert(&[1.0, 2.0, 7.0]));
        }
        assert!(!s.finalise());
        assert!(s.coeff(0).is_nan());
    }

    #[test]
    fn std_dev_over_targets() {
        let mut s = NormalSolver::default();
        assert!(s.initiate(1, 1, 1));
        for z in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            assert!(s.insert(&[1.0, z]));
        }
        let _ = s.finalise();
        assert!((s.std_dev(0) - 2.0).abs() < 1e-9);
    }
}
