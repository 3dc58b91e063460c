use nalgebra_sparse::CscMatrix;

#[cfg(feature = "faer")]
mod faer;
#[cfg(feature = "faer")]
pub use faer::*;

#[cfg(feature = "rsparse")]
mod rsparse;
#[cfg(feature = "rsparse")]
pub use rsparse::*;

#[cfg(feature = "faer")]
pub type DefaultSolver = FaerSolver;

#[cfg(all(not(feature = "faer"), feature = "rsparse"))]
pub type DefaultSolver = RSparseSolver;

#[allow(non_snake_case)]
/// A trait for solving sparse linear systems.
///
/// Implementations may cache a symbolic factorization between calls, so a
/// caller that changes the sparsity pattern must call [`Solve::reset`].
pub trait Solve {
    /// Solves the sparse linear system in place.
    ///
    /// # Parameters
    ///
    /// * `Ap` - Column pointers of the matrix.
    /// * `Ai` - Row indices of the matrix.
    /// * `Ax` - Non-zero values of the matrix.
    /// * `b` - Right-hand side vector, overwritten with the solution.
    /// * `n` - Dimension of the system.
    fn solve(
        &mut self,
        Ap: &mut [usize],
        Ai: &mut [usize],
        Ax: &mut [f64],
        b: &mut [f64],
        n: usize,
    ) -> Result<(), &'static str>;

    /// Drops any cached symbolic analysis.
    fn reset(&mut self) {}

    /// Solves `a x = b` for a square CSC matrix, overwriting `b`.
    fn solve_csc(&mut self, a: &CscMatrix<f64>, b: &mut [f64]) -> Result<(), &'static str> {
        let n = a.nrows();
        if a.ncols() != n || b.len() != n {
            return Err("dimension mismatch in sparse solve");
        }
        if n == 0 {
            return Ok(());
        }
        let (ap, ai, ax) = a.csc_data();
        let mut ap = ap.to_vec();
        let mut ai = ai.to_vec();
        let mut ax = ax.to_vec();
        self.solve(&mut ap, &mut ai, &mut ax, b, n)?;
        if b.iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err("singular matrix")
        }
    }
}

/// One-shot sparse solve with a fresh [`DefaultSolver`].
pub fn solve_sparse(a: &CscMatrix<f64>, b: &mut [f64]) -> Result<(), &'static str> {
    DefaultSolver::default().solve_csc(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra_sparse::CooMatrix;

    #[test]
    fn test_solve_tridiagonal() {
        let n = 5;
        let mut coo = CooMatrix::new(n, n);
        for i in 0..n {
            coo.push(i, i, 4.0);
            if i > 0 {
                coo.push(i, i - 1, -1.0);
                coo.push(i - 1, i, -1.0);
            }
        }
        let a = CscMatrix::from(&coo);
        let x = [1.0, -2.0, 0.5, 3.0, 1.5];
        let mut b = vec![0.0; n];
        for (i, row) in b.iter_mut().enumerate() {
            *row = 4.0 * x[i];
            if i > 0 {
                *row -= x[i - 1];
            }
            if i + 1 < n {
                *row -= x[i + 1];
            }
        }
        let mut solver = DefaultSolver::default();
        solver.solve_csc(&a, &mut b).unwrap();
        for i in 0..n {
            assert_abs_diff_eq!(b[i], x[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_solve_rejects_shape() {
        let a = CscMatrix::from(&CooMatrix::<f64>::new(2, 3));
        let mut b = vec![0.0; 2];
        assert!(solve_sparse(&a, &mut b).is_err());
    }
}
