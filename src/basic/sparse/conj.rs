use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;

/// Same sparsity pattern, values passed through `f`.
pub(crate) fn map_values<T: Clone, U>(mat: &CscMatrix<T>, f: impl Fn(T) -> U) -> CscMatrix<U> {
    let values = mat.values().iter().cloned().map(f).collect();
    // a cloned pattern always accepts nnz values
    CscMatrix::try_from_pattern_and_values(mat.pattern().clone(), values)
        .unwrap_or_else(|_| CscMatrix::zeros(mat.nrows(), mat.ncols()))
}

/// Trait for computing the conjugate of a matrix.
pub(crate) trait Conjugate {
    type Mat;

    /// Returns the conjugate of the matrix.
    fn conjugate(&self) -> Self::Mat;

    /// Computes the conjugate of the matrix in-place.
    fn conjugate_mut(&mut self);
}

impl Conjugate for CscMatrix<Complex64> {
    type Mat = CscMatrix<Complex64>;

    fn conjugate(&self) -> Self::Mat {
        map_values(self, |v| v.conj())
    }

    fn conjugate_mut(&mut self) {
        self.values_mut().iter_mut().for_each(|v| *v = v.conj());
    }
}

/// Trait for extracting the real and imaginary parts of a matrix.
pub(crate) trait RealImage {
    type Mat;

    /// Returns the real and imaginary parts of the matrix.
    fn real_imag(&self) -> (Self::Mat, Self::Mat) {
        (self.real(), self.imag())
    }

    /// Returns the real part of the matrix.
    fn real(&self) -> Self::Mat;

    /// Returns the imaginary part of the matrix.
    fn imag(&self) -> Self::Mat;
}

impl RealImage for CscMatrix<Complex64> {
    type Mat = CscMatrix<f64>;

    fn real(&self) -> Self::Mat {
        map_values(self, |v| v.re)
    }

    fn imag(&self) -> Self::Mat {
        map_values(self, |v| v.im)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::CooMatrix;

    fn sample(sign: f64) -> CscMatrix<Complex64> {
        let mut a = CooMatrix::new(6, 6);
        a.push(0, 0, Complex64::new(1.0, -1.0 * sign));
        a.push(2, 1, Complex64::new(3.0, 1.0 * sign));
        a.push(3, 3, Complex64::new(5.0, -2.0 * sign));
        a.push(5, 5, Complex64::new(6.0, -2.2 * sign));
        (&a).into()
    }

    #[test]
    fn test_conj() {
        assert!(sample(1.0).conjugate() == sample(-1.0), "matrices do not match!");
        let mut a = sample(1.0);
        a.conjugate_mut();
        assert!(a == sample(-1.0), "matrices do not match!");
    }

    #[test]
    fn test_real_imag() {
        let (re, im) = sample(1.0).real_imag();
        assert_eq!(re.nnz(), 4);
        assert_eq!(re.values(), &[1.0, 3.0, 5.0, 6.0]);
        assert_eq!(im.values(), &[-1.0, 1.0, -2.0, -2.2]);
    }
}
