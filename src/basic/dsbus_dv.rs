use super::sparse::{conj::Conjugate, diagonal};
use nalgebra::*;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;

/// Computes the Jacobian matrices of power injections with respect to voltage magnitudes and angles.
///
/// # Arguments
///
/// * `Ybus` - Nodal admittance matrix.
/// * `v` - Complex bus voltages.
/// * `i_net` - Net current `Ybus * v - Ibus`. Passing the plain `Ybus * v`
///   gives the classic expressions for networks without current injections.
///
/// # Returns
///
/// A tuple `(dS_dVm, dS_dVa)`.
///
/// # Notes
///
/// * This method is from MatPower:
///  R. D. Zimmerman, "AC Power Flows, Generalized OPF Costs and
///  their Derivatives using Complex Matrix Notation", MATPOWER
///  Technical Note 2, February 2010.
#[allow(non_snake_case)]
pub fn dSbus_dV(
    Ybus: &CscMatrix<Complex64>,
    v: &DVector<Complex64>,
    i_net: &DVector<Complex64>,
) -> (CscMatrix<Complex64>, CscMatrix<Complex64>) {
    let vnorm = v.map(|e| if e.norm() > 0.0 { e / e.norm() } else { Complex64::new(1.0, 0.0) });
    let diagV = diagonal(v.as_slice());
    let diagVnorm = diagonal(vnorm.as_slice());
    let diagIbus = diagonal(i_net.as_slice());

    let dS_dVm = &diagV * (Ybus * &diagVnorm).conjugate() + diagIbus.conjugate() * &diagVnorm;
    let dS_dVa = &diagV * (diagIbus - Ybus * &diagV).conjugate() * Complex64::i();
    (dS_dVm, dS_dVa)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra_sparse::CooMatrix;

    fn two_bus() -> CscMatrix<Complex64> {
        let y = Complex64::new(10.0, -30.0);
        let mut coo = CooMatrix::new(2, 2);
        coo.push(0, 0, y);
        coo.push(0, 1, -y);
        coo.push(1, 0, -y);
        coo.push(1, 1, y + Complex64::new(0.0, 0.05));
        CscMatrix::from(&coo)
    }

    fn injections(ybus: &CscMatrix<Complex64>, vm: &[f64], va: &[f64]) -> DVector<Complex64> {
        let v = DVector::from_fn(2, |i, _| Complex64::from_polar(vm[i], va[i]));
        let i = ybus * &v;
        v.component_mul(&i.conjugate())
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let ybus = two_bus();
        let vm = [1.02, 0.97];
        let va = [0.0, -0.08];
        let v = DVector::from_fn(2, |i, _| Complex64::from_polar(vm[i], va[i]));
        let (dvm, dva) = dSbus_dV(&ybus, &v, &(&ybus * &v));
        let (dvm, dva) = (DMatrix::from(&dvm), DMatrix::from(&dva));
        let h = 1e-7;
        for k in 0..2 {
            let mut up = vm;
            up[k] += h;
            let num = (injections(&ybus, &up, &va) - injections(&ybus, &vm, &va)) / Complex64::new(h, 0.0);
            let mut up_a = va;
            up_a[k] += h;
            let num_a = (injections(&ybus, &vm, &up_a) - injections(&ybus, &vm, &va)) / Complex64::new(h, 0.0);
            for r in 0..2 {
                assert_abs_diff_eq!(dvm[(r, k)].re, num[r].re, epsilon = 1e-4);
                assert_abs_diff_eq!(dvm[(r, k)].im, num[r].im, epsilon = 1e-4);
                assert_abs_diff_eq!(dva[(r, k)].re, num_a[r].re, epsilon = 1e-4);
                assert_abs_diff_eq!(dva[(r, k)].im, num_a[r].im, epsilon = 1e-4);
            }
        }
    }
}
