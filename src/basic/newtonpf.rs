use super::{dsbus_dv::dSbus_dV, solver::Solve, sparse::Slice};
use crate::basic::sparse::{conj::RealImage, csc_blocks};

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;
use tracing::debug;

/// Computed power `V * conj(Ybus V - Ibus)`.
#[allow(non_snake_case)]
pub fn compute_power(
    Ybus: &CscMatrix<Complex64>,
    v: &DVector<Complex64>,
    ibus: &DVector<Complex64>,
) -> DVector<Complex64> {
    let i_net = Ybus * v - ibus;
    v.component_mul(&i_net.conjugate())
}

/// Stacks `[Re mis[pvpq]; Im mis[pq]]`.
#[inline(always)]
pub fn assemble_f(mis: &DVector<Complex64>, pvpq: &[usize], pq: &[usize]) -> DVector<f64> {
    DVector::from_iterator(
        pvpq.len() + pq.len(),
        pvpq.iter()
            .map(|i| mis[*i].re)
            .chain(pq.iter().map(|i| mis[*i].im)),
    )
}

/// Infinity norm, zero for an empty vector.
#[inline(always)]
pub fn inf_norm(f: &DVector<f64>) -> f64 {
    f.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

/// Polar Jacobian
///
/// ```text
/// | Re dS/dVa[pvpq, pvpq]  Re dS/dVm[pvpq, pq] |
/// | Im dS/dVa[pq, pvpq]    Im dS/dVm[pq, pq]   |
/// ```
#[allow(non_snake_case)]
pub fn build_jacobian(
    Ybus: &CscMatrix<Complex64>,
    v: &DVector<Complex64>,
    ibus: &DVector<Complex64>,
    pvpq: &[usize],
    pq: &[usize],
) -> CscMatrix<f64> {
    let i_net = Ybus * v - ibus;
    let (dS_dVm, dS_dVa) = dSbus_dV(Ybus, v, &i_net);
    let (re_va, im_va) = dS_dVa.real_imag();
    let (re_vm, im_vm) = dS_dVm.real_imag();
    let J11 = re_va.select(pvpq, pvpq);
    let J12 = re_vm.select(pvpq, pq);
    let J21 = im_va.select(pq, pvpq);
    let J22 = im_vm.select(pq, pq);
    csc_blocks(&[&[&J11, &J12], &[&J21, &J22]])
}

/// Applies `x -= mu * dx` to the polar state and rebuilds `v`.
#[inline(always)]
pub fn update_v(
    v_m: &mut DVector<f64>,
    v_a: &mut DVector<f64>,
    dx: &[f64],
    mu: f64,
    pvpq: &[usize],
    pq: &[usize],
    v: &mut DVector<Complex64>,
) {
    let npvpq = pvpq.len();
    for (k, i) in pvpq.iter().enumerate() {
        v_a[*i] -= mu * dx[k];
    }
    for (k, i) in pq.iter().enumerate() {
        v_m[*i] -= mu * dx[npvpq + k];
    }
    v.zip_zip_apply(v_m, v_a, |a, vm, va| *a = Complex64::from_polar(vm, va));
}

/// Outcome of a Newton run.
#[derive(Clone, Debug)]
pub struct NewtonOutcome {
    pub v: DVector<Complex64>,
    pub converged: bool,
    pub norm_f: f64,
    pub iterations: usize,
}

/// Full Newton-Raphson power flow in polar form.
///
/// Slack buses are every bus absent from `pvpq`; their voltage is never
/// touched. The state is `[Va[pvpq]; Vm[pq]]` and convergence is declared on
/// the infinity norm of the mismatch. A failed factorisation ends the run as
/// not converged.
#[allow(non_snake_case)]
pub fn newton_pf<Solver: Solve>(
    Ybus: &CscMatrix<Complex64>,
    Sbus: &DVector<Complex64>,
    Ibus: &DVector<Complex64>,
    v_init: &DVector<Complex64>,
    pvpq: &[usize],
    pq: &[usize],
    tolerance: f64,
    max_iter: usize,
    solver: &mut Solver,
) -> NewtonOutcome {
    let mut v = v_init.clone();
    let mut v_m = v.map(|e| e.norm());
    let mut v_a = v.map(|e| e.arg());

    let mis = compute_power(Ybus, &v, Ibus) - Sbus;
    let mut F = assemble_f(&mis, pvpq, pq);
    let mut norm_f = inf_norm(&F);
    let mut iterations = 0;

    while norm_f > tolerance && iterations < max_iter {
        let jacobian = build_jacobian(Ybus, &v, Ibus, pvpq, pq);
        if let Err(e) = solver.solve_csc(&jacobian, F.as_mut_slice()) {
            debug!("newton: linear solve failed at iteration {iterations}: {e}");
            break;
        }
        update_v(&mut v_m, &mut v_a, F.as_slice(), 1.0, pvpq, pq, &mut v);

        let mis = compute_power(Ybus, &v, Ibus) - Sbus;
        F = assemble_f(&mis, pvpq, pq);
        norm_f = inf_norm(&F);
        iterations += 1;
        debug!("newton: iteration {iterations}, |F| = {norm_f:e}");
        if !norm_f.is_finite() {
            break;
        }
    }

    NewtonOutcome {
        v,
        converged: norm_f <= tolerance,
        norm_f,
        iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::solver::DefaultSolver;
    use approx::assert_abs_diff_eq;
    use nalgebra_sparse::CooMatrix;

    fn two_bus_ybus() -> CscMatrix<Complex64> {
        let y = Complex64::new(10.0, -30.0);
        let mut coo = CooMatrix::new(2, 2);
        coo.push(0, 0, y);
        coo.push(0, 1, -y);
        coo.push(1, 0, -y);
        coo.push(1, 1, y);
        CscMatrix::from(&coo)
    }

    #[test]
    fn test_newton_two_bus() {
        let ybus = two_bus_ybus();
        let sbus = DVector::from_vec(vec![Complex64::new(0.0, 0.0), Complex64::new(-1.0, -0.2)]);
        let ibus = DVector::from_element(2, Complex64::new(0.0, 0.0));
        let v0 = DVector::from_element(2, Complex64::new(1.0, 0.0));
        let out = newton_pf(&ybus, &sbus, &ibus, &v0, &[1], &[1], 1e-8, 10, &mut DefaultSolver::default());
        assert!(out.converged);
        assert!(out.iterations < 10);
        assert_eq!(out.v[0], Complex64::new(1.0, 0.0));
        let vm = out.v[1].norm();
        assert!(vm > 0.9 && vm < 1.0, "|V1| = {vm}");
        let s = compute_power(&ybus, &out.v, &ibus);
        assert_abs_diff_eq!(s[1].re, -1.0, epsilon = 1e-7);
        assert_abs_diff_eq!(s[1].im, -0.2, epsilon = 1e-7);
    }

    #[test]
    fn test_jacobian_shape() {
        let ybus = two_bus_ybus();
        let v = DVector::from_element(2, Complex64::new(1.0, 0.0));
        let ibus = DVector::from_element(2, Complex64::new(0.0, 0.0));
        let j = build_jacobian(&ybus, &v, &ibus, &[1], &[1]);
        assert_eq!((j.nrows(), j.ncols()), (2, 2));
        let j = build_jacobian(&ybus, &v, &ibus, &[1], &[]);
        assert_eq!((j.nrows(), j.ncols()), (1, 1));
    }
}
