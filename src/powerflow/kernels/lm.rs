use std::time::Instant;

use nalgebra::DVector;
use num_complex::Complex64;
use tracing::debug;

use super::{Injections, KernelResult, KernelSettings, PowerFlowKernel};
use crate::basic::newtonpf::{assemble_f, build_jacobian, compute_power, inf_norm, update_v};
use crate::basic::solver::{DefaultSolver, Solve};
use crate::basic::sparse::diagonal;
use crate::basic::system::Admittances;
use crate::powerflow::options::SolverType;

/// Levenberg-Marquardt on the power mismatch with Nielsen's damping update.
///
/// Slower than Newton-Raphson on well-conditioned cases, but it keeps making
/// progress where the plain Newton step overshoots.
#[derive(Clone, Copy, Debug, Default)]
pub struct LevenbergMarquardtKernel;

impl PowerFlowKernel for LevenbergMarquardtKernel {
    fn method(&self) -> SolverType {
        SolverType::LevenbergMarquardt
    }

    fn solve(
        &self,
        adm: &Admittances,
        inj: &Injections,
        v0: &DVector<Complex64>,
        settings: &KernelSettings,
    ) -> KernelResult {
        let start = Instant::now();
        let (pvpq, pq) = (inj.pvpq(), inj.pq());
        let n = pvpq.len() + pq.len();
        let mut solver = DefaultSolver::default();
        let mismatch = |v: &DVector<Complex64>| {
            assemble_f(&(compute_power(&adm.ybus, v, &inj.ibus) - &inj.sbus), pvpq, pq)
        };

        let mut v = v0.clone();
        let mut vm = v.map(|e| e.norm());
        let mut va = v.map(|e| e.arg());
        let mut f = mismatch(&v);
        let mut norm_f = inf_norm(&f);
        let mut lambda = 0.0;
        let mut nu = 2.0;
        let mut iterations = 0;

        while norm_f > settings.tolerance && iterations < settings.max_iter {
            iterations += 1;
            let jac = build_jacobian(&adm.ybus, &v, &inj.ibus, pvpq, pq);
            let jt = jac.transpose();
            let h = &jt * &jac;
            if iterations == 1 {
                let max_diag = h
                    .triplet_iter()
                    .filter(|(r, c, _)| r == c)
                    .fold(0.0f64, |acc, (_, _, x)| acc.max(*x));
                lambda = 1e-3 * max_diag;
            }
            let rhs = &jt * &f;
            let a = &h + &diagonal(&vec![lambda; n]);
            let mut dx = rhs.clone();
            if solver.solve_csc(&a, dx.as_mut_slice()).is_err() {
                debug!("levenberg-marquardt: singular system at iteration {iterations}");
                break;
            }

            let (mut vm_new, mut va_new, mut v_new) = (vm.clone(), va.clone(), v.clone());
            update_v(&mut vm_new, &mut va_new, dx.as_slice(), 1.0, pvpq, pq, &mut v_new);
            let f_new = mismatch(&v_new);

            let predicted = 0.5 * dx.dot(&(&dx * lambda + &rhs));
            let actual = 0.5 * (f.norm_squared() - f_new.norm_squared());
            let rho = if predicted > 0.0 { actual / predicted } else { -1.0 };
            if rho >= 0.0 && f_new.iter().all(|x| x.is_finite()) {
                (vm, va, v, f) = (vm_new, va_new, v_new, f_new);
                norm_f = inf_norm(&f);
                lambda *= (1.0f64 / 3.0).max(1.0 - (2.0 * rho - 1.0).powi(3));
                nu = 2.0;
            } else {
                lambda *= nu;
                nu *= 2.0;
            }
            debug!("levenberg-marquardt: iteration {iterations}, lambda = {lambda:e}, |F| = {norm_f:e}");
        }
        KernelResult::finish(adm, inj, v, norm_f <= settings.tolerance, iterations, start)
    }
}
