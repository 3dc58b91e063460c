use std::time::Instant;

use nalgebra::DVector;
use num_complex::Complex64;
use tracing::debug;

use super::{Injections, KernelResult, KernelSettings, PowerFlowKernel, power_mismatch};
use crate::basic::newtonpf::compute_power;
use crate::basic::solver::{DefaultSolver, Solve};
use crate::basic::sparse::Slice;
use crate::basic::system::Admittances;
use crate::powerflow::options::SolverType;

/// Fast-decoupled power flow, XB scheme (`B'` without resistance and shunts,
/// `B''` without phase shifts).
#[derive(Clone, Copy, Debug, Default)]
pub struct FastDecoupledKernel;

impl PowerFlowKernel for FastDecoupledKernel {
    fn method(&self) -> SolverType {
        SolverType::FastDecoupled
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
        let b1 = adm.b1.select(pvpq, pvpq);
        let b2 = adm.b2.select(pq, pq);
        let mut p_solver = DefaultSolver::default();
        let mut q_solver = DefaultSolver::default();

        let mut v = v0.clone();
        let mut vm = v.map(|e| e.norm());
        let mut va = v.map(|e| e.arg());
        let (_, mut norm_f) = power_mismatch(adm, inj, &v);
        let mut iterations = 0;

        while norm_f > settings.tolerance && iterations < settings.max_iter {
            iterations += 1;

            let mis = compute_power(&adm.ybus, &v, &inj.ibus) - &inj.sbus;
            let mut dva: Vec<f64> = pvpq.iter().map(|i| mis[*i].re / vm[*i]).collect();
            if p_solver.solve_csc(&b1, &mut dva).is_err() {
                debug!("fast decoupled: singular B' matrix");
                break;
            }
            for (k, i) in pvpq.iter().enumerate() {
                va[*i] -= dva[k];
            }
            v.zip_zip_apply(&vm, &va, |a, m, t| *a = Complex64::from_polar(m, t));

            if !pq.is_empty() {
                let mis = compute_power(&adm.ybus, &v, &inj.ibus) - &inj.sbus;
                let mut dvm: Vec<f64> = pq.iter().map(|i| mis[*i].im / vm[*i]).collect();
                if q_solver.solve_csc(&b2, &mut dvm).is_err() {
                    debug!("fast decoupled: singular B'' matrix");
                    break;
                }
                for (k, i) in pq.iter().enumerate() {
                    vm[*i] -= dvm[k];
                }
                v.zip_zip_apply(&vm, &va, |a, m, t| *a = Complex64::from_polar(m, t));
            }

            norm_f = power_mismatch(adm, inj, &v).1;
            debug!("fast decoupled: iteration {iterations}, |F| = {norm_f:e}");
            if !norm_f.is_finite() {
                break;
            }
        }
        KernelResult::finish(adm, inj, v, norm_f <= settings.tolerance, iterations, start)
    }
}
