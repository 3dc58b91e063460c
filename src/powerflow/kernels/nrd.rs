use std::time::Instant;

use nalgebra::DVector;
use num_complex::Complex64;
use tracing::debug;

use super::{Injections, KernelResult, KernelSettings, PowerFlowKernel, power_mismatch};
use crate::basic::dsbus_dv::dSbus_dV;
use crate::basic::newtonpf::compute_power;
use crate::basic::solver::{DefaultSolver, Solve};
use crate::basic::sparse::Slice;
use crate::basic::sparse::conj::RealImage;
use crate::basic::system::Admittances;
use crate::powerflow::options::SolverType;

/// Decoupled Newton-Raphson: alternating `dP/dVa` and `dQ/dVm` half-steps
/// with exact Jacobian blocks.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecoupledNewtonKernel;

impl PowerFlowKernel for DecoupledNewtonKernel {
    fn method(&self) -> SolverType {
        SolverType::NewtonRaphsonDecoupled
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
        // the two half-steps have different patterns, so each keeps its own solver
        let mut p_solver = DefaultSolver::default();
        let mut q_solver = DefaultSolver::default();
        let mut v = v0.clone();
        let mut vm = v.map(|e| e.norm());
        let mut va = v.map(|e| e.arg());

        let (_, mut norm_f) = power_mismatch(adm, inj, &v);
        let mut iterations = 0;
        while norm_f > settings.tolerance && iterations < settings.max_iter {
            iterations += 1;

            let i_net = &adm.ybus * &v - &inj.ibus;
            let (_, ds_dva) = dSbus_dV(&adm.ybus, &v, &i_net);
            let j11 = ds_dva.real().select(pvpq, pvpq);
            let mis = compute_power(&adm.ybus, &v, &inj.ibus) - &inj.sbus;
            let mut dp: Vec<f64> = pvpq.iter().map(|i| mis[*i].re).collect();
            if p_solver.solve_csc(&j11, &mut dp).is_err() {
                debug!("decoupled newton: singular P block at iteration {iterations}");
                break;
            }
            for (k, i) in pvpq.iter().enumerate() {
                va[*i] -= dp[k];
            }
            v.zip_zip_apply(&vm, &va, |a, m, t| *a = Complex64::from_polar(m, t));

            if !pq.is_empty() {
                let i_net = &adm.ybus * &v - &inj.ibus;
                let (ds_dvm, _) = dSbus_dV(&adm.ybus, &v, &i_net);
                let j22 = ds_dvm.imag().select(pq, pq);
                let mis = compute_power(&adm.ybus, &v, &inj.ibus) - &inj.sbus;
                let mut dq: Vec<f64> = pq.iter().map(|i| mis[*i].im).collect();
                if q_solver.solve_csc(&j22, &mut dq).is_err() {
                    debug!("decoupled newton: singular Q block at iteration {iterations}");
                    break;
                }
                for (k, i) in pq.iter().enumerate() {
                    vm[*i] -= dq[k];
                }
                v.zip_zip_apply(&vm, &va, |a, m, t| *a = Complex64::from_polar(m, t));
            }

            norm_f = power_mismatch(adm, inj, &v).1;
            debug!("decoupled newton: iteration {iterations}, |F| = {norm_f:e}");
            if !norm_f.is_finite() {
                break;
            }
        }
        KernelResult::finish(adm, inj, v, norm_f <= settings.tolerance, iterations, start)
    }
}
