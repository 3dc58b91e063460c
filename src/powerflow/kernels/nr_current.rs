use std::time::Instant;

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;
use tracing::debug;

use super::{Injections, KernelResult, KernelSettings, PowerFlowKernel, power_mismatch};
use crate::basic::dsbus_dv::dSbus_dV;
use crate::basic::newtonpf::{assemble_f, inf_norm, update_v};
use crate::basic::solver::{DefaultSolver, Solve};
use crate::basic::sparse::conj::RealImage;
use crate::basic::sparse::{Slice, csc_blocks, diagonal};
use crate::basic::system::Admittances;
use crate::powerflow::options::SolverType;

const MAX_BACKTRACKS: usize = 10;
const MIN_STEP: f64 = 0.01;
const STEP_SHRINK: f64 = 0.25;
const ARMIJO: f64 = 1e-4;

/// Newton-Raphson on the current mismatch with a backtracking line search.
///
/// PQ rows use the complex current mismatch `Icalc - conj(S / V)`. PV rows
/// carry no reactive equation, so they use the active power mismatch scaled
/// by `1 / |V|`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NewtonRaphsonCurrentKernel;

struct CurrentMismatch<'a> {
    adm: &'a Admittances,
    inj: &'a Injections,
    /// `1 / |V|` on PV buses, zero elsewhere.
    pv_weight: DVector<f64>,
    is_pq: Vec<bool>,
}

impl<'a> CurrentMismatch<'a> {
    fn new(adm: &'a Admittances, inj: &'a Injections, vm: &DVector<f64>) -> Self {
        let n = vm.len();
        let mut pv_weight = DVector::zeros(n);
        for i in inj.pv() {
            pv_weight[*i] = 1.0 / vm[*i];
        }
        let mut is_pq = vec![false; n];
        for i in inj.pq() {
            is_pq[*i] = true;
        }
        Self {
            adm,
            inj,
            pv_weight,
            is_pq,
        }
    }

    fn pq_mask(&self) -> DVector<Complex64> {
        DVector::from_iterator(
            self.is_pq.len(),
            self.is_pq
                .iter()
                .map(|q| Complex64::new(if *q { 1.0 } else { 0.0 }, 0.0)),
        )
    }

    fn specified_current(&self, v: &DVector<Complex64>) -> DVector<Complex64> {
        self.inj.sbus.zip_map(v, |s, v| (s / v).conj())
    }

    fn residual(&self, v: &DVector<Complex64>) -> DVector<f64> {
        let i_calc = &self.adm.ybus * v - &self.inj.ibus;
        let i_spec = self.specified_current(v);
        let mut mixed = DVector::from_element(v.len(), Complex64::new(0.0, 0.0));
        for i in 0..v.len() {
            if self.is_pq[i] {
                mixed[i] = i_calc[i] - i_spec[i];
            } else if self.pv_weight[i] != 0.0 {
                let dp = (v[i] * i_calc[i].conj() - self.inj.sbus[i]).re;
                mixed[i] = Complex64::new(dp * self.pv_weight[i], 0.0);
            }
        }
        assemble_f(&mixed, self.inj.pvpq(), self.inj.pq())
    }

    fn jacobian(&self, v: &DVector<Complex64>) -> CscMatrix<f64> {
        let (pvpq, pq) = (self.inj.pvpq(), self.inj.pq());
        let ybus = &self.adm.ybus;
        let i_net = ybus * v - &self.inj.ibus;
        let (ds_dvm, ds_dva) = dSbus_dV(ybus, v, &i_net);

        let vnorm = v.map(|e| e / e.norm());
        let i_spec = self.specified_current(v);
        let vm = v.map(|e| e.norm());
        let di_dva = ybus * &diagonal(v.map(|e| e * Complex64::i()).as_slice())
            - diagonal(i_spec.map(|i| i * Complex64::i()).as_slice());
        let di_dvm = ybus * &diagonal(vnorm.as_slice())
            + diagonal(i_spec.zip_map(&vm, |i, m| i / m).as_slice());

        let pv_rows = diagonal(self.pv_weight.map(|w| Complex64::new(w, 0.0)).as_slice());
        let pq_rows = diagonal(self.pq_mask().as_slice());
        let m_va = &pv_rows * &ds_dva + &pq_rows * &di_dva;
        let m_vm = &pv_rows * &ds_dvm + &pq_rows * &di_dvm;

        let (re_va, im_va) = m_va.real_imag();
        let (re_vm, im_vm) = m_vm.real_imag();
        csc_blocks(&[
            &[&re_va.select(pvpq, pvpq), &re_vm.select(pvpq, pq)],
            &[&im_va.select(pq, pvpq), &im_vm.select(pq, pq)],
        ])
    }
}

impl PowerFlowKernel for NewtonRaphsonCurrentKernel {
    fn method(&self) -> SolverType {
        SolverType::NewtonRaphsonCurrent
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
        let mut solver = DefaultSolver::default();
        let mut v = v0.clone();
        let mut vm = v.map(|e| e.norm());
        let mut va = v.map(|e| e.arg());
        let system = CurrentMismatch::new(adm, inj, &vm);

        let mut f = system.residual(&v);
        let mut norm_f = inf_norm(&f);
        let mut power_norm = power_mismatch(adm, inj, &v).1;
        let mut iterations = 0;
        while power_norm > settings.tolerance && iterations < settings.max_iter {
            iterations += 1;
            let jac = system.jacobian(&v);
            let mut dx = f.clone();
            if solver.solve_csc(&jac, dx.as_mut_slice()).is_err() {
                debug!("current newton: singular Jacobian at iteration {iterations}");
                break;
            }

            let mut mu = 1.0;
            let mut tries = 0;
            let (vm_new, va_new, v_new, f_new) = loop {
                let (mut vm_t, mut va_t, mut v_t) = (vm.clone(), va.clone(), v.clone());
                update_v(&mut vm_t, &mut va_t, dx.as_slice(), mu, pvpq, pq, &mut v_t);
                let f_t = system.residual(&v_t);
                let norm_t = inf_norm(&f_t);
                let sufficient = norm_t.is_finite() && norm_t < (1.0 - ARMIJO * mu) * norm_f;
                if sufficient || tries >= MAX_BACKTRACKS || mu * STEP_SHRINK < MIN_STEP {
                    break (vm_t, va_t, v_t, f_t);
                }
                mu *= STEP_SHRINK;
                tries += 1;
            };
            (vm, va, v, f) = (vm_new, va_new, v_new, f_new);
            norm_f = inf_norm(&f);
            power_norm = power_mismatch(adm, inj, &v).1;
            debug!("current newton: iteration {iterations}, mu = {mu}, |dI| = {norm_f:e}, |dS| = {power_norm:e}");
            if !power_norm.is_finite() {
                break;
            }
        }

        // judged on the power mismatch like every other method
        KernelResult::finish(adm, inj, v, power_norm <= settings.tolerance, iterations, start)
    }
}
