//! Numerical power-flow methods behind a common trait.

use std::time::{Duration, Instant};

use nalgebra::DVector;
use num_complex::Complex64;

use super::options::SolverType;
use crate::basic::newtonpf::{assemble_f, compute_power, inf_norm};
use crate::basic::system::{Admittances, BusIndices};

mod dc;
mod fdpf;
mod helm;
mod iwamoto;
mod lacpf;
mod lm;
mod nr;
mod nr_current;
mod nrd;

pub use dc::DcKernel;
pub use fdpf::FastDecoupledKernel;
pub use helm::HelmKernel;
pub use iwamoto::IwamotoKernel;
pub use lacpf::LacpfKernel;
pub use lm::LevenbergMarquardtKernel;
pub use nr::NewtonRaphsonKernel;
pub use nr_current::NewtonRaphsonCurrentKernel;
pub use nrd::DecoupledNewtonKernel;

/// Specified injections and the bus partition of one solve.
#[derive(Clone, Debug)]
pub struct Injections {
    pub sbus: DVector<Complex64>,
    pub ibus: DVector<Complex64>,
    pub indices: BusIndices,
}

impl Injections {
    pub fn pvpq(&self) -> &[usize] {
        &self.indices.pqpv
    }

    pub fn pq(&self) -> &[usize] {
        &self.indices.pq
    }

    pub fn pv(&self) -> &[usize] {
        &self.indices.pv
    }

    pub fn vd(&self) -> &[usize] {
        &self.indices.vd
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KernelSettings {
    pub tolerance: f64,
    pub max_iter: usize,
}

/// What a kernel hands back, converged or not.
#[derive(Clone, Debug)]
pub struct KernelResult {
    pub v: DVector<Complex64>,
    pub converged: bool,
    /// Infinity norm of the power mismatch at `v`.
    pub norm_f: f64,
    /// Computed power `V * conj(Ybus V - Ibus)`.
    pub scalc: DVector<Complex64>,
    pub iterations: usize,
    pub elapsed: Duration,
}

impl KernelResult {
    /// Wraps a final voltage, recomputing `scalc` and `norm_f` from it.
    pub(crate) fn finish(
        adm: &Admittances,
        inj: &Injections,
        v: DVector<Complex64>,
        converged: bool,
        iterations: usize,
        start: Instant,
    ) -> Self {
        let (scalc, norm_f) = power_mismatch(adm, inj, &v);
        Self {
            v,
            converged,
            norm_f,
            scalc,
            iterations,
            elapsed: start.elapsed(),
        }
    }
}

/// Computed power and the infinity norm of `[dP[pvpq], dQ[pq]]`.
pub(crate) fn power_mismatch(
    adm: &Admittances,
    inj: &Injections,
    v: &DVector<Complex64>,
) -> (DVector<Complex64>, f64) {
    let scalc = compute_power(&adm.ybus, v, &inj.ibus);
    let mis = &scalc - &inj.sbus;
    let norm_f = inf_norm(&assemble_f(&mis, inj.pvpq(), inj.pq()));
    (scalc, norm_f)
}

/// A power-flow method.
///
/// Kernels never fail: a diverging or singular run is reported with
/// `converged = false` so the dispatcher can try another method.
pub trait PowerFlowKernel: Send + Sync {
    fn method(&self) -> SolverType;

    fn solve(
        &self,
        adm: &Admittances,
        inj: &Injections,
        v0: &DVector<Complex64>,
        settings: &KernelSettings,
    ) -> KernelResult;
}

/// Kernels available to the dispatcher, keyed by method.
pub struct KernelSet {
    kernels: Vec<Box<dyn PowerFlowKernel>>,
}

impl Default for KernelSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl KernelSet {
    pub fn empty() -> Self {
        Self {
            kernels: Vec::new(),
        }
    }

    /// Every method shipped with the crate.
    pub fn standard() -> Self {
        Self::empty()
            .with(NewtonRaphsonKernel)
            .with(NewtonRaphsonCurrentKernel)
            .with(DecoupledNewtonKernel)
            .with(IwamotoKernel)
            .with(LevenbergMarquardtKernel)
            .with(HelmKernel)
            .with(DcKernel)
            .with(FastDecoupledKernel)
            .with(LacpfKernel)
    }

    /// Registers a kernel, replacing any previous one for the same method.
    pub fn with(mut self, kernel: impl PowerFlowKernel + 'static) -> Self {
        self.register(Box::new(kernel));
        self
    }

    pub fn register(&mut self, kernel: Box<dyn PowerFlowKernel>) {
        let method = kernel.method();
        self.kernels.retain(|k| k.method() != method);
        self.kernels.push(kernel);
    }

    pub fn get(&self, method: SolverType) -> Option<&dyn PowerFlowKernel> {
        self.kernels
            .iter()
            .find(|k| k.method() == method)
            .map(|k| k.as_ref())
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::test_grids::*;
    use super::*;
    use approx::assert_abs_diff_eq;

    fn check_ac_solution(kernel: &dyn PowerFlowKernel) {
        let (adm, inj, v0) = prepare(&five_bus());
        let res = kernel.solve(&adm, &inj, &v0, &settings());
        assert!(res.converged, "{:?} did not converge: {:e}", kernel.method(), res.norm_f);
        assert!(res.norm_f <= 1e-8);
        assert_abs_diff_eq!(res.v[0].norm(), 1.02, epsilon = 1e-12);
        assert_abs_diff_eq!(res.v[2].norm(), 1.01, epsilon = 1e-6);
        for i in [1, 3, 4] {
            assert_abs_diff_eq!(res.scalc[i].re, inj.sbus[i].re, epsilon = 1e-7);
            assert_abs_diff_eq!(res.scalc[i].im, inj.sbus[i].im, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_ac_kernels_agree() {
        let reference = {
            let (adm, inj, v0) = prepare(&five_bus());
            NewtonRaphsonKernel.solve(&adm, &inj, &v0, &settings()).v
        };
        let set = KernelSet::standard();
        for method in [
            SolverType::NewtonRaphson,
            SolverType::NewtonRaphsonCurrent,
            SolverType::NewtonRaphsonDecoupled,
            SolverType::Iwamoto,
            SolverType::LevenbergMarquardt,
            SolverType::FastDecoupled,
            SolverType::Helm,
        ] {
            let kernel = set.get(method).unwrap();
            check_ac_solution(kernel);
            let (adm, inj, v0) = prepare(&five_bus());
            let v = kernel.solve(&adm, &inj, &v0, &settings()).v;
            for i in 0..5 {
                assert_abs_diff_eq!(v[i].re, reference[i].re, epsilon = 1e-6);
                assert_abs_diff_eq!(v[i].im, reference[i].im, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_two_bus_newton() {
        let (adm, inj, v0) = prepare(&two_bus());
        let res = NewtonRaphsonKernel.solve(&adm, &inj, &v0, &settings());
        assert!(res.converged);
        assert!(res.iterations < 10);
        let vm = res.v[1].norm();
        assert!(vm > 0.9 && vm < 1.0);
        assert_abs_diff_eq!(res.scalc[1].re, -1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(res.scalc[1].im, -0.2, epsilon = 1e-8);
    }

    #[test]
    fn test_kernel_set_replaces_by_method() {
        let set = KernelSet::empty().with(NewtonRaphsonKernel).with(NewtonRaphsonKernel);
        assert_eq!(set.len(), 1);
        assert!(set.get(SolverType::Helm).is_none());
        assert_eq!(KernelSet::standard().len(), 9);
    }
}
