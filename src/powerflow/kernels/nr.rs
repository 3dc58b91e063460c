use std::time::Instant;

use nalgebra::DVector;
use num_complex::Complex64;

use super::{Injections, KernelResult, KernelSettings, PowerFlowKernel};
use crate::basic::newton_pf;
use crate::basic::solver::DefaultSolver;
use crate::basic::system::Admittances;
use crate::powerflow::options::SolverType;

/// Polar Newton-Raphson on the power mismatch.
#[derive(Clone, Copy, Debug, Default)]
pub struct NewtonRaphsonKernel;

impl PowerFlowKernel for NewtonRaphsonKernel {
    fn method(&self) -> SolverType {
        SolverType::NewtonRaphson
    }

    fn solve(
        &self,
        adm: &Admittances,
        inj: &Injections,
        v0: &DVector<Complex64>,
        settings: &KernelSettings,
    ) -> KernelResult {
        let start = Instant::now();
        let mut solver = DefaultSolver::default();
        let out = newton_pf(
            &adm.ybus,
            &inj.sbus,
            &inj.ibus,
            v0,
            inj.pvpq(),
            inj.pq(),
            settings.tolerance,
            settings.max_iter,
            &mut solver,
        );
        KernelResult::finish(adm, inj, out.v, out.converged, out.iterations, start)
    }
}
