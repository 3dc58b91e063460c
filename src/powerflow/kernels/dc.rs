use std::time::Instant;

use nalgebra::DVector;
use num_complex::Complex64;
use tracing::debug;

use super::{Injections, KernelResult, KernelSettings, PowerFlowKernel};
use crate::basic::solver::{DefaultSolver, Solve};
use crate::basic::sparse::Slice;
use crate::basic::system::Admittances;
use crate::powerflow::options::SolverType;

/// Linear DC power flow: angles from `Bbus`, magnitudes held at `|V0|`.
///
/// There is nothing to iterate, so a successful solve is always reported as
/// converged; `norm_f` still carries the AC mismatch of the result.
#[derive(Clone, Copy, Debug, Default)]
pub struct DcKernel;

impl PowerFlowKernel for DcKernel {
    fn method(&self) -> SolverType {
        SolverType::Dc
    }

    fn solve(
        &self,
        adm: &Admittances,
        inj: &Injections,
        v0: &DVector<Complex64>,
        _settings: &KernelSettings,
    ) -> KernelResult {
        let start = Instant::now();
        let (pqpv, vd) = (inj.pvpq(), inj.vd());
        let vm = v0.map(|e| e.norm());
        let mut va = v0.map(|e| e.arg());

        let b_red = adm.bbus.select(pqpv, pqpv);
        let b_slack = adm.bbus.select(pqpv, vd);
        let va_slack = DVector::from_iterator(vd.len(), vd.iter().map(|i| va[*i]));
        let coupling = &b_slack * &va_slack;
        let mut theta: Vec<f64> = pqpv
            .iter()
            .enumerate()
            .map(|(k, i)| inj.sbus[*i].re - coupling[k] + adm.pps[*i])
            .collect();
        if DefaultSolver::default().solve_csc(&b_red, &mut theta).is_err() {
            debug!("dc: singular Bbus");
            return KernelResult::finish(adm, inj, v0.clone(), false, 1, start);
        }
        for (k, i) in pqpv.iter().enumerate() {
            va[*i] = theta[k];
        }
        let v = vm.zip_map(&va, Complex64::from_polar);
        KernelResult::finish(adm, inj, v, true, 1, start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::powerflow::kernels::test_grids::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_dc_two_bus_angle() {
        let (adm, inj, v0) = prepare(&two_bus());
        let res = DcKernel.solve(&adm, &inj, &v0, &settings());
        assert!(res.converged);
        // theta = P x with x taken from the series impedance
        let z = Complex64::new(1.0, 0.0) / Complex64::new(10.0, -30.0);
        assert_abs_diff_eq!(res.v[1].arg(), -1.0 * z.im, epsilon = 1e-12);
        assert_abs_diff_eq!(res.v[1].norm(), 1.0, epsilon = 1e-12);
        assert!(res.norm_f > 0.0);
    }
}
