use std::time::Instant;

use nalgebra::DVector;
use num_complex::Complex64;
use tracing::debug;

use super::{Injections, KernelResult, KernelSettings, PowerFlowKernel};
use crate::basic::solver::{DefaultSolver, Solve};
use crate::basic::sparse::conj::{RealImage, map_values};
use crate::basic::sparse::{Slice, csc_blocks};
use crate::basic::system::Admittances;
use crate::powerflow::options::SolverType;

/// Linearised AC power flow.
///
/// P. Rossoni, W. M. da Rosa, E. A. Belati, "Linearized AC Load Flow Applied
/// to Analysis in Electric Power Systems". One linear solve around the flat
/// profile; PQ magnitudes come out as `1 - x` and angles are measured from the
/// first slack bus.
#[derive(Clone, Copy, Debug, Default)]
pub struct LacpfKernel;

impl PowerFlowKernel for LacpfKernel {
    fn method(&self) -> SolverType {
        SolverType::Lacpf
    }

    fn solve(
        &self,
        adm: &Admittances,
        inj: &Injections,
        v0: &DVector<Complex64>,
        _settings: &KernelSettings,
    ) -> KernelResult {
        let start = Instant::now();
        let (pvpq, pq) = (inj.pvpq(), inj.pq());
        if pvpq.is_empty() {
            return KernelResult::finish(adm, inj, v0.clone(), true, 0, start);
        }
        let (gs, bs) = adm.yseries.real_imag();
        let (g, b) = adm.ybus.real_imag();
        let a11 = bs.select(pvpq, pvpq);
        let a12 = g.select(pvpq, pq);
        let a21 = gs.select(pq, pvpq);
        let a22 = map_values(&b.select(pq, pq), |x| -x);
        let a = csc_blocks(&[&[&a11, &a12], &[&a21, &a22]]);

        let mut x: Vec<f64> = pvpq
            .iter()
            .map(|i| -inj.sbus[*i].re)
            .chain(pq.iter().map(|i| -inj.sbus[*i].im))
            .collect();
        if DefaultSolver::default().solve_csc(&a, &mut x).is_err() {
            debug!("lacpf: singular system");
            return KernelResult::finish(adm, inj, v0.clone(), false, 1, start);
        }

        let npvpq = pvpq.len();
        let reference = inj.vd().first().map_or(0.0, |i| v0[*i].arg());
        let mut vm = v0.map(|e| e.norm());
        let mut va = v0.map(|e| e.arg());
        for (k, i) in pvpq.iter().enumerate() {
            va[*i] = reference + x[k];
        }
        for (k, i) in pq.iter().enumerate() {
            vm[*i] = 1.0 - x[npvpq + k];
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
    fn test_lacpf_two_bus() {
        let (adm, inj, v0) = prepare(&two_bus());
        let lin = LacpfKernel.solve(&adm, &inj, &v0, &settings());
        assert!(lin.converged);
        // -30 th + 10 x = 1 and 10 th + 30 x = 0.2
        assert_abs_diff_eq!(lin.v[1].norm(), 0.984, epsilon = 1e-12);
        assert_abs_diff_eq!(lin.v[1].arg(), -0.028, epsilon = 1e-12);

        let nr = crate::powerflow::kernels::NewtonRaphsonKernel.solve(&adm, &inj, &v0, &settings());
        assert!((lin.v[1] - nr.v[1]).norm() < 5e-3);
    }
}
