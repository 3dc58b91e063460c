use std::f64::consts::PI;
use std::time::Instant;

use nalgebra::DVector;
use num_complex::Complex64;
use tracing::debug;

use super::{Injections, KernelResult, KernelSettings, PowerFlowKernel};
use crate::basic::newtonpf::{assemble_f, build_jacobian, compute_power, inf_norm, update_v};
use crate::basic::solver::{DefaultSolver, Solve};
use crate::basic::system::Admittances;
use crate::powerflow::options::SolverType;

/// Newton-Raphson with Iwamoto's optimal step multiplier.
///
/// S. Iwamoto, Y. Tamura, "A load flow calculation method for ill-conditioned
/// power systems", IEEE Trans. PAS-100, 1981.
#[derive(Clone, Copy, Debug, Default)]
pub struct IwamotoKernel;

/// Real roots of `a3 x^3 + a2 x^2 + a1 x + a0`.
pub(crate) fn real_cubic_roots(a3: f64, a2: f64, a1: f64, a0: f64) -> Vec<f64> {
    let scale = a2.abs().max(a1.abs()).max(a0.abs());
    if a3.abs() <= 1e-12 * scale {
        if a2.abs() <= 1e-12 * scale {
            return if a1 != 0.0 { vec![-a0 / a1] } else { Vec::new() };
        }
        let disc = a1 * a1 - 4.0 * a2 * a0;
        if disc < 0.0 {
            return Vec::new();
        }
        let s = disc.sqrt();
        return vec![(-a1 + s) / (2.0 * a2), (-a1 - s) / (2.0 * a2)];
    }
    let (b, c, d) = (a2 / a3, a1 / a3, a0 / a3);
    let shift = -b / 3.0;
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let disc = (q / 2.0).powi(2) + (p / 3.0).powi(3);
    if disc > 0.0 {
        let s = disc.sqrt();
        vec![(-q / 2.0 + s).cbrt() + (-q / 2.0 - s).cbrt() + shift]
    } else if p == 0.0 {
        vec![shift]
    } else {
        let r = 2.0 * (-p / 3.0).sqrt();
        let phi = ((3.0 * q) / (2.0 * p) * (-3.0 / p).sqrt()).clamp(-1.0, 1.0).acos() / 3.0;
        (0..3)
            .map(|k| r * (phi - 2.0 * PI * k as f64 / 3.0).cos() + shift)
            .collect()
    }
}

/// Step length minimising `|a - mu b + mu^2 c|^2`, or `1` when no positive
/// stationary point exists.
fn optimal_multiplier(a: &DVector<f64>, b: &DVector<f64>, c: &DVector<f64>) -> f64 {
    let g0 = -a.dot(b);
    let g1 = b.dot(b) + 2.0 * a.dot(c);
    let g2 = -3.0 * b.dot(c);
    let g3 = 2.0 * c.dot(c);
    let model = |mu: f64| (a - b * mu + c * (mu * mu)).norm_squared();
    real_cubic_roots(g3, g2, g1, g0)
        .into_iter()
        .filter(|mu| mu.is_finite() && *mu > 0.0)
        .min_by(|x, y| model(*x).total_cmp(&model(*y)))
        .unwrap_or(1.0)
}

impl PowerFlowKernel for IwamotoKernel {
    fn method(&self) -> SolverType {
        SolverType::Iwamoto
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

        let mut f = assemble_f(&(compute_power(&adm.ybus, &v, &inj.ibus) - &inj.sbus), pvpq, pq);
        let mut norm_f = inf_norm(&f);
        let mut iterations = 0;
        while norm_f > settings.tolerance && iterations < settings.max_iter {
            let jac = build_jacobian(&adm.ybus, &v, &inj.ibus, pvpq, pq);
            let mut dx = f.clone();
            if solver.solve_csc(&jac, dx.as_mut_slice()).is_err() {
                debug!("iwamoto: singular Jacobian at iteration {iterations}");
                break;
            }

            let mut dv = DVector::from_element(v.len(), Complex64::new(0.0, 0.0));
            for (k, i) in pvpq.iter().enumerate() {
                dv[*i] = v[*i] * Complex64::new(0.0, dx[k]);
            }
            for (k, i) in pq.iter().enumerate() {
                dv[*i] += v[*i] * (dx[pvpq.len() + k] / vm[*i]);
            }
            let second = dv.component_mul(&(&adm.ybus * &dv).conjugate());
            let c = assemble_f(&second, pvpq, pq);
            let b = &jac * &dx;
            let mu = optimal_multiplier(&f, &b, &c);

            update_v(&mut vm, &mut va, dx.as_slice(), mu, pvpq, pq, &mut v);
            f = assemble_f(&(compute_power(&adm.ybus, &v, &inj.ibus) - &inj.sbus), pvpq, pq);
            norm_f = inf_norm(&f);
            iterations += 1;
            debug!("iwamoto: iteration {iterations}, mu = {mu:.4}, |F| = {norm_f:e}");
            if !norm_f.is_finite() {
                break;
            }
        }
        KernelResult::finish(adm, inj, v, norm_f <= settings.tolerance, iterations, start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_cubic_roots() {
        // (x - 1)(x - 2)(x + 3)
        let mut r = real_cubic_roots(1.0, 0.0, -7.0, 6.0);
        r.sort_by(f64::total_cmp);
        assert_eq!(r.len(), 3);
        assert_abs_diff_eq!(r[0], -3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(r[1], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(r[2], 2.0, epsilon = 1e-9);

        // x^3 + x - 2 has the single real root 1
        let r = real_cubic_roots(1.0, 0.0, 1.0, -2.0);
        assert_eq!(r.len(), 1);
        assert_abs_diff_eq!(r[0], 1.0, epsilon = 1e-9);

        // degenerates to 2x - 1
        let r = real_cubic_roots(0.0, 0.0, 2.0, -1.0);
        assert_abs_diff_eq!(r[0], 0.5);
    }

    #[test]
    fn test_linear_model_takes_full_step() {
        let a = DVector::from_vec(vec![1.0, -2.0]);
        let c = DVector::zeros(2);
        assert_abs_diff_eq!(optimal_multiplier(&a, &a, &c), 1.0, epsilon = 1e-12);
    }
}
