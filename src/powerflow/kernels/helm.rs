use std::time::Instant;

use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex64;
use tracing::debug;

use super::{Injections, KernelResult, KernelSettings, PowerFlowKernel, power_mismatch};
use crate::basic::solver::{DefaultSolver, Solve};
use crate::basic::sparse::conj::{RealImage, map_values};
use crate::basic::sparse::{Slice, csc_blocks};
use crate::basic::system::Admittances;
use crate::powerflow::options::SolverType;

/// Hard cap on the number of series coefficients.
pub const MAX_COEFFICIENTS: usize = 30;

/// Holomorphic embedding load flow, J. Fanals Batllori formulation (2020).
///
/// The voltage is expanded as `V(s) = sum U[c] s^c` and evaluated at `s = 1`
/// by direct summation. Specified current injections are not part of the
/// embedding.
#[derive(Clone, Copy, Debug, Default)]
pub struct HelmKernel;

type Coefficients = Vec<Vec<Complex64>>;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

/// `sum_{k=1..c} conj(A[k]) B[c-k]`
fn conv1(a: &Coefficients, b: &Coefficients, c: usize, i: usize) -> Complex64 {
    (1..=c).map(|k| a[k][i].conj() * b[c - k][i]).sum()
}

/// `sum_{k=1..c-1} A[k] B[c-1-k]`
fn conv2(a: &Coefficients, b: &Coefficients, c: usize, i: usize) -> Complex64 {
    (1..c).map(|k| a[k][i] * b[c - 1 - k][i]).sum()
}

/// `sum_{k=1..c-1} A[k] conj(B[c-k])`
fn conv3(a: &Coefficients, b: &Coefficients, c: usize, i: usize) -> Complex64 {
    (1..c).map(|k| a[k][i] * b[c - k][i].conj()).sum()
}

/// Solves the complex system `a x = b` through its real 2n form.
fn solve_complex<S: Solve>(
    solver: &mut S,
    a: &CscMatrix<Complex64>,
    b: &[Complex64],
) -> Result<Vec<Complex64>, &'static str> {
    let n = b.len();
    let (g, bm) = a.real_imag();
    let neg_b = map_values(&bm, |v| -v);
    let mat = csc_blocks(&[&[&g, &neg_b], &[&bm, &g]]);
    let mut rhs: Vec<f64> = b.iter().map(|x| x.re).chain(b.iter().map(|x| x.im)).collect();
    solver.solve_csc(&mat, &mut rhs)?;
    Ok((0..n).map(|i| Complex64::new(rhs[i], rhs[n + i])).collect())
}

/// `nrows x ncols` matrix with one entry per `(row, col, value)`.
fn scatter(nrows: usize, ncols: usize, entries: impl Iterator<Item = (usize, usize, f64)>) -> CscMatrix<f64> {
    let mut coo = CooMatrix::new(nrows, ncols);
    for (r, c, v) in entries {
        coo.push(r, c, v);
    }
    CscMatrix::from(&coo)
}

impl PowerFlowKernel for HelmKernel {
    fn method(&self) -> SolverType {
        SolverType::Helm
    }

    fn solve(
        &self,
        adm: &Admittances,
        inj: &Injections,
        v0: &DVector<Complex64>,
        settings: &KernelSettings,
    ) -> KernelResult {
        let start = Instant::now();
        let (pqpv, vd) = (inj.pvpq(), inj.vd());
        if pqpv.is_empty() || vd.is_empty() {
            let (_, norm_f) = power_mismatch(adm, inj, v0);
            return KernelResult::finish(adm, inj, v0.clone(), norm_f <= settings.tolerance, 0, start);
        }
        let m = pqpv.len();
        let mut position = vec![usize::MAX; v0.len()];
        for (k, i) in pqpv.iter().enumerate() {
            position[*i] = k;
        }
        let pq_: Vec<usize> = inj.pq().iter().map(|i| position[*i]).collect();
        let pv_: Vec<usize> = inj.pv().iter().map(|i| position[*i]).collect();
        let npv = pv_.len();

        let yred = adm.yseries.select(pqpv, pqpv);
        let yslack = map_values(&adm.yseries.select(pqpv, vd), |y| -y);
        let (g, b) = yred.real_imag();

        let p: Vec<f64> = pqpv.iter().map(|i| inj.sbus[*i].re).collect();
        let q: Vec<f64> = pqpv.iter().map(|i| inj.sbus[*i].im).collect();
        let ysh: Vec<Complex64> = pqpv.iter().map(|i| adm.yshunt[*i]).collect();
        let w: Vec<f64> = pqpv.iter().map(|i| v0[*i].norm_sqr()).collect();
        let v_slack = DVector::from_iterator(vd.len(), vd.iter().map(|i| v0[*i]));
        let ones = DVector::from_element(vd.len(), Complex64::new(1.0, 0.0));
        let i_slack = &yslack * &v_slack;
        let yslack_sum = &yslack * &ones;

        let mut solver = DefaultSolver::default();
        let fail = |v: DVector<Complex64>, iterations: usize| {
            debug!("helm: linear solve failed");
            KernelResult::finish(adm, inj, v, false, iterations, start)
        };

        let mut u: Coefficients = Vec::with_capacity(MAX_COEFFICIENTS + 1);
        let mut x: Coefficients = Vec::with_capacity(MAX_COEFFICIENTS + 1);
        let mut qc: Coefficients = vec![vec![ZERO; m]; MAX_COEFFICIENTS + 1];

        let Ok(u0) = solve_complex(&mut solver, &yred, yslack_sum.as_slice()) else {
            return fail(v0.clone(), 0);
        };
        let x0: Vec<Complex64> = u0.iter().map(|u| 1.0 / u.conj()).collect();

        let mut valor = vec![ZERO; m];
        for &k in &pq_ {
            valor[k] = i_slack[k] - yslack_sum[k] + Complex64::new(p[k], -q[k]) * x0[k] - u0[k] * ysh[k];
        }
        for &k in &pv_ {
            valor[k] = i_slack[k] - yslack_sum[k] + p[k] * x0[k] - u0[k] * ysh[k];
        }
        let third: Vec<f64> = pv_.iter().map(|&k| w[k] - (u0[k] * u0[k]).re).collect();

        let vre = scatter(npv, m, pv_.iter().enumerate().map(|(r, &k)| (r, k, 2.0 * u0[k].re)));
        let vim = scatter(npv, m, pv_.iter().enumerate().map(|(r, &k)| (r, k, 2.0 * u0[k].im)));
        let xim = scatter(m, npv, pv_.iter().enumerate().map(|(c, &k)| (k, c, -x0[k].im)));
        let xre = scatter(m, npv, pv_.iter().enumerate().map(|(c, &k)| (k, c, x0[k].re)));
        let neg_b = map_values(&b, |v| -v);
        let empty = CscMatrix::zeros(npv, npv);
        let mat = csc_blocks(&[&[&g, &neg_b, &xim], &[&b, &g, &xre], &[&vre, &vim, &empty]]);

        let mut solve_order = |valor: &[Complex64], third: &[f64]| -> Option<(Vec<Complex64>, Vec<f64>)> {
            let mut rhs: Vec<f64> = valor
                .iter()
                .map(|v| v.re)
                .chain(valor.iter().map(|v| v.im))
                .chain(third.iter().copied())
                .collect();
            solver.solve_csc(&mat, &mut rhs).ok()?;
            let uc = (0..m).map(|i| Complex64::new(rhs[i], rhs[m + i])).collect();
            Some((uc, rhs[2 * m..].to_vec()))
        };

        let Some((u1, q0)) = solve_order(&valor, &third) else {
            return fail(v0.clone(), 0);
        };
        for (r, &k) in pv_.iter().enumerate() {
            qc[0][k] = Complex64::new(q0[r], 0.0);
        }
        let x1: Vec<Complex64> = (0..m).map(|i| -x0[i] * u1[i].conj() / u0[i].conj()).collect();
        u.push(u0);
        u.push(u1);
        x.push(x0);
        x.push(x1);

        let mut v = v0.clone();
        for (k, i) in pqpv.iter().enumerate() {
            v[*i] = u[0][k] + u[1][k];
        }

        let mut iterations = 1;
        let mut converged = false;
        let mut c = 2;
        while c <= MAX_COEFFICIENTS && !converged {
            for &k in &pq_ {
                valor[k] = Complex64::new(p[k], -q[k]) * x[c - 1][k] - u[c - 1][k] * ysh[k];
            }
            for &k in &pv_ {
                valor[k] = -Complex64::i() * conv2(&x, &qc, c, k) - u[c - 1][k] * ysh[k] + x[c - 1][k] * p[k];
            }
            let third: Vec<f64> = pv_.iter().map(|&k| -conv3(&u, &u, c, k).re).collect();
            let Some((uc, qprev)) = solve_order(&valor, &third) else {
                return fail(v, iterations);
            };
            for (r, &k) in pv_.iter().enumerate() {
                qc[c - 1][k] = Complex64::new(qprev[r], 0.0);
            }
            u.push(uc);
            let xc: Vec<Complex64> = (0..m).map(|i| -conv1(&u, &x, c, i) / u[0][i].conj()).collect();
            x.push(xc);

            for (k, i) in pqpv.iter().enumerate() {
                v[*i] += u[c][k];
            }
            let max_re = v.iter().fold(f64::NEG_INFINITY, |acc, e| acc.max(e.re));
            if !(max_re < 10.0) {
                debug!("helm: series diverged at order {c}");
                break;
            }
            let (_, norm_f) = power_mismatch(adm, inj, &v);
            converged = norm_f <= settings.tolerance && c % 2 == 1;
            debug!("helm: order {c}, |F| = {norm_f:e}");
            iterations += 1;
            c += 1;
        }
        KernelResult::finish(adm, inj, v, converged, iterations, start)
    }
}
