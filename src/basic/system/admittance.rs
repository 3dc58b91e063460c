use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex64;

use super::circuit::NumericalCircuit;
use crate::basic::sparse::conj::{RealImage, map_values};
use crate::basic::sparse::diagonal;

/// Admittance matrices of a circuit for a given set of tap modules.
///
/// `ybus = yseries + diag(yshunt)` holds by construction.
#[derive(Clone, Debug)]
pub struct Admittances {
    pub ybus: CscMatrix<Complex64>,
    /// Branch-from admittance: `If = yf * V`.
    pub yf: CscMatrix<Complex64>,
    /// Branch-to admittance: `It = yt * V`.
    pub yt: CscMatrix<Complex64>,
    /// Series part of `ybus`, without any shunt.
    pub yseries: CscMatrix<Complex64>,
    /// Per-bus shunt admittance (branch charging and bus shunts).
    pub yshunt: DVector<Complex64>,
    /// Branch-from incidence, `nbranch x nbus`.
    pub cf: CscMatrix<f64>,
    /// Branch-to incidence, `nbranch x nbus`.
    pub ct: CscMatrix<f64>,
    pub f: Vec<usize>,
    pub t: Vec<usize>,
    /// Fast-decoupled `B'`: `-Im Y` with r = 0, no shunts and unit taps.
    pub b1: CscMatrix<f64>,
    /// Fast-decoupled `B''`: `-Im Y` with the phase shifts removed.
    pub b2: CscMatrix<f64>,
    /// DC susceptance matrix.
    pub bbus: CscMatrix<f64>,
    /// DC branch-from susceptance, `Pf = bf * theta - b_dc * tau`.
    pub bf: CscMatrix<f64>,
    /// DC branch susceptance `1 / (x m)`.
    pub b_dc: DVector<f64>,
    pub tau: DVector<f64>,
    /// Phase-shifter bus injection `A^T (b_dc tau)`.
    pub pps: DVector<f64>,
}

struct BranchTerms {
    yff: Vec<Complex64>,
    yft: Vec<Complex64>,
    ytf: Vec<Complex64>,
    ytt: Vec<Complex64>,
}

/// Builds a `rows x ncols` selector with a single `1` per active row.
fn incidence(nrows: usize, ncols: usize, cols: &[Option<usize>]) -> CscMatrix<f64> {
    let mut coo = CooMatrix::new(nrows, ncols);
    for (k, c) in cols.iter().enumerate() {
        if let Some(c) = c {
            coo.push(k, *c, 1.0);
        }
    }
    CscMatrix::from(&coo)
}

fn to_complex(m: &CscMatrix<f64>) -> CscMatrix<Complex64> {
    map_values(m, |v| Complex64::new(v, 0.0))
}

impl Admittances {
    /// Builds every admittance matrix of `circuit`.
    ///
    /// # Arguments
    ///
    /// * `circuit` - Bus and branch data.
    /// * `tap_module` - Tap module per branch, overriding `Branch::tap_module`
    ///   so the outer loop can rebuild after a tap move.
    pub fn build(circuit: &NumericalCircuit, tap_module: &DVector<f64>) -> Self {
        let nbus = circuit.nbus();
        let nbr = circuit.nbranch();
        let active: Vec<bool> = circuit
            .branches
            .iter()
            .map(|b| b.active && b.from < nbus && b.to < nbus)
            .collect();
        let f: Vec<usize> = circuit.branches.iter().map(|b| b.from).collect();
        let t: Vec<usize> = circuit.branches.iter().map(|b| b.to).collect();
        let pick = |idx: &[usize]| -> Vec<Option<usize>> {
            idx.iter()
                .zip(&active)
                .map(|(i, a)| a.then_some(*i))
                .collect()
        };
        let cf = incidence(nbr, nbus, &pick(&f));
        let ct = incidence(nbr, nbus, &pick(&t));
        let cf_c = to_complex(&cf);
        let ct_c = to_complex(&ct);

        let tau = DVector::from_iterator(nbr, circuit.branches.iter().map(|b| b.tap_angle));
        let series = |with_r: bool, with_taps: bool, with_shift: bool| -> BranchTerms {
            let mut terms = BranchTerms {
                yff: Vec::with_capacity(nbr),
                yft: Vec::with_capacity(nbr),
                ytf: Vec::with_capacity(nbr),
                ytt: Vec::with_capacity(nbr),
            };
            for (k, br) in circuit.branches.iter().enumerate() {
                let r = if with_r { br.r } else { 0.0 };
                let ys = Complex64::new(1.0, 0.0) / Complex64::new(r, br.x);
                let m = if with_taps { tap_module[k] } else { 1.0 };
                let shift = if with_shift { br.tap_angle } else { 0.0 };
                let mp = Complex64::from_polar(m, shift);
                terms.yff.push(ys / (m * m));
                terms.yft.push(-ys / mp.conj());
                terms.ytf.push(-ys / mp);
                terms.ytt.push(ys);
            }
            terms
        };
        let shunt_f: Vec<Complex64> = circuit
            .branches
            .iter()
            .enumerate()
            .map(|(k, br)| Complex64::new(0.0, br.b / 2.0) / (tap_module[k] * tap_module[k]))
            .collect();
        let shunt_t: Vec<Complex64> = circuit
            .branches
            .iter()
            .map(|br| Complex64::new(0.0, br.b / 2.0))
            .collect();

        let assemble = |terms: &BranchTerms, sf: Option<(&[Complex64], &[Complex64])>| {
            let (yff, ytt): (Vec<Complex64>, Vec<Complex64>) = match sf {
                Some((sf, st)) => (
                    terms.yff.iter().zip(sf).map(|(a, b)| a + b).collect(),
                    terms.ytt.iter().zip(st).map(|(a, b)| a + b).collect(),
                ),
                None => (terms.yff.clone(), terms.ytt.clone()),
            };
            let yf = &diagonal(&yff) * &cf_c + &diagonal(&terms.yft) * &ct_c;
            let yt = &diagonal(&terms.ytf) * &cf_c + &diagonal(&ytt) * &ct_c;
            let y = &cf_c.transpose() * &yf + &ct_c.transpose() * &yt;
            (yf, yt, y)
        };

        let full = series(true, true, true);
        let (_, _, yseries) = assemble(&full, None);
        let (yf, yt, ybus_branches) = assemble(&full, Some((shunt_f.as_slice(), shunt_t.as_slice())));

        let bus_shunt = DVector::from_iterator(
            nbus,
            circuit
                .buses
                .iter()
                .map(|b| if b.active { b.y_shunt } else { Complex64::new(0.0, 0.0) }),
        );
        let ybus = &ybus_branches + &diagonal(bus_shunt.as_slice());
        let yshunt = &cf_c.transpose() * &DVector::from_vec(shunt_f.clone())
            + &ct_c.transpose() * &DVector::from_vec(shunt_t.clone())
            + &bus_shunt;

        let (_, _, y_b1) = assemble(&series(false, false, false), None);
        let b1 = map_values(&y_b1.imag(), |v| -v);
        let (_, _, y_b2) = assemble(&series(true, true, false), Some((shunt_f.as_slice(), shunt_t.as_slice())));
        let y_b2 = &y_b2 + &diagonal(bus_shunt.as_slice());
        let b2 = map_values(&y_b2.imag(), |v| -v);

        let b_dc = DVector::from_iterator(
            nbr,
            circuit
                .branches
                .iter()
                .enumerate()
                .map(|(k, br)| if active[k] { 1.0 / (br.x * tap_module[k]) } else { 0.0 }),
        );
        let a = &cf - &ct;
        let bf = &diagonal(b_dc.as_slice()) * &a;
        let bbus = &a.transpose() * &bf;
        let pps = &a.transpose() * &b_dc.component_mul(&tau);

        Self {
            ybus,
            yf,
            yt,
            yseries,
            yshunt,
            cf,
            ct,
            f,
            t,
            b1,
            b2,
            bbus,
            bf,
            b_dc,
            tau,
            pps,
        }
    }

    pub fn nbus(&self) -> usize {
        self.ybus.nrows()
    }

    /// From-side terminal voltages.
    pub fn vf(&self, v: &DVector<Complex64>) -> DVector<Complex64> {
        DVector::from_iterator(self.f.len(), self.f.iter().map(|i| v[*i]))
    }

    /// To-side terminal voltages.
    pub fn vt(&self, v: &DVector<Complex64>) -> DVector<Complex64> {
        DVector::from_iterator(self.t.len(), self.t.iter().map(|i| v[*i]))
    }
}
