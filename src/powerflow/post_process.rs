//! Branch flows and exact bus powers from a solved voltage profile.

use nalgebra::DVector;
use num_complex::Complex64;

use crate::basic::newtonpf::compute_power;
use crate::basic::system::{Admittances, BusIndices, NumericalCircuit};

/// Rating floor that keeps unrated branches from dividing by zero.
const RATE_EPS: f64 = 1e-9;

/// Bus and branch quantities of a solved island, powers in MVA.
#[derive(Clone, Debug)]
pub struct PostProcessed {
    pub sbus: DVector<Complex64>,
    pub sf: DVector<Complex64>,
    pub st: DVector<Complex64>,
    pub if_: DVector<Complex64>,
    pub it: DVector<Complex64>,
    pub losses: DVector<Complex64>,
    pub loading: DVector<Complex64>,
}

fn loading(sf: &DVector<Complex64>, rates: &DVector<f64>) -> DVector<Complex64> {
    sf.zip_map(rates, |s, r| s / (r + RATE_EPS))
}

/// Replaces the slack powers and the PV reactive powers of `sbus` with the
/// values the network actually draws at `v`.
fn settle_bus_power(
    adm: &Admittances,
    sbus: &DVector<Complex64>,
    ibus: &DVector<Complex64>,
    v: &DVector<Complex64>,
    indices: &BusIndices,
) -> DVector<Complex64> {
    let scalc = compute_power(&adm.ybus, v, ibus);
    let mut s = sbus.clone();
    for &i in &indices.vd {
        s[i] = scalc[i];
    }
    for &i in &indices.pv {
        s[i] = Complex64::new(s[i].re, scalc[i].im);
    }
    s
}

/// AC post-processing: `If = Yf V`, `Sf = Vf conj(If)`, losses `Sf + St`.
pub fn power_flow_post_process(
    circuit: &NumericalCircuit,
    adm: &Admittances,
    sbus: &DVector<Complex64>,
    ibus: &DVector<Complex64>,
    v: &DVector<Complex64>,
    indices: &BusIndices,
) -> PostProcessed {
    let sbase = circuit.sbase;
    let if_ = &adm.yf * v;
    let it = &adm.yt * v;
    let sf = adm.vf(v).zip_map(&if_, |vf, i| vf * i.conj() * sbase);
    let st = adm.vt(v).zip_map(&it, |vt, i| vt * i.conj() * sbase);
    let losses = &sf + &st;
    let sbus = settle_bus_power(adm, sbus, ibus, v, indices).map(|s| s * sbase);
    PostProcessed {
        loading: loading(&sf, &circuit.rates()),
        sbus,
        sf,
        st,
        if_,
        it,
        losses,
    }
}

/// DC post-processing: `Pf = Bf θ - b τ`, lossless, no reactive flows.
pub fn power_flow_post_process_linear(
    circuit: &NumericalCircuit,
    adm: &Admittances,
    sbus: &DVector<Complex64>,
    v: &DVector<Complex64>,
    indices: &BusIndices,
) -> PostProcessed {
    let sbase = circuit.sbase;
    let theta = v.map(|x| x.arg());
    let pf = &adm.bf * &theta - adm.b_dc.component_mul(&adm.tau);
    let sf = pf.map(|p| Complex64::new(p * sbase, 0.0));
    let st = -&sf;

    let pbus = &adm.bbus * &theta - &adm.pps;
    let mut s = sbus.clone();
    for &i in &indices.vd {
        s[i] = Complex64::new(pbus[i], 0.0);
    }

    let vf = adm.vf(v);
    let vt = adm.vt(v);
    let current = |s: Complex64, v: Complex64| {
        if v.norm() > 0.0 { (s / sbase / v).conj() } else { Complex64::new(0.0, 0.0) }
    };
    PostProcessed {
        loading: loading(&sf, &circuit.rates()),
        if_: sf.zip_map(&vf, current),
        it: st.zip_map(&vt, current),
        losses: DVector::zeros(sf.len()),
        sbus: s.map(|s| s * sbase),
        sf,
        st,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::powerflow::kernels::test_grids::*;
    use crate::powerflow::kernels::{DcKernel, NewtonRaphsonKernel, PowerFlowKernel};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_two_bus_flows_balance() {
        let c = two_bus();
        let (adm, inj, v0) = prepare(&c);
        let res = NewtonRaphsonKernel.solve(&adm, &inj, &v0, &settings());
        let pp = power_flow_post_process(&c, &adm, &inj.sbus, &inj.ibus, &res.v, &inj.indices);

        // the slack supplies the load plus the line losses
        assert_abs_diff_eq!(pp.sbus[0].re, pp.sf[0].re, epsilon = 1e-6);
        assert_abs_diff_eq!(pp.sbus[0].im, pp.sf[0].im, epsilon = 1e-6);
        assert_abs_diff_eq!(pp.st[0].re, -100.0, epsilon = 1e-5);
        assert_abs_diff_eq!(pp.st[0].im, -20.0, epsilon = 1e-5);
        assert!(pp.losses[0].re > 0.0);
        assert_abs_diff_eq!(pp.loading[0].re, pp.sf[0].re / 200.0, epsilon = 1e-9);
    }

    #[test]
    fn test_five_bus_pv_reactive_power_settled() {
        let c = five_bus();
        let (adm, inj, v0) = prepare(&c);
        let res = NewtonRaphsonKernel.solve(&adm, &inj, &v0, &settings());
        let pp = power_flow_post_process(&c, &adm, &inj.sbus, &inj.ibus, &res.v, &inj.indices);
        assert_abs_diff_eq!(pp.sbus[2].im, res.scalc[2].im * 100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pp.sbus[2].re, 50.0, epsilon = 1e-9);
        let injected: f64 = pp.sbus.iter().map(|s| s.re).sum();
        let lost: f64 = pp.losses.iter().map(|s| s.re).sum();
        assert_abs_diff_eq!(injected, lost, epsilon = 1e-5);
    }

    #[test]
    fn test_dc_flows_are_lossless() {
        let c = two_bus();
        let (adm, inj, v0) = prepare(&c);
        let res = DcKernel.solve(&adm, &inj, &v0, &settings());
        let pp = power_flow_post_process_linear(&c, &adm, &inj.sbus, &res.v, &inj.indices);
        assert_abs_diff_eq!(pp.sf[0].re, 100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pp.st[0].re, -100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pp.sbus[0].re, 100.0, epsilon = 1e-9);
        assert_eq!(pp.losses[0], Complex64::new(0.0, 0.0));
    }
}
