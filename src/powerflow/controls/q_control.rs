use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::basic::system::BusType;
use crate::powerflow::outer_loop::SolveState;

/// Which reactive limit, if any, a generator bus is pinned to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QLimit {
    #[default]
    Free,
    AtMin,
    AtMax,
}

/// Logistic gain in `[0, 1)` growing with the voltage error.
pub fn q_increment_gain(v1: f64, v2: f64, k: f64) -> f64 {
    2.0 * (1.0 / (1.0 + (-k * (v2 - v1).abs()).exp()) - 0.5)
}

fn round_to(x: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (x * scale).round() / scale
}

const VOLTAGE_DIGITS: i32 = 4;
const INCREMENT_DIGITS: i32 = 6;

/// Sets the specified reactive injection of bus `i`.
fn set_q(state: &mut SolveState, i: usize, q: f64) {
    state.sbus[i] = Complex64::new(state.sbus[i].re, q);
}

/// PV/PQ switching after J. Zhao, "On PV-PQ bus type switching logic in power
/// flow computation".
///
/// * a PV bus whose computed `Q` reaches a limit becomes PQ at that limit;
/// * a bus pinned at `Qmin` returns to PV once its voltage falls below the
///   set-point, and a bus pinned at `Qmax` once its voltage rises above it.
///   The voltage is reset to the set-point with the angle kept.
///
/// Returns whether any bus changed.
pub fn control_q_direct(
    state: &mut SolveState,
    scalc: &DVector<Complex64>,
    vset: &DVector<f64>,
    q_max: &DVector<f64>,
    q_min: &DVector<f64>,
) -> bool {
    let mut changed = false;
    for i in 0..state.bus_types.len() {
        let vm = state.v[i].norm();
        match (state.bus_types[i], state.q_limits[i]) {
            (BusType::PV, _) => {
                let q = scalc[i].im;
                let pin = if q >= q_max[i] {
                    Some((QLimit::AtMax, q_max[i]))
                } else if q <= q_min[i] {
                    Some((QLimit::AtMin, q_min[i]))
                } else {
                    None
                };
                if let Some((limit, q_lim)) = pin {
                    warn!("bus {i}: Q = {q:.4} outside [{:.4}, {:.4}], switching to PQ", q_min[i], q_max[i]);
                    state.bus_types[i] = BusType::PQ;
                    state.q_limits[i] = limit;
                    set_q(state, i, q_lim);
                    changed = true;
                }
            }
            (BusType::PQ, QLimit::AtMin) if vm < vset[i] => {
                warn!("bus {i}: voltage {vm:.4} below set-point, back to PV");
                state.bus_types[i] = BusType::PV;
                state.q_limits[i] = QLimit::Free;
                state.v[i] = Complex64::from_polar(vset[i], state.v[i].arg());
                changed = true;
            }
            (BusType::PQ, QLimit::AtMax) if vm > vset[i] => {
                warn!("bus {i}: voltage {vm:.4} above set-point, back to PV");
                state.bus_types[i] = BusType::PV;
                state.q_limits[i] = QLimit::Free;
                state.v[i] = Complex64::from_polar(vset[i], state.v[i].arg());
                changed = true;
            }
            _ => {}
        }
    }
    changed
}

/// Gradual reactive control.
///
/// Every bus declared PV is turned into a PQ bus with `Q = 0` on the first
/// pass. From then on its `Q` is nudged towards `Qmax` while the voltage is
/// under the set-point (towards `Qmin` while above) by the remaining margin
/// times [`q_increment_gain`], never reaching the limit itself. Voltages are
/// compared at 4 decimals and increments rounded to 6.
pub fn control_q_iterative(
    state: &mut SolveState,
    original_types: &[BusType],
    vset: &DVector<f64>,
    q_max: &DVector<f64>,
    q_min: &DVector<f64>,
    k: f64,
) -> bool {
    let mut changed = false;
    for i in 0..state.bus_types.len() {
        match state.bus_types[i] {
            BusType::PV => {
                state.bus_types[i] = BusType::PQ;
                set_q(state, i, 0.0);
                changed = true;
            }
            BusType::PQ if original_types[i] == BusType::PV => {
                let vm = round_to(state.v[i].norm(), VOLTAGE_DIGITS);
                let target = round_to(vset[i], VOLTAGE_DIGITS);
                let q = state.sbus[i].im;
                let gain = q_increment_gain(state.v[i].norm(), vset[i], k);
                if vm < target {
                    let inc = round_to((q_max[i] - q).abs() * gain, INCREMENT_DIGITS);
                    if inc > 0.0 && q + inc < q_max[i] {
                        set_q(state, i, q + inc);
                        changed = true;
                    }
                } else if vm > target {
                    let inc = round_to((q_min[i] - q).abs() * gain, INCREMENT_DIGITS);
                    if inc > 0.0 && q - inc > q_min[i] {
                        set_q(state, i, q - inc);
                        changed = true;
                    }
                }
            }
            _ => {}
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn state(types: Vec<BusType>, v: Vec<f64>, q: Vec<f64>) -> SolveState {
        let n = types.len();
        SolveState {
            q_limits: vec![QLimit::Free; n],
            bus_types: types,
            sbus: DVector::from_iterator(n, q.iter().map(|q| Complex64::new(0.5, *q))),
            tap_position: Vec::new(),
            tap_module: DVector::zeros(0),
            v: DVector::from_iterator(n, v.iter().map(|m| Complex64::from_polar(*m, -0.1))),
        }
    }

    #[test]
    fn test_gain_shape() {
        assert_eq!(q_increment_gain(1.0, 1.0, 30.0), 0.0);
        assert!(q_increment_gain(0.9, 1.0, 30.0) > q_increment_gain(0.99, 1.0, 30.0));
        assert!(q_increment_gain(0.0, 10.0, 30.0) < 1.0);
    }

    #[test]
    fn test_direct_switches_pv_at_limits() {
        let mut st = state(vec![BusType::Slack, BusType::PV, BusType::PV], vec![1.0, 1.01, 0.99], vec![0.0; 3]);
        let scalc = DVector::from_vec(vec![
            Complex64::new(0.0, 0.0),
            Complex64::new(0.5, 0.8),
            Complex64::new(0.5, -0.6),
        ]);
        let vset = DVector::from_vec(vec![1.0, 1.01, 0.99]);
        let qmax = DVector::from_element(3, 0.5);
        let qmin = DVector::from_element(3, -0.5);
        assert!(control_q_direct(&mut st, &scalc, &vset, &qmax, &qmin));
        assert_eq!(st.bus_types, vec![BusType::Slack, BusType::PQ, BusType::PQ]);
        assert_eq!(st.q_limits[1], QLimit::AtMax);
        assert_eq!(st.q_limits[2], QLimit::AtMin);
        assert_eq!(st.sbus[1], Complex64::new(0.5, 0.5));
        assert_eq!(st.sbus[2], Complex64::new(0.5, -0.5));
    }

    #[test]
    fn test_direct_is_idempotent_inside_limits() {
        let mut st = state(vec![BusType::Slack, BusType::PV], vec![1.0, 1.01], vec![0.0, 0.0]);
        let scalc = DVector::from_vec(vec![Complex64::new(-0.5, 0.1), Complex64::new(0.5, 0.2)]);
        let vset = DVector::from_vec(vec![1.0, 1.01]);
        let qmax = DVector::from_element(2, 0.5);
        let qmin = DVector::from_element(2, -0.5);
        let before = st.clone();
        assert!(!control_q_direct(&mut st, &scalc, &vset, &qmax, &qmin));
        assert!(!control_q_direct(&mut st, &scalc, &vset, &qmax, &qmin));
        assert_eq!(st.bus_types, before.bus_types);
        assert_eq!(st.sbus, before.sbus);
    }

    #[test]
    fn test_direct_releases_pinned_bus() {
        let mut st = state(vec![BusType::Slack, BusType::PQ], vec![1.0, 0.97], vec![0.0, -0.5]);
        st.q_limits[1] = QLimit::AtMin;
        let scalc = DVector::from_vec(vec![Complex64::new(0.0, 0.0), Complex64::new(0.5, -0.5)]);
        let vset = DVector::from_vec(vec![1.0, 1.0]);
        let lim = DVector::from_element(2, 0.5);
        assert!(control_q_direct(&mut st, &scalc, &vset, &lim, &(-lim.clone())));
        assert_eq!(st.bus_types[1], BusType::PV);
        assert_abs_diff_eq!(st.v[1].norm(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(st.v[1].arg(), -0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_iterative_nudges_towards_limit() {
        let original = vec![BusType::Slack, BusType::PV];
        let mut st = state(original.clone(), vec![1.0, 0.95], vec![0.0, 0.3]);
        let vset = DVector::from_vec(vec![1.0, 1.0]);
        let qmax = DVector::from_element(2, 1.0);
        let qmin = DVector::from_element(2, -1.0);

        assert!(control_q_iterative(&mut st, &original, &vset, &qmax, &qmin, 30.0));
        assert_eq!(st.bus_types[1], BusType::PQ);
        assert_eq!(st.sbus[1].im, 0.0);

        assert!(control_q_iterative(&mut st, &original, &vset, &qmax, &qmin, 30.0));
        let gain = q_increment_gain(0.95, 1.0, 30.0);
        assert_abs_diff_eq!(st.sbus[1].im, gain, epsilon = 1e-6);
        assert!(st.sbus[1].im < 1.0);
    }
}
