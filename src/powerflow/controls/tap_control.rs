use tracing::{debug, warn};

use crate::basic::system::{NumericalCircuit, TapRegulator};
use crate::powerflow::outer_loop::SolveState;

pub fn tap_up(tap: i32, max_tap: i32) -> i32 {
    if tap < max_tap { tap + 1 } else { tap }
}

pub fn tap_down(tap: i32, min_tap: i32) -> i32 {
    if tap > min_tap { tap - 1 } else { tap }
}

/// Active branches carrying a regulator, with the regulated (`to`) bus.
fn regulated(circuit: &NumericalCircuit) -> impl Iterator<Item = (usize, usize, &TapRegulator)> {
    circuit
        .branches
        .iter()
        .enumerate()
        .filter(move |(_, br)| br.active && br.to < circuit.nbus())
        .filter_map(|(k, br)| br.regulator.as_ref().map(|reg| (k, br.to, reg)))
}

/// Moves every regulating tap at most one step towards its set-point.
///
/// With the tap on the `from` side a lower module raises the `to` voltage, so
/// an under-voltage steps the tap down and an over-voltage steps it up. The
/// dead band is half the increment of the position the tap would move to.
pub fn control_taps_iterative(circuit: &NumericalCircuit, state: &mut SolveState) -> bool {
    let mut changed = false;
    for (k, to, reg) in regulated(circuit) {
        let v = state.v[to].norm();
        let pos = state.tap_position[k];
        let inc_down = reg.increment(pos - 1);
        let inc_up = reg.increment(pos + 1);

        let new_pos = if reg.vset > v + inc_down / 2.0 {
            tap_down(pos, reg.min_tap)
        } else if reg.vset < v - inc_up / 2.0 {
            tap_up(pos, reg.max_tap)
        } else {
            continue;
        };

        if new_pos == pos {
            warn!("branch {k}: tap already at its limit ({pos}), bus {to} at {v:.4} p.u.");
            continue;
        }
        debug!("branch {k}: tap {pos} -> {new_pos} (bus {to} at {v:.4} p.u.)");
        state.tap_position[k] = new_pos;
        state.tap_module[k] = reg.module_at(new_pos);
        changed = true;
    }
    changed
}

/// Jumps every regulating tap to the position whose module would bring the
/// regulated voltage to its set-point, clamped to the tap range.
pub fn control_taps_direct(circuit: &NumericalCircuit, state: &mut SolveState) -> bool {
    let mut changed = false;
    for (k, to, reg) in regulated(circuit) {
        let v = state.v[to].norm();
        let desired = v / reg.vset * state.tap_module[k];
        let inc = if desired >= 1.0 { reg.inc_reg_up } else { reg.inc_reg_down };
        let wanted = ((desired - 1.0) / inc).round() as i32;
        let new_pos = wanted.clamp(reg.min_tap, reg.max_tap);
        if new_pos != wanted {
            warn!("branch {k}: tap {wanted} out of range, clamped to {new_pos}");
        }
        if new_pos == state.tap_position[k] {
            continue;
        }
        debug!("branch {k}: tap {} -> {new_pos}", state.tap_position[k]);
        state.tap_position[k] = new_pos;
        state.tap_module[k] = reg.module_at(new_pos);
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::system::{Branch, Bus, BusType};
    use crate::powerflow::controls::QLimit;
    use approx::assert_abs_diff_eq;
    use nalgebra::DVector;
    use num_complex::Complex64;

    fn regulated_pair(vset: f64) -> NumericalCircuit {
        let mut c = NumericalCircuit::new(100.0);
        c.add_bus(Bus::new("hv", BusType::Slack));
        c.add_bus(Bus::new("lv", BusType::PQ));
        c.add_branch(Branch::new("trafo", 0, 1, 0.0, 0.1, 0.0).with_regulator(TapRegulator {
            position: 0,
            min_tap: -2,
            max_tap: 2,
            inc_reg_up: 0.01,
            inc_reg_down: 0.02,
            vset,
        }));
        c
    }

    fn state_with(v_to: f64) -> SolveState {
        SolveState {
            bus_types: vec![BusType::Slack, BusType::PQ],
            sbus: DVector::zeros(2),
            tap_position: vec![0],
            tap_module: DVector::from_element(1, 1.0),
            v: DVector::from_vec(vec![Complex64::new(1.0, 0.0), Complex64::new(v_to, 0.0)]),
            q_limits: vec![QLimit::Free; 2],
        }
    }

    #[test]
    fn test_tap_steps() {
        assert_eq!(tap_up(1, 2), 2);
        assert_eq!(tap_up(2, 2), 2);
        assert_eq!(tap_down(-1, -2), -2);
        assert_eq!(tap_down(-2, -2), -2);
    }

    #[test]
    fn test_iterative_steps_once_then_stops_at_limit() {
        let c = regulated_pair(1.0);
        let mut st = state_with(0.95);
        assert!(control_taps_iterative(&c, &mut st));
        assert_eq!(st.tap_position, vec![-1]);
        assert_abs_diff_eq!(st.tap_module[0], 0.98, epsilon = 1e-12);
        assert!(control_taps_iterative(&c, &mut st));
        assert_eq!(st.tap_position, vec![-2]);
        assert!(!control_taps_iterative(&c, &mut st));
        assert_eq!(st.tap_position, vec![-2]);
    }

    #[test]
    fn test_iterative_dead_band() {
        let c = regulated_pair(1.0);
        let mut st = state_with(1.004);
        assert!(!control_taps_iterative(&c, &mut st));
        let mut st = state_with(1.006);
        assert!(control_taps_iterative(&c, &mut st));
        assert_eq!(st.tap_position, vec![1]);
        assert_abs_diff_eq!(st.tap_module[0], 1.01, epsilon = 1e-12);
    }

    #[test]
    fn test_direct_jumps_and_clamps() {
        let c = regulated_pair(1.0);
        let mut st = state_with(1.02);
        assert!(control_taps_direct(&c, &mut st));
        assert_eq!(st.tap_position, vec![2]);
        assert_abs_diff_eq!(st.tap_module[0], 1.02, epsilon = 1e-12);
        assert!(!control_taps_direct(&c, &mut state_with(1.0)));

        let mut st = state_with(0.8);
        assert!(control_taps_direct(&c, &mut st));
        assert_eq!(st.tap_position, vec![-2]);
    }
}
