//! Discrete controls applied between power-flow solves.

mod q_control;
mod tap_control;

pub use q_control::{QLimit, control_q_direct, control_q_iterative, q_increment_gain};
pub use tap_control::{control_taps_direct, control_taps_iterative, tap_down, tap_up};
