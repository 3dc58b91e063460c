//! Steady-state power flow.
//!
//! [`multi_island_pf`] splits a [`NumericalCircuit`](crate::basic::system::NumericalCircuit)
//! into islands and runs [`outer_loop_power_flow`] on each. The outer loop
//! asks the [`dispatcher`] for a solution, which tries the requested
//! [`PowerFlowKernel`] and then the fallbacks, and applies the reactive and
//! tap [`controls`] between solves.

pub mod controls;
pub mod dispatcher;
pub mod kernels;
mod multi_island;
mod options;
mod outer_loop;
mod post_process;
mod report;
mod results;

pub use dispatcher::{DispatchOutcome, FALLBACK_ORDER};
pub use kernels::{Injections, KernelResult, KernelSet, KernelSettings, PowerFlowKernel};
pub use multi_island::{multi_island_pf, multi_island_pf_with};
pub use options::{PowerFlowOptions, QControl, SolverType, TapControl};
pub use outer_loop::{SolveState, outer_loop_power_flow};
pub use post_process::{PostProcessed, power_flow_post_process, power_flow_post_process_linear};
pub use report::{Attempt, ConvergenceReport};
pub use results::{IslandSummary, PowerFlowResults};
