pub mod basic;
pub mod dynamics;
pub mod error;
pub mod powerflow;
pub mod symbolic;

pub mod prelude {
    pub use crate::basic::system::{
        Admittances, Branch, Bus, BusType, NumericalCircuit, TapRegulator,
    };
    pub use crate::dynamics::{
        Block, BlockSolver, Event, ExternalTag, IntegrationMethod, SimulationOptions,
    };
    pub use crate::error::{GridError, GridResult};
    pub use crate::powerflow::{
        KernelSet, PowerFlowOptions, PowerFlowResults, QControl, SolverType, TapControl,
        multi_island_pf, outer_loop_power_flow,
    };
    pub use crate::symbolic::{Expr, Symbols, Var};
}
