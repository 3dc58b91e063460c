//! Composable DAE blocks and their time-domain integration.
//!
//! A [`Block`] tree is flattened once by [`BlockSolver::new`], which also
//! builds the symbolic Jacobians. [`BlockSolver::simulate`] then compiles the
//! equations into tapes and steps the system, landing exactly on every
//! piecewise switch instant and event time.

mod block;
mod integrate;
mod output;
mod schedule;
mod solver;

pub use block::{Block, BlockBuilder, ExternalTag, FlatBlock};
pub use schedule::{Event, time_grid};
pub use solver::{
    BlockSolver, IntegrationMethod, Jacobians, SimulationOptions, SymbolicBlock,
    SymbolicJacobians,
};
