mod admittance;
mod circuit;
mod islands;

pub use admittance::Admittances;
pub use circuit::{
    Branch, Bus, BusIndices, BusType, NumericalCircuit, TapRegulator, ValidationIssue,
    compile_types,
};
pub use islands::Island;
