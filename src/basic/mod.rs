pub(crate) mod dsbus_dv;
pub(crate) mod newtonpf;

pub mod solver;
pub mod sparse;
pub mod system;
pub use newtonpf::newton_pf;
