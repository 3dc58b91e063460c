pub(crate) mod conj;
pub mod slice;
pub mod stack;

pub use slice::{Slice, diagonal, select};
pub use stack::{csc_blocks, csc_hstack, csc_vstack};
