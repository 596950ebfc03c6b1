#![deny(unsafe_op_in_unsafe_fn)]
#![doc = include_str!("./lib.md")]
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)

// `TaskObject` keeps its body in a heap allocation
extern crate alloc;

pub mod kernel;

/// The prelude module.
pub mod prelude {
    #[doc(no_inline)]
    pub use crate::kernel::prelude::*;
}
