//! Tasks and the kernel interface they are built on
mod error;
mod priority;
pub mod raw;
mod task;
mod task_object;


pub use self::{error::*, priority::*, task::*, task_object::*};

/// The prelude module. This module re-exports the traits needed to use the
/// methods of [`Task`] and [`TaskObject`].
pub mod prelude {
    #[doc(no_inline)]
    pub use super::{task::TaskHandle, task::TaskMethods, task_object::TaskBody};
}

/// Re-exports all traits defined under this module for convenience.
pub mod traits {
    #[doc(no_inline)]
    pub use super::raw::{
        Id, KernelBase, KernelTaskDelete, KernelTaskPriorityGet, KernelTaskPrioritySet,
        KernelTaskResumeFromIsr, KernelTaskSuspend, TaskDeletion,
    };
    #[doc(no_inline)]
    pub use super::{priority::IntoPriority, prelude::*};
}
