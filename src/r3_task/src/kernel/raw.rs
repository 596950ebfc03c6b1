//! The low-level kernel interface to be implemented by a kernel implementor.
//!
//! # Safety
//!
//! Most traits in this module are `unsafe trait` because they have to be
//! trustworthy to be able to build sound memory-safety-critical abstractions on
//! top of them. In particular, [`TaskObject`] frees the memory a task's
//! trampoline refers to once the kernel has confirmed the task will never run
//! again, so a kernel must not run a task it has deleted.
//!
//! The trait methods that operate on a given [`Id`] are all defined as `unsafe
//! fn` as the caller is responsible for passing an ID that names a live task.
//!
//! [`TaskObject`]: super::TaskObject
use core::{ffi::c_void, fmt, hash::Hash, num::NonZeroUsize};

use super::error::CreateTaskError;

/// The unit of [`KernelBase::raw_delay`], in kernel ticks.
pub type Ticks = u32;

/// The C-ABI entry point of a task. The kernel passes the parameter given in
/// [`TaskDescriptor::param`] unchanged.
pub type TaskFunction = extern "C" fn(*mut c_void);

/// Implemented by kernel task handle types ([`KernelBase::RawTaskId`]).
///
/// # Safety
///
/// `to_raw` must never return `usize::MAX`, and `from_raw(x.to_raw())` must
/// produce a value equal to `x`.
pub unsafe trait Id: fmt::Debug + Copy + Eq + Hash + Send + Sync + 'static {
    /// Convert the handle into a non-zero integer.
    fn to_raw(self) -> NonZeroUsize;

    /// Reconstruct a handle from a value returned by [`Self::to_raw`].
    ///
    /// # Safety
    ///
    /// `raw` must have been produced by `to_raw`.
    unsafe fn from_raw(raw: NonZeroUsize) -> Self;
}

/// The parameters of a task creation request.
#[derive(Debug, Clone, Copy)]
pub struct TaskDescriptor<'a> {
    /// A human-readable name. Kernels may truncate it.
    pub name: &'a str,
    /// The entry point.
    pub entry: TaskFunction,
    /// The opaque parameter passed to `entry`.
    pub param: *mut c_void,
    /// The initial priority. See [`Priority`](super::Priority).
    pub priority: usize,
    /// The stack size in kernel stack words.
    pub stack_depth: usize,
}

/// Provides access to the minimal API exposed by a kernel.
///
/// # Safety
///
/// See the [Safety](self#safety) section of the module documentation.
pub unsafe trait KernelBase: fmt::Debug + Copy + Sized + 'static {
    /// The type to identify tasks.
    type RawTaskId: Id;

    /// Selects what happens when a task wrapper is dropped or a task body
    /// returns. Either [`DeleteEnabled`] or [`DeleteDisabled`].
    type TaskDeletion: TaskDeletion<Self>;

    /// The number of distinct task priorities. Valid priorities are
    /// `0..MAX_PRIORITIES`, where `0` is the idle priority.
    const MAX_PRIORITIES: usize;

    /// The delay value that blocks indefinitely.
    const MAX_DELAY: Ticks = Ticks::MAX;

    /// Create a task and make it eligible to run. The kernel may switch to
    /// the new task before returning.
    fn raw_task_create(desc: &TaskDescriptor<'_>) -> Result<Self::RawTaskId, CreateTaskError>;

    /// Block the calling task for `ticks` ticks.
    /// [`MAX_DELAY`](Self::MAX_DELAY) blocks indefinitely.
    fn raw_delay(ticks: Ticks);

    /// Return `true` if the caller is running in an interrupt context.
    fn raw_is_interrupt_context() -> bool;
}

/// Provides task deletion.
///
/// # Safety
///
/// See the [Safety](self#safety) section of the module documentation.
pub unsafe trait KernelTaskDelete: KernelBase {
    /// Delete the specified task. The kernel may reclaim the task's memory
    /// later. Deleting the calling task does not return.
    ///
    /// # Safety
    ///
    /// `this` must name a task that has not been deleted.
    unsafe fn raw_task_delete(this: Self::RawTaskId);

    /// Delete the calling task.
    fn raw_task_delete_current() -> !;
}

/// Provides [`TaskMethods::priority`](super::TaskMethods::priority).
///
/// # Safety
///
/// See the [Safety](self#safety) section of the module documentation.
pub unsafe trait KernelTaskPriorityGet: KernelBase {
    /// Get the task's current priority.
    ///
    /// # Safety
    ///
    /// `this` must name a task that has not been deleted.
    unsafe fn raw_task_priority(this: Self::RawTaskId) -> usize;
}

/// Provides [`TaskMethods::set_priority`](super::TaskMethods::set_priority).
///
/// # Safety
///
/// See the [Safety](self#safety) section of the module documentation.
pub unsafe trait KernelTaskPrioritySet: KernelBase {
    /// Change the task's priority. The kernel may switch tasks before
    /// returning.
    ///
    /// # Safety
    ///
    /// `this` must name a task that has not been deleted.
    unsafe fn raw_task_set_priority(this: Self::RawTaskId, priority: usize);
}

/// Provides [`TaskMethods::suspend`](super::TaskMethods::suspend) and
/// [`TaskMethods::resume`](super::TaskMethods::resume).
///
/// # Safety
///
/// See the [Safety](self#safety) section of the module documentation.
pub unsafe trait KernelTaskSuspend: KernelBase {
    /// Suspend the task. Suspending the calling task blocks until it is
    /// resumed.
    ///
    /// # Safety
    ///
    /// `this` must name a task that has not been deleted.
    unsafe fn raw_task_suspend(this: Self::RawTaskId);

    /// Resume a suspended task. Has no effect if the task is not suspended.
    ///
    /// # Safety
    ///
    /// `this` must name a task that has not been deleted.
    unsafe fn raw_task_resume(this: Self::RawTaskId);
}

/// Provides
/// [`TaskMethods::resume_from_isr`](super::TaskMethods::resume_from_isr).
///
/// # Safety
///
/// See the [Safety](self#safety) section of the module documentation.
pub unsafe trait KernelTaskResumeFromIsr: KernelTaskSuspend {
    /// Resume a suspended task from an interrupt handler. Returns `true` if
    /// a context switch should be requested when the handler exits.
    ///
    /// # Safety
    ///
    /// `this` must name a task that has not been deleted.
    unsafe fn raw_task_resume_from_isr(this: Self::RawTaskId) -> bool;
}

/// The static selection between deleting and parking a task whose body has
/// finished. Implemented by [`DeleteEnabled`] and [`DeleteDisabled`] only.
///
/// # Safety
///
/// `exit_current` must never return control to its caller, and once
/// [`ENABLED`](Self::ENABLED) is `false`, `delete` must do nothing.
pub unsafe trait TaskDeletion<System: KernelBase> {
    /// `true` if the kernel's deletion capability is in use.
    const ENABLED: bool;

    /// Delete a task on behalf of its owner.
    ///
    /// # Safety
    ///
    /// `this` must name a task that has not been deleted.
    unsafe fn delete(this: System::RawTaskId);

    /// Leave the calling task for good: delete it or block it forever.
    fn exit_current() -> !;
}

/// Tasks are deleted when their owner is dropped or their body returns.
/// Requires [`KernelTaskDelete`].
#[derive(Debug)]
pub enum DeleteEnabled {}

/// Tasks are never deleted. A task whose body returns blocks forever in an
/// indefinite delay.
#[derive(Debug)]
pub enum DeleteDisabled {}

unsafe impl<System: KernelTaskDelete> TaskDeletion<System> for DeleteEnabled {
    const ENABLED: bool = true;

    #[inline]
    unsafe fn delete(this: System::RawTaskId) {
        log::trace!("raw_task_delete({this:?})");
        // Safety: Upheld by the caller
        unsafe { System::raw_task_delete(this) }
    }

    #[inline]
    fn exit_current() -> ! {
        log::trace!("raw_task_delete_current()");
        System::raw_task_delete_current()
    }
}

unsafe impl<System: KernelBase> TaskDeletion<System> for DeleteDisabled {
    const ENABLED: bool = false;

    #[inline]
    unsafe fn delete(_: System::RawTaskId) {}

    fn exit_current() -> ! {
        log::debug!("parking the current task forever");
        loop {
            System::raw_delay(System::MAX_DELAY);
        }
    }
}
