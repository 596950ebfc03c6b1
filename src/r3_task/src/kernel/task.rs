//! Tasks
use core::{
    ffi::c_void,
    fmt,
    marker::PhantomData,
    num::NonZeroUsize,
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};

use super::{
    raw::{self, Id, KernelBase, TaskDeletion, TaskDescriptor, TaskFunction, Ticks},
    CreateTaskError, GetTaskPriorityError, IntoPriority, Priority, ResumeTaskError,
    SetTaskPriorityError, SuspendTaskError,
};

// ----------------------------------------------------------------------------

/// The creation request has not returned yet.
const SLOT_PENDING: usize = 0;
/// The task terminated itself. Terminal.
const SLOT_RETIRED: usize = usize::MAX;

/// Holds a task's handle.
///
/// ```text
///              publish                 retire / take
///   Pending ─────────────▶ Valid(id) ────────────────▶ Retired
///      │                                                  ▲
///      └──────────────────────────────────────────────────┘
///                  retire (task finished before publish)
/// ```
///
/// `Pending` and `Retired` both read as a null handle. A slot never leaves
/// `Retired`, so a task that terminates itself before its creator has stored
/// the handle is never observed as valid.
pub(super) struct HandleSlot<System> {
    raw: AtomicUsize,
    _phantom: PhantomData<fn() -> System>,
}

impl<System: KernelBase> HandleSlot<System> {
    pub(super) const fn pending() -> Self {
        Self {
            raw: AtomicUsize::new(SLOT_PENDING),
            _phantom: PhantomData,
        }
    }

    fn decode(raw: usize) -> Option<System::RawTaskId> {
        if raw == SLOT_RETIRED {
            return None;
        }
        // Safety: Any value other than the two sentinels was stored by
        //         `publish`, which got it from `Id::to_raw`
        NonZeroUsize::new(raw).map(|raw| unsafe { <System::RawTaskId as Id>::from_raw(raw) })
    }

    #[inline]
    pub(super) fn get(&self) -> Option<System::RawTaskId> {
        Self::decode(self.raw.load(Ordering::Acquire))
    }

    /// Store the handle returned by the kernel. Returns `false` if the task
    /// has already retired the slot.
    fn publish(&self, id: System::RawTaskId) -> bool {
        let raw = id.to_raw().get();
        debug_assert_ne!(raw, SLOT_RETIRED, "`Id::to_raw` returned a reserved value");
        self.raw
            .compare_exchange(SLOT_PENDING, raw, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Make the slot permanently null and return what it held.
    #[inline]
    pub(super) fn retire(&self) -> Option<System::RawTaskId> {
        Self::decode(self.raw.swap(SLOT_RETIRED, Ordering::AcqRel))
    }
}

// ----------------------------------------------------------------------------

/// Owns a kernel task running a C-ABI entry function.
///
/// The task is created by [`Task::new`] and lives until this value is
/// dropped (if the kernel supports deletion) or forever. All operations
/// are provided by [`TaskMethods`].
///
/// A `Task` owned by a [`TaskObject`](super::TaskObject) becomes null when
/// its body returns and deletion is supported. Every operation on a null
/// `Task` fails with `BadObjectState`.
pub struct Task<System: KernelBase> {
    slot: HandleSlot<System>,
}

impl<System: KernelBase> Task<System> {
    /// Create a task running `entry` with a null parameter.
    ///
    /// `stack_depth` is measured in kernel stack words. The task may or may
    /// not have started running when this returns.
    pub fn new(
        name: &str,
        entry: TaskFunction,
        priority: impl IntoPriority<System>,
        stack_depth: usize,
    ) -> Result<Self, CreateTaskError> {
        Self::with_param(name, entry, priority, stack_depth, ptr::null_mut())
    }

    /// Create a task running `entry` with `param`.
    ///
    /// The kernel hands `param` to `entry` untouched, so `entry` is
    /// responsible for anything it does with the pointer.
    pub fn with_param(
        name: &str,
        entry: TaskFunction,
        priority: impl IntoPriority<System>,
        stack_depth: usize,
        param: *mut c_void,
    ) -> Result<Self, CreateTaskError> {
        let task = Self::pending();
        task.create(name, entry, priority.into_priority(), stack_depth, param)?;
        Ok(task)
    }

    /// Construct a `Task` that does not own anything yet.
    pub(super) const fn pending() -> Self {
        Self {
            slot: HandleSlot::pending(),
        }
    }

    pub(super) fn slot(&self) -> &HandleSlot<System> {
        &self.slot
    }

    /// Ask the kernel to create the task and publish the handle.
    pub(super) fn create(
        &self,
        name: &str,
        entry: TaskFunction,
        priority: Priority,
        stack_depth: usize,
        param: *mut c_void,
    ) -> Result<(), CreateTaskError> {
        let desc = TaskDescriptor {
            name,
            entry,
            param,
            priority: priority.get(),
            stack_depth,
        };
        log::trace!("raw_task_create({desc:?})");

        let id = System::raw_task_create(&desc)?;

        if self.slot.publish(id) {
            log::debug!("created task {name:?} as {id:?}");
        } else {
            log::debug!("task {name:?} ({id:?}) terminated before its handle was stored");
        }
        Ok(())
    }
}

impl<System: KernelBase> Drop for Task<System> {
    fn drop(&mut self) {
        if !<System::TaskDeletion as TaskDeletion<System>>::ENABLED {
            return;
        }
        if let Some(id) = self.slot.retire() {
            log::debug!("deleting task {id:?}");
            // Safety: The slot held a valid handle, and `retire` guarantees
            //         nobody else will see it again
            unsafe { <System::TaskDeletion as TaskDeletion<System>>::delete(id) };
        }
    }
}

impl<System: KernelBase> fmt::Debug for Task<System> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Task").field(&self.slot.get()).finish()
    }
}

/// Block the calling task for `ticks` kernel ticks.
/// [`KernelBase::MAX_DELAY`] blocks indefinitely.
#[inline]
pub fn delay<System: KernelBase>(ticks: Ticks) {
    log::trace!("raw_delay({ticks})");
    System::raw_delay(ticks);
}

// ----------------------------------------------------------------------------

/// Implemented by the types that own a kernel task.
pub trait TaskHandle {
    /// The kernel the task belongs to.
    type System: KernelBase;

    /// Get the kernel handle, or `None` if the task has terminated itself
    /// (or has not been handed its handle yet).
    fn handle(&self) -> Option<<Self::System as KernelBase>::RawTaskId>;
}

impl<System: KernelBase> TaskHandle for Task<System> {
    type System = System;

    #[inline]
    fn handle(&self) -> Option<System::RawTaskId> {
        self.slot.get()
    }
}

/// The supported operations on [`TaskHandle`].
///
/// Each operation is only available if the kernel implements the matching
/// capability trait from [`raw`].
pub trait TaskMethods: TaskHandle {
    /// Get the task's current priority.
    fn priority(&self) -> Result<Priority, GetTaskPriorityError>
    where
        Self::System: raw::KernelTaskPriorityGet,
    {
        if <Self::System as KernelBase>::raw_is_interrupt_context() {
            return Err(GetTaskPriorityError::BadContext);
        }
        let id = self.handle().ok_or(GetTaskPriorityError::BadObjectState)?;
        log::trace!("raw_task_priority({id:?})");
        // Safety: The handle is valid while it's stored in the slot
        let raw = unsafe { <Self::System as raw::KernelTaskPriorityGet>::raw_task_priority(id) };
        Ok(Priority::new(raw))
    }

    /// Change the task's priority. The calling task may be preempted before
    /// this returns.
    fn set_priority(
        &self,
        priority: impl IntoPriority<Self::System>,
    ) -> Result<(), SetTaskPriorityError>
    where
        Self::System: raw::KernelTaskPrioritySet,
    {
        if <Self::System as KernelBase>::raw_is_interrupt_context() {
            return Err(SetTaskPriorityError::BadContext);
        }
        let id = self.handle().ok_or(SetTaskPriorityError::BadObjectState)?;
        let priority = priority.into_priority().get();
        log::trace!("raw_task_set_priority({id:?}, {priority})");
        // Safety: The handle is valid while it's stored in the slot
        unsafe {
            <Self::System as raw::KernelTaskPrioritySet>::raw_task_set_priority(id, priority)
        };
        Ok(())
    }

    /// Suspend the task. Suspending the calling task blocks until another
    /// context resumes it.
    ///
    /// Suspensions do not nest: a single [`resume`](Self::resume) undoes any
    /// number of `suspend` calls.
    fn suspend(&self) -> Result<(), SuspendTaskError>
    where
        Self::System: raw::KernelTaskSuspend,
    {
        if <Self::System as KernelBase>::raw_is_interrupt_context() {
            return Err(SuspendTaskError::BadContext);
        }
        let id = self.handle().ok_or(SuspendTaskError::BadObjectState)?;
        log::trace!("raw_task_suspend({id:?})");
        // Safety: The handle is valid while it's stored in the slot
        unsafe { <Self::System as raw::KernelTaskSuspend>::raw_task_suspend(id) };
        Ok(())
    }

    /// Resume the task if it's suspended.
    fn resume(&self) -> Result<(), ResumeTaskError>
    where
        Self::System: raw::KernelTaskSuspend,
    {
        if <Self::System as KernelBase>::raw_is_interrupt_context() {
            return Err(ResumeTaskError::BadContext);
        }
        let id = self.handle().ok_or(ResumeTaskError::BadObjectState)?;
        log::trace!("raw_task_resume({id:?})");
        // Safety: The handle is valid while it's stored in the slot
        unsafe { <Self::System as raw::KernelTaskSuspend>::raw_task_resume(id) };
        Ok(())
    }

    /// Resume the task from an interrupt handler.
    ///
    /// Returns the kernel's verdict on whether a context switch should be
    /// requested when the handler exits. Dropping the flag may delay the
    /// resumed task until the next scheduling point.
    #[must_use = "the caller must request a context switch if this returns `Ok(true)`"]
    fn resume_from_isr(&self) -> Result<bool, ResumeTaskError>
    where
        Self::System: raw::KernelTaskResumeFromIsr,
    {
        if !<Self::System as KernelBase>::raw_is_interrupt_context() {
            return Err(ResumeTaskError::BadContext);
        }
        let id = self.handle().ok_or(ResumeTaskError::BadObjectState)?;
        log::trace!("raw_task_resume_from_isr({id:?})");
        // Safety: The handle is valid while it's stored in the slot
        Ok(unsafe {
            <Self::System as raw::KernelTaskResumeFromIsr>::raw_task_resume_from_isr(id)
        })
    }
}

impl<T: TaskHandle> TaskMethods for T {}
