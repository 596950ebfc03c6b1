//! Tasks whose body is a trait method
use alloc::boxed::Box;
use core::{
    ffi::c_void,
    fmt,
    ptr::NonNull,
    sync::atomic::{AtomicBool, Ordering},
};

use super::{
    raw::{KernelBase, TaskDeletion},
    CreateTaskError, IntoPriority, Task, TaskHandle,
};

/// The code run by a [`TaskObject`].
pub trait TaskBody<System: KernelBase>: Send + Sync + 'static {
    /// The task body. `task` is the task running it.
    ///
    /// When this returns, the task deletes itself if the kernel supports
    /// deletion and otherwise blocks forever. It never runs again either way.
    fn run(&self, task: &Task<System>);
}

/// Owns a kernel task running [`TaskBody::run`] on a body of type `T`.
///
/// The body lives in a heap allocation with a fixed address, which is what
/// the kernel receives as the task parameter. Dropping a `TaskObject`
/// deletes the task (if it's still alive and the kernel supports deletion)
/// before dropping the body.
pub struct TaskObject<System: KernelBase, T: TaskBody<System>> {
    inner: NonNull<Inner<System, T>>,
}

struct Inner<System: KernelBase, T> {
    // Dropped before `body`
    task: Task<System>,
    /// Set by the trampoline once `body` will never be touched again. Only
    /// used if the kernel can't delete tasks.
    finished: AtomicBool,
    body: T,
}

// Safety: `Inner` is shared between the owner and the task, both through
//         `&Inner`. `T: Send + Sync` covers the body. `Task` only holds an
//         `AtomicUsize` and a `PhantomData<fn() -> System>`, so it's
//         `Send + Sync` whatever `System` is (checked below).
unsafe impl<System: KernelBase, T: TaskBody<System>> Send for TaskObject<System, T> {}
unsafe impl<System: KernelBase, T: TaskBody<System>> Sync for TaskObject<System, T> {}

const _: () = {
    #[allow(dead_code)]
    fn task_is_send_sync<System: KernelBase>() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Task<System>>();
    }
};

impl<System: KernelBase, T: TaskBody<System>> TaskObject<System, T> {
    /// Move `body` to the heap and create a task running it.
    ///
    /// The task may start (and even finish) before this returns. If creation
    /// fails, `body` is dropped.
    pub fn new(
        name: &str,
        priority: impl IntoPriority<System>,
        stack_depth: usize,
        body: T,
    ) -> Result<Self, CreateTaskError> {
        let this = Self {
            inner: NonNull::from(Box::leak(Box::new(Inner {
                task: Task::pending(),
                finished: AtomicBool::new(false),
                body,
            }))),
        };

        this.inner().task.create(
            name,
            trampoline::<System, T>,
            priority.into_priority(),
            stack_depth,
            this.inner.as_ptr().cast(),
        )?;

        Ok(this)
    }

    #[inline]
    fn inner(&self) -> &Inner<System, T> {
        // Safety: `inner` is freed only by `drop`
        unsafe { self.inner.as_ref() }
    }

    /// Get the task.
    #[inline]
    pub fn task(&self) -> &Task<System> {
        &self.inner().task
    }

    /// Get the body.
    #[inline]
    pub fn body(&self) -> &T {
        &self.inner().body
    }
}

impl<System: KernelBase, T: TaskBody<System>> TaskHandle for TaskObject<System, T> {
    type System = System;

    #[inline]
    fn handle(&self) -> Option<System::RawTaskId> {
        self.task().handle()
    }
}

impl<System: KernelBase, T: TaskBody<System>> Drop for TaskObject<System, T> {
    fn drop(&mut self) {
        let inner = self.inner();
        if !<System::TaskDeletion as TaskDeletion<System>>::ENABLED
            && inner.task.handle().is_some()
            && !inner.finished.load(Ordering::Acquire)
        {
            // The task can't be stopped and may still be using the body
            log::warn!(
                "leaking the body of task {:?}, which is still running",
                inner.task.handle(),
            );
            return;
        }

        // Safety: `inner` came from `Box::leak`. Either `Task::drop` below
        //         deletes the task before the body is dropped, or the task
        //         has already retired its handle or set `finished`, after
        //         which it never touches `inner` again.
        drop(unsafe { Box::from_raw(self.inner.as_ptr()) });
    }
}

impl<System: KernelBase, T: TaskBody<System> + fmt::Debug> fmt::Debug for TaskObject<System, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskObject")
            .field("task", self.task())
            .field("body", self.body())
            .finish()
    }
}

/// The kernel entry point of every `TaskObject<System, T>`.
extern "C" fn trampoline<System: KernelBase, T: TaskBody<System>>(param: *mut c_void) {
    // Safety: `param` is the `Inner` passed by `TaskObject::new`, which
    //         stays allocated until this task retires its handle or sets
    //         `finished`
    let inner = unsafe { &*param.cast::<Inner<System, T>>() };

    inner.body.run(&inner.task);

    // The owner may free `inner` as soon as either of these stores is
    // visible, so each is the last access to `inner`
    if <System::TaskDeletion as TaskDeletion<System>>::ENABLED {
        let id = inner.task.slot().retire();
        log::debug!("task {id:?} finished, deleting itself");
    } else {
        inner.finished.store(true, Ordering::Release);
        log::debug!("task finished, parking");
    }

    <System::TaskDeletion as TaskDeletion<System>>::exit_current()
}
