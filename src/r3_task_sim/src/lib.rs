#![doc = include_str!("./lib.md")]
#![deny(unsafe_op_in_unsafe_fn)]
use r3_task::kernel::{
    raw::{KernelBase, TaskDescriptor, TaskFunction, Ticks},
    CreateTaskError,
};
use std::{
    cell::Cell,
    ffi::c_void,
    fmt,
    num::NonZeroUsize,
    sync::{Condvar, Mutex, MutexGuard, OnceLock, PoisonError},
};

mod sched;

use self::sched::{Sched, Tsm, Turn};

/// Used by `use_sim!`
#[doc(hidden)]
pub extern crate r3_task;
/// Used by `use_sim!`
#[doc(hidden)]
pub extern crate env_logger;

/// Task names longer than this many bytes are truncated.
pub const MAX_TASK_NAME_LEN: usize = 16;

/// The bookkeeping overhead of a task, in heap words. Creating a task with a
/// stack of `n` words takes `n + TCB_WORDS` words from the heap.
pub const TCB_WORDS: usize = 32;

/// The number of dispatches a single [`run_until_idle`] may perform before
/// it's considered stuck.
pub const MAX_DISPATCHES_PER_PASS: usize = 1_000_000;

/// Identifies a task in the simulator. IDs are never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(NonZeroUsize);

impl TaskId {
    fn new(serial: usize) -> Self {
        Self(NonZeroUsize::MIN.saturating_add(serial - 1))
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

// Safety: `TaskId::new` is only called with serials starting at 1 and
//         increasing by one, which never reach `usize::MAX` in practice
unsafe impl r3_task::kernel::raw::Id for TaskId {
    #[inline]
    fn to_raw(self) -> NonZeroUsize {
        self.0
    }

    #[inline]
    unsafe fn from_raw(raw: NonZeroUsize) -> Self {
        Self(raw)
    }
}

/// The state of a task as seen by [`task_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Eligible to run.
    Ready,
    /// Holding the (simulated) CPU.
    Running,
    /// Waiting for a delay to elapse, possibly forever.
    Blocked,
    /// Suspended until resumed.
    Suspended,
    /// Deleted, waiting for the idle pass to reclaim its memory.
    Deleted,
    /// The entry function returned, which kernels don't allow.
    Faulted,
}

/// Implemented on a kernel type by [`use_sim!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_sim!`].
#[doc(hidden)]
pub unsafe trait SimInstance: KernelBase<RawTaskId = TaskId> {
    fn sim_state() -> &'static State;
}

thread_local! {
    /// The simulator instance and the task that the current thread backs,
    /// if any. The instance is identified by address.
    static CURRENT_TASK: Cell<Option<(usize, TaskId)>> = Cell::new(None);
}

/// The internal state of a simulated kernel.
///
/// A single baton ([`Turn`]) is passed between the controller thread and the
/// task threads, so at most one of them runs at any time.
#[doc(hidden)]
pub struct State {
    max_priorities: usize,
    heap_words: usize,
    sched: OnceLock<Mutex<Sched>>,
    baton: Condvar,
}

type SchedGuard = MutexGuard<'static, Sched>;

impl State {
    pub const fn new(max_priorities: usize, heap_words: usize) -> Self {
        assert!(max_priorities > 0, "`max_priorities` must be non-zero");
        Self {
            max_priorities,
            heap_words,
            sched: OnceLock::new(),
            baton: Condvar::new(),
        }
    }

    fn lock(&'static self) -> SchedGuard {
        self.sched
            .get_or_init(|| Mutex::new(Sched::new(self.heap_words)))
            .lock()
            // A panicking task thread aborts the process anyway
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wait(&'static self, lock: SchedGuard) -> SchedGuard {
        self.baton
            .wait(lock)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    /// The task the current thread backs, if it belongs to this instance.
    fn current_task(&self) -> Option<TaskId> {
        CURRENT_TASK
            .get()
            .and_then(|(addr, id)| (addr == self.addr()).then_some(id))
    }

    /// The running task's key, asserting that the current thread backs it.
    fn expect_task_context(&self, lock: &Sched) -> (usize, TaskId) {
        let id = self
            .current_task()
            .expect("this operation is only allowed in a task context");
        assert_eq!(lock.turn, Turn::Task(id), "{id:?} does not hold the CPU");
        assert_eq!(lock.isr_depth, 0, "this operation is not allowed in an ISR");
        let key = lock.running.expect("no running task");
        (key, id)
    }

    fn expect_controller(&self, lock: &Sched) {
        assert!(
            self.current_task().is_none(),
            "this operation is only allowed on the controller thread"
        );
        assert_eq!(lock.turn, Turn::Controller);
        assert_eq!(lock.isr_depth, 0, "this operation is not allowed in an ISR");
    }

    // ------------------------------------------------------------------------
    // Baton passing

    /// Give the baton back to the controller and block until the dispatcher
    /// hands it to `id` again.
    fn switch_out(&'static self, mut lock: SchedGuard, id: TaskId) -> SchedGuard {
        lock.running = None;
        lock.turn = Turn::Controller;
        self.baton.notify_all();
        while lock.turn != Turn::Task(id) {
            lock = self.wait(lock);
        }
        lock
    }

    /// Give the baton back to the controller and never run again.
    fn switch_out_forever(&'static self, mut lock: SchedGuard) -> ! {
        lock.running = None;
        lock.turn = Turn::Controller;
        self.baton.notify_all();
        loop {
            lock = self.wait(lock);
        }
    }

    /// Yield to a higher-priority ready task if the caller is the running
    /// task and one exists.
    fn check_preemption(&'static self, mut lock: SchedGuard) {
        let Some(id) = self.current_task() else {
            return;
        };
        if lock.isr_depth > 0 || !lock.should_preempt() {
            return;
        }
        let Some(key) = lock.running else {
            return;
        };
        log::trace!("{id:?} is preempted");
        lock.make_ready(key);
        drop(self.switch_out(lock, id));
    }

    /// Hand the baton to the task `key` and wait until it's handed back.
    fn dispatch(&'static self, mut lock: SchedGuard, key: usize) -> SchedGuard {
        let tcb = &mut lock.tasks[key];
        tcb.tsm = Tsm::Running;
        let id = tcb.id;
        let spawn = !tcb.started;
        tcb.started = true;
        let (entry, param, name) = (tcb.entry, tcb.param, tcb.name);

        lock.running = Some(key);
        lock.turn = Turn::Task(id);

        if spawn {
            log::trace!("spawning the backing thread of {id:?} ({name:?})");
            let state = self;
            std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || state.task_main(id, entry, param))
                .expect("failed to spawn a task thread");
        } else {
            self.baton.notify_all();
        }

        while lock.turn != Turn::Controller {
            lock = self.wait(lock);
        }
        lock
    }

    /// The body of a task's backing thread.
    fn task_main(&'static self, id: TaskId, entry: TaskFunction, param: usize) {
        CURRENT_TASK.set(Some((self.addr(), id)));

        let mut lock = self.lock();
        while lock.turn != Turn::Task(id) {
            lock = self.wait(lock);
        }
        drop(lock);

        log::trace!("{id:?} started");
        entry(param as *mut c_void);

        let mut lock = self.lock();
        log::error!("{id:?} returned from its entry function");
        if let Some(key) = lock.running {
            lock.tasks[key].tsm = Tsm::Faulted;
        }
        lock.fault_count += 1;
        lock.running = None;
        lock.turn = Turn::Controller;
        self.baton.notify_all();
    }

    // ------------------------------------------------------------------------
    // Controller API

    /// Dispatch ready tasks until none is left, then reclaim deleted tasks.
    pub fn run_until_idle(&'static self) {
        let mut lock = self.lock();
        self.expect_controller(&lock);

        for _ in 0..MAX_DISPATCHES_PER_PASS {
            let Some(key) = lock.pick_next() else {
                lock.reclaim_deleted();
                return;
            };
            lock = self.dispatch(lock, key);
        }

        panic!("tasks are still ready after {MAX_DISPATCHES_PER_PASS} dispatches");
    }

    /// Advance the tick count by one, then [`run_until_idle`](Self::run_until_idle).
    pub fn tick(&'static self) {
        let mut lock = self.lock();
        self.expect_controller(&lock);
        lock.advance_tick();
        drop(lock);
        self.run_until_idle();
    }

    /// Run `handler` as an interrupt handler. If it returns `true`, a context
    /// switch is requested at exit.
    pub fn interrupt(&'static self, handler: impl FnOnce() -> bool) {
        {
            let mut lock = self.lock();
            if let Some(id) = self.current_task() {
                assert_eq!(lock.turn, Turn::Task(id), "{id:?} does not hold the CPU");
            } else {
                assert_eq!(lock.turn, Turn::Controller);
            }
            lock.isr_depth += 1;
        }

        let switch_requested = handler();

        let mut lock = self.lock();
        lock.isr_depth -= 1;
        if switch_requested {
            log::trace!("context switch requested by an interrupt handler");
            self.check_preemption(lock);
        }
    }

    pub fn task_state(&'static self, id: TaskId) -> Option<TaskState> {
        self.lock().state_of(id)
    }

    pub fn free_heap_words(&'static self) -> usize {
        self.lock().heap_free
    }

    pub fn tick_count(&'static self) -> Ticks {
        self.lock().tick_count
    }

    pub fn fault_count(&'static self) -> usize {
        self.lock().fault_count
    }

    pub fn bad_id_count(&'static self) -> usize {
        self.lock().bad_id_count
    }

    // ------------------------------------------------------------------------
    // Kernel API

    fn clamp_priority(&self, priority: usize) -> usize {
        if priority < self.max_priorities {
            priority
        } else {
            let clamped = self.max_priorities - 1;
            log::warn!("priority {priority} is out of range, using {clamped}");
            clamped
        }
    }

    pub fn task_create(&'static self, desc: &TaskDescriptor<'_>) -> Result<TaskId, CreateTaskError> {
        let priority = self.clamp_priority(desc.priority);
        let mut lock = self.lock();
        assert_eq!(lock.isr_depth, 0, "tasks can't be created in an ISR");

        let Some(id) = lock.insert(
            desc.name,
            desc.entry,
            desc.param as usize,
            priority,
            desc.stack_depth,
        ) else {
            log::warn!(
                "out of heap creating {:?} ({} words requested, {} free)",
                desc.name,
                desc.stack_depth.saturating_add(TCB_WORDS),
                lock.heap_free,
            );
            return Err(CreateTaskError::ResourceExhaustion);
        };
        log::trace!("created {id:?} ({:?}) at priority {priority}", desc.name);

        self.check_preemption(lock);
        Ok(id)
    }

    pub fn delay(&'static self, ticks: Ticks) {
        let mut lock = self.lock();
        let (key, id) = self.expect_task_context(&lock);
        if ticks == 0 {
            lock.make_ready(key);
        } else {
            let forever = ticks == Ticks::MAX;
            lock.tasks[key].tsm = Tsm::Delayed((!forever).then_some(ticks));
        }
        drop(self.switch_out(lock, id));
    }

    pub fn is_interrupt_context(&'static self) -> bool {
        self.lock().isr_depth > 0
    }

    pub fn task_delete(&'static self, id: TaskId) {
        let mut lock = self.lock();
        if self.current_task() == Some(id) && lock.isr_depth == 0 {
            self.delete_current_locked(lock);
        }
        if let Some(key) = lock.live_key_of(id) {
            log::trace!("{id:?} deleted");
            lock.mark_deleted(key);
        }
    }

    pub fn task_delete_current(&'static self) -> ! {
        let lock = self.lock();
        self.delete_current_locked(lock)
    }

    fn delete_current_locked(&'static self, mut lock: SchedGuard) -> ! {
        let (key, id) = self.expect_task_context(&lock);
        log::trace!("{id:?} deleted itself");
        lock.mark_deleted(key);
        self.switch_out_forever(lock)
    }

    pub fn task_priority(&'static self, id: TaskId) -> usize {
        let mut lock = self.lock();
        lock.live_key_of(id).map_or(0, |key| lock.tasks[key].priority)
    }

    pub fn task_set_priority(&'static self, id: TaskId, priority: usize) {
        let priority = self.clamp_priority(priority);
        let mut lock = self.lock();
        if let Some(key) = lock.live_key_of(id) {
            lock.tasks[key].priority = priority;
            self.check_preemption(lock);
        }
    }

    pub fn task_suspend(&'static self, id: TaskId) {
        let mut lock = self.lock();
        let Some(key) = lock.live_key_of(id) else {
            return;
        };
        if self.current_task() == Some(id) && lock.isr_depth == 0 {
            lock.tasks[key].tsm = Tsm::Suspended;
            drop(self.switch_out(lock, id));
            return;
        }
        match lock.tasks[key].tsm {
            Tsm::Ready | Tsm::Delayed(_) => lock.tasks[key].tsm = Tsm::Suspended,
            Tsm::Suspended | Tsm::Faulted => {}
            Tsm::Running => panic!("{id:?} can't be suspended from an ISR it's running"),
            Tsm::Deleted => unreachable!(),
        }
    }

    /// Make the task ready if it's suspended. Returns `true` if it was.
    fn resume_locked(&self, lock: &mut Sched, id: TaskId) -> bool {
        match lock.live_key_of(id) {
            Some(key) if lock.tasks[key].tsm == Tsm::Suspended => {
                log::trace!("{id:?} resumed");
                lock.make_ready(key);
                true
            }
            _ => false,
        }
    }

    pub fn task_resume(&'static self, id: TaskId) {
        let mut lock = self.lock();
        if self.resume_locked(&mut lock, id) {
            self.check_preemption(lock);
        }
    }

    pub fn task_resume_from_isr(&'static self, id: TaskId) -> bool {
        let mut lock = self.lock();
        assert!(lock.isr_depth > 0, "not in an ISR");
        if !self.resume_locked(&mut lock, id) {
            return false;
        }
        let key = lock.key_of(id);
        let resumed_priority = key.map_or(0, |key| lock.tasks[key].priority);
        resumed_priority >= lock.running_priority()
    }
}

// ----------------------------------------------------------------------------
// Controller API for `use_sim!` kernels

/// Dispatch ready tasks, highest priority first, until none is ready. Then
/// reclaim the memory of deleted tasks like an idle task would.
///
/// Must be called from the thread that declared no task (the controller).
pub fn run_until_idle<System: SimInstance>() {
    System::sim_state().run_until_idle()
}

/// Advance the tick count by one, wake up tasks whose delay has elapsed,
/// and [`run_until_idle`].
pub fn tick<System: SimInstance>() {
    System::sim_state().tick()
}

/// Run `handler` in an interrupt context. If it returns `true` and a task
/// was interrupted, the scheduler runs at exit.
///
/// Callable from the controller or from a running task.
pub fn interrupt<System: SimInstance>(handler: impl FnOnce() -> bool) {
    System::sim_state().interrupt(handler)
}

/// Get the state of a task. `None` once its memory has been reclaimed.
pub fn task_state<System: SimInstance>(id: TaskId) -> Option<TaskState> {
    System::sim_state().task_state(id)
}

/// Get the number of unallocated heap words.
pub fn free_heap_words<System: SimInstance>() -> usize {
    System::sim_state().free_heap_words()
}

/// Get the number of ticks since the start.
pub fn tick_count<System: SimInstance>() -> Ticks {
    System::sim_state().tick_count()
}

/// Get the number of tasks that returned from their entry function.
pub fn fault_count<System: SimInstance>() -> usize {
    System::sim_state().fault_count()
}

/// Get the number of kernel calls that named a deleted task. A real kernel
/// would have corrupted its state on each of these.
pub fn bad_id_count<System: SimInstance>() -> usize {
    System::sim_state().bad_id_count()
}

// ----------------------------------------------------------------------------

/// Define a kernel type backed by a simulated kernel.
///
/// ```
/// r3_task_sim::use_sim! {
///     /// The kernel.
///     pub struct Kernel {
///         max_priorities: 8,
///         heap_words: 4096,
///         capabilities: [delete, priority_get, priority_set, suspend, resume_from_isr],
///     }
/// }
/// # fn main() {}
/// ```
///
/// The capabilities are:
///
///  - `delete`: [`KernelTaskDelete`]. Also makes the kernel's
///    [`TaskDeletion`] `DeleteEnabled`.
///  - `priority_get`: [`KernelTaskPriorityGet`].
///  - `priority_set`: [`KernelTaskPrioritySet`].
///  - `suspend`: [`KernelTaskSuspend`].
///  - `resume_from_isr`: [`KernelTaskResumeFromIsr`]. Requires `suspend`.
///
/// [`KernelTaskDelete`]: r3_task::kernel::raw::KernelTaskDelete
/// [`TaskDeletion`]: r3_task::kernel::raw::KernelBase::TaskDeletion
/// [`KernelTaskPriorityGet`]: r3_task::kernel::raw::KernelTaskPriorityGet
/// [`KernelTaskPrioritySet`]: r3_task::kernel::raw::KernelTaskPrioritySet
/// [`KernelTaskSuspend`]: r3_task::kernel::raw::KernelTaskSuspend
/// [`KernelTaskResumeFromIsr`]: r3_task::kernel::raw::KernelTaskResumeFromIsr
#[macro_export]
macro_rules! use_sim {
    (
        $( #[$meta:meta] )*
        $vis:vis struct $Kernel:ident {
            max_priorities: $max_priorities:expr,
            heap_words: $heap_words:expr,
            capabilities: [$( $cap:ident ),* $(,)?] $(,)?
        }
    ) => {
        $( #[$meta] )*
        #[derive(Debug, Clone, Copy)]
        $vis struct $Kernel;

        const _: () = {
            static SIM_STATE: $crate::State = $crate::State::new($max_priorities, $heap_words);

            unsafe impl $crate::SimInstance for $Kernel {
                #[inline]
                fn sim_state() -> &'static $crate::State {
                    &SIM_STATE
                }
            }

            unsafe impl $crate::r3_task::kernel::raw::KernelBase for $Kernel {
                type RawTaskId = $crate::TaskId;
                type TaskDeletion = $crate::__task_deletion!($( $cap ),*);
                const MAX_PRIORITIES: usize = $max_priorities;

                fn raw_task_create(
                    desc: &$crate::r3_task::kernel::raw::TaskDescriptor<'_>,
                ) -> Result<$crate::TaskId, $crate::r3_task::kernel::CreateTaskError> {
                    SIM_STATE.task_create(desc)
                }

                fn raw_delay(ticks: $crate::r3_task::kernel::raw::Ticks) {
                    SIM_STATE.delay(ticks)
                }

                fn raw_is_interrupt_context() -> bool {
                    SIM_STATE.is_interrupt_context()
                }
            }

            $( $crate::__impl_capability!($cap for $Kernel); )*
        };
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __task_deletion {
    () => { $crate::r3_task::kernel::raw::DeleteDisabled };
    (delete $(, $rest:ident)*) => { $crate::r3_task::kernel::raw::DeleteEnabled };
    ($other:ident $(, $rest:ident)*) => { $crate::__task_deletion!($( $rest ),*) };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __impl_capability {
    (delete for $Kernel:ty) => {
        unsafe impl $crate::r3_task::kernel::raw::KernelTaskDelete for $Kernel {
            unsafe fn raw_task_delete(this: $crate::TaskId) {
                <$Kernel as $crate::SimInstance>::sim_state().task_delete(this)
            }

            fn raw_task_delete_current() -> ! {
                <$Kernel as $crate::SimInstance>::sim_state().task_delete_current()
            }
        }
    };
    (priority_get for $Kernel:ty) => {
        unsafe impl $crate::r3_task::kernel::raw::KernelTaskPriorityGet for $Kernel {
            unsafe fn raw_task_priority(this: $crate::TaskId) -> usize {
                <$Kernel as $crate::SimInstance>::sim_state().task_priority(this)
            }
        }
    };
    (priority_set for $Kernel:ty) => {
        unsafe impl $crate::r3_task::kernel::raw::KernelTaskPrioritySet for $Kernel {
            unsafe fn raw_task_set_priority(this: $crate::TaskId, priority: usize) {
                <$Kernel as $crate::SimInstance>::sim_state().task_set_priority(this, priority)
            }
        }
    };
    (suspend for $Kernel:ty) => {
        unsafe impl $crate::r3_task::kernel::raw::KernelTaskSuspend for $Kernel {
            unsafe fn raw_task_suspend(this: $crate::TaskId) {
                <$Kernel as $crate::SimInstance>::sim_state().task_suspend(this)
            }

            unsafe fn raw_task_resume(this: $crate::TaskId) {
                <$Kernel as $crate::SimInstance>::sim_state().task_resume(this)
            }
        }
    };
    (resume_from_isr for $Kernel:ty) => {
        unsafe impl $crate::r3_task::kernel::raw::KernelTaskResumeFromIsr for $Kernel {
            unsafe fn raw_task_resume_from_isr(this: $crate::TaskId) -> bool {
                <$Kernel as $crate::SimInstance>::sim_state().task_resume_from_isr(this)
            }
        }
    };
}
