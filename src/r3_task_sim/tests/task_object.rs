//! `TaskObject` lifecycle on the simulated kernel
use r3_task_sim::{
    r3_task::kernel::{prelude::*, PriorityLevel, Task, TaskObject},
    TaskState,
};
use std::sync::atomic::{AtomicUsize, Ordering};

mod common;
use common::{init_logger, CountOnce, SeqTracker};

#[test]
fn body_return_deletes_task() {
    r3_task_sim::use_sim! {
        struct Kernel {
            max_priorities: 6,
            heap_words: 4096,
            capabilities: [delete, priority_get, priority_set, suspend, resume_from_isr],
        }
    }
    init_logger();

    let task =
        TaskObject::<Kernel, _>::new("count", PriorityLevel::Highest, 256, CountOnce::default())
            .unwrap();
    let id = task.handle().unwrap();
    assert_eq!(task.priority().unwrap().get(), 5);
    assert_eq!(task.body().count(), 0);

    r3_task_sim::run_until_idle::<Kernel>();

    assert_eq!(task.body().count(), 1);
    assert_eq!(task.handle(), None);
    // Reclaimed by the idle pass
    assert_eq!(r3_task_sim::task_state::<Kernel>(id), None);
    assert_eq!(r3_task_sim::free_heap_words::<Kernel>(), 4096);

    for _ in 0..10 {
        r3_task_sim::tick::<Kernel>();
    }
    assert_eq!(task.body().count(), 1);

    // No second deletion
    drop(task);
    r3_task_sim::run_until_idle::<Kernel>();
    assert_eq!(r3_task_sim::bad_id_count::<Kernel>(), 0);
    assert_eq!(r3_task_sim::fault_count::<Kernel>(), 0);
}

#[test]
fn body_return_parks_task() {
    r3_task_sim::use_sim! {
        struct Kernel {
            max_priorities: 6,
            heap_words: 4096,
            capabilities: [suspend],
        }
    }
    init_logger();

    let task =
        TaskObject::<Kernel, _>::new("count", PriorityLevel::Highest, 256, CountOnce::default())
            .unwrap();
    let id = task.handle().unwrap();

    r3_task_sim::run_until_idle::<Kernel>();
    assert_eq!(task.body().count(), 1);
    // The task still exists, parked in an indefinite delay
    assert_eq!(task.handle(), Some(id));
    assert_eq!(
        r3_task_sim::task_state::<Kernel>(id),
        Some(TaskState::Blocked)
    );

    for _ in 0..100 {
        r3_task_sim::tick::<Kernel>();
    }
    assert_eq!(task.body().count(), 1);
    assert_eq!(
        r3_task_sim::task_state::<Kernel>(id),
        Some(TaskState::Blocked)
    );

    // Resuming doesn't wake it either
    task.suspend().unwrap();
    task.resume().unwrap();
    r3_task_sim::run_until_idle::<Kernel>();
    assert_eq!(task.body().count(), 1);

    // Dropping it doesn't touch the kernel
    drop(task);
    r3_task_sim::run_until_idle::<Kernel>();
    assert_eq!(
        r3_task_sim::task_state::<Kernel>(id),
        Some(TaskState::Blocked)
    );
    assert_eq!(r3_task_sim::fault_count::<Kernel>(), 0);
}

#[test]
fn drop_before_running_deletes() {
    r3_task_sim::use_sim! {
        struct Kernel {
            max_priorities: 6,
            heap_words: 4096,
            capabilities: [delete],
        }
    }
    init_logger();

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            TaskObject::<Kernel, _>::new("count", PriorityLevel::Mid, 256, CountOnce::default())
                .unwrap()
        })
        .collect();
    let ids: Vec<_> = tasks.iter().map(|t| t.handle().unwrap()).collect();
    assert_eq!(r3_task_sim::free_heap_words::<Kernel>(), 4096 - 3 * (256 + 32));

    // All handles are distinct
    for (i, a) in ids.iter().enumerate() {
        for b in &ids[i + 1..] {
            assert_ne!(a, b);
        }
    }

    let mut tasks = tasks;
    drop(tasks.remove(1));
    assert_eq!(
        r3_task_sim::task_state::<Kernel>(ids[1]),
        Some(TaskState::Deleted)
    );
    // Reclamation is deferred to the idle pass
    assert_eq!(r3_task_sim::free_heap_words::<Kernel>(), 4096 - 3 * (256 + 32));

    r3_task_sim::run_until_idle::<Kernel>();
    assert_eq!(r3_task_sim::task_state::<Kernel>(ids[1]), None);
    assert_eq!(r3_task_sim::free_heap_words::<Kernel>(), 4096);
    assert!(tasks.iter().all(|t| t.body().count() == 1));
    assert_eq!(r3_task_sim::bad_id_count::<Kernel>(), 0);
}

/// Creates a higher-priority `TaskObject` from a task, so the new task runs
/// to completion inside `TaskObject::new`.
#[test]
fn terminates_before_handle_is_stored() {
    r3_task_sim::use_sim! {
        struct Kernel {
            max_priorities: 6,
            heap_words: 4096,
            capabilities: [delete],
        }
    }
    init_logger();

    static SEQ: SeqTracker = SeqTracker::new();
    static MISMATCHES: AtomicUsize = AtomicUsize::new(0);
    static NULL_HANDLES: AtomicUsize = AtomicUsize::new(0);

    struct Child;

    impl TaskBody<Kernel> for Child {
        fn run(&self, task: &Task<Kernel>) {
            SEQ.step(1, 2, &MISMATCHES);
            // The creator hasn't stored the handle yet
            if task.handle().is_none() {
                NULL_HANDLES.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    struct Parent;

    impl TaskBody<Kernel> for Parent {
        fn run(&self, _: &Task<Kernel>) {
            SEQ.step(0, 1, &MISMATCHES);
            let child =
                TaskObject::<Kernel, _>::new("child", PriorityLevel::Highest, 128, Child).unwrap();
            SEQ.step(2, 3, &MISMATCHES);
            // The child terminated first, so its handle is null for good
            if child.handle().is_none() {
                NULL_HANDLES.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    let parent = TaskObject::<Kernel, _>::new("parent", PriorityLevel::Low, 256, Parent).unwrap();
    r3_task_sim::run_until_idle::<Kernel>();

    SEQ.expect_and_replace(3, 4);
    assert_eq!(MISMATCHES.load(Ordering::Relaxed), 0);
    assert_eq!(NULL_HANDLES.load(Ordering::Relaxed), 2);
    assert_eq!(parent.handle(), None);
    assert_eq!(r3_task_sim::bad_id_count::<Kernel>(), 0);
    assert_eq!(r3_task_sim::free_heap_words::<Kernel>(), 4096);
}

#[test]
fn body_suspends_itself() {
    r3_task_sim::use_sim! {
        struct Kernel {
            max_priorities: 4,
            heap_words: 4096,
            capabilities: [delete, suspend],
        }
    }
    init_logger();

    #[derive(Default)]
    struct Stepper {
        steps: AtomicUsize,
    }

    impl TaskBody<Kernel> for Stepper {
        fn run(&self, task: &Task<Kernel>) {
            for _ in 0..3 {
                self.steps.fetch_add(1, Ordering::Relaxed);
                task.suspend().unwrap();
            }
        }
    }

    let task =
        TaskObject::<Kernel, _>::new("stepper", PriorityLevel::Mid, 256, Stepper::default())
            .unwrap();
    let id = task.handle().unwrap();

    r3_task_sim::run_until_idle::<Kernel>();
    assert_eq!(task.body().steps.load(Ordering::Relaxed), 1);
    assert_eq!(
        r3_task_sim::task_state::<Kernel>(id),
        Some(TaskState::Suspended)
    );

    for expected in 2..=3 {
        task.resume().unwrap();
        r3_task_sim::run_until_idle::<Kernel>();
        assert_eq!(task.body().steps.load(Ordering::Relaxed), expected);
    }

    // The third resume lets the body return
    task.resume().unwrap();
    r3_task_sim::run_until_idle::<Kernel>();
    assert_eq!(task.handle(), None);
    assert_eq!(r3_task_sim::task_state::<Kernel>(id), None);

    assert_eq!(task.resume(), Err(r3_task_sim::r3_task::kernel::ResumeTaskError::BadObjectState));
}
