//! Heap exhaustion and deferred reclamation
use r3_task_sim::{
    r3_task::kernel::{prelude::*, CreateTaskError, PriorityLevel, ResultCode, TaskObject},
    TCB_WORDS,
};

mod common;
use common::{init_logger, CountOnce};

const STACK: usize = 200;

#[test]
fn exhaustion_then_reclamation() {
    r3_task_sim::use_sim! {
        struct Kernel {
            max_priorities: 6,
            heap_words: 2 * (200 + r3_task_sim::TCB_WORDS),
            capabilities: [delete],
        }
    }
    init_logger();

    let new_task = || {
        TaskObject::<Kernel, _>::new("count", PriorityLevel::Mid, STACK, CountOnce::default())
    };

    let a = new_task().unwrap();
    let b = new_task().unwrap();
    assert_eq!(r3_task_sim::free_heap_words::<Kernel>(), 0);

    let err = new_task().unwrap_err();
    assert_eq!(err, CreateTaskError::ResourceExhaustion);
    assert_eq!(ResultCode::from(err), ResultCode::ResourceExhaustion);

    // Deleted, but not reclaimed until the idle pass
    drop(a);
    assert_eq!(new_task().unwrap_err(), CreateTaskError::ResourceExhaustion);

    r3_task_sim::run_until_idle::<Kernel>();
    // `b` also ran to completion and deleted itself
    assert_eq!(b.body().count(), 1);
    assert_eq!(
        r3_task_sim::free_heap_words::<Kernel>(),
        2 * (STACK + TCB_WORDS)
    );

    let c = new_task().unwrap();
    let d = new_task().unwrap();
    r3_task_sim::run_until_idle::<Kernel>();
    assert_eq!((c.body().count(), d.body().count()), (1, 1));
    assert_eq!(r3_task_sim::bad_id_count::<Kernel>(), 0);
}

#[test]
fn oversized_stack() {
    r3_task_sim::use_sim! {
        struct Kernel {
            max_priorities: 6,
            heap_words: 1024,
            capabilities: [],
        }
    }
    init_logger();

    let result =
        TaskObject::<Kernel, _>::new("huge", PriorityLevel::Low, usize::MAX, CountOnce::default());
    assert_eq!(
        result.map(|task| task.handle()).unwrap_err(),
        CreateTaskError::ResourceExhaustion
    );
    assert_eq!(r3_task_sim::free_heap_words::<Kernel>(), 1024);
}
