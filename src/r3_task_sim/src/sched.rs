//! The scheduler state, protected by `State::sched`
use arrayvec::ArrayString;
use r3_task::kernel::raw::{TaskFunction, Ticks};
use slab::Slab;

use crate::{TaskId, TaskState, MAX_TASK_NAME_LEN, TCB_WORDS};

/// Who holds the baton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Turn {
    /// The thread calling the controller API.
    Controller,
    /// The backing thread of the task with the given ID.
    Task(TaskId),
}

/// Task state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tsm {
    Ready,
    Running,
    /// `None` = indefinitely.
    Delayed(Option<Ticks>),
    Suspended,
    /// Waiting for the idle pass to reclaim its memory.
    Deleted,
    /// Returned from its entry function.
    Faulted,
}

impl Tsm {
    fn public(self) -> TaskState {
        match self {
            Self::Ready => TaskState::Ready,
            Self::Running => TaskState::Running,
            Self::Delayed(_) => TaskState::Blocked,
            Self::Suspended => TaskState::Suspended,
            Self::Deleted => TaskState::Deleted,
            Self::Faulted => TaskState::Faulted,
        }
    }
}

/// Task control block
#[derive(Debug)]
pub(crate) struct Tcb {
    pub(crate) id: TaskId,
    pub(crate) name: ArrayString<MAX_TASK_NAME_LEN>,
    pub(crate) entry: TaskFunction,
    /// The opaque parameter, stored as an integer so that `Tcb: Send`.
    pub(crate) param: usize,
    pub(crate) priority: usize,
    pub(crate) stack_words: usize,
    pub(crate) tsm: Tsm,
    /// The backing thread has been spawned.
    pub(crate) started: bool,
    /// Orders tasks of equal priority by the time they became ready.
    ready_seq: u64,
}

#[derive(Debug)]
pub(crate) struct Sched {
    pub(crate) tasks: Slab<Tcb>,
    pub(crate) turn: Turn,
    /// The key of the task holding the baton.
    pub(crate) running: Option<usize>,
    pub(crate) isr_depth: usize,
    pub(crate) tick_count: Ticks,
    pub(crate) heap_free: usize,
    /// Deleted tasks not yet reclaimed.
    reclaim: Vec<usize>,
    next_id: usize,
    next_seq: u64,
    pub(crate) fault_count: usize,
    pub(crate) bad_id_count: usize,
}

impl Sched {
    pub(crate) fn new(heap_words: usize) -> Self {
        Self {
            tasks: Slab::new(),
            turn: Turn::Controller,
            running: None,
            isr_depth: 0,
            tick_count: 0,
            heap_free: heap_words,
            reclaim: Vec::new(),
            next_id: 0,
            next_seq: 0,
            fault_count: 0,
            bad_id_count: 0,
        }
    }

    /// Register a new Ready task. Returns `None` if the heap can't hold it.
    pub(crate) fn insert(
        &mut self,
        name: &str,
        entry: TaskFunction,
        param: usize,
        priority: usize,
        stack_words: usize,
    ) -> Option<TaskId> {
        let cost = stack_words.checked_add(TCB_WORDS)?;
        if cost > self.heap_free {
            return None;
        }
        self.heap_free -= cost;

        let mut short_name = ArrayString::new();
        for ch in name.chars() {
            if short_name.try_push(ch).is_err() {
                break;
            }
        }

        self.next_id += 1;
        let id = TaskId::new(self.next_id);
        let ready_seq = self.bump_seq();
        self.tasks.insert(Tcb {
            id,
            name: short_name,
            entry,
            param,
            priority,
            stack_words,
            tsm: Tsm::Ready,
            started: false,
            ready_seq,
        });
        Some(id)
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Find a task that hasn't been reclaimed.
    pub(crate) fn key_of(&self, id: TaskId) -> Option<usize> {
        self.tasks
            .iter()
            .find_map(|(key, tcb)| (tcb.id == id).then_some(key))
    }

    /// Find a live task, counting a miss as a bad ID.
    pub(crate) fn live_key_of(&mut self, id: TaskId) -> Option<usize> {
        match self.key_of(id) {
            Some(key) if !matches!(self.tasks[key].tsm, Tsm::Deleted) => Some(key),
            _ => {
                log::error!("{id:?} does not name a live task");
                self.bad_id_count += 1;
                None
            }
        }
    }

    pub(crate) fn state_of(&self, id: TaskId) -> Option<TaskState> {
        self.key_of(id).map(|key| self.tasks[key].tsm.public())
    }

    /// Put the task at the back of its priority's ready queue.
    pub(crate) fn make_ready(&mut self, key: usize) {
        let seq = self.bump_seq();
        let tcb = &mut self.tasks[key];
        tcb.tsm = Tsm::Ready;
        tcb.ready_seq = seq;
    }

    pub(crate) fn mark_deleted(&mut self, key: usize) {
        self.tasks[key].tsm = Tsm::Deleted;
        self.reclaim.push(key);
    }

    /// The ready task to run next: highest priority, then first come.
    pub(crate) fn pick_next(&self) -> Option<usize> {
        self.tasks
            .iter()
            .filter(|(_, tcb)| tcb.tsm == Tsm::Ready)
            .max_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.ready_seq.cmp(&a.ready_seq))
            })
            .map(|(key, _)| key)
    }

    /// The priority of whatever the CPU is running. The idle priority if no
    /// task is running.
    pub(crate) fn running_priority(&self) -> usize {
        self.running.map_or(0, |key| self.tasks[key].priority)
    }

    /// Return `true` if a ready task should preempt the running one.
    pub(crate) fn should_preempt(&self) -> bool {
        let Some(running) = self.running else {
            return false;
        };
        let current = self.tasks[running].priority;
        self.tasks
            .iter()
            .any(|(_, tcb)| tcb.tsm == Tsm::Ready && tcb.priority > current)
    }

    /// Advance the tick count and wake up the tasks whose delay has elapsed.
    pub(crate) fn advance_tick(&mut self) {
        self.tick_count = self.tick_count.wrapping_add(1);
        let expired: Vec<usize> = self
            .tasks
            .iter_mut()
            .filter_map(|(key, tcb)| match &mut tcb.tsm {
                Tsm::Delayed(Some(remaining)) => {
                    *remaining -= 1;
                    (*remaining == 0).then_some(key)
                }
                _ => None,
            })
            .collect();
        for key in expired {
            self.make_ready(key);
        }
    }

    /// The idle task's job: free the memory of deleted tasks.
    pub(crate) fn reclaim_deleted(&mut self) {
        for key in std::mem::take(&mut self.reclaim) {
            let tcb = self.tasks.remove(key);
            self.heap_free += tcb.stack_words + TCB_WORDS;
            log::debug!("reclaimed {:?} ({:?})", tcb.id, tcb.name);
        }
    }
}
