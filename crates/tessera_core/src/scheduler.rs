//! Deterministic single-threaded event loop.
//!
//! The engine never runs work in parallel. Everything asynchronous is a
//! job on one of two queues:
//!
//! - **Microtasks** drain completely after every task, and before the
//!   first task of a run. Transactions become inactive on a microtask.
//! - **Tasks** run one at a time in FIFO order. Request results,
//!   auto-commit and the open/delete protocol are tasks.
//!
//! Code that runs outside any job (a test body, for instance) behaves as
//! the current task: its microtasks drain when the next run starts.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::warn;

/// A unit of queued work.
pub type Job = Box<dyn FnOnce() + Send>;

/// Two-queue event loop.
#[derive(Default)]
pub struct EventLoop {
    microtasks: Mutex<VecDeque<Job>>,
    tasks: Mutex<VecDeque<Job>>,
}

impl EventLoop {
    /// Creates an empty event loop.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a job on the microtask queue.
    pub fn queue_microtask(&self, job: Job) {
        self.microtasks.lock().push_back(job);
    }

    /// Queues a job on the task queue.
    pub fn queue_task(&self, job: Job) {
        self.tasks.lock().push_back(job);
    }

    /// Runs microtasks until the queue is empty, including any queued
    /// while draining.
    pub fn perform_microtask_checkpoint(&self) {
        loop {
            let job = self.microtasks.lock().pop_front();
            match job {
                Some(job) => job(),
                None => break,
            }
        }
    }

    /// Runs one task followed by a microtask checkpoint.
    ///
    /// Returns false if no task was queued.
    pub fn run_task(&self) -> bool {
        self.perform_microtask_checkpoint();
        let job = self.tasks.lock().pop_front();
        match job {
            Some(job) => {
                job();
                self.perform_microtask_checkpoint();
                true
            }
            None => false,
        }
    }

    /// Runs tasks until none are left or `max_turns` have run.
    ///
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self, max_turns: usize) -> usize {
        let mut turns = 0;
        while self.run_task() {
            turns += 1;
            if turns >= max_turns && self.has_pending_tasks() {
                warn!(turns, "event loop stopped after reaching its task budget");
                break;
            }
        }
        turns
    }

    /// Returns true if a task is waiting.
    #[must_use]
    pub fn has_pending_tasks(&self) -> bool {
        !self.tasks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Job) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |label: &'static str| -> Job {
            let sink = Arc::clone(&sink);
            Box::new(move || sink.lock().push(label))
        };
        (log, make)
    }

    #[test]
    fn microtasks_run_before_next_task() {
        let events = EventLoop::new();
        let (log, job) = recorder();

        events.queue_task(job("task-1"));
        events.queue_task(job("task-2"));
        events.queue_microtask(job("micro"));

        assert_eq!(events.run_until_idle(100), 2);
        assert_eq!(*log.lock(), vec!["micro", "task-1", "task-2"]);
    }

    #[test]
    fn microtasks_queued_by_task_drain_after_it() {
        let events = Arc::new(EventLoop::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let (inner_events, inner_log) = (Arc::clone(&events), Arc::clone(&log));
        events.queue_task(Box::new(move || {
            inner_log.lock().push("task-1");
            let micro_log = Arc::clone(&inner_log);
            inner_events.queue_microtask(Box::new(move || micro_log.lock().push("micro")));
        }));
        let tail_log = Arc::clone(&log);
        events.queue_task(Box::new(move || tail_log.lock().push("task-2")));

        events.run_until_idle(100);
        assert_eq!(*log.lock(), vec!["task-1", "micro", "task-2"]);
    }

    #[test]
    fn run_stops_at_budget() {
        let events = Arc::new(EventLoop::new());

        fn requeue(events: Arc<EventLoop>) {
            let next = Arc::clone(&events);
            events.queue_task(Box::new(move || requeue(next)));
        }
        requeue(Arc::clone(&events));

        assert_eq!(events.run_until_idle(5), 5);
        assert!(events.has_pending_tasks());
    }
}
