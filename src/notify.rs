//! Cross-thread task queue feeding the reactor's self-pipe (spec §4.6,
//! "the loop's task queue + self-pipe" referenced from spec section 5).
//!
//! Grounded in the teacher's own `Notify<M>`: a shared queue plus a
//! wake-up strategy, generalized from a fixed-`M` MPMC ring buffer to a
//! plain `Mutex<VecDeque<Task>>` of boxed closures, since this reactor's
//! task queue carries heterogeneous one-shot work (`execute`,
//! `schedule_after`) rather than a single message type.

use std::collections::VecDeque;
use std::sync::Mutex;

pub type Task = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct Notify {
    queue: Mutex<VecDeque<Task>>,
}

impl Notify {
    pub fn new() -> Self {
        Notify { queue: Mutex::new(VecDeque::new()) }
    }

    /// Queues `task`. The caller is responsible for waking the reactor's
    /// self-pipe afterwards (see `Reactor::execute`) — this type has no
    /// opinion on the wake-up mechanism, matching the teacher's split
    /// between `Notify` and `Awakener`.
    pub fn push(&self, task: Task) {
        self.queue.lock().unwrap().push_back(task);
    }

    /// Drains every task queued so far and runs it. Draining first and
    /// running after releases the lock before user code executes, so a
    /// task that itself calls `execute` cannot deadlock on re-entrant
    /// `push`.
    pub fn drain_and_run(&self) {
        let drained: Vec<Task> = {
            let mut queue = self.queue.lock().unwrap();
            queue.drain(..).collect()
        };
        for task in drained {
            task();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn queued_tasks_run_in_order() {
        let notify = Notify::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            notify.push(Box::new(move || order.lock().unwrap().push(i)));
        }
        notify.drain_and_run();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn reentrant_push_during_run_is_picked_up_next_drain() {
        let notify = Arc::new(Notify::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let n2 = notify.clone();
        let s2 = seen.clone();
        notify.push(Box::new(move || {
            s2.fetch_add(1, Ordering::SeqCst);
            n2.push(Box::new(|| {}));
        }));
        notify.drain_and_run();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!notify.is_empty());
    }
}
