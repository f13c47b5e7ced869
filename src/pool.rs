//! Worker thread pool feeding the future library (spec component C11).
//!
//! Grounded in `original_source/net/ThreadPool.{h,cc}`: a FIFO task queue
//! behind a mutex/condvar, workers that block on the queue and exit once
//! idle past a grace period, and a monitor thread that culls excess idle
//! workers back down toward `min_idle`. `Execute` mints a `Promise` per
//! task the way the original's template `Execute` does, except panics
//! become the error channel instead of a caught `std::exception_ptr`.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::future::{Future, Promise};

type Task = Box<dyn FnOnce() + Send>;

/// A unit of queued work: either a real task or a recycle signal the
/// monitor uses to retire one excess idle worker, replacing the
/// original's thread-local `working_` flag with an explicit variant.
enum Job {
    Run(Task),
    Recycle,
}

struct State {
    tasks: VecDeque<Job>,
    waiters: u32,
    current_threads: u32,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    min_idle: u32,
    max_threads: u32,
}

/// A pool of worker threads, grown on demand up to `max_threads` and
/// shrunk back toward `min_idle` by a background monitor.
pub struct ThreadPool {
    shared: Arc<Shared>,
    monitor: Option<JoinHandle<()>>,
}

/// Tunables for [`ThreadPool::with_config`].
#[derive(Debug, Clone, Copy)]
pub struct ThreadPoolConfig {
    /// Workers beyond this count that sit idle are recycled.
    pub min_idle_threads: u32,
    /// Hard ceiling on concurrently running workers.
    pub max_threads: u32,
    /// How often the monitor checks for excess idle workers.
    pub monitor_interval: Duration,
}

impl Default for ThreadPoolConfig {
    /// Matches spec section 4.9: one worker by default, capped at 512.
    fn default() -> ThreadPoolConfig {
        ThreadPoolConfig { min_idle_threads: 1, max_threads: 512, monitor_interval: Duration::from_secs(1) }
    }
}

impl ThreadPool {
    pub fn new() -> ThreadPool {
        ThreadPool::with_config(ThreadPoolConfig::default())
    }

    pub fn with_config(config: ThreadPoolConfig) -> ThreadPool {
        let shared = Arc::new(Shared {
            state: Mutex::new(State { tasks: VecDeque::new(), waiters: 0, current_threads: 0, shutdown: false }),
            cond: Condvar::new(),
            min_idle: config.min_idle_threads.max(1),
            max_threads: config.max_threads.max(1),
        });

        let monitor_shared = shared.clone();
        let interval = config.monitor_interval;
        let monitor = thread::Builder::new()
            .name("pool-monitor".into())
            .spawn(move || Self::monitor_routine(monitor_shared, interval))
            .expect("spawning the pool monitor thread");

        ThreadPool { shared, monitor: Some(monitor) }
    }

    /// Submits `f` to run on a worker thread, returning a future for its
    /// result. A panic inside `f` becomes the future's error instead of
    /// unwinding into the worker.
    pub fn execute<F, T>(&self, f: F) -> Future<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (pm, fut) = Promise::<T>::pair();
        let task: Task = Box::new(move || match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => pm.set_value(value),
            Err(payload) => pm.set_exception(panic_message(payload).into()),
        });

        let mut state = self.shared.state.lock().unwrap();
        if state.shutdown {
            drop(state);
            return Future::failed("thread pool has been shut down".into());
        }

        state.tasks.push_back(Job::Run(task));
        let need_worker = state.waiters == 0 && state.current_threads < self.shared.max_threads;
        if need_worker {
            state.current_threads += 1;
        }
        drop(state);

        self.shared.cond.notify_one();
        if need_worker {
            Self::spawn_worker(self.shared.clone());
        }

        fut
    }

    fn spawn_worker(shared: Arc<Shared>) {
        thread::spawn(move || Self::worker_routine(shared));
    }

    fn worker_routine(shared: Arc<Shared>) {
        loop {
            let job = {
                let mut state = shared.state.lock().unwrap();
                state.waiters += 1;
                while state.tasks.is_empty() && !state.shutdown {
                    state = shared.cond.wait(state).unwrap();
                }
                state.waiters -= 1;

                if state.tasks.is_empty() {
                    state.current_threads -= 1;
                    return; // shutdown with nothing left to run.
                }
                state.tasks.pop_front().expect("checked non-empty above")
            };

            match job {
                Job::Run(task) => task(),
                Job::Recycle => {
                    shared.state.lock().unwrap().current_threads -= 1;
                    return;
                }
            }
        }
    }

    fn monitor_routine(shared: Arc<Shared>, interval: Duration) {
        loop {
            thread::sleep(interval);
            let mut state = shared.state.lock().unwrap();
            if state.shutdown {
                return;
            }
            let excess = state.waiters.saturating_sub(shared.min_idle);
            for _ in 0..excess {
                state.tasks.push_back(Job::Recycle);
            }
            if excess > 0 {
                shared.cond.notify_all();
            }
        }
    }

    /// Signals every worker to exit once its queue drains, and joins them.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        self.shared.cond.notify_all();
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Default for ThreadPool {
    fn default() -> ThreadPool {
        ThreadPool::new()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn execute_returns_a_future_resolved_with_the_result() {
        let pool = ThreadPool::new();
        let fut = pool.execute(|| 2 + 2);
        assert_eq!(fut.wait().unwrap(), 4);
    }

    #[test]
    fn panicking_task_fails_its_future_instead_of_the_worker() {
        let pool = ThreadPool::new();
        let fut = pool.execute(|| -> i32 { panic!("boom") });
        assert!(fut.wait().is_err());
        // the pool must still be usable afterwards.
        let fut2 = pool.execute(|| 1);
        assert_eq!(fut2.wait().unwrap(), 1);
    }

    #[test]
    fn many_tasks_all_complete() {
        let pool = ThreadPool::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let futures: Vec<_> = (0..32)
            .map(|_| {
                let counter = counter.clone();
                pool.execute(move || counter.fetch_add(1, Ordering::SeqCst))
            })
            .collect();
        for f in futures {
            f.wait().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }
}
