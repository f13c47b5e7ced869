//! Single-threaded event loop tying the multiplexer, timer manager, and
//! cross-thread task queue together (spec component C6), plus a
//! round-robin pool of such loops (spec component C13).
//!
//! Grounded in the teacher's own `EventLoop<T, M>`: one `Poll`, one
//! `Timer`, one `Notify`, and a config struct, driven by a `run` flag
//! inside a `tick()` that polls I/O, dispatches it, drains notifications,
//! then advances the timer. The shapes survive; the token space doesn't —
//! where the teacher reserves `Token(usize::MAX)` for its notify channel,
//! this reactor reserves cookie `0` (never issued by
//! [`ChannelIdGen`](crate::token::ChannelIdGen)) for the self-pipe waker,
//! and every other cookie is looked up in the channel map.

use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::channel::{Channel, SharedChannel};
use crate::error::{CoreError, CoreResult};
use crate::future::{Future, Promise};
use crate::interest::Interest;
use crate::notify::Notify;
use crate::poll::{Events, Poll};
use crate::sys;
use crate::timer::{Repeat, TimerId, TimerManager};
use crate::token::{ChannelId, ChannelIdGen};

/// The cookie reserved for the self-pipe waker; never issued by
/// [`ChannelIdGen`] to a real channel.
const WAKER_COOKIE: u64 = 0;

/// Tunables for a [`Reactor`], mirroring the teacher's `EventLoopConfig`.
#[derive(Debug, Clone, Copy)]
pub struct ReactorConfig {
    /// Upper bound on how long a single poll blocks when no timer is
    /// sooner and no tasks are queued.
    pub max_poll_timeout: Duration,
    /// Initial capacity of the event batch buffer.
    pub events_capacity: usize,
    /// Overrides the `RLIMIT_NOFILE` ceiling `register` refuses to cross
    /// (spec.md §6, "the reactor queries `RLIMIT_NOFILE`"). `None` queries
    /// the process's actual soft limit via `getrlimit` at construction.
    pub max_open_fd: Option<u64>,
}

impl Default for ReactorConfig {
    fn default() -> ReactorConfig {
        ReactorConfig { max_poll_timeout: Duration::from_secs(1), events_capacity: 1024, max_open_fd: None }
    }
}

/// Queries the process's current `RLIMIT_NOFILE` soft limit, matching
/// spec.md §6. Falls back to a generous default if the syscall itself
/// fails, rather than refusing every registration outright.
fn query_rlimit_nofile() -> u64 {
    #[cfg(unix)]
    {
        let mut rl = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
        if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) } == 0 {
            return rl.rlim_cur as u64;
        }
    }
    65536
}

struct Shared {
    poll: Poll,
    waker: sys::Waker,
    channels: Mutex<HashMap<ChannelId, SharedChannel>>,
    id_gen: ChannelIdGen,
    timers: Mutex<TimerManager>,
    tasks: Notify,
    running: AtomicBool,
    max_open_fd: u64,
}

/// A cheap, `Send + Clone` reference to a running [`Reactor`]. This is
/// what [`Channel`] handlers and [`Future`] continuations receive to
/// schedule follow-up work — register a peer, arm a timeout, queue a
/// task on the loop thread — from any thread.
#[derive(Clone)]
pub struct ReactorHandle {
    shared: Arc<Shared>,
}

impl ReactorHandle {
    /// Registers `channel` for `interest`, minting and assigning it a
    /// fresh [`ChannelId`]. Refuses an already-registered channel (spec.md
    /// §4.4: "fails if the channel already has a non-zero unique id") and
    /// an fd at or beyond the configured `RLIMIT_NOFILE` ceiling (spec.md
    /// §4.4/§6: "refuses if `fd + 1 ≥ max_open_fd`").
    pub fn register(&self, channel: SharedChannel, interest: Interest) -> CoreResult<ChannelId> {
        let fd = {
            let guard = channel.lock().unwrap();
            if guard.id().is_assigned() {
                return Err(CoreError::AlreadyRegistered);
            }
            guard.raw_fd()
        };
        if fd as i64 + 1 >= self.shared.max_open_fd as i64 {
            return Err(CoreError::FdLimitExceeded { fd, limit: self.shared.max_open_fd });
        }

        let id = self.shared.id_gen.next();
        channel.lock().unwrap().set_id(id);
        self.shared.poll.register(fd, id.as_u64(), interest).map_err(CoreError::Io)?;
        self.shared.channels.lock().insert(id, channel);
        Ok(id)
    }

    /// Changes the interest set for an already-registered channel.
    pub fn modify(&self, id: ChannelId, interest: Interest) -> CoreResult<()> {
        let fd = self.fd_of(id)?;
        self.shared.poll.modify(fd, id.as_u64(), interest).map_err(CoreError::Io)
    }

    /// Deregisters a channel. Safe to call from inside that channel's own
    /// handler; the reactor dispatches from a snapshot taken before the
    /// batch, so this cannot invalidate an in-flight call.
    pub fn unregister(&self, id: ChannelId) -> CoreResult<()> {
        let removed = self.shared.channels.lock().remove(&id);
        if let Some(channel) = removed {
            let fd = channel.lock().unwrap().raw_fd();
            self.shared.poll.unregister(fd).map_err(CoreError::Io)?;
        }
        Ok(())
    }

    fn fd_of(&self, id: ChannelId) -> CoreResult<RawFd> {
        self.shared
            .channels
            .lock()
            .get(&id)
            .map(|c| c.lock().unwrap().raw_fd())
            .ok_or(CoreError::UnknownChannel(id.as_u64()))
    }

    /// Queues `task` to run on the loop thread and wakes it if it's
    /// currently blocked in `poll`.
    pub fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        self.shared.tasks.push(task);
        let _ = self.shared.waker.wake();
    }

    /// Arms a timer on the loop's [`TimerManager`]. Like `execute`, this
    /// is thread-safe: `timers` is shared behind a mutex rather than
    /// loop-exclusive, since callers other than the loop thread itself
    /// (a `Future::on_timeout` continuation, say) need to schedule and
    /// cancel timers too.
    pub fn schedule_after(
        &self,
        delay: Duration,
        period: Duration,
        repeat: Repeat,
        callback: Box<dyn FnMut() + Send>,
    ) -> TimerId {
        let id = self.shared.timers.lock().schedule_after(delay, period, repeat, callback);
        let _ = self.shared.waker.wake();
        id
    }

    /// Returns whether a live timer was actually cancelled. Safe to call
    /// from inside the very timer callback being cancelled — see
    /// [`TimerManager::cancel`](crate::timer::TimerManager::cancel).
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        self.shared.timers.lock().cancel(id)
    }

    /// A future that resolves after `delay`, for code that wants to wait
    /// without blocking its thread.
    pub fn sleep(&self, delay: Duration) -> Future<()> {
        let (pm, fut) = Promise::<()>::pair();
        self.schedule_after(delay, Duration::ZERO, Repeat::Times(1), Box::new(move || pm.set_value(())));
        fut
    }

    /// Requests the loop stop after its current tick.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let _ = self.shared.waker.wake();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

/// A single-threaded reactor: one multiplexer, one timer manager, one
/// cross-thread task queue, driven by [`Reactor::run`] or
/// [`Reactor::tick`] on whichever thread owns it.
pub struct Reactor {
    shared: Arc<Shared>,
    events: Events,
    config: ReactorConfig,
}

impl Reactor {
    pub fn new() -> CoreResult<Reactor> {
        Reactor::with_config(ReactorConfig::default())
    }

    pub fn with_config(config: ReactorConfig) -> CoreResult<Reactor> {
        let poll = Poll::new().map_err(CoreError::Io)?;
        let waker = poll.make_waker(WAKER_COOKIE).map_err(CoreError::Io)?;
        let max_open_fd = config.max_open_fd.unwrap_or_else(query_rlimit_nofile);
        let shared = Arc::new(Shared {
            poll,
            waker,
            channels: Mutex::new(HashMap::new()),
            id_gen: ChannelIdGen::new(),
            timers: Mutex::new(TimerManager::new()),
            tasks: Notify::new(),
            running: AtomicBool::new(true),
            max_open_fd,
        });
        Ok(Reactor { events: Events::with_capacity(config.events_capacity), shared, config })
    }

    /// A cloneable handle to this reactor, usable from any thread.
    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle { shared: self.shared.clone() }
    }

    /// Runs ticks until [`ReactorHandle::stop`] is called.
    pub fn run(&mut self) -> CoreResult<()> {
        while self.shared.running.load(Ordering::SeqCst) {
            self.tick()?;
        }
        Ok(())
    }

    /// One iteration: poll I/O (bounded by the nearest timer and the
    /// configured ceiling, or zero if tasks are already queued), dispatch
    /// whatever fired from a pre-dispatch snapshot, drain the task queue,
    /// then advance timers.
    pub fn tick(&mut self) -> CoreResult<()> {
        let timeout = self.poll_timeout();
        let n = self.shared.poll.poll(&mut self.events, timeout).map_err(CoreError::Io)?;

        if n > 0 {
            self.dispatch()?;
        }

        self.fire_due_timers();
        self.shared.tasks.drain_and_run();
        Ok(())
    }

    /// Pops and fires every timer due by now, one at a time, never holding
    /// the timers lock while a callback runs — a callback that cancels
    /// itself (spec.md §4.2, §8 scenario 2) re-locks the same mutex via
    /// [`ReactorHandle::cancel_timer`], which would deadlock if the lock
    /// from `pop_due` were still held.
    fn fire_due_timers(&mut self) {
        let now = Instant::now();
        loop {
            let due = self.shared.timers.lock().pop_due(now);
            let Some((id, fired_at, period, remaining, mut callback)) = due else { break };
            callback();
            self.shared.timers.lock().reschedule_after_fire(id, fired_at, period, remaining, callback);
        }
    }

    fn poll_timeout(&self) -> Option<Duration> {
        if !self.shared.tasks.is_empty() {
            return Some(Duration::ZERO);
        }
        let now = Instant::now();
        let bound = match self.shared.timers.lock().nearest() {
            Some(at) if at > now => (at - now).min(self.config.max_poll_timeout),
            Some(_) => Duration::ZERO,
            None => self.config.max_poll_timeout,
        };
        Some(bound)
    }

    fn dispatch(&mut self) -> CoreResult<()> {
        // Snapshot before dispatch: a handler that unregisters itself or a
        // peer mid-batch must not invalidate the rest of this batch's
        // iteration.
        let snapshot: Vec<(u64, Interest)> = self.events.iter().collect();
        let handle = self.handle();

        for (cookie, interest) in snapshot {
            if cookie == WAKER_COOKIE {
                self.shared.waker.drain();
                continue;
            }

            let id = ChannelId::from_u64(cookie);
            let channel = self.shared.channels.lock().get(&id).cloned();
            let Some(channel) = channel else { continue };

            let result = Self::dispatch_one(&channel, interest, &handle);
            if let Err(err) = result {
                tracing::warn!(cookie, error = %err, "channel handler returned an error");
            }
        }

        Ok(())
    }

    fn dispatch_one(channel: &SharedChannel, interest: Interest, handle: &ReactorHandle) -> CoreResult<()> {
        let mut guard = channel.lock().unwrap();
        if interest.is_error() {
            return guard.on_error(handle);
        }
        if interest.is_readable() {
            guard.on_readable(handle)?;
        }
        if interest.is_writable() {
            guard.on_writable(handle)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
impl AsRawFd for Reactor {
    fn as_raw_fd(&self) -> RawFd {
        self.shared.poll.as_raw_fd()
    }
}

/// The round-robin state an [`EventLoopGroup`] shares with every
/// [`GroupHandle`] cloned from it, split out so listeners can fan out
/// accepted connections without owning the group's join handles.
struct GroupShared {
    handles: Vec<ReactorHandle>,
    next: std::sync::atomic::AtomicUsize,
}

/// A cheap, `Send + Clone` reference to an [`EventLoopGroup`]'s round-robin
/// assignment, for code (chiefly [`Listener`](crate::net::Listener)) that
/// needs to hand work to "the next loop in the group" without holding the
/// group's thread join handles.
#[derive(Clone)]
pub struct GroupHandle {
    shared: Arc<GroupShared>,
}

impl GroupHandle {
    /// Returns the next reactor handle in round-robin order.
    pub fn next(&self) -> ReactorHandle {
        let i = self.shared.next.fetch_add(1, Ordering::Relaxed) % self.shared.handles.len();
        self.shared.handles[i].clone()
    }
}

/// A fixed-size pool of reactors, each running on its own thread, handed
/// out round-robin (spec component C13) — the idiomatic replacement for
/// hand-balancing connections across a manually sized set of loops.
pub struct EventLoopGroup {
    shared: Arc<GroupShared>,
    threads: Vec<JoinHandle<()>>,
}

impl EventLoopGroup {
    /// Spawns `n` reactors, each on its own OS thread, immediately running.
    pub fn new(n: usize) -> CoreResult<EventLoopGroup> {
        let mut handles = Vec::with_capacity(n);
        let mut threads = Vec::with_capacity(n);
        for i in 0..n {
            let mut reactor = Reactor::new()?;
            let handle = reactor.handle();
            let join = std::thread::Builder::new()
                .name(format!("reactor-{i}"))
                .spawn(move || {
                    if let Err(err) = reactor.run() {
                        tracing::error!(error = %err, "reactor loop exited with an error");
                    }
                })
                .map_err(CoreError::Io)?;
            handles.push(handle);
            threads.push(join);
        }
        let shared = Arc::new(GroupShared { handles, next: std::sync::atomic::AtomicUsize::new(0) });
        Ok(EventLoopGroup { shared, threads })
    }

    /// Returns the next handle in round-robin order.
    pub fn next(&self) -> ReactorHandle {
        self.handle().next()
    }

    /// A cloneable round-robin handle, for passing to a [`Listener`](crate::net::Listener)
    /// so accepted connections fan out across the group.
    pub fn handle(&self) -> GroupHandle {
        GroupHandle { shared: self.shared.clone() }
    }

    /// Signals every reactor to stop and joins its thread.
    pub fn shutdown(mut self) {
        for handle in &self.shared.handles {
            handle.stop();
        }
        for join in self.threads.drain(..) {
            let _ = join.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Listener;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn registering_an_already_registered_channel_fails() {
        let reactor = Reactor::new().unwrap();
        let handle = reactor.handle();
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let shared: SharedChannel = Arc::new(StdMutex::new(listener));
        handle.register(shared.clone(), Interest::READ).unwrap();
        assert!(matches!(handle.register(shared, Interest::READ), Err(CoreError::AlreadyRegistered)));
    }

    #[test]
    fn registering_beyond_the_configured_fd_ceiling_is_refused() {
        let config = ReactorConfig { max_open_fd: Some(3), ..ReactorConfig::default() };
        let reactor = Reactor::with_config(config).unwrap();
        let handle = reactor.handle();
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let shared: SharedChannel = Arc::new(StdMutex::new(listener));
        assert!(matches!(handle.register(shared, Interest::READ), Err(CoreError::FdLimitExceeded { .. })));
    }
}
