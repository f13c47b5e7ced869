//! Ordered timer manager (spec component C2).
//!
//! Unlike the teacher's hashed timing wheel (approximate buckets, good for
//! huge timeout counts with coarse resolution), this reactor needs exact
//! trigger-time ordering — `nearest()` must return precisely the next
//! timer due, matching `original_source/net/Timer.h`'s
//! `std::multimap<TimeStamp, std::shared_ptr<Timer>>`. A `BTreeMap` keyed
//! on `(trigger_instant, serial)` gives the same ordered-multimap
//! semantics idiomatically, with the serial breaking ties between timers
//! scheduled for the identical instant (spec.md §5, "Timers with the same
//! trigger time fire in FIFO order of their monotonic serial").
//!
//! A timer's identity ([`TimerId`]) is its serial alone, stable across
//! every re-fire of a repeating timer — unlike the `(instant, serial)`
//! map key, which changes each time a repeater reschedules. That split is
//! what lets `cancel` keep working against an id handed out once, and
//! what lets a timer cancel itself: see [`TimerManager::pop_due`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// `-1` in the original's `int32_t remaining_count` becomes `Repeat::Forever`;
/// idiomatic Rust has no business reusing a sentinel negative number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Forever,
    Times(u32),
}

impl Repeat {
    fn decrement(self) -> Option<Repeat> {
        match self {
            Repeat::Forever => Some(Repeat::Forever),
            Repeat::Times(0) | Repeat::Times(1) => None,
            Repeat::Times(n) => Some(Repeat::Times(n - 1)),
        }
    }
}

/// A timer's stable identity: its monotonic creation serial. Valid for the
/// timer's whole lifetime, through every re-fire of a repeater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// `Instant` has no total order usable as a `BTreeMap` key component
/// beyond what `Ord` already gives it, but it also isn't `Hash`-friendly
/// for our purposes; wrapping keeps the key type's intent explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct InstantKey(Instant);

struct TimerEntry {
    period: Duration,
    remaining: Repeat,
    callback: Box<dyn FnMut() + Send>,
    cancelled: bool,
}

/// Loop-local (not `Send`/shared) collection of pending timers, owned by
/// exactly one [`Reactor`](crate::reactor::Reactor).
///
/// Firing a timer is split across [`pop_due`](Self::pop_due) and
/// [`reschedule_after_fire`](Self::reschedule_after_fire) rather than
/// bundled into one `update` call that itself invokes callbacks. A caller
/// that holds this manager behind a lock (the reactor does, via
/// `parking_lot::Mutex<TimerManager>`) must release that lock before
/// running the callback — otherwise a callback that cancels *itself*
/// (spec.md §4.2, "this ordering lets a fired callback cancel itself")
/// would need to re-lock the same mutex on the same thread and deadlock.
/// The `firing`/`firing_cancelled` pair below is what makes that safe even
/// though the entry has already been removed from `entries` by the time
/// the callback runs: `cancel` checks "is this the id currently firing?"
/// before it ever looks in the map.
pub struct TimerManager {
    entries: BTreeMap<(InstantKey, u64), TimerEntry>,
    index: HashMap<u64, InstantKey>,
    serial: AtomicU64,
    firing: Option<u64>,
    firing_cancelled: bool,
}

impl TimerManager {
    pub fn new() -> Self {
        TimerManager {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            serial: AtomicU64::new(0),
            firing: None,
            firing_cancelled: false,
        }
    }

    /// Schedules `callback` to run after `delay`, repeating every `period`
    /// according to `repeat`. A one-shot timer is `schedule_after(delay,
    /// Duration::ZERO, Repeat::Times(1), cb)`.
    pub fn schedule_after(
        &mut self,
        delay: Duration,
        period: Duration,
        repeat: Repeat,
        callback: Box<dyn FnMut() + Send>,
    ) -> TimerId {
        self.schedule_at(Instant::now() + delay, period, repeat, callback)
    }

    pub fn schedule_at(
        &mut self,
        at: Instant,
        period: Duration,
        repeat: Repeat,
        callback: Box<dyn FnMut() + Send>,
    ) -> TimerId {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        self.index.insert(serial, InstantKey(at));
        self.entries.insert((InstantKey(at), serial), TimerEntry { period, remaining: repeat, callback, cancelled: false });
        TimerId(serial)
    }

    /// Marks a timer dead. A no-op if `id` is unknown or already fired to
    /// completion (matches spec.md §8 scenario 1: "a subsequent `cancel`
    /// returns false"). Safe to call from inside that timer's own callback
    /// — `id` naming the entry currently firing is recorded via
    /// `firing_cancelled` rather than looked up in `entries`, since the
    /// firing entry has already been removed from the map by
    /// [`pop_due`](Self::pop_due). Returns whether a live timer was
    /// actually cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        if self.firing == Some(id.0) {
            let was_live = !self.firing_cancelled;
            self.firing_cancelled = true;
            return was_live;
        }
        let Some(&trigger) = self.index.get(&id.0) else { return false };
        match self.entries.get_mut(&(trigger, id.0)) {
            Some(entry) if !entry.cancelled => {
                entry.cancelled = true;
                true
            }
            _ => false,
        }
    }

    /// The trigger time of the earliest live timer, if any. The reactor
    /// uses this to bound the multiplexer's poll timeout.
    pub fn nearest(&self) -> Option<Instant> {
        self.entries.iter().find(|(_, entry)| !entry.cancelled).map(|(&(InstantKey(t), _), _)| t)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|e| e.cancelled)
    }

    /// Removes and returns the earliest live timer due at or before `now`,
    /// marking it as the one currently firing. Entries cancelled while
    /// queued are dropped silently and skipped. Returns `None` once
    /// nothing due remains; call in a loop to drain everything due in one
    /// tick. The caller must invoke the returned callback *without* holding
    /// whatever lock guards this manager, then call
    /// [`reschedule_after_fire`](Self::reschedule_after_fire) with the same
    /// id to either requeue a live repeater or drop a finished one.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerId, Instant, Duration, Repeat, Box<dyn FnMut() + Send>)> {
        loop {
            let &(trigger_key, serial) = self.entries.keys().next()?;
            if trigger_key.0 > now {
                return None;
            }
            let entry = self.entries.remove(&(trigger_key, serial)).expect("key just observed present");
            self.index.remove(&serial);
            if entry.cancelled {
                continue;
            }
            self.firing = Some(serial);
            self.firing_cancelled = false;
            return Some((TimerId(serial), trigger_key.0, entry.period, entry.remaining, entry.callback));
        }
    }

    /// Completes the fire started by [`pop_due`]: requeues the timer at
    /// `fired_at + period` if it's still alive (not cancelled before or
    /// during its own callback) and has fires remaining, otherwise drops
    /// it. Either way clears the "currently firing" marker.
    pub fn reschedule_after_fire(
        &mut self,
        id: TimerId,
        fired_at: Instant,
        period: Duration,
        remaining: Repeat,
        callback: Box<dyn FnMut() + Send>,
    ) {
        let cancelled = self.firing_cancelled;
        self.firing = None;
        self.firing_cancelled = false;
        if cancelled {
            return;
        }
        if let Some(next_remaining) = remaining.decrement() {
            let next_trigger = InstantKey(fired_at + period);
            self.index.insert(id.0, next_trigger);
            self.entries.insert((next_trigger, id.0), TimerEntry { period, remaining: next_remaining, callback, cancelled: false });
        }
    }

    /// Drains and fires every timer due at or before `now` in one call,
    /// for callers (tests, chiefly) that don't need the pop/fire/reschedule
    /// split a locked caller requires. Self-cancellation from inside a
    /// callback run through this method is *not* supported the way it is
    /// through `pop_due`/`reschedule_after_fire`, since there is no shared
    /// reference for the callback to cancel itself through in the first
    /// place at this unlocked layer.
    pub fn update(&mut self, now: Instant) {
        while let Some((id, fired_at, period, remaining, mut callback)) = self.pop_due(now) {
            callback();
            self.reschedule_after_fire(id, fired_at, period, remaining, callback);
        }
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn one_shot_fires_once() {
        let mut mgr = TimerManager::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        mgr.schedule_after(Duration::ZERO, Duration::ZERO, Repeat::Times(1), Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        mgr.update(Instant::now());
        mgr.update(Instant::now());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn repeating_timer_reschedules() {
        let mut mgr = TimerManager::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        mgr.schedule_after(Duration::ZERO, Duration::from_millis(1), Repeat::Times(3), Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        for _ in 0..3 {
            std::thread::sleep(Duration::from_millis(2));
            mgr.update(Instant::now());
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(mgr.is_empty());
    }

    #[test]
    fn cancel_before_first_fire_suppresses_it() {
        let mut mgr = TimerManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let id = mgr.schedule_after(Duration::from_millis(5), Duration::ZERO, Repeat::Times(1), Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(mgr.cancel(id));
        std::thread::sleep(Duration::from_millis(6));
        mgr.update(Instant::now());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        // Already dead: a second cancel reports nothing left to cancel.
        assert!(!mgr.cancel(id));
    }

    #[test]
    fn cancel_survives_across_reschedules_of_a_repeater() {
        // The id handed out at creation must still work after the timer
        // has already fired and been requeued once — i.e. identity must
        // not be tied to the (instant, serial) map key, which changes on
        // every reschedule.
        let mut mgr = TimerManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let id = mgr.schedule_after(Duration::ZERO, Duration::from_millis(5), Repeat::Forever, Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        mgr.update(Instant::now());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert!(mgr.cancel(id));
        std::thread::sleep(Duration::from_millis(6));
        mgr.update(Instant::now());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nearest_reports_earliest_live_timer() {
        let mut mgr = TimerManager::new();
        assert!(mgr.nearest().is_none());
        let now = Instant::now();
        mgr.schedule_after(Duration::from_secs(10), Duration::ZERO, Repeat::Times(1), Box::new(|| {}));
        mgr.schedule_after(Duration::from_secs(1), Duration::ZERO, Repeat::Times(1), Box::new(|| {}));
        let nearest = mgr.nearest().unwrap();
        assert!(nearest > now && nearest < now + Duration::from_secs(5));
    }

    #[test]
    fn same_instant_timers_fire_in_serial_order() {
        let mut mgr = TimerManager::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let at = Instant::now();
        let o1 = order.clone();
        mgr.schedule_at(at, Duration::ZERO, Repeat::Times(1), Box::new(move || o1.lock().unwrap().push(1)));
        let o2 = order.clone();
        mgr.schedule_at(at, Duration::ZERO, Repeat::Times(1), Box::new(move || o2.lock().unwrap().push(2)));
        mgr.update(at);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }
}
