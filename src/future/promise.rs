//! Shared state, `Promise<T>`, and `Future<T>` (spec component C10).
//!
//! Grounded in `original_source/future/Future.h`'s `State<T>`/`Promise<T>`/
//! `Future<T>` trio: a `Mutex`-guarded shared cell plus a one-shot
//! continuation slot. The C++ original pairs a `std::promise`/`std::future`
//! with a second, separately-guarded `then_` callback so that both
//! `GetValue()` and a registered continuation can observe the same
//! result; here a single slot holds either the pending callback or the
//! delivered result; `Future::wait` and `Future::then` are therefore two
//! alternative ways to consume the same one-shot result, never both.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use super::executor::{Executor, Inline};
use super::try_::{BoxError, Try};

type Callback<T> = Box<dyn FnOnce(Try<T>) + Send>;

struct Inner<T> {
    result: Option<Try<T>>,
    callback: Option<Callback<T>>,
    resolved: bool,
}

struct Shared<T> {
    state: Mutex<Inner<T>>,
    cond: Condvar,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Shared { state: Mutex::new(Inner { result: None, callback: None, resolved: false }), cond: Condvar::new() }
    }

    /// First caller to resolve this state wins; every later call is a
    /// silent no-op — the mechanism `on_timeout` relies on to let value
    /// delivery and timer expiry race safely.
    fn complete(self: &Arc<Self>, t: Try<T>) {
        let cb = {
            let mut state = self.state.lock().unwrap();
            if state.resolved {
                return;
            }
            state.resolved = true;
            state.callback.take()
        };

        match cb {
            Some(cb) => cb(t),
            None => {
                {
                    let mut state = self.state.lock().unwrap();
                    state.result = Some(t);
                }
                self.cond.notify_all();
            }
        }
    }

    fn set_callback(self: &Arc<Self>, cb: Callback<T>) {
        let mut state = self.state.lock().unwrap();
        if let Some(result) = state.result.take() {
            drop(state);
            cb(result);
        } else {
            state.callback = Some(cb);
        }
    }
}

/// One-shot producer half of a future/promise pair.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise { shared: self.shared.clone() }
    }
}

impl<T: Send + 'static> Promise<T> {
    /// Builds a fresh producer/consumer pair.
    pub fn pair() -> (Promise<T>, Future<T>) {
        let shared = Arc::new(Shared::new());
        (Promise { shared: shared.clone() }, Future { shared })
    }

    pub fn set_value(&self, value: T) {
        self.shared.complete(Try::Ok(value));
    }

    pub fn set_exception(&self, err: BoxError) {
        self.shared.complete(Try::Err(err));
    }

    pub fn set_try(&self, t: Try<T>) {
        self.shared.complete(t);
    }
}

/// One-shot consumer half of a future/promise pair.
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Future<T> {
    /// A future that is already resolved with `value`.
    pub fn ready(value: T) -> Future<T> {
        let (pm, fut) = Promise::pair();
        pm.set_value(value);
        fut
    }

    pub fn failed(err: BoxError) -> Future<T> {
        let (pm, fut) = Promise::pair();
        pm.set_exception(err);
        fut
    }

    pub fn is_ready(&self) -> bool {
        self.shared.state.lock().unwrap().resolved
    }

    /// Blocks the calling thread until the result is available, then
    /// returns it. Must not be mixed with `.then()`/`.then_try()` on the
    /// same future — whichever consumption mode runs first claims the
    /// result.
    pub fn wait(self) -> Try<T> {
        let mut state = self.shared.state.lock().unwrap();
        while state.result.is_none() {
            state = self.shared.cond.wait(state).unwrap();
        }
        state.result.take().expect("checked is_none above")
    }

    /// Registers `cb` to run (inline, on whichever thread resolves the
    /// promise) once the result is ready, or immediately if it already is.
    pub fn set_callback(self, cb: Callback<T>) {
        self.shared.set_callback(cb);
    }

    /// Full-control continuation: receives and returns a `Try`, so it can
    /// observe or translate errors instead of having them silently
    /// propagate.
    pub fn then_try<U, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(Try<T>) -> Try<U> + Send + 'static,
    {
        self.then_try_on(&Inline, f)
    }

    pub fn then_try_on<U, F, E>(self, executor: &E, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(Try<T>) -> Try<U> + Send + 'static,
        E: Executor,
    {
        let (pm, next) = Promise::<U>::pair();
        let task_pm = pm.clone();
        let runner: Callback<T> = Box::new(move |t| task_pm.set_try(f(t)));
        executor.execute(Box::new(move || self.set_callback(runner)));
        next
    }

    /// Maps the success value; an `Err` propagates untouched, matching
    /// the "exceptions skip intermediate handlers" rule.
    pub fn then<U, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then_try(|t| match t {
            Try::Ok(v) => Try::Ok(f(v)),
            Try::Err(e) => Try::Err(e),
        })
    }

    pub fn then_on<U, F, E>(self, executor: &E, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
        E: Executor,
    {
        self.then_try_on(executor, |t| match t {
            Try::Ok(v) => Try::Ok(f(v)),
            Try::Err(e) => Try::Err(e),
        })
    }

    /// Monadic flattening: `f` itself returns a `Future<U>`, and the
    /// composed future resolves when that inner future does.
    pub fn and_then<U, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Future<U> + Send + 'static,
    {
        let (pm, next) = Promise::<U>::pair();
        self.set_callback(Box::new(move |t| match t {
            Try::Ok(v) => {
                let inner = f(v);
                let pm2 = pm.clone();
                inner.set_callback(Box::new(move |u| pm2.set_try(u)));
            }
            Try::Err(e) => pm.set_exception(e),
        }));
        next
    }

    /// Races value delivery against a `delay`-out timer armed on
    /// `handle`. Whichever transitions first wins; the loser's effect is
    /// dropped (spec section 9: "the cancellation-vs-fire race ... the
    /// first to transition wins").
    pub fn on_timeout<F>(self, delay: Duration, handler: F, handle: &crate::reactor::ReactorHandle) -> Future<T>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (pm, next) = Promise::<T>::pair();

        let timer_id_slot: Arc<Mutex<Option<crate::timer::TimerId>>> = Arc::new(Mutex::new(None));
        let timer_id_slot_for_value = timer_id_slot.clone();
        let handle_for_value = handle.clone();
        let pm_for_value = pm.clone();

        self.set_callback(Box::new(move |t| {
            if let Some(id) = timer_id_slot_for_value.lock().unwrap().take() {
                handle_for_value.cancel_timer(id);
            }
            pm_for_value.set_try(t);
        }));

        let pm_for_timer = pm;
        let timer_id = handle.schedule_after(
            delay,
            Duration::ZERO,
            crate::timer::Repeat::Times(1),
            Box::new(move || {
                pm_for_timer.set_value(handler());
            }),
        );
        *timer_id_slot.lock().unwrap() = Some(timer_id);

        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn ready_future_resolves_immediately() {
        let fut = Future::ready(42);
        assert!(fut.is_ready());
        assert_eq!(fut.wait().unwrap(), 42);
    }

    #[test]
    fn then_maps_value() {
        let (pm, fut) = Promise::<i32>::pair();
        let mapped = fut.then(|v| v * 2);
        pm.set_value(21);
        assert_eq!(mapped.wait().unwrap(), 42);
    }

    #[test]
    fn then_skips_on_error() {
        let (pm, fut) = Promise::<i32>::pair();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let mapped = fut.then(move |v| {
            ran2.fetch_add(1, Ordering::SeqCst);
            v * 2
        });
        pm.set_exception("boom".into());
        assert!(mapped.wait().is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn and_then_flattens_nested_future() {
        let (pm, fut) = Promise::<i32>::pair();
        let chained = fut.and_then(|v| Future::ready(v + 1));
        pm.set_value(1);
        assert_eq!(chained.wait().unwrap(), 2);
    }

    #[test]
    fn second_completion_is_ignored() {
        let (pm, fut) = Promise::<i32>::pair();
        pm.set_value(1);
        pm.set_value(2);
        assert_eq!(fut.wait().unwrap(), 1);
    }
}
