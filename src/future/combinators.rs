//! Composition combinators over multiple futures (spec section 9).
//!
//! Each of these leans on [`Promise`]'s first-transition-wins semantics
//! instead of hand-rolled atomics: `when_any` is simply every input
//! racing to complete the same promise, and the losers' completions are
//! silently dropped by `Shared::complete` itself.

use std::sync::{Arc, Mutex};

use super::promise::{Future, Promise};
use super::try_::Try;

/// Resolves once every input has resolved, preserving input order.
pub fn when_all<T: Send + 'static>(futures: Vec<Future<T>>) -> Future<Vec<Try<T>>> {
    let n = futures.len();
    let (pm, fut) = Promise::<Vec<Try<T>>>::pair();
    if n == 0 {
        pm.set_value(Vec::new());
        return fut;
    }

    let slots: Vec<Mutex<Option<Try<T>>>> = (0..n).map(|_| Mutex::new(None)).collect();
    let remaining = Arc::new(Mutex::new(n));
    let slots = Arc::new(slots);

    for (i, f) in futures.into_iter().enumerate() {
        let pm = pm.clone();
        let remaining = remaining.clone();
        let slots = slots.clone();
        f.set_callback(Box::new(move |t| {
            *slots[i].lock().unwrap() = Some(t);
            let mut rem = remaining.lock().unwrap();
            *rem -= 1;
            if *rem == 0 {
                let results = slots.iter().map(|s| s.lock().unwrap().take().unwrap()).collect();
                pm.set_value(results);
            }
        }));
    }

    fut
}

/// Variadic two-future form, resolving to a tuple in argument order.
pub fn when_all2<A, B>(a: Future<A>, b: Future<B>) -> Future<(Try<A>, Try<B>)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    let (pm, fut) = Promise::<(Try<A>, Try<B>)>::pair();
    let slot_a: Arc<Mutex<Option<Try<A>>>> = Arc::new(Mutex::new(None));
    let slot_b: Arc<Mutex<Option<Try<B>>>> = Arc::new(Mutex::new(None));
    let remaining = Arc::new(Mutex::new(2u8));

    {
        let pm = pm.clone();
        let slot_a = slot_a.clone();
        let slot_b = slot_b.clone();
        let remaining = remaining.clone();
        a.set_callback(Box::new(move |t| {
            *slot_a.lock().unwrap() = Some(t);
            let mut rem = remaining.lock().unwrap();
            *rem -= 1;
            if *rem == 0 {
                pm.set_value((slot_a.lock().unwrap().take().unwrap(), slot_b.lock().unwrap().take().unwrap()));
            }
        }));
    }
    b.set_callback(Box::new(move |t| {
        *slot_b.lock().unwrap() = Some(t);
        let mut rem = remaining.lock().unwrap();
        *rem -= 1;
        if *rem == 0 {
            pm.set_value((slot_a.lock().unwrap().take().unwrap(), slot_b.lock().unwrap().take().unwrap()));
        }
    }));

    fut
}

/// Variadic three-future form (the shape spec section 8's testable
/// property 6 exercises directly: `a, b, c` completed out of order still
/// resolve in tuple order).
pub fn when_all3<A, B, C>(a: Future<A>, b: Future<B>, c: Future<C>) -> Future<(Try<A>, Try<B>, Try<C>)>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    let (pm, fut) = Promise::<(Try<A>, Try<B>, Try<C>)>::pair();
    let slot_a: Arc<Mutex<Option<Try<A>>>> = Arc::new(Mutex::new(None));
    let slot_b: Arc<Mutex<Option<Try<B>>>> = Arc::new(Mutex::new(None));
    let slot_c: Arc<Mutex<Option<Try<C>>>> = Arc::new(Mutex::new(None));
    let remaining = Arc::new(Mutex::new(3u8));

    macro_rules! arm {
        ($fut:expr, $slot:expr) => {{
            let pm = pm.clone();
            let slot_a = slot_a.clone();
            let slot_b = slot_b.clone();
            let slot_c = slot_c.clone();
            let remaining = remaining.clone();
            let slot = $slot.clone();
            $fut.set_callback(Box::new(move |t| {
                *slot.lock().unwrap() = Some(t);
                let mut rem = remaining.lock().unwrap();
                *rem -= 1;
                if *rem == 0 {
                    pm.set_value((
                        slot_a.lock().unwrap().take().unwrap(),
                        slot_b.lock().unwrap().take().unwrap(),
                        slot_c.lock().unwrap().take().unwrap(),
                    ));
                }
            }));
        }};
    }
    arm!(a, slot_a);
    arm!(b, slot_b);
    arm!(c, slot_c);

    fut
}

/// Resolves with the `(index, result)` of whichever input resolves
/// first; every other input's eventual result is discarded.
pub fn when_any<T: Send + 'static>(futures: Vec<Future<T>>) -> Future<(usize, Try<T>)> {
    let (pm, fut) = Promise::<(usize, Try<T>)>::pair();
    for (i, f) in futures.into_iter().enumerate() {
        let pm = pm.clone();
        f.set_callback(Box::new(move |t| pm.set_value((i, t))));
    }
    fut
}

/// Like [`when_any`], but only a result for which `pred` returns `true`
/// counts; if every input resolves without one matching, the combined
/// future fails.
pub fn when_if_any<T, F>(futures: Vec<Future<T>>, pred: F) -> Future<(usize, Try<T>)>
where
    T: Send + 'static,
    F: Fn(&Try<T>) -> bool + Send + Sync + 'static,
{
    let n = futures.len();
    let (pm, fut) = Promise::<(usize, Try<T>)>::pair();
    if n == 0 {
        pm.set_exception("when_if_any: no inputs".into());
        return fut;
    }

    let pred = Arc::new(pred);
    let remaining = Arc::new(Mutex::new(n));
    for (i, f) in futures.into_iter().enumerate() {
        let pm = pm.clone();
        let pred = pred.clone();
        let remaining = remaining.clone();
        f.set_callback(Box::new(move |t| {
            if pred(&t) {
                pm.set_value((i, t));
                return;
            }
            let mut rem = remaining.lock().unwrap();
            *rem -= 1;
            if *rem == 0 {
                pm.set_exception("when_if_any: no input matched the predicate".into());
            }
        }));
    }

    fut
}

/// Resolves once the first `k` inputs have resolved, in completion order.
pub fn when_n<T: Send + 'static>(k: usize, futures: Vec<Future<T>>) -> Future<Vec<(usize, Try<T>)>> {
    let (pm, fut) = Promise::<Vec<(usize, Try<T>)>>::pair();
    if k == 0 {
        pm.set_value(Vec::new());
        return fut;
    }

    let collected: Arc<Mutex<Vec<(usize, Try<T>)>>> = Arc::new(Mutex::new(Vec::with_capacity(k)));
    for (i, f) in futures.into_iter().enumerate() {
        let pm = pm.clone();
        let collected = collected.clone();
        f.set_callback(Box::new(move |t| {
            let done = {
                let mut c = collected.lock().unwrap();
                if c.len() < k {
                    c.push((i, t));
                }
                c.len() == k
            };
            if done {
                let results = std::mem::take(&mut *collected.lock().unwrap());
                pm.set_value(results);
            }
        }));
    }

    fut
}

/// Resolves once the first `k` *matching* inputs have resolved; fails if
/// the inputs are exhausted first.
pub fn when_if_n<T, F>(k: usize, futures: Vec<Future<T>>, pred: F) -> Future<Vec<(usize, Try<T>)>>
where
    T: Send + 'static,
    F: Fn(&Try<T>) -> bool + Send + Sync + 'static,
{
    let n = futures.len();
    let (pm, fut) = Promise::<Vec<(usize, Try<T>)>>::pair();
    if k == 0 {
        pm.set_value(Vec::new());
        return fut;
    }
    if k > n {
        pm.set_exception(format!("when_if_n: k={k} exceeds {n} inputs").into());
        return fut;
    }

    let pred = Arc::new(pred);
    let collected: Arc<Mutex<Vec<(usize, Try<T>)>>> = Arc::new(Mutex::new(Vec::with_capacity(k)));
    let remaining = Arc::new(Mutex::new(n));

    for (i, f) in futures.into_iter().enumerate() {
        let pm = pm.clone();
        let pred = pred.clone();
        let collected = collected.clone();
        let remaining = remaining.clone();
        f.set_callback(Box::new(move |t| {
            let matched = pred(&t);
            let rem_after = {
                let mut rem = remaining.lock().unwrap();
                *rem -= 1;
                *rem
            };

            if matched {
                let done = {
                    let mut c = collected.lock().unwrap();
                    if c.len() < k {
                        c.push((i, t));
                    }
                    c.len() == k
                };
                if done {
                    let results = std::mem::take(&mut *collected.lock().unwrap());
                    pm.set_value(results);
                    return;
                }
            }

            if rem_after == 0 {
                let have = collected.lock().unwrap().len();
                if have < k {
                    pm.set_exception(format!("when_if_n: only {have} of {k} matched before inputs ran out").into());
                }
            }
        }));
    }

    fut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_all_preserves_order_regardless_of_completion_order() {
        let (pa, fa) = Promise::<i32>::pair();
        let (pb, fb) = Promise::<i32>::pair();
        let (pc, fc) = Promise::<i32>::pair();
        let combined = when_all(vec![fa, fb, fc]);
        pc.set_value(3);
        pa.set_value(1);
        pb.set_value(2);
        let results = combined.wait().unwrap();
        let values: Vec<i32> = results.into_iter().map(|t| t.unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn when_all3_tuple_resolves_in_order() {
        let (pa, fa) = Promise::<i32>::pair();
        let (pb, fb) = Promise::<&'static str>::pair();
        let (pc, fc) = Promise::<bool>::pair();
        let combined = when_all3(fa, fb, fc);
        pc.set_value(true);
        pa.set_value(1);
        pb.set_value("x");
        let (a, b, c) = combined.wait().unwrap();
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), "x");
        assert!(c.unwrap());
    }

    #[test]
    fn when_any_takes_first_to_resolve() {
        let (pa, fa) = Promise::<i32>::pair();
        let (pb, fb) = Promise::<i32>::pair();
        let combined = when_any(vec![fa, fb]);
        pb.set_value(99);
        pa.set_value(1);
        let (idx, val) = combined.wait().unwrap();
        assert_eq!(idx, 1);
        assert_eq!(val.unwrap(), 99);
    }

    #[test]
    fn when_n_stops_at_k() {
        let (pa, fa) = Promise::<i32>::pair();
        let (pb, fb) = Promise::<i32>::pair();
        let (_pc, fc) = Promise::<i32>::pair();
        let combined = when_n(2, vec![fa, fb, fc]);
        pa.set_value(1);
        pb.set_value(2);
        let results = combined.wait().unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn when_if_any_fails_when_nothing_matches() {
        let (pa, fa) = Promise::<i32>::pair();
        let (pb, fb) = Promise::<i32>::pair();
        let combined = when_if_any(vec![fa, fb], |t| matches!(t, Try::Ok(v) if *v > 100));
        pa.set_value(1);
        pb.set_value(2);
        assert!(combined.wait().is_err());
    }
}
