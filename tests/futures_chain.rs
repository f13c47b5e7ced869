//! Future chaining and combinator scenarios (spec.md §8, "Future chain"
//! and "when_all") exercised without any reactor involved — the future
//! library is reactor-independent except for `on_timeout`.

use corevent::{when_all3, Promise, Try};

#[test]
fn chained_then_calls_observe_the_final_mapped_value() {
    let (pm, fut) = Promise::<i32>::pair();
    let chained = fut.then(|x| x + 1).then(|x| x.to_string());
    pm.set_value(41);
    assert_eq!(chained.wait().unwrap(), "42");
}

#[test]
fn when_all3_resolves_once_with_results_in_tuple_order_regardless_of_completion_order() {
    let (pa, fa) = Promise::<&'static str>::pair();
    let (pb, fb) = Promise::<&'static str>::pair();
    let (pc, fc) = Promise::<&'static str>::pair();

    let combined = when_all3(fa, fb, fc);

    // Completed out of declaration order: c, a, b.
    pc.set_value("c");
    pa.set_value("a");
    pb.set_value("b");

    let (ra, rb, rc) = combined.wait().unwrap();
    assert_eq!(ra.unwrap(), "a");
    assert_eq!(rb.unwrap(), "b");
    assert_eq!(rc.unwrap(), "c");
}

#[test]
fn a_future_completes_exactly_once_even_under_a_racing_second_attempt() {
    let (pm, fut) = Promise::<i32>::pair();
    pm.clone().set_value(1);
    pm.set_value(2); // second transition is a no-op.
    assert_eq!(fut.wait().unwrap(), 1);
}

#[test]
fn then_on_a_failed_future_propagates_the_error_without_running() {
    let (pm, fut) = Promise::<i32>::pair();
    let mapped = fut.then(|x| x + 1);
    pm.set_exception("boom".into());
    assert!(mapped.wait().is_err());
}

#[test]
fn try_exposes_ok_and_err_helpers() {
    let ok: Try<i32> = Try::Ok(7);
    assert!(ok.is_ok());
    assert_eq!(ok.ok(), Some(7));

    let err: Try<i32> = Try::Err("nope".into());
    assert!(err.is_err());
    assert_eq!(err.ok(), None);
}
