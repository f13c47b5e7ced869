//! Callback-style futures and promises (spec component C10), plus the
//! multi-future combinators built on top of them (spec section 9).
//!
//! This is deliberately not `std::future::Future`: no executor polling, no
//! `Waker`, no `Pin`. A [`Future<T>`] resolves exactly once, either by
//! blocking (`wait`) or by firing a registered continuation (`then`,
//! `then_try`, `and_then`) on whichever thread completes the paired
//! [`Promise<T>`] — the same shape as `original_source/future/Future.h`.

mod combinators;
mod executor;
mod promise;
mod try_;

pub use combinators::{when_all, when_all2, when_all3, when_any, when_if_any, when_if_n, when_n};
pub use executor::{Executor, Inline};
pub use promise::{Future, Promise};
pub use try_::{BoxError, Try};
