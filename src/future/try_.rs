//! `Try<T>`: the sum type every [`Future`](super::Future) resolves to
//! (spec section 9, "exceptions as error channel").
//!
//! Where `original_source/future/Try.h` leans on an exception pointer
//! captured from a `catch` block, this carries a boxed `std::error::Error`
//! instead — the idiomatic equivalent for code that never throws.

use std::error::Error as StdError;
use std::fmt;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The value or error a completed future carries.
pub enum Try<T> {
    Ok(T),
    Err(BoxError),
}

impl<T> Try<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Try::Ok(_))
    }

    pub fn is_err(&self) -> bool {
        matches!(self, Try::Err(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Try::Ok(v) => Some(v),
            Try::Err(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Try<U> {
        match self {
            Try::Ok(v) => Try::Ok(f(v)),
            Try::Err(e) => Try::Err(e),
        }
    }

    /// Unwraps the value, panicking with the error's `Display` otherwise.
    /// Reserved for tests and examples; library code should always match
    /// on `Try` explicitly.
    pub fn unwrap(self) -> T {
        match self {
            Try::Ok(v) => v,
            Try::Err(e) => panic!("Try::unwrap on Err: {e}"),
        }
    }
}

impl<T> From<Result<T, BoxError>> for Try<T> {
    fn from(r: Result<T, BoxError>) -> Self {
        match r {
            Ok(v) => Try::Ok(v),
            Err(e) => Try::Err(e),
        }
    }
}

impl<T> fmt::Debug for Try<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Try::Ok(v) => write!(f, "Try::Ok({v:?})"),
            Try::Err(e) => write!(f, "Try::Err({e})"),
        }
    }
}
