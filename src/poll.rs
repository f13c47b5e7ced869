//! Platform-independent façade over the OS multiplexer (spec component C3).
//!
//! A thin wrapper the way the teacher's own `Poll`/`Registry` split wraps
//! `sys::Selector`, except registration keys on a plain `u64` cookie (the
//! caller's [`ChannelId`](crate::token::ChannelId)) rather than a
//! caller-supplied `Token`, and `register`/`modify` collapse into each
//! other on an unknown/known fd the way spec section 4.3 requires: `modify`
//! on an unknown fd falls back to `register`, `register` on an already-known
//! fd falls back to `modify`, `unregister` of an unknown fd is a no-op.

use std::collections::HashSet;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use parking_lot::Mutex;

use crate::interest::Interest;
use crate::sys;
use crate::sys::unix::Selector;

pub use sys::Events;

/// Tracks which fds are currently known to the underlying selector so
/// `register`/`modify` can fall back into each other per spec section 4.3
/// without the selector itself needing to expose that bookkeeping.
pub struct Poll {
    selector: Selector,
    known: Mutex<HashSet<RawFd>>,
}

impl Poll {
    pub fn new() -> io::Result<Poll> {
        Ok(Poll { selector: Selector::new()?, known: Mutex::new(HashSet::new()) })
    }

    /// Registers `fd` for `interest` under `cookie`. Falls back to
    /// `modify` if `fd` is already known, matching spec section 4.3.
    pub fn register(&self, fd: RawFd, cookie: u64, interest: Interest) -> io::Result<()> {
        let mut known = self.known.lock();
        if known.contains(&fd) {
            return self.selector.modify(fd, interest, cookie);
        }
        self.selector.register(fd, interest, cookie)?;
        known.insert(fd);
        Ok(())
    }

    /// Changes the interest set for `fd`. Falls back to `register` if `fd`
    /// isn't yet known, matching spec section 4.3.
    pub fn modify(&self, fd: RawFd, cookie: u64, interest: Interest) -> io::Result<()> {
        let mut known = self.known.lock();
        if !known.contains(&fd) {
            self.selector.register(fd, interest, cookie)?;
            known.insert(fd);
            return Ok(());
        }
        self.selector.modify(fd, interest, cookie)
    }

    /// Deregisters `fd`. A no-op if `fd` isn't known, matching spec
    /// section 4.3.
    pub fn unregister(&self, fd: RawFd) -> io::Result<()> {
        let mut known = self.known.lock();
        if known.remove(&fd) {
            self.selector.unregister(fd)?;
        }
        Ok(())
    }

    /// Blocks for up to `timeout` (forever if `None`), filling `events`
    /// with whatever fired, and returns how many did. `EINTR` surfaces as
    /// zero events rather than an error.
    pub fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        self.selector.select(events, timeout)?;
        Ok(events.len())
    }

    /// Registers a self-pipe [`sys::Waker`] under `cookie` so
    /// [`ReactorHandle::execute`](crate::reactor::ReactorHandle::execute)
    /// can wake a blocked `poll` from another thread.
    pub fn make_waker(&self, cookie: u64) -> io::Result<sys::Waker> {
        sys::Waker::new(&self.selector, cookie)
    }
}

impl AsRawFd for Poll {
    fn as_raw_fd(&self) -> RawFd {
        self.selector.as_raw_fd()
    }
}
