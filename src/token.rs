//! Channel identity (spec section 3, "Channel").
//!
//! Unlike `mio::Token` (caller-chosen, arbitrary `usize`), a [`ChannelId`] is
//! always minted by the [`Reactor`](crate::reactor::Reactor) that owns the
//! channel: a per-loop monotonically increasing counter that wraps and skips
//! zero, since zero is reserved to mean "not yet registered".

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    /// The sentinel value a freshly constructed channel carries before it
    /// has been registered with a reactor.
    pub const UNASSIGNED: ChannelId = ChannelId(0);

    pub fn is_assigned(self) -> bool {
        self.0 != 0
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Reconstructs a `ChannelId` from the cookie a multiplexer event
    /// carries back. The cookie always originated from [`Self::as_u64`]
    /// on an id this generator minted, so no validation is needed here.
    pub(crate) fn from_u64(cookie: u64) -> ChannelId {
        ChannelId(cookie)
    }
}

/// Per-reactor generator of [`ChannelId`]s. Wraps around `u64::MAX` back to
/// `1`, skipping `0`, mirroring `EventLoop::Register`'s `++s_id; if (s_id ==
/// 0) s_id = 1;` in `original_source/net/EventLoop.cc`.
#[derive(Debug)]
pub(crate) struct ChannelIdGen {
    next: AtomicU64,
}

impl ChannelIdGen {
    pub(crate) fn new() -> Self {
        ChannelIdGen { next: AtomicU64::new(1) }
    }

    pub(crate) fn next(&self) -> ChannelId {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return ChannelId(id);
            }
            // Wrapped exactly onto zero; `fetch_add` already advanced past
            // it, so just retry to grab the following value.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_yields_zero() {
        let gen = ChannelIdGen::new();
        for _ in 0..1000 {
            assert!(gen.next().is_assigned());
        }
    }
}
