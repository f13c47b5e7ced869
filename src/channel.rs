//! Polymorphic event source registered with a [`Reactor`](crate::reactor::Reactor)
//! (spec component C4).
//!
//! A [`Channel`] is `{ unique_id, fd, read_handler, write_handler,
//! error_handler }` per spec section 3. Ownership is shared: the reactor
//! holds one `Arc` per registration, and dispatch takes a second temporary
//! reference for the duration of a single poll iteration, so a handler
//! that unregisters its own channel (or a peer's) cannot leave a dangling
//! call in flight.

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use crate::error::CoreResult;
use crate::reactor::ReactorHandle;
use crate::token::ChannelId;

/// Anything whose fd the reactor watches: listener, connector, connection,
/// datagram socket, or the self-pipe notifier.
pub trait Channel: Send {
    /// The id minted for this channel by the reactor that registered it;
    /// `ChannelId::UNASSIGNED` before the first `register`.
    fn id(&self) -> ChannelId;

    fn set_id(&mut self, id: ChannelId);

    fn raw_fd(&self) -> RawFd;

    /// Called when the fd is readable. `handle` lets the channel schedule
    /// follow-up work (timers, tasks, re-registration) on its own loop.
    fn on_readable(&mut self, handle: &ReactorHandle) -> CoreResult<()>;

    fn on_writable(&mut self, handle: &ReactorHandle) -> CoreResult<()>;

    /// Called on `Interest::ERROR`. Implementations typically transition
    /// to a terminal state and ask the reactor to unregister them.
    fn on_error(&mut self, handle: &ReactorHandle) -> CoreResult<()>;
}

/// A reference-counted, interior-mutable channel as the reactor stores it.
pub type SharedChannel = Arc<Mutex<dyn Channel>>;
