//! `corevent`: a reactor-style event loop over non-blocking sockets, a
//! callback-driven future/promise library, a hierarchical timer
//! facility, and an optional length-prefixed protobuf RPC layer on top.
//!
//! The pieces compose the way `original_source/net/EventLoop.{h,cc}` and
//! its siblings do: a [`reactor::Reactor`] owns one OS-multiplexer
//! [`poll::Poll`], one [`timer::TimerManager`], and one cross-thread
//! [`notify::Notify`] queue; anything registered with it implements
//! [`channel::Channel`]; [`net`] builds TCP/UDP channels on top; [`future`]
//! gives asynchronous results a value/exception/timeout lifecycle
//! independent of any particular reactor; [`rpc`] (behind the `rpc`
//! feature) frames protobuf messages over an established connection.

#![warn(rust_2018_idioms)]

pub mod buffer;
pub mod channel;
pub mod endpoint;
pub mod error;
pub mod future;
pub mod hooks;
pub mod interest;
pub mod net;
pub mod notify;
pub mod pool;
pub mod reactor;
pub mod timer;
pub mod token;

#[cfg(unix)]
pub(crate) mod sys;

#[cfg(unix)]
pub(crate) mod poll;

#[cfg(feature = "rpc")]
pub mod rpc;

pub use buffer::ByteBuffer;
pub use channel::{Channel, SharedChannel};
pub use endpoint::{Endpoint, Protocol};
pub use error::{CoreError, CoreResult};
pub use future::{when_all, when_all2, when_all3, when_any, when_if_any, when_if_n, when_n};
pub use future::{BoxError, Executor, Future, Inline, Promise, Try};
pub use hooks::{NameResolver, NoTls, StaticResolver, TlsHook};
pub use interest::Interest;
pub use pool::{ThreadPool, ThreadPoolConfig};
pub use reactor::{EventLoopGroup, GroupHandle, Reactor, ReactorConfig, ReactorHandle};
pub use timer::{Repeat, TimerId};
pub use token::ChannelId;
