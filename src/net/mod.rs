//! TCP/UDP channels on top of the reactor.
//!
//! Grounded in `original_source/net/{Acceptor,Connector,Connection,
//! DatagramSocket}.{h,cc}`: each type is a [`Channel`](crate::channel::Channel)
//! that owns one non-blocking socket and a set of user callbacks, rather
//! than returning a pollable handle the caller drives itself.

mod connection;
mod connector;
mod datagram;
mod listener;

pub use connection::{Connection, ConnState};
pub use connector::Connector;
pub use datagram::DatagramSocket;
pub use listener::Listener;
