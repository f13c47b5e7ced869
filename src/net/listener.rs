//! Passive TCP accept as a reactor [`Channel`] (spec component C7).
//!
//! Grounded in `original_source/net/Acceptor.{h,cc}`: accept in a loop
//! until `EAGAIN`, constructing one [`Connection`] per accepted fd.
//! Recoverable accept errors (`EINTR`, `ECONNABORTED`, `EPROTO`) retry;
//! fd-exhaustion errors (`EMFILE`, `ENFILE`, `ENOBUFS`, `ENOMEM`) are
//! logged and the listener keeps running; anything else is fatal to the
//! listener alone, never to the reactor.

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::sync::{Arc, Mutex};

use crate::channel::{Channel, SharedChannel};
use crate::error::CoreResult;
use crate::interest::Interest;
use crate::net::connection::Connection;
use crate::reactor::{GroupHandle, ReactorHandle};
use crate::sys::unix::Socket;
use crate::token::ChannelId;

type OnNewConn = Box<dyn FnMut(Arc<Mutex<Connection>>, &ReactorHandle) + Send>;

/// Where accepted connections are registered: the same loop the listener
/// itself runs on, or round-robin across an
/// [`EventLoopGroup`](crate::reactor::EventLoopGroup) (spec.md §4.12/§4.5,
/// "fan-out" in SPEC_FULL.md §8 property 9).
enum FanOut {
    SameLoop,
    Group(GroupHandle),
}

pub struct Listener {
    id: ChannelId,
    sock: Socket,
    local_addr: SocketAddr,
    fan_out: FanOut,
    on_new_conn: Arc<Mutex<Option<OnNewConn>>>,
}

impl Listener {
    /// Binds and listens on `addr`; accepted connections are registered on
    /// the same loop the listener itself is registered on.
    pub fn bind(addr: SocketAddr) -> CoreResult<Listener> {
        Self::bind_with(addr, FanOut::SameLoop)
    }

    /// Binds and listens on `addr`; accepted connections fan out
    /// round-robin across `group` instead of staying on the listener's
    /// own loop.
    pub fn bind_to_group(addr: SocketAddr, group: GroupHandle) -> CoreResult<Listener> {
        Self::bind_with(addr, FanOut::Group(group))
    }

    fn bind_with(addr: SocketAddr, fan_out: FanOut) -> CoreResult<Listener> {
        let sock = Socket::from_addr(addr, libc::SOCK_STREAM, 0)?;
        sock.set_reuse_address()?;
        sock.bind(addr)?;
        sock.listen(1024)?;
        Ok(Listener {
            id: ChannelId::UNASSIGNED,
            sock,
            local_addr: addr,
            fan_out,
            on_new_conn: Arc::new(Mutex::new(None)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registers `cb` to run on every freshly accepted connection, after
    /// it is registered with its reactor but before its `on_connect` fires
    /// (spec.md §4.5: "register it for Read, fire `on_new_conn`, then its
    /// `on_connect`"). `cb` receives the same `Arc<Mutex<Connection>>` the
    /// reactor holds, so it can hand the connection off to something that
    /// outlives the callback (an `rpc::ServerChannel`, for instance) rather
    /// than only being able to touch it for the duration of the call.
    pub fn set_on_new_conn(&mut self, cb: impl FnMut(Arc<Mutex<Connection>>, &ReactorHandle) + Send + 'static) {
        *self.on_new_conn.lock().unwrap() = Some(Box::new(cb));
    }

    fn accept_one(&self) -> io::Result<Option<(Socket, SocketAddr)>> {
        match self.sock.accept() {
            Ok(pair) => Ok(Some(pair)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e)
                if matches!(
                    e.raw_os_error(),
                    Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOBUFS) | Some(libc::ENOMEM)
                ) =>
            {
                tracing::warn!(error = %e, "accept failed due to resource exhaustion, listener keeps running");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Registers a freshly accepted connection on `target`, runs
    /// `on_new_conn`, then fires `on_connect` — done on the concretely
    /// typed `Arc<Mutex<Connection>>` (kept alongside the type-erased
    /// `SharedChannel` the reactor stores) so no unsafe downcast is
    /// needed to reach `Connection`-only methods afterwards.
    fn install(conn: Connection, target: &ReactorHandle, on_new_conn: &Arc<Mutex<Option<OnNewConn>>>) {
        let concrete = Arc::new(Mutex::new(conn));
        let erased: SharedChannel = concrete.clone();
        if target.register(erased, Interest::READ).is_err() {
            return;
        }

        if let Some(cb) = on_new_conn.lock().unwrap().as_mut() {
            cb(concrete.clone(), target);
        }
        concrete.lock().unwrap().fire_on_connect(target);
    }
}

impl Channel for Listener {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn set_id(&mut self, id: ChannelId) {
        self.id = id;
    }

    fn raw_fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }

    fn on_readable(&mut self, handle: &ReactorHandle) -> CoreResult<()> {
        loop {
            let (sock, peer) = match self.accept_one() {
                Ok(Some(pair)) => pair,
                Ok(None) => return Ok(()),
                Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "listener accept failed");
                    return Err(e.into());
                }
            };

            let stream = unsafe { std::net::TcpStream::from_raw_fd(sock.into_raw_fd()) };
            let conn = Connection::from_stream(stream, peer)?;

            match &self.fan_out {
                FanOut::SameLoop => Self::install(conn, handle, &self.on_new_conn),
                FanOut::Group(group) => {
                    let target = group.next();
                    let on_new_conn = self.on_new_conn.clone();
                    let target_for_task = target.clone();
                    target.execute(Box::new(move || Self::install(conn, &target_for_task, &on_new_conn)));
                }
            }
        }
    }

    fn on_writable(&mut self, _handle: &ReactorHandle) -> CoreResult<()> {
        Ok(())
    }

    fn on_error(&mut self, handle: &ReactorHandle) -> CoreResult<()> {
        tracing::error!(addr = %self.local_addr, "listener hit a fatal error");
        handle.unregister(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_and_reports_local_addr() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_eq!(listener.local_addr().ip().to_string(), "127.0.0.1");
        assert_ne!(listener.local_addr().port(), 0);
    }
}
