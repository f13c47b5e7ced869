//! Active, non-blocking TCP connect with a connect-timeout (spec component
//! C7).
//!
//! Grounded in `original_source/net/Connector.{h,cc}`: issue a
//! non-blocking `connect`, register for `Write` on `EINPROGRESS`, arm a
//! timeout timer, and on writability read `SO_ERROR` to learn whether the
//! connect actually succeeded. Translated into a [`Future`] rather than
//! `on_fail`/`on_connect` callbacks — the connector either resolves with
//! a shared handle onto a live [`Connection`] or fails with a
//! [`CoreError`], which is exactly the on-success/on-failure split the
//! callback pair encoded, expressed with the future/promise library this
//! crate already has (DESIGN.md). The resolved value is an
//! `Arc<Mutex<Connection>>`, not a bare `Connection`: the same connection
//! is simultaneously owned by the reactor's channel table, so a caller
//! reaches it by locking the mutex, the same way `rpc::ClientChannel`
//! does.

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::channel::{Channel, SharedChannel};
use crate::endpoint::Endpoint;
use crate::error::{CoreError, CoreResult};
use crate::future::{Future, Promise};
use crate::interest::Interest;
use crate::net::connection::Connection;
use crate::reactor::ReactorHandle;
use crate::sys::unix::Socket;
use crate::timer::{Repeat, TimerId};
use crate::token::ChannelId;

pub struct Connector {
    id: ChannelId,
    /// `None` once the connect has resolved (success, failure, or
    /// timeout) and ownership of the fd has moved to a `Connection` or
    /// been closed.
    sock: Option<Socket>,
    fd: RawFd,
    peer: SocketAddr,
    target: ReactorHandle,
    timer_id: Option<TimerId>,
    promise: Option<Promise<Arc<Mutex<Connection>>>>,
    done: bool,
}

impl Connector {
    /// Begins a non-blocking connect to `peer`, registering the
    /// in-progress socket on `connect_handle`'s loop and arming a
    /// `timeout` timer there. On success the accepted socket becomes a
    /// [`Connection`] registered on `target` (which may be
    /// `connect_handle` itself or a different loop, e.g. one handed out
    /// by an [`EventLoopGroup`](crate::reactor::EventLoopGroup)).
    pub fn connect(
        connect_handle: &ReactorHandle,
        target: ReactorHandle,
        peer: SocketAddr,
        timeout: Duration,
    ) -> CoreResult<Future<Arc<Mutex<Connection>>>> {
        let sock = Socket::from_addr(peer, libc::SOCK_STREAM, 0)?;
        sock.connect(peer)?;
        let fd = sock.as_raw_fd();

        let (promise, fut) = Promise::<Arc<Mutex<Connection>>>::pair();
        let connector = Connector {
            id: ChannelId::UNASSIGNED,
            sock: Some(sock),
            fd,
            peer,
            target,
            timer_id: None,
            promise: Some(promise),
            done: false,
        };
        let shared = Arc::new(Mutex::new(connector));
        let erased: SharedChannel = shared.clone();
        connect_handle.register(erased, Interest::WRITE | Interest::ERROR)?;

        let timer_target = shared.clone();
        let timer_handle = connect_handle.clone();
        let timer_id = connect_handle.schedule_after(
            timeout,
            Duration::ZERO,
            Repeat::Times(1),
            Box::new(move || {
                timer_target.lock().unwrap().fire_timeout(&timer_handle);
            }),
        );
        shared.lock().unwrap().timer_id = Some(timer_id);

        Ok(fut)
    }

    /// Convenience wrapper accepting an [`Endpoint`] instead of a raw
    /// `SocketAddr`; fails fast if the endpoint's host isn't a literal IP
    /// (DNS resolution goes through [`crate::hooks::NameResolver`]).
    pub fn connect_endpoint(
        connect_handle: &ReactorHandle,
        target: ReactorHandle,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> CoreResult<Future<Arc<Mutex<Connection>>>> {
        let addr = endpoint.to_socket_addr()?;
        Self::connect(connect_handle, target, addr, timeout)
    }

    fn fire_timeout(&mut self, handle: &ReactorHandle) {
        if self.done {
            return;
        }
        self.fail(handle, CoreError::ConnectTimeout { peer: tcp_endpoint(self.peer) });
    }

    fn fail(&mut self, handle: &ReactorHandle, err: CoreError) {
        if self.done {
            return;
        }
        self.done = true;
        if let Some(id) = self.timer_id.take() {
            handle.cancel_timer(id);
        }
        let _ = handle.unregister(self.id);
        self.sock = None; // dropping closes the half-open fd.
        if let Some(pm) = self.promise.take() {
            pm.set_exception(Box::new(err));
        }
    }

    fn succeed(&mut self, handle: &ReactorHandle) -> CoreResult<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        if let Some(id) = self.timer_id.take() {
            handle.cancel_timer(id);
        }
        handle.unregister(self.id)?;

        // Hand fd ownership to `std::net::TcpStream`: take the `Socket`
        // out of `self` (so its `Drop` never closes this fd) and convert.
        let sock = self.sock.take().expect("succeed/fail/timeout are each one-shot");
        let stream = unsafe { std::net::TcpStream::from_raw_fd(sock.into_raw_fd()) };
        let conn = Connection::from_stream(stream, self.peer)?;

        let target = self.target.clone();
        let promise = self.promise.take();
        target.execute(Box::new(move || {
            let concrete = Arc::new(Mutex::new(conn));
            let erased: SharedChannel = concrete.clone();
            if target.register(erased, Interest::READ).is_err() {
                return;
            }
            concrete.lock().unwrap().fire_on_connect(&target);
            // Hand back the same `Arc` the reactor holds: the connection is
            // a live registered channel from here on, so callers reach it
            // the way `rpc::ClientChannel`/`ServerChannel` do, by locking
            // the shared mutex rather than by owning it outright.
            if let Some(pm) = promise {
                pm.set_value(concrete);
            }
        }));
        Ok(())
    }
}

fn tcp_endpoint(peer: SocketAddr) -> Endpoint {
    Endpoint::new(crate::endpoint::Protocol::Tcp, peer.ip().to_string(), peer.port())
}

impl Channel for Connector {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn set_id(&mut self, id: ChannelId) {
        self.id = id;
    }

    fn raw_fd(&self) -> RawFd {
        self.fd
    }

    fn on_readable(&mut self, _handle: &ReactorHandle) -> CoreResult<()> {
        Ok(())
    }

    fn on_writable(&mut self, handle: &ReactorHandle) -> CoreResult<()> {
        let sock_err = match &self.sock {
            Some(sock) => sock.take_error(),
            None => return Ok(()),
        };
        match sock_err {
            Ok(None) => self.succeed(handle),
            Ok(Some(_)) | Err(_) => {
                self.fail(handle, CoreError::ConnectRefused { peer: tcp_endpoint(self.peer) });
                Ok(())
            }
        }
    }

    fn on_error(&mut self, handle: &ReactorHandle) -> CoreResult<()> {
        self.fail(handle, CoreError::ConnectRefused { peer: tcp_endpoint(self.peer) });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn connect_refused_fails_the_future() {
        // Bind then immediately drop to get a port nothing is listening on.
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let reactor = crate::reactor::Reactor::new().unwrap();
        let handle = reactor.handle();
        let fut = Connector::connect(&handle, handle.clone(), addr, Duration::from_secs(3)).unwrap();

        let mut reactor = reactor;
        for _ in 0..50 {
            reactor.tick().unwrap();
            if fut.is_ready() {
                break;
            }
        }
        assert!(fut.wait().is_err());
    }
}
