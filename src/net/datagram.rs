//! A connectionless UDP socket as a reactor [`Channel`] (spec component C9).
//!
//! Grounded in `original_source/net/DatagramSocket.{h,cc}`: fire-and-queue
//! sends (try immediately, fall back to a per-destination FIFO on
//! short/would-block), drained on writable readiness; reads fire
//! `on_message` once per datagram.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use crate::channel::Channel;
use crate::error::CoreResult;
use crate::interest::Interest;
use crate::reactor::ReactorHandle;
use crate::sys::unix::Socket;
use crate::token::ChannelId;

const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

type OnMessage = Box<dyn FnMut(&mut DatagramSocket, &[u8], SocketAddr) + Send>;

struct Queued {
    dst: SocketAddr,
    bytes: Vec<u8>,
}

pub struct DatagramSocket {
    id: ChannelId,
    sock: UdpSocket,
    queue: VecDeque<Queued>,
    on_message: Option<OnMessage>,
}

impl DatagramSocket {
    pub fn bind(addr: SocketAddr) -> CoreResult<DatagramSocket> {
        let sock = Socket::from_addr(addr, libc::SOCK_DGRAM, 0)?;
        sock.bind(addr)?;
        let sock = unsafe { UdpSocket::from_raw_fd(sock.into_raw_fd()) };
        Ok(DatagramSocket { id: ChannelId::UNASSIGNED, sock, queue: VecDeque::new(), on_message: None })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.sock.local_addr()
    }

    pub fn set_on_message(&mut self, cb: impl FnMut(&mut DatagramSocket, &[u8], SocketAddr) + Send + 'static) {
        self.on_message = Some(Box::new(cb));
    }

    /// Sends immediately if the FIFO is empty and the kernel accepts the
    /// whole datagram in one `sendto`; otherwise queues `{dst, bytes}` for
    /// `on_writable` to drain. A partial `sendto` can't happen for UDP, so
    /// each queued entry either sends whole or is dropped with a log
    /// (spec.md §4.7).
    pub fn send_packet(&mut self, data: &[u8], dst: SocketAddr, handle: &ReactorHandle) -> CoreResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.queue.is_empty() {
            match self.sock.send_to(data, dst) {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.queue.push_back(Queued { dst, bytes: data.to_vec() });
        handle.modify(self.id, Interest::READ | Interest::WRITE)?;
        Ok(())
    }

    fn drain(&mut self, handle: &ReactorHandle) -> CoreResult<()> {
        while let Some(entry) = self.queue.pop_front() {
            match self.sock.send_to(&entry.bytes, entry.dst) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.queue.push_front(entry);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(dst = %entry.dst, error = %e, "dropping undeliverable datagram");
                }
            }
        }
        handle.modify(self.id, Interest::READ)
    }
}

impl Channel for DatagramSocket {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn set_id(&mut self, id: ChannelId) {
        self.id = id;
    }

    fn raw_fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }

    fn on_readable(&mut self, _handle: &ReactorHandle) -> CoreResult<()> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (n, src) = match self.sock.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if let Some(mut cb) = self.on_message.take() {
                cb(self, &buf[..n], src);
                self.on_message = Some(cb);
            }
        }
    }

    fn on_writable(&mut self, handle: &ReactorHandle) -> CoreResult<()> {
        self.drain(handle)
    }

    fn on_error(&mut self, handle: &ReactorHandle) -> CoreResult<()> {
        tracing::error!("datagram socket hit a fatal error");
        handle.unregister(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_to_an_ephemeral_port() {
        let sock = DatagramSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(sock.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn send_without_queue_goes_straight_through() {
        let sender = DatagramSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(sender.queue.is_empty());
    }
}
