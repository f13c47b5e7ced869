//! Thin raw-fd socket wrapper shared by [`Listener`](crate::net::Listener),
//! [`Connector`](crate::net::Connector), and
//! [`DatagramSocket`](crate::net::DatagramSocket).
//!
//! Grounded in the teacher's own `sys::unix::Socket`: `socket(2)` with
//! `SOCK_NONBLOCK|SOCK_CLOEXEC` where the platform supports it, falling
//! back to a pair of `fcntl` calls on Darwin/Solaris, plus thin
//! `connect`/`bind`/`listen`/`accept` wrappers that translate `-1` into
//! `io::Error::last_os_error()`.

use std::io;
use std::mem::{self, MaybeUninit};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use super::net::{from_socket_addr, to_socket_addr};

macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

#[derive(Debug)]
pub(crate) struct Socket {
    fd: libc::c_int,
}

impl Socket {
    pub(crate) fn new(domain: libc::c_int, socket_type: libc::c_int, protocol: libc::c_int) -> io::Result<Self> {
        #[cfg(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux",
            target_os = "netbsd",
            target_os = "openbsd"
        ))]
        let socket_type = socket_type | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC;

        let socket = syscall!(socket(domain, socket_type, protocol))?;

        // Darwin has neither SOCK_NONBLOCK nor SOCK_CLOEXEC; set both with
        // fcntl instead, closing the fd if either call fails.
        #[cfg(any(target_os = "ios", target_os = "macos"))]
        syscall!(fcntl(socket, libc::F_SETFL, libc::O_NONBLOCK))
            .and_then(|_| syscall!(fcntl(socket, libc::F_SETFD, libc::FD_CLOEXEC)))
            .map_err(|e| {
                let _ = syscall!(close(socket));
                e
            })?;

        Ok(unsafe { Socket::from_raw_fd(socket) })
    }

    pub(crate) fn from_addr(addr: SocketAddr, socket_type: libc::c_int, protocol: libc::c_int) -> io::Result<Self> {
        let domain = match addr {
            SocketAddr::V4(..) => libc::AF_INET,
            SocketAddr::V6(..) => libc::AF_INET6,
        };
        Self::new(domain, socket_type, protocol)
    }

    /// Non-blocking connect: `EINPROGRESS` is success, not an error — the
    /// caller polls for writability to learn the outcome (spec §4.5).
    pub(crate) fn connect(&self, addr: SocketAddr) -> io::Result<()> {
        let (storage, len) = from_socket_addr(&addr);
        match syscall!(connect(self.fd, storage, len)) {
            Ok(_) => Ok(()),
            Err(ref err) if err.raw_os_error() == Some(libc::EINPROGRESS) => Ok(()),
            Err(err) => {
                let _ = unsafe { libc::close(self.fd) };
                Err(err)
            }
        }
    }

    pub(crate) fn bind(&self, addr: SocketAddr) -> io::Result<()> {
        let (storage, len) = from_socket_addr(&addr);
        syscall!(bind(self.fd, storage, len)).map(|_| ()).map_err(|err| {
            let _ = unsafe { libc::close(self.fd) };
            err
        })
    }

    pub(crate) fn listen(&self, backlog: i32) -> io::Result<()> {
        syscall!(listen(self.fd, backlog)).map(|_| ())
    }

    pub(crate) fn accept(&self) -> io::Result<(Self, SocketAddr)> {
        let mut storage = unsafe { MaybeUninit::<libc::sockaddr_storage>::zeroed().assume_init() };
        let mut len = mem::size_of_val(&storage) as libc::socklen_t;
        let storage_ptr = &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr;

        #[cfg(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux",
            target_os = "openbsd"
        ))]
        let socket = syscall!(accept4(self.fd, storage_ptr, &mut len, libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK))?;

        #[cfg(any(target_os = "ios", target_os = "macos", target_os = "netbsd"))]
        let socket = {
            let socket = syscall!(accept(self.fd, storage_ptr, &mut len))?;
            syscall!(fcntl(socket, libc::F_SETFD, libc::FD_CLOEXEC))?;
            syscall!(fcntl(socket, libc::F_SETFL, libc::O_NONBLOCK))?;
            socket
        };

        let addr = unsafe { to_socket_addr(&storage as *const libc::sockaddr_storage)? };
        Ok((unsafe { Socket::from_raw_fd(socket) }, addr))
    }

    pub(crate) fn set_reuse_address(&self) -> io::Result<()> {
        syscall!(setsockopt(
            self.fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &1i32 as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        ))
        .map(|_| ())
    }

    /// Reads and clears `SO_ERROR`; this is how a connector learns whether
    /// a non-blocking connect that just became writable actually succeeded
    /// (spec §4.5: "on Write readiness, read SO_ERROR").
    pub(crate) fn take_error(&self) -> io::Result<Option<io::Error>> {
        let mut err: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        syscall!(getsockopt(
            self.fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        ))?;
        if err == 0 {
            Ok(None)
        } else {
            Ok(Some(io::Error::from_raw_os_error(err)))
        }
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl FromRawFd for Socket {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Socket { fd }
    }
}

impl IntoRawFd for Socket {
    fn into_raw_fd(self) -> RawFd {
        let fd = self.fd;
        mem::forget(self);
        fd
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
