//! Unix multiplexer backend: epoll on Linux/Android, kqueue on the BSDs.

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use self::epoll::{Events, Selector};

#[cfg(any(
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "ios",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "openbsd"
))]
mod kqueue;
#[cfg(any(
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "ios",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "openbsd"
))]
pub use self::kqueue::{Events, Selector};

mod waker;
pub use self::waker::Waker;

mod net;
mod socket;
pub(crate) use self::socket::Socket;

/// Maps a libc return of `-1` to `io::Error::last_os_error()`. `EINTR` is
/// the caller's concern, matching `select()`'s own EINTR handling in
/// `crate::poll`, so this does not retry.
pub(crate) fn cvt(ret: libc::c_int) -> std::io::Result<libc::c_int> {
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

pub(crate) fn set_cloexec(fd: libc::c_int) -> std::io::Result<()> {
    unsafe {
        let flags = cvt(libc::fcntl(fd, libc::F_GETFD))?;
        cvt(libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC))?;
    }
    Ok(())
}
