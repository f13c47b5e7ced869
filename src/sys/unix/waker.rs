//! Cross-thread wakeup for the reactor (spec component C5, "self-pipe").
//!
//! Linux gets an `eventfd`; every other unix falls back to a
//! non-blocking pipe, mirroring `original_source/net/EventLoop.cc`'s
//! `wakeupFd_` member.

use std::io;
use std::os::unix::io::RawFd;

use crate::interest::Interest;
use crate::sys::unix::Selector;

#[cfg(any(target_os = "linux", target_os = "android"))]
#[derive(Debug)]
pub struct Waker {
    fd: RawFd,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl Waker {
    pub fn new(selector: &Selector, cookie: u64) -> io::Result<Waker> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        selector.register(fd, Interest::READ, cookie)?;
        Ok(Waker { fd })
    }

    pub fn wake(&self) -> io::Result<()> {
        let buf: [u8; 8] = 1u64.to_ne_bytes();
        match unsafe { libc::write(self.fd, buf.as_ptr() as *const _, buf.len()) } {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    Ok(())
                } else {
                    Err(err)
                }
            }
            _ => Ok(()),
        }
    }

    /// Drains the eventfd counter after a wakeup fires, so the fd goes
    /// back to non-readable.
    pub fn drain(&self) {
        let mut buf = [0u8; 8];
        unsafe {
            libc::read(self.fd, buf.as_mut_ptr() as *mut _, buf.len());
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
#[derive(Debug)]
pub struct Waker {
    reader: RawFd,
    writer: RawFd,
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
impl Waker {
    pub fn new(selector: &Selector, cookie: u64) -> io::Result<Waker> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
            return Err(io::Error::last_os_error());
        }
        let [reader, writer] = fds;
        for fd in [reader, writer] {
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                let fdflags = libc::fcntl(fd, libc::F_GETFD);
                libc::fcntl(fd, libc::F_SETFD, fdflags | libc::FD_CLOEXEC);
            }
        }
        selector.register(reader, Interest::READ, cookie)?;
        Ok(Waker { reader, writer })
    }

    pub fn wake(&self) -> io::Result<()> {
        match unsafe { libc::write(self.writer, [1u8].as_ptr() as *const _, 1) } {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    Ok(())
                } else {
                    Err(err)
                }
            }
            _ => Ok(()),
        }
    }

    pub fn drain(&self) {
        let mut buf = [0u8; 128];
        loop {
            let n = unsafe { libc::read(self.reader, buf.as_mut_ptr() as *mut _, buf.len()) };
            if n <= 0 {
                break;
            }
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.reader);
            libc::close(self.writer);
        }
    }
}
