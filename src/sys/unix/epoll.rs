//! epoll-backed [`Selector`] (spec component C3, Linux/Android).

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use crate::interest::Interest;
use crate::sys::unix::{cvt, set_cloexec};

#[derive(Debug)]
pub struct Selector {
    epfd: RawFd,
}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        let epfd = unsafe {
            let fd = libc::epoll_create1(libc::EPOLL_CLOEXEC);
            if fd >= 0 {
                fd
            } else {
                let fd = cvt(libc::epoll_create(1024))?;
                let _ = set_cloexec(fd);
                fd
            }
        };
        Ok(Selector { epfd })
    }

    pub fn register(&self, fd: RawFd, interest: Interest, cookie: u64) -> io::Result<()> {
        let mut event = to_epoll_event(interest, cookie);
        unsafe { cvt(libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut event))? };
        Ok(())
    }

    pub fn modify(&self, fd: RawFd, interest: Interest, cookie: u64) -> io::Result<()> {
        let mut event = to_epoll_event(interest, cookie);
        match unsafe { cvt(libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut event)) } {
            Ok(_) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => self.register(fd, interest, cookie),
            Err(e) => Err(e),
        }
    }

    pub fn unregister(&self, fd: RawFd) -> io::Result<()> {
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        match unsafe { cvt(libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut event)) } {
            Ok(_) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Blocks for up to `timeout` (forever if `None`) and fills `events`
    /// with whatever fired. `EINTR` is reported as zero events rather than
    /// an error, matching the spec's "signal interruption drains to an
    /// empty batch" rule.
    pub fn select(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout.map(as_millis_i32).unwrap_or(-1);
        events.raw.clear();
        events.raw.resize(events.capacity, unsafe { std::mem::zeroed() });
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                events.raw.as_mut_ptr(),
                events.raw.len() as i32,
                timeout_ms,
            )
        };
        if n == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                events.raw.clear();
                return Ok(());
            }
            return Err(err);
        }
        events.raw.truncate(n as usize);
        Ok(())
    }
}

impl AsRawFd for Selector {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

fn to_epoll_event(interest: Interest, cookie: u64) -> libc::epoll_event {
    let mut bits: u32 = 0;
    if interest.is_readable() {
        bits |= libc::EPOLLIN as u32;
    }
    if interest.is_writable() {
        bits |= libc::EPOLLOUT as u32;
    }
    bits |= (libc::EPOLLERR | libc::EPOLLHUP) as u32;
    libc::epoll_event { events: bits, u64: cookie }
}

fn as_millis_i32(d: Duration) -> i32 {
    d.as_millis().min(i32::MAX as u128) as i32
}

pub struct Events {
    raw: Vec<libc::epoll_event>,
    capacity: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events { raw: Vec::with_capacity(capacity), capacity }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Returns `(cookie, interest)` for the event at `idx`.
    pub fn get(&self, idx: usize) -> Option<(u64, Interest)> {
        self.raw.get(idx).map(|e| {
            let mut bits = 0u8;
            let ev = e.events as i32;
            if ev & libc::EPOLLIN != 0 {
                bits |= Interest::READ.bits();
            }
            if ev & libc::EPOLLOUT != 0 {
                bits |= Interest::WRITE.bits();
            }
            if ev & (libc::EPOLLERR | libc::EPOLLHUP) != 0 {
                bits |= Interest::ERROR.bits();
            }
            (e.u64, Interest::from_bits(bits))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, Interest)> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}
