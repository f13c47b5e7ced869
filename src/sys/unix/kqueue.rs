//! kqueue-backed [`Selector`] (BSD/macOS).

use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;
use std::time::Duration;

use crate::interest::Interest;
use crate::sys::unix::{cvt, set_cloexec};

macro_rules! kevent {
    ($id:expr, $filter:expr, $flags:expr, $data:expr) => {
        libc::kevent {
            ident: $id as libc::uintptr_t,
            filter: $filter as i16,
            flags: $flags,
            fflags: 0,
            data: 0,
            udata: $data as *mut libc::c_void,
        }
    };
}

#[derive(Debug)]
pub struct Selector {
    kq: RawFd,
}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        let kq = unsafe { cvt(libc::kqueue())? };
        let _ = set_cloexec(kq);
        Ok(Selector { kq })
    }

    pub fn register(&self, fd: RawFd, interest: Interest, cookie: u64) -> io::Result<()> {
        self.apply(fd, interest, cookie)
    }

    pub fn modify(&self, fd: RawFd, interest: Interest, cookie: u64) -> io::Result<()> {
        self.apply(fd, interest, cookie)
    }

    fn apply(&self, fd: RawFd, interest: Interest, cookie: u64) -> io::Result<()> {
        let flags = libc::EV_CLEAR | libc::EV_RECEIPT;
        let read_flag = if interest.is_readable() { libc::EV_ADD } else { libc::EV_DELETE };
        let write_flag = if interest.is_writable() { libc::EV_ADD } else { libc::EV_DELETE };

        let mut changes = [
            kevent!(fd, libc::EVFILT_READ, flags | read_flag, cookie),
            kevent!(fd, libc::EVFILT_WRITE, flags | write_flag, cookie),
        ];

        unsafe {
            cvt(libc::kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as i32,
                changes.as_mut_ptr(),
                changes.len() as i32,
                ptr::null(),
            ))?;
        }

        for change in &changes {
            if change.data == 0 {
                continue;
            }
            // ENOENT on EV_DELETE means the filter was never armed; fine.
            if change.data as i32 == libc::ENOENT {
                continue;
            }
            return Err(io::Error::from_raw_os_error(change.data as i32));
        }
        Ok(())
    }

    pub fn unregister(&self, fd: RawFd) -> io::Result<()> {
        let flags = libc::EV_DELETE | libc::EV_RECEIPT;
        let mut changes = [
            kevent!(fd, libc::EVFILT_READ, flags, 0u64),
            kevent!(fd, libc::EVFILT_WRITE, flags, 0u64),
        ];
        unsafe {
            cvt(libc::kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as i32,
                changes.as_mut_ptr(),
                changes.len() as i32,
                ptr::null(),
            ))?;
        }
        Ok(())
    }

    pub fn select(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts.as_ref().map(|t| t as *const _).unwrap_or(ptr::null());

        events.raw.clear();
        events.raw.resize(events.capacity, unsafe { std::mem::zeroed() });
        let n = unsafe {
            libc::kevent(
                self.kq,
                ptr::null(),
                0,
                events.raw.as_mut_ptr(),
                events.raw.len() as i32,
                ts_ptr,
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
        events.coalesce();
        Ok(())
    }
}

impl AsRawFd for Selector {
    fn as_raw_fd(&self) -> RawFd {
        self.kq
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}

pub struct Events {
    raw: Vec<libc::kevent>,
    capacity: usize,
    coalesced: Vec<(u64, Interest)>,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events { raw: Vec::with_capacity(capacity), capacity, coalesced: Vec::with_capacity(capacity) }
    }

    pub fn len(&self) -> usize {
        self.coalesced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coalesced.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<(u64, Interest)> {
        self.coalesced.get(idx).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, Interest)> + '_ {
        self.coalesced.iter().copied()
    }

    /// kqueue reports read and write readiness as two separate kevent
    /// records; merge them into one `Interest` set per cookie, the way
    /// `original_source`'s event loop expects from any multiplexer.
    fn coalesce(&mut self) {
        self.coalesced.clear();
        let mut by_cookie: HashMap<u64, u8> = HashMap::new();
        for kv in &self.raw {
            let cookie = kv.udata as u64;
            let mut bits = *by_cookie.get(&cookie).unwrap_or(&0);
            if kv.flags & libc::EV_ERROR != 0 && kv.data != 0 {
                bits |= Interest::ERROR.bits();
            }
            if kv.filter == libc::EVFILT_READ as i16 {
                bits |= Interest::READ.bits();
            } else if kv.filter == libc::EVFILT_WRITE as i16 {
                bits |= Interest::WRITE.bits();
            }
            by_cookie.insert(cookie, bits);
        }
        for (cookie, bits) in by_cookie {
            self.coalesced.push((cookie, Interest::from_bits(bits)));
        }
    }
}
