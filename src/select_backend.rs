//! Hand-rolled `select(2)`-driven readiness set.
//!
//! Corresponds to spec.md §4.1 "`select` fallback only when nothing else
//! is available" and the "Pollset entry" invariant that the emulation
//! backend enforces an `FD_SETSIZE`-derived descriptor cap *before*
//! registration, never silently at `wait` time. No crate in this pack
//! wraps raw `select(2)` (`mio`'s native backend already picks
//! epoll/kqueue/IOCP, which is why [`crate::multiplexer::Multiplexer`]
//! never needs this path for real I/O on any platform the crate
//! targets) — this is hand-rolled directly on `libc`, the same "no
//! ecosystem equivalent" carve-out [`crate::srp`] documents for its own
//! modular exponentiation core.
//!
//! [`dispatch::Broker`](crate::dispatch::Broker) is the one caller that
//! actually exercises the capacity guard this module provides: it sizes
//! itself with [`crate::dispatch::select_backend_capacity`] and refuses a
//! new peer once at that ceiling, which is this module's reason to exist
//! rather than being a second, unused multiplexer implementation.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::error::ResourceError;

/// A `select(2)`-driven set of watched descriptors, capacity-guarded at
/// registration time.
pub struct SelectSet {
    fds: Vec<RawFd>,
    capacity: usize,
}

impl SelectSet {
    pub fn new(capacity: usize) -> Self {
        Self { fds: Vec::new(), capacity }
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Add `fd` to the watched set. Fails before touching any OS state
    /// once `capacity` is reached or `fd` cannot fit in an `fd_set` at
    /// all — spec.md §4.1: "fails fast... before registration, not at
    /// `wait` time."
    pub fn register(&mut self, fd: RawFd) -> Result<(), ResourceError> {
        if self.fds.len() >= self.capacity || fd as usize >= libc::FD_SETSIZE {
            return Err(ResourceError::TooManyFileDescriptors);
        }
        self.fds.push(fd);
        Ok(())
    }

    pub fn deregister(&mut self, fd: RawFd) {
        self.fds.retain(|&f| f != fd);
    }

    /// Block until at least one registered descriptor is readable or
    /// `timeout` elapses, returning the readable subset. `None` blocks
    /// indefinitely, `Some(Duration::ZERO)` polls without blocking.
    ///
    /// The `len() > FD_SETSIZE` check is defense in depth: `register`
    /// should already have refused anything that would reach it, but
    /// `wait` fails the same way `register` does rather than handing
    /// `select(2)` a set it would read out of bounds.
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<Vec<RawFd>> {
        if self.fds.len() > libc::FD_SETSIZE {
            return Err(io::Error::new(io::ErrorKind::Other, ResourceError::FdSetOverflow));
        }
        if self.fds.is_empty() {
            if let Some(d) = timeout {
                std::thread::sleep(d);
            }
            return Ok(Vec::new());
        }

        let mut read_set: libc::fd_set = unsafe { std::mem::zeroed() };
        unsafe { libc::FD_ZERO(&mut read_set) };
        let mut max_fd = 0;
        for &fd in &self.fds {
            unsafe { libc::FD_SET(fd, &mut read_set) };
            max_fd = max_fd.max(fd);
        }

        let mut tv = timeout.map(|d| libc::timeval {
            tv_sec: d.as_secs() as libc::time_t,
            tv_usec: d.subsec_micros() as libc::suseconds_t,
        });
        let tv_ptr = tv
            .as_mut()
            .map(|t| t as *mut libc::timeval)
            .unwrap_or(std::ptr::null_mut());

        let rc = unsafe {
            libc::select(max_fd + 1, &mut read_set, std::ptr::null_mut(), std::ptr::null_mut(), tv_ptr)
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(self.fds.iter().copied().filter(|&fd| unsafe { libc::FD_ISSET(fd, &mut read_set) }).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::os::unix::io::AsRawFd;

    fn fd() -> (UdpSocket, RawFd) {
        let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        let fd = sock.as_raw_fd();
        (sock, fd)
    }

    #[test]
    fn register_refuses_once_at_capacity() {
        let (_a, fd_a) = fd();
        let (_b, fd_b) = fd();
        let mut set = SelectSet::new(1);
        assert!(set.register(fd_a).is_ok());
        assert_eq!(set.register(fd_b), Err(ResourceError::TooManyFileDescriptors));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn deregister_makes_room_again() {
        let (_a, fd_a) = fd();
        let (_b, fd_b) = fd();
        let mut set = SelectSet::new(1);
        set.register(fd_a).unwrap();
        set.deregister(fd_a);
        assert!(set.is_empty());
        assert!(set.register(fd_b).is_ok());
    }

    #[test]
    fn wait_on_empty_set_times_out_without_error() {
        let set = SelectSet::new(4);
        let ready = set.wait(Some(Duration::from_millis(10))).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn wait_reports_fd_set_overflow_past_fd_setsize() {
        // Bypass `register`'s guard to exercise `wait`'s own defensive
        // check directly, since a real process can't hold FD_SETSIZE+1
        // sockets in a unit test.
        let mut set = SelectSet::new(usize::MAX);
        set.fds = vec![0; libc::FD_SETSIZE + 1];
        let err = set.wait(Some(Duration::from_millis(1))).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }
}
