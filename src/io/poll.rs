//! Level-triggered descriptor set
//!
//! `FdSet` wraps poll(2) with the small amount of machinery the I/O loop
//! needs: per-descriptor read/write interest that other threads can toggle
//! while a wait is in progress, a wake pipe to interrupt a blocked wait,
//! and a flushing flag that turns any wait into an immediate `Flushed`
//! return during shutdown.
//!
//! The set is safe to use from both the producer and the I/O thread: the
//! entry table sits behind its own mutex which is never held across the
//! blocking poll call.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// Outcome of a poll wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wait {
    /// At least this many descriptors have pending events
    Ready(usize),
    /// The timeout expired with no activity
    TimedOut,
    /// The set was flushed (shutdown in progress)
    Flushed,
}

#[derive(Debug)]
struct Entry {
    fd: RawFd,
    want_read: bool,
    want_write: bool,
    revents: libc::c_short,
}

#[derive(Debug, Default)]
struct State {
    entries: Vec<Entry>,
    index: HashMap<RawFd, usize>,
}

/// Poll set shared between the producer and the I/O thread
#[derive(Debug)]
pub(crate) struct FdSet {
    state: Mutex<State>,
    wake_rd: RawFd,
    wake_wr: RawFd,
    flushing: AtomicBool,
}

impl FdSet {
    /// Create a poll set and its wake pipe
    pub fn new() -> io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: pipe2 fills the two fds on success
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            state: Mutex::new(State::default()),
            wake_rd: fds[0],
            wake_wr: fds[1],
            flushing: AtomicBool::new(false),
        })
    }

    /// Add a descriptor with no interest yet
    pub fn add(&self, fd: RawFd) {
        let mut state = self.state.lock();
        if state.index.contains_key(&fd) {
            return;
        }
        state.entries.push(Entry {
            fd,
            want_read: false,
            want_write: false,
            revents: 0,
        });
        let pos = state.entries.len() - 1;
        state.index.insert(fd, pos);
    }

    /// Remove a descriptor from the set
    pub fn remove(&self, fd: RawFd) {
        let mut state = self.state.lock();
        if let Some(pos) = state.index.remove(&fd) {
            state.entries.swap_remove(pos);
            if pos < state.entries.len() {
                let moved = state.entries[pos].fd;
                state.index.insert(moved, pos);
            }
        }
    }

    /// Enable or disable read interest for a descriptor
    pub fn ctl_read(&self, fd: RawFd, on: bool) {
        let mut state = self.state.lock();
        if let Some(&pos) = state.index.get(&fd) {
            state.entries[pos].want_read = on;
        }
    }

    /// Enable or disable write interest for a descriptor
    pub fn ctl_write(&self, fd: RawFd, on: bool) {
        let mut state = self.state.lock();
        if let Some(&pos) = state.index.get(&fd) {
            state.entries[pos].want_write = on;
        }
    }

    /// Whether the last wait saw the descriptor readable
    pub fn can_read(&self, fd: RawFd) -> bool {
        self.revents(fd) & (libc::POLLIN | libc::POLLPRI) != 0
    }

    /// Whether the last wait saw the descriptor writable
    pub fn can_write(&self, fd: RawFd) -> bool {
        self.revents(fd) & libc::POLLOUT != 0
    }

    /// Whether the last wait saw the peer hang up
    ///
    /// poll(2) reports POLLHUP regardless of requested events, so peer
    /// close is visible even on descriptors without read interest.
    pub fn has_closed(&self, fd: RawFd) -> bool {
        self.revents(fd) & libc::POLLHUP != 0
    }

    /// Whether the last wait flagged the descriptor as broken
    pub fn has_error(&self, fd: RawFd) -> bool {
        self.revents(fd) & (libc::POLLERR | libc::POLLNVAL) != 0
    }

    fn revents(&self, fd: RawFd) -> libc::c_short {
        let state = self.state.lock();
        match state.index.get(&fd) {
            Some(&pos) => state.entries[pos].revents,
            None => 0,
        }
    }

    /// Interrupt a blocked wait so it picks up interest changes
    pub fn restart(&self) {
        let byte = [0u8; 1];
        // SAFETY: writing one byte to our own non-blocking pipe; a full
        // pipe already guarantees a pending wakeup
        unsafe { libc::write(self.wake_wr, byte.as_ptr() as *const libc::c_void, 1) };
    }

    /// Mark the set flushing; any current or future wait returns `Flushed`
    pub fn set_flushing(&self, flushing: bool) {
        self.flushing.store(flushing, Ordering::Release);
        if flushing {
            self.restart();
        }
    }

    /// Block until a descriptor has events, the timeout expires or the set
    /// is flushed
    ///
    /// `None` waits indefinitely. EINTR and other poll failures are
    /// returned to the caller, which decides whether to retry.
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<Wait> {
        if self.flushing.load(Ordering::Acquire) {
            return Ok(Wait::Flushed);
        }

        // snapshot the entries; the lock is not held while blocked in poll
        let mut pollfds: Vec<libc::pollfd> = Vec::new();
        pollfds.push(libc::pollfd {
            fd: self.wake_rd,
            events: libc::POLLIN,
            revents: 0,
        });
        {
            let state = self.state.lock();
            pollfds.reserve(state.entries.len());
            for entry in &state.entries {
                let mut events: libc::c_short = 0;
                if entry.want_read {
                    events |= libc::POLLIN | libc::POLLPRI;
                }
                if entry.want_write {
                    events |= libc::POLLOUT;
                }
                pollfds.push(libc::pollfd {
                    fd: entry.fd,
                    events,
                    revents: 0,
                });
            }
        }

        let timeout_ms: libc::c_int = match timeout {
            None => -1,
            // round up so sub-millisecond timeouts cannot spin
            Some(d) => ((d.as_nanos() + 999_999) / 1_000_000)
                .min(libc::c_int::MAX as u128) as libc::c_int,
        };

        // SAFETY: pollfds is a live, correctly sized array
        let n = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        // publish results for descriptors still in the set
        {
            let mut state = self.state.lock();
            for entry in state.entries.iter_mut() {
                entry.revents = 0;
            }
            for pfd in &pollfds[1..] {
                if let Some(&pos) = state.index.get(&pfd.fd) {
                    state.entries[pos].revents = pfd.revents;
                }
            }
        }

        let woken = pollfds[0].revents & libc::POLLIN != 0;
        if woken {
            self.drain_wake_pipe();
        }
        if self.flushing.load(Ordering::Acquire) {
            return Ok(Wait::Flushed);
        }
        if n == 0 {
            return Ok(Wait::TimedOut);
        }

        let ready = n as usize - usize::from(woken);
        Ok(Wait::Ready(ready))
    }

    fn drain_wake_pipe(&self) {
        let mut scratch = [0u8; 64];
        loop {
            // SAFETY: reading into a live buffer from our own pipe
            let n = unsafe {
                libc::read(
                    self.wake_rd,
                    scratch.as_mut_ptr() as *mut libc::c_void,
                    scratch.len(),
                )
            };
            if n <= 0 {
                break;
            }
        }
    }
}

impl Drop for FdSet {
    fn drop(&mut self) {
        // SAFETY: the pipe fds belong to this set
        unsafe {
            libc::close(self.wake_rd);
            libc::close(self.wake_wr);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_wait_times_out() {
        let set = FdSet::new().unwrap();
        let started = Instant::now();
        let res = set.wait(Some(Duration::from_millis(20))).unwrap();
        assert_eq!(res, Wait::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_restart_interrupts_wait() {
        let set = Arc::new(FdSet::new().unwrap());
        let waker = Arc::clone(&set);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            waker.restart();
        });
        // no timeout: only the wake pipe can end this wait
        let res = set.wait(None).unwrap();
        assert_eq!(res, Wait::Ready(0));
        handle.join().unwrap();
    }

    #[test]
    fn test_flushing_short_circuits() {
        let set = FdSet::new().unwrap();
        set.set_flushing(true);
        assert_eq!(set.wait(None).unwrap(), Wait::Flushed);
        set.set_flushing(false);
        assert_eq!(
            set.wait(Some(Duration::from_millis(5))).unwrap(),
            Wait::TimedOut
        );
    }

    #[test]
    fn test_readable_event() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();

        let set = FdSet::new().unwrap();
        set.add(fd);
        set.ctl_read(fd, true);

        b.write_all(b"ping").unwrap();
        let res = set.wait(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(res, Wait::Ready(1));
        assert!(set.can_read(fd));
        assert!(!set.can_write(fd));
    }

    #[test]
    fn test_writable_event_follows_interest() {
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();

        let set = FdSet::new().unwrap();
        set.add(fd);
        // no interest yet: wait only times out
        assert_eq!(
            set.wait(Some(Duration::from_millis(10))).unwrap(),
            Wait::TimedOut
        );

        set.ctl_write(fd, true);
        let res = set.wait(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(res, Wait::Ready(1));
        assert!(set.can_write(fd));
    }

    #[test]
    fn test_hup_reported_without_read_interest() {
        let (a, b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();

        let set = FdSet::new().unwrap();
        set.add(fd);
        drop(b);

        let res = set.wait(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(res, Wait::Ready(1));
        assert!(set.has_closed(fd));
    }

    #[test]
    fn test_remove_clears_results() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();

        let set = FdSet::new().unwrap();
        set.add(fd);
        set.ctl_read(fd, true);
        b.write_all(b"x").unwrap();
        set.wait(Some(Duration::from_millis(200))).unwrap();
        assert!(set.can_read(fd));

        set.remove(fd);
        assert!(!set.can_read(fd));
    }
}
