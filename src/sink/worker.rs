//! The I/O thread
//!
//! A single thread owns the blocking side of the poll set: it waits for
//! descriptor events, drains bytes clients send us, writes queued buffers
//! out, and removes clients that close, error out or go quiet. All state
//! it touches lives behind the clients lock in `sink::core::Shared`.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::client::state::{now_ns, ClientStatus};
use crate::error::SinkError;
use crate::io::{fd as fd_io, FdSet, Wait};

use super::core::{queue_buffer_for_client, Inner, Shared};
use super::policy;

/// Thread entry point: service clients until the sink stops
pub(crate) fn run(inner: Weak<Inner>, fdset: Arc<FdSet>) {
    tracing::debug!("I/O thread running");
    loop {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.running.load(Ordering::Acquire) {
            break;
        }
        inner.handle_clients(&fdset);
    }
    tracing::debug!("I/O thread exiting");
}

impl Inner {
    /// One iteration of the I/O loop: a blocking wait followed by
    /// per-client reactions
    pub(crate) fn handle_clients(&self, fdset: &Arc<FdSet>) {
        let timeout = match self.config.timeout {
            0 => None,
            ns => Some(Duration::from_nanos(ns)),
        };

        loop {
            match fdset.wait(timeout) {
                Ok(Wait::Flushed) => return,
                Ok(Wait::TimedOut) => {
                    // no descriptor activity at all: only the inactivity
                    // kick can still make progress
                    self.timeout_scan();
                    return;
                }
                Ok(Wait::Ready(n)) => {
                    tracing::trace!(ready = n, "wait done");
                    break;
                }
                Err(e) => match e.raw_os_error() {
                    Some(libc::EINTR) => continue,
                    Some(libc::EBADF) => {
                        tracing::warn!(error = %e, "wait failed, scanning for bad descriptors");
                        self.scan_bad_descriptors();
                        continue;
                    }
                    _ => {
                        tracing::error!(error = %e, "poll wait failed");
                        self.running.store(false, Ordering::Release);
                        self.observer.fatal_error(&SinkError::PollWait(e));
                        return;
                    }
                },
            }
        }

        let mut shared = self.shared.lock();
        'restart: loop {
            let cookie = shared.cookie;
            let fds: Vec<RawFd> = shared.order.clone();
            for fd in fds {
                // removal drops the lock; walk again if the table changed
                if shared.cookie != cookie {
                    continue 'restart;
                }
                let Some(client) = shared.clients.get_mut(&fd) else {
                    continue;
                };

                if client.status != ClientStatus::Ok && client.status != ClientStatus::Flushing {
                    shared = self.remove_client_link(shared, fd);
                    continue;
                }
                if fdset.has_closed(fd) {
                    client.status = ClientStatus::Closed;
                    shared = self.remove_client_link(shared, fd);
                    continue;
                }
                if fdset.has_error(fd) {
                    tracing::warn!(client = %client.debug, "poll reported an error");
                    client.status = ClientStatus::Error;
                    shared = self.remove_client_link(shared, fd);
                    continue;
                }
                if fdset.can_read(fd) && !self.handle_client_read(&mut shared, fd) {
                    shared = self.remove_client_link(shared, fd);
                    continue;
                }
                if fdset.can_write(fd) && !self.handle_client_write(&mut shared, fdset, fd) {
                    shared = self.remove_client_link(shared, fd);
                    continue;
                }
            }
            break;
        }
    }

    /// Drain and discard whatever the client sent us
    ///
    /// A readable descriptor with zero bytes pending means the peer closed.
    /// Returns false when the client must be removed.
    fn handle_client_read(&self, shared: &mut Shared, fd: RawFd) -> bool {
        let Some(client) = shared.clients.get_mut(&fd) else {
            return true;
        };

        let mut avail = match fd_io::available_bytes(fd) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(client = %client.debug, error = %e, "FIONREAD failed");
                client.status = ClientStatus::Error;
                return false;
            }
        };
        tracing::debug!(client = %client.debug, avail, "client read");

        if avail == 0 {
            // client sent EOF, remove it
            tracing::debug!(client = %client.debug, "client asked for close, removing");
            client.status = ClientStatus::Closed;
            return false;
        }

        let mut scratch = [0u8; 512];
        while avail > 0 {
            let to_read = avail.min(scratch.len());
            match fd_io::read(fd, &mut scratch[..to_read]) {
                Ok(0) => {
                    tracing::warn!(client = %client.debug, "unexpected 0-byte read, removing");
                    client.status = ClientStatus::Error;
                    return false;
                }
                Ok(n) => avail -= n,
                Err(e) => {
                    tracing::warn!(client = %client.debug, error = %e, "could not read, removing");
                    client.status = ClientStatus::Error;
                    return false;
                }
            }
        }
        true
    }

    /// Feed the client as much data as its descriptor accepts
    ///
    /// Buffers move from the global queue through the stream-header gate
    /// into the client's pending-send FIFO, then out of the descriptor.
    /// Stops on EAGAIN or a partial write; the next writable event resumes
    /// at `bufoffset`. Returns false when the client must be removed.
    fn handle_client_write(&self, shared: &mut Shared, fdset: &FdSet, fd: RawFd) -> bool {
        let now = now_ns();
        let Shared {
            clients,
            queue,
            streamheaders,
            caps_generation,
            bytes_served,
            ..
        } = shared;
        let Some(client) = clients.get_mut(&fd) else {
            return true;
        };
        let flushing = client.status == ClientStatus::Flushing;

        loop {
            if client.sending.is_empty() {
                if client.bufpos == -1 {
                    // nothing to pull; wait for the producer to wake us
                    fdset.ctl_write(fd, false);
                    if client.flushcount == 0 {
                        tracing::debug!(client = %client.debug, "flushed, removing");
                        client.status = ClientStatus::Removed;
                        return false;
                    }
                    return true;
                }

                // a new connection first needs a starting position
                if client.new_connection && !flushing {
                    let position = policy::client_position(queue, client);
                    if position >= 0 {
                        client.new_connection = false;
                        client.bufpos = position;
                    } else {
                        fdset.ctl_write(fd, false);
                        return true;
                    }
                }

                if client.flushcount == 0 {
                    tracing::debug!(client = %client.debug, "flushed, removing");
                    client.status = ClientStatus::Removed;
                    return false;
                }

                let buf = queue.at(client.bufpos as usize).clone();
                client.bufpos -= 1;

                if client.first_buffer_ts.is_none() {
                    client.first_buffer_ts = buf.timestamp();
                }
                if let Some(ts) = buf.timestamp() {
                    client.last_buffer_ts = Some(ts);
                }
                if client.flushcount != -1 {
                    client.flushcount -= 1;
                }
                if client.discont {
                    tracing::debug!(client = %client.debug, "resuming after discontinuity");
                    client.discont = false;
                }
                tracing::trace!(client = %client.debug, bufpos = client.bufpos, "picked buffer");

                queue_buffer_for_client(
                    &self.config,
                    client,
                    streamheaders,
                    *caps_generation,
                    buf,
                );
                client.bufoffset = 0;
            }

            let Some(head) = client.sending.front().cloned() else {
                return true;
            };
            let data = head.data();
            let maxsize = data.len() - client.bufoffset;

            match fd_io::send(fd, &data[client.bufoffset..], client.is_socket) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // the descriptor is full; the next writable event resumes
                    return true;
                }
                Err(e) if e.raw_os_error() == Some(libc::ECONNRESET) => {
                    tracing::debug!(client = %client.debug, "connection reset by peer, removing");
                    client.status = ClientStatus::Closed;
                    return false;
                }
                Err(e) => {
                    tracing::warn!(client = %client.debug, error = %e, "could not write, removing");
                    client.status = ClientStatus::Error;
                    return false;
                }
                Ok(wrote) => {
                    client.bytes_sent += wrote as u64;
                    client.last_activity_time = now;
                    *bytes_served += wrote as u64;

                    if wrote < maxsize {
                        tracing::trace!(client = %client.debug, wrote, "partial write");
                        client.bufoffset += wrote;
                        return true;
                    }
                    client.sending.pop_front();
                    client.bufoffset = 0;
                }
            }
        }
    }

    /// Kick clients that have been idle past the configured timeout
    fn timeout_scan(&self) {
        if self.config.timeout == 0 {
            return;
        }
        let now = now_ns();

        let mut shared = self.shared.lock();
        let fds: Vec<RawFd> = shared.order.clone();
        for fd in fds {
            let Some(client) = shared.clients.get_mut(&fd) else {
                continue;
            };
            if now.saturating_sub(client.last_activity_time) > self.config.timeout {
                client.status = ClientStatus::Slow;
                shared = self.remove_client_link(shared, fd);
            }
        }
    }

    /// After EBADF from poll, probe every descriptor and drop the dead ones
    fn scan_bad_descriptors(&self) {
        let mut shared = self.shared.lock();
        let fds: Vec<RawFd> = shared.order.clone();
        for fd in fds {
            let Some(client) = shared.clients.get_mut(&fd) else {
                continue;
            };
            match fd_io::probe(fd) {
                Ok(()) => {}
                Err(e) if e.raw_os_error() == Some(libc::EBADF) => {
                    tracing::warn!(client = %client.debug, "descriptor went bad, removing");
                    client.status = ClientStatus::Error;
                    shared = self.remove_client_link(shared, fd);
                }
                Err(e) => {
                    tracing::warn!(client = %client.debug, error = %e, "probe failed");
                }
            }
        }
    }
}
