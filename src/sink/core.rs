//! The sink element
//!
//! `FdSink` owns the shared state: the client table, the global buffer
//! queue, the stream-header set and the aggregate counters, all behind a
//! single clients lock. The producer thread enters through `render`; the
//! I/O thread (`sink::worker`) services descriptors through the same lock.
//!
//! Removal is the one place the lock is dropped mid-operation: the
//! `client_removed` notification runs with the client still registered so
//! handlers can query stats, and `client_fd_removed` runs once the sink no
//! longer references the descriptor. Walks over the client table snapshot
//! `cookie` and restart (or re-check per descriptor) when it changes
//! underneath them.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Mutex, MutexGuard};

use crate::buffer::queue::UnitType;
use crate::buffer::{Buffer, BufferQueue};
use crate::client::state::{now_ns, Client, ClientCaps, ClientStatus, SyncMethod};
use crate::client::stats::{ClientStats, SinkStats};
use crate::error::{Result, SinkError};
use crate::io::{fd as fd_io, FdSet};

use super::config::SinkConfig;
use super::observer::SinkObserver;
use super::{policy, worker};

/// State shared between the producer and the I/O thread, behind the
/// clients lock
#[derive(Default)]
pub(crate) struct Shared {
    /// Poll set; present between start and stop
    pub fdset: Option<Arc<FdSet>>,
    /// Clients keyed by descriptor
    pub clients: std::collections::HashMap<RawFd, Client>,
    /// Descriptors in add order, for deterministic walks
    pub order: Vec<RawFd>,
    /// Bumped on every add/remove to invalidate walks in progress
    pub cookie: u64,
    /// The global newest-first buffer queue
    pub queue: BufferQueue,
    /// Current stream-header set, replaced when a new header run starts
    pub streamheaders: Vec<Buffer>,
    /// Caps generation; advances on stream-header mutation or `set_caps`
    pub caps_generation: u64,
    /// Host-declared format fingerprint, if any
    pub host_fingerprint: Option<u64>,
    /// Whether the previous rendered buffer was a header
    pub previous_buffer_header: bool,
    /// Payload bytes accepted from the producer
    pub bytes_to_serve: u64,
    /// Payload bytes written out across all clients
    pub bytes_served: u64,
    /// Queue usage recorded after the last producer buffer
    pub buffers_queued: usize,
}

pub(crate) struct Inner {
    pub config: SinkConfig,
    pub observer: Arc<dyn SinkObserver>,
    pub shared: Mutex<Shared>,
    pub running: AtomicBool,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Multi-client fan-out sink
///
/// Cloning produces another handle to the same sink, which is how observer
/// callbacks or other threads can call back into it.
///
/// # Example
/// ```no_run
/// use bytes::Bytes;
/// use fdcast::{Buffer, FdSink, NullObserver, SinkConfig};
/// use std::os::unix::io::AsRawFd;
/// use std::os::unix::net::UnixStream;
///
/// # fn main() -> fdcast::Result<()> {
/// let sink = FdSink::new(SinkConfig::default(), NullObserver);
/// sink.start()?;
///
/// let (tx, _rx) = UnixStream::pair()?;
/// sink.add(tx.as_raw_fd());
/// sink.render(Buffer::new(Bytes::from_static(b"payload")))?;
///
/// sink.stop()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FdSink {
    inner: Arc<Inner>,
}

impl FdSink {
    /// Create a sink with the given configuration and observer
    pub fn new(config: SinkConfig, observer: impl SinkObserver) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                observer: Arc::new(observer),
                shared: Mutex::new(Shared::default()),
                running: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Create the poll set and spawn the I/O thread
    pub fn start(&self) -> Result<()> {
        let mut worker_slot = self.inner.worker.lock();
        if worker_slot.is_some() {
            return Err(SinkError::AlreadyStarted);
        }

        let fdset = Arc::new(FdSet::new()?);
        self.inner.shared.lock().fdset = Some(Arc::clone(&fdset));
        self.inner.running.store(true, Ordering::Release);

        let inner = Arc::downgrade(&self.inner);
        let spawned = thread::Builder::new()
            .name("fdcast-io".into())
            .spawn(move || worker::run(inner, fdset));
        match spawned {
            Ok(handle) => {
                *worker_slot = Some(handle);
                tracing::info!("sink started");
                Ok(())
            }
            Err(e) => {
                self.inner.running.store(false, Ordering::Release);
                self.inner.shared.lock().fdset = None;
                Err(e.into())
            }
        }
    }

    /// Stop the I/O thread and tear down every remaining client
    ///
    /// Remaining clients are removed with status `Removed` and the full
    /// notification sequence. The queue is dropped; registered descriptors
    /// are never closed. Must not be called from an observer callback.
    pub fn stop(&self) -> Result<()> {
        let mut worker_slot = self.inner.worker.lock();
        let Some(handle) = worker_slot.take() else {
            return Ok(());
        };

        self.inner.running.store(false, Ordering::Release);
        if let Some(fdset) = self.inner.shared.lock().fdset.clone() {
            fdset.set_flushing(true);
        }
        let _ = handle.join();
        drop(worker_slot);

        self.inner.clear();

        let mut shared = self.inner.shared.lock();
        shared.queue.clear();
        shared.buffers_queued = 0;
        shared.fdset = None;
        drop(shared);

        tracing::info!("sink stopped");
        Ok(())
    }

    /// Register a descriptor with the element-wide defaults
    pub fn add(&self, fd: RawFd) {
        let config = &self.inner.config;
        self.inner.add_full(
            fd,
            config.sync_method,
            config.burst_unit,
            config.burst_value,
            config.burst_unit,
            -1,
        );
    }

    /// Register a descriptor with explicit sync and burst parameters
    ///
    /// Burst values use -1 for "unset". The add is skipped (with a log,
    /// no notification) when min and max share a unit and `max < min`;
    /// it is rejected with a `client_removed(Duplicate)` notification when
    /// the descriptor is already registered.
    pub fn add_full(
        &self,
        fd: RawFd,
        sync_method: SyncMethod,
        min_unit: UnitType,
        min_value: i64,
        max_unit: UnitType,
        max_value: i64,
    ) {
        self.inner
            .add_full(fd, sync_method, min_unit, min_value, max_unit, max_value);
    }

    /// Remove a client immediately, dropping anything still pending
    pub fn remove(&self, fd: RawFd) {
        self.inner.remove(fd);
    }

    /// Let a client drain its pending buffers, then remove it
    pub fn remove_flush(&self, fd: RawFd) {
        self.inner.remove_flush(fd);
    }

    /// Remove every client
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Statistics for a client, or `None` when the descriptor is unknown
    pub fn get_stats(&self, fd: RawFd) -> Option<ClientStats> {
        self.inner.get_stats(fd)
    }

    /// Hand a buffer to the sink
    ///
    /// Header buffers join the stream-header set; data buffers enter the
    /// global queue and advance every client position, applying recovery
    /// and eviction on the way.
    pub fn render(&self, buf: Buffer) -> Result<()> {
        self.inner.render(buf)
    }

    /// Declare a format change with an opaque fingerprint
    ///
    /// Equal fingerprints are a no-op. A change makes the stream-header
    /// gate re-evaluate each client on its next buffer.
    pub fn set_caps(&self, fingerprint: u64) {
        let mut shared = self.inner.shared.lock();
        if shared.host_fingerprint != Some(fingerprint) {
            shared.host_fingerprint = Some(fingerprint);
            shared.caps_generation = shared.caps_generation.wrapping_add(1);
        }
    }

    /// Number of registered clients
    pub fn num_clients(&self) -> usize {
        self.inner.shared.lock().clients.len()
    }

    /// Aggregate sink counters
    pub fn stats(&self) -> SinkStats {
        let shared = self.inner.shared.lock();
        SinkStats {
            bytes_to_serve: shared.bytes_to_serve,
            bytes_served: shared.bytes_served,
            buffers_queued: shared.buffers_queued,
        }
    }
}

impl Inner {
    pub(crate) fn add_full(
        &self,
        fd: RawFd,
        sync_method: SyncMethod,
        min_unit: UnitType,
        min_value: i64,
        max_unit: UnitType,
        max_value: i64,
    ) {
        tracing::debug!(
            fd,
            ?sync_method,
            ?min_unit,
            min_value,
            ?max_unit,
            max_value,
            "adding client"
        );

        // reject limits that can never be satisfied
        if min_unit == max_unit && max_value != -1 && min_value != -1 && max_value < min_value {
            tracing::warn!(fd, min_value, max_value, "wrong burst limits, skipping add");
            return;
        }

        let mut client = Client::new(fd, sync_method, min_unit, min_value, max_unit, max_value);

        let mut shared = self.shared.lock();
        let Some(fdset) = shared.fdset.clone() else {
            tracing::warn!(fd, "cannot add client, sink is not started");
            return;
        };

        if shared.clients.contains_key(&fd) {
            client.status = ClientStatus::Duplicate;
            drop(shared);
            tracing::warn!(fd, "duplicate client found, refusing");
            self.observer.client_removed(fd, ClientStatus::Duplicate);
            return;
        }

        if let Err(e) = fd_io::set_nonblocking(fd) {
            tracing::error!(fd, error = %e, "failed to make descriptor non-blocking");
        }

        fdset.add(fd);
        // don't try to read from write-only descriptors
        if self.config.handle_read && !fd_io::is_write_only(fd) {
            fdset.ctl_read(fd, true);
        }
        // send(2) only works on sockets, and only sockets carry a ToS byte
        if fd_io::is_socket(fd) {
            client.is_socket = true;
            if let Err(e) = fd_io::setup_dscp(fd, self.config.qos_dscp) {
                tracing::warn!(fd, error = %e, "could not set DSCP");
            }
        }

        shared.order.push(fd);
        shared.clients.insert(fd, client);
        shared.cookie = shared.cookie.wrapping_add(1);
        fdset.restart();
        drop(shared);

        self.observer.client_added(fd);
    }

    pub(crate) fn remove(&self, fd: RawFd) {
        tracing::debug!(fd, "removing client");

        let mut shared = self.shared.lock();
        let fdset = shared.fdset.clone();
        let Some(client) = shared.clients.get_mut(&fd) else {
            tracing::warn!(fd, "no client with this fd found");
            return;
        };
        if client.status != ClientStatus::Ok {
            tracing::info!(client = %client.debug, status = ?client.status, "client already disconnecting");
            return;
        }
        client.status = ClientStatus::Removed;

        let shared = self.remove_client_link(shared, fd);
        drop(shared);
        if let Some(fdset) = fdset {
            fdset.restart();
        }
    }

    pub(crate) fn remove_flush(&self, fd: RawFd) {
        tracing::debug!(fd, "flushing client");

        let mut shared = self.shared.lock();
        let Some(client) = shared.clients.get_mut(&fd) else {
            tracing::warn!(fd, "no client with this fd found");
            return;
        };
        if client.status != ClientStatus::Ok {
            tracing::info!(client = %client.debug, status = ?client.status, "client already disconnecting");
            return;
        }

        // the client's position is the number of buffers left to flush;
        // a waiting client (-1) flushes nothing
        client.flushcount = client.bufpos + 1;
        client.status = ClientStatus::Flushing;
    }

    pub(crate) fn clear(&self) {
        tracing::debug!("removing all clients");

        let mut shared = self.shared.lock();
        let fdset = shared.fdset.clone();
        let fds: Vec<RawFd> = shared.order.clone();
        for fd in fds {
            let Some(client) = shared.clients.get_mut(&fd) else {
                continue;
            };
            if client.currently_removing {
                continue;
            }
            if client.status == ClientStatus::Ok {
                client.status = ClientStatus::Removed;
            }
            shared = self.remove_client_link(shared, fd);
        }
        drop(shared);
        if let Some(fdset) = fdset {
            fdset.restart();
        }
    }

    pub(crate) fn get_stats(&self, fd: RawFd) -> Option<ClientStats> {
        let shared = self.shared.lock();
        let Some(client) = shared.clients.get(&fd) else {
            tracing::warn!(fd, "no client with this fd found");
            return None;
        };

        let connected_duration = if client.disconnect_time == 0 {
            now_ns().saturating_sub(client.connect_time)
        } else {
            client.disconnect_time - client.connect_time
        };

        Some(ClientStats {
            bytes_sent: client.bytes_sent,
            connect_time: client.connect_time,
            disconnect_time: client.disconnect_time,
            connected_duration,
            last_activity_time: client.last_activity_time,
            dropped_buffers: client.dropped_buffers,
            first_buffer_ts: client.first_buffer_ts,
            last_buffer_ts: client.last_buffer_ts,
        })
    }

    pub(crate) fn render(&self, buf: Buffer) -> Result<()> {
        let mut shared = self.shared.lock();
        if shared.fdset.is_none() {
            return Err(SinkError::NotStarted);
        }

        let in_caps = buf.is_header();
        tracing::trace!(
            size = buf.len(),
            header = in_caps,
            timestamp = ?buf.timestamp(),
            "received buffer"
        );

        // a header run following data buffers replaces the stream-header set
        if in_caps && !shared.previous_buffer_header {
            tracing::debug!("receiving new header buffers, clearing old stream-header set");
            shared.streamheaders.clear();
            shared.caps_generation = shared.caps_generation.wrapping_add(1);
        }
        shared.previous_buffer_header = in_caps;

        if in_caps {
            // stream-headers are sent per client by the gate, not queued
            tracing::debug!(size = buf.len(), "appending buffer to stream-header set");
            shared.streamheaders.push(buf);
            shared.caps_generation = shared.caps_generation.wrapping_add(1);
            return Ok(());
        }

        self.queue_buffer(shared, buf);
        Ok(())
    }

    /// Prepend a data buffer, advance every client, recover or evict the
    /// laggards, then trim the tail nobody needs anymore
    fn queue_buffer<'a>(&'a self, mut shared: MutexGuard<'a, Shared>, buf: Buffer) {
        let now = now_ns();
        let Some(fdset) = shared.fdset.clone() else {
            return;
        };

        shared.bytes_to_serve += buf.len() as u64;
        shared.queue.prepend(buf);

        let max_buffers = if self.config.units_max > 0 {
            shared
                .queue
                .count_to_max(self.config.unit_type, self.config.units_max)
        } else {
            -1
        };
        let soft_max_buffers = if self.config.units_soft_max > 0 {
            shared
                .queue
                .count_to_max(self.config.unit_type, self.config.units_soft_max)
        } else {
            -1
        };
        tracing::trace!(max_buffers, soft_max_buffers, "using limits");

        let mut need_signal = false;
        let mut max_buffer_usage: i64 = 0;
        let mut doomed: Vec<RawFd> = Vec::new();

        let fds: Vec<RawFd> = shared.order.clone();
        for fd in fds {
            let shared = &mut *shared;
            let Some(client) = shared.clients.get_mut(&fd) else {
                continue;
            };

            client.bufpos += 1;
            tracing::trace!(client = %client.debug, bufpos = client.bufpos, "client position");

            // past the soft limit: try to recover
            if soft_max_buffers > 0 && client.bufpos >= soft_max_buffers {
                let newpos = policy::recover_position(
                    &shared.queue,
                    self.config.unit_type,
                    self.config.units_soft_max,
                    self.config.recover_policy,
                    client,
                );
                if newpos != client.bufpos {
                    client.dropped_buffers += (client.bufpos - newpos) as u64;
                    client.bufpos = newpos;
                    client.discont = true;
                    tracing::info!(client = %client.debug, bufpos = newpos, "client position reset");
                } else {
                    tracing::info!(client = %client.debug, "client not recovering position");
                }
            }

            // past the hard limit or inactive too long: evict
            if (max_buffers > 0 && client.bufpos >= max_buffers)
                || (self.config.timeout > 0
                    && now.saturating_sub(client.last_activity_time) > self.config.timeout)
            {
                tracing::warn!(client = %client.debug, "client is too slow, removing");
                client.status = ClientStatus::Slow;
                client.bufpos = -1;
                doomed.push(fd);
                need_signal = true;
                continue;
            }

            if client.bufpos == 0 || client.new_connection {
                // the client can pick a buffer now: poll it for writability
                fdset.ctl_write(fd, true);
                need_signal = true;
            }

            if client.bufpos > max_buffer_usage {
                max_buffer_usage = client.bufpos;
            }
        }

        for fd in doomed {
            shared = self.remove_client_link(shared, fd);
        }

        // the lock was dropped during removals; a concurrent stop may have
        // emptied the queue
        if !shared.queue.is_empty() {
            // respect the configured queue floors
            let (usage, _max, _ok) = shared.queue.find_limits(
                self.config.bytes_min,
                self.config.buffers_min,
                self.config.time_min,
                -1,
                -1,
                -1,
            );
            max_buffer_usage = max_buffer_usage.max(usage + 1);

            // keyframe-seeking defaults need a sync point in the queue
            if matches!(
                self.config.sync_method,
                SyncMethod::LatestKeyframe | SyncMethod::BurstKeyframe
            ) {
                let mut limit = shared.queue.len() as i64;
                if soft_max_buffers > 0 {
                    limit = limit.min(soft_max_buffers);
                }
                let mut i = 0;
                while i < limit {
                    if shared.queue.at(i as usize).is_sync_frame() {
                        max_buffer_usage = max_buffer_usage.max(i);
                        break;
                    }
                    i += 1;
                }
            }

            // nobody references buffers past max_buffer_usage
            shared.queue.trim_to(max_buffer_usage);
            shared.buffers_queued = max_buffer_usage as usize;
        }
        tracing::trace!(
            queue_len = shared.queue.len(),
            usage = max_buffer_usage,
            "queue trimmed"
        );
        drop(shared);

        if need_signal {
            fdset.restart();
        }
    }

    /// Tear down one client: poll-set removal, two-phase notification,
    /// table removal
    ///
    /// Called with the clients lock held; drops and reacquires it around
    /// each notification. The returned guard is freshly acquired.
    pub(crate) fn remove_client_link<'a>(
        &'a self,
        mut shared: MutexGuard<'a, Shared>,
        fd: RawFd,
    ) -> MutexGuard<'a, Shared> {
        let status;
        {
            let Some(client) = shared.clients.get_mut(&fd) else {
                return shared;
            };
            if client.currently_removing {
                tracing::warn!(client = %client.debug, "client is already being removed");
                return shared;
            }
            client.currently_removing = true;
            status = client.status;

            match status {
                ClientStatus::Ok => {
                    tracing::warn!(client = %client.debug, "removing client for no reason")
                }
                ClientStatus::Closed => {
                    tracing::debug!(client = %client.debug, "removing client because of close")
                }
                ClientStatus::Removed => {
                    tracing::debug!(client = %client.debug, "removing client because the host removed it")
                }
                ClientStatus::Slow => {
                    tracing::info!(client = %client.debug, "removing client because it was too slow")
                }
                ClientStatus::Error => {
                    tracing::warn!(client = %client.debug, "removing client because of error")
                }
                ClientStatus::Flushing | ClientStatus::Duplicate => {
                    tracing::warn!(client = %client.debug, status = ?status, "removing client with invalid reason")
                }
            }

            client.disconnect_time = now_ns();
            // pending references go now; the fd itself is never closed
            client.sending.clear();
            client.caps = None;
        }

        if let Some(fdset) = shared.fdset.as_ref() {
            fdset.remove(fd);
        }

        // handlers may call get_stats: the client is still registered
        drop(shared);
        self.observer.client_removed(fd, status);

        let mut shared = self.shared.lock();
        shared.clients.remove(&fd);
        shared.order.retain(|&f| f != fd);
        shared.cookie = shared.cookie.wrapping_add(1);
        drop(shared);

        // from here on the host may close or reuse the descriptor
        self.observer.client_fd_removed(fd);

        self.shared.lock()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(fdset) = self.shared.get_mut().fdset.take() {
            fdset.set_flushing(true);
        }
    }
}

/// Queue a data buffer on a client, preceded by stream-headers when the
/// gate decides the client needs them
///
/// The client's caps snapshot is refreshed to the current generation
/// whether or not headers are sent.
pub(crate) fn queue_buffer_for_client(
    config: &SinkConfig,
    client: &mut Client,
    streamheaders: &[Buffer],
    caps_generation: u64,
    buf: Buffer,
) {
    let mut send_streamheader = false;

    match &client.caps {
        None => {
            tracing::debug!(client = %client.debug, "no previous caps for this client, sending stream-headers");
            send_streamheader = true;
        }
        Some(prev) if prev.generation != caps_generation => {
            if streamheaders.is_empty() {
                tracing::debug!(client = %client.debug, "new caps carry no stream-headers, not sending");
            } else if prev.streamheaders.is_empty() {
                tracing::debug!(client = %client.debug, "previous caps had no stream-headers, sending");
                send_streamheader = true;
            } else if !config.resend_streamheader {
                tracing::debug!(client = %client.debug, "asked not to resend stream-headers, not sending");
            } else if !streamheaders_equal(&prev.streamheaders, streamheaders) {
                tracing::debug!(client = %client.debug, "stream-headers changed, resending");
                send_streamheader = true;
            }
        }
        Some(_) => {}
    }

    let stale = client
        .caps
        .as_ref()
        .map_or(true, |prev| prev.generation != caps_generation);
    if stale {
        client.caps = Some(ClientCaps {
            generation: caps_generation,
            streamheaders: streamheaders.to_vec(),
        });
    }

    if send_streamheader {
        for header in streamheaders {
            tracing::debug!(client = %client.debug, size = header.len(), "queueing stream-header buffer");
            client.sending.push_back(header.clone());
        }
    }

    tracing::trace!(client = %client.debug, size = buf.len(), "queueing data buffer");
    client.sending.push_back(buf);
}

fn streamheaders_equal(a: &[Buffer], b: &[Buffer]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.data() == y.data())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn test_client() -> Client {
        Client::new(
            7,
            SyncMethod::Latest,
            UnitType::Undefined,
            0,
            UnitType::Undefined,
            -1,
        )
    }

    fn header(label: &'static [u8]) -> Buffer {
        Buffer::header(Bytes::from_static(label))
    }

    fn data(label: &'static [u8]) -> Buffer {
        Buffer::new(Bytes::from_static(label))
    }

    fn sent(client: &Client) -> Vec<Vec<u8>> {
        client.sending.iter().map(|b| b.data().to_vec()).collect()
    }

    #[test]
    fn test_gate_sends_headers_to_fresh_client() {
        let config = SinkConfig::default();
        let mut client = test_client();
        let headers = vec![header(b"h1"), header(b"h2")];

        queue_buffer_for_client(&config, &mut client, &headers, 2, data(b"d1"));

        assert_eq!(sent(&client), vec![b"h1".to_vec(), b"h2".to_vec(), b"d1".to_vec()]);
        assert_eq!(client.caps.as_ref().unwrap().generation, 2);
    }

    #[test]
    fn test_gate_same_generation_sends_data_only() {
        let config = SinkConfig::default();
        let mut client = test_client();
        let headers = vec![header(b"h1")];

        queue_buffer_for_client(&config, &mut client, &headers, 1, data(b"d1"));
        client.sending.clear();
        queue_buffer_for_client(&config, &mut client, &headers, 1, data(b"d2"));

        assert_eq!(sent(&client), vec![b"d2".to_vec()]);
    }

    #[test]
    fn test_gate_new_caps_without_headers() {
        let config = SinkConfig::default();
        let mut client = test_client();

        queue_buffer_for_client(&config, &mut client, &[header(b"h1")], 1, data(b"d1"));
        client.sending.clear();
        // generation moved but the header set is empty: nothing to resend
        queue_buffer_for_client(&config, &mut client, &[], 2, data(b"d2"));

        assert_eq!(sent(&client), vec![b"d2".to_vec()]);
        assert_eq!(client.caps.as_ref().unwrap().generation, 2);
    }

    #[test]
    fn test_gate_headers_appearing_later() {
        let config = SinkConfig::default();
        let mut client = test_client();

        // no headers known when the client joined
        queue_buffer_for_client(&config, &mut client, &[], 0, data(b"d1"));
        client.sending.clear();
        queue_buffer_for_client(&config, &mut client, &[header(b"h1")], 1, data(b"d2"));

        assert_eq!(sent(&client), vec![b"h1".to_vec(), b"d2".to_vec()]);
    }

    #[test]
    fn test_gate_resend_on_changed_headers() {
        let config = SinkConfig::default();
        let mut client = test_client();

        queue_buffer_for_client(&config, &mut client, &[header(b"h1")], 1, data(b"d1"));
        client.sending.clear();
        queue_buffer_for_client(&config, &mut client, &[header(b"h2")], 2, data(b"d2"));

        assert_eq!(sent(&client), vec![b"h2".to_vec(), b"d2".to_vec()]);
    }

    #[test]
    fn test_gate_resend_disabled() {
        let config = SinkConfig::default().resend_streamheader(false);
        let mut client = test_client();

        queue_buffer_for_client(&config, &mut client, &[header(b"h1")], 1, data(b"d1"));
        client.sending.clear();
        queue_buffer_for_client(&config, &mut client, &[header(b"h2")], 2, data(b"d2"));

        assert_eq!(sent(&client), vec![b"d2".to_vec()]);
        // the snapshot still advances so the change is not re-evaluated
        assert_eq!(client.caps.as_ref().unwrap().generation, 2);
    }

    #[test]
    fn test_gate_identical_headers_not_resent() {
        let config = SinkConfig::default();
        let mut client = test_client();

        queue_buffer_for_client(&config, &mut client, &[header(b"h1")], 1, data(b"d1"));
        client.sending.clear();
        // new generation, same header payloads
        queue_buffer_for_client(&config, &mut client, &[header(b"h1")], 2, data(b"d2"));

        assert_eq!(sent(&client), vec![b"d2".to_vec()]);
    }
}
