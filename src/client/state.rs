//! Per-client state
//!
//! Each registered descriptor gets a `Client` record holding its virtual
//! read position into the global queue, its pending-send FIFO, the sync
//! and burst parameters it was added with, and its statistics. All fields
//! are mutated only under the sink's clients lock.

use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::buffer::queue::UnitType;
use crate::buffer::Buffer;

/// Where a newly added client starts in the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMethod {
    /// Start with the next buffer, no syncing
    Latest,
    /// Wait for the next keyframe to arrive
    NextKeyframe,
    /// Start from the most recent keyframe already queued; if there is
    /// none, behave like `NextKeyframe`
    LatestKeyframe,
    /// Backfill an initial burst sized by the client's burst limits
    Burst,
    /// Burst, but always start on a keyframe; if none qualifies, behave
    /// like `NextKeyframe`
    BurstKeyframe,
    /// Burst, preferring a keyframe inside the limits but sending from the
    /// min position when there is none
    BurstWithKeyframe,
}

/// Why a client is, or is about to be, removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    /// Serviceable
    Ok,
    /// Peer closed the connection
    Closed,
    /// Removed by the host
    Removed,
    /// Evicted: lagged past the hard limit or went inactive past the timeout
    Slow,
    /// A syscall on the descriptor failed
    Error,
    /// Draining its remaining buffers before removal
    Flushing,
    /// An `add` was rejected because the descriptor is already registered
    Duplicate,
}

/// Caps snapshot a client last queued stream-headers for
#[derive(Debug, Clone)]
pub(crate) struct ClientCaps {
    pub generation: u64,
    pub streamheaders: Vec<Buffer>,
}

/// State for one registered descriptor
#[derive(Debug)]
pub(crate) struct Client {
    pub fd: RawFd,
    pub debug: String,
    pub is_socket: bool,
    pub status: ClientStatus,

    pub sync_method: SyncMethod,
    pub burst_min_unit: UnitType,
    pub burst_min_value: i64,
    pub burst_max_unit: UnitType,
    pub burst_max_value: i64,

    /// Index into the global queue of the next buffer to serve, or -1
    /// while waiting for a usable buffer
    pub bufpos: i64,
    /// Byte offset into the buffer currently being written
    pub bufoffset: usize,
    /// Buffers queued for output: stream-headers first, then data
    pub sending: VecDeque<Buffer>,
    /// -1 normally; otherwise the number of buffers left to flush before
    /// removal
    pub flushcount: i64,

    pub new_connection: bool,
    pub discont: bool,
    pub currently_removing: bool,
    pub caps: Option<ClientCaps>,

    // stats
    pub bytes_sent: u64,
    pub dropped_buffers: u64,
    pub connect_time: u64,
    pub disconnect_time: u64,
    pub last_activity_time: u64,
    pub first_buffer_ts: Option<u64>,
    pub last_buffer_ts: Option<u64>,
}

impl Client {
    pub fn new(
        fd: RawFd,
        sync_method: SyncMethod,
        burst_min_unit: UnitType,
        burst_min_value: i64,
        burst_max_unit: UnitType,
        burst_max_value: i64,
    ) -> Self {
        let now = now_ns();
        Self {
            fd,
            debug: format!("[fd {:5}]", fd),
            is_socket: false,
            status: ClientStatus::Ok,
            sync_method,
            burst_min_unit,
            burst_min_value,
            burst_max_unit,
            burst_max_value,
            bufpos: -1,
            bufoffset: 0,
            sending: VecDeque::new(),
            flushcount: -1,
            new_connection: true,
            discont: false,
            currently_removing: false,
            caps: None,
            bytes_sent: 0,
            dropped_buffers: 0,
            connect_time: now,
            disconnect_time: 0,
            last_activity_time: now,
            first_buffer_ts: None,
            last_buffer_ts: None,
        }
    }
}

/// Wall-clock nanoseconds since the Unix epoch
pub(crate) fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_client_defaults() {
        let client = Client::new(5, SyncMethod::Latest, UnitType::Undefined, 0, UnitType::Undefined, -1);
        assert_eq!(client.fd, 5);
        assert_eq!(client.status, ClientStatus::Ok);
        assert_eq!(client.bufpos, -1);
        assert_eq!(client.flushcount, -1);
        assert!(client.new_connection);
        assert!(!client.currently_removing);
        assert!(client.sending.is_empty());
        assert!(client.caps.is_none());
        assert_eq!(client.last_activity_time, client.connect_time);
        assert_eq!(client.disconnect_time, 0);
    }

    #[test]
    fn test_debug_label() {
        let client = Client::new(42, SyncMethod::Latest, UnitType::Undefined, 0, UnitType::Undefined, -1);
        assert_eq!(client.debug, "[fd    42]");
    }
}
