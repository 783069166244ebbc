//! Opaque media buffer
//!
//! The sink never parses buffer contents. A buffer is a byte blob plus
//! three pieces of metadata: an optional presentation timestamp, an
//! is-header flag (stream preamble such as codec configuration) and an
//! is-delta flag (non-keyframe).

use bytes::Bytes;

/// A media buffer handed to the sink by the producer
///
/// Cheap to clone: the payload is reference counted via `Bytes`. The
/// global queue and every client's pending-send list share the same
/// underlying storage.
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Bytes,
    timestamp: Option<u64>,
    is_header: bool,
    is_delta: bool,
}

impl Buffer {
    /// Create a data buffer (keyframe, no timestamp)
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            timestamp: None,
            is_header: false,
            is_delta: false,
        }
    }

    /// Create a stream-header buffer
    ///
    /// Header buffers are collected into the stream-header set instead of
    /// entering the global queue; new clients receive them before any data.
    pub fn header(data: Bytes) -> Self {
        Self {
            data,
            timestamp: None,
            is_header: true,
            is_delta: false,
        }
    }

    /// Create a delta (non-keyframe) data buffer
    pub fn delta(data: Bytes) -> Self {
        Self {
            data,
            timestamp: None,
            is_header: false,
            is_delta: true,
        }
    }

    /// Attach a presentation timestamp in nanoseconds
    pub fn with_timestamp(mut self, ns: u64) -> Self {
        self.timestamp = Some(ns);
        self
    }

    /// The payload bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Presentation timestamp in nanoseconds, if any
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    /// Whether this is a stream-header buffer
    pub fn is_header(&self) -> bool {
        self.is_header
    }

    /// Whether this is a delta (non-keyframe) buffer
    pub fn is_delta(&self) -> bool {
        self.is_delta
    }

    /// Whether a client can start decoding from this buffer
    ///
    /// Sync frames are data keyframes; header buffers do not qualify.
    pub fn is_sync_frame(&self) -> bool {
        !self.is_delta && !self.is_header
    }
}
