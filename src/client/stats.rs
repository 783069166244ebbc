//! Client and sink statistics

/// Statistics for a single client, as reported by `FdSink::get_stats`
///
/// All timestamps are wall-clock nanoseconds since the Unix epoch;
/// `connected_duration` is a plain nanosecond span. For a client that is
/// still connected, `disconnect_time` is 0 and `connected_duration` runs
/// up to the time of the call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Total payload bytes written to the descriptor
    pub bytes_sent: u64,
    /// When the client was added
    pub connect_time: u64,
    /// When the client was removed, or 0 while connected
    pub disconnect_time: u64,
    /// How long the client is or was connected
    pub connected_duration: u64,
    /// Last time a write to the descriptor succeeded
    pub last_activity_time: u64,
    /// Buffers skipped over by the recover policy
    pub dropped_buffers: u64,
    /// Timestamp of the first buffer served, if it carried one
    pub first_buffer_ts: Option<u64>,
    /// Timestamp of the last buffer served, if it carried one
    pub last_buffer_ts: Option<u64>,
}

/// Aggregate counters for the whole sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Payload bytes accepted from the producer
    pub bytes_to_serve: u64,
    /// Payload bytes written out across all clients
    pub bytes_served: u64,
    /// Queue usage recorded after the last producer buffer
    pub buffers_queued: usize,
}
