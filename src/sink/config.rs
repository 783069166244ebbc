//! Sink configuration

use crate::buffer::queue::UnitType;
use crate::client::state::SyncMethod;

/// How a lagging client is repositioned once it crosses the soft limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverPolicy {
    /// Leave the client alone; the hard limit will evict it eventually
    None,
    /// Drop the backlog and wait for the next buffer
    ResyncLatest,
    /// Jump to the soft-limit position
    ResyncSoftLimit,
    /// Jump to the closest keyframe at or below the soft limit, falling
    /// back to the soft-limit position when there is none
    ResyncKeyframe,
}

/// Sink configuration options
///
/// Limits expressed in `unit_type` use -1 for "unbounded"; the min floors
/// use -1 for "no floor". `timeout` is nanoseconds, 0 disables the
/// inactivity kick.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// How `units_max` and `units_soft_max` are interpreted
    pub unit_type: UnitType,

    /// Hard lag limit: a client whose position crosses it is evicted as Slow
    pub units_max: i64,

    /// Soft lag limit: crossing it triggers the recover policy
    pub units_soft_max: i64,

    /// Keep at least this many payload bytes queued (-1 = no floor)
    pub bytes_min: i64,

    /// Keep at least this many buffers queued (-1 = no floor)
    pub buffers_min: i64,

    /// Keep at least this timestamp span queued, in ns (-1 = no floor)
    pub time_min: i64,

    /// Default burst unit for `add`
    pub burst_unit: UnitType,

    /// Default burst value for `add`
    pub burst_value: i64,

    /// Default sync method for `add`
    pub sync_method: SyncMethod,

    /// How lagging clients recover
    pub recover_policy: RecoverPolicy,

    /// Inactivity timeout in nanoseconds (0 = disabled)
    pub timeout: u64,

    /// DSCP value for socket clients, or -1 to leave sockets untouched
    pub qos_dscp: i32,

    /// Drain and discard bytes clients send us
    pub handle_read: bool,

    /// Resend stream-headers on a caps change when both the old and new
    /// caps carry them
    pub resend_streamheader: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            unit_type: UnitType::Buffers,
            units_max: -1,
            units_soft_max: -1,
            bytes_min: -1,
            buffers_min: -1,
            time_min: -1,
            burst_unit: UnitType::Undefined,
            burst_value: 0,
            sync_method: SyncMethod::Latest,
            recover_policy: RecoverPolicy::None,
            timeout: 0,
            qos_dscp: -1,
            handle_read: true,
            resend_streamheader: true,
        }
    }
}

impl SinkConfig {
    /// Create a config with the element defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the unit for the lag limits
    pub fn unit_type(mut self, unit: UnitType) -> Self {
        self.unit_type = unit;
        self
    }

    /// Set the hard lag limit (-1 = unbounded)
    pub fn units_max(mut self, max: i64) -> Self {
        self.units_max = max;
        self
    }

    /// Set the soft lag limit (-1 = unbounded)
    pub fn units_soft_max(mut self, soft_max: i64) -> Self {
        self.units_soft_max = soft_max;
        self
    }

    /// Set the queue floors (any of them -1 for "no floor")
    pub fn min_floors(mut self, bytes: i64, buffers: i64, time: i64) -> Self {
        self.bytes_min = bytes;
        self.buffers_min = buffers;
        self.time_min = time;
        self
    }

    /// Set the default burst parameters used by `add`
    pub fn burst(mut self, unit: UnitType, value: i64) -> Self {
        self.burst_unit = unit;
        self.burst_value = value;
        self
    }

    /// Set the default sync method used by `add`
    pub fn sync_method(mut self, method: SyncMethod) -> Self {
        self.sync_method = method;
        self
    }

    /// Set the recover policy for lagging clients
    pub fn recover_policy(mut self, policy: RecoverPolicy) -> Self {
        self.recover_policy = policy;
        self
    }

    /// Set the inactivity timeout in nanoseconds (0 disables it)
    pub fn timeout(mut self, timeout_ns: u64) -> Self {
        self.timeout = timeout_ns;
        self
    }

    /// Set the DSCP value applied to socket clients (-1 disables it)
    pub fn qos_dscp(mut self, dscp: i32) -> Self {
        self.qos_dscp = dscp;
        self
    }

    /// Enable or disable the read drain
    pub fn handle_read(mut self, enabled: bool) -> Self {
        self.handle_read = enabled;
        self
    }

    /// Enable or disable stream-header resending on caps changes
    pub fn resend_streamheader(mut self, enabled: bool) -> Self {
        self.resend_streamheader = enabled;
        self
    }
}
