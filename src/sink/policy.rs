//! Start-position and recovery policies
//!
//! `client_position` decides where in the queue a new client begins
//! receiving buffers, according to its sync method. `recover_position`
//! computes a fresh position for a client that crossed the soft lag limit.
//! Neither touches the poll set; callers apply the returned positions.

use crate::buffer::queue::UnitType;
use crate::buffer::BufferQueue;
use crate::client::state::{Client, SyncMethod};

use super::config::RecoverPolicy;

/// Split a unit/value pair into per-axis limits (bytes, buffers, time)
///
/// Only the axis matching the unit is set; a value of -1 passes through,
/// keeping that axis unbounded.
fn assign_value(unit: UnitType, value: i64) -> (i64, i64, i64) {
    match unit {
        UnitType::Bytes => (value, -1, -1),
        UnitType::Buffers => (-1, value, -1),
        UnitType::Time => (-1, -1, value),
        UnitType::Undefined => (-1, -1, -1),
    }
}

/// Queue indices satisfying a client's burst min/max parameters
fn count_burst_unit(queue: &BufferQueue, client: &Client) -> (i64, i64, bool) {
    let (bytes_min, buffers_min, time_min) =
        assign_value(client.burst_min_unit, client.burst_min_value);
    let (bytes_max, buffers_max, time_max) =
        assign_value(client.burst_max_unit, client.burst_max_value);

    queue.find_limits(bytes_min, buffers_min, time_min, bytes_max, buffers_max, time_max)
}

/// Decide where in the current queue a new client starts
///
/// Called the first time the I/O loop tries to serve the client, with at
/// least one buffer queued. Returns -1 when no good starting point exists
/// yet; the client then waits (`bufpos` is parked at -1) and the decision
/// is retried once more buffers arrive. Keyframe-seeking methods downgrade
/// themselves to `NextKeyframe` while waiting.
pub(crate) fn client_position(queue: &BufferQueue, client: &mut Client) -> i64 {
    tracing::debug!(
        client = %client.debug,
        queue_len = queue.len(),
        method = ?client.sync_method,
        "new client, deciding where to start in the queue"
    );

    match client.sync_method {
        SyncMethod::Latest => {
            // no syncing, whatever position the queue walk assigned is fine
            client.bufpos
        }
        SyncMethod::NextKeyframe => {
            // serviceable once a sync frame sits between bufpos and 0
            let result = queue.find_prev_syncframe(client.bufpos);
            if result != -1 {
                return result;
            }
            // skip these buffers and wait some more
            tracing::debug!(client = %client.debug, "no syncpoint yet, waiting");
            client.bufpos = -1;
            -1
        }
        SyncMethod::LatestKeyframe => {
            // scan the whole queue, newest first; without a keyframe the
            // client waits for the next one to arrive
            let result = queue.find_next_syncframe(0);
            if result != -1 {
                return result;
            }
            tracing::debug!(
                client = %client.debug,
                "no keyframe in queue, switching to next-keyframe sync"
            );
            client.bufpos = -1;
            client.sync_method = SyncMethod::NextKeyframe;
            -1
        }
        SyncMethod::Burst => {
            let (min_idx, max_idx, _ok) = count_burst_unit(queue, client);
            tracing::debug!(client = %client.debug, min_idx, max_idx, "burst limits");

            // the max landed at or below the min: deliver up to the max
            if max_idx != -1 && max_idx <= min_idx {
                return (max_idx - 1).max(0);
            }
            min_idx
        }
        SyncMethod::BurstKeyframe => {
            let (min_idx, max_idx, _ok) = count_burst_unit(queue, client);
            tracing::debug!(client = %client.debug, min_idx, max_idx, "burst limits");

            // always start on a keyframe: inside the limits if possible
            let next = queue.find_next_syncframe(min_idx);
            if next != -1 && next < max_idx {
                return next;
            }
            // otherwise the last one before the min
            let prev = queue.find_prev_syncframe(min_idx);
            if prev != -1 {
                tracing::warn!(client = %client.debug, "using keyframe below burst-min");
                return prev;
            }
            tracing::warn!(client = %client.debug, "no keyframe for burst, waiting for next");
            client.bufpos = -1;
            client.sync_method = SyncMethod::NextKeyframe;
            -1
        }
        SyncMethod::BurstWithKeyframe => {
            let (min_idx, max_idx, _ok) = count_burst_unit(queue, client);
            tracing::debug!(client = %client.debug, min_idx, max_idx, "burst limits");

            // prefer a keyframe inside the limits
            let next = queue.find_next_syncframe(min_idx);
            if next != -1 && next < max_idx {
                return next;
            }
            // none: send data from the min without insisting on a keyframe
            tracing::warn!(client = %client.debug, "no keyframe for burst, starting at min");
            if max_idx != -1 && max_idx <= min_idx {
                (max_idx - 1).max(0)
            } else {
                min_idx
            }
        }
    }
}

/// Compute the new position for a client that crossed the soft limit
///
/// Does not modify the client; the caller applies the position and
/// accounts for the dropped buffers.
pub(crate) fn recover_position(
    queue: &BufferQueue,
    unit_type: UnitType,
    units_soft_max: i64,
    recover_policy: RecoverPolicy,
    client: &Client,
) -> i64 {
    tracing::warn!(
        client = %client.debug,
        bufpos = client.bufpos,
        policy = ?recover_policy,
        "client is lagging, recovering"
    );

    match recover_policy {
        RecoverPolicy::None => {
            // the client catches up on its own or hits the hard limit
            client.bufpos
        }
        RecoverPolicy::ResyncLatest => -1,
        RecoverPolicy::ResyncSoftLimit => queue.count_to_max(unit_type, units_soft_max),
        RecoverPolicy::ResyncKeyframe => {
            // closest keyframe, searching backwards from the soft limit so
            // the client loses as little as possible
            let soft = queue.count_to_max(unit_type, units_soft_max);
            let mut pos = (queue.len() as i64 - 1).min(soft - 1);
            while pos >= 0 {
                if queue.at(pos as usize).is_sync_frame() {
                    return pos;
                }
                pos -= 1;
            }
            // no keyframe below the soft limit: settle for the soft limit
            soft
        }
    }
}
