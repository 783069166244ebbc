//! # fdcast
//!
//! A multi-client fan-out sink for opaque media buffers.
//!
//! A producer pushes a single ordered stream of buffers into an [`FdSink`];
//! the sink concurrently writes that stream to any number of host-owned
//! file descriptors, each draining at its own pace. A slow reader never
//! stalls the producer: buffers queue up per client, lagging clients are
//! repositioned or evicted by policy, and a new client joins the stream at
//! a point chosen by its [sync method](SyncMethod): the latest buffer,
//! the latest keyframe, or a backfill burst.
//!
//! The sink treats buffers as opaque bytes with three bits of metadata:
//! an optional timestamp, an is-header flag (decoder preamble resent to
//! every new client) and an is-delta flag (non-keyframe). Descriptors are
//! owned by the host throughout: the sink puts them in non-blocking mode
//! and writes to them, but never opens or closes them. Lifecycle events
//! arrive through a [`SinkObserver`].
//!
//! ## Architecture
//!
//! Two threads touch the sink: the producer calling [`FdSink::render`] and
//! an internal I/O thread multiplexing all descriptors over a single
//! poll(2) set. One mutex guards all shared state; the I/O thread blocks
//! only in the poll wait and never in a write.
//!
//! This crate is Unix-only.

pub mod buffer;
pub mod client;
pub mod error;
pub(crate) mod io;
pub mod sink;

pub use buffer::queue::UnitType;
pub use buffer::{Buffer, BufferQueue};
pub use client::{ClientStats, ClientStatus, SinkStats, SyncMethod};
pub use error::{Result, SinkError};
pub use sink::observer::NullObserver;
pub use sink::{FdSink, RecoverPolicy, SinkConfig, SinkObserver};
