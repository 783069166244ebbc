//! The fan-out sink element
//!
//! `FdSink` accepts a single stream of buffers from a producer and fans it
//! out to a dynamic set of host-owned file descriptors, each draining at
//! its own pace. A dedicated I/O thread services the descriptors through a
//! shared poll set; the producer never blocks on a slow client.

pub mod config;
pub mod core;
pub mod observer;
pub(crate) mod policy;
pub(crate) mod worker;

pub use self::core::FdSink;
pub use config::{RecoverPolicy, SinkConfig};
pub use observer::SinkObserver;
