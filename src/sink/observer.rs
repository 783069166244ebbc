//! Host notification interface

use std::os::unix::io::RawFd;

use crate::client::state::ClientStatus;
use crate::error::SinkError;

/// Callbacks the sink invokes as clients come and go
///
/// `client_added` runs on the thread that called `add`; the removal
/// notifications run on whichever thread performs the removal, usually the
/// I/O thread. Implementations must be thread-aware and must not block for
/// long: the clients lock is released while a callback runs, but the
/// calling thread cannot service clients in the meantime.
///
/// The contract per descriptor is: one `client_added`, then exactly one
/// `client_removed` carrying the terminal status, then exactly one
/// `client_fd_removed`. During `client_removed` the sink still references
/// the descriptor (so `get_stats` works), and the handler must not close
/// it; from `client_fd_removed` on, the descriptor belongs entirely to the
/// host again. A rejected duplicate `add` produces a single
/// `client_removed` with `ClientStatus::Duplicate` and no
/// `client_fd_removed`.
#[allow(unused_variables)]
pub trait SinkObserver: Send + Sync + 'static {
    /// A descriptor was registered
    fn client_added(&self, fd: RawFd) {}

    /// A client reached a terminal status; the fd is still registered
    fn client_removed(&self, fd: RawFd, status: ClientStatus) {}

    /// The sink dropped its last reference to the descriptor
    fn client_fd_removed(&self, fd: RawFd) {}

    /// The I/O thread hit an unrecoverable error and is shutting down
    fn fatal_error(&self, error: &SinkError) {}
}

/// Observer that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SinkObserver for NullObserver {}
