//! Descriptor-level plumbing
//!
//! This module provides:
//! - `FdSet`: a level-triggered poll(2) set with per-descriptor read and
//!   write interest, a wake pipe and a flushing flag
//! - fd helpers for the syscalls the sink needs (non-blocking setup,
//!   FIONREAD, MSG_NOSIGNAL sends, DSCP marking)

pub(crate) mod fd;
pub(crate) mod poll;

pub(crate) use poll::{FdSet, Wait};
