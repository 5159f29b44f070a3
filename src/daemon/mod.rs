//! Process-level concerns of the daemon.

pub mod shutdown;
