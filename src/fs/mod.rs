//! File system helpers for backup source roots.

pub mod walker;
