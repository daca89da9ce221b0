//! I/O helpers for the worker: master channel, config, child processes.

pub mod channel;
pub mod collect;
pub mod config;
pub mod engine;
pub mod process;
pub mod signal;
