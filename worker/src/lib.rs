//! Worker side of a parallel test runner.
//!
//! A worker connects to a master over a strict request/reply channel, announces
//! the tests it collected, then pulls node ids one batch at a time and runs
//! them, reporting every lifecycle event back until the master runs dry, tells
//! it to die, or an operator asks it to quit.
//!
//! - **[`core`]**: Pure, deterministic logic (protocol types, pairing, report
//!   serialization). No I/O.
//! - **[`io`]**: Side-effecting pieces (TCP transport, config, child processes,
//!   signals).
//!
//! [`coordinator`] and [`session`] tie the two together.

pub mod context;
pub mod coordinator;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod link;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
