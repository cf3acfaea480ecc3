//! CLI command implementations.

pub mod booths;
pub mod clear;
pub mod import;
pub mod search;
pub mod status;
pub mod sync;
pub mod watch;
