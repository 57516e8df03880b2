//! dirwatch - recursive directory change notifications
//!
//! Library half of the `dirwatch` binary: configuration, logging setup and
//! the notification sinks fed by the `watcher` crate.

pub mod config;
pub mod logging;
pub mod notify;
