//! Background worker that executes queued builds.

pub mod config;
pub mod poller;
