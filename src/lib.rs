//! Health monitoring for property service endpoints.
//!
//! Each configured target is polled on its own interval; observations go
//! into a bounded rolling window from which the target's status is derived.
//! A snapshot of every target is served as JSON.

pub mod config;
pub mod core;
