//! hitrelay delivery engine.
//!
//! This crate wires together the shared-channel registry, the throttled
//! message queue, the extra-data side channel, one-shot pings, and the
//! delivery strategy chain on top of pluggable transports.

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod extra_data;
pub mod ping;
pub mod queue;
pub mod registry;
pub mod service;
pub mod stats;
