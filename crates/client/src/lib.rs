//! Transport layer for test-execution monitoring.
//!
//! Provides the WebSocket connection manager ([`connection`]), the
//! HTTP polling watcher ([`poll`]) and REST wrapper ([`api`]), the
//! bounded-concurrency batch orchestrator ([`batch`]), and the
//! transport-dispatching watch facade ([`job`]). All transports feed
//! the pure state machine from `testwatch-core` and publish
//! [`events::WatchEvent`]s over a broadcast channel.

pub mod api;
pub mod batch;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod job;
pub mod poll;
