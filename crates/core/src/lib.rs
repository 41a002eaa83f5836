//! Pure domain logic for test-execution monitoring.
//!
//! No I/O lives here: this crate defines the inbound message
//! classifier, the execution state machine, and the status-set
//! classification shared by both the WebSocket and polling transports.

pub mod message;
pub mod state;
pub mod status;
pub mod types;
