//! Utilities for testing code that talks the vehicle protocol: a transport that records what is
//!  sent instead of sending it, and a listener that forwards events into a channel.
//!
//! They are used by the crate's own tests, and they are exported so that applications can test
//!  their vehicle code without opening sockets.

pub mod listener;
pub mod transport;
