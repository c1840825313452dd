//! WebSocket handlers
//!
//! Each classroom socket gets a bounded outbound queue; frames to a peer
//! whose queue is full are dropped rather than buffered without limit.

pub mod classroom;
