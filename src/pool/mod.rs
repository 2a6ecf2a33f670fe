//! Connection establishment
//!
//! Turns endpoint descriptors into live pooled handles: one leader, plus one
//! slot per configured follower.

mod connector;
mod topology;

pub use connector::{backoff, establish, BACKOFF_STEP};
pub use topology::{FollowerFailure, Topology};
