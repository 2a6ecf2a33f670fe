//! Read routing
//!
//! Decides which handle serves a request: the scope's transaction, the
//! leader, or the next healthy follower.

mod executor;
mod follower;
mod rw_split;

pub use executor::Executor;
pub use follower::FollowerRouter;
pub use rw_split::{Access, RouteTarget, RwSplitter};
