//! Endpoint health
//!
//! The monitor is the only writer of the table; the router and the manager's
//! accessors only read it.

mod monitor;
mod state;

pub use monitor::HealthMonitor;
pub use state::{ConnectionHealth, Health, HealthTable, NO_CONNECTION};
