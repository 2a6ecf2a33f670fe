//! Health-aware round robin over follower slots

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::EndpointRole;
use crate::driver::Connection;
use crate::health::HealthTable;
use crate::metrics::metrics;
use crate::pool::Topology;

/// Round-robin cursor over follower positions.
///
/// The cursor has its own lock; health is read per slot from the table so a
/// scan never holds the health lock for more than one lookup.
#[derive(Debug, Default)]
pub struct FollowerRouter {
    cursor: Mutex<usize>,
}

impl FollowerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position the next scan starts from
    pub fn cursor(&self) -> usize {
        *self.cursor.lock()
    }

    /// Pick the next healthy follower, or the leader if there is none.
    ///
    /// Scans each slot at most once starting from the cursor. On a hit the
    /// cursor moves just past the chosen slot; on a miss it is left alone.
    pub fn select(
        &self,
        topology: &Topology,
        health: &HealthTable,
    ) -> (EndpointRole, Arc<dyn Connection>) {
        let slots = topology.follower_slots();
        if slots.is_empty() {
            return (EndpointRole::Leader, topology.leader().clone());
        }

        let n = slots.len();
        let mut cursor = self.cursor.lock();
        let start = *cursor % n;
        for offset in 0..n {
            let idx = (start + offset) % n;
            let role = EndpointRole::Follower(idx);
            if let Some(conn) = &slots[idx] {
                if health.is_healthy(role) {
                    *cursor = (idx + 1) % n;
                    return (role, conn.clone());
                }
            }
        }
        drop(cursor);

        metrics().record_follower_fallback();
        debug!(followers = n, "No healthy follower, routing read to leader");
        (EndpointRole::Leader, topology.leader().clone())
    }
}
