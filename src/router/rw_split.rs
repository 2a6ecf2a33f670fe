/// What a caller intends to do with a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Read-write routing decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// Use the transaction carried by the call scope
    Transaction,
    /// Route to the leader (writes)
    Leader,
    /// Route to a follower (reads outside a transaction)
    Follower,
}

/// Read-write splitter
pub struct RwSplitter;

impl RwSplitter {
    /// Determine the routing target from intent and transaction state.
    ///
    /// Work inside a transaction always stays on that transaction, reads
    /// included, so it sees its own writes.
    pub fn route(access: Access, in_transaction: bool) -> RouteTarget {
        if in_transaction {
            return RouteTarget::Transaction;
        }

        match access {
            Access::Read => RouteTarget::Follower,
            Access::Write => RouteTarget::Leader,
        }
    }
}
