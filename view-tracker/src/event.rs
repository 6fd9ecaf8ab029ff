//! View events and the visitor identity they are grouped by.

use std::fmt;

/// Attributes of the client that issued a view request, as seen by the
/// transport layer. See [`crate::client_ip`] for extracting the IP from
/// proxy forwarding headers.
#[derive(Clone, Debug, Default)]
pub struct Visitor {
    /// Network address of the client, without a port.
    pub ip: String,
    /// The client's user agent string. May be empty.
    pub user_agent: String,
}

/// One observed view attempt.
#[derive(Clone, Debug)]
pub struct ViewEvent {
    /// Network address of the client.
    pub ip: String,
    /// The client's user agent string.
    pub user_agent: String,
    /// Id of the object that was viewed.
    pub object_id: i64,
    /// Table holding the object's view counter.
    pub table: String,
    /// Observation time, unix seconds.
    pub ts_secs: i64,
}

impl ViewEvent {
    /// Shape an event from visitor attributes and the viewed target.
    pub fn new(visitor: &Visitor, table: &str, object_id: i64, ts_secs: i64) -> Self {
        Self {
            ip: visitor.ip.clone(),
            user_agent: visitor.user_agent.clone(),
            object_id,
            table: table.to_owned(),
            ts_secs,
        }
    }

    /// The identity this event is grouped by in the recency store.
    pub fn visitor_key(&self) -> VisitorKey {
        VisitorKey {
            ip: self.ip.clone(),
            user_agent: self.user_agent.clone(),
            object_id: self.object_id,
            table: self.table.clone(),
        }
    }
}

/// Groups events believed to originate from the same viewer viewing the same
/// target: two events with identical (ip, user agent, object id, table)
/// always map to the same key. Derivation is total - an empty user agent just
/// yields a less specific key, never an error.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VisitorKey {
    ip: String,
    user_agent: String,
    object_id: i64,
    table: String,
}

impl VisitorKey {
    /// Derive a key directly from visitor attributes and a target.
    pub fn new(visitor: &Visitor, table: &str, object_id: i64) -> Self {
        Self {
            ip: visitor.ip.clone(),
            user_agent: visitor.user_agent.clone(),
            object_id,
            table: table.to_owned(),
        }
    }
}

impl fmt::Display for VisitorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.ip, self.user_agent, self.object_id, self.table
        )
    }
}
