use std::fmt;

use serde::{Deserialize, Serialize};

pub use meq_utils::{NodeId, TimestampMillis};

/// Connection identifier, unique within its owning node
pub type ConnId = u64;
/// Shared subscription (queue group) name
pub type GroupName = bytes::Bytes;
///full topic string as subscribed or published
pub type TopicFilter = bytestring::ByteString;
pub type MessageType = u8;

pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

/// A subscriber: one connection on one cluster node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Session {
    pub cid: ConnId,
    pub addr: NodeId,
}

impl Session {
    #[inline]
    pub fn new(cid: ConnId, addr: NodeId) -> Self {
        Self { cid, addr }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.cid, self.addr)
    }
}

/// Sessions sharing one subscription; a publish reaches one member per group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubGroup {
    pub name: GroupName,
    pub sessions: Vec<Session>,
}

impl SubGroup {
    #[inline]
    pub fn new(name: GroupName, session: Session) -> Self {
        Self { name, sessions: vec![session] }
    }

    #[inline]
    pub fn contains(&self, session: &Session) -> bool {
        self.sessions.contains(session)
    }

    /// Appends `session` unless already present. Returns true if appended.
    #[inline]
    pub fn insert(&mut self, session: Session) -> bool {
        if self.contains(&session) {
            false
        } else {
            self.sessions.push(session);
            true
        }
    }

    /// Removes `session`, keeping the order of the others. Returns true if it was present.
    #[inline]
    pub fn remove(&mut self, session: &Session) -> bool {
        if let Some(idx) = self.sessions.iter().position(|s| s == session) {
            self.sessions.remove(idx);
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Outcome of a subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Added {
    /// First group under a new topic entry
    Topic,
    /// New group under an existing topic entry
    Group,
    /// New session in an existing group
    Session,
    /// Already subscribed, nothing changed
    Exists,
}

/// Outcome of an unsubscribe; each variant implies the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removed {
    Session,
    Group,
    Topic,
}

/// Totals over the trie.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrieStats {
    pub nodes: usize,
    pub topics: usize,
    pub groups: usize,
    pub sessions: usize,
}
