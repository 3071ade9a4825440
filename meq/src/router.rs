//! Router facade over the subscription trie.
//!
//! The protocol layer talks to a [`Router`]; [`DefaultRouter`] forwards to a
//! shared [`SubTrie`] and keeps live counters of subscribed topics and
//! session routes for the admin/stats surfaces. The counters track mutations
//! made through the router; writes that bypass it are picked up by the next
//! [`DefaultRouter::recount`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use itertools::Itertools;
use parking_lot::Mutex;

use crate::trie::{Roots, SubTrie};
use crate::types::{Added, ConnId, MessageType, NodeId, Removed, Session};
use crate::utils::Counter;
use crate::Result;

#[async_trait]
pub trait Router: Sync + Send {
    /// Subscribe a session to `topic_filter` in `group`
    async fn add(&self, topic_filter: &str, group: &[u8], cid: ConnId, addr: NodeId) -> Result<()>;

    /// Unsubscribe a session from `topic_filter` in `group`
    async fn remove(&self, topic_filter: &str, group: &[u8], cid: ConnId, addr: NodeId) -> Result<()>;

    /// Sessions to deliver a message published on `topic`
    async fn matches(&self, topic: &str) -> Result<Vec<Session>>;

    /// Sessions registered under exactly `topic_filter`
    async fn matches_exactly(&self, topic_filter: &str) -> Result<Vec<Session>>;

    /// Complete state as sync payloads
    async fn encode(&self, message_type: MessageType) -> Result<Vec<Bytes>>;

    /// Union with a remote state, returns what was new
    async fn merge(&self, remote: Roots) -> Option<Roots>;

    ///Return number of subscribed topics
    fn topics(&self) -> Counter;

    ///Returns the number of subscription routes (topic, group, session)
    fn routes(&self) -> Counter;

    ///get topic list
    async fn list_topics(&self, top: usize) -> Vec<String>;
}

#[derive(Clone)]
pub struct DefaultRouter {
    pub trie: Arc<SubTrie>,
    pub topics_count: Arc<Counter>,
    pub routes_count: Arc<Counter>,
    //Serializes a trie mutation with its counter update
    mutations: Arc<Mutex<()>>,
}

impl Default for DefaultRouter {
    fn default() -> Self {
        Self::new(Arc::new(SubTrie::new()))
    }
}

impl DefaultRouter {
    #[inline]
    pub fn new(trie: Arc<SubTrie>) -> DefaultRouter {
        let router = Self {
            trie,
            topics_count: Arc::new(Counter::new()),
            routes_count: Arc::new(Counter::new()),
            mutations: Arc::new(Mutex::new(())),
        };
        router.recount();
        router
    }

    /// Resets the counters from the trie contents.
    #[inline]
    pub fn recount(&self) {
        let _guard = self.mutations.lock();
        self.recount_locked();
    }

    fn recount_locked(&self) {
        let stats = self.trie.stats();
        self.topics_count.sets(stats.topics as isize);
        self.routes_count.sets(stats.sessions as isize);
    }

    #[inline]
    pub fn trie(&self) -> &SubTrie {
        &self.trie
    }
}

#[async_trait]
impl Router for DefaultRouter {
    #[inline]
    async fn add(&self, topic_filter: &str, group: &[u8], cid: ConnId, addr: NodeId) -> Result<()> {
        log::debug!("add, topic_filter: {:?}, cid: {}, addr: {}", topic_filter, cid, addr);
        let _guard = self.mutations.lock();
        match self.trie.add(topic_filter, group, cid, addr)? {
            Added::Topic => {
                self.topics_count.inc();
                self.routes_count.inc();
            }
            Added::Group | Added::Session => self.routes_count.inc(),
            Added::Exists => {}
        }
        Ok(())
    }

    #[inline]
    async fn remove(&self, topic_filter: &str, group: &[u8], cid: ConnId, addr: NodeId) -> Result<()> {
        log::debug!("remove, topic_filter: {:?}, cid: {}, addr: {}", topic_filter, cid, addr);
        let _guard = self.mutations.lock();
        let removed = self.trie.remove(topic_filter, group, cid, addr)?;
        self.routes_count.dec();
        if removed == Removed::Topic {
            self.topics_count.dec();
        }
        Ok(())
    }

    #[inline]
    async fn matches(&self, topic: &str) -> Result<Vec<Session>> {
        self.trie.lookup(topic)
    }

    #[inline]
    async fn matches_exactly(&self, topic_filter: &str) -> Result<Vec<Session>> {
        self.trie.lookup_exactly(topic_filter)
    }

    #[inline]
    async fn encode(&self, message_type: MessageType) -> Result<Vec<Bytes>> {
        self.trie.encode(message_type)
    }

    #[inline]
    async fn merge(&self, remote: Roots) -> Option<Roots> {
        let _guard = self.mutations.lock();
        let delta = self.trie.merge_delta(remote);
        if delta.is_some() {
            self.recount_locked();
        }
        delta
    }

    #[inline]
    fn topics(&self) -> Counter {
        self.topics_count.as_ref().clone()
    }

    #[inline]
    fn routes(&self) -> Counter {
        self.routes_count.as_ref().clone()
    }

    #[inline]
    async fn list_topics(&self, top: usize) -> Vec<String> {
        self.trie.list_topics(top).into_iter().sorted().collect()
    }
}
