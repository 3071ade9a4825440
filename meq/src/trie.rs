//! Subscription trie.
//!
//! A forest of nodes keyed by segment id. A node terminating one or more
//! subscriptions keeps them under the full topic string, each topic holding an
//! ordered list of shared groups. The whole forest sits behind a single
//! `RwLock`: lookups and snapshots read, subscribe/unsubscribe/merge write.

use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::codec;
use crate::shared::{DefaultSharedSubscription, SharedSubscription};
use crate::topic::{SegmentId, Topic, DEFAULT_MAX_TOPIC_LEVELS, MAX_TOPIC_LEVELS_CEILING, WILDCARD_ID};
use crate::types::{
    Added, ConnId, GroupName, HashMap, MessageType, NodeId, Removed, Session, SubGroup, TopicFilter,
    TrieStats,
};
use crate::{MeqError, Result};

/// Root registry: first segment id -> root node.
pub type Roots = HashMap<SegmentId, Node>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub id: SegmentId,
    pub subs: HashMap<TopicFilter, Vec<SubGroup>>,
    pub children: HashMap<SegmentId, Node>,
}

impl Node {
    #[inline]
    pub fn new(id: SegmentId) -> Self {
        Self { id, subs: HashMap::default(), children: HashMap::default() }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subs.is_empty() && self.children.is_empty()
    }

    fn add(&mut self, topic: &TopicFilter, group: GroupName, session: Session) -> Added {
        match self.subs.entry(topic.clone()) {
            Entry::Vacant(e) => {
                e.insert(vec![SubGroup::new(group, session)]);
                Added::Topic
            }
            Entry::Occupied(mut e) => {
                let groups = e.get_mut();
                if let Some(g) = groups.iter_mut().find(|g| g.name == group) {
                    if g.insert(session) {
                        Added::Session
                    } else {
                        Added::Exists
                    }
                } else {
                    groups.push(SubGroup::new(group, session));
                    Added::Group
                }
            }
        }
    }

    fn remove(&mut self, topic: &TopicFilter, group: &[u8], session: &Session) -> Result<Removed> {
        let groups = self
            .subs
            .get_mut(topic)
            .ok_or_else(|| MeqError::NotFound(format!("no subscription for topic `{}`", topic)))?;
        let idx = groups.iter().position(|g| g.name == group).ok_or_else(|| {
            MeqError::NotFound(format!(
                "no group `{}` for topic `{}`",
                String::from_utf8_lossy(group),
                topic
            ))
        })?;
        if !groups[idx].remove(session) {
            return Err(MeqError::NotFound(format!(
                "session {:?} not in group `{}` of topic `{}`",
                session,
                String::from_utf8_lossy(group),
                topic
            )));
        }

        if !groups[idx].is_empty() {
            return Ok(Removed::Session);
        }
        groups.remove(idx);
        if !groups.is_empty() {
            return Ok(Removed::Group);
        }
        self.subs.remove(topic);
        Ok(Removed::Topic)
    }

    /// One session per group registered at this node.
    fn select(&self, shared: &dyn SharedSubscription, out: &mut Vec<Session>) {
        for g in self.subs.values().flatten() {
            if let Some(s) = shared.choice(&g.sessions).and_then(|idx| g.sessions.get(idx)) {
                out.push(*s);
            }
        }
    }

    fn select_subtree(&self, shared: &dyn SharedSubscription, out: &mut Vec<Session>) {
        self.select(shared, out);
        for child in self.children.values() {
            child.select_subtree(shared, out);
        }
    }

    fn match_subtree(&self, rest: &[SegmentId], shared: &dyn SharedSubscription, out: &mut Vec<Session>) {
        let Some((id, rest)) = rest.split_first() else {
            self.select_subtree(shared, out);
            return;
        };
        // a subscription on a prefix of the published topic covers it as well
        self.select(shared, out);
        if let Some(child) = self.children.get(id) {
            child.match_subtree(rest, shared, out);
        }
        if *id != WILDCARD_ID {
            if let Some(child) = self.children.get(&WILDCARD_ID) {
                child.match_subtree(rest, shared, out);
            }
        }
    }

    /// Drops empty groups, empty topic entries and empty descendants, merges
    /// groups listed twice and removes duplicate sessions.
    fn normalize(&mut self) {
        self.subs.retain(|_, groups| {
            let mut merged: Vec<SubGroup> = Vec::with_capacity(groups.len());
            for g in groups.drain(..) {
                let idx = match merged.iter().position(|m| m.name == g.name) {
                    Some(idx) => idx,
                    None => {
                        merged.push(SubGroup { name: g.name.clone(), sessions: Vec::new() });
                        merged.len() - 1
                    }
                };
                for s in g.sessions {
                    merged[idx].insert(s);
                }
            }
            merged.retain(|g| !g.is_empty());
            *groups = merged;
            !groups.is_empty()
        });
        self.children.retain(|id, child| {
            child.id = *id;
            child.normalize();
            !child.is_empty()
        });
    }

    /// Unions `remote` into `self` and returns what was new, if anything.
    fn merge(&mut self, remote: Node) -> Option<Node> {
        let mut delta = Node::new(self.id);

        for (topic, rgroups) in remote.subs {
            match self.subs.entry(topic) {
                Entry::Vacant(e) => {
                    delta.subs.insert(e.key().clone(), rgroups.clone());
                    e.insert(rgroups);
                }
                Entry::Occupied(mut e) => {
                    let mut added = Vec::new();
                    let local = e.get_mut();
                    for rg in rgroups {
                        match local.iter_mut().find(|g| g.name == rg.name) {
                            Some(lg) => {
                                let sessions =
                                    rg.sessions.into_iter().filter(|s| lg.insert(*s)).collect::<Vec<_>>();
                                if !sessions.is_empty() {
                                    added.push(SubGroup { name: rg.name, sessions });
                                }
                            }
                            None => {
                                added.push(rg.clone());
                                local.push(rg);
                            }
                        }
                    }
                    if !added.is_empty() {
                        delta.subs.insert(e.key().clone(), added);
                    }
                }
            }
        }

        for (id, rchild) in remote.children {
            match self.children.entry(id) {
                Entry::Vacant(e) => {
                    delta.children.insert(id, rchild.clone());
                    e.insert(rchild);
                }
                Entry::Occupied(mut e) => {
                    if let Some(d) = e.get_mut().merge(rchild) {
                        delta.children.insert(id, d);
                    }
                }
            }
        }

        if delta.is_empty() {
            None
        } else {
            Some(delta)
        }
    }

    fn stats(&self, stats: &mut TrieStats) {
        stats.nodes += 1;
        stats.topics += self.subs.len();
        for g in self.subs.values().flatten() {
            stats.groups += 1;
            stats.sessions += g.sessions.len();
        }
        for child in self.children.values() {
            child.stats(stats);
        }
    }

    fn topics(&self, top: usize, out: &mut Vec<String>) {
        for topic in self.subs.keys() {
            if out.len() >= top {
                return;
            }
            out.push(topic.to_string());
        }
        for child in self.children.values() {
            if out.len() >= top {
                return;
            }
            child.topics(top, out);
        }
    }

    fn check(&self, key: SegmentId, path: &mut Vec<SegmentId>) -> std::result::Result<(), String> {
        if self.id != key {
            return Err(format!("node id {} stored under key {}", self.id, key));
        }
        if self.is_empty() {
            return Err(format!("empty node {} left in trie", self.id));
        }
        path.push(key);
        for (topic, groups) in self.subs.iter() {
            let parsed = Topic::parse_limited(topic.as_bytes(), true, usize::MAX)
                .map_err(|e| format!("topic `{}`: {}", topic, e))?;
            if parsed.segments() != path.as_slice() {
                return Err(format!("topic `{}` stored at the wrong node", topic));
            }
            check_groups(topic, groups)?;
        }
        for (id, child) in self.children.iter() {
            child.check(*id, path)?;
        }
        path.pop();
        Ok(())
    }
}

pub(crate) fn check_groups(topic: &TopicFilter, groups: &[SubGroup]) -> std::result::Result<(), String> {
    if groups.is_empty() {
        return Err(format!("topic `{}` has no groups", topic));
    }
    for (i, g) in groups.iter().enumerate() {
        if g.is_empty() {
            return Err(format!("empty group under topic `{}`", topic));
        }
        if groups[..i].iter().any(|o| o.name == g.name) {
            return Err(format!("group listed twice under topic `{}`", topic));
        }
        for (j, s) in g.sessions.iter().enumerate() {
            if g.sessions[..j].contains(s) {
                return Err(format!("session {:?} listed twice under topic `{}`", s, topic));
            }
        }
    }
    Ok(())
}

/// Verifies the structural invariants of a root registry.
pub fn check_roots(roots: &Roots) -> std::result::Result<(), String> {
    let mut path = Vec::new();
    for (id, root) in roots.iter() {
        root.check(*id, &mut path)?;
    }
    Ok(())
}

pub(crate) fn merge_roots(roots: &mut Roots, mut remote: Roots) -> Option<Roots> {
    remote.retain(|id, node| {
        node.id = *id;
        node.normalize();
        !node.is_empty()
    });

    let mut delta = Roots::default();
    for (id, rnode) in remote {
        match roots.entry(id) {
            Entry::Vacant(e) => {
                delta.insert(id, rnode.clone());
                e.insert(rnode);
            }
            Entry::Occupied(mut e) => {
                if let Some(d) = e.get_mut().merge(rnode) {
                    delta.insert(id, d);
                }
            }
        }
    }
    if delta.is_empty() {
        None
    } else {
        Some(delta)
    }
}

pub struct SubTrie {
    roots: RwLock<Roots>,
    shared: Arc<dyn SharedSubscription>,
    max_levels: usize,
}

impl Default for SubTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubTrie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubTrie {:?}", self.stats())
    }
}

impl SubTrie {
    #[inline]
    pub fn new() -> Self {
        Self::with_shared(Arc::new(DefaultSharedSubscription))
    }

    #[inline]
    pub fn with_shared(shared: Arc<dyn SharedSubscription>) -> Self {
        Self { roots: RwLock::new(Roots::default()), shared, max_levels: DEFAULT_MAX_TOPIC_LEVELS }
    }

    /// Sets the topic level limit, clamped to `1..=MAX_TOPIC_LEVELS_CEILING`.
    #[inline]
    pub fn with_max_levels(mut self, max_levels: usize) -> Self {
        self.max_levels = max_levels.clamp(1, MAX_TOPIC_LEVELS_CEILING);
        self
    }

    #[inline]
    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    /// Builds a trie holding `roots`, normalized.
    pub fn from_roots(roots: Roots) -> Self {
        let trie = Self::new();
        merge_roots(&mut trie.roots.write(), roots);
        trie
    }

    /// Registers `(cid, addr)` in `group` under `topic` and reports what was created.
    pub fn add<T, G>(&self, topic: T, group: G, cid: ConnId, addr: NodeId) -> Result<Added>
    where
        T: AsRef<[u8]>,
        G: AsRef<[u8]>,
    {
        let topic = Topic::parse_limited(topic, true, self.max_levels)?;
        let session = Session::new(cid, addr);
        let group = GroupName::copy_from_slice(group.as_ref());

        let mut roots = self.roots.write();
        let mut segments = topic.segments().iter();
        let mut node = match segments.next() {
            Some(first) => roots.entry(*first).or_insert_with(|| Node::new(*first)),
            None => return Err(MeqError::Msg(format!("topic `{}` has no segments", topic))),
        };
        for id in segments {
            node = node.children.entry(*id).or_insert_with(|| Node::new(*id));
        }
        let added = node.add(topic.topic_filter(), group, session);
        log::debug!("subscribe, topic: {}, session: {:?}, added: {:?}", topic, session, added);
        Ok(added)
    }

    #[inline]
    pub fn subscribe<T, G>(&self, topic: T, group: G, cid: ConnId, addr: NodeId) -> Result<()>
    where
        T: AsRef<[u8]>,
        G: AsRef<[u8]>,
    {
        self.add(topic, group, cid, addr).map(|_| ())
    }

    /// Removes one session from the subscription registered under exactly `topic`,
    /// pruning the group, topic entry and any nodes left empty.
    pub fn remove<T, G>(&self, topic: T, group: G, cid: ConnId, addr: NodeId) -> Result<Removed>
    where
        T: AsRef<[u8]>,
        G: AsRef<[u8]>,
    {
        let topic = Topic::parse_limited(topic, true, self.max_levels)?;
        let session = Session::new(cid, addr);
        let not_found = || MeqError::NotFound(format!("no subscription path for topic `{}`", topic));

        let mut roots = self.roots.write();
        let (first, rest) = topic.segments().split_first().ok_or_else(not_found)?;
        let root = roots.get_mut(first).ok_or_else(not_found)?;
        let removed = Self::remove_at(root, rest, &topic, group.as_ref(), &session)?;
        if root.is_empty() {
            roots.remove(first);
        }
        log::debug!("unsubscribe, topic: {}, session: {:?}, removed: {:?}", topic, session, removed);
        Ok(removed)
    }

    fn remove_at(
        node: &mut Node,
        rest: &[SegmentId],
        topic: &Topic,
        group: &[u8],
        session: &Session,
    ) -> Result<Removed> {
        let Some((id, rest)) = rest.split_first() else {
            return node.remove(topic.topic_filter(), group, session);
        };
        let child = node
            .children
            .get_mut(id)
            .ok_or_else(|| MeqError::NotFound(format!("no subscription path for topic `{}`", topic)))?;
        let removed = Self::remove_at(child, rest, topic, group, session)?;
        if child.is_empty() {
            node.children.remove(id);
        }
        Ok(removed)
    }

    #[inline]
    pub fn unsubscribe<T, G>(&self, topic: T, group: G, cid: ConnId, addr: NodeId) -> Result<()>
    where
        T: AsRef<[u8]>,
        G: AsRef<[u8]>,
    {
        self.remove(topic, group, cid, addr).map(|_| ())
    }

    /// Publish-time routing: every subscription matching `topic`, wildcards
    /// expanded, plus everything registered on a prefix of it or below the
    /// matched nodes. One session per matched group.
    pub fn lookup<T: AsRef<[u8]>>(&self, topic: T) -> Result<Vec<Session>> {
        let topic = Topic::parse_limited(topic, false, self.max_levels)?;
        let mut sessions = Vec::new();
        let Some((first, rest)) = topic.segments().split_first() else {
            return Ok(sessions);
        };

        let roots = self.roots.read();
        let shared = self.shared.as_ref();
        if let Some(root) = roots.get(first) {
            root.match_subtree(rest, shared, &mut sessions);
        }
        if *first != WILDCARD_ID {
            if let Some(root) = roots.get(&WILDCARD_ID) {
                root.match_subtree(rest, shared, &mut sessions);
            }
        }
        //TODO: deduplicate sessions reached through several groups before returning
        log::debug!("lookup, topic: {}, sessions: {:?}", topic, sessions);
        Ok(sessions)
    }

    /// Resolves a subscription pattern to its own registered sessions, with no
    /// wildcard expansion and no descent into children.
    pub fn lookup_exactly<T: AsRef<[u8]>>(&self, topic: T) -> Result<Vec<Session>> {
        let topic = Topic::parse_limited(topic, true, self.max_levels)?;
        let mut sessions = Vec::new();
        let Some((first, rest)) = topic.segments().split_first() else {
            return Ok(sessions);
        };

        let roots = self.roots.read();
        let mut node = roots.get(first);
        for id in rest {
            node = node.and_then(|n| n.children.get(id));
        }
        if let Some(node) = node {
            node.select(self.shared.as_ref(), &mut sessions);
        }
        Ok(sessions)
    }

    /// Serializes the complete state into sync payloads tagged with `message_type`.
    pub fn encode(&self, message_type: MessageType) -> Result<Vec<Bytes>> {
        let roots = self.roots.read();
        Ok(vec![codec::encode(&roots, message_type)?])
    }

    /// Unions `remote` into the local state and returns the complete result.
    pub fn merge(&self, remote: Roots) -> Roots {
        let mut roots = self.roots.write();
        if let Some(delta) = merge_roots(&mut roots, remote) {
            log::info!("merge, new roots: {}", delta.len());
        }
        roots.clone()
    }

    /// Unions `remote` into the local state and returns only the part that was new.
    pub fn merge_delta(&self, remote: Roots) -> Option<Roots> {
        let delta = merge_roots(&mut self.roots.write(), remote);
        if let Some(delta) = &delta {
            log::info!("merge, new roots: {}", delta.len());
        }
        delta
    }

    #[inline]
    pub fn snapshot(&self) -> Roots {
        self.roots.read().clone()
    }

    pub fn stats(&self) -> TrieStats {
        let mut stats = TrieStats::default();
        for root in self.roots.read().values() {
            root.stats(&mut stats);
        }
        stats
    }

    pub fn list_topics(&self, top: usize) -> Vec<String> {
        let mut topics = Vec::new();
        for root in self.roots.read().values() {
            if topics.len() >= top {
                break;
            }
            root.topics(top, &mut topics);
        }
        topics
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.roots.read().is_empty()
    }

    #[inline]
    pub fn check(&self) -> std::result::Result<(), String> {
        check_roots(&self.roots.read())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::thread;

    use super::*;

    struct First;

    impl SharedSubscription for First {
        fn choice(&self, sessions: &[Session]) -> Option<usize> {
            if sessions.is_empty() {
                None
            } else {
                Some(0)
            }
        }
    }

    fn s(cid: ConnId) -> Session {
        Session::new(cid, 1)
    }

    fn sorted(mut v: Vec<Session>) -> Vec<Session> {
        v.sort();
        v
    }

    /// topic -> group -> sessions, ignoring order
    fn canonical(roots: &Roots) -> BTreeMap<String, BTreeMap<Vec<u8>, BTreeSet<Session>>> {
        fn walk(n: &Node, out: &mut BTreeMap<String, BTreeMap<Vec<u8>, BTreeSet<Session>>>) {
            for (topic, groups) in n.subs.iter() {
                let entry = out.entry(topic.to_string()).or_default();
                for g in groups {
                    entry.entry(g.name.to_vec()).or_default().extend(g.sessions.iter().copied());
                }
            }
            for c in n.children.values() {
                walk(c, out);
            }
        }
        let mut out = BTreeMap::new();
        for n in roots.values() {
            walk(n, &mut out);
        }
        out
    }

    #[test]
    fn test_subscribe_lookup_exactly() {
        let trie = SubTrie::new();
        trie.subscribe("a/b", "g1", 1, 1).unwrap();
        assert_eq!(trie.lookup_exactly("a/b").unwrap(), vec![s(1)]);
        assert!(trie.lookup_exactly("a").unwrap().is_empty());
        assert!(trie.lookup_exactly("a/b/c").unwrap().is_empty());
        assert!(trie.lookup_exactly("x").unwrap().is_empty());
        trie.check().unwrap();
    }

    #[test]
    fn test_single_segment_topic() {
        let trie = SubTrie::new();
        trie.subscribe("t", "g1", 1, 1).unwrap();
        assert_eq!(trie.lookup_exactly("t").unwrap(), vec![s(1)]);
        assert_eq!(trie.lookup("t").unwrap(), vec![s(1)]);
        trie.unsubscribe("t", "g1", 1, 1).unwrap();
        assert!(trie.is_empty());
    }

    #[test]
    fn test_add_outcomes() {
        let trie = SubTrie::new();
        assert_eq!(trie.add("t", "g1", 1, 1).unwrap(), Added::Topic);
        assert_eq!(trie.add("t", "g1", 2, 1).unwrap(), Added::Session);
        assert_eq!(trie.add("t", "g1", 2, 1).unwrap(), Added::Exists);
        assert_eq!(trie.add("t", "g2", 2, 1).unwrap(), Added::Group);
        // same connection id on another node is another session
        assert_eq!(trie.add("t", "g1", 1, 2).unwrap(), Added::Session);

        let stats = trie.stats();
        assert_eq!(stats, TrieStats { nodes: 1, topics: 1, groups: 2, sessions: 4 });
    }

    #[test]
    fn test_subscribe_invalid_topic() {
        let trie = SubTrie::new();
        assert!(trie.subscribe("", "g", 1, 1).unwrap_err().is_validation());
        assert!(trie.subscribe("a//b", "g", 1, 1).unwrap_err().is_validation());
        assert!(trie.is_empty());
    }

    #[test]
    fn test_wildcard_match() {
        let trie = SubTrie::new();
        trie.subscribe("a/+/c", "g1", 1, 1).unwrap();
        assert_eq!(trie.lookup("a/x/c").unwrap(), vec![s(1)]);
        assert_eq!(trie.lookup("a/y/c").unwrap(), vec![s(1)]);
        assert!(trie.lookup("a/x/d").unwrap().is_empty());
        assert!(trie.lookup("b/x/c").unwrap().is_empty());
    }

    #[test]
    fn test_wildcard_and_literal_both_match() {
        let trie = SubTrie::with_shared(Arc::new(First));
        trie.subscribe("a/+/c", "g1", 1, 1).unwrap();
        trie.subscribe("a/b/c", "g1", 2, 1).unwrap();
        trie.subscribe("+/b/c", "g1", 3, 1).unwrap();
        trie.subscribe("+/+/+", "g1", 4, 1).unwrap();
        assert_eq!(sorted(trie.lookup("a/b/c").unwrap()), vec![s(1), s(2), s(3), s(4)]);
        assert_eq!(sorted(trie.lookup("a/z/c").unwrap()), vec![s(1), s(4)]);
        assert_eq!(sorted(trie.lookup("q/b/c").unwrap()), vec![s(3), s(4)]);
    }

    #[test]
    fn test_lookup_rejects_wildcard() {
        let trie = SubTrie::new();
        trie.subscribe("a/+", "g1", 1, 1).unwrap();
        assert!(trie.lookup("a/+").unwrap_err().is_validation());
        assert!(trie.lookup("").unwrap_err().is_validation());
    }

    #[test]
    fn test_subtree_inclusive_match() {
        let trie = SubTrie::with_shared(Arc::new(First));
        trie.subscribe("a/b", "g1", 1, 1).unwrap();
        trie.subscribe("a/b/c/d", "g1", 2, 1).unwrap();
        trie.subscribe("a/x", "g1", 3, 1).unwrap();

        assert_eq!(sorted(trie.lookup("a/b").unwrap()), vec![s(1), s(2)]);
        assert_eq!(sorted(trie.lookup("a").unwrap()), vec![s(1), s(2), s(3)]);
        assert_eq!(sorted(trie.lookup("a/b/c/d").unwrap()), vec![s(1), s(2)]);
        assert_eq!(sorted(trie.lookup("a/b/c/d/e").unwrap()), vec![s(1), s(2)]);
        assert_eq!(trie.lookup("a/b/q").unwrap(), vec![s(1)]);
        assert!(trie.lookup("a/y").unwrap().is_empty());
        assert!(trie.lookup("b").unwrap().is_empty());
    }

    #[test]
    fn test_lookup_exactly_no_wildcard_expansion() {
        let trie = SubTrie::new();
        trie.subscribe("a/+", "g1", 1, 1).unwrap();
        trie.subscribe("a/b", "g1", 2, 1).unwrap();
        trie.subscribe("a/b/c", "g1", 3, 1).unwrap();

        assert_eq!(trie.lookup_exactly("a/+").unwrap(), vec![s(1)]);
        assert_eq!(trie.lookup_exactly("a/b").unwrap(), vec![s(2)]);
    }

    #[test]
    fn test_group_load_balancing() {
        let trie = SubTrie::new();
        trie.subscribe("t", "g1", 1, 1).unwrap();
        trie.subscribe("t", "g1", 2, 1).unwrap();

        let (mut n1, mut n2) = (0, 0);
        for _ in 0..1000 {
            let res = trie.lookup("t").unwrap();
            assert_eq!(res.len(), 1);
            match res[0].cid {
                1 => n1 += 1,
                2 => n2 += 1,
                _ => unreachable!(),
            }
        }
        assert!(n1 > 300 && n2 > 300, "n1: {}, n2: {}", n1, n2);
    }

    #[test]
    fn test_independent_groups_both_fire() {
        let trie = SubTrie::new();
        trie.subscribe("t", "g1", 1, 1).unwrap();
        trie.subscribe("t", "g2", 2, 1).unwrap();
        assert_eq!(sorted(trie.lookup("t").unwrap()), vec![s(1), s(2)]);
        assert_eq!(sorted(trie.lookup_exactly("t").unwrap()), vec![s(1), s(2)]);
    }

    #[test]
    fn test_same_session_in_two_groups() {
        let trie = SubTrie::new();
        trie.subscribe("t", "g1", 1, 1).unwrap();
        trie.subscribe("t", "g2", 1, 1).unwrap();
        assert_eq!(trie.lookup("t").unwrap(), vec![s(1), s(1)]);
    }

    #[test]
    fn test_unsubscribe_cascade() {
        let trie = SubTrie::new();
        trie.subscribe("a/b", "g1", 1, 1).unwrap();
        trie.subscribe("a/b", "g1", 2, 1).unwrap();
        trie.subscribe("a/b", "g2", 3, 1).unwrap();
        trie.subscribe("a/b/c", "g1", 4, 1).unwrap();

        assert_eq!(trie.remove("a/b", "g1", 1, 1).unwrap(), Removed::Session);
        assert_eq!(sorted(trie.lookup_exactly("a/b").unwrap()), vec![s(2), s(3)]);

        assert_eq!(trie.remove("a/b", "g1", 2, 1).unwrap(), Removed::Group);
        assert_eq!(trie.lookup_exactly("a/b").unwrap(), vec![s(3)]);

        assert_eq!(trie.remove("a/b", "g2", 3, 1).unwrap(), Removed::Topic);
        assert!(trie.lookup_exactly("a/b").unwrap().is_empty());
        // node a/b stays, it still has a child
        assert_eq!(trie.stats().nodes, 3);
        trie.check().unwrap();

        assert_eq!(trie.remove("a/b/c", "g1", 4, 1).unwrap(), Removed::Topic);
        assert!(trie.is_empty());
        assert!(trie.lookup_exactly("a/b/c").unwrap().is_empty());
        assert!(trie.lookup("a/b/c").unwrap().is_empty());
    }

    #[test]
    fn test_unsubscribe_prunes_only_empty_branch() {
        let trie = SubTrie::new();
        trie.subscribe("a/b/c", "g1", 1, 1).unwrap();
        trie.subscribe("a/x", "g1", 2, 1).unwrap();
        trie.unsubscribe("a/b/c", "g1", 1, 1).unwrap();
        assert_eq!(trie.stats(), TrieStats { nodes: 2, topics: 1, groups: 1, sessions: 1 });
        assert_eq!(trie.lookup("a").unwrap(), vec![s(2)]);
        trie.check().unwrap();
    }

    #[test]
    fn test_unsubscribe_not_found() {
        let trie = SubTrie::new();
        assert!(trie.unsubscribe("a/b", "g1", 1, 1).unwrap_err().is_not_found());

        trie.subscribe("a/b", "g1", 1, 1).unwrap();
        assert!(trie.unsubscribe("a/c", "g1", 1, 1).unwrap_err().is_not_found());
        assert!(trie.unsubscribe("a", "g1", 1, 1).unwrap_err().is_not_found());
        assert!(trie.unsubscribe("a/b", "g2", 1, 1).unwrap_err().is_not_found());
        assert!(trie.unsubscribe("a/b", "g1", 2, 1).unwrap_err().is_not_found());
        assert!(trie.unsubscribe("a/b", "g1", 1, 2).unwrap_err().is_not_found());
        // wildcard is removed literally, not by matching
        assert!(trie.unsubscribe("a/+", "g1", 1, 1).unwrap_err().is_not_found());
        assert!(trie.unsubscribe("a//b", "g1", 1, 1).unwrap_err().is_validation());

        assert_eq!(trie.lookup_exactly("a/b").unwrap(), vec![s(1)]);
        trie.check().unwrap();
    }

    #[test]
    fn test_unsubscribe_wildcard_literally() {
        let trie = SubTrie::new();
        trie.subscribe("a/+", "g1", 1, 1).unwrap();
        trie.subscribe("a/b", "g1", 1, 1).unwrap();
        trie.unsubscribe("a/+", "g1", 1, 1).unwrap();
        assert!(trie.lookup_exactly("a/+").unwrap().is_empty());
        assert_eq!(trie.lookup_exactly("a/b").unwrap(), vec![s(1)]);
    }

    fn build(subs: &[(&str, &str, ConnId, NodeId)]) -> SubTrie {
        let trie = SubTrie::new();
        for (topic, group, cid, addr) in subs {
            trie.subscribe(topic, group, *cid, *addr).unwrap();
        }
        trie
    }

    #[test]
    fn test_merge_union() {
        let a = build(&[("a/b", "g1", 1, 1), ("a/+", "g1", 2, 1), ("x", "g1", 3, 1)]);
        let b = build(&[("a/b", "g1", 1, 2), ("a/b", "g2", 5, 2), ("a/b/c", "g1", 6, 2), ("x", "g1", 3, 1)]);

        let merged = a.merge(b.snapshot());
        check_roots(&merged).unwrap();
        let c = canonical(&merged);
        assert_eq!(c.len(), 4);
        assert_eq!(
            c["a/b"][b"g1".as_slice()],
            BTreeSet::from([Session::new(1, 1), Session::new(1, 2)])
        );
        assert_eq!(c["a/b"][b"g2".as_slice()], BTreeSet::from([Session::new(5, 2)]));
        assert_eq!(c["x"][b"g1".as_slice()], BTreeSet::from([Session::new(3, 1)]));
        assert_eq!(canonical(&a.snapshot()), c);
        a.check().unwrap();
    }

    #[test]
    fn test_merge_commutative_and_idempotent() {
        let subs_a = [("a/b", "g1", 1, 1), ("a/+/c", "g2", 2, 1), ("q", "g1", 9, 1)];
        let subs_b = [("a/b", "g1", 7, 2), ("a/+/c", "g2", 2, 1), ("z/y", "g3", 8, 2)];

        let ab = build(&subs_a).merge(build(&subs_b).snapshot());
        let ba = build(&subs_b).merge(build(&subs_a).snapshot());
        assert_eq!(canonical(&ab), canonical(&ba));

        let a = build(&subs_a);
        let before = a.snapshot();
        let aa = a.merge(a.snapshot());
        assert_eq!(aa, before);
        assert!(a.merge_delta(before).is_none());
    }

    #[test]
    fn test_merge_delta() {
        let a = build(&[("a/b", "g1", 1, 1)]);
        let b = build(&[("a/b", "g1", 1, 1), ("a/b", "g1", 2, 2), ("a/c", "g1", 3, 2)]);

        let delta = a.merge_delta(b.snapshot()).unwrap();
        check_roots(&delta).unwrap();
        let d = canonical(&delta);
        assert_eq!(d["a/b"][b"g1".as_slice()], BTreeSet::from([Session::new(2, 2)]));
        assert_eq!(d["a/c"][b"g1".as_slice()], BTreeSet::from([Session::new(3, 2)]));
        assert!(a.merge_delta(b.snapshot()).is_none());
    }

    #[test]
    fn test_merge_normalizes_remote() {
        let mut node = Node::new(Topic::filter("t").unwrap()[0]);
        node.subs.insert(
            TopicFilter::from("t"),
            vec![
                SubGroup { name: Bytes::from_static(b"g1"), sessions: vec![s(1), s(1)] },
                SubGroup { name: Bytes::from_static(b"g1"), sessions: vec![s(2)] },
                SubGroup { name: Bytes::from_static(b"g2"), sessions: vec![] },
            ],
        );
        node.children.insert(7, Node::new(7));
        let mut remote = Roots::default();
        remote.insert(node.id, node);
        remote.insert(99, Node::new(99));

        let trie = SubTrie::new();
        trie.merge(remote);
        trie.check().unwrap();
        assert_eq!(trie.stats(), TrieStats { nodes: 1, topics: 1, groups: 1, sessions: 2 });
    }

    #[test]
    fn test_list_topics() {
        let trie = build(&[("a/b", "g1", 1, 1), ("a/c", "g1", 1, 1), ("d", "g1", 1, 1)]);
        let mut topics = trie.list_topics(10);
        topics.sort();
        assert_eq!(topics, vec!["a/b", "a/c", "d"]);
        assert_eq!(trie.list_topics(2).len(), 2);
    }

    #[test]
    fn test_concurrent_disjoint_topics() {
        let trie = Arc::new(SubTrie::new());
        trie.subscribe("stable/topic", "g", 1000, 1).unwrap();
        let remote = SubTrie::new();
        remote.subscribe("remote/x", "g", 2000, 9).unwrap();
        let remote = remote.snapshot();
        let mirror = Arc::new(SubTrie::new());

        let mut handles = (0..8u64)
            .map(|t| {
                let trie = trie.clone();
                thread::spawn(move || {
                    for i in 0..200u64 {
                        let topic = format!("w{}/n{}/leaf", t, i % 10);
                        trie.subscribe(&topic, "g", i, t).unwrap();
                        assert!(!trie.lookup(&topic).unwrap().is_empty());
                        assert_eq!(trie.lookup("stable/topic").unwrap(), vec![Session::new(1000, 1)]);
                        trie.unsubscribe(&topic, "g", i, t).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        handles.extend((0..2).map(|_| {
            let trie = trie.clone();
            let mirror = mirror.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let payload = trie.encode(8).unwrap().remove(0);
                    let roots = codec::decode(&payload, 8, DEFAULT_MAX_TOPIC_LEVELS).unwrap();
                    check_roots(&roots).unwrap();
                    mirror.merge_delta(roots);
                }
            })
        }));
        handles.push({
            let trie = trie.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    trie.merge_delta(remote.clone());
                }
            })
        });
        for h in handles {
            h.join().unwrap();
        }

        trie.check().unwrap();
        assert_eq!(trie.stats(), TrieStats { nodes: 4, topics: 2, groups: 2, sessions: 2 });
        assert_eq!(trie.lookup_exactly("stable/topic").unwrap(), vec![Session::new(1000, 1)]);
        assert_eq!(trie.lookup_exactly("remote/x").unwrap(), vec![Session::new(2000, 9)]);

        mirror.check().unwrap();
        assert_eq!(mirror.lookup_exactly("stable/topic").unwrap(), vec![Session::new(1000, 1)]);
    }

    #[test]
    fn test_topic_level_limit() {
        let trie = SubTrie::new();
        let deep = vec!["a"; 100_000].join("/");
        assert!(trie.subscribe(&deep, "g", 1, 1).unwrap_err().is_validation());
        assert!(trie.lookup(&deep).unwrap_err().is_validation());
        assert!(trie.lookup_exactly(&deep).unwrap_err().is_validation());
        assert!(trie.unsubscribe(&deep, "g", 1, 1).unwrap_err().is_validation());
        assert!(trie.is_empty());
        assert!(trie.lookup("a").unwrap().is_empty());

        let trie = SubTrie::new().with_max_levels(4);
        assert_eq!(trie.max_levels(), 4);
        trie.subscribe("a/b/c/d", "g", 1, 1).unwrap();
        assert!(trie.subscribe("a/b/c/d/e", "g", 1, 1).unwrap_err().is_validation());
        assert!(trie.lookup("a/b/c/d/e").unwrap_err().is_validation());
        assert_eq!(trie.lookup("a/b/c/d").unwrap(), vec![s(1)]);

        assert_eq!(SubTrie::new().with_max_levels(0).max_levels(), 1);
        assert_eq!(SubTrie::new().with_max_levels(usize::MAX).max_levels(), MAX_TOPIC_LEVELS_CEILING);
    }
}
