use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::cluster::{GossipTransport, SubsGossiper};
use crate::conf::Settings;
use crate::router::DefaultRouter;
use crate::trie::SubTrie;
use crate::types::NodeId;
use crate::Result;

#[derive(Clone)]
pub struct ServerContext {
    inner: Arc<ServerContextInner>,
}

pub struct ServerContextInner {
    pub settings: Settings,
    pub node_id: NodeId,
    pub trie: Arc<SubTrie>,
    pub router: DefaultRouter,
    pub gossiper: Arc<SubsGossiper>,
}

impl Deref for ServerContext {
    type Target = ServerContextInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl ServerContext {
    pub fn new(settings: Settings) -> Self {
        let node_id = settings.node.id;
        let trie = Arc::new(SubTrie::new().with_max_levels(settings.node.max_topic_levels));
        let router = DefaultRouter::new(trie.clone());
        let gossiper = Arc::new(SubsGossiper::new(node_id, settings.cluster.message_type, router.clone()));
        ServerContext { inner: Arc::new(ServerContextInner { settings, node_id, trie, router, gossiper }) }
    }

    /// Starts the periodic subscription sync over `transport`.
    pub fn start_sync<T: GossipTransport>(&self, transport: Arc<T>) -> Result<JoinHandle<()>> {
        log::info!(
            "{} starting subscription sync, interval: {:?}, peers: {}",
            self.node_id,
            self.settings.cluster.sync_interval,
            self.settings.cluster.peers.len()
        );
        self.gossiper.clone().spawn_sync(transport, self.settings.cluster.sync_interval)
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerContext node_id: {}, {:?}", self.node_id, self.trie.stats())
    }
}
