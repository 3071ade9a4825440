//! Cluster subscription sync.
//!
//! Every node periodically broadcasts its complete subscription state and
//! unions whatever its peers broadcast. The network layer is not part of this
//! crate; it plugs in through [`GossipTransport`] and feeds received payloads
//! to [`SubsGossiper`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::router::{DefaultRouter, Router};
use crate::types::{MessageType, NodeId, TimestampMillis};
use crate::utils::timestamp_millis;
use crate::{MeqError, Result};

mod message;

pub use message::{GossipData, SubsSync};

#[async_trait]
pub trait GossipTransport: Sync + Send + 'static {
    /// Send `payload` to every peer
    async fn broadcast(&self, payload: Vec<Bytes>) -> Result<()>;
}

pub struct SubsGossiper {
    node_id: NodeId,
    message_type: MessageType,
    router: DefaultRouter,
    last_merged: AtomicI64,
}

impl SubsGossiper {
    #[inline]
    pub fn new(node_id: NodeId, message_type: MessageType, router: DefaultRouter) -> Self {
        Self { node_id, message_type, router, last_merged: AtomicI64::new(0) }
    }

    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    #[inline]
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    #[inline]
    pub fn router(&self) -> &DefaultRouter {
        &self.router
    }

    /// Time of the last merge that changed local state, 0 if none yet.
    #[inline]
    pub fn last_merged(&self) -> TimestampMillis {
        self.last_merged.load(Ordering::SeqCst)
    }

    /// Complete local state.
    #[inline]
    pub fn gossip(&self) -> SubsSync {
        SubsSync::new(self.message_type, self.router.trie().snapshot())
    }

    /// Merges a received payload, returning what was new to this node.
    pub async fn on_gossip(&self, buf: &[u8]) -> Result<Option<SubsSync>> {
        let max_levels = self.router.trie().max_levels();
        let remote = SubsSync::decode(buf, self.message_type, max_levels).inspect_err(|e| {
            log::warn!("{} rejected subscription sync payload, {}", self.node_id, e);
        })?;
        let delta = self.router.merge(remote.roots).await;
        if delta.is_some() {
            self.last_merged.store(timestamp_millis(), Ordering::SeqCst);
        }
        Ok(delta.map(|roots| SubsSync::new(self.message_type, roots)))
    }

    #[inline]
    pub async fn on_gossip_broadcast(&self, src: NodeId, buf: &[u8]) -> Result<Option<SubsSync>> {
        log::debug!("{} subscription sync from {}, {} bytes", self.node_id, src, buf.len());
        self.on_gossip(buf).await
    }

    #[inline]
    pub async fn on_gossip_unicast(&self, src: NodeId, _buf: &[u8]) -> Result<()> {
        Err(MeqError::Msg(format!("unexpected unicast subscription sync from {}", src)))
    }

    /// Starts broadcasting the complete state every `interval`, which must be nonzero.
    pub fn spawn_sync<T: GossipTransport>(
        self: Arc<Self>,
        transport: Arc<T>,
        interval: Duration,
    ) -> Result<JoinHandle<()>> {
        if interval.is_zero() {
            return Err(MeqError::Msg(format!("{} subscription sync interval must be nonzero", self.node_id)));
        }
        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match self.gossip().encode() {
                    Ok(payload) => {
                        if let Err(e) = transport.broadcast(payload).await {
                            log::warn!("{} subscription sync broadcast failed, {}", self.node_id, e);
                        }
                    }
                    Err(e) => log::error!("{} subscription sync encode failed, {}", self.node_id, e),
                }
            }
        }))
    }
}
