use bytes::Bytes;

use crate::codec;
use crate::trie::{merge_roots, Roots};
use crate::types::MessageType;
use crate::Result;

/// State exchanged between cluster peers by a gossip transport.
pub trait GossipData: Sized {
    /// Serialize into one or more transport payloads
    fn encode(&self) -> Result<Vec<Bytes>>;

    /// Union of `self` and `other`, neither side is modified
    fn merge(&self, other: &Self) -> Self;
}

/// Subscription-sync message: a full or delta copy of the root registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubsSync {
    pub message_type: MessageType,
    pub roots: Roots,
}

impl SubsSync {
    #[inline]
    pub fn new(message_type: MessageType, roots: Roots) -> Self {
        Self { message_type, roots }
    }

    /// Decodes a payload, rejecting topics deeper than `max_levels`.
    #[inline]
    pub fn decode(data: &[u8], message_type: MessageType, max_levels: usize) -> Result<Self> {
        Ok(Self { message_type, roots: codec::decode(data, message_type, max_levels)? })
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl GossipData for SubsSync {
    #[inline]
    fn encode(&self) -> Result<Vec<Bytes>> {
        Ok(vec![codec::encode(&self.roots, self.message_type)?])
    }

    fn merge(&self, other: &Self) -> Self {
        let mut roots = Roots::default();
        merge_roots(&mut roots, self.roots.clone());
        merge_roots(&mut roots, other.roots.clone());
        Self { message_type: self.message_type, roots }
    }
}
