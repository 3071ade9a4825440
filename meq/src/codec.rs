//! Subscription-sync wire format.
//!
//! ```text
//! +----------------+------+-----------------------------------------+
//! | body len (u32) | type | bincode(Vec<(topic, Vec<SubGroup>)>)    |
//! |   big endian   |  u8  |                                         |
//! +----------------+------+-----------------------------------------+
//! ```
//!
//! The body is a flat list of topic entries; the receiver rebuilds the trie
//! paths from the topics, so decoding never recurses per level.

use std::collections::hash_map::Entry;

use bincode::Options;
use bytes::{BufMut, Bytes, BytesMut};

use crate::topic::Topic;
use crate::trie::{check_groups, Node, Roots};
use crate::types::{MessageType, SubGroup, TopicFilter};
use crate::{MeqError, Result};

pub const HEADER_LEN: usize = 5;

const MAX_BODY_LEN: u64 = u32::MAX as u64;

#[inline]
fn options() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding().with_limit(MAX_BODY_LEN)
}

fn entries(roots: &Roots) -> Vec<(&TopicFilter, &Vec<SubGroup>)> {
    let mut out = Vec::new();
    let mut stack = roots.values().collect::<Vec<&Node>>();
    while let Some(node) = stack.pop() {
        out.extend(node.subs.iter());
        stack.extend(node.children.values());
    }
    out
}

pub fn encode(roots: &Roots, message_type: MessageType) -> Result<Bytes> {
    let body = options().serialize(&entries(roots)).map_err(|e| MeqError::Encode(e.to_string()))?;
    let len = u32::try_from(body.len())
        .map_err(|_| MeqError::Encode(format!("snapshot too large, {} bytes", body.len())))?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u32(len);
    buf.put_u8(message_type);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Decodes a payload produced by [`encode`]. Anything malformed, or any topic
/// deeper than `max_levels`, rejects the payload as a whole.
pub fn decode(data: &[u8], message_type: MessageType, max_levels: usize) -> Result<Roots> {
    if data.len() < HEADER_LEN {
        return Err(MeqError::Decode(format!("payload too short, {} bytes", data.len())));
    }
    let (header, body) = data.split_at(HEADER_LEN);
    if header[4] != message_type {
        return Err(MeqError::Decode(format!(
            "unexpected message type {}, expected {}",
            header[4], message_type
        )));
    }
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if len != body.len() {
        return Err(MeqError::Decode(format!("body length {} does not match header {}", body.len(), len)));
    }

    let entries: Vec<(TopicFilter, Vec<SubGroup>)> =
        options().deserialize(body).map_err(|e| MeqError::Decode(e.to_string()))?;
    build(entries, max_levels).map_err(MeqError::Decode)
}

fn build(entries: Vec<(TopicFilter, Vec<SubGroup>)>, max_levels: usize) -> std::result::Result<Roots, String> {
    let mut roots = Roots::default();
    for (topic, groups) in entries {
        check_groups(&topic, &groups)?;
        let parsed = Topic::parse_limited(topic.as_bytes(), true, max_levels)
            .map_err(|e| format!("topic `{}`: {}", topic, e))?;
        let Some((first, rest)) = parsed.segments().split_first() else {
            return Err(format!("topic `{}` has no segments", topic));
        };

        let mut node = roots.entry(*first).or_insert_with(|| Node::new(*first));
        for id in rest {
            node = node.children.entry(*id).or_insert_with(|| Node::new(*id));
        }
        match node.subs.entry(topic) {
            Entry::Occupied(e) => return Err(format!("topic `{}` listed twice", e.key())),
            Entry::Vacant(e) => {
                e.insert(groups);
            }
        }
    }
    Ok(roots)
}
