//! Topic parsing.
//!
//! A topic such as `sport/+/player1` is split on `/` and every segment is
//! reduced to a 32-bit MurmurHash3 identifier. Distinct segments that
//! collide share a trie edge.

use std::fmt;
use std::ops;

use serde::{Deserialize, Serialize};

use crate::types::TopicFilter;

/// Identifier of one topic segment.
pub type SegmentId = u32;

pub const SEPARATOR: u8 = b'/';

/// Single-level wildcard, only meaningful as a whole segment.
pub const WILDCARD: u8 = b'+';

/// Segment id of [`WILDCARD`].
pub const WILDCARD_ID: SegmentId = murmur3_32(&[WILDCARD], 0);

/// Level limit applied by [`Topic::filter`] and [`Topic::name`].
pub const DEFAULT_MAX_TOPIC_LEVELS: usize = 128;

/// Upper bound for a configured level limit. Trie walks recurse once per level.
pub const MAX_TOPIC_LEVELS_CEILING: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("empty topic")]
    Empty,
    #[error("empty segment at level {0}")]
    EmptySegment(usize),
    #[error("topic is not valid utf-8")]
    InvalidUtf8,
    #[error("wildcard not allowed in topic name, level {0}")]
    WildcardNotAllowed(usize),
    #[error("topic has {0} levels, limit is {1}")]
    TooManyLevels(usize, usize),
}

/// MurmurHash3, x86 32-bit variant.
pub const fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let len = data.len();
    let mut h = seed;
    let mut i = 0;
    while i + 4 <= len {
        let mut k = u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);

        h ^= k;
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
        i += 4;
    }

    let rem = len - i;
    if rem > 0 {
        let mut k: u32 = 0;
        if rem >= 3 {
            k ^= (data[i + 2] as u32) << 16;
        }
        if rem >= 2 {
            k ^= (data[i + 1] as u32) << 8;
        }
        k ^= data[i] as u32;
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        h ^= k;
    }

    h ^= len as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

#[inline]
pub fn segment_id(segment: &[u8]) -> SegmentId {
    murmur3_32(segment, 0)
}

/// A parsed topic: the original text plus one id per segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    name: TopicFilter,
    segments: Vec<SegmentId>,
}

impl Topic {
    /// Parses `topic`. With `strict` set (subscriptions, exact lookups) wildcard
    /// segments are accepted; otherwise (publish) they are rejected.
    pub fn parse<T: AsRef<[u8]>>(topic: T, strict: bool) -> Result<Topic, TopicError> {
        Self::parse_limited(topic, strict, DEFAULT_MAX_TOPIC_LEVELS)
    }

    /// Same as [`Topic::parse`], rejecting topics deeper than `max_levels`.
    pub fn parse_limited<T: AsRef<[u8]>>(topic: T, strict: bool, max_levels: usize) -> Result<Topic, TopicError> {
        let raw = topic.as_ref();
        if raw.is_empty() {
            return Err(TopicError::Empty);
        }
        let levels = raw.iter().filter(|b| **b == SEPARATOR).count() + 1;
        if levels > max_levels {
            return Err(TopicError::TooManyLevels(levels, max_levels));
        }
        let name = std::str::from_utf8(raw).map_err(|_| TopicError::InvalidUtf8)?;

        let segments = raw
            .split(|b| *b == SEPARATOR)
            .enumerate()
            .map(|(level, seg)| match seg {
                [] => Err(TopicError::EmptySegment(level)),
                [WILDCARD] if !strict => Err(TopicError::WildcardNotAllowed(level)),
                [WILDCARD] => Ok(WILDCARD_ID),
                _ => Ok(segment_id(seg)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Topic { name: TopicFilter::from(name), segments })
    }

    /// Subscription pattern, wildcards allowed.
    #[inline]
    pub fn filter<T: AsRef<[u8]>>(topic: T) -> Result<Topic, TopicError> {
        Self::parse(topic, true)
    }

    /// Published topic name, wildcards rejected.
    #[inline]
    pub fn name<T: AsRef<[u8]>>(topic: T) -> Result<Topic, TopicError> {
        Self::parse(topic, false)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn topic_filter(&self) -> &TopicFilter {
        &self.name
    }

    #[inline]
    pub fn segments(&self) -> &[SegmentId] {
        &self.segments
    }

    #[inline]
    pub fn has_wildcard(&self) -> bool {
        self.segments.contains(&WILDCARD_ID)
    }
}

impl ops::Deref for Topic {
    type Target = [SegmentId];

    fn deref(&self) -> &Self::Target {
        &self.segments
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
