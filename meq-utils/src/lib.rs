//! Shared primitives for the meq broker crates.
//!
//! - `NodeId` / `Addr` / [`NodeAddr`]: cluster node identity (`ID@host:port`)
//! - [`Counter`]: lock-free gauge with a high-water mark
//! - Duration parsing (`1h30m15s`, `500ms`) with serde helpers
//! - Millisecond timestamps
//!
//! ```
//! use meq_utils::{to_duration, NodeAddr};
//!
//! let node: NodeAddr = "2@10.0.0.2:7946".parse().unwrap();
//! assert_eq!(node.id, 2);
//!
//! assert_eq!(to_duration("1m30s").as_secs(), 90);
//! ```

#![deny(unsafe_code)]

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Error};
use bytestring::ByteString;
use serde::{
    de::{self, Deserializer},
    Deserialize, Serialize,
};

mod counter;

pub use counter::Counter;

/// Cluster node identifier, also the address half of a session reference
pub type NodeId = u64;

/// Network address in host:port form
pub type Addr = ByteString;

/// Timestamp representation in milliseconds since Unix epoch
pub type TimestampMillis = i64;

/// Deserialize Duration from human-readable string format
#[inline]
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    Ok(to_duration(&v))
}

/// Convert human-readable duration string to Duration
///
/// # Supported units:
/// - ms: milliseconds
/// - s: seconds
/// - m: minutes
/// - h: hours
/// - d: days
///
/// Unknown units and malformed numbers count as zero.
///
/// ```
/// assert_eq!(meq_utils::to_duration("1h30m15s").as_secs(), 5415);
/// assert_eq!(meq_utils::to_duration("250ms").as_millis(), 250);
/// ```
#[inline]
pub fn to_duration(text: &str) -> Duration {
    let text = text.to_lowercase().replace("ms", "Y");
    let ms: u64 = text
        .split_inclusive(['s', 'm', 'h', 'd', 'Y'])
        .map(|x| {
            let mut chars = x.chars();
            let u = match chars.nth_back(0) {
                None => return 0,
                Some(u) => u,
            };
            let v = match chars.as_str().trim().parse::<u64>() {
                Err(_e) => return 0,
                Ok(v) => v,
            };
            match u {
                'Y' => v,
                's' => v * 1000,
                'm' => v * 60000,
                'h' => v * 3600000,
                'd' => v * 86400000,
                _ => 0,
            }
        })
        .sum();
    Duration::from_millis(ms)
}

/// Get current timestamp in milliseconds
#[inline]
pub fn timestamp_millis() -> TimestampMillis {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_millis() as i64)
        .unwrap_or_else(|_| chrono::Local::now().timestamp_millis())
}

/// Cluster peer (ID@Address)
///
/// ```
/// use meq_utils::NodeAddr;
///
/// let node: NodeAddr = "123@meq.example.com:7946".parse().unwrap();
/// assert_eq!(node.id, 123);
/// assert_eq!(node.addr, "meq.example.com:7946");
/// ```
#[derive(Clone, Serialize, PartialEq, Eq)]
pub struct NodeAddr {
    pub id: NodeId,
    pub addr: Addr,
}

impl fmt::Debug for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:?}", self.id, self.addr)
    }
}

impl FromStr for NodeAddr {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, addr) = s.split_once('@').ok_or_else(|| anyhow!("NodeAddr format error, {}", s))?;
        if addr.is_empty() {
            return Err(anyhow!("NodeAddr format error, empty address, {}", s));
        }
        let id = NodeId::from_str(id)?;
        Ok(NodeAddr { id, addr: Addr::from(addr) })
    }
}

impl<'de> de::Deserialize<'de> for NodeAddr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        NodeAddr::from_str(&String::deserialize(deserializer)?).map_err(de::Error::custom)
    }
}
