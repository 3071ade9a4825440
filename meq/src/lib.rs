//! Subscription routing core of the meq broker.
//!
//! Topics are `/`-separated strings; each segment is hashed to a 32-bit id and
//! `+` matches exactly one segment. Subscriptions live in a [`SubTrie`] keyed by
//! those ids. Sessions subscribing under the same group name share a
//! subscription: each publish reaches one of them, chosen by a
//! [`SharedSubscription`] strategy.
//!
//! ```
//! use meq::{Session, SubTrie};
//!
//! let trie = SubTrie::new();
//! trie.subscribe("sensors/+/temp", "dashboards", 1, 1).unwrap();
//! trie.subscribe("sensors/kitchen/temp", "alerts", 7, 2).unwrap();
//!
//! let mut sessions = trie.lookup("sensors/kitchen/temp").unwrap();
//! sessions.sort();
//! assert_eq!(sessions, vec![Session::new(1, 1), Session::new(7, 2)]);
//! ```
//!
//! Cluster nodes keep their tries in sync by broadcasting full snapshots
//! (see [`codec`] and [`cluster`]); a merge is a set union.

#![deny(unsafe_code)]

pub use meq_conf as conf;
pub use meq_utils as utils;

pub mod cluster;
pub mod codec;
pub mod context;
pub mod error;
pub mod logger;
pub mod router;
pub mod shared;
pub mod topic;
pub mod trie;
pub mod types;

pub use error::{MeqError, Result};
pub use shared::{DefaultSharedSubscription, SharedSubscription};
pub use topic::{Topic, TopicError};
pub use trie::{Roots, SubTrie};
pub use types::{Added, Removed, Session, SubGroup};
