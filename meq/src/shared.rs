use rand::Rng;

use crate::types::Session;

/// Picks the one member of a shared group that receives a matching publish.
///
/// Called with the trie's read lock held, so implementations must not block.
pub trait SharedSubscription: Sync + Send {
    ///Select a subscriber, default is "random"
    #[inline]
    fn choice(&self, sessions: &[Session]) -> Option<usize> {
        match sessions.len() {
            0 => None,
            1 => Some(0),
            n => Some(rand::rng().random_range(0..n)),
        }
    }
}

pub struct DefaultSharedSubscription;

impl SharedSubscription for DefaultSharedSubscription {}
