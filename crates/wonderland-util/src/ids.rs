//! Strongly-typed identifiers for wonderland

use std::fmt;

/// Identifier of a secondary channel.
///
/// Channel ids are dense: the n-th channel ever allocated has id `n - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(usize);

impl ChannelId {
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Index of this channel in the registry
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for ChannelId {
    fn from(id: usize) -> Self {
        Self(id)
    }
}
