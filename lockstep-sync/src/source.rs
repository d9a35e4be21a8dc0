//! Tempo/phase reference selection

use lockstep_control::{DeckId, Group};
use std::fmt;

/// Who the tempo/phase reference is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncSource {
    /// The engine's virtual beat clock
    #[default]
    Internal,
    /// A specific deck
    Deck(DeckId),
}

impl SyncSource {
    pub fn is_internal(&self) -> bool {
        matches!(self, SyncSource::Internal)
    }

    pub fn deck(&self) -> Option<DeckId> {
        match self {
            SyncSource::Internal => None,
            SyncSource::Deck(id) => Some(*id),
        }
    }

    /// Control group of the source; `[Master]` stands for the internal clock
    pub fn group(&self) -> Group {
        match self {
            SyncSource::Internal => Group::Master,
            SyncSource::Deck(id) => Group::Deck(*id),
        }
    }
}

impl From<Group> for SyncSource {
    fn from(group: Group) -> Self {
        match group {
            Group::Master => SyncSource::Internal,
            Group::Deck(id) => SyncSource::Deck(id),
        }
    }
}

impl From<Option<Group>> for SyncSource {
    fn from(group: Option<Group>) -> Self {
        group.map(SyncSource::from).unwrap_or_default()
    }
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncSource::Internal => write!(f, "Internal"),
            SyncSource::Deck(id) => write!(f, "{}", Group::Deck(*id)),
        }
    }
}
