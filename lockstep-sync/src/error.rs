//! Errors reported by setup-time sync operations

use lockstep_control::{ControlError, Group};
use thiserror::Error;

/// Errors that can occur when wiring decks into the sync engine
///
/// Role transitions never return these; they fall back to the internal
/// clock instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Control error: {0}")]
    Control(#[from] ControlError),
    #[error("{0} is not a deck")]
    NotADeck(Group),
}
