//! Typed view of one deck's controls

use crate::control::Control;
use crate::key::{ControlKey, DeckId, Group, Item};
use crate::registry::{ControlError, ControlRegistry};
use std::sync::Arc;

/// Handles to the controls a deck publishes, resolved once by key
#[derive(Debug, Clone)]
pub struct DeckHandle {
    id: DeckId,
    pub sync_master: Arc<Control>,
    pub sync_slave: Arc<Control>,
    pub true_rate: Arc<Control>,
    pub beat_distance: Arc<Control>,
    pub file_bpm: Arc<Control>,
    pub active: Arc<Control>,
}

impl DeckHandle {
    /// Items every deck must publish
    pub const ITEMS: [Item; 6] = [
        Item::SyncMaster,
        Item::SyncSlave,
        Item::TrueRate,
        Item::BeatDistance,
        Item::FileBpm,
        Item::Active,
    ];

    /// Create (or reuse) the controls for a deck
    ///
    /// New controls start stopped: not master, not slave, rate 0, no tempo.
    pub fn create(registry: &ControlRegistry, id: DeckId) -> Self {
        let group = Group::Deck(id);
        let make = |item| registry.get_or_create(ControlKey::new(group, item), 0.0);
        Self {
            id,
            sync_master: make(Item::SyncMaster),
            sync_slave: make(Item::SyncSlave),
            true_rate: make(Item::TrueRate),
            beat_distance: make(Item::BeatDistance),
            file_bpm: make(Item::FileBpm),
            active: make(Item::Active),
        }
    }

    /// Look up the controls of an existing deck
    pub fn resolve(registry: &ControlRegistry, id: DeckId) -> Result<Self, ControlError> {
        let group = Group::Deck(id);
        let find = |item| registry.require(ControlKey::new(group, item));
        Ok(Self {
            id,
            sync_master: find(Item::SyncMaster)?,
            sync_slave: find(Item::SyncSlave)?,
            true_rate: find(Item::TrueRate)?,
            beat_distance: find(Item::BeatDistance)?,
            file_bpm: find(Item::FileBpm)?,
            active: find(Item::Active)?,
        })
    }

    pub fn id(&self) -> DeckId {
        self.id
    }

    pub fn group(&self) -> Group {
        Group::Deck(self.id)
    }

    pub fn is_master(&self) -> bool {
        self.sync_master.is_on()
    }

    pub fn is_slave(&self) -> bool {
        self.sync_slave.is_on()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_on()
    }

    pub fn true_rate(&self) -> f64 {
        self.true_rate.get()
    }

    pub fn beat_distance(&self) -> f64 {
        self.beat_distance.get()
    }

    pub fn file_bpm(&self) -> f64 {
        self.file_bpm.get()
    }

    /// Deck is moving in either direction
    pub fn is_playing(&self) -> bool {
        self.true_rate().abs() > 0.0
    }

    /// Whether all of this deck's controls are still present in `registry`
    pub fn is_published_in(&self, registry: &ControlRegistry) -> bool {
        Self::ITEMS
            .iter()
            .all(|&item| registry.contains(ControlKey::new(self.group(), item)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Origin;

    #[test]
    fn test_resolve_after_create() {
        let registry = ControlRegistry::new();
        let id = DeckId::new(1).unwrap();
        let created = DeckHandle::create(&registry, id);
        created.file_bpm.set(128.0, Origin::Control);

        let resolved = DeckHandle::resolve(&registry, id).unwrap();
        assert_eq!(resolved.file_bpm(), 128.0);
        assert!(Arc::ptr_eq(&created.true_rate, &resolved.true_rate));
    }

    #[test]
    fn test_resolve_missing_control() {
        let registry = ControlRegistry::new();
        let id = DeckId::new(2).unwrap();
        registry.get_or_create(ControlKey::new(Group::Deck(id), Item::SyncMaster), 0.0);

        let err = DeckHandle::resolve(&registry, id).unwrap_err();
        assert_eq!(
            err,
            ControlError::Missing(ControlKey::new(Group::Deck(id), Item::SyncSlave))
        );
    }

    #[test]
    fn test_published_tracks_registry() {
        let registry = ControlRegistry::new();
        let id = DeckId::new(3).unwrap();
        let handle = DeckHandle::create(&registry, id);
        assert!(handle.is_published_in(&registry));

        registry.remove_group(Group::Deck(id));
        assert!(!handle.is_published_in(&registry));
    }

    #[test]
    fn test_is_playing_either_direction() {
        let registry = ControlRegistry::new();
        let handle = DeckHandle::create(&registry, DeckId::new(1).unwrap());
        assert!(!handle.is_playing());
        handle.true_rate.set(-1.0, Origin::Engine);
        assert!(handle.is_playing());
    }
}
