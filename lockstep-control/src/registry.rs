//! Registry of named controls, shared by everything in a session

use crate::control::{Control, Origin};
use crate::key::{ControlKey, Group};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur when looking up controls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Control not found: {0}")]
    Missing(ControlKey),
}

/// Session-wide map of controls
///
/// Passed around as `Arc<ControlRegistry>`; there is no global instance.
#[derive(Default)]
pub struct ControlRegistry {
    controls: RwLock<HashMap<ControlKey, Arc<Control>>>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the control for `key`, creating it with `initial` if absent
    ///
    /// An existing control keeps its current value.
    pub fn get_or_create(&self, key: ControlKey, initial: f64) -> Arc<Control> {
        if let Some(control) = self.controls.read().get(&key) {
            return Arc::clone(control);
        }
        let mut controls = self.controls.write();
        Arc::clone(
            controls
                .entry(key)
                .or_insert_with(|| Arc::new(Control::new(key, initial))),
        )
    }

    pub fn get(&self, key: ControlKey) -> Option<Arc<Control>> {
        self.controls.read().get(&key).cloned()
    }

    /// Like [`get`](Self::get) but reports a missing control as an error
    pub fn require(&self, key: ControlKey) -> Result<Arc<Control>, ControlError> {
        self.get(key).ok_or(ControlError::Missing(key))
    }

    pub fn contains(&self, key: ControlKey) -> bool {
        self.controls.read().contains_key(&key)
    }

    /// Current value of a control, if it exists
    pub fn value(&self, key: ControlKey) -> Option<f64> {
        self.controls.read().get(&key).map(|c| c.get())
    }

    /// Write an existing control
    pub fn set(&self, key: ControlKey, value: f64, origin: Origin) -> Result<bool, ControlError> {
        Ok(self.require(key)?.set(value, origin))
    }

    /// Remove every control of a group, returning how many were removed
    ///
    /// Holders of the removed `Arc<Control>`s keep working, but lookups by
    /// key no longer find them.
    pub fn remove_group(&self, group: Group) -> usize {
        let mut controls = self.controls.write();
        let before = controls.len();
        controls.retain(|key, _| key.group != group);
        before - controls.len()
    }

    /// Number of published controls
    pub fn control_count(&self) -> usize {
        self.controls.read().len()
    }
}
