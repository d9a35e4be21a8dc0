//! Observable control registry for lockstep
//!
//! Controls are named, thread-visible `f64` cells addressed by a
//! `(group, item)` key. Writes are atomic and never call back into the
//! writer; change notifications are posted as [`ControlEvent`]s into the
//! inboxes of whoever subscribed.

mod control;
mod deck;
mod key;
mod registry;

pub use control::{Control, ControlEvent, Origin, Subscription};
pub use deck::DeckHandle;
pub use key::{ControlKey, DeckId, Group, Item, ParseGroupError};
pub use registry::{ControlError, ControlRegistry};
