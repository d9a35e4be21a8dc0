//! Control addressing - groups, items and keys

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Deck identifier (1-based, as shown to the user)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeckId(u8);

impl DeckId {
    /// Create a deck id, rejecting 0
    pub fn new(number: u8) -> Option<Self> {
        (number > 0).then_some(Self(number))
    }

    /// The 1-based deck number
    pub fn number(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Namespace a control lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Group {
    /// Session-wide controls, also the id of the internal clock
    Master,
    /// Per-deck controls
    Deck(DeckId),
}

impl Group {
    /// Convenience constructor for a deck group
    pub fn deck(number: u8) -> Option<Self> {
        DeckId::new(number).map(Group::Deck)
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Group::Master => write!(f, "[Master]"),
            Group::Deck(id) => write!(f, "[Channel{}]", id),
        }
    }
}

/// Error parsing a group name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid group name: {0:?}")]
pub struct ParseGroupError(pub String);

impl FromStr for Group {
    type Err = ParseGroupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if name == "[Master]" {
            return Ok(Group::Master);
        }

        name.strip_prefix("[Channel")
            .and_then(|rest| rest.strip_suffix(']'))
            .and_then(|number| number.parse::<u8>().ok())
            .and_then(Group::deck)
            .ok_or_else(|| ParseGroupError(s.to_string()))
    }
}

/// Individual control within a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Item {
    /// Master tempo in BPM (`[Master]` only)
    SyncBpm,
    /// Phase within the current beat, 0.0 - 1.0
    BeatDistance,
    /// On `[Master]`: internal clock is master. On a deck: deck is master.
    SyncMaster,
    /// Deck follows the master tempo/phase
    SyncSlave,
    /// Output sample rate in Hz (`[Master]` only)
    SampleRate,
    /// Signed playback rate (1.0 = original speed, negative = reverse)
    TrueRate,
    /// Tempo of the loaded file in BPM (0.0 = unknown)
    FileBpm,
    /// Deck is active and routed to the master mix
    Active,
}

impl Item {
    /// Name used in logs and config files
    pub fn name(&self) -> &'static str {
        match self {
            Item::SyncBpm => "sync_bpm",
            Item::BeatDistance => "beat_distance",
            Item::SyncMaster => "sync_master",
            Item::SyncSlave => "sync_slave",
            Item::SampleRate => "samplerate",
            Item::TrueRate => "true_rate",
            Item::FileBpm => "file_bpm",
            Item::Active => "active",
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fully qualified control address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlKey {
    pub group: Group,
    pub item: Item,
}

impl ControlKey {
    pub const fn new(group: Group, item: Item) -> Self {
        Self { group, item }
    }

    pub const fn master(item: Item) -> Self {
        Self::new(Group::Master, item)
    }
}

impl fmt::Display for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.group, self.item)
    }
}
