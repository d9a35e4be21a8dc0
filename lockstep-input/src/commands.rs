//! Command definitions for lockstep

use lockstep_control::{DeckId, Group};

/// Commands that can be dispatched from input
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // Sync roles
    /// Make a deck (or `[Master]`, the internal clock) the reference
    SetMaster(Group),
    /// Drop a deck's master flag
    Unmaster(DeckId),
    SetSlave(DeckId, bool),

    // Deck state
    /// Playback rate multiplier (1.0 = normal speed, negative = reverse)
    SetRate(DeckId, f64),
    /// Native tempo of the loaded track
    SetFileBpm(DeckId, f64),
    /// In the master mix
    SetActive(DeckId, bool),
    /// Jump to a phase within the beat (0.0 - 1.0)
    SetPhase(DeckId, f64),

    // Session
    /// Internal clock tempo
    SetTempo(f64),
    SetSampleRate(u32),
    AddDeck,
    RemoveDeck(DeckId),

    // Application
    Status,
    Help,
    Quit,
}

impl Command {
    /// Whether this command ends the session
    pub fn is_quit(&self) -> bool {
        matches!(self, Command::Quit)
    }
}

/// Command reference shown by `help`
pub const HELP: &str = "\
master <n|internal>   make deck n (or the internal clock) the master
unmaster <n>          drop deck n's master flag
slave <n> on|off      follow the master tempo
rate <n> <x>          set deck n's playback rate (1.0 = normal)
bpm <n> <x>           set deck n's track tempo
active <n> on|off     put deck n in or out of the mix
phase <n> <x>         jump deck n to beat phase x (0.0 - 1.0)
tempo <x>             set the internal clock tempo
samplerate <hz>       change the output sample rate
add                   add a deck
remove <n>            remove deck n
status                show the sync state
help                  show this help
quit                  exit";
