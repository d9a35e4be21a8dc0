//! Mixing session - the sync engine plus the decks it controls
//!
//! Owned by the audio side behind a mutex. The output callback calls
//! [`Session::process`] once per block; the command loop locks it to apply
//! user commands between blocks.

use crate::deck::SimDeck;
use anyhow::{bail, Context};
use lockstep_control::{Control, ControlKey, ControlRegistry, DeckId, Group, Item, Origin};
use lockstep_input::{Command, HELP};
use lockstep_sync::{SyncConfig, SyncEngine, SyncSource};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Session {
    registry: Arc<ControlRegistry>,
    engine: SyncEngine,
    decks: Vec<SimDeck>,
    /// `[Master] beat_distance`, the phase slaves chase
    master_phase: Arc<Control>,
}

impl Session {
    /// Start a session with `deck_count` stopped decks
    pub fn new(config: &SyncConfig, deck_count: u8) -> anyhow::Result<Self> {
        let registry = Arc::new(ControlRegistry::new());
        let engine = SyncEngine::new(Arc::clone(&registry), config);
        let master_phase = registry.get_or_create(ControlKey::master(Item::BeatDistance), 0.0);

        let mut session = Self {
            registry,
            engine,
            decks: Vec::new(),
            master_phase,
        };
        for _ in 0..deck_count {
            session.add_deck()?;
        }
        Ok(session)
    }

    pub fn registry(&self) -> &Arc<ControlRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Current master as a group (`[Master]` for the internal clock)
    pub fn master(&self) -> Group {
        self.engine.source().group()
    }

    /// Restore a previously saved master, if its deck exists
    pub fn restore_master(&mut self, group: Group) {
        if self.engine.set_master(group) {
            info!(master = %group, "restored master");
        }
    }

    /// Publish and register one more deck
    pub fn add_deck(&mut self) -> anyhow::Result<DeckId> {
        let next = self.decks.iter().map(|d| d.id().number()).max().unwrap_or(0);
        let Some(id) = next.checked_add(1).and_then(DeckId::new) else {
            bail!("Too many decks");
        };

        let deck = SimDeck::new(&self.registry, id);
        self.engine
            .register_deck(Group::Deck(id))
            .with_context(|| format!("Failed to register deck {}", id))?;
        self.decks.push(deck);
        debug!(deck = %Group::Deck(id), "added deck");
        Ok(id)
    }

    /// Deregister a deck and withdraw its controls
    pub fn remove_deck(&mut self, id: DeckId) -> bool {
        if !self.engine.deregister_deck(id) {
            return false;
        }
        let withdrawn = self.registry.remove_group(Group::Deck(id));
        self.decks.retain(|d| d.id() != id);
        debug!(
            deck = %Group::Deck(id),
            withdrawn,
            remaining = self.registry.control_count(),
            "removed deck"
        );
        true
    }

    /// Run one audio block of `samples` interleaved samples
    pub fn process(&mut self, samples: usize, channels: usize) {
        self.engine.process_pending();

        let frames = samples as f64 / channels.max(1) as f64;
        let sample_rate = self.engine.sample_rate();
        let master_bpm = self.engine.master_bpm();
        let master_phase = self.master_phase.get();
        for deck in &mut self.decks {
            deck.process(frames, sample_rate, master_bpm, master_phase);
        }

        self.engine.advance(samples, channels);
    }

    /// Apply a user command, returning text to show
    pub fn handle_command(&mut self, command: Command) -> anyhow::Result<Option<String>> {
        match command {
            Command::SetMaster(group) => {
                match group {
                    Group::Master => self.write(ControlKey::master(Item::SyncMaster), 1.0)?,
                    Group::Deck(id) => self.write_deck(id, Item::SyncMaster, 1.0)?,
                }
                // Flag writes land on the next block; settle now for status
                self.engine.process_pending();
                Ok(Some(format!("master: {}", self.engine.source())))
            }
            Command::Unmaster(id) => {
                self.write_deck(id, Item::SyncMaster, 0.0)?;
                self.engine.process_pending();
                Ok(Some(format!("master: {}", self.engine.source())))
            }
            Command::SetSlave(id, on) => {
                self.write_deck(id, Item::SyncSlave, flag(on))?;
                Ok(None)
            }
            Command::SetRate(id, rate) => {
                self.write_deck(id, Item::TrueRate, rate)?;
                Ok(None)
            }
            Command::SetFileBpm(id, bpm) => {
                self.write_deck(id, Item::FileBpm, bpm)?;
                Ok(None)
            }
            Command::SetActive(id, on) => {
                self.write_deck(id, Item::Active, flag(on))?;
                Ok(None)
            }
            Command::SetPhase(id, phase) => {
                let sample_rate = self.engine.sample_rate();
                let Some(deck) = self.decks.iter_mut().find(|d| d.id() == id) else {
                    bail!("No such deck: {}", id);
                };
                deck.jump_to_phase(phase, sample_rate);
                Ok(None)
            }
            Command::SetTempo(bpm) => {
                self.write(ControlKey::master(Item::SyncBpm), bpm)?;
                self.engine.process_pending();
                if self.engine.source().is_internal() {
                    Ok(None)
                } else {
                    Ok(Some(format!(
                        "tempo follows {} ({:.2} BPM)",
                        self.engine.source(),
                        self.engine.master_bpm()
                    )))
                }
            }
            Command::SetSampleRate(rate) => {
                self.write(ControlKey::master(Item::SampleRate), rate as f64)?;
                Ok(None)
            }
            Command::AddDeck => {
                let id = self.add_deck()?;
                Ok(Some(format!("added deck {}", id)))
            }
            Command::RemoveDeck(id) => {
                if !self.remove_deck(id) {
                    bail!("No such deck: {}", id);
                }
                Ok(Some(format!("removed deck {}", id)))
            }
            Command::Status => Ok(Some(self.status())),
            Command::Help => Ok(Some(HELP.to_string())),
            Command::Quit => Ok(None),
        }
    }

    /// Human-readable summary of the sync state
    pub fn status(&self) -> String {
        let engine = &self.engine;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "master {}  {:.2} BPM  phase {:.3}  {} Hz  {:.1} frames/beat",
            engine.source(),
            engine.master_bpm(),
            self.master_phase.get(),
            engine.sample_rate(),
            engine.samples_per_beat(),
        );

        for deck in &self.decks {
            let handle = deck.handle();
            let role = if engine.source() == SyncSource::Deck(deck.id()) {
                "MASTER"
            } else if handle.is_slave() {
                "slave"
            } else {
                "-"
            };
            let _ = writeln!(
                out,
                "  deck {}  {:<6}  {:>7.2} BPM  rate {:>6.3}  phase {:.3}{}",
                deck.id(),
                role,
                handle.file_bpm(),
                handle.true_rate(),
                handle.beat_distance(),
                if handle.is_active() { "" } else { "  (off)" },
            );
        }
        out.trim_end().to_string()
    }

    fn write(&self, key: ControlKey, value: f64) -> anyhow::Result<()> {
        self.registry.set(key, value, Origin::Control)?;
        Ok(())
    }

    fn write_deck(&self, id: DeckId, item: Item, value: f64) -> anyhow::Result<()> {
        if !self.engine.is_registered(id) {
            bail!("No such deck: {}", id);
        }
        self.write(ControlKey::new(Group::Deck(id), item), value)
    }
}

fn flag(on: bool) -> f64 {
    if on {
        1.0
    } else {
        0.0
    }
}
