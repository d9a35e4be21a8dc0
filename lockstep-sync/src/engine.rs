//! Sync engine - decides the tempo/phase reference and propagates it
//!
//! The engine is a plain single-owner state machine. Controls it cares about
//! post their changes into its inbox; nothing calls into the engine on the
//! writer's stack. All state changes happen in `&mut self` methods, so
//! whoever owns the engine (usually the audio thread) serializes every role
//! transition, and a second "become master" request is always handled after
//! the first one's un-mastering writes.
//!
//! Writes the engine makes itself are tagged `Origin::Sync` and dropped
//! when they come back through the inbox, so a cascade never re-triggers
//! itself.

use crate::clock::VirtualClock;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::source::SyncSource;
use crossbeam_channel::{bounded, Receiver, Sender};
use lockstep_control::{
    Control, ControlEvent, ControlKey, ControlRegistry, DeckHandle, DeckId, Group, Item, Origin,
    Subscription,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inbox size; a burst larger than this drops events (and logs a warning)
const INBOX_CAPACITY: usize = 1024;

/// A deck taking part in sync, with its role flags subscribed
struct RegisteredDeck {
    handle: DeckHandle,
    _subscriptions: [Subscription; 2],
}

/// The current reference deck, with its rate and beat distance subscribed
struct Reference {
    handle: DeckHandle,
    _subscriptions: [Subscription; 2],
}

/// Master sync controller for one mixing session
pub struct SyncEngine {
    registry: Arc<ControlRegistry>,
    /// `[Master] sync_bpm` - tempo every slave converges to
    master_bpm: Arc<Control>,
    /// `[Master] beat_distance` - phase of the reference
    master_beat_distance: Arc<Control>,
    /// `[Master] sync_master` - internal clock is the reference
    internal_master: Arc<Control>,
    clock: VirtualClock,
    source: SyncSource,
    /// Registration order is the fallback tie-break order
    decks: Vec<RegisteredDeck>,
    /// Present iff `source` is a deck
    reference: Option<Reference>,
    /// Last rate seen from the reference deck
    source_rate: f64,
    inbox_tx: Sender<ControlEvent>,
    inbox: Receiver<ControlEvent>,
    _master_subscriptions: [Subscription; 3],
}

impl SyncEngine {
    /// Create the engine on the internal clock
    ///
    /// Publishes the `[Master]` controls into `registry` (reusing any that
    /// exist) and resets the master tempo to `config.default_bpm`.
    pub fn new(registry: Arc<ControlRegistry>, config: &SyncConfig) -> Self {
        let master_bpm =
            registry.get_or_create(ControlKey::master(Item::SyncBpm), config.default_bpm);
        let master_beat_distance =
            registry.get_or_create(ControlKey::master(Item::BeatDistance), 0.0);
        let internal_master = registry.get_or_create(ControlKey::master(Item::SyncMaster), 0.0);
        let sample_rate = registry.get_or_create(ControlKey::master(Item::SampleRate), 0.0);

        let upstream_rate = sample_rate.get();
        let rate = if upstream_rate >= 1.0 && upstream_rate.is_finite() {
            upstream_rate as u32
        } else {
            config.fallback_sample_rate
        };
        let clock = VirtualClock::new(config.default_bpm, rate)
            .with_max_wrap_iterations(config.max_wrap_iterations);

        let (inbox_tx, inbox) = bounded(INBOX_CAPACITY);
        let master_subscriptions = [
            master_bpm.subscribe(inbox_tx.clone()),
            internal_master.subscribe(inbox_tx.clone()),
            sample_rate.subscribe(inbox_tx.clone()),
        ];

        master_bpm.set(config.default_bpm, Origin::Sync);
        master_beat_distance.set(0.0, Origin::Sync);
        internal_master.set_on(true, Origin::Sync);
        info!(
            bpm = config.default_bpm,
            sample_rate = clock.sample_rate(),
            "sync engine started on internal clock"
        );

        Self {
            registry,
            master_bpm,
            master_beat_distance,
            internal_master,
            clock,
            source: SyncSource::Internal,
            decks: Vec::new(),
            reference: None,
            source_rate: f64::NAN,
            inbox_tx,
            inbox,
            _master_subscriptions: master_subscriptions,
        }
    }

    // --- Deck registration ---

    /// Add a deck to the sync session
    ///
    /// The deck's controls must already be published in the registry. They
    /// are resolved once here. Returns `Ok(false)` if the deck was already
    /// registered.
    pub fn register_deck(&mut self, group: Group) -> Result<bool, SyncError> {
        let Group::Deck(id) = group else {
            return Err(SyncError::NotADeck(group));
        };
        if self.deck_index(id).is_some() {
            debug!(deck = %group, "deck already registered");
            return Ok(false);
        }

        let handle = DeckHandle::resolve(&self.registry, id)?;
        let subscriptions = [
            handle.sync_master.subscribe(self.inbox_tx.clone()),
            handle.sync_slave.subscribe(self.inbox_tx.clone()),
        ];
        self.decks.push(RegisteredDeck {
            handle,
            _subscriptions: subscriptions,
        });
        debug!(deck = %group, decks = self.decks.len(), "registered deck");
        Ok(true)
    }

    /// Remove a deck from the sync session
    ///
    /// If it was the reference, a new one is chosen from the remaining decks.
    pub fn deregister_deck(&mut self, id: DeckId) -> bool {
        let Some(index) = self.deck_index(id) else {
            return false;
        };
        let removed = self.decks.remove(index);
        removed.handle.sync_master.set_on(false, Origin::Sync);
        debug!(deck = %Group::Deck(id), "deregistered deck");

        if self.source == SyncSource::Deck(id) {
            info!(deck = %Group::Deck(id), "reference deck removed, choosing a new master");
            let next = self.choose_fallback_source();
            self.set_source(next);
        }
        true
    }

    /// Registered decks in registration order
    pub fn decks(&self) -> impl Iterator<Item = DeckId> + '_ {
        self.decks.iter().map(|d| d.handle.id())
    }

    pub fn is_registered(&self, id: DeckId) -> bool {
        self.deck_index(id).is_some()
    }

    // --- Source management ---

    /// Make `target` the tempo/phase reference
    ///
    /// Returns false if a deck was requested but could not be adopted; the
    /// internal clock is the reference in that case.
    pub fn set_source(&mut self, target: SyncSource) -> bool {
        match target {
            SyncSource::Internal => {
                self.set_internal();
                true
            }
            SyncSource::Deck(id) => {
                if self.set_deck(id) {
                    true
                } else {
                    warn!(deck = %Group::Deck(id), "failed to set master, using internal clock instead");
                    self.set_internal();
                    false
                }
            }
        }
    }

    /// Make the source named by `group` the reference (`[Master]` = internal)
    pub fn set_master(&mut self, group: Group) -> bool {
        self.set_source(SyncSource::from(group))
    }

    /// Pick a new reference after the current one stepped down
    ///
    /// In registration order: a deck already flagged master wins; otherwise
    /// the first slave that is active in the mix, has a known tempo and is
    /// playing. Falls back to the internal clock.
    pub fn choose_fallback_source(&self) -> SyncSource {
        if let Some(handle) = self.published_decks().find(|h| h.is_master()) {
            debug!(deck = %handle.group(), "already have a master");
            return SyncSource::Deck(handle.id());
        }
        let playing_slave = self.published_decks().find(|h| {
            h.is_slave() && h.is_active() && h.file_bpm() > 0.0 && h.is_playing()
        });
        if let Some(handle) = playing_slave {
            debug!(deck = %handle.group(), "picked a new master deck");
            return SyncSource::Deck(handle.id());
        }

        debug!("no deck qualifies, falling back to internal clock");
        SyncSource::Internal
    }

    fn set_internal(&mut self) {
        self.disable_deck_masters(None);
        self.reference = None;
        self.source_rate = f64::NAN;
        self.clock.set_bpm(self.master_bpm.get());

        if !self.source.is_internal() {
            info!(bpm = self.clock.bpm(), "internal clock is master");
        }
        self.source = SyncSource::Internal;
        self.internal_master.set_on(true, Origin::Sync);
    }

    fn set_deck(&mut self, id: DeckId) -> bool {
        let Some(index) = self.deck_index(id) else {
            debug!(deck = %Group::Deck(id), "cannot set unregistered deck as master");
            return false;
        };
        let handle = self.decks[index].handle.clone();
        if !handle.is_published_in(&self.registry) {
            warn!(deck = %handle.group(), "deck controls are missing");
            return false;
        }

        // Losers step down before the new master is adopted
        self.disable_deck_masters(Some(id));

        let subscriptions = [
            handle.true_rate.subscribe(self.inbox_tx.clone()),
            handle.beat_distance.subscribe(self.inbox_tx.clone()),
        ];
        self.reference = Some(Reference {
            handle: handle.clone(),
            _subscriptions: subscriptions,
        });
        self.source = SyncSource::Deck(id);
        self.source_rate = f64::NAN;
        self.apply_source_rate(handle.true_rate());

        let beat_distance = handle.beat_distance();
        self.clock.reset_to_phase(beat_distance);
        self.master_beat_distance.set(beat_distance, Origin::Sync);

        handle.sync_master.set_on(true, Origin::Sync);
        handle.sync_slave.set_on(false, Origin::Sync);
        self.internal_master.set_on(false, Origin::Sync);
        info!(deck = %handle.group(), bpm = self.clock.bpm(), "new master deck");
        true
    }

    /// Un-master every deck except `except`, turning them into slaves
    fn disable_deck_masters(&self, except: Option<DeckId>) {
        for deck in &self.decks {
            let handle = &deck.handle;
            if Some(handle.id()) == except || !handle.is_master() {
                continue;
            }
            debug!(deck = %handle.group(), "unsetting old master");
            handle.sync_master.set_on(false, Origin::Sync);
            handle.sync_slave.set_on(true, Origin::Sync);
        }
    }

    /// Derive the master tempo from the reference deck's rate
    ///
    /// A stopped reference, or one with no known tempo, holds the last
    /// master tempo instead of dragging every slave to zero.
    fn apply_source_rate(&mut self, rate: f64) {
        if rate == self.source_rate {
            return;
        }
        self.source_rate = rate;

        let Some(reference) = &self.reference else {
            return;
        };
        let file_bpm = reference.handle.file_bpm();
        let bpm = rate.abs() * file_bpm;
        if !(bpm > 0.0 && bpm.is_finite()) {
            debug!(rate, file_bpm, "reference has no usable tempo, holding master bpm");
            return;
        }
        if bpm != self.clock.bpm() {
            self.clock.set_bpm(bpm);
            // Fans out to every slave
            self.master_bpm.set(bpm, Origin::Sync);
            debug!(bpm, "master bpm follows reference");
        }
    }

    // --- Notifications ---

    /// Handle every queued control change
    ///
    /// Call this from whichever thread owns the engine, typically at the
    /// top of each audio block. Returns the number of events handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.inbox.try_recv() {
            if event.origin == Origin::Sync {
                continue;
            }
            self.handle_event(event);
            handled += 1;
        }
        if handled > 0 {
            self.resolve_conflicting_masters();
        }
        handled
    }

    fn handle_event(&mut self, event: ControlEvent) {
        match (event.key.group, event.key.item) {
            (Group::Master, Item::SampleRate) => self.on_sample_rate_changed(event.value),
            (Group::Master, Item::SyncBpm) => self.on_master_bpm_changed(event.value),
            (Group::Master, Item::SyncMaster) => self.on_internal_master_changed(event.is_on()),
            (Group::Deck(id), Item::SyncMaster) => self.on_deck_master_changed(id, event.is_on()),
            (Group::Deck(_), Item::SyncSlave) => {
                // Decks un-master themselves through sync_master
                debug!(deck = %event.key.group, on = event.is_on(), "slave state changed");
            }
            (Group::Deck(id), Item::TrueRate) if self.source == SyncSource::Deck(id) => {
                self.apply_source_rate(event.value);
            }
            (Group::Deck(id), Item::BeatDistance) if self.source == SyncSource::Deck(id) => {
                self.master_beat_distance.set(event.value, Origin::Sync);
            }
            // Stale rate/phase updates from a previous reference
            _ => {}
        }
    }

    fn on_deck_master_changed(&mut self, id: DeckId, on: bool) {
        if self.deck_index(id).is_none() {
            debug!(deck = %Group::Deck(id), "ignoring master change from unregistered deck");
            return;
        }

        if on {
            debug!(deck = %Group::Deck(id), "deck requested master");
            self.set_source(SyncSource::Deck(id));
            return;
        }

        // A later queued request may have set the flag again; it is
        // applied when its own event comes up
        if let Some(handle) = self.deck(id) {
            handle.sync_master.set_on(false, Origin::Sync);
        }

        // Another deck is already the flagged reference; nothing stepped down
        if let SyncSource::Deck(current) = self.source {
            if current != id && self.deck(current).is_some_and(|d| d.is_master()) {
                return;
            }
        }
        debug!(deck = %Group::Deck(id), "master disabled");
        let next = self.choose_fallback_source();
        self.set_source(next);
    }

    fn on_internal_master_changed(&mut self, on: bool) {
        if on {
            self.set_source(SyncSource::Internal);
        } else if self.source.is_internal() {
            // Falling back to internal again re-publishes the flag
            let next = self.choose_fallback_source();
            self.set_source(next);
        }
    }

    fn on_master_bpm_changed(&mut self, bpm: f64) {
        if bpm == self.clock.bpm() {
            return;
        }
        if !self.source.is_internal() {
            debug!(bpm, "master bpm follows the reference deck, ignoring write");
            self.master_bpm.set(self.clock.bpm(), Origin::Sync);
            return;
        }
        self.clock.set_bpm(bpm);
        debug!(
            bpm,
            samples_per_beat = self.clock.samples_per_beat(),
            "internal clock tempo changed"
        );
    }

    fn on_sample_rate_changed(&mut self, value: f64) {
        if !(value >= 1.0 && value.is_finite()) {
            warn!(value, "ignoring invalid sample rate");
            return;
        }
        if self.clock.set_sample_rate(value as u32) {
            info!(
                sample_rate = self.clock.sample_rate(),
                samples_per_beat = self.clock.samples_per_beat(),
                "sample rate changed"
            );
        }
    }

    /// Post-hoc repair if several decks ended up flagged master
    fn resolve_conflicting_masters(&mut self) {
        let masters = self.decks.iter().filter(|d| d.handle.is_master()).count();
        if masters <= 1 {
            return;
        }
        warn!(masters, "several decks claim master");
        match self.source {
            SyncSource::Deck(id) if self.deck(id).is_some_and(|d| d.is_master()) => {
                self.disable_deck_masters(Some(id));
            }
            _ => {
                let next = self.choose_fallback_source();
                self.set_source(next);
            }
        }
    }

    // --- Audio context ---

    /// Advance the virtual clock by one processed block
    ///
    /// Audio-thread only. `samples` counts interleaved samples across all
    /// `channels`. Publishes the clock's phase while it is the reference.
    pub fn advance(&mut self, samples: usize, channels: usize) {
        self.clock.advance(samples, channels);
        if self.source.is_internal() {
            self.master_beat_distance
                .set(self.clock.phase(), Origin::Sync);
        }
    }

    // --- Accessors ---

    pub fn source(&self) -> SyncSource {
        self.source
    }

    /// Tempo every deck converges to
    pub fn master_bpm(&self) -> f64 {
        self.clock.bpm()
    }

    pub fn samples_per_beat(&self) -> f64 {
        self.clock.samples_per_beat()
    }

    /// Frames since the last virtual beat
    pub fn virtual_position(&self) -> f64 {
        self.clock.position()
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }

    /// Phase of the virtual clock (0.0 - 1.0)
    pub fn current_phase(&self) -> f64 {
        self.clock.phase()
    }

    /// Handle of the reference deck, `None` on the internal clock
    pub fn current_reference(&self) -> Option<&DeckHandle> {
        self.reference.as_ref().map(|r| &r.handle)
    }

    /// Registered decks whose controls are still in the registry
    fn published_decks(&self) -> impl Iterator<Item = &DeckHandle> + '_ {
        self.decks
            .iter()
            .map(|d| &d.handle)
            .filter(move |h| h.is_published_in(&self.registry))
    }

    fn deck_index(&self, id: DeckId) -> Option<usize> {
        self.decks.iter().position(|d| d.handle.id() == id)
    }

    fn deck(&self, id: DeckId) -> Option<&DeckHandle> {
        self.decks
            .iter()
            .find(|d| d.handle.id() == id)
            .map(|d| &d.handle)
    }
}
