//! Simulated deck - a playhead that publishes its rate and beat phase
//!
//! Stands in for a real player so the sync engine has something to follow.
//! A synced deck matches the master tempo and eases its phase onto the
//! master's beat.

use lockstep_control::{ControlRegistry, DeckHandle, DeckId, Origin};

/// Fraction of the phase error corrected per block
const PHASE_CORRECTION: f64 = 0.1;

pub struct SimDeck {
    handle: DeckHandle,
    /// Playhead in track frames, beat 0 at position 0
    position: f64,
}

impl SimDeck {
    /// Publish a stopped, empty deck
    pub fn new(registry: &ControlRegistry, id: DeckId) -> Self {
        Self {
            handle: DeckHandle::create(registry, id),
            position: 0.0,
        }
    }

    pub fn id(&self) -> DeckId {
        self.handle.id()
    }

    pub fn handle(&self) -> &DeckHandle {
        &self.handle
    }

    /// Frames per beat of the loaded track at original speed
    fn samples_per_beat(&self, sample_rate: u32) -> Option<f64> {
        let bpm = self.handle.file_bpm();
        (bpm > 0.0 && bpm.is_finite()).then(|| sample_rate as f64 * 60.0 / bpm)
    }

    /// Current beat phase (0.0 - 1.0), `None` without a known tempo
    pub fn beat_phase(&self, sample_rate: u32) -> Option<f64> {
        let samples_per_beat = self.samples_per_beat(sample_rate)?;
        Some((self.position / samples_per_beat).rem_euclid(1.0))
    }

    /// Frames to nudge to reach `target_phase` by the shortest path
    /// (positive = forward, negative = backward)
    pub fn phase_offset_to_align(&self, target_phase: f64, sample_rate: u32) -> Option<f64> {
        let samples_per_beat = self.samples_per_beat(sample_rate)?;
        let current_phase = self.beat_phase(sample_rate)?;

        let mut phase_diff = target_phase - current_phase;
        if phase_diff > 0.5 {
            phase_diff -= 1.0;
        } else if phase_diff < -0.5 {
            phase_diff += 1.0;
        }

        Some(phase_diff * samples_per_beat)
    }

    /// Move the playhead to `phase` within the current beat
    pub fn jump_to_phase(&mut self, phase: f64, sample_rate: u32) {
        let Some(samples_per_beat) = self.samples_per_beat(sample_rate) else {
            return;
        };
        let beat = (self.position / samples_per_beat).floor();
        self.position = (beat + phase.clamp(0.0, 1.0)) * samples_per_beat;
        self.publish_phase(sample_rate);
    }

    /// Play one block of `frames` output frames
    pub fn process(&mut self, frames: f64, sample_rate: u32, master_bpm: f64, master_phase: f64) {
        if self.handle.is_slave() && !self.handle.is_master() {
            self.follow(master_bpm, master_phase, sample_rate);
        }
        self.position += frames * self.handle.true_rate();
        self.publish_phase(sample_rate);
    }

    /// Match the master tempo and pull the phase toward its beat
    fn follow(&mut self, master_bpm: f64, master_phase: f64, sample_rate: u32) {
        let file_bpm = self.handle.file_bpm();
        let rate = self.handle.true_rate();
        // A stopped slave stays stopped
        if file_bpm <= 0.0 || master_bpm <= 0.0 || rate == 0.0 {
            return;
        }

        let target = (master_bpm / file_bpm).copysign(rate);
        if target != rate {
            self.handle.true_rate.set(target, Origin::Engine);
        }
        if let Some(offset) = self.phase_offset_to_align(master_phase, sample_rate) {
            self.position += offset * PHASE_CORRECTION;
        }
    }

    fn publish_phase(&self, sample_rate: u32) {
        if let Some(phase) = self.beat_phase(sample_rate) {
            self.handle.beat_distance.set(phase, Origin::Engine);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deck(bpm: f64, rate: f64) -> (ControlRegistry, SimDeck) {
        let registry = ControlRegistry::new();
        let deck = SimDeck::new(&registry, DeckId::new(1).unwrap());
        deck.handle.file_bpm.set(bpm, Origin::Engine);
        deck.handle.true_rate.set(rate, Origin::Engine);
        (registry, deck)
    }

    #[test]
    fn test_phase_advances_with_rate() {
        // 120 BPM at 44100 Hz: 22050 frames per beat
        let (_, mut deck) = deck(120.0, 1.0);
        deck.process(11025.0, 44100, 120.0, 0.0);
        assert!((deck.handle().beat_distance() - 0.5).abs() < 1e-9);

        deck.handle.true_rate.set(0.5, Origin::Engine);
        deck.process(22050.0, 44100, 120.0, 0.0);
        assert!(deck.handle().beat_distance().abs() < 1e-9);
    }

    #[test]
    fn test_no_phase_without_tempo() {
        let (_, mut deck) = deck(0.0, 1.0);
        deck.process(1000.0, 44100, 120.0, 0.0);
        assert!(deck.beat_phase(44100).is_none());
        assert_eq!(deck.handle().beat_distance(), 0.0);
    }

    #[test]
    fn test_shortest_alignment_path() {
        let (_, mut deck) = deck(120.0, 1.0);
        deck.jump_to_phase(0.9, 44100);
        let offset = deck.phase_offset_to_align(0.1, 44100).unwrap();
        assert!((offset - 0.2 * 22050.0).abs() < 1e-6);

        deck.jump_to_phase(0.1, 44100);
        let offset = deck.phase_offset_to_align(0.9, 44100).unwrap();
        assert!((offset + 0.2 * 22050.0).abs() < 1e-6);
    }

    #[test]
    fn test_slave_follows_master_tempo() {
        let (_, mut deck) = deck(100.0, 1.0);
        deck.handle.sync_slave.set_on(true, Origin::Control);
        deck.process(512.0, 44100, 125.0, 0.0);
        assert!((deck.handle().true_rate() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_reverse_slave_keeps_direction() {
        let (_, mut deck) = deck(100.0, -1.0);
        deck.handle.sync_slave.set_on(true, Origin::Control);
        deck.process(512.0, 44100, 110.0, 0.0);
        assert!((deck.handle().true_rate() + 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_stopped_slave_stays_stopped() {
        let (_, mut deck) = deck(100.0, 0.0);
        deck.handle.sync_slave.set_on(true, Origin::Control);
        deck.process(512.0, 44100, 130.0, 0.5);
        assert_eq!(deck.handle().true_rate(), 0.0);
    }

    #[test]
    fn test_slave_converges_on_master_phase() {
        let (_, mut deck) = deck(120.0, 1.0);
        deck.handle.sync_slave.set_on(true, Origin::Control);
        deck.jump_to_phase(0.3, 44100);

        // Master sits at phase 0.5 at the start of every block
        for _ in 0..100 {
            deck.process(0.0, 44100, 120.0, 0.5);
        }
        assert!((deck.beat_phase(44100).unwrap() - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_master_deck_does_not_follow() {
        let (_, mut deck) = deck(100.0, 1.0);
        deck.handle.sync_slave.set_on(true, Origin::Control);
        deck.handle.sync_master.set_on(true, Origin::Control);
        deck.process(512.0, 44100, 140.0, 0.0);
        assert_eq!(deck.handle().true_rate(), 1.0);
    }
}
