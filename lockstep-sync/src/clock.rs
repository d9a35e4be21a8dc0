//! Virtual beat clock
//!
//! Keeps a beat phase running at the master tempo even when no deck is
//! playing, so a freshly loaded track always has something to lock onto.
//! Positions are counted in frames (one sample per channel).

/// Sample rate assumed until the output device reports one
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Master tempo of a fresh session
pub const DEFAULT_BPM: f64 = 124.0;

/// Upper bound on wrap iterations per call before falling back to a remainder
pub const DEFAULT_MAX_WRAP_ITERATIONS: u32 = 64;

/// Frames per beat at `bpm`, never zero or negative
///
/// Degenerate tempos (zero, negative, non-finite) give one beat per second.
pub fn samples_per_beat(bpm: f64, sample_rate: u32) -> f64 {
    let rate = sample_rate.max(1) as f64;
    if bpm == 0.0 || !bpm.is_finite() {
        return rate;
    }
    let frames = rate * 60.0 / bpm;
    if frames > 0.0 && frames.is_finite() {
        frames
    } else {
        rate
    }
}

/// Phase accumulator for the internal tempo reference
#[derive(Debug, Clone)]
pub struct VirtualClock {
    /// Tempo in BPM as last set (may be degenerate, see `samples_per_beat`)
    bpm: f64,
    /// Output sample rate in Hz
    sample_rate: u32,
    /// Frames per beat, always > 0
    samples_per_beat: f64,
    /// Frames since the last beat, always in [0, samples_per_beat)
    position: f64,
    /// Bound on the subtraction loop in `wrap`
    max_wrap_iterations: u32,
}

impl VirtualClock {
    /// Create a clock at beat position 0
    ///
    /// A sample rate of 0 means "not known yet" and uses `DEFAULT_SAMPLE_RATE`.
    pub fn new(bpm: f64, sample_rate: u32) -> Self {
        let sample_rate = if sample_rate == 0 {
            DEFAULT_SAMPLE_RATE
        } else {
            sample_rate
        };
        Self {
            bpm,
            sample_rate,
            samples_per_beat: samples_per_beat(bpm, sample_rate),
            position: 0.0,
            max_wrap_iterations: DEFAULT_MAX_WRAP_ITERATIONS,
        }
    }

    /// Set the wrap loop bound (at least 1)
    pub fn with_max_wrap_iterations(mut self, iterations: u32) -> Self {
        self.max_wrap_iterations = iterations.max(1);
        self
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples_per_beat(&self) -> f64 {
        self.samples_per_beat
    }

    /// Frames since the last beat
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Current phase within the beat (0.0 - 1.0, exclusive)
    pub fn phase(&self) -> f64 {
        self.position / self.samples_per_beat
    }

    /// Advance by a block of interleaved samples
    pub fn advance(&mut self, samples: usize, channels: usize) {
        self.advance_frames(samples as f64 / channels.max(1) as f64);
    }

    /// Advance by a number of frames
    pub fn advance_frames(&mut self, frames: f64) {
        if frames > 0.0 {
            self.position += frames;
        }
        self.wrap();
    }

    /// Change tempo, keeping the frame position (re-wrapped into the new beat)
    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm;
        self.samples_per_beat = samples_per_beat(bpm, self.sample_rate);
        self.wrap();
    }

    /// Change sample rate, keeping the phase numerically unchanged
    ///
    /// Returns false (and changes nothing) for 0 or the current rate.
    pub fn set_sample_rate(&mut self, sample_rate: u32) -> bool {
        if sample_rate == 0 || sample_rate == self.sample_rate {
            return false;
        }
        let phase = self.phase();
        self.sample_rate = sample_rate;
        self.samples_per_beat = samples_per_beat(self.bpm, sample_rate);
        self.position = phase * self.samples_per_beat;
        self.wrap();
        true
    }

    /// Jump to a phase within the beat (clamped into [0, 1))
    pub fn reset_to_phase(&mut self, phase: f64) {
        let phase = if phase.is_finite() { phase.max(0.0) } else { 0.0 };
        self.position = phase * self.samples_per_beat;
        self.wrap();
    }

    /// Bring `position` back into [0, samples_per_beat)
    ///
    /// Subtracts whole beats rather than taking a remainder, so the common
    /// case (less than a beat per block) never touches `rem_euclid`. The
    /// loop is bounded for pathologically short beats.
    fn wrap(&mut self) {
        if !self.position.is_finite() || self.position < 0.0 {
            self.position = 0.0;
            return;
        }

        let mut iterations = 0;
        while self.position >= self.samples_per_beat {
            if iterations == self.max_wrap_iterations {
                self.position = self.position.rem_euclid(self.samples_per_beat);
                break;
            }
            self.position -= self.samples_per_beat;
            iterations += 1;
        }

        // rem_euclid may round up to the divisor
        if self.position >= self.samples_per_beat {
            self.position = 0.0;
        }
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new(DEFAULT_BPM, DEFAULT_SAMPLE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_samples_per_beat() {
        assert!((samples_per_beat(120.0, 44100) - 22050.0).abs() < 1e-9);
        assert!((samples_per_beat(120.0, 48000) - 24000.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_bpm_is_one_beat_per_second() {
        assert_eq!(samples_per_beat(0.0, 44100), 44100.0);
        assert_eq!(samples_per_beat(-128.0, 44100), 44100.0);
        assert_eq!(samples_per_beat(f64::NAN, 48000), 48000.0);
        assert_eq!(samples_per_beat(f64::INFINITY, 48000), 48000.0);
    }

    #[test]
    fn test_unknown_sample_rate_uses_default() {
        let clock = VirtualClock::new(120.0, 0);
        assert_eq!(clock.sample_rate(), DEFAULT_SAMPLE_RATE);
        assert!((clock.samples_per_beat() - 22050.0).abs() < 1e-9);
    }

    #[test]
    fn test_advance_counts_frames() {
        let mut clock = VirtualClock::new(120.0, 44100);
        // 512 stereo frames
        clock.advance(1024, 2);
        assert!((clock.position() - 512.0).abs() < 1e-9);
    }

    #[test]
    fn test_advance_wraps_at_beat() {
        let mut clock = VirtualClock::new(120.0, 44100);
        clock.advance_frames(22050.0 + 100.0);
        assert!((clock.position() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_phase_at_half_beat() {
        let mut clock = VirtualClock::new(120.0, 44100);
        clock.advance_frames(11025.0);
        assert!((clock.phase() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_reset_to_phase() {
        // 132.3 BPM at 44100 Hz is 20000 frames per beat
        let mut clock = VirtualClock::new(132.3, 44100);
        assert!((clock.samples_per_beat() - 20000.0).abs() < 1e-6);

        clock.reset_to_phase(0.5);
        assert!((clock.position() - 10000.0).abs() < 1e-6);
    }

    #[test]
    fn test_reset_to_invalid_phase() {
        let mut clock = VirtualClock::new(120.0, 44100);
        clock.reset_to_phase(-0.25);
        assert_eq!(clock.position(), 0.0);
        clock.reset_to_phase(f64::NAN);
        assert_eq!(clock.position(), 0.0);
        clock.reset_to_phase(1.0);
        assert!(clock.position() < clock.samples_per_beat());
    }

    #[test]
    fn test_sample_rate_change_keeps_phase() {
        let mut clock = VirtualClock::new(120.0, 44100);
        clock.advance_frames(11025.0);

        assert!(clock.set_sample_rate(48000));
        assert!((clock.samples_per_beat() - 24000.0).abs() < 1e-9);
        assert!((clock.position() - 12000.0).abs() < 1e-9);
        assert!((clock.phase() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_sample_rate_change_ignores_zero_and_same() {
        let mut clock = VirtualClock::new(120.0, 44100);
        assert!(!clock.set_sample_rate(0));
        assert!(!clock.set_sample_rate(44100));
        assert_eq!(clock.sample_rate(), 44100);
    }

    #[test]
    fn test_faster_tempo_rewraps_position() {
        let mut clock = VirtualClock::new(60.0, 44100);
        clock.advance_frames(30000.0);

        // 240 BPM => 11025 frames per beat; 30000 - 2 * 11025 = 7950
        clock.set_bpm(240.0);
        assert!((clock.position() - 7950.0).abs() < 1e-9);
    }

    #[test]
    fn test_wrap_guard_with_tiny_beats() {
        let mut clock = VirtualClock::new(1.0e9, 44100).with_max_wrap_iterations(4);
        clock.advance_frames(1.0e6);
        assert!(clock.position() >= 0.0);
        assert!(clock.position() < clock.samples_per_beat());
    }

    proptest! {
        #[test]
        fn prop_position_stays_in_beat(
            bpm in prop_oneof![Just(0.0), Just(-60.0), 1.0f64..400.0, 1.0e6f64..1.0e9],
            rates in proptest::collection::vec(prop_oneof![Just(0u32), 8000u32..192000], 1..4),
            blocks in proptest::collection::vec(0usize..8192, 1..32),
            new_bpm in 1.0f64..400.0,
        ) {
            let mut clock = VirtualClock::new(bpm, 44100);
            for (i, block) in blocks.iter().enumerate() {
                clock.advance(*block, 2);
                if let Some(rate) = rates.get(i) {
                    clock.set_sample_rate(*rate);
                }
                if i == blocks.len() / 2 {
                    clock.set_bpm(new_bpm);
                }
                prop_assert!(clock.samples_per_beat() > 0.0);
                prop_assert!(clock.position() >= 0.0);
                prop_assert!(clock.position() < clock.samples_per_beat());
                prop_assert!(clock.phase() >= 0.0 && clock.phase() < 1.0);
            }
        }

        #[test]
        fn prop_sample_rate_change_preserves_phase(
            bpm in 40.0f64..300.0,
            frames in 0.0f64..100000.0,
            rate in 8000u32..192000,
        ) {
            let mut clock = VirtualClock::new(bpm, 44100);
            clock.advance_frames(frames);
            let before = clock.phase();
            clock.set_sample_rate(rate);
            let after = clock.phase();
            // A phase within rounding of 1.0 may legitimately wrap to 0.0
            prop_assert!((before - after).abs() < 1e-9 || (before - after).abs() > 1.0 - 1e-9);
        }
    }
}
