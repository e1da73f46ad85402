use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{CaptureFlag, DetectionConfig, SpectrumSource, WindowFunction};

/// Strategy the detector currently uses to produce beats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionMode {
    /// Energy-threshold analysis of the bass band.
    Spectral,
    /// Synthetic beats at a fixed interval of media time.
    FallbackTimer,
    /// Analysis is structurally unavailable; nothing is emitted.
    Disabled,
}

/// Energy bookkeeping owned by the detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EnergyState {
    /// Bass-band energy of the latest analysed snapshot.
    pub current_energy: f32,
    /// Slowly adapting baseline. Never negative.
    pub average_energy: f32,
    /// Detector clock time of the last emitted beat.
    pub last_beat_time: Option<f32>,
}

/// A detected (or synthesised) beat. Strength is in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    pub strength: f32,
    /// Detector clock time of emission.
    pub time: f32,
    /// Media playback time of emission.
    pub media_time: f32,
}

/// Handle returned by [`BeatDetector::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type BeatCallback = Box<dyn FnMut(&BeatEvent)>;

/// Normalised spike strength of `current` over `average`.
pub fn beat_strength(current: f32, average: f32, sensitivity: f32) -> f32 {
    if average <= 0.0 || sensitivity <= 0.0 {
        return 0.0;
    }
    ((current - average) / (average * sensitivity)).clamp(0.0, 1.0)
}

/// Turns periodic spectrum snapshots into rate-limited beat events.
///
/// The detector is driven by [`BeatDetector::update`] from the host's update
/// loop and throttles itself to its configured cadence. Source failures,
/// stalled clocks and silence never surface as errors: the cycle is skipped
/// or the mode changes.
pub struct BeatDetector {
    config: DetectionConfig,
    mode: DetectionMode,
    energy: EnergyState,
    strength: f32,
    capture: CaptureFlag,
    listeners: Vec<(ListenerId, BeatCallback)>,
    next_listener: u64,
    last_update: Option<f32>,
    last_mute_check: Option<f32>,
    muted: bool,
    warmup_started: Option<f32>,
    last_playback_time: f32,
    stuck_reads: u32,
    silence_since: Option<f32>,
    last_analysed: Option<f32>,
    last_fallback_beat: f32,
}

impl BeatDetector {
    /// Creates a detector in [`DetectionMode::Spectral`]. While `capture` is
    /// raised the detector does not touch the source at all.
    pub fn new(config: DetectionConfig, capture: CaptureFlag) -> Self {
        Self {
            config,
            mode: DetectionMode::Spectral,
            energy: EnergyState::default(),
            strength: 0.0,
            capture,
            listeners: Vec::new(),
            next_listener: 0,
            last_update: None,
            last_mute_check: None,
            muted: false,
            warmup_started: None,
            last_playback_time: 0.0,
            stuck_reads: 0,
            silence_since: None,
            last_analysed: None,
            last_fallback_beat: 0.0,
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    pub fn energy(&self) -> &EnergyState {
        &self.energy
    }

    pub fn current_energy(&self) -> f32 {
        self.energy.current_energy
    }

    pub fn average_energy(&self) -> f32 {
        self.energy.average_energy
    }

    /// Strength computed by the most recent analysed cycle.
    pub fn beat_strength(&self) -> f32 {
        self.strength
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Registers a listener. Listeners run synchronously, in registration
    /// order, before the emitting cycle returns.
    pub fn add_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&BeatEvent) + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener, _)| *listener != id);
        self.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Runs one detection cycle if the cadence allows it. `now` is the host
    /// clock in seconds. Returns the beat emitted this cycle, if any.
    pub fn update(&mut self, now: f32, source: &mut dyn SpectrumSource) -> Option<BeatEvent> {
        self.poll_mute(now, source);

        if let Some(last) = self.last_update {
            if now - last < self.config.update_interval {
                return None;
            }
        }
        self.last_update = Some(now);

        if self.warmup_started.is_none() && source.is_playing() {
            self.warmup_started = Some(now);
        }

        if !source.is_playing() || self.capture.is_active() || self.muted {
            self.silence_since = None;
            return None;
        }

        match self.mode {
            DetectionMode::Disabled => None,
            DetectionMode::FallbackTimer => self.fallback_cycle(now, source),
            DetectionMode::Spectral => self.spectral_cycle(now, source),
        }
    }

    /// Re-sync for freshly loaded media: back to spectral analysis with a
    /// zero baseline and a fresh warm-up.
    pub fn reset_for_new_media(&mut self) {
        self.mode = DetectionMode::Spectral;
        self.clear_analysis_state();
        tracing::info!("beat detection re-synced to spectral analysis");
    }

    pub fn force_fallback_mode(&mut self) {
        self.enter_fallback("forced");
    }

    /// Playback engine reports analysis is structurally unavailable.
    pub fn force_disabled_mode(&mut self) {
        if self.mode != DetectionMode::Disabled {
            self.mode = DetectionMode::Disabled;
            tracing::info!("beat detection disabled");
        }
    }

    /// Reads one snapshot to decide how newly loaded media should be
    /// analysed: spectral when the bass band carries energy, fallback
    /// otherwise. Returns the chosen mode.
    pub fn probe_source(&mut self, source: &mut dyn SpectrumSource) -> DetectionMode {
        let energy = source
            .spectrum(self.config.spectrum_window, WindowFunction::BlackmanHarris)
            .map(|frame| frame.band_energy(1..self.config.bass_range));

        match energy {
            Ok(energy) if energy > self.config.energy_floor => self.reset_for_new_media(),
            Ok(energy) => {
                tracing::debug!(energy, "probe found no bass energy");
                self.clear_analysis_state();
                self.enter_fallback("probe found no audio energy");
            }
            Err(err) => {
                tracing::debug!(%err, "probe could not read the spectrum");
                self.clear_analysis_state();
                self.enter_fallback("probe could not read the spectrum");
            }
        }
        self.mode
    }

    /// Broadcasts a full-strength beat outside the detection cycle. Does not
    /// touch the rate limiter.
    pub fn trigger_beat(&mut self, now: f32, media_time: f32) -> BeatEvent {
        let beat = BeatEvent {
            strength: 1.0,
            time: now,
            media_time,
        };
        self.broadcast(&beat);
        beat
    }

    fn poll_mute(&mut self, now: f32, source: &dyn SpectrumSource) {
        if let Some(last) = self.last_mute_check {
            if now - last < self.config.mute_check_interval {
                return;
            }
        }
        self.last_mute_check = Some(now);

        let muted = source.output_volume() <= self.config.mute_volume_threshold;
        if muted != self.muted {
            self.muted = muted;
            self.energy.average_energy = 0.0;
            self.silence_since = None;
            self.stuck_reads = 0;
            if muted {
                tracing::info!("audio muted, beat detection paused");
            } else {
                tracing::info!("audio unmuted, beat detection resumed");
            }
        }
    }

    fn fallback_cycle(&mut self, now: f32, source: &dyn SpectrumSource) -> Option<BeatEvent> {
        let media_time = source.playback_time();
        if media_time < self.last_fallback_beat {
            // media seeked backwards
            self.last_fallback_beat = media_time;
            return None;
        }

        let interval = self.config.fallback_interval;
        let elapsed = media_time - self.last_fallback_beat;
        if elapsed < interval {
            return None;
        }

        self.last_fallback_beat += (elapsed / interval).floor() * interval;
        self.strength = self.config.fallback_strength;
        let beat = BeatEvent {
            strength: self.strength,
            time: now,
            media_time,
        };
        Some(self.emit(beat))
    }

    fn spectral_cycle(&mut self, now: f32, source: &mut dyn SpectrumSource) -> Option<BeatEvent> {
        let playback_time = source.playback_time();
        if playback_time <= 0.0 {
            return None;
        }

        if (playback_time - self.last_playback_time).abs() <= f32::EPSILON {
            self.stuck_reads += 1;
            if self.stuck_reads > self.config.max_stuck_reads {
                tracing::trace!(playback_time, "playback clock stalled, skipping cycle");
                return None;
            }
        } else {
            self.stuck_reads = 0;
            self.last_playback_time = playback_time;
        }

        let in_warmup = self
            .warmup_started
            .map(|started| now - started < self.config.warmup_duration)
            .unwrap_or(false);
        let (window_size, window, band_end) = if in_warmup {
            (
                self.config.warmup_window,
                WindowFunction::Rectangular,
                self.config.warmup_bass_range.min(self.config.bass_range),
            )
        } else {
            (
                self.config.spectrum_window,
                WindowFunction::BlackmanHarris,
                self.config.bass_range,
            )
        };

        let frame = match source.spectrum(window_size, window) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::trace!(%err, "spectrum unavailable, skipping cycle");
                return None;
            }
        };

        let energy = frame.band_energy(1..band_end);
        self.process_energy(now, playback_time, energy)
    }

    fn process_energy(&mut self, now: f32, media_time: f32, energy: f32) -> Option<BeatEvent> {
        let floor = self.config.energy_floor;
        self.energy.current_energy = energy;
        let previous = self.last_analysed.replace(now);

        if energy < floor {
            // Silence only counts across consecutive analysed cycles.
            let contiguous = previous
                .map(|last| now - last <= self.config.silence_reset_after)
                .unwrap_or(false);
            if !contiguous {
                self.silence_since = None;
            }
            let since = *self.silence_since.get_or_insert(now);
            let silent_for = now - since;
            if silent_for > self.config.silence_reset_after {
                self.energy.average_energy = 0.0;
            }
            if silent_for > self.config.fallback_after {
                self.enter_fallback("sustained silence");
            }
            return None;
        }
        self.silence_since = None;

        // A zero baseline is seeded by this cycle, not compared against.
        let established = self.energy.average_energy >= floor;
        let average = self.energy.average_energy;
        let average = (average + (energy - average) * self.config.smoothing).max(0.0);
        self.energy.average_energy = average;
        if !established || average < floor {
            return None;
        }

        let sensitivity = self.config.sensitivity;
        let difference = energy - average;
        self.strength = beat_strength(energy, average, sensitivity);

        let rested = self
            .energy
            .last_beat_time
            .map(|last| now - last > self.config.min_beat_interval)
            .unwrap_or(true);
        if energy > average * sensitivity && difference > floor && rested {
            let beat = BeatEvent {
                strength: self.strength,
                time: now,
                media_time,
            };
            return Some(self.emit(beat));
        }

        None
    }

    fn emit(&mut self, beat: BeatEvent) -> BeatEvent {
        self.energy.last_beat_time = Some(beat.time);
        tracing::debug!(
            strength = beat.strength,
            media_time = beat.media_time,
            mode = ?self.mode,
            "beat"
        );
        self.broadcast(&beat);
        beat
    }

    fn broadcast(&mut self, beat: &BeatEvent) {
        if self.listeners.is_empty() {
            tracing::trace!("beat emitted with no listeners");
        }
        for (_, listener) in self.listeners.iter_mut() {
            listener(beat);
        }
    }

    fn enter_fallback(&mut self, reason: &str) {
        if self.mode == DetectionMode::FallbackTimer {
            return;
        }
        self.mode = DetectionMode::FallbackTimer;
        self.last_fallback_beat = 0.0;
        self.warmup_started = None;
        self.silence_since = None;
        tracing::info!(
            reason,
            interval = self.config.fallback_interval,
            "switched to fallback beat timer"
        );
    }

    fn clear_analysis_state(&mut self) {
        self.energy = EnergyState::default();
        self.strength = 0.0;
        self.warmup_started = None;
        self.silence_since = None;
        self.last_analysed = None;
        self.stuck_reads = 0;
        self.last_playback_time = 0.0;
        self.last_fallback_beat = 0.0;
    }
}

impl fmt::Debug for BeatDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeatDetector")
            .field("mode", &self.mode)
            .field("energy", &self.energy)
            .field("muted", &self.muted)
            .field("listeners", &self.listeners.len())
            .field("stuck_reads", &self.stuck_reads)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{AudioFrame, BeatSyncError, MediaClock, Result};

    /// Source whose bass band (bin 1) carries a scripted energy value.
    #[derive(Debug)]
    struct ScriptedSource {
        playing: bool,
        time: f32,
        energy: f32,
        volume: f32,
        fail: bool,
        requests: Vec<(usize, WindowFunction)>,
    }

    impl ScriptedSource {
        fn playing() -> Self {
            Self {
                playing: true,
                time: 0.0,
                energy: 0.0,
                volume: 1.0,
                fail: false,
                requests: Vec::new(),
            }
        }
    }

    impl MediaClock for ScriptedSource {
        fn playback_time(&self) -> f32 {
            self.time
        }

        fn is_playing(&self) -> bool {
            self.playing
        }
    }

    impl SpectrumSource for ScriptedSource {
        fn spectrum(&mut self, window_size: usize, window: WindowFunction) -> Result<AudioFrame> {
            self.requests.push((window_size, window));
            if self.fail {
                return Err(BeatSyncError::SourceUnavailable("scripted failure"));
            }
            let mut bins = vec![0.0; window_size];
            bins[1] = self.energy;
            Ok(AudioFrame::new(self.time, bins))
        }

        fn output_volume(&self) -> f32 {
            self.volume
        }
    }

    fn detector() -> BeatDetector {
        BeatDetector::new(DetectionConfig::default(), CaptureFlag::default())
    }

    fn collect(detector: &mut BeatDetector) -> Rc<RefCell<Vec<BeatEvent>>> {
        let beats = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&beats);
        detector.add_listener(move |beat| sink.borrow_mut().push(*beat));
        beats
    }

    /// Drives `cycles` detection cycles 0.25 s apart, starting at `start`.
    fn run(
        detector: &mut BeatDetector,
        source: &mut ScriptedSource,
        start: f32,
        cycles: usize,
        energy: impl Fn(usize) -> f32,
    ) -> f32 {
        let mut now = start;
        for cycle in 0..cycles {
            now = start + cycle as f32 * 0.25;
            source.time = now + 0.25;
            source.energy = energy(cycle);
            detector.update(now, source);
        }
        now
    }

    #[test]
    fn strength_matches_reference_spike() {
        let strength = beat_strength(2.0, 1.0, 1.3);
        assert!((strength - 0.769).abs() < 1e-3);
        assert_eq!(beat_strength(0.5, 0.0, 1.3), 0.0);
        assert_eq!(beat_strength(0.5, 1.0, 1.3), 0.0);
    }

    #[test]
    fn single_spike_over_steady_baseline_fires() {
        let mut config = DetectionConfig::default();
        config.smoothing = 0.01;
        let mut detector = BeatDetector::new(config, CaptureFlag::default());
        detector.energy.average_energy = 1.0;

        let beat = detector.process_energy(10.0, 5.0, 2.0).expect("spike should fire");
        assert!((beat.strength - 0.77).abs() < 0.03, "strength {}", beat.strength);
        assert_eq!(detector.energy().last_beat_time, Some(10.0));
    }

    #[test]
    fn unestablished_baseline_never_fires() {
        for sensitivity in [0.5, 1.0, 3.0] {
            let mut config = DetectionConfig::default();
            config.sensitivity = sensitivity;
            let mut detector = BeatDetector::new(config, CaptureFlag::default());

            assert!(detector.process_energy(1.0, 1.0, 0.5).is_none());
            assert!(detector.average_energy() > 0.0);
        }
    }

    #[test]
    fn energy_at_or_below_threshold_never_fires() {
        let mut detector = detector();
        let beats = collect(&mut detector);
        let mut source = ScriptedSource::playing();
        detector.energy.average_energy = 1.0;

        // Steady energy with mild wobble stays under 1.3x the baseline.
        run(&mut detector, &mut source, 0.0, 80, |cycle| {
            if cycle % 2 == 0 {
                1.0
            } else {
                1.1
            }
        });

        assert!(beats.borrow().is_empty());
    }

    #[test]
    fn beats_respect_min_interval() {
        let mut detector = detector();
        let beats = collect(&mut detector);
        detector.energy.average_energy = 1.0;

        // Extreme spikes every 0.05 s.
        for step in 0..200 {
            let now = 20.0 + step as f32 * 0.05;
            detector.process_energy(now, now, if step % 2 == 0 { 50.0 } else { 1.0 });
        }

        let beats = beats.borrow();
        assert!(beats.len() > 5);
        for pair in beats.windows(2) {
            assert!(pair[1].time - pair[0].time >= 0.25);
        }
    }

    #[test]
    fn spectral_cycles_detect_spikes() {
        let mut detector = detector();
        let beats = collect(&mut detector);
        let mut source = ScriptedSource::playing();
        detector.energy.average_energy = 1.0;

        // Steady level, then a spike every eighth cycle.
        run(&mut detector, &mut source, 0.0, 64, |cycle| {
            if cycle > 20 && cycle % 8 == 0 {
                4.0
            } else {
                1.0
            }
        });

        let beats = beats.borrow();
        assert_eq!(beats.len(), 5);
        assert!(beats.iter().all(|beat| beat.strength > 0.0 && beat.strength <= 1.0));
        assert_eq!(beats[0].time, 24.0 * 0.25);
    }

    #[test]
    fn update_is_throttled_to_cadence() {
        let mut detector = detector();
        let mut source = ScriptedSource::playing();
        source.time = 1.0;
        source.energy = 1.0;

        detector.update(0.0, &mut source);
        detector.update(0.05, &mut source);
        detector.update(0.1, &mut source);
        detector.update(0.25, &mut source);

        assert_eq!(source.requests.len(), 2);
    }

    #[test]
    fn warmup_uses_cheaper_analysis() {
        let mut detector = detector();
        let mut source = ScriptedSource::playing();
        source.energy = 1.0;

        source.time = 0.5;
        detector.update(0.0, &mut source);
        source.time = 4.5;
        detector.update(4.0, &mut source);

        assert_eq!(
            source.requests,
            vec![
                (512, WindowFunction::Rectangular),
                (1024, WindowFunction::BlackmanHarris)
            ]
        );
    }

    #[test]
    fn reset_zeroes_baseline_and_blocks_next_spike() {
        let mut detector = detector();
        let beats = collect(&mut detector);
        detector.energy.average_energy = 1.0;

        detector.reset_for_new_media();
        assert_eq!(detector.average_energy(), 0.0);
        assert_eq!(detector.mode(), DetectionMode::Spectral);

        assert!(detector.process_energy(5.0, 1.0, 10.0).is_none());
        assert!(beats.borrow().is_empty());
    }

    #[test]
    fn sustained_silence_switches_to_fallback() {
        let mut detector = detector();
        let mut source = ScriptedSource::playing();
        source.energy = 1.0;
        source.time = 1.0;
        detector.update(0.0, &mut source);

        // Ten silent cycles 0.35 s apart span 3.15 s.
        source.energy = 0.0;
        for cycle in 0..10 {
            let now = 1.0 + cycle as f32 * 0.35;
            source.time = now + 1.0;
            detector.update(now, &mut source);
            if cycle < 9 {
                assert_eq!(detector.mode(), DetectionMode::Spectral);
            }
        }
        assert_eq!(detector.mode(), DetectionMode::FallbackTimer);

        for cycle in 10..20 {
            let now = 1.0 + cycle as f32 * 0.35;
            source.time = now + 1.0;
            detector.update(now, &mut source);
            assert_eq!(detector.mode(), DetectionMode::FallbackTimer);
        }
    }

    #[test]
    fn grace_period_silence_forgets_baseline() {
        let mut detector = detector();
        detector.energy.average_energy = 1.0;

        detector.process_energy(0.0, 0.0, 0.0);
        detector.process_energy(1.0, 1.0, 0.0);
        assert_eq!(detector.average_energy(), 1.0);

        detector.process_energy(2.5, 2.5, 0.0);
        assert_eq!(detector.average_energy(), 0.0);
        assert_eq!(detector.mode(), DetectionMode::Spectral);
    }

    #[test]
    fn silence_does_not_accumulate_across_gaps() {
        let mut detector = detector();

        detector.process_energy(0.0, 0.0, 0.0);
        detector.process_energy(0.5, 0.5, 0.0);
        detector.process_energy(10.5, 10.5, 0.0);
        assert_eq!(detector.mode(), DetectionMode::Spectral);

        let mut source = ScriptedSource::playing();
        run(&mut detector, &mut source, 11.0, 3, |_| 0.0);
        source.playing = false;
        detector.update(15.0, &mut source);
        source.playing = true;
        source.time = 20.0;
        detector.update(20.0, &mut source);
        assert_eq!(detector.mode(), DetectionMode::Spectral);
    }

    #[test]
    fn mute_toggle_restarts_silence_timer() {
        let mut detector = detector();
        let mut source = ScriptedSource::playing();
        run(&mut detector, &mut source, 0.0, 11, |_| 0.0);
        assert_eq!(detector.mode(), DetectionMode::Spectral);

        source.volume = 0.0;
        source.time = 3.0;
        detector.update(2.75, &mut source);
        assert!(detector.is_muted());

        source.volume = 1.0;
        for now in [3.0, 3.25] {
            source.time = now + 0.25;
            detector.update(now, &mut source);
        }
        assert!(!detector.is_muted());
        assert_eq!(detector.mode(), DetectionMode::Spectral);
    }

    #[test]
    fn fallback_beats_follow_media_clock() {
        // Same media progression, sampled at two different host rates.
        for host_step in [0.25_f32, 0.5] {
            let mut detector = detector();
            let beats = collect(&mut detector);
            detector.force_fallback_mode();
            let mut source = ScriptedSource::playing();

            for tick in 0..40 {
                let now = tick as f32 * host_step;
                source.time = tick as f32 * 0.25;
                detector.update(now, &mut source);
            }

            let beats = beats.borrow();
            assert!(beats.len() >= 15);
            assert!(beats.iter().all(|beat| beat.strength == 0.7));
            for pair in beats.windows(2) {
                assert_eq!(pair[1].media_time - pair[0].media_time, 0.5);
            }
        }
    }

    #[test]
    fn fallback_does_not_read_the_spectrum() {
        let mut detector = detector();
        detector.force_fallback_mode();
        let mut source = ScriptedSource::playing();
        source.time = 2.0;
        detector.update(0.0, &mut source);
        assert!(source.requests.is_empty());
    }

    #[test]
    fn disabled_mode_emits_nothing() {
        let mut detector = detector();
        let beats = collect(&mut detector);
        detector.force_disabled_mode();
        let mut source = ScriptedSource::playing();

        run(&mut detector, &mut source, 0.0, 20, |cycle| cycle as f32);

        assert!(beats.borrow().is_empty());
        assert!(source.requests.is_empty());
        assert_eq!(detector.energy(), &EnergyState::default());
    }

    #[test]
    fn capture_suppresses_source_reads() {
        let capture = CaptureFlag::default();
        let mut detector = BeatDetector::new(DetectionConfig::default(), capture.clone());
        let mut source = ScriptedSource::playing();
        capture.raise();

        run(&mut detector, &mut source, 0.0, 10, |_| 1.0);
        assert!(source.requests.is_empty());
        assert_eq!(detector.average_energy(), 0.0);

        capture.lower();
        run(&mut detector, &mut source, 5.0, 2, |_| 1.0);
        assert_eq!(source.requests.len(), 2);
    }

    #[test]
    fn mute_pauses_detection_and_resets_baseline() {
        let mut detector = detector();
        let mut source = ScriptedSource::playing();
        run(&mut detector, &mut source, 0.0, 8, |_| 1.0);
        assert!(detector.average_energy() > 0.0);

        source.volume = 0.0;
        let requests = source.requests.len();
        run(&mut detector, &mut source, 5.0, 4, |_| 1.0);
        assert!(detector.is_muted());
        assert_eq!(detector.average_energy(), 0.0);
        assert_eq!(source.requests.len(), requests);

        source.volume = 1.0;
        source.time += 1.0;
        detector.update(10.0, &mut source);
        assert!(!detector.is_muted());
        assert_eq!(source.requests.len(), requests + 1);
    }

    #[test]
    fn source_failure_skips_cycle() {
        let mut detector = detector();
        let mut source = ScriptedSource::playing();
        source.fail = true;

        run(&mut detector, &mut source, 0.0, 20, |_| 1.0);

        assert_eq!(detector.mode(), DetectionMode::Spectral);
        assert_eq!(detector.energy(), &EnergyState::default());
    }

    #[test]
    fn stalled_clock_skips_after_limit() {
        let mut detector = detector();
        let mut source = ScriptedSource::playing();
        source.time = 1.0;
        source.energy = 1.0;

        for cycle in 0..8 {
            detector.update(cycle as f32 * 0.25, &mut source);
        }

        // First read plus three tolerated repeats.
        assert_eq!(source.requests.len(), 4);
    }

    #[test]
    fn not_started_playback_is_skipped() {
        let mut detector = detector();
        let mut source = ScriptedSource::playing();
        source.energy = 1.0;
        detector.update(0.0, &mut source);
        assert!(source.requests.is_empty());
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let mut detector = detector();
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            detector.add_listener(move |_| order.borrow_mut().push(tag));
        }

        detector.trigger_beat(0.0, 0.0);
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn removed_listener_is_not_called() {
        let mut detector = detector();
        let hits = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&hits);
        let id = detector.add_listener(move |_| *counter.borrow_mut() += 1);

        assert!(detector.remove_listener(id));
        assert!(!detector.remove_listener(id));
        detector.trigger_beat(0.0, 0.0);
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn probe_selects_mode_from_energy() {
        let mut detector = detector();
        let mut source = ScriptedSource::playing();
        source.time = 1.0;

        assert_eq!(detector.probe_source(&mut source), DetectionMode::FallbackTimer);

        source.energy = 0.5;
        assert_eq!(detector.probe_source(&mut source), DetectionMode::Spectral);

        source.fail = true;
        assert_eq!(detector.probe_source(&mut source), DetectionMode::FallbackTimer);
    }
}
