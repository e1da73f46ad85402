use std::{collections::VecDeque, f32::consts::PI, fmt, ops::Range, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{BeatSyncError, Result};

/// Read-only view of the media playback clock.
pub trait MediaClock {
    /// Current playback position in seconds.
    fn playback_time(&self) -> f32;
    fn is_playing(&self) -> bool;
}

/// Supplier of magnitude-spectrum snapshots for the audio currently playing.
pub trait SpectrumSource: MediaClock {
    /// Returns `window_size` magnitude bins for the most recent audio.
    ///
    /// [`BeatSyncError::SourceUnavailable`] means the source cannot answer
    /// right now (paused, decoder not primed); callers treat it as a skip.
    fn spectrum(&mut self, window_size: usize, window: WindowFunction) -> Result<AudioFrame>;

    /// Linear output volume used for mute detection.
    fn output_volume(&self) -> f32 {
        1.0
    }
}

/// Window applied to the samples before the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowFunction {
    Rectangular,
    Hann,
    BlackmanHarris,
}

impl WindowFunction {
    pub fn coefficient(self, index: usize, len: usize) -> f32 {
        if len <= 1 {
            return 1.0;
        }

        let phase = (2.0 * PI * index as f32) / (len as f32 - 1.0);
        match self {
            WindowFunction::Rectangular => 1.0,
            WindowFunction::Hann => 0.5 - 0.5 * phase.cos(),
            WindowFunction::BlackmanHarris => {
                0.35875 - 0.48829 * phase.cos() + 0.14128 * (2.0 * phase).cos()
                    - 0.01168 * (3.0 * phase).cos()
            }
        }
    }
}

/// One magnitude-spectrum snapshot. Transient: rebuilt every sampling tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioFrame {
    /// Playback time the snapshot was taken at.
    pub time: f32,
    pub bins: Vec<f32>,
}

impl AudioFrame {
    pub fn new(time: f32, bins: Vec<f32>) -> Self {
        Self { time, bins }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Sum of magnitudes over `range`, clipped to the available bins.
    pub fn band_energy(&self, range: Range<usize>) -> f32 {
        let end = range.end.min(self.bins.len());
        let start = range.start.min(end);
        self.bins[start..end].iter().sum()
    }
}

/// Spectrum source fed with decoded mono PCM blocks.
///
/// Playback time advances with every pushed block, so the clock follows the
/// decoder rather than the wall clock.
pub struct SampleSpectrumSource {
    sample_rate: u32,
    history: VecDeque<f32>,
    capacity: usize,
    processed_samples: u64,
    playing: bool,
    volume: f32,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl SampleSpectrumSource {
    /// Keeps enough history for a 2048-point transform.
    pub fn new(sample_rate: u32) -> Self {
        Self::with_capacity(sample_rate, 4096)
    }

    pub fn with_capacity(sample_rate: u32, capacity: usize) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
            processed_samples: 0,
            playing: false,
            volume: 1.0,
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    /// Stops playback and rewinds to the start, dropping buffered audio.
    pub fn stop(&mut self) {
        self.playing = false;
        self.processed_samples = 0;
        self.history.clear();
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.max(0.0);
    }

    /// Appends decoded samples and advances the playback clock. Ignored while
    /// paused.
    pub fn push_samples(&mut self, samples: &[f32]) {
        if !self.playing {
            return;
        }

        for sample in samples {
            if self.history.len() == self.capacity {
                self.history.pop_front();
            }
            self.history.push_back(*sample);
        }
        self.processed_samples += samples.len() as u64;
    }

    pub fn buffered_samples(&self) -> usize {
        self.history.len()
    }
}

impl MediaClock for SampleSpectrumSource {
    fn playback_time(&self) -> f32 {
        (self.processed_samples as f64 / self.sample_rate as f64) as f32
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

impl SpectrumSource for SampleSpectrumSource {
    fn spectrum(&mut self, window_size: usize, window: WindowFunction) -> Result<AudioFrame> {
        if !self.playing {
            return Err(BeatSyncError::SourceUnavailable("playback is paused"));
        }
        if window_size == 0 {
            return Err(BeatSyncError::SourceUnavailable("empty analysis window"));
        }

        let size = window_size * 2;
        if self.history.len() < size {
            return Err(BeatSyncError::SourceUnavailable("decoder buffer not primed"));
        }

        let fft = prepare_fft(&mut self.fft_planner, &mut self.fft, size);
        let offset = self.history.len() - size;
        for (index, sample) in self.history.range(offset..).enumerate() {
            fft.input[index] = *sample * window.coefficient(index, size);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let scale = 2.0 / size as f32;
        let bins = fft
            .spectrum
            .iter()
            .take(window_size)
            .map(|bin| bin.norm() * scale)
            .collect();

        Ok(AudioFrame::new(self.playback_time(), bins))
    }

    fn output_volume(&self) -> f32 {
        self.volume
    }
}

impl fmt::Debug for SampleSpectrumSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleSpectrumSource")
            .field("sample_rate", &self.sample_rate)
            .field("buffered", &self.history.len())
            .field("processed_samples", &self.processed_samples)
            .field("playing", &self.playing)
            .field("volume", &self.volume)
            .field("fft", &self.fft)
            .finish()
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl FftResources {
    fn plan(planner: &mut RealFftPlanner<f32>, size: usize) -> Self {
        let plan = planner.plan_fft_forward(size);
        Self {
            size,
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        }
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn prepare_fft<'a>(
    planner: &mut RealFftPlanner<f32>,
    slot: &'a mut Option<FftResources>,
    size: usize,
) -> &'a mut FftResources {
    if slot.as_ref().map(|fft| fft.size != size).unwrap_or(true) {
        *slot = None;
    }
    slot.get_or_insert_with(|| FftResources::plan(planner, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn reports_unavailable_until_primed() {
        let mut source = SampleSpectrumSource::new(48_000);
        source.play();
        source.push_samples(&[0.5; 100]);

        let err = source.spectrum(512, WindowFunction::Hann).unwrap_err();
        assert!(matches!(err, BeatSyncError::SourceUnavailable(_)));
    }

    #[test]
    fn paused_source_is_unavailable_and_frozen() {
        let mut source = SampleSpectrumSource::new(1_000);
        source.push_samples(&[1.0; 500]);
        assert_eq!(source.playback_time(), 0.0);
        assert!(source.spectrum(16, WindowFunction::Rectangular).is_err());
    }

    #[test]
    fn clock_follows_pushed_samples() {
        let mut source = SampleSpectrumSource::new(1_000);
        source.play();
        source.push_samples(&[0.0; 250]);
        source.push_samples(&[0.0; 250]);
        assert!((source.playback_time() - 0.5).abs() < 1e-6);

        source.stop();
        assert_eq!(source.playback_time(), 0.0);
        assert_eq!(source.buffered_samples(), 0);
    }

    #[test]
    fn low_tone_concentrates_in_bass_bins() {
        let sample_rate = 48_000;
        let mut source = SampleSpectrumSource::new(sample_rate);
        source.play();
        source.push_samples(&sine(70.0, sample_rate, 4096));

        let frame = source
            .spectrum(1024, WindowFunction::BlackmanHarris)
            .unwrap();
        assert_eq!(frame.len(), 1024);

        let bass = frame.band_energy(1..20);
        let treble = frame.band_energy(200..1024);
        assert!(bass > 0.1, "bass energy {bass}");
        assert!(bass > treble * 10.0);
    }

    #[test]
    fn silence_has_no_energy() {
        let mut source = SampleSpectrumSource::new(48_000);
        source.play();
        source.push_samples(&vec![0.0; 2048]);
        let frame = source.spectrum(512, WindowFunction::Rectangular).unwrap();
        assert_eq!(frame.band_energy(1..10), 0.0);
    }

    #[test]
    fn band_energy_clips_to_available_bins() {
        let frame = AudioFrame::new(0.0, vec![1.0, 2.0, 3.0]);
        assert_eq!(frame.band_energy(1..50), 5.0);
        assert_eq!(frame.band_energy(10..50), 0.0);
    }

    #[test]
    fn window_edges_taper() {
        assert_eq!(WindowFunction::Rectangular.coefficient(0, 8), 1.0);
        assert!(WindowFunction::Hann.coefficient(0, 8).abs() < 1e-6);
        assert!(WindowFunction::BlackmanHarris.coefficient(0, 8) < 1e-3);
    }
}
