use std::rc::Rc;

use crate::{
    AppConfig, BeatDetector, BeatEvent, BeatSyncError, DetectionMode, EffectKind, EffectRegistry,
    EffectScheduler, EffectSink, EffectTimeline, ListenerId, PerformanceHandle,
    PerformanceMonitor, Recorder, Result, SharedScheduler, SpectrumSource,
};

/// Explicitly wired detector, monitor, scheduler and recorder around one
/// spectrum source. The host calls [`Session::tick`] once per rendered frame.
#[derive(Debug)]
pub struct Session<S: SpectrumSource> {
    source: S,
    detector: BeatDetector,
    monitor: PerformanceHandle,
    scheduler: SharedScheduler,
    recorder: Recorder,
    scheduler_listener: ListenerId,
}

impl<S: SpectrumSource> Session<S> {
    pub fn new(
        config: &AppConfig,
        source: S,
        sinks: Vec<(EffectKind, Box<dyn EffectSink>)>,
    ) -> Self {
        let recorder = Recorder::new(config.recording.clone());
        let mut detector = BeatDetector::new(config.detection.clone(), recorder.capture_flag());
        let monitor = PerformanceHandle::new(PerformanceMonitor::new(config.performance.clone()));

        let registry = EffectRegistry::new(sinks, &config.scheduler.tiers);
        let scheduler =
            EffectScheduler::new(config.scheduler.clone(), registry, monitor.clone()).into_shared();

        let listener = Rc::clone(&scheduler);
        let scheduler_listener = detector.add_listener(move |beat| {
            match listener.try_borrow_mut() {
                Ok(mut scheduler) => {
                    scheduler.on_beat(beat);
                }
                Err(_) => tracing::warn!("scheduler busy, beat dropped"),
            }
        });

        tracing::info!(
            profile = ?config.profile,
            effects = scheduler.borrow().registry().len(),
            "session ready"
        );

        Self {
            source,
            detector,
            monitor,
            scheduler,
            recorder,
            scheduler_listener,
        }
    }

    /// One cooperative step: frame statistics, detection (beat listeners run
    /// inside it), then pulse releases and timeline replay.
    pub fn tick(&mut self, now: f32, frame_delta: f32) -> Option<BeatEvent> {
        self.monitor.record_frame(frame_delta);
        self.recorder.capture_frame();

        let beat = self.detector.update(now, &mut self.source);
        self.scheduler.borrow_mut().tick(now, &self.source);
        beat
    }

    pub fn media_started(&mut self, now: f32) {
        self.detector.reset_for_new_media();
        self.scheduler.borrow_mut().media_started(now);
        tracing::info!(media_time = self.source.playback_time(), "media started");
    }

    pub fn media_ended(&mut self) {
        self.scheduler.borrow_mut().media_ended();
        self.detector.reset_for_new_media();
        tracing::info!("media ended");
    }

    /// Decides between spectral analysis and the fallback timer for the
    /// media currently loaded.
    pub fn probe_analysis(&mut self) -> DetectionMode {
        self.detector.probe_source(&mut self.source)
    }

    /// Broadcasts a manual full-strength beat.
    pub fn trigger_beat(&mut self, now: f32) -> BeatEvent {
        let media_time = self.source.playback_time();
        self.detector.trigger_beat(now, media_time)
    }

    /// Starts an export capture that replays `timeline` instead of reacting
    /// to live beats. The detector stays off the source until
    /// [`Session::finish_export`].
    pub fn start_export(&mut self, now: f32, timeline: EffectTimeline) -> Result<()> {
        if timeline.is_empty() {
            return Err(BeatSyncError::msg("cannot export an empty timeline"));
        }

        self.recorder.start(now)?;
        let mut scheduler = self.scheduler.borrow_mut();
        scheduler.skip_warmup();
        scheduler.replay_timeline(timeline);
        Ok(())
    }

    /// Ends the export capture. Returns its length in seconds.
    pub fn finish_export(&mut self, now: f32) -> Result<f32> {
        let duration = self.recorder.stop(now)?;
        let mut scheduler = self.scheduler.borrow_mut();
        scheduler.end_replay();
        scheduler.stop_all();
        Ok(duration)
    }

    /// Selections recorded during live playback so far.
    pub fn recorded_timeline(&self) -> EffectTimeline {
        self.scheduler.borrow().timeline().clone()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn detector(&self) -> &BeatDetector {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut BeatDetector {
        &mut self.detector
    }

    pub fn scheduler(&self) -> &SharedScheduler {
        &self.scheduler
    }

    pub fn monitor(&self) -> &PerformanceHandle {
        &self.monitor
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn into_source(mut self) -> S {
        self.detector.remove_listener(self.scheduler_listener);
        self.source
    }
}
