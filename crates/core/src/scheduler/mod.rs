use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc};

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    BeatEvent, DeferredQueue, EffectKind, EffectRegistry, EffectTier, EffectTimeline,
    HeadroomSignal, MediaClock, SchedulerConfig, TierWeights, TimelineReplay,
};

/// Scheduler shared between the session and the detector's beat listener.
pub type SharedScheduler = Rc<RefCell<EffectScheduler>>;

#[derive(Debug, Clone, Copy, PartialEq)]
struct PulseRelease {
    effect: EffectKind,
    generation: u64,
}

/// Picks one effect per beat and pulses it for a bounded duration.
///
/// Selection favours cheap effects and only reaches into the heavy pool
/// while the headroom signal allows it. Pulses end through the deferred
/// queue polled from [`EffectScheduler::tick`]; every pulse carries a
/// generation so a release cancelled by [`EffectScheduler::stop_all`] can
/// never switch a later pulse off.
pub struct EffectScheduler {
    config: SchedulerConfig,
    registry: EffectRegistry,
    headroom: Box<dyn HeadroomSignal>,
    rng: StdRng,
    releases: DeferredQueue<PulseRelease>,
    in_flight: HashMap<EffectKind, u64>,
    next_generation: u64,
    pulse_duration: f32,
    active_effect: Option<EffectKind>,
    last_switch: Option<f32>,
    pinned: Option<EffectKind>,
    auto_mode: bool,
    media_playing: bool,
    warm_until: Option<f32>,
    timeline: EffectTimeline,
    replay: Option<TimelineReplay>,
    replay_saw_playback: bool,
}

impl EffectScheduler {
    pub fn new(
        config: SchedulerConfig,
        registry: EffectRegistry,
        headroom: impl HeadroomSignal + 'static,
    ) -> Self {
        if registry.is_empty() {
            tracing::warn!("no effects registered, beats will not trigger anything");
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let pulse_duration = config.pulse_duration;

        Self {
            config,
            registry,
            headroom: Box::new(headroom),
            rng,
            releases: DeferredQueue::new(),
            in_flight: HashMap::new(),
            next_generation: 0,
            pulse_duration,
            active_effect: None,
            last_switch: None,
            pinned: None,
            auto_mode: true,
            media_playing: false,
            warm_until: None,
            timeline: EffectTimeline::new(),
            replay: None,
            replay_saw_playback: false,
        }
    }

    pub fn into_shared(self) -> SharedScheduler {
        Rc::new(RefCell::new(self))
    }

    /// Reacts to one detected beat. Returns the effect that was triggered.
    pub fn on_beat(&mut self, event: &BeatEvent) -> Option<EffectKind> {
        if self.replay.is_some() {
            return None;
        }
        if !self.auto_mode || self.registry.is_empty() || !self.media_playing {
            return None;
        }
        if self.warm_until.map(|until| event.time < until).unwrap_or(false) {
            tracing::trace!(time = event.time, "beat ignored during warm-up");
            return None;
        }
        self.warm_until = None;

        let effect = match self.pinned {
            Some(pinned) => {
                if self.active_effect != Some(pinned) {
                    self.switch_to(pinned, event);
                }
                pinned
            }
            None => self.select(event)?,
        };

        self.trigger(effect, event.time);
        Some(effect)
    }

    fn select(&mut self, event: &BeatEvent) -> Option<EffectKind> {
        let allow_heavy = self.headroom.heavy_effects_allowed();
        let weights = match self.active_effect {
            None => self.config.first_beat_weights,
            Some(current) => {
                let due = self
                    .last_switch
                    .map(|last| event.time - last >= self.config.min_switch_interval)
                    .unwrap_or(true);
                if !due {
                    return Some(current);
                }
                if allow_heavy {
                    self.config.weights
                } else {
                    self.config.constrained_weights
                }
            }
        };

        let draw: f32 = self.rng.random();
        let tier = pick_tier(draw, &weights, allow_heavy);
        let Some(effect) = self.pick_from(tier, allow_heavy) else {
            tracing::debug!(?tier, "no selectable effect for this beat");
            return self.active_effect;
        };

        self.switch_to(effect, event);
        Some(effect)
    }

    fn pick_from(&mut self, tier: EffectTier, allow_heavy: bool) -> Option<EffectKind> {
        let pool = self.registry.pool(tier);
        if !pool.is_empty() {
            let index = self.rng.random_range(0..pool.len());
            return Some(pool[index]);
        }

        let candidates: Vec<EffectKind> = self
            .registry
            .union()
            .iter()
            .copied()
            .filter(|kind| allow_heavy || self.registry.tier_of(*kind) != Some(EffectTier::Heavy))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let index = self.rng.random_range(0..candidates.len());
        Some(candidates[index])
    }

    fn switch_to(&mut self, effect: EffectKind, event: &BeatEvent) {
        let changed = self.active_effect != Some(effect);
        self.active_effect = Some(effect);
        self.last_switch = Some(event.time);
        if changed {
            tracing::debug!(%effect, media_time = event.media_time, "effect selection switched");
            if self.media_playing {
                self.timeline.record(event.media_time, effect);
            }
        }
    }

    /// Pulses `effect` until `now + pulse_duration`. Does nothing when the
    /// effect is unknown or already mid-pulse.
    pub fn trigger(&mut self, effect: EffectKind, now: f32) -> bool {
        if self.in_flight.contains_key(&effect) {
            return false;
        }
        let Some(descriptor) = self.registry.get_mut(effect) else {
            return false;
        };
        if descriptor.is_active() {
            return false;
        }

        descriptor.set_active(true);
        let generation = self.next_generation;
        self.next_generation += 1;
        self.in_flight.insert(effect, generation);
        self.releases.schedule(
            now + self.pulse_duration,
            PulseRelease { effect, generation },
        );
        tracing::debug!(%effect, now, "effect pulse started");
        true
    }

    /// Ends due pulses and drives timeline replay from the media clock.
    pub fn tick(&mut self, now: f32, clock: &dyn MediaClock) {
        while let Some(release) = self.releases.pop_due(now) {
            self.release(release);
        }

        if self.replay.is_none() {
            return;
        }
        if !clock.is_playing() {
            if self.replay_saw_playback {
                self.end_replay();
            }
            return;
        }

        self.replay_saw_playback = true;
        let effect = self
            .replay
            .as_mut()
            .and_then(|replay| replay.advance(clock.playback_time()));
        if let Some(effect) = effect {
            self.active_effect = Some(effect);
            self.trigger(effect, now);
        }
    }

    fn release(&mut self, release: PulseRelease) {
        if self.in_flight.get(&release.effect) != Some(&release.generation) {
            return;
        }
        self.in_flight.remove(&release.effect);
        if let Some(descriptor) = self.registry.get_mut(release.effect) {
            descriptor.set_active(false);
        }
    }

    /// Cancels every pending release and switches every effect off. The next
    /// beat picks with the first-beat weights.
    pub fn stop_all(&mut self) {
        let cancelled = self.releases.cancel_all();
        self.in_flight.clear();
        self.active_effect = None;
        self.last_switch = None;
        for descriptor in self.registry.descriptors_mut() {
            descriptor.set_active(false);
        }
        tracing::debug!(cancelled, "stopped all effects");
    }

    pub fn set_auto_mode(&mut self, enabled: bool) {
        if self.auto_mode != enabled {
            tracing::info!(enabled, "auto mode changed");
            self.stop_all();
        }
        self.auto_mode = enabled;
    }

    pub fn toggle_auto_mode(&mut self) -> bool {
        self.set_auto_mode(!self.auto_mode);
        self.auto_mode
    }

    /// Restricts every beat to one effect, or restores weighted selection
    /// with `None`. Unregistered effects are refused.
    pub fn pin_single_effect(&mut self, effect: Option<EffectKind>) -> bool {
        if let Some(kind) = effect {
            if !self.registry.contains(kind) {
                tracing::warn!(effect = %kind, "cannot pin an unregistered effect");
                return false;
            }
        }
        if self.pinned != effect {
            self.stop_all();
        }
        self.pinned = effect;
        true
    }

    /// Starts replaying a recorded timeline in place of live beats. Returns
    /// `false` for an empty timeline.
    pub fn replay_timeline(&mut self, timeline: EffectTimeline) -> bool {
        if timeline.is_empty() {
            tracing::warn!("refusing to replay an empty timeline");
            return false;
        }

        self.stop_all();
        tracing::info!(selections = timeline.len(), "timeline replay started");
        self.replay = Some(TimelineReplay::new(
            timeline,
            self.config.replay_trigger_interval,
        ));
        self.replay_saw_playback = false;
        self.pulse_duration = self.config.pulse_duration * self.config.replay_pulse_scale;
        true
    }

    /// Leaves replay mode and restores the live pulse duration. No-op when
    /// no replay is running.
    pub fn end_replay(&mut self) {
        if self.replay.is_none() {
            return;
        }
        self.replay = None;
        self.replay_saw_playback = false;
        self.pulse_duration = self.config.pulse_duration;
        self.stop_all();
        tracing::info!("timeline replay finished");
    }

    /// New media began playing at `now`. Clears the recorded timeline and
    /// starts the warm-up delay.
    pub fn media_started(&mut self, now: f32) {
        self.stop_all();
        self.media_playing = true;
        self.warm_until = Some(now + self.config.warmup_delay);
        if self.replay.is_none() {
            self.timeline.clear();
        }
    }

    pub fn media_ended(&mut self) {
        self.media_playing = false;
        self.end_replay();
        self.stop_all();
    }

    pub fn skip_warmup(&mut self) {
        self.warm_until = None;
    }

    pub fn registry(&self) -> &EffectRegistry {
        &self.registry
    }

    pub fn timeline(&self) -> &EffectTimeline {
        &self.timeline
    }

    pub fn take_timeline(&mut self) -> EffectTimeline {
        std::mem::take(&mut self.timeline)
    }

    pub fn active_effect(&self) -> Option<EffectKind> {
        self.active_effect
    }

    pub fn pinned_effect(&self) -> Option<EffectKind> {
        self.pinned
    }

    pub fn is_auto_mode(&self) -> bool {
        self.auto_mode
    }

    pub fn is_replaying(&self) -> bool {
        self.replay.is_some()
    }

    pub fn is_media_playing(&self) -> bool {
        self.media_playing
    }

    pub fn pulse_duration(&self) -> f32 {
        self.pulse_duration
    }

    pub fn pending_releases(&self) -> usize {
        self.releases.len()
    }

    pub fn is_pulsing(&self, effect: EffectKind) -> bool {
        self.in_flight.contains_key(&effect)
    }
}

impl fmt::Debug for EffectScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScheduler")
            .field("registry", &self.registry)
            .field("active_effect", &self.active_effect)
            .field("pinned", &self.pinned)
            .field("auto_mode", &self.auto_mode)
            .field("media_playing", &self.media_playing)
            .field("in_flight", &self.in_flight)
            .field("replaying", &self.replay.is_some())
            .finish()
    }
}

/// Maps a uniform draw in `[0, 1)` onto a tier. Without headroom the heavy
/// share is folded into the medium tier so heavy can never come out.
pub fn pick_tier(draw: f32, weights: &TierWeights, allow_heavy: bool) -> EffectTier {
    let (heavy, medium) = if allow_heavy {
        (weights.heavy, weights.medium)
    } else {
        (0.0, weights.medium + weights.heavy)
    };
    let total = heavy + medium + weights.light;
    if total <= 0.0 {
        return EffectTier::Light;
    }

    let scaled = draw.clamp(0.0, 1.0) * total;
    if scaled < heavy {
        EffectTier::Heavy
    } else if scaled < heavy + medium {
        EffectTier::Medium
    } else {
        EffectTier::Light
    }
}
