use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use serde::{Deserialize, Serialize};

use crate::PerformanceConfig;

/// Coarse throughput classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PerformanceTier {
    Low,
    Medium,
    High,
}

impl PerformanceTier {
    /// Polling interval, in seconds, that latency-insensitive per-frame work
    /// should throttle itself to.
    pub fn recommended_interval(self) -> f32 {
        match self {
            PerformanceTier::Low => 0.15,
            PerformanceTier::Medium => 0.1,
            PerformanceTier::High => 0.033,
        }
    }
}

/// Advisory signal consulted before picking expensive effects.
pub trait HeadroomSignal {
    fn heavy_effects_allowed(&self) -> bool;
}

/// Point-in-time view of the monitor's classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    pub current_fps: f32,
    pub average_fps: f32,
    pub std_dev: f32,
    pub stable: bool,
    pub tier: PerformanceTier,
    pub heavy_effects_allowed: bool,
}

/// Rolling frame-rate statistics. Fed one frame delta at a time; every
/// `update_interval` seconds it closes a measurement window and reclassifies.
/// If frames stop arriving it keeps its last classification.
#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    config: PerformanceConfig,
    frame_count: u32,
    accumulated: f32,
    current_fps: f32,
    average_fps: f32,
    std_dev: f32,
    stable: bool,
    tier: PerformanceTier,
    samples: VecDeque<f32>,
}

impl PerformanceMonitor {
    pub fn new(config: PerformanceConfig) -> Self {
        let capacity = config.sample_capacity;
        Self {
            config,
            frame_count: 0,
            accumulated: 0.0,
            current_fps: 60.0,
            average_fps: 60.0,
            std_dev: 0.0,
            stable: false,
            tier: PerformanceTier::High,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Records one rendered frame that took `delta` seconds. Returns `true`
    /// when this frame closed a measurement window.
    pub fn record_frame(&mut self, delta: f32) -> bool {
        if !delta.is_finite() || delta <= 0.0 {
            return false;
        }

        self.frame_count += 1;
        self.accumulated += delta;
        if self.accumulated < self.config.update_interval {
            return false;
        }

        let fps = self.frame_count as f32 / self.accumulated;
        self.frame_count = 0;
        self.accumulated = 0.0;
        self.push_sample(fps);
        true
    }

    fn push_sample(&mut self, fps: f32) {
        self.current_fps = fps;
        self.samples.push_back(fps);
        while self.samples.len() > self.config.sample_capacity {
            self.samples.pop_front();
        }

        let count = self.samples.len() as f32;
        self.average_fps = self.samples.iter().sum::<f32>() / count;
        let variance = self
            .samples
            .iter()
            .map(|sample| (sample - self.average_fps).powi(2))
            .sum::<f32>()
            / count;
        self.std_dev = variance.sqrt();

        self.stable = self.std_dev < self.config.stable_std_dev
            && self.samples.len() >= self.config.sample_capacity;

        let previous = self.tier;
        self.tier = if self.average_fps >= self.config.high_fps_cutoff {
            PerformanceTier::High
        } else if self.average_fps >= self.config.medium_fps_cutoff {
            PerformanceTier::Medium
        } else {
            PerformanceTier::Low
        };
        if previous != self.tier {
            tracing::debug!(
                from = ?previous,
                to = ?self.tier,
                average_fps = self.average_fps,
                "performance tier changed"
            );
        }
    }

    pub fn current_fps(&self) -> f32 {
        self.current_fps
    }

    pub fn average_fps(&self) -> f32 {
        self.average_fps
    }

    pub fn std_dev(&self) -> f32 {
        self.std_dev
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }

    pub fn tier(&self) -> PerformanceTier {
        self.tier
    }

    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.iter().copied()
    }

    pub fn can_use_heavy_effects(&self) -> bool {
        self.stable && self.average_fps >= self.config.stable_fps_threshold
    }

    pub fn should_use_heavy_effect(&self) -> bool {
        self.can_use_heavy_effects() && self.tier >= PerformanceTier::Medium
    }

    pub fn recommended_update_interval(&self) -> f32 {
        self.tier.recommended_interval()
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            current_fps: self.current_fps,
            average_fps: self.average_fps,
            std_dev: self.std_dev,
            stable: self.stable,
            tier: self.tier,
            heavy_effects_allowed: self.can_use_heavy_effects(),
        }
    }
}

impl HeadroomSignal for PerformanceMonitor {
    fn heavy_effects_allowed(&self) -> bool {
        self.can_use_heavy_effects()
    }
}

/// Shared handle to one monitor. Cloned into every consumer of the advisory
/// signal; all clones observe the same statistics.
#[derive(Debug, Clone)]
pub struct PerformanceHandle {
    shared: Rc<RefCell<PerformanceMonitor>>,
}

impl PerformanceHandle {
    pub fn new(monitor: PerformanceMonitor) -> Self {
        Self {
            shared: Rc::new(RefCell::new(monitor)),
        }
    }

    pub fn record_frame(&self, delta: f32) -> bool {
        self.shared.borrow_mut().record_frame(delta)
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        self.shared.borrow().snapshot()
    }

    pub fn tier(&self) -> PerformanceTier {
        self.shared.borrow().tier()
    }

    pub fn recommended_update_interval(&self) -> f32 {
        self.shared.borrow().recommended_update_interval()
    }
}

impl HeadroomSignal for PerformanceHandle {
    fn heavy_effects_allowed(&self) -> bool {
        self.shared
            .try_borrow()
            .map(|monitor| monitor.can_use_heavy_effects())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> PerformanceMonitor {
        PerformanceMonitor::new(PerformanceConfig::default())
    }

    /// Feeds `seconds` worth of frames at a steady `fps`.
    fn feed(monitor: &mut PerformanceMonitor, fps: f32, seconds: f32) {
        let frames = (fps * seconds).round() as usize;
        for _ in 0..frames {
            monitor.record_frame(1.0 / fps);
        }
    }

    #[test]
    fn steady_high_rate_allows_heavy_effects_once_window_is_full() {
        let mut monitor = monitor();
        feed(&mut monitor, 60.0, 2.0);
        assert!(!monitor.is_stable());
        assert!(!monitor.can_use_heavy_effects());

        feed(&mut monitor, 60.0, 4.0);
        assert!(monitor.is_stable());
        assert!(monitor.can_use_heavy_effects());
        assert!(monitor.should_use_heavy_effect());
        assert_eq!(monitor.tier(), PerformanceTier::High);
        assert!((monitor.average_fps() - 60.0).abs() < 2.0);
    }

    #[test]
    fn jittery_rate_is_not_stable() {
        let mut monitor = monitor();
        for window in 0..12 {
            let fps = if window % 2 == 0 { 30.0 } else { 60.0 };
            feed(&mut monitor, fps, 0.5);
        }

        assert!(monitor.std_dev() > 5.0);
        assert!(!monitor.is_stable());
        assert!(!monitor.can_use_heavy_effects());
    }

    #[test]
    fn slow_but_stable_rate_blocks_heavy_effects() {
        let mut monitor = monitor();
        feed(&mut monitor, 20.0, 6.0);

        assert!(monitor.is_stable());
        assert!(!monitor.can_use_heavy_effects());
        assert_eq!(monitor.tier(), PerformanceTier::Low);
        assert_eq!(monitor.recommended_update_interval(), 0.15);
    }

    #[test]
    fn medium_tier_between_cutoffs() {
        let mut monitor = monitor();
        feed(&mut monitor, 40.0, 6.0);
        assert_eq!(monitor.tier(), PerformanceTier::Medium);
        assert_eq!(monitor.recommended_update_interval(), 0.1);
    }

    #[test]
    fn window_evicts_oldest_samples() {
        let mut monitor = monitor();
        feed(&mut monitor, 20.0, 5.0);
        feed(&mut monitor, 60.0, 10.0);

        assert_eq!(monitor.samples().count(), 10);
        assert!(monitor.samples().all(|fps| fps > 50.0));
        assert!(monitor.can_use_heavy_effects());
    }

    #[test]
    fn invalid_deltas_are_ignored() {
        let mut monitor = monitor();
        assert!(!monitor.record_frame(0.0));
        assert!(!monitor.record_frame(-1.0));
        assert!(!monitor.record_frame(f32::NAN));
        assert_eq!(monitor.samples().count(), 0);
        assert_eq!(monitor.current_fps(), 60.0);
    }

    #[test]
    fn handle_shares_one_monitor() {
        let handle = PerformanceHandle::new(monitor());
        let observer = handle.clone();
        assert!(!observer.heavy_effects_allowed());

        for _ in 0..(60 * 6) {
            handle.record_frame(1.0 / 60.0);
        }

        assert!(observer.heavy_effects_allowed());
        assert_eq!(observer.snapshot().tier, PerformanceTier::High);
    }
}
