//! Core library for beat-synchronised visual effects.
//!
//! The crate turns a media spectrum into beat events and maps those beats
//! onto short pulses of visual effects, weighted by how much rendering
//! headroom the host currently has. Each module owns one subsystem (audio
//! source, beat analysis, performance monitoring, effect scheduling,
//! recording) and [`Session`] wires them together around a single
//! cooperative tick.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod deferred;
pub mod effects;
pub mod error;
pub mod performance;
pub mod record;
pub mod scheduler;
pub mod session;
pub mod timeline;

pub use analysis::{
    beat_strength, BeatDetector, BeatEvent, DetectionMode, EnergyState, ListenerId,
};
pub use audio::{AudioFrame, MediaClock, SampleSpectrumSource, SpectrumSource, WindowFunction};
pub use config::{
    AppConfig, DetectionConfig, DeviceProfile, PerformanceConfig, SchedulerConfig, TierWeights,
};
pub use deferred::{DeferredQueue, TaskId};
pub use effects::{EffectDescriptor, EffectKind, EffectRegistry, EffectSink, EffectTier, ToggleSink};
pub use error::{BeatSyncError, Result};
pub use performance::{
    HeadroomSignal, PerformanceHandle, PerformanceMonitor, PerformanceSnapshot, PerformanceTier,
};
pub use record::{CaptureFlag, Recorder, RecordingSettings};
pub use scheduler::{pick_tier, EffectScheduler, SharedScheduler};
pub use session::Session;
pub use timeline::{EffectSelection, EffectTimeline, TimelineReplay};
