use std::{cell::Cell, rc::Rc};

use serde::{Deserialize, Serialize};

use crate::{BeatSyncError, Result};

/// Shared "capture in progress" marker. While raised, the beat detector
/// leaves the spectrum source alone.
#[derive(Debug, Clone, Default)]
pub struct CaptureFlag(Rc<Cell<bool>>);

impl CaptureFlag {
    pub fn raise(&self) {
        self.0.set(true);
    }

    pub fn lower(&self) {
        self.0.set(false);
    }

    pub fn is_active(&self) -> bool {
        self.0.get()
    }
}

/// Configuration options for the recording subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    pub output_path: String,
    pub fps: u32,
    pub bitrate: Option<u32>,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            output_path: String::new(),
            fps: 60,
            bitrate: None,
        }
    }
}

/// Export capture session. Owns the capture flag and counts frames handed
/// to the encoder.
#[derive(Debug, Default)]
pub struct Recorder {
    settings: RecordingSettings,
    capture: CaptureFlag,
    started_at: Option<f32>,
    frames_captured: u64,
}

impl Recorder {
    pub fn new(settings: RecordingSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn settings(&self) -> &RecordingSettings {
        &self.settings
    }

    /// Flag to hand to every component that must yield while capturing.
    pub fn capture_flag(&self) -> CaptureFlag {
        self.capture.clone()
    }

    pub fn start(&mut self, now: f32) -> Result<()> {
        if self.started_at.is_some() {
            return Err(BeatSyncError::msg("recording already in progress"));
        }
        if self.settings.fps == 0 {
            return Err(BeatSyncError::invalid_config(
                "recording.fps",
                "must be greater than zero",
            ));
        }
        if self.settings.bitrate == Some(0) {
            return Err(BeatSyncError::invalid_config(
                "recording.bitrate",
                "must be greater than zero when set",
            ));
        }

        self.started_at = Some(now);
        self.frames_captured = 0;
        self.capture.raise();
        tracing::info!(
            output = %self.settings.output_path,
            fps = self.settings.fps,
            bitrate = ?self.settings.bitrate,
            "recording started"
        );
        Ok(())
    }

    /// Ends the capture and returns its length in seconds.
    pub fn stop(&mut self, now: f32) -> Result<f32> {
        let started_at = self
            .started_at
            .take()
            .ok_or_else(|| BeatSyncError::msg("no recording in progress"))?;
        self.capture.lower();

        let duration = (now - started_at).max(0.0);
        tracing::info!(duration, frames = self.frames_captured, "recording stopped");
        Ok(duration)
    }

    /// Counts one rendered frame while recording. Returns whether it was taken.
    pub fn capture_frame(&mut self) -> bool {
        if self.started_at.is_none() {
            return false;
        }
        self.frames_captured += 1;
        true
    }

    pub fn is_recording(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_flag_follows_recording() {
        let mut recorder = Recorder::new(RecordingSettings::default());
        let flag = recorder.capture_flag();
        assert!(!flag.is_active());

        recorder.start(1.0).unwrap();
        assert!(flag.is_active());
        assert!(recorder.capture_frame());

        let duration = recorder.stop(4.5).unwrap();
        assert_eq!(duration, 3.5);
        assert!(!flag.is_active());
        assert_eq!(recorder.frames_captured(), 1);
        assert!(!recorder.capture_frame());
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut recorder = Recorder::new(RecordingSettings::default());
        recorder.start(0.0).unwrap();
        assert!(recorder.start(1.0).is_err());
    }

    #[test]
    fn stop_without_start_is_rejected() {
        let mut recorder = Recorder::new(RecordingSettings::default());
        assert!(recorder.stop(1.0).is_err());
    }

    #[test]
    fn zero_fps_is_invalid() {
        let mut recorder = Recorder::new(RecordingSettings {
            fps: 0,
            ..RecordingSettings::default()
        });
        let err = recorder.start(0.0).unwrap_err();
        assert!(matches!(err, BeatSyncError::InvalidConfig { .. }));
        assert!(!recorder.capture_flag().is_active());
    }

    #[test]
    fn zero_bitrate_is_invalid() {
        let mut recorder = Recorder::new(RecordingSettings {
            bitrate: Some(0),
            ..RecordingSettings::default()
        });
        assert!(recorder.start(0.0).is_err());

        let mut recorder = Recorder::new(RecordingSettings {
            bitrate: Some(8_000_000),
            ..RecordingSettings::default()
        });
        recorder.start(0.0).unwrap();
        assert_eq!(recorder.settings().bitrate, Some(8_000_000));
    }
}
