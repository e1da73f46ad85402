use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{EffectKind, Result};

/// One effect choice at a point of media time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectSelection {
    pub time_seconds: f32,
    pub effect: EffectKind,
}

impl EffectSelection {
    pub fn new(time_seconds: f32, effect: EffectKind) -> Self {
        Self {
            time_seconds,
            effect,
        }
    }
}

/// Ordered record of the effect selections made during playback. Serialises
/// as a plain JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectTimeline {
    selections: Vec<EffectSelection>,
}

impl EffectTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a timeline from selections in any order.
    pub fn from_selections(mut selections: Vec<EffectSelection>) -> Self {
        selections.sort_by(|a, b| a.time_seconds.total_cmp(&b.time_seconds));
        Self { selections }
    }

    /// Appends a selection. A selection earlier than the last one (after a
    /// seek) is inserted at its ordered position.
    pub fn record(&mut self, time_seconds: f32, effect: EffectKind) {
        let index = self
            .selections
            .partition_point(|selection| selection.time_seconds <= time_seconds);
        self.selections
            .insert(index, EffectSelection::new(time_seconds, effect));
        tracing::trace!(%effect, time_seconds, "recorded effect selection");
    }

    pub fn clear(&mut self) {
        self.selections.clear();
    }

    pub fn selections(&self) -> &[EffectSelection] {
        &self.selections
    }

    pub fn last(&self) -> Option<&EffectSelection> {
        self.selections.last()
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let selections: Vec<EffectSelection> = serde_json::from_str(json)?;
        Ok(Self::from_selections(selections))
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

/// Cursor that walks a recorded timeline against the media clock.
///
/// Each boundary crossed re-targets the held effect and triggers it at once;
/// between boundaries the held effect is re-triggered every
/// `trigger_interval` seconds of media time.
#[derive(Debug, Clone)]
pub struct TimelineReplay {
    selections: Vec<EffectSelection>,
    next: usize,
    current: Option<EffectKind>,
    last_trigger: f32,
    trigger_interval: f32,
}

impl TimelineReplay {
    pub fn new(timeline: EffectTimeline, trigger_interval: f32) -> Self {
        Self {
            selections: timeline.selections,
            next: 0,
            current: None,
            last_trigger: 0.0,
            trigger_interval,
        }
    }

    /// Advances to `media_time` and returns the effect to trigger now, if
    /// any. When several boundaries were crossed at once only the latest
    /// applies.
    pub fn advance(&mut self, media_time: f32) -> Option<EffectKind> {
        let mut crossed = None;
        while let Some(selection) = self.selections.get(self.next) {
            if media_time < selection.time_seconds {
                break;
            }
            crossed = Some(selection.effect);
            self.next += 1;
        }

        if let Some(effect) = crossed {
            self.current = Some(effect);
            self.last_trigger = media_time;
            return Some(effect);
        }

        let effect = self.current?;
        if media_time - self.last_trigger >= self.trigger_interval {
            self.last_trigger = media_time;
            return Some(effect);
        }
        None
    }

    /// Effect currently held between boundaries.
    pub fn current(&self) -> Option<EffectKind> {
        self.current
    }

    /// Boundaries not yet reached.
    pub fn remaining(&self) -> usize {
        self.selections.len() - self.next
    }
}
