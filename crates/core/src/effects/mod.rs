use std::{cell::Cell, collections::BTreeMap, fmt, rc::Rc, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{BeatSyncError, Result};

/// Static cost classification used to weight effect selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EffectTier {
    Light,
    Medium,
    Heavy,
}

/// Closed set of effect identities the scheduler knows how to pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EffectKind {
    Zoom,
    Shake,
    Rotate,
    #[serde(rename = "MaterialRGB")]
    MaterialRgb,
    MaterialColor,
    Vignette,
    ShadowMidtone,
    Bloom,
    LensDistortion,
    #[serde(rename = "RGB")]
    Rgb,
    Glitch,
}

impl EffectKind {
    pub const ALL: [EffectKind; 11] = [
        EffectKind::Zoom,
        EffectKind::Shake,
        EffectKind::Rotate,
        EffectKind::MaterialRgb,
        EffectKind::MaterialColor,
        EffectKind::Vignette,
        EffectKind::ShadowMidtone,
        EffectKind::Bloom,
        EffectKind::LensDistortion,
        EffectKind::Rgb,
        EffectKind::Glitch,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EffectKind::Zoom => "Zoom",
            EffectKind::Shake => "Shake",
            EffectKind::Rotate => "Rotate",
            EffectKind::MaterialRgb => "MaterialRGB",
            EffectKind::MaterialColor => "MaterialColor",
            EffectKind::Vignette => "Vignette",
            EffectKind::ShadowMidtone => "ShadowMidtone",
            EffectKind::Bloom => "Bloom",
            EffectKind::LensDistortion => "LensDistortion",
            EffectKind::Rgb => "RGB",
            EffectKind::Glitch => "Glitch",
        }
    }

    /// Built-in cost tier, used when configuration does not override it.
    pub fn default_tier(self) -> EffectTier {
        match self {
            EffectKind::Zoom
            | EffectKind::Shake
            | EffectKind::Rotate
            | EffectKind::MaterialRgb
            | EffectKind::MaterialColor => EffectTier::Light,
            EffectKind::Vignette | EffectKind::ShadowMidtone => EffectTier::Medium,
            EffectKind::Bloom | EffectKind::LensDistortion | EffectKind::Rgb | EffectKind::Glitch => {
                EffectTier::Heavy
            }
        }
    }

    /// Cheaper variant that replaces this effect in the selection pools when
    /// both are registered.
    pub fn superseded_by(self) -> Option<EffectKind> {
        match self {
            EffectKind::MaterialColor | EffectKind::Rgb => Some(EffectKind::MaterialRgb),
            _ => None,
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EffectKind {
    type Err = BeatSyncError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        EffectKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| BeatSyncError::UnknownEffect(trimmed.to_string()))
    }
}

/// Toggle contract every effect sink implements. The scheduler never looks
/// past it.
pub trait EffectSink {
    fn is_active(&self) -> bool;
    fn set_active(&mut self, active: bool);
}

/// In-memory sink that only tracks its flag and how often it was switched on.
/// Clones share state, so one clone can be handed to the registry while the
/// other is kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct ToggleSink {
    active: Rc<Cell<bool>>,
    activations: Rc<Cell<u32>>,
}

impl ToggleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activations(&self) -> u32 {
        self.activations.get()
    }
}

impl EffectSink for ToggleSink {
    fn is_active(&self) -> bool {
        self.active.get()
    }

    fn set_active(&mut self, active: bool) {
        if active && !self.active.get() {
            self.activations.set(self.activations.get() + 1);
        }
        self.active.set(active);
    }
}

/// Per-effect metadata bound to its sink. Built once when the registry is
/// assembled.
pub struct EffectDescriptor {
    kind: EffectKind,
    tier: EffectTier,
    sink: Box<dyn EffectSink>,
}

impl EffectDescriptor {
    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    pub fn tier(&self) -> EffectTier {
        self.tier
    }

    pub fn is_active(&self) -> bool {
        self.sink.is_active()
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.sink.set_active(active);
    }
}

impl fmt::Debug for EffectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectDescriptor")
            .field("kind", &self.kind)
            .field("tier", &self.tier)
            .field("active", &self.sink.is_active())
            .finish()
    }
}

/// Registered effects partitioned into tier pools.
#[derive(Debug, Default)]
pub struct EffectRegistry {
    effects: Vec<EffectDescriptor>,
    light: Vec<EffectKind>,
    medium: Vec<EffectKind>,
    heavy: Vec<EffectKind>,
    union: Vec<EffectKind>,
}

impl EffectRegistry {
    /// Builds the registry from the connected sinks. Tiers come from `tiers`
    /// when listed there, otherwise from [`EffectKind::default_tier`]. A kind
    /// registered twice keeps its first sink.
    pub fn new(
        sinks: Vec<(EffectKind, Box<dyn EffectSink>)>,
        tiers: &BTreeMap<EffectKind, EffectTier>,
    ) -> Self {
        let mut effects: Vec<EffectDescriptor> = Vec::with_capacity(sinks.len());
        for (kind, sink) in sinks {
            if effects.iter().any(|existing| existing.kind == kind) {
                tracing::warn!(effect = %kind, "effect registered twice, keeping the first sink");
                continue;
            }
            let tier = tiers.get(&kind).copied().unwrap_or_else(|| kind.default_tier());
            effects.push(EffectDescriptor { kind, tier, sink });
        }

        let mut registry = Self {
            effects,
            ..Default::default()
        };
        registry.build_pools();
        registry
    }

    fn build_pools(&mut self) {
        for descriptor in &self.effects {
            let superseded = descriptor
                .kind
                .superseded_by()
                .map(|preferred| self.effects.iter().any(|other| other.kind == preferred))
                .unwrap_or(false);
            if superseded {
                continue;
            }

            match descriptor.tier {
                EffectTier::Light => self.light.push(descriptor.kind),
                EffectTier::Medium => self.medium.push(descriptor.kind),
                EffectTier::Heavy => self.heavy.push(descriptor.kind),
            }
            self.union.push(descriptor.kind);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Selectable members of one tier.
    pub fn pool(&self, tier: EffectTier) -> &[EffectKind] {
        match tier {
            EffectTier::Light => &self.light,
            EffectTier::Medium => &self.medium,
            EffectTier::Heavy => &self.heavy,
        }
    }

    /// Every selectable effect across all tiers.
    pub fn union(&self) -> &[EffectKind] {
        &self.union
    }

    pub fn contains(&self, kind: EffectKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn tier_of(&self, kind: EffectKind) -> Option<EffectTier> {
        self.get(kind).map(EffectDescriptor::tier)
    }

    pub fn get(&self, kind: EffectKind) -> Option<&EffectDescriptor> {
        self.effects.iter().find(|descriptor| descriptor.kind == kind)
    }

    pub(crate) fn get_mut(&mut self, kind: EffectKind) -> Option<&mut EffectDescriptor> {
        self.effects
            .iter_mut()
            .find(|descriptor| descriptor.kind == kind)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &EffectDescriptor> {
        self.effects.iter()
    }

    pub(crate) fn descriptors_mut(&mut self) -> impl Iterator<Item = &mut EffectDescriptor> {
        self.effects.iter_mut()
    }
}
