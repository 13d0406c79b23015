//! Sequencer data model: voices, steps, tracks and their cached flags.

use serde::{Deserialize, Serialize};

use super::plock::PlockEntry;
use super::pool::PlockPool;
use super::{SeqError, MAX_PLOCKS_PER_STEP, STEPS_PER_TRACK, VOICES_PER_STEP};

/// Default velocity applied to the first voice when arming a step.
pub const DEFAULT_VELOCITY_PRIMARY: u8 = 100;
/// Default velocity applied to secondary voices.
pub const DEFAULT_VELOCITY_SECONDARY: u8 = 0;

/// Monotonic dirty-tracking counter. Readers compare values to detect
/// mutations; the counter never wraps in practice (u32 at audio-rate bumps
/// outlives the hardware).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Generation(u32);

impl Generation {
    pub fn bump(&mut self) {
        self.0 += 1;
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn has_changed(&self, other: &Generation) -> bool {
        self.0 != other.0
    }
}

/// One monophonic note description within a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice {
    /// MIDI note number (0-127).
    pub note: u8,
    /// MIDI velocity (0-127).
    pub velocity: u8,
    /// Gate length in steps (1-64).
    pub length: u8,
    /// Micro-timing offset (-12..+12).
    pub micro_offset: i8,
    /// Voice produces note data when enabled.
    pub enabled: bool,
}

impl Voice {
    /// Slot default: C4, sixteen steps, disabled; only the primary slot
    /// carries a non-zero default velocity.
    pub fn slot_default(slot: usize) -> Voice {
        Voice {
            note: 60,
            velocity: if slot == 0 {
                DEFAULT_VELOCITY_PRIMARY
            } else {
                DEFAULT_VELOCITY_SECONDARY
            },
            length: 16,
            micro_offset: 0,
            enabled: false,
        }
    }

    /// A voice is playable when enabled with a non-zero velocity.
    pub fn is_playable(&self) -> bool {
        self.enabled && self.velocity > 0
    }
}

/// Aggregate signed offsets applied to all voices of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepOffsets {
    /// Velocity offset (-127..+127).
    pub velocity: i16,
    /// Semitone transpose (-12..+12).
    pub transpose: i8,
    /// Length offset (-32..+32).
    pub length: i8,
    /// Micro-timing offset (-12..+12).
    pub micro: i8,
}

/// Cached step flags, recomputed after every relevant mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepFlags {
    /// At least one voice is playable.
    pub active: bool,
    /// No playable voice, at least one cart p-lock, no internal p-lock.
    pub automation: bool,
}

/// Reference into the p-lock pool: a contiguous (offset, count) range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlockRef {
    pub offset: u16,
    pub count: u8,
}

/// One slot on the pattern grid: four voices, a pool reference, aggregate
/// offsets and the cached flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub voices: [Voice; VOICES_PER_STEP],
    pub plocks: PlockRef,
    pub offsets: StepOffsets,
    flags: StepFlags,
}

impl Default for Step {
    fn default() -> Self {
        let mut step = Step {
            voices: [
                Voice::slot_default(0),
                Voice::slot_default(1),
                Voice::slot_default(2),
                Voice::slot_default(3),
            ],
            plocks: PlockRef::default(),
            offsets: StepOffsets::default(),
            flags: StepFlags::default(),
        };
        step.recompute_flags_voices_only();
        step
    }
}

impl Step {
    /// Reset to the neutral disabled template.
    pub fn init(&mut self) {
        *self = Step::default();
    }

    /// Arm the step with quick-step defaults for `note`: every voice takes
    /// the note, voice 0 becomes playable.
    pub fn init_with_note(&mut self, note: u8) {
        self.make_neutral();
        for voice in &mut self.voices {
            voice.note = note;
        }
        self.plocks = PlockRef::default();
        self.recompute_flags_voices_only();
    }

    /// Turn the step into a neutral playable shell: voice 0 at C4,
    /// length 1, default velocity; other voices muted.
    pub fn make_neutral(&mut self) {
        self.init();
        for (slot, voice) in self.voices.iter_mut().enumerate() {
            voice.note = 60;
            voice.length = 1;
            voice.micro_offset = 0;
            if slot == 0 {
                voice.velocity = DEFAULT_VELOCITY_PRIMARY;
                voice.enabled = true;
            } else {
                voice.velocity = DEFAULT_VELOCITY_SECONDARY;
                voice.enabled = false;
            }
        }
        self.plocks = PlockRef::default();
        self.recompute_flags_voices_only();
    }

    /// Mute every voice, leaving the step as an automation-only carrier.
    pub fn make_automation_only(&mut self, pool: &PlockPool) {
        for voice in &mut self.voices {
            voice.enabled = false;
            voice.velocity = 0;
        }
        self.recompute_flags(pool);
    }

    /// Replace the voice at `index` and refresh the cached flags.
    pub fn set_voice(&mut self, index: usize, voice: &Voice, pool: &PlockPool) -> bool {
        if index >= VOICES_PER_STEP {
            return false;
        }
        self.voices[index] = *voice;
        self.recompute_flags(pool);
        true
    }

    pub fn voice(&self, index: usize) -> Option<&Voice> {
        self.voices.get(index)
    }

    /// Install `entries` as this step's p-locks through the pool.
    ///
    /// Atomic: on success the step points at a freshly allocated range; on
    /// pool exhaustion or cap overflow the previous (offset, count) is left
    /// untouched.
    pub fn set_plocks_pooled(
        &mut self,
        pool: &mut PlockPool,
        entries: &[PlockEntry],
    ) -> Result<(), SeqError> {
        if entries.len() > MAX_PLOCKS_PER_STEP {
            return Err(SeqError::CapacityExceeded);
        }
        let offset = pool.alloc(entries.len())?;
        for (i, entry) in entries.iter().enumerate() {
            if let Some(slot) = pool.entry_mut(offset, i) {
                *slot = *entry;
            }
        }
        self.plocks = PlockRef {
            offset,
            count: entries.len() as u8,
        };
        self.recompute_flags(pool);
        Ok(())
    }

    /// Detach the step from its pool range. Bump allocation means the old
    /// entries are not reclaimed until the next pool reset.
    pub fn clear_plocks(&mut self, pool: &PlockPool) {
        self.plocks = PlockRef::default();
        self.recompute_flags(pool);
    }

    /// Iterate this step's packed pool entries.
    pub fn plock_entries<'a>(&self, pool: &'a PlockPool) -> impl Iterator<Item = &'a PlockEntry> {
        let offset = self.plocks.offset;
        (0..self.plocks.count as usize).filter_map(move |i| pool.entry(offset, i))
    }

    pub fn has_playable_voice(&self) -> bool {
        self.flags.active
    }

    pub fn is_automation_only(&self) -> bool {
        self.flags.automation
    }

    pub fn has_any_plock(&self) -> bool {
        self.plocks.count > 0
    }

    pub fn has_seq_plock(&self, pool: &PlockPool) -> bool {
        self.plock_entries(pool).any(|entry| !entry.is_cart())
    }

    pub fn has_cart_plock(&self, pool: &PlockPool) -> bool {
        self.plock_entries(pool).any(|entry| entry.is_cart())
    }

    /// Recompute the cached flags from voices and pool entries. Must run
    /// after every mutation that could change either input.
    pub fn recompute_flags(&mut self, pool: &PlockPool) {
        let active = self.voices.iter().any(Voice::is_playable);
        let has_seq = self.has_seq_plock(pool);
        let has_cart = self.has_cart_plock(pool);
        self.flags.active = active;
        self.flags.automation = !active && has_cart && !has_seq;
    }

    /// Refresh for transitions that leave the step without a pool range
    /// (the automation bit cannot hold with zero p-locks).
    fn recompute_flags_voices_only(&mut self) {
        self.flags.active = self.voices.iter().any(Voice::is_playable);
        self.flags.automation = false;
    }
}

/// Quantize grid resolution used during live capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantizeGrid {
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
    SixtyFourth,
}

impl QuantizeGrid {
    /// Grid duration as (numerator, denominator) in MIDI ticks (24 PPQN).
    pub fn tick_ratio(self) -> (u32, u32) {
        match self {
            QuantizeGrid::Quarter => (24, 1),
            QuantizeGrid::Eighth => (12, 1),
            QuantizeGrid::Sixteenth => (6, 1),
            QuantizeGrid::ThirtySecond => (3, 1),
            QuantizeGrid::SixtyFourth => (3, 2),
        }
    }
}

/// Quantization applied while recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizeConfig {
    pub enabled: bool,
    pub grid: QuantizeGrid,
    /// Strength in percent (0-100).
    pub strength: u8,
}

impl Default for QuantizeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            grid: QuantizeGrid::Sixteenth,
            strength: 100,
        }
    }
}

/// Transpose configuration for pattern playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransposeConfig {
    /// Global transpose in semitones.
    pub global: i8,
    /// Per-voice transpose offsets.
    pub per_voice: [i8; VOICES_PER_STEP],
}

/// Available scale modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleMode {
    Chromatic,
    Major,
    Minor,
    Dorian,
    Mixolydian,
}

impl ScaleMode {
    /// Pitch classes (relative to the root) the mode allows.
    fn intervals(self) -> &'static [u8] {
        match self {
            ScaleMode::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
            ScaleMode::Major => &[0, 2, 4, 5, 7, 9, 11],
            ScaleMode::Minor => &[0, 2, 3, 5, 7, 8, 10],
            ScaleMode::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            ScaleMode::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
        }
    }
}

/// Scale clamping applied to notes before scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleConfig {
    pub enabled: bool,
    /// Root note (0-11).
    pub root: u8,
    pub mode: ScaleMode,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            root: 0,
            mode: ScaleMode::Chromatic,
        }
    }
}

impl ScaleConfig {
    /// Snap a note down onto the nearest allowed pitch class.
    pub fn snap(&self, note: u8) -> u8 {
        if !self.enabled {
            return note;
        }
        let intervals = self.mode.intervals();
        let rel = (note as i16 - self.root as i16).rem_euclid(12) as u8;
        let snapped_rel = intervals
            .iter()
            .rev()
            .find(|&&iv| iv <= rel)
            .copied()
            .unwrap_or(0);
        (note as i16 - rel as i16 + snapped_rel as i16).clamp(0, 127) as u8
    }
}

/// Track-wide configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackConfig {
    pub quantize: QuantizeConfig,
    pub transpose: TransposeConfig,
    pub scale: ScaleConfig,
}

/// A fixed-length sequence of steps played on one channel.
#[derive(Debug, Clone)]
pub struct Track {
    pub steps: [Step; STEPS_PER_TRACK],
    pub config: TrackConfig,
    pub generation: Generation,
}

impl Track {
    pub fn new() -> Self {
        Self {
            steps: [Step::default(); STEPS_PER_TRACK],
            config: TrackConfig::default(),
            generation: Generation::default(),
        }
    }

    /// Reset every step and the configuration to defaults.
    pub fn init(&mut self) {
        *self = Track::new();
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn step_mut(&mut self, index: usize) -> Option<&mut Step> {
        self.steps.get_mut(index)
    }

    pub fn set_quantize(&mut self, config: QuantizeConfig) {
        self.config.quantize = config;
    }

    pub fn set_transpose(&mut self, config: TransposeConfig) {
        self.config.transpose = config;
    }

    pub fn set_scale(&mut self, config: ScaleConfig) {
        self.config.scale = config;
    }
}

impl Default for Track {
    fn default() -> Self {
        Self::new()
    }
}
