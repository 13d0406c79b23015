//! Read-only views over a (bank, pattern, track) triple.
//!
//! UI and LED consumers never touch the model directly: they hold a
//! [`TrackHandle`] and resolve it through a [`Reader`] borrowed for the
//! duration of the query. A handle only resolves while it matches the
//! project's active (bank, pattern); stale handles yield nothing.

use super::model::{Step, Track, Voice};
use super::plock::PlockEntry;
use super::pool::PlockPool;
use super::project::Project;
use super::{STEPS_PER_TRACK, VOICES_PER_STEP};

/// Stable identifier used by UI/LED code to address a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackHandle {
    pub bank: u8,
    pub pattern: u8,
    pub track: u8,
}

/// Compact per-step summary derived from the primary voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepView {
    pub note: u8,
    pub velocity: u8,
    pub length: u16,
    pub micro: i8,
    pub flags: u8,
}

impl StepView {
    pub const F_HAS_VOICE: u8 = 0x01;
    pub const F_HAS_ANY_PLOCK: u8 = 0x02;
    pub const F_HAS_SEQ_PLOCK: u8 = 0x04;
    pub const F_HAS_CART_PLOCK: u8 = 0x08;
    pub const F_AUTOMATION_ONLY: u8 = 0x10;
    pub const F_MUTED: u8 = 0x20;

    pub fn has_voice(&self) -> bool {
        self.flags & Self::F_HAS_VOICE != 0
    }

    pub fn automation_only(&self) -> bool {
        self.flags & Self::F_AUTOMATION_ONLY != 0
    }
}

/// Explicit voice-slot view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepVoiceView {
    pub note: u8,
    pub velocity: u8,
    pub length: u8,
    pub micro: i8,
    pub enabled: bool,
}

/// Borrowing reader over the project and the p-lock pool.
pub struct Reader<'a> {
    project: &'a Project,
    pool: &'a PlockPool,
}

impl<'a> Reader<'a> {
    pub fn new(project: &'a Project, pool: &'a PlockPool) -> Self {
        Self { project, pool }
    }

    /// Resolve a handle; succeeds only against the active (bank, pattern).
    pub fn resolve(&self, handle: TrackHandle) -> Option<&'a Track> {
        if handle.bank != self.project.active_bank()
            || handle.pattern != self.project.active_pattern()
        {
            return None;
        }
        self.project.track(handle.track as usize)
    }

    fn step(&self, handle: TrackHandle, step: usize) -> Option<&'a Step> {
        if step >= STEPS_PER_TRACK {
            return None;
        }
        self.resolve(handle).and_then(|track| track.step(step))
    }

    /// First playable voice, falling back to slot 0 for display purposes.
    fn primary_voice(step: &Step) -> &Voice {
        step.voices
            .iter()
            .find(|v| v.is_playable())
            .unwrap_or(&step.voices[0])
    }

    /// Summary view of one step; `None` for stale handles or bad indices.
    pub fn step_view(&self, handle: TrackHandle, step_index: usize) -> Option<StepView> {
        let step = self.step(handle, step_index)?;
        let voice = Self::primary_voice(step);

        let mut flags = 0u8;
        if step.has_playable_voice() {
            flags |= StepView::F_HAS_VOICE;
        }
        let has_seq = step.has_seq_plock(self.pool);
        let has_cart = step.has_cart_plock(self.pool);
        if has_seq || has_cart {
            flags |= StepView::F_HAS_ANY_PLOCK;
        }
        if has_seq {
            flags |= StepView::F_HAS_SEQ_PLOCK;
        }
        if has_cart {
            flags |= StepView::F_HAS_CART_PLOCK;
        }
        if step.is_automation_only() {
            flags |= StepView::F_AUTOMATION_ONLY;
        }
        if self.project.is_track_muted(handle.track as usize) {
            flags |= StepView::F_MUTED;
        }

        Some(StepView {
            note: voice.note,
            velocity: voice.velocity,
            length: voice.length as u16,
            micro: voice.micro_offset,
            flags,
        })
    }

    /// View of an explicit voice slot; zeroed fields for muted slots.
    pub fn voice_view(
        &self,
        handle: TrackHandle,
        step_index: usize,
        slot: usize,
    ) -> Option<StepVoiceView> {
        if slot >= VOICES_PER_STEP {
            return None;
        }
        let step = self.step(handle, step_index)?;
        let voice = &step.voices[slot];
        if voice.is_playable() {
            Some(StepVoiceView {
                note: voice.note,
                velocity: voice.velocity,
                length: voice.length,
                micro: voice.micro_offset,
                enabled: true,
            })
        } else {
            Some(StepVoiceView::default())
        }
    }

    /// Number of playable voices on a step.
    pub fn voice_count(&self, handle: TrackHandle, step_index: usize) -> Option<u8> {
        let step = self.step(handle, step_index)?;
        Some(step.voices.iter().filter(|v| v.is_playable()).count() as u8)
    }

    /// Forward iterator over a step's packed p-locks. Empty iterator for
    /// stale handles or plock-free steps.
    pub fn plocks(&self, handle: TrackHandle, step_index: usize) -> PlockIter<'a> {
        match self.step(handle, step_index) {
            Some(step) => PlockIter {
                pool: self.pool,
                offset: step.plocks.offset,
                count: step.plocks.count as usize,
                index: 0,
            },
            None => PlockIter {
                pool: self.pool,
                offset: 0,
                count: 0,
                index: 0,
            },
        }
    }
}

/// Stateful forward iterator over one step's pool range.
pub struct PlockIter<'a> {
    pool: &'a PlockPool,
    offset: u16,
    count: usize,
    index: usize,
}

impl<'a> Iterator for PlockIter<'a> {
    type Item = PlockEntry;

    fn next(&mut self) -> Option<PlockEntry> {
        if self.index >= self.count {
            return None;
        }
        let entry = self.pool.entry(self.offset, self.index).copied();
        self.index += 1;
        entry
    }
}

impl<'a> PlockIter<'a> {
    /// Decoded iteration: internal ids re-encoded into the 16-bit address
    /// space (flag bit + voice bits + parameter ordinal), cart ids passed
    /// through; values widened with the signed bias applied.
    pub fn decoded(self) -> impl Iterator<Item = (u16, i32)> + 'a {
        self.map(|entry| (entry.wide_id(), entry.signed_value()))
    }
}
