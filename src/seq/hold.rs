//! Hold/preview editor: staged edits across a selection of held steps.
//!
//! While the UI holds steps, their content is copied into hold slots and
//! every parameter tweak lands on the staged copies. Releasing the hold
//! (or dropping a step from the mask) commits mutated slots back into the
//! track in one wave, bumping the generation once. This is what makes
//! per-step p-lock editing feel like "pick up the value now, commit when I
//! release".

use log::warn;

use super::model::{Step, Track, DEFAULT_VELOCITY_PRIMARY};
use super::plock::{InternalParam, PlockEntry};
use super::pool::PlockPool;
use super::{MAX_PLOCKS_PER_STEP, STEPS_PER_TRACK, VOICES_PER_STEP};

/// Steps addressable by one hold mask (one page of the grid).
pub const HOLD_SLOTS: usize = 16;

/// Cart parameters tracked by the aggregate view.
const MAX_CART_PARAMS: usize = 32;

/// Parameter addressed by a hold edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldParam {
    /// Per-voice note (slot 0..3).
    Note(u8),
    /// Per-voice velocity.
    Velocity(u8),
    /// Per-voice length.
    Length(u8),
    /// Per-voice micro timing.
    Micro(u8),
    AllTranspose,
    AllVelocity,
    AllLength,
    AllMicro,
}

impl HoldParam {
    fn internal(self) -> (InternalParam, u8) {
        match self {
            HoldParam::Note(v) => (InternalParam::Note, v),
            HoldParam::Velocity(v) => (InternalParam::Velocity, v),
            HoldParam::Length(v) => (InternalParam::Length, v),
            HoldParam::Micro(v) => (InternalParam::Micro, v),
            HoldParam::AllTranspose => (InternalParam::AllTranspose, 0),
            HoldParam::AllVelocity => (InternalParam::AllVelocity, 0),
            HoldParam::AllLength => (InternalParam::AllLength, 0),
            HoldParam::AllMicro => (InternalParam::AllMicro, 0),
        }
    }
}

/// Aggregate state of one parameter across the held steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HoldParamView {
    /// Every held step has the parameter.
    pub available: bool,
    /// Values differ across held steps.
    pub mixed: bool,
    /// Every held step carries an explicit internal p-lock for it.
    pub plocked: bool,
    pub value: i32,
}

/// Aggregate view over all hold parameters.
#[derive(Debug, Clone, Default)]
pub struct HoldView {
    /// The four "all" offsets: transpose, velocity, length, micro.
    pub all: [HoldParamView; 4],
    /// Per voice: note, velocity, length, micro.
    pub voices: [[HoldParamView; 4]; VOICES_PER_STEP],
    /// Cart parameters touched by at least one held step.
    pub carts: Vec<(u16, HoldParamView)>,
}

/// Staged copy of one held step.
#[derive(Clone, Copy)]
struct HoldSlot {
    active: bool,
    step_index: usize,
    staged: Step,
    plocks: [PlockEntry; MAX_PLOCKS_PER_STEP],
    plock_count: usize,
    mutated: bool,
}

impl Default for HoldSlot {
    fn default() -> Self {
        Self {
            active: false,
            step_index: 0,
            staged: Step::default(),
            plocks: [PlockEntry::default(); MAX_PLOCKS_PER_STEP],
            plock_count: 0,
            mutated: false,
        }
    }
}

impl HoldSlot {
    fn stage(&mut self, step_index: usize, step: &Step, pool: &PlockPool) {
        self.active = true;
        self.step_index = step_index;
        self.staged = *step;
        self.plock_count = 0;
        for entry in step.plock_entries(pool) {
            if self.plock_count >= MAX_PLOCKS_PER_STEP {
                break;
            }
            self.plocks[self.plock_count] = *entry;
            self.plock_count += 1;
        }
        self.mutated = false;
    }

    /// Replace-or-append into the staged buffer; true when it changed.
    fn upsert(&mut self, entry: PlockEntry) -> bool {
        for slot in self.plocks[..self.plock_count].iter_mut() {
            if slot.is_cart() != entry.is_cart() || slot.id != entry.id {
                continue;
            }
            if slot.value != entry.value || slot.flags != entry.flags {
                *slot = entry;
                return true;
            }
            return false;
        }
        if self.plock_count >= MAX_PLOCKS_PER_STEP {
            warn!("hold edit: staged p-lock buffer full (id={:#x})", entry.id);
            return false;
        }
        self.plocks[self.plock_count] = entry;
        self.plock_count += 1;
        true
    }

    fn find_internal(&self, param: InternalParam, voice: u8) -> Option<&PlockEntry> {
        let id = param.encode_id(voice);
        self.plocks[..self.plock_count]
            .iter()
            .find(|entry| !entry.is_cart() && entry.id == id)
    }

    fn find_cart(&self, param_id: u16) -> Option<&PlockEntry> {
        self.plocks[..self.plock_count]
            .iter()
            .find(|entry| entry.is_cart() && entry.id as u16 == param_id)
    }
}

/// The staging layer between the UI's held-step mask and the track.
pub struct HoldEditor {
    slots: [HoldSlot; HOLD_SLOTS],
    mask: u16,
    /// Base step of the visible page (slots address page-relative bits).
    page_base: usize,
    last_note: u8,
}

impl HoldEditor {
    pub fn new() -> Self {
        Self {
            slots: [HoldSlot::default(); HOLD_SLOTS],
            mask: 0,
            page_base: 0,
            last_note: 60,
        }
    }

    pub fn mask(&self) -> u16 {
        self.mask
    }

    pub fn is_holding(&self) -> bool {
        self.mask != 0
    }

    /// Point the editor at another page; active slots from the previous
    /// page are committed first.
    pub fn set_page_base(&mut self, track: &mut Track, pool: &mut PlockPool, page_base: usize) {
        if page_base != self.page_base {
            self.end_preview(track, pool);
            self.page_base = page_base.min(STEPS_PER_TRACK - HOLD_SLOTS);
        }
    }

    /// Update the held mask: newly held steps are staged, released steps
    /// are committed. One commit wave bumps the generation at most once.
    pub fn sync_mask(&mut self, track: &mut Track, pool: &mut PlockPool, mask: u16) {
        let mut mutated = false;
        for local in 0..HOLD_SLOTS {
            let bit = 1u16 << local;
            let want = mask & bit != 0;
            let had = self.mask & bit != 0;
            if want && !had {
                let step_index = self.page_base + local;
                if let Some(step) = track.step(step_index) {
                    self.slots[local].stage(step_index, step, pool);
                }
            } else if !want && had {
                mutated |= self.commit_slot(local, track, pool);
            }
        }
        if mutated {
            track.generation.bump();
        }
        self.mask = mask;
    }

    /// Begin a preview for every bit in `mask` (equivalent to a mask sync
    /// from zero).
    pub fn begin_preview(&mut self, track: &mut Track, pool: &mut PlockPool, mask: u16) {
        self.sync_mask(track, pool, mask);
    }

    /// Release the hold: commit every mutated slot and clear the mask.
    pub fn end_preview(&mut self, track: &mut Track, pool: &mut PlockPool) {
        let mut mutated = false;
        for local in 0..HOLD_SLOTS {
            mutated |= self.commit_slot(local, track, pool);
        }
        if mutated {
            track.generation.bump();
        }
        self.mask = 0;
    }

    /// Apply a signed delta to one internal parameter on every held step.
    pub fn apply_param(&mut self, param: HoldParam, delta: i32) {
        if delta == 0 {
            return;
        }
        let (internal, voice) = param.internal();
        let voice = voice.min(VOICES_PER_STEP as u8 - 1);
        let last_note = self.last_note;
        for local in 0..HOLD_SLOTS {
            if self.mask & (1 << local) == 0 || !self.slots[local].active {
                continue;
            }
            let slot = &mut self.slots[local];

            // First internal tweak on a silent step arms its primary voice
            // the way a quick-step would.
            if !internal.is_all() && !slot.staged.has_playable_voice() {
                let primary = &mut slot.staged.voices[0];
                if primary.velocity == 0 {
                    primary.velocity = DEFAULT_VELOCITY_PRIMARY;
                }
                if primary.length == 0 {
                    primary.length = 1;
                }
                if !primary.enabled {
                    primary.note = last_note;
                    primary.enabled = true;
                }
                slot.mutated = true;
            }

            let value = Self::bump_staged_value(slot, internal, voice, delta);
            if slot.upsert(PlockEntry::internal(internal, voice, value)) {
                slot.mutated = true;
            }
        }
    }

    /// Apply an absolute cart parameter write to every held step. A step
    /// with no playable voice becomes automation-only.
    pub fn apply_cart(&mut self, param_id: u16, value: u8) {
        for local in 0..HOLD_SLOTS {
            if self.mask & (1 << local) == 0 || !self.slots[local].active {
                continue;
            }
            let slot = &mut self.slots[local];
            if !slot.staged.has_playable_voice() {
                for voice in &mut slot.staged.voices {
                    voice.enabled = false;
                    voice.velocity = 0;
                }
            }
            if slot.upsert(PlockEntry::cart(param_id as u8, value)) {
                slot.mutated = true;
            }
        }
    }

    /// Aggregate view over the held steps for the UI.
    pub fn view(&self) -> HoldView {
        let mut view = HoldView::default();
        let mut held = 0u32;
        let mut cart_counts: Vec<(u16, u32)> = Vec::new();

        for local in 0..HOLD_SLOTS {
            if self.mask & (1 << local) == 0 || !self.slots[local].active {
                continue;
            }
            let slot = &self.slots[local];
            held += 1;

            let all_params = [
                (HoldParam::AllTranspose, slot.staged.offsets.transpose as i32),
                (HoldParam::AllVelocity, slot.staged.offsets.velocity as i32),
                (HoldParam::AllLength, slot.staged.offsets.length as i32),
                (HoldParam::AllMicro, slot.staged.offsets.micro as i32),
            ];
            for (i, (param, base)) in all_params.into_iter().enumerate() {
                let (internal, _) = param.internal();
                let plocked = slot.find_internal(internal, 0);
                let value = plocked.map(|e| e.signed_value()).unwrap_or(base);
                Self::merge(&mut view.all[i], held, value, plocked.is_some());
            }

            for voice in 0..VOICES_PER_STEP {
                let v = &slot.staged.voices[voice];
                let fields = [
                    (InternalParam::Note, v.note as i32),
                    (InternalParam::Velocity, v.velocity as i32),
                    (InternalParam::Length, v.length as i32),
                    (InternalParam::Micro, v.micro_offset as i32),
                ];
                for (i, (internal, base)) in fields.into_iter().enumerate() {
                    let plocked = slot.find_internal(internal, voice as u8);
                    let value = plocked.map(|e| e.signed_value()).unwrap_or(base);
                    Self::merge(&mut view.voices[voice][i], held, value, plocked.is_some());
                }
            }

            for entry in slot.plocks[..slot.plock_count].iter().filter(|e| e.is_cart()) {
                let param_id = entry.id as u16;
                if let Some(index) = view.carts.iter().position(|(id, _)| *id == param_id) {
                    let param_view = &mut view.carts[index].1;
                    if param_view.value != entry.value as i32 {
                        param_view.mixed = true;
                    }
                    if let Some((_, count)) =
                        cart_counts.iter_mut().find(|(id, _)| *id == param_id)
                    {
                        *count += 1;
                    }
                } else if view.carts.len() < MAX_CART_PARAMS {
                    view.carts.push((
                        param_id,
                        HoldParamView {
                            available: false,
                            mixed: false,
                            plocked: true,
                            value: entry.value as i32,
                        },
                    ));
                    cart_counts.push((param_id, 1));
                }
            }
        }

        // A cart parameter is available only when every held step has it.
        for (id, param_view) in &mut view.carts {
            let count = cart_counts
                .iter()
                .find(|(cid, _)| cid == id)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            param_view.available = count == held;
        }

        view
    }

    /// Fold one held step's value into an aggregate parameter view.
    fn merge(view: &mut HoldParamView, held: u32, value: i32, plocked: bool) {
        if held == 1 {
            *view = HoldParamView {
                available: true,
                mixed: false,
                plocked,
                value,
            };
        } else {
            view.mixed |= view.value != value;
            view.plocked &= plocked;
        }
    }

    /// Commit one slot back into the track; true when the step changed.
    fn commit_slot(&mut self, local: usize, track: &mut Track, pool: &mut PlockPool) -> bool {
        let slot = &mut self.slots[local];
        if !slot.active {
            return false;
        }
        let mutated = slot.mutated;
        if mutated && slot.step_index < STEPS_PER_TRACK {
            let mut staged = slot.staged;
            if staged
                .set_plocks_pooled(pool, &slot.plocks[..slot.plock_count])
                .is_err()
            {
                warn!(
                    "hold edit: p-lock commit failed on step {}, edit dropped",
                    slot.step_index
                );
                *slot = HoldSlot::default();
                return false;
            }
            track.steps[slot.step_index] = staged;
            track.steps[slot.step_index].recompute_flags(pool);
            let primary = &track.steps[slot.step_index].voices[0];
            if primary.is_playable() {
                self.last_note = primary.note;
            }
        }
        *slot = HoldSlot::default();
        mutated
    }

    /// Read-modify-write of the staged field addressed by a parameter.
    fn bump_staged_value(
        slot: &mut HoldSlot,
        internal: InternalParam,
        voice: u8,
        delta: i32,
    ) -> i32 {
        let voice = voice as usize;
        let staged = &mut slot.staged;
        match internal {
            InternalParam::Note => {
                let v = (staged.voices[voice].note as i32 + delta).clamp(0, 127);
                staged.voices[voice].note = v as u8;
                v
            }
            InternalParam::Velocity => {
                let v = (staged.voices[voice].velocity as i32 + delta).clamp(0, 127);
                staged.voices[voice].velocity = v as u8;
                staged.voices[voice].enabled = v > 0;
                v
            }
            InternalParam::Length => {
                let v = (staged.voices[voice].length as i32 + delta).clamp(1, 64);
                staged.voices[voice].length = v as u8;
                v
            }
            InternalParam::Micro => {
                let v = (staged.voices[voice].micro_offset as i32 + delta).clamp(-12, 12);
                staged.voices[voice].micro_offset = v as i8;
                v
            }
            InternalParam::AllTranspose => {
                let v = (staged.offsets.transpose as i32 + delta).clamp(-12, 12);
                staged.offsets.transpose = v as i8;
                v
            }
            InternalParam::AllVelocity => {
                let v = (staged.offsets.velocity as i32 + delta).clamp(-127, 127);
                staged.offsets.velocity = v as i16;
                v
            }
            InternalParam::AllLength => {
                let v = (staged.offsets.length as i32 + delta).clamp(-32, 32);
                staged.offsets.length = v as i8;
                v
            }
            InternalParam::AllMicro => {
                let v = (staged.offsets.micro as i32 + delta).clamp(-12, 12);
                staged.offsets.micro = v as i8;
                v
            }
        }
    }
}

impl Default for HoldEditor {
    fn default() -> Self {
        Self::new()
    }
}
