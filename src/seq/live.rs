//! Live capture: turns incoming note events into quantized step mutations
//! on the active track.
//!
//! Capture is split in two phases. [`LiveCapture::plan_event`] is pure: it
//! resolves the event against the latest clock reference (quantize, step
//! and micro offsets) and returns a [`CapturePlan`].
//! [`LiveCapture::commit_plan`] applies the plan to the track, maintaining
//! one armed-voice tracker per voice slot so note-offs find the step their
//! note-on landed on.

use log::warn;

use super::clock::ClockStepInfo;
use super::model::{Step, Track};
use super::plock::{InternalParam, PlockEntry};
use super::pool::PlockPool;
use super::{QuantizeConfig, SeqError, MAX_PLOCKS_PER_STEP, STEPS_PER_TRACK, VOICES_PER_STEP};

const MICRO_OFFSET_MIN: i64 = -12;
const MICRO_OFFSET_MAX: i64 = 12;

/// Event type fed by note producers (keyboard, arp, external MIDI).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEventKind {
    NoteOn,
    NoteOff,
}

/// One incoming note event.
#[derive(Debug, Clone, Copy)]
pub struct CaptureInput {
    pub kind: CaptureEventKind,
    pub note: u8,
    pub velocity: u8,
    /// Suggested voice slot.
    pub voice_index: u8,
    /// Absolute timestamp, same timebase as the clock reference.
    pub timestamp: u32,
}

/// Planned mutation, echoed back to the caller before commit.
#[derive(Debug, Clone, Copy)]
pub struct CapturePlan {
    pub kind: CaptureEventKind,
    /// Target step inside the track.
    pub step_index: usize,
    /// Signed step offset relative to the latest clock step.
    pub step_delta: i32,
    pub voice_index: u8,
    pub note: u8,
    pub velocity: u8,
    /// Planned micro-timing offset (-12..+12).
    pub micro_offset: i8,
    /// Quantize correction compared to the raw input.
    pub micro_adjust: i8,
    /// True when quantize altered the timing.
    pub quantized: bool,
    /// Raw timestamp of the incoming event.
    pub input_time: u32,
    /// Timestamp at which the event should play.
    pub scheduled_time: u32,
}

/// Armed-note state for one voice slot.
#[derive(Debug, Clone, Copy, Default)]
struct VoiceTracker {
    active: bool,
    step_index: usize,
    start_time_raw: u32,
    /// Step duration snapshot taken at note-on; length computation uses
    /// this even if the tempo moved since.
    step_duration: u32,
    note: u8,
}

/// Staged copy of a step's p-locks, capped at the per-step limit.
struct StagedPlocks {
    entries: [PlockEntry; MAX_PLOCKS_PER_STEP],
    count: usize,
    overflow: bool,
}

impl StagedPlocks {
    fn collect(step: &Step, pool: &PlockPool) -> Self {
        let mut staged = Self {
            entries: [PlockEntry::default(); MAX_PLOCKS_PER_STEP],
            count: 0,
            overflow: false,
        };
        for entry in step.plock_entries(pool) {
            if staged.count >= MAX_PLOCKS_PER_STEP {
                staged.overflow = true;
                break;
            }
            staged.entries[staged.count] = *entry;
            staged.count += 1;
        }
        staged
    }

    /// Replace the entry with a matching (domain, id) or append a new one.
    /// Returns true when the buffer content changed.
    fn upsert(&mut self, entry: PlockEntry) -> bool {
        for slot in self.entries[..self.count].iter_mut() {
            if slot.is_cart() != entry.is_cart() || slot.id != entry.id {
                continue;
            }
            if slot.value != entry.value || slot.flags != entry.flags {
                *slot = entry;
                return true;
            }
            return false;
        }
        if self.count >= MAX_PLOCKS_PER_STEP {
            self.overflow = true;
            return false;
        }
        self.entries[self.count] = entry;
        self.count += 1;
        true
    }

    fn upsert_internal(&mut self, param: InternalParam, voice: u8, value: i32) -> bool {
        self.upsert(PlockEntry::internal(param, voice, value))
    }

    fn as_slice(&self) -> &[PlockEntry] {
        &self.entries[..self.count]
    }
}

/// Live-capture context: clock reference + per-slot voice trackers.
pub struct LiveCapture {
    recording: bool,
    clock_valid: bool,
    clock_step_time: u32,
    clock_step_duration: u32,
    clock_tick_duration: u32,
    clock_track_step: usize,
    quantize_override: Option<QuantizeConfig>,
    voices: [VoiceTracker; VOICES_PER_STEP],
    round_robin: u8,
}

impl LiveCapture {
    pub fn new() -> Self {
        Self {
            recording: false,
            clock_valid: false,
            clock_step_time: 0,
            clock_step_duration: 0,
            clock_tick_duration: 0,
            clock_track_step: 0,
            quantize_override: None,
            voices: [VoiceTracker::default(); VOICES_PER_STEP],
            round_robin: 0,
        }
    }

    /// Forget clock state and armed voices (transport stop, track switch).
    pub fn reset(&mut self) {
        let quantize = self.quantize_override;
        *self = Self::new();
        self.quantize_override = quantize;
    }

    pub fn set_recording(&mut self, enabled: bool) {
        self.recording = enabled;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Force a quantize configuration instead of the track's own.
    pub fn override_quantize(&mut self, config: Option<QuantizeConfig>) {
        self.quantize_override = config;
    }

    /// Refresh the timing reference from the latest clock step.
    pub fn update_clock(&mut self, info: &ClockStepInfo) {
        self.clock_step_time = info.now;
        self.clock_step_duration = info.step_duration;
        self.clock_tick_duration = info.tick_duration;
        self.clock_track_step = (info.step_idx_abs as usize) % STEPS_PER_TRACK;
        self.clock_valid = true;
    }

    /// Grid duration for the given quantize grid, from the tick duration
    /// (falling back to step/6 when the clock source omits it).
    fn grid_duration(&self, config: &QuantizeConfig) -> Option<i64> {
        let (num, den) = config.grid.tick_ratio();
        let mut tick = self.clock_tick_duration as u64;
        if tick == 0 {
            tick = (self.clock_step_duration / 6) as u64;
        }
        if tick == 0 {
            return None;
        }
        let mut scaled = tick * num as u64;
        if den > 1 {
            scaled = (scaled + (den as u64 / 2)) / den as u64;
        }
        (scaled > 0).then_some(scaled as i64)
    }

    /// Resolve an event against the clock reference without mutating
    /// anything. Returns `None` while not recording or without a clock.
    pub fn plan_event(&self, track: &Track, input: &CaptureInput) -> Option<CapturePlan> {
        if !self.recording || !self.clock_valid || self.clock_step_duration == 0 {
            return None;
        }

        let quantize = self
            .quantize_override
            .unwrap_or(track.config.quantize);

        let step_duration = self.clock_step_duration as i64;
        let mut base_time = self.clock_step_time as i64;
        let mut base_step = self.clock_track_step as i64;
        let mut delta = input.timestamp as i64 - base_time;

        // Events stamped before the current boundary walk the reference
        // back one step at a time until the delta is non-negative.
        while delta < 0 {
            delta += step_duration;
            base_time -= step_duration;
            base_step -= 1;
        }

        let mut applied = delta;
        let mut quantized = false;
        if quantize.enabled && quantize.strength > 0 {
            if let Some(grid) = self.grid_duration(&quantize) {
                let rounded = ((delta + grid / 2) / grid) * grid;
                let diff = rounded - delta;
                applied = delta + diff * quantize.strength as i64 / 100;
                quantized = diff != 0;
            }
        }

        let (quotient, remainder) = divmod_floor(applied, step_duration);
        let step_index = wrap_step(base_step, quotient);
        let scheduled = (base_time + applied).max(0);

        Some(CapturePlan {
            kind: input.kind,
            step_index,
            step_delta: quotient as i32,
            voice_index: input.voice_index,
            note: input.note,
            velocity: input.velocity,
            micro_offset: micro_from_within(remainder, step_duration),
            micro_adjust: micro_from_delta(applied - delta, step_duration),
            quantized,
            input_time: input.timestamp,
            scheduled_time: scheduled as u32,
        })
    }

    /// Apply a plan to the track. One successful commit bumps the track
    /// generation exactly once; failures leave step, pool and trackers as
    /// they were.
    pub fn commit_plan(
        &mut self,
        track: &mut Track,
        pool: &mut PlockPool,
        plan: &CapturePlan,
    ) -> Result<(), SeqError> {
        if plan.step_index >= STEPS_PER_TRACK {
            return Err(SeqError::OutOfRange);
        }
        match plan.kind {
            CaptureEventKind::NoteOn => self.commit_note_on(track, pool, plan),
            CaptureEventKind::NoteOff => self.commit_note_off(track, pool, plan),
        }
    }

    fn commit_note_on(
        &mut self,
        track: &mut Track,
        pool: &mut PlockPool,
        plan: &CapturePlan,
    ) -> Result<(), SeqError> {
        let step_duration = self.clock_step_duration;
        let step = &mut track.steps[plan.step_index];

        // A bare step would otherwise sound its neutral defaults on top of
        // the captured note; keep the other voices muted.
        if !step.has_playable_voice() && !step.has_any_plock() {
            step.make_automation_only(pool);
        }

        let slot = self.pick_voice_slot(step, plan.note);
        let mut voice = step.voices[slot];
        voice.note = plan.note;
        voice.velocity = plan.velocity;
        voice.enabled = plan.velocity > 0;
        if voice.length == 0 {
            voice.length = 1;
        }
        voice.micro_offset = plan.micro_offset;
        step.set_voice(slot, &voice, pool);

        let snapshot = *step;
        let mut staged = StagedPlocks::collect(step, pool);
        let mut mutated = false;
        mutated |= staged.upsert_internal(InternalParam::Note, slot as u8, voice.note as i32);
        mutated |= staged.upsert_internal(
            InternalParam::Velocity,
            slot as u8,
            voice.velocity as i32,
        );
        mutated |= staged.upsert_internal(
            InternalParam::Micro,
            slot as u8,
            voice.micro_offset as i32,
        );

        Self::flush_staged(step, pool, &staged, &snapshot, mutated, "note")?;

        self.voices[slot] = VoiceTracker {
            active: true,
            step_index: plan.step_index,
            start_time_raw: plan.input_time,
            step_duration,
            note: plan.note,
        };

        track.generation.bump();
        Ok(())
    }

    fn commit_note_off(
        &mut self,
        track: &mut Track,
        pool: &mut PlockPool,
        plan: &CapturePlan,
    ) -> Result<(), SeqError> {
        // Locate the armed slot: exact (slot, note) match first, then any
        // armed slot holding the note, then the caller's suggestion.
        let mut slot = None;
        for (i, tracker) in self.voices.iter().enumerate() {
            if !tracker.active || tracker.note != plan.note {
                continue;
            }
            if i == plan.voice_index as usize {
                slot = Some(i);
                break;
            }
            slot.get_or_insert(i);
        }
        let slot = slot.unwrap_or_else(|| (plan.voice_index as usize).min(VOICES_PER_STEP - 1));

        let tracker = self.voices[slot];
        let target_step = if tracker.active {
            tracker.step_index % STEPS_PER_TRACK
        } else {
            plan.step_index
        };

        let start_raw = if tracker.active {
            tracker.start_time_raw
        } else {
            plan.input_time
        };
        let duration_snapshot = if tracker.active {
            tracker.step_duration
        } else {
            self.clock_step_duration
        };
        let length_steps = compute_length_steps(start_raw, plan.input_time, duration_snapshot);

        let step = &mut track.steps[target_step];
        let mut voice = step.voices[slot];
        voice.length = length_steps;
        if !voice.enabled {
            voice.enabled = voice.velocity > 0;
        }
        step.set_voice(slot, &voice, pool);

        let snapshot = *step;
        let mut staged = StagedPlocks::collect(step, pool);
        let mutated =
            staged.upsert_internal(InternalParam::Length, slot as u8, length_steps as i32);

        Self::flush_staged(step, pool, &staged, &snapshot, mutated, "length")?;

        self.voices[slot] = VoiceTracker::default();
        track.generation.bump();
        Ok(())
    }

    /// Commit a staged buffer, restoring the snapshot on any failure.
    fn flush_staged(
        step: &mut Step,
        pool: &mut PlockPool,
        staged: &StagedPlocks,
        snapshot: &Step,
        mutated: bool,
        context: &str,
    ) -> Result<(), SeqError> {
        if staged.overflow {
            *step = *snapshot;
            warn!("live capture: {context} p-lock buffer overflow, commit dropped");
            return Err(SeqError::CapacityExceeded);
        }
        if !mutated {
            return Ok(());
        }
        if let Err(err) = step.set_plocks_pooled(pool, staged.as_slice()) {
            *step = *snapshot;
            warn!("live capture: {context} p-lock commit failed ({err})");
            return Err(err);
        }
        Ok(())
    }

    /// Voice-slot pick for a note-on: an enabled voice already holding the
    /// note, else the first free slot, else round-robin.
    fn pick_voice_slot(&mut self, step: &Step, note: u8) -> usize {
        for (i, voice) in step.voices.iter().enumerate() {
            if voice.enabled && voice.note == note {
                return i;
            }
        }
        for (i, voice) in step.voices.iter().enumerate() {
            if !voice.enabled || voice.velocity == 0 {
                return i;
            }
        }
        self.round_robin = (self.round_robin + 1) % VOICES_PER_STEP as u8;
        self.round_robin as usize
    }
}

impl Default for LiveCapture {
    fn default() -> Self {
        Self::new()
    }
}

/// Floored division: the remainder is always non-negative.
fn divmod_floor(value: i64, divisor: i64) -> (i64, i64) {
    if divisor == 0 {
        return (0, 0);
    }
    let mut q = value / divisor;
    let mut r = value % divisor;
    if value < 0 && r != 0 {
        q -= 1;
        r += divisor;
    }
    (q, r)
}

fn wrap_step(base_step: i64, delta: i64) -> usize {
    (base_step + delta).rem_euclid(STEPS_PER_TRACK as i64) as usize
}

/// Position inside the step scaled onto the micro range (rounded).
fn micro_from_within(within_step: i64, step_duration: i64) -> i8 {
    if step_duration == 0 {
        return 0;
    }
    let within = within_step.max(0);
    let scaled = (within * MICRO_OFFSET_MAX + step_duration / 2) / step_duration;
    scaled.clamp(MICRO_OFFSET_MIN, MICRO_OFFSET_MAX) as i8
}

/// Signed correction scaled onto the micro range (rounded toward the sign).
fn micro_from_delta(delta: i64, step_duration: i64) -> i8 {
    if step_duration == 0 {
        return 0;
    }
    let bias = if delta >= 0 {
        step_duration / 2
    } else {
        -(step_duration / 2)
    };
    let scaled = (delta * MICRO_OFFSET_MAX + bias) / step_duration;
    scaled.clamp(MICRO_OFFSET_MIN, MICRO_OFFSET_MAX) as i8
}

/// Gate length in steps from the raw note-on/note-off pair, rounded at the
/// half-step and clamped to 1..=64.
fn compute_length_steps(start: u32, end: u32, step_duration: u32) -> u8 {
    if step_duration == 0 {
        return 1;
    }
    let delta = end as i64 - start as i64;
    if delta <= 0 {
        return 1;
    }
    let step = step_duration as i64;
    ((delta + step / 2) / step).clamp(1, 64) as u8
}

#[cfg(test)]
mod tests {
    use super::super::model::QuantizeGrid;
    use super::*;

    fn clock(now: u32, step_idx_abs: u32) -> ClockStepInfo {
        ClockStepInfo {
            now,
            step_idx_abs,
            bpm: 120.0,
            tick_duration: 100,
            step_duration: 600,
            external: false,
        }
    }

    fn note_on(note: u8, velocity: u8, timestamp: u32) -> CaptureInput {
        CaptureInput {
            kind: CaptureEventKind::NoteOn,
            note,
            velocity,
            voice_index: 0,
            timestamp,
        }
    }

    fn note_off(note: u8, timestamp: u32) -> CaptureInput {
        CaptureInput {
            kind: CaptureEventKind::NoteOff,
            note,
            velocity: 0,
            voice_index: 0,
            timestamp,
        }
    }

    #[test]
    fn test_plan_requires_recording_and_clock() {
        let track = Track::new();
        let mut capture = LiveCapture::new();
        assert!(capture.plan_event(&track, &note_on(60, 100, 10)).is_none());
        capture.set_recording(true);
        assert!(capture.plan_event(&track, &note_on(60, 100, 10)).is_none());
        capture.update_clock(&clock(0, 0));
        assert!(capture.plan_event(&track, &note_on(60, 100, 10)).is_some());
    }

    #[test]
    fn test_plan_resolves_step_and_micro() {
        let track = Track::new();
        let mut capture = LiveCapture::new();
        capture.set_recording(true);
        capture.update_clock(&clock(0, 0));

        // 10 ticks into a 600-tick step: step 0, micro rounds to 0.
        let plan = capture.plan_event(&track, &note_on(60, 100, 10)).unwrap();
        assert_eq!(plan.step_index, 0);
        assert_eq!(plan.micro_offset, 0);

        // Two steps later plus half a step: step 2, micro 6.
        let plan = capture.plan_event(&track, &note_on(60, 100, 1500)).unwrap();
        assert_eq!(plan.step_index, 2);
        assert_eq!(plan.step_delta, 2);
        assert_eq!(plan.micro_offset, 6);
    }

    #[test]
    fn test_plan_walks_back_negative_delta() {
        let track = Track::new();
        let mut capture = LiveCapture::new();
        capture.set_recording(true);
        capture.update_clock(&clock(1200, 2));

        // 50 ticks before the boundary: lands on step 1, near its end.
        let plan = capture.plan_event(&track, &note_on(60, 100, 1150)).unwrap();
        assert_eq!(plan.step_index, 1);
        assert_eq!(plan.micro_offset, 11);
    }

    #[test]
    fn test_full_strength_quantize_snaps_to_grid() {
        let mut track = Track::new();
        track.config.quantize = QuantizeConfig {
            enabled: true,
            grid: QuantizeGrid::Sixteenth,
            strength: 100,
        };
        let mut capture = LiveCapture::new();
        capture.set_recording(true);
        capture.update_clock(&clock(0, 0));

        // 280 ticks in, grid = 600: rounds to 0 -> micro 0, adjust -6.
        let plan = capture.plan_event(&track, &note_on(60, 100, 280)).unwrap();
        assert!(plan.quantized);
        assert_eq!(plan.step_index, 0);
        assert_eq!(plan.micro_offset, 0);
        assert_eq!(plan.micro_adjust, -6);

        // 400 ticks in: rounds forward to the next step.
        let plan = capture.plan_event(&track, &note_on(60, 100, 400)).unwrap();
        assert_eq!(plan.step_index, 1);
        assert_eq!(plan.micro_offset, 0);
    }

    #[test]
    fn test_half_strength_quantize_moves_halfway() {
        let mut track = Track::new();
        track.config.quantize = QuantizeConfig {
            enabled: true,
            grid: QuantizeGrid::Sixteenth,
            strength: 50,
        };
        let mut capture = LiveCapture::new();
        capture.set_recording(true);
        capture.update_clock(&clock(0, 0));

        // delta 200, rounded 0, correction -200 * 50% = -100 -> 100.
        let plan = capture.plan_event(&track, &note_on(60, 100, 200)).unwrap();
        assert!(plan.quantized);
        assert_eq!(plan.scheduled_time, 100);
        assert_eq!(plan.micro_offset, 2);
    }

    #[test]
    fn test_commit_records_note_velocity_micro_plocks() {
        let mut track = Track::new();
        let mut pool = PlockPool::with_capacity(256);
        let mut capture = LiveCapture::new();
        capture.set_recording(true);
        capture.update_clock(&clock(0, 0));

        let plan = capture.plan_event(&track, &note_on(60, 100, 10)).unwrap();
        capture.commit_plan(&mut track, &mut pool, &plan).unwrap();

        let step = &track.steps[0];
        assert!(step.voices[0].is_playable());
        assert_eq!(step.voices[0].note, 60);
        assert_eq!(step.voices[0].velocity, 100);

        let ids: Vec<u8> = step.plock_entries(&pool).map(|e| e.id).collect();
        assert_eq!(ids, vec![0x08, 0x0C, 0x14]);
    }

    #[test]
    fn test_note_off_commits_length() {
        let mut track = Track::new();
        let mut pool = PlockPool::with_capacity(256);
        let mut capture = LiveCapture::new();
        capture.set_recording(true);
        capture.update_clock(&clock(0, 0));

        let plan = capture.plan_event(&track, &note_on(60, 100, 10)).unwrap();
        capture.commit_plan(&mut track, &mut pool, &plan).unwrap();

        capture.update_clock(&clock(600, 1));
        let plan = capture.plan_event(&track, &note_off(60, 1210)).unwrap();
        capture.commit_plan(&mut track, &mut pool, &plan).unwrap();

        let step = &track.steps[0];
        assert_eq!(step.voices[0].length, 2);
        let length_entry = step
            .plock_entries(&pool)
            .find(|e| e.id == 0x10)
            .expect("length p-lock");
        assert_eq!(length_entry.value, 2);
    }

    #[test]
    fn test_same_slot_reassign_on_new_note() {
        let mut track = Track::new();
        let mut pool = PlockPool::with_capacity(256);
        let mut capture = LiveCapture::new();
        capture.set_recording(true);
        capture.update_clock(&clock(0, 0));

        let plan = capture.plan_event(&track, &note_on(60, 100, 0)).unwrap();
        capture.commit_plan(&mut track, &mut pool, &plan).unwrap();
        // Different note on the same step takes the next free slot.
        let plan = capture.plan_event(&track, &note_on(64, 90, 20)).unwrap();
        capture.commit_plan(&mut track, &mut pool, &plan).unwrap();

        let step = &track.steps[0];
        assert_eq!(step.voices[0].note, 60);
        assert_eq!(step.voices[1].note, 64);
        assert!(step.voices[1].is_playable());
    }

    #[test]
    fn test_pool_exhaustion_rolls_back() {
        let mut track = Track::new();
        // Room for nothing: the three-entry commit must fail.
        let mut pool = PlockPool::with_capacity(2);
        let mut capture = LiveCapture::new();
        capture.set_recording(true);
        capture.update_clock(&clock(0, 0));

        let seen = track.generation;
        let plan = capture.plan_event(&track, &note_on(60, 100, 10)).unwrap();
        assert_eq!(
            capture.commit_plan(&mut track, &mut pool, &plan),
            Err(SeqError::PoolExhausted)
        );

        let step = &track.steps[0];
        assert_eq!(step.plocks.count, 0);
        assert_eq!(pool.used(), 0);
        assert!(!capture.voices[0].active);
        assert!(!track.generation.has_changed(&seen));
    }

    #[test]
    fn test_divmod_floor() {
        assert_eq!(divmod_floor(7, 3), (2, 1));
        assert_eq!(divmod_floor(-1, 3), (-1, 2));
        assert_eq!(divmod_floor(-3, 3), (-1, 0));
        assert_eq!(divmod_floor(5, 0), (0, 0));
    }

    #[test]
    fn test_length_rounding() {
        assert_eq!(compute_length_steps(0, 0, 600), 1);
        assert_eq!(compute_length_steps(0, 299, 600), 1);
        assert_eq!(compute_length_steps(0, 300, 600), 1);
        assert_eq!(compute_length_steps(0, 301, 600), 1);
        assert_eq!(compute_length_steps(10, 1210, 600), 2);
        assert_eq!(compute_length_steps(0, 600 * 100, 600), 64);
    }
}
