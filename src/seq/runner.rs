//! Clock-driven playback: walks the active pattern one step per tick and
//! emits note and cart-parameter messages.
//!
//! The runner keeps one voice-gate record per track. Per tick, cart
//! p-locks go out first (so note emission plays against the freshly
//! applied cart parameters), then expired gates close, then the step's
//! primary voice fires. A gate still held when its track retriggers is
//! closed with a forced note-off in the same tick, preserving the MIDI
//! pairing invariant.

use super::clock::ClockStepInfo;
use super::model::{Step, Track, Voice};
use super::plock::{InternalParam, Plock};
use super::pool::PlockPool;
use super::probe::{MidiProbe, ProbeEvent, ProbeEventKind};
use super::project::{CartRef, Project};
use super::{MAX_TRACKS, STEPS_PER_TRACK};

/// All-notes-off controller number.
const CC_ALL_NOTES_OFF: u8 = 123;

/// Destination for note and controller messages. Implementations must not
/// block; hardware backends defer to their own TX queues.
pub trait MidiSink {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8);
    fn note_off(&mut self, channel: u8, note: u8, velocity: u8);
    fn cc(&mut self, channel: u8, controller: u8, value: u8);
}

/// Destination for cartridge parameter writes.
pub trait CartSink {
    fn set_param(&mut self, cart: &CartRef, param_id: u16, value: u8);
}

/// Sink that drops everything; useful for tests and headless runs.
pub struct NullSink;

impl MidiSink for NullSink {
    fn note_on(&mut self, _channel: u8, _note: u8, _velocity: u8) {}
    fn note_off(&mut self, _channel: u8, _note: u8, _velocity: u8) {}
    fn cc(&mut self, _channel: u8, _controller: u8, _value: u8) {}
}

impl CartSink for NullSink {
    fn set_param(&mut self, _cart: &CartRef, _param_id: u16, _value: u8) {}
}

/// Per-track active-voice record.
#[derive(Debug, Clone, Copy, Default)]
struct VoiceGate {
    active: bool,
    note: u8,
    off_tick: u32,
}

/// Effective parameters of a step's primary voice after p-lock and offset
/// resolution.
struct ResolvedVoice {
    note: u8,
    velocity: u8,
    length: u32,
}

pub struct EngineRunner {
    gates: [VoiceGate; MAX_TRACKS],
    running: bool,
    probe: MidiProbe,
}

impl EngineRunner {
    pub fn new() -> Self {
        Self {
            gates: [VoiceGate::default(); MAX_TRACKS],
            running: false,
            probe: MidiProbe::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn probe(&self) -> &MidiProbe {
        &self.probe
    }

    pub fn probe_mut(&mut self) -> &mut MidiProbe {
        &mut self.probe
    }

    /// Arm playback; gates start cleared.
    pub fn transport_start(&mut self) {
        self.gates = [VoiceGate::default(); MAX_TRACKS];
        self.running = true;
    }

    /// Stop playback: close every held gate and flush all-notes-off on its
    /// channel, in track order.
    pub fn transport_stop(&mut self, tick: u32, midi: &mut dyn MidiSink) {
        for (index, gate) in self.gates.iter_mut().enumerate() {
            if !gate.active {
                continue;
            }
            let channel = track_channel(index);
            midi.note_off(channel, gate.note, 0);
            self.probe.log(ProbeEvent {
                tick,
                channel,
                note: gate.note,
                velocity: 0,
                kind: ProbeEventKind::NoteOff,
            });
            midi.cc(channel, CC_ALL_NOTES_OFF, 0);
            self.probe.log(ProbeEvent {
                tick,
                channel,
                note: CC_ALL_NOTES_OFF,
                velocity: 0,
                kind: ProbeEventKind::Control,
            });
            gate.active = false;
        }
        self.running = false;
    }

    /// Process one clock step for all tracks in ascending index order.
    pub fn on_clock_step(
        &mut self,
        project: &Project,
        pool: &PlockPool,
        info: &ClockStepInfo,
        midi: &mut dyn MidiSink,
        cart: &mut dyn CartSink,
    ) {
        if !self.running {
            return;
        }

        let tick = info.step_idx_abs;
        let step_index = (tick as usize) % STEPS_PER_TRACK;
        self.probe.tick_begin();

        let mut gate_covers_tick = false;
        let mut any_playable = false;

        for track_index in 0..project.track_count().min(MAX_TRACKS) {
            let track = match project.track(track_index) {
                Some(track) => track,
                None => continue,
            };
            let channel = track_channel(track_index);
            let step = &track.steps[step_index];
            let muted = project.is_track_muted(track_index);

            // Cart parameters first, so the voice below plays against them.
            // Mute only gates note emission: the cart keeps tracking its
            // automation so it is in the right state when unmuted.
            if let Some(cart_ref) = project.cart(track_index) {
                for entry in step.plock_entries(pool) {
                    if let Plock::Cart { param_id, value } = entry.decode() {
                        cart.set_param(cart_ref, param_id, value);
                        self.probe.log(ProbeEvent {
                            tick,
                            channel,
                            note: param_id as u8,
                            velocity: value,
                            kind: ProbeEventKind::CartParam,
                        });
                    }
                }
            }

            // Close an expired gate before considering the new step.
            let gate = &mut self.gates[track_index];
            if gate.active && tick >= gate.off_tick {
                midi.note_off(channel, gate.note, 0);
                self.probe.log(ProbeEvent {
                    tick,
                    channel,
                    note: gate.note,
                    velocity: 0,
                    kind: ProbeEventKind::NoteOff,
                });
                gate.active = false;
            }

            if step.has_playable_voice() && !muted {
                any_playable = true;
                if let Some(resolved) = resolve_voice(track, step, pool) {
                    let gate = &mut self.gates[track_index];
                    // Forced note-off: the record is single, a held note
                    // must close before the retrigger regardless of pitch.
                    if gate.active {
                        midi.note_off(channel, gate.note, 0);
                        self.probe.log(ProbeEvent {
                            tick,
                            channel,
                            note: gate.note,
                            velocity: 0,
                            kind: ProbeEventKind::NoteOff,
                        });
                    }
                    midi.note_on(channel, resolved.note, resolved.velocity);
                    self.probe.log(ProbeEvent {
                        tick,
                        channel,
                        note: resolved.note,
                        velocity: resolved.velocity,
                        kind: ProbeEventKind::NoteOn,
                    });
                    *gate = VoiceGate {
                        active: true,
                        note: resolved.note,
                        off_tick: tick + resolved.length,
                    };
                }
            }

            if self.gates[track_index].active && self.gates[track_index].off_tick > tick {
                gate_covers_tick = true;
            }
        }

        // A tick with playable content that produced nothing and holds no
        // gate is the regression signal the soak tests watch.
        self.probe.tick_end(gate_covers_tick || !any_playable);
    }
}

impl Default for EngineRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// 1-based MIDI channel for a track, saturating at 16.
fn track_channel(track_index: usize) -> u8 {
    (track_index.min(15) + 1) as u8
}

/// First enabled voice with velocity, with its slot index.
fn primary_voice(step: &Step) -> Option<(usize, &Voice)> {
    step.voices
        .iter()
        .enumerate()
        .find(|(_, voice)| voice.is_playable())
}

/// Resolve the step's primary voice against p-locks, offsets, transpose
/// and scale. A p-lock wins for the parameter it addresses; offsets add on
/// top of whatever was not overridden.
fn resolve_voice(track: &Track, step: &Step, pool: &PlockPool) -> Option<ResolvedVoice> {
    let (slot, voice) = primary_voice(step)?;

    let mut note_plock = None;
    let mut vel_plock = None;
    let mut len_plock = None;
    let mut all_transpose = None;
    let mut all_velocity = None;
    let mut all_length = None;
    for entry in step.plock_entries(pool) {
        let (param, voice, value) = match entry.decode() {
            Plock::Internal {
                param,
                voice,
                value,
            } => (param, voice as usize, value),
            Plock::Cart { .. } => continue,
        };
        match param {
            InternalParam::Note if voice == slot => note_plock = Some(value),
            InternalParam::Velocity if voice == slot => vel_plock = Some(value),
            InternalParam::Length if voice == slot => len_plock = Some(value),
            InternalParam::AllTranspose => all_transpose = Some(value),
            InternalParam::AllVelocity => all_velocity = Some(value),
            InternalParam::AllLength => all_length = Some(value),
            _ => {}
        }
    }

    let transpose_offset = all_transpose.unwrap_or(step.offsets.transpose as i32)
        + track.config.transpose.global as i32
        + track.config.transpose.per_voice[slot] as i32;
    let velocity_offset = all_velocity.unwrap_or(step.offsets.velocity as i32);
    let length_offset = all_length.unwrap_or(step.offsets.length as i32);

    let base_note = note_plock.unwrap_or(voice.note as i32);
    let note = (base_note + transpose_offset).clamp(0, 127) as u8;
    let note = track.config.scale.snap(note);

    let base_velocity = vel_plock.unwrap_or(voice.velocity as i32);
    let velocity = (base_velocity + velocity_offset).clamp(0, 127) as u8;

    let base_length = len_plock.unwrap_or(voice.length as i32);
    let length = (base_length + length_offset).max(1) as u32;

    Some(ResolvedVoice {
        note,
        velocity,
        length,
    })
}
