//! Long-running soak: sixteen staggered tracks over thousands of ticks,
//! asserting the pairing invariant and a zero silent-tick count.

use std::collections::HashMap;

use seq_backend::seq::runner::{CartSink, EngineRunner, MidiSink};
use seq_backend::seq::{CartRef, ClockStepInfo, PlockPool, Project, STEPS_PER_TRACK};

const SOAK_TICKS: u32 = 10_000;

#[derive(Default)]
struct PairingLedger {
    /// (channel, note) -> open note-on count.
    open: HashMap<(u8, u8), i32>,
    ons: u64,
    offs: u64,
    /// Negative balance means an off without a matching on.
    underflow: bool,
}

impl MidiSink for PairingLedger {
    fn note_on(&mut self, channel: u8, note: u8, _velocity: u8) {
        *self.open.entry((channel, note)).or_insert(0) += 1;
        self.ons += 1;
    }
    fn note_off(&mut self, channel: u8, note: u8, _velocity: u8) {
        let balance = self.open.entry((channel, note)).or_insert(0);
        *balance -= 1;
        if *balance < 0 {
            self.underflow = true;
        }
        self.offs += 1;
    }
    fn cc(&mut self, _channel: u8, _controller: u8, _value: u8) {}
}

struct NoCart;

impl CartSink for NoCart {
    fn set_param(&mut self, _cart: &CartRef, _param_id: u16, _value: u8) {}
}

fn tick(step_idx_abs: u32) -> ClockStepInfo {
    ClockStepInfo {
        now: step_idx_abs.wrapping_mul(24),
        step_idx_abs,
        bpm: 120.0,
        tick_duration: 4,
        step_duration: 24,
        external: false,
    }
}

#[test]
fn sixteen_tracks_stay_paired_over_ten_thousand_ticks() {
    let mut project = Project::new();
    let pool = PlockPool::new();

    // Each track plays every fourth step, phase-shifted by track index.
    for track_index in 0..16 {
        let track = project.track_mut(track_index).unwrap();
        for step_index in 0..STEPS_PER_TRACK {
            if step_index % 4 != track_index % 4 {
                continue;
            }
            let step = track.step_mut(step_index).unwrap();
            step.make_neutral();
            step.voices[0].note = 60 + track_index as u8;
            step.voices[0].length = 1;
        }
        track.generation.bump();
    }

    let mut runner = EngineRunner::new();
    let mut midi = PairingLedger::default();
    let mut cart = NoCart;

    runner.transport_start();
    for t in 0..SOAK_TICKS {
        runner.on_clock_step(&project, &pool, &tick(t), &mut midi, &mut cart);
    }
    runner.transport_stop(SOAK_TICKS, &mut midi);

    assert!(midi.ons > 0);
    assert_eq!(midi.ons, midi.offs, "note-on/note-off pairing broke");
    assert!(!midi.underflow, "note-off preceded its note-on");
    assert!(midi.open.values().all(|balance| *balance == 0));
    assert_eq!(runner.probe().silent_ticks(), 0);
}

#[test]
fn restarting_transport_does_not_leak_gates() {
    let mut project = Project::new();
    let pool = PlockPool::new();
    let track = project.track_mut(0).unwrap();
    let step = track.step_mut(0).unwrap();
    step.make_neutral();
    step.voices[0].length = 32;

    let mut runner = EngineRunner::new();
    let mut midi = PairingLedger::default();
    let mut cart = NoCart;

    for _ in 0..50 {
        runner.transport_start();
        for t in 0..8 {
            runner.on_clock_step(&project, &pool, &tick(t), &mut midi, &mut cart);
        }
        runner.transport_stop(8, &mut midi);
    }

    assert_eq!(midi.ons, midi.offs);
    assert!(midi.open.values().all(|balance| *balance == 0));
}
