//! Playback smoke tests: event pairing, retrigger ordering, cart routing.

use seq_backend::seq::runner::{CartSink, EngineRunner, MidiSink};
use seq_backend::seq::{CartRef, ClockStepInfo, PlockEntry, PlockPool, Project, STEPS_PER_TRACK};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Ev {
    On(u8, u8, u8),
    Off(u8, u8),
    Cc(u8, u8, u8),
}

struct EventLog {
    events: Vec<Ev>,
}

impl EventLog {
    fn new() -> Self {
        Self { events: Vec::new() }
    }

    fn ons(&self) -> usize {
        self.events.iter().filter(|e| matches!(e, Ev::On(..))).count()
    }

    fn offs(&self) -> usize {
        self.events.iter().filter(|e| matches!(e, Ev::Off(..))).count()
    }
}

impl MidiSink for EventLog {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        self.events.push(Ev::On(channel, note, velocity));
    }
    fn note_off(&mut self, channel: u8, note: u8, _velocity: u8) {
        self.events.push(Ev::Off(channel, note));
    }
    fn cc(&mut self, channel: u8, controller: u8, value: u8) {
        self.events.push(Ev::Cc(channel, controller, value));
    }
}

struct CartWrites {
    writes: Vec<(u16, u8)>,
}

impl CartSink for CartWrites {
    fn set_param(&mut self, _cart: &CartRef, param_id: u16, value: u8) {
        self.writes.push((param_id, value));
    }
}

fn tick(step_idx_abs: u32) -> ClockStepInfo {
    ClockStepInfo {
        now: step_idx_abs * 6,
        step_idx_abs,
        bpm: 120.0,
        tick_duration: 1,
        step_duration: 6,
        external: false,
    }
}

fn arm(project: &mut Project, track: usize, step: usize, note: u8, length: u8) {
    let step = project.track_mut(track).unwrap().step_mut(step).unwrap();
    step.make_neutral();
    step.voices[0].note = note;
    step.voices[0].length = length;
}

#[test]
fn full_pattern_runs_without_silent_ticks() {
    let mut project = Project::new();
    let pool = PlockPool::new();
    for step in 0..STEPS_PER_TRACK {
        arm(&mut project, 0, step, 60 + (step % 12) as u8, 1);
    }

    let mut runner = EngineRunner::new();
    let mut midi = EventLog::new();
    let mut cart = CartWrites { writes: Vec::new() };
    runner.transport_start();
    for t in 0..64 {
        runner.on_clock_step(&project, &pool, &tick(t), &mut midi, &mut cart);
    }

    assert!(midi.ons() > 0);
    assert!(midi.offs() > 0);
    assert_eq!(runner.probe().silent_ticks(), 0);
}

#[test]
fn same_note_retrigger_emits_forced_off() {
    let mut project = Project::new();
    let pool = PlockPool::new();
    arm(&mut project, 0, 0, 60, 1);
    arm(&mut project, 0, 1, 60, 1);

    let mut runner = EngineRunner::new();
    let mut midi = EventLog::new();
    let mut cart = CartWrites { writes: Vec::new() };
    runner.transport_start();
    for t in 0..3 {
        runner.on_clock_step(&project, &pool, &tick(t), &mut midi, &mut cart);
    }

    assert_eq!(
        midi.events,
        vec![
            Ev::On(1, 60, 100),
            Ev::Off(1, 60),
            Ev::On(1, 60, 100),
            Ev::Off(1, 60),
        ],
    );
    assert_eq!(runner.probe().silent_ticks(), 0);
}

#[test]
fn automation_only_step_routes_cart_param() {
    let mut project = Project::new();
    let mut pool = PlockPool::new();
    project.set_cart(
        0,
        CartRef {
            cart_id: 1,
            slot: 0,
            capabilities: 0,
            muted: false,
        },
    );
    {
        let step = project.track_mut(0).unwrap().step_mut(1).unwrap();
        step.set_plocks_pooled(&mut pool, &[PlockEntry::cart(0x47, 42)])
            .unwrap();
        assert!(step.is_automation_only());
        assert!(!step.has_playable_voice());
    }

    let mut runner = EngineRunner::new();
    let mut midi = EventLog::new();
    let mut cart = CartWrites { writes: Vec::new() };
    runner.transport_start();
    for t in 0..2 {
        runner.on_clock_step(&project, &pool, &tick(t), &mut midi, &mut cart);
    }

    assert_eq!(cart.writes, vec![(0x47, 42)]);
    assert!(midi.events.is_empty());
}

#[test]
fn tracks_map_to_ascending_channels() {
    let mut project = Project::new();
    let pool = PlockPool::new();
    for track in 0..16 {
        arm(&mut project, track, 0, 60, 1);
    }

    let mut runner = EngineRunner::new();
    let mut midi = EventLog::new();
    let mut cart = CartWrites { writes: Vec::new() };
    runner.transport_start();
    runner.on_clock_step(&project, &pool, &tick(0), &mut midi, &mut cart);

    let channels: Vec<u8> = midi
        .events
        .iter()
        .filter_map(|e| match e {
            Ev::On(ch, _, _) => Some(*ch),
            _ => None,
        })
        .collect();
    assert_eq!(channels, (1..=16).collect::<Vec<u8>>());
}

#[test]
fn transport_stop_pairs_every_note_and_flushes_cc123() {
    let mut project = Project::new();
    let pool = PlockPool::new();
    arm(&mut project, 0, 0, 60, 16);
    arm(&mut project, 3, 0, 72, 16);

    let mut runner = EngineRunner::new();
    let mut midi = EventLog::new();
    let mut cart = CartWrites { writes: Vec::new() };
    runner.transport_start();
    runner.on_clock_step(&project, &pool, &tick(0), &mut midi, &mut cart);
    runner.transport_stop(1, &mut midi);

    assert_eq!(midi.ons(), midi.offs());
    let ccs: Vec<Ev> = midi
        .events
        .iter()
        .copied()
        .filter(|e| matches!(e, Ev::Cc(..)))
        .collect();
    assert_eq!(ccs, vec![Ev::Cc(1, 123, 0), Ev::Cc(4, 123, 0)]);
}
