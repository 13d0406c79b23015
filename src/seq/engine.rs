//! Engine facade: owns the model and every subsystem, drains the command
//! queue and drives capture + playback from the clock callback.
//!
//! The engine lives on the sequencer thread. The UI talks to it through an
//! [`EngineController`]: commands go in over a lock-free ring, feedback
//! events come back the same way, and the step grid is published through a
//! triple buffer the UI reads without blocking.

use log::debug;

use crate::command::{Command, EngineEvent};

use super::clock::ClockStepInfo;
use super::hold::HoldEditor;
use super::live::{CaptureEventKind, LiveCapture};
use super::pool::PlockPool;
use super::project::Project;
use super::reader::Reader;
use super::runner::{CartSink, EngineRunner, MidiSink};
use super::STEPS_PER_TRACK;

/// Queue depth for commands and events.
const QUEUE_CAPACITY: usize = 256;

/// Per-step display flags published to the UI/LED side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotStep {
    pub active: bool,
    pub automation: bool,
}

/// Lock-free snapshot of the active track's grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridSnapshot {
    pub steps: [SnapshotStep; STEPS_PER_TRACK],
    pub playhead: u32,
    pub running: bool,
    pub recording: bool,
    pub active_track: u8,
    pub generation: u32,
}

impl Default for GridSnapshot {
    fn default() -> Self {
        Self {
            steps: [SnapshotStep::default(); STEPS_PER_TRACK],
            playhead: 0,
            running: false,
            recording: false,
            active_track: 0,
            generation: 0,
        }
    }
}

/// UI-side handle: command producer, event consumer, snapshot reader.
pub struct EngineController {
    command_tx: rtrb::Producer<Command>,
    event_rx: rtrb::Consumer<EngineEvent>,
    snapshot_rx: triple_buffer::Output<GridSnapshot>,
}

impl EngineController {
    /// Enqueue a command; returns false when the ring is full.
    pub fn send(&mut self, command: Command) -> bool {
        self.command_tx.push(command).is_ok()
    }

    /// Drain one pending feedback event.
    pub fn poll_event(&mut self) -> Option<EngineEvent> {
        self.event_rx.pop().ok()
    }

    /// Latest published grid snapshot.
    pub fn snapshot(&mut self) -> &GridSnapshot {
        self.snapshot_rx.read()
    }
}

pub struct Engine {
    project: Project,
    pool: PlockPool,
    capture: LiveCapture,
    hold: HoldEditor,
    runner: EngineRunner,
    command_rx: rtrb::Consumer<Command>,
    event_tx: rtrb::Producer<EngineEvent>,
    snapshot_tx: triple_buffer::Input<GridSnapshot>,
    last_tick: u32,
}

impl Engine {
    /// Build the engine and its paired controller.
    pub fn new() -> (Engine, EngineController) {
        let (command_tx, command_rx) = rtrb::RingBuffer::new(QUEUE_CAPACITY);
        let (event_tx, event_rx) = rtrb::RingBuffer::new(QUEUE_CAPACITY);
        let (snapshot_tx, snapshot_rx) =
            triple_buffer::TripleBuffer::new(&GridSnapshot::default()).split();

        let mut engine = Engine {
            project: Project::new(),
            pool: PlockPool::new(),
            capture: LiveCapture::new(),
            hold: HoldEditor::new(),
            runner: EngineRunner::new(),
            command_rx,
            event_tx,
            snapshot_tx,
            last_tick: 0,
        };
        engine.publish_snapshot();

        let controller = EngineController {
            command_tx,
            event_rx,
            snapshot_rx,
        };
        (engine, controller)
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn project_mut(&mut self) -> &mut Project {
        &mut self.project
    }

    pub fn pool(&self) -> &PlockPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut PlockPool {
        &mut self.pool
    }

    pub fn reader(&self) -> Reader<'_> {
        Reader::new(&self.project, &self.pool)
    }

    pub fn runner(&self) -> &EngineRunner {
        &self.runner
    }

    pub fn capture(&self) -> &LiveCapture {
        &self.capture
    }

    pub fn hold(&self) -> &HoldEditor {
        &self.hold
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    /// Clock-step entry point: drain commands, refresh the capture
    /// reference, run playback, publish the snapshot.
    pub fn on_clock_step(
        &mut self,
        info: &ClockStepInfo,
        midi: &mut dyn MidiSink,
        cart: &mut dyn CartSink,
    ) {
        self.last_tick = info.step_idx_abs;
        self.process_commands(midi);
        self.capture.update_clock(info);
        self.runner
            .on_clock_step(&self.project, &self.pool, info, midi, cart);
        let _ = self.event_tx.push(EngineEvent::Step(info.step_idx_abs));
        self.publish_snapshot();
    }

    /// Drain pending commands outside of a tick (idle transport).
    pub fn idle(&mut self, midi: &mut dyn MidiSink) {
        self.process_commands(midi);
        self.publish_snapshot();
    }

    /// Host teardown: flush hanging notes before the process exits.
    pub fn shutdown(&mut self, midi: &mut dyn MidiSink) {
        if self.runner.is_running() {
            self.runner.transport_stop(self.last_tick, midi);
        }
    }

    fn process_commands(&mut self, midi: &mut dyn MidiSink) {
        while let Ok(command) = self.command_rx.pop() {
            self.handle_command(command, midi);
        }
    }

    fn handle_command(&mut self, command: Command, midi: &mut dyn MidiSink) {
        match command {
            Command::Play => {
                self.capture.reset();
                self.runner.transport_start();
                let _ = self.event_tx.push(EngineEvent::Transport(true));
            }
            Command::Stop => {
                self.runner.transport_stop(self.last_tick, midi);
                self.capture.reset();
                let _ = self.event_tx.push(EngineEvent::Transport(false));
            }
            Command::SetTempo(tempo) => {
                self.project.tempo = tempo.clamp(20, 300);
            }
            Command::SelectTrack(index) => {
                if self.project.set_active_track(index) {
                    self.capture.reset();
                }
            }
            Command::SelectSlot(bank, pattern) => {
                let _ = self.project.set_active_slot(bank, pattern);
            }
            Command::SetTrackMuted(index, muted) => {
                let _ = self.project.set_track_muted(index, muted);
            }
            Command::ToggleStep(step_index) => self.toggle_step(step_index),
            Command::SetStepAutomationOnly(step_index, on) => {
                self.set_step_automation_only(step_index, on)
            }
            Command::SetRecording(enabled) => {
                self.capture.set_recording(enabled);
            }
            Command::Capture(input) => self.capture_event(input),
            Command::HoldMask(mask) => {
                let track = self.project.active_track_mut();
                self.hold.sync_mask(track, &mut self.pool, mask);
            }
            Command::HoldApply(param, delta) => {
                self.hold.apply_param(param, delta);
            }
            Command::HoldApplyCart(param_id, value) => {
                self.hold.apply_cart(param_id, value);
            }
            Command::HoldRelease => {
                let track = self.project.active_track_mut();
                self.hold.end_preview(track, &mut self.pool);
            }
            Command::HoldPage(page_base) => {
                let track = self.project.active_track_mut();
                self.hold.set_page_base(track, &mut self.pool, page_base);
            }
            Command::SetQuantize(index, config) => {
                if let Some(track) = self.project.track_mut(index) {
                    track.set_quantize(config);
                    track.generation.bump();
                }
            }
            Command::SetTranspose(index, config) => {
                if let Some(track) = self.project.track_mut(index) {
                    track.set_transpose(config);
                    track.generation.bump();
                }
            }
            Command::SetScale(index, config) => {
                if let Some(track) = self.project.track_mut(index) {
                    track.set_scale(config);
                    track.generation.bump();
                }
            }
            Command::SetCart(index, cart) => {
                let _ = self.project.set_cart(index, cart);
            }
        }
    }

    fn toggle_step(&mut self, step_index: usize) {
        if step_index >= STEPS_PER_TRACK {
            return;
        }
        let pool = &self.pool;
        let track = self.project.active_track_mut();
        let step = &mut track.steps[step_index];
        if step.has_playable_voice() {
            step.init();
            step.recompute_flags(pool);
        } else {
            step.make_neutral();
        }
        track.generation.bump();
    }

    fn set_step_automation_only(&mut self, step_index: usize, on: bool) {
        if step_index >= STEPS_PER_TRACK {
            return;
        }
        let pool = &self.pool;
        let track = self.project.active_track_mut();
        let step = &mut track.steps[step_index];
        if on {
            step.make_automation_only(pool);
        } else {
            step.make_neutral();
        }
        track.generation.bump();
    }

    fn capture_event(&mut self, input: super::live::CaptureInput) {
        let track = self.project.active_track_mut();
        let plan = match self.capture.plan_event(track, &input) {
            Some(plan) => plan,
            None => return,
        };
        match self.capture.commit_plan(track, &mut self.pool, &plan) {
            Ok(()) => {
                if plan.kind == CaptureEventKind::NoteOn {
                    debug!(
                        "capture: note {} -> step {} (micro {})",
                        plan.note, plan.step_index, plan.micro_offset
                    );
                }
                let _ = self
                    .event_tx
                    .push(EngineEvent::CaptureCommitted(plan.step_index));
            }
            Err(err) => {
                let _ = self.event_tx.push(EngineEvent::CaptureFailed(err));
            }
        }
    }

    /// Copy the active track's grid state into the triple buffer.
    fn publish_snapshot(&mut self) {
        let track = self.project.active_track();
        let mut snapshot = GridSnapshot {
            steps: [SnapshotStep::default(); STEPS_PER_TRACK],
            playhead: self.last_tick,
            running: self.runner.is_running(),
            recording: self.capture.is_recording(),
            active_track: self.project.active_track_index() as u8,
            generation: track.generation.value(),
        };
        for (index, step) in track.steps.iter().enumerate() {
            snapshot.steps[index] = SnapshotStep {
                active: step.has_playable_voice(),
                automation: step.is_automation_only(),
            };
        }
        self.snapshot_tx.write(snapshot);
    }
}
