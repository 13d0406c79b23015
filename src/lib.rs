// Groovebox sequencer core: pattern model, live capture, clock-driven
// playback and persistence for a 16-track MIDI step sequencer.
//
// The real-time side (model + engine) is a plain library with no I/O of
// its own; hosts provide a clock, a MIDI sink and a cart sink. UI threads
// talk to the engine over lock-free command/event rings and read the grid
// through a published snapshot.

pub mod command;
pub mod io;
pub mod seq;
pub mod tui;

// Re-export commonly used types
pub use command::{Command, EngineEvent};
pub use io::{FlashStore, MemFlash, MidiOutput, PatternStore};
pub use seq::{
    CaptureInput, ClockStepInfo, Engine, EngineController, GridSnapshot, PlockPool, Project,
    Reader, SeqError, Track, TrackHandle,
};
