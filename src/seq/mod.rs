pub mod clock;
pub mod codec;
pub mod engine;
pub mod hold;
pub mod live;
pub mod model;
pub mod plock;
pub mod pool;
pub mod probe;
pub mod project;
pub mod reader;
pub mod runner;

pub use clock::ClockStepInfo;
pub use codec::{decode_track, encode_track, DecodePolicy, TrackCodecVersion};
pub use engine::{Engine, EngineController, GridSnapshot};
pub use hold::{HoldEditor, HoldParam, HoldParamView, HoldView};
pub use live::{CaptureEventKind, CaptureInput, CapturePlan, LiveCapture};
pub use model::{
    Generation, QuantizeConfig, QuantizeGrid, ScaleConfig, ScaleMode, Step, StepOffsets, Track,
    TrackConfig, TransposeConfig, Voice,
};
pub use plock::{Plock, PlockEntry};
pub use pool::PlockPool;
pub use probe::{MidiProbe, ProbeEvent, ProbeEventKind};
pub use project::{CartRef, Project};
pub use reader::{PlockIter, Reader, StepView, StepVoiceView, TrackHandle};
pub use runner::{CartSink, EngineRunner, MidiSink};

/// Number of steps on a track.
pub const STEPS_PER_TRACK: usize = 64;
/// Number of voice slots per step.
pub const VOICES_PER_STEP: usize = 4;
/// Maximum number of parameter locks a single step may carry.
pub const MAX_PLOCKS_PER_STEP: usize = 24;
/// Number of tracks a project exposes.
pub const MAX_TRACKS: usize = 16;
/// Number of banks stored by a project.
pub const BANK_COUNT: usize = 16;
/// Number of patterns per bank.
pub const PATTERNS_PER_BANK: usize = 16;
/// Bytes reserved per serialized track payload in flash.
pub const PATTERN_STORAGE_MAX: usize = 3968;

/// Total p-lock pool capacity: every step of every track filled to the cap.
pub const POOL_CAPACITY: usize = MAX_TRACKS * STEPS_PER_TRACK * MAX_PLOCKS_PER_STEP;

/// Errors surfaced by the sequencer core.
///
/// All of these are recoverable: the engine never unwinds across the clock
/// callback, callers roll back and keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SeqError {
    /// The p-lock pool cannot satisfy an allocation.
    #[error("p-lock pool exhausted")]
    PoolExhausted,
    /// A staged p-lock buffer would exceed the per-step cap.
    #[error("per-step p-lock capacity exceeded")]
    CapacityExceeded,
    /// A reader handle does not match the active (bank, pattern).
    #[error("stale track handle")]
    InvalidHandle,
    /// The decoder hit an impossible header or a short voice payload.
    #[error("corrupt track payload")]
    Corrupt,
    /// The encoder ran out of output buffer.
    #[error("encode buffer too small")]
    BufferTooSmall,
    /// An index was outside its compile-time bound.
    #[error("index out of range")]
    OutOfRange,
}
