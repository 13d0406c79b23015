//! Clock-step payload delivered at the 1/16 rate by the master clock.

/// Everything the engine needs to know about one step boundary.
///
/// `now` and the two durations share one timebase (system ticks); the
/// absolute step index is monotonic from transport start and may exceed the
/// pattern length, callers wrap it themselves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockStepInfo {
    /// Absolute timestamp of this step boundary.
    pub now: u32,
    /// 1/16-step counter since transport start.
    pub step_idx_abs: u32,
    /// Current tempo.
    pub bpm: f32,
    /// Duration of one MIDI tick (24 PPQN).
    pub tick_duration: u32,
    /// Duration of one 1/16 step (six ticks).
    pub step_duration: u32,
    /// True when the active source is an external MIDI clock.
    pub external: bool,
}

impl ClockStepInfo {
    /// Synthesize a step info from a tempo, for internal clock sources.
    /// Durations are expressed in microseconds.
    pub fn from_bpm(bpm: f32, step_idx_abs: u32, now: u32) -> Self {
        let tick_duration = (60_000_000.0 / (bpm * 24.0)) as u32;
        Self {
            now,
            step_idx_abs,
            bpm,
            tick_duration,
            step_duration: tick_duration * 6,
            external: false,
        }
    }
}
