use crate::seq::{
    CaptureInput, CartRef, HoldParam, QuantizeConfig, ScaleConfig, SeqError, TransposeConfig,
};

/// Commands sent from the UI/control thread to the sequencer thread.
#[derive(Debug, Clone, Copy)]
pub enum Command {
    // Transport
    /// Start playback from step 0.
    Play,
    /// Stop playback and flush hanging notes.
    Stop,
    /// Update the project tempo snapshot.
    SetTempo(u32),

    // Selection
    /// Select the active track.
    SelectTrack(usize),
    /// Select the active (bank, pattern) slot.
    SelectSlot(u8, u8),
    /// Mute or unmute a track at the routing layer.
    SetTrackMuted(usize, bool),

    // Step editing on the active track
    /// Toggle a step between neutral-playable and cleared.
    ToggleStep(usize),
    /// Force a step into (or out of) the automation-only shape.
    SetStepAutomationOnly(usize, bool),

    // Live capture
    /// Enable or disable live recording.
    SetRecording(bool),
    /// Feed a note event into live capture.
    Capture(CaptureInput),

    // Hold / preview editing
    /// Update the held-step mask for the visible page.
    HoldMask(u16),
    /// Apply a signed delta to a hold parameter on every held step.
    HoldApply(HoldParam, i32),
    /// Apply an absolute cart parameter write to every held step.
    HoldApplyCart(u16, u8),
    /// Release the hold, committing staged edits.
    HoldRelease,
    /// Move the hold editor to another page base.
    HoldPage(usize),

    // Track configuration
    SetQuantize(usize, QuantizeConfig),
    SetTranspose(usize, TransposeConfig),
    SetScale(usize, ScaleConfig),
    /// Bind cart metadata to a track.
    SetCart(usize, CartRef),
}

/// Feedback events from the sequencer thread to the UI.
#[derive(Debug, Clone, Copy)]
pub enum EngineEvent {
    /// Transport state changed.
    Transport(bool),
    /// A clock step was processed (absolute index).
    Step(u32),
    /// A capture commit landed on a step of the active track.
    CaptureCommitted(usize),
    /// A capture commit was rolled back.
    CaptureFailed(SeqError),
}
