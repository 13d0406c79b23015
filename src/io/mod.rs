pub mod flash;
pub mod midi_out;

pub use flash::{FlashStore, MemFlash, PatternStore};
pub use midi_out::MidiOutput;
