//! midir-backed MIDI output sink for running the engine on a host.
//!
//! Opens a virtual output port where the platform supports it so DAWs and
//! soft synths can subscribe, falling back to the first hardware port.

use midir::MidiOutputConnection;

use crate::seq::MidiSink;

pub struct MidiOutput {
    conn: MidiOutputConnection,
}

impl MidiOutput {
    /// Open an output connection named `name`.
    pub fn new(name: &str) -> Result<Self, String> {
        let midi_out = midir::MidiOutput::new(name)
            .map_err(|e| format!("failed to initialize MIDI output: {}", e))?;

        #[cfg(unix)]
        {
            use midir::os::unix::VirtualOutput;
            match midi_out.create_virtual(name) {
                Ok(conn) => return Ok(Self { conn }),
                Err(err) => {
                    let midi_out = err.into_inner();
                    return Self::connect_first(midi_out, name);
                }
            }
        }

        #[cfg(not(unix))]
        Self::connect_first(midi_out, name)
    }

    fn connect_first(midi_out: midir::MidiOutput, name: &str) -> Result<Self, String> {
        let ports = midi_out.ports();
        let port = ports
            .first()
            .ok_or_else(|| "no MIDI output ports available".to_string())?;
        let conn = midi_out
            .connect(port, name)
            .map_err(|e| format!("failed to connect MIDI output: {}", e))?;
        Ok(Self { conn })
    }

    fn send(&mut self, message: &[u8]) {
        let _ = self.conn.send(message);
    }
}

impl MidiSink for MidiOutput {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        let status = 0x90 | ((channel.saturating_sub(1)) & 0x0F);
        self.send(&[status, note & 0x7F, velocity & 0x7F]);
    }

    fn note_off(&mut self, channel: u8, note: u8, velocity: u8) {
        let status = 0x80 | ((channel.saturating_sub(1)) & 0x0F);
        self.send(&[status, note & 0x7F, velocity & 0x7F]);
    }

    fn cc(&mut self, channel: u8, controller: u8, value: u8) {
        let status = 0xB0 | ((channel.saturating_sub(1)) & 0x0F);
        self.send(&[status, controller & 0x7F, value & 0x7F]);
    }
}
