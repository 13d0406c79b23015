//! In-memory ring of emitted MIDI events plus the silent-tick counter.
//!
//! The probe stays compiled into release builds: the soak and regression
//! suites key off it, and it is cheap enough to keep on the clock path.

/// Ring capacity; old events are overwritten once full.
pub const PROBE_CAPACITY: usize = 128;

/// Kind of event recorded by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeEventKind {
    NoteOn,
    NoteOff,
    /// Control change (all-notes-off and friends).
    Control,
    /// Cartridge parameter write.
    CartParam,
}

/// One recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeEvent {
    pub tick: u32,
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    pub kind: ProbeEventKind,
}

/// Fixed-capacity event ring with per-tick bookkeeping.
pub struct MidiProbe {
    ring: Vec<ProbeEvent>,
    head: usize,
    size: usize,
    silent_ticks: u32,
    tick_events: u32,
}

impl MidiProbe {
    pub fn new() -> Self {
        Self {
            ring: Vec::with_capacity(PROBE_CAPACITY),
            head: 0,
            size: 0,
            silent_ticks: 0,
            tick_events: 0,
        }
    }

    pub fn reset(&mut self) {
        self.ring.clear();
        self.head = 0;
        self.size = 0;
        self.silent_ticks = 0;
        self.tick_events = 0;
    }

    /// Start a tick: clears the per-tick event count.
    pub fn tick_begin(&mut self) {
        self.tick_events = 0;
    }

    /// Close a tick. `covered` reports whether an active voice gate spans
    /// the tick; a quiet tick under a held gate is not silent.
    pub fn tick_end(&mut self, covered: bool) {
        if self.tick_events == 0 && !covered {
            self.silent_ticks += 1;
        }
    }

    pub fn log(&mut self, event: ProbeEvent) {
        if self.ring.len() < PROBE_CAPACITY {
            self.ring.push(event);
        } else {
            let tail = (self.head + self.size) % PROBE_CAPACITY;
            self.ring[tail] = event;
            self.head = (self.head + 1) % PROBE_CAPACITY;
        }
        if self.size < PROBE_CAPACITY {
            self.size += 1;
        }
        self.tick_events += 1;
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn silent_ticks(&self) -> u32 {
        self.silent_ticks
    }

    pub fn events_this_tick(&self) -> u32 {
        self.tick_events
    }

    /// Events oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &ProbeEvent> {
        let head = self.head;
        let len = self.ring.len().max(1);
        (0..self.size).map(move |i| &self.ring[(head + i) % len])
    }
}

impl Default for MidiProbe {
    fn default() -> Self {
        Self::new()
    }
}
