//! Project container: the 16 runtime tracks, their cart bindings and the
//! active (bank, pattern, track) selection.

use serde::{Deserialize, Serialize};

use super::model::{Generation, Track, TrackConfig};
use super::reader::TrackHandle;
use super::{BANK_COUNT, MAX_TRACKS, PATTERNS_PER_BANK};

/// Maximum length for project names.
pub const PROJECT_NAME_MAX: usize = 24;

/// Persistent reference describing how a track binds to a cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CartRef {
    /// Unique cartridge identifier.
    pub cart_id: u32,
    /// Physical slot the cart was saved from.
    pub slot: u8,
    /// Capability bitmask advertised by the cart.
    pub capabilities: u16,
    /// Track muted at the routing layer.
    pub muted: bool,
}

/// Project-level metadata that survives independently of step payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMeta {
    pub name: String,
    pub tempo: u32,
    pub active_bank: u8,
    pub active_pattern: u8,
    pub active_track: u8,
    pub carts: Vec<CartRef>,
    pub track_configs: Vec<TrackConfig>,
}

/// The whole runtime block: one project and its track array, allocated once
/// and reset in place. All mutation happens on the real-time thread.
pub struct Project {
    tracks: Vec<Track>,
    carts: [CartRef; MAX_TRACKS],
    active_bank: u8,
    active_pattern: u8,
    active_track: u8,
    generation: Generation,
    /// Tempo snapshot persisted with the project.
    pub tempo: u32,
    pub name: String,
}

impl Project {
    /// Build the project with all tracks initialised and track 0 active.
    pub fn new() -> Self {
        Self {
            tracks: (0..MAX_TRACKS).map(|_| Track::new()).collect(),
            carts: [CartRef::default(); MAX_TRACKS],
            active_bank: 0,
            active_pattern: 0,
            active_track: 0,
            generation: Generation::default(),
            tempo: 120,
            name: String::new(),
        }
    }

    /// Reset every track and the selection to boot state.
    pub fn init(&mut self) {
        for track in &mut self.tracks {
            track.init();
        }
        self.carts = [CartRef::default(); MAX_TRACKS];
        self.active_bank = 0;
        self.active_pattern = 0;
        self.active_track = 0;
        self.generation = Generation::default();
        self.tempo = 120;
        self.name.clear();
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index)
    }

    pub fn active_track_index(&self) -> usize {
        self.active_track as usize
    }

    pub fn active_track(&self) -> &Track {
        &self.tracks[self.active_track as usize]
    }

    pub fn active_track_mut(&mut self) -> &mut Track {
        &mut self.tracks[self.active_track as usize]
    }

    /// Select another track; out-of-range indices are rejected.
    pub fn set_active_track(&mut self, index: usize) -> bool {
        if index >= self.tracks.len() {
            return false;
        }
        if self.active_track as usize != index {
            self.active_track = index as u8;
            self.generation.bump();
        }
        true
    }

    pub fn active_bank(&self) -> u8 {
        self.active_bank
    }

    pub fn active_pattern(&self) -> u8 {
        self.active_pattern
    }

    /// Select the active (bank, pattern) slot.
    pub fn set_active_slot(&mut self, bank: u8, pattern: u8) -> bool {
        if bank as usize >= BANK_COUNT || pattern as usize >= PATTERNS_PER_BANK {
            return false;
        }
        if self.active_bank != bank || self.active_pattern != pattern {
            self.active_bank = bank;
            self.active_pattern = pattern;
            self.generation.bump();
        }
        true
    }

    /// Handle addressing the active track, for reader consumers.
    pub fn active_handle(&self) -> TrackHandle {
        TrackHandle {
            bank: self.active_bank,
            pattern: self.active_pattern,
            track: self.active_track,
        }
    }

    pub fn cart(&self, index: usize) -> Option<&CartRef> {
        self.carts.get(index)
    }

    pub fn set_cart(&mut self, index: usize, cart: CartRef) -> bool {
        match self.carts.get_mut(index) {
            Some(slot) => {
                *slot = cart;
                self.generation.bump();
                true
            }
            None => false,
        }
    }

    pub fn is_track_muted(&self, index: usize) -> bool {
        self.carts.get(index).map(|c| c.muted).unwrap_or(false)
    }

    pub fn set_track_muted(&mut self, index: usize, muted: bool) -> bool {
        match self.carts.get_mut(index) {
            Some(cart) => {
                cart.muted = muted;
                self.generation.bump();
                true
            }
            None => false,
        }
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    pub fn bump_generation(&mut self) {
        self.generation.bump();
    }

    /// Snapshot the serde-carried metadata (step payloads go through the
    /// binary track codec instead).
    pub fn meta(&self) -> ProjectMeta {
        ProjectMeta {
            name: self.name.clone(),
            tempo: self.tempo,
            active_bank: self.active_bank,
            active_pattern: self.active_pattern,
            active_track: self.active_track,
            carts: self.carts.to_vec(),
            track_configs: self.tracks.iter().map(|t| t.config).collect(),
        }
    }

    /// Restore metadata produced by [`Project::meta`].
    pub fn apply_meta(&mut self, meta: &ProjectMeta) {
        self.name = meta.name.chars().take(PROJECT_NAME_MAX).collect();
        self.tempo = meta.tempo;
        let _ = self.set_active_slot(meta.active_bank, meta.active_pattern);
        let _ = self.set_active_track(meta.active_track as usize);
        for (i, cart) in meta.carts.iter().take(MAX_TRACKS).enumerate() {
            self.carts[i] = *cart;
        }
        for (i, config) in meta.track_configs.iter().enumerate() {
            if let Some(track) = self.tracks.get_mut(i) {
                track.config = *config;
            }
        }
        self.generation.bump();
    }
}

impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}
