//! Sector-addressed flash seam and the pattern slot layout on top of it.
//!
//! The codec works on in-memory byte buffers; this module owns where those
//! buffers live in flash. Each (bank, pattern, track) triple gets a fixed
//! slot: a `u32` payload length followed by up to `PATTERN_STORAGE_MAX`
//! bytes of encoded track.

use crate::seq::codec::{decode_track, encode_track, DecodePolicy, TrackCodecVersion};
use crate::seq::{
    PlockPool, SeqError, Track, BANK_COUNT, MAX_TRACKS, PATTERNS_PER_BANK, PATTERN_STORAGE_MAX,
};

/// Sector-addressed storage backend.
pub trait FlashStore {
    fn capacity(&self) -> u32;
    fn sector_size(&self) -> u32;
    fn read(&self, address: u32, buf: &mut [u8]) -> bool;
    fn write(&mut self, address: u32, data: &[u8]) -> bool;
    fn erase_sector(&mut self, address: u32) -> bool;
}

/// In-memory flash used by tests and the demo binary.
pub struct MemFlash {
    data: Vec<u8>,
    sector_size: u32,
}

impl MemFlash {
    pub fn new(capacity: u32, sector_size: u32) -> Self {
        Self {
            data: vec![0xFF; capacity as usize],
            sector_size,
        }
    }

    /// Big enough for a whole project worth of patterns.
    pub fn for_project() -> Self {
        let slots = (BANK_COUNT * PATTERNS_PER_BANK * MAX_TRACKS) as u32;
        Self::new(slots * PatternStore::SLOT_SIZE as u32, 4096)
    }
}

impl FlashStore for MemFlash {
    fn capacity(&self) -> u32 {
        self.data.len() as u32
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn read(&self, address: u32, buf: &mut [u8]) -> bool {
        let start = address as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return false;
        }
        buf.copy_from_slice(&self.data[start..end]);
        true
    }

    fn write(&mut self, address: u32, data: &[u8]) -> bool {
        let start = address as usize;
        let end = start + data.len();
        if end > self.data.len() {
            return false;
        }
        self.data[start..end].copy_from_slice(data);
        true
    }

    fn erase_sector(&mut self, address: u32) -> bool {
        let start = (address - address % self.sector_size) as usize;
        let end = start + self.sector_size as usize;
        if end > self.data.len() {
            return false;
        }
        self.data[start..end].fill(0xFF);
        true
    }
}

/// Fixed-slot pattern layout over a [`FlashStore`].
pub struct PatternStore;

impl PatternStore {
    /// Length prefix plus the encoded payload area.
    pub const SLOT_SIZE: usize = 4 + PATTERN_STORAGE_MAX;

    fn slot_address(bank: u8, pattern: u8, track: u8) -> Option<u32> {
        if bank as usize >= BANK_COUNT
            || pattern as usize >= PATTERNS_PER_BANK
            || track as usize >= MAX_TRACKS
        {
            return None;
        }
        let index = ((bank as usize * PATTERNS_PER_BANK) + pattern as usize) * MAX_TRACKS
            + track as usize;
        Some((index * Self::SLOT_SIZE) as u32)
    }

    /// Encode a track and write it into its slot. Returns bytes written.
    pub fn save_track(
        flash: &mut dyn FlashStore,
        bank: u8,
        pattern: u8,
        track_index: u8,
        track: &Track,
        pool: &PlockPool,
    ) -> Result<usize, SeqError> {
        let address = Self::slot_address(bank, pattern, track_index).ok_or(SeqError::OutOfRange)?;
        let mut payload = vec![0u8; PATTERN_STORAGE_MAX];
        let written = encode_track(track, pool, &mut payload, TrackCodecVersion::V2)?;

        // Sector pre-erase is the project save layer's job: slots are
        // smaller than sectors and an erase here would clobber neighbours.
        if !flash.write(address, &(written as u32).to_le_bytes())
            || !flash.write(address + 4, &payload[..written])
        {
            return Err(SeqError::OutOfRange);
        }
        Ok(written)
    }

    /// Read a slot back into a track.
    pub fn load_track(
        flash: &dyn FlashStore,
        bank: u8,
        pattern: u8,
        track_index: u8,
        track: &mut Track,
        pool: &mut PlockPool,
        policy: DecodePolicy,
    ) -> Result<(), SeqError> {
        let address = Self::slot_address(bank, pattern, track_index).ok_or(SeqError::OutOfRange)?;
        let mut length_bytes = [0u8; 4];
        if !flash.read(address, &mut length_bytes) {
            return Err(SeqError::OutOfRange);
        }
        let length = u32::from_le_bytes(length_bytes) as usize;
        if length == 0 || length > PATTERN_STORAGE_MAX {
            return Err(SeqError::Corrupt);
        }
        let mut payload = vec![0u8; length];
        if !flash.read(address + 4, &mut payload) {
            return Err(SeqError::OutOfRange);
        }
        decode_track(track, pool, &payload, 2, policy)
    }
}
