//! Versioned track byte codec with the packed "PLK2" p-lock chunk.
//!
//! Layout (little-endian):
//!
//! ```text
//! u16 step_count                   (always STEPS_PER_TRACK)
//!   step × N:
//!     u8  skip_runs                (reserved, zero on write)
//!     u8  flags                    (bits 3..6 = voice payload mask)
//!     u8  voice_mask               (bit i = slot i enabled)
//!     u8  legacy_plock_count       (zero when a PLK2 chunk follows)
//!     per payload-mask bit:  u8 note, u8 velocity, u8 length, i8 micro
//!     per legacy count:      i16 value, u8 meta   (consumed, discarded)
//!     optional chunk:        "PLK2", u8 n, n × { u8 id, u8 value, u8 flags }
//! ```
//!
//! The encoder is a straight-line cursor walk; the decoder's
//! truncation-tolerance rule lives in exactly one place
//! ([`Decoder::read_plk2_chunk`]).

use log::warn;

use super::model::{Track, Voice};
use super::plock::{InternalParam, PlockEntry};
use super::pool::PlockPool;
use super::{SeqError, MAX_PLOCKS_PER_STEP, STEPS_PER_TRACK, VOICES_PER_STEP};

const PLK2_TAG: [u8; 4] = *b"PLK2";

/// On-disk format revision selected by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackCodecVersion {
    /// Legacy layout without PLK2 chunks; p-locks are not persisted.
    V1,
    /// Current layout: packed PLK2 chunk per non-empty step.
    V2,
}

/// Which p-locks survive a decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePolicy {
    /// Keep everything.
    Full,
    /// Keep entries whose domain is not cart.
    DropCart,
    /// Validate the payload but install nothing; voices stay disabled.
    Absent,
}

struct Cursor<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn push(&mut self, byte: u8) -> Result<(), SeqError> {
        if self.pos >= self.buf.len() {
            return Err(SeqError::BufferTooSmall);
        }
        self.buf[self.pos] = byte;
        self.pos += 1;
        Ok(())
    }

    fn push_slice(&mut self, bytes: &[u8]) -> Result<(), SeqError> {
        for &byte in bytes {
            self.push(byte)?;
        }
        Ok(())
    }
}

/// Serialize a track into `buf`, returning the number of bytes written.
///
/// On [`SeqError::BufferTooSmall`] the buffer content is undefined and the
/// caller treats the save as failed.
pub fn encode_track(
    track: &Track,
    pool: &PlockPool,
    buf: &mut [u8],
    version: TrackCodecVersion,
) -> Result<usize, SeqError> {
    let mut cursor = Cursor { buf, pos: 0 };
    cursor.push_slice(&(STEPS_PER_TRACK as u16).to_le_bytes())?;

    for step in &track.steps {
        let mut payload_mask = 0u8;
        let mut voice_mask = 0u8;
        for (slot, voice) in step.voices.iter().enumerate() {
            if voice_payload_differs(voice, slot) {
                payload_mask |= 1 << slot;
            }
            if voice.enabled {
                voice_mask |= 1 << slot;
            }
        }

        cursor.push(0)?; // skip_runs, reserved
        cursor.push(payload_mask << 3)?;
        cursor.push(voice_mask)?;
        cursor.push(0)?; // legacy p-lock count

        for (slot, voice) in step.voices.iter().enumerate() {
            if payload_mask & (1 << slot) == 0 {
                continue;
            }
            cursor.push(voice.note)?;
            cursor.push(voice.velocity)?;
            cursor.push(voice.length)?;
            cursor.push(voice.micro_offset as u8)?;
        }

        if version == TrackCodecVersion::V2 && step.plocks.count > 0 {
            cursor.push_slice(&PLK2_TAG)?;
            cursor.push(step.plocks.count)?;
            for entry in step.plock_entries(pool) {
                cursor.push(entry.id)?;
                cursor.push(entry.value)?;
                cursor.push(entry.flags)?;
            }
        }
    }

    Ok(cursor.pos)
}

/// True when the payload quad differs from the slot's flash default.
fn voice_payload_differs(voice: &Voice, slot: usize) -> bool {
    let default = Voice::slot_default(slot);
    voice.note != default.note
        || voice.velocity != default.velocity
        || voice.length != default.length
        || voice.micro_offset != default.micro_offset
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Set once a short PLK2 tail ended the stream; remaining steps stay
    /// at their defaults.
    ended: bool,
}

impl<'a> Decoder<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SeqError> {
        if self.remaining() < n {
            return Err(SeqError::Corrupt);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, SeqError> {
        Ok(self.take(1)?[0])
    }

    /// Parse an optional PLK2 chunk. Returns the entries to install, or
    /// `None` when no chunk is present or the chunk was skipped under the
    /// truncation-tolerance rule.
    fn read_plk2_chunk(&mut self) -> Result<Option<Vec<PlockEntry>>, SeqError> {
        if self.remaining() < 4 || self.buf[self.pos..self.pos + 4] != PLK2_TAG {
            return Ok(None);
        }
        self.pos += 4;

        if self.remaining() == 0 {
            // Tag with no count byte: chunk dropped, stream over.
            self.ended = true;
            return Ok(None);
        }
        let count = self.take_u8()? as usize;
        let payload = count * 3;

        if count > MAX_PLOCKS_PER_STEP {
            // Oversized chunk: skip its payload, keep no entries.
            let skip = payload.min(self.remaining());
            self.pos += skip;
            if skip < payload {
                self.ended = true;
            }
            return Ok(None);
        }
        if self.remaining() < payload {
            // Short payload: drop the chunk, the stream ends here.
            self.pos = self.buf.len();
            self.ended = true;
            return Ok(None);
        }

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let bytes = self.take(3)?;
            entries.push(PlockEntry {
                id: bytes[0],
                value: bytes[1],
                flags: bytes[2],
            });
        }
        Ok(Some(entries))
    }
}

/// Decode a track serialized by [`encode_track`].
///
/// Both format versions share the step layout; the version only drives
/// expectations around the PLK2 chunk. The track is fully re-initialised
/// before decoding.
pub fn decode_track(
    track: &mut Track,
    pool: &mut PlockPool,
    buf: &[u8],
    _version: u8,
    policy: DecodePolicy,
) -> Result<(), SeqError> {
    track.init();

    let mut decoder = Decoder {
        buf,
        pos: 0,
        ended: false,
    };

    let header = decoder.take(2)?;
    let step_count = u16::from_le_bytes([header[0], header[1]]);
    if step_count as usize != STEPS_PER_TRACK {
        return Err(SeqError::Corrupt);
    }

    for step_index in 0..STEPS_PER_TRACK {
        if decoder.ended {
            break;
        }

        let header = decoder.take(4)?;
        let payload_mask = (header[1] >> 3) & 0x0F;
        let voice_mask = header[2];
        let legacy_count = header[3] as usize;

        let step = &mut track.steps[step_index];
        for slot in 0..VOICES_PER_STEP {
            if payload_mask & (1 << slot) != 0 {
                let bytes = decoder.take(4)?;
                let voice = &mut step.voices[slot];
                voice.note = bytes[0];
                voice.velocity = bytes[1];
                voice.length = bytes[2];
                voice.micro_offset = bytes[3] as i8;
            }
            step.voices[slot].enabled = voice_mask & (1 << slot) != 0;
        }

        // Legacy in-step records: consumed for compatibility, never
        // installed (the PLK2 chunk is the only supported carrier).
        if legacy_count > 0 {
            decoder.take(legacy_count * 3)?;
        }

        if let Some(entries) = decoder.read_plk2_chunk()? {
            let kept: Vec<PlockEntry> = match policy {
                DecodePolicy::Full => entries,
                DecodePolicy::DropCart => {
                    entries.into_iter().filter(|e| !e.is_cart()).collect()
                }
                DecodePolicy::Absent => Vec::new(),
            };
            if !kept.is_empty() {
                if step.set_plocks_pooled(pool, &kept).is_err() {
                    warn!("track decode: p-lock pool full, step {step_index} loses its locks");
                }
                apply_all_offsets(step, pool);
            }
        }

        step.recompute_flags(pool);
    }

    // Unknown trailing bytes after a cleanly parsed stream are corruption.
    if !decoder.ended && decoder.remaining() > 0 {
        track.init();
        return Err(SeqError::Corrupt);
    }

    if policy == DecodePolicy::Absent {
        track.init();
    }

    Ok(())
}

/// Restore the duplicated step-offset fields from "all" domain p-locks.
/// The layout carries no offsets of its own; writers keep the two in sync.
fn apply_all_offsets(step: &mut super::model::Step, pool: &PlockPool) {
    let mut offsets = step.offsets;
    for entry in step.plock_entries(pool) {
        if entry.is_cart() {
            continue;
        }
        let value = entry.signed_value();
        match InternalParam::from_id(entry.id) {
            Some(InternalParam::AllTranspose) => offsets.transpose = value.clamp(-12, 12) as i8,
            Some(InternalParam::AllVelocity) => offsets.velocity = value.clamp(-127, 127) as i16,
            Some(InternalParam::AllLength) => offsets.length = value.clamp(-32, 32) as i8,
            Some(InternalParam::AllMicro) => offsets.micro = value.clamp(-12, 12) as i8,
            _ => {}
        }
    }
    step.offsets = offsets;
}
