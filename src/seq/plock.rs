//! Packed parameter-lock entries and the id space shared by the pool,
//! the reader, live capture and the codec.
//!
//! Ids below [`CART_ID_BASE`] address internal sequencer parameters; ids at
//! or above it address cartridge parameters opaquely. Signed payloads
//! (micro timing, the four "all" offsets) are stored biased by +128 with
//! the signed flag set.

use super::VOICES_PER_STEP;

/// First parameter id of the cartridge domain.
pub const CART_ID_BASE: u8 = 0x40;

/// "All" offset ids (signed payloads applied to every voice of the step).
pub const PL_ALL_TRANSPOSE: u8 = 0x00;
pub const PL_ALL_VELOCITY: u8 = 0x01;
pub const PL_ALL_LENGTH: u8 = 0x02;
pub const PL_ALL_MICRO: u8 = 0x03;

/// Per-voice id bases; the voice index (0..3) is added to the base.
pub const PL_NOTE_BASE: u8 = 0x08;
pub const PL_VELOCITY_BASE: u8 = 0x0C;
pub const PL_LENGTH_BASE: u8 = 0x10;
pub const PL_MICRO_BASE: u8 = 0x14;

/// Flags byte layout.
pub const FLAG_DOMAIN_CART: u8 = 0x01;
pub const FLAG_SIGNED: u8 = 0x02;
pub const FLAG_VOICE_SHIFT: u8 = 2;
pub const FLAG_VOICE_MASK: u8 = 0x0C;

/// Returns true when the id addresses an internal sequencer parameter.
pub fn id_is_internal(id: u8) -> bool {
    id < CART_ID_BASE
}

/// Bias a signed payload into its stored byte.
pub fn u8_from_s8(value: i8) -> u8 {
    (value as i16 + 128) as u8
}

/// Recover a signed payload from its stored byte.
pub fn s8_from_u8(raw: u8) -> i8 {
    (raw as i16 - 128) as i8
}

/// Internal sequencer parameters addressable through p-locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalParam {
    /// Per-voice note override.
    Note,
    /// Per-voice velocity override.
    Velocity,
    /// Per-voice length override.
    Length,
    /// Per-voice micro-timing override (signed).
    Micro,
    /// Whole-step transpose offset (signed).
    AllTranspose,
    /// Whole-step velocity offset (signed).
    AllVelocity,
    /// Whole-step length offset (signed).
    AllLength,
    /// Whole-step micro offset (signed).
    AllMicro,
}

impl InternalParam {
    /// True for the four "all" offsets that ignore the voice index.
    pub fn is_all(self) -> bool {
        matches!(
            self,
            InternalParam::AllTranspose
                | InternalParam::AllVelocity
                | InternalParam::AllLength
                | InternalParam::AllMicro
        )
    }

    /// Encode this parameter (for `voice` where applicable) into its id.
    pub fn encode_id(self, voice: u8) -> u8 {
        let voice = voice & 0x03;
        match self {
            InternalParam::Note => PL_NOTE_BASE + voice,
            InternalParam::Velocity => PL_VELOCITY_BASE + voice,
            InternalParam::Length => PL_LENGTH_BASE + voice,
            InternalParam::Micro => PL_MICRO_BASE + voice,
            InternalParam::AllTranspose => PL_ALL_TRANSPOSE,
            InternalParam::AllVelocity => PL_ALL_VELOCITY,
            InternalParam::AllLength => PL_ALL_LENGTH,
            InternalParam::AllMicro => PL_ALL_MICRO,
        }
    }

    /// Reverse mapping from an internal id.
    pub fn from_id(id: u8) -> Option<InternalParam> {
        match id {
            PL_ALL_TRANSPOSE => Some(InternalParam::AllTranspose),
            PL_ALL_VELOCITY => Some(InternalParam::AllVelocity),
            PL_ALL_LENGTH => Some(InternalParam::AllLength),
            PL_ALL_MICRO => Some(InternalParam::AllMicro),
            id if (PL_NOTE_BASE..PL_NOTE_BASE + 4).contains(&id) => Some(InternalParam::Note),
            id if (PL_VELOCITY_BASE..PL_VELOCITY_BASE + 4).contains(&id) => {
                Some(InternalParam::Velocity)
            }
            id if (PL_LENGTH_BASE..PL_LENGTH_BASE + 4).contains(&id) => Some(InternalParam::Length),
            id if (PL_MICRO_BASE..PL_MICRO_BASE + 4).contains(&id) => Some(InternalParam::Micro),
            _ => None,
        }
    }

    /// Index of the per-param ordinal used by the decoded 16-bit id space.
    fn ordinal(self) -> u16 {
        match self {
            InternalParam::Note => 0,
            InternalParam::Velocity => 1,
            InternalParam::Length => 2,
            InternalParam::Micro => 3,
            InternalParam::AllTranspose => 4,
            InternalParam::AllVelocity => 5,
            InternalParam::AllLength => 6,
            InternalParam::AllMicro => 7,
        }
    }
}

/// Voice slot carried by a per-voice id, falling back to the flag bits for
/// ids that do not encode one.
pub fn voice_from_id(id: u8, flags: u8) -> u8 {
    match id {
        id if (PL_NOTE_BASE..PL_NOTE_BASE + 4).contains(&id) => id - PL_NOTE_BASE,
        id if (PL_VELOCITY_BASE..PL_VELOCITY_BASE + 4).contains(&id) => id - PL_VELOCITY_BASE,
        id if (PL_LENGTH_BASE..PL_LENGTH_BASE + 4).contains(&id) => id - PL_LENGTH_BASE,
        id if (PL_MICRO_BASE..PL_MICRO_BASE + 4).contains(&id) => id - PL_MICRO_BASE,
        _ => (flags & FLAG_VOICE_MASK) >> FLAG_VOICE_SHIFT,
    }
}

/// One packed pool entry: parameter id, raw value byte, flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlockEntry {
    pub id: u8,
    pub value: u8,
    pub flags: u8,
}

impl PlockEntry {
    /// Pack an internal parameter lock.
    pub fn internal(param: InternalParam, voice: u8, value: i32) -> PlockEntry {
        let voice = voice % VOICES_PER_STEP as u8;
        let mut flags = 0u8;
        let raw = match param {
            InternalParam::Note | InternalParam::Velocity => {
                flags |= voice << FLAG_VOICE_SHIFT;
                value.clamp(0, 127) as u8
            }
            InternalParam::Length => {
                flags |= voice << FLAG_VOICE_SHIFT;
                value.clamp(0, 255) as u8
            }
            InternalParam::Micro => {
                flags |= voice << FLAG_VOICE_SHIFT;
                flags |= FLAG_SIGNED;
                u8_from_s8(value.clamp(-128, 127) as i8)
            }
            _ => {
                flags |= FLAG_SIGNED;
                u8_from_s8(value.clamp(-128, 127) as i8)
            }
        };
        PlockEntry {
            id: param.encode_id(voice),
            value: raw,
            flags,
        }
    }

    /// Pack a cartridge parameter lock.
    pub fn cart(param_id: u8, value: u8) -> PlockEntry {
        PlockEntry {
            id: param_id,
            value,
            flags: FLAG_DOMAIN_CART,
        }
    }

    pub fn is_cart(&self) -> bool {
        (self.flags & FLAG_DOMAIN_CART) != 0 || !id_is_internal(self.id)
    }

    pub fn is_signed(&self) -> bool {
        (self.flags & FLAG_SIGNED) != 0
    }

    pub fn voice(&self) -> u8 {
        voice_from_id(self.id, self.flags)
    }

    /// Raw value widened, honoring the signed bias.
    pub fn signed_value(&self) -> i32 {
        if self.is_signed() {
            s8_from_u8(self.value) as i32
        } else {
            self.value as i32
        }
    }

    /// Decode into the tagged representation.
    pub fn decode(&self) -> Plock {
        if self.is_cart() {
            Plock::Cart {
                param_id: self.id as u16,
                value: self.value,
            }
        } else {
            let param = InternalParam::from_id(self.id).unwrap_or(InternalParam::Note);
            Plock::Internal {
                param,
                voice: self.voice(),
                value: self.signed_value(),
            }
        }
    }

    /// 16-bit parameter address used by decoded iteration: internal ids get
    /// the high flag bit plus voice bits, cart ids pass through.
    pub fn wide_id(&self) -> u16 {
        if self.is_cart() {
            self.id as u16
        } else {
            let param = InternalParam::from_id(self.id).unwrap_or(InternalParam::Note);
            0x8000 | ((self.voice() as u16) << 8) | param.ordinal()
        }
    }
}

/// Decoded parameter lock over its two domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plock {
    Internal {
        param: InternalParam,
        voice: u8,
        value: i32,
    },
    Cart {
        param_id: u16,
        value: u8,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_bias_roundtrip() {
        for v in i8::MIN..=i8::MAX {
            assert_eq!(s8_from_u8(u8_from_s8(v)), v);
        }
    }

    #[test]
    fn test_internal_id_encoding() {
        assert_eq!(InternalParam::Note.encode_id(0), 0x08);
        assert_eq!(InternalParam::Note.encode_id(3), 0x0B);
        assert_eq!(InternalParam::Velocity.encode_id(1), 0x0D);
        assert_eq!(InternalParam::Length.encode_id(2), 0x12);
        assert_eq!(InternalParam::Micro.encode_id(3), 0x17);
        assert_eq!(InternalParam::AllVelocity.encode_id(2), 0x01);
    }

    #[test]
    fn test_id_reverse_mapping() {
        for voice in 0..4u8 {
            for param in [
                InternalParam::Note,
                InternalParam::Velocity,
                InternalParam::Length,
                InternalParam::Micro,
            ] {
                let id = param.encode_id(voice);
                assert_eq!(InternalParam::from_id(id), Some(param));
                assert_eq!(voice_from_id(id, 0), voice);
            }
        }
        assert_eq!(InternalParam::from_id(0x40), None);
    }

    #[test]
    fn test_micro_entry_is_signed() {
        let entry = PlockEntry::internal(InternalParam::Micro, 2, -7);
        assert!(entry.is_signed());
        assert!(!entry.is_cart());
        assert_eq!(entry.voice(), 2);
        assert_eq!(entry.signed_value(), -7);
    }

    #[test]
    fn test_cart_entry_decode() {
        let entry = PlockEntry::cart(0x47, 42);
        assert!(entry.is_cart());
        assert_eq!(
            entry.decode(),
            Plock::Cart {
                param_id: 0x47,
                value: 42
            }
        );
        assert_eq!(entry.wide_id(), 0x47);
    }

    #[test]
    fn test_wide_id_internal_layout() {
        let entry = PlockEntry::internal(InternalParam::Velocity, 3, 100);
        assert_eq!(entry.wide_id(), 0x8000 | (3 << 8) | 1);
    }
}
