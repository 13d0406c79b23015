//! Codec round-trip and a seeded mini-fuzz over the PLK2 chunk parser.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use seq_backend::seq::codec::{decode_track, encode_track, DecodePolicy, TrackCodecVersion};
use seq_backend::seq::plock::{FLAG_DOMAIN_CART, FLAG_SIGNED, FLAG_VOICE_SHIFT};
use seq_backend::seq::{
    PlockEntry, PlockPool, Track, MAX_PLOCKS_PER_STEP, PATTERN_STORAGE_MAX, STEPS_PER_TRACK,
};

fn populated_track(pool: &mut PlockPool) -> Track {
    let mut track = Track::new();

    track.steps[1]
        .set_plocks_pooled(
            pool,
            &[PlockEntry {
                id: 0x08,
                value: 0,
                flags: 0,
            }],
        )
        .unwrap();

    // A packed step: 24 entries alternating internal-signed and cart.
    let packed: Vec<PlockEntry> = (0..MAX_PLOCKS_PER_STEP as u8)
        .map(|i| {
            if i % 2 == 0 {
                PlockEntry {
                    id: 0x0C + (i % 4),
                    value: if i % 4 == 0 { 0 } else { 127 },
                    flags: FLAG_SIGNED | ((i % 4) << FLAG_VOICE_SHIFT),
                }
            } else {
                PlockEntry {
                    id: 0x40 + i,
                    value: 127,
                    flags: FLAG_DOMAIN_CART,
                }
            }
        })
        .collect();
    track.steps[2].set_plocks_pooled(pool, &packed).unwrap();

    for step_index in (0..STEPS_PER_TRACK).step_by(4) {
        let step = &mut track.steps[step_index];
        step.make_neutral();
        step.voices[0].note = 48 + step_index as u8;
        step.voices[0].velocity = 100 - step_index as u8;
        step.voices[1].length = 4;
        step.voices[1].micro_offset = -1;
    }

    track
}

#[test]
fn double_encode_is_byte_identical() {
    let mut pool = PlockPool::new();
    let track = populated_track(&mut pool);

    let mut buffer_a = vec![0u8; PATTERN_STORAGE_MAX];
    let written_a = encode_track(&track, &pool, &mut buffer_a, TrackCodecVersion::V2).unwrap();
    assert!(written_a > 0);

    let mut decoded = Track::new();
    let mut decode_pool = PlockPool::new();
    decode_track(
        &mut decoded,
        &mut decode_pool,
        &buffer_a[..written_a],
        2,
        DecodePolicy::Full,
    )
    .unwrap();

    let mut buffer_b = vec![0u8; PATTERN_STORAGE_MAX];
    let written_b =
        encode_track(&decoded, &decode_pool, &mut buffer_b, TrackCodecVersion::V2).unwrap();

    assert_eq!(buffer_a[..written_a], buffer_b[..written_b]);

    // The packed step survives with order and flag bits intact.
    let entries: Vec<PlockEntry> = decoded.steps[2]
        .plock_entries(&decode_pool)
        .copied()
        .collect();
    assert_eq!(entries.len(), MAX_PLOCKS_PER_STEP);
    let original: Vec<PlockEntry> = track.steps[2].plock_entries(&pool).copied().collect();
    assert_eq!(entries, original);
}

#[test]
fn encode_is_deterministic() {
    let mut pool = PlockPool::new();
    let track = populated_track(&mut pool);

    let mut buffer_a = vec![0u8; PATTERN_STORAGE_MAX];
    let mut buffer_b = vec![0u8; PATTERN_STORAGE_MAX];
    let a = encode_track(&track, &pool, &mut buffer_a, TrackCodecVersion::V2).unwrap();
    let b = encode_track(&track, &pool, &mut buffer_b, TrackCodecVersion::V2).unwrap();
    assert_eq!(buffer_a[..a], buffer_b[..b]);
}

/// Build a stream whose first step carries an arbitrary PLK2 chunk, then
/// empty headers for the remaining steps.
fn stream_with_chunk(chunk: &[u8], pad_remaining_steps: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(STEPS_PER_TRACK as u16).to_le_bytes());
    buf.extend_from_slice(&[0, 0, 0, 0]);
    buf.extend_from_slice(chunk);
    if pad_remaining_steps {
        for _ in 1..STEPS_PER_TRACK {
            buf.extend_from_slice(&[0, 0, 0, 0]);
        }
    }
    buf
}

#[test]
fn chunk_minifuzz_never_panics_and_filters_invalid() {
    let mut rng = StdRng::seed_from_u64(0x5EED);

    for _ in 0..2000 {
        let emit_tag: bool = rng.gen();
        let provide_count: bool = rng.gen();
        let force_truncate: bool = rng.gen();
        let stored_count = rng.gen_range(0..32u8);
        let payload_len = stored_count as usize * 3;

        let mut chunk = Vec::new();
        let mut provided_payload = payload_len;
        if emit_tag {
            chunk.extend_from_slice(b"PLK2");
            if provide_count {
                chunk.push(stored_count);
                if force_truncate && payload_len > 0 {
                    provided_payload = rng.gen_range(0..payload_len);
                }
                for i in 0..provided_payload {
                    chunk.push((i as u8).wrapping_mul(7).wrapping_add(1));
                }
            }
        } else {
            let junk_len = rng.gen_range(0..16usize);
            for _ in 0..junk_len {
                chunk.push(rng.gen_range(b'A'..=b'Z'));
            }
            if chunk.len() >= 4 {
                chunk[..4].copy_from_slice(b"BRK!");
            }
        }

        let complete = emit_tag && provide_count && provided_payload >= payload_len;
        let valid = complete && stored_count as usize <= MAX_PLOCKS_PER_STEP;
        // Junk after the step stream is a decode error, so only pad when
        // the chunk parses cleanly.
        let buf = stream_with_chunk(&chunk, valid || (!emit_tag && chunk.is_empty()));

        let mut track = Track::new();
        let mut pool = PlockPool::new();
        let result = decode_track(&mut track, &mut pool, &buf, 2, DecodePolicy::Full);

        if valid {
            result.unwrap();
            assert_eq!(track.steps[0].plocks.count as usize, stored_count as usize);
            let entries: Vec<PlockEntry> =
                track.steps[0].plock_entries(&pool).copied().collect();
            for (i, entry) in entries.iter().enumerate() {
                let base = 5 + i * 3;
                assert_eq!(entry.id, chunk[base]);
                assert_eq!(entry.value, chunk[base + 1]);
                assert_eq!(entry.flags, chunk[base + 2]);
            }
        } else if emit_tag {
            // Truncated or oversized chunks are skipped, never installed.
            if result.is_ok() {
                assert_eq!(track.steps[0].plocks.count, 0);
            }
        }
    }
}

#[test]
fn drop_cart_and_absent_policies() {
    let mut pool = PlockPool::new();
    let track = populated_track(&mut pool);

    let mut buffer = vec![0u8; PATTERN_STORAGE_MAX];
    let written = encode_track(&track, &pool, &mut buffer, TrackCodecVersion::V2).unwrap();

    let mut dropped = Track::new();
    let mut drop_pool = PlockPool::new();
    decode_track(
        &mut dropped,
        &mut drop_pool,
        &buffer[..written],
        2,
        DecodePolicy::DropCart,
    )
    .unwrap();
    for step in &dropped.steps {
        assert!(!step.has_cart_plock(&drop_pool));
    }
    assert!(dropped.steps[2].has_seq_plock(&drop_pool));

    let mut absent = Track::new();
    let mut absent_pool = PlockPool::new();
    decode_track(
        &mut absent,
        &mut absent_pool,
        &buffer[..written],
        2,
        DecodePolicy::Absent,
    )
    .unwrap();
    for step in &absent.steps {
        assert!(!step.voices.iter().any(|v| v.enabled));
        assert!(!step.has_any_plock());
    }
}
