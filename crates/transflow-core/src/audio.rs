//! Audio codec utilities: WAV container sniffing and PCM upsampling.
//!
//! A canonical RIFF/WAVE header is 44 bytes, but this parses the chunk
//! layout properly rather than assuming that, so a `.wav` file and a
//! headerless `.raw`/`.pcm` file can be tailed identically once the
//! payload offset is known.

use bytes::Buf;

/// Number of bytes in the canonical 44-byte RIFF/WAVE header produced by
/// `create_wav_header`-style writers (no extra chunks).
const CANONICAL_WAV_HEADER_LEN: usize = 44;

/// Returns the byte offset of the `data` chunk's payload, or `0` if `bytes`
/// is not a RIFF/WAVE file (treated as headerless raw PCM).
///
/// Scans chunks after the 12-byte RIFF/WAVE preamble rather than assuming
/// the canonical 44-byte layout, since `data` is not always the first
/// sub-chunk (an `fmt ` chunk longer than 16 bytes, or a `LIST`/`fact`
/// chunk in between, would shift it).
#[must_use]
pub fn wav_payload_offset(bytes: &[u8]) -> usize {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return 0;
    }

    let mut cursor = &bytes[12..];
    let mut offset = 12usize;
    while cursor.len() >= 8 {
        let chunk_id = &cursor[0..4];
        let chunk_size = (&cursor[4..8]).get_u32_le() as usize;
        let payload_start = offset + 8;
        if chunk_id == b"data" {
            return payload_start;
        }
        let advance = 8 + chunk_size + (chunk_size % 2);
        if advance == 0 || advance > cursor.len() {
            break;
        }
        cursor = &cursor[advance..];
        offset += advance;
    }

    // Malformed or truncated header: fall back to the canonical layout
    // rather than guessing further.
    CANONICAL_WAV_HEADER_LEN.min(bytes.len())
}

/// Decodes a little-endian 16-bit mono PCM byte slice into samples.
///
/// An odd trailing byte (a frame read mid-sample) is dropped rather than
/// decoded, since it belongs to the next frame read once more bytes land.
#[must_use]
pub fn decode_pcm_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Returns the number of whole samples decodable from `bytes` without
/// consuming a trailing partial sample.
#[must_use]
pub fn decodable_sample_bytes(bytes: &[u8]) -> usize {
    bytes.len() - (bytes.len() % 2)
}

/// Upsamples 8 kHz mono PCM to 16 kHz via linear interpolation, used when
/// the injected recognizer does not accept 8 kHz input directly
/// (`TransflowConfig::recognizer_accepts_8k == false`).
///
/// Output has exactly `2 * input.len()` samples: each input sample is
/// doubled, with the second copy linearly interpolated toward the next
/// input sample (repeated for the final sample, which has no successor).
#[must_use]
pub fn upsample_8k_to_16k(samples: &[i16]) -> Vec<i16> {
    if samples.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(samples.len() * 2);
    for (i, &sample) in samples.iter().enumerate() {
        out.push(sample);
        let next = samples.get(i + 1).copied().unwrap_or(sample);
        let midpoint = (i32::from(sample) + i32::from(next)) / 2;
        out.push(midpoint as i16);
    }
    out
}
