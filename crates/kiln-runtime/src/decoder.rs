//! Weight payload decoding.
//!
//! The descriptor's `weight_encoding` identifier selects one of a
//! closed set of schemes. Decoding happens once at load time; the
//! decoded buffer is written into the weight arena in a single pass.

use crate::error::{Result, RunnerError};
use kiln_descriptor::AllocationMap;

/// A supported weight compression/quantization scheme.
///
/// A closed enum rather than a registry: unknown identifiers fail at
/// [`WeightEncoding::from_id`], and every variant is handled
/// exhaustively in [`WeightEncoding::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightEncoding {
    /// Little-endian f32 stream, `total_size * 4` bytes. Lossless.
    Raw,
    /// Per-region 8-bit linear quantization. For each named region in
    /// ascending offset order (ties broken by name): a little-endian
    /// f32 scale followed by `size` i8 values; each element decodes as
    /// `scale * q`. Elements not covered by any region stay zero.
    EightBit,
}

impl WeightEncoding {
    /// Resolve a descriptor `weight_encoding` identifier.
    pub fn from_id(id: &str) -> Result<Self> {
        match id {
            "raw" => Ok(Self::Raw),
            "eightbit" => Ok(Self::EightBit),
            other => Err(RunnerError::UnsupportedEncoding(other.to_string())),
        }
    }

    /// Decode `payload` into a buffer of exactly
    /// `allocation.total_size` f32 elements.
    pub fn decode(self, payload: &[u8], allocation: &AllocationMap) -> Result<Vec<f32>> {
        match self {
            Self::Raw => decode_raw(payload, allocation),
            Self::EightBit => decode_eightbit(payload, allocation),
        }
    }
}

fn decode_raw(payload: &[u8], allocation: &AllocationMap) -> Result<Vec<f32>> {
    let expected = allocation.total_size * 4;
    if payload.len() != expected {
        return Err(RunnerError::Decode(format!(
            "raw payload is {} bytes, expected {} ({} elements)",
            payload.len(),
            expected,
            allocation.total_size
        )));
    }

    Ok(payload
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn decode_eightbit(payload: &[u8], allocation: &AllocationMap) -> Result<Vec<f32>> {
    let mut out = vec![0.0f32; allocation.total_size];

    // Region order is part of the wire format: ascending offset,
    // ties broken by name.
    let mut regions: Vec<_> = allocation.allocation.iter().collect();
    regions.sort_by(|(a_name, a), (b_name, b)| {
        a.offset.cmp(&b.offset).then_with(|| a_name.cmp(b_name))
    });

    let mut cursor = 0usize;
    for (name, region) in regions {
        let span = 4 + region.size;
        let bytes = payload.get(cursor..cursor + span).ok_or_else(|| {
            RunnerError::Decode(format!(
                "eightbit payload truncated in region '{name}': \
                 need {span} bytes at offset {cursor}, payload is {} bytes",
                payload.len()
            ))
        })?;

        let scale = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let dst = &mut out[region.offset..region.offset + region.size];
        for (slot, &q) in dst.iter_mut().zip(&bytes[4..]) {
            *slot = scale * (q as i8) as f32;
        }

        cursor += span;
    }

    if cursor != payload.len() {
        return Err(RunnerError::Decode(format!(
            "eightbit payload has {} trailing bytes",
            payload.len() - cursor
        )));
    }

    Ok(out)
}
