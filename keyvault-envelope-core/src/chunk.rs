//! Splitting plaintext into key-sized pieces and their base64url form.

use crate::errors::{Error, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

/// Key size used when the caller does not say otherwise.
pub const DEFAULT_KEY_BITS: u32 = 4096;

/// Bits reserved for PKCS#1 v1.5 padding in the historical sizing.
const PADDING_OVERHEAD_BITS: u32 = 384;
const CAPACITY_SLACK_BYTES: usize = 6;

/// Largest plaintext chunk, in bytes, that one encrypt call may carry for a
/// key of `key_bits`: `floor((key_bits - 384) / 8) + 6`.
///
/// Existing envelopes were produced with this exact figure (470 bytes for a
/// 4096-bit key); do not change it.
pub fn chunk_size(key_bits: u32) -> usize {
    (key_bits.saturating_sub(PADDING_OVERHEAD_BITS) / 8) as usize + CAPACITY_SLACK_BYTES
}

/// Contiguous, ordered slices of at most `chunk_size` bytes. Empty input
/// yields no chunks.
pub fn split(data: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    data.chunks(chunk_size.max(1)).collect()
}

/// Base64url without padding.
pub fn encode_chunk(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode_chunk(chunk: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(chunk)
        .map_err(|err| Error::InvalidEncoding(format!("chunk is not base64url: {err}")))
}

/// Ordered concatenation.
pub fn join<B: AsRef<[u8]>>(chunks: &[B]) -> Vec<u8> {
    let total = chunks.iter().map(|chunk| chunk.as_ref().len()).sum();
    let mut joined = Vec::with_capacity(total);
    for chunk in chunks {
        joined.extend_from_slice(chunk.as_ref());
    }
    joined
}

pub(crate) fn encode_all(data: &[u8], chunk_size: usize) -> Vec<String> {
    split(data, chunk_size)
        .into_iter()
        .map(encode_chunk)
        .collect()
}

pub(crate) fn decode_all(chunks: &[String]) -> Result<Vec<u8>> {
    let decoded = chunks
        .iter()
        .map(|chunk| decode_chunk(chunk))
        .collect::<Result<Vec<_>>>()?;
    Ok(join(&decoded))
}
