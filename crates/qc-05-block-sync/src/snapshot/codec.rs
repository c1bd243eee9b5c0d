//! Chunk payload codec.
//!
//! A chunk is an RLP list of `[payload, original_size]` pairs, one per trie
//! node. `original_size == 0` marks an uncompressed payload; otherwise the
//! payload is LZ4 block data that inflates to exactly `original_size` bytes.

use rlp::{DecoderError, Rlp, RlpStream};

use crate::events::SyncError;

/// `original_size` of an entry stored as-is.
pub const UNCOMPRESSED: u64 = 0;

/// LZ4 never expands data by more than this factor.
const MAX_COMPRESSION_RATIO: usize = 255;

/// Encode raw entries, compressing each one that shrinks under LZ4.
pub fn encode_chunk<I>(entries: I, compress: bool) -> Vec<u8>
where
    I: IntoIterator<Item = Vec<u8>>,
{
    let entries: Vec<Vec<u8>> = entries.into_iter().collect();
    let mut stream = RlpStream::new_list(entries.len());
    for entry in entries {
        let (payload, original_size) = compress_entry(entry, compress);
        stream.begin_list(2);
        stream.append(&payload);
        stream.append(&original_size);
    }
    stream.out().to_vec()
}

fn compress_entry(entry: Vec<u8>, compress: bool) -> (Vec<u8>, u64) {
    if !compress || entry.is_empty() {
        return (entry, UNCOMPRESSED);
    }
    let compressed = lz4_flex::compress(&entry);
    if compressed.len() < entry.len() {
        (compressed, entry.len() as u64)
    } else {
        (entry, UNCOMPRESSED)
    }
}

/// Decode a chunk back into raw entries.
pub fn decode_chunk(chunk: &[u8]) -> Result<Vec<Vec<u8>>, SyncError> {
    let rlp = Rlp::new(chunk);
    let mut entries = Vec::with_capacity(rlp.item_count()?);
    for item in rlp.iter() {
        if item.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen.into());
        }
        let payload: Vec<u8> = item.val_at(0)?;
        let original_size: u64 = item.val_at(1)?;
        entries.push(decompress_entry(payload, original_size)?);
    }
    Ok(entries)
}

fn decompress_entry(payload: Vec<u8>, original_size: u64) -> Result<Vec<u8>, SyncError> {
    if original_size == UNCOMPRESSED {
        return Ok(payload);
    }

    let expected = usize::try_from(original_size).unwrap_or(usize::MAX);
    if expected > payload.len().saturating_mul(MAX_COMPRESSION_RATIO) {
        return Err(SyncError::SizeMismatch {
            expected,
            actual: payload.len(),
        });
    }

    let inflated = lz4_flex::decompress(&payload, expected)?;
    if inflated.len() != expected {
        return Err(SyncError::SizeMismatch {
            expected,
            actual: inflated.len(),
        });
    }
    Ok(inflated)
}
