//! Pure domain helpers shared by the handler and processors.

use std::sync::Arc;

use shared_types::{keccak256, Block, Hash};

use crate::events::Message;

/// Keccak-256 of the message encoding, for block and transaction messages.
pub fn message_content_hash(message: &Message) -> Option<Hash> {
    message.encoded().map(|encoded| keccak256(&encoded))
}

/// Ascending by height; stable for equal heights.
pub fn sort_blocks_by_number(mut blocks: Vec<Arc<Block>>) -> Vec<Arc<Block>> {
    blocks.sort_by_key(|block| block.number());
    blocks
}

/// Heights listed in a skeleton response.
///
/// Starts at `start` rounded down to a multiple of `step`, advances by `step`
/// while below `min(best, first + step * max_chunks)`, and always ends with
/// one entry capped at `best`.
pub fn skeleton_heights(start: u64, best: u64, step: u64, max_chunks: u64) -> Vec<u64> {
    let step = step.max(1);
    let first = (start / step) * step;
    let limit = best.min(first.saturating_add(step.saturating_mul(max_chunks)));

    let mut heights = Vec::new();
    let mut height = first;
    while height < limit {
        heights.push(height);
        height += step;
    }
    heights.push(best.min(height));
    heights
}
