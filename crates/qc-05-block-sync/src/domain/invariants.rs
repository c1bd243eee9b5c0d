//! Admission invariants, evaluated in order for every inbound message.

use std::collections::HashSet;

use shared_types::{Address, PeerId};

use super::services::message_content_hash;
use super::{MessageCounter, ReceivedMessageCache};
use crate::events::Message;

/// INVARIANT-1: Score
/// Negative admission scores are rejected.
pub fn invariant_non_negative_score(score: f64) -> bool {
    score >= 0.0
}

/// INVARIANT-2: In-flight limit
/// A peer never has more than `max_in_flight` queued messages.
pub fn invariant_in_flight_limit(counter: &MessageCounter, peer: &PeerId, max_in_flight: usize) -> bool {
    counter.get(peer) < max_in_flight
}

/// INVARIANT-3: Banned miners
/// Full blocks mined by a banned coinbase never enter the queue.
pub fn invariant_miner_not_banned(message: &Message, banned_miners: &HashSet<Address>) -> bool {
    match message {
        Message::Block(block) => !banned_miners.contains(&block.coinbase()),
        _ => true,
    }
}

/// INVARIANT-4: Uniqueness
/// A block or transaction batch is admitted at most once per dedup window.
///
/// Records the content hash as a side effect.
pub fn invariant_unique_content(cache: &ReceivedMessageCache, message: &Message) -> bool {
    match message_content_hash(message) {
        Some(hash) => cache.insert_if_new(hash),
        None => true,
    }
}

/// Reason an inbound message was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionRejection {
    NegativeScore,
    TooManyMessages,
    BannedMiner,
    RepeatedMessage,
}

/// Check all invariants for an incoming message, short-circuiting on the
/// first failure.
pub fn check_admission(
    score: f64,
    sender: &PeerId,
    message: &Message,
    counter: &MessageCounter,
    max_in_flight: usize,
    banned_miners: &HashSet<Address>,
    cache: &ReceivedMessageCache,
) -> Result<(), AdmissionRejection> {
    if !invariant_non_negative_score(score) {
        return Err(AdmissionRejection::NegativeScore);
    }

    if !invariant_in_flight_limit(counter, sender, max_in_flight) {
        return Err(AdmissionRejection::TooManyMessages);
    }

    if !invariant_miner_not_banned(message, banned_miners) {
        return Err(AdmissionRejection::BannedMiner);
    }

    // Last, so rejected messages never occupy a dedup slot
    if !invariant_unique_content(cache, message) {
        return Err(AdmissionRejection::RepeatedMessage);
    }

    Ok(())
}
