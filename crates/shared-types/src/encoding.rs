//! Canonical RLP encoding of the chain entities and the Keccak-256 helper.

use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use sha3::{Digest, Keccak256};

use crate::entities::{Block, BlockHeader, BlockIdentifier, Hash, Transaction};

/// Keccak-256 of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> Hash {
    Keccak256::digest(data).into()
}

/// Decodes the item at `index` as a fixed-size byte array.
pub fn decode_fixed<const N: usize>(rlp: &Rlp, index: usize) -> Result<[u8; N], DecoderError> {
    let data = rlp.at(index)?.data()?;
    <[u8; N]>::try_from(data).map_err(|_| DecoderError::RlpInvalidLength)
}

impl Encodable for BlockHeader {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(8);
        s.append(&self.number);
        s.append(&self.parent_hash.as_slice());
        s.append(&self.state_root.as_slice());
        s.append(&self.transactions_root.as_slice());
        s.append(&self.coinbase.as_slice());
        s.append(&self.difficulty);
        s.append(&self.timestamp);
        s.append(&self.extra_data);
    }
}

impl Decodable for BlockHeader {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 8 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            number: rlp.val_at(0)?,
            parent_hash: decode_fixed(rlp, 1)?,
            state_root: decode_fixed(rlp, 2)?,
            transactions_root: decode_fixed(rlp, 3)?,
            coinbase: decode_fixed(rlp, 4)?,
            difficulty: rlp.val_at(5)?,
            timestamp: rlp.val_at(6)?,
            extra_data: rlp.val_at(7)?,
        })
    }
}

impl Encodable for Transaction {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(5);
        s.append(&self.nonce);
        match &self.to {
            Some(to) => s.append(&to.as_slice()),
            None => s.append_empty_data(),
        };
        s.append(&self.value);
        s.append(&self.data);
        s.append(&self.signature);
    }
}

impl Decodable for Transaction {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 5 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let to = if rlp.at(1)?.is_empty() {
            None
        } else {
            Some(decode_fixed::<20>(rlp, 1)?)
        };
        Ok(Self {
            nonce: rlp.val_at(0)?,
            to,
            value: rlp.val_at(2)?,
            data: rlp.val_at(3)?,
            signature: rlp.val_at(4)?,
        })
    }
}

impl Encodable for Block {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(self.header());
        s.append_list::<Transaction, Transaction>(self.transactions());
        s.append_list::<BlockHeader, BlockHeader>(self.uncles());
    }
}

impl Decodable for Block {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 3 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Block::new(rlp.val_at(0)?, rlp.list_at(1)?, rlp.list_at(2)?))
    }
}

impl Encodable for BlockIdentifier {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.hash.as_slice());
        s.append(&self.number);
    }
}
