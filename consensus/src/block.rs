// Bitcoin protocol primitives & PSBT codec library.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2020-2023 by
//     Dr Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// Copyright (C) 2020-2023 LNP/BP Standards Association. All rights reserved.
// Copyright (C) 2020-2023 Dr Maxim Orlovsky. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter, LowerHex};
use std::io::{Read, Write};

use amplify::IoError;

use crate::{
    hash256, merkle_root, BlockHash, ConsensusDecode, ConsensusDecodeError, ConsensusEncode,
    MerkleNode, Tx, Txid,
};

/// 256-bit proof-of-work target, stored little-endian.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct Target([u8; 32]);

impl Target {
    /// Difficulty 1 target (`0x1d00ffff`).
    pub const MAX_POW: Target = {
        let mut bytes = [0u8; 32];
        bytes[26] = 0xFF;
        bytes[27] = 0xFF;
        Target(bytes)
    };

    /// Decodes compact target representation as it is stored in block
    /// headers: the last byte is the exponent and the first three bytes are
    /// the little-endian coefficient, giving `coefficient * 256^(exponent - 3)`.
    ///
    /// Bytes which don't fit into 256 bits are dropped; see
    /// [`BlockHeader::is_bits_valid`].
    pub fn from_bits(bits: [u8; 4]) -> Target {
        let exponent = bits[3] as i32;
        let mut bytes = [0u8; 32];
        for (no, byte) in bits[..3].iter().enumerate() {
            let pos = exponent - 3 + no as i32;
            if (0..32).contains(&pos) {
                bytes[pos as usize] = *byte;
            }
        }
        Target(bytes)
    }

    pub const fn from_le_bytes(bytes: [u8; 32]) -> Self { Target(bytes) }

    pub const fn to_le_bytes(&self) -> [u8; 32] { self.0 }

    pub fn to_f64(&self) -> f64 {
        self.0.iter().rev().fold(0f64, |acc, byte| acc * 256.0 + *byte as f64)
    }
}

impl Ord for Target {
    fn cmp(&self, other: &Self) -> Ordering { self.0.iter().rev().cmp(other.0.iter().rev()) }
}

impl PartialOrd for Target {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl LowerHex for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.iter().rev().try_for_each(|b| write!(f, "{b:02x}"))
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { LowerHex::fmt(self, f) }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: BlockHash,
    pub merkle_root: MerkleNode,
    pub time: u32,
    /// Compact target encoding, as stored on the wire.
    pub bits: [u8; 4],
    pub nonce: [u8; 4],
}

impl BlockHeader {
    pub const LEN: usize = 80;

    pub fn block_hash(&self) -> BlockHash {
        BlockHash::from_byte_array(hash256(self.consensus_serialize()))
    }

    #[inline]
    pub fn target(&self) -> Target { Target::from_bits(self.bits) }

    /// Compact target which is neither negative, zero nor overflowing 256 bits.
    pub fn is_bits_valid(&self) -> bool {
        let exponent = self.bits[3];
        let coefficient = u32::from_le_bytes([self.bits[0], self.bits[1], self.bits[2], 0]);
        coefficient != 0
            && coefficient & 0x0080_0000 == 0
            && (exponent <= 32
                || (exponent == 33 && coefficient <= 0xFFFF)
                || (exponent == 34 && coefficient <= 0xFF))
    }

    /// Difficulty relative to the [`Target::MAX_POW`].
    pub fn difficulty(&self) -> f64 { Target::MAX_POW.to_f64() / self.target().to_f64() }

    /// Verifies that the block hash, interpreted as a little-endian number,
    /// doesn't exceed the target.
    pub fn check_pow(&self) -> bool {
        self.is_bits_valid()
            && Target::from_le_bytes(self.block_hash().to_byte_array()) <= self.target()
    }

    /// Signals readiness for BIP-9 version bits.
    pub fn bip9(&self) -> bool { (self.version as u32) >> 29 == 0b001 }

    /// Signals readiness for BIP-91 (bit 4).
    pub fn bip91(&self) -> bool { (self.version as u32) >> 4 & 1 == 1 }

    /// Signals readiness for BIP-141 (bit 1).
    pub fn bip141(&self) -> bool { (self.version as u32) >> 1 & 1 == 1 }
}

impl ConsensusEncode for BlockHeader {
    fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = self.version.consensus_encode(writer)?;
        counter += self.prev_block_hash.consensus_encode(writer)?;
        counter += self.merkle_root.consensus_encode(writer)?;
        counter += self.time.consensus_encode(writer)?;
        counter += self.bits.consensus_encode(writer)?;
        counter += self.nonce.consensus_encode(writer)?;
        Ok(counter)
    }
}

impl ConsensusDecode for BlockHeader {
    fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
        Ok(BlockHeader {
            version: i32::consensus_decode(reader)?,
            prev_block_hash: BlockHash::consensus_decode(reader)?,
            merkle_root: MerkleNode::consensus_decode(reader)?,
            time: u32::consensus_decode(reader)?,
            bits: <[u8; 4]>::consensus_decode(reader)?,
            nonce: <[u8; 4]>::consensus_decode(reader)?,
        })
    }
}

/// Block header together with the ids of all block transactions.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Block {
    pub header: BlockHeader,
    pub txids: Vec<Txid>,
}

impl Block {
    pub fn with_transactions<'a>(
        header: BlockHeader,
        transactions: impl IntoIterator<Item = &'a Tx>,
    ) -> Self {
        Block {
            header,
            txids: transactions.into_iter().map(Tx::txid).collect(),
        }
    }

    #[inline]
    pub fn block_hash(&self) -> BlockHash { self.header.block_hash() }

    /// Merkle root over block transactions; `None` for a block without
    /// transactions.
    pub fn compute_merkle_root(&self) -> Option<MerkleNode> {
        merkle_root(self.txids.iter().copied().map(MerkleNode::from))
    }

    pub fn validate_merkle_root(&self) -> bool {
        self.compute_merkle_root() == Some(self.header.merkle_root)
    }
}

impl ConsensusDecode for Block {
    /// Reads full serialized block, keeping only transaction ids.
    fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
        let header = BlockHeader::consensus_decode(reader)?;
        let transactions = Vec::<Tx>::consensus_decode(reader)?;
        Ok(Block::with_transactions(header, &transactions))
    }
}
