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

use std::io::{Read, Write};

use amplify::IoError;

use crate::{
    hash256, BlockHash, BlockHeader, ByteStr, ConsensusDecode, ConsensusDecodeError,
    ConsensusEncode, MerkleNode, Txid,
};

/// Maximal number of transactions which may fit into a block (block weight
/// limit divided by the minimal transaction weight).
pub const MAX_BLOCK_TXS: u32 = 4_000_000 / 240;

pub fn merkle_parent(left: MerkleNode, right: MerkleNode) -> MerkleNode {
    let mut engine = [0u8; 64];
    engine[..32].copy_from_slice(left.as_ref());
    engine[32..].copy_from_slice(right.as_ref());
    MerkleNode::from_byte_array(hash256(engine))
}

/// Computes next level of a merkle tree, duplicating the last node of a level
/// with odd number of nodes.
pub fn merkle_parent_level(level: &[MerkleNode]) -> Vec<MerkleNode> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => merkle_parent(*left, *right),
            [single] => merkle_parent(*single, *single),
            _ => unreachable!("chunks of two"),
        })
        .collect()
}

/// Merkle root over leaves; `None` if there are no leaves.
pub fn merkle_root(leaves: impl IntoIterator<Item = MerkleNode>) -> Option<MerkleNode> {
    let mut level = leaves.into_iter().collect::<Vec<_>>();
    while level.len() > 1 {
        level = merkle_parent_level(&level);
    }
    level.first().copied()
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum MalformedProof {
    /// merkle proof doesn't cover any transactions.
    NoTransactions,

    /// merkle proof claims {0} transactions, which can't fit into a block.
    TooManyTransactions(u32),

    /// merkle proof contains {hashes} hashes for a block of {total} transactions.
    TooManyHashes { hashes: usize, total: u32 },

    /// merkle proof flag bits are exhausted before the tree is complete.
    FlagsExhausted,

    /// merkle proof hashes are exhausted before the tree is complete.
    HashesExhausted,

    /// merkle proof contains {0} hashes which are not used by the tree.
    UnusedHashes(usize),

    /// merkle proof contains unused non-zero flag bits or unused flag bytes.
    UnusedFlags,

    /// merkle proof has identical sibling nodes at depth {depth}, position
    /// {index}.
    DuplicateChildren { depth: u32, index: u32 },

    /// merkle proof descends into a branch at depth {depth}, position {index}
    /// which doesn't contain proved transactions.
    UnprovedBranch { depth: u32, index: u32 },

    /// merkle proof computes root {found} while the block header commits to
    /// {expected}.
    RootMismatch {
        expected: MerkleNode,
        found: MerkleNode,
    },
}

/// `merkleblock` message: block header with a partial merkle tree proving
/// inclusion of some transactions.
#[derive(Clone, Eq, PartialEq, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct MerkleBlock {
    pub header: BlockHeader,
    pub total_txs: u32,
    /// Tree nodes in depth-first order.
    pub hashes: Vec<MerkleNode>,
    /// Traversal bits, least significant bit of each byte first.
    pub flags: ByteStr,
}

impl MerkleBlock {
    #[inline]
    pub fn block_hash(&self) -> BlockHash { self.header.block_hash() }

    /// Reconstructs the partial merkle tree, checks that it commits to the
    /// merkle root from the block header and returns proved transaction ids
    /// in the order they appear in the block.
    pub fn proved_txs(&self) -> Result<Vec<Txid>, MalformedProof> {
        let total = self.total_txs;
        if total == 0 {
            return Err(MalformedProof::NoTransactions);
        }
        if total > MAX_BLOCK_TXS {
            return Err(MalformedProof::TooManyTransactions(total));
        }
        if self.hashes.len() > total as usize {
            return Err(MalformedProof::TooManyHashes {
                hashes: self.hashes.len(),
                total,
            });
        }

        let mut flags = FlagBits::new(self.flags.as_ref());
        let mut hashes = self.hashes.iter().copied();
        let mut tree = PartialTree::new(total);
        let mut proved = vec![];

        let root = tree.populate(&mut flags, &mut hashes, &mut proved)?;

        let unused = hashes.count();
        if unused > 0 {
            return Err(MalformedProof::UnusedHashes(unused));
        }
        if !flags.is_padding() {
            return Err(MalformedProof::UnusedFlags);
        }
        if root != self.header.merkle_root {
            return Err(MalformedProof::RootMismatch {
                expected: self.header.merkle_root,
                found: root,
            });
        }
        Ok(proved)
    }

    pub fn is_valid(&self) -> bool { self.proved_txs().is_ok() }
}

/// Checks that the `proof` is a well-formed merkle proof for a block with the
/// given hash, whose first proved transaction is `txid`.
///
/// If `merkle_root` is provided, the header of the proof must commit to it.
pub fn is_valid_merkle_proof(
    proof: &MerkleBlock,
    txid: Txid,
    block_hash: BlockHash,
    merkle_root: Option<MerkleNode>,
) -> bool {
    if proof.block_hash() != block_hash {
        return false;
    }
    if matches!(merkle_root, Some(root) if root != proof.header.merkle_root) {
        return false;
    }
    matches!(proof.proved_txs().as_deref(), Ok([first, ..]) if *first == txid)
}

impl ConsensusEncode for MerkleBlock {
    fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = self.header.consensus_encode(writer)?;
        counter += self.total_txs.consensus_encode(writer)?;
        counter += self.hashes.consensus_encode(writer)?;
        counter += self.flags.consensus_encode(writer)?;
        Ok(counter)
    }
}

impl ConsensusDecode for MerkleBlock {
    fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
        Ok(MerkleBlock {
            header: BlockHeader::consensus_decode(reader)?,
            total_txs: u32::consensus_decode(reader)?,
            hashes: Vec::<MerkleNode>::consensus_decode(reader)?,
            flags: ByteStr::consensus_decode(reader)?,
        })
    }
}

struct FlagBits<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FlagBits<'a> {
    fn new(bytes: &'a [u8]) -> Self { FlagBits { bytes, pos: 0 } }

    /// Whether the bits which were not consumed are only zero padding of the
    /// last used byte.
    fn is_padding(&self) -> bool {
        let used_bytes = (self.pos + 7) / 8;
        if used_bytes != self.bytes.len() {
            return false;
        }
        (self.pos..used_bytes * 8).all(|pos| !bit(self.bytes, pos))
    }
}

impl Iterator for FlagBits<'_> {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        if self.pos >= self.bytes.len() * 8 {
            return None;
        }
        let flag = bit(self.bytes, self.pos);
        self.pos += 1;
        Some(flag)
    }
}

fn bit(bytes: &[u8], pos: usize) -> bool { bytes[pos / 8] >> (pos % 8) & 1 == 1 }

#[derive(Copy, Clone, Default)]
struct Node {
    hash: Option<MerkleNode>,
    /// Subtree contains transactions proved by the tree.
    matched: bool,
}

/// Transient tree reconstructed from a partial merkle tree, walked with a
/// cursor in the depth-first order.
struct PartialTree {
    levels: Vec<Vec<Node>>,
    depth: u32,
    index: u32,
}

impl PartialTree {
    fn new(total: u32) -> Self {
        let max_depth = u32::BITS - (total - 1).leading_zeros();
        let levels = (0..=max_depth)
            .map(|depth| {
                let shift = max_depth - depth;
                let width = (total + (1 << shift) - 1) >> shift;
                vec![Node::default(); width as usize]
            })
            .collect();
        PartialTree {
            levels,
            depth: 0,
            index: 0,
        }
    }

    fn max_depth(&self) -> u32 { self.levels.len() as u32 - 1 }

    fn node(&self, depth: u32, index: u32) -> Option<Node> {
        self.levels.get(depth as usize)?.get(index as usize).copied()
    }

    fn set_current(&mut self, hash: MerkleNode, matched: bool) {
        self.levels[self.depth as usize][self.index as usize] = Node {
            hash: Some(hash),
            matched,
        };
    }

    fn up(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.index /= 2;
    }

    fn left(&mut self) {
        self.depth += 1;
        self.index *= 2;
    }

    fn right(&mut self) {
        self.depth += 1;
        self.index = self.index * 2 + 1;
    }

    fn root(&self) -> Option<MerkleNode> { self.levels[0][0].hash }

    fn populate(
        &mut self,
        flags: &mut impl Iterator<Item = bool>,
        hashes: &mut impl Iterator<Item = MerkleNode>,
        proved: &mut Vec<Txid>,
    ) -> Result<MerkleNode, MalformedProof> {
        let unproved = |depth, index| MalformedProof::UnprovedBranch { depth, index };
        loop {
            if let Some(root) = self.root() {
                return Ok(root);
            }
            let (depth, index) = (self.depth, self.index);

            if depth == self.max_depth() {
                let flag = flags.next().ok_or(MalformedProof::FlagsExhausted)?;
                let hash = hashes.next().ok_or(MalformedProof::HashesExhausted)?;
                if flag {
                    proved.push(hash.into());
                }
                self.set_current(hash, flag);
                self.up();
                continue;
            }

            let left = self.node(depth + 1, index * 2).unwrap_or_default();
            let Some(left_hash) = left.hash else {
                if flags.next().ok_or(MalformedProof::FlagsExhausted)? {
                    self.left();
                } else {
                    let hash = hashes.next().ok_or(MalformedProof::HashesExhausted)?;
                    self.set_current(hash, false);
                    self.up();
                }
                continue;
            };

            match self.node(depth + 1, index * 2 + 1) {
                Some(Node { hash: None, .. }) => self.right(),
                Some(Node {
                    hash: Some(right_hash),
                    matched,
                }) => {
                    if left_hash == right_hash {
                        return Err(MalformedProof::DuplicateChildren { depth, index });
                    }
                    if !left.matched && !matched {
                        return Err(unproved(depth, index));
                    }
                    self.set_current(merkle_parent(left_hash, right_hash), true);
                    self.up();
                }
                None => {
                    if !left.matched {
                        return Err(unproved(depth, index));
                    }
                    self.set_current(merkle_parent(left_hash, left_hash), true);
                    self.up();
                }
            }
        }
    }
}
