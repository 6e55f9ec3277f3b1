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

//! Bitcoin consensus-level data structures: transactions with their binary
//! encoding, scripts and their classification, signature hashes, block
//! headers and merkle inclusion proofs.

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

mod coding;
mod hashes;
mod tx;
pub mod script;
mod keys;
mod sighash;
mod block;
mod merkle;
mod hd;

pub use block::{Block, BlockHeader, Target};
pub use coding::{
    read_exact_vec, ByteStr, ConsensusDataError, ConsensusDecode, ConsensusDecodeError,
    ConsensusEncode, VarInt, MAX_VECTOR_LEN,
};
pub use hashes::{
    hash256, hash_160, single_sha256, BlockHash, HashParseError, MerkleNode, Sighash, Txid, Wtxid,
};
pub use hd::{
    DerivationIndex, DerivationParseError, DerivationPath, Fingerprint, IndexParseError,
    KeyOrigin, Xpub, XpubDecodeError, HARDENED_INDEX_BOUNDARY,
};
pub use keys::{LegacyPk, LegacySig, PkParseError};
pub use merkle::{
    is_valid_merkle_proof, merkle_parent, merkle_parent_level, merkle_root, MalformedProof,
    MerkleBlock, MAX_BLOCK_TXS,
};
pub use script::{
    instructions, op, Instruction, Instructions, Multisig, RedeemScript, ScriptBytes, ScriptClass,
    ScriptPubkey, SigScript, TruncatedPush, WitnessScript,
};
pub use secp256k1;
pub use sighash::{SighashCache, SighashError, SighashFlag, SighashType};
pub use tx::{Outpoint, Tx, TxIn, TxOut, TxParseError, Witness, SEQ_NO_FINAL};
