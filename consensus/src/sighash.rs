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

use std::fmt::{self, Display, Formatter};

use crate::op::OP_CODESEPARATOR;
use crate::{
    hash256, instructions, ConsensusEncode, Outpoint, ScriptBytes, Sighash, Tx, TxOut, Txid,
    VarInt,
};

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub enum SighashFlag {
    /// SIGHASH_ALL
    #[display("ALL")]
    All,
    /// SIGHASH_NONE
    #[display("NONE")]
    None,
    /// SIGHASH_SINGLE
    #[display("SINGLE")]
    Single,
}

/// Signature hash type as a consensus 32-bit value.
///
/// Non-standard values are preserved as is: they are committed to by legacy
/// and segwit v0 signatures and must round-trip through PSBTs unchanged.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct SighashType(u32);

impl Default for SighashType {
    fn default() -> Self { SighashType::ALL }
}

impl SighashType {
    pub const ALL: Self = SighashType(0x01);
    pub const NONE: Self = SighashType(0x02);
    pub const SINGLE: Self = SighashType(0x03);
    pub const ALL_ANYONECANPAY: Self = SighashType(0x81);
    pub const NONE_ANYONECANPAY: Self = SighashType(0x82);
    pub const SINGLE_ANYONECANPAY: Self = SighashType(0x83);

    const ANYONECANPAY_FLAG: u32 = 0x80;

    pub const fn with(flag: SighashFlag, anyone_can_pay: bool) -> Self {
        let base = match flag {
            SighashFlag::All => 0x01,
            SighashFlag::None => 0x02,
            SighashFlag::Single => 0x03,
        };
        SighashType(if anyone_can_pay { base | Self::ANYONECANPAY_FLAG } else { base })
    }

    #[inline]
    pub const fn from_consensus_u32(value: u32) -> Self { SighashType(value) }

    #[inline]
    pub const fn to_consensus_u32(&self) -> u32 { self.0 }

    /// Byte appended to DER-encoded signatures.
    #[inline]
    pub const fn to_byte(&self) -> u8 { self.0 as u8 }

    /// Base flag, with the same interpretation of unknown values as the
    /// consensus code: anything which is not NONE or SINGLE commits to all
    /// outputs.
    pub const fn flag(&self) -> SighashFlag {
        match self.0 & 0x1F {
            0x02 => SighashFlag::None,
            0x03 => SighashFlag::Single,
            _ => SighashFlag::All,
        }
    }

    #[inline]
    pub const fn anyone_can_pay(&self) -> bool { self.0 & Self::ANYONECANPAY_FLAG != 0 }

    pub const fn is_standard(&self) -> bool {
        matches!(self.0, 0x01 | 0x02 | 0x03 | 0x81 | 0x82 | 0x83)
    }
}

impl Display for SighashType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if !self.is_standard() {
            return write!(f, "{:#010x}", self.0);
        }
        Display::fmt(&self.flag(), f)?;
        if self.anyone_can_pay() {
            f.write_str("|ANYONECANPAY")?;
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum SighashError {
    /// input index {index} is out of range for transaction {txid} having {inputs} inputs.
    InvalidInputIndex {
        txid: Txid,
        index: usize,
        inputs: usize,
    },
}

/// Computes signature hashes for the inputs of a transaction, caching the
/// BIP-143 intermediate hashes shared between the inputs.
#[derive(Clone, Debug)]
pub struct SighashCache<'tx> {
    tx: &'tx Tx,
    hash_prevouts: Option<[u8; 32]>,
    hash_sequence: Option<[u8; 32]>,
    hash_outputs: Option<[u8; 32]>,
}

impl<'tx> SighashCache<'tx> {
    pub fn new(tx: &'tx Tx) -> Self {
        SighashCache {
            tx,
            hash_prevouts: None,
            hash_sequence: None,
            hash_outputs: None,
        }
    }

    #[inline]
    pub fn tx(&self) -> &'tx Tx { self.tx }

    fn check_index(&self, index: usize) -> Result<(), SighashError> {
        let inputs = self.tx.inputs().len();
        if index >= inputs {
            return Err(SighashError::InvalidInputIndex {
                txid: self.tx.txid(),
                index,
                inputs,
            });
        }
        Ok(())
    }

    /// Signature hash for pre-segwit inputs.
    ///
    /// Any `OP_CODESEPARATOR` is removed from the `script_code`. For
    /// `SIGHASH_SINGLE` without a matching output the hash is `1`, as the
    /// consensus code requires.
    pub fn legacy_sighash(
        &mut self,
        index: usize,
        script_code: &[u8],
        sighash_type: SighashType,
    ) -> Result<Sighash, SighashError> {
        self.check_index(index)?;
        let tx = self.tx;
        let flag = sighash_type.flag();
        let anyone_can_pay = sighash_type.anyone_can_pay();

        if flag == SighashFlag::Single && index >= tx.outputs().len() {
            let mut one = [0u8; 32];
            one[0] = 1;
            return Ok(Sighash::from_byte_array(one));
        }

        let script_code = ScriptBytes::from(remove_code_separators(script_code));

        let mut engine = Vec::with_capacity(tx.serialize_without_witness().len() + 64);
        write(&mut engine, &tx.version());

        let input_count = if anyone_can_pay { 1 } else { tx.inputs().len() };
        write(&mut engine, &VarInt::with(input_count));
        for (no, input) in tx.inputs().iter().enumerate() {
            if anyone_can_pay && no != index {
                continue;
            }
            write(&mut engine, &input.prev_output);
            if no == index {
                write(&mut engine, &script_code);
            } else {
                write(&mut engine, &ScriptBytes::new());
            }
            if no != index && flag != SighashFlag::All {
                write(&mut engine, &0u32);
            } else {
                write(&mut engine, &input.sequence);
            }
        }

        match flag {
            SighashFlag::All => write(&mut engine, &tx.outputs().to_vec()),
            SighashFlag::None => write(&mut engine, &VarInt::new(0)),
            SighashFlag::Single => {
                write(&mut engine, &VarInt::with(index + 1));
                for (no, output) in tx.outputs().iter().enumerate().take(index + 1) {
                    if no == index {
                        write(&mut engine, output);
                    } else {
                        write(&mut engine, &TxOut::new(ScriptBytes::new(), -1));
                    }
                }
            }
        }

        write(&mut engine, &tx.lock_time());
        write(&mut engine, &sighash_type.to_consensus_u32());

        Ok(Sighash::from_byte_array(hash256(engine)))
    }

    /// BIP-143 signature hash for segwit v0 inputs.
    ///
    /// `script_code` is the P2PKH script for P2WPKH inputs and the witness
    /// script for P2WSH inputs; `value` is the amount of the spent output.
    pub fn segwit_v0_sighash(
        &mut self,
        index: usize,
        script_code: &[u8],
        value: i64,
        sighash_type: SighashType,
    ) -> Result<Sighash, SighashError> {
        self.check_index(index)?;
        let tx = self.tx;
        let flag = sighash_type.flag();
        let anyone_can_pay = sighash_type.anyone_can_pay();

        let zero = [0u8; 32];
        let hash_prevouts = if anyone_can_pay { zero } else { self.hash_prevouts() };
        let hash_sequence = if anyone_can_pay || flag != SighashFlag::All {
            zero
        } else {
            self.hash_sequence()
        };
        let hash_outputs = match flag {
            SighashFlag::All => self.hash_outputs(),
            SighashFlag::Single if index < tx.outputs().len() => {
                hash256(tx.outputs()[index].consensus_serialize())
            }
            SighashFlag::Single | SighashFlag::None => zero,
        };

        let input = &tx.inputs()[index];
        let mut engine = Vec::with_capacity(156 + script_code.len());
        write(&mut engine, &tx.version());
        write(&mut engine, &hash_prevouts);
        write(&mut engine, &hash_sequence);
        write(&mut engine, &input.prev_output);
        write(&mut engine, &ScriptBytes::from(script_code.to_vec()));
        write(&mut engine, &value);
        write(&mut engine, &input.sequence);
        write(&mut engine, &hash_outputs);
        write(&mut engine, &tx.lock_time());
        write(&mut engine, &sighash_type.to_consensus_u32());

        Ok(Sighash::from_byte_array(hash256(engine)))
    }

    fn hash_prevouts(&mut self) -> [u8; 32] {
        let tx = self.tx;
        *self.hash_prevouts.get_or_insert_with(|| {
            let mut engine = Vec::with_capacity(tx.inputs().len() * 36);
            for input in tx.inputs() {
                write::<Outpoint>(&mut engine, &input.prev_output);
            }
            hash256(engine)
        })
    }

    fn hash_sequence(&mut self) -> [u8; 32] {
        let tx = self.tx;
        *self.hash_sequence.get_or_insert_with(|| {
            let mut engine = Vec::with_capacity(tx.inputs().len() * 4);
            for input in tx.inputs() {
                write(&mut engine, &input.sequence);
            }
            hash256(engine)
        })
    }

    fn hash_outputs(&mut self) -> [u8; 32] {
        let tx = self.tx;
        *self.hash_outputs.get_or_insert_with(|| {
            let mut engine = Vec::new();
            for output in tx.outputs() {
                write(&mut engine, output);
            }
            hash256(engine)
        })
    }
}

fn write<T: ConsensusEncode>(engine: &mut Vec<u8>, data: &T) {
    data.consensus_encode(engine).expect("in-memory writing can't fail");
}

/// Copies script skipping `OP_CODESEPARATOR` opcodes. Data after a malformed
/// push are copied unchanged.
fn remove_code_separators(script: &[u8]) -> Vec<u8> {
    if !script.contains(&OP_CODESEPARATOR) {
        return script.to_vec();
    }
    let mut result = Vec::with_capacity(script.len());
    let mut iter = instructions(script);
    let mut start = 0;
    while let Some(instruction) = iter.next() {
        let end = iter.position();
        match instruction {
            Ok(crate::Instruction::Op(OP_CODESEPARATOR)) => {}
            Ok(_) => result.extend_from_slice(&script[start..end]),
            Err(_) => {
                result.extend_from_slice(&script[start..]);
                break;
            }
        }
        start = end;
    }
    result
}
