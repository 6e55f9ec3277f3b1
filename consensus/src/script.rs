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

use std::fmt::{self, Debug, Display, Formatter, LowerHex};
use std::io::{Read, Write};

use amplify::hex::ToHex;
use amplify::{IoError, Wrapper};

use crate::{
    hash_160, single_sha256, ByteStr, ConsensusDecode, ConsensusDecodeError, ConsensusEncode,
    LegacyPk,
};

pub mod op {
    pub const OP_0: u8 = 0x00;
    pub const OP_PUSHBYTES_20: u8 = 0x14;
    pub const OP_PUSHBYTES_32: u8 = 0x20;
    pub const OP_PUSHBYTES_33: u8 = 0x21;
    pub const OP_PUSHBYTES_65: u8 = 0x41;
    pub const OP_PUSHDATA1: u8 = 0x4C;
    pub const OP_PUSHDATA2: u8 = 0x4D;
    pub const OP_PUSHDATA4: u8 = 0x4E;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;
    pub const OP_HASH160: u8 = 0xA9;
    pub const OP_CODESEPARATOR: u8 = 0xAB;
    pub const OP_CHECKSIG: u8 = 0xAC;
    pub const OP_CHECKMULTISIG: u8 = 0xAE;
}

use op::*;

/// Script parsing error.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display("push operation at byte {0} runs past the end of the script.")]
pub struct TruncatedPush(pub usize);

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Instruction<'script> {
    PushBytes(&'script [u8]),
    Op(u8),
}

/// Iterator over script instructions, stopping after the first malformed push.
pub struct Instructions<'script> {
    script: &'script [u8],
    pos: usize,
}

impl<'script> Instructions<'script> {
    /// Byte offset of the next instruction.
    pub fn position(&self) -> usize { self.pos }
}

impl<'script> Iterator for Instructions<'script> {
    type Item = Result<Instruction<'script>, TruncatedPush>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.pos;
        let opcode = *self.script.get(start)?;
        let (len_size, len) = match opcode {
            0x01..=0x4B => (0, opcode as usize),
            OP_PUSHDATA1 | OP_PUSHDATA2 | OP_PUSHDATA4 => {
                let size = match opcode {
                    OP_PUSHDATA1 => 1,
                    OP_PUSHDATA2 => 2,
                    _ => 4,
                };
                let Some(bytes) = self.script.get(start + 1..start + 1 + size) else {
                    self.pos = self.script.len();
                    return Some(Err(TruncatedPush(start)));
                };
                let mut buf = [0u8; 4];
                buf[..size].copy_from_slice(bytes);
                (size, u32::from_le_bytes(buf) as usize)
            }
            _ => {
                self.pos += 1;
                return Some(Ok(Instruction::Op(opcode)));
            }
        };
        let data_start = start + 1 + len_size;
        match self.script.get(data_start..data_start + len) {
            Some(data) => {
                self.pos = data_start + len;
                Some(Ok(Instruction::PushBytes(data)))
            }
            None => {
                self.pos = self.script.len();
                Some(Err(TruncatedPush(start)))
            }
        }
    }
}

#[derive(Wrapper, WrapperMut, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, From)]
#[wrapper(Deref, BorrowSlice)]
#[wrapper_mut(DerefMut, BorrowSliceMut)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct ScriptBytes(#[from] Vec<u8>);

impl ScriptBytes {
    pub fn new() -> Self { none!() }

    pub fn with_capacity(capacity: usize) -> Self { ScriptBytes(Vec::with_capacity(capacity)) }

    pub fn push_opcode(&mut self, opcode: u8) { self.0.push(opcode) }

    /// Adds minimal push of `data` (without using numeric opcodes).
    pub fn push_slice(&mut self, data: &[u8]) {
        match data.len() {
            len @ 0..=0x4B => self.0.push(len as u8),
            len @ 0x4C..=0xFF => {
                self.0.push(OP_PUSHDATA1);
                self.0.push(len as u8);
            }
            len @ 0x100..=0xFFFF => {
                self.0.push(OP_PUSHDATA2);
                self.0.extend((len as u16).to_le_bytes());
            }
            len => {
                self.0.push(OP_PUSHDATA4);
                self.0.extend((len as u32).to_le_bytes());
            }
        }
        self.0.extend_from_slice(data);
    }

    /// Pushes small integer in range `0..=16` using numeric opcode.
    ///
    /// # Panics
    ///
    /// If the number exceeds 16.
    pub fn push_num(&mut self, num: u8) {
        assert!(num <= 16, "only numbers in range 0..=16 can be pushed with numeric opcodes");
        match num {
            0 => self.0.push(OP_0),
            n => self.0.push(OP_1 + n - 1),
        }
    }

    pub fn instructions(&self) -> Instructions<'_> { instructions(&self.0) }

    pub fn as_slice(&self) -> &[u8] { &self.0 }

    pub fn into_vec(self) -> Vec<u8> { self.0 }
}

impl AsRef<[u8]> for ScriptBytes {
    fn as_ref(&self) -> &[u8] { &self.0 }
}

impl LowerHex for ScriptBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(&self.0.to_hex()) }
}

impl Display for ScriptBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { LowerHex::fmt(self, f) }
}

impl Debug for ScriptBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScriptBytes").field(&self.0.to_hex()).finish()
    }
}

impl ConsensusEncode for ScriptBytes {
    fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        ByteStr::from(self.0.as_slice()).consensus_encode(writer)
    }
}

impl ConsensusDecode for ScriptBytes {
    fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
        ByteStr::consensus_decode(reader).map(|bytes| ScriptBytes(bytes.into_inner()))
    }
}

macro_rules! script_type {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Wrapper, WrapperMut, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug, From)]
        #[wrapper(Deref, BorrowSlice, LowerHex, Display)]
        #[wrapper_mut(DerefMut, BorrowSliceMut)]
        #[cfg_attr(
            feature = "serde",
            derive(Serialize, Deserialize),
            serde(crate = "serde_crate", transparent)
        )]
        pub struct $name(
            #[from]
            #[from(Vec<u8>)]
            ScriptBytes,
        );

        impl $name {
            #[inline]
            pub fn new() -> Self { none!() }

            #[inline]
            pub fn as_script_bytes(&self) -> &ScriptBytes { &self.0 }

            #[inline]
            pub fn to_vec(&self) -> Vec<u8> { self.0.to_vec() }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] { self.0.as_ref() }
        }

        impl ConsensusEncode for $name {
            fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
                self.0.consensus_encode(writer)
            }
        }

        impl ConsensusDecode for $name {
            fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
                ScriptBytes::consensus_decode(reader).map(Self)
            }
        }
    };
}

script_type!(
    /// Locking script of a transaction output.
    ScriptPubkey
);

script_type!(
    /// Script committed to by a P2SH output.
    RedeemScript
);

script_type!(
    /// Script committed to by a P2WSH output.
    WitnessScript
);

script_type!(
    /// Unlocking script of a transaction input.
    SigScript
);

impl ScriptPubkey {
    pub fn p2pkh(pubkey_hash: [u8; 20]) -> Self {
        let mut script = ScriptBytes::with_capacity(25);
        script.push_opcode(OP_DUP);
        script.push_opcode(OP_HASH160);
        script.push_slice(&pubkey_hash);
        script.push_opcode(OP_EQUALVERIFY);
        script.push_opcode(OP_CHECKSIG);
        script.into()
    }

    pub fn p2sh(script_hash: [u8; 20]) -> Self {
        let mut script = ScriptBytes::with_capacity(23);
        script.push_opcode(OP_HASH160);
        script.push_slice(&script_hash);
        script.push_opcode(OP_EQUAL);
        script.into()
    }

    pub fn p2pk(pk: &LegacyPk) -> Self {
        let mut script = ScriptBytes::with_capacity(67);
        script.push_slice(pk.as_ref());
        script.push_opcode(OP_CHECKSIG);
        script.into()
    }

    /// Witness output of the given version.
    ///
    /// # Panics
    ///
    /// If the version exceeds 16 or the program length is outside of `2..=40`.
    pub fn witness(version: u8, program: &[u8]) -> Self {
        assert!((2..=40).contains(&program.len()), "invalid witness program length");
        let mut script = ScriptBytes::with_capacity(program.len() + 2);
        script.push_num(version);
        script.push_slice(program);
        script.into()
    }

    pub fn p2wpkh(pubkey_hash: [u8; 20]) -> Self { Self::witness(0, &pubkey_hash) }

    pub fn p2wsh(script_hash: [u8; 32]) -> Self { Self::witness(0, &script_hash) }

    pub fn p2tr(output_key: [u8; 32]) -> Self { Self::witness(1, &output_key) }

    #[inline]
    pub fn is_p2pkh(&self) -> bool { is_p2pkh(self) }

    #[inline]
    pub fn is_p2sh(&self) -> bool { is_p2sh(self) }

    #[inline]
    pub fn is_p2pk(&self) -> bool { is_p2pk(self) }

    #[inline]
    pub fn is_witness(&self) -> bool { is_witness(self) }

    #[inline]
    pub fn is_p2wpkh(&self) -> bool { is_p2wpkh(self) }

    #[inline]
    pub fn is_p2wsh(&self) -> bool { is_p2wsh(self) }

    #[inline]
    pub fn is_p2tr(&self) -> bool { is_p2tr(self) }

    #[inline]
    pub fn witness_program(&self) -> Option<(u8, &[u8])> { witness_program(self) }

    #[inline]
    pub fn class(&self) -> ScriptClass { ScriptClass::classify(self) }
}

impl RedeemScript {
    /// P2SH output committing to this script.
    pub fn to_script_pubkey(&self) -> ScriptPubkey { ScriptPubkey::p2sh(hash_160(self)) }

    /// Redeem script nesting a witness program (P2SH-P2WPKH or P2SH-P2WSH).
    pub fn from_witness_output(script_pubkey: &ScriptPubkey) -> Self {
        RedeemScript(script_pubkey.as_script_bytes().clone())
    }
}

impl WitnessScript {
    /// P2WSH output committing to this script.
    pub fn to_script_pubkey(&self) -> ScriptPubkey { ScriptPubkey::p2wsh(single_sha256(self)) }

    /// Bare `m`-of-`n` multisig script (`OP_CHECKMULTISIG`).
    ///
    /// # Panics
    ///
    /// If the threshold is zero, exceeds the number of keys, or there are more
    /// than 16 keys.
    pub fn multisig(threshold: u8, pubkeys: &[LegacyPk]) -> Self {
        let n = pubkeys.len();
        assert!(
            threshold > 0 && threshold as usize <= n && n <= 16,
            "invalid multisig parameters {threshold}-of-{n}"
        );
        let mut script = ScriptBytes::new();
        script.push_num(threshold);
        for pk in pubkeys {
            script.push_slice(pk.as_ref());
        }
        script.push_num(n as u8);
        script.push_opcode(OP_CHECKMULTISIG);
        script.into()
    }
}

impl From<WitnessScript> for RedeemScript {
    fn from(script: WitnessScript) -> Self { RedeemScript(script.into_inner()) }
}

impl SigScript {
    pub fn from_pushes<'a>(items: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut script = ScriptBytes::new();
        for item in items {
            script.push_slice(item);
        }
        script.into()
    }
}

pub fn instructions(script: &[u8]) -> Instructions<'_> { Instructions { script, pos: 0 } }

/// `OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG`
pub fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == OP_PUSHBYTES_20
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

/// `OP_HASH160 <20 bytes> OP_EQUAL`
pub fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23
        && script[0] == OP_HASH160
        && script[1] == OP_PUSHBYTES_20
        && script[22] == OP_EQUAL
}

/// `<33 or 65 byte pubkey> OP_CHECKSIG`, with the key prefix checked for a
/// valid size the same way as Bitcoin Core does.
pub fn is_p2pk(script: &[u8]) -> bool { p2pk_pubkey(script).is_some() }

pub fn p2pk_pubkey(script: &[u8]) -> Option<&[u8]> {
    let valid = match script.len() {
        35 => script[0] == OP_PUSHBYTES_33 && matches!(script[1], 0x02 | 0x03),
        67 => script[0] == OP_PUSHBYTES_65 && matches!(script[1], 0x04 | 0x06 | 0x07),
        _ => false,
    };
    (valid && script[script.len() - 1] == OP_CHECKSIG).then(|| &script[1..script.len() - 1])
}

pub fn p2pkh_hash(script: &[u8]) -> Option<[u8; 20]> {
    is_p2pkh(script).then(|| {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script[3..23]);
        hash
    })
}

pub fn p2sh_hash(script: &[u8]) -> Option<[u8; 20]> {
    is_p2sh(script).then(|| {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script[2..22]);
        hash
    })
}

/// Witness version and program of a witness output script.
///
/// The script must be 4 to 42 bytes long, start with `OP_0` or `OP_1`-`OP_16`
/// and contain a single direct push of the remaining bytes.
pub fn witness_program(script: &[u8]) -> Option<(u8, &[u8])> {
    if !(4..=42).contains(&script.len()) {
        return None;
    }
    let version = match script[0] {
        OP_0 => 0,
        op @ OP_1..=OP_16 => op - OP_1 + 1,
        _ => return None,
    };
    if script[1] as usize + 2 != script.len() {
        return None;
    }
    Some((version, &script[2..]))
}

#[inline]
pub fn is_witness(script: &[u8]) -> bool { witness_program(script).is_some() }

pub fn is_p2wpkh(script: &[u8]) -> bool {
    matches!(witness_program(script), Some((0, program)) if program.len() == 20)
}

pub fn is_p2wsh(script: &[u8]) -> bool {
    matches!(witness_program(script), Some((0, program)) if program.len() == 32)
}

pub fn is_p2tr(script: &[u8]) -> bool {
    matches!(witness_program(script), Some((1, program)) if program.len() == 32)
}

/// Bare multisig script: `OP_m <pubkey>... OP_n OP_CHECKMULTISIG`.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Multisig {
    pub threshold: u8,
    pub pubkeys: Vec<LegacyPk>,
}

impl Multisig {
    pub fn parse(script: &[u8]) -> Option<Self> {
        let mut iter = instructions(script);
        let threshold = match iter.next()?.ok()? {
            Instruction::Op(op @ OP_1..=OP_16) => op - OP_1 + 1,
            _ => return None,
        };
        let mut pubkeys = Vec::new();
        loop {
            match iter.next()?.ok()? {
                Instruction::PushBytes(data) => pubkeys.push(LegacyPk::from_slice(data).ok()?),
                Instruction::Op(op @ OP_1..=OP_16) => {
                    let n = op - OP_1 + 1;
                    if n as usize != pubkeys.len() || threshold > n {
                        return None;
                    }
                    break;
                }
                Instruction::Op(_) => return None,
            }
        }
        if iter.next()? != Ok(Instruction::Op(OP_CHECKMULTISIG)) || iter.next().is_some() {
            return None;
        }
        Some(Multisig { threshold, pubkeys })
    }
}

/// Standard output script kinds.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
#[display(doc_comments)]
pub enum ScriptClass {
    /// P2PKH
    P2pkh,
    /// P2SH
    P2sh,
    /// P2PK
    P2pk,
    /// P2WPKH
    P2wpkh,
    /// P2WSH
    P2wsh,
    /// P2TR
    P2tr,
    /// witness v{version}
    Witness { version: u8 },
    /// non-standard
    Other,
}

impl ScriptClass {
    pub fn classify(script: &[u8]) -> Self {
        if is_p2pkh(script) {
            return ScriptClass::P2pkh;
        }
        if is_p2sh(script) {
            return ScriptClass::P2sh;
        }
        if is_p2pk(script) {
            return ScriptClass::P2pk;
        }
        match witness_program(script) {
            Some((0, program)) if program.len() == 20 => ScriptClass::P2wpkh,
            Some((0, program)) if program.len() == 32 => ScriptClass::P2wsh,
            Some((1, program)) if program.len() == 32 => ScriptClass::P2tr,
            Some((version, _)) => ScriptClass::Witness { version },
            None => ScriptClass::Other,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn push_slice_minimal() {
        let mut script = ScriptBytes::new();
        script.push_slice(&[]);
        script.push_slice(&[0xAA; 75]);
        script.push_slice(&[0xBB; 76]);
        script.push_slice(&[0xCC; 256]);
        assert_eq!(script[0], OP_0);
        assert_eq!(script[1], 75);
        assert_eq!(&script[77..79], &[OP_PUSHDATA1, 76]);
        assert_eq!(&script[155..158], &[OP_PUSHDATA2, 0x00, 0x01]);
        let pushes = script
            .instructions()
            .map(|i| match i.unwrap() {
                Instruction::PushBytes(data) => data.len(),
                Instruction::Op(op) => panic!("unexpected opcode {op}"),
            })
            .collect::<Vec<_>>();
        assert_eq!(pushes, vec![0, 75, 76, 256]);
    }

    #[test]
    fn truncated_push() {
        let mut iter = instructions(&[0x76, 0x05, 0x01]);
        assert_eq!(iter.next(), Some(Ok(Instruction::Op(0x76))));
        assert_eq!(iter.next(), Some(Err(TruncatedPush(1))));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn witness_program_bounds() {
        assert_eq!(witness_program(&[0x00, 0x02, 0xAA, 0xBB]), Some((0, &[0xAA, 0xBB][..])));
        assert_eq!(witness_program(&[0x51, 0x02, 0xAA, 0xBB]).map(|(v, _)| v), Some(1));
        assert_eq!(witness_program(&[0x60, 0x02, 0xAA, 0xBB]).map(|(v, _)| v), Some(16));
        // OP_1NEGATE is not a witness version
        assert_eq!(witness_program(&[0x4F, 0x02, 0xAA, 0xBB]), None);
        // length byte mismatch
        assert_eq!(witness_program(&[0x00, 0x03, 0xAA, 0xBB]), None);
        // too short and too long
        assert_eq!(witness_program(&[0x00, 0x01, 0xAA]), None);
        let mut long = vec![0x00, 41];
        long.extend([0u8; 41]);
        assert_eq!(witness_program(&long), None);
    }

    #[test]
    fn multisig_roundtrip() {
        let pk1 = LegacyPk::from_slice(&[2u8; 33]).unwrap();
        let pk2 = LegacyPk::from_slice(&[3u8; 33]).unwrap();
        let script = WitnessScript::multisig(1, &[pk1.clone(), pk2.clone()]);
        let multisig = Multisig::parse(&script).unwrap();
        assert_eq!(multisig.threshold, 1);
        assert_eq!(multisig.pubkeys, vec![pk1, pk2]);
        assert_eq!(script.as_script_bytes().last(), Some(&OP_CHECKMULTISIG));

        let mut broken = script.to_vec();
        broken.push(OP_CHECKSIG);
        assert_eq!(Multisig::parse(&broken), None);
    }
}
