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

use bc::{
    KeyOrigin, LegacyPk, LegacySig, RedeemScript, SigScript, SighashType, Tx, TxOut, Txid,
    Witness, WitnessScript, Xpub,
};
use indexmap::IndexMap;

use crate::{PsbtError, UnknownMap};

/// Violations of the per-input consistency rules.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum SanityError {
    /// input #{0} provides both witness and non-witness UTXOs.
    BothUtxos(usize),

    /// input #{0} has witness data but no witness UTXO.
    WitnessWithoutUtxo(usize),
}

/// Partially signed bitcoin transaction (BIP-174 version 0).
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Psbt {
    /// Transaction being signed. Has empty signature scripts and witnesses.
    pub(crate) unsigned_tx: Tx,

    /// PSBT version, when explicitly given.
    pub version: Option<u32>,

    /// A global map from extended public keys to the used key fingerprint and
    /// derivation path as defined by BIP 32.
    pub xpubs: IndexMap<Xpub, KeyOrigin>,

    /// The corresponding key-value map for each input of the unsigned
    /// transaction.
    pub(crate) inputs: Vec<Input>,

    /// The corresponding key-value map for each output of the unsigned
    /// transaction.
    pub(crate) outputs: Vec<Output>,

    /// Unknown global keys.
    pub unknown: UnknownMap,
}

impl Psbt {
    pub(crate) fn empty() -> Psbt {
        Psbt {
            unsigned_tx: Tx::new(2, vec![], vec![], 0),
            version: None,
            xpubs: none!(),
            inputs: vec![],
            outputs: vec![],
            unknown: none!(),
        }
    }

    /// Creates PSBT with empty input and output maps for an unsigned
    /// transaction.
    pub fn from_unsigned_tx(tx: Tx) -> Result<Psbt, PsbtError> {
        if !tx.is_unsigned() {
            return Err(PsbtError::NotUnsigned);
        }
        let mut psbt = Psbt::empty();
        psbt.reset_unsigned_tx(tx);
        Ok(psbt)
    }

    /// Creates PSBT from a transaction, dropping all its signature scripts and
    /// witnesses.
    pub fn from_tx(tx: &Tx) -> Psbt {
        let mut psbt = Psbt::empty();
        psbt.reset_unsigned_tx(tx.to_unsigned());
        psbt
    }

    pub(crate) fn reset_unsigned_tx(&mut self, tx: Tx) {
        self.inputs = tx.inputs().iter().map(|_| Input::new()).collect();
        self.outputs = tx.outputs().iter().map(|_| Output::new()).collect();
        self.unsigned_tx = tx;
    }

    pub(crate) fn set_maps(&mut self, inputs: Vec<Input>, outputs: Vec<Output>) {
        debug_assert_eq!(inputs.len(), self.unsigned_tx.inputs().len());
        debug_assert_eq!(outputs.len(), self.unsigned_tx.outputs().len());
        self.inputs = inputs;
        self.outputs = outputs;
    }

    #[inline]
    pub fn unsigned_tx(&self) -> &Tx { &self.unsigned_tx }

    #[inline]
    pub fn txid(&self) -> Txid { self.unsigned_tx.txid() }

    pub fn input(&self, index: usize) -> Option<&Input> { self.inputs.get(index) }

    pub fn input_mut(&mut self, index: usize) -> Option<&mut Input> { self.inputs.get_mut(index) }

    pub fn inputs(&self) -> impl Iterator<Item = &Input> { self.inputs.iter() }

    pub fn inputs_mut(&mut self) -> impl Iterator<Item = &mut Input> { self.inputs.iter_mut() }

    pub fn output(&self, index: usize) -> Option<&Output> { self.outputs.get(index) }

    pub fn output_mut(&mut self, index: usize) -> Option<&mut Output> {
        self.outputs.get_mut(index)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Output> { self.outputs.iter() }

    pub fn outputs_mut(&mut self) -> impl Iterator<Item = &mut Output> { self.outputs.iter_mut() }

    /// Output spent by the input with the given index, taken from the witness
    /// UTXO or, if absent, from the non-witness UTXO.
    pub fn spent_output(&self, index: usize) -> Option<&TxOut> {
        let input = self.inputs.get(index)?;
        if let Some(utxo) = &input.witness_utxo {
            return Some(utxo);
        }
        let vout = self.unsigned_tx.inputs().get(index)?.prev_output.vout;
        input.non_witness_utxo.as_ref()?.outputs().get(vout as usize)
    }

    /// Sum of the spent outputs, if all of them are known.
    pub fn input_sum(&self) -> Option<i64> {
        (0..self.inputs.len())
            .try_fold(0i64, |sum, index| sum.checked_add(self.spent_output(index)?.value))
    }

    #[inline]
    pub fn output_sum(&self) -> Option<i64> { self.unsigned_tx.total_output_value() }

    /// Transaction fee. Returns `None` if some of the spent outputs are
    /// unknown or if the value sums overflow.
    #[inline]
    pub fn fee(&self) -> Option<i64> { self.input_sum()?.checked_sub(self.output_sum()?) }

    /// Detects whether every input has its final signature script or witness.
    pub fn is_finalized(&self) -> bool { self.inputs.iter().all(Input::is_finalized) }

    pub fn check_sanity(&self) -> Result<(), SanityError> {
        for (index, input) in self.inputs.iter().enumerate() {
            input.check_sanity(index)?;
        }
        Ok(())
    }

    #[inline]
    pub fn is_sane(&self) -> bool { self.check_sanity().is_ok() }
}

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Input {
    /// The non-witness transaction this input spends from. Should only be
    /// `Some` for inputs which spend non-segwit outputs or if it is unknown
    /// whether an input spends a segwit output.
    pub non_witness_utxo: Option<Tx>,

    /// The transaction output this input spends from. Should only be `Some` for
    /// inputs which spend segwit outputs, including P2SH embedded ones.
    pub witness_utxo: Option<TxOut>,

    /// A map from public keys to their corresponding signature as would be
    /// pushed to the stack from a scriptSig or witness.
    pub partial_sigs: IndexMap<LegacyPk, LegacySig>,

    /// The sighash type to be used for this input. Signatures for this input
    /// must use the sighash type.
    pub sighash_type: Option<SighashType>,

    /// The redeem script for this input.
    pub redeem_script: Option<RedeemScript>,

    /// The witness script for this input.
    pub witness_script: Option<WitnessScript>,

    /// A map from public keys needed to sign this input to their corresponding
    /// master key fingerprints and derivation paths.
    pub bip32_derivation: IndexMap<LegacyPk, KeyOrigin>,

    /// The finalized, fully-constructed scriptSig with signatures and any
    /// other scripts necessary for this input to pass validation.
    pub final_script_sig: Option<SigScript>,

    /// The finalized, fully-constructed scriptWitness with signatures and any
    /// other scripts necessary for this input to pass validation.
    pub final_witness: Option<Witness>,

    /// Unknown keys
    pub unknown: UnknownMap,
}

impl Input {
    pub fn new() -> Input { Input::default() }

    pub fn is_finalized(&self) -> bool {
        self.final_script_sig
            .as_ref()
            .map(|script| !script.as_script_bytes().as_slice().is_empty())
            .unwrap_or_default()
            || self.final_witness.as_ref().map(|witness| !witness.is_null()).unwrap_or_default()
    }

    /// Removes data which becomes meaningless once the input is finalized.
    pub(crate) fn clear_non_final(&mut self) {
        self.partial_sigs.clear();
        self.sighash_type = None;
        self.redeem_script = None;
        self.witness_script = None;
        self.bip32_derivation.clear();
    }

    pub fn check_sanity(&self, index: usize) -> Result<(), SanityError> {
        if self.non_witness_utxo.is_some() && self.witness_utxo.is_some() {
            return Err(SanityError::BothUtxos(index));
        }
        let has_witness = self.witness_script.is_some()
            || self.final_witness.as_ref().map(|witness| !witness.is_null()).unwrap_or_default();
        if has_witness && self.witness_utxo.is_none() {
            return Err(SanityError::WitnessWithoutUtxo(index));
        }
        Ok(())
    }

    #[inline]
    pub fn is_sane(&self) -> bool { self.check_sanity(0).is_ok() }
}

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Output {
    /// The redeem script for this output.
    pub redeem_script: Option<RedeemScript>,

    /// The witness script for this output.
    pub witness_script: Option<WitnessScript>,

    /// A map from public keys needed to spend this output to their
    /// corresponding master key fingerprints and derivation paths.
    pub bip32_derivation: IndexMap<LegacyPk, KeyOrigin>,

    /// Unknown keys
    pub unknown: UnknownMap,
}

impl Output {
    pub fn new() -> Output { Output::default() }
}

mod display_from_str {
    use std::fmt::{self, Display, Formatter, LowerHex};
    use std::str::FromStr;

    use amplify::hex::{self, FromHex, ToHex};
    use base64::display::Base64Display;
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;

    use super::*;
    use crate::Decode;

    #[derive(Clone, Debug, Display, Error, From)]
    #[display(inner)]
    pub enum PsbtParseError {
        #[from]
        Hex(hex::Error),

        #[from]
        Base64(base64::DecodeError),

        #[from]
        Psbt(PsbtError),
    }

    impl Psbt {
        pub fn from_base64(s: &str) -> Result<Psbt, PsbtParseError> {
            Psbt::deserialize(BASE64_STANDARD.decode(s)?).map_err(PsbtParseError::from)
        }

        pub fn from_base16(s: &str) -> Result<Psbt, PsbtParseError> {
            let data = Vec::<u8>::from_hex(s)?;
            Psbt::deserialize(data).map_err(PsbtParseError::from)
        }

        pub fn to_base64(&self) -> String { BASE64_STANDARD.encode(self.serialize()) }

        pub fn to_base16(&self) -> String { self.serialize().to_hex() }
    }

    /// FromStr implementation parses both Base64 and Hex (Base16) encodings.
    impl FromStr for Psbt {
        type Err = PsbtParseError;

        #[inline]
        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Self::from_base16(s).or_else(|_| Self::from_base64(s))
        }
    }

    /// PSBT displays as a Base64-encoded string.
    impl Display for Psbt {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "{}", Base64Display::new(&self.serialize(), &BASE64_STANDARD))
        }
    }

    impl LowerHex for Psbt {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(&self.to_base16()) }
    }
}
pub use display_from_str::PsbtParseError;

#[cfg(feature = "serde")]
mod _serde {
    use std::str::FromStr;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::*;

    impl Serialize for Psbt {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&self.to_base64())
        }
    }

    impl<'de> Deserialize<'de> for Psbt {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let s = String::deserialize(deserializer)?;
            Psbt::from_str(&s).map_err(D::Error::custom)
        }
    }
}
