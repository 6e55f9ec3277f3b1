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

use bc::{SighashType, Txid};
use indexmap::IndexMap;

use crate::{Input, Output, Psbt, PsbtError, SanityError, UnknownMap};

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum CombineError {
    /// unable to combine PSBTs for different transactions {expected} and {found}.
    TxMismatch { expected: Txid, found: Txid },

    /// PSBTs require different sighash types ({0} and {1}) for input #{2}.
    SighashMismatch(SighashType, SighashType, usize),

    /// combined PSBT is inconsistent: {0}
    #[from]
    Insane(SanityError),

    /// combined PSBT carries UTXO data not matching the transaction: {0}
    #[from]
    Utxo(PsbtError),
}

fn merge_map<K: std::hash::Hash + Eq, V>(dst: &mut IndexMap<K, V>, src: IndexMap<K, V>) {
    for (key, value) in src {
        dst.entry(key).or_insert(value);
    }
}

fn merge_unknown(dst: &mut UnknownMap, src: UnknownMap) {
    for (key_type, map) in src {
        merge_map(dst.entry(key_type).or_default(), map);
    }
}

impl Input {
    fn combine(&mut self, other: Input, index: usize) -> Result<(), CombineError> {
        if let (Some(ours), Some(theirs)) = (self.sighash_type, other.sighash_type) {
            if ours != theirs {
                return Err(CombineError::SighashMismatch(ours, theirs, index));
            }
        }

        if self.is_finalized() {
            merge_unknown(&mut self.unknown, other.unknown);
            return Ok(());
        }
        if other.is_finalized() {
            self.clear_non_final();
            self.final_script_sig = other.final_script_sig;
            self.final_witness = other.final_witness;
            self.non_witness_utxo = self.non_witness_utxo.take().or(other.non_witness_utxo);
            self.witness_utxo = self.witness_utxo.take().or(other.witness_utxo);
            merge_unknown(&mut self.unknown, other.unknown);
            return Ok(());
        }

        self.non_witness_utxo = self.non_witness_utxo.take().or(other.non_witness_utxo);
        self.witness_utxo = self.witness_utxo.take().or(other.witness_utxo);
        self.sighash_type = self.sighash_type.or(other.sighash_type);
        self.redeem_script = self.redeem_script.take().or(other.redeem_script);
        self.witness_script = self.witness_script.take().or(other.witness_script);
        merge_map(&mut self.partial_sigs, other.partial_sigs);
        merge_map(&mut self.bip32_derivation, other.bip32_derivation);
        merge_unknown(&mut self.unknown, other.unknown);
        Ok(())
    }
}

impl Output {
    fn combine(&mut self, other: Output) {
        self.redeem_script = self.redeem_script.take().or(other.redeem_script);
        self.witness_script = self.witness_script.take().or(other.witness_script);
        merge_map(&mut self.bip32_derivation, other.bip32_derivation);
        merge_unknown(&mut self.unknown, other.unknown);
    }
}

impl Psbt {
    /// Merges data from another PSBT for the same transaction (BIP-174
    /// combiner). On conflicting values the data already present in `self`
    /// is kept.
    ///
    /// Either all the data are merged, or, on error, `self` is left
    /// unchanged.
    pub fn combine(&mut self, other: Psbt) -> Result<(), CombineError> {
        let expected = self.txid();
        let found = other.txid();
        if expected != found {
            return Err(CombineError::TxMismatch { expected, found });
        }

        let mut combined = self.clone();
        combined.version = combined.version.or(other.version);
        merge_map(&mut combined.xpubs, other.xpubs);
        merge_unknown(&mut combined.unknown, other.unknown);
        for (index, (input, theirs)) in combined.inputs.iter_mut().zip(other.inputs).enumerate() {
            input.combine(theirs, index)?;
        }
        for (output, theirs) in combined.outputs.iter_mut().zip(other.outputs) {
            output.combine(theirs);
        }
        combined.check_sanity()?;
        combined.check_utxos()?;

        tracing::debug!(txid = %expected, "PSBTs combined");
        *self = combined;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use bc::{
        ByteStr, LegacyPk, LegacySig, Outpoint, ScriptPubkey, SigScript, Tx, TxIn, TxOut,
        SEQ_NO_FINAL,
    };

    use super::*;
    use crate::KeyMap;

    fn psbt(vout: u32) -> Psbt {
        let prev = Outpoint::new(Txid::from_byte_array([4u8; 32]), vout);
        let tx = Tx::new(
            2,
            vec![TxIn::unsigned(prev, SEQ_NO_FINAL)],
            vec![TxOut::new(ScriptPubkey::p2wpkh([6u8; 20]), 500)],
            0,
        );
        Psbt::from_unsigned_tx(tx).unwrap()
    }

    fn pk(byte: u8) -> LegacyPk {
        let mut data = vec![0x02];
        data.extend([byte; 32]);
        LegacyPk::from_slice(&data).unwrap()
    }

    #[test]
    fn different_tx() {
        let mut ours = psbt(0);
        let theirs = psbt(1);
        assert!(matches!(ours.combine(theirs), Err(CombineError::TxMismatch { .. })));
    }

    #[test]
    fn signatures_merged() {
        let mut ours = psbt(0);
        let mut theirs = psbt(0);
        ours.input_mut(0).unwrap().partial_sigs.insert(pk(1), LegacySig::from(vec![1u8]));
        theirs.input_mut(0).unwrap().partial_sigs.insert(pk(1), LegacySig::from(vec![9u8]));
        theirs.input_mut(0).unwrap().partial_sigs.insert(pk(2), LegacySig::from(vec![2u8]));
        let unknown = theirs.unknown.entry(0xF0).or_default();
        unknown.insert(ByteStr::from(vec![1u8]), ByteStr::default());

        ours.combine(theirs).unwrap();
        let sigs = &ours.input(0).unwrap().partial_sigs;
        assert_eq!(sigs.len(), 2);
        assert_eq!(sigs[&pk(1)], LegacySig::from(vec![1u8]));
        assert_eq!(ours.unknown(0xF0, &[1]), Some(&ByteStr::default()));
    }

    #[test]
    fn finalized_wins() {
        let mut ours = psbt(0);
        let mut theirs = psbt(0);
        ours.input_mut(0).unwrap().partial_sigs.insert(pk(1), LegacySig::from(vec![1u8]));
        theirs.input_mut(0).unwrap().final_script_sig = Some(SigScript::from(vec![0x51u8]));

        ours.combine(theirs).unwrap();
        let input = ours.input(0).unwrap();
        assert!(input.is_finalized());
        assert!(input.partial_sigs.is_empty());
    }

    #[test]
    fn all_or_nothing() {
        let mut ours = psbt(0);
        let mut theirs = psbt(0);
        let prev = Tx::new(1, vec![], vec![], 0);
        ours.input_mut(0).unwrap().partial_sigs.insert(pk(1), LegacySig::from(vec![1u8]));
        ours.input_mut(0).unwrap().witness_utxo = Some(TxOut::new(ScriptPubkey::new(), 1));
        theirs.input_mut(0).unwrap().partial_sigs.insert(pk(2), LegacySig::from(vec![2u8]));
        theirs.input_mut(0).unwrap().non_witness_utxo = Some(prev);

        let before = ours.clone();
        assert_eq!(ours.combine(theirs), Err(CombineError::Insane(SanityError::BothUtxos(0))));
        assert_eq!(ours, before);
    }

    #[test]
    fn foreign_utxo() {
        let mut ours = psbt(0);
        let mut theirs = psbt(0);
        let prev = Tx::new(1, vec![], vec![TxOut::new(ScriptPubkey::new(), 1)], 0);
        theirs.input_mut(0).unwrap().non_witness_utxo = Some(prev.clone());

        let before = ours.clone();
        assert_eq!(
            ours.combine(theirs),
            Err(CombineError::Utxo(PsbtError::UtxoMismatch {
                input: 0,
                expected: Txid::from_byte_array([4u8; 32]),
                found: prev.txid(),
            }))
        );
        assert_eq!(ours, before);
    }

    #[test]
    fn sighash_conflict() {
        let mut ours = psbt(0);
        let mut theirs = psbt(0);
        ours.input_mut(0).unwrap().sighash_type = Some(SighashType::ALL);
        theirs.input_mut(0).unwrap().sighash_type = Some(SighashType::NONE);
        assert_eq!(
            ours.combine(theirs),
            Err(CombineError::SighashMismatch(SighashType::ALL, SighashType::NONE, 0))
        );
    }
}
