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
    ByteStr, DerivationIndex, DerivationPath, Fingerprint, KeyOrigin, LegacyPk, LegacySig,
    Outpoint, RedeemScript, ScriptPubkey, SighashType, Tx, TxIn, TxOut, Txid, WitnessScript,
};
use proptest::collection::vec;
use proptest::option;
use proptest::prelude::*;
use proptest::sample::Index;
use psbt::{Decode, Input, Output, Psbt, UnknownMap};

fn unknown(key_types: impl Strategy<Value = u8>) -> impl Strategy<Value = UnknownMap> {
    vec((key_types, vec(any::<u8>(), 0..8), vec(any::<u8>(), 0..16)), 0..3).prop_map(|pairs| {
        let mut map = UnknownMap::new();
        for (key_type, key_data, value_data) in pairs {
            map.entry(key_type)
                .or_default()
                .insert(ByteStr::from(key_data), ByteStr::from(value_data));
        }
        map
    })
}

fn pubkey() -> impl Strategy<Value = LegacyPk> {
    prop_oneof![
        (prop_oneof![Just(0x02u8), Just(0x03u8)], vec(any::<u8>(), 32)),
        (Just(0x04u8), vec(any::<u8>(), 64)),
    ]
    .prop_map(|(prefix, data)| {
        let mut key = vec![prefix];
        key.extend(data);
        LegacyPk::from_slice(&key).unwrap()
    })
}

fn partial_sig() -> impl Strategy<Value = (LegacyPk, LegacySig)> {
    (pubkey(), vec(any::<u8>(), 1..73)).prop_map(|(pk, sig)| (pk, LegacySig::from(sig)))
}

fn bip32_derivation() -> impl Strategy<Value = (LegacyPk, KeyOrigin)> {
    (pubkey(), any::<[u8; 4]>(), vec(any::<u32>(), 0..6)).prop_map(|(pk, fp, path)| {
        let path = path
            .into_iter()
            .map(DerivationIndex::from_child_number)
            .collect::<DerivationPath>();
        (pk, KeyOrigin::new(Fingerprint::from(fp), path))
    })
}

fn txin() -> impl Strategy<Value = TxIn> {
    (any::<[u8; 32]>(), any::<u32>(), any::<u32>()).prop_map(|(txid, vout, sequence)| {
        TxIn::unsigned(Outpoint::new(Txid::from_byte_array(txid), vout), sequence)
    })
}

fn txout() -> impl Strategy<Value = TxOut> {
    (0i64..2_100_000_000_000_000, vec(any::<u8>(), 0..40))
        .prop_map(|(value, script)| TxOut::new(ScriptPubkey::from(script), value))
}

/// Previous transaction; always has inputs so its legacy serialization can't
/// be mistaken for a segwit one.
fn prev_tx() -> impl Strategy<Value = Tx> {
    (any::<i32>(), vec(txin(), 1..3), vec(txout(), 1..4), any::<u32>()).prop_map(
        |(version, inputs, outputs, lock_time)| Tx::new(version, inputs, outputs, lock_time),
    )
}

#[derive(Clone, Debug)]
enum Utxo {
    Witness(TxOut),
    NonWitness(Tx, Index),
}

fn utxo() -> impl Strategy<Value = Option<Utxo>> {
    option::of(prop_oneof![
        txout().prop_map(Utxo::Witness),
        (prev_tx(), any::<Index>()).prop_map(|(tx, vout)| Utxo::NonWitness(tx, vout)),
    ])
}

fn input() -> impl Strategy<Value = (TxIn, Input)> {
    (
        txin(),
        utxo(),
        vec(partial_sig(), 0..3),
        vec(bip32_derivation(), 0..3),
        option::of(any::<u32>().prop_map(SighashType::from_consensus_u32)),
        option::of(vec(any::<u8>(), 0..30)),
        unknown(0x09u8..=0xFF),
    )
        .prop_map(|(mut txin, utxo, sigs, derivation, sighash_type, witness_script, unknown)| {
            let mut input = Input::new();
            match utxo {
                Some(Utxo::Witness(txout)) => {
                    input.witness_utxo = Some(txout);
                    // witness script requires the witness UTXO to be present
                    input.witness_script = witness_script.map(WitnessScript::from);
                }
                Some(Utxo::NonWitness(prev, vout)) => {
                    let vout = vout.index(prev.outputs().len()) as u32;
                    txin.prev_output = Outpoint::new(prev.txid(), vout);
                    input.non_witness_utxo = Some(prev);
                }
                None => {}
            }
            input.partial_sigs.extend(sigs);
            input.bip32_derivation.extend(derivation);
            input.sighash_type = sighash_type;
            input.unknown = unknown;
            (txin, input)
        })
}

fn output() -> impl Strategy<Value = Output> {
    (
        option::of(vec(any::<u8>(), 0..30)),
        option::of(vec(any::<u8>(), 0..30)),
        vec(bip32_derivation(), 0..3),
        unknown(0x03u8..=0xFF),
    )
        .prop_map(|(redeem_script, witness_script, derivation, unknown)| {
            let mut output = Output::new();
            output.redeem_script = redeem_script.map(RedeemScript::from);
            output.witness_script = witness_script.map(WitnessScript::from);
            output.bip32_derivation.extend(derivation);
            output.unknown = unknown;
            output
        })
}

fn psbt() -> impl Strategy<Value = Psbt> {
    (
        any::<i32>(),
        vec(input(), 1..4),
        vec((txout(), output()), 0..4),
        any::<u32>(),
        prop_oneof![Just(None), Just(Some(0u32))],
        unknown(prop_oneof![0x02u8..0xFB, 0xFCu8..=0xFF]),
    )
        .prop_map(|(version, inputs, outputs, lock_time, psbt_version, unknown)| {
            let (txins, inputs): (Vec<_>, Vec<_>) = inputs.into_iter().unzip();
            let (txouts, outputs): (Vec<_>, Vec<_>) = outputs.into_iter().unzip();
            let tx = Tx::new(version, txins, txouts, lock_time);
            let mut psbt = Psbt::from_unsigned_tx(tx).unwrap();
            for (index, input) in inputs.into_iter().enumerate() {
                *psbt.input_mut(index).unwrap() = input;
            }
            for (index, output) in outputs.into_iter().enumerate() {
                *psbt.output_mut(index).unwrap() = output;
            }
            psbt.version = psbt_version;
            psbt.unknown = unknown;
            psbt
        })
}

proptest! {
    #[test]
    fn binary(psbt in psbt()) {
        prop_assert!(psbt.is_sane());
        let data = psbt.serialize();
        let decoded = Psbt::deserialize(&data).unwrap();
        prop_assert_eq!(&decoded, &psbt);
        prop_assert_eq!(decoded.serialize(), data);
    }

    #[test]
    fn base64(psbt in psbt()) {
        let decoded = psbt.to_string().parse::<Psbt>().unwrap();
        prop_assert_eq!(decoded.to_base16(), psbt.to_base16());
    }

    #[test]
    fn truncated(psbt in psbt(), cut in any::<prop::sample::Index>()) {
        let data = psbt.serialize();
        let len = cut.index(data.len());
        prop_assert!(Psbt::deserialize(&data[..len]).is_err());
    }
}
