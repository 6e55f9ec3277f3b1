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

use std::str::FromStr;

use bc::{
    ByteStr, ConsensusEncode, KeyOrigin, Outpoint, ScriptPubkey, SigScript, Tx, TxIn, TxOut, Txid,
    SEQ_NO_FINAL,
};
use psbt::{Decode, KeyLen, KeyMap, MapName, Psbt, PsbtError, PsbtParseError, SanityError};

fn parse_roundtrip(s: &str) -> Psbt {
    let psbt = Psbt::from_str(s).unwrap();
    assert_eq!(psbt.to_string(), s.trim());
    let reparsed = Psbt::from_str(&psbt.to_string()).unwrap();
    assert_eq!(reparsed, psbt);
    psbt
}

fn pair(key: &[u8], value: &[u8]) -> Vec<u8> {
    assert!(key.len() < 0xFD && value.len() < 0xFD);
    let mut data = vec![key.len() as u8];
    data.extend(key);
    data.push(value.len() as u8);
    data.extend(value);
    data
}

fn raw_psbt(global: &[Vec<u8>], inputs: &[&[Vec<u8>]], outputs: &[&[Vec<u8>]]) -> Vec<u8> {
    let mut data = Psbt::MAGIC.to_vec();
    for map in [global].into_iter().chain(inputs.iter().copied()).chain(outputs.iter().copied()) {
        for pair in map.iter() {
            data.extend(pair);
        }
        data.push(0);
    }
    data
}

fn unsigned_tx(prev_txid: Txid, inputs: u32) -> Tx {
    let inputs =
        (0..inputs).map(|vout| TxIn::unsigned(Outpoint::new(prev_txid, vout), SEQ_NO_FINAL));
    Tx::new(2, inputs.collect(), vec![TxOut::new(ScriptPubkey::p2wpkh([0x11; 20]), 1000)], 0)
}

fn tx_pair(tx: &Tx) -> Vec<u8> { pair(&[0x00], &tx.serialize_without_witness()) }

fn prev_tx() -> Tx {
    let input = TxIn::unsigned(Outpoint::new(Txid::from_byte_array([0xAA; 32]), 3), 0);
    let outputs = vec![
        TxOut::new(ScriptPubkey::p2pkh([0x22; 20]), 3000),
        TxOut::new(ScriptPubkey::p2wpkh([0x33; 20]), 4000),
    ];
    Tx::new(1, vec![input], outputs, 0)
}

fn decode(data: &[u8]) -> Result<Psbt, PsbtError> { Psbt::deserialize(data) }

/// Case: PSBT with one P2PKH input. Outputs are empty.
#[test]
fn pkh_outputless() {
    let psbt = parse_roundtrip(include_str!("data/pkh_outputless.psbt"));
    assert_eq!(
        psbt.txid(),
        Txid::from_str("af2cac1e0e33d896d9d0751d66fcb2fa54b737c7a13199281fb57e4f497bb652")
            .unwrap()
    );
    assert_eq!(psbt.unsigned_tx().lock_time(), 1257139);
    assert_eq!(psbt.inputs().count(), 1);
    assert_eq!(psbt.outputs().count(), 2);
    assert_eq!(psbt.version, None);
    assert!(psbt.xpubs.is_empty());

    let input = psbt.input(0).unwrap();
    let utxo = input.non_witness_utxo.as_ref().unwrap();
    assert_eq!(
        utxo.txid(),
        Txid::from_str("f61b1742ca13176464adb3cb66050c00787bb3a4eead37e985f2df1e37718126")
            .unwrap()
    );
    assert!(utxo.has_witness());
    assert!(input.partial_sigs.is_empty());
    assert!(!psbt.is_finalized());

    assert_eq!(psbt.spent_output(0).unwrap().value, 200_000_000);
    assert_eq!(psbt.output_sum(), Some(199_999_699));
    assert_eq!(psbt.fee(), Some(301));
}

/// Case: the same PSBT in hexadecimal form.
#[test]
fn base16() {
    let psbt = Psbt::from_str(include_str!("data/pkh_outputless.psbt")).unwrap();
    let hex = psbt.to_base16();
    assert_eq!(format!("{psbt:x}"), hex);
    assert_eq!(Psbt::from_str(&hex).unwrap(), psbt);
    assert_eq!(Psbt::from_base16(&hex).unwrap().serialize(), psbt.serialize());
}

/// Case: PSBT lacking the last output map.
#[test]
fn truncated() {
    let psbt = Psbt::from_str(include_str!("data/pkh_outputless.psbt")).unwrap();
    let data = psbt.serialize();
    assert_eq!(
        decode(&data[..data.len() - 1]),
        Err(PsbtError::OutputCountMismatch {
            expected: 2,
            found: 1
        })
    );
    assert_eq!(decode(&data[..3]), Err(PsbtError::TruncatedInput));
    assert_eq!(decode(&[]), Err(PsbtError::TruncatedInput));
    assert_eq!(decode(&data[..20]), Err(PsbtError::TruncatedInput));

    let mut extended = data.clone();
    extended.push(0);
    assert_eq!(decode(&extended), Err(PsbtError::DataNotConsumed));
}

#[test]
fn invalid_magic() {
    let magic = |data: &[u8]| -> Result<Psbt, PsbtError> {
        Err(PsbtError::InvalidMagic(ByteStr::from(data.to_vec())))
    };
    assert_eq!(decode(b"psx"), magic(b"psx"));
    assert_eq!(decode(b"\xFF"), magic(b"\xFF"));
    assert_eq!(decode(b"psbt\xFE\x00"), magic(b"psbt\xFE"));
    assert_eq!(decode(b"psbt"), Err(PsbtError::TruncatedInput));
}

#[test]
fn invalid_encodings() {
    assert!(matches!(Psbt::from_base64("cHNidP8*"), Err(PsbtParseError::Base64(_))));
    assert!(matches!(Psbt::from_base16("70736274f"), Err(PsbtParseError::Hex(_))));
    assert!(matches!(
        Psbt::from_base16("70736274fe00"),
        Err(PsbtParseError::Psbt(PsbtError::InvalidMagic(_)))
    ));
}

#[test]
fn missing_unsigned_tx() {
    assert_eq!(decode(&raw_psbt(&[], &[], &[])), Err(PsbtError::MissingUnsignedTx));

    let unknown = pair(&[0xF0, 0x01], &[0x02]);
    assert_eq!(decode(&raw_psbt(&[unknown], &[], &[])), Err(PsbtError::MissingUnsignedTx));
}

#[test]
fn not_unsigned() {
    let mut tx = unsigned_tx(Txid::from_byte_array([1; 32]), 1);
    tx.inputs_mut()[0].sig_script = SigScript::from(vec![0x51u8]);
    let data = raw_psbt(&[tx_pair(&tx)], &[&[]], &[&[]]);
    assert_eq!(decode(&data), Err(PsbtError::NotUnsigned));
}

#[test]
fn versions() {
    let tx = unsigned_tx(Txid::from_byte_array([1; 32]), 1);

    let data = raw_psbt(&[tx_pair(&tx), pair(&[0xFB], &0u32.to_le_bytes())], &[&[]], &[&[]]);
    let psbt = decode(&data).unwrap();
    assert_eq!(psbt.version, Some(0));
    assert_eq!(psbt.serialize(), data);

    let data = raw_psbt(&[tx_pair(&tx), pair(&[0xFB], &2u32.to_le_bytes())], &[&[]], &[&[]]);
    assert_eq!(decode(&data), Err(PsbtError::UnsupportedVersion(2)));
}

#[test]
fn duplicate_keys() {
    let tx = unsigned_tx(Txid::from_byte_array([1; 32]), 1);

    let mut key = vec![0x02, 0x03];
    key.extend([0x44; 32]);
    let sig = pair(&key, &[0x30, 0x01, 0x01]);
    let other_sig = pair(&key, &[0x30, 0x02, 0x01]);
    let data = raw_psbt(&[tx_pair(&tx)], &[&[sig, other_sig]], &[&[]]);
    assert_eq!(decode(&data), Err(PsbtError::DuplicateKey(MapName::Input, 0x02)));

    let unknown = pair(&[0xF0, 0x01], &[0x02]);
    let data = raw_psbt(&[tx_pair(&tx), unknown.clone(), unknown], &[&[]], &[&[]]);
    assert_eq!(decode(&data), Err(PsbtError::DuplicateKey(MapName::Global, 0xF0)));

    let script = pair(&[0x00], &[0x51]);
    let data = raw_psbt(&[tx_pair(&tx)], &[&[]], &[&[script.clone(), script]]);
    assert_eq!(decode(&data), Err(PsbtError::DuplicateKey(MapName::Output, 0x00)));
}

#[test]
fn bad_key_lengths() {
    let tx = unsigned_tx(Txid::from_byte_array([1; 32]), 1);

    let data = raw_psbt(&[tx_pair(&tx)], &[&[pair(&[0x00, 0xAA], &[])]], &[&[]]);
    assert_eq!(
        decode(&data),
        Err(PsbtError::BadKeyLength {
            map: MapName::Input,
            key_type: 0x00,
            expected: KeyLen::Exact(1),
            got: 2
        })
    );

    let data = raw_psbt(&[tx_pair(&tx)], &[&[pair(&[0x06; 20], &[0; 4])]], &[&[]]);
    assert_eq!(
        decode(&data),
        Err(PsbtError::BadKeyLength {
            map: MapName::Input,
            key_type: 0x06,
            expected: KeyLen::LegacyPk,
            got: 20
        })
    );

    let mut tx_key = tx_pair(&tx);
    tx_key.splice(0..2, [0x02, 0x00, 0x00]);
    assert!(matches!(
        decode(&raw_psbt(&[tx_key], &[&[]], &[&[]])),
        Err(PsbtError::BadKeyLength {
            map: MapName::Global,
            key_type: 0x00,
            got: 2,
            ..
        })
    ));
}

#[test]
fn invalid_value() {
    let tx = unsigned_tx(Txid::from_byte_array([1; 32]), 1);
    let data = raw_psbt(&[tx_pair(&tx)], &[&[pair(&[0x01], &[0x01])]], &[&[]]);
    assert_eq!(decode(&data), Err(PsbtError::InvalidValue(MapName::Input, 0x01)));

    let data = raw_psbt(&[tx_pair(&tx)], &[&[pair(&[0x03], &[0x01, 0, 0, 0, 0])]], &[&[]]);
    assert_eq!(decode(&data), Err(PsbtError::InvalidValue(MapName::Input, 0x03)));
}

#[test]
fn map_count_mismatch() {
    let tx = unsigned_tx(Txid::from_byte_array([1; 32]), 2);
    let data = raw_psbt(&[tx_pair(&tx)], &[&[]], &[]);
    assert_eq!(
        decode(&data),
        Err(PsbtError::InputCountMismatch {
            expected: 2,
            found: 1
        })
    );

    let data = raw_psbt(&[tx_pair(&tx)], &[&[], &[]], &[]);
    assert_eq!(
        decode(&data),
        Err(PsbtError::OutputCountMismatch {
            expected: 1,
            found: 0
        })
    );
}

#[test]
fn utxo_cross_reference() {
    let prev = prev_tx();
    let tx = unsigned_tx(Txid::from_byte_array([1; 32]), 1);
    let utxo = pair(&[0x00], &prev.consensus_serialize());
    let data = raw_psbt(&[tx_pair(&tx)], &[&[utxo.clone()]], &[&[]]);
    assert_eq!(
        decode(&data),
        Err(PsbtError::UtxoMismatch {
            input: 0,
            expected: Txid::from_byte_array([1; 32]),
            found: prev.txid()
        })
    );

    let tx = unsigned_tx(prev.txid(), 1);
    let data = raw_psbt(&[tx_pair(&tx)], &[&[utxo.clone()]], &[&[]]);
    let psbt = decode(&data).unwrap();
    assert_eq!(psbt.input(0).unwrap().non_witness_utxo, Some(prev.clone()));
    assert_eq!(psbt.fee(), Some(2000));
    assert_eq!(psbt.serialize(), data);

    let mut tx = unsigned_tx(prev.txid(), 1);
    tx.inputs_mut()[0].prev_output.vout = 5;
    let data = raw_psbt(&[tx_pair(&tx)], &[&[utxo]], &[&[]]);
    assert_eq!(decode(&data), Err(PsbtError::UtxoOutputMissing { input: 0, vout: 5 }));
}

#[test]
fn insane() {
    let prev = prev_tx();
    let tx = unsigned_tx(prev.txid(), 1);
    let utxo = pair(&[0x00], &prev.consensus_serialize());
    let witness_utxo = pair(&[0x01], &prev.outputs()[0].consensus_serialize());
    let data = raw_psbt(&[tx_pair(&tx)], &[&[utxo.clone(), witness_utxo]], &[&[]]);
    assert_eq!(decode(&data), Err(PsbtError::Insane(SanityError::BothUtxos(0))));

    let witness_script = pair(&[0x05], &[0x51]);
    let data = raw_psbt(&[tx_pair(&tx)], &[&[utxo, witness_script]], &[&[]]);
    assert_eq!(decode(&data), Err(PsbtError::Insane(SanityError::WitnessWithoutUtxo(0))));
}

/// Case: unknown and proprietary keys in all maps are kept and written back in
/// sorted order after the standard keys.
#[test]
fn unknown_keys() {
    let tx = unsigned_tx(Txid::from_byte_array([1; 32]), 1);
    let global = [tx_pair(&tx), pair(&[0x0A, 0x01], &[0xAA]), pair(&[0xFC, 0x03, 0x62], &[])];
    let input = [
        pair(&[0x03], &1u32.to_le_bytes()),
        pair(&[0x0F], &[0xBB, 0xBB]),
        pair(&[0x0F, 0x00], &[0xCC]),
        pair(&[0x0F, 0x01], &[]),
    ];
    let output = [pair(&[0x00], &[0x51]), pair(&[0xF0, 0x99], &[0xDD])];
    let data = raw_psbt(&global, &[&input], &[&output]);

    let psbt = decode(&data).unwrap();
    assert_eq!(psbt.unknown(0x0A, &[0x01]).map(|v| v.to_vec()), Some(vec![0xAA]));
    assert!(psbt.unknown(0xFC, &[0x03, 0x62]).is_some());
    let input = psbt.input(0).unwrap();
    assert_eq!(input.unknown[&0x0Fu8].len(), 3);
    assert_eq!(input.unknown(0x0F, &[]).map(|v| v.to_vec()), Some(vec![0xBB, 0xBB]));
    let output = psbt.output(0).unwrap();
    assert_eq!(output.unknown(0xF0, &[0x99]).map(|v| v.to_vec()), Some(vec![0xDD]));
    assert_eq!(psbt.serialize(), data);

    let reordered = raw_psbt(
        &[pair(&[0xFC, 0x03, 0x62], &[]), tx_pair(&tx), pair(&[0x0A, 0x01], &[0xAA])],
        &[&[
            pair(&[0x0F, 0x01], &[]),
            pair(&[0x0F], &[0xBB, 0xBB]),
            pair(&[0x03], &1u32.to_le_bytes()),
            pair(&[0x0F, 0x00], &[0xCC]),
        ]],
        &[&[pair(&[0xF0, 0x99], &[0xDD]), pair(&[0x00], &[0x51])]],
    );
    let psbt2 = decode(&reordered).unwrap();
    assert_eq!(psbt2, psbt);
    assert_eq!(psbt2.serialize(), data);
}

/// Case: global extended public key with its origin.
#[test]
fn xpubs() {
    let tx = unsigned_tx(Txid::from_byte_array([1; 32]), 1);
    let mut xpub = vec![0x01, 0x04, 0x88, 0xB2, 0x1E, 0x03];
    xpub.extend([0x5C; 4]);
    xpub.extend(0x8000_0000u32.to_be_bytes());
    xpub.extend([0x77; 32]);
    xpub.push(0x02);
    xpub.extend([0x99; 32]);
    let origin = KeyOrigin::from_str("d90c6a4f/84h/0h/0h").unwrap();
    let data = raw_psbt(&[tx_pair(&tx), pair(&xpub, &origin.to_psbt_value())], &[&[]], &[&[]]);

    let psbt = decode(&data).unwrap();
    let (key, value) = psbt.xpubs.first().unwrap();
    assert_eq!(key.depth(), 3);
    assert_eq!(value, &origin);
    assert_eq!(psbt.serialize(), data);

    let mut broken = xpub.clone();
    broken[46] = 0x05;
    let data = raw_psbt(&[tx_pair(&tx), pair(&broken, &origin.to_psbt_value())], &[&[]], &[&[]]);
    assert!(matches!(decode(&data), Err(PsbtError::InvalidXpub(_))));

    let data = raw_psbt(&[tx_pair(&tx), pair(&xpub, &[0x01, 0x02])], &[&[]], &[&[]]);
    assert_eq!(decode(&data), Err(PsbtError::InvalidKeyOrigin(2)));
}

/// Case: PSBT with global unsigned tx that has 0 inputs and 0 outputs.
#[test]
fn no_inputs_outputs() {
    let tx = Tx::new(2, vec![], vec![], 0);
    let data = raw_psbt(&[tx_pair(&tx)], &[], &[]);
    let psbt = decode(&data).unwrap();
    assert_eq!(psbt.inputs().count(), 0);
    assert_eq!(psbt.outputs().count(), 0);
    assert_eq!(psbt.fee(), Some(0));
    assert_eq!(psbt.serialize(), data);
}
