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

use std::collections::BTreeMap;
use std::io::{Read, Write};

use amplify::IoError;
use bc::{
    ByteStr, KeyOrigin, LegacyPk, LegacySig, RedeemScript, SigScript, SighashType, Tx, TxOut,
    Witness, WitnessScript, Xpub,
};
use indexmap::IndexMap;

use crate::coders::{read_next, to_value_data, RawBytes};
use crate::keys::KeyValue;
use crate::{
    Decode, DecodeError, Encode, GlobalKey, Input, InputKey, KeyPair, KeyType, Output, OutputKey,
    Psbt, PsbtError,
};

pub type KeyData = ByteStr;

pub type ValueData = ByteStr;

/// Unknown keys of a map, grouped by key type.
pub type UnknownMap = IndexMap<u8, IndexMap<KeyData, ValueData>>;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
#[display(lowercase)]
pub enum MapName {
    Global,
    Input,
    Output,
}

/// Key-value pairs of a single PSBT map, checked against duplicates and
/// standard key lengths but not yet interpreted.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Map<K: KeyType> {
    pub name: MapName,
    pub singular: BTreeMap<K, ValueData>,
    pub plural: BTreeMap<K, BTreeMap<KeyData, ValueData>>,
    pub unknown: UnknownMap,
}

impl<K: KeyType> Map<K> {
    fn new(name: MapName) -> Self {
        Map {
            name,
            singular: empty!(),
            plural: empty!(),
            unknown: empty!(),
        }
    }

    pub fn parse(name: MapName, stream: &mut impl Read) -> Result<Self, DecodeError> {
        let prefix = u8::decode(stream)?;
        Self::parse_with_prefix(name, prefix, stream)
    }

    /// Parses a map unless the stream is already exhausted.
    pub fn parse_opt(name: MapName, stream: &mut impl Read) -> Result<Option<Self>, DecodeError> {
        match read_next(stream)? {
            None => Ok(None),
            Some(prefix) => Self::parse_with_prefix(name, prefix, stream).map(Some),
        }
    }

    fn parse_with_prefix(
        name: MapName,
        mut prefix: u8,
        stream: &mut impl Read,
    ) -> Result<Self, DecodeError> {
        let mut map = Map::<K>::new(name);

        while let KeyValue::<K>::Pair(pair) = KeyValue::<K>::decode_with_prefix(prefix, stream)? {
            map.insert(pair)?;
            prefix = u8::decode(stream)?;
        }

        Ok(map)
    }

    fn insert(&mut self, pair: KeyPair<K, KeyData, ValueData>) -> Result<(), PsbtError> {
        let name = self.name;
        let key_type = pair.key_type;
        if let Some(expected) = key_type.key_len() {
            let got = pair.key_data.len() + 1;
            if !expected.matches(got) {
                return Err(PsbtError::BadKeyLength {
                    map: name,
                    key_type: key_type.to_u8(),
                    expected,
                    got,
                });
            }
        }

        if !key_type.is_standard() {
            let submap = self.unknown.entry(key_type.to_u8()).or_default();
            if submap.contains_key(&pair.key_data) {
                return Err(PsbtError::DuplicateKey(name, key_type.to_u8()));
            }
            submap.insert(pair.key_data, pair.value_data);
        } else if key_type.has_key_data() {
            let submap = self.plural.entry(key_type).or_default();
            if submap.insert(pair.key_data, pair.value_data).is_some() {
                return Err(PsbtError::DuplicateKey(name, key_type.to_u8()));
            }
        } else if self.singular.insert(key_type, pair.value_data).is_some() {
            return Err(PsbtError::DuplicateKey(name, key_type.to_u8()));
        }
        Ok(())
    }
}

/// Typed PSBT map: global, input or output.
pub trait KeyMap: Sized {
    type Keys: KeyType;
    const NAME: MapName;

    /// Pairs of a standard key type, in the order they must be serialized.
    fn retrieve_key_pairs(
        &self,
        key_type: Self::Keys,
    ) -> Vec<KeyPair<Self::Keys, KeyData, ValueData>>;

    fn insert_singular(
        &mut self,
        key_type: Self::Keys,
        value_data: ValueData,
    ) -> Result<(), PsbtError>;

    fn insert_plural(
        &mut self,
        key_type: Self::Keys,
        key_data: KeyData,
        value_data: ValueData,
    ) -> Result<(), PsbtError>;

    #[doc(hidden)]
    fn _unknown_map(&self) -> &UnknownMap;
    #[doc(hidden)]
    fn _unknown_map_mut(&mut self) -> &mut UnknownMap;

    fn unknown(&self, key_type: u8, key_data: &[u8]) -> Option<&ValueData> {
        self._unknown_map().get(&key_type)?.get(key_data)
    }

    fn insert_unknown(&mut self, key_type: u8, key_data: KeyData, value_data: ValueData) {
        self._unknown_map_mut().entry(key_type).or_default().insert(key_data, value_data);
    }

    fn encode_map(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = 0;

        for key_type in Self::Keys::STANDARD {
            for pair in self.retrieve_key_pairs(*key_type) {
                let pair =
                    KeyPair::new(pair.key_type, RawBytes(pair.key_data), RawBytes(pair.value_data));
                counter += pair.encode(writer)?;
            }
        }

        let mut unknown = self._unknown_map().iter().collect::<Vec<_>>();
        unknown.sort_by_key(|(key_type, _)| **key_type);
        for (key_type, submap) in unknown {
            let mut submap = submap.iter().collect::<Vec<_>>();
            submap.sort_by(|(a, _), (b, _)| a.cmp(b));
            for (key_data, value_data) in submap {
                let pair = KeyPair::new(
                    Self::Keys::from_u8(*key_type),
                    RawBytes(key_data),
                    RawBytes(value_data),
                );
                counter += pair.encode(writer)?;
            }
        }

        counter += Psbt::SEPARATOR.len();
        writer.write_all(&Psbt::SEPARATOR)?;

        Ok(counter)
    }

    fn parse_map(&mut self, map: Map<Self::Keys>) -> Result<(), PsbtError> {
        for (k, v) in map.singular {
            self.insert_singular(k, v).map_err(|e| e.in_value(Self::NAME, k.to_u8()))?;
        }
        for (k, submap) in map.plural {
            for (d, v) in submap {
                self.insert_plural(k, d, v).map_err(|e| e.in_value(Self::NAME, k.to_u8()))?;
            }
        }
        for (k, submap) in map.unknown {
            for (d, v) in submap {
                self.insert_unknown(k, d, v);
            }
        }
        Ok(())
    }
}

fn option<K: KeyType>(
    key_type: K,
    value: &Option<impl Encode>,
) -> Vec<KeyPair<K, KeyData, ValueData>> {
    value
        .as_ref()
        .map(|value| KeyPair::new(key_type, none!(), to_value_data(value)))
        .into_iter()
        .collect()
}

/// Pairs with key data, sorted by key.
fn sorted<'a, K: KeyType, D: Encode + Ord + 'a, V: Encode + 'a>(
    key_type: K,
    map: impl IntoIterator<Item = (&'a D, &'a V)>,
) -> Vec<KeyPair<K, KeyData, ValueData>> {
    let mut entries = map.into_iter().collect::<Vec<_>>();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    entries
        .into_iter()
        .map(|(key, value)| KeyPair::new(key_type, to_value_data(key), to_value_data(value)))
        .collect()
}

impl KeyMap for Psbt {
    type Keys = GlobalKey;
    const NAME: MapName = MapName::Global;

    fn _unknown_map(&self) -> &UnknownMap { &self.unknown }
    fn _unknown_map_mut(&mut self) -> &mut UnknownMap { &mut self.unknown }

    fn retrieve_key_pairs(
        &self,
        key_type: Self::Keys,
    ) -> Vec<KeyPair<Self::Keys, KeyData, ValueData>> {
        match key_type {
            GlobalKey::UnsignedTx => vec![KeyPair::new(
                key_type,
                none!(),
                ByteStr::from(self.unsigned_tx().serialize_without_witness()),
            )],
            GlobalKey::Xpub => sorted(key_type, &self.xpubs),
            GlobalKey::Version => option(key_type, &self.version),
            GlobalKey::Unknown(_) => vec![],
        }
    }

    fn insert_singular(
        &mut self,
        key_type: Self::Keys,
        value_data: ValueData,
    ) -> Result<(), PsbtError> {
        match key_type {
            GlobalKey::UnsignedTx => {
                let tx = Tx::deserialize_legacy(value_data)?;
                if !tx.is_unsigned() {
                    return Err(PsbtError::NotUnsigned);
                }
                self.reset_unsigned_tx(tx);
            }
            GlobalKey::Version => {
                let version = u32::deserialize(value_data)?;
                if version != 0 {
                    return Err(PsbtError::UnsupportedVersion(version));
                }
                self.version = Some(version);
            }
            GlobalKey::Xpub | GlobalKey::Unknown(_) => {
                return Err(PsbtError::InvalidValue(Self::NAME, key_type.into_u8()));
            }
        }
        Ok(())
    }

    fn insert_plural(
        &mut self,
        key_type: Self::Keys,
        key_data: KeyData,
        value_data: ValueData,
    ) -> Result<(), PsbtError> {
        match key_type {
            GlobalKey::Xpub => {
                let xpub = Xpub::deserialize(key_data)?;
                let origin = KeyOrigin::deserialize(value_data)?;
                self.xpubs.insert(xpub, origin);
            }
            GlobalKey::UnsignedTx | GlobalKey::Version | GlobalKey::Unknown(_) => {
                return Err(PsbtError::InvalidValue(Self::NAME, key_type.into_u8()));
            }
        }
        Ok(())
    }
}

impl KeyMap for Input {
    type Keys = InputKey;
    const NAME: MapName = MapName::Input;

    fn _unknown_map(&self) -> &UnknownMap { &self.unknown }
    fn _unknown_map_mut(&mut self) -> &mut UnknownMap { &mut self.unknown }

    fn retrieve_key_pairs(
        &self,
        key_type: Self::Keys,
    ) -> Vec<KeyPair<Self::Keys, KeyData, ValueData>> {
        if key_type.is_non_final() && self.is_finalized() {
            return vec![];
        }
        match key_type {
            InputKey::NonWitnessUtxo => option(key_type, &self.non_witness_utxo),
            InputKey::WitnessUtxo => option(key_type, &self.witness_utxo),
            InputKey::PartialSig => sorted(key_type, &self.partial_sigs),
            InputKey::SighashType => option(key_type, &self.sighash_type),
            InputKey::RedeemScript => option(key_type, &self.redeem_script),
            InputKey::WitnessScript => option(key_type, &self.witness_script),
            InputKey::Bip32Derivation => sorted(key_type, &self.bip32_derivation),
            InputKey::FinalScriptSig => option(key_type, &self.final_script_sig),
            InputKey::FinalWitness => option(key_type, &self.final_witness),
            InputKey::Unknown(_) => vec![],
        }
    }

    fn insert_singular(
        &mut self,
        key_type: Self::Keys,
        value_data: ValueData,
    ) -> Result<(), PsbtError> {
        match key_type {
            InputKey::NonWitnessUtxo => self.non_witness_utxo = Some(Tx::deserialize(value_data)?),
            InputKey::WitnessUtxo => self.witness_utxo = Some(TxOut::deserialize(value_data)?),
            InputKey::SighashType => {
                self.sighash_type = Some(SighashType::deserialize(value_data)?)
            }
            InputKey::RedeemScript => {
                self.redeem_script = Some(RedeemScript::deserialize(value_data)?)
            }
            InputKey::WitnessScript => {
                self.witness_script = Some(WitnessScript::deserialize(value_data)?)
            }
            InputKey::FinalScriptSig => {
                self.final_script_sig = Some(SigScript::deserialize(value_data)?)
            }
            InputKey::FinalWitness => self.final_witness = Some(Witness::deserialize(value_data)?),

            InputKey::PartialSig | InputKey::Bip32Derivation | InputKey::Unknown(_) => {
                return Err(PsbtError::InvalidValue(Self::NAME, key_type.into_u8()));
            }
        }
        Ok(())
    }

    fn insert_plural(
        &mut self,
        key_type: Self::Keys,
        key_data: KeyData,
        value_data: ValueData,
    ) -> Result<(), PsbtError> {
        match key_type {
            InputKey::PartialSig => {
                let pk = LegacyPk::deserialize(key_data)?;
                let sig = LegacySig::deserialize(value_data)?;
                self.partial_sigs.insert(pk, sig);
            }
            InputKey::Bip32Derivation => {
                let pk = LegacyPk::deserialize(key_data)?;
                let origin = KeyOrigin::deserialize(value_data)?;
                self.bip32_derivation.insert(pk, origin);
            }
            _ => return Err(PsbtError::InvalidValue(Self::NAME, key_type.into_u8())),
        }
        Ok(())
    }
}

impl KeyMap for Output {
    type Keys = OutputKey;
    const NAME: MapName = MapName::Output;

    fn _unknown_map(&self) -> &UnknownMap { &self.unknown }
    fn _unknown_map_mut(&mut self) -> &mut UnknownMap { &mut self.unknown }

    fn retrieve_key_pairs(
        &self,
        key_type: Self::Keys,
    ) -> Vec<KeyPair<Self::Keys, KeyData, ValueData>> {
        match key_type {
            OutputKey::RedeemScript => option(key_type, &self.redeem_script),
            OutputKey::WitnessScript => option(key_type, &self.witness_script),
            OutputKey::Bip32Derivation => sorted(key_type, &self.bip32_derivation),
            OutputKey::Unknown(_) => vec![],
        }
    }

    fn insert_singular(
        &mut self,
        key_type: Self::Keys,
        value_data: ValueData,
    ) -> Result<(), PsbtError> {
        match key_type {
            OutputKey::RedeemScript => {
                self.redeem_script = Some(RedeemScript::deserialize(value_data)?)
            }
            OutputKey::WitnessScript => {
                self.witness_script = Some(WitnessScript::deserialize(value_data)?)
            }
            OutputKey::Bip32Derivation | OutputKey::Unknown(_) => {
                return Err(PsbtError::InvalidValue(Self::NAME, key_type.into_u8()));
            }
        }
        Ok(())
    }

    fn insert_plural(
        &mut self,
        key_type: Self::Keys,
        key_data: KeyData,
        value_data: ValueData,
    ) -> Result<(), PsbtError> {
        match key_type {
            OutputKey::Bip32Derivation => {
                let pk = LegacyPk::deserialize(key_data)?;
                let origin = KeyOrigin::deserialize(value_data)?;
                self.bip32_derivation.insert(pk, origin);
            }
            OutputKey::RedeemScript | OutputKey::WitnessScript | OutputKey::Unknown(_) => {
                return Err(PsbtError::InvalidValue(Self::NAME, key_type.into_u8()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pair(key: &[u8], value: &[u8]) -> Vec<u8> {
        let mut data = vec![key.len() as u8];
        data.extend(key);
        data.push(value.len() as u8);
        data.extend(value);
        data
    }

    #[test]
    fn duplicate_keys() {
        let mut data = pair(&[0x03], &[1, 0, 0, 0]);
        data.extend(pair(&[0x03], &[1, 0, 0, 0]));
        data.push(0);
        assert_eq!(
            Map::<InputKey>::parse(MapName::Input, &mut data.as_slice()),
            Err(PsbtError::DuplicateKey(MapName::Input, 0x03).into())
        );

        let mut data = pair(&[0xF0, 0x01], &[1]);
        data.extend(pair(&[0xF0, 0x02], &[2]));
        data.extend(pair(&[0xF0, 0x01], &[3]));
        data.push(0);
        assert_eq!(
            Map::<OutputKey>::parse(MapName::Output, &mut data.as_slice()),
            Err(PsbtError::DuplicateKey(MapName::Output, 0xF0).into())
        );
    }

    #[test]
    fn bad_key_length() {
        let mut data = pair(&[0x01, 0x00], &[]);
        data.push(0);
        assert_eq!(
            Map::<InputKey>::parse(MapName::Input, &mut data.as_slice()),
            Err(PsbtError::BadKeyLength {
                map: MapName::Input,
                key_type: 0x01,
                expected: crate::KeyLen::Exact(1),
                got: 2
            }
            .into())
        );

        let mut data = pair(&[0x02; 33], &[0x30]);
        data.push(0);
        assert!(matches!(
            Map::<InputKey>::parse(MapName::Input, &mut data.as_slice()),
            Err(DecodeError::Psbt(PsbtError::BadKeyLength { got: 33, .. }))
        ));
    }

    #[test]
    fn unknown_keys_sorted() {
        let mut output = Output::new();
        output.insert_unknown(0xF1, ByteStr::from(vec![2]), ByteStr::from(vec![0xBB]));
        output.insert_unknown(0xF0, ByteStr::from(vec![9]), ByteStr::from(vec![0xCC]));
        output.insert_unknown(0xF1, ByteStr::from(vec![1]), ByteStr::from(vec![0xAA]));
        let mut data = vec![];
        output.encode_map(&mut data).unwrap();
        assert_eq!(data, [
            0x02, 0xF0, 0x09, 0x01, 0xCC, 0x02, 0xF1, 0x01, 0x01, 0xAA, 0x02, 0xF1, 0x02, 0x01,
            0xBB, 0x00
        ]);
        assert_eq!(output.unknown(0xF1, &[1]).map(|v| v.as_slice()), Some(&[0xAA][..]));
    }

    #[test]
    fn mismatched_key_kind() {
        let mut psbt = Psbt::empty();
        assert_eq!(
            psbt.insert_singular(GlobalKey::Xpub, none!()),
            Err(PsbtError::InvalidValue(MapName::Global, 0x01))
        );
        assert_eq!(
            psbt.insert_plural(GlobalKey::Version, none!(), none!()),
            Err(PsbtError::InvalidValue(MapName::Global, 0xFB))
        );

        let mut input = Input::new();
        assert_eq!(
            input.insert_singular(InputKey::PartialSig, none!()),
            Err(PsbtError::InvalidValue(MapName::Input, 0x02))
        );
        assert_eq!(
            input.insert_plural(InputKey::Unknown(0xF0), none!(), none!()),
            Err(PsbtError::InvalidValue(MapName::Input, 0xF0))
        );
        assert_eq!(input, Input::new());

        let mut output = Output::new();
        assert_eq!(
            output.insert_singular(OutputKey::Bip32Derivation, none!()),
            Err(PsbtError::InvalidValue(MapName::Output, 0x02))
        );
        assert_eq!(
            output.insert_plural(OutputKey::WitnessScript, none!(), none!()),
            Err(PsbtError::InvalidValue(MapName::Output, 0x01))
        );
    }

    #[test]
    fn exhausted_stream() {
        let data: &[u8] = &[];
        assert_eq!(Map::<OutputKey>::parse_opt(MapName::Output, &mut &data[..]), Ok(None));
        assert_eq!(
            Map::<OutputKey>::parse(MapName::Output, &mut &data[..]),
            Err(PsbtError::TruncatedInput.into())
        );
    }
}
