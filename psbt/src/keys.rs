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

use std::fmt::Debug;
use std::hash::Hash;
use std::io::Sink;

use bc::VarInt;

use crate::{Decode, Encode, KeyData, ValueData};

/// Length of a full PSBT key (key type byte included) which a standard key
/// type requires.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
pub enum KeyLen {
    #[display("{0}")]
    Exact(usize),

    /// Key type byte followed by a compressed or uncompressed public key.
    #[display("34 or 66")]
    LegacyPk,
}

impl KeyLen {
    pub fn matches(self, len: usize) -> bool {
        match self {
            KeyLen::Exact(expected) => expected == len,
            KeyLen::LegacyPk => len == 34 || len == 66,
        }
    }
}

pub trait KeyType: Copy + Ord + Eq + Hash + Debug + Encode + Decode + 'static {
    /// Standard keys in the order they are serialized.
    const STANDARD: &'static [Self];
    fn from_u8(val: u8) -> Self;
    fn into_u8(self) -> u8;
    fn to_u8(&self) -> u8 { self.into_u8() }
    fn has_key_data(self) -> bool;
    /// Required length of the key; `None` for unknown keys.
    fn key_len(self) -> Option<KeyLen>;
    #[inline]
    fn is_standard(self) -> bool { Self::STANDARD.contains(&self) }
}

const PSBT_GLOBAL_UNSIGNED_TX: u8 = 0x00;
const PSBT_GLOBAL_XPUB: u8 = 0x01;
const PSBT_GLOBAL_VERSION: u8 = 0xFB;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum GlobalKey {
    /// `PSBT_GLOBAL_UNSIGNED_TX`
    UnsignedTx,

    /// `PSBT_GLOBAL_XPUB`
    Xpub,

    /// `PSBT_GLOBAL_VERSION`
    Version,

    /// All unknown keys, including proprietary ones
    Unknown(u8),
}

impl KeyType for GlobalKey {
    const STANDARD: &'static [Self] = &[Self::UnsignedTx, Self::Xpub, Self::Version];

    fn from_u8(val: u8) -> Self {
        match val {
            PSBT_GLOBAL_UNSIGNED_TX => Self::UnsignedTx,
            PSBT_GLOBAL_XPUB => Self::Xpub,
            PSBT_GLOBAL_VERSION => Self::Version,
            unknown => Self::Unknown(unknown),
        }
    }

    fn into_u8(self) -> u8 {
        match self {
            GlobalKey::UnsignedTx => PSBT_GLOBAL_UNSIGNED_TX,
            GlobalKey::Xpub => PSBT_GLOBAL_XPUB,
            GlobalKey::Version => PSBT_GLOBAL_VERSION,
            GlobalKey::Unknown(key_type) => key_type,
        }
    }

    fn has_key_data(self) -> bool {
        match self {
            GlobalKey::UnsignedTx | GlobalKey::Version => false,
            GlobalKey::Xpub | GlobalKey::Unknown(_) => true,
        }
    }

    fn key_len(self) -> Option<KeyLen> {
        match self {
            GlobalKey::UnsignedTx | GlobalKey::Version => Some(KeyLen::Exact(1)),
            GlobalKey::Xpub => Some(KeyLen::Exact(1 + bc::Xpub::LEN)),
            GlobalKey::Unknown(_) => None,
        }
    }
}

const PSBT_IN_NON_WITNESS_UTXO: u8 = 0x00;
const PSBT_IN_WITNESS_UTXO: u8 = 0x01;
const PSBT_IN_PARTIAL_SIG: u8 = 0x02;
const PSBT_IN_SIGHASH_TYPE: u8 = 0x03;
const PSBT_IN_REDEEM_SCRIPT: u8 = 0x04;
const PSBT_IN_WITNESS_SCRIPT: u8 = 0x05;
const PSBT_IN_BIP32_DERIVATION: u8 = 0x06;
const PSBT_IN_FINAL_SCRIPTSIG: u8 = 0x07;
const PSBT_IN_FINAL_SCRIPTWITNESS: u8 = 0x08;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum InputKey {
    /// `PSBT_IN_NON_WITNESS_UTXO`
    NonWitnessUtxo,

    /// `PSBT_IN_WITNESS_UTXO`
    WitnessUtxo,

    /// `PSBT_IN_PARTIAL_SIG`
    PartialSig,

    /// `PSBT_IN_SIGHASH_TYPE`
    SighashType,

    /// `PSBT_IN_REDEEM_SCRIPT`
    RedeemScript,

    /// `PSBT_IN_WITNESS_SCRIPT`
    WitnessScript,

    /// `PSBT_IN_BIP32_DERIVATION`
    Bip32Derivation,

    /// `PSBT_IN_FINAL_SCRIPTSIG`
    FinalScriptSig,

    /// `PSBT_IN_FINAL_SCRIPTWITNESS`
    FinalWitness,

    /// All unknown keys, including proprietary ones
    Unknown(u8),
}

impl InputKey {
    /// Keys which are removed from the input once it gets finalized.
    pub fn is_non_final(self) -> bool {
        matches!(
            self,
            InputKey::PartialSig
                | InputKey::SighashType
                | InputKey::RedeemScript
                | InputKey::WitnessScript
                | InputKey::Bip32Derivation
        )
    }
}

impl KeyType for InputKey {
    const STANDARD: &'static [Self] = &[
        Self::NonWitnessUtxo,
        Self::WitnessUtxo,
        Self::PartialSig,
        Self::SighashType,
        Self::RedeemScript,
        Self::WitnessScript,
        Self::Bip32Derivation,
        Self::FinalScriptSig,
        Self::FinalWitness,
    ];

    fn from_u8(val: u8) -> Self {
        match val {
            PSBT_IN_NON_WITNESS_UTXO => Self::NonWitnessUtxo,
            PSBT_IN_WITNESS_UTXO => Self::WitnessUtxo,
            PSBT_IN_PARTIAL_SIG => Self::PartialSig,
            PSBT_IN_SIGHASH_TYPE => Self::SighashType,
            PSBT_IN_REDEEM_SCRIPT => Self::RedeemScript,
            PSBT_IN_WITNESS_SCRIPT => Self::WitnessScript,
            PSBT_IN_BIP32_DERIVATION => Self::Bip32Derivation,
            PSBT_IN_FINAL_SCRIPTSIG => Self::FinalScriptSig,
            PSBT_IN_FINAL_SCRIPTWITNESS => Self::FinalWitness,
            unknown => Self::Unknown(unknown),
        }
    }

    fn into_u8(self) -> u8 {
        match self {
            InputKey::NonWitnessUtxo => PSBT_IN_NON_WITNESS_UTXO,
            InputKey::WitnessUtxo => PSBT_IN_WITNESS_UTXO,
            InputKey::PartialSig => PSBT_IN_PARTIAL_SIG,
            InputKey::SighashType => PSBT_IN_SIGHASH_TYPE,
            InputKey::RedeemScript => PSBT_IN_REDEEM_SCRIPT,
            InputKey::WitnessScript => PSBT_IN_WITNESS_SCRIPT,
            InputKey::Bip32Derivation => PSBT_IN_BIP32_DERIVATION,
            InputKey::FinalScriptSig => PSBT_IN_FINAL_SCRIPTSIG,
            InputKey::FinalWitness => PSBT_IN_FINAL_SCRIPTWITNESS,
            InputKey::Unknown(key_type) => key_type,
        }
    }

    fn has_key_data(self) -> bool {
        match self {
            InputKey::PartialSig | InputKey::Bip32Derivation => true,

            InputKey::NonWitnessUtxo
            | InputKey::WitnessUtxo
            | InputKey::SighashType
            | InputKey::RedeemScript
            | InputKey::WitnessScript
            | InputKey::FinalScriptSig
            | InputKey::FinalWitness => false,

            InputKey::Unknown(_) => true,
        }
    }

    fn key_len(self) -> Option<KeyLen> {
        match self {
            InputKey::PartialSig | InputKey::Bip32Derivation => Some(KeyLen::LegacyPk),
            InputKey::Unknown(_) => None,
            _ => Some(KeyLen::Exact(1)),
        }
    }
}

const PSBT_OUT_REDEEM_SCRIPT: u8 = 0x00;
const PSBT_OUT_WITNESS_SCRIPT: u8 = 0x01;
const PSBT_OUT_BIP32_DERIVATION: u8 = 0x02;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum OutputKey {
    /// `PSBT_OUT_REDEEM_SCRIPT`
    RedeemScript,

    /// `PSBT_OUT_WITNESS_SCRIPT`
    WitnessScript,

    /// `PSBT_OUT_BIP32_DERIVATION`
    Bip32Derivation,

    /// All unknown keys, including proprietary ones
    Unknown(u8),
}

impl KeyType for OutputKey {
    const STANDARD: &'static [Self] =
        &[Self::RedeemScript, Self::WitnessScript, Self::Bip32Derivation];

    fn from_u8(val: u8) -> Self {
        match val {
            PSBT_OUT_REDEEM_SCRIPT => Self::RedeemScript,
            PSBT_OUT_WITNESS_SCRIPT => Self::WitnessScript,
            PSBT_OUT_BIP32_DERIVATION => Self::Bip32Derivation,
            unknown => Self::Unknown(unknown),
        }
    }

    fn into_u8(self) -> u8 {
        match self {
            OutputKey::RedeemScript => PSBT_OUT_REDEEM_SCRIPT,
            OutputKey::WitnessScript => PSBT_OUT_WITNESS_SCRIPT,
            OutputKey::Bip32Derivation => PSBT_OUT_BIP32_DERIVATION,
            OutputKey::Unknown(key_type) => key_type,
        }
    }

    fn has_key_data(self) -> bool {
        match self {
            OutputKey::RedeemScript | OutputKey::WitnessScript => false,
            OutputKey::Bip32Derivation => true,
            OutputKey::Unknown(_) => true,
        }
    }

    fn key_len(self) -> Option<KeyLen> {
        match self {
            OutputKey::RedeemScript | OutputKey::WitnessScript => Some(KeyLen::Exact(1)),
            OutputKey::Bip32Derivation => Some(KeyLen::LegacyPk),
            OutputKey::Unknown(_) => None,
        }
    }
}

pub enum KeyValue<T: KeyType> {
    Pair(KeyPair<T, KeyData, ValueData>),
    Separator,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct KeyPair<T: KeyType, K, V> {
    pub key_type: T,
    pub key_data: K,
    pub value_data: V,
}

impl<T: KeyType, K, V> KeyPair<T, K, V> {
    pub fn new(key_type: T, key_data: K, value_data: V) -> Self {
        Self {
            key_type,
            key_data,
            value_data,
        }
    }

    pub fn key_len(&self) -> VarInt
    where K: Encode {
        let mut sink = Sink::default();
        let count = self.key_data.encode(&mut sink).expect("sink write doesn't fail");
        let len = count + 1 /* key type byte */;
        VarInt::with(len)
    }

    pub fn value_len(&self) -> VarInt
    where V: Encode {
        let mut sink = Sink::default();
        let len = self.value_data.encode(&mut sink).expect("sink write doesn't fail");
        VarInt::with(len)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn key_type_bytes() {
        for key in InputKey::STANDARD {
            assert_eq!(InputKey::from_u8(key.to_u8()), *key);
        }
        for key in OutputKey::STANDARD {
            assert_eq!(OutputKey::from_u8(key.to_u8()), *key);
        }
        for key in GlobalKey::STANDARD {
            assert_eq!(GlobalKey::from_u8(key.to_u8()), *key);
        }
        assert_eq!(InputKey::from_u8(0xFC), InputKey::Unknown(0xFC));
        assert_eq!(GlobalKey::from_u8(0x02), GlobalKey::Unknown(0x02));
        assert!(!OutputKey::Unknown(0x03).is_standard());
    }

    #[test]
    fn key_lengths() {
        assert!(InputKey::PartialSig.key_len().unwrap().matches(34));
        assert!(InputKey::PartialSig.key_len().unwrap().matches(66));
        assert!(!InputKey::Bip32Derivation.key_len().unwrap().matches(33));
        assert!(!InputKey::WitnessUtxo.key_len().unwrap().matches(2));
        assert_eq!(GlobalKey::Xpub.key_len(), Some(KeyLen::Exact(79)));
        assert_eq!(InputKey::Unknown(0x20).key_len(), None);
        assert_eq!(KeyLen::LegacyPk.to_string(), "34 or 66");
    }
}
