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
use std::num::ParseIntError;
use std::str::FromStr;

use amplify::hex::{self, FromHex, ToHex};

use crate::{hash_160, LegacyPk};

pub const HARDENED_INDEX_BOUNDARY: u32 = 0x8000_0000;

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum IndexParseError {
    /// index value {0} exceeds 2^31 and can't be used in derivation path.
    OutOfRange(u32),

    /// invalid index string representation - {0}
    #[from]
    Parse(ParseIntError),
}

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum DerivationParseError {
    /// unable to parse derivation path '{0}' - {1}
    InvalidIndex(String, IndexParseError),

    /// invalid master key fingerprint - {0}
    #[from]
    Fingerprint(hex::Error),

    /// master key fingerprint must be 4 bytes long.
    FingerprintLength,
}

/// BIP-32 derivation step; both variants hold index value below 2^31.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub enum DerivationIndex {
    #[display("{0}")]
    Normal(u32),
    #[display("{0}h")]
    Hardened(u32),
}

impl DerivationIndex {
    pub fn normal(index: u32) -> Result<Self, IndexParseError> {
        if index >= HARDENED_INDEX_BOUNDARY {
            return Err(IndexParseError::OutOfRange(index));
        }
        Ok(DerivationIndex::Normal(index))
    }

    pub fn hardened(index: u32) -> Result<Self, IndexParseError> {
        if index >= HARDENED_INDEX_BOUNDARY {
            return Err(IndexParseError::OutOfRange(index));
        }
        Ok(DerivationIndex::Hardened(index))
    }

    /// Constructs index from a BIP-32 child number, where values starting
    /// from 2^31 denote hardened derivation.
    pub const fn from_child_number(child_no: u32) -> Self {
        if child_no >= HARDENED_INDEX_BOUNDARY {
            DerivationIndex::Hardened(child_no - HARDENED_INDEX_BOUNDARY)
        } else {
            DerivationIndex::Normal(child_no)
        }
    }

    pub const fn child_number(&self) -> u32 {
        match *self {
            DerivationIndex::Normal(index) => index,
            DerivationIndex::Hardened(index) => index | HARDENED_INDEX_BOUNDARY,
        }
    }

    #[inline]
    pub const fn is_hardened(&self) -> bool { matches!(self, DerivationIndex::Hardened(_)) }
}

impl FromStr for DerivationIndex {
    type Err = IndexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_suffix(['h', 'H', '\'']) {
            Some(index) => DerivationIndex::hardened(u32::from_str(index)?),
            None => DerivationIndex::normal(u32::from_str(s)?),
        }
    }
}

#[derive(Wrapper, WrapperMut, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug, From)]
#[wrapper(Deref)]
#[wrapper_mut(DerefMut)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct DerivationPath(#[from] Vec<DerivationIndex>);

impl DerivationPath {
    pub fn new() -> Self { none!() }
}

impl From<&[DerivationIndex]> for DerivationPath {
    fn from(path: &[DerivationIndex]) -> Self { Self(path.to_vec()) }
}

impl FromIterator<DerivationIndex> for DerivationPath {
    fn from_iter<T: IntoIterator<Item = DerivationIndex>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Display for DerivationPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            f.write_str("/")?;
            Display::fmt(segment, f)?;
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = DerivationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("m").unwrap_or(s);
        let s = s.strip_prefix('/').unwrap_or(s);
        if s.is_empty() {
            return Ok(DerivationPath::new());
        }
        s.split('/')
            .map(|index| {
                DerivationIndex::from_str(index)
                    .map_err(|err| DerivationParseError::InvalidIndex(index.to_owned(), err))
            })
            .collect()
    }
}

/// First four bytes of HASH160 of a public key.
#[derive(Wrapper, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, From)]
#[wrapper(Deref, BorrowSlice)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct Fingerprint(#[from] [u8; 4]);

impl Fingerprint {
    pub fn of(pk: &LegacyPk) -> Self {
        let mut fp = [0u8; 4];
        fp.copy_from_slice(&pk.pubkey_hash()[..4]);
        Fingerprint(fp)
    }

    pub const fn from_byte_array(bytes: [u8; 4]) -> Self { Fingerprint(bytes) }

    pub const fn to_byte_array(&self) -> [u8; 4] { self.0 }
}

impl LowerHex for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(&self.0.to_hex()) }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { LowerHex::fmt(self, f) }
}

impl Debug for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fingerprint").field(&self.0.to_hex()).finish()
    }
}

impl FromStr for Fingerprint {
    type Err = DerivationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = Vec::<u8>::from_hex(s)?;
        <[u8; 4]>::try_from(bytes.as_slice())
            .map(Fingerprint)
            .map_err(|_| DerivationParseError::FingerprintLength)
    }
}

/// Master key fingerprint together with the derivation path from the master
/// key, as used in PSBT key maps.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct KeyOrigin {
    pub master_fp: Fingerprint,
    pub derivation: DerivationPath,
}

impl KeyOrigin {
    pub fn new(master_fp: Fingerprint, derivation: DerivationPath) -> Self {
        KeyOrigin {
            master_fp,
            derivation,
        }
    }

    /// Parses PSBT encoding: four bytes of fingerprint followed by
    /// little-endian 32-bit child numbers.
    pub fn from_psbt_value(data: &[u8]) -> Option<Self> {
        if data.len() < 4 || data.len() % 4 != 0 {
            return None;
        }
        let (fp, path) = data.split_at(4);
        let master_fp = Fingerprint::from_byte_array([fp[0], fp[1], fp[2], fp[3]]);
        let derivation = path
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .map(DerivationIndex::from_child_number)
            .collect();
        Some(KeyOrigin::new(master_fp, derivation))
    }

    pub fn to_psbt_value(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + self.derivation.len() * 4);
        data.extend_from_slice(self.master_fp.as_slice());
        for index in self.derivation.iter() {
            data.extend(index.child_number().to_le_bytes());
        }
        data
    }
}

impl Display for KeyOrigin {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.master_fp, f)?;
        Display::fmt(&self.derivation, f)
    }
}

impl FromStr for KeyOrigin {
    type Err = DerivationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (master_fp, path) = match s.split_once('/') {
            None => (Fingerprint::from_str(s)?, ""),
            Some(("m", p)) => (Fingerprint::default(), p),
            Some((fp, p)) => (Fingerprint::from_str(fp)?, p),
        };
        Ok(KeyOrigin::new(master_fp, DerivationPath::from_str(path)?))
    }
}

/// Serialized BIP-32 extended public key without base58 encoding.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Xpub([u8; Xpub::LEN]);

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum XpubDecodeError {
    /// extended public key must be 78 bytes long, while {0} bytes were provided.
    InvalidLength(usize),

    /// extended public key contains invalid public key prefix {0:#04x}.
    InvalidPublicKey(u8),
}

impl Xpub {
    pub const LEN: usize = 78;

    pub fn from_slice(data: &[u8]) -> Result<Self, XpubDecodeError> {
        let bytes = <[u8; Xpub::LEN]>::try_from(data)
            .map_err(|_| XpubDecodeError::InvalidLength(data.len()))?;
        if !matches!(bytes[45], 0x02 | 0x03) {
            return Err(XpubDecodeError::InvalidPublicKey(bytes[45]));
        }
        Ok(Xpub(bytes))
    }

    pub fn version(&self) -> [u8; 4] { [self.0[0], self.0[1], self.0[2], self.0[3]] }

    pub fn depth(&self) -> u8 { self.0[4] }

    pub fn parent_fp(&self) -> Fingerprint {
        Fingerprint::from_byte_array([self.0[5], self.0[6], self.0[7], self.0[8]])
    }

    pub fn child_number(&self) -> DerivationIndex {
        DerivationIndex::from_child_number(u32::from_be_bytes([
            self.0[9],
            self.0[10],
            self.0[11],
            self.0[12],
        ]))
    }

    pub fn chain_code(&self) -> [u8; 32] {
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&self.0[13..45]);
        chain_code
    }

    pub fn public_key(&self) -> LegacyPk {
        LegacyPk::from_slice(&self.0[45..]).expect("prefix is checked on construction")
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let hash = hash_160(&self.0[45..]);
        Fingerprint::from_byte_array([hash[0], hash[1], hash[2], hash[3]])
    }

    pub fn to_bytes(&self) -> [u8; Xpub::LEN] { self.0 }
}

impl Ord for Xpub {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering { self.0.cmp(&other.0) }
}

impl PartialOrd for Xpub {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}

impl AsRef<[u8]> for Xpub {
    fn as_ref(&self) -> &[u8] { &self.0 }
}

impl Display for Xpub {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(&self.0.to_hex()) }
}

impl Debug for Xpub {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Xpub")
            .field("depth", &self.depth())
            .field("parent_fp", &self.parent_fp())
            .field("child_number", &self.child_number())
            .field("public_key", &self.public_key())
            .finish()
    }
}

#[cfg(feature = "serde")]
mod _serde {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::*;

    impl Serialize for Xpub {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&self.0.to_hex())
        }
    }

    impl<'de> Deserialize<'de> for Xpub {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let s = String::deserialize(deserializer)?;
            let data = Vec::<u8>::from_hex(&s).map_err(D::Error::custom)?;
            Xpub::from_slice(&data).map_err(D::Error::custom)
        }
    }
}
