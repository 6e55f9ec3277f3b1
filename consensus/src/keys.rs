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
use std::str::FromStr;

use amplify::hex::{self, FromHex, ToHex};
use secp256k1::{ecdsa, PublicKey};

use crate::{hash_160, SighashType};

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum PkParseError {
    /// public key must be 33 or 65 bytes long, while {0} bytes were provided.
    InvalidLength(usize),

    /// public key of {len} bytes has invalid prefix {prefix:#04x}.
    InvalidPrefix { len: usize, prefix: u8 },

    /// invalid hexadecimal public key: {0}
    #[from]
    Hex(hex::Error),
}

/// Public key in serialization used before taproot: either 33-byte
/// compressed or 65-byte uncompressed (hybrid encodings are accepted as
/// well).
///
/// Ordering follows the serialized bytes, which gives the canonical order of
/// PSBT map entries keyed by public keys.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct LegacyPk(Vec<u8>);

impl LegacyPk {
    pub fn from_slice(data: &[u8]) -> Result<Self, PkParseError> {
        let prefix = *data.first().ok_or(PkParseError::InvalidLength(0))?;
        let valid = match data.len() {
            33 => matches!(prefix, 0x02 | 0x03),
            65 => matches!(prefix, 0x04 | 0x06 | 0x07),
            len => return Err(PkParseError::InvalidLength(len)),
        };
        if !valid {
            return Err(PkParseError::InvalidPrefix {
                len: data.len(),
                prefix,
            });
        }
        Ok(LegacyPk(data.to_vec()))
    }

    pub fn compressed(pk: PublicKey) -> Self { LegacyPk(pk.serialize().to_vec()) }

    pub fn uncompressed(pk: PublicKey) -> Self { LegacyPk(pk.serialize_uncompressed().to_vec()) }

    #[inline]
    pub fn is_compressed(&self) -> bool { self.0.len() == 33 }

    /// HASH160 of the serialized key, as committed to by P2PKH and P2WPKH
    /// outputs.
    pub fn pubkey_hash(&self) -> [u8; 20] { hash_160(&self.0) }

    pub fn to_public_key(&self) -> Result<PublicKey, secp256k1::Error> {
        PublicKey::from_slice(&self.0)
    }

    #[inline]
    pub fn len(&self) -> usize { self.0.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { false }

    pub fn to_vec(&self) -> Vec<u8> { self.0.clone() }
}

impl From<PublicKey> for LegacyPk {
    fn from(pk: PublicKey) -> Self { LegacyPk::compressed(pk) }
}

impl AsRef<[u8]> for LegacyPk {
    fn as_ref(&self) -> &[u8] { &self.0 }
}

impl LowerHex for LegacyPk {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(&self.0.to_hex()) }
}

impl Display for LegacyPk {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { LowerHex::fmt(self, f) }
}

impl Debug for LegacyPk {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LegacyPk").field(&self.0.to_hex()).finish()
    }
}

impl FromStr for LegacyPk {
    type Err = PkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { LegacyPk::from_slice(&Vec::<u8>::from_hex(s)?) }
}

/// ECDSA signature as it appears in signature scripts and witnesses: DER
/// encoding followed by the sighash type byte.
///
/// Bytes are kept as provided so that partially signed data produced by
/// other software round-trip exactly.
#[derive(Wrapper, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, From)]
#[wrapper(Deref)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct LegacySig(#[from] Vec<u8>);

impl LegacySig {
    pub fn from_ecdsa(sig: ecdsa::Signature, sighash_type: SighashType) -> Self {
        let mut data = sig.serialize_der().to_vec();
        data.push(sighash_type.to_byte());
        LegacySig(data)
    }

    /// Sighash type byte, if the signature is not empty.
    pub fn sighash_byte(&self) -> Option<u8> { self.0.last().copied() }

    pub fn der(&self) -> &[u8] { self.0.split_last().map(|(_, der)| der).unwrap_or_default() }

    pub fn to_ecdsa(&self) -> Result<ecdsa::Signature, secp256k1::Error> {
        ecdsa::Signature::from_der(self.der())
    }
}

impl AsRef<[u8]> for LegacySig {
    fn as_ref(&self) -> &[u8] { &self.0 }
}

impl Display for LegacySig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(&self.0.to_hex()) }
}

impl Debug for LegacySig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LegacySig").field(&self.0.to_hex()).finish()
    }
}
