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

use std::fmt::{self, Debug, Display, Formatter};
use std::io::{Read, Write};
use std::str::FromStr;

use amplify::hex::{self, FromHex};
use amplify::IoError;
use bitcoin_hashes::{hash160, sha256, sha256d, Hash};

use crate::{ConsensusDecode, ConsensusDecodeError, ConsensusEncode};

/// Double SHA-256 of `data`, in internal byte order.
pub fn hash256(data: impl AsRef<[u8]>) -> [u8; 32] {
    sha256d::Hash::hash(data.as_ref()).to_byte_array()
}

pub fn single_sha256(data: impl AsRef<[u8]>) -> [u8; 32] {
    sha256::Hash::hash(data.as_ref()).to_byte_array()
}

/// RIPEMD-160 of SHA-256 of `data`.
pub fn hash_160(data: impl AsRef<[u8]>) -> [u8; 20] {
    hash160::Hash::hash(data.as_ref()).to_byte_array()
}

#[derive(Clone, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum HashParseError {
    /// invalid hexadecimal hash string: {0}
    #[from]
    Hex(hex::Error),

    /// hash string must contain 64 hex digits, while {0} digits were given.
    InvalidLength(usize),
}

macro_rules! hash_type {
    ($(#[$attr:meta])* $name:ident, reversed: $reversed:literal) => {
        $(#[$attr])*
        #[derive(Wrapper, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, From)]
        #[wrapper(Deref, BorrowSlice)]
        #[cfg_attr(
            feature = "serde",
            derive(Serialize, Deserialize),
            serde(crate = "serde_crate", transparent)
        )]
        pub struct $name(#[from] [u8; 32]);

        impl $name {
            pub const fn from_byte_array(bytes: [u8; 32]) -> Self { Self(bytes) }

            pub const fn to_byte_array(&self) -> [u8; 32] { self.0 }

            pub fn from_slice(slice: impl AsRef<[u8]>) -> Option<Self> {
                <[u8; 32]>::try_from(slice.as_ref()).ok().map(Self)
            }

            pub fn is_zero(&self) -> bool { self.0 == [0u8; 32] }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] { &self.0 }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                if $reversed {
                    self.0.iter().rev().try_for_each(|b| write!(f, "{b:02x}"))
                } else {
                    self.0.iter().try_for_each(|b| write!(f, "{b:02x}"))
                }
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&format_args!("{self}")).finish()
            }
        }

        impl FromStr for $name {
            type Err = HashParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut bytes = Vec::<u8>::from_hex(s)?;
                if bytes.len() != 32 {
                    return Err(HashParseError::InvalidLength(s.len()));
                }
                if $reversed {
                    bytes.reverse();
                }
                Ok(Self::from_slice(bytes).expect("length is checked"))
            }
        }

        impl ConsensusEncode for $name {
            fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
                self.0.consensus_encode(writer)
            }
        }

        impl ConsensusDecode for $name {
            fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
                <[u8; 32]>::consensus_decode(reader).map(Self)
            }
        }
    };
}

hash_type!(
    /// Transaction identifier: double SHA-256 of the non-witness serialization.
    Txid,
    reversed: true
);

hash_type!(
    /// Witness transaction identifier (BIP-141).
    Wtxid,
    reversed: true
);

hash_type!(
    /// Double SHA-256 of the 80-byte block header.
    BlockHash,
    reversed: true
);

hash_type!(
    /// Node of a transaction merkle tree.
    MerkleNode,
    reversed: true
);

hash_type!(
    /// Message digest signed with ECDSA.
    Sighash,
    reversed: false
);

impl From<Txid> for MerkleNode {
    fn from(txid: Txid) -> Self { MerkleNode(txid.0) }
}

impl From<MerkleNode> for Txid {
    fn from(node: MerkleNode) -> Self { Txid(node.0) }
}

impl From<Sighash> for secp256k1::Message {
    fn from(sighash: Sighash) -> Self { secp256k1::Message::from_digest(sighash.0) }
}

impl Txid {
    pub fn coinbase() -> Self { Txid([0u8; 32]) }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn txid_display_reversed() {
        let txid =
            Txid::from_str("6122b61c413a297dd486f8549c8d2544d610def0de7779a1238ad5a5281abbdf")
                .unwrap();
        assert_eq!(txid[0], 0xdf);
        assert_eq!(txid[31], 0x61);
        assert_eq!(
            txid.to_string(),
            "6122b61c413a297dd486f8549c8d2544d610def0de7779a1238ad5a5281abbdf"
        );
    }

    #[test]
    fn sighash_display_natural() {
        let sighash = Sighash::from_byte_array([0xab; 32]);
        assert!(sighash.to_string().starts_with("abab"));
        let mut bytes = [0u8; 32];
        bytes[0] = 1;
        assert!(Sighash::from(bytes).to_string().starts_with("01"));
    }

    #[test]
    fn invalid_length() {
        assert!(matches!(Txid::from_str("abcd"), Err(HashParseError::InvalidLength(4))));
    }

    #[test]
    fn hash160_empty() {
        assert_eq!(hash_160([]), [
            0xb4, 0x72, 0xa2, 0x66, 0xd0, 0xbd, 0x89, 0xc1, 0x37, 0x06, 0xa4, 0x13, 0x2c, 0xcf,
            0xb1, 0x6f, 0x7c, 0x3b, 0x9f, 0xcb
        ]);
    }
}
