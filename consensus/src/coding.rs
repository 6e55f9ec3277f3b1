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
use std::io::{self, Cursor, Read, Write};

use amplify::hex::ToHex;
use amplify::IoError;

/// Maximum number of items (or bytes) a single length-prefixed collection may
/// declare. Matches `MAX_SIZE` from Bitcoin Core serialization code.
pub const MAX_VECTOR_LEN: u64 = 0x0200_0000;

#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum ConsensusDecodeError {
    /// unexpected end of data.
    TruncatedInput,

    /// I/O error during decoding: {0}
    Io(IoError),

    #[display(inner)]
    #[from]
    Data(ConsensusDataError),
}

impl From<io::Error> for ConsensusDecodeError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => ConsensusDecodeError::TruncatedInput,
            _ => ConsensusDecodeError::Io(err.into()),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ConsensusDataError {
    /// consensus data are followed by some excessive bytes.
    DataNotConsumed,

    /// compact-size integer {0:#x} is not minimally encoded.
    NonMinimalVarInt(u64),

    /// length prefix {0} exceeds the maximal allowed collection size.
    OversizedVector(u64),

    /// malformed transaction: unsupported segwit flag {0:#04x}.
    InvalidSegwitFlag(u8),

    /// malformed transaction: segwit marker is present, but all witness stacks are empty.
    SuperfluousWitness,
}

pub trait ConsensusEncode {
    fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError>;

    fn consensus_serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.consensus_encode(&mut buf).expect("in-memory writing can't fail");
        buf
    }

    /// Number of bytes produced by [`ConsensusEncode::consensus_encode`].
    fn encoded_len(&self) -> usize {
        self.consensus_encode(&mut io::sink()).expect("sink writing can't fail")
    }
}

pub trait ConsensusDecode
where Self: Sized
{
    fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError>;

    fn consensus_deserialize(bytes: impl AsRef<[u8]>) -> Result<Self, ConsensusDecodeError> {
        let bytes = bytes.as_ref();
        let mut cursor = Cursor::new(bytes);
        let me = Self::consensus_decode(&mut cursor)?;
        if cursor.position() != bytes.len() as u64 {
            return Err(ConsensusDataError::DataNotConsumed.into());
        }
        Ok(me)
    }
}

/// Bitcoin compact-size unsigned integer.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug, Display, From)]
#[display(inner)]
pub struct VarInt(#[from] pub u64);

impl VarInt {
    pub const fn new(u: u64) -> Self { VarInt(u) }

    pub fn with(u: usize) -> Self { VarInt(u as u64) }

    pub const fn to_u64(&self) -> u64 { self.0 }

    pub const fn to_usize(&self) -> usize { self.0 as usize }

    /// Length of the compact-size encoding of this value, in bytes.
    pub const fn len(&self) -> usize {
        match self.0 {
            0..=0xFC => 1,
            0xFD..=0xFFFF => 3,
            0x10000..=0xFFFF_FFFF => 5,
            _ => 9,
        }
    }

    /// Checks the value against [`MAX_VECTOR_LEN`], returning it as `usize`.
    pub fn to_collection_len(&self) -> Result<usize, ConsensusDataError> {
        if self.0 > MAX_VECTOR_LEN {
            return Err(ConsensusDataError::OversizedVector(self.0));
        }
        Ok(self.0 as usize)
    }

    /// Decodes the rest of a compact-size integer whose first byte was
    /// already consumed from the reader.
    pub fn decode_with_prefix(
        prefix: u8,
        reader: &mut impl Read,
    ) -> Result<Self, ConsensusDecodeError> {
        let (value, min) = match prefix {
            0xFF => (u64::consensus_decode(reader)?, 0x1_0000_0000),
            0xFE => (u32::consensus_decode(reader)? as u64, 0x10000),
            0xFD => (u16::consensus_decode(reader)? as u64, 0xFD),
            small => return Ok(VarInt(small as u64)),
        };
        if value < min {
            return Err(ConsensusDataError::NonMinimalVarInt(value).into());
        }
        Ok(VarInt(value))
    }
}

impl PartialEq<u64> for VarInt {
    fn eq(&self, other: &u64) -> bool { self.0.eq(other) }
}

impl ConsensusEncode for VarInt {
    fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        match self.0 {
            0..=0xFC => {
                (self.0 as u8).consensus_encode(writer)?;
            }
            0xFD..=0xFFFF => {
                0xFDu8.consensus_encode(writer)?;
                (self.0 as u16).consensus_encode(writer)?;
            }
            0x10000..=0xFFFF_FFFF => {
                0xFEu8.consensus_encode(writer)?;
                (self.0 as u32).consensus_encode(writer)?;
            }
            _ => {
                0xFFu8.consensus_encode(writer)?;
                self.0.consensus_encode(writer)?;
            }
        }
        Ok(self.len())
    }
}

impl ConsensusDecode for VarInt {
    fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
        let prefix = u8::consensus_decode(reader)?;
        VarInt::decode_with_prefix(prefix, reader)
    }
}

/// Variable-length byte string, serialized with a compact-size length prefix.
#[derive(Wrapper, WrapperMut, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, From)]
#[wrapper(Deref, BorrowSlice)]
#[wrapper_mut(DerefMut, BorrowSliceMut)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct ByteStr(#[from] Vec<u8>);

impl ByteStr {
    pub fn len_var_int(&self) -> VarInt { VarInt::with(self.0.len()) }

    pub fn to_vec(&self) -> Vec<u8> { self.0.clone() }
}

impl From<&[u8]> for ByteStr {
    fn from(slice: &[u8]) -> Self { ByteStr(slice.to_vec()) }
}

impl AsRef<[u8]> for ByteStr {
    fn as_ref(&self) -> &[u8] { &self.0 }
}

impl LowerHex for ByteStr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(&self.0.to_hex()) }
}

impl Display for ByteStr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { LowerHex::fmt(self, f) }
}

impl Debug for ByteStr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ByteStr").field(&self.0.to_hex()).finish()
    }
}

impl ConsensusEncode for ByteStr {
    fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let len = self.len_var_int().consensus_encode(writer)?;
        writer.write_all(&self.0)?;
        Ok(len + self.0.len())
    }
}

impl ConsensusDecode for ByteStr {
    fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
        let len = VarInt::consensus_decode(reader)?.to_collection_len()?;
        read_exact_vec(reader, len).map(ByteStr)
    }
}

/// Reads exactly `len` bytes without pre-allocating the full length, so that
/// a forged length prefix can't force a large allocation.
pub fn read_exact_vec(reader: &mut impl Read, len: usize) -> Result<Vec<u8>, ConsensusDecodeError> {
    let mut buf = Vec::with_capacity(len.min(4096));
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(ConsensusDecodeError::TruncatedInput);
    }
    Ok(buf)
}

impl<T: ConsensusEncode> ConsensusEncode for Vec<T> {
    fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = VarInt::with(self.len()).consensus_encode(writer)?;
        for item in self {
            counter += item.consensus_encode(writer)?;
        }
        Ok(counter)
    }
}

impl<T: ConsensusDecode> ConsensusDecode for Vec<T> {
    fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
        let len = VarInt::consensus_decode(reader)?.to_collection_len()?;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(T::consensus_decode(reader)?);
        }
        Ok(items)
    }
}

impl<const LEN: usize> ConsensusEncode for [u8; LEN] {
    fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        writer.write_all(self)?;
        Ok(LEN)
    }
}

impl<const LEN: usize> ConsensusDecode for [u8; LEN] {
    fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
        let mut buf = [0u8; LEN];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

macro_rules! impl_int_coding {
    ($($ty:ty),+) => {$(
        impl ConsensusEncode for $ty {
            fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
                writer.write_all(&self.to_le_bytes())?;
                Ok(core::mem::size_of::<$ty>())
            }
        }

        impl ConsensusDecode for $ty {
            fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
                let mut buf = [0u8; core::mem::size_of::<$ty>()];
                reader.read_exact(&mut buf)?;
                Ok(<$ty>::from_le_bytes(buf))
            }
        }
    )+};
}

impl_int_coding!(u8, u16, u32, u64, i32, i64);

#[cfg(test)]
mod test {
    use amplify::hex::FromHex;

    use super::*;

    #[test]
    fn var_int_boundaries() {
        for (value, hex) in [
            (0u64, "00"),
            (0xFC, "fc"),
            (0xFD, "fdfd00"),
            (0xFFFF, "fdffff"),
            (0x10000, "fe00000100"),
            (0xFFFF_FFFF, "feffffffff"),
            (0x1_0000_0000, "ff0000000001000000"),
        ] {
            let var_int = VarInt::new(value);
            assert_eq!(var_int.consensus_serialize().to_hex(), hex);
            assert_eq!(var_int.len(), hex.len() / 2);
            let bytes = Vec::<u8>::from_hex(hex).unwrap();
            assert_eq!(VarInt::consensus_deserialize(bytes).unwrap(), var_int);
        }
    }

    #[test]
    fn var_int_non_minimal() {
        let bytes = Vec::<u8>::from_hex("fd1000").unwrap();
        assert_eq!(
            VarInt::consensus_deserialize(bytes),
            Err(ConsensusDataError::NonMinimalVarInt(0x10).into())
        );
    }

    #[test]
    fn truncated() {
        assert_eq!(VarInt::consensus_deserialize([0xFEu8, 0x01]), Err(ConsensusDecodeError::TruncatedInput));
        assert_eq!(ByteStr::consensus_deserialize([0x03u8, 0x01, 0x02]), Err(ConsensusDecodeError::TruncatedInput));
        assert_eq!(u32::consensus_deserialize([0x01u8]), Err(ConsensusDecodeError::TruncatedInput));
    }

    #[test]
    fn oversized_vector() {
        let bytes = Vec::<u8>::from_hex("feffffff7f").unwrap();
        assert_eq!(
            ByteStr::consensus_deserialize(bytes),
            Err(ConsensusDataError::OversizedVector(0x7FFF_FFFF).into())
        );
    }

    #[test]
    fn excessive_data() {
        assert_eq!(
            u8::consensus_deserialize([0x01u8, 0x02]),
            Err(ConsensusDataError::DataNotConsumed.into())
        );
    }

    #[test]
    fn var_bytes() {
        let data = ByteStr::from(vec![0xAB; 300]);
        let ser = data.consensus_serialize();
        assert_eq!(&ser[..3], &[0xFD, 0x2C, 0x01]);
        assert_eq!(ser.len(), 303);
        assert_eq!(ByteStr::consensus_deserialize(ser).unwrap(), data);
    }
}
