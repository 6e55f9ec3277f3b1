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

use std::io::{self, Cursor, Read, Write};

use amplify::IoError;
use bc::{
    read_exact_vec, ByteStr, ConsensusDataError, ConsensusDecode, ConsensusDecodeError,
    ConsensusEncode, KeyOrigin, LegacyPk, LegacySig, PkParseError, RedeemScript, SigScript,
    SighashType, Tx, TxOut, Txid, VarInt, Witness, WitnessScript, Xpub, XpubDecodeError,
};

use crate::keys::{KeyLen, KeyValue};
use crate::maps::{KeyMap, Map, MapName};
use crate::{GlobalKey, InputKey, KeyPair, KeyType, OutputKey, Psbt, SanityError};

#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(inner)]
pub enum DecodeError {
    #[from]
    Io(IoError),

    #[from]
    #[from(ConsensusDataError)]
    #[from(PkParseError)]
    #[from(XpubDecodeError)]
    #[from(SanityError)]
    Psbt(PsbtError),
}

impl From<io::Error> for DecodeError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => DecodeError::Psbt(PsbtError::TruncatedInput),
            _ => DecodeError::Io(err.into()),
        }
    }
}

impl From<ConsensusDecodeError> for DecodeError {
    fn from(e: ConsensusDecodeError) -> Self {
        match e {
            ConsensusDecodeError::TruncatedInput => PsbtError::TruncatedInput.into(),
            ConsensusDecodeError::Io(e) => DecodeError::Io(e),
            ConsensusDecodeError::Data(data) => data.into(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum PsbtError {
    /// unexpected end of data.
    TruncatedInput,

    /// PSBT data are followed by some excessive bytes.
    DataNotConsumed,

    /// invalid magic bytes {0}.
    InvalidMagic(ByteStr),

    /// PSBT doesn't contain unsigned transaction.
    MissingUnsignedTx,

    /// transaction inside PSBT must not have signature scripts or witnesses.
    NotUnsigned,

    /// repeated key {1:#04x} in the {0} map.
    DuplicateKey(MapName, u8),

    /// key {key_type:#04x} in the {map} map must be {expected} bytes long, while it has {got}
    /// bytes.
    BadKeyLength {
        map: MapName,
        key_type: u8,
        expected: KeyLen,
        got: usize,
    },

    /// PSBT version {0} is not supported.
    UnsupportedVersion(u32),

    /// PSBT contains {found} input maps, while the unsigned transaction has {expected} inputs.
    InputCountMismatch { expected: usize, found: usize },

    /// PSBT contains {found} output maps, while the unsigned transaction has {expected}
    /// outputs.
    OutputCountMismatch { expected: usize, found: usize },

    /// non-witness UTXO of input {input} has id {found}, while the input spends an output of
    /// {expected}.
    UtxoMismatch {
        input: usize,
        expected: Txid,
        found: Txid,
    },

    /// non-witness UTXO of input {input} has no output #{vout} spent by the input.
    UtxoOutputMissing { input: usize, vout: u32 },

    /// invalid key origin data of {0} bytes.
    InvalidKeyOrigin(usize),

    /// invalid value of key {1:#04x} in the {0} map.
    InvalidValue(MapName, u8),

    #[from]
    #[display(inner)]
    InvalidPubkey(PkParseError),

    #[from]
    #[display(inner)]
    InvalidXpub(XpubDecodeError),

    #[display(inner)]
    Consensus(ConsensusDataError),

    #[from]
    #[display(inner)]
    Insane(SanityError),
}

impl From<ConsensusDataError> for PsbtError {
    fn from(err: ConsensusDataError) -> Self {
        match err {
            ConsensusDataError::DataNotConsumed => PsbtError::DataNotConsumed,
            err => PsbtError::Consensus(err),
        }
    }
}

impl From<ConsensusDecodeError> for PsbtError {
    fn from(err: ConsensusDecodeError) -> Self { DecodeError::from(err).into() }
}

impl From<DecodeError> for PsbtError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Psbt(e) => e,
            DecodeError::Io(_) => PsbtError::TruncatedInput,
        }
    }
}

impl PsbtError {
    /// Reports failures to parse a value as a protocol violation of the key
    /// which holds it, so they are not confused with the truncation of the
    /// PSBT itself.
    pub(crate) fn in_value(self, map: MapName, key_type: u8) -> Self {
        match self {
            PsbtError::TruncatedInput | PsbtError::DataNotConsumed | PsbtError::Consensus(_) => {
                PsbtError::InvalidValue(map, key_type)
            }
            other => other,
        }
    }
}

pub trait Encode {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError>;
}

impl<'a, T: Encode> Encode for &'a T {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> { (*self).encode(writer) }
}

pub trait Decode
where Self: Sized
{
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError>;
    fn deserialize(bytes: impl AsRef<[u8]>) -> Result<Self, PsbtError> {
        let bytes = bytes.as_ref();
        let mut cursor = Cursor::new(bytes);
        let me = Self::decode(&mut cursor)?;
        if cursor.position() != bytes.len() as u64 {
            return Err(PsbtError::DataNotConsumed);
        }
        Ok(me)
    }
}

/// Serializes a value the way it is stored in a PSBT map.
pub(crate) fn to_value_data(value: &impl Encode) -> ByteStr {
    let mut buf = Vec::new();
    value.encode(&mut buf).expect("in-memory writing can't fail");
    ByteStr::from(buf)
}

/// Reads a single byte, returning `None` if the reader is exhausted.
pub(crate) fn read_next(reader: &mut impl Read) -> Result<Option<u8>, DecodeError> {
    let mut buf = [0u8; 1];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(buf[0])),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
}

impl Psbt {
    pub const MAGIC: [u8; 5] = *b"psbt\xFF";
    pub(crate) const SEPARATOR: [u8; 1] = [0x0];

    pub fn serialize(&self) -> Vec<u8> {
        let mut vec = Vec::new();
        self.encode(&mut vec).expect("in-memory encoding can't error");
        vec
    }

    /// Checks that non-witness UTXOs are the transactions spent by the
    /// corresponding inputs.
    pub fn check_utxos(&self) -> Result<(), PsbtError> {
        for (index, (input, txin)) in
            self.inputs().zip(self.unsigned_tx().inputs()).enumerate()
        {
            let Some(utxo) = &input.non_witness_utxo else {
                continue;
            };
            let prevout = txin.prev_output;
            let found = utxo.txid();
            if found != prevout.txid {
                return Err(PsbtError::UtxoMismatch {
                    input: index,
                    expected: prevout.txid,
                    found,
                });
            }
            if utxo.outputs().len() <= prevout.vout as usize {
                return Err(PsbtError::UtxoOutputMissing {
                    input: index,
                    vout: prevout.vout,
                });
            }
        }
        Ok(())
    }
}

impl Encode for Psbt {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = Self::MAGIC.len();
        writer.write_all(&Self::MAGIC)?;

        counter += self.encode_map(writer)?;

        for input in self.inputs() {
            counter += input.encode_map(writer)?;
        }

        for output in self.outputs() {
            counter += output.encode_map(writer)?;
        }

        Ok(counter)
    }
}

impl Decode for Psbt {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        // Data shorter than the magic is truncated only if it is a prefix of it.
        let mut magic = Vec::with_capacity(Self::MAGIC.len());
        reader.by_ref().take(Self::MAGIC.len() as u64).read_to_end(&mut magic)?;
        if !Self::MAGIC.starts_with(&magic) {
            return Err(PsbtError::InvalidMagic(ByteStr::from(magic)).into());
        }
        if magic.len() < Self::MAGIC.len() {
            return Err(PsbtError::TruncatedInput.into());
        }

        let map = Map::<GlobalKey>::parse(MapName::Global, reader)?;
        if !map.singular.contains_key(&GlobalKey::UnsignedTx) {
            return Err(PsbtError::MissingUnsignedTx.into());
        }
        let mut psbt = Psbt::empty();
        psbt.parse_map(map)?;

        let expected = psbt.unsigned_tx().inputs().len();
        let mut inputs = Vec::with_capacity(expected);
        while inputs.len() < expected {
            let Some(map) = Map::<InputKey>::parse_opt(MapName::Input, reader)? else {
                break;
            };
            let mut input = crate::Input::new();
            input.parse_map(map)?;
            inputs.push(input);
        }
        if inputs.len() != expected {
            return Err(PsbtError::InputCountMismatch {
                expected,
                found: inputs.len(),
            }
            .into());
        }

        let expected = psbt.unsigned_tx().outputs().len();
        let mut outputs = Vec::with_capacity(expected);
        while outputs.len() < expected {
            let Some(map) = Map::<OutputKey>::parse_opt(MapName::Output, reader)? else {
                break;
            };
            let mut output = crate::Output::new();
            output.parse_map(map)?;
            outputs.push(output);
        }
        if outputs.len() != expected {
            return Err(PsbtError::OutputCountMismatch {
                expected,
                found: outputs.len(),
            }
            .into());
        }

        psbt.set_maps(inputs, outputs);
        psbt.check_utxos()?;
        psbt.check_sanity()?;

        Ok(psbt)
    }
}

impl Encode for GlobalKey {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        self.to_u8().encode(writer)
    }
}

impl Decode for GlobalKey {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        u8::decode(reader).map(Self::from_u8)
    }
}

impl Encode for InputKey {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        self.to_u8().encode(writer)
    }
}

impl Decode for InputKey {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        u8::decode(reader).map(Self::from_u8)
    }
}

impl Encode for OutputKey {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        self.to_u8().encode(writer)
    }
}

impl Decode for OutputKey {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        u8::decode(reader).map(Self::from_u8)
    }
}

impl<T: KeyType, K: Encode, V: Encode> Encode for KeyPair<T, K, V> {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = 0;

        counter += self.key_len().encode(writer)?;
        counter += self.key_type.encode(writer)?;
        counter += self.key_data.encode(writer)?;

        counter += self.value_len().encode(writer)?;
        counter += self.value_data.encode(writer)?;

        Ok(counter)
    }
}

impl<T: KeyType> KeyValue<T> {
    /// Decodes key-value pair whose first byte was already read.
    pub(crate) fn decode_with_prefix(
        prefix: u8,
        reader: &mut impl Read,
    ) -> Result<Self, DecodeError> {
        let key_len = VarInt::decode_with_prefix(prefix, reader)?;
        if key_len == 0u64 {
            return Ok(KeyValue::Separator);
        }
        let key_len = key_len.to_collection_len()?;

        let key_type = T::decode(reader)?;
        let key_data = read_exact_vec(reader, key_len - 1)?;

        let value_len = VarInt::decode(reader)?.to_collection_len()?;
        let value_data = read_exact_vec(reader, value_len)?;

        Ok(KeyValue::Pair(KeyPair::new(key_type, key_data.into(), value_data.into())))
    }
}

impl<T: KeyType> Decode for KeyValue<T> {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let prefix = u8::decode(reader)?;
        Self::decode_with_prefix(prefix, reader)
    }
}

/// Byte string written without a length prefix; the length is carried by
/// the key-value pair.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct RawBytes<T: AsRef<[u8]>>(pub T);

impl<T: AsRef<[u8]>> Encode for RawBytes<T> {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let bytes = self.0.as_ref();
        writer.write_all(bytes)?;
        Ok(bytes.len())
    }
}

impl Decode for RawBytes<Vec<u8>> {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(Self(buf))
    }
}

impl Encode for Xpub {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        writer.write_all(self.as_ref())?;
        Ok(Xpub::LEN)
    }
}

impl Decode for Xpub {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut buf = [0u8; Xpub::LEN];
        reader.read_exact(&mut buf)?;
        Xpub::from_slice(&buf).map_err(DecodeError::from)
    }
}

impl Encode for LegacyPk {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        RawBytes(self).encode(writer)
    }
}

impl Decode for LegacyPk {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let RawBytes(data) = RawBytes::<Vec<u8>>::decode(reader)?;
        LegacyPk::from_slice(&data).map_err(DecodeError::from)
    }
}

impl Encode for KeyOrigin {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        RawBytes(self.to_psbt_value()).encode(writer)
    }
}

impl Decode for KeyOrigin {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let RawBytes(data) = RawBytes::<Vec<u8>>::decode(reader)?;
        KeyOrigin::from_psbt_value(&data)
            .ok_or(PsbtError::InvalidKeyOrigin(data.len()))
            .map_err(DecodeError::from)
    }
}

impl Encode for LegacySig {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        RawBytes(self).encode(writer)
    }
}

impl Decode for LegacySig {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        RawBytes::<Vec<u8>>::decode(reader).map(|RawBytes(data)| LegacySig::from(data))
    }
}

impl Encode for SighashType {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        self.to_consensus_u32().encode(writer)
    }
}

impl Decode for SighashType {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        u32::decode(reader).map(Self::from_consensus_u32)
    }
}

macro_rules! psbt_code_using_consensus {
    ($ty:ty) => {
        psbt_encode_from_consensus!($ty);
        psbt_decode_from_consensus!($ty);
    };
}

macro_rules! psbt_encode_from_consensus {
    ($ty:ty) => {
        impl Encode for $ty {
            fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
                self.consensus_encode(writer)
            }
        }
    };
}

macro_rules! psbt_decode_from_consensus {
    ($ty:ty) => {
        impl Decode for $ty {
            fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
                Self::consensus_decode(reader).map_err(DecodeError::from)
            }
        }
    };
}

psbt_code_using_consensus!(Tx);
psbt_code_using_consensus!(TxOut);
psbt_code_using_consensus!(Witness);
psbt_code_using_consensus!(u8);
psbt_code_using_consensus!(u32);
psbt_code_using_consensus!(VarInt);

macro_rules! psbt_code_raw_script {
    ($ty:ty) => {
        impl Encode for $ty {
            fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
                RawBytes(self).encode(writer)
            }
        }

        impl Decode for $ty {
            fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
                RawBytes::<Vec<u8>>::decode(reader).map(|RawBytes(data)| Self::from(data))
            }
        }
    };
}

psbt_code_raw_script!(RedeemScript);
psbt_code_raw_script!(WitnessScript);
psbt_code_raw_script!(SigScript);

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        Ok(match self {
            Some(data) => data.encode(writer)?,
            None => 0,
        })
    }
}

impl Encode for () {
    fn encode(&self, _writer: &mut impl Write) -> Result<usize, IoError> { Ok(0) }
}

impl Decode for () {
    fn decode(_reader: &mut impl Read) -> Result<Self, DecodeError> { Ok(()) }
}
