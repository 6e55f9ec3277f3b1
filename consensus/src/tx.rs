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

use std::fmt::{self, Display, Formatter};
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::OnceLock;

use amplify::hex::{self, FromHex, ToHex};
use amplify::IoError;

use crate::{
    hash256, ByteStr, ConsensusDataError, ConsensusDecode, ConsensusDecodeError, ConsensusEncode,
    ScriptPubkey, SigScript, Txid, VarInt, Wtxid,
};

/// Sequence number used by inputs which don't opt into relative timelocks or RBF.
pub const SEQ_NO_FINAL: u32 = 0xFFFF_FFFF;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
#[display("{txid}:{vout}")]
pub struct Outpoint {
    pub txid: Txid,
    pub vout: u32,
}

impl Outpoint {
    pub const NULL_VOUT: u32 = 0xFFFF_FFFF;

    #[inline]
    pub fn new(txid: Txid, vout: u32) -> Self { Self { txid, vout } }

    /// Outpoint used by coinbase inputs.
    #[inline]
    pub fn null() -> Self {
        Self {
            txid: Txid::coinbase(),
            vout: Self::NULL_VOUT,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool { self.txid.is_zero() && self.vout == Self::NULL_VOUT }
}

impl Default for Outpoint {
    fn default() -> Self { Outpoint::null() }
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct TxIn {
    pub prev_output: Outpoint,
    pub sig_script: SigScript,
    pub sequence: u32,
}

impl TxIn {
    /// Input spending `prev_output` with an empty signature script.
    pub fn unsigned(prev_output: Outpoint, sequence: u32) -> Self {
        TxIn {
            prev_output,
            sig_script: none!(),
            sequence,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct TxOut {
    /// Amount in satoshis. Signed for compatibility with the wire format;
    /// valid transactions never carry negative values.
    pub value: i64,
    pub script_pubkey: ScriptPubkey,
}

impl TxOut {
    pub fn new(script_pubkey: impl Into<ScriptPubkey>, value: i64) -> Self {
        TxOut {
            script_pubkey: script_pubkey.into(),
            value,
        }
    }

    #[inline]
    pub fn is_p2pkh(&self) -> bool { self.script_pubkey.is_p2pkh() }

    #[inline]
    pub fn is_p2sh(&self) -> bool { self.script_pubkey.is_p2sh() }

    #[inline]
    pub fn is_p2pk(&self) -> bool { self.script_pubkey.is_p2pk() }

    /// Witness version and program, if the output is a witness output.
    #[inline]
    pub fn witness_program(&self) -> Option<(u8, &[u8])> { self.script_pubkey.witness_program() }
}

/// Witness stack of a single transaction input.
#[derive(Wrapper, WrapperMut, Clone, Eq, PartialEq, Hash, Default, Debug, From)]
#[wrapper(Deref)]
#[wrapper_mut(DerefMut)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct Witness(#[from] Vec<ByteStr>);

impl Witness {
    #[inline]
    pub fn new() -> Self { none!() }

    pub fn from_items<I>(items: impl IntoIterator<Item = I>) -> Self
    where I: Into<Vec<u8>> {
        Witness(items.into_iter().map(|item| ByteStr::from(item.into())).collect())
    }

    /// Witness with no stack items.
    #[inline]
    pub fn is_null(&self) -> bool { self.0.is_empty() }

    pub fn push(&mut self, item: impl Into<Vec<u8>>) { self.0.push(ByteStr::from(item.into())) }
}

/// Bitcoin transaction.
///
/// Witnesses are stored separately from inputs and may temporary be out of
/// sync with them while the transaction is being signed: the witness
/// serialization pads or truncates them to the number of inputs.
///
/// Transaction id is computed lazily and cached; all mutating accessors drop
/// the cached value.
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct Tx {
    version: i32,
    inputs: Vec<TxIn>,
    outputs: Vec<TxOut>,
    witnesses: Vec<Witness>,
    lock_time: u32,
    #[cfg_attr(feature = "serde", serde(skip))]
    txid: OnceLock<Txid>,
}

impl PartialEq for Tx {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.lock_time == other.lock_time
            && self.witness_iter().eq(other.witness_iter())
    }
}

impl Eq for Tx {}

impl Tx {
    pub fn new(version: i32, inputs: Vec<TxIn>, outputs: Vec<TxOut>, lock_time: u32) -> Self {
        Tx {
            version,
            inputs,
            outputs,
            witnesses: vec![],
            lock_time,
            txid: OnceLock::new(),
        }
    }

    pub fn with_witnesses(mut self, witnesses: Vec<Witness>) -> Self {
        self.witnesses = witnesses;
        self
    }

    #[inline]
    pub fn version(&self) -> i32 { self.version }

    #[inline]
    pub fn inputs(&self) -> &[TxIn] { &self.inputs }

    #[inline]
    pub fn outputs(&self) -> &[TxOut] { &self.outputs }

    #[inline]
    pub fn lock_time(&self) -> u32 { self.lock_time }

    /// Witness stacks as stored, which may be shorter or longer than the list
    /// of inputs.
    #[inline]
    pub fn witnesses(&self) -> &[Witness] { &self.witnesses }

    /// Witness for the input at `index`; null if not present.
    pub fn witness(&self, index: usize) -> Option<&Witness> {
        if index >= self.inputs.len() {
            return None;
        }
        static NULL: Witness = Witness(Vec::new());
        Some(self.witnesses.get(index).unwrap_or(&NULL))
    }

    /// Iterates over witnesses padded or truncated to the number of inputs.
    fn witness_iter(&self) -> impl Iterator<Item = &[ByteStr]> + '_ {
        (0..self.inputs.len()).map(|no| self.witnesses.get(no).map(|w| w.as_slice()).unwrap_or(&[]))
    }

    pub fn set_version(&mut self, version: i32) {
        self.version = version;
        self.rehash();
    }

    pub fn set_lock_time(&mut self, lock_time: u32) {
        self.lock_time = lock_time;
        self.rehash();
    }

    pub fn inputs_mut(&mut self) -> &mut Vec<TxIn> {
        self.rehash();
        &mut self.inputs
    }

    pub fn outputs_mut(&mut self) -> &mut Vec<TxOut> {
        self.rehash();
        &mut self.outputs
    }

    /// Witnesses don't participate in txid, so the cache is retained.
    pub fn witnesses_mut(&mut self) -> &mut Vec<Witness> { &mut self.witnesses }

    /// Drops cached transaction id.
    #[inline]
    pub fn rehash(&mut self) { self.txid = OnceLock::new(); }

    pub fn has_witness(&self) -> bool { self.witness_iter().any(|w| !w.is_empty()) }

    pub fn txid(&self) -> Txid {
        *self.txid.get_or_init(|| Txid::from_byte_array(hash256(self.serialize_without_witness())))
    }

    /// Witness transaction id. Never cached since witnesses change during
    /// signing.
    pub fn wtxid(&self) -> Wtxid { Wtxid::from_byte_array(hash256(self.serialize_with_witness())) }

    /// Double SHA-256 of one of the transaction serializations in internal
    /// byte order.
    pub fn compute_hash(&self, include_witness: bool) -> [u8; 32] {
        match include_witness {
            true => self.wtxid().to_byte_array(),
            false => self.txid().to_byte_array(),
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prev_output.is_null()
    }

    /// Detects whether all inputs have empty signature scripts and null
    /// witnesses.
    pub fn is_unsigned(&self) -> bool {
        self.inputs.iter().all(|input| input.sig_script.is_empty())
            && self.witnesses.iter().take(self.inputs.len()).all(Witness::is_null)
    }

    /// Returns a copy of the transaction with all signature scripts and
    /// witnesses removed.
    pub fn to_unsigned(&self) -> Tx {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxIn::unsigned(input.prev_output, input.sequence))
            .collect();
        Tx::new(self.version, inputs, self.outputs.clone(), self.lock_time)
    }

    /// Sum of all output values, or `None` if it overflows.
    pub fn total_output_value(&self) -> Option<i64> {
        self.outputs.iter().try_fold(0i64, |sum, out| sum.checked_add(out.value))
    }

    pub fn serialize_without_witness(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_legacy(&mut buf).expect("in-memory writing can't fail");
        buf
    }

    pub fn serialize_with_witness(&self) -> Vec<u8> { self.consensus_serialize() }

    fn encode_legacy(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = self.version.consensus_encode(writer)?;
        counter += self.inputs.consensus_encode(writer)?;
        counter += self.outputs.consensus_encode(writer)?;
        counter += self.lock_time.consensus_encode(writer)?;
        Ok(counter)
    }

    /// Decodes transaction without trying to detect BIP-144 witness framing.
    ///
    /// Required for transactions which may legitimately contain no inputs
    /// (like unsigned transactions inside a PSBT), for which the segwit
    /// marker is indistinguishable from an empty input list.
    pub fn decode_legacy(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
        Self::decode_with(reader, false)
    }

    pub fn deserialize_legacy(bytes: impl AsRef<[u8]>) -> Result<Self, ConsensusDecodeError> {
        let bytes = bytes.as_ref();
        let mut cursor = std::io::Cursor::new(bytes);
        let tx = Self::decode_legacy(&mut cursor)?;
        if cursor.position() != bytes.len() as u64 {
            return Err(ConsensusDataError::DataNotConsumed.into());
        }
        Ok(tx)
    }

    fn decode_with(reader: &mut impl Read, witness: bool) -> Result<Self, ConsensusDecodeError> {
        let version = i32::consensus_decode(reader)?;

        // The byte following the version is either the first byte of the input
        // count or the segwit marker; in the latter case the next byte is the
        // flag, otherwise it starts the output count of a zero-input
        // transaction.
        let mut segwit = false;
        let mut outputs_prefix = None;
        let inputs = match u8::consensus_decode(reader)? {
            0x00 if witness => match u8::consensus_decode(reader)? {
                0x00 => {
                    outputs_prefix = Some(0x00);
                    vec![]
                }
                0x01 => {
                    segwit = true;
                    Vec::<TxIn>::consensus_decode(reader)?
                }
                flag => return Err(ConsensusDataError::InvalidSegwitFlag(flag).into()),
            },
            prefix => decode_items_with_prefix(prefix, reader)?,
        };

        let outputs = match outputs_prefix {
            Some(prefix) => decode_items_with_prefix(prefix, reader)?,
            None => Vec::<TxOut>::consensus_decode(reader)?,
        };

        let mut witnesses = Vec::with_capacity(if segwit { inputs.len() } else { 0 });
        if segwit {
            for _ in 0..inputs.len() {
                witnesses.push(Witness::consensus_decode(reader)?);
            }
            if witnesses.iter().all(Witness::is_null) {
                return Err(ConsensusDataError::SuperfluousWitness.into());
            }
        }

        let lock_time = u32::consensus_decode(reader)?;

        Ok(Tx::new(version, inputs, outputs, lock_time).with_witnesses(witnesses))
    }
}

fn decode_items_with_prefix<T: ConsensusDecode>(
    prefix: u8,
    reader: &mut impl Read,
) -> Result<Vec<T>, ConsensusDecodeError> {
    let len = VarInt::decode_with_prefix(prefix, reader)?.to_collection_len()?;
    let mut items = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        items.push(T::consensus_decode(reader)?);
    }
    Ok(items)
}

impl ConsensusEncode for Outpoint {
    fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        Ok(self.txid.consensus_encode(writer)? + self.vout.consensus_encode(writer)?)
    }
}

impl ConsensusDecode for Outpoint {
    fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
        let txid = Txid::consensus_decode(reader)?;
        let vout = u32::consensus_decode(reader)?;
        Ok(Outpoint::new(txid, vout))
    }
}

impl ConsensusEncode for TxIn {
    fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = self.prev_output.consensus_encode(writer)?;
        counter += self.sig_script.consensus_encode(writer)?;
        counter += self.sequence.consensus_encode(writer)?;
        Ok(counter)
    }
}

impl ConsensusDecode for TxIn {
    fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
        let prev_output = Outpoint::consensus_decode(reader)?;
        let sig_script = SigScript::consensus_decode(reader)?;
        let sequence = u32::consensus_decode(reader)?;
        Ok(TxIn {
            prev_output,
            sig_script,
            sequence,
        })
    }
}

impl ConsensusEncode for TxOut {
    fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        Ok(self.value.consensus_encode(writer)? + self.script_pubkey.consensus_encode(writer)?)
    }
}

impl ConsensusDecode for TxOut {
    fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
        let value = i64::consensus_decode(reader)?;
        let script_pubkey = ScriptPubkey::consensus_decode(reader)?;
        Ok(TxOut {
            value,
            script_pubkey,
        })
    }
}

impl ConsensusEncode for Witness {
    fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        self.0.consensus_encode(writer)
    }
}

impl ConsensusDecode for Witness {
    fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
        Vec::<ByteStr>::consensus_decode(reader).map(Self)
    }
}

impl ConsensusEncode for Tx {
    /// Uses witness serialization if at least one of the witnesses is not
    /// null, and the legacy one otherwise.
    fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        if !self.has_witness() {
            return self.encode_legacy(writer);
        }

        let mut counter = self.version.consensus_encode(writer)?;
        counter += 2;
        writer.write_all(&[0x00, 0x01])?;
        counter += self.inputs.consensus_encode(writer)?;
        counter += self.outputs.consensus_encode(writer)?;
        for witness in self.witness_iter() {
            counter += VarInt::with(witness.len()).consensus_encode(writer)?;
            for item in witness {
                counter += item.consensus_encode(writer)?;
            }
        }
        counter += self.lock_time.consensus_encode(writer)?;
        Ok(counter)
    }
}

impl ConsensusDecode for Tx {
    fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
        Self::decode_with(reader, true)
    }
}

#[derive(Clone, Debug, Display, Error, From)]
#[display(inner)]
pub enum TxParseError {
    #[from]
    Hex(hex::Error),

    #[from]
    Consensus(ConsensusDecodeError),
}

impl FromStr for Tx {
    type Err = TxParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let data = Vec::<u8>::from_hex(s)?;
        Tx::consensus_deserialize(data).map_err(TxParseError::from)
    }
}

impl Display for Tx {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.consensus_serialize().to_hex())
    }
}
