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

use std::collections::HashMap;

use bc::secp256k1::{ecdsa, All, PublicKey, Secp256k1, SecretKey};
use bc::script::{p2pk_pubkey, p2pkh_hash, witness_program};
use bc::{
    KeyOrigin, LegacyPk, LegacySig, Multisig, ScriptPubkey, Sighash, SighashCache, SighashError,
    SighashType,
};

use crate::Psbt;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display("the transaction was rejected by the signer.")]
pub struct Rejected;

/// Errors reconstructing what an input signature commits to.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum SigningContextError {
    /// PSBT doesn't have input #{0}.
    NoInput(usize),

    /// input #{0} doesn't provide the output it spends.
    NoUtxo(usize),

    /// non-witness UTXO of input #{0} is not the transaction being spent.
    UtxoMismatch(usize),

    /// non-witness UTXO of input #{0} doesn't have the spent output.
    UtxoOutputMissing(usize),

    /// input #{0} spends P2SH output but has no redeem script.
    MissingRedeemScript(usize),

    /// redeem script of input #{0} doesn't match the spent P2SH output.
    RedeemScriptMismatch(usize),

    /// input #{0} spends P2WSH output but has no witness script.
    MissingWitnessScript(usize),

    /// witness script of input #{0} doesn't match the spent P2WSH output.
    WitnessScriptMismatch(usize),

    /// input #{index} spends witness v{version} program of {len} bytes, which is not supported.
    UnsupportedWitness { index: usize, version: u8, len: usize },
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum SignError {
    /// the transaction was rejected by the signer.
    #[from(Rejected)]
    Rejected,

    /// {0}
    #[from]
    Context(SigningContextError),

    /// {0}
    #[from]
    Sighash(SighashError),
}

/// Signature hashing algorithm used by an input.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
#[display(lowercase)]
pub enum SighashAlgo {
    /// Pre-segwit signature hash, committing to the script code only.
    Legacy,

    /// BIP-143 signature hash, committing also to the spent amount.
    SegwitV0,
}

/// Data an input signature commits to.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct SigningContext {
    /// Script placed into the signature hash.
    pub script_code: Vec<u8>,
    pub algo: SighashAlgo,
    /// Value of the spent output.
    pub value: i64,
    pub sighash_type: SighashType,
}

impl SigningContext {
    /// Checks whether a signature with the given key may satisfy the script.
    fn accepts(&self, pk: &LegacyPk) -> bool {
        if self.algo == SighashAlgo::SegwitV0 && !pk.is_compressed() {
            return false;
        }
        if let Some(hash) = p2pkh_hash(&self.script_code) {
            return pk.pubkey_hash() == hash;
        }
        if let Some(key) = p2pk_pubkey(&self.script_code) {
            return key == pk.as_ref();
        }
        if let Some(multisig) = Multisig::parse(&self.script_code) {
            return multisig.pubkeys.contains(pk);
        }
        true
    }

    /// Public keys which are mentioned in the script code itself.
    fn script_keys(&self) -> Vec<LegacyPk> {
        if let Some(key) = p2pk_pubkey(&self.script_code) {
            return LegacyPk::from_slice(key).into_iter().collect();
        }
        Multisig::parse(&self.script_code).map(|ms| ms.pubkeys).unwrap_or_default()
    }
}

/// Trait which should be implemented by all signers.
///
/// Signers must ensure that the transaction is checked by the user when they
/// get [`Signer::approve`] callback.
pub trait Signer {
    /// Type which does the actual signatures. See [`Sign`] trait for the details.
    type Sign<'s>: Sign
    where Self: 's;

    /// In the implementation of this method signers must ensure that
    /// transaction is checked by the user.
    fn approve(&self, psbt: &Psbt) -> Result<Self::Sign<'_>, Rejected>;
}

pub trait Sign {
    /// Create signature with a given key for inputs requiring ECDSA signatures
    /// (bare, pre-segwit and segwit v0). Returns `None` if the key is not
    /// controlled by the signer.
    fn sign_ecdsa(
        &self,
        message: Sighash,
        pk: &LegacyPk,
        origin: Option<&KeyOrigin>,
    ) -> Option<ecdsa::Signature>;
}

impl Psbt {
    /// Reconstructs the script code, the signature hash algorithm and the
    /// spent amount for an input, following P2SH and P2WSH nesting.
    pub fn signing_context(&self, index: usize) -> Result<SigningContext, SigningContextError> {
        let input = self.input(index).ok_or(SigningContextError::NoInput(index))?;
        let txin = self
            .unsigned_tx()
            .inputs()
            .get(index)
            .ok_or(SigningContextError::NoInput(index))?;

        let spent = match (&input.witness_utxo, &input.non_witness_utxo) {
            (Some(utxo), _) => utxo.clone(),
            (None, Some(prev_tx)) => {
                if prev_tx.txid() != txin.prev_output.txid {
                    return Err(SigningContextError::UtxoMismatch(index));
                }
                prev_tx
                    .outputs()
                    .get(txin.prev_output.vout as usize)
                    .cloned()
                    .ok_or(SigningContextError::UtxoOutputMissing(index))?
            }
            (None, None) => return Err(SigningContextError::NoUtxo(index)),
        };

        let mut script = spent.script_pubkey.to_vec();
        if spent.script_pubkey.is_p2sh() {
            let redeem_script = input
                .redeem_script
                .as_ref()
                .ok_or(SigningContextError::MissingRedeemScript(index))?;
            if redeem_script.to_script_pubkey() != spent.script_pubkey {
                return Err(SigningContextError::RedeemScriptMismatch(index));
            }
            script = redeem_script.to_vec();
        }

        let sighash_type = input.sighash_type.unwrap_or(SighashType::ALL);
        let program =
            witness_program(&script).map(|(version, program)| (version, program.to_vec()));
        let (script_code, algo) = match program {
            None => (script, SighashAlgo::Legacy),
            Some((0, program)) if program.len() == 20 => {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&program);
                (ScriptPubkey::p2pkh(hash).to_vec(), SighashAlgo::SegwitV0)
            }
            Some((0, program)) if program.len() == 32 => {
                let witness_script = input
                    .witness_script
                    .as_ref()
                    .ok_or(SigningContextError::MissingWitnessScript(index))?;
                if witness_script.to_script_pubkey().as_slice() != script.as_slice() {
                    return Err(SigningContextError::WitnessScriptMismatch(index));
                }
                (witness_script.to_vec(), SighashAlgo::SegwitV0)
            }
            Some((version, program)) => {
                return Err(SigningContextError::UnsupportedWitness {
                    index,
                    version,
                    len: program.len(),
                })
            }
        };

        Ok(SigningContext {
            script_code,
            algo,
            value: spent.value,
            sighash_type,
        })
    }

    /// Signs PSBT using the given `signer`. The signer determines whether the
    /// transaction should be accepted by the user and which keys should be
    /// used for signing for each of the inputs.
    ///
    /// Inputs which are already finalized or whose signing context can't be
    /// reconstructed are skipped. Returns the number of created signatures.
    pub fn sign(&mut self, signer: &impl Signer) -> Result<usize, SignError> {
        let satisfier = signer.approve(self)?;

        let mut sig_count = 0usize;
        for index in 0..self.inputs.len() {
            match self.sign_input(index, &satisfier) {
                Ok(count) => sig_count += count,
                Err(SignError::Context(err)) => {
                    tracing::debug!(index, %err, "skipping input which can't be signed");
                }
                Err(err) => return Err(err),
            }
        }

        tracing::debug!(txid = %self.txid(), sig_count, "PSBT signed");
        Ok(sig_count)
    }

    /// Adds signatures to a single input. Keys already having a partial
    /// signature are not signed again.
    pub fn sign_input(&mut self, index: usize, signer: &impl Sign) -> Result<usize, SignError> {
        let context = self.signing_context(index)?;
        let input = &self.inputs[index];
        if input.is_finalized() {
            return Ok(0);
        }

        let mut candidates = input
            .bip32_derivation
            .iter()
            .map(|(pk, origin)| (pk.clone(), Some(origin.clone())))
            .collect::<Vec<_>>();
        for pk in context.script_keys() {
            if !input.bip32_derivation.contains_key(&pk) {
                candidates.push((pk, None));
            }
        }
        candidates.retain(|(pk, _)| context.accepts(pk) && !input.partial_sigs.contains_key(pk));
        if candidates.is_empty() {
            return Ok(0);
        }

        let mut sig_hasher = SighashCache::new(&self.unsigned_tx);
        let sighash = match context.algo {
            SighashAlgo::Legacy => {
                sig_hasher.legacy_sighash(index, &context.script_code, context.sighash_type)?
            }
            SighashAlgo::SegwitV0 => sig_hasher.segwit_v0_sighash(
                index,
                &context.script_code,
                context.value,
                context.sighash_type,
            )?,
        };

        let input = &mut self.inputs[index];
        let mut sig_count = 0usize;
        for (pk, origin) in candidates {
            let Some(sig) = signer.sign_ecdsa(sighash, &pk, origin.as_ref()) else {
                continue;
            };
            tracing::trace!(index, %pk, algo = %context.algo, "input signed");
            input.partial_sigs.insert(pk, LegacySig::from_ecdsa(sig, context.sighash_type));
            sig_count += 1;
        }
        Ok(sig_count)
    }
}

/// Signer holding plain secret keys in memory.
///
/// Approves any transaction; matches keys by the public key only, ignoring
/// the derivation information.
#[derive(Clone)]
pub struct KeySigner {
    secp: Secp256k1<All>,
    keys: HashMap<PublicKey, SecretKey>,
}

impl Default for KeySigner {
    fn default() -> Self {
        KeySigner {
            secp: Secp256k1::new(),
            keys: none!(),
        }
    }
}

impl KeySigner {
    pub fn new() -> Self { KeySigner::default() }

    pub fn with(keys: impl IntoIterator<Item = SecretKey>) -> Self {
        let mut signer = KeySigner::new();
        for sk in keys {
            signer.add_key(sk);
        }
        signer
    }

    /// Adds a secret key, returning its compressed public key.
    pub fn add_key(&mut self, sk: SecretKey) -> LegacyPk {
        let pk = sk.public_key(&self.secp);
        self.keys.insert(pk, sk);
        LegacyPk::compressed(pk)
    }

    pub fn has_key(&self, pk: &LegacyPk) -> bool {
        pk.to_public_key().map(|pk| self.keys.contains_key(&pk)).unwrap_or_default()
    }
}

impl Signer for KeySigner {
    type Sign<'s> = &'s KeySigner where Self: 's;

    fn approve(&self, _: &Psbt) -> Result<Self::Sign<'_>, Rejected> { Ok(self) }
}

impl Sign for &KeySigner {
    fn sign_ecdsa(
        &self,
        message: Sighash,
        pk: &LegacyPk,
        _origin: Option<&KeyOrigin>,
    ) -> Option<ecdsa::Signature> {
        let sk = self.keys.get(&pk.to_public_key().ok()?)?;
        Some(self.secp.sign_ecdsa(&message.into(), sk))
    }
}

#[cfg(test)]
mod test {
    use bc::{Outpoint, RedeemScript, Tx, TxIn, TxOut, Txid, WitnessScript, SEQ_NO_FINAL};

    use super::*;

    fn sk(byte: u8) -> SecretKey { SecretKey::from_slice(&[byte; 32]).unwrap() }

    fn psbt_spending(script_pubkey: ScriptPubkey) -> Psbt {
        let prev = Outpoint::new(Txid::from_byte_array([9u8; 32]), 0);
        let tx = Tx::new(
            2,
            vec![TxIn::unsigned(prev, SEQ_NO_FINAL)],
            vec![TxOut::new(ScriptPubkey::p2wpkh([5u8; 20]), 90_000)],
            0,
        );
        let mut psbt = Psbt::from_unsigned_tx(tx).unwrap();
        psbt.input_mut(0).unwrap().witness_utxo = Some(TxOut::new(script_pubkey, 100_000));
        psbt
    }

    #[test]
    fn p2wpkh_context() {
        let signer = KeySigner::with([sk(1)]);
        let pk = LegacyPk::compressed(sk(1).public_key(&signer.secp));
        let psbt = psbt_spending(ScriptPubkey::p2wpkh(pk.pubkey_hash()));
        let context = psbt.signing_context(0).unwrap();
        assert_eq!(context.algo, SighashAlgo::SegwitV0);
        assert_eq!(context.value, 100_000);
        assert_eq!(context.script_code, ScriptPubkey::p2pkh(pk.pubkey_hash()).to_vec());
        assert_eq!(context.sighash_type, SighashType::ALL);
    }

    #[test]
    fn nested_witness_script_context() {
        let signer = KeySigner::with([sk(1), sk(2)]);
        let keys = [sk(1), sk(2)].map(|sk| LegacyPk::compressed(sk.public_key(&signer.secp)));
        let witness_script = WitnessScript::multisig(2, &keys);
        let redeem_script = RedeemScript::from_witness_output(&witness_script.to_script_pubkey());
        let mut psbt = psbt_spending(redeem_script.to_script_pubkey());

        assert_eq!(psbt.signing_context(0), Err(SigningContextError::MissingRedeemScript(0)));
        psbt.input_mut(0).unwrap().redeem_script = Some(redeem_script);
        assert_eq!(psbt.signing_context(0), Err(SigningContextError::MissingWitnessScript(0)));
        psbt.input_mut(0).unwrap().witness_script = Some(WitnessScript::multisig(1, &keys));
        assert_eq!(psbt.signing_context(0), Err(SigningContextError::WitnessScriptMismatch(0)));
        psbt.input_mut(0).unwrap().witness_script = Some(witness_script.clone());

        let context = psbt.signing_context(0).unwrap();
        assert_eq!(context.algo, SighashAlgo::SegwitV0);
        assert_eq!(context.script_code, witness_script.to_vec());

        assert_eq!(psbt.sign(&signer), Ok(2));
        assert_eq!(psbt.input(0).unwrap().partial_sigs.len(), 2);
        assert_eq!(psbt.sign(&signer), Ok(0));
    }

    #[test]
    fn taproot_unsupported() {
        let psbt = psbt_spending(ScriptPubkey::p2tr([3u8; 32]));
        assert_eq!(
            psbt.signing_context(0),
            Err(SigningContextError::UnsupportedWitness {
                index: 0,
                version: 1,
                len: 32
            })
        );
        let mut psbt = psbt;
        assert_eq!(psbt.sign(&KeySigner::with([sk(1)])), Ok(0));
    }

    #[test]
    fn foreign_keys_ignored() {
        let signer = KeySigner::with([sk(1)]);
        let other = LegacyPk::compressed(sk(2).public_key(&signer.secp));
        let mut psbt = psbt_spending(ScriptPubkey::p2wpkh(other.pubkey_hash()));
        psbt.input_mut(0).unwrap().bip32_derivation.insert(other.clone(), KeyOrigin::default());
        assert!(!signer.has_key(&other));
        assert_eq!(psbt.sign(&signer), Ok(0));
        assert!(psbt.input(0).unwrap().partial_sigs.is_empty());
    }
}
