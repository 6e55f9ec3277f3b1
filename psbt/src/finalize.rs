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

use bc::script::{p2pk_pubkey, p2pkh_hash, witness_program};
use bc::{LegacyPk, LegacySig, Multisig, SigScript, Tx, Witness};
use indexmap::IndexMap;

use crate::{Psbt, SigningContextError};

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum FinalizeError {
    /// {0}
    #[from]
    Context(SigningContextError),

    /// input #{index} requires {required} signature(s), while only {present} are present.
    MissingSignatures {
        index: usize,
        required: usize,
        present: usize,
    },

    /// input #{0} has a script which can't be satisfied with signatures.
    UnsupportedScript(usize),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ExtractError {
    /// input #{0} is not finalized.
    NotFinalized(usize),
}

/// Builds the stack satisfying a script with the provided partial signatures.
fn satisfy(
    index: usize,
    script: &[u8],
    sigs: &IndexMap<LegacyPk, LegacySig>,
) -> Result<Vec<Vec<u8>>, FinalizeError> {
    let missing = |required: usize, present: usize| FinalizeError::MissingSignatures {
        index,
        required,
        present,
    };

    if let Some(hash) = p2pkh_hash(script) {
        let (pk, sig) =
            sigs.iter().find(|(pk, _)| pk.pubkey_hash() == hash).ok_or_else(|| missing(1, 0))?;
        return Ok(vec![sig.to_vec(), pk.to_vec()]);
    }

    if let Some(key) = p2pk_pubkey(script) {
        let sig = sigs
            .iter()
            .find_map(|(pk, sig)| (pk.as_ref() == key).then_some(sig))
            .ok_or_else(|| missing(1, 0))?;
        return Ok(vec![sig.to_vec()]);
    }

    if let Some(multisig) = Multisig::parse(script) {
        let required = multisig.threshold as usize;
        // OP_CHECKMULTISIG expects signatures in the order of the keys
        let found = multisig.pubkeys.iter().filter_map(|pk| sigs.get(pk)).collect::<Vec<_>>();
        if found.len() < required {
            return Err(missing(required, found.len()));
        }
        let mut stack = Vec::with_capacity(required + 1);
        stack.push(vec![]);
        stack.extend(found.into_iter().take(required).map(|sig| sig.to_vec()));
        return Ok(stack);
    }

    Err(FinalizeError::UnsupportedScript(index))
}

impl Psbt {
    /// Finalizes every input which is not finalized yet. Returns the number of
    /// newly finalized inputs.
    ///
    /// Stops at the first input which can't be finalized; the inputs before it
    /// remain finalized.
    pub fn finalize(&mut self) -> Result<usize, FinalizeError> {
        let mut count = 0usize;
        for index in 0..self.inputs.len() {
            if self.finalize_input(index)? {
                count += 1;
            }
        }
        tracing::debug!(txid = %self.txid(), count, "PSBT finalized");
        Ok(count)
    }

    /// Constructs final signature script and witness for an input out of its
    /// partial signatures and scripts, and clears the data which is not needed
    /// anymore. Returns `false` if the input was already finalized.
    pub fn finalize_input(&mut self, index: usize) -> Result<bool, FinalizeError> {
        if self.input(index).ok_or(SigningContextError::NoInput(index))?.is_finalized() {
            return Ok(false);
        }
        // validates the scripts against the spent output
        self.signing_context(index)?;
        let spent = self.spent_output(index).ok_or(SigningContextError::NoUtxo(index))?.clone();

        let input = &self.inputs[index];
        let redeem_script = match spent.script_pubkey.is_p2sh() {
            true => input.redeem_script.clone(),
            false => None,
        };
        let script = match &redeem_script {
            Some(redeem_script) => redeem_script.to_vec(),
            None => spent.script_pubkey.to_vec(),
        };

        let (mut pushes, witness) = match witness_program(&script) {
            None => (satisfy(index, &script, &input.partial_sigs)?, None),
            Some((0, program)) if program.len() == 20 => {
                let stack = input
                    .partial_sigs
                    .iter()
                    .find(|(pk, _)| pk.is_compressed() && pk.pubkey_hash().as_slice() == program)
                    .map(|(pk, sig)| vec![sig.to_vec(), pk.to_vec()])
                    .ok_or(FinalizeError::MissingSignatures {
                        index,
                        required: 1,
                        present: 0,
                    })?;
                (vec![], Some(Witness::from_items(stack)))
            }
            Some((0, _)) => {
                let witness_script = input
                    .witness_script
                    .as_ref()
                    .ok_or(SigningContextError::MissingWitnessScript(index))?;
                let mut stack = satisfy(index, witness_script, &input.partial_sigs)?;
                stack.push(witness_script.to_vec());
                (vec![], Some(Witness::from_items(stack)))
            }
            Some(_) => return Err(FinalizeError::UnsupportedScript(index)),
        };
        if let Some(redeem_script) = redeem_script {
            pushes.push(redeem_script.to_vec());
        }

        tracing::trace!(
            index,
            script = %spent.script_pubkey.class(),
            segwit = witness.is_some(),
            "input finalized"
        );

        let input = &mut self.inputs[index];
        input.final_script_sig = match pushes.is_empty() {
            true => None,
            false => Some(SigScript::from_pushes(pushes.iter().map(Vec::as_slice))),
        };
        input.final_witness = witness;
        input.clear_non_final();
        Ok(true)
    }

    /// Extracts signed transaction out of a finalized PSBT.
    pub fn extract(&self) -> Result<Tx, ExtractError> {
        let mut tx = self.unsigned_tx.clone();
        let mut witnesses = Vec::with_capacity(self.inputs.len());
        for (index, (input, txin)) in self.inputs.iter().zip(tx.inputs_mut()).enumerate() {
            if !input.is_finalized() {
                return Err(ExtractError::NotFinalized(index));
            }
            txin.sig_script = input.final_script_sig.clone().unwrap_or_default();
            witnesses.push(input.final_witness.clone().unwrap_or_default());
        }
        if witnesses.iter().any(|witness| !witness.is_null()) {
            *tx.witnesses_mut() = witnesses;
        }
        Ok(tx)
    }
}
