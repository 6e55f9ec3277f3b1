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

//! Bitcoin transaction, PSBT and merkle proof codecs.
//!
//! The crate re-exports consensus-level data structures from `bc` together
//! with the BIP-174 PSBT implementation from `psbt`, so that applications
//! need a single dependency.

pub extern crate psbt;

pub use bc::{secp256k1, *};
pub use psbt::{
    CombineError, ExtractError, FinalizeError, Input as PsbtInput, KeySigner,
    Output as PsbtOutput, Psbt, PsbtError, PsbtParseError, Rejected, SanityError, Sign,
    SignError, Signer, SigningContext, SigningContextError,
};
