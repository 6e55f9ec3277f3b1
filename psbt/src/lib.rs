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

//! Partially signed bitcoin transactions (BIP-174, version 0): binary and
//! textual codecs, signing context reconstruction, signers, finalizer,
//! extractor and combiner.

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
extern crate serde_crate as serde;

mod keys;
mod maps;
mod coders;
mod data;
mod sign;
mod finalize;
mod combine;

pub use coders::{Decode, DecodeError, Encode, PsbtError, RawBytes};
pub use combine::CombineError;
pub use data::{Input, Output, Psbt, PsbtParseError, SanityError};
pub use finalize::{ExtractError, FinalizeError};
pub use keys::{GlobalKey, InputKey, KeyLen, KeyPair, KeyType, OutputKey};
pub use maps::{KeyData, KeyMap, Map, MapName, UnknownMap, ValueData};
pub use sign::{
    KeySigner, Rejected, SighashAlgo, Sign, SignError, Signer, SigningContext,
    SigningContextError,
};
