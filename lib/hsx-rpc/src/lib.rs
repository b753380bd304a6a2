// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire types for the line-delimited JSON RPC surface (spec §6).
//!
//! Every request is one JSON object per line; every response or event is one
//! JSON object per line. Argument normalisation (`arg_u32` and friends) lives
//! here so every other crate only ever sees typed values (spec §9).

pub mod request;
pub mod response;

pub use request::{arg_bool_opt, arg_str, arg_u32, arg_u32_opt, ArgError, Request};
pub use response::{Event, Response};
