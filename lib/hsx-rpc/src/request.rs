// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request envelope and argument normalisation (spec §6, §9).

use serde_json::{Map, Value};

#[derive(Clone, Debug, serde::Deserialize)]
pub struct Request {
    pub version: u32,
    pub cmd: String,
    #[serde(flatten)]
    pub args: Map<String, Value>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ArgError {
    Missing,
    WrongType,
}

/// Several commands accept either a JSON integer or a hex string (`"0x2a"`)
/// for the same argument. Normalise once here so every other layer of the
/// core only ever sees typed integers (spec §9).
pub fn arg_u32(args: &Map<String, Value>, key: &str) -> Result<u32, ArgError> {
    match args.get(key) {
        None => Err(ArgError::Missing),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or(ArgError::WrongType),
        Some(Value::String(s)) => parse_int_or_hex(s).ok_or(ArgError::WrongType),
        Some(_) => Err(ArgError::WrongType),
    }
}

pub fn arg_u32_opt(args: &Map<String, Value>, key: &str) -> Result<Option<u32>, ArgError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => arg_u32(args, key).map(Some),
    }
}

pub fn arg_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ArgError> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => Err(ArgError::WrongType),
        None => Err(ArgError::Missing),
    }
}

pub fn arg_bool_opt(args: &Map<String, Value>, key: &str, default: bool) -> Result<bool, ArgError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(ArgError::WrongType),
    }
}

fn parse_int_or_hex(s: &str) -> Option<u32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u32>().ok()
    }
}
