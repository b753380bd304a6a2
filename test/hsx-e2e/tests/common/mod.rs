// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared scaffolding for the scenario tests: building a minimal HXE image
//! byte-for-byte the way `hsx-image` itself does, opening a session, and
//! unwrapping responses.

use byteorder::{BigEndian, ByteOrder};
use hsx_executive::commands;
use hsx_executive::executive::Executive;
use hsx_rpc::{Request, Response};
use serde_json::{json, Map, Value};

/// Builds a request from a `cmd` and a `json!({...})` args blob.
pub fn req(cmd: &str, args: Value) -> Request {
    let map = args.as_object().cloned().unwrap_or_default();
    Request { version: 1, cmd: cmd.to_string(), args: map }
}

/// Assembles a v1 HXE image wrapping the given code words, CRC included.
pub fn image(code: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; 36];
    BigEndian::write_u32(&mut buf[0..4], abi::hxe::MAGIC);
    BigEndian::write_u16(&mut buf[4..6], 1);
    BigEndian::write_u32(&mut buf[12..16], code.len() as u32);
    buf.extend_from_slice(code);
    const CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
    let sum = CRC.checksum(&buf);
    BigEndian::write_u32(&mut buf[28..32], sum);
    buf
}

/// A single `BRK 0` instruction: exits the task on its first step.
pub fn exiting_program() -> Vec<u8> {
    vec![0x7F, 0, 0, 0]
}

/// An infinite loop: `JMP 0` jumps back to the entry point, so a task built
/// from it never exits on its own and stays steppable indefinitely.
pub fn looping_program() -> Vec<u8> {
    vec![0x21, 0, 0, 0]
}

pub fn opened(exec: &mut Executive, client: &str) -> String {
    let r = commands::dispatch(exec, &mut None, &req("session.open", json!({"client": client})));
    match r {
        Response::Ok { fields, .. } => fields["session_id"].as_str().unwrap().to_string(),
        Response::Error { error, .. } => panic!("session.open failed: {error}"),
    }
}

pub fn load(exec: &mut Executive, session: &mut Option<String>, bytes: &[u8]) -> u32 {
    let image_b64 = base64::prelude::BASE64_STANDARD.encode(bytes);
    let r = commands::dispatch(exec, session, &req("load", json!({"image_b64": image_b64})));
    match r {
        Response::Ok { fields, .. } => fields["pid"].as_u64().unwrap() as u32,
        Response::Error { error, .. } => panic!("load failed: {error}"),
    }
}

pub fn ok_fields(r: Response) -> Map<String, Value> {
    match r {
        Response::Ok { fields, .. } => fields,
        Response::Error { error, .. } => panic!("expected ok, got error: {error}"),
    }
}

pub fn err_string(r: Response) -> String {
    match r {
        Response::Ok { .. } => panic!("expected error, got ok"),
        Response::Error { error, .. } => error,
    }
}
