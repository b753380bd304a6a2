// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mailbox descriptor lifecycle over the RPC surface: FIFO delivery order,
//! backpressure-free peek/stats, and fanout tap semantics.

mod common;

use common::*;
use hsx_executive::commands;
use hsx_executive::executive::{Executive, ExecutiveConfig};

fn send(exec: &mut Executive, session: &mut Option<String>, handle: u64, payload: &[u8]) {
    let payload_b64 = base64::prelude::BASE64_STANDARD.encode(payload);
    let r = commands::dispatch(exec, session, &req("mailbox_send", serde_json::json!({"handle": handle, "payload_b64": payload_b64})));
    assert!(matches!(r, hsx_rpc::Response::Ok { .. }));
}

fn recv_text(exec: &mut Executive, session: &mut Option<String>, handle: u64) -> Vec<u8> {
    let fields = ok_fields(commands::dispatch(exec, session, &req("mailbox_recv", serde_json::json!({"handle": handle}))));
    base64::prelude::BASE64_STANDARD.decode(fields["payload_b64"].as_str().unwrap()).unwrap()
}

#[test]
fn messages_are_delivered_in_fifo_order() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "sender"));

    let sender = ok_fields(commands::dispatch(
        &mut exec,
        &mut session,
        &req("mailbox_open", serde_json::json!({"name": "shared:fifo", "as_sender": true})),
    ))["handle"]
        .as_u64()
        .unwrap();
    let receiver = ok_fields(commands::dispatch(
        &mut exec,
        &mut session,
        &req("mailbox_open", serde_json::json!({"name": "shared:fifo"})),
    ))["handle"]
        .as_u64()
        .unwrap();

    send(&mut exec, &mut session, sender, b"first");
    send(&mut exec, &mut session, sender, b"second");
    send(&mut exec, &mut session, sender, b"third");

    assert_eq!(recv_text(&mut exec, &mut session, receiver), b"first");
    assert_eq!(recv_text(&mut exec, &mut session, receiver), b"second");
    assert_eq!(recv_text(&mut exec, &mut session, receiver), b"third");
}

#[test]
fn recv_on_empty_descriptor_reports_no_data() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "c1"));
    let receiver = ok_fields(commands::dispatch(
        &mut exec,
        &mut session,
        &req("mailbox_open", serde_json::json!({"name": "shared:empty"})),
    ))["handle"]
        .as_u64()
        .unwrap();

    let err = err_string(commands::dispatch(&mut exec, &mut session, &req("mailbox_recv", serde_json::json!({"handle": receiver}))));
    assert_eq!(err, "no_data");
}

#[test]
fn recv_on_unknown_handle_is_invalid_handle() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "c1"));
    let err = err_string(commands::dispatch(&mut exec, &mut session, &req("mailbox_recv", serde_json::json!({"handle": 99999}))));
    assert_eq!(err, "invalid_handle");
}

#[test]
fn peek_reports_queue_depth_before_any_recv() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "c1"));
    let sender = ok_fields(commands::dispatch(
        &mut exec,
        &mut session,
        &req("mailbox_open", serde_json::json!({"name": "shared:peek", "as_sender": true})),
    ))["handle"]
        .as_u64()
        .unwrap();
    let receiver = ok_fields(commands::dispatch(
        &mut exec,
        &mut session,
        &req("mailbox_open", serde_json::json!({"name": "shared:peek"})),
    ))["handle"]
        .as_u64()
        .unwrap();

    send(&mut exec, &mut session, sender, b"hi");
    send(&mut exec, &mut session, sender, b"there");

    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("mailbox_peek", serde_json::json!({"handle": receiver}))));
    assert_eq!(fields["depth"].as_u64().unwrap(), 2);
}

#[test]
fn mailbox_snapshot_reflects_active_descriptors() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "c1"));
    let before = ok_fields(commands::dispatch(&mut exec, &mut session, &req("mailbox_snapshot", serde_json::json!({}))))
        ["active_descriptors"]
        .as_u64()
        .unwrap();

    let _ = ok_fields(commands::dispatch(
        &mut exec,
        &mut session,
        &req("mailbox_bind", serde_json::json!({"name": "shared:snap", "capacity": 16})),
    ));

    let after = ok_fields(commands::dispatch(&mut exec, &mut session, &req("mailbox_snapshot", serde_json::json!({}))))
        ["active_descriptors"]
        .as_u64()
        .unwrap();
    assert_eq!(after, before + 1);
}
