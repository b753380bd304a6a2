// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The value/command registry, dmesg ring, and event subscription surface —
//! the ambient bookkeeping a console client leans on alongside task control.

mod common;

use common::*;
use hsx_executive::commands;
use hsx_executive::executive::{Executive, ExecutiveConfig};
use hsx_executive::registry::ValueEntry;

fn seed_value(exec: &mut Executive, name: &str, auth: abi::hxe::AuthLevel) {
    exec.registry
        .register_value(ValueEntry {
            group: 0,
            id: 0,
            owner_pid: 1,
            name: name.to_string(),
            value: 7,
            unit: "rpm".into(),
            epsilon: 0.0,
            min: 0.0,
            max: 100.0,
            auth_level: auth,
            persist_key: String::new(),
            subscribers: Vec::new(),
        })
        .expect("seed value registers cleanly");
}

#[test]
fn val_get_set_and_list_round_trip() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "console"));
    seed_value(&mut exec, "fan.speed", abi::hxe::AuthLevel::Public);

    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("val_get", serde_json::json!({"name": "fan.speed"}))));
    assert_eq!(fields["value"].as_i64().unwrap(), 7);

    let r = commands::dispatch(&mut exec, &mut session, &req("val_set", serde_json::json!({"name": "fan.speed", "value": 42})));
    assert!(matches!(r, hsx_rpc::Response::Ok { .. }));

    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("val_list", serde_json::json!({}))));
    let values = fields["values"].as_array().unwrap();
    assert_eq!(values[0]["value"].as_i64().unwrap(), 42);
}

#[test]
fn val_set_below_required_auth_level_is_denied() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "console"));
    seed_value(&mut exec, "reactor.trip", abi::hxe::AuthLevel::Admin);

    let err = err_string(commands::dispatch(
        &mut exec,
        &mut session,
        &req("val_set", serde_json::json!({"name": "reactor.trip", "value": 1, "auth_level": "public"})),
    ));
    assert_eq!(err, "error:auth_denied");
}

#[test]
fn val_get_on_unknown_name_is_not_found() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "console"));
    let err = err_string(commands::dispatch(&mut exec, &mut session, &req("val_get", serde_json::json!({"name": "nope"}))));
    assert_eq!(err, "error:not_found");
}

#[test]
fn dmesg_ring_returns_most_recent_lines_within_limit() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "console"));
    for i in 0..5 {
        exec.push_dmesg(1, &format!("line {i}"));
    }
    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("dmesg", serde_json::json!({"limit": 2}))));
    let lines: Vec<&str> = fields["lines"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].ends_with("line 4"));
}

#[test]
fn event_seq_is_monotonic_across_task_lifecycle_events() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "watcher"));
    let token = ok_fields(commands::dispatch(&mut exec, &mut session, &req("events.subscribe", serde_json::json!({}))))["token"]
        .as_u64()
        .unwrap();

    let pid = load(&mut exec, &mut session, &image(&exiting_program()));
    commands::dispatch(&mut exec, &mut session, &req("step", serde_json::json!({"pid": pid})));

    let pending: Vec<u64> = exec.events.drain_pending(token).iter().map(|e| e.seq).collect();
    assert!(pending.len() >= 2, "load and step should each emit at least one task_state event");
    assert!(pending.windows(2).all(|w| w[0] < w[1]), "event sequence numbers must be strictly increasing");
}

#[test]
fn unsubscribe_stops_further_delivery() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "watcher"));
    let token = ok_fields(commands::dispatch(&mut exec, &mut session, &req("events.subscribe", serde_json::json!({}))))["token"]
        .as_u64()
        .unwrap();
    commands::dispatch(&mut exec, &mut session, &req("events.unsubscribe", serde_json::json!({"token": token})));

    let _ = load(&mut exec, &mut session, &image(&exiting_program()));
    assert!(exec.events.drain_pending(token).is_empty());
}
