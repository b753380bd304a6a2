// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Breakpoint and trace-ring round trips through the RPC surface.

mod common;

use common::*;
use hsx_executive::commands;
use hsx_executive::executive::{Executive, ExecutiveConfig};

#[test]
fn breakpoint_stops_the_task_before_the_instruction_runs() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "dbg"));
    let pid = load(&mut exec, &mut session, &image(&looping_program()));

    let r = commands::dispatch(&mut exec, &mut session, &req("attach", serde_json::json!({"pid": pid})));
    assert!(matches!(r, hsx_rpc::Response::Ok { .. }));
    let r = commands::dispatch(&mut exec, &mut session, &req("bp", serde_json::json!({"pid": pid, "action": "add", "addr": 0})));
    assert!(matches!(r, hsx_rpc::Response::Ok { .. }));

    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("step", serde_json::json!({"pid": pid}))));
    assert_eq!(fields["outcome"], "breakpoint");

    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("ps", serde_json::json!({}))));
    assert_eq!(fields["tasks"].as_array().unwrap()[0]["state"], "paused");

    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("bp", serde_json::json!({"pid": pid, "action": "list"}))));
    assert_eq!(fields["breakpoints"].as_array().unwrap().len(), 1);

    let r = commands::dispatch(&mut exec, &mut session, &req("bp", serde_json::json!({"pid": pid, "action": "clear_all"})));
    assert!(matches!(r, hsx_rpc::Response::Ok { .. }));
    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("bp", serde_json::json!({"pid": pid, "action": "list"}))));
    assert!(fields["breakpoints"].as_array().unwrap().is_empty());
}

#[test]
fn detach_lets_the_task_run_through_its_breakpoint() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "dbg"));
    let pid = load(&mut exec, &mut session, &image(&looping_program()));

    commands::dispatch(&mut exec, &mut session, &req("attach", serde_json::json!({"pid": pid})));
    commands::dispatch(&mut exec, &mut session, &req("bp", serde_json::json!({"pid": pid, "action": "add", "addr": 0})));
    commands::dispatch(&mut exec, &mut session, &req("detach", serde_json::json!({"pid": pid})));

    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("step", serde_json::json!({"pid": pid}))));
    assert_eq!(fields["outcome"], "continue");
}

#[test]
fn trace_ring_records_steps_once_enabled() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "dbg"));
    let pid = load(&mut exec, &mut session, &image(&looping_program()));

    commands::dispatch(&mut exec, &mut session, &req("attach", serde_json::json!({"pid": pid})));
    let r = commands::dispatch(&mut exec, &mut session, &req("trace", serde_json::json!({"pid": pid, "action": "control", "enabled": true})));
    assert!(matches!(r, hsx_rpc::Response::Ok { .. }));

    for _ in 0..3 {
        commands::dispatch(&mut exec, &mut session, &req("step", serde_json::json!({"pid": pid})));
    }

    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("trace", serde_json::json!({"pid": pid, "action": "records"}))));
    assert_eq!(fields["count"].as_u64().unwrap(), 3);
    assert_eq!(fields["format"], "hsx.trace/1");
}

#[test]
fn trace_ring_capacity_bounds_retained_records() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "dbg"));
    let pid = load(&mut exec, &mut session, &image(&looping_program()));

    commands::dispatch(&mut exec, &mut session, &req("attach", serde_json::json!({"pid": pid})));
    commands::dispatch(
        &mut exec,
        &mut session,
        &req("trace", serde_json::json!({"pid": pid, "action": "control", "enabled": true})),
    );
    commands::dispatch(&mut exec, &mut session, &req("trace", serde_json::json!({"pid": pid, "action": "config", "capacity": 4})));

    for _ in 0..10 {
        commands::dispatch(&mut exec, &mut session, &req("step", serde_json::json!({"pid": pid})));
    }

    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("trace", serde_json::json!({"pid": pid, "action": "records"}))));
    assert_eq!(fields["count"].as_u64().unwrap(), 4, "ring must stay bounded at its configured capacity");
}
