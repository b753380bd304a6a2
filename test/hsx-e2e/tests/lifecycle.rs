// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Task lifecycle: load, step, pause/resume, kill, fault handling, and
//! context isolation between two independently loaded tasks.

mod common;

use common::*;
use hsx_executive::commands;
use hsx_executive::executive::{Executive, ExecutiveConfig};

#[test]
fn load_step_exits_and_ps_reflects_it() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "t1"));
    let pid = load(&mut exec, &mut session, &image(&exiting_program()));

    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("step", serde_json::json!({"pid": pid}))));
    assert_eq!(fields["outcome"], "exited");

    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("ps", serde_json::json!({}))));
    let tasks = fields["tasks"].as_array().unwrap();
    assert_eq!(tasks[0]["state"], "returned");
}

#[test]
fn illegal_opcode_faults_and_halts_the_task() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "t1"));
    // 0xFE is not in the opcode table.
    let pid = load(&mut exec, &mut session, &image(&[0xFE, 0, 0, 0]));

    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("step", serde_json::json!({"pid": pid}))));
    assert_eq!(fields["outcome"], "faulted");
    assert_eq!(fields["fault"], "illegal_opcode");

    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("ps", serde_json::json!({}))));
    let tasks = fields["tasks"].as_array().unwrap();
    assert_eq!(tasks[0]["state"], "terminated");

    // A terminated task no longer accepts a step.
    let r = commands::dispatch(&mut exec, &mut session, &req("step", serde_json::json!({"pid": pid})));
    let fields = ok_fields(r);
    assert_eq!(fields["outcome"], "killed");
}

#[test]
fn pause_resume_round_trip() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "t1"));
    let pid = load(&mut exec, &mut session, &image(&looping_program()));

    let r = commands::dispatch(&mut exec, &mut session, &req("pause", serde_json::json!({"pid": pid})));
    assert!(matches!(r, hsx_rpc::Response::Ok { .. }));
    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("ps", serde_json::json!({}))));
    assert_eq!(fields["tasks"].as_array().unwrap()[0]["state"], "paused");

    let r = commands::dispatch(&mut exec, &mut session, &req("resume", serde_json::json!({"pid": pid})));
    assert!(matches!(r, hsx_rpc::Response::Ok { .. }));
    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("ps", serde_json::json!({}))));
    assert_eq!(fields["tasks"].as_array().unwrap()[0]["state"], "ready");
}

#[test]
fn kill_reports_killed_without_running_further() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "t1"));
    let pid = load(&mut exec, &mut session, &image(&looping_program()));

    let r = commands::dispatch(&mut exec, &mut session, &req("kill", serde_json::json!({"pid": pid, "reason": "test"})));
    assert!(matches!(r, hsx_rpc::Response::Ok { .. }));
    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("ps", serde_json::json!({}))));
    assert_eq!(fields["tasks"].as_array().unwrap()[0]["state"], "killed");
}

#[test]
fn two_tasks_have_independent_register_state() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "t1"));
    let pid_a = load(&mut exec, &mut session, &image(&looping_program()));
    let pid_b = load(&mut exec, &mut session, &image(&looping_program()));
    assert_ne!(pid_a, pid_b);

    let data = base64::prelude::BASE64_STANDARD.encode([0xAA, 0xBB, 0xCC, 0xDD]);
    let r = commands::dispatch(
        &mut exec,
        &mut session,
        &req("write_mem", serde_json::json!({"pid": pid_a, "addr": 100, "data_b64": data})),
    );
    assert!(matches!(r, hsx_rpc::Response::Ok { .. }));

    let fields = ok_fields(commands::dispatch(
        &mut exec,
        &mut session,
        &req("read_mem", serde_json::json!({"pid": pid_b, "addr": 100, "len": 4})),
    ));
    let bytes = base64::prelude::BASE64_STANDARD.decode(fields["data_b64"].as_str().unwrap()).unwrap();
    assert_eq!(bytes, vec![0, 0, 0, 0], "task b's address space must not see task a's write");
}

#[test]
fn reload_replaces_the_task_under_the_same_priority() {
    let mut exec = Executive::new(ExecutiveConfig::default());
    let mut session = Some(opened(&mut exec, "t1"));
    let pid = load(&mut exec, &mut session, &image(&looping_program()));

    let fields = ok_fields(commands::dispatch(
        &mut exec,
        &mut session,
        &req("reload", serde_json::json!({"pid": pid, "image_b64": base64::prelude::BASE64_STANDARD.encode(image(&exiting_program()))})),
    ));
    let new_pid = fields["pid"].as_u64().unwrap() as u32;

    let fields = ok_fields(commands::dispatch(&mut exec, &mut session, &req("ps", serde_json::json!({}))));
    let tasks = fields["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["pid"].as_u64().unwrap() as u32, new_pid);
}
