// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The line-delimited JSON RPC dispatch surface (spec §6).
//!
//! [`dispatch`] is the single entry point a connection handler calls for
//! every request line it parses. It owns none of the wire I/O: callers
//! decode a [`Request`], hand it here along with the connection's session
//! id (mutated in place across `session.open`/`session.close`), and write
//! back whatever [`Response`] comes out. `events.subscribe` is the one
//! command that changes the shape of the connection afterwards (plain
//! request/response becomes request/ack-then-event-stream); that transition
//! is the caller's job, keyed off seeing this command succeed.

use abi::hxe::AuthLevel;
use abi::mailbox::ModeMask;
use abi::Pid;
use base64::prelude::*;
use hsx_mailbox::HandleId;
use hsx_rpc::{arg_bool_opt, arg_str, arg_u32, arg_u32_opt, Request, Response};
use serde_json::{json, Map, Value};

use crate::debugger::WatchType;
use crate::events::EventFilter;
use crate::executive::Executive;
use crate::session::OpenOutcome;

/// Commands usable before a session has been opened.
const SESSION_EXEMPT: &[&str] = &["session.open"];

pub fn dispatch(exec: &mut Executive, session_id: &mut Option<String>, req: &Request) -> Response {
    if req.version != 1 {
        return Response::error("unsupported", "version");
    }
    let cmd = req.cmd.as_str();
    if !SESSION_EXEMPT.contains(&cmd) && session_id.is_none() {
        return Response::error("session_required", "");
    }

    match cmd {
        "session.open" => session_open(exec, session_id, req),
        "session.keepalive" => session_keepalive(exec, session_id),
        "session.close" => session_close(exec, session_id),

        "load" => load(exec, req),
        "ps" => ps(exec),
        "step" => step(exec, session_id, req),
        "pause" => with_pid(exec, session_id, req, |exec, pid| {
            if exec.pause(pid) { Response::empty_ok() } else { Response::error("unsupported", "") }
        }),
        "resume" => with_pid(exec, session_id, req, |exec, pid| {
            if exec.resume(pid) { Response::empty_ok() } else { Response::error("unsupported", "") }
        }),
        "kill" => kill(exec, session_id, req),
        "reload" => reload(exec, session_id, req),
        "clock" => clock(exec, req),
        "read_mem" => read_mem(exec, session_id, req),
        "write_mem" => write_mem(exec, session_id, req),
        "dumpregs" => with_pid(exec, session_id, req, dumpregs),
        "sched" => sched(exec),
        "attach" => with_pid(exec, session_id, req, |exec, pid| {
            exec.debugger.attach(pid);
            Response::empty_ok()
        }),
        "detach" => with_pid(exec, session_id, req, |exec, pid| {
            exec.debugger.detach(pid);
            Response::empty_ok()
        }),
        "bp" => bp(exec, session_id, req),
        "trace" => trace(exec, session_id, req),
        "disasm" => Response::error("unsupported", "disasm"),
        "stack" => with_pid(exec, session_id, req, stack),
        "symbols" => Response::error("unsupported", "symbols"),
        "sym" => Response::error("unsupported", "sym"),
        "memory" => with_pid(exec, session_id, req, memory_regions),
        "watch" => watch(exec, session_id, req),

        "mailbox_snapshot" => mailbox_snapshot(exec),
        "mailbox_open" => mailbox_open(exec, req),
        "mailbox_close" => mailbox_close(exec, req),
        "mailbox_bind" => mailbox_bind(exec, req),
        "mailbox_send" => mailbox_send(exec, req),
        "mailbox_recv" => mailbox_recv(exec, req),
        "mailbox_peek" => mailbox_peek(exec, req),
        "mailbox_tap" => mailbox_tap(exec, req),
        "stdio_fanout" => stdio_fanout(exec, session_id, req),
        "listen" => mailbox_open_as(exec, req, false),
        "send" => mailbox_send(exec, req),

        "val_get" => val_get(exec, req),
        "val_set" => val_set(exec, req),
        "val_list" => val_list(exec),
        "val_subscribe" => val_subscribe(exec, req),
        "cmd_list" => cmd_list(exec),
        "cmd_help" => cmd_help(exec, req),

        "dmesg" => dmesg(exec, req),
        "restart" => restart(exec, session_id, req),
        "shutdown" => Response::ok(Map::new()),

        "events.subscribe" => events_subscribe(exec, session_id, req),
        "events.ack" => events_ack(exec, req),
        "events.unsubscribe" => events_unsubscribe(exec, req),

        other => Response::error("unknown_cmd", other),
    }
}

fn require_pid(exec: &Executive, session_id: &Option<String>, req: &Request) -> Result<Pid, Response> {
    let pid = arg_u32(&req.args, "pid").map_err(|_| Response::error("error", "pid"))?;
    if exec.tasks.get(pid).is_none() {
        return Err(Response::error("unknown_pid", pid));
    }
    let sid = session_id.as_deref().unwrap_or("");
    if !exec.sessions.can_access(sid, pid) {
        return Err(Response::error("pid_locked", pid));
    }
    Ok(pid)
}

fn with_pid(
    exec: &mut Executive,
    session_id: &Option<String>,
    req: &Request,
    f: impl FnOnce(&mut Executive, Pid) -> Response,
) -> Response {
    match require_pid(exec, session_id, req) {
        Ok(pid) => f(exec, pid),
        Err(resp) => resp,
    }
}

fn session_open(exec: &mut Executive, session_id: &mut Option<String>, req: &Request) -> Response {
    let client = arg_str(&req.args, "client").unwrap_or("anonymous");
    let capabilities: Vec<String> = req
        .args
        .get("capabilities")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let pid_lock: Vec<u32> = req
        .args
        .get("pid_lock")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_u64).map(|v| v as u32).collect())
        .unwrap_or_default();
    let heartbeat_s = arg_u32_opt(&req.args, "heartbeat_s").ok().flatten().unwrap_or(30);
    let max_events = arg_u32_opt(&req.args, "max_events").ok().flatten().unwrap_or(64) as usize;

    match exec.sessions.open(client, &capabilities, max_events, heartbeat_s, &pid_lock) {
        OpenOutcome::Ok { session_id: id, params, warnings } => {
            *session_id = Some(id.clone());
            let mut fields = Map::new();
            fields.insert("session_id".into(), json!(id));
            fields.insert("max_events".into(), json!(params.max_events));
            fields.insert("heartbeat_s".into(), json!(params.heartbeat_s));
            fields.insert("warnings".into(), json!(warnings));
            fields.insert("features".into(), json!(crate::session::SUPPORTED_FEATURES));
            Response::ok(fields)
        }
        OpenOutcome::PidLocked(pid) => Response::error("pid_locked", pid),
    }
}

fn session_keepalive(exec: &mut Executive, session_id: &Option<String>) -> Response {
    let Some(id) = session_id.as_deref() else { return Response::error("session_required", "") };
    if exec.sessions.keepalive(id) { Response::empty_ok() } else { Response::error("session_required", "") }
}

fn session_close(exec: &mut Executive, session_id: &mut Option<String>) -> Response {
    let Some(id) = session_id.take() else { return Response::error("session_required", "") };
    exec.sessions.close(&id);
    exec.events.unsubscribe_session(&id);
    Response::empty_ok()
}

fn load(exec: &mut Executive, req: &Request) -> Response {
    let Ok(image_b64) = arg_str(&req.args, "image_b64") else { return Response::error("error", "image_b64") };
    let bytes = match BASE64_STANDARD.decode(image_b64) {
        Ok(b) => b,
        Err(_) => return Response::error("error", "image_b64"),
    };
    let priority = arg_u32_opt(&req.args, "priority").ok().flatten().unwrap_or(1) as u8;
    match exec.load(&bytes, priority) {
        Ok(pid) => {
            let mut fields = Map::new();
            fields.insert("pid".into(), json!(pid));
            Response::ok(fields)
        }
        Err(crate::executive::LoadError::Image(e)) => Response::error(e.category(), ""),
        Err(crate::executive::LoadError::AppAlreadyRunning(name)) => Response::error("app_exists", name),
    }
}

fn ps(exec: &Executive) -> Response {
    let mut tasks: Vec<Value> = exec
        .tasks
        .iter()
        .map(|(&pid, t)| {
            json!({
                "pid": pid,
                "state": crate::executive::task_state_label(t.ctx.state),
                "app_name": t.app_name,
                "priority": t.ctx.priority,
                "attached": exec.debugger.is_attached(pid),
            })
        })
        .collect();
    tasks.sort_by_key(|v| v["pid"].as_u64().unwrap_or(0));
    let mut fields = Map::new();
    fields.insert("tasks".into(), json!(tasks));
    Response::ok(fields)
}

fn step(exec: &mut Executive, session_id: &Option<String>, req: &Request) -> Response {
    let pid = match require_pid(exec, session_id, req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let count = arg_u32_opt(&req.args, "count").ok().flatten().unwrap_or(1).max(1);
    let now_ms = arg_u32_opt(&req.args, "now_ms").ok().flatten().unwrap_or(0) as u64;

    let mut executed = 0u32;
    let mut last = None;
    for _ in 0..count {
        match exec.run_one_step(pid, now_ms) {
            Some(outcome) => {
                executed += 1;
                let stop = !matches!(outcome, crate::executive::StepOutcome::Continue);
                last = Some(outcome);
                if stop {
                    break;
                }
            }
            None => break,
        }
    }

    let mut fields = Map::new();
    fields.insert("pid".into(), json!(pid));
    fields.insert("steps_executed".into(), json!(executed));
    fields.insert("outcome".into(), json!(last.as_ref().map(step_outcome_label).unwrap_or("none")));
    if let Some(crate::executive::StepOutcome::Faulted(fault)) = &last {
        fields.insert("fault".into(), json!(fault.category()));
    }
    Response::ok(fields)
}

fn step_outcome_label(o: &crate::executive::StepOutcome) -> &'static str {
    use crate::executive::StepOutcome::*;
    match o {
        Continue => "continue",
        BreakpointHit => "breakpoint",
        Paused => "paused",
        Blocked => "blocked",
        Slept { .. } => "slept",
        Exited { .. } => "exited",
        Killed => "killed",
        Faulted(_) => "faulted",
    }
}

fn kill(exec: &mut Executive, session_id: &Option<String>, req: &Request) -> Response {
    let pid = match require_pid(exec, session_id, req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let reason = arg_str(&req.args, "reason").unwrap_or("rpc_kill").to_string();
    exec.kill(pid, &reason);
    Response::empty_ok()
}

fn reload(exec: &mut Executive, session_id: &Option<String>, req: &Request) -> Response {
    let pid = match require_pid(exec, session_id, req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let Ok(image_b64) = arg_str(&req.args, "image_b64") else { return Response::error("error", "image_b64") };
    let bytes = match BASE64_STANDARD.decode(image_b64) {
        Ok(b) => b,
        Err(_) => return Response::error("error", "image_b64"),
    };
    let priority = exec.tasks.get(pid).map(|t| t.ctx.priority).unwrap_or(1);
    exec.kill(pid, "reload");
    match exec.load(&bytes, priority) {
        Ok(new_pid) => {
            let mut fields = Map::new();
            fields.insert("pid".into(), json!(new_pid));
            Response::ok(fields)
        }
        Err(crate::executive::LoadError::Image(e)) => Response::error(e.category(), ""),
        Err(crate::executive::LoadError::AppAlreadyRunning(name)) => Response::error("app_exists", name),
    }
}

fn clock(exec: &mut Executive, req: &Request) -> Response {
    let Ok(now_ms) = arg_u32(&req.args, "now_ms") else { return Response::error("error", "now_ms") };
    exec.advance_clock(now_ms as u64);
    let mut fields = Map::new();
    fields.insert("now_ms".into(), json!(now_ms));
    Response::ok(fields)
}

fn read_mem(exec: &mut Executive, session_id: &Option<String>, req: &Request) -> Response {
    let pid = match require_pid(exec, session_id, req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let Ok(addr) = arg_u32(&req.args, "addr") else { return Response::error("error", "addr") };
    let Ok(len) = arg_u32(&req.args, "len") else { return Response::error("error", "len") };
    let task = exec.tasks.get(pid).expect("checked by require_pid");
    match task.ctx.memory.slice(addr, len) {
        Ok(bytes) => {
            let mut fields = Map::new();
            fields.insert("addr".into(), json!(addr));
            fields.insert("data_b64".into(), json!(BASE64_STANDARD.encode(bytes)));
            Response::ok(fields)
        }
        Err(fault) => Response::error(fault.category(), ""),
    }
}

fn write_mem(exec: &mut Executive, session_id: &Option<String>, req: &Request) -> Response {
    let pid = match require_pid(exec, session_id, req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let Ok(addr) = arg_u32(&req.args, "addr") else { return Response::error("error", "addr") };
    let Ok(data_b64) = arg_str(&req.args, "data_b64") else { return Response::error("error", "data_b64") };
    let Ok(data) = BASE64_STANDARD.decode(data_b64) else { return Response::error("error", "data_b64") };
    let task = exec.tasks.get_mut(pid).expect("checked by require_pid");
    match task.ctx.memory.write_slice(addr, &data) {
        Ok(()) => Response::empty_ok(),
        Err(fault) => Response::error(fault.category(), ""),
    }
}

fn dumpregs(exec: &mut Executive, pid: Pid) -> Response {
    let task = exec.tasks.get(pid).expect("checked by require_pid");
    let ctx = &task.ctx;
    let mut fields = Map::new();
    fields.insert("pid".into(), json!(pid));
    fields.insert("regs".into(), json!(ctx.regs));
    fields.insert("pc".into(), json!(ctx.pc));
    fields.insert("sp".into(), json!(ctx.sp));
    fields.insert("psw".into(), json!(ctx.psw.bits()));
    fields.insert("state".into(), json!(crate::executive::task_state_label(ctx.state)));
    fields.insert("quantum".into(), json!(ctx.quantum));
    fields.insert("accounted_steps".into(), json!(ctx.accounted_steps));
    Response::ok(fields)
}

fn sched(exec: &Executive) -> Response {
    let mut fields = Map::new();
    fields.insert("running".into(), json!(exec.scheduler.running()));
    fields.insert("ready_len".into(), json!(exec.scheduler.ready_len()));
    fields.insert("next_deadline_ms".into(), json!(exec.scheduler.next_deadline()));
    Response::ok(fields)
}

fn bp(exec: &mut Executive, session_id: &Option<String>, req: &Request) -> Response {
    let pid = match require_pid(exec, session_id, req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let action = arg_str(&req.args, "action").unwrap_or("list");
    match action {
        "add" => {
            let Ok(addr) = arg_u32(&req.args, "addr") else { return Response::error("error", "addr") };
            exec.debugger.add_breakpoint(pid, addr);
            Response::empty_ok()
        }
        "clear" => {
            let Ok(addr) = arg_u32(&req.args, "addr") else { return Response::error("error", "addr") };
            exec.debugger.clear_breakpoint(pid, addr);
            Response::empty_ok()
        }
        "clear_all" => {
            exec.debugger.clear_all_breakpoints(pid);
            Response::empty_ok()
        }
        "list" => {
            let mut fields = Map::new();
            fields.insert("breakpoints".into(), json!(exec.debugger.list_breakpoints(pid)));
            Response::ok(fields)
        }
        other => Response::error("unsupported", other),
    }
}

fn trace(exec: &mut Executive, session_id: &Option<String>, req: &Request) -> Response {
    let pid = match require_pid(exec, session_id, req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let action = arg_str(&req.args, "action").unwrap_or("config");
    match action {
        "control" => {
            let enabled = arg_bool_opt(&req.args, "enabled", true).unwrap_or(true);
            exec.debugger.trace_ring(pid).set_enabled(enabled);
            Response::empty_ok()
        }
        "config" => {
            let capacity = arg_u32_opt(&req.args, "capacity").ok().flatten();
            if let Some(cap) = capacity {
                exec.debugger.trace_ring(pid).set_capacity(cap as usize);
            }
            let ring = exec.debugger.trace_ring(pid);
            let mut fields = Map::new();
            fields.insert("capacity".into(), json!(ring.capacity()));
            fields.insert("enabled".into(), json!(ring.enabled()));
            fields.insert("len".into(), json!(ring.len()));
            Response::ok(fields)
        }
        "records" => {
            let ring = exec.debugger.trace_ring(pid);
            let records: Vec<&crate::debugger::TraceRecord> = ring.records().collect();
            let mut fields = Map::new();
            fields.insert("format".into(), json!("hsx.trace/1"));
            fields.insert("count".into(), json!(records.len()));
            fields.insert("records".into(), json!(records));
            Response::ok(fields)
        }
        "export" => {
            let ring = exec.debugger.trace_ring(pid);
            let records: Vec<&crate::debugger::TraceRecord> = ring.records().collect();
            let mut fields = Map::new();
            fields.insert("format".into(), json!("hsx.trace/1"));
            fields.insert("count".into(), json!(records.len()));
            fields.insert("capacity".into(), json!(ring.capacity()));
            fields.insert("records".into(), json!(records));
            Response::ok(fields)
        }
        "import" => {
            let replace = arg_bool_opt(&req.args, "replace", false).unwrap_or(false);
            let Some(records) = req.args.get("records").cloned() else {
                return Response::error("error", "records");
            };
            let records: Vec<crate::debugger::TraceRecord> = match serde_json::from_value(records) {
                Ok(r) => r,
                Err(_) => return Response::error("error", "records"),
            };
            exec.debugger.trace_ring(pid).import(records, replace);
            Response::empty_ok()
        }
        other => Response::error("unsupported", other),
    }
}

fn stack(exec: &mut Executive, pid: Pid) -> Response {
    let task = exec.tasks.get(pid).expect("checked by require_pid");
    let ctx = &task.ctx;
    let mut fields = Map::new();
    fields.insert("pid".into(), json!(pid));
    fields.insert("sp".into(), json!(ctx.sp));
    fields.insert("stack_base".into(), json!(ctx.stack_base));
    fields.insert("stack_limit".into(), json!(ctx.stack_limit));
    // `CALL`/`RET` push return addresses onto a dedicated host-side stack
    // rather than a frame-pointer chain in task memory, so the call stack
    // itself is the return-address backtrace; no memory walk is needed.
    fields.insert("frames".into(), json!(ctx.call_stack));
    Response::ok(fields)
}

fn memory_regions(exec: &mut Executive, pid: Pid) -> Response {
    let task = exec.tasks.get(pid).expect("checked by require_pid");
    let ctx = &task.ctx;
    let static_end = ctx.stack_limit.unwrap_or(0);
    let mut fields = Map::new();
    fields.insert(
        "regions".into(),
        json!([
            {"name": "code_rodata_bss", "start": 0, "end": static_end},
            {"name": "stack", "start": static_end, "end": abi::ADDRESS_SPACE_SIZE as u32},
        ]),
    );
    Response::ok(fields)
}

fn watch(exec: &mut Executive, session_id: &Option<String>, req: &Request) -> Response {
    let pid = match require_pid(exec, session_id, req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let action = arg_str(&req.args, "action").unwrap_or("list");
    match action {
        "add" => {
            let Ok(addr) = arg_u32(&req.args, "addr") else { return Response::error("error", "addr") };
            let length = arg_u32_opt(&req.args, "length").ok().flatten().unwrap_or(4);
            let kind = match arg_str(&req.args, "kind").unwrap_or("u32") {
                "u8" => WatchType::U8,
                "u16" => WatchType::U16,
                "bytes" => WatchType::Bytes,
                _ => WatchType::U32,
            };
            let initial = exec.tasks.get(pid).and_then(|t| t.ctx.memory.slice(addr, length).ok()).unwrap_or_default();
            let id = exec.debugger.add_watch(pid, addr, length, kind, initial);
            let mut fields = Map::new();
            fields.insert("id".into(), json!(id));
            Response::ok(fields)
        }
        "remove" => {
            let Ok(id) = arg_u32(&req.args, "id") else { return Response::error("error", "id") };
            exec.debugger.remove_watch(id as u64);
            Response::empty_ok()
        }
        "list" => {
            let watches: Vec<Value> = exec
                .debugger
                .list_watches(pid)
                .map(|w| json!({"id": w.id, "addr": w.address, "length": w.length}))
                .collect();
            let mut fields = Map::new();
            fields.insert("watches".into(), json!(watches));
            Response::ok(fields)
        }
        other => Response::error("unsupported", other),
    }
}

fn mailbox_snapshot(exec: &Executive) -> Response {
    let stats = exec.mailboxes.stats();
    let mut fields = Map::new();
    fields.insert("max_descriptors".into(), json!(stats.max_descriptors));
    fields.insert("active_descriptors".into(), json!(stats.active_descriptors));
    fields.insert("free_descriptors".into(), json!(stats.free_descriptors));
    fields.insert("bytes_used_total".into(), json!(stats.bytes_used_total));
    fields.insert("queue_depth_total".into(), json!(stats.queue_depth_total));
    fields.insert("handle_count".into(), json!(stats.handle_count));
    fields.insert("overruns".into(), json!(stats.overruns));
    fields.insert("descriptor_exhaustion".into(), json!(stats.descriptor_exhaustion));
    Response::ok(fields)
}

/// The `pid` an RPC-side mailbox handle is opened under. RPC clients are not
/// themselves tasks, but every handle needs an owning PID for bookkeeping;
/// `0` is never allocated to a real task (`TaskTable::alloc_pid` starts at
/// 1), so it is reserved for RPC-opened handles.
const RPC_PID: Pid = 0;

fn mailbox_open_as(exec: &mut Executive, req: &Request, as_sender: bool) -> Response {
    let Ok(name) = arg_str(&req.args, "name") else { return Response::error("error", "name") };
    let caller = arg_u32_opt(&req.args, "pid").ok().flatten().unwrap_or(RPC_PID);
    let target = match exec.mailboxes.resolve(name, caller) {
        Ok(t) => t,
        Err(_) => return Response::error("error", "name"),
    };
    match exec.mailboxes.open(RPC_PID, target.namespace, &target.name, target.owner, as_sender) {
        Ok(handle) => {
            let mut fields = Map::new();
            fields.insert("handle".into(), json!(handle.0));
            Response::ok(fields)
        }
        Err(status) => Response::error(status.category(), ""),
    }
}

fn mailbox_open(exec: &mut Executive, req: &Request) -> Response {
    let as_sender = arg_bool_opt(&req.args, "as_sender", false).unwrap_or(false);
    mailbox_open_as(exec, req, as_sender)
}

fn mailbox_close(exec: &mut Executive, req: &Request) -> Response {
    let Ok(handle) = arg_u32(&req.args, "handle") else { return Response::error("error", "handle") };
    match exec.mailboxes.close(HandleId(handle as u64)) {
        Ok(()) => Response::empty_ok(),
        Err(status) => Response::error(status.category(), ""),
    }
}

fn mailbox_bind(exec: &mut Executive, req: &Request) -> Response {
    let Ok(name) = arg_str(&req.args, "name") else { return Response::error("error", "name") };
    let caller = arg_u32_opt(&req.args, "pid").ok().flatten().unwrap_or(RPC_PID);
    let capacity = arg_u32_opt(&req.args, "capacity").ok().flatten();
    let mode_mask = arg_u32_opt(&req.args, "mode_mask")
        .ok()
        .flatten()
        .map(|m| ModeMask::from_bits_truncate(m as u8));
    let target = match exec.mailboxes.resolve(name, caller) {
        Ok(t) => t,
        Err(_) => return Response::error("error", "name"),
    };
    match exec.mailboxes.bind(target.namespace, &target.name, target.owner, capacity, mode_mask) {
        Ok(id) => {
            let mut fields = Map::new();
            fields.insert("descriptor".into(), json!(id.0));
            Response::ok(fields)
        }
        Err(status) => Response::error(status.category(), ""),
    }
}

fn mailbox_send(exec: &mut Executive, req: &Request) -> Response {
    let Ok(handle) = arg_u32(&req.args, "handle") else { return Response::error("error", "handle") };
    let Ok(payload_b64) = arg_str(&req.args, "payload_b64") else {
        return Response::error("error", "payload_b64");
    };
    let Ok(payload) = BASE64_STANDARD.decode(payload_b64) else {
        return Response::error("error", "payload_b64");
    };
    let channel = arg_u32_opt(&req.args, "channel").ok().flatten().unwrap_or(0) as u16;
    let src_pid = arg_u32_opt(&req.args, "pid").ok().flatten().unwrap_or(RPC_PID);
    match exec.mailboxes.send(HandleId(handle as u64), src_pid, &payload, 0, channel) {
        Ok(outcome) => {
            let wake = outcome.to_wake.clone();
            exec.deliver_wakes(wake);
            let mut fields = Map::new();
            fields.insert("enqueued".into(), json!(outcome.enqueued));
            Response::ok(fields)
        }
        Err(status) => Response::error(status.category(), ""),
    }
}

fn mailbox_recv(exec: &mut Executive, req: &Request) -> Response {
    let Ok(handle) = arg_u32(&req.args, "handle") else { return Response::error("error", "handle") };
    match exec.mailboxes.recv(HandleId(handle as u64), false) {
        Ok(outcome) => match outcome.message {
            Some(msg) => {
                let mut fields = Map::new();
                fields.insert("payload_b64".into(), json!(BASE64_STANDARD.encode(&msg.payload)));
                fields.insert("flags".into(), json!(msg.flags));
                fields.insert("channel".into(), json!(msg.channel));
                fields.insert("src_pid".into(), json!(msg.src_pid));
                fields.insert("seq_no".into(), json!(msg.seq_no));
                Response::ok(fields)
            }
            None => Response::error(outcome.status.category(), ""),
        },
        Err(status) => Response::error(status.category(), ""),
    }
}

fn mailbox_peek(exec: &mut Executive, req: &Request) -> Response {
    let Ok(handle) = arg_u32(&req.args, "handle") else { return Response::error("error", "handle") };
    match exec.mailboxes.peek(HandleId(handle as u64)) {
        Ok(info) => {
            let mut fields = Map::new();
            fields.insert("depth".into(), json!(info.depth));
            fields.insert("bytes_used".into(), json!(info.bytes_used));
            fields.insert("capacity".into(), json!(info.capacity));
            fields.insert("next_len".into(), json!(info.next_len));
            fields.insert("head_seq".into(), json!(info.head_seq));
            fields.insert("next_seq".into(), json!(info.next_seq));
            Response::ok(fields)
        }
        Err(status) => Response::error(status.category(), ""),
    }
}

fn mailbox_tap(exec: &mut Executive, req: &Request) -> Response {
    let Ok(handle) = arg_u32(&req.args, "handle") else { return Response::error("error", "handle") };
    let enable = arg_bool_opt(&req.args, "enable", true).unwrap_or(true);
    match exec.mailboxes.tap(HandleId(handle as u64), enable) {
        Ok(()) => Response::empty_ok(),
        Err(status) => Response::error(status.category(), ""),
    }
}

/// Opens a fanout-drop reader against a task's stdio mailbox and tees its
/// traffic to the session's event stream as `stdio` events, so a console
/// client can watch a task's output without polling `dmesg` (spec §4.3,
/// §4.7). Implemented as a `TAP` registration against `svc:stdout@<pid>`.
fn stdio_fanout(exec: &mut Executive, session_id: &Option<String>, req: &Request) -> Response {
    let pid = match require_pid(exec, session_id, req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let target = match exec.mailboxes.resolve("svc:stdout", pid) {
        Ok(t) => t,
        Err(_) => return Response::error("error", "name"),
    };
    let mode = ModeMask::RDWR | ModeMask::FANOUT | ModeMask::FANOUT_DROP;
    if let Err(status) = exec.mailboxes.bind(target.namespace, &target.name, target.owner, None, Some(mode)) {
        return Response::error(status.category(), "");
    }
    match exec.mailboxes.open(RPC_PID, target.namespace, &target.name, target.owner, false) {
        Ok(handle) => {
            let mut fields = Map::new();
            fields.insert("handle".into(), json!(handle.0));
            Response::ok(fields)
        }
        Err(status) => Response::error(status.category(), ""),
    }
}

fn val_get(exec: &Executive, req: &Request) -> Response {
    let Ok(name) = arg_str(&req.args, "name") else { return Response::error("error", "name") };
    match exec.registry.get_value(name) {
        Ok(v) => {
            let mut fields = Map::new();
            fields.insert("value".into(), json!(v));
            Response::ok(fields)
        }
        Err(_) => Response::error("error", "not_found"),
    }
}

fn val_set(exec: &mut Executive, req: &Request) -> Response {
    let Ok(name) = arg_str(&req.args, "name") else { return Response::error("error", "name") };
    let Ok(value) = arg_u32(&req.args, "value") else { return Response::error("error", "value") };
    let auth = match arg_str(&req.args, "auth_level").unwrap_or("admin") {
        "public" => AuthLevel::Public,
        "operator" => AuthLevel::Operator,
        _ => AuthLevel::Admin,
    };
    match exec.registry.set_value(name, value as i32, auth) {
        Ok(()) => Response::empty_ok(),
        Err(crate::registry::RegistryError::AuthDenied) => Response::error("error", "auth_denied"),
        Err(_) => Response::error("error", "not_found"),
    }
}

fn val_list(exec: &Executive) -> Response {
    let values: Vec<Value> = exec
        .registry
        .list_values()
        .iter()
        .map(|v| json!({"name": v.name, "value": v.value, "unit": v.unit, "owner_pid": v.owner_pid}))
        .collect();
    let mut fields = Map::new();
    fields.insert("values".into(), json!(values));
    Response::ok(fields)
}

fn val_subscribe(exec: &mut Executive, req: &Request) -> Response {
    let Ok(name) = arg_str(&req.args, "name") else { return Response::error("error", "name") };
    let subscriber = arg_u32_opt(&req.args, "pid").ok().flatten().unwrap_or(RPC_PID);
    match exec.registry.subscribe_value(name, subscriber) {
        Ok(()) => Response::empty_ok(),
        Err(_) => Response::error("error", "not_found"),
    }
}

fn cmd_list(exec: &Executive) -> Response {
    let commands: Vec<Value> = exec
        .registry
        .list_commands()
        .iter()
        .map(|c| json!({"name": c.name, "help": c.help, "owner_pid": c.owner_pid}))
        .collect();
    let mut fields = Map::new();
    fields.insert("commands".into(), json!(commands));
    Response::ok(fields)
}

fn cmd_help(exec: &Executive, req: &Request) -> Response {
    let Ok(name) = arg_str(&req.args, "name") else { return Response::error("error", "name") };
    match exec.registry.help(name) {
        Ok(help) => {
            let mut fields = Map::new();
            fields.insert("help".into(), json!(help));
            Response::ok(fields)
        }
        Err(_) => Response::error("error", "not_found"),
    }
}

fn dmesg(exec: &Executive, req: &Request) -> Response {
    let limit = arg_u32_opt(&req.args, "limit").ok().flatten().unwrap_or(u32::MAX) as usize;
    let lines: Vec<&str> = exec.dmesg().collect();
    let start = lines.len().saturating_sub(limit);
    let mut fields = Map::new();
    fields.insert("lines".into(), json!(lines[start..]));
    Response::ok(fields)
}

fn restart(exec: &mut Executive, session_id: &Option<String>, req: &Request) -> Response {
    let pid = match require_pid(exec, session_id, req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    exec.kill(pid, "restart");
    Response::empty_ok()
}

fn events_subscribe(exec: &mut Executive, session_id: &Option<String>, req: &Request) -> Response {
    let Some(sid) = session_id.clone() else { return Response::error("session_required", "") };
    let pids: Option<std::collections::HashSet<u32>> = req
        .args
        .get("pids")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_u64).map(|v| v as u32).collect());
    let categories: Option<std::collections::HashSet<String>> = req
        .args
        .get("categories")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect());
    let max_events = arg_u32_opt(&req.args, "max_events").ok().flatten().unwrap_or(64) as usize;
    let since_seq = arg_u32_opt(&req.args, "since_seq").ok().flatten().map(|v| v as u64);

    let filter = EventFilter { pids, categories };
    let token = exec.events.subscribe(&sid, filter, max_events, since_seq);
    let mut fields = Map::new();
    fields.insert("token".into(), json!(token));
    Response::ok(fields)
}

fn events_ack(exec: &mut Executive, req: &Request) -> Response {
    let Some(token) = req.args.get("token").and_then(Value::as_u64) else {
        return Response::error("error", "token");
    };
    let Ok(seq) = arg_u32(&req.args, "seq") else { return Response::error("error", "seq") };
    match exec.events.subscription_mut(token) {
        Some(sub) => {
            sub.ack(seq as u64);
            Response::empty_ok()
        }
        None => Response::error("error", "unknown_token"),
    }
}

fn events_unsubscribe(exec: &mut Executive, req: &Request) -> Response {
    let Some(token) = req.args.get("token").and_then(Value::as_u64) else {
        return Response::error("error", "token");
    };
    exec.events.unsubscribe(token);
    Response::empty_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executive::ExecutiveConfig;
    use byteorder::{BigEndian, ByteOrder};
    use serde_json::Map as JsonMap;

    fn req(cmd: &str, args: Value) -> Request {
        let mut map = args.as_object().cloned().unwrap_or_default();
        map.remove("cmd");
        map.remove("version");
        Request { version: 1, cmd: cmd.to_string(), args: map }
    }

    fn minimal_image() -> Vec<u8> {
        let code = [0x30u8, 0, 0, 0];
        let mut buf = vec![0u8; 36];
        BigEndian::write_u32(&mut buf[0..4], abi::hxe::MAGIC);
        BigEndian::write_u16(&mut buf[4..6], 1);
        BigEndian::write_u32(&mut buf[12..16], code.len() as u32);
        buf.extend_from_slice(&code);
        const CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
        let sum = CRC.checksum(&buf);
        BigEndian::write_u32(&mut buf[28..32], sum);
        buf
    }

    fn opened(exec: &mut Executive) -> String {
        let r = dispatch(exec, &mut None, &req("session.open", json!({"client": "test"})));
        match r {
            Response::Ok { fields, .. } => fields["session_id"].as_str().unwrap().to_string(),
            Response::Error { .. } => panic!("session.open failed"),
        }
    }

    #[test]
    fn commands_before_session_open_require_session() {
        let mut exec = Executive::new(ExecutiveConfig::default());
        let r = dispatch(&mut exec, &mut None, &req("ps", json!({})));
        assert!(matches!(r, Response::Error { ref error, .. } if error == "session_required"));
    }

    #[test]
    fn unknown_command_reports_category() {
        let mut exec = Executive::new(ExecutiveConfig::default());
        let mut session = Some(opened(&mut exec));
        let r = dispatch(&mut exec, &mut session, &req("frobnicate", json!({})));
        assert!(matches!(r, Response::Error { ref error, .. } if error == "unknown_cmd:frobnicate"));
    }

    #[test]
    fn load_then_ps_reports_the_new_task() {
        let mut exec = Executive::new(ExecutiveConfig::default());
        let mut session = Some(opened(&mut exec));
        let image_b64 = BASE64_STANDARD.encode(minimal_image());
        let r = dispatch(&mut exec, &mut session, &req("load", json!({"image_b64": image_b64})));
        let pid = match r {
            Response::Ok { fields, .. } => fields["pid"].as_u64().unwrap(),
            Response::Error { error, .. } => panic!("load failed: {error}"),
        };

        let r = dispatch(&mut exec, &mut session, &req("ps", json!({})));
        match r {
            Response::Ok { fields, .. } => {
                let tasks = fields["tasks"].as_array().unwrap();
                assert_eq!(tasks.len(), 1);
                assert_eq!(tasks[0]["pid"].as_u64().unwrap(), pid);
            }
            Response::Error { .. } => panic!("ps failed"),
        }
    }

    #[test]
    fn step_on_unknown_pid_is_unknown_pid() {
        let mut exec = Executive::new(ExecutiveConfig::default());
        let mut session = Some(opened(&mut exec));
        let r = dispatch(&mut exec, &mut session, &req("step", json!({"pid": 99})));
        assert!(matches!(r, Response::Error { ref error, .. } if error == "unknown_pid:99"));
    }

    #[test]
    fn pid_locked_by_another_session_is_rejected() {
        let mut exec = Executive::new(ExecutiveConfig::default());
        let mut session_a = Some(opened(&mut exec));
        let image_b64 = BASE64_STANDARD.encode(minimal_image());
        let r = dispatch(&mut exec, &mut session_a, &req("load", json!({"image_b64": image_b64})));
        let pid = match r {
            Response::Ok { fields, .. } => fields["pid"].as_u64().unwrap() as u32,
            Response::Error { error, .. } => panic!("load failed: {error}"),
        };

        let r = dispatch(
            &mut exec,
            &mut None,
            &req("session.open", json!({"client": "other", "pid_lock": [pid]})),
        );
        let mut session_b = match r {
            Response::Ok { fields, .. } => Some(fields["session_id"].as_str().unwrap().to_string()),
            Response::Error { .. } => panic!("session.open failed"),
        };

        let r = dispatch(&mut exec, &mut session_a, &req("pause", json!({"pid": pid})));
        assert!(matches!(r, Response::Error { ref error, .. } if error == &format!("pid_locked:{pid}")));

        let r = dispatch(&mut exec, &mut session_b, &req("pause", json!({"pid": pid})));
        assert!(matches!(r, Response::Ok { .. }));
    }

    #[test]
    fn disasm_and_symbols_are_reported_unsupported() {
        let mut exec = Executive::new(ExecutiveConfig::default());
        let mut session = Some(opened(&mut exec));
        let r = dispatch(&mut exec, &mut session, &req("disasm", json!({})));
        assert!(matches!(r, Response::Error { ref error, .. } if error == "unsupported:disasm"));
        let r = dispatch(&mut exec, &mut session, &req("symbols", json!({})));
        assert!(matches!(r, Response::Error { ref error, .. } if error == "unsupported:symbols"));
    }

    #[test]
    fn mailbox_send_and_recv_round_trip_over_rpc() {
        let mut exec = Executive::new(ExecutiveConfig::default());
        let mut session = Some(opened(&mut exec));
        let r = dispatch(&mut exec, &mut session, &req("mailbox_open", json!({"name": "shared:test", "as_sender": true})));
        let sender = match r {
            Response::Ok { fields, .. } => fields["handle"].as_u64().unwrap(),
            Response::Error { error, .. } => panic!("open failed: {error}"),
        };
        let r = dispatch(&mut exec, &mut session, &req("mailbox_open", json!({"name": "shared:test"})));
        let receiver = match r {
            Response::Ok { fields, .. } => fields["handle"].as_u64().unwrap(),
            Response::Error { error, .. } => panic!("open failed: {error}"),
        };

        let payload = BASE64_STANDARD.encode(b"hello");
        let r = dispatch(&mut exec, &mut session, &req("mailbox_send", json!({"handle": sender, "payload_b64": payload})));
        assert!(matches!(r, Response::Ok { .. }));

        let r = dispatch(&mut exec, &mut session, &req("mailbox_recv", json!({"handle": receiver})));
        match r {
            Response::Ok { fields, .. } => {
                let data = BASE64_STANDARD.decode(fields["payload_b64"].as_str().unwrap()).unwrap();
                assert_eq!(data, b"hello");
            }
            Response::Error { error, .. } => panic!("recv failed: {error}"),
        }
        let _ = JsonMap::new();
    }
}
