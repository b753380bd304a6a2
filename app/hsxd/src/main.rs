// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The HSX runtime daemon: accepts TCP connections, speaks the
//! line-delimited JSON RPC protocol over each one (spec §6), and drives a
//! single shared [`Executive`] from a dedicated clock thread (spec §5).

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use hsx_executive::commands;
use hsx_executive::events::BackpressureConfig;
use hsx_executive::executive::{Executive, ExecutiveConfig};
use hsx_executive::session::SessionLimits;
use hsx_rpc::{Request, Response};
use log::{debug, info, warn};

/// HSX runtime daemon.
#[derive(Parser, Debug)]
#[clap(name = "hsxd", about = "HSX runtime daemon")]
struct Cli {
    /// Address to bind the RPC listener on.
    #[clap(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to bind the RPC listener on.
    #[clap(long, default_value_t = 7780)]
    port: u16,

    /// How often the clock thread re-checks sleeping tasks and mailbox
    /// timeouts once every ready task has been run to quiescence.
    #[clap(long, default_value_t = 5)]
    tick_interval_ms: u64,

    /// Default per-task quantum in executed steps, used by `load`/`reload`.
    #[clap(long, default_value_t = 1000)]
    default_quantum: u32,

    /// Default trace ring capacity for newly attached tasks.
    #[clap(long, default_value_t = 256)]
    trace_capacity: usize,

    /// Global event history retained for `since_seq` replay on subscribe.
    #[clap(long, default_value_t = 4096)]
    event_history_capacity: usize,

    /// Upper bound a session may request for its event queue depth.
    #[clap(long, default_value_t = 4096)]
    session_events_max: usize,

    /// Root directory the `fs.*` RPC surface is rooted at.
    #[clap(long)]
    fs_root: Option<PathBuf>,

    /// How often the event-fanout thread polls for newly queued events.
    #[clap(long, default_value_t = 20)]
    event_poll_interval_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = ExecutiveConfig::default();
    config.trace_default_capacity = cli.trace_capacity;
    config.event_history_capacity = cli.event_history_capacity;
    config.default_quantum = cli.default_quantum;
    config.session_limits = SessionLimits { session_events_max: cli.session_events_max, ..SessionLimits::default() };
    config.backpressure = BackpressureConfig::default();
    if let Some(root) = cli.fs_root {
        config.fs_root = root;
    }

    let exec = Arc::new(Mutex::new(Executive::new(config)));

    let clock_exec = Arc::clone(&exec);
    let tick_interval = Duration::from_millis(cli.tick_interval_ms);
    thread::spawn(move || loop {
        {
            let mut guard = clock_exec.lock().expect("executive mutex poisoned");
            let now = now_ms();
            while guard.tick(now).is_some() {}
        }
        thread::sleep(tick_interval);
    });

    let addr = format!("{}:{}", cli.bind, cli.port);
    let listener = TcpListener::bind(&addr).unwrap_or_else(|e| panic!("failed to bind {addr}: {e}"));
    info!("hsxd listening on {addr}");

    let event_poll_interval = Duration::from_millis(cli.event_poll_interval_ms);
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!("failed to accept connection: {e}");
                continue;
            }
        };
        let exec = Arc::clone(&exec);
        thread::spawn(move || handle_connection(stream, exec, event_poll_interval));
    }
}

/// Services one client connection: reads line-delimited [`Request`]s,
/// dispatches them through [`commands::dispatch`], and writes back
/// [`Response`] lines. A side thread fans out events for any subscriptions
/// this connection opens, so a blocking read on the client's next request
/// never starves event delivery (spec §6 `events.subscribe`).
fn handle_connection(stream: TcpStream, exec: Arc<Mutex<Executive>>, event_poll_interval: Duration) {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".into());
    let reader = match stream.try_clone() {
        Ok(s) => BufReader::new(s),
        Err(e) => {
            warn!("{peer}: failed to clone stream: {e}");
            return;
        }
    };
    let writer = Arc::new(Mutex::new(stream));

    let tokens: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let stop = Arc::new(AtomicBool::new(false));

    let pump_exec = Arc::clone(&exec);
    let pump_writer = Arc::clone(&writer);
    let pump_tokens = Arc::clone(&tokens);
    let pump_stop = Arc::clone(&stop);
    let pump = thread::spawn(move || {
        while !pump_stop.load(Ordering::Relaxed) {
            thread::sleep(event_poll_interval);
            let active: Vec<u64> = pump_tokens.lock().expect("tokens mutex poisoned").clone();
            if active.is_empty() {
                continue;
            }
            let mut lines = Vec::new();
            {
                let mut guard = pump_exec.lock().expect("executive mutex poisoned");
                for token in active {
                    for ev in guard.events.drain_pending(token) {
                        lines.push(serde_json::to_string(&ev).expect("event always serializes"));
                    }
                }
            }
            if lines.is_empty() {
                continue;
            }
            let mut w = pump_writer.lock().expect("writer mutex poisoned");
            for line in lines {
                if writeln!(w, "{line}").is_err() {
                    return;
                }
            }
            let _ = w.flush();
        }
    });

    let mut session_id: Option<String> = None;
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                debug!("{peer}: read error: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(req) => {
                let cmd = req.cmd.clone();
                let resp = {
                    let mut guard = exec.lock().expect("executive mutex poisoned");
                    commands::dispatch(&mut guard, &mut session_id, &req)
                };
                if cmd == "events.subscribe" {
                    track_subscribe_token(&resp, &tokens);
                } else if cmd == "events.unsubscribe" {
                    untrack_token(&req, &tokens);
                }
                resp
            }
            Err(e) => Response::error("malformed_request", e),
        };
        let mut w = writer.lock().expect("writer mutex poisoned");
        if writeln!(w, "{}", response.to_line()).is_err() {
            break;
        }
        if w.flush().is_err() {
            break;
        }
    }

    if let Some(sid) = &session_id {
        let mut guard = exec.lock().expect("executive mutex poisoned");
        guard.events.unsubscribe_session(sid);
        guard.sessions.close(sid);
    }
    stop.store(true, Ordering::Relaxed);
    let _ = pump.join();
    info!("{peer}: connection closed");
}

fn track_subscribe_token(resp: &Response, tokens: &Arc<Mutex<Vec<u64>>>) {
    if let Response::Ok { fields, .. } = resp {
        if let Some(token) = fields.get("token").and_then(|v| v.as_u64()) {
            tokens.lock().expect("tokens mutex poisoned").push(token);
        }
    }
}

fn untrack_token(req: &Request, tokens: &Arc<Mutex<Vec<u64>>>) {
    if let Some(token) = req.args.get("token").and_then(|v| v.as_u64()) {
        tokens.lock().expect("tokens mutex poisoned").retain(|&t| t != token);
    }
}
