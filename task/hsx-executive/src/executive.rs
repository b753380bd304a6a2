// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The executive: wires the task table, scheduler, mailbox manager,
//! debugger, event bus, session table, and value/command registry into one
//! stepping engine (spec §3, §4, §5).

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use abi::mailbox::ModeMask;
use abi::{Pid, TaskState, ADDRESS_SPACE_SIZE};
use hsx_mailbox::{HandleId, MailboxManager};
use kern::{StepEvent, TaskContext};
use serde_json::json;

use crate::debugger::{Debugger, TraceRecord};
use crate::events::{BackpressureConfig, EventBus};
use crate::fs::FsHost;
use crate::registry::{CommandEntry, Registry, ValueEntry};
use crate::scheduler::Scheduler;
use crate::session::{SessionLimits, SessionTable};
use crate::task_table::{MailboxWait, Task, TaskTable};

#[derive(Clone, Debug)]
pub struct ExecutiveConfig {
    pub max_descriptors: usize,
    pub trace_default_capacity: usize,
    pub backpressure: BackpressureConfig,
    pub session_limits: SessionLimits,
    pub event_history_capacity: usize,
    pub fs_root: PathBuf,
    pub dmesg_capacity: usize,
    pub default_quantum: u32,
}

impl Default for ExecutiveConfig {
    fn default() -> Self {
        Self {
            max_descriptors: 256,
            trace_default_capacity: 256,
            backpressure: BackpressureConfig::default(),
            session_limits: SessionLimits::default(),
            event_history_capacity: 4096,
            fs_root: std::env::temp_dir().join("hsxd"),
            dmesg_capacity: 1024,
            default_quantum: 1000,
        }
    }
}

#[derive(Clone, Debug)]
pub enum LoadError {
    Image(hsx_image::ImageError),
    AppAlreadyRunning(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Image(e) => write!(f, "{e}"),
            LoadError::AppAlreadyRunning(name) => write!(f, "app_exists:{name}"),
        }
    }
}

/// What happened the last time [`Executive::run_one_step`] ran a task.
#[derive(Debug)]
pub enum StepOutcome {
    Continue,
    BreakpointHit,
    Paused,
    Blocked,
    Slept { until_ms: u64 },
    Exited { status: i32 },
    Killed,
    Faulted(abi::VmFault),
}

pub struct Executive {
    pub tasks: TaskTable,
    pub scheduler: Scheduler,
    pub mailboxes: MailboxManager,
    pub debugger: Debugger,
    pub events: EventBus,
    pub sessions: SessionTable,
    pub registry: Registry,
    pub fs: FsHost,
    pub(crate) pending_recv: HashMap<Pid, (u64, u32, u32)>,
    dmesg: VecDeque<String>,
    dmesg_capacity: usize,
    default_quantum: u32,
}

impl Executive {
    pub fn new(config: ExecutiveConfig) -> Self {
        Self {
            tasks: TaskTable::new(),
            scheduler: Scheduler::new(),
            mailboxes: MailboxManager::new(config.max_descriptors),
            debugger: Debugger::new(config.trace_default_capacity),
            events: EventBus::new(config.event_history_capacity, config.backpressure),
            sessions: SessionTable::new(config.session_limits),
            registry: Registry::new(),
            fs: FsHost::new(config.fs_root),
            pending_recv: HashMap::new(),
            dmesg: VecDeque::new(),
            dmesg_capacity: config.dmesg_capacity,
            default_quantum: config.default_quantum,
        }
    }

    pub fn push_dmesg(&mut self, pid: Pid, line: &str) {
        self.dmesg.push_back(format!("[{pid}] {line}"));
        while self.dmesg.len() > self.dmesg_capacity {
            self.dmesg.pop_front();
        }
        self.events.emit("io_log", Some(pid), json!({"line": line}));
    }

    pub fn dmesg(&self) -> impl Iterator<Item = &str> {
        self.dmesg.iter().map(|s| s.as_str())
    }

    /// Loads an HXE image and creates a task for it in the `Ready` state
    /// (spec §4.2, §3).
    pub fn load(&mut self, bytes: &[u8], priority: u8) -> Result<Pid, LoadError> {
        let image = hsx_image::load(bytes).map_err(LoadError::Image)?;

        if let Some(name) = &image.header.app_name {
            if !image.header.allow_multiple() && self.tasks.contains_app(name) {
                return Err(LoadError::AppAlreadyRunning(name.clone()));
            }
        }

        let pid = self.tasks.alloc_pid();
        let static_end = image.header.code_len + image.header.ro_len + image.header.bss_size;
        let stack_base = ADDRESS_SPACE_SIZE as u32;

        let mut ctx = TaskContext::new(pid, image.header.entry, 1, stack_base, priority, self.default_quantum);
        ctx.memory.load_image(&image.code, &image.rodata);
        ctx.stack_limit = Some(static_end);

        if let Some(meta) = &image.metadata {
            for binding in &meta.mailbox_bindings {
                if let Ok(target) = self.mailboxes.resolve(&binding.target, pid) {
                    let mode = if binding.mode_mask.is_empty() { ModeMask::RDWR } else { binding.mode_mask };
                    let _ = self.mailboxes.bind(target.namespace, &target.name, target.owner, binding.capacity, Some(mode));
                }
            }
            for v in &meta.values {
                let _ = self.registry.register_value(ValueEntry {
                    group: v.group,
                    id: v.id,
                    owner_pid: pid,
                    name: v.name.clone(),
                    value: v.init_value,
                    unit: v.unit.clone(),
                    epsilon: v.epsilon,
                    min: v.min,
                    max: v.max,
                    auth_level: v.auth_level,
                    persist_key: v.persist_key.clone(),
                    subscribers: Vec::new(),
                });
            }
            for c in &meta.commands {
                let _ = self.registry.register_command(CommandEntry {
                    group: c.group,
                    id: c.id,
                    owner_pid: pid,
                    name: c.name.clone(),
                    help: c.help.clone(),
                    flags: c.flags,
                    auth_level: c.auth_level,
                    handler_offset: c.handler_offset,
                });
            }
        }

        self.tasks.insert(pid, Task::new(ctx, image.header.app_name.clone(), image.header.allow_multiple()));
        self.scheduler.enqueue_ready(pid);
        self.events.emit(
            "task_state",
            Some(pid),
            json!({"from": serde_json::Value::Null, "to": "ready", "reason": "loaded"}),
        );
        Ok(pid)
    }

    fn transition(&mut self, pid: Pid, next: TaskState, reason: &str) {
        if let Some(task) = self.tasks.get_mut(pid) {
            let from = task.ctx.state;
            if !from.can_transition(next) {
                return;
            }
            task.ctx.state = next;
            self.events.emit(
                "task_state",
                Some(pid),
                json!({"from": task_state_label(from), "to": task_state_label(next), "reason": reason}),
            );
        }
    }

    /// Forces `pid` out of the run/ready/sleep rotation into `Paused`
    /// (spec §6 `pause`). Returns `false` if `pid` is unknown or the
    /// transition is disallowed from its current state.
    pub fn pause(&mut self, pid: Pid) -> bool {
        let Some(task) = self.tasks.get(pid) else { return false };
        if !task.ctx.state.can_transition(TaskState::Paused) {
            return false;
        }
        self.scheduler.remove(pid);
        self.transition(pid, TaskState::Paused, "rpc_pause");
        true
    }

    /// Returns a `Paused` task to `Ready` (spec §6 `resume`).
    pub fn resume(&mut self, pid: Pid) -> bool {
        let Some(task) = self.tasks.get(pid) else { return false };
        if task.ctx.state != TaskState::Paused {
            return false;
        }
        self.transition(pid, TaskState::Ready, "rpc_resume");
        self.scheduler.enqueue_ready(pid);
        true
    }

    /// Forcibly terminates `pid`: reaps its mailbox handles, registry
    /// entries, and debugger state, and marks it `Killed` (spec §5 `kill`).
    pub fn kill(&mut self, pid: Pid, reason: &str) {
        self.scheduler.remove(pid);
        self.mailboxes.reap_pid(pid);
        self.registry.reap_pid(pid);
        self.debugger.detach(pid);
        self.pending_recv.remove(&pid);
        self.transition(pid, TaskState::Killed, reason);
    }

    /// Delivers a `send`'s newly-unblocked waiters: writes the message into
    /// each woken task's memory and recv-info registers, per spec §4.5.
    pub(crate) fn deliver_wakes(&mut self, wakes: Vec<(Pid, HandleId)>) {
        for (pid, handle) in wakes {
            let Some(task) = self.tasks.get_mut(pid) else { continue };
            let Some(wait) = &task.mailbox_wait else { continue };
            if wait.handle != handle {
                continue;
            }
            let (buf_ptr, buf_cap) = (wait.buf_ptr, wait.buf_cap);
            let Ok(outcome) = self.mailboxes.recv(handle, false) else { continue };
            let Some(msg) = outcome.message else { continue };

            let task = self.tasks.get_mut(pid).unwrap();
            let n = (msg.payload.len() as u32).min(buf_cap);
            let _ = task.ctx.memory.write_slice(buf_ptr, &msg.payload[..n as usize]);
            task.ctx.set_reg(0, 0);
            task.ctx.set_reg(1, msg.payload.len() as u32);
            task.ctx.set_reg(2, msg.flags as u32);
            task.ctx.set_reg(3, msg.channel as u32);
            task.ctx.set_reg(4, msg.src_pid);
            task.mailbox_wait = None;
            self.scheduler.enqueue_ready(pid);
            self.transition(pid, TaskState::Ready, "mailbox_ready");
        }
    }

    /// Promotes sleeping tasks whose deadline has elapsed and mailbox waits
    /// whose timeout has elapsed, both to `Ready` (spec §4.5).
    pub fn advance_clock(&mut self, now_ms: u64) {
        for pid in self.scheduler.wake_expired(now_ms) {
            if let Some(task) = self.tasks.get_mut(pid) {
                task.sleep_deadline_ms = None;
            }
            self.transition(pid, TaskState::Ready, "sleep_elapsed");
        }

        let timed_out: Vec<Pid> = self
            .tasks
            .iter()
            .filter_map(|(&pid, t)| {
                let wait = t.mailbox_wait.as_ref()?;
                let deadline = wait.deadline_ms?;
                (now_ms >= deadline).then_some(pid)
            })
            .collect();
        for pid in timed_out {
            if let Some(task) = self.tasks.get_mut(pid) {
                task.mailbox_wait = None;
                task.ctx.set_reg(0, abi::mailbox::MailboxStatus::Timeout.code());
            }
            self.scheduler.enqueue_ready(pid);
            self.transition(pid, TaskState::Ready, "mailbox_timeout");
        }
    }

    fn record_trace(&mut self, pid: Pid, pc: u32, ctx: &TaskContext) {
        if !self.debugger.trace_ring(pid).enabled() {
            return;
        }
        let ring = self.debugger.trace_ring(pid);
        let seq = ring.len() as u64;
        ring.push(TraceRecord {
            seq,
            pid,
            pc,
            opcode: 0,
            next_pc: Some(ctx.pc),
            steps: Some(ctx.accounted_steps),
            flags: Some(ctx.psw.bits()),
            regs: Some(ctx.regs),
            changed_regs: None,
            mem_access: None,
        });
    }

    /// Runs exactly one instruction of `pid`, handling the pre-step
    /// breakpoint check, the SVC family dispatch, and every post-step
    /// lifecycle transition (spec §4.4, §4.5).
    pub fn run_one_step(&mut self, pid: Pid, now_ms: u64) -> Option<StepOutcome> {
        let mut task = self.tasks.remove(pid)?;

        if task.ctx.state.is_terminal() {
            self.tasks.insert(pid, task);
            return Some(StepOutcome::Killed);
        }

        if self.debugger.is_attached(pid) && self.debugger.has_breakpoint(pid, task.ctx.pc) {
            let pc = task.ctx.pc;
            self.tasks.insert(pid, task);
            self.events.emit("debug_break", Some(pid), json!({"phase": "pre", "pc": pc}));
            self.transition(pid, TaskState::Paused, "breakpoint");
            self.scheduler.remove(pid);
            return Some(StepOutcome::BreakpointHit);
        }

        let pc_before = task.ctx.pc;
        task.ctx.state = TaskState::Running;
        let event = kern::step(&mut task.ctx, self);
        self.record_trace(pid, pc_before, &task.ctx);

        let outcome = match event {
            StepEvent::Continue => {
                task.ctx.state = TaskState::Running;
                StepOutcome::Continue
            }
            StepEvent::Yield => {
                task.ctx.state = TaskState::Ready;
                self.scheduler.remove(pid);
                self.scheduler.enqueue_ready(pid);
                StepOutcome::Continue
            }
            StepEvent::Sleep { ms } => {
                let until = now_ms + ms as u64;
                task.sleep_deadline_ms = Some(until);
                task.ctx.state = TaskState::Sleeping;
                self.scheduler.remove(pid);
                self.scheduler.sleep_until(pid, until);
                StepOutcome::Slept { until_ms: until }
            }
            StepEvent::Exit { status } => {
                task.exit_status = Some(status);
                task.ctx.state = TaskState::Returned;
                self.scheduler.remove(pid);
                StepOutcome::Exited { status }
            }
            StepEvent::MailboxBlocked { timeout_ms } => {
                let (handle_raw, buf_ptr, buf_cap) = self.pending_recv.remove(&pid).unwrap_or((0, 0, 0));
                let deadline_ms = if timeout_ms == 0 { None } else { Some(now_ms + timeout_ms as u64) };
                task.mailbox_wait =
                    Some(MailboxWait { handle: HandleId(handle_raw), deadline_ms, buf_ptr, buf_cap });
                task.ctx.state = TaskState::WaitMailbox;
                self.scheduler.remove(pid);
                StepOutcome::Blocked
            }
            StepEvent::Fault(fault) => {
                task.ctx.state = TaskState::Terminated;
                self.scheduler.remove(pid);
                StepOutcome::Faulted(fault)
            }
        };

        let from = task.ctx.state;
        self.tasks.insert(pid, task);
        self.events.emit("task_state", Some(pid), json!({"to": task_state_label(from), "reason": "step"}));

        if matches!(from, TaskState::Terminated) {
            self.mailboxes.reap_pid(pid);
            self.registry.reap_pid(pid);
            self.debugger.detach(pid);
        }

        if matches!(outcome, StepOutcome::Continue) {
            let expired = self.tasks.get(pid).is_some_and(|t| {
                t.ctx.accounted_steps.saturating_sub(t.quantum_start_steps) >= t.ctx.quantum as u64
            });
            // Quantum rotation only happens when there is somewhere else to
            // go (spec §4.4); otherwise the same task just keeps running.
            if expired && self.scheduler.other_ready_exists(pid) {
                if let Some(t) = self.tasks.get_mut(pid) {
                    t.ctx.state = TaskState::Ready;
                    t.quantum_start_steps = t.ctx.accounted_steps;
                }
                // Send `pid` back to the ready queue and relinquish
                // `running`, so the next `tick()` rotates to someone else.
                self.scheduler.remove(pid);
                self.scheduler.enqueue_ready(pid);
            }
        }

        Some(outcome)
    }

    /// One scheduler tick: advances sleeping/timed-out tasks, then steps the
    /// currently running (or next ready) task once.
    pub fn tick(&mut self, now_ms: u64) -> Option<(Pid, StepOutcome)> {
        self.advance_clock(now_ms);

        let pid = match self.scheduler.running() {
            Some(p) => p,
            None => self.scheduler.rotate()?,
        };
        let outcome = self.run_one_step(pid, now_ms)?;
        Some((pid, outcome))
    }
}

pub(crate) fn task_state_label(s: TaskState) -> String {
    serde_json::to_value(s).ok().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default()
}
