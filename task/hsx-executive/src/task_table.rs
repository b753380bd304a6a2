// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The task table: one [`Task`] per PID, holding the VM core's
//! architectural state plus executive-side lifecycle metadata (spec §3).

use std::collections::HashMap;

use abi::Pid;
use kern::TaskContext;

/// Why a task is currently `WaitMailbox`: which handle it is blocked on, and
/// when (if ever) the wait times out.
pub struct MailboxWait {
    pub handle: hsx_mailbox::HandleId,
    pub deadline_ms: Option<u64>,
    pub buf_ptr: u32,
    pub buf_cap: u32,
}

pub struct Task {
    pub ctx: TaskContext,
    pub app_name: Option<String>,
    pub allow_multiple: bool,
    pub sleep_deadline_ms: Option<u64>,
    pub mailbox_wait: Option<MailboxWait>,
    pub exit_status: Option<i32>,
    /// `ctx.accounted_steps` the last time this task was rotated onto the
    /// CPU; quantum expiry compares the delta against `ctx.quantum`.
    pub quantum_start_steps: u64,
}

impl Task {
    pub fn new(ctx: TaskContext, app_name: Option<String>, allow_multiple: bool) -> Self {
        Self {
            ctx,
            app_name,
            allow_multiple,
            sleep_deadline_ms: None,
            mailbox_wait: None,
            exit_status: None,
            quantum_start_steps: 0,
        }
    }
}

#[derive(Default)]
pub struct TaskTable {
    tasks: HashMap<Pid, Task>,
    next_pid: Pid,
}

impl TaskTable {
    pub fn new() -> Self {
        Self { tasks: HashMap::new(), next_pid: 1 }
    }

    pub fn alloc_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    pub fn insert(&mut self, pid: Pid, task: Task) {
        self.tasks.insert(pid, task);
    }

    pub fn get(&self, pid: Pid) -> Option<&Task> {
        self.tasks.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Task> {
        self.tasks.get_mut(&pid)
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Task> {
        self.tasks.remove(&pid)
    }

    pub fn contains_app(&self, name: &str) -> bool {
        self.tasks.values().any(|t| t.app_name.as_deref() == Some(name) && !t.ctx.state.is_terminal())
    }

    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.tasks.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Pid, &Task)> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
