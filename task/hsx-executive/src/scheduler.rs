// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Round-robin scheduling across `Ready`/`Running` tasks, and the
//! sleeping-task deadline heap (spec §4.5).

use std::collections::VecDeque;

use abi::Pid;

#[derive(Default)]
pub struct Scheduler {
    ready: VecDeque<Pid>,
    running: Option<Pid>,
    sleeping: Vec<(u64, Pid)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_ready(&mut self, pid: Pid) {
        if !self.ready.contains(&pid) {
            self.ready.push_back(pid);
        }
    }

    pub fn remove(&mut self, pid: Pid) {
        self.ready.retain(|&p| p != pid);
        self.sleeping.retain(|&(_, p)| p != pid);
        if self.running == Some(pid) {
            self.running = None;
        }
    }

    pub fn running(&self) -> Option<Pid> {
        self.running
    }

    /// Picks the next runnable PID, rotating the current one (if any) to the
    /// back of the ready queue first.
    pub fn rotate(&mut self) -> Option<Pid> {
        if let Some(prev) = self.running.take() {
            self.ready.push_back(prev);
        }
        let next = self.ready.pop_front();
        self.running = next;
        next
    }

    /// Whether any task other than `pid` is currently ready, used by the
    /// quantum-expiry check (spec §4.4): a rotation only happens when there
    /// is somewhere else to go.
    pub fn other_ready_exists(&self, pid: Pid) -> bool {
        self.ready.iter().any(|&p| p != pid)
    }

    pub fn sleep_until(&mut self, pid: Pid, deadline_ms: u64) {
        self.sleeping.push((deadline_ms, pid));
    }

    /// Promotes every sleeping task whose deadline has elapsed to the ready
    /// queue, returning their PIDs in deadline order (spec §4.5).
    pub fn wake_expired(&mut self, now_ms: u64) -> Vec<Pid> {
        self.sleeping.sort_by_key(|&(deadline, _)| deadline);
        let split = self.sleeping.partition_point(|&(deadline, _)| deadline <= now_ms);
        let woken: Vec<Pid> = self.sleeping.drain(..split).map(|(_, pid)| pid).collect();
        for &pid in &woken {
            self.enqueue_ready(pid);
        }
        woken
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.sleeping.iter().map(|&(d, _)| d).min()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }
}
