// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Breakpoints, single-step, trace ring, and watches (spec §3, §4.6).

use std::collections::{HashMap, HashSet, VecDeque};

/// Hard ceiling on a per-task trace ring, regardless of configured capacity
/// (spec §3).
pub const TRACE_RING_HARD_MAX: usize = 4096;

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MemAccess {
    pub op: MemOp,
    pub address: u32,
    pub width: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<u32>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemOp {
    Read,
    Write,
}

/// A trace record matching schema `hsx.trace/1` (spec §3).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TraceRecord {
    pub seq: u64,
    pub pid: u32,
    pub pc: u32,
    pub opcode: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_pc: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regs: Option<[u32; 16]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_regs: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_access: Option<MemAccess>,
}

pub struct TraceRing {
    capacity: usize,
    records: VecDeque<TraceRecord>,
    enabled: bool,
}

impl TraceRing {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.min(TRACE_RING_HARD_MAX), records: VecDeque::new(), enabled: false }
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.min(TRACE_RING_HARD_MAX);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn push(&mut self, rec: TraceRecord) {
        self.records.push_back(rec);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &TraceRecord> {
        self.records.iter()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Replaces or appends the ring's contents from an import (spec §6).
    pub fn import(&mut self, records: Vec<TraceRecord>, replace: bool) {
        if replace {
            self.records.clear();
        }
        for r in records {
            self.push(r);
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WatchType {
    U8,
    U16,
    U32,
    Bytes,
}

pub struct Watch {
    pub id: u64,
    pub pid: u32,
    pub address: u32,
    pub length: u32,
    pub kind: WatchType,
    pub last_bytes: Vec<u8>,
}

#[derive(Default)]
pub struct Debugger {
    attached: HashSet<u32>,
    breakpoints: HashMap<u32, HashSet<u32>>,
    step_mode: HashSet<u32>,
    watches: Vec<Watch>,
    next_watch_id: u64,
    traces: HashMap<u32, TraceRing>,
    default_trace_capacity: usize,
}

impl Debugger {
    pub fn new(default_trace_capacity: usize) -> Self {
        Self { default_trace_capacity, ..Default::default() }
    }

    pub fn attach(&mut self, pid: u32) {
        self.attached.insert(pid);
    }

    pub fn detach(&mut self, pid: u32) {
        self.attached.remove(&pid);
        self.breakpoints.remove(&pid);
        self.step_mode.remove(&pid);
        self.watches.retain(|w| w.pid != pid);
        self.traces.remove(&pid);
    }

    pub fn is_attached(&self, pid: u32) -> bool {
        self.attached.contains(&pid)
    }

    pub fn add_breakpoint(&mut self, pid: u32, addr: u32) {
        self.breakpoints.entry(pid).or_default().insert(addr);
    }

    pub fn clear_breakpoint(&mut self, pid: u32, addr: u32) {
        if let Some(set) = self.breakpoints.get_mut(&pid) {
            set.remove(&addr);
        }
    }

    pub fn clear_all_breakpoints(&mut self, pid: u32) {
        self.breakpoints.remove(&pid);
    }

    pub fn list_breakpoints(&self, pid: u32) -> Vec<u32> {
        let mut v: Vec<u32> = self.breakpoints.get(&pid).map(|s| s.iter().copied().collect()).unwrap_or_default();
        v.sort_unstable();
        v
    }

    pub fn has_breakpoint(&self, pid: u32, addr: u32) -> bool {
        self.breakpoints.get(&pid).is_some_and(|s| s.contains(&addr))
    }

    pub fn set_step_mode(&mut self, pid: u32, enabled: bool) {
        if enabled {
            self.step_mode.insert(pid);
        } else {
            self.step_mode.remove(&pid);
        }
    }

    pub fn is_step_mode(&self, pid: u32) -> bool {
        self.step_mode.contains(&pid)
    }

    pub fn add_watch(&mut self, pid: u32, address: u32, length: u32, kind: WatchType, initial: Vec<u8>) -> u64 {
        let id = self.next_watch_id;
        self.next_watch_id += 1;
        self.watches.push(Watch { id, pid, address, length, kind, last_bytes: initial });
        id
    }

    pub fn remove_watch(&mut self, id: u64) {
        self.watches.retain(|w| w.id != id);
    }

    pub fn list_watches(&self, pid: u32) -> impl Iterator<Item = &Watch> {
        self.watches.iter().filter(move |w| w.pid == pid)
    }

    pub fn watches_mut(&mut self) -> impl Iterator<Item = &mut Watch> {
        self.watches.iter_mut()
    }

    pub fn trace_ring(&mut self, pid: u32) -> &mut TraceRing {
        let cap = self.default_trace_capacity;
        self.traces.entry(pid).or_insert_with(|| TraceRing::new(cap))
    }

    pub fn trace_ring_if_present(&self, pid: u32) -> Option<&TraceRing> {
        self.traces.get(&pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_ring_evicts_oldest_past_capacity() {
        let mut ring = TraceRing::new(2);
        for i in 0..5u64 {
            ring.push(TraceRecord { seq: i, pid: 1, pc: i as u32, opcode: 0, next_pc: None, steps: None, flags: None, regs: None, changed_regs: None, mem_access: None });
        }
        assert_eq!(ring.len(), 2);
        let seqs: Vec<u64> = ring.records().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn configured_capacity_cannot_exceed_hard_max() {
        let ring = TraceRing::new(100_000);
        assert_eq!(ring.capacity(), TRACE_RING_HARD_MAX);
    }

    #[test]
    fn detach_clears_breakpoints_and_watches() {
        let mut dbg = Debugger::new(64);
        dbg.attach(1);
        dbg.add_breakpoint(1, 0x100);
        dbg.add_watch(1, 0x200, 4, WatchType::U32, vec![0; 4]);
        dbg.detach(1);
        assert!(!dbg.is_attached(1));
        assert!(dbg.list_breakpoints(1).is_empty());
        assert_eq!(dbg.list_watches(1).count(), 0);
    }
}
