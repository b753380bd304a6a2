// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Descriptor pool, handle lifetime, and ring accounting (spec §4.3).

use std::collections::{HashMap, VecDeque};

use abi::mailbox::{MailboxStatus, ModeMask, MsgFlags, Namespace};
use abi::Pid;

use crate::name::{self, Target};

const MESSAGE_HEADER_OVERHEAD: u32 = 8;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct DescriptorId(pub u64);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

/// A queued message (spec §3 "Message").
#[derive(Clone, Debug)]
pub struct Message {
    pub seq_no: u64,
    pub flags: u8,
    pub src_pid: Pid,
    pub channel: u16,
    pub payload: Vec<u8>,
}

impl Message {
    fn cost(&self) -> u32 {
        self.payload.len() as u32 + MESSAGE_HEADER_OVERHEAD
    }
}

struct Waiter {
    pid: Pid,
    handle: HandleId,
}

struct Descriptor {
    id: DescriptorId,
    namespace: Namespace,
    name: String,
    owner_pid: Option<Pid>,
    capacity: u32,
    bytes_used: u32,
    mode_mask: ModeMask,
    next_seq: u64,
    queue: VecDeque<Message>,
    waiters: VecDeque<Waiter>,
    taps: Vec<Pid>,
    readers: Vec<HandleId>,
}

impl Descriptor {
    fn head_seq(&self) -> u64 {
        self.queue.front().map(|m| m.seq_no).unwrap_or(self.next_seq)
    }
}

struct Handle {
    pid: Pid,
    descriptor: DescriptorId,
    is_sender: bool,
    /// Meaningful only for fanout readers. Signed so that "before the first
    /// message ever sent" (`next_seq == 0` at open time) is representable
    /// without underflow.
    last_seq: i64,
    pending_overrun: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    pub max_descriptors: usize,
    pub active_descriptors: usize,
    pub free_descriptors: usize,
    pub bytes_used_total: u64,
    pub queue_depth_total: usize,
    pub handle_count: usize,
    pub overruns: u64,
    pub descriptor_exhaustion: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct PeekInfo {
    pub depth: usize,
    pub bytes_used: u32,
    pub capacity: u32,
    pub next_len: Option<u32>,
    pub head_seq: u64,
    pub next_seq: u64,
    pub mode_mask: ModeMask,
}

/// Outcome of a `send`: whether the message was enqueued, and which waiting
/// PIDs (with the handle they should be served through) just became
/// deliverable and were removed from the waiter FIFO. The caller (the
/// executive) is responsible for calling [`MailboxManager::recv`] on each
/// woken handle to fetch the message and write it into that task's memory.
#[derive(Clone, Debug, Default)]
pub struct SendOutcome {
    pub enqueued: bool,
    pub descriptor: Option<DescriptorId>,
    pub to_wake: Vec<(Pid, HandleId)>,
}

/// Outcome of a `recv`.
#[derive(Clone, Debug, Default)]
pub struct RecvOutcome {
    pub message: Option<Message>,
    pub status: MailboxStatus,
}

const DEFAULT_CAPACITY: u32 = 4096;

pub struct MailboxManager {
    descriptors: HashMap<DescriptorId, Descriptor>,
    by_name: HashMap<(Namespace, String, Option<Pid>), DescriptorId>,
    handles: HashMap<HandleId, Handle>,
    next_descriptor_id: u64,
    next_handle_id: u64,
    max_descriptors: usize,
    overruns: u64,
    descriptor_exhaustion: u64,
}

impl MailboxManager {
    pub fn new(max_descriptors: usize) -> Self {
        Self {
            descriptors: HashMap::new(),
            by_name: HashMap::new(),
            handles: HashMap::new(),
            next_descriptor_id: 0,
            next_handle_id: 0,
            max_descriptors,
            overruns: 0,
            descriptor_exhaustion: 0,
        }
    }

    pub fn resolve(&self, raw: &str, caller: Pid) -> Result<Target, name::NameError> {
        name::resolve(raw, caller)
    }

    /// Binds a name to a descriptor. Idempotent: the first call allocates;
    /// later calls may grow capacity and/or change the mode mask.
    pub fn bind(
        &mut self,
        namespace: Namespace,
        name: &str,
        owner: Option<Pid>,
        capacity: Option<u32>,
        mode_mask: Option<ModeMask>,
    ) -> Result<DescriptorId, MailboxStatus> {
        let key = (namespace, name.to_string(), owner);
        if let Some(&id) = self.by_name.get(&key) {
            let desc = self.descriptors.get_mut(&id).expect("by_name entries always map live");
            let mode_changed = matches!(mode_mask, Some(m) if m != desc.mode_mask);
            if let Some(m) = mode_mask {
                desc.mode_mask = m;
            }
            if let Some(cap) = capacity {
                desc.capacity = cap;
                shrink_to_capacity(desc, &mut self.handles, &mut self.overruns);
            }
            if mode_changed {
                reinit_reader_cursors(desc, &mut self.handles);
            }
            return Ok(id);
        }

        if self.descriptors.len() >= self.max_descriptors {
            self.descriptor_exhaustion += 1;
            return Err(MailboxStatus::NoDescriptor);
        }

        let id = DescriptorId(self.next_descriptor_id);
        self.next_descriptor_id += 1;
        self.descriptors.insert(
            id,
            Descriptor {
                id,
                namespace,
                name: name.to_string(),
                owner_pid: owner,
                capacity: capacity.unwrap_or(DEFAULT_CAPACITY),
                bytes_used: 0,
                mode_mask: mode_mask.unwrap_or(ModeMask::RDWR),
                next_seq: 0,
                queue: VecDeque::new(),
                waiters: VecDeque::new(),
                taps: Vec::new(),
                readers: Vec::new(),
            },
        );
        self.by_name.insert(key, id);
        Ok(id)
    }

    /// Opens a handle for `pid` against an already-bound (or implicitly
    /// bound with defaults) target.
    pub fn open(
        &mut self,
        pid: Pid,
        namespace: Namespace,
        name: &str,
        owner: Option<Pid>,
        as_sender: bool,
    ) -> Result<HandleId, MailboxStatus> {
        let id = self.bind(namespace, name, owner, None, None)?;
        let desc = self.descriptors.get_mut(&id).unwrap();

        let last_seq = if desc.mode_mask.is_fanout() {
            desc.next_seq as i64 - 1
        } else {
            -1
        };

        let handle_id = HandleId(self.next_handle_id);
        self.next_handle_id += 1;
        self.handles.insert(
            handle_id,
            Handle {
                pid,
                descriptor: id,
                is_sender: as_sender,
                last_seq,
                pending_overrun: false,
            },
        );
        if !as_sender {
            desc.readers.push(handle_id);
        }
        Ok(handle_id)
    }

    pub fn close(&mut self, handle: HandleId) -> Result<(), MailboxStatus> {
        let h = self.handles.remove(&handle).ok_or(MailboxStatus::InvalidHandle)?;
        if let Some(desc) = self.descriptors.get_mut(&h.descriptor) {
            desc.readers.retain(|r| *r != handle);
            desc.waiters.retain(|w| w.handle != handle);
            reclaim(desc, &self.handles);
        }
        Ok(())
    }

    pub fn send(
        &mut self,
        handle: HandleId,
        src_pid: Pid,
        payload: &[u8],
        flags: u8,
        channel: u16,
    ) -> Result<SendOutcome, MailboxStatus> {
        let descriptor_id = self.handles.get(&handle).ok_or(MailboxStatus::InvalidHandle)?.descriptor;
        let desc = self.descriptors.get_mut(&descriptor_id).ok_or(MailboxStatus::InvalidHandle)?;

        let cost = payload.len() as u32 + MESSAGE_HEADER_OVERHEAD;
        if cost > desc.capacity {
            return Err(MailboxStatus::MsgTooLarge);
        }

        let free = desc.capacity - desc.bytes_used;
        let mut enqueued = false;

        if desc.mode_mask.is_fanout_drop() {
            let mut free = free;
            while free < cost {
                if !evict_head(desc, &mut self.handles, &mut self.overruns) {
                    break;
                }
                free = desc.capacity - desc.bytes_used;
            }
            enqueued = free >= cost;
        } else {
            // Non-fanout and FANOUT_BLOCK both refuse to drop.
            enqueued = free >= cost;
        }

        if !enqueued {
            return Ok(SendOutcome { enqueued: false, descriptor: Some(descriptor_id), to_wake: vec![] });
        }

        let seq_no = desc.next_seq;
        desc.next_seq += 1;
        desc.bytes_used += cost;
        desc.queue.push_back(Message {
            seq_no,
            flags,
            src_pid,
            channel,
            payload: payload.to_vec(),
        });

        let to_wake = wake_candidates(desc, &self.handles);
        Ok(SendOutcome { enqueued: true, descriptor: Some(descriptor_id), to_wake })
    }

    pub fn recv(&mut self, handle: HandleId, record_waiter: bool) -> Result<RecvOutcome, MailboxStatus> {
        let h = self.handles.get(&handle).ok_or(MailboxStatus::InvalidHandle)?;
        let descriptor_id = h.descriptor;
        let pid = h.pid;
        let fanout = {
            let desc = self.descriptors.get(&descriptor_id).ok_or(MailboxStatus::InvalidHandle)?;
            desc.mode_mask.is_fanout()
        };

        let message = if fanout {
            let h = self.handles.get(&handle).unwrap();
            let last_seq = h.last_seq;
            let desc = self.descriptors.get(&descriptor_id).unwrap();
            let found = desc
                .queue
                .iter()
                .filter(|m| m.seq_no as i64 > last_seq)
                .min_by_key(|m| m.seq_no)
                .cloned();
            found
        } else {
            let desc = self.descriptors.get_mut(&descriptor_id).unwrap();
            desc.queue.pop_front().inspect(|m| {
                desc.bytes_used = desc.bytes_used.saturating_sub(m.payload.len() as u32 + MESSAGE_HEADER_OVERHEAD);
            })
        };

        match message {
            Some(mut m) => {
                if fanout {
                    let h = self.handles.get_mut(&handle).unwrap();
                    h.last_seq = m.seq_no as i64;
                    if h.pending_overrun {
                        m.flags |= MsgFlags::OVERRUN.bits();
                        h.pending_overrun = false;
                    }
                    let desc = self.descriptors.get_mut(&descriptor_id).unwrap();
                    reclaim(desc, &self.handles);
                }
                Ok(RecvOutcome { message: Some(m), status: MailboxStatus::Ok })
            }
            None => {
                if record_waiter {
                    let desc = self.descriptors.get_mut(&descriptor_id).unwrap();
                    if !desc.waiters.iter().any(|w| w.handle == handle) {
                        desc.waiters.push_back(Waiter { pid, handle });
                    }
                }
                Ok(RecvOutcome { message: None, status: MailboxStatus::NoData })
            }
        }
    }

    pub fn peek(&self, handle: HandleId) -> Result<PeekInfo, MailboxStatus> {
        let h = self.handles.get(&handle).ok_or(MailboxStatus::InvalidHandle)?;
        let desc = self.descriptors.get(&h.descriptor).ok_or(MailboxStatus::InvalidHandle)?;
        Ok(PeekInfo {
            depth: desc.queue.len(),
            bytes_used: desc.bytes_used,
            capacity: desc.capacity,
            next_len: desc.queue.front().map(|m| m.payload.len() as u32),
            head_seq: desc.head_seq(),
            next_seq: desc.next_seq,
            mode_mask: desc.mode_mask,
        })
    }

    pub fn tap(&mut self, handle: HandleId, enable: bool) -> Result<(), MailboxStatus> {
        let h = self.handles.get(&handle).ok_or(MailboxStatus::InvalidHandle)?;
        let pid = h.pid;
        let desc = self.descriptors.get_mut(&h.descriptor).ok_or(MailboxStatus::InvalidHandle)?;
        if enable {
            if !desc.taps.contains(&pid) {
                desc.taps.push(pid);
            }
        } else {
            desc.taps.retain(|p| *p != pid);
        }
        Ok(())
    }

    pub fn stats(&self) -> Stats {
        Stats {
            max_descriptors: self.max_descriptors,
            active_descriptors: self.descriptors.len(),
            free_descriptors: self.max_descriptors.saturating_sub(self.descriptors.len()),
            bytes_used_total: self.descriptors.values().map(|d| d.bytes_used as u64).sum(),
            queue_depth_total: self.descriptors.values().map(|d| d.queue.len()).sum(),
            handle_count: self.handles.len(),
            overruns: self.overruns,
            descriptor_exhaustion: self.descriptor_exhaustion,
        }
    }

    /// Removes every handle and waiter entry owned by `pid`, used by
    /// `kill(pid)` to reap mailbox state (spec §5).
    pub fn reap_pid(&mut self, pid: Pid) {
        let dead: Vec<HandleId> = self
            .handles
            .iter()
            .filter(|(_, h)| h.pid == pid)
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            let _ = self.close(id);
        }
    }
}

fn shrink_to_capacity(desc: &mut Descriptor, handles: &mut HashMap<HandleId, Handle>, overruns: &mut u64) {
    while desc.bytes_used > desc.capacity {
        if !evict_head(desc, handles, overruns) {
            break;
        }
    }
}

/// Pops the head message, marking overrun on every reader handle that had
/// not yet observed it (spec §4.3 "Overrun marking"). Returns `false` if the
/// queue was already empty.
fn evict_head(desc: &mut Descriptor, handles: &mut HashMap<HandleId, Handle>, overruns: &mut u64) -> bool {
    let Some(msg) = desc.queue.pop_front() else { return false };
    desc.bytes_used = desc.bytes_used.saturating_sub(msg.payload.len() as u32 + MESSAGE_HEADER_OVERHEAD);
    *overruns += 1;
    for r in &desc.readers {
        if let Some(h) = handles.get_mut(r) {
            if h.last_seq < msg.seq_no as i64 {
                h.pending_overrun = true;
            }
        }
    }
    true
}

/// Computes which waiting handles can now observe a newly-sent message and
/// removes them from the waiter FIFO.
fn wake_candidates(desc: &mut Descriptor, handles: &HashMap<HandleId, Handle>) -> Vec<(Pid, HandleId)> {
    if desc.mode_mask.is_fanout() {
        let mut woken = Vec::new();
        desc.waiters.retain(|w| {
            let last_seq = handles.get(&w.handle).map(|h| h.last_seq).unwrap_or(i64::MAX);
            let can_read = desc.queue.iter().any(|m| m.seq_no as i64 > last_seq);
            if can_read {
                woken.push((w.pid, w.handle));
                false
            } else {
                true
            }
        });
        woken
    } else if let Some(w) = desc.waiters.pop_front() {
        vec![(w.pid, w.handle)]
    } else {
        vec![]
    }
}

/// Pops reclaimable fanout messages: any message every non-sender reader has
/// already observed can be dropped from the ring.
fn reclaim(desc: &mut Descriptor, handles: &HashMap<HandleId, Handle>) {
    if !desc.mode_mask.is_fanout() {
        return;
    }
    loop {
        let Some(front) = desc.queue.front() else { break };
        let seq = front.seq_no as i64;
        let all_seen = desc.readers.iter().all(|r| {
            handles.get(r).map(|h| h.last_seq >= seq).unwrap_or(true)
        });
        if !all_seen {
            break;
        }
        let msg = desc.queue.pop_front().unwrap();
        desc.bytes_used = desc.bytes_used.saturating_sub(msg.payload.len() as u32 + MESSAGE_HEADER_OVERHEAD);
    }
}

/// On a mode change, every reader's cursor is reinitialised the same way a
/// fresh `open` would compute it for the new mode (spec §4.3 `bind`).
fn reinit_reader_cursors(desc: &Descriptor, handles: &mut HashMap<HandleId, Handle>) {
    let last_seq = if desc.mode_mask.is_fanout() { desc.next_seq as i64 - 1 } else { -1 };
    for r in &desc.readers {
        if let Some(h) = handles.get_mut(r) {
            h.last_seq = last_seq;
            h.pending_overrun = false;
        }
    }
}
