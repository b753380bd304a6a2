// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-task architectural state (spec §3).

use abi::{Psw, TaskState, NUM_REGISTERS};

use crate::memory::Memory;

/// The bounded call stack used by `CALL`/`RET`, distinct from the
/// SP-addressed data stack (spec §4.4).
pub const CALL_STACK_DEPTH: usize = 32;

/// One task's full architectural state: registers, program counter, flags,
/// the call stack, its memory window, and scheduling metadata.
///
/// Ownership (spec §3): a task exclusively owns its register file, its
/// memory, and its mailbox handle table (the last of these lives in the
/// executive, referenced by PID, not here).
pub struct TaskContext {
    pub pid: u32,
    pub regs: [u32; NUM_REGISTERS],
    pub pc: u32,
    pub sp: u32,
    pub psw: Psw,
    pub call_stack: Vec<u32>,
    pub memory: Memory,

    pub reg_base: u32,
    pub stack_base: u32,
    pub stack_limit: Option<u32>,
    pub stack_size: Option<u32>,

    pub priority: u8,
    pub quantum: u32,
    pub accounted_steps: u64,

    pub state: TaskState,
}

impl TaskContext {
    pub fn new(pid: u32, entry: u32, reg_base: u32, stack_base: u32, priority: u8, quantum: u32) -> Self {
        Self {
            pid,
            regs: [0; NUM_REGISTERS],
            pc: entry,
            sp: stack_base,
            psw: Psw::empty(),
            call_stack: Vec::with_capacity(CALL_STACK_DEPTH),
            memory: Memory::new(),
            reg_base,
            stack_base,
            stack_limit: None,
            stack_size: Some(0),
            priority,
            quantum,
            accounted_steps: 0,
            state: TaskState::Ready,
        }
    }

    /// The context-isolation invariant from spec §4.5/§8: `reg_base` and
    /// `stack_base` must be nonzero, and at least one of
    /// `stack_limit`/`stack_size` must be defined, for any task in a live
    /// state. Callers check this whenever a task enters Ready/Running/
    /// WaitMailbox/Sleeping.
    pub fn context_isolation_holds(&self) -> bool {
        self.reg_base != 0 && self.stack_base != 0 && (self.stack_limit.is_some() || self.stack_size.is_some())
    }

    pub fn reg(&self, idx: u8) -> u32 {
        self.regs[idx as usize & 0xF]
    }

    pub fn set_reg(&mut self, idx: u8, value: u32) {
        self.regs[idx as usize & 0xF] = value;
    }
}
