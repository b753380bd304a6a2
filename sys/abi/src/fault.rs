// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VM fault codes (spec §4.4, §7).
//!
//! Each of these halts the offending task (transition to `Terminated`) and is
//! written into R0 as a well-known error code. They are distinct from SVC
//! `ENOSYS`, which never halts the task.

/// A fault taken while executing a single instruction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VmFault {
    /// Memory access outside the task's 64 KiB window.
    MemFault,
    /// Division by zero in `DIV`.
    DivZero,
    /// `CALL` overflowed the bounded call stack.
    StackOverflow,
    /// `RET` popped an empty call stack.
    StackUnderflow,
    /// The opcode byte did not decode to a known instruction.
    IllegalOpcode,
}

impl VmFault {
    /// The numeric code written into R0 before the task halts.
    pub fn code(self) -> u32 {
        match self {
            VmFault::MemFault => 1,
            VmFault::DivZero => 2,
            VmFault::StackOverflow => 3,
            VmFault::StackUnderflow => 4,
            VmFault::IllegalOpcode => 5,
        }
    }

    /// The RPC/event error category string (spec §6, §7).
    pub fn category(self) -> &'static str {
        match self {
            VmFault::MemFault => "mem_fault",
            VmFault::DivZero => "div_zero",
            VmFault::StackOverflow => "stack_overflow",
            VmFault::StackUnderflow => "stack_underflow",
            VmFault::IllegalOpcode => "illegal_opcode",
        }
    }
}

impl core::fmt::Display for VmFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.category())
    }
}

impl std::error::Error for VmFault {}
