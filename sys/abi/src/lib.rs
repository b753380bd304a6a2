// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared ABI for the HSX hosted runtime.
//!
//! This crate holds the types that must agree bit-for-bit between the VM
//! core, the mailbox manager, and the executive: opcodes, the task state
//! machine, fault and mailbox status codes, PSW flags, SVC family selectors,
//! and the HXE image header layouts. Nothing here performs I/O or owns a
//! task's memory; it is pure data plus the invariants that govern it.
#![forbid(unsafe_code)]

pub mod fault;
pub mod hxe;
pub mod mailbox;
pub mod opcodes;
pub mod psw;
pub mod svc;
pub mod task_state;

pub use fault::VmFault;
pub use opcodes::Opcode;
pub use psw::Psw;
pub use svc::SvcFamily;
pub use task_state::TaskState;

/// Number of general-purpose registers in a task's architectural state.
pub const NUM_REGISTERS: usize = 16;

/// Size in bytes of the flat per-task address space.
pub const ADDRESS_SPACE_SIZE: usize = 64 * 1024;

/// A task identifier, unique within one running executive.
pub type Pid = u32;
