// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The SVC dispatch surface (spec §4.4).
//!
//! `EXEC` (yield/sleep/exit) is handled directly by the interpreter, since
//! it is the primitive the task lifecycle state machine is built from. The
//! other four families (`IO`, `FS`, `MAILBOX`, `VAL`/`CMD`) are dispatched
//! through [`SvcHost`], a per-family function table rather than dynamic
//! method dispatch, per spec §9 — the executive implements it, wiring the
//! mailbox manager and the value/command registry in.

use abi::svc::{decode_svc_imm, SvcFamily, ENOSYS};

use crate::context::TaskContext;

/// What an `SvcHost` family handler did with one call. `Value` writes
/// straight into R0; `MailboxRecvBlocked` asks the interpreter to suspend
/// the task (the executive turns this into a `WaitMailbox` transition with
/// a deadline).
pub enum SvcOutcome {
    Value(u32),
    MailboxRecvBlocked { timeout_ms: u32 },
}

impl SvcOutcome {
    pub fn ok(value: u32) -> Self {
        SvcOutcome::Value(value)
    }
}

/// Implemented by the executive; called by [`crate::interp::step`] for every
/// SVC instruction except the `EXEC` family.
pub trait SvcHost {
    fn io(&mut self, ctx: &mut TaskContext, fn_sel: u8) -> SvcOutcome;
    fn fs(&mut self, ctx: &mut TaskContext, fn_sel: u8) -> SvcOutcome;
    fn mailbox(&mut self, ctx: &mut TaskContext, fn_sel: u8) -> SvcOutcome;
    fn val(&mut self, ctx: &mut TaskContext, fn_sel: u8) -> SvcOutcome;
    fn cmd(&mut self, ctx: &mut TaskContext, fn_sel: u8) -> SvcOutcome;
}

/// Dispatches a decoded SVC immediate to the right family. Returns `None`
/// (so the caller writes `ENOSYS`) for an unrecognised `mod` nibble, or for
/// `EXEC`, which the interpreter's caller handles itself.
pub fn family_of(imm: u16) -> Option<(SvcFamily, u8)> {
    let (m, f) = decode_svc_imm(imm);
    SvcFamily::from_mod(m).map(|fam| (fam, f))
}

pub fn dispatch(host: &mut dyn SvcHost, ctx: &mut TaskContext, family: SvcFamily, fn_sel: u8) -> SvcOutcome {
    match family {
        SvcFamily::Exec => SvcOutcome::Value(ENOSYS), // handled by the interpreter before reaching here
        SvcFamily::Io => host.io(ctx, fn_sel),
        SvcFamily::Fs => host.fs(ctx, fn_sel),
        SvcFamily::Mailbox => host.mailbox(ctx, fn_sel),
        SvcFamily::Val => host.val(ctx, fn_sel),
        SvcFamily::Cmd => host.cmd(ctx, fn_sel),
    }
}
