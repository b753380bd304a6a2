// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The instruction interpreter (spec §4.4).
//!
//! [`step`] executes exactly one instruction and reports what happened.
//! Breakpoint checks, scheduler rotation, and the actual `TaskState`
//! transition bookkeeping belong to the executive (spec §4.4's "pre-step" /
//! "post-step" framing is a contract between the two, not something the
//! interpreter enforces on its own).

use abi::opcodes::RawInstruction;
use abi::svc::ENOSYS;
use abi::{Opcode, Psw, VmFault};

use crate::context::{TaskContext, CALL_STACK_DEPTH};
use crate::svc::{self, SvcHost, SvcOutcome};

/// What the interpreter did with one instruction.
#[derive(Debug)]
pub enum StepEvent {
    /// Ordinary instruction; execution continues at the (possibly updated)
    /// PC.
    Continue,
    /// `SVC` into the `EXEC` family requested a voluntary reschedule.
    Yield,
    /// `SVC` into the `EXEC` family requested a sleep of `ms` milliseconds.
    Sleep { ms: u32 },
    /// `SVC` into the `EXEC` family requested task exit.
    Exit { status: i32 },
    /// `SVC` into the `MAILBOX` family blocked on an empty descriptor with a
    /// nonzero timeout.
    MailboxBlocked { timeout_ms: u32 },
    /// The instruction faulted; R0 has already been set to
    /// `fault.code()` and the caller should transition the task to
    /// `Terminated`.
    Fault(VmFault),
}

/// Executes one instruction at `ctx.pc`, mutating `ctx` in place.
pub fn step(ctx: &mut TaskContext, host: &mut dyn SvcHost) -> StepEvent {
    let word = match ctx.memory.fetch_instruction(ctx.pc) {
        Ok(w) => w,
        Err(fault) => return halt(ctx, fault),
    };
    let insn = RawInstruction::decode(word);
    let Some(op) = Opcode::from_u8(insn.op) else {
        return halt(ctx, VmFault::IllegalOpcode);
    };

    let mut next_pc = ctx.pc.wrapping_add(4);

    macro_rules! try_mem {
        ($e:expr) => {
            match $e {
                Ok(v) => v,
                Err(fault) => return halt(ctx, fault),
            }
        };
    }

    match op {
        Opcode::Ldi => {
            ctx.set_reg(insn.rd, insn.imm_sext() as u32);
        }
        Opcode::Ldi32 => {
            let hi = try_mem!(ctx.memory.fetch_instruction(ctx.pc.wrapping_add(4)));
            ctx.set_reg(insn.rd, hi);
            next_pc = ctx.pc.wrapping_add(8);
        }
        Opcode::Ld => {
            let addr = ctx.reg(insn.rs1).wrapping_add(insn.imm_sext() as u32);
            let v = try_mem!(ctx.memory.read_u32(addr));
            ctx.set_reg(insn.rd, v);
        }
        Opcode::Ldb => {
            let addr = ctx.reg(insn.rs1).wrapping_add(insn.imm_sext() as u32);
            let v = try_mem!(ctx.memory.read_u8(addr));
            ctx.set_reg(insn.rd, v as u32);
        }
        Opcode::Ldh => {
            let addr = ctx.reg(insn.rs1).wrapping_add(insn.imm_sext() as u32);
            let v = try_mem!(ctx.memory.read_u16(addr));
            ctx.set_reg(insn.rd, v as u32);
        }
        Opcode::St => {
            let addr = ctx.reg(insn.rs1).wrapping_add(insn.imm_sext() as u32);
            try_mem!(ctx.memory.write_u32(addr, ctx.reg(insn.rd)));
        }
        Opcode::Stb => {
            let addr = ctx.reg(insn.rs1).wrapping_add(insn.imm_sext() as u32);
            try_mem!(ctx.memory.write_u8(addr, ctx.reg(insn.rd) as u8));
        }
        Opcode::Sth => {
            let addr = ctx.reg(insn.rs1).wrapping_add(insn.imm_sext() as u32);
            try_mem!(ctx.memory.write_u16(addr, ctx.reg(insn.rd) as u16));
        }
        Opcode::Mov => {
            ctx.set_reg(insn.rd, ctx.reg(insn.rs1));
        }

        Opcode::Add => binop(ctx, insn, |a, b| {
            let (r, c) = a.overflowing_add(b);
            let v = ((a as i32).checked_add(b as i32)).is_none();
            (r, c, v)
        }),
        Opcode::Sub => binop(ctx, insn, |a, b| {
            let (r, c) = a.overflowing_sub(b);
            let v = ((a as i32).checked_sub(b as i32)).is_none();
            (r, c, v)
        }),
        Opcode::Mul => binop(ctx, insn, |a, b| {
            let (r, c) = a.overflowing_mul(b);
            let v = ((a as i32).checked_mul(b as i32)).is_none();
            (r, c, v)
        }),
        Opcode::Div => {
            let a = ctx.reg(insn.rs1) as i32;
            let b = ctx.reg(insn.rs2) as i32;
            if b == 0 {
                return halt(ctx, VmFault::DivZero);
            }
            let r = a.wrapping_div(b) as u32;
            ctx.set_reg(insn.rd, r);
            ctx.psw.set_result_flags(r);
        }
        Opcode::And => binop(ctx, insn, |a, b| (a & b, false, false)),
        Opcode::Or => binop(ctx, insn, |a, b| (a | b, false, false)),
        Opcode::Xor => binop(ctx, insn, |a, b| (a ^ b, false, false)),
        Opcode::Not => {
            let r = !ctx.reg(insn.rs1);
            ctx.set_reg(insn.rd, r);
            ctx.psw.set_result_flags(r);
        }

        Opcode::Cmp => {
            let a = ctx.reg(insn.rs1);
            let b = ctx.reg(insn.rs2);
            let (r, c) = a.overflowing_sub(b);
            let v = ((a as i32).checked_sub(b as i32)).is_none();
            ctx.psw.set_result_flags(r);
            ctx.psw.set(Psw::C, c);
            ctx.psw.set(Psw::V, v);
        }
        Opcode::Jmp => {
            next_pc = insn.imm_zext();
        }
        Opcode::Jz => {
            if ctx.psw.contains(Psw::Z) {
                next_pc = insn.imm_zext();
            }
        }
        Opcode::Jnz => {
            if !ctx.psw.contains(Psw::Z) {
                next_pc = insn.imm_zext();
            }
        }
        Opcode::Call => {
            if ctx.call_stack.len() >= CALL_STACK_DEPTH {
                return halt(ctx, VmFault::StackOverflow);
            }
            ctx.call_stack.push(next_pc);
            next_pc = ctx.pc.wrapping_add((insn.imm_sext() as u32).wrapping_shl(2));
        }
        Opcode::Ret => match ctx.call_stack.pop() {
            Some(ret) => next_pc = ret,
            None => return halt(ctx, VmFault::StackUnderflow),
        },

        Opcode::Lsl => shift_op(ctx, insn, |v, n| v.wrapping_shl(n)),
        Opcode::Lsr => shift_op(ctx, insn, |v, n| v.wrapping_shr(n)),
        Opcode::Asr => shift_op(ctx, insn, |v, n| ((v as i32).wrapping_shr(n)) as u32),
        Opcode::Adc => {
            let a = ctx.reg(insn.rs1) as u64;
            let b = ctx.reg(insn.rs2) as u64;
            let c = if ctx.psw.contains(Psw::C) { 1 } else { 0 };
            let sum = a + b + c;
            let r = sum as u32;
            ctx.set_reg(insn.rd, r);
            ctx.psw.set_result_flags(r);
            ctx.psw.set(Psw::C, sum > u32::MAX as u64);
        }
        Opcode::Sbc => {
            let a = ctx.reg(insn.rs1) as i64;
            let b = ctx.reg(insn.rs2) as i64;
            let borrow_in = if ctx.psw.contains(Psw::C) { 0 } else { 1 };
            let diff = a - b - borrow_in;
            let r = diff as u32;
            ctx.set_reg(insn.rd, r);
            ctx.psw.set_result_flags(r);
            ctx.psw.set(Psw::C, diff >= 0);
        }

        Opcode::Push => {
            ctx.sp = ctx.sp.wrapping_sub(4);
            try_mem!(ctx.memory.write_u32(ctx.sp, ctx.reg(insn.rd)));
        }
        Opcode::Pop => {
            let v = try_mem!(ctx.memory.read_u32(ctx.sp));
            ctx.sp = ctx.sp.wrapping_add(4);
            ctx.set_reg(insn.rd, v);
        }

        Opcode::Fadd => fbinop(ctx, insn, |a, b| a + b),
        Opcode::Fsub => fbinop(ctx, insn, |a, b| a - b),
        Opcode::Fmul => fbinop(ctx, insn, |a, b| a * b),
        Opcode::Fdiv => fbinop(ctx, insn, |a, b| a / b),
        Opcode::I2f => {
            let i = ctx.reg(insn.rs1) as i32 as f32;
            ctx.set_reg(insn.rd, hsx_f16::f32_to_f16(i) as u32);
        }
        Opcode::F2i => {
            let f = hsx_f16::f16_to_f32(ctx.reg(insn.rs1) as u16);
            ctx.set_reg(insn.rd, f as i32 as u32);
        }

        Opcode::Svc => {
            let (m, f) = abi::svc::decode_svc_imm(insn.imm);
            match abi::SvcFamily::from_mod(m) {
                Some(abi::SvcFamily::Exec) => match exec_call(ctx, f) {
                    ExecOutcome::Continue => {}
                    ExecOutcome::Yield => return StepEvent::Yield,
                    ExecOutcome::Sleep(ms) => return StepEvent::Sleep { ms },
                    ExecOutcome::Exit(status) => return StepEvent::Exit { status },
                },
                Some(family) => match svc::dispatch(host, ctx, family, f) {
                    SvcOutcome::Value(v) => ctx.set_reg(0, v),
                    SvcOutcome::MailboxRecvBlocked { timeout_ms } => {
                        return StepEvent::MailboxBlocked { timeout_ms }
                    }
                },
                None => ctx.set_reg(0, ENOSYS),
            }
        }
        Opcode::Brk => {
            ctx.pc = next_pc;
            ctx.accounted_steps += 1;
            return StepEvent::Exit { status: insn.imm_zext() as i32 };
        }
    }

    ctx.pc = next_pc;
    ctx.accounted_steps += 1;
    StepEvent::Continue
}

fn halt(ctx: &mut TaskContext, fault: VmFault) -> StepEvent {
    ctx.set_reg(0, fault.code());
    ctx.accounted_steps += 1;
    StepEvent::Fault(fault)
}

fn binop(ctx: &mut TaskContext, insn: RawInstruction, f: impl Fn(u32, u32) -> (u32, bool, bool)) {
    let a = ctx.reg(insn.rs1);
    let b = ctx.reg(insn.rs2);
    let (r, c, v) = f(a, b);
    ctx.set_reg(insn.rd, r);
    ctx.psw.set_result_flags(r);
    ctx.psw.set(Psw::C, c);
    ctx.psw.set(Psw::V, v);
}

fn shift_op(ctx: &mut TaskContext, insn: RawInstruction, f: impl Fn(u32, u32) -> u32) {
    let a = ctx.reg(insn.rs1);
    let amount = ctx.reg(insn.rs2) % 32;
    let r = f(a, amount);
    ctx.set_reg(insn.rd, r);
    ctx.psw.set_result_flags(r);
    if amount == 0 {
        ctx.psw.remove(Psw::V);
    }
}

fn fbinop(ctx: &mut TaskContext, insn: RawInstruction, f: impl Fn(f32, f32) -> f32) {
    let a = hsx_f16::f16_to_f32(ctx.reg(insn.rs1) as u16);
    let b = hsx_f16::f16_to_f32(ctx.reg(insn.rs2) as u16);
    let r = f(a, b);
    ctx.set_reg(insn.rd, hsx_f16::f32_to_f16(r) as u32);
}

enum ExecOutcome {
    Continue,
    Yield,
    Sleep(u32),
    Exit(i32),
}

/// `EXEC` family function selectors (fixed by the opcode table's SVC
/// contract, spec §4.4): 0 = yield, 1 = sleep_ms, 2 = exit.
fn exec_call(ctx: &TaskContext, fn_sel: u8) -> ExecOutcome {
    match fn_sel {
        0 => ExecOutcome::Yield,
        1 => ExecOutcome::Sleep(ctx.reg(1)),
        2 => ExecOutcome::Exit(ctx.reg(1) as i32),
        _ => ExecOutcome::Continue,
    }
}
