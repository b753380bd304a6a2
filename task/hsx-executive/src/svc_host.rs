// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`kern::SvcHost`] implementation: the register-level calling convention
//! for the `IO`/`FS`/`MAILBOX`/`VAL`/`CMD` families (spec §4.4).
//!
//! The instruction set itself only fixes `EXEC`'s three selectors (spec
//! §4.4); the other families' argument layout is a contract between
//! generated code and the executive, not part of the wire format. This
//! module is where that contract is defined: arguments come in R1..R4,
//! `recv`'s result (status, length, flags, channel, src_pid) occupies
//! R0..R4 per spec §4.5, and every other call's status code goes to R0.

use abi::hxe::AuthLevel;
use abi::mailbox::{MailboxStatus, ModeMask, Namespace};
use hsx_mailbox::HandleId;
use kern::svc::{SvcHost, SvcOutcome};
use kern::TaskContext;

use crate::executive::Executive;
use crate::fs::FsError;

const MAX_CSTR: u32 = 256;

fn read_cstr(ctx: &TaskContext, ptr: u32, max_len: u32) -> Option<String> {
    let bytes = ctx.memory.slice(ptr, max_len.min(MAX_CSTR)).ok()?;
    let nul = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Some(String::from_utf8_lossy(&bytes[..nul]).into_owned())
}

fn fs_status(err: FsError) -> u32 {
    match err {
        FsError::InvalidPath => 1,
        FsError::NotFound => 2,
        FsError::TooManyOpen => 3,
        FsError::BadFd => 4,
        FsError::Io => 5,
    }
}

impl Executive {
    fn mailbox_bind(&mut self, ctx: &mut TaskContext) -> u32 {
        let Some(name) = read_cstr(ctx, ctx.reg(1), ctx.reg(2)) else { return 1 };
        let capacity = if ctx.reg(3) == 0 { None } else { Some(ctx.reg(3)) };
        let mode_mask = ModeMask::from_bits_truncate(ctx.reg(4) as u8);
        let target = match self.mailboxes.resolve(&name, ctx.pid) {
            Ok(t) => t,
            Err(_) => return 1,
        };
        match self.mailboxes.bind(target.namespace, &target.name, target.owner, capacity, Some(mode_mask)) {
            Ok(id) => {
                ctx.set_reg(1, id.0 as u32);
                MailboxStatus::Ok.code()
            }
            Err(status) => status.code(),
        }
    }

    fn mailbox_open(&mut self, ctx: &mut TaskContext) -> u32 {
        let Some(name) = read_cstr(ctx, ctx.reg(1), ctx.reg(2)) else { return 1 };
        let as_sender = ctx.reg(3) != 0;
        let target = match self.mailboxes.resolve(&name, ctx.pid) {
            Ok(t) => t,
            Err(_) => return 1,
        };
        match self.mailboxes.open(ctx.pid, target.namespace, &target.name, target.owner, as_sender) {
            Ok(handle) => {
                ctx.set_reg(1, handle.0 as u32);
                MailboxStatus::Ok.code()
            }
            Err(status) => status.code(),
        }
    }

    fn mailbox_close(&mut self, ctx: &mut TaskContext) -> u32 {
        let handle = HandleId(ctx.reg(1) as u64);
        match self.mailboxes.close(handle) {
            Ok(()) => MailboxStatus::Ok.code(),
            Err(status) => status.code(),
        }
    }

    fn mailbox_send(&mut self, ctx: &mut TaskContext) -> u32 {
        let handle = HandleId(ctx.reg(1) as u64);
        let payload_ptr = ctx.reg(2);
        let payload_len = ctx.reg(3);
        let channel = ctx.reg(4) as u16;
        let Ok(payload) = ctx.memory.slice(payload_ptr, payload_len) else { return 1 };
        match self.mailboxes.send(handle, ctx.pid, &payload, 0, channel) {
            Ok(outcome) => {
                let wake = outcome.to_wake.clone();
                let status = if outcome.enqueued { MailboxStatus::Ok } else { MailboxStatus::WouldBlock };
                self.deliver_wakes(wake);
                status.code()
            }
            Err(status) => status.code(),
        }
    }

    fn mailbox_recv(&mut self, ctx: &mut TaskContext) -> SvcOutcome {
        let handle = HandleId(ctx.reg(1) as u64);
        let buf_ptr = ctx.reg(2);
        let buf_cap = ctx.reg(3);
        let timeout_ms = ctx.reg(4);

        match self.mailboxes.recv(handle, timeout_ms > 0) {
            Ok(outcome) => match outcome.message {
                Some(msg) => {
                    let n = (msg.payload.len() as u32).min(buf_cap);
                    let _ = ctx.memory.write_slice(buf_ptr, &msg.payload[..n as usize]);
                    ctx.set_reg(1, msg.payload.len() as u32);
                    ctx.set_reg(2, msg.flags as u32);
                    ctx.set_reg(3, msg.channel as u32);
                    ctx.set_reg(4, msg.src_pid);
                    SvcOutcome::Value(MailboxStatus::Ok.code())
                }
                None if timeout_ms == 0 => SvcOutcome::Value(MailboxStatus::NoData.code()),
                None => {
                    self.pending_recv.insert(ctx.pid, (handle.0, buf_ptr, buf_cap));
                    SvcOutcome::MailboxRecvBlocked { timeout_ms }
                }
            },
            Err(status) => SvcOutcome::Value(status.code()),
        }
    }

    fn mailbox_peek(&mut self, ctx: &mut TaskContext) -> u32 {
        let handle = HandleId(ctx.reg(1) as u64);
        match self.mailboxes.peek(handle) {
            Ok(info) => {
                ctx.set_reg(1, info.depth as u32);
                ctx.set_reg(2, info.bytes_used);
                ctx.set_reg(3, info.capacity);
                ctx.set_reg(4, info.next_len.unwrap_or(u32::MAX));
                MailboxStatus::Ok.code()
            }
            Err(status) => status.code(),
        }
    }

    fn mailbox_tap(&mut self, ctx: &mut TaskContext) -> u32 {
        let handle = HandleId(ctx.reg(1) as u64);
        let enable = ctx.reg(2) != 0;
        match self.mailboxes.tap(handle, enable) {
            Ok(()) => MailboxStatus::Ok.code(),
            Err(status) => status.code(),
        }
    }

    fn val_get(&mut self, ctx: &mut TaskContext) -> u32 {
        let Some(name) = read_cstr(ctx, ctx.reg(1), ctx.reg(2)) else { return 1 };
        match self.registry.get_value(&name) {
            Ok(v) => {
                ctx.set_reg(1, v as u32);
                0
            }
            Err(_) => 1,
        }
    }

    fn val_set(&mut self, ctx: &mut TaskContext) -> u32 {
        let Some(name) = read_cstr(ctx, ctx.reg(1), ctx.reg(2)) else { return 1 };
        let value = ctx.reg(3) as i32;
        // A task writing its own value family operates at Admin level; RPC
        // callers are gated by their session's negotiated auth separately.
        match self.registry.set_value(&name, value, AuthLevel::Admin) {
            Ok(()) => 0,
            Err(_) => 1,
        }
    }

    fn val_subscribe(&mut self, ctx: &mut TaskContext) -> u32 {
        let Some(name) = read_cstr(ctx, ctx.reg(1), ctx.reg(2)) else { return 1 };
        match self.registry.subscribe_value(&name, ctx.pid) {
            Ok(()) => 0,
            Err(_) => 1,
        }
    }

    fn cmd_help(&mut self, ctx: &mut TaskContext) -> u32 {
        let Some(name) = read_cstr(ctx, ctx.reg(1), ctx.reg(2)) else { return 1 };
        match self.registry.help(&name) {
            Ok(help) => {
                let out_ptr = ctx.reg(3);
                let cap = ctx.reg(4);
                let bytes = help.as_bytes();
                let n = (bytes.len() as u32).min(cap);
                let _ = ctx.memory.write_slice(out_ptr, &bytes[..n as usize]);
                ctx.set_reg(1, bytes.len() as u32);
                0
            }
            Err(_) => 1,
        }
    }
}

impl SvcHost for Executive {
    fn io(&mut self, ctx: &mut TaskContext, fn_sel: u8) -> SvcOutcome {
        match fn_sel {
            0 => {
                // write(ptr, len): append to the bounded dmesg ring and emit
                // an io_log event for live tailers.
                let ptr = ctx.reg(1);
                let len = ctx.reg(2);
                match ctx.memory.slice(ptr, len) {
                    Ok(bytes) => {
                        let line = String::from_utf8_lossy(&bytes).into_owned();
                        self.push_dmesg(ctx.pid, &line);
                        SvcOutcome::ok(len)
                    }
                    Err(_) => SvcOutcome::ok(abi::svc::ENOSYS),
                }
            }
            _ => SvcOutcome::ok(abi::svc::ENOSYS),
        }
    }

    fn fs(&mut self, ctx: &mut TaskContext, fn_sel: u8) -> SvcOutcome {
        match fn_sel {
            0 => {
                let Some(path) = read_cstr(ctx, ctx.reg(1), ctx.reg(2)) else { return SvcOutcome::ok(1) };
                let write = ctx.reg(3) != 0;
                match self.fs.open(&path, write) {
                    Ok(fd) => {
                        ctx.set_reg(1, fd);
                        SvcOutcome::ok(0)
                    }
                    Err(e) => SvcOutcome::ok(fs_status(e)),
                }
            }
            1 => {
                let fd = ctx.reg(1);
                let buf_ptr = ctx.reg(2);
                let buf_cap = ctx.reg(3);
                let mut buf = vec![0u8; buf_cap as usize];
                match self.fs.read(fd, &mut buf) {
                    Ok(n) => {
                        let _ = ctx.memory.write_slice(buf_ptr, &buf[..n]);
                        ctx.set_reg(1, n as u32);
                        SvcOutcome::ok(0)
                    }
                    Err(e) => SvcOutcome::ok(fs_status(e)),
                }
            }
            2 => {
                let fd = ctx.reg(1);
                let data_ptr = ctx.reg(2);
                let len = ctx.reg(3);
                let Ok(data) = ctx.memory.slice(data_ptr, len) else { return SvcOutcome::ok(1) };
                match self.fs.write(fd, &data) {
                    Ok(n) => {
                        ctx.set_reg(1, n as u32);
                        SvcOutcome::ok(0)
                    }
                    Err(e) => SvcOutcome::ok(fs_status(e)),
                }
            }
            3 => {
                let fd = ctx.reg(1);
                match self.fs.close(fd) {
                    Ok(()) => SvcOutcome::ok(0),
                    Err(e) => SvcOutcome::ok(fs_status(e)),
                }
            }
            4 => {
                let Some(path) = read_cstr(ctx, ctx.reg(1), ctx.reg(2)) else { return SvcOutcome::ok(1) };
                match self.fs.listdir(&path) {
                    Ok(names) => {
                        let out_ptr = ctx.reg(3);
                        let cap = ctx.reg(4);
                        let joined = names.join("\n");
                        let bytes = joined.as_bytes();
                        let n = (bytes.len() as u32).min(cap);
                        let _ = ctx.memory.write_slice(out_ptr, &bytes[..n as usize]);
                        ctx.set_reg(1, bytes.len() as u32);
                        SvcOutcome::ok(0)
                    }
                    Err(e) => SvcOutcome::ok(fs_status(e)),
                }
            }
            5 => {
                let Some(path) = read_cstr(ctx, ctx.reg(1), ctx.reg(2)) else { return SvcOutcome::ok(1) };
                match self.fs.delete(&path) {
                    Ok(()) => SvcOutcome::ok(0),
                    Err(e) => SvcOutcome::ok(fs_status(e)),
                }
            }
            6 => {
                let Some(path) = read_cstr(ctx, ctx.reg(1), ctx.reg(2)) else { return SvcOutcome::ok(1) };
                match self.fs.mkdir(&path) {
                    Ok(()) => SvcOutcome::ok(0),
                    Err(e) => SvcOutcome::ok(fs_status(e)),
                }
            }
            7 => {
                let Some(from) = read_cstr(ctx, ctx.reg(1), ctx.reg(2)) else { return SvcOutcome::ok(1) };
                let Some(to) = read_cstr(ctx, ctx.reg(3), ctx.reg(4)) else { return SvcOutcome::ok(1) };
                match self.fs.rename(&from, &to) {
                    Ok(()) => SvcOutcome::ok(0),
                    Err(e) => SvcOutcome::ok(fs_status(e)),
                }
            }
            _ => SvcOutcome::ok(abi::svc::ENOSYS),
        }
    }

    fn mailbox(&mut self, ctx: &mut TaskContext, fn_sel: u8) -> SvcOutcome {
        match fn_sel {
            0 => SvcOutcome::ok(self.mailbox_bind(ctx)),
            1 => SvcOutcome::ok(self.mailbox_open(ctx)),
            2 => SvcOutcome::ok(self.mailbox_close(ctx)),
            3 => SvcOutcome::ok(self.mailbox_send(ctx)),
            4 => self.mailbox_recv(ctx),
            5 => SvcOutcome::ok(self.mailbox_peek(ctx)),
            6 => SvcOutcome::ok(self.mailbox_tap(ctx)),
            _ => SvcOutcome::ok(abi::svc::ENOSYS),
        }
    }

    fn val(&mut self, ctx: &mut TaskContext, fn_sel: u8) -> SvcOutcome {
        match fn_sel {
            0 => SvcOutcome::ok(self.val_get(ctx)),
            1 => SvcOutcome::ok(self.val_set(ctx)),
            2 => SvcOutcome::ok(self.val_subscribe(ctx)),
            _ => SvcOutcome::ok(abi::svc::ENOSYS),
        }
    }

    fn cmd(&mut self, ctx: &mut TaskContext, fn_sel: u8) -> SvcOutcome {
        match fn_sel {
            0 => SvcOutcome::ok(self.cmd_help(ctx)),
            _ => SvcOutcome::ok(abi::svc::ENOSYS),
        }
    }
}

pub(crate) fn namespace_label(ns: Namespace) -> &'static str {
    match ns {
        Namespace::Pid => "pid",
        Namespace::Svc => "svc",
        Namespace::App => "app",
        Namespace::Shared => "shared",
    }
}
