// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Processor status word flags.

bitflags::bitflags! {
    /// Condition flags set by arithmetic and logical opcodes.
    #[derive(Default)]
    pub struct Psw: u8 {
        /// Result was zero.
        const Z = 0b0001;
        /// Unsigned carry/borrow out.
        const C = 0b0010;
        /// Bit 31 of the result was set.
        const N = 0b0100;
        /// Signed overflow.
        const V = 0b1000;
    }
}

impl Psw {
    /// Recomputes Z/N from a result value, leaving C/V untouched.
    pub fn set_result_flags(&mut self, result: u32) {
        self.set(Psw::Z, result == 0);
        self.set(Psw::N, result & 0x8000_0000 != 0);
    }
}
