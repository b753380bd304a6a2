// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Half-precision (binary16) float codec.
//!
//! Backs the `FADD/FSUB/FMUL/FDIV/I2F/F2I` opcodes (spec §4.1). Conversion
//! policy:
//!
//! - subnormals are preserved on both sides;
//! - any NaN payload decodes to an `f32` NaN; encoding always produces the
//!   canonical quiet NaN bit pattern `0x7E00`;
//! - `+inf`/`-inf` map to `0x7C00`/`0xFC00`;
//! - signed zero is preserved;
//! - encoding rounds with round-to-nearest-ties-to-even, including carry
//!   into the exponent on overflow (which produces `+-inf`).
#![forbid(unsafe_code)]

/// The canonical quiet NaN bit pattern produced by `f32_to_f16`.
pub const CANONICAL_NAN: u16 = 0x7E00;

const F16_EXP_MASK: u16 = 0x7C00;
const F16_MANT_MASK: u16 = 0x03FF;
const F16_SIGN_MASK: u16 = 0x8000;

/// Decodes a binary16 bit pattern to the nearest (here: exact) `f32`.
///
/// Every finite or infinite `f16` value is exactly representable as `f32`,
/// so this conversion never loses precision.
pub fn f16_to_f32(bits: u16) -> f32 {
    let sign_negative = bits & F16_SIGN_MASK != 0;
    let exp = (bits & F16_EXP_MASK) >> 10;
    let mant = (bits & F16_MANT_MASK) as u32;

    if exp == 0x1F {
        if mant == 0 {
            return if sign_negative { f32::NEG_INFINITY } else { f32::INFINITY };
        }
        // NaN: preserve that it is a NaN; re-use the mantissa as payload and
        // force the quiet bit so the result is always a quiet NaN.
        let f32_bits = 0x7F80_0000u32 | (mant << 13) | 0x0040_0000;
        let f32_bits = if sign_negative { f32_bits | 0x8000_0000 } else { f32_bits };
        return f32::from_bits(f32_bits);
    }

    let sign = if sign_negative { -1.0f64 } else { 1.0f64 };
    let value = if exp == 0 {
        if mant == 0 {
            return if sign_negative { -0.0f32 } else { 0.0f32 };
        }
        sign * (mant as f64) * 2f64.powi(-24)
    } else {
        sign * (1.0 + (mant as f64) / 1024.0) * 2f64.powi(exp as i32 - 15)
    };
    value as f32
}

/// Encodes an `f32` to the nearest binary16 value, rounding to nearest, ties
/// to even.
pub fn f32_to_f16(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign16 = ((bits >> 16) & 0x8000) as u16;
    let exp32 = ((bits >> 23) & 0xFF) as i32;
    let mant32 = bits & 0x007F_FFFF;

    if exp32 == 0xFF {
        return if mant32 != 0 { CANONICAL_NAN } else { sign16 | 0x7C00 };
    }
    if exp32 == 0 {
        // f32 zero or subnormal: magnitude is far below the smallest f16
        // subnormal (2^-24), so it always flushes to a signed zero.
        return sign16;
    }

    let unbiased = exp32 - 127;
    let new_exp = unbiased + 15;

    if new_exp >= 31 {
        return sign16 | 0x7C00;
    }

    if new_exp <= 0 {
        let full_mantissa = mant32 | 0x0080_0000;
        let shift = (14 - new_exp) as u32;
        let mant10 = round_shift_rne(full_mantissa, shift);
        if mant10 == 0 {
            return sign16;
        }
        if mant10 >= 0x0400 {
            // Rounded up past the largest subnormal: becomes the smallest
            // normal value.
            return sign16 | (1u16 << 10);
        }
        return sign16 | mant10 as u16;
    }

    let mant10 = round_shift_rne(mant32, 13);
    if mant10 & 0x0400 != 0 {
        let exp = new_exp + 1;
        if exp >= 31 {
            return sign16 | 0x7C00;
        }
        return sign16 | ((exp as u16) << 10);
    }
    sign16 | ((new_exp as u16) << 10) | (mant10 as u16 & F16_MANT_MASK)
}

/// Shifts `value` right by `shift` bits, rounding to nearest with ties
/// resolved toward an even result (round-to-nearest-ties-to-even).
fn round_shift_rne(value: u32, shift: u32) -> u32 {
    if shift == 0 {
        return value;
    }
    if shift > 32 {
        return 0;
    }
    let quotient = if shift < 32 { value >> shift } else { 0 };
    let round_bit = (value >> (shift - 1)) & 1;
    let sticky_mask = (1u32 << (shift - 1)) - 1;
    let sticky = value & sticky_mask != 0;
    if round_bit == 1 && (sticky || quotient & 1 == 1) {
        quotient + 1
    } else {
        quotient
    }
}
