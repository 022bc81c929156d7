//! BCJ2 decoder for x86 executables.
//!
//! BCJ2 is a 4-stream filter that separates CALL/JMP instruction destinations
//! into their own streams so they compress better.
//!
//! # Stream Layout
//!
//! - Stream 0 (Main): code with the branch operands removed
//! - Stream 1 (Call): CALL (E8) destinations, big-endian
//! - Stream 2 (Jump): JMP (E9) and Jcc destinations, big-endian
//! - Stream 3 (Range): range-coded "was converted" flags
//!
//! # Algorithm
//!
//! The decoder copies the main stream until it meets an E8, an E9 or a
//! `0F 8x` pair. For each such opcode it decodes one flag; if set, it takes
//! the next 4-byte absolute destination from the call or jump stream, turns
//! it into a relative operand and emits it little-endian.

use crate::{Error, Result};

/// Range decoder constants
mod range {
    pub const NUM_MOVE_BITS: u32 = 5;
    pub const NUM_BIT_MODEL_TOTAL_BITS: u32 = 11;
    pub const BIT_MODEL_TOTAL: u32 = 1 << NUM_BIT_MODEL_TOTAL_BITS;
    pub const NUM_TOP_BITS: u32 = 24;
    pub const TOP_VALUE: u32 = 1 << NUM_TOP_BITS;
    pub const INITIAL_PROB: u16 = (BIT_MODEL_TOTAL / 2) as u16;
}

/// Number of flag probabilities: 256 CALL contexts, one JMP, one Jcc.
const NUM_PROBS: usize = 256 + 2;

fn exhausted(stream: &str) -> Error {
    Error::DataError(format!("BCJ2 {} stream ended early", stream))
}

/// Binary range decoder over the fourth BCJ2 stream.
struct RangeDecoder<'a> {
    input: &'a [u8],
    pos: usize,
    range: u32,
    code: u32,
}

impl<'a> RangeDecoder<'a> {
    /// Seeds the decoder from the first 5 bytes.
    fn new(input: &'a [u8]) -> Result<Self> {
        let mut rc = Self {
            input,
            pos: 0,
            range: 0xFFFF_FFFF,
            code: 0,
        };
        for _ in 0..5 {
            rc.code = (rc.code << 8) | u32::from(rc.next_byte()?);
        }
        Ok(rc)
    }

    fn next_byte(&mut self) -> Result<u8> {
        let b = *self.input.get(self.pos).ok_or_else(|| exhausted("range"))?;
        self.pos += 1;
        Ok(b)
    }

    fn normalize(&mut self) -> Result<()> {
        if self.range < range::TOP_VALUE {
            self.range <<= 8;
            self.code = (self.code << 8) | u32::from(self.next_byte()?);
        }
        Ok(())
    }

    /// Decodes one bit and adapts `prob`.
    fn decode_bit(&mut self, prob: &mut u16) -> Result<bool> {
        let p = u32::from(*prob);
        let bound = (self.range >> range::NUM_BIT_MODEL_TOTAL_BITS) * p;
        let bit = if self.code < bound {
            self.range = bound;
            *prob = (p + ((range::BIT_MODEL_TOTAL - p) >> range::NUM_MOVE_BITS)) as u16;
            false
        } else {
            self.range -= bound;
            self.code -= bound;
            *prob = (p - (p >> range::NUM_MOVE_BITS)) as u16;
            true
        };
        self.normalize()?;
        Ok(bit)
    }
}

/// Returns whether the byte pair indicates a potential CALL/JMP.
#[inline]
fn is_jump(prev: u8, curr: u8) -> bool {
    (curr & 0xFE) == 0xE8 || is_jcc(prev, curr)
}

/// Returns whether the byte pair is a conditional jump (Jcc).
#[inline]
fn is_jcc(prev: u8, curr: u8) -> bool {
    prev == 0x0F && (curr & 0xF0) == 0x80
}

/// Returns the probability index for the given byte pair.
#[inline]
fn prob_index(prev: u8, curr: u8) -> usize {
    match curr {
        0xE8 => prev as usize, // CALL: previous byte is the context
        0xE9 => 256,
        _ => 257,
    }
}

/// Takes the next big-endian destination from a call or jump stream.
fn take_dest(stream: &mut &[u8], name: &str) -> Result<u32> {
    let (head, rest) = stream
        .split_first_chunk::<4>()
        .ok_or_else(|| exhausted(name))?;
    *stream = rest;
    Ok(u32::from_be_bytes(*head))
}

/// Merges the four BCJ2 streams into `output`, which must be filled exactly.
///
/// # Errors
///
/// [`Error::DataError`] if any stream runs out before `output` is full, or
/// if `main` is longer than `output`.
pub fn decode(
    main: &[u8],
    call: &[u8],
    jump: &[u8],
    range_stream: &[u8],
    output: &mut [u8],
) -> Result<()> {
    let main_start = output.len().checked_sub(main.len()).ok_or_else(|| {
        Error::DataError(format!(
            "BCJ2 main stream is {} bytes, output only {}",
            main.len(),
            output.len()
        ))
    })?;
    output[main_start..].copy_from_slice(main);
    decode_in_place(output, main_start, call, jump, range_stream)
}

/// Merges the BCJ2 streams when the main stream already sits at the end of
/// the output buffer, starting at `main_start`.
///
/// Output is written front to back, so for consistent streams each main
/// byte is read before its slot is overwritten. A write that overtakes the
/// unread main bytes is reported as [`Error::DataError`].
pub fn decode_in_place(
    buf: &mut [u8],
    main_start: usize,
    mut call: &[u8],
    mut jump: &[u8],
    range_stream: &[u8],
) -> Result<()> {
    let mut probs = [range::INITIAL_PROB; NUM_PROBS];
    let mut rc = RangeDecoder::new(range_stream)?;
    let out_size = buf.len();
    if main_start > out_size {
        return Err(Error::DataError("BCJ2 main stream starts past the output".into()));
    }

    let mut src = main_start;
    let mut out_pos = 0usize;
    let mut prev_byte = 0u8;

    while out_pos < out_size {
        let mut trigger = None;
        while out_pos < out_size && src < out_size {
            if out_pos > src {
                return Err(Error::DataError("BCJ2 output overran the main stream".into()));
            }
            let b = buf[src];
            src += 1;
            buf[out_pos] = b;
            out_pos += 1;
            if is_jump(prev_byte, b) {
                trigger = Some(b);
                break;
            }
            prev_byte = b;
        }

        let Some(b) = trigger else {
            break;
        };
        if out_pos == out_size {
            break;
        }

        let prob = &mut probs[prob_index(prev_byte, b)];
        if !rc.decode_bit(prob)? {
            prev_byte = b;
            continue;
        }

        let dest = if b == 0xE8 {
            take_dest(&mut call, "call")?
        } else {
            take_dest(&mut jump, "jump")?
        };
        let dest = dest.wrapping_sub(out_pos as u32 + 4);

        for byte in dest.to_le_bytes() {
            buf[out_pos] = byte;
            out_pos += 1;
            if out_pos == out_size {
                break;
            }
        }
        prev_byte = (dest >> 24) as u8;
    }

    if out_pos != out_size {
        return Err(Error::DataError(format!(
            "BCJ2 produced {} of {} bytes",
            out_pos, out_size
        )));
    }
    Ok(())
}
