//! Single-stream branch filters (x86 BCJ, ARM-Thumb).
//!
//! These filters rewrite the operands of branch instructions between relative
//! and absolute form. Encoding turns relative targets into absolute ones,
//! which repeat more often and compress better; decoding undoes it. Both work
//! in place.
//!
//! # Algorithm
//!
//! For encoding: `target = operand + position`
//! For decoding: `operand = target - position`

/// Bytes an x86 `CALL`/`JMP` occupies: opcode plus a 32-bit operand.
const X86_INSTRUCTION_LEN: usize = 5;

/// Whether a candidate may be converted, indexed by the previous-match mask.
const MASK_TO_ALLOWED_STATUS: [bool; 8] = [true, true, true, false, true, false, false, false];

/// Operand byte to re-test for each previous-match mask.
const MASK_TO_BIT_NUMBER: [u32; 8] = [0, 1, 2, 2, 3, 3, 3, 3];

/// An operand's top byte is plausible only if it is a sign extension.
#[inline]
fn test_x86_ms_byte(b: u8) -> bool {
    b == 0 || b == 0xFF
}

/// Runs the x86 BCJ conversion over `data`.
///
/// `ip` is the stream position of `data[0]`, and `state` carries the
/// previous-match mask between calls. Returns the number of bytes fully
/// processed; the last four bytes are never converted because an operand
/// might continue past the buffer.
pub fn x86_convert(data: &mut [u8], ip: u32, state: &mut u32, encoding: bool) -> usize {
    if data.len() < X86_INSTRUCTION_LEN {
        return 0;
    }

    let ip = ip.wrapping_add(X86_INSTRUCTION_LEN as u32);
    let limit = data.len() - 4;
    let mut prev_mask = *state & 7;
    let mut pos = 0usize;
    let mut prev_pos = usize::MAX;

    loop {
        while pos < limit && data[pos] & 0xFE != 0xE8 {
            pos += 1;
        }
        if pos >= limit {
            break;
        }

        let distance = pos.wrapping_sub(prev_pos);
        if distance > 3 {
            prev_mask = 0;
        } else {
            prev_mask = (prev_mask << (distance - 1)) & 7;
            if prev_mask != 0 {
                let b = data[pos + 4 - MASK_TO_BIT_NUMBER[prev_mask as usize] as usize];
                if !MASK_TO_ALLOWED_STATUS[prev_mask as usize] || test_x86_ms_byte(b) {
                    prev_pos = pos;
                    prev_mask = ((prev_mask << 1) & 7) | 1;
                    pos += 1;
                    continue;
                }
            }
        }
        prev_pos = pos;

        if !test_x86_ms_byte(data[pos + 4]) {
            prev_mask = ((prev_mask << 1) & 7) | 1;
            pos += 1;
            continue;
        }

        let mut src = u32::from_le_bytes([data[pos + 1], data[pos + 2], data[pos + 3], data[pos + 4]]);
        let here = ip.wrapping_add(pos as u32);
        let mut dest;
        loop {
            dest = if encoding {
                here.wrapping_add(src)
            } else {
                src.wrapping_sub(here)
            };
            if prev_mask == 0 {
                break;
            }
            let index = MASK_TO_BIT_NUMBER[prev_mask as usize] * 8;
            if !test_x86_ms_byte((dest >> (24 - index)) as u8) {
                break;
            }
            src = dest ^ ((1u32 << (32 - index)) - 1);
        }

        let bytes = dest.to_le_bytes();
        data[pos + 1] = bytes[0];
        data[pos + 2] = bytes[1];
        data[pos + 3] = bytes[2];
        data[pos + 4] = if dest & (1 << 24) != 0 { 0xFF } else { 0x00 };
        pos += X86_INSTRUCTION_LEN;
    }

    let distance = pos.wrapping_sub(prev_pos);
    *state = if distance > 3 {
        0
    } else {
        (prev_mask << (distance - 1)) & 7
    };
    pos
}

/// Streaming state for the x86 BCJ filter.
#[derive(Debug, Clone, Default)]
pub struct X86Filter {
    ip: u32,
    state: u32,
}

impl X86Filter {
    /// Creates a filter positioned at stream offset 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a filter positioned at stream offset `ip`.
    pub fn with_start(ip: u32) -> Self {
        Self { ip, state: 0 }
    }

    /// Converts absolute targets back to relative operands.
    ///
    /// Returns how many leading bytes are final; the caller passes the rest
    /// again, followed by more data, on the next call.
    pub fn decode(&mut self, data: &mut [u8]) -> usize {
        self.run(data, false)
    }

    /// Converts relative operands to absolute targets.
    pub fn encode(&mut self, data: &mut [u8]) -> usize {
        self.run(data, true)
    }

    fn run(&mut self, data: &mut [u8], encoding: bool) -> usize {
        let done = x86_convert(data, self.ip, &mut self.state, encoding);
        self.ip = self.ip.wrapping_add(done as u32);
        done
    }
}

/// Runs the ARM-Thumb `BL`/`BLX` conversion over `data`.
///
/// Instruction pairs are matched at every 2-byte-aligned offset. Returns the
/// offset where scanning stopped.
pub fn arm_thumb_convert(data: &mut [u8], ip: u32, encoding: bool) -> usize {
    if data.len() < 4 {
        return 0;
    }

    let last = data.len() - 4;
    let ip = ip.wrapping_add(4);
    let mut i = 0usize;
    while i <= last {
        if data[i + 1] & 0xF8 == 0xF0 && data[i + 3] & 0xF8 == 0xF8 {
            let src = ((u32::from(data[i + 1]) & 7) << 19)
                | (u32::from(data[i]) << 11)
                | ((u32::from(data[i + 3]) & 7) << 8)
                | u32::from(data[i + 2]);
            let src = src << 1;
            let here = ip.wrapping_add(i as u32);
            let dest = if encoding {
                here.wrapping_add(src)
            } else {
                src.wrapping_sub(here)
            } >> 1;

            data[i + 1] = 0xF0 | ((dest >> 19) & 7) as u8;
            data[i] = (dest >> 11) as u8;
            data[i + 3] = 0xF8 | ((dest >> 8) & 7) as u8;
            data[i + 2] = dest as u8;
            i += 2;
        }
        i += 2;
    }
    i
}
