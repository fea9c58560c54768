//! PI-Data Encoding
//!
//! Instruction encoder and a reference packer. The packer only emits zero
//! runs, single-byte repeats and literal blocks; the interleaved forms are
//! available through [`Instruction`] for callers that already know their
//! data layout.

use alloc::vec::Vec;
use core::fmt;

use super::{Opcode, OPCODE_SHIFT, SHORT_COUNT_MASK};
use crate::cursor::{COUNT_CONTINUE, COUNT_PAYLOAD, MAX_COUNT_BYTES};

/// Shortest zero run worth its own instruction
const MIN_ZERO_RUN: usize = 2;

/// Shortest single-byte run worth a repeat instruction
const MIN_REPEAT_RUN: usize = 4;

// =============================================================================
// ERRORS
// =============================================================================

/// Encoding failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackError {
    /// A count does not fit in 32 bits
    CountTooLarge,
    /// A repeat instruction with zero copies
    EmptyRepeat,
    /// Custom blocks of an interleaved instruction differ in length
    UnevenCustomBlocks,
}

impl fmt::Display for PackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountTooLarge => write!(f, "count does not fit in 32 bits"),
            Self::EmptyRepeat => write!(f, "repeat instruction needs at least one copy"),
            Self::UnevenCustomBlocks => write!(f, "custom blocks differ in length"),
        }
    }
}

impl core::error::Error for PackError {}

fn count_u32(value: usize) -> Result<u32, PackError> {
    u32::try_from(value).map_err(|_| PackError::CountTooLarge)
}

// =============================================================================
// COUNT ENCODING
// =============================================================================

/// Append a variable-length count, most significant 7-bit group first
pub fn write_count(out: &mut Vec<u8>, value: u32) {
    let mut groups = 1;
    while groups < MAX_COUNT_BYTES && (value >> (7 * groups)) != 0 {
        groups += 1;
    }

    for i in (0..groups).rev() {
        let payload = ((value >> (7 * i)) as u8) & COUNT_PAYLOAD;
        if i == 0 {
            out.push(payload);
        } else {
            out.push(payload | COUNT_CONTINUE);
        }
    }
}

fn write_op(out: &mut Vec<u8>, opcode: Opcode, count: u32) {
    let op = (opcode as u8) << OPCODE_SHIFT;
    if count != 0 && count <= u32::from(SHORT_COUNT_MASK) {
        out.push(op | count as u8);
    } else {
        out.push(op);
        write_count(out, count);
    }
}

fn uniform_len(blocks: &[&[u8]]) -> Result<usize, PackError> {
    let len = blocks.first().map_or(0, |b| b.len());
    if blocks.iter().any(|b| b.len() != len) {
        return Err(PackError::UnevenCustomBlocks);
    }
    Ok(len)
}

// =============================================================================
// INSTRUCTIONS
// =============================================================================

/// One PI-data instruction with its operand bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    /// Zero run
    Zero(usize),
    /// Literal bytes
    Block(&'a [u8]),
    /// `pattern` written `copies` times
    Repeat {
        /// Repeated bytes
        pattern: &'a [u8],
        /// Number of copies, at least one
        copies: usize,
    },
    /// `common`, then each custom block followed by `common`
    RepeatBlock {
        /// Pattern emitted around every custom block
        common: &'a [u8],
        /// Equal-length custom blocks
        customs: &'a [&'a [u8]],
    },
    /// `zero_len` zeros, then each custom block followed by `zero_len` zeros
    RepeatZero {
        /// Length of each zero run
        zero_len: usize,
        /// Equal-length custom blocks
        customs: &'a [&'a [u8]],
    },
}

impl Instruction<'_> {
    /// Bytes this instruction expands to
    pub fn unpacked_len(&self) -> usize {
        match *self {
            Self::Zero(len) => len,
            Self::Block(bytes) => bytes.len(),
            Self::Repeat { pattern, copies } => pattern.len() * copies,
            Self::RepeatBlock { common, customs } => {
                common.len() * (customs.len() + 1) + customs.iter().map(|c| c.len()).sum::<usize>()
            }
            Self::RepeatZero { zero_len, customs } => {
                zero_len * (customs.len() + 1) + customs.iter().map(|c| c.len()).sum::<usize>()
            }
        }
    }

    /// Append the encoded instruction to `out`
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), PackError> {
        match *self {
            Self::Zero(len) => write_op(out, Opcode::Zero, count_u32(len)?),

            Self::Block(bytes) => {
                write_op(out, Opcode::Block, count_u32(bytes.len())?);
                out.extend_from_slice(bytes);
            }

            Self::Repeat { pattern, copies } => {
                if copies == 0 {
                    return Err(PackError::EmptyRepeat);
                }
                write_op(out, Opcode::Repeat, count_u32(pattern.len())?);
                write_count(out, count_u32(copies - 1)?);
                out.extend_from_slice(pattern);
            }

            Self::RepeatBlock { common, customs } => {
                let custom_len = uniform_len(customs)?;
                write_op(out, Opcode::RepeatBlock, count_u32(common.len())?);
                write_count(out, count_u32(custom_len)?);
                write_count(out, count_u32(customs.len())?);
                out.extend_from_slice(common);
                for custom in customs {
                    out.extend_from_slice(custom);
                }
            }

            Self::RepeatZero { zero_len, customs } => {
                let custom_len = uniform_len(customs)?;
                write_op(out, Opcode::RepeatZero, count_u32(zero_len)?);
                write_count(out, count_u32(custom_len)?);
                // Zero runs outnumber custom blocks by one.
                write_count(out, count_u32(customs.len() + 1)?);
                for custom in customs {
                    out.extend_from_slice(custom);
                }
            }
        }
        Ok(())
    }
}

/// Encode a sequence of instructions
pub fn encode_all(instructions: &[Instruction<'_>]) -> Result<Vec<u8>, PackError> {
    let mut out = Vec::new();
    for instruction in instructions {
        instruction.encode(&mut out)?;
    }
    Ok(out)
}

// =============================================================================
// REFERENCE PACKER
// =============================================================================

fn run_length(data: &[u8], start: usize) -> usize {
    let byte = data[start];
    data[start..].iter().take_while(|&&b| b == byte).count()
}

fn worth_encoding(byte: u8, run: usize) -> bool {
    (byte == 0 && run >= MIN_ZERO_RUN) || run >= MIN_REPEAT_RUN
}

/// Pack `data` so that unpacking reproduces it byte for byte
pub fn pack(data: &[u8]) -> Result<Vec<u8>, PackError> {
    let mut out = Vec::new();
    let mut pos = 0;
    let mut literal_start = 0;

    while pos < data.len() {
        let byte = data[pos];
        let run = run_length(data, pos);

        if !worth_encoding(byte, run) {
            pos += run;
            continue;
        }

        if literal_start < pos {
            Instruction::Block(&data[literal_start..pos]).encode(&mut out)?;
        }

        if byte == 0 {
            Instruction::Zero(run).encode(&mut out)?;
        } else {
            Instruction::Repeat { pattern: &data[pos..pos + 1], copies: run }.encode(&mut out)?;
        }

        pos += run;
        literal_start = pos;
    }

    if literal_start < data.len() {
        Instruction::Block(&data[literal_start..]).encode(&mut out)?;
    }

    Ok(out)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::ByteCursor;
    use crate::pidata::expand;
    use alloc::vec;

    fn unpack(packed: &[u8], len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        assert_eq!(expand(packed, &mut out), Ok(len));
        out
    }

    #[test]
    fn test_write_count_forms() {
        let mut out = Vec::new();
        write_count(&mut out, 5);
        assert_eq!(out, vec![0x05]);

        out.clear();
        write_count(&mut out, 130);
        assert_eq!(out, vec![0x81, 0x02]);

        out.clear();
        write_count(&mut out, u32::MAX);
        assert_eq!(out.len(), 5);
        assert_eq!(ByteCursor::new(&out).read_count(), Ok(u32::MAX));
    }

    #[test]
    fn test_short_and_long_opcode_counts() {
        let mut out = Vec::new();
        Instruction::Zero(31).encode(&mut out).unwrap();
        assert_eq!(out, vec![0x1F]);

        out.clear();
        Instruction::Zero(32).encode(&mut out).unwrap();
        assert_eq!(out, vec![0x00, 0x20]);

        out.clear();
        Instruction::Zero(0).encode(&mut out).unwrap();
        assert_eq!(out, vec![0x00, 0x00]);
    }

    #[test]
    fn test_interleaved_instructions() {
        let customs: [&[u8]; 2] = [&[1, 2], &[3, 4]];
        let program = [
            Instruction::RepeatBlock { common: &[9], customs: &customs },
            Instruction::RepeatZero { zero_len: 3, customs: &customs },
        ];
        let total: usize = program.iter().map(|i| i.unpacked_len()).sum();
        assert_eq!(total, 7 + 13);

        let packed = encode_all(&program).unwrap();
        let out = unpack(&packed, total);
        assert_eq!(&out[..7], &[9, 1, 2, 9, 3, 4, 9]);
        assert_eq!(&out[7..], &[0, 0, 0, 1, 2, 0, 0, 0, 3, 4, 0, 0, 0]);
    }

    #[test]
    fn test_encode_rejects_bad_shapes() {
        let uneven: [&[u8]; 2] = [&[1], &[2, 3]];
        let mut out = Vec::new();
        assert_eq!(
            Instruction::RepeatBlock { common: &[0], customs: &uneven }.encode(&mut out),
            Err(PackError::UnevenCustomBlocks)
        );
        assert_eq!(
            Instruction::Repeat { pattern: &[1], copies: 0 }.encode(&mut out),
            Err(PackError::EmptyRepeat)
        );
    }

    #[test]
    fn test_pack_round_trip() {
        let mut data = vec![0u8; 100];
        data.extend_from_slice(b"boot");
        data.extend_from_slice(&[0xFF; 9]);
        data.extend_from_slice(&[1, 0, 2, 2, 2, 3]);
        data.extend_from_slice(&[0u8; 3]);
        data.extend((0..=255u8).cycle().take(600));

        let packed = pack(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(unpack(&packed, data.len()), data);
    }

    #[test]
    fn test_pack_edges() {
        assert!(pack(&[]).unwrap().is_empty());
        assert_eq!(unpack(&pack(&[7]).unwrap(), 1), vec![7]);
        assert_eq!(unpack(&pack(&[0]).unwrap(), 1), vec![0]);
        assert_eq!(pack(&[0, 0]).unwrap(), vec![0x02]);
    }
}
