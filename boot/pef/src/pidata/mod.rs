//! Pattern-Initialized Data
//!
//! PI-data sections are stored as a stream of small instructions that
//! describe zero runs, literal blocks and repeating patterns. Each
//! instruction starts with one byte: a 3-bit opcode in the high bits and a
//! 5-bit count in the low bits. A count field of zero means the real count
//! follows as a variable-length value (see [`ByteCursor::read_count`]).
//!
//! | opcode | name         | operands               | output                                  |
//! |--------|--------------|------------------------|-----------------------------------------|
//! | 0      | zero         | -                      | `count` zero bytes                      |
//! | 1      | block        | `count` bytes          | the bytes                               |
//! | 2      | repeat       | `rpt`, `count` bytes   | the bytes, `rpt + 1` times              |
//! | 3      | repeat block | `custom`, `rpt`, data  | common, then `rpt` x (custom, common)   |
//! | 4      | repeat zero  | `custom`, `rpt`, data  | zeros, then `rpt - 1` x (custom, zeros) |

pub mod pack;

pub use pack::{encode_all, pack, write_count, Instruction, PackError};

use alloc::vec::Vec;

use crate::config::UnpackConfig;
use crate::cursor::ByteCursor;
use crate::error::UnpackError;
use crate::format::SectionHeader;
use crate::memory::{SectionAllocator, SystemAllocator};

/// Bits the opcode is shifted by in an instruction byte
pub const OPCODE_SHIFT: u8 = 5;

/// Mask of the short count in an instruction byte
pub const SHORT_COUNT_MASK: u8 = 0x1F;

// =============================================================================
// OPCODES
// =============================================================================

/// PI-data instruction opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Zero fill
    Zero = 0,
    /// Literal block
    Block = 1,
    /// Repeated pattern
    Repeat = 2,
    /// Common pattern interleaved with custom blocks
    RepeatBlock = 3,
    /// Zero runs interleaved with custom blocks
    RepeatZero = 4,
}

impl Opcode {
    /// From the 3-bit opcode field
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Zero),
            1 => Some(Self::Block),
            2 => Some(Self::Repeat),
            3 => Some(Self::RepeatBlock),
            4 => Some(Self::RepeatZero),
            _ => None,
        }
    }

    /// Split an instruction byte into raw opcode and short count
    pub fn split(byte: u8) -> (u8, u8) {
        (byte >> OPCODE_SHIFT, byte & SHORT_COUNT_MASK)
    }
}

// =============================================================================
// OUTPUT WINDOW
// =============================================================================

/// Write side of the decompressor; every write is bounds checked up front
struct Output<'o> {
    buf: &'o mut [u8],
    pos: usize,
}

impl<'o> Output<'o> {
    fn new(buf: &'o mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn reserve(&self, len: usize) -> Result<core::ops::Range<usize>, UnpackError> {
        match self.pos.checked_add(len) {
            Some(end) if end <= self.buf.len() => Ok(self.pos..end),
            _ => Err(UnpackError::Overflow {
                offset: self.pos,
                len,
                capacity: self.buf.len(),
            }),
        }
    }

    fn fill(&mut self, byte: u8, len: usize) -> Result<(), UnpackError> {
        let range = self.reserve(len)?;
        self.pos = range.end;
        self.buf[range].fill(byte);
        Ok(())
    }

    fn copy(&mut self, src: &[u8]) -> Result<(), UnpackError> {
        let range = self.reserve(src.len())?;
        self.pos = range.end;
        self.buf[range].copy_from_slice(src);
        Ok(())
    }
}

// =============================================================================
// DECOMPRESSOR
// =============================================================================

/// Run a PI-data instruction stream into `output`.
///
/// Returns the number of bytes produced. Stops at the first instruction that
/// would write past `output`, reads past `packed`, or uses an unknown opcode.
pub fn expand(packed: &[u8], output: &mut [u8]) -> Result<usize, UnpackError> {
    let mut cursor = ByteCursor::new(packed);
    let mut out = Output::new(output);

    while !cursor.is_empty() {
        let (raw_op, short_count) = Opcode::split(cursor.next_byte()?);
        let count = if short_count == 0 {
            cursor.read_count()? as usize
        } else {
            usize::from(short_count)
        };

        let opcode = Opcode::from_raw(raw_op).ok_or(UnpackError::UnknownOpcode(raw_op))?;

        match opcode {
            Opcode::Zero => out.fill(0, count)?,

            Opcode::Block => out.copy(cursor.take(count)?)?,

            Opcode::Repeat => {
                let repeat = (cursor.read_count()? as usize).saturating_add(1);
                if count == 1 {
                    let byte = cursor.next_byte()?;
                    out.fill(byte, repeat)?;
                } else {
                    // The pattern is read once and replayed from the same spot.
                    let pattern = cursor.take(count)?;
                    if !pattern.is_empty() {
                        for _ in 0..repeat {
                            out.copy(pattern)?;
                        }
                    }
                }
            }

            Opcode::RepeatBlock => {
                let custom = cursor.read_count()? as usize;
                let repeat = cursor.read_count()? as usize;
                let common = cursor.take(count)?;

                out.copy(common)?;
                if count != 0 || custom != 0 {
                    for _ in 0..repeat {
                        out.copy(cursor.take(custom)?)?;
                        out.copy(common)?;
                    }
                }
            }

            Opcode::RepeatZero => {
                let custom = cursor.read_count()? as usize;
                let repeat = cursor.read_count()? as usize;

                // Leading zero run is emitted even when `repeat` is 0.
                out.fill(0, count)?;
                if count != 0 || custom != 0 {
                    for _ in 1..repeat {
                        out.copy(cursor.take(custom)?)?;
                        out.fill(0, count)?;
                    }
                }
            }
        }
    }

    Ok(out.pos)
}

/// Unpack a PI-data section with the system allocator and default settings
pub fn unpack_pi_data(container: &[u8], section: &SectionHeader) -> Result<Vec<u8>, UnpackError> {
    unpack_pi_data_with(container, section, &SystemAllocator, &UnpackConfig::default())
}

/// Unpack a PI-data section into a buffer from `allocator`.
///
/// The returned buffer is exactly `section.unpacked_size` bytes. Bytes the
/// instruction stream does not describe stay zero. On error the buffer has
/// already been released back to `allocator`.
pub fn unpack_pi_data_with<A: SectionAllocator>(
    container: &[u8],
    section: &SectionHeader,
    allocator: &A,
    config: &UnpackConfig,
) -> Result<Vec<u8>, UnpackError> {
    if !section.is_pattern_init() {
        return Err(UnpackError::WrongSectionKind);
    }

    let packed = section
        .packed_range()
        .and_then(|range| container.get(range))
        .ok_or(UnpackError::SectionOutOfBounds)?;

    let len = section.unpacked_size as usize;
    if !config.permits(len) {
        log::warn!("PI-data section of {} bytes exceeds the unpack limit", len);
        return Err(UnpackError::OutOfMemory);
    }

    let mut buffer = allocator.allocate(len).ok_or(UnpackError::OutOfMemory)?;
    if buffer.len() != len {
        allocator.release(buffer);
        return Err(UnpackError::OutOfMemory);
    }

    log::debug!(
        "Unpacking PI-data at {:#x}: {} packed -> {} bytes",
        section.container_offset,
        packed.len(),
        len
    );

    let result = expand(packed, &mut buffer).and_then(|written| {
        if config.require_exact_fill && written != len {
            Err(UnpackError::Underfilled { written, expected: len })
        } else {
            Ok(written)
        }
    });

    match result {
        Ok(written) => {
            if written != len {
                log::debug!("PI-data described {} of {} bytes, rest left zero", written, len);
            }
            Ok(buffer)
        }
        Err(err) => {
            log::warn!("PI-data unpack failed: {}", err);
            allocator.release(buffer);
            Err(err)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
