//! Error types for PEF loading
//!
//! Two layers of errors exist: [`UnpackError`] for the PI-data decompressor
//! and [`PefError`] for container parsing and symbol resolution. Both map to
//! the classic Mac OS status codes through `code()` so callers that speak
//! `OSStatus` can keep doing so.

use core::fmt;

/// Result type for container and symbol operations
pub type Result<T> = core::result::Result<T, PefError>;

// =============================================================================
// STATUS CODES
// =============================================================================

/// Classic Mac OS status values reported by `code()`
pub mod status {
    /// Success
    pub const NO_ERR: i32 = 0;
    /// Bad parameter or malformed data
    pub const PARAM_ERR: i32 = -50;
    /// Allocation failed
    pub const MEM_FULL_ERR: i32 = -108;
    /// Export not found
    pub const CFRAG_NO_SYMBOL_ERR: i32 = -2802;
    /// Section not found
    pub const CFRAG_NO_SECTION_ERR: i32 = -2803;
    /// Fragment data is damaged
    pub const CFRAG_FRAGMENT_CORRUPT_ERR: i32 = -2820;
}

// =============================================================================
// UNPACK ERRORS
// =============================================================================

/// PI-data decompression failure
///
/// No partial output is ever returned alongside one of these; the output
/// buffer has already been handed back to the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackError {
    /// Section is not pattern-initialized data
    WrongSectionKind,

    /// Packed bytes lie outside the container
    SectionOutOfBounds,

    /// Output buffer could not be allocated
    OutOfMemory,

    /// Instruction stream ended inside an instruction
    Truncated,

    /// A write would run past the unpacked size
    Overflow {
        /// Output offset of the rejected write
        offset: usize,
        /// Length of the rejected write
        len: usize,
        /// Declared unpacked size
        capacity: usize,
    },

    /// Opcode outside the five defined kinds
    UnknownOpcode(u8),

    /// Stream finished before the output was filled (exact-fill mode only)
    Underfilled {
        /// Bytes produced
        written: usize,
        /// Bytes declared
        expected: usize,
    },
}

impl UnpackError {
    /// Mac OS status code for this error
    pub fn code(&self) -> i32 {
        match self {
            Self::OutOfMemory => status::MEM_FULL_ERR,
            _ => status::PARAM_ERR,
        }
    }

    /// Whether the packed data itself is damaged
    pub fn is_corruption(&self) -> bool {
        matches!(self,
            Self::Truncated |
            Self::Overflow { .. } |
            Self::UnknownOpcode(_) |
            Self::Underfilled { .. }
        )
    }
}

impl fmt::Display for UnpackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongSectionKind => write!(f, "section is not pattern-initialized data"),
            Self::SectionOutOfBounds => write!(f, "packed section lies outside the container"),
            Self::OutOfMemory => write!(f, "unable to allocate unpack buffer"),
            Self::Truncated => write!(f, "packed data ended inside an instruction"),
            Self::Overflow { offset, len, capacity } => write!(
                f,
                "write of {} bytes at offset {} overflows {} byte section",
                len, offset, capacity
            ),
            Self::UnknownOpcode(op) => write!(f, "unknown PI-data opcode {}", op),
            Self::Underfilled { written, expected } => write!(
                f,
                "packed data produced {} of {} bytes",
                written, expected
            ),
        }
    }
}

impl core::error::Error for UnpackError {}

// =============================================================================
// PEF ERRORS
// =============================================================================

/// Container parsing and symbol resolution failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PefError {
    /// Magic cookie or container ID mismatch
    BadFormat,

    /// Container ends before a declared header or range
    Truncated,

    /// A parameter was incorrect
    InvalidParameter,

    /// Allocation failed
    OutOfMemory,

    /// No loader section, or an export points at a missing section
    NoSuchSection,

    /// Export not present
    NoSuchSymbol,

    /// Decompressing the owning section failed
    FragmentCorrupt,
}

impl PefError {
    /// Mac OS status code for this error
    ///
    /// `BadFormat` reports `paramErr`, matching the boot-time lookup routine.
    pub fn code(&self) -> i32 {
        match self {
            Self::BadFormat | Self::InvalidParameter | Self::Truncated => status::PARAM_ERR,
            Self::OutOfMemory => status::MEM_FULL_ERR,
            Self::NoSuchSection => status::CFRAG_NO_SECTION_ERR,
            Self::NoSuchSymbol => status::CFRAG_NO_SYMBOL_ERR,
            Self::FragmentCorrupt => status::CFRAG_FRAGMENT_CORRUPT_ERR,
        }
    }

    /// Check if this is an expected lookup miss rather than damage
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchSection | Self::NoSuchSymbol)
    }

    /// Check if this is a resource error
    pub fn is_resource_error(&self) -> bool {
        matches!(self, Self::OutOfMemory)
    }

    /// Get error name as string
    pub fn name(&self) -> &'static str {
        match self {
            Self::BadFormat => "BAD_FORMAT",
            Self::Truncated => "TRUNCATED",
            Self::InvalidParameter => "INVALID_PARAMETER",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::NoSuchSection => "NO_SUCH_SECTION",
            Self::NoSuchSymbol => "NO_SUCH_SYMBOL",
            Self::FragmentCorrupt => "FRAGMENT_CORRUPT",
        }
    }
}

/// Mac OS status for a finished call, `noErr` on success
pub fn os_status<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => status::NO_ERR,
        Err(err) => err.code(),
    }
}

/// Allocation failure stays a resource error; any other unpack failure
/// means the fragment's PI-data is damaged.
impl From<UnpackError> for PefError {
    fn from(err: UnpackError) -> Self {
        match err {
            UnpackError::OutOfMemory => Self::OutOfMemory,
            _ => Self::FragmentCorrupt,
        }
    }
}

impl fmt::Display for PefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PEF Error: {} ({})", self.name(), self.code())
    }
}

impl core::error::Error for PefError {}

// =============================================================================
// TESTS
// =============================================================================
