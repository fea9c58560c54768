//! PEF On-Disk Records
//!
//! Fixed-size, big-endian records of the Preferred Executable Format:
//! container header, section headers, loader info header and the export
//! tables that follow it.

use alloc::vec::Vec;

use bitflags::bitflags;
use static_assertions::const_assert_eq;

// =============================================================================
// MAGIC VALUES
// =============================================================================

/// First container tag, `'Joy!'`
pub const PEF_TAG1: u32 = 0x4A6F_7921;

/// Second container tag, `'peff'`
pub const PEF_TAG2: u32 = 0x7065_6666;

/// PowerPC architecture tag, `'pwpc'`
pub const ARCH_POWERPC: u32 = 0x7077_7063;

/// 68K architecture tag, `'m68k'`
pub const ARCH_68K: u32 = 0x6D36_386B;

/// Only defined container format version
pub const FORMAT_VERSION: u32 = 1;

/// Section index of an absolute export
pub const SECTION_INDEX_ABSOLUTE: i16 = -2;

/// Section index of a re-exported import
pub const SECTION_INDEX_REEXPORT: i16 = -3;

/// Distance between export records in the loader section.
///
/// Boot code historically stepped through the export table by this raw
/// constant; the record layout below must never drift from it.
pub const EXPORT_SYMBOL_STRIDE: usize = 10;

// =============================================================================
// BIG-ENDIAN FIELD ACCESS
// =============================================================================

pub(crate) fn be_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_be_bytes([raw[0], raw[1]]))
}

pub(crate) fn be_i16(bytes: &[u8], offset: usize) -> Option<i16> {
    be_u16(bytes, offset).map(|v| v as i16)
}

pub(crate) fn be_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

pub(crate) fn be_i32(bytes: &[u8], offset: usize) -> Option<i32> {
    be_u32(bytes, offset).map(|v| v as i32)
}

// =============================================================================
// SECTION AND SYMBOL KINDS
// =============================================================================

/// Section region kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// Executable code
    Code,
    /// Plain data, stored as-is
    UnpackedData,
    /// Pattern-initialized data (PI-data), stored compressed
    PatternInitData,
    /// Read-only data
    Constant,
    /// Loader metadata (imports, exports, relocations)
    Loader,
    /// Reserved for debuggers
    Debug,
    /// Code that may also be written
    ExecutableData,
    /// Exception tables
    Exception,
    /// Traceback tables
    Traceback,
    /// Kind this parser does not know about
    Other(u8),
}

impl SectionKind {
    /// From raw value
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Code,
            1 => Self::UnpackedData,
            2 => Self::PatternInitData,
            3 => Self::Constant,
            4 => Self::Loader,
            5 => Self::Debug,
            6 => Self::ExecutableData,
            7 => Self::Exception,
            8 => Self::Traceback,
            other => Self::Other(other),
        }
    }

    /// To raw value
    pub fn as_raw(self) -> u8 {
        match self {
            Self::Code => 0,
            Self::UnpackedData => 1,
            Self::PatternInitData => 2,
            Self::Constant => 3,
            Self::Loader => 4,
            Self::Debug => 5,
            Self::ExecutableData => 6,
            Self::Exception => 7,
            Self::Traceback => 8,
            Self::Other(raw) => raw,
        }
    }

    /// Whether the section contents are instantiated in memory
    pub fn is_instantiated(self) -> bool {
        matches!(self,
            Self::Code |
            Self::UnpackedData |
            Self::PatternInitData |
            Self::Constant |
            Self::ExecutableData
        )
    }
}

/// Section sharing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareKind {
    /// One copy per process
    Process,
    /// One copy system-wide
    Global,
    /// System-wide, write-protected from user code
    Protected,
    /// Unrecognized share kind
    Other(u8),
}

impl ShareKind {
    /// From raw value
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Process,
            4 => Self::Global,
            5 => Self::Protected,
            other => Self::Other(other),
        }
    }

    /// To raw value
    pub fn as_raw(self) -> u8 {
        match self {
            Self::Process => 1,
            Self::Global => 4,
            Self::Protected => 5,
            Self::Other(raw) => raw,
        }
    }
}

/// Exported symbol class (low nibble of the class byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolClass {
    /// Code address
    Code,
    /// Data address
    Data,
    /// Transition vector
    TVector,
    /// TOC entry
    Toc,
    /// Linker glue
    Glue,
    /// Unrecognized class
    Other(u8),
}

impl SymbolClass {
    /// From the raw class byte, ignoring flag bits
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x0F {
            0 => Self::Code,
            1 => Self::Data,
            2 => Self::TVector,
            3 => Self::Toc,
            4 => Self::Glue,
            other => Self::Other(other),
        }
    }

    /// To raw class nibble
    pub fn as_raw(self) -> u8 {
        match self {
            Self::Code => 0,
            Self::Data => 1,
            Self::TVector => 2,
            Self::Toc => 3,
            Self::Glue => 4,
            Self::Other(raw) => raw & 0x0F,
        }
    }
}

bitflags! {
    /// Flag bits carried in the high nibble of a symbol class byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SymbolFlags: u8 {
        /// Weak symbol
        const WEAK = 0x80;
    }
}

// =============================================================================
// CONTAINER HEADER
// =============================================================================

/// Container header at offset 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    /// `'Joy!'`
    pub tag1: u32,
    /// `'peff'`
    pub tag2: u32,
    /// Target architecture
    pub architecture: u32,
    /// Container format version
    pub format_version: u32,
    /// Creation time, Mac epoch seconds
    pub date_time_stamp: u32,
    /// Oldest compatible definition version
    pub old_def_version: u32,
    /// Oldest compatible implementation version
    pub old_imp_version: u32,
    /// Current fragment version
    pub current_version: u32,
    /// Total number of sections
    pub section_count: u16,
    /// Number of instantiated sections
    pub inst_section_count: u16,
    /// Reserved, zero
    pub reserved_a: u32,
}

impl ContainerHeader {
    /// Size of container header
    pub const SIZE: usize = 40;

    /// Parse from bytes without validating the tags
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }

        Some(Self {
            tag1: be_u32(bytes, 0)?,
            tag2: be_u32(bytes, 4)?,
            architecture: be_u32(bytes, 8)?,
            format_version: be_u32(bytes, 12)?,
            date_time_stamp: be_u32(bytes, 16)?,
            old_def_version: be_u32(bytes, 20)?,
            old_imp_version: be_u32(bytes, 24)?,
            current_version: be_u32(bytes, 28)?,
            section_count: be_u16(bytes, 32)?,
            inst_section_count: be_u16(bytes, 34)?,
            reserved_a: be_u32(bytes, 36)?,
        })
    }

    /// Both tags match
    pub fn is_valid(&self) -> bool {
        self.tag1 == PEF_TAG1 && self.tag2 == PEF_TAG2
    }

    /// Byte range of the section header table
    pub fn section_table_len(&self) -> usize {
        usize::from(self.section_count) * SectionHeader::SIZE
    }

    /// Serialize
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tag1.to_be_bytes());
        out.extend_from_slice(&self.tag2.to_be_bytes());
        out.extend_from_slice(&self.architecture.to_be_bytes());
        out.extend_from_slice(&self.format_version.to_be_bytes());
        out.extend_from_slice(&self.date_time_stamp.to_be_bytes());
        out.extend_from_slice(&self.old_def_version.to_be_bytes());
        out.extend_from_slice(&self.old_imp_version.to_be_bytes());
        out.extend_from_slice(&self.current_version.to_be_bytes());
        out.extend_from_slice(&self.section_count.to_be_bytes());
        out.extend_from_slice(&self.inst_section_count.to_be_bytes());
        out.extend_from_slice(&self.reserved_a.to_be_bytes());
    }
}

// =============================================================================
// SECTION HEADER
// =============================================================================

/// Section header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Offset into the loader string table, -1 if unnamed
    pub name_offset: i32,
    /// Preferred load address
    pub default_address: u32,
    /// Size in memory, including zero-filled tail
    pub total_size: u32,
    /// Initialized size once unpacked
    pub unpacked_size: u32,
    /// Size of the bytes stored in the container
    pub packed_size: u32,
    /// Offset of the stored bytes from the container start
    pub container_offset: u32,
    /// Region kind
    pub section_kind: SectionKind,
    /// Sharing policy
    pub share_kind: ShareKind,
    /// Alignment as a power of two
    pub alignment: u8,
    /// Reserved, zero
    pub reserved_a: u8,
}

impl SectionHeader {
    /// Size of section header
    pub const SIZE: usize = 28;

    /// Parse from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }

        Some(Self {
            name_offset: be_i32(bytes, 0)?,
            default_address: be_u32(bytes, 4)?,
            total_size: be_u32(bytes, 8)?,
            unpacked_size: be_u32(bytes, 12)?,
            packed_size: be_u32(bytes, 16)?,
            container_offset: be_u32(bytes, 20)?,
            section_kind: SectionKind::from_raw(bytes[24]),
            share_kind: ShareKind::from_raw(bytes[25]),
            alignment: bytes[26],
            reserved_a: bytes[27],
        })
    }

    /// Section holds PI-data
    pub fn is_pattern_init(&self) -> bool {
        self.section_kind == SectionKind::PatternInitData
    }

    /// Section is the loader section
    pub fn is_loader(&self) -> bool {
        self.section_kind == SectionKind::Loader
    }

    /// Section has a name in the loader string table
    pub fn has_name(&self) -> bool {
        self.name_offset >= 0
    }

    /// Container byte range of the stored bytes
    pub fn packed_range(&self) -> Option<core::ops::Range<usize>> {
        let start = self.container_offset as usize;
        let end = start.checked_add(self.packed_size as usize)?;
        Some(start..end)
    }

    /// Serialize
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.name_offset.to_be_bytes());
        out.extend_from_slice(&self.default_address.to_be_bytes());
        out.extend_from_slice(&self.total_size.to_be_bytes());
        out.extend_from_slice(&self.unpacked_size.to_be_bytes());
        out.extend_from_slice(&self.packed_size.to_be_bytes());
        out.extend_from_slice(&self.container_offset.to_be_bytes());
        out.push(self.section_kind.as_raw());
        out.push(self.share_kind.as_raw());
        out.push(self.alignment);
        out.push(self.reserved_a);
    }
}

// =============================================================================
// LOADER INFO HEADER
// =============================================================================

/// Header at the start of the loader section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoaderInfoHeader {
    /// Section holding the main symbol, -1 if none
    pub main_section: i32,
    /// Offset of the main symbol
    pub main_offset: u32,
    /// Section holding the init routine, -1 if none
    pub init_section: i32,
    /// Offset of the init routine
    pub init_offset: u32,
    /// Section holding the term routine, -1 if none
    pub term_section: i32,
    /// Offset of the term routine
    pub term_offset: u32,
    /// Number of imported libraries
    pub imported_library_count: u32,
    /// Number of imported symbols across all libraries
    pub total_imported_symbol_count: u32,
    /// Number of sections with relocations
    pub reloc_section_count: u32,
    /// Offset of the relocation instructions
    pub reloc_instr_offset: u32,
    /// Offset of the string table
    pub loader_strings_offset: u32,
    /// Offset of the export hash table
    pub export_hash_offset: u32,
    /// log2 of the hash slot count
    pub export_hash_table_power: u32,
    /// Number of exported symbols
    pub exported_symbol_count: u32,
}

impl LoaderInfoHeader {
    /// Size of loader info header
    pub const SIZE: usize = 56;

    /// Parse from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }

        Some(Self {
            main_section: be_i32(bytes, 0)?,
            main_offset: be_u32(bytes, 4)?,
            init_section: be_i32(bytes, 8)?,
            init_offset: be_u32(bytes, 12)?,
            term_section: be_i32(bytes, 16)?,
            term_offset: be_u32(bytes, 20)?,
            imported_library_count: be_u32(bytes, 24)?,
            total_imported_symbol_count: be_u32(bytes, 28)?,
            reloc_section_count: be_u32(bytes, 32)?,
            reloc_instr_offset: be_u32(bytes, 36)?,
            loader_strings_offset: be_u32(bytes, 40)?,
            export_hash_offset: be_u32(bytes, 44)?,
            export_hash_table_power: be_u32(bytes, 48)?,
            exported_symbol_count: be_u32(bytes, 52)?,
        })
    }

    /// Number of hash slots
    pub fn hash_slot_count(&self) -> Option<usize> {
        1usize.checked_shl(self.export_hash_table_power)
    }

    /// Serialize
    pub fn write_to(&self, out: &mut Vec<u8>) {
        for word in [
            self.main_section as u32,
            self.main_offset,
            self.init_section as u32,
            self.init_offset,
            self.term_section as u32,
            self.term_offset,
            self.imported_library_count,
            self.total_imported_symbol_count,
            self.reloc_section_count,
            self.reloc_instr_offset,
            self.loader_strings_offset,
            self.export_hash_offset,
            self.export_hash_table_power,
            self.exported_symbol_count,
        ] {
            out.extend_from_slice(&word.to_be_bytes());
        }
    }
}

// =============================================================================
// EXPORT TABLES
// =============================================================================

/// Hash slot: chain length and first export index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashSlot(pub u32);

impl HashSlot {
    /// Size of hash slot entry
    pub const SIZE: usize = 4;

    /// Maximum first-export index
    pub const MAX_INDEX: u32 = 0x3FFFF;

    /// Pack a slot
    pub fn new(chain_count: u32, first_export_index: u32) -> Self {
        Self((chain_count << 18) | (first_export_index & Self::MAX_INDEX))
    }

    /// Number of exports in the chain
    pub fn chain_count(self) -> u32 {
        self.0 >> 18
    }

    /// Index of the first export in the chain
    pub fn first_export_index(self) -> u32 {
        self.0 & Self::MAX_INDEX
    }
}

/// Hash-chain entry parallel to the export records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportKey(pub u32);

impl ExportKey {
    /// Size of export key entry
    pub const SIZE: usize = 4;

    /// Length of the export name
    pub fn name_length(self) -> usize {
        (self.0 >> 16) as usize
    }

    /// Folded 16-bit hash of the name
    pub fn hash(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

/// Exported symbol record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportedSymbol {
    /// Class byte (top 8 bits) and string-table offset (low 24 bits)
    pub class_and_name: u32,
    /// Offset within the owning section
    pub symbol_value: u32,
    /// Owning section, or a negative special index
    pub section_index: i16,
}

impl ExportedSymbol {
    /// Size of export record
    pub const SIZE: usize = 10;

    /// Parse from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            class_and_name: be_u32(bytes, 0)?,
            symbol_value: be_u32(bytes, 4)?,
            section_index: be_i16(bytes, 8)?,
        })
    }

    /// Pack the class byte and name offset
    pub fn pack_class_and_name(class: u8, name_offset: u32) -> u32 {
        (u32::from(class) << 24) | (name_offset & 0x00FF_FFFF)
    }

    /// Raw class byte, flags included
    pub fn class_byte(&self) -> u8 {
        (self.class_and_name >> 24) as u8
    }

    /// Symbol class
    pub fn class(&self) -> SymbolClass {
        SymbolClass::from_raw(self.class_byte())
    }

    /// Symbol flags
    pub fn flags(&self) -> SymbolFlags {
        SymbolFlags::from_bits_truncate(self.class_byte())
    }

    /// Offset of the name in the loader string table
    pub fn name_offset(&self) -> usize {
        (self.class_and_name & 0x00FF_FFFF) as usize
    }

    /// Serialize
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.class_and_name.to_be_bytes());
        out.extend_from_slice(&self.symbol_value.to_be_bytes());
        out.extend_from_slice(&self.section_index.to_be_bytes());
    }
}

const_assert_eq!(ContainerHeader::SIZE, 40);
const_assert_eq!(SectionHeader::SIZE, 28);
const_assert_eq!(LoaderInfoHeader::SIZE, 56);
const_assert_eq!(HashSlot::SIZE, 4);
const_assert_eq!(ExportKey::SIZE, 4);
const_assert_eq!(ExportedSymbol::SIZE, EXPORT_SYMBOL_STRIDE);

// =============================================================================
// TESTS
// =============================================================================
