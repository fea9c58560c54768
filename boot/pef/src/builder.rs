//! PEF Container Builder
//!
//! Writes byte-exact PEF containers: sections, PI-data packed from plain
//! bytes or explicit instructions, and a loader section with a string
//! table and hashed export tables. Used for fixtures and tooling.

use alloc::vec::Vec;
use core::fmt;

use crate::format::{
    ContainerHeader, ExportKey, ExportedSymbol, HashSlot, LoaderInfoHeader, SectionHeader,
    SectionKind, ShareKind, SymbolClass, ARCH_POWERPC, FORMAT_VERSION, PEF_TAG1, PEF_TAG2,
    SECTION_INDEX_ABSOLUTE,
};
use crate::pidata::{encode_all, pack, Instruction, PackError};
use crate::symbols::{hash_slot_index, hash_word};

/// Section payload alignment (log2)
const SECTION_ALIGNMENT: u8 = 4;

/// Largest hash table power the builder picks
const MAX_HASH_POWER: u32 = 16;

// =============================================================================
// ERRORS
// =============================================================================

/// Container building failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    /// PI-data encoding failed
    Pack(PackError),
    /// A size or offset does not fit its on-disk field
    TooLarge,
}

impl From<PackError> for BuildError {
    fn from(err: PackError) -> Self {
        Self::Pack(err)
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pack(err) => write!(f, "PI-data encoding failed: {}", err),
            Self::TooLarge => write!(f, "value does not fit its PEF field"),
        }
    }
}

impl core::error::Error for BuildError {}

fn to_u32(value: usize) -> Result<u32, BuildError> {
    u32::try_from(value).map_err(|_| BuildError::TooLarge)
}

// =============================================================================
// EXPORTS
// =============================================================================

/// Export to place in the loader section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    /// Name bytes
    pub name: Vec<u8>,
    /// Raw class byte, flags included
    pub class: u8,
    /// Owning section, or a negative special index
    pub section_index: i16,
    /// Offset within the section
    pub value: u32,
}

impl Export {
    /// Arbitrary export
    pub fn new(name: &str, class: u8, section_index: i16, value: u32) -> Self {
        Self {
            name: name.as_bytes().to_vec(),
            class,
            section_index,
            value,
        }
    }

    /// Code export
    pub fn code(name: &str, section_index: i16, value: u32) -> Self {
        Self::new(name, SymbolClass::Code.as_raw(), section_index, value)
    }

    /// Data export
    pub fn data(name: &str, section_index: i16, value: u32) -> Self {
        Self::new(name, SymbolClass::Data.as_raw(), section_index, value)
    }

    /// Absolute export with no owning section
    pub fn absolute(name: &str, value: u32) -> Self {
        Self::new(name, SymbolClass::Data.as_raw(), SECTION_INDEX_ABSOLUTE, value)
    }
}

// =============================================================================
// BUILDER
// =============================================================================

#[derive(Debug, Clone)]
struct PendingSection {
    name: Vec<u8>,
    kind: SectionKind,
    share: ShareKind,
    stored: Vec<u8>,
    unpacked_size: usize,
}

/// PEF container writer
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    architecture: u32,
    sections: Vec<PendingSection>,
    exports: Vec<Export>,
    main: Option<(u16, u32)>,
    init: Option<(u16, u32)>,
    term: Option<(u16, u32)>,
    with_loader: bool,
    error: Option<BuildError>,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBuilder {
    /// Create builder for a PowerPC container with a loader section
    pub fn new() -> Self {
        Self {
            architecture: ARCH_POWERPC,
            sections: Vec::new(),
            exports: Vec::new(),
            main: None,
            init: None,
            term: None,
            with_loader: true,
            error: None,
        }
    }

    /// Set the architecture tag
    pub fn architecture(mut self, architecture: u32) -> Self {
        self.architecture = architecture;
        self
    }

    /// Add a section stored as-is
    pub fn section(mut self, name: &str, kind: SectionKind, share: ShareKind, data: &[u8]) -> Self {
        self.sections.push(PendingSection {
            name: name.as_bytes().to_vec(),
            kind,
            share,
            stored: data.to_vec(),
            unpacked_size: data.len(),
        });
        self
    }

    /// Add a code section
    pub fn code_section(self, name: &str, code: &[u8]) -> Self {
        self.section(name, SectionKind::Code, ShareKind::Global, code)
    }

    /// Add an unpacked data section
    pub fn data_section(self, name: &str, data: &[u8]) -> Self {
        self.section(name, SectionKind::UnpackedData, ShareKind::Process, data)
    }

    /// Add a constant section
    pub fn constant_section(self, name: &str, data: &[u8]) -> Self {
        self.section(name, SectionKind::Constant, ShareKind::Global, data)
    }

    /// Add a PI-data section packed from plain bytes
    pub fn pi_data_section(mut self, name: &str, data: &[u8]) -> Self {
        match pack(data) {
            Ok(stored) => self.push_pi_data(name, stored, data.len()),
            Err(err) => self.error = Some(err.into()),
        }
        self
    }

    /// Add a PI-data section from explicit instructions and a declared size
    pub fn pi_data_instructions(
        mut self,
        name: &str,
        instructions: &[Instruction<'_>],
        unpacked_size: usize,
    ) -> Self {
        match encode_all(instructions) {
            Ok(stored) => self.push_pi_data(name, stored, unpacked_size),
            Err(err) => self.error = Some(err.into()),
        }
        self
    }

    fn push_pi_data(&mut self, name: &str, stored: Vec<u8>, unpacked_size: usize) {
        self.sections.push(PendingSection {
            name: name.as_bytes().to_vec(),
            kind: SectionKind::PatternInitData,
            share: ShareKind::Process,
            stored,
            unpacked_size,
        });
    }

    /// Add an export
    pub fn export(mut self, export: Export) -> Self {
        self.exports.push(export);
        self
    }

    /// Set the main symbol
    pub fn main(mut self, section: u16, offset: u32) -> Self {
        self.main = Some((section, offset));
        self
    }

    /// Set the init routine
    pub fn init(mut self, section: u16, offset: u32) -> Self {
        self.init = Some((section, offset));
        self
    }

    /// Set the term routine
    pub fn term(mut self, section: u16, offset: u32) -> Self {
        self.term = Some((section, offset));
        self
    }

    /// Omit the loader section (and with it all names and exports)
    pub fn without_loader(mut self) -> Self {
        self.with_loader = false;
        self
    }

    /// Produce the container bytes
    pub fn build(self) -> Result<Vec<u8>, BuildError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let mut name_offsets = Vec::with_capacity(self.sections.len());
        let loader = if self.with_loader {
            Some(self.build_loader(&mut name_offsets)?)
        } else {
            None
        };

        let mut headers = Vec::new();
        let mut payloads: Vec<&[u8]> = Vec::new();
        for (index, pending) in self.sections.iter().enumerate() {
            headers.push(SectionHeader {
                name_offset: name_offsets.get(index).copied().unwrap_or(-1),
                default_address: 0,
                total_size: to_u32(pending.unpacked_size)?,
                unpacked_size: to_u32(pending.unpacked_size)?,
                packed_size: to_u32(pending.stored.len())?,
                container_offset: 0,
                section_kind: pending.kind,
                share_kind: pending.share,
                alignment: SECTION_ALIGNMENT,
                reserved_a: 0,
            });
            payloads.push(&pending.stored);
        }

        if let Some(loader) = loader.as_deref() {
            headers.push(SectionHeader {
                name_offset: -1,
                default_address: 0,
                total_size: 0,
                unpacked_size: 0,
                packed_size: to_u32(loader.len())?,
                container_offset: 0,
                section_kind: SectionKind::Loader,
                share_kind: ShareKind::Global,
                alignment: SECTION_ALIGNMENT,
                reserved_a: 0,
            });
            payloads.push(loader);
        }

        let section_count = u16::try_from(headers.len()).map_err(|_| BuildError::TooLarge)?;
        let inst_count = headers
            .iter()
            .filter(|h| h.section_kind.is_instantiated())
            .count();

        // Lay payloads out after the section table on aligned offsets.
        let align = 1usize << SECTION_ALIGNMENT;
        let mut offset = ContainerHeader::SIZE + headers.len() * SectionHeader::SIZE;
        for (header, payload) in headers.iter_mut().zip(&payloads) {
            offset = offset.next_multiple_of(align);
            header.container_offset = to_u32(offset)?;
            offset += payload.len();
        }

        let mut out = Vec::with_capacity(offset);
        ContainerHeader {
            tag1: PEF_TAG1,
            tag2: PEF_TAG2,
            architecture: self.architecture,
            format_version: FORMAT_VERSION,
            date_time_stamp: 0,
            old_def_version: 0,
            old_imp_version: 0,
            current_version: 0,
            section_count,
            inst_section_count: u16::try_from(inst_count).map_err(|_| BuildError::TooLarge)?,
            reserved_a: 0,
        }
        .write_to(&mut out);

        for header in &headers {
            header.write_to(&mut out);
        }
        for (header, payload) in headers.iter().zip(&payloads) {
            out.resize(header.container_offset as usize, 0);
            out.extend_from_slice(payload);
        }

        log::debug!(
            "Built PEF container: {} sections, {} exports, {} bytes",
            section_count,
            self.exports.len(),
            out.len()
        );

        Ok(out)
    }

    /// Loader section bytes; fills `name_offsets` for the user sections
    fn build_loader(&self, name_offsets: &mut Vec<i32>) -> Result<Vec<u8>, BuildError> {
        let count = self.exports.len();
        let mut power = 0u32;
        while (1usize << power) < count && power < MAX_HASH_POWER {
            power += 1;
        }

        // Chains must be contiguous, so exports are grouped by slot.
        let mut ordered: Vec<(usize, u32, &Export)> = self
            .exports
            .iter()
            .map(|export| {
                let word = hash_word(&export.name);
                (hash_slot_index(word, power), word, export)
            })
            .collect();
        ordered.sort_by_key(|&(slot, _, _)| slot);

        let mut strings = Vec::new();
        for pending in &self.sections {
            name_offsets.push(i32::try_from(strings.len()).map_err(|_| BuildError::TooLarge)?);
            strings.extend_from_slice(&pending.name);
            strings.push(0);
        }
        let mut export_name_offsets = Vec::with_capacity(count);
        for &(_, _, export) in &ordered {
            if export.name.len() > usize::from(u16::MAX) {
                return Err(BuildError::TooLarge);
            }
            export_name_offsets.push(to_u32(strings.len())?);
            strings.extend_from_slice(&export.name);
        }
        while strings.len() % 4 != 0 {
            strings.push(0);
        }

        let strings_offset = LoaderInfoHeader::SIZE;
        let hash_offset = strings_offset + strings.len();
        let entry = |point: Option<(u16, u32)>| match point {
            Some((section, offset)) => (i32::from(section), offset),
            None => (-1, 0),
        };
        let (main_section, main_offset) = entry(self.main);
        let (init_section, init_offset) = entry(self.init);
        let (term_section, term_offset) = entry(self.term);

        let header = LoaderInfoHeader {
            main_section,
            main_offset,
            init_section,
            init_offset,
            term_section,
            term_offset,
            imported_library_count: 0,
            total_imported_symbol_count: 0,
            reloc_section_count: 0,
            reloc_instr_offset: to_u32(strings_offset)?,
            loader_strings_offset: to_u32(strings_offset)?,
            export_hash_offset: to_u32(hash_offset)?,
            export_hash_table_power: power,
            exported_symbol_count: to_u32(count)?,
        };

        let mut out = Vec::new();
        header.write_to(&mut out);
        out.extend_from_slice(&strings);

        let mut next = 0usize;
        for slot in 0..(1usize << power) {
            let chain = ordered.iter().filter(|&&(s, _, _)| s == slot).count();
            if next > HashSlot::MAX_INDEX as usize {
                return Err(BuildError::TooLarge);
            }
            let word = HashSlot::new(to_u32(chain)?, to_u32(next)?).0;
            out.extend_from_slice(&word.to_be_bytes());
            next += chain;
        }

        for &(_, word, _) in &ordered {
            out.extend_from_slice(&ExportKey(word).0.to_be_bytes());
        }

        for (&(_, _, export), &name_offset) in ordered.iter().zip(&export_name_offsets) {
            ExportedSymbol {
                class_and_name: ExportedSymbol::pack_class_and_name(export.class, name_offset),
                symbol_value: export.value,
                section_index: export.section_index,
            }
            .write_to(&mut out);
        }

        Ok(out)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::format::ARCH_68K;
    use crate::loader::LoaderSection;
    use crate::pidata::unpack_pi_data;

    #[test]
    fn test_empty_container() {
        let bytes = ContainerBuilder::new().build().unwrap();
        let container = Container::parse(&bytes).unwrap();
        assert_eq!(container.section_count(), 1);
        assert_eq!(container.header().architecture, ARCH_POWERPC);
        let loader = LoaderSection::parse(&container).unwrap();
        assert_eq!(loader.export_count(), 0);
        assert_eq!(loader.slot_count(), 1);
    }

    #[test]
    fn test_sections_are_aligned() {
        let bytes = ContainerBuilder::new()
            .architecture(ARCH_68K)
            .code_section("code", &[1, 2, 3])
            .constant_section("const", &[4; 5])
            .build()
            .unwrap();
        let container = Container::parse(&bytes).unwrap();

        for section in container.sections() {
            assert_eq!(section.container_offset % 16, 0);
        }
        assert_eq!(container.header().inst_section_count, 2);
        assert_eq!(container.section_data(1).unwrap(), &[4; 5]);
    }

    #[test]
    fn test_pi_data_section_unpacks() {
        let mut plain = alloc::vec![0u8; 64];
        plain[10] = 0x55;
        plain[40..48].fill(0xAA);

        let bytes = ContainerBuilder::new().pi_data_section("pidata", &plain).build().unwrap();
        let container = Container::parse(&bytes).unwrap();
        let section = container.section(0).unwrap();

        assert!(section.packed_size < section.unpacked_size);
        assert_eq!(unpack_pi_data(&bytes, &section).unwrap(), plain);
    }

    #[test]
    fn test_many_exports_share_chains() {
        let mut builder = ContainerBuilder::new().data_section("data", &[0; 64]);
        for i in 0..20u32 {
            let name = alloc::format!("gSymbol{}", i);
            builder = builder.export(Export::data(&name, 0, i));
        }
        let bytes = builder.build().unwrap();
        let container = Container::parse(&bytes).unwrap();
        let loader = LoaderSection::parse(&container).unwrap();

        assert_eq!(loader.header().export_hash_table_power, 5);
        for index in 0..loader.export_count() {
            let entry = loader.export(index).unwrap();
            let key = loader.export_key(index).unwrap();
            assert_eq!(key.0, hash_word(entry.name));
        }
    }

    #[test]
    fn test_bad_instructions_surface() {
        let bad = [Instruction::Repeat { pattern: &[1], copies: 0 }];
        let result = ContainerBuilder::new().pi_data_instructions("pidata", &bad, 4).build();
        assert_eq!(result, Err(BuildError::Pack(PackError::EmptyRepeat)));
    }
}
