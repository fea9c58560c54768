//! Loader Section
//!
//! The loader section carries the export tables. Past the loader info header
//! and the string table, the export area is three parallel arrays at
//! `export_hash_offset`: hash slots, export keys, export records.

use crate::container::Container;
use crate::error::{PefError, Result};
use crate::format::{
    be_u32, ExportKey, ExportedSymbol, HashSlot, LoaderInfoHeader, SymbolClass, SymbolFlags,
    EXPORT_SYMBOL_STRIDE,
};

/// One export as seen through the loader tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportEntry<'a> {
    /// Position in the export table
    pub index: usize,
    /// Name bytes (not NUL-terminated)
    pub name: &'a [u8],
    /// Symbol class
    pub class: SymbolClass,
    /// Class flag bits
    pub flags: SymbolFlags,
    /// Offset within the owning section
    pub value: u32,
    /// Owning section, or a negative special index
    pub section_index: i16,
}

/// Parsed loader section
#[derive(Debug, Clone, Copy)]
pub struct LoaderSection<'a> {
    bytes: &'a [u8],
    header: LoaderInfoHeader,
    index: usize,
    slot_count: usize,
    keys_offset: usize,
    symbols_offset: usize,
}

impl<'a> LoaderSection<'a> {
    /// Locate and validate the loader section of `container`
    pub fn parse(container: &Container<'a>) -> Result<Self> {
        let (index, _) = container.loader_section()?;
        let bytes = container.section_data(index)?;
        Self::from_bytes(bytes, index)
    }

    /// Validate loader section bytes
    pub fn from_bytes(bytes: &'a [u8], index: usize) -> Result<Self> {
        let header = LoaderInfoHeader::from_bytes(bytes).ok_or(PefError::Truncated)?;
        let count = header.exported_symbol_count as usize;
        let slot_count = header.hash_slot_count().ok_or(PefError::Truncated)?;

        let keys_offset = slot_count
            .checked_mul(HashSlot::SIZE)
            .and_then(|len| len.checked_add(header.export_hash_offset as usize))
            .ok_or(PefError::Truncated)?;
        let symbols_offset = count
            .checked_mul(ExportKey::SIZE)
            .and_then(|len| len.checked_add(keys_offset))
            .ok_or(PefError::Truncated)?;
        let end = count
            .checked_mul(EXPORT_SYMBOL_STRIDE)
            .and_then(|len| len.checked_add(symbols_offset))
            .ok_or(PefError::Truncated)?;

        if end > bytes.len() || header.loader_strings_offset as usize > bytes.len() {
            return Err(PefError::Truncated);
        }

        Ok(Self {
            bytes,
            header,
            index,
            slot_count,
            keys_offset,
            symbols_offset,
        })
    }

    /// Loader info header
    pub fn header(&self) -> &LoaderInfoHeader {
        &self.header
    }

    /// Index of the loader section in the section table
    pub fn section_index(&self) -> usize {
        self.index
    }

    /// Number of exports
    pub fn export_count(&self) -> usize {
        self.header.exported_symbol_count as usize
    }

    /// Number of hash slots
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Hash slot by index
    pub fn hash_slot(&self, index: usize) -> Option<HashSlot> {
        if index >= self.slot_count {
            return None;
        }
        let offset = self.header.export_hash_offset as usize + index * HashSlot::SIZE;
        be_u32(self.bytes, offset).map(HashSlot)
    }

    /// All hash slots in table order
    pub fn hash_slots(&self) -> impl Iterator<Item = HashSlot> + 'a {
        let loader = *self;
        (0..self.slot_count).filter_map(move |index| loader.hash_slot(index))
    }

    /// Export key by export index
    pub fn export_key(&self, index: usize) -> Option<ExportKey> {
        if index >= self.export_count() {
            return None;
        }
        be_u32(self.bytes, self.keys_offset + index * ExportKey::SIZE).map(ExportKey)
    }

    /// Export record by export index
    pub fn export_symbol(&self, index: usize) -> Option<ExportedSymbol> {
        if index >= self.export_count() {
            return None;
        }
        let start = self.symbols_offset + index * ExportedSymbol::SIZE;
        ExportedSymbol::from_bytes(self.bytes.get(start..start + ExportedSymbol::SIZE)?)
    }

    /// Loader string table
    pub fn strings(&self) -> &'a [u8] {
        &self.bytes[self.header.loader_strings_offset as usize..]
    }

    /// `len` bytes of the string table starting at `offset`
    pub fn name_at(&self, offset: usize, len: usize) -> Option<&'a [u8]> {
        self.strings().get(offset..offset.checked_add(len)?)
    }

    /// NUL-terminated string starting at `offset`
    pub fn c_string(&self, offset: usize) -> Option<&'a [u8]> {
        let tail = self.strings().get(offset..)?;
        let len = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        Some(&tail[..len])
    }

    /// Export by index with its name resolved
    pub fn export(&self, index: usize) -> Option<ExportEntry<'a>> {
        let key = self.export_key(index)?;
        let symbol = self.export_symbol(index)?;
        Some(ExportEntry {
            index,
            name: self.name_at(symbol.name_offset(), key.name_length())?,
            class: symbol.class(),
            flags: symbol.flags(),
            value: symbol.symbol_value,
            section_index: symbol.section_index,
        })
    }

    /// All exports whose names resolve, in table order
    pub fn exports(&self) -> impl Iterator<Item = ExportEntry<'a>> + 'a {
        let loader = *self;
        (0..self.export_count()).filter_map(move |index| loader.export(index))
    }

    /// Main symbol as (section, offset)
    pub fn main_entry(&self) -> Option<(u16, u32)> {
        entry_point(self.header.main_section, self.header.main_offset)
    }

    /// Init routine as (section, offset)
    pub fn init_entry(&self) -> Option<(u16, u32)> {
        entry_point(self.header.init_section, self.header.init_offset)
    }

    /// Term routine as (section, offset)
    pub fn term_entry(&self) -> Option<(u16, u32)> {
        entry_point(self.header.term_section, self.header.term_offset)
    }
}

fn entry_point(section: i32, offset: u32) -> Option<(u16, u32)> {
    u16::try_from(section).ok().map(|section| (section, offset))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ContainerBuilder, Export};
    use crate::format::SymbolClass;

    fn sample() -> alloc::vec::Vec<u8> {
        ContainerBuilder::new()
            .code_section("code", &[0; 8])
            .data_section("data", &[1, 2, 3, 4, 5, 6, 7, 8])
            .export(Export::code("Start", 0, 4))
            .export(Export::data("gVersion", 1, 0))
            .export(Export::data("gFlags", 1, 4))
            .init(0, 0)
            .build()
            .unwrap()
    }

    #[test]
    fn test_export_tables() {
        let bytes = sample();
        let container = Container::parse(&bytes).unwrap();
        let loader = LoaderSection::parse(&container).unwrap();

        assert_eq!(loader.export_count(), 3);
        let names: alloc::vec::Vec<&[u8]> = loader.exports().map(|e| e.name).collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&&b"gVersion"[..]));

        let start = loader.exports().find(|e| e.name == b"Start").unwrap();
        assert_eq!(start.class, SymbolClass::Code);
        assert_eq!(start.value, 4);
        assert_eq!(start.section_index, 0);
    }

    #[test]
    fn test_hash_slots_cover_exports() {
        let bytes = sample();
        let container = Container::parse(&bytes).unwrap();
        let loader = LoaderSection::parse(&container).unwrap();

        let chained: u32 = loader.hash_slots().map(|slot| slot.chain_count()).sum();
        assert_eq!(loader.hash_slots().count(), loader.slot_count());
        assert_eq!(chained as usize, loader.export_count());
        assert!(loader.hash_slot(loader.slot_count()).is_none());
    }

    #[test]
    fn test_entry_points() {
        let bytes = sample();
        let container = Container::parse(&bytes).unwrap();
        let loader = LoaderSection::parse(&container).unwrap();

        assert_eq!(loader.init_entry(), Some((0, 0)));
        assert_eq!(loader.main_entry(), None);
        assert_eq!(loader.term_entry(), None);
    }

    #[test]
    fn test_truncated_export_area() {
        let mut header = LoaderInfoHeader::default();
        header.exported_symbol_count = 4;
        header.export_hash_offset = LoaderInfoHeader::SIZE as u32;
        let mut bytes = alloc::vec::Vec::new();
        header.write_to(&mut bytes);
        bytes.extend_from_slice(&[0; 8]);
        assert_eq!(LoaderSection::from_bytes(&bytes, 0).unwrap_err(), PefError::Truncated);
    }
}
