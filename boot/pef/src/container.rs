//! PEF Container View
//!
//! Read-only view over a container that is already resident in memory.

use crate::error::{PefError, Result};
use crate::format::{be_u32, ContainerHeader, SectionHeader, SectionKind, PEF_TAG1, PEF_TAG2};
use crate::loader::LoaderSection;

/// Parsed container
#[derive(Debug, Clone, Copy)]
pub struct Container<'a> {
    bytes: &'a [u8],
    header: ContainerHeader,
}

impl<'a> Container<'a> {
    /// Validate the tags and the section table bounds
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        // Tags come first so a foreign file never gets past this point.
        if be_u32(bytes, 0) != Some(PEF_TAG1) || be_u32(bytes, 4) != Some(PEF_TAG2) {
            log::warn!("Rejecting container: missing 'Joy!peff' tags");
            return Err(PefError::BadFormat);
        }

        let header = ContainerHeader::from_bytes(bytes).ok_or(PefError::Truncated)?;
        let table_end = ContainerHeader::SIZE + header.section_table_len();
        if bytes.len() < table_end {
            return Err(PefError::Truncated);
        }

        log::debug!(
            "PEF container: arch {:#010x}, {} sections ({} instantiated)",
            header.architecture,
            header.section_count,
            header.inst_section_count
        );

        Ok(Self { bytes, header })
    }

    /// Raw container bytes
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Container header
    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Number of section headers
    pub fn section_count(&self) -> usize {
        usize::from(self.header.section_count)
    }

    /// Section header by index
    pub fn section(&self, index: usize) -> Option<SectionHeader> {
        if index >= self.section_count() {
            return None;
        }
        let start = ContainerHeader::SIZE + index * SectionHeader::SIZE;
        SectionHeader::from_bytes(self.bytes.get(start..start + SectionHeader::SIZE)?)
    }

    /// All section headers in table order
    pub fn sections(&self) -> impl Iterator<Item = SectionHeader> + 'a {
        let container = *self;
        (0..self.section_count()).filter_map(move |index| container.section(index))
    }

    /// First section of `kind`, with its index
    pub fn find_section(&self, kind: SectionKind) -> Option<(usize, SectionHeader)> {
        self.sections()
            .enumerate()
            .find(|(_, section)| section.section_kind == kind)
    }

    /// The loader section
    pub fn loader_section(&self) -> Result<(usize, SectionHeader)> {
        self.find_section(SectionKind::Loader).ok_or(PefError::NoSuchSection)
    }

    /// Stored bytes of a section
    pub fn section_data(&self, index: usize) -> Result<&'a [u8]> {
        let section = self.section(index).ok_or(PefError::NoSuchSection)?;
        section
            .packed_range()
            .and_then(|range| self.bytes.get(range))
            .ok_or(PefError::Truncated)
    }

    /// Section name from the loader string table
    pub fn section_name(&self, index: usize) -> Option<&'a [u8]> {
        let section = self.section(index)?;
        if !section.has_name() {
            return None;
        }
        LoaderSection::parse(self).ok()?.c_string(section.name_offset as usize)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ContainerBuilder;
    use alloc::vec;

    #[test]
    fn test_rejects_zeroed_buffer() {
        let bytes = vec![0u8; 256];
        assert_eq!(Container::parse(&bytes).unwrap_err(), PefError::BadFormat);
        assert_eq!(Container::parse(&[]).unwrap_err(), PefError::BadFormat);
    }

    #[test]
    fn test_rejects_wrong_container_id() {
        let mut bytes = ContainerBuilder::new().build().unwrap();
        bytes[7] = b'x';
        assert_eq!(Container::parse(&bytes).unwrap_err(), PefError::BadFormat);
    }

    #[test]
    fn test_truncated_section_table() {
        let bytes = ContainerBuilder::new()
            .data_section("data", &[1, 2, 3])
            .build()
            .unwrap();
        let cut = &bytes[..ContainerHeader::SIZE + 4];
        assert_eq!(Container::parse(cut).unwrap_err(), PefError::Truncated);
    }

    #[test]
    fn test_section_queries() {
        let bytes = ContainerBuilder::new()
            .code_section("code", &[0x4E, 0x80, 0x00, 0x20])
            .data_section("data", &[1, 2, 3])
            .build()
            .unwrap();
        let container = Container::parse(&bytes).unwrap();

        assert_eq!(container.section_count(), 3);
        assert_eq!(container.section(0).unwrap().section_kind, SectionKind::Code);
        assert_eq!(container.section_data(1).unwrap(), &[1, 2, 3]);
        assert_eq!(container.section_name(1), Some(&b"data"[..]));
        assert_eq!(container.loader_section().unwrap().0, 2);
        assert!(container.section(3).is_none());
        assert_eq!(container.sections().count(), 3);
    }

    #[test]
    fn test_missing_loader_section() {
        let bytes = ContainerBuilder::new()
            .data_section("data", &[0; 4])
            .without_loader()
            .build()
            .unwrap();
        let container = Container::parse(&bytes).unwrap();
        assert_eq!(container.loader_section().unwrap_err(), PefError::NoSuchSection);
    }
}
