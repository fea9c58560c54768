//! Export Symbol Lookup
//!
//! Finds an exported symbol by name and copies the bytes it points at. When
//! the owning section is PI-data the section is unpacked into a temporary
//! buffer first; that buffer never outlives the call.
//!
//! Names are Pascal strings: one length byte followed by that many bytes,
//! with no terminator.

use alloc::vec::Vec;

use crate::config::{LookupStrategy, ResolverConfig};
use crate::container::Container;
use crate::error::{PefError, Result};
use crate::format::{SectionHeader, SymbolClass, SymbolFlags};
use crate::loader::LoaderSection;
use crate::memory::{SectionAllocator, SystemAllocator};
use crate::pidata::unpack_pi_data_with;

// =============================================================================
// NAMES
// =============================================================================

/// Compare a Pascal-string lookup name with an export name.
///
/// `candidate_len` is the export's declared name length. Neither input is
/// read past its own slice, so a declared length that runs off the end is a
/// mismatch rather than an out-of-bounds read.
pub fn symbol_compare(lookup: &[u8], candidate: &[u8], candidate_len: usize) -> bool {
    let Some((&declared, text)) = lookup.split_first() else {
        return false;
    };
    let len = usize::from(declared);
    if candidate_len != len {
        return false;
    }

    match (text.get(..len), candidate.get(..len)) {
        (Some(wanted), Some(found)) => wanted == found,
        _ => false,
    }
}

/// Owned Pascal string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PascalString(Vec<u8>);

impl PascalString {
    /// Longest representable name
    pub const MAX_LEN: usize = 255;

    /// Build from name bytes, `None` if longer than 255 bytes
    pub fn new(name: &[u8]) -> Option<Self> {
        let len = u8::try_from(name.len()).ok()?;
        let mut bytes = Vec::with_capacity(name.len() + 1);
        bytes.push(len);
        bytes.extend_from_slice(name);
        Some(Self(bytes))
    }

    /// Length byte followed by the name
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Name without the length byte
    pub fn text(&self) -> &[u8] {
        &self.0[1..]
    }

    /// Name length
    pub fn len(&self) -> usize {
        self.0.len() - 1
    }

    /// Whether the name is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TryFrom<&str> for PascalString {
    type Error = PefError;

    fn try_from(name: &str) -> Result<Self> {
        Self::new(name.as_bytes()).ok_or(PefError::InvalidParameter)
    }
}

/// Whether `name` is a well-formed Pascal string
fn is_pascal(name: &[u8]) -> bool {
    name.first().is_some_and(|&len| usize::from(len) < name.len())
}

// =============================================================================
// EXPORT HASH
// =============================================================================

/// PEF export hash word: name length in the high half, folded hash in the low.
///
/// Hashing stops at a NUL byte, as the linker's does.
pub fn hash_word(name: &[u8]) -> u32 {
    let mut hash: i32 = 0;
    let mut length: u32 = 0;

    for &byte in name {
        if byte == 0 {
            break;
        }
        length += 1;
        hash = hash.wrapping_shl(1).wrapping_sub(hash >> 16) ^ i32::from(byte);
    }

    (length << 16) | ((hash ^ (hash >> 16)) as u32 & 0xFFFF)
}

/// Hash slot a hash word falls into for a table of `2^power` slots
pub fn hash_slot_index(word: u32, power: u32) -> usize {
    let mask = 1u32.checked_shl(power).map_or(u32::MAX, |slots| slots - 1);
    ((word ^ word.checked_shr(power).unwrap_or(0)) & mask) as usize
}

// =============================================================================
// RESOLVER
// =============================================================================

/// Where a matched export lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSymbol {
    /// Position in the export table
    pub export_index: usize,
    /// Owning section index
    pub section_index: usize,
    /// Owning section header
    pub section: SectionHeader,
    /// Offset within the section
    pub value: u32,
    /// Symbol class
    pub class: SymbolClass,
    /// Class flag bits
    pub flags: SymbolFlags,
}

/// Export lookup over in-memory containers
#[derive(Debug, Clone, Default)]
pub struct SymbolResolver<A = SystemAllocator> {
    allocator: A,
    config: ResolverConfig,
}

impl SymbolResolver<SystemAllocator> {
    /// Create resolver with the system allocator and default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with configuration
    pub fn with_config(config: ResolverConfig) -> Self {
        Self { allocator: SystemAllocator, config }
    }
}

impl<A: SectionAllocator> SymbolResolver<A> {
    /// Create with a custom allocator for unpacked sections
    pub fn with_allocator(allocator: A, config: ResolverConfig) -> Self {
        Self { allocator, config }
    }

    /// Current configuration
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Allocator used for unpacked sections
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Locate an export without touching its data
    pub fn resolve(&self, container: &[u8], name: &[u8]) -> Result<ResolvedSymbol> {
        let container = Container::parse(container)?;
        self.resolve_in(&container, name)
    }

    fn resolve_in(&self, container: &Container<'_>, name: &[u8]) -> Result<ResolvedSymbol> {
        if !is_pascal(name) {
            return Err(PefError::InvalidParameter);
        }

        let loader = LoaderSection::parse(container)?;
        let export_index = match self.config.lookup {
            LookupStrategy::Linear => find_linear(&loader, name),
            LookupStrategy::Hashed => find_hashed(&loader, name),
        }
        .ok_or(PefError::NoSuchSymbol)?;

        let symbol = loader.export_symbol(export_index).ok_or(PefError::Truncated)?;
        let section_index = usize::try_from(symbol.section_index)
            .map_err(|_| PefError::NoSuchSection)?;
        let section = container.section(section_index).ok_or(PefError::NoSuchSection)?;

        log::trace!(
            "Export #{} resolved to section {} + {:#x}",
            export_index,
            section_index,
            symbol.symbol_value
        );

        Ok(ResolvedSymbol {
            export_index,
            section_index,
            section,
            value: symbol.symbol_value,
            class: symbol.class(),
            flags: symbol.flags(),
        })
    }

    /// Copy `dest.len()` bytes of the named export into `dest`
    pub fn get_symbol(&self, name: &[u8], container: &[u8], dest: &mut [u8]) -> Result<()> {
        let parsed = Container::parse(container)?;
        let resolved = self.resolve_in(&parsed, name)?;

        if resolved.section.is_pattern_init() {
            let unpacked = unpack_pi_data_with(
                container,
                &resolved.section,
                &self.allocator,
                &self.config.unpack,
            )?;
            let result = copy_out(&unpacked, resolved.value, dest);
            self.allocator.release(unpacked);
            result
        } else {
            let data = parsed.section_data(resolved.section_index)?;
            copy_out(data, resolved.value, dest)
        }
    }

    /// Copy `len` bytes of the named export into a new vector
    pub fn symbol_data(&self, name: &[u8], container: &[u8], len: usize) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| PefError::OutOfMemory)?;
        data.resize(len, 0);
        self.get_symbol(name, container, &mut data)?;
        Ok(data)
    }
}

/// Copy the data of export `name` into `dest` with default settings
pub fn get_symbol_from_pef(name: &[u8], container: &[u8], dest: &mut [u8]) -> Result<()> {
    SymbolResolver::new().get_symbol(name, container, dest)
}

/// Table-order scan over every export; the first match wins
fn find_linear(loader: &LoaderSection<'_>, name: &[u8]) -> Option<usize> {
    let strings = loader.strings();

    (0..loader.export_count()).find(|&index| {
        match (loader.export_key(index), loader.export_symbol(index)) {
            (Some(key), Some(symbol)) => strings
                .get(symbol.name_offset()..)
                .is_some_and(|candidate| symbol_compare(name, candidate, key.name_length())),
            _ => false,
        }
    })
}

/// Walk the single hash chain `name` belongs to
fn find_hashed(loader: &LoaderSection<'_>, name: &[u8]) -> Option<usize> {
    let text = name.get(1..1 + usize::from(*name.first()?))?;
    let word = hash_word(text);
    let slot = loader.hash_slot(hash_slot_index(word, loader.header().export_hash_table_power))?;
    let first = slot.first_export_index() as usize;
    let strings = loader.strings();

    (first..first + slot.chain_count() as usize).find(|&index| {
        match (loader.export_key(index), loader.export_symbol(index)) {
            (Some(key), Some(symbol)) if key.0 == word => strings
                .get(symbol.name_offset()..)
                .is_some_and(|candidate| symbol_compare(name, candidate, key.name_length())),
            _ => false,
        }
    })
}

fn copy_out(source: &[u8], offset: u32, dest: &mut [u8]) -> Result<()> {
    let start = offset as usize;
    let bytes = start
        .checked_add(dest.len())
        .and_then(|end| source.get(start..end))
        .ok_or(PefError::Truncated)?;
    dest.copy_from_slice(bytes);
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ContainerBuilder, Export};
    use crate::config::UnpackConfig;
    use crate::pidata::Instruction;
    use alloc::vec;
    use core::cell::Cell;

    fn pascal(name: &str) -> PascalString {
        PascalString::try_from(name).unwrap()
    }

    #[derive(Default)]
    struct CountingAllocator {
        allocations: Cell<usize>,
        releases: Cell<usize>,
    }

    impl SectionAllocator for CountingAllocator {
        fn allocate(&self, len: usize) -> Option<Vec<u8>> {
            self.allocations.set(self.allocations.get() + 1);
            Some(vec![0; len])
        }

        fn release(&self, buffer: Vec<u8>) {
            self.releases.set(self.releases.get() + 1);
            drop(buffer);
        }
    }

    fn driver_image() -> Vec<u8> {
        let mut pi = vec![0u8; 48];
        pi[16..24].copy_from_slice(b"NDRV0001");
        pi[40..44].copy_from_slice(&0xCAFE_F00Du32.to_be_bytes());

        ContainerBuilder::new()
            .code_section("code", &[0x60, 0x00, 0x00, 0x00])
            .data_section("data", &[0x11, 0x22, 0x33, 0x44])
            .pi_data_section("pidata", &pi)
            .export(Export::code("DoDriverIO", 0, 0))
            .export(Export::data("TheDriverDescription", 2, 16))
            .export(Export::data("gVersion", 1, 0))
            .export(Export::data("gMagic", 2, 40))
            .build()
            .unwrap()
    }

    #[test]
    fn test_symbol_compare() {
        assert!(!symbol_compare(b"\x03abc", b"abcd", 4));
        assert!(symbol_compare(b"\x03abc", b"abc", 3));
        assert!(!symbol_compare(b"\x03abx", b"abc", 3));
    }

    #[test]
    fn test_symbol_compare_never_overreads() {
        // Declared lengths that run past the slices are mismatches.
        assert!(!symbol_compare(b"\x05ab", b"ab", 5));
        assert!(!symbol_compare(b"\x03abc", b"ab", 3));
        assert!(!symbol_compare(b"", b"", 0));
        assert!(symbol_compare(b"\x00", b"", 0));
    }

    #[test]
    fn test_pascal_string() {
        let name = pascal("gVersion");
        assert_eq!(name.as_bytes()[0], 8);
        assert_eq!(name.text(), b"gVersion");
        assert_eq!(name.len(), 8);
        assert!(PascalString::new(&[b'x'; 256]).is_none());
    }

    #[test]
    fn test_hash_word() {
        assert_eq!(hash_word(b""), 0);
        // 'a' = 0x61: one round, no carry into the high half
        assert_eq!(hash_word(b"a"), 0x0001_0061);
        // "ab": ((0x61 << 1) - 0) ^ 0x62 = 0xC2 ^ 0x62 = 0xA0
        assert_eq!(hash_word(b"ab"), 0x0002_00A0);
        assert_eq!(hash_word(b"ab\0cd"), hash_word(b"ab"));
        assert_eq!(hash_slot_index(0x0002_00A0, 0), 0);
        assert_eq!(hash_slot_index(0x0002_00A0, 2), (0x0002_00A0 ^ 0x0000_8028) & 3);
    }

    #[test]
    fn test_get_symbol_plain_section() {
        let image = driver_image();
        let mut dest = [0u8; 4];
        get_symbol_from_pef(pascal("gVersion").as_bytes(), &image, &mut dest).unwrap();
        assert_eq!(dest, [0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_get_symbol_pi_data_section() {
        let image = driver_image();
        let mut dest = [0u8; 8];
        get_symbol_from_pef(pascal("TheDriverDescription").as_bytes(), &image, &mut dest).unwrap();
        assert_eq!(&dest, b"NDRV0001");

        let mut magic = [0u8; 4];
        get_symbol_from_pef(pascal("gMagic").as_bytes(), &image, &mut magic).unwrap();
        assert_eq!(u32::from_be_bytes(magic), 0xCAFE_F00D);
    }

    #[test]
    fn test_unpack_buffer_released() {
        let image = driver_image();
        let resolver = SymbolResolver::with_allocator(CountingAllocator::default(), ResolverConfig::default());

        let mut dest = [0u8; 8];
        resolver.get_symbol(pascal("TheDriverDescription").as_bytes(), &image, &mut dest).unwrap();
        // Copy past the unpacked section fails after the unpack succeeded.
        let mut too_long = [0u8; 64];
        assert_eq!(
            resolver.get_symbol(pascal("TheDriverDescription").as_bytes(), &image, &mut too_long),
            Err(PefError::Truncated)
        );

        assert_eq!(resolver.allocator().allocations.get(), 2);
        assert_eq!(resolver.allocator().releases.get(), 2);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let zeros = vec![0u8; 512];
        let mut dest = [0u8; 4];
        assert_eq!(
            get_symbol_from_pef(pascal("gVersion").as_bytes(), &zeros, &mut dest),
            Err(PefError::BadFormat)
        );
        assert_eq!(PefError::BadFormat.code(), crate::error::status::PARAM_ERR);
    }

    #[test]
    fn test_missing_symbol() {
        let image = driver_image();
        let mut dest = [0u8; 4];
        let err = get_symbol_from_pef(pascal("gNothing").as_bytes(), &image, &mut dest).unwrap_err();
        assert_eq!(err, PefError::NoSuchSymbol);
        assert!(err.is_not_found());
        // Prefix of a real name is not a match.
        let err = get_symbol_from_pef(pascal("gVer").as_bytes(), &image, &mut dest).unwrap_err();
        assert_eq!(err, PefError::NoSuchSymbol);
    }

    #[test]
    fn test_missing_loader_section() {
        let image = ContainerBuilder::new()
            .data_section("data", &[0; 4])
            .without_loader()
            .build()
            .unwrap();
        let mut dest = [0u8; 4];
        assert_eq!(
            get_symbol_from_pef(pascal("gVersion").as_bytes(), &image, &mut dest),
            Err(PefError::NoSuchSection)
        );
    }

    #[test]
    fn test_malformed_lookup_name() {
        let image = driver_image();
        let mut dest = [0u8; 4];
        assert_eq!(
            get_symbol_from_pef(b"\x09short", &image, &mut dest),
            Err(PefError::InvalidParameter)
        );
        assert_eq!(get_symbol_from_pef(b"", &image, &mut dest), Err(PefError::InvalidParameter));
    }

    #[test]
    fn test_first_duplicate_wins() {
        let image = ContainerBuilder::new()
            .data_section("first", &[1, 1])
            .data_section("second", &[2, 2])
            .export(Export::data("gDup", 0, 0))
            .export(Export::data("gDup", 1, 0))
            .build()
            .unwrap();

        let resolved = SymbolResolver::new().resolve(&image, pascal("gDup").as_bytes()).unwrap();
        assert_eq!(resolved.section_index, 0);
    }

    #[test]
    fn test_hashed_lookup_matches_linear() {
        let image = driver_image();
        let linear = SymbolResolver::new();
        let hashed = SymbolResolver::with_config(ResolverConfig::default().with_lookup(LookupStrategy::Hashed));

        for name in ["DoDriverIO", "TheDriverDescription", "gVersion", "gMagic"] {
            let a = linear.resolve(&image, pascal(name).as_bytes()).unwrap();
            let b = hashed.resolve(&image, pascal(name).as_bytes()).unwrap();
            assert_eq!(a, b);
        }
        assert_eq!(
            hashed.resolve(&image, pascal("gNothing").as_bytes()),
            Err(PefError::NoSuchSymbol)
        );
    }

    #[test]
    fn test_special_section_index() {
        let image = ContainerBuilder::new()
            .data_section("data", &[0; 4])
            .export(Export::absolute("kAbsolute", 0x1234))
            .build()
            .unwrap();
        let mut dest = [0u8; 4];
        assert_eq!(
            get_symbol_from_pef(pascal("kAbsolute").as_bytes(), &image, &mut dest),
            Err(PefError::NoSuchSection)
        );
    }

    #[test]
    fn test_corrupt_pi_data() {
        // Zero run longer than the declared section.
        let overflow = [Instruction::Zero(64)];
        let image = ContainerBuilder::new()
            .pi_data_instructions("pidata", &overflow, 16)
            .export(Export::data("gTable", 0, 0))
            .build()
            .unwrap();

        let mut dest = [0u8; 4];
        let err = get_symbol_from_pef(pascal("gTable").as_bytes(), &image, &mut dest).unwrap_err();
        assert_eq!(err, PefError::FragmentCorrupt);
        assert_eq!(err.code(), crate::error::status::CFRAG_FRAGMENT_CORRUPT_ERR);
    }

    #[test]
    fn test_exact_fill_setting() {
        let short = [Instruction::Block(&[7, 7, 7, 7])];
        let image = ContainerBuilder::new()
            .pi_data_instructions("pidata", &short, 16)
            .export(Export::data("gTable", 0, 0))
            .build()
            .unwrap();

        let lenient = SymbolResolver::new().symbol_data(pascal("gTable").as_bytes(), &image, 4).unwrap();
        assert_eq!(lenient, vec![7, 7, 7, 7]);

        let strict = SymbolResolver::with_config(
            ResolverConfig::default().with_unpack(UnpackConfig::default().with_exact_fill(true)),
        );
        assert_eq!(
            strict.symbol_data(pascal("gTable").as_bytes(), &image, 4),
            Err(PefError::FragmentCorrupt)
        );
    }
}
