//! # Helix PEF Loader
//!
//! Reader for Preferred Executable Format containers as produced by classic
//! PowerPC and 68K toolchains. The crate works on a container that is already
//! resident in memory and never touches files or devices.
//!
//! ## Architecture
//!
//! - **format**: fixed-size big-endian records and their codecs
//! - **container / loader**: validated views over the section table and the
//!   loader section export tables
//! - **pidata**: pattern-initialized data decompressor and encoder
//! - **symbols**: export lookup and copy-out of symbol data
//! - **builder**: container writer for fixtures and tooling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use helix_pef::get_symbol_from_pef;
//!
//! let mut version = [0u8; 4];
//! get_symbol_from_pef(b"\x08gVersion", &container, &mut version)?;
//! ```

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

extern crate alloc;

// =============================================================================
// MODULES
// =============================================================================

/// Container writer
pub mod builder;

/// Lookup and decompression settings
pub mod config;

/// Container header and section table view
pub mod container;

/// Bounds-checked byte reader
pub mod cursor;

/// Error types and Mac OS status codes
pub mod error;

/// On-disk records
pub mod format;

/// Loader section view
pub mod loader;

/// Unpack buffer allocation
pub mod memory;

/// Pattern-initialized data
pub mod pidata;

/// Export lookup
pub mod symbols;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use builder::{BuildError, ContainerBuilder, Export};
pub use config::{LookupStrategy, ResolverConfig, UnpackConfig};
pub use container::Container;
pub use error::{os_status, PefError, Result, UnpackError};
pub use format::{SectionHeader, SectionKind, SymbolClass, SymbolFlags};
pub use loader::{ExportEntry, LoaderSection};
pub use memory::{SectionAllocator, SystemAllocator};
pub use pidata::{unpack_pi_data, unpack_pi_data_with};
pub use symbols::{
    get_symbol_from_pef, symbol_compare, PascalString, ResolvedSymbol, SymbolResolver,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// TESTS
// =============================================================================
