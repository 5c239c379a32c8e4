// Arcvet columnar archive validator.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Arcvet answers one question about a columnar, self-describing
//! sequencing archive: is it internally consistent, both structurally and
//! semantically?
//!
//! An archive is a tree of named objects: databases containing tables,
//! tables containing columns and indices, columns containing blobs,
//! accompanied by per-file MD5 manifests and per-blob CRC32 checksums. The
//! same tree may be stored as a directory hierarchy, as a concatenated
//! container file, or inside an encrypted wrapper.
//!
//! Validation is strictly read-only. The [probe::probe] classifies a path
//! and opens the logical root; the [walker] traverses every object,
//! driving the checksum and index checkers; the semantic validator reads
//! typed columns through the [cursor] layer and enforces the per-schema
//! laws (sum-of-parts, referential integrity, the secondary-alignment deep
//! check). Findings flow through a [monitor::ReportSink].

pub mod archive;
pub mod checksum;
pub mod consistency;
pub mod cursor;
pub mod errors;
pub mod index;
pub mod lookup;
pub mod misc;
pub mod monitor;
pub mod probe;
pub mod progress;
pub mod result;
pub mod ric;
pub mod sdc;
pub mod sweep;
pub mod test_fixtures;
pub mod threads;
pub mod transport;
pub mod validate;
pub mod walker;

pub use crate::archive::{Archive, ObjectKind};
pub use crate::cursor::{CellData, ColId, Cursor, RowRange, Table};
pub use crate::errors::{Error, ReportKind};
pub use crate::monitor::{ReportEvent, ReportSink};
pub use crate::probe::{probe, ArchiveKind, RootHandle};
pub use crate::validate::{
    validate_path, CancelToken, SdcLimit, SdcOptions, ValidateStats, ValidatorOptions,
};

pub type Result<T> = std::result::Result<T, Error>;

/// Magic prefix of a container file.
pub const CONTAINER_MAGIC: &[u8; 8] = b"ARCVETC1";
/// Magic prefix of an encrypted envelope header.
pub const ENVELOPE_MAGIC: &[u8; 8] = b"ARCVETE1";

/// Format version written by producers this build can read.
pub const ARCHIVE_FORMAT_VERSION: &str = "0.1.0";
/// Format versions this build accepts.
pub const SUPPORTED_FORMAT_REQ: &str = "^0.1";

/// Version of the arcvet library and binary.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
