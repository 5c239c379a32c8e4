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

//! Archive objects and their persisted metadata.
//!
//! An archive is a tree of named objects: databases containing tables, tables
//! containing columns and indices, columns containing blobs. Objects are
//! identified by json marker files; all metadata is consumed, never written.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::probe::RootHandle;
use crate::transport::{Transport, TransportRef};
use crate::*;

/// Marker file identifying a database directory.
pub const DB_META: &str = "db.json";
/// Marker file identifying a table directory.
pub const TBL_META: &str = "tbl.json";
/// Marker file identifying a column directory.
pub const COL_META: &str = "col.json";
/// Per-column blob descriptor list.
pub const BLOBS_META: &str = "blobs.json";
/// Marker file identifying an index directory.
pub const IDX_META: &str = "idx.json";
/// Per-directory MD5 manifest.
pub const MD5_FILE: &str = "md5";
/// Subdirectory of a database holding its tables.
pub const TBL_DIR: &str = "tbl";
/// Subdirectory of a table holding its columns.
pub const COL_DIR: &str = "col";
/// Subdirectory of a table holding its indices.
pub const IDX_DIR: &str = "idx";
/// Subdirectory of a column holding blob files.
pub const DATA_DIR: &str = "data";
/// Key file of a sorted index.
pub const KEYS_FILE: &str = "keys";

/// Kind of object in the archive tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, derive_more::Display)]
pub enum ObjectKind {
    #[display(fmt = "database")]
    Database,
    #[display(fmt = "table")]
    Table,
    #[display(fmt = "column")]
    Column,
    #[display(fmt = "index")]
    Index,
    #[display(fmt = "metadata")]
    Metadata,
}

/// Metadata of a database object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbMeta {
    pub schema: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

/// Metadata of a table object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TblMeta {
    /// Schema name; absent for tables inside a database, whose schema is
    /// carried by the database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

/// Metadata of a column object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColMeta {
    /// Width of one element; must be a whole number of bytes.
    pub elem_bits: u32,
    /// A sparse column may omit rows inside its nominal range.
    #[serde(default, skip_serializing_if = "crate::misc::is_false")]
    pub sparse: bool,
}

/// Descriptor of one blob of a column.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlobMeta {
    pub first_row: i64,
    pub row_count: u64,
    /// Element count of each cell in this blob, in row order.
    pub elem_counts: Vec<u32>,
    /// CRC32 of the uncompressed blob bytes.
    pub crc32: u32,
}

impl BlobMeta {
    /// Last row id served by this blob, inclusive.
    pub fn last_row(&self) -> i64 {
        self.first_row + self.row_count as i64 - 1
    }

    /// Total element count across all cells.
    pub fn total_elements(&self) -> u64 {
        self.elem_counts.iter().map(|n| *n as u64).sum()
    }
}

/// Metadata of an index object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdxMeta {
    pub kind: String,
}

/// Read and deserialize a json metadata file from a transport.
pub fn read_json<T: DeserializeOwned>(transport: &dyn Transport, relpath: &str) -> Result<T> {
    let bytes = transport.read_file(relpath)?;
    serde_json::from_slice(&bytes).map_err(|source| Error::DeserializeJson {
        path: format!("{}/{}", transport.describe(), relpath),
        source,
    })
}

/// Check that a persisted format version is one this build can read.
pub fn check_format_version(version: &str) -> Result<()> {
    let parsed = semver::Version::parse(version).map_err(|_| Error::UnsupportedArchiveVersion {
        version: version.to_string(),
    })?;
    let supported = semver::VersionReq::parse(SUPPORTED_FORMAT_REQ).unwrap();
    if supported.matches(&parsed) {
        Ok(())
    } else {
        Err(Error::UnsupportedArchiveVersion {
            version: version.to_string(),
        })
    }
}

/// An open archive root: either a single table or a database of tables.
#[derive(Debug)]
pub struct Archive {
    transport: TransportRef,
    root_kind: ObjectKind,
    name: String,
}

impl Archive {
    /// Open the logical root object behind a probed path.
    pub fn open(root: RootHandle) -> Result<Archive> {
        let name = root
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.path.display().to_string());
        let transport = root.transport;
        let root_kind = if transport.is_file(DB_META)? {
            let meta: DbMeta = read_json(transport.as_ref(), DB_META)?;
            check_format_version(&meta.version)?;
            ObjectKind::Database
        } else if transport.is_file(TBL_META)? {
            let meta: TblMeta = read_json(transport.as_ref(), TBL_META)?;
            check_format_version(&meta.version)?;
            ObjectKind::Table
        } else {
            return Err(Error::NotAnArchive { path: root.path });
        };
        Ok(Archive {
            transport,
            root_kind,
            name,
        })
    }

    pub fn transport(&self) -> &TransportRef {
        &self.transport
    }

    pub fn root_kind(&self) -> ObjectKind {
        self.root_kind
    }

    /// Name of the root object, for messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema name of the root object, if recorded.
    pub fn schema(&self) -> Result<Option<String>> {
        match self.root_kind {
            ObjectKind::Database => {
                let meta: DbMeta = read_json(self.transport.as_ref(), DB_META)?;
                Ok(Some(meta.schema))
            }
            ObjectKind::Table => {
                let meta: TblMeta = read_json(self.transport.as_ref(), TBL_META)?;
                Ok(meta.schema)
            }
            _ => Ok(None),
        }
    }

    /// Names of the tables of a database root, in stable name order.
    pub fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.transport.list_dir(TBL_DIR)?.dirs)
    }

    /// Transport scoped to one table of a database root.
    pub fn table_transport(&self, table: &str) -> TransportRef {
        self.transport.sub_transport(&format!("{TBL_DIR}/{table}"))
    }
}
