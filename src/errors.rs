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

//! Arcvet error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Arcvet specific error.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation cancelled")]
    Cancelled,

    #[error("Path not found: {path:?}")]
    NotFound { path: PathBuf },

    #[error("Failed to read {path:?}")]
    Unreadable { path: PathBuf, source: io::Error },

    #[error("Encrypted envelope of {path:?} is damaged: {reason}")]
    BadEnvelope { path: PathBuf, reason: String },

    #[error("Not an arcvet archive: {path:?}")]
    NotAnArchive { path: PathBuf },

    #[error(
        "Archive format version {version:?} is not supported by arcvet {}",
        crate::version()
    )]
    UnsupportedArchiveVersion { version: String },

    #[error("Failed to deserialize json from {path:?}")]
    DeserializeJson {
        path: String,
        source: serde_json::Error,
    },

    #[error("Database {database:?} does not contain all required tables")]
    DatabaseIncomplete { database: String },

    #[error("Table {table:?} has no {column:?} column")]
    ColumnNotFound { table: String, column: String },

    #[error("Column {column:?} is damaged: {reason}")]
    ColumnDamaged { column: String, reason: String },

    #[error(
        "File {file:?} of {object:?} failed MD5 check: expected {expected}, computed {computed}"
    )]
    Md5Mismatch {
        object: String,
        file: String,
        expected: String,
        computed: String,
    },

    #[error("Malformed MD5 manifest of {object:?} at line {line}")]
    BadManifest { object: String, line: usize },

    #[error(
        "Blob at row {first_row} of column {column:?} failed CRC32 check: \
        expected {expected:08x}, computed {computed:08x}"
    )]
    BlobCrcMismatch {
        column: String,
        first_row: i64,
        expected: u32,
        computed: u32,
    },

    #[error("{object:?} is missing required md5 files")]
    MissingChecksums { object: String },

    #[error("Index {index:?} keys are not sorted at position {position}")]
    IndexUnsorted { index: String, position: usize },

    #[error("Index {index:?} is damaged: {reason}")]
    IndexDamaged { index: String, reason: String },

    #[error("{parent:?} contains unexpected object {name:?}")]
    UnexpectedObject { parent: String, name: String },

    #[error("ID ranges in {a:?} and {b:?} columns do not match")]
    RangeMismatch { a: String, b: String },

    #[error("Sum(READ_LEN) != SPOT_LEN in row {row}")]
    SumMismatch { row: i64 },

    #[error("Row {row} not found in column {column:?}")]
    RowNotFound { column: String, row: i64 },

    #[error(
        "Cell at row {row} of column {column:?} has element width {actual_bits} bits, \
        expected {expected_bits}"
    )]
    ElementBits {
        column: String,
        row: i64,
        expected_bits: u32,
        actual_bits: u32,
    },

    #[error("Cell at row {row} of column {column:?} has nonzero bit offset {bit_offset}")]
    BitOffset {
        column: String,
        row: i64,
        bit_offset: u32,
    },

    #[error("Cell at row {row} of column {column:?} has {actual} elements, expected {expected}")]
    ElementCount {
        column: String,
        row: i64,
        expected: u32,
        actual: u32,
    },

    #[error("Referential integrity {a} <-> {b}: failed to retrieve pair {fkey} -> {row}")]
    RefIntegrityMissing {
        a: String,
        b: String,
        fkey: i64,
        row: i64,
    },

    #[error("Referential integrity {a} <-> {b}: inconsistent pair {fkey} -> {row}")]
    RefIntegrityPair {
        a: String,
        b: String,
        fkey: i64,
        row: i64,
    },

    #[error("SECONDARY_ALIGNMENT row {row} has SEQ_SPOT_ID = 0")]
    SpotIdZero { row: i64 },

    #[error(
        "SECONDARY_ALIGNMENT row {row} SEQ_READ_ID value {read_id} is out of \
        SEQUENCE row {spot} {column} range {fanout}"
    )]
    ReadIdRange {
        row: i64,
        read_id: i32,
        spot: i64,
        column: String,
        fanout: u32,
    },

    #[error(
        "PRIMARY_ALIGNMENT row {pri_row} HAS_REF_OFFSET length {pri_len} less than \
        SECONDARY_ALIGNMENT row {sec_row} HAS_REF_OFFSET length {sec_len}"
    )]
    PrimaryShorter {
        pri_row: i64,
        sec_row: i64,
        pri_len: u32,
        sec_len: u32,
    },

    #[error(
        "PRIMARY_ALIGNMENT row {pri_row} HAS_REF_OFFSET length {pri_len} does not match \
        SEQUENCE row {spot} READ_LEN[{read_id}] value {seq_read_len}"
    )]
    PrimaryLenMismatch {
        pri_row: i64,
        pri_len: u32,
        spot: i64,
        read_id: i32,
        seq_read_len: u32,
    },

    #[error(
        "Limit violation: at least {rows} alignments have a longer HAS_REF_OFFSET in \
        PRIMARY_ALIGNMENT than in SECONDARY_ALIGNMENT"
    )]
    LongerPrimaryLimit { rows: u64 },

    #[error("SECONDARY_ALIGNMENT row {row} TMP_MISMATCH column contains '='")]
    TmpMismatchEquals { row: i64 },

    #[error(
        "SEQUENCE row {row}: ALIGNMENT_COUNT[{mate}] = {count}, \
        PRIMARY_ALIGNMENT_ID[{mate}] = {id}"
    )]
    AlignmentCountMismatch {
        row: i64,
        mate: usize,
        count: u8,
        id: i64,
    },

    #[error("{check} could not be checked, skipped: {reason}")]
    CheckSkipped { check: String, reason: String },

    #[error("Nothing to validate; {object:?} has no checksums or is empty")]
    NothingToValidate { object: String },

    #[error("Cursor misuse: {message}")]
    CursorState { message: String },

    /// Generic IO error.
    #[error(transparent)]
    IOError {
        #[from]
        source: io::Error,
    },
}

/// The outward-facing classification of an error, deciding severity,
/// continuation policy and the process exit code.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ReportKind {
    Cancelled,
    FatalStructure,
    ChecksumMismatch,
    DataConsistency,
    MissingChecksum,
    UnexpectedObject,
    Incomplete,
}

impl ReportKind {
    /// Non-zero process exit code for this kind of failure; warnings map to 0.
    pub fn exit_code(self) -> i32 {
        match self {
            ReportKind::Cancelled => 6,
            ReportKind::FatalStructure => 2,
            ReportKind::ChecksumMismatch => 3,
            ReportKind::DataConsistency => 4,
            ReportKind::MissingChecksum => 5,
            ReportKind::UnexpectedObject | ReportKind::Incomplete => 0,
        }
    }

    pub fn is_warning(self) -> bool {
        matches!(self, ReportKind::UnexpectedObject | ReportKind::Incomplete)
    }
}

impl Error {
    pub fn kind(&self) -> ReportKind {
        use Error::*;
        match self {
            Cancelled => ReportKind::Cancelled,
            Md5Mismatch { .. } | BlobCrcMismatch { .. } | BadManifest { .. } => {
                ReportKind::ChecksumMismatch
            }
            MissingChecksums { .. } => ReportKind::MissingChecksum,
            UnexpectedObject { .. } => ReportKind::UnexpectedObject,
            CheckSkipped { .. } | NothingToValidate { .. } => ReportKind::Incomplete,
            RangeMismatch { .. }
            | SumMismatch { .. }
            | IndexUnsorted { .. }
            | RefIntegrityMissing { .. }
            | RefIntegrityPair { .. }
            | SpotIdZero { .. }
            | ReadIdRange { .. }
            | PrimaryShorter { .. }
            | PrimaryLenMismatch { .. }
            | LongerPrimaryLimit { .. }
            | TmpMismatchEquals { .. }
            | AlignmentCountMismatch { .. } => ReportKind::DataConsistency,
            _ => ReportKind::FatalStructure,
        }
    }

    /// True if this error means the target simply does not exist, as opposed
    /// to existing and being unreadable or inconsistent.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// True for the distinguishable cursor miss on an unmapped row id.
    pub fn is_row_not_found(&self) -> bool {
        matches!(self, Error::RowNotFound { .. })
    }
}
