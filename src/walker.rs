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

//! Depth-first traversal of the archive tree, driving the checksum and
//! index checkers and emitting a typed event stream.
//!
//! For any object its `Visit` is emitted before any event of its
//! descendants and its `Done` after all descendant `Done` events; siblings
//! appear in stable order by name. A failure stops the failed object's
//! subtree but siblings are still visited; in exhaustive mode checking
//! continues past failures within an object too.

use tracing::{debug, warn};

use crate::archive::{
    Archive, ObjectKind, BLOBS_META, COL_DIR, COL_META, DATA_DIR, DB_META, IDX_DIR, IDX_META,
    KEYS_FILE, MD5_FILE, TBL_DIR, TBL_META,
};
use crate::checksum::{check_manifest_entry, decompress_and_crc, parse_manifest};
use crate::monitor::{Counter, ReportEvent, ReportSink};
use crate::transport::Transport;
use crate::validate::{CancelToken, ValidatorOptions};
use crate::*;

/// What a completed walk saw, used for the nothing-to-validate warning.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct WalkStats {
    pub columns_checked: usize,
    pub indexes_checked: usize,
}

pub struct Walker<'a> {
    options: &'a ValidatorOptions,
    sink: &'a dyn ReportSink,
    cancel: &'a CancelToken,
    stats: WalkStats,
}

impl<'a> Walker<'a> {
    pub fn new(
        options: &'a ValidatorOptions,
        sink: &'a dyn ReportSink,
        cancel: &'a CancelToken,
    ) -> Walker<'a> {
        Walker {
            options,
            sink,
            cancel,
            stats: WalkStats::default(),
        }
    }

    /// Drive a single traversal over the archive's object tree.
    pub fn walk(mut self, archive: &Archive) -> (WalkStats, Result<()>) {
        let transport = archive.transport().clone();
        let result = match archive.root_kind() {
            ObjectKind::Database => self.visit_database(transport.as_ref(), archive.name(), 0),
            ObjectKind::Table => self.visit_table(transport.as_ref(), archive.name(), 0),
            _ => Err(Error::NotAnArchive {
                path: archive.name().into(),
            }),
        };
        (self.stats, result)
    }

    fn visit(&self, obj_type: ObjectKind, name: &str, depth: usize) -> Result<()> {
        self.cancel.check()?;
        self.sink.event(ReportEvent::Visit {
            obj_type,
            name: name.to_string(),
            depth,
        });
        self.sink.count(Counter::Visits, 1);
        Ok(())
    }

    fn done(&self, name: &str, result: &Result<()>) {
        let (mesg, rc) = match result {
            Ok(()) => ("ok".to_string(), 0),
            Err(err) => (err.to_string(), err.kind().exit_code()),
        };
        self.sink.event(ReportEvent::Done {
            obj_name: name.to_string(),
            mesg,
            rc,
        });
    }

    /// Emit the visit/done pair for one metadata marker file.
    fn visit_metadata(&self, name: &str, depth: usize) -> Result<()> {
        self.visit(ObjectKind::Metadata, name, depth)?;
        self.done(name, &Ok(()));
        Ok(())
    }

    /// In exhaustive mode record the failure and carry on; otherwise stop.
    fn note_or_stop(&self, first_err: &mut Option<Error>, err: Error) -> Result<()> {
        if matches!(err, Error::Cancelled) || !self.options.exhaustive {
            return Err(err);
        }
        if first_err.is_none() {
            *first_err = Some(err);
        }
        Ok(())
    }

    fn visit_database(&mut self, t: &dyn Transport, name: &str, depth: usize) -> Result<()> {
        self.visit(ObjectKind::Database, name, depth)?;
        let result = self.database_body(t, name, depth);
        self.done(name, &result);
        result
    }

    fn database_body(&mut self, t: &dyn Transport, name: &str, depth: usize) -> Result<()> {
        self.visit_metadata(DB_META, depth + 1)?;
        let mut first_err = None;
        if let Err(err) = self.check_manifest(t, name) {
            self.note_or_stop(&mut first_err, err)?;
        }
        let listing = t.list_dir("")?;
        for file in &listing.files {
            if file != DB_META && file != MD5_FILE {
                self.sink.warning(&Error::UnexpectedObject {
                    parent: name.to_string(),
                    name: file.clone(),
                });
            }
        }
        for dir in &listing.dirs {
            if dir != TBL_DIR {
                self.sink.warning(&Error::UnexpectedObject {
                    parent: name.to_string(),
                    name: dir.clone(),
                });
            }
        }

        if listing.dirs.iter().any(|d| d == TBL_DIR) {
            for table in t.list_dir(TBL_DIR)?.dirs {
                let sub = t.sub_transport(&format!("{TBL_DIR}/{table}"));
                match self.visit_table(sub.as_ref(), &table, depth + 1) {
                    Ok(()) => (),
                    Err(err @ Error::Cancelled) => return Err(err),
                    Err(err) => {
                        // The failed subtree stops; siblings are still walked.
                        if first_err.is_none() {
                            first_err = Some(err);
                        }
                    }
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn visit_table(&mut self, t: &dyn Transport, name: &str, depth: usize) -> Result<()> {
        self.visit(ObjectKind::Table, name, depth)?;
        let result = self.table_body(t, name, depth);
        self.done(name, &result);
        result
    }

    fn table_body(&mut self, t: &dyn Transport, name: &str, depth: usize) -> Result<()> {
        self.visit_metadata(TBL_META, depth + 1)?;
        let mut first_err = None;
        if let Err(err) = self.check_manifest(t, name) {
            self.note_or_stop(&mut first_err, err)?;
        }
        let listing = t.list_dir("")?;
        for file in &listing.files {
            if file != TBL_META && file != MD5_FILE {
                self.sink.warning(&Error::UnexpectedObject {
                    parent: name.to_string(),
                    name: file.clone(),
                });
            }
        }
        for dir in &listing.dirs {
            if dir != COL_DIR && dir != IDX_DIR {
                self.sink.warning(&Error::UnexpectedObject {
                    parent: name.to_string(),
                    name: dir.clone(),
                });
            }
        }

        let mut note = |err: Error| -> Result<()> {
            match err {
                Error::Cancelled => Err(Error::Cancelled),
                err => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                    Ok(())
                }
            }
        };
        if listing.dirs.iter().any(|d| d == COL_DIR) {
            for column in t.list_dir(COL_DIR)?.dirs {
                let sub = t.sub_transport(&format!("{COL_DIR}/{column}"));
                if let Err(err) = self.visit_column(sub.as_ref(), &column, depth + 1) {
                    note(err)?;
                }
            }
        }
        if listing.dirs.iter().any(|d| d == IDX_DIR) {
            for index in t.list_dir(IDX_DIR)?.dirs {
                let sub = t.sub_transport(&format!("{IDX_DIR}/{index}"));
                if let Err(err) = self.visit_index(sub.as_ref(), &index, depth + 1) {
                    note(err)?;
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn visit_column(&mut self, t: &dyn Transport, name: &str, depth: usize) -> Result<()> {
        self.visit(ObjectKind::Column, name, depth)?;
        let result = self.column_body(t, name, depth);
        if result.is_ok() {
            debug!(column = name, "column checked");
        }
        self.done(name, &result);
        result
    }

    fn column_body(&mut self, t: &dyn Transport, name: &str, depth: usize) -> Result<()> {
        self.visit_metadata(COL_META, depth + 1)?;
        let mut first_err = None;
        let mut checked = match self.check_manifest(t, name) {
            Ok(entries) => entries > 0,
            Err(err) => {
                self.note_or_stop(&mut first_err, err)?;
                true
            }
        };

        let col_meta: crate::archive::ColMeta = crate::archive::read_json(t, COL_META)?;
        let blobs: Vec<crate::archive::BlobMeta> = crate::archive::read_json(t, BLOBS_META)?;
        for blob in &blobs {
            self.cancel.check()?;
            self.sink.event(ReportEvent::Blob {
                obj_name: name.to_string(),
                first_row: blob.first_row,
                row_count: blob.row_count,
                size_bits: blob.total_elements() * col_meta.elem_bits as u64,
            });
            if !self.options.blob_crc {
                continue;
            }
            let compressed = t.read_file(&format!("{DATA_DIR}/{}.blob", blob.first_row))?;
            let (_data, computed) = decompress_and_crc(&compressed)?;
            self.sink.count(Counter::BlobsChecked, 1);
            checked = true;
            if computed != blob.crc32 {
                let err = Error::BlobCrcMismatch {
                    column: name.to_string(),
                    first_row: blob.first_row,
                    expected: blob.crc32,
                    computed,
                };
                self.sink.error(&err);
                if !self.options.exhaustive {
                    return Err(err);
                }
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        if checked {
            self.stats.columns_checked += 1;
            self.sink.count(Counter::ColumnsChecked, 1);
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn visit_index(&mut self, t: &dyn Transport, name: &str, depth: usize) -> Result<()> {
        self.visit(ObjectKind::Index, name, depth)?;
        let result = self.index_body(t, name, depth);
        self.done(name, &result);
        result
    }

    fn index_body(&mut self, t: &dyn Transport, name: &str, depth: usize) -> Result<()> {
        self.visit_metadata(IDX_META, depth + 1)?;
        self.sink.event(ReportEvent::Index {
            obj_name: name.to_string(),
        });
        let mut first_err = None;
        if let Err(err) = self.check_manifest(t, name) {
            self.note_or_stop(&mut first_err, err)?;
        }
        let listing = t.list_dir("")?;
        for file in &listing.files {
            if file != IDX_META && file != MD5_FILE && file != KEYS_FILE {
                self.sink.warning(&Error::UnexpectedObject {
                    parent: name.to_string(),
                    name: file.clone(),
                });
            }
        }
        if self.options.index {
            self.cancel.check()?;
            match crate::index::check_index(t, name) {
                Ok(keys) => {
                    debug!(index = name, keys, "index checked");
                    self.stats.indexes_checked += 1;
                    self.sink.count(Counter::IndexesChecked, 1);
                }
                Err(err) => {
                    self.sink.error(&err);
                    self.note_or_stop(&mut first_err, err)?;
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Verify the directory's MD5 manifest if present.
    ///
    /// Returns the number of entries checked. A missing manifest is fatal
    /// only when MD5 checking is required; otherwise it is a warning.
    fn check_manifest(&self, t: &dyn Transport, obj_name: &str) -> Result<usize> {
        if !self.options.md5 {
            return Ok(0);
        }
        if !t.is_file(MD5_FILE)? {
            let err = Error::MissingChecksums {
                object: obj_name.to_string(),
            };
            if self.options.md5_required {
                self.sink.error(&err);
                return Err(err);
            }
            self.sink.warning(&err);
            return Ok(0);
        }
        let manifest = t.read_file(MD5_FILE)?;
        let entries = match parse_manifest(&manifest, obj_name) {
            Ok(entries) => entries,
            Err(err) => {
                self.sink.error(&err);
                return Err(err);
            }
        };
        let mut first_err = None;
        for entry in &entries {
            self.cancel.check()?;
            let content = match t.read_file(&entry.filename) {
                Ok(content) => content,
                Err(source) => {
                    warn!(
                        file = %entry.filename,
                        object = obj_name,
                        "manifest names an unreadable file"
                    );
                    let err = Error::Md5Mismatch {
                        object: obj_name.to_string(),
                        file: entry.filename.clone(),
                        expected: entry.digest.clone(),
                        computed: format!("<unreadable: {source}>"),
                    };
                    self.sink.error(&err);
                    if !self.options.exhaustive {
                        return Err(err);
                    }
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                    continue;
                }
            };
            let (computed, maybe_err) = check_manifest_entry(obj_name, entry, &content);
            self.sink.event(ReportEvent::Md5 {
                obj_name: obj_name.to_string(),
                file: entry.filename.clone(),
                computed,
                expected: entry.digest.clone(),
            });
            self.sink.count(Counter::Md5Checked, 1);
            if let Some(err) = maybe_err {
                self.sink.error(&err);
                if !self.options.exhaustive {
                    return Err(err);
                }
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            None => Ok(entries.len()),
            Some(err) => Err(err),
        }
    }
}
