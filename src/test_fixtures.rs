// Arcvet columnar archive validator.

/// Utilities to build synthetic archives for tests.
///
/// The validator never writes archives, so the writers live here: they
/// produce the directory layout, container files and envelopes the real
/// producers would, and are deleted with their temporary directory.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::archive::{
    BlobMeta, ColMeta, DbMeta, IdxMeta, TblMeta, BLOBS_META, COL_DIR, COL_META, DATA_DIR, DB_META,
    IDX_DIR, IDX_META, KEYS_FILE, MD5_FILE, TBL_DIR, TBL_META,
};
use crate::checksum::md5_hex;
use crate::cursor::Table;
use crate::transport::container::TocEntry;
use crate::transport::local::open_local_transport;
use crate::{ARCHIVE_FORMAT_VERSION, CONTAINER_MAGIC, ENVELOPE_MAGIC};

fn write_json<T: serde::Serialize>(path: &Path, value: &T) {
    let json = serde_json::to_vec_pretty(value).unwrap();
    fs::write(path, json).unwrap();
}

fn snap_compress(raw: &[u8]) -> Vec<u8> {
    let mut encoder = snap::write::FrameEncoder::new(Vec::new());
    encoder.write_all(raw).unwrap();
    encoder.into_inner().unwrap()
}

/// Writes one table directory: marker, columns, indices.
pub struct TableWriter {
    dir: PathBuf,
}

impl TableWriter {
    pub fn create(dir: PathBuf, schema: Option<&str>) -> TableWriter {
        fs::create_dir_all(&dir).unwrap();
        write_json(
            &dir.join(TBL_META),
            &TblMeta {
                schema: schema.map(str::to_string),
                version: ARCHIVE_FORMAT_VERSION.to_string(),
                created: None,
            },
        );
        TableWriter { dir }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Write one column from (row, cell) pairs, with cell values given as
    /// raw element bit patterns. Blobs break at row gaps and at
    /// `rows_per_blob`.
    pub fn column_raw(
        &self,
        name: &str,
        elem_bits: u32,
        cells: &[(i64, Vec<u64>)],
        rows_per_blob: usize,
    ) {
        assert!(elem_bits % 8 == 0 && elem_bits > 0);
        let col_dir = self.dir.join(COL_DIR).join(name);
        let data_dir = col_dir.join(DATA_DIR);
        let _ = fs::remove_dir_all(&col_dir);
        fs::create_dir_all(&data_dir).unwrap();

        let bytes_per_elem = (elem_bits / 8) as usize;
        let mut sparse = false;
        let mut blobs: Vec<BlobMeta> = Vec::new();
        let mut raw: Vec<u8> = Vec::new();
        let mut blob_rows: Vec<(i64, u32)> = Vec::new();

        let mut flush = |raw: &mut Vec<u8>, blob_rows: &mut Vec<(i64, u32)>| {
            if blob_rows.is_empty() {
                return;
            }
            let first_row = blob_rows[0].0;
            let meta = BlobMeta {
                first_row,
                row_count: blob_rows.len() as u64,
                elem_counts: blob_rows.iter().map(|(_, n)| *n).collect(),
                crc32: crc32fast::hash(raw),
            };
            fs::write(
                data_dir.join(format!("{first_row}.blob")),
                snap_compress(raw),
            )
            .unwrap();
            blobs.push(meta);
            raw.clear();
            blob_rows.clear();
        };

        let mut expected_row = None;
        for (row, values) in cells {
            if let Some(expected) = expected_row {
                if *row != expected {
                    assert!(*row > expected, "cells must be in ascending row order");
                    sparse = true;
                    flush(&mut raw, &mut blob_rows);
                }
            }
            if blob_rows.len() >= rows_per_blob {
                flush(&mut raw, &mut blob_rows);
            }
            for value in values {
                raw.extend_from_slice(&value.to_le_bytes()[..bytes_per_elem]);
            }
            blob_rows.push((*row, values.len() as u32));
            expected_row = Some(row + 1);
        }
        flush(&mut raw, &mut blob_rows);

        write_json(
            &col_dir.join(COL_META),
            &ColMeta { elem_bits, sparse },
        );
        write_json(&col_dir.join(BLOBS_META), &blobs);
    }

    pub fn column_u8(&self, name: &str, cells: &[(i64, Vec<u8>)]) {
        let cells: Vec<(i64, Vec<u64>)> = cells
            .iter()
            .map(|(row, values)| (*row, values.iter().map(|v| *v as u64).collect()))
            .collect();
        self.column_raw(name, 8, &cells, usize::MAX);
    }

    pub fn column_u32(&self, name: &str, cells: &[(i64, Vec<u32>)]) {
        let cells: Vec<(i64, Vec<u64>)> = cells
            .iter()
            .map(|(row, values)| (*row, values.iter().map(|v| *v as u64).collect()))
            .collect();
        self.column_raw(name, 32, &cells, usize::MAX);
    }

    pub fn column_i32(&self, name: &str, cells: &[(i64, Vec<i32>)]) {
        let cells: Vec<(i64, Vec<u64>)> = cells
            .iter()
            .map(|(row, values)| (*row, values.iter().map(|v| *v as u32 as u64).collect()))
            .collect();
        self.column_raw(name, 32, &cells, usize::MAX);
    }

    pub fn column_i64(&self, name: &str, cells: &[(i64, Vec<i64>)]) {
        self.column_i64_paged(name, cells, usize::MAX);
    }

    pub fn column_i64_paged(&self, name: &str, cells: &[(i64, Vec<i64>)], rows_per_blob: usize) {
        let cells: Vec<(i64, Vec<u64>)> = cells
            .iter()
            .map(|(row, values)| (*row, values.iter().map(|v| *v as u64).collect()))
            .collect();
        self.column_raw(name, 64, &cells, rows_per_blob);
    }

    /// Write a sorted-key index.
    pub fn index(&self, name: &str, keys: &[i64]) {
        let idx_dir = self.dir.join(IDX_DIR).join(name);
        fs::create_dir_all(&idx_dir).unwrap();
        write_json(
            &idx_dir.join(IDX_META),
            &IdxMeta {
                kind: crate::index::KIND_I64_SORTED.to_string(),
            },
        );
        let mut raw = Vec::with_capacity(keys.len() * 8);
        for key in keys {
            raw.extend_from_slice(&key.to_le_bytes());
        }
        fs::write(idx_dir.join(KEYS_FILE), snap_compress(&raw)).unwrap();
    }
}

/// A temporary standalone table, deleted when it goes out of scope.
pub struct TableFixture {
    _tempdir: TempDir,
    writer: TableWriter,
    name: String,
}

impl TableFixture {
    pub fn new(name: &str) -> TableFixture {
        let tempdir = TempDir::new().unwrap();
        let writer = TableWriter::create(tempdir.path().join(name), None);
        TableFixture {
            _tempdir: tempdir,
            writer,
            name: name.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    pub fn column_u8(&self, name: &str, cells: &[(i64, Vec<u8>)]) {
        self.writer.column_u8(name, cells);
    }

    pub fn column_u32(&self, name: &str, cells: &[(i64, Vec<u32>)]) {
        self.writer.column_u32(name, cells);
    }

    pub fn column_u32_paged(&self, name: &str, cells: &[(i64, Vec<u32>)], rows_per_blob: usize) {
        let cells: Vec<(i64, Vec<u64>)> = cells
            .iter()
            .map(|(row, values)| (*row, values.iter().map(|v| *v as u64).collect()))
            .collect();
        self.writer.column_raw(name, 32, &cells, rows_per_blob);
    }

    pub fn column_i32(&self, name: &str, cells: &[(i64, Vec<i32>)]) {
        self.writer.column_i32(name, cells);
    }

    pub fn column_i64(&self, name: &str, cells: &[(i64, Vec<i64>)]) {
        self.writer.column_i64(name, cells);
    }

    /// Replace a column's contents in place.
    pub fn rewrite_column_u32(&self, name: &str, cells: &[(i64, Vec<u32>)]) {
        self.writer.column_u32(name, cells);
    }

    pub fn table(&self) -> Table {
        Table::open(open_local_transport(self.path()).unwrap(), &self.name).unwrap()
    }
}

/// A temporary archive directory, deleted when it goes out of scope.
pub struct ScratchArchive {
    _tempdir: TempDir,
    root: PathBuf,
}

impl ScratchArchive {
    /// An archive whose root is a standalone read table.
    pub fn new_table(name: &str) -> (ScratchArchive, TableWriter) {
        let tempdir = TempDir::new().unwrap();
        let root = tempdir.path().join(name);
        let writer = TableWriter::create(root.clone(), Some("sra:tbl:sequence"));
        (
            ScratchArchive {
                _tempdir: tempdir,
                root,
            },
            writer,
        )
    }

    /// An archive whose root is an alignment database.
    pub fn new_align_db(name: &str) -> ScratchArchive {
        let tempdir = TempDir::new().unwrap();
        let root = tempdir.path().join(name);
        fs::create_dir_all(&root).unwrap();
        write_json(
            &root.join(DB_META),
            &DbMeta {
                schema: "align:db:alignment".to_string(),
                version: ARCHIVE_FORMAT_VERSION.to_string(),
                created: Some(chrono::Utc::now()),
            },
        );
        ScratchArchive {
            _tempdir: tempdir,
            root,
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Add one member table to a database archive.
    pub fn db_table(&self, name: &str) -> TableWriter {
        TableWriter::create(self.root.join(TBL_DIR).join(name), None)
    }

    /// Write MD5 manifests for every object directory in the tree.
    pub fn seal(&self) {
        write_tree_manifests(&self.root);
    }

    /// Pack the directory tree into a container file.
    pub fn pack_container(&self, out: &Path) {
        let mut members: Vec<(String, Vec<u8>)> = Vec::new();
        collect_files(&self.root, "", &mut members);
        members.sort_by(|a, b| a.0.cmp(&b.0));

        let mut toc = Vec::new();
        let mut data = Vec::new();
        for (path, content) in &members {
            toc.push(TocEntry {
                path: path.clone(),
                offset: data.len() as u64,
                len: content.len() as u64,
            });
            data.extend_from_slice(content);
        }
        let toc_json = serde_json::to_vec(&toc).unwrap();
        let mut raw = Vec::new();
        raw.extend_from_slice(CONTAINER_MAGIC);
        raw.extend_from_slice(&(toc_json.len() as u32).to_le_bytes());
        raw.extend_from_slice(&toc_json);
        raw.extend_from_slice(&data);
        fs::write(out, raw).unwrap();
    }

    /// Pack into a container and wrap it in an encrypted envelope.
    pub fn pack_encrypted(&self, out: &Path) {
        let container = out.with_extension("container.tmp");
        self.pack_container(&container);
        let payload = fs::read(&container).unwrap();
        fs::remove_file(&container).unwrap();

        let mut raw = Vec::new();
        raw.extend_from_slice(ENVELOPE_MAGIC);
        raw.resize(crate::probe::ENVELOPE_HEADER_LEN, 0);
        raw.extend_from_slice(&payload);
        raw.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        fs::write(out, raw).unwrap();
    }
}

fn collect_files(dir: &Path, prefix: &str, out: &mut Vec<(String, Vec<u8>)>) {
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        if entry.file_type().unwrap().is_dir() {
            collect_files(&entry.path(), &path, out);
        } else {
            out.push((path, fs::read(entry.path()).unwrap()));
        }
    }
}

/// Write the MD5 manifest of one object directory and recurse into child
/// objects. Entry sets follow the object kind's layout.
pub fn write_tree_manifests(dir: &Path) {
    let mut entries: Vec<String> = Vec::new();
    if dir.join(DB_META).is_file() {
        entries.push(DB_META.to_string());
        let tbl_dir = dir.join(TBL_DIR);
        if tbl_dir.is_dir() {
            for child in fs::read_dir(&tbl_dir).unwrap() {
                write_tree_manifests(&child.unwrap().path());
            }
        }
    } else if dir.join(TBL_META).is_file() {
        entries.push(TBL_META.to_string());
        for sub in [COL_DIR, IDX_DIR] {
            let sub_dir = dir.join(sub);
            if sub_dir.is_dir() {
                for child in fs::read_dir(&sub_dir).unwrap() {
                    write_tree_manifests(&child.unwrap().path());
                }
            }
        }
    } else if dir.join(COL_META).is_file() {
        entries.push(COL_META.to_string());
        entries.push(BLOBS_META.to_string());
        let data_dir = dir.join(DATA_DIR);
        if data_dir.is_dir() {
            let mut blobs: Vec<String> = fs::read_dir(&data_dir)
                .unwrap()
                .map(|e| format!("{DATA_DIR}/{}", e.unwrap().file_name().to_string_lossy()))
                .collect();
            blobs.sort();
            entries.extend(blobs);
        }
    } else if dir.join(IDX_META).is_file() {
        entries.push(IDX_META.to_string());
        entries.push(KEYS_FILE.to_string());
    } else {
        return;
    }

    let mut manifest = String::new();
    for entry in &entries {
        let content = fs::read(dir.join(entry)).unwrap();
        manifest.push_str(&format!("{}  {}\n", md5_hex(&content), entry));
    }
    fs::write(dir.join(MD5_FILE), manifest).unwrap();
}
