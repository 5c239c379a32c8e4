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

//! Read-only typed cursors over tables.
//!
//! A cursor is opened on one table, columns are added by name, and after
//! `open_cursor` the cells can be read directly by row id. Cells are typed
//! element arrays with an explicit element width; readers assert the width
//! they expect. A miss on an unmapped row id is the distinguishable
//! row-not-found error, not a generic IO failure.

use std::sync::Mutex;

use bytes::Bytes;
use tracing::trace;

use crate::archive::{
    read_json, BlobMeta, ColMeta, TblMeta, BLOBS_META, COL_DIR, COL_META, DATA_DIR, TBL_META,
};
use crate::checksum::decompress_and_crc;
use crate::transport::TransportRef;
use crate::*;

/// Inclusive-exclusive row interval of a column.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RowRange {
    pub first: i64,
    pub count: u64,
}

impl RowRange {
    pub fn end(&self) -> i64 {
        self.first + self.count as i64
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn contains(&self, row: i64) -> bool {
        row >= self.first && row < self.end()
    }
}

/// Stable identifier of a column added to a cursor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ColId(usize);

/// A direct view of one cell's element array.
#[derive(Clone, Debug)]
pub struct CellData {
    pub elem_bits: u32,
    pub elem_count: u32,
    pub bit_offset: u32,
    pub data: Bytes,
}

/// A fixed-width element type readable from a cell.
pub trait Element: Copy {
    const BITS: u32;

    fn from_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty),*) => {
        $(impl Element for $t {
            const BITS: u32 = (std::mem::size_of::<$t>() * 8) as u32;

            fn from_le(bytes: &[u8]) -> Self {
                <$t>::from_le_bytes(bytes.try_into().unwrap())
            }
        })*
    };
}

impl_element!(u8, i8, u16, u32, i32, u64, i64);

/// An open table, from which cursors are created.
#[derive(Clone, Debug)]
pub struct Table {
    transport: TransportRef,
    name: String,
}

impl Table {
    /// Open a table from its directory transport.
    pub fn open(transport: TransportRef, name: &str) -> Result<Table> {
        // Standalone tables and database members both carry the marker.
        let _meta: TblMeta = read_json(transport.as_ref(), TBL_META)?;
        Ok(Table {
            transport,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Begin a read session on this table.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            table_name: self.name.clone(),
            table_transport: self.transport.clone(),
            cols: Vec::new(),
            open: false,
        }
    }
}

struct ColumnState {
    name: String,
    transport: TransportRef,
    meta: ColMeta,
    /// Blob descriptors sorted by first row; loaded at open.
    blobs: Vec<BlobMeta>,
    /// The one most recently decoded blob; column access is overwhelmingly
    /// sequential so a single slot carries the hit rate.
    cache: Mutex<Option<(usize, DecodedBlob)>>,
    /// Advisory prefetch hints as blob first-row ids.
    hints: Mutex<Vec<i64>>,
}

struct DecodedBlob {
    data: Bytes,
    /// Prefix sums of per-row element counts; length is row count + 1.
    offsets: Vec<u64>,
}

impl std::fmt::Debug for ColumnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnState")
            .field("name", &self.name)
            .field("blobs", &self.blobs.len())
            .finish()
    }
}

/// A read session on one table bound to a subset of columns.
#[derive(Debug)]
pub struct Cursor {
    table_name: String,
    table_transport: TransportRef,
    cols: Vec<ColumnState>,
    open: bool,
}

impl Cursor {
    /// Add a column to the read set. Must be called before `open_cursor`.
    pub fn add_column(&mut self, name: &str) -> Result<ColId> {
        if self.open {
            return Err(Error::CursorState {
                message: format!("add_column({name:?}) after open_cursor"),
            });
        }
        if !self
            .table_transport
            .is_file(&format!("{COL_DIR}/{name}/{COL_META}"))?
        {
            return Err(Error::ColumnNotFound {
                table: self.table_name.clone(),
                column: name.to_string(),
            });
        }
        let transport = self.table_transport.sub_transport(&format!("{COL_DIR}/{name}"));
        self.cols.push(ColumnState {
            name: name.to_string(),
            transport,
            meta: ColMeta {
                elem_bits: 0,
                sparse: false,
            },
            blobs: Vec::new(),
            cache: Mutex::new(None),
            hints: Mutex::new(Vec::new()),
        });
        Ok(ColId(self.cols.len() - 1))
    }

    /// Like `add_column` but absence is not an error.
    pub fn try_add_column(&mut self, name: &str) -> Option<ColId> {
        match self.add_column(name) {
            Ok(id) => Some(id),
            Err(_) => None,
        }
    }

    /// Finalise the column set; reads are not permitted before this step.
    pub fn open_cursor(&mut self) -> Result<()> {
        if self.open {
            return Err(Error::CursorState {
                message: "open_cursor called twice".to_string(),
            });
        }
        for col in &mut self.cols {
            col.meta = read_json(col.transport.as_ref(), COL_META)?;
            if col.meta.elem_bits == 0 || col.meta.elem_bits % 8 != 0 {
                return Err(Error::ColumnDamaged {
                    column: col.name.clone(),
                    reason: format!("element width {} bits is not byte-aligned", col.meta.elem_bits),
                });
            }
            col.blobs = read_json(col.transport.as_ref(), BLOBS_META)?;
            col.blobs.sort_by_key(|blob| blob.first_row);
            for pair in col.blobs.windows(2) {
                if pair[1].first_row <= pair[0].last_row() {
                    return Err(Error::ColumnDamaged {
                        column: col.name.clone(),
                        reason: format!(
                            "blobs at rows {} and {} overlap",
                            pair[0].first_row, pair[1].first_row
                        ),
                    });
                }
            }
            for blob in &col.blobs {
                if blob.elem_counts.len() as u64 != blob.row_count {
                    return Err(Error::ColumnDamaged {
                        column: col.name.clone(),
                        reason: format!(
                            "blob at row {} declares {} rows but {} cell lengths",
                            blob.first_row,
                            blob.row_count,
                            blob.elem_counts.len()
                        ),
                    });
                }
            }
        }
        self.open = true;
        Ok(())
    }

    fn col(&self, id: ColId) -> Result<&ColumnState> {
        if !self.open {
            return Err(Error::CursorState {
                message: "read before open_cursor".to_string(),
            });
        }
        Ok(&self.cols[id.0])
    }

    pub fn column_name(&self, id: ColId) -> &str {
        &self.cols[id.0].name
    }

    /// True if the column was declared sparse.
    pub fn is_sparse(&self, id: ColId) -> bool {
        self.cols[id.0].meta.sparse
    }

    /// The inclusive start id and total count of the column's row range.
    pub fn row_range(&self, id: ColId) -> Result<RowRange> {
        let col = self.col(id)?;
        match (col.blobs.first(), col.blobs.last()) {
            (Some(first), Some(last)) => Ok(RowRange {
                first: first.first_row,
                count: (last.last_row() - first.first_row + 1) as u64,
            }),
            _ => Ok(RowRange { first: 1, count: 0 }),
        }
    }

    /// For a column backed by blob pages, the `[first, last]` row range of
    /// the page containing `start_row`, or of the next page when the row
    /// falls in a gap.
    pub fn page_id_range(&self, id: ColId, start_row: i64) -> Result<(i64, i64)> {
        let col = self.col(id)?;
        let idx = col.blobs.partition_point(|blob| blob.last_row() < start_row);
        match col.blobs.get(idx) {
            Some(blob) => Ok((blob.first_row, blob.last_row())),
            None => Err(Error::RowNotFound {
                column: col.name.clone(),
                row: start_row,
            }),
        }
    }

    /// Hint that these rows will be read soon. O(1) amortised per id.
    pub fn prefetch(&self, id: ColId, rows: &[i64], bounds: RowRange) {
        let Ok(col) = self.col(id) else { return };
        let mut hints = col.hints.lock().unwrap();
        let mut last_page = i64::MIN;
        for &row in rows {
            if !bounds.contains(row) {
                continue;
            }
            let idx = col.blobs.partition_point(|blob| blob.last_row() < row);
            if let Some(blob) = col.blobs.get(idx) {
                if blob.first_row != last_page {
                    last_page = blob.first_row;
                    if hints.last() != Some(&blob.first_row) {
                        hints.push(blob.first_row);
                    }
                }
            }
        }
    }

    /// Number of distinct pages hinted so far, for diagnostics.
    pub fn hinted_pages(&self, id: ColId) -> usize {
        self.cols[id.0].hints.lock().unwrap().len()
    }

    /// A direct borrowed view of the cell's element array.
    pub fn cell(&self, row: i64, id: ColId) -> Result<CellData> {
        let col = self.col(id)?;
        let idx = col.blobs.partition_point(|blob| blob.last_row() < row);
        let blob = match col.blobs.get(idx) {
            Some(blob) if blob.first_row <= row => blob,
            _ => {
                return Err(Error::RowNotFound {
                    column: col.name.clone(),
                    row,
                })
            }
        };

        let bytes_per_elem = (col.meta.elem_bits / 8) as u64;
        let mut cache = col.cache.lock().unwrap();
        let hit = matches!(cache.as_ref(), Some((cached_idx, _)) if *cached_idx == idx);
        if !hit {
            let compressed = col
                .transport
                .read_file(&format!("{DATA_DIR}/{}.blob", blob.first_row))?;
            let (data, _crc) = decompress_and_crc(&compressed)?;
            trace!(
                column = %col.name,
                first_row = blob.first_row,
                bytes = data.len(),
                "decoded blob"
            );
            let mut offsets = Vec::with_capacity(blob.elem_counts.len() + 1);
            let mut total = 0u64;
            offsets.push(0);
            for count in &blob.elem_counts {
                total += *count as u64;
                offsets.push(total);
            }
            if total * bytes_per_elem != data.len() as u64 {
                return Err(Error::ColumnDamaged {
                    column: col.name.clone(),
                    reason: format!(
                        "blob at row {} has {} bytes but {} elements of {} bits",
                        blob.first_row,
                        data.len(),
                        total,
                        col.meta.elem_bits
                    ),
                });
            }
            *cache = Some((idx, DecodedBlob { data, offsets }));
        }
        let decoded = &cache.as_ref().unwrap().1;

        let row_idx = (row - blob.first_row) as usize;
        let start = decoded.offsets[row_idx] * bytes_per_elem;
        let end = decoded.offsets[row_idx + 1] * bytes_per_elem;
        Ok(CellData {
            elem_bits: col.meta.elem_bits,
            elem_count: blob.elem_counts[row_idx],
            bit_offset: 0,
            data: decoded.data.slice(start as usize..end as usize),
        })
    }

    /// Read a single element cell, asserting the element width.
    pub fn read_scalar<T: Element>(&self, row: i64, id: ColId) -> Result<T> {
        let cell = self.checked_cell::<T>(row, id)?;
        if cell.elem_count != 1 {
            return Err(Error::ElementCount {
                column: self.column_name(id).to_string(),
                row,
                expected: 1,
                actual: cell.elem_count,
            });
        }
        Ok(T::from_le(&cell.data))
    }

    /// Read a whole cell as a typed vector, asserting the element width.
    pub fn read_array<T: Element>(&self, row: i64, id: ColId) -> Result<Vec<T>> {
        let cell = self.checked_cell::<T>(row, id)?;
        let size = (T::BITS / 8) as usize;
        Ok(cell
            .data
            .chunks_exact(size)
            .map(T::from_le)
            .collect())
    }

    fn checked_cell<T: Element>(&self, row: i64, id: ColId) -> Result<CellData> {
        let cell = self.cell(row, id)?;
        if cell.elem_bits != T::BITS {
            return Err(Error::ElementBits {
                column: self.column_name(id).to_string(),
                row,
                expected_bits: T::BITS,
                actual_bits: cell.elem_bits,
            });
        }
        if cell.bit_offset != 0 {
            return Err(Error::BitOffset {
                column: self.column_name(id).to_string(),
                row,
                bit_offset: cell.bit_offset,
            });
        }
        Ok(cell)
    }
}

#[cfg(test)]
mod test {
    use crate::test_fixtures::TableFixture;

    use super::*;

    #[test]
    fn typed_reads_and_ranges() {
        let fixture = TableFixture::new("SEQ");
        fixture.column_u32("SPOT_LEN", &[(1, vec![7]), (2, vec![5]), (3, vec![4])]);
        fixture.column_u32(
            "READ_LEN",
            &[(1, vec![3, 4]), (2, vec![5, 0]), (3, vec![2, 2])],
        );
        let table = fixture.table();

        let mut cursor = table.cursor();
        let spot_len = cursor.add_column("SPOT_LEN").unwrap();
        let read_len = cursor.add_column("READ_LEN").unwrap();
        cursor.open_cursor().unwrap();

        assert_eq!(
            cursor.row_range(spot_len).unwrap(),
            RowRange { first: 1, count: 3 }
        );
        assert_eq!(cursor.read_scalar::<u32>(2, spot_len).unwrap(), 5);
        assert_eq!(cursor.read_array::<u32>(1, read_len).unwrap(), [3, 4]);

        let cell = cursor.cell(3, read_len).unwrap();
        assert_eq!(cell.elem_bits, 32);
        assert_eq!(cell.elem_count, 2);
        assert_eq!(cell.bit_offset, 0);
    }

    #[test]
    fn unmapped_row_is_row_not_found() {
        let fixture = TableFixture::new("SEQ");
        fixture.column_u32("SPOT_LEN", &[(1, vec![7]), (2, vec![5])]);
        let table = fixture.table();

        let mut cursor = table.cursor();
        let col = cursor.add_column("SPOT_LEN").unwrap();
        cursor.open_cursor().unwrap();

        let err = cursor.read_scalar::<u32>(99, col).unwrap_err();
        assert!(err.is_row_not_found());
    }

    #[test]
    fn element_width_mismatch_is_fatal() {
        let fixture = TableFixture::new("SEQ");
        fixture.column_u32("SPOT_LEN", &[(1, vec![7])]);
        let table = fixture.table();

        let mut cursor = table.cursor();
        let col = cursor.add_column("SPOT_LEN").unwrap();
        cursor.open_cursor().unwrap();

        assert!(matches!(
            cursor.read_scalar::<i64>(1, col),
            Err(Error::ElementBits {
                expected_bits: 64,
                actual_bits: 32,
                ..
            })
        ));
    }

    #[test]
    fn reads_require_open_cursor() {
        let fixture = TableFixture::new("SEQ");
        fixture.column_u32("SPOT_LEN", &[(1, vec![7])]);
        let table = fixture.table();

        let mut cursor = table.cursor();
        let col = cursor.add_column("SPOT_LEN").unwrap();
        assert!(matches!(
            cursor.row_range(col),
            Err(Error::CursorState { .. })
        ));
        cursor.open_cursor().unwrap();
        assert!(matches!(
            cursor.add_column("SPOT_LEN"),
            Err(Error::CursorState { .. })
        ));
    }

    #[test]
    fn missing_column_is_not_present() {
        let fixture = TableFixture::new("SEQ");
        fixture.column_u32("SPOT_LEN", &[(1, vec![7])]);
        let table = fixture.table();

        let mut cursor = table.cursor();
        assert!(matches!(
            cursor.add_column("NO_SUCH"),
            Err(Error::ColumnNotFound { .. })
        ));
        assert!(cursor.try_add_column("NO_SUCH").is_none());
        assert!(cursor.try_add_column("SPOT_LEN").is_some());
    }

    #[test]
    fn sparse_columns_have_gaps() {
        let fixture = TableFixture::new("SEQ");
        // Rows 3 and 4 are absent.
        fixture.column_u32("SPOT_LEN", &[(1, vec![7]), (2, vec![5]), (5, vec![9])]);
        let table = fixture.table();

        let mut cursor = table.cursor();
        let col = cursor.add_column("SPOT_LEN").unwrap();
        cursor.open_cursor().unwrap();

        assert!(cursor.is_sparse(col));
        assert_eq!(
            cursor.row_range(col).unwrap(),
            RowRange { first: 1, count: 5 }
        );
        assert_eq!(cursor.read_scalar::<u32>(5, col).unwrap(), 9);
        assert!(cursor
            .read_scalar::<u32>(3, col)
            .unwrap_err()
            .is_row_not_found());
    }

    #[test]
    fn page_ranges_follow_blob_boundaries() {
        let fixture = TableFixture::new("SEQ");
        // Two pages: rows 1..=2 and 3..=4.
        fixture.column_u32_paged(
            "SPOT_LEN",
            &[(1, vec![1]), (2, vec![2]), (3, vec![3]), (4, vec![4])],
            2,
        );
        let table = fixture.table();

        let mut cursor = table.cursor();
        let col = cursor.add_column("SPOT_LEN").unwrap();
        cursor.open_cursor().unwrap();

        assert_eq!(cursor.page_id_range(col, 1).unwrap(), (1, 2));
        assert_eq!(cursor.page_id_range(col, 2).unwrap(), (1, 2));
        assert_eq!(cursor.page_id_range(col, 4).unwrap(), (3, 4));
        assert!(cursor.page_id_range(col, 9).is_err());

        let bounds = RowRange { first: 1, count: 4 };
        cursor.prefetch(col, &[1, 2, 3, 4], bounds);
        assert_eq!(cursor.hinted_pages(col), 2);
    }
}
