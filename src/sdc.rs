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

//! The secondary-alignment deep data check: a bounded sweep over
//! SECONDARY_ALIGNMENT rows that cross-reads SEQUENCE and
//! PRIMARY_ALIGNMENT through paired-key lookups.
//!
//! Chunks are sorted by the id being dereferenced before each pass so the
//! cursor reads stay page-local.

use rayon::slice::ParallelSliceMut;
use tracing::{debug, warn};

use crate::cursor::Table;
use crate::index::is_sorted;
use crate::validate::ValidateContext;
use crate::*;

/// Upper bound on rows held in one sweep chunk.
const SDC_ROW_CHUNK_MAX: u64 = 8 * 1024 * 1024;

/// Deep data checks between SECONDARY_ALIGNMENT, SEQUENCE and
/// PRIMARY_ALIGNMENT, bounded by the configured row budget.
pub fn check_secondary(
    ctx: &ValidateContext<'_>,
    dbname: &str,
    seq: &Table,
    pri: &Table,
    sec: &Table,
) -> Result<()> {
    let Some(sdc) = &ctx.options.sdc else {
        return Ok(());
    };

    let mut seq_cursor = seq.cursor();
    let seq_read_len_col = seq_cursor.add_column("READ_LEN")?;
    let seq_pa_id_col = seq_cursor.add_column("PRIMARY_ALIGNMENT_ID")?;
    seq_cursor.open_cursor()?;

    let mut pri_cursor = pri.cursor();
    let pri_has_ref_offset_col = pri_cursor.add_column("HAS_REF_OFFSET")?;
    pri_cursor.open_cursor()?;

    let mut sec_cursor = sec.cursor();
    let sec_has_ref_offset_col = sec_cursor.add_column("HAS_REF_OFFSET")?;
    let sec_tmp_mismatch_col = sec_cursor.try_add_column("TMP_MISMATCH");
    sec_cursor.open_cursor()?;

    let mut sec_cursor2 = sec.cursor();
    let sec_seq_spot_id_col = sec_cursor2.add_column("SEQ_SPOT_ID")?;
    let sec_seq_read_id_col = sec_cursor2.add_column("SEQ_READ_ID")?;
    sec_cursor2.open_cursor()?;

    let sec_range = sec_cursor.row_range(sec_has_ref_offset_col)?;
    if sec_range.is_empty() {
        debug!(database = dbname, "no secondary alignments to check");
        return Ok(());
    }

    let pa_longer_limit = sdc.plen_thold.resolve(sec_range.count);
    let row_limit = sdc.rows.resolve(sec_range.count);
    let sweep_end = sec_range.first + sec_range.count.min(row_limit) as i64;
    let chunk_size = sec_range.count.min(SDC_ROW_CHUNK_MAX) as i64;
    debug!(
        database = dbname,
        rows = row_limit,
        pa_longer_limit,
        "secondary deep check limits"
    );

    let mut reported_about_no_pa = false;
    let mut pa_longer_sa_rows = 0u64;

    let mut chunk = sec_range.first;
    while chunk < sweep_end {
        let count = chunk_size.min(sweep_end - chunk);

        // Pass 1: load SEQ_SPOT_ID and SEQ_READ_ID; sort by spot id for
        // page-local reads of the SEQUENCE table.
        let mut spot_pairs: Vec<(i64, i64)> = Vec::with_capacity(count as usize);
        let mut read_ids: Vec<i32> = Vec::with_capacity(count as usize);
        let mut ordered = true;
        let mut last_spot = i64::MIN;
        for offset in 0..count {
            ctx.cancel.check()?;
            let sec_row = chunk + offset;
            let spot = seq_spot_id(ctx, &sec_cursor2, sec_seq_spot_id_col, sec_row)?;
            ordered &= last_spot <= spot;
            last_spot = spot;
            spot_pairs.push((spot, sec_row));
            read_ids.push(sec_cursor2.read_scalar::<i32>(sec_row, sec_seq_read_id_col)?);
        }
        if !ordered {
            spot_pairs.par_sort_unstable();
        }

        // Pass 2: dereference SEQUENCE in spot order; collect the primary
        // row and the expected read length per secondary row.
        let mut pri_rows = vec![0i64; count as usize];
        let mut seq_read_lens = vec![0u32; count as usize];
        let mut pri_pairs: Vec<(i64, i64)> = Vec::with_capacity(count as usize);
        for &(spot, sec_row) in &spot_pairs {
            ctx.cancel.check()?;
            let offset = (sec_row - chunk) as usize;
            let read_id = read_ids[offset];
            let pa_ids = seq_cursor.read_array::<i64>(spot, seq_pa_id_col)?;
            if read_id < 1 || read_id as usize > pa_ids.len() {
                let err = Error::ReadIdRange {
                    row: sec_row,
                    read_id,
                    spot,
                    column: "PRIMARY_ALIGNMENT_ID".to_string(),
                    fanout: pa_ids.len() as u32,
                };
                ctx.sink.error(&err);
                return Err(err);
            }
            let pri_row = pa_ids[read_id as usize - 1];
            if pri_row == 0 && !reported_about_no_pa {
                warn!(
                    database = dbname,
                    "database has secondary alignments without primary"
                );
                reported_about_no_pa = true;
            }
            pri_rows[offset] = pri_row;
            pri_pairs.push((pri_row, sec_row));

            let read_lens = seq_cursor.read_array::<u32>(spot, seq_read_len_col)?;
            if read_id as usize > read_lens.len() {
                let err = Error::ReadIdRange {
                    row: sec_row,
                    read_id,
                    spot,
                    column: "READ_LEN".to_string(),
                    fanout: read_lens.len() as u32,
                };
                ctx.sink.error(&err);
                return Err(err);
            }
            seq_read_lens[offset] = read_lens[read_id as usize - 1];
        }
        if !is_sorted(&pri_pairs) {
            pri_pairs.par_sort_unstable();
        }

        // Pass 3: read PRIMARY_ALIGNMENT.HAS_REF_OFFSET lengths in primary
        // row order.
        let mut pri_lens = vec![None::<u32>; count as usize];
        for &(pri_row, sec_row) in &pri_pairs {
            ctx.cancel.check()?;
            if pri_row == 0 {
                continue;
            }
            let cell = pri_cursor.cell(pri_row, pri_has_ref_offset_col)?;
            pri_lens[(sec_row - chunk) as usize] = Some(cell.elem_count);
        }

        // Pass 4: the actual length laws, in secondary row order.
        for offset in 0..count {
            ctx.cancel.check()?;
            let sec_row = chunk + offset;
            let idx = offset as usize;
            let cell = sec_cursor.cell(sec_row, sec_has_ref_offset_col)?;
            let sec_len = cell.elem_count;

            if let Some(col) = sec_tmp_mismatch_col {
                let mismatch = sec_cursor.read_array::<u8>(sec_row, col)?;
                if mismatch.contains(&b'=') {
                    let err = Error::TmpMismatchEquals { row: sec_row };
                    ctx.sink.error(&err);
                    return Err(err);
                }
            }

            let pri_row = pri_rows[idx];
            let Some(pri_len) = pri_lens[idx] else {
                continue;
            };
            if pri_row == 0 || pri_len == sec_len {
                continue;
            }
            if pri_len < sec_len {
                let err = Error::PrimaryShorter {
                    pri_row,
                    sec_row,
                    pri_len,
                    sec_len,
                };
                ctx.sink.error(&err);
                return Err(err);
            }

            pa_longer_sa_rows += 1;

            if pri_len != seq_read_lens[idx] {
                let err = Error::PrimaryLenMismatch {
                    pri_row,
                    pri_len,
                    spot: spot_pairs
                        .iter()
                        .find(|(_, r)| *r == sec_row)
                        .map(|(s, _)| *s)
                        .unwrap_or(0),
                    read_id: read_ids[idx],
                    seq_read_len: seq_read_lens[idx],
                };
                ctx.sink.error(&err);
                return Err(err);
            }

            if pa_longer_sa_rows >= pa_longer_limit {
                let err = Error::LongerPrimaryLimit {
                    rows: pa_longer_sa_rows,
                };
                ctx.sink.error(&err);
                return Err(err);
            }
        }

        chunk += count;
    }
    Ok(())
}

/// Read and validate one SEQ_SPOT_ID cell; zero is a consistency error.
fn seq_spot_id(
    ctx: &ValidateContext<'_>,
    cursor: &crate::cursor::Cursor,
    col: crate::cursor::ColId,
    sec_row: i64,
) -> Result<i64> {
    let spot = cursor.read_scalar::<i64>(sec_row, col)?;
    if spot == 0 {
        let err = Error::SpotIdZero { row: sec_row };
        ctx.sink.error(&err);
        return Err(err);
    }
    Ok(spot)
}
