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

//! Referential integrity between related tables, as a generic paired-key
//! join driven by chunked streaming reads.
//!
//! Column A in table T_A holds a foreign key into table T_B; column B in
//! T_B holds a list of row ids pointing back into T_A. For every row r of A
//! with fkey k, k must exist in B's row range and the list B[k] must
//! contain r. The same routine is specialised for the three join shapes of
//! an alignment database.

use rayon::slice::ParallelSliceMut;
use tracing::{info, warn};

use crate::archive::Archive;
use crate::cursor::{ColId, Cursor, Table};
use crate::index::is_sorted;
use crate::monitor::Counter;
use crate::validate::ValidateContext;
use crate::*;

/// One (foreign key, source row) observation from column A.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct IdPair {
    fkey: i64,
    row: i64,
}

/// Size the work buffer: as many pairs as fit the memory budget, at most
/// the full row count.
pub fn work_chunk(count: u64, memory_budget: usize) -> usize {
    let max = memory_budget / std::mem::size_of::<IdPair>();
    (count.min(usize::MAX as u64) as usize).min(max)
}

/// One side of a paired-key join.
pub struct JoinSide<'a> {
    pub table: &'a Table,
    pub column: &'a str,
}

struct LoadedChunk {
    /// First unconsumed row after this chunk.
    next_row: i64,
}

/// Fill `pairs` from column A in page-aligned chunks starting at
/// `chunk_start`, never crossing the buffer's budgeted size.
fn load_key_pairs(
    ctx: &ValidateContext<'_>,
    cursor: &Cursor,
    col: ColId,
    chunk_start: i64,
    end_id: i64,
    capacity: usize,
    pairs: &mut Vec<IdPair>,
) -> Result<LoadedChunk> {
    pairs.clear();
    let mut ordered = true;
    let mut last_fkey = i64::MIN;
    let mut row = chunk_start;
    while row < end_id && pairs.len() < capacity {
        ctx.cancel.check()?;
        let (page_first, page_last) = match cursor.page_id_range(col, row) {
            Ok(range) => range,
            Err(err) if err.is_row_not_found() => break,
            Err(err) => return Err(err),
        };
        let last = page_last.min(end_id - 1);
        let first = page_first.max(row);
        let page_rows = (last + 1 - first) as usize;
        if row != chunk_start && pairs.len() + page_rows > capacity {
            break;
        }
        row = first;
        while row <= last && pairs.len() < capacity {
            match cursor.read_scalar::<i64>(row, col) {
                Ok(fkey) => {
                    ordered &= last_fkey <= fkey;
                    last_fkey = fkey;
                    pairs.push(IdPair { fkey, row });
                }
                // Row not found might be an error but that is not decided here.
                Err(err) if err.is_row_not_found() => (),
                Err(err) => return Err(err),
            }
            row += 1;
        }
    }
    if !ordered {
        pairs.par_sort_unstable_by_key(|pair| (pair.fkey, pair.row));
    }
    Ok(LoadedChunk { next_row: row })
}

/// Run the generic paired-key check over the whole row range of column A.
pub fn check_pair_join(ctx: &ValidateContext<'_>, a: JoinSide<'_>, b: JoinSide<'_>) -> Result<()> {
    let mut a_cursor = a.table.cursor();
    let a_col = a_cursor.add_column(a.column).map_err(|err| {
        ctx.sink.error(&err);
        err
    })?;
    a_cursor.open_cursor()?;
    let range = a_cursor.row_range(a_col)?;

    let mut b_cursor = b.table.cursor();
    let b_col = b_cursor.add_column(b.column).map_err(|err| {
        ctx.sink.error(&err);
        err
    })?;
    b_cursor.open_cursor()?;

    let capacity = work_chunk(range.count, ctx.options.memory_budget);
    let mut pairs: Vec<IdPair> = Vec::new();
    if range.count > 0 && (capacity == 0 || pairs.try_reserve_exact(capacity).is_err()) {
        // Out of memory skips the check with a warning, it does not fail it.
        let err = Error::CheckSkipped {
            check: format!("referential integrity {} <-> {}", a.column, b.column),
            reason: "work buffer does not fit the memory budget".to_string(),
        };
        ctx.sink.warning(&err);
        return Ok(());
    }

    let end_id = range.end();
    let mut chunk_start = range.first;
    while chunk_start < end_id {
        let loaded = load_key_pairs(
            ctx,
            &a_cursor,
            a_col,
            chunk_start,
            end_id,
            capacity,
            &mut pairs,
        )?;
        if loaded.next_row == chunk_start {
            break;
        }
        if chunk_start != range.first {
            let pct = (100.0 * (chunk_start - range.first) as f64) / range.count as f64;
            info!(
                a = a.column,
                b = b.column,
                pct,
                "Referential Integrity progress"
            );
        }
        chunk_start = loaded.next_row;

        walk_sorted_pairs(ctx, &pairs, &b_cursor, b_col, a.column, b.column)?;
    }
    Ok(())
}

/// Walk one sorted chunk, resolving each pair against the cached reverse
/// list read from column B.
fn walk_sorted_pairs(
    ctx: &ValidateContext<'_>,
    pairs: &[IdPair],
    b_cursor: &Cursor,
    b_col: ColId,
    a_name: &str,
    b_name: &str,
) -> Result<()> {
    let mut cur_fkey: Option<i64> = None;
    let mut id_list: Vec<i64> = Vec::new();
    let mut current = 0usize;

    for pair in pairs {
        if cur_fkey != Some(pair.fkey) {
            ctx.cancel.check()?;
            id_list = match b_cursor.read_array::<i64>(pair.fkey, b_col) {
                Ok(list) => list,
                Err(err) if err.is_row_not_found() => {
                    let err = Error::RefIntegrityMissing {
                        a: a_name.to_string(),
                        b: b_name.to_string(),
                        fkey: pair.fkey,
                        row: pair.row,
                    };
                    ctx.sink.error(&err);
                    return Err(err);
                }
                Err(err) => return Err(err),
            };
            if !is_sorted(&id_list) {
                // The scratch copy of the source becomes an in-place sort
                // here; the list is owned either way.
                id_list.sort_unstable();
            }
            cur_fkey = Some(pair.fkey);
            current = 0;
            while current < id_list.len() && id_list[current] < pair.row {
                current += 1;
            }
        }
        if current >= id_list.len() || id_list[current] != pair.row {
            let err = Error::RefIntegrityPair {
                a: a_name.to_string(),
                b: b_name.to_string(),
                fkey: pair.fkey,
                row: pair.row,
            };
            ctx.sink.error(&err);
            return Err(err);
        }
        current += 1;
        ctx.sink.count(Counter::PairsChecked, 1);
    }
    Ok(())
}

/// Tables an alignment database may contain.
const KNOWN_ALIGN_TABLES: &[&str] = &[
    "EVIDENCE_ALIGNMENT",
    "EVIDENCE_INTERVAL",
    "PRIMARY_ALIGNMENT",
    "REFERENCE",
    "SECONDARY_ALIGNMENT",
    "SEQUENCE",
];

/// The open member tables of an alignment database.
#[derive(Default)]
pub struct AlignTables {
    pub sequence: Option<Table>,
    pub primary: Option<Table>,
    pub secondary: Option<Table>,
    pub reference: Option<Table>,
}

/// Census the database's children and open the member tables.
///
/// Unknown children warn; SEQUENCE alone is informational; missing
/// REFERENCE or PRIMARY_ALIGNMENT, or a lone EVIDENCE table, is an
/// incompleteness error recorded against the database.
pub fn census_align_db(
    ctx: &ValidateContext<'_>,
    archive: &Archive,
) -> Result<(AlignTables, Option<Error>)> {
    let names = archive.table_names()?;
    for name in &names {
        if !KNOWN_ALIGN_TABLES.contains(&name.as_str()) {
            ctx.sink.warning(&Error::UnexpectedObject {
                parent: archive.name().to_string(),
                name: name.clone(),
            });
        }
    }

    let mut tables = AlignTables::default();
    let has = |table: &str| names.iter().any(|n| n == table);
    let mut census_err = None;
    if names.len() == 1 && has("SEQUENCE") {
        info!(
            database = archive.name(),
            "database contains only unaligned reads"
        );
    } else if !has("REFERENCE") || !has("PRIMARY_ALIGNMENT") {
        let err = Error::DatabaseIncomplete {
            database: archive.name().to_string(),
        };
        warn!(database = archive.name(), "missing REFERENCE or PRIMARY_ALIGNMENT");
        ctx.sink.error(&err);
        census_err = Some(err);
    } else if has("EVIDENCE_ALIGNMENT") != has("EVIDENCE_INTERVAL") {
        // Both must be present or both absent.
        let err = Error::DatabaseIncomplete {
            database: archive.name().to_string(),
        };
        warn!(database = archive.name(), "EVIDENCE tables must be paired");
        ctx.sink.error(&err);
        census_err = Some(err);
    }

    for name in &names {
        let table = Table::open(archive.table_transport(name), name)?;
        match name.as_str() {
            "SEQUENCE" => tables.sequence = Some(table),
            "PRIMARY_ALIGNMENT" => tables.primary = Some(table),
            "SECONDARY_ALIGNMENT" => tables.secondary = Some(table),
            "REFERENCE" => tables.reference = Some(table),
            _ => (),
        }
    }
    Ok((tables, census_err))
}

fn note(first_err: &mut Option<Error>, err: Error) -> Result<()> {
    if matches!(err, Error::Cancelled) {
        return Err(err);
    }
    if first_err.is_none() {
        *first_err = Some(err);
    }
    Ok(())
}

/// Referential integrity and deep data checks for an alignment database.
pub fn dbric_align(ctx: &ValidateContext<'_>, name: &str, tables: &AlignTables) -> Result<()> {
    let mut first_err: Option<Error> = None;
    let exhaustive = ctx.options.exhaustive;

    if let (Some(seq), Some(pri)) = (&tables.sequence, &tables.primary) {
        match check_pair_join(
            ctx,
            JoinSide {
                table: pri,
                column: "SEQ_SPOT_ID",
            },
            JoinSide {
                table: seq,
                column: "PRIMARY_ALIGNMENT_ID",
            },
        ) {
            Ok(()) => info!(
                database = name,
                "SEQUENCE.PRIMARY_ALIGNMENT_ID <-> PRIMARY_ALIGNMENT.SEQ_SPOT_ID \
                referential integrity ok"
            ),
            Err(err) => note(&mut first_err, err)?,
        }
    }

    if (first_err.is_none() || exhaustive) && tables.primary.is_some() {
        if let (Some(reference), Some(pri)) = (&tables.reference, &tables.primary) {
            match check_pair_join(
                ctx,
                JoinSide {
                    table: pri,
                    column: "REF_ID",
                },
                JoinSide {
                    table: reference,
                    column: "PRIMARY_ALIGNMENT_IDS",
                },
            ) {
                Ok(()) => info!(
                    database = name,
                    "REFERENCE.PRIMARY_ALIGNMENT_IDS <-> PRIMARY_ALIGNMENT.REF_ID \
                    referential integrity ok"
                ),
                Err(err) => note(&mut first_err, err)?,
            }
        }
    }

    if first_err.is_none() || exhaustive {
        if let (Some(reference), Some(sec)) = (&tables.reference, &tables.secondary) {
            match check_pair_join(
                ctx,
                JoinSide {
                    table: sec,
                    column: "REF_ID",
                },
                JoinSide {
                    table: reference,
                    column: "SECONDARY_ALIGNMENT_IDS",
                },
            ) {
                Ok(()) => info!(
                    database = name,
                    "REFERENCE.SECONDARY_ALIGNMENT_IDS <-> SECONDARY_ALIGNMENT.REF_ID \
                    referential integrity ok"
                ),
                Err(err) => note(&mut first_err, err)?,
            }
        }
    }

    if ctx.options.sdc.is_some() && (first_err.is_none() || exhaustive) {
        if let (Some(seq), Some(pri), Some(sec)) =
            (&tables.sequence, &tables.primary, &tables.secondary)
        {
            match crate::sdc::check_secondary(ctx, name, seq, pri, sec) {
                Ok(()) => info!(database = name, "SECONDARY_ALIGNMENT table checks ok"),
                Err(err) => note(&mut first_err, err)?,
            }
        }
    }

    match first_err {
        None => Ok(()),
        Some(err) => Err(err),
    }
}
