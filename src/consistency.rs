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

//! Schema-aware checks on sequence tables: the table shape every read table
//! must have, and the per-row sum-of-parts law between READ_LEN and
//! SPOT_LEN.

use tracing::{debug, info, warn};

use crate::cursor::Table;
use crate::monitor::Counter;
use crate::validate::ValidateContext;
use crate::*;

/// Columns of the standard read-table shape; READ is required, QUALITY's
/// absence downgrades the table to fasta-only.
const SHAPE_COLUMNS: &[&str] = &[
    "READ",
    "QUALITY",
    "SPOT_LEN",
    "READ_START",
    "READ_LEN",
    "READ_TYPE",
];

/// How often the row loop polls for cancellation.
const CANCEL_POLL_ROWS: u64 = 1024;

/// Verify a sequence table: shape first, then the sum-of-parts law when
/// deep table checks are enabled.
pub fn verify_sequence_table(ctx: &ValidateContext<'_>, table: &Table) -> Result<()> {
    table_shape(ctx, table)?;
    if ctx.options.consistency_check {
        sum_of_parts(ctx, table)?;
        info!(
            table = table.name(),
            "Columns READ_LEN and SPOT_LEN are consistent"
        );
    }
    Ok(())
}

/// Open the standard columns and probe the first row of each.
fn table_shape(ctx: &ValidateContext<'_>, table: &Table) -> Result<()> {
    let mut cursor = table.cursor();
    let mut ids = Vec::with_capacity(SHAPE_COLUMNS.len());
    for name in SHAPE_COLUMNS {
        ids.push(cursor.try_add_column(name));
    }
    let platform = cursor.try_add_column("PLATFORM");

    let read_id = match ids[0] {
        Some(id) => id,
        None => {
            let err = Error::ColumnNotFound {
                table: table.name().to_string(),
                column: "READ".to_string(),
            };
            ctx.sink.error(&err);
            return Err(err);
        }
    };
    if ids[1].is_none() {
        ctx.sink.warning(&Error::CheckSkipped {
            check: "quality data".to_string(),
            reason: format!(
                "table {:?} is usable for fasta only; no QUALITY column",
                table.name()
            ),
        });
    }

    cursor.open_cursor()?;
    let range = cursor.row_range(read_id)?;
    if range.is_empty() {
        debug!(table = table.name(), "table has no rows");
        return Ok(());
    }

    for (name, id) in SHAPE_COLUMNS.iter().zip(&ids) {
        let Some(id) = id else { continue };
        let cell = cursor.cell(range.first, *id)?;
        if cell.elem_bits == 0 {
            let err = Error::ColumnDamaged {
                column: (*name).to_string(),
                reason: "zero element width on the first row".to_string(),
            };
            ctx.sink.error(&err);
            return Err(err);
        }
    }

    match platform.map(|id| cursor.read_scalar::<u8>(range.first, id)) {
        Some(Ok(platform)) => debug!(table = table.name(), platform, "platform determined"),
        _ => {
            // Indeterminate platform is advisory only.
            warn!(
                table = table.name(),
                "couldn't determine platform; type of table is indeterminate"
            );
        }
    }
    Ok(())
}

/// For every row in the shared range, Σ READ_LEN[row] == SPOT_LEN[row].
fn sum_of_parts(ctx: &ValidateContext<'_>, table: &Table) -> Result<()> {
    let mut cursor = table.cursor();
    let read_len = cursor.add_column("READ_LEN").map_err(|err| {
        ctx.sink.error(&err);
        err
    })?;
    let spot_len = cursor.add_column("SPOT_LEN").map_err(|err| {
        ctx.sink.error(&err);
        err
    })?;
    cursor.open_cursor()?;

    let read_range = cursor.row_range(read_len)?;
    let spot_range = cursor.row_range(spot_len)?;
    if read_range != spot_range {
        let err = Error::RangeMismatch {
            a: "READ_LEN".to_string(),
            b: "SPOT_LEN".to_string(),
        };
        ctx.sink.error(&err);
        return Err(err);
    }

    let mut first_err = None;
    for offset in 0..read_range.count {
        if offset % CANCEL_POLL_ROWS == 0 {
            ctx.cancel.check()?;
        }
        let row = read_range.first + offset as i64;
        let parts = cursor.read_array::<u32>(row, read_len)?;
        let whole = cursor.read_scalar::<u32>(row, spot_len)?;
        ctx.sink.count(Counter::RowsChecked, 1);
        if parts.iter().sum::<u32>() != whole {
            let err = Error::SumMismatch { row };
            ctx.sink.error(&err);
            if !ctx.options.exhaustive {
                return Err(err);
            }
            if first_err.is_none() {
                first_err = Some(err);
            }
        }
    }
    match first_err {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

#[cfg(test)]
mod test {
    use crate::monitor::collect::CollectSink;
    use crate::test_fixtures::TableFixture;
    use crate::validate::{CancelToken, ValidatorOptions};

    use super::*;

    fn shaped_fixture() -> TableFixture {
        let fixture = TableFixture::new("SEQ");
        fixture.column_u8("READ", &[(1, b"ACGTACG".to_vec()), (2, b"ACGTA".to_vec())]);
        fixture.column_u8("QUALITY", &[(1, vec![30; 7]), (2, vec![30; 5])]);
        fixture.column_u32("SPOT_LEN", &[(1, vec![7]), (2, vec![5])]);
        fixture.column_u32("READ_LEN", &[(1, vec![3, 4]), (2, vec![5, 0])]);
        fixture
    }

    #[test]
    fn consistent_table_is_clean() {
        let fixture = shaped_fixture();
        let collect = CollectSink::arc();
        let sink: std::sync::Arc<dyn crate::monitor::ReportSink> = collect.clone();
        let options = ValidatorOptions {
            consistency_check: true,
            ..ValidatorOptions::default()
        };
        let cancel = CancelToken::new();
        let ctx = ValidateContext {
            options: &options,
            sink: &sink,
            cancel: &cancel,
        };
        verify_sequence_table(&ctx, &fixture.table()).unwrap();
        assert_eq!(collect.get_counter(Counter::RowsChecked), 2);
    }

    #[test]
    fn sum_violation_names_the_row() {
        let fixture = shaped_fixture();
        // Break row 2: parts sum to 5 but claim 6.
        fixture.rewrite_column_u32("SPOT_LEN", &[(1, vec![7]), (2, vec![6])]);
        let collect = CollectSink::arc();
        let sink: std::sync::Arc<dyn crate::monitor::ReportSink> = collect.clone();
        let options = ValidatorOptions {
            consistency_check: true,
            ..ValidatorOptions::default()
        };
        let cancel = CancelToken::new();
        let ctx = ValidateContext {
            options: &options,
            sink: &sink,
            cancel: &cancel,
        };
        let err = verify_sequence_table(&ctx, &fixture.table()).unwrap_err();
        assert!(matches!(err, Error::SumMismatch { row: 2 }));
        assert_eq!(err.to_string(), "Sum(READ_LEN) != SPOT_LEN in row 2");
    }

    #[test]
    fn unequal_ranges_are_fatal() {
        let fixture = shaped_fixture();
        fixture.rewrite_column_u32("SPOT_LEN", &[(1, vec![7]), (2, vec![5]), (3, vec![9])]);
        let collect = CollectSink::arc();
        let sink: std::sync::Arc<dyn crate::monitor::ReportSink> = collect.clone();
        let options = ValidatorOptions {
            consistency_check: true,
            ..ValidatorOptions::default()
        };
        let cancel = CancelToken::new();
        let ctx = ValidateContext {
            options: &options,
            sink: &sink,
            cancel: &cancel,
        };
        assert!(matches!(
            verify_sequence_table(&ctx, &fixture.table()),
            Err(Error::RangeMismatch { .. })
        ));
    }

    #[test]
    fn missing_read_column_is_fatal_and_missing_quality_warns() {
        let fixture = TableFixture::new("BARE");
        fixture.column_u32("SPOT_LEN", &[(1, vec![1])]);
        let collect = CollectSink::arc();
        let sink: std::sync::Arc<dyn crate::monitor::ReportSink> = collect.clone();
        let options = ValidatorOptions::default();
        let cancel = CancelToken::new();
        let ctx = ValidateContext {
            options: &options,
            sink: &sink,
            cancel: &cancel,
        };
        assert!(matches!(
            verify_sequence_table(&ctx, &fixture.table()),
            Err(Error::ColumnNotFound { .. })
        ));

        let fixture = TableFixture::new("NOQUAL");
        fixture.column_u8("READ", &[(1, b"ACGT".to_vec())]);
        fixture.column_u32("SPOT_LEN", &[(1, vec![4])]);
        fixture.column_u32("READ_LEN", &[(1, vec![4])]);
        let collect = CollectSink::arc();
        let sink: std::sync::Arc<dyn crate::monitor::ReportSink> = collect.clone();
        let ctx = ValidateContext {
            options: &options,
            sink: &sink,
            cancel: &cancel,
        };
        verify_sequence_table(&ctx, &fixture.table()).unwrap();
        let problems = collect.problems();
        assert!(problems
            .iter()
            .any(|(_, message)| message.contains("fasta only")));
    }
}
