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

//! Alignment-database checks: referential integrity joins, the secondary
//! deep data check, the concurrent sweep, and cancellation.

use std::sync::Arc;

use arcvet::monitor::collect::CollectSink;
use arcvet::monitor::{Counter, ReportEvent, ReportSink};
use arcvet::test_fixtures::ScratchArchive;
use arcvet::*;

/// Scenario S4: a small consistent alignment database.
///
/// SEQUENCE rows 1..2 with PRIMARY_ALIGNMENT_ID [[10,11],[12,0]];
/// PRIMARY_ALIGNMENT rows 10..12 with SEQ_SPOT_ID [1,1,2].
fn consistent_align_db() -> ScratchArchive {
    let archive = ScratchArchive::new_align_db("ALDB");

    let seq = archive.db_table("SEQUENCE");
    seq.column_i64(
        "PRIMARY_ALIGNMENT_ID",
        &[(1, vec![10, 11]), (2, vec![12, 0])],
    );
    seq.column_u8("ALIGNMENT_COUNT", &[(1, vec![1, 1]), (2, vec![1, 0])]);
    seq.column_u32("READ_LEN", &[(1, vec![3, 4]), (2, vec![5, 0])]);

    let pri = archive.db_table("PRIMARY_ALIGNMENT");
    pri.column_i64(
        "SEQ_SPOT_ID",
        &[(10, vec![1]), (11, vec![1]), (12, vec![2])],
    );
    pri.column_i64("REF_ID", &[(10, vec![1]), (11, vec![1]), (12, vec![1])]);
    pri.column_u32("READ_LEN", &[(10, vec![3]), (11, vec![4]), (12, vec![5])]);
    pri.column_u8(
        "REF_ORIENTATION",
        &[(10, vec![0]), (11, vec![0]), (12, vec![1])],
    );
    pri.column_u8(
        "HAS_REF_OFFSET",
        &[(10, vec![0; 3]), (11, vec![0; 4]), (12, vec![0; 5])],
    );

    let reference = archive.db_table("REFERENCE");
    reference.column_i64("PRIMARY_ALIGNMENT_IDS", &[(1, vec![10, 11, 12])]);
    reference.column_i64("SECONDARY_ALIGNMENT_IDS", &[(1, vec![20, 21])]);

    let sec = archive.db_table("SECONDARY_ALIGNMENT");
    sec.column_i64("SEQ_SPOT_ID", &[(20, vec![1]), (21, vec![2])]);
    sec.column_i32("SEQ_READ_ID", &[(20, vec![1]), (21, vec![1])]);
    sec.column_i64("REF_ID", &[(20, vec![1]), (21, vec![1])]);
    sec.column_u8("HAS_REF_OFFSET", &[(20, vec![0; 3]), (21, vec![0; 5])]);
    sec.column_u8("TMP_MISMATCH", &[(20, b"ACG".to_vec()), (21, b"ACGTA".to_vec())]);

    archive
}

fn run(
    archive: &ScratchArchive,
    options: &ValidatorOptions,
) -> (Arc<CollectSink>, ValidateStats) {
    let collect = CollectSink::arc();
    let sink: Arc<dyn ReportSink> = collect.clone();
    let cancel = CancelToken::new();
    let stats = validate_path(archive.path(), options, sink, &cancel, None);
    (collect, stats)
}

#[test]
fn consistent_alignment_db_is_clean() {
    let archive = consistent_align_db();
    archive.seal();
    let (collect, stats) = run(&archive, &ValidatorOptions::default());
    assert!(stats.is_clean(), "problems: {:?}", collect.problems());
    assert!(collect.get_counter(Counter::PairsChecked) >= 5);
}

#[test]
fn dangling_foreign_key_fails_referential_integrity() {
    // Scenario S5: PRIMARY row 12 points at SEQ row 3, which does not exist.
    let archive = consistent_align_db();
    let pri = archive.db_table("PRIMARY_ALIGNMENT");
    pri.column_i64(
        "SEQ_SPOT_ID",
        &[(10, vec![1]), (11, vec![1]), (12, vec![3])],
    );
    archive.seal();

    let (collect, stats) = run(&archive, &ValidatorOptions::default());
    assert_eq!(stats.first_failure, Some(ReportKind::DataConsistency));
    assert_eq!(stats.exit_code(), 4);
    let messages = collect.errors_of_kind(ReportKind::DataConsistency);
    assert!(
        messages[0].contains("failed to retrieve pair 3 -> 12"),
        "got: {messages:?}"
    );
}

#[test]
fn reverse_list_must_contain_the_referencing_row() {
    // SEQ row 1 forgets alignment 11, so the pair (1, 11) cannot resolve.
    let archive = consistent_align_db();
    let seq = archive.db_table("SEQUENCE");
    seq.column_i64(
        "PRIMARY_ALIGNMENT_ID",
        &[(1, vec![10, 0]), (2, vec![12, 0])],
    );
    seq.column_u8("ALIGNMENT_COUNT", &[(1, vec![1, 0]), (2, vec![1, 0])]);
    seq.column_u32("READ_LEN", &[(1, vec![3, 4]), (2, vec![5, 0])]);
    archive.seal();

    let (collect, stats) = run(&archive, &ValidatorOptions::default());
    assert_eq!(stats.first_failure, Some(ReportKind::DataConsistency));
    let messages = collect.errors_of_kind(ReportKind::DataConsistency);
    assert!(
        messages[0].contains("inconsistent pair 1 -> 11"),
        "got: {messages:?}"
    );
}

#[test]
fn referential_integrity_can_be_disabled() {
    let archive = consistent_align_db();
    let pri = archive.db_table("PRIMARY_ALIGNMENT");
    pri.column_i64(
        "SEQ_SPOT_ID",
        &[(10, vec![1]), (11, vec![1]), (12, vec![3])],
    );
    archive.seal();

    let options = ValidatorOptions {
        ref_int: false,
        ..ValidatorOptions::default()
    };
    let (_, stats) = run(&archive, &options);
    assert!(stats.is_clean());
}

#[test]
fn tiny_memory_budget_skips_with_a_warning() {
    let archive = consistent_align_db();
    archive.seal();
    let options = ValidatorOptions {
        memory_budget: 3, // smaller than one key pair
        ..ValidatorOptions::default()
    };
    let (collect, stats) = run(&archive, &options);
    assert!(stats.is_clean());
    let skipped = collect.errors_of_kind(ReportKind::Incomplete);
    assert!(
        skipped.iter().any(|m| m.contains("referential integrity")),
        "got: {skipped:?}"
    );
}

/// Sink that cancels the run as soon as the first join pair is checked.
struct CancelAfterFirstPair {
    inner: Arc<CollectSink>,
    cancel: CancelToken,
}

impl ReportSink for CancelAfterFirstPair {
    fn event(&self, event: ReportEvent) {
        self.inner.event(event);
    }

    fn error(&self, err: &Error) {
        self.inner.error(err);
    }

    fn warning(&self, err: &Error) {
        self.inner.warning(err);
    }

    fn count(&self, counter: Counter, increment: usize) {
        self.inner.count(counter, increment);
        if counter == Counter::PairsChecked {
            self.cancel.cancel();
        }
    }
}

#[test]
fn cancellation_stops_within_one_chunk() {
    // Scenario S6: with a one-pair work buffer the join runs in many
    // chunks; cancelling after the first checked pair must surface the
    // Cancelled code promptly.
    let archive = consistent_align_db();
    archive.seal();

    let collect = CollectSink::arc();
    let cancel = CancelToken::new();
    let sink: Arc<dyn ReportSink> = Arc::new(CancelAfterFirstPair {
        inner: collect.clone(),
        cancel: cancel.clone(),
    });
    let options = ValidatorOptions {
        memory_budget: 16, // one IdPair per chunk
        ..ValidatorOptions::default()
    };
    let stats = validate_path(archive.path(), &options, sink, &cancel, None);
    assert_eq!(stats.first_failure, Some(ReportKind::Cancelled));
    assert_eq!(stats.exit_code(), 6);
    // Only the first chunk's pair was checked before the poll fired.
    assert_eq!(collect.get_counter(Counter::PairsChecked), 1);
}

#[test]
fn census_requires_reference_and_primary() {
    let archive = ScratchArchive::new_align_db("NOREF");
    let seq = archive.db_table("SEQUENCE");
    seq.column_i64("PRIMARY_ALIGNMENT_ID", &[(1, vec![0, 0])]);
    let pri = archive.db_table("PRIMARY_ALIGNMENT");
    pri.column_i64("SEQ_SPOT_ID", &[(10, vec![1])]);
    archive.seal();

    let (_, stats) = run(&archive, &ValidatorOptions::default());
    assert_eq!(stats.first_failure, Some(ReportKind::FatalStructure));
}

#[test]
fn sequence_only_database_is_clean_and_stray_tables_warn() {
    let archive = ScratchArchive::new_align_db("SEQONLY");
    let seq = archive.db_table("SEQUENCE");
    seq.column_i64("PRIMARY_ALIGNMENT_ID", &[(1, vec![0, 0])]);
    archive.seal();
    let (_, stats) = run(&archive, &ValidatorOptions::default());
    assert!(stats.is_clean());

    let archive = consistent_align_db();
    archive.db_table("MYSTERY");
    archive.seal();
    let (collect, stats) = run(&archive, &ValidatorOptions::default());
    assert!(stats.is_clean());
    let warnings = collect.errors_of_kind(ReportKind::UnexpectedObject);
    assert!(
        warnings.iter().any(|m| m.contains("MYSTERY")),
        "got: {warnings:?}"
    );
}

#[test]
fn sdc_passes_on_consistent_data() {
    let archive = consistent_align_db();
    archive.seal();
    let options = ValidatorOptions {
        sdc: Some(SdcOptions::default()),
        ..ValidatorOptions::default()
    };
    let (collect, stats) = run(&archive, &options);
    assert!(stats.is_clean(), "problems: {:?}", collect.problems());
}

#[test]
fn sdc_rejects_equals_sign_in_tmp_mismatch() {
    let archive = consistent_align_db();
    let sec = archive.db_table("SECONDARY_ALIGNMENT");
    sec.column_u8("TMP_MISMATCH", &[(20, b"ACG".to_vec()), (21, b"AC=TA".to_vec())]);
    archive.seal();
    let options = ValidatorOptions {
        sdc: Some(SdcOptions::default()),
        ..ValidatorOptions::default()
    };
    let (collect, stats) = run(&archive, &options);
    assert_eq!(stats.first_failure, Some(ReportKind::DataConsistency));
    let messages = collect.errors_of_kind(ReportKind::DataConsistency);
    assert!(
        messages[0].contains("TMP_MISMATCH") && messages[0].contains("21"),
        "got: {messages:?}"
    );
}

#[test]
fn sdc_longer_primary_threshold() {
    // SECONDARY row 21 is shorter (3) than its primary (5); with the
    // default 1% threshold on two rows, one occurrence already violates.
    let archive = consistent_align_db();
    let sec = archive.db_table("SECONDARY_ALIGNMENT");
    sec.column_u8("HAS_REF_OFFSET", &[(20, vec![0; 3]), (21, vec![0; 3])]);
    archive.seal();

    let options = ValidatorOptions {
        sdc: Some(SdcOptions::default()),
        ..ValidatorOptions::default()
    };
    let (collect, stats) = run(&archive, &options);
    assert_eq!(stats.first_failure, Some(ReportKind::DataConsistency));
    let messages = collect.errors_of_kind(ReportKind::DataConsistency);
    assert!(
        messages[0].contains("Limit violation"),
        "got: {messages:?}"
    );

    // A loose absolute threshold tolerates it.
    let options = ValidatorOptions {
        sdc: Some(SdcOptions {
            rows: SdcLimit::Rows(0),
            plen_thold: SdcLimit::Rows(10),
        }),
        ..ValidatorOptions::default()
    };
    let (collect, stats) = run(&archive, &options);
    assert!(stats.is_clean(), "problems: {:?}", collect.problems());
}

#[test]
fn sweep_accepts_partial_alignments() {
    // A soft-clipped alignment stores a shorter READ_LEN in
    // PRIMARY_ALIGNMENT than the untrimmed SEQUENCE value; the sweep only
    // resolves presence, so this is clean.
    let archive = consistent_align_db();
    let pri = archive.db_table("PRIMARY_ALIGNMENT");
    pri.column_u32("READ_LEN", &[(10, vec![2]), (11, vec![3]), (12, vec![4])]);
    archive.seal();

    let options = ValidatorOptions {
        consistency_check: true,
        threads: 2,
        ..ValidatorOptions::default()
    };
    let (collect, stats) = run(&archive, &options);
    assert!(stats.is_clean(), "problems: {:?}", collect.problems());
}

#[test]
fn sweep_validates_alignment_counts_against_ids() {
    let archive = consistent_align_db();
    archive.seal();
    let options = ValidatorOptions {
        consistency_check: true,
        threads: 2,
        ..ValidatorOptions::default()
    };
    let (collect, stats) = run(&archive, &options);
    assert!(stats.is_clean(), "problems: {:?}", collect.problems());

    // ALIGNMENT_COUNT[0] of spot 1 claims no alignment while the id is set.
    let seq = archive.db_table("SEQUENCE");
    seq.column_i64(
        "PRIMARY_ALIGNMENT_ID",
        &[(1, vec![10, 11]), (2, vec![12, 0])],
    );
    seq.column_u8("ALIGNMENT_COUNT", &[(1, vec![0, 1]), (2, vec![1, 0])]);
    seq.column_u32("READ_LEN", &[(1, vec![3, 4]), (2, vec![5, 0])]);
    archive.seal();
    let (collect, stats) = run(&archive, &options);
    assert_eq!(stats.first_failure, Some(ReportKind::DataConsistency));
    let messages = collect.errors_of_kind(ReportKind::DataConsistency);
    assert!(
        messages
            .iter()
            .any(|m| m.contains("ALIGNMENT_COUNT[0] = 0")),
        "got: {messages:?}"
    );
}
