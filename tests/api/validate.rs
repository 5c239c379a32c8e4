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

//! End-to-end structural validation: checksums, traversal, indices, and
//! the sum-of-parts law on a standalone table.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use arcvet::monitor::collect::CollectSink;
use arcvet::monitor::{ReportEvent, ReportSink};
use arcvet::test_fixtures::{ScratchArchive, TableWriter};
use arcvet::*;

/// A table consistent under the sum-of-parts law (scenario S1).
fn consistent_table() -> (ScratchArchive, TableWriter) {
    let (archive, writer) = ScratchArchive::new_table("TBL");
    writer.column_u8(
        "READ",
        &[
            (1, b"ACGTACG".to_vec()),
            (2, b"ACGTA".to_vec()),
            (3, b"ACGT".to_vec()),
        ],
    );
    writer.column_u8(
        "QUALITY",
        &[(1, vec![30; 7]), (2, vec![30; 5]), (3, vec![30; 4])],
    );
    writer.column_u32(
        "READ_LEN",
        &[(1, vec![3, 4]), (2, vec![5, 0]), (3, vec![2, 2])],
    );
    writer.column_u32("SPOT_LEN", &[(1, vec![7]), (2, vec![5]), (3, vec![4])]);
    (archive, writer)
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

fn consistency_options() -> ValidatorOptions {
    ValidatorOptions {
        consistency_check: true,
        ..ValidatorOptions::default()
    }
}

#[test]
fn consistent_table_is_clean() {
    let (archive, _writer) = consistent_table();
    archive.seal();
    let (collect, stats) = run(&archive, &consistency_options());
    assert!(stats.is_clean(), "problems: {:?}", collect.problems());
    assert_eq!(stats.exit_code(), 0);
    assert_eq!(stats.columns_checked, 4);
}

#[test]
fn sum_mismatch_is_reported_at_its_row() {
    // Scenario S2: SPOT_LEN of row 2 claims 6 while the parts sum to 5.
    let (archive, writer) = consistent_table();
    writer.column_u32("SPOT_LEN", &[(1, vec![7]), (2, vec![6]), (3, vec![4])]);
    archive.seal();
    let (collect, stats) = run(&archive, &consistency_options());
    assert_eq!(stats.first_failure, Some(ReportKind::DataConsistency));
    assert_eq!(stats.exit_code(), 4);
    let messages = collect.errors_of_kind(ReportKind::DataConsistency);
    assert_eq!(messages, ["Sum(READ_LEN) != SPOT_LEN in row 2"]);
}

#[test]
fn md5_mismatch_stops_the_subtree() {
    // Scenario S3: a manifest entry disagrees with the file content.
    let (archive, _writer) = consistent_table();
    archive.seal();
    let manifest_path = archive.path().join("col/READ_LEN/md5");
    let manifest = fs::read_to_string(&manifest_path).unwrap();
    let broken: String = manifest
        .lines()
        .map(|line| {
            if line.ends_with("blobs.json") {
                format!("{}  blobs.json\n", "abc123".repeat(6)[..32].to_string())
            } else {
                format!("{line}\n")
            }
        })
        .collect();
    fs::write(&manifest_path, broken).unwrap();

    let (collect, stats) = run(&archive, &ValidatorOptions::default());
    assert_eq!(stats.first_failure, Some(ReportKind::ChecksumMismatch));
    assert_eq!(stats.exit_code(), 3);
    let messages = collect.errors_of_kind(ReportKind::ChecksumMismatch);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("blobs.json"));
    assert!(messages[0].contains("READ_LEN"));

    // The failed column's subtree stopped: no blob events for READ_LEN,
    // while its siblings were still checked.
    let events = collect.events();
    assert!(!events.iter().any(|event| matches!(
        event,
        ReportEvent::Blob { obj_name, .. } if obj_name == "READ_LEN"
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        ReportEvent::Blob { obj_name, .. } if obj_name == "SPOT_LEN"
    )));
}

#[test]
fn corrupt_blob_crc_is_a_checksum_mismatch() {
    let (archive, _writer) = consistent_table();
    // Flip the stored CRC32 in the blob descriptor; manifests are written
    // afterwards so the walk reaches the blob check itself.
    let blobs_path = archive.path().join("col/SPOT_LEN/blobs.json");
    let text = fs::read_to_string(&blobs_path).unwrap();
    let mut blobs: serde_json::Value = serde_json::from_str(&text).unwrap();
    blobs[0]["crc32"] = serde_json::json!(12345678);
    fs::write(&blobs_path, serde_json::to_vec(&blobs).unwrap()).unwrap();
    archive.seal();

    let (collect, stats) = run(&archive, &ValidatorOptions::default());
    assert_eq!(stats.first_failure, Some(ReportKind::ChecksumMismatch));
    let messages = collect.errors_of_kind(ReportKind::ChecksumMismatch);
    assert!(messages[0].contains("SPOT_LEN"));
    assert!(messages[0].contains("CRC32"));
}

#[test]
fn traversal_covers_every_object_exactly_once() {
    let (archive, writer) = consistent_table();
    writer.index("row_idx", &[1, 2, 3]);
    archive.seal();
    let (collect, stats) = run(&archive, &ValidatorOptions::default());
    assert!(stats.is_clean());

    let events = collect.events();
    let mut visits: HashMap<String, usize> = HashMap::new();
    let mut dones: HashMap<String, usize> = HashMap::new();
    let mut depth_stack: Vec<usize> = Vec::new();
    for event in &events {
        match event {
            ReportEvent::Visit { name, depth, .. } => {
                // A child's depth is its parent's depth plus one.
                while depth_stack.last().map_or(false, |d| *d >= *depth) {
                    depth_stack.pop();
                }
                assert_eq!(depth_stack.len(), *depth, "bad depth for {name}");
                depth_stack.push(*depth);
                *visits.entry(name.clone()).or_insert(0) += 1;
            }
            ReportEvent::Done { obj_name, .. } => {
                *dones.entry(obj_name.clone()).or_insert(0) += 1;
            }
            _ => (),
        }
    }
    assert_eq!(visits, dones);
    // Tree objects are visited once each; metadata markers repeat per object.
    for name in ["TBL", "READ", "QUALITY", "READ_LEN", "SPOT_LEN", "row_idx"] {
        assert_eq!(visits.get(name), Some(&1), "{name} visited once");
    }
}

#[test]
fn rerunning_yields_identical_events() {
    let (archive, _writer) = consistent_table();
    archive.seal();
    let (first, _) = run(&archive, &ValidatorOptions::default());
    let (second, _) = run(&archive, &ValidatorOptions::default());
    assert_eq!(first.events(), second.events());
    assert_eq!(first.problems(), second.problems());
}

#[test]
fn unsorted_index_fails_when_index_check_enabled() {
    let (archive, writer) = consistent_table();
    writer.index("row_idx", &[3, 1, 2]);
    archive.seal();

    // Off by default.
    let (_, stats) = run(&archive, &ValidatorOptions::default());
    assert!(stats.is_clean());

    let options = ValidatorOptions {
        index: true,
        ..ValidatorOptions::default()
    };
    let (collect, stats) = run(&archive, &options);
    assert_eq!(stats.first_failure, Some(ReportKind::DataConsistency));
    let messages = collect.errors_of_kind(ReportKind::DataConsistency);
    assert!(messages[0].contains("not sorted"));
}

#[test]
fn missing_manifest_is_a_warning_unless_required() {
    let (archive, _writer) = consistent_table();
    // No seal: no manifests anywhere.
    let (collect, stats) = run(&archive, &ValidatorOptions::default());
    assert!(stats.is_clean());
    assert!(stats.warning_count() > 0);
    assert!(!collect
        .errors_of_kind(ReportKind::MissingChecksum)
        .is_empty());

    let options = ValidatorOptions {
        md5_required: true,
        ..ValidatorOptions::default()
    };
    let (_, stats) = run(&archive, &options);
    assert_eq!(stats.first_failure, Some(ReportKind::MissingChecksum));
    assert_eq!(stats.exit_code(), 5);
}

#[test]
fn container_and_envelope_roots_validate_like_directories() {
    let (archive, _writer) = consistent_table();
    archive.seal();
    let out_dir = tempfile::TempDir::new().unwrap();

    let container = out_dir.path().join("tbl.arcvet");
    archive.pack_container(&container);
    let collect = CollectSink::arc();
    let sink: Arc<dyn ReportSink> = collect.clone();
    let stats = validate_path(
        &container,
        &consistency_options(),
        sink,
        &CancelToken::new(),
        None,
    );
    assert!(stats.is_clean(), "problems: {:?}", collect.problems());

    let encrypted = out_dir.path().join("tbl.enc");
    archive.pack_encrypted(&encrypted);
    let stats = validate_path(
        &encrypted,
        &consistency_options(),
        CollectSink::arc(),
        &CancelToken::new(),
        None,
    );
    assert!(stats.is_clean());

    // One flipped payload byte is a fatal envelope failure.
    let mut raw = fs::read(&encrypted).unwrap();
    let flip = raw.len() / 2;
    raw[flip] ^= 0x01;
    fs::write(&encrypted, raw).unwrap();
    let stats = validate_path(
        &encrypted,
        &ValidatorOptions::default(),
        CollectSink::arc(),
        &CancelToken::new(),
        None,
    );
    assert_eq!(stats.first_failure, Some(ReportKind::FatalStructure));
    assert_eq!(stats.exit_code(), 2);
}

#[test]
fn missing_path_is_fatal() {
    let dir = tempfile::TempDir::new().unwrap();
    let stats = validate_path(
        &dir.path().join("no-such-archive"),
        &ValidatorOptions::default(),
        CollectSink::arc(),
        &CancelToken::new(),
        None,
    );
    assert_eq!(stats.first_failure, Some(ReportKind::FatalStructure));
}

#[test]
fn exhaustive_mode_reports_every_violation() {
    let (archive, writer) = consistent_table();
    // Break rows 2 and 3.
    writer.column_u32("SPOT_LEN", &[(1, vec![7]), (2, vec![6]), (3, vec![5])]);
    archive.seal();

    let (collect, _stats) = run(&archive, &consistency_options());
    assert_eq!(
        collect.errors_of_kind(ReportKind::DataConsistency).len(),
        1,
        "default mode stops at the first violation"
    );

    let options = ValidatorOptions {
        exhaustive: true,
        ..consistency_options()
    };
    let (collect, stats) = run(&archive, &options);
    assert_eq!(stats.first_failure, Some(ReportKind::DataConsistency));
    assert_eq!(
        collect.errors_of_kind(ReportKind::DataConsistency),
        [
            "Sum(READ_LEN) != SPOT_LEN in row 2",
            "Sum(READ_LEN) != SPOT_LEN in row 3"
        ]
    );
}
