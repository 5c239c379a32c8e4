// Arcvet columnar archive validator.

//! Exercise the installed binary end to end.

use assert_cmd::Command;
use predicates::prelude::*;

use arcvet::test_fixtures::ScratchArchive;

fn arcvet() -> Command {
    Command::cargo_bin("arcvet").unwrap()
}

fn table_archive(spot_len_row2: u32) -> ScratchArchive {
    let (archive, writer) = ScratchArchive::new_table("TBL");
    writer.column_u8("READ", &[(1, b"ACGTACG".to_vec()), (2, b"ACGTA".to_vec())]);
    writer.column_u8("QUALITY", &[(1, vec![30; 7]), (2, vec![30; 5])]);
    writer.column_u32("READ_LEN", &[(1, vec![3, 4]), (2, vec![5, 0])]);
    writer.column_u32("SPOT_LEN", &[(1, vec![7]), (2, vec![spot_len_row2])]);
    archive.seal();
    archive
}

#[test]
fn clean_archive_exits_zero() {
    let archive = table_archive(5);
    arcvet()
        .args(["--no-progress", "--consistency-check", "yes"])
        .arg(archive.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("is consistent"));
}

#[test]
fn sum_mismatch_exits_with_the_consistency_code() {
    let archive = table_archive(6);
    arcvet()
        .args(["--no-progress", "--consistency-check", "yes"])
        .arg(archive.path())
        .assert()
        .code(4)
        .stderr(predicate::str::contains(
            "Sum(READ_LEN) != SPOT_LEN in row 2",
        ));
}

#[test]
fn missing_path_exits_with_the_structure_code() {
    let dir = tempfile::TempDir::new().unwrap();
    arcvet()
        .arg("--no-progress")
        .arg(dir.path().join("no-such-archive"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn later_paths_still_run_after_a_failure() {
    let bad = table_archive(6);
    let good = table_archive(5);
    arcvet()
        .args(["--no-progress", "--consistency-check", "yes"])
        .arg(bad.path())
        .arg(good.path())
        .assert()
        .code(4)
        .stderr(predicate::str::contains("is consistent"));
}

#[test]
fn checks_can_be_switched_off() {
    let archive = table_archive(6);
    // Without the consistency check the sum law is never evaluated.
    arcvet()
        .args(["--no-progress", "--md5", "no", "--blob-crc", "no"])
        .arg(archive.path())
        .assert()
        .success();
}
