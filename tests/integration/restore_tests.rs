use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::Duration;

use shelfkeeper::backup::{BackupReason, RestorePhase};
use shelfkeeper::test_utils::{InventoryFixture, SlowDump, SqlTextDump};
use shelfkeeper::ShelfError;

use crate::assert_command_success;
use crate::fixture::TestFixture;

#[test]
fn restore_brings_back_snapshot_and_keeps_safety_copy() {
    let fx = InventoryFixture::new();
    fx.add_stores("before", 3);
    let manager = fx.backup_manager();
    let snapshot = manager.create_backup(BackupReason::Manual).unwrap();
    let before = fx.store_names();

    fx.add_stores("after", 2);
    let op = fx.coordinator(&manager).restore(&snapshot.filename).unwrap();

    assert_eq!(op.phase, RestorePhase::Done);
    assert_eq!(op.reference_rows, Some(3));
    assert_eq!(fx.store_names(), before);

    let pre = op.pre_restore.expect("pre-restore artifact");
    let pre_artifact = manager.store().get(&pre).unwrap();
    assert_eq!(pre_artifact.reason, BackupReason::PreRestore);
    let leftovers = TestFixture::list_dir(&manager.store().temp_dir());
    assert!(leftovers.iter().all(|name| !name.starts_with(".staging-")), "{leftovers:?}");
}

#[test]
fn failed_verification_leaves_live_data_and_a_usable_safety_copy() {
    let mut fx = InventoryFixture::new();
    let manager = fx.backup_manager();
    // Snapshot of an empty inventory; fails the row floor below.
    let empty = manager.create_backup(BackupReason::Manual).unwrap();

    fx.add_stores("live", 4);
    let live = fx.store_names();
    fx.config.restore.min_reference_rows = 1;

    let err = fx.coordinator(&manager).restore(&empty.filename).unwrap_err();
    let pre_restore = match &err {
        ShelfError::RestoreFailed {
            phase,
            pre_restore,
            source,
        } => {
            assert_eq!(phase, "verifying");
            assert!(matches!(**source, ShelfError::RestoreVerification(_)));
            pre_restore.clone().expect("safety artifact")
        }
        other => panic!("unexpected error: {other:?}"),
    };
    assert!(!err.is_retryable());
    assert_eq!(fx.store_names(), live);

    // Damage the live data, then roll back with the safety copy.
    fx.add_stores("junk", 2);
    let op = fx.coordinator(&manager).restore(&pre_restore).unwrap();
    assert_eq!(op.reference_rows, Some(4));
    assert_eq!(fx.store_names(), live);
}

#[test]
fn missing_reference_table_fails_verification() {
    let mut fx = InventoryFixture::new();
    fx.add_stores("shop", 1);
    let manager = fx.backup_manager();
    let snapshot = manager.create_backup(BackupReason::Manual).unwrap();
    fx.config.restore.reference_table = "warehouses".to_string();

    let err = fx.coordinator(&manager).restore(&snapshot.filename).unwrap_err();
    assert!(matches!(err, ShelfError::RestoreFailed { .. }));
    assert_eq!(fx.store_names(), vec!["shop-0".to_string()]);
}

#[test]
fn concurrent_restores_admit_exactly_one() {
    let fx = InventoryFixture::new();
    fx.add_stores("shop", 2);
    let slow = SlowDump::new(SqlTextDump::new(fx.db_path()), Duration::from_millis(600));
    let manager = fx.backup_manager_with(Arc::new(slow));
    let older = manager.create_backup(BackupReason::Manual).unwrap();
    let newer = manager.create_backup(BackupReason::Manual).unwrap();
    let coordinator = fx.coordinator(&manager);

    let (first, second) = std::thread::scope(|scope| {
        let first = scope.spawn(|| coordinator.restore(&older.filename));
        std::thread::sleep(Duration::from_millis(150));
        let second = scope.spawn(|| coordinator.restore(&newer.filename));
        (first.join().unwrap(), second.join().unwrap())
    });

    assert_eq!(first.unwrap().artifact, older.filename);
    match second {
        Err(ShelfError::RestoreInProgress(holder)) => {
            assert!(holder.contains(&older.filename), "holder was {holder}");
        }
        other => panic!("expected RestoreInProgress, got {other:?}"),
    }
}

#[test]
fn prune_spares_the_artifact_being_restored() {
    let fx = InventoryFixture::new();
    fx.add_stores("shop", 1);
    let slow = SlowDump::new(SqlTextDump::new(fx.db_path()), Duration::from_millis(600));
    let manager = fx.backup_manager_with(Arc::new(slow));
    let oldest = manager.create_backup(BackupReason::Manual).unwrap();
    manager.create_backup(BackupReason::Manual).unwrap();
    let coordinator = fx.coordinator(&manager);

    std::thread::scope(|scope| {
        let restore = scope.spawn(|| coordinator.restore(&oldest.filename));
        std::thread::sleep(Duration::from_millis(150));

        let report = manager.store().prune(1).unwrap();
        assert_eq!(report.pinned.as_deref(), Some(oldest.filename.as_str()));
        assert!(report.deleted.is_empty());

        let err = manager.store().delete(&oldest.filename).unwrap_err();
        assert!(matches!(err, ShelfError::RestoreInProgress(_)));

        restore.join().unwrap().unwrap();
    });
    assert!(manager.store().artifact_path(&oldest.filename).exists());
}

#[test]
fn unknown_artifact_is_not_found() {
    let fx = InventoryFixture::new();
    let manager = fx.backup_manager();

    let err = fx
        .coordinator(&manager)
        .restore("backup-2020-01-01T00-00-00-000Z-manual.sql")
        .unwrap_err();
    assert!(matches!(err, ShelfError::ArtifactNotFound(_)));

    let err = fx.coordinator(&manager).restore("../shelf.db").unwrap_err();
    assert!(matches!(err, ShelfError::ValidationFailed(_)));

    // Nothing was touched, so no safety copy either.
    assert!(manager.store().list().unwrap().is_empty());
}

#[test]
fn tampered_artifact_is_rejected_before_any_change() {
    let fx = InventoryFixture::new();
    fx.add_stores("shop", 2);
    let manager = fx.backup_manager();
    let snapshot = manager.create_backup(BackupReason::Manual).unwrap();

    let path = manager.store().artifact_path(&snapshot.filename);
    let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(b"-").unwrap();
    drop(file);

    let err = fx.coordinator(&manager).restore(&snapshot.filename).unwrap_err();
    assert!(matches!(err, ShelfError::ArtifactCorrupted { .. }));
    assert_eq!(manager.store().list().unwrap().len(), 1);
}

#[test]
fn cli_restore_requires_approval() {
    let fixture = TestFixture::new("cli_restore_requires_approval");
    let output = fixture.run_shelf(&[
        "--json",
        "backup",
        "restore",
        "backup-2020-01-01T00-00-00-000Z-manual.sql",
    ]);
    assert!(!output.success);
    let json = output.json();
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "APPROVAL_REQUIRED");
}

#[test]
fn cli_restore_roundtrip_with_sqlite3() {
    if !TestFixture::has_sqlite3() {
        println!("[SKIP] sqlite3 not installed");
        return;
    }
    let fixture = TestFixture::new("cli_restore_roundtrip_with_sqlite3");
    let first = fixture.write_legacy(
        "first.json",
        &serde_json::json!({"stores": [{"name": "A"}, {"name": "B"}]}),
    );
    assert_command_success!(fixture.run_shelf(&["migrate", first.to_str().unwrap()]));

    let create = fixture.run_shelf(&["--json", "backup", "create"]);
    assert_command_success!(create);
    let filename = create.json()["data"]["filename"].as_str().unwrap().to_string();

    let second = fixture.write_legacy(
        "second.json",
        &serde_json::json!({"stores": [{"name": "C"}]}),
    );
    assert_command_success!(fixture.run_shelf(&["migrate", second.to_str().unwrap()]));
    assert_eq!(fixture.count("stores"), 3);

    let restore = fixture.run_shelf(&["--json", "backup", "restore", &filename, "--approve"]);
    assert_command_success!(restore);
    let json = restore.json();
    assert_eq!(json["data"]["phase"], "done");
    assert_eq!(json["data"]["reference_rows"], 2);
    assert_eq!(fixture.count("stores"), 2);
}
