use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shelfkeeper::backup::{BackupReason, DumpOperations};
use shelfkeeper::test_utils::{InventoryFixture, SqlTextDump};
use shelfkeeper::Result;

use crate::assert_command_success;
use crate::fixture::TestFixture;

/// Writes a partial dump, reports that it is mid-write, then waits to be
/// released before producing the real content.
struct GatedDump {
    inner: SqlTextDump,
    started: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl DumpOperations for GatedDump {
    fn create_dump(&self, target: &Path) -> Result<()> {
        std::fs::write(target, "BEGIN TRANSACTION;\nCREATE TABLE half")?;
        let _ = self.started.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv_timeout(Duration::from_secs(10));
        self.inner.create_dump(target)
    }

    fn apply_dump(&self, artifact: &Path, into: &Path) -> Result<()> {
        self.inner.apply_dump(artifact, into)
    }
}

#[test]
fn listing_is_strictly_newest_first() {
    let fx = InventoryFixture::new();
    let manager = fx.backup_manager();

    let mut created = Vec::new();
    for i in 0..5 {
        fx.add_stores(&format!("round{i}"), 1);
        let reason = if i % 2 == 0 {
            BackupReason::Manual
        } else {
            BackupReason::Scheduled
        };
        created.push(manager.create_backup(reason).unwrap());
    }

    let listed = manager.store().list().unwrap();
    assert_eq!(listed.len(), 5);
    assert!(listed.windows(2).all(|w| w[0].created_at > w[1].created_at));
    created.reverse();
    assert_eq!(listed, created);
}

#[test]
fn list_never_returns_a_dump_in_progress() {
    let fx = InventoryFixture::new();
    fx.add_stores("shop", 2);
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let dump = Arc::new(GatedDump {
        inner: SqlTextDump::new(fx.db_path()),
        started: Mutex::new(started_tx),
        release: Mutex::new(release_rx),
    });
    let manager = fx.backup_manager_with(dump);

    std::thread::scope(|scope| {
        let writer = scope.spawn(|| manager.create_backup(BackupReason::Manual));

        started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(manager.store().list().unwrap().is_empty());
        assert!(manager.store().newest_stamp().unwrap().is_none());

        release_tx.send(()).unwrap();
        let artifact = writer.join().unwrap().unwrap();

        let listed = manager.store().list().unwrap();
        assert_eq!(listed, vec![artifact]);
    });
}

#[test]
fn prune_keeps_the_k_newest() {
    let fx = InventoryFixture::new();
    let manager = fx.backup_manager();
    for _ in 0..5 {
        manager.create_backup(BackupReason::Scheduled).unwrap();
    }
    let before = manager.store().list().unwrap();

    let report = manager.store().prune(3).unwrap();
    assert_eq!(report.deleted.len(), 2);
    assert_eq!(report.kept, 3);

    let after = manager.store().list().unwrap();
    assert_eq!(after, before[..3].to_vec());
    for name in &report.deleted {
        assert!(!manager.store().artifact_path(name).exists());
    }
}

#[test]
fn prune_with_fewer_artifacts_than_k_deletes_nothing() {
    let fx = InventoryFixture::new();
    let manager = fx.backup_manager();
    manager.create_backup(BackupReason::Manual).unwrap();
    manager.create_backup(BackupReason::Manual).unwrap();

    let report = manager.store().prune(10).unwrap();
    assert!(report.deleted.is_empty());
    assert_eq!(manager.store().list().unwrap().len(), 2);
}

#[test]
fn pre_restore_artifacts_have_their_own_budget() {
    let fx = InventoryFixture::new();
    let manager = fx.backup_manager();
    for _ in 0..3 {
        manager.create_backup(BackupReason::PreRestore).unwrap();
    }
    for _ in 0..3 {
        manager.create_backup(BackupReason::Manual).unwrap();
    }

    let report = manager.store().apply_retention(1, 2).unwrap();
    assert_eq!(report.deleted.len(), 3);

    let listed = manager.store().list().unwrap();
    let regular = listed.iter().filter(|a| !a.reason.is_pre_restore()).count();
    let pre_restore = listed.iter().filter(|a| a.reason.is_pre_restore()).count();
    assert_eq!(regular, 1);
    assert_eq!(pre_restore, 2);
}

#[test]
fn unregistered_files_are_excluded_from_listing() {
    let fx = InventoryFixture::new();
    let manager = fx.backup_manager();
    let artifact = manager.create_backup(BackupReason::Manual).unwrap();

    // A stray artifact-shaped file without a sidecar.
    let stray = "backup-2020-01-01T00-00-00-000Z-manual.sql";
    std::fs::write(manager.store().artifact_path(stray), "SELECT 1;").unwrap();

    assert_eq!(manager.store().list().unwrap(), vec![artifact]);
}

#[test]
fn cli_backup_create_list_and_prune() {
    if !TestFixture::has_sqlite3() {
        println!("[SKIP] sqlite3 not installed");
        return;
    }
    let fixture = TestFixture::new("cli_backup_create_list_and_prune");
    let legacy = fixture.write_legacy(
        "legacy.json",
        &serde_json::json!({"stores": [{"name": "Corner Shop"}]}),
    );
    assert_command_success!(fixture.run_shelf(&["--json", "migrate", legacy.to_str().unwrap()]));

    for _ in 0..3 {
        let output = fixture.run_shelf(&["--json", "backup", "create", "--reason", "scheduled"]);
        assert_command_success!(output);
        let json = output.json();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["reason"], "scheduled");
        assert!(json["data"]["size_bytes"].as_u64().unwrap() > 0);
    }

    let list = fixture.run_shelf(&["--json", "backup", "list"]);
    assert_command_success!(list);
    assert_eq!(list.json()["data"]["count"], 3);

    let prune = fixture.run_shelf(&["--json", "backup", "prune", "--keep", "1"]);
    assert_command_success!(prune);
    assert_eq!(prune.json()["data"]["deleted"].as_array().unwrap().len(), 2);

    let names = TestFixture::list_dir(&fixture.backup_dir());
    assert_eq!(names.iter().filter(|n| n.ends_with(".sql")).count(), 1);
}
