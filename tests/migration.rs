use anyhow::anyhow;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

use msgvault::config::Config;
use msgvault::db::{self, Db};
use msgvault::files::BlobJanitor;
use msgvault::legacy_prefs::LegacyPrefs;
use msgvault::migration::history::{self, baseline};
use msgvault::migration::{
    open_or_migrate, MigrationEngine, MigrationError, MigrationStep, SnapshotManager, StepContext,
    StepKind, VersionRegistry, CURRENT_VERSION, MIN_SUPPORTED_VERSION,
};
use msgvault::paths::StorePaths;
use msgvault::receipts::PendingReceiptStore;
use msgvault::secret::{DatabaseSecret, FixedSecretProvider};

fn secret() -> DatabaseSecret {
    DatabaseSecret::new(vec![42u8; 32])
}

fn provider() -> FixedSecretProvider {
    FixedSecretProvider::new(secret())
}

fn no_snapshots() -> Config {
    Config {
        snapshot_before_upgrade: false,
        ..Config::default()
    }
}

fn open_raw(paths: &StorePaths) -> Db {
    paths.ensure_base_dir().unwrap();
    Db::open(&paths.db_path, &secret(), Duration::from_millis(100)).unwrap()
}

/// Builds a store exactly as a build shipping `version` would have left it.
fn store_at(paths: &StorePaths, version: u32) -> Db {
    let mut db = open_raw(paths);
    if version == MIN_SUPPORTED_VERSION {
        db.execute_batch(baseline::BASELINE_SQL).unwrap();
        db.set_persisted_version(version).unwrap();
        return db;
    }

    let steps = history::steps()
        .into_iter()
        .filter(|s| s.target_version <= version)
        .collect();
    let registry = VersionRegistry::new(MIN_SUPPORTED_VERSION, steps)
        .unwrap()
        .with_baseline(baseline::create);
    let janitor = BlobJanitor::new(paths);
    let prefs = LegacyPrefs::default();
    MigrationEngine::new(&registry, &janitor, &prefs)
        .create(&mut db)
        .unwrap();
    assert_eq!(db.persisted_version().unwrap(), version);
    db
}

fn paths_in(dir: &Path, name: &str) -> StorePaths {
    StorePaths::in_dir(dir.join(name))
}

#[test]
fn test_every_supported_version_upgrades_to_fresh_schema() {
    let temp = tempdir().unwrap();
    let fresh_paths = paths_in(temp.path(), "fresh");
    let fresh = open_or_migrate(&fresh_paths, &provider(), &no_snapshots()).unwrap();
    assert_eq!(fresh.persisted_version().unwrap(), CURRENT_VERSION);
    let expected = fresh.schema_objects().unwrap();

    for version in MIN_SUPPORTED_VERSION..CURRENT_VERSION {
        let paths = paths_in(temp.path(), &format!("v{version}"));
        drop(store_at(&paths, version));

        let upgraded = open_or_migrate(&paths, &provider(), &no_snapshots())
            .unwrap_or_else(|e| panic!("upgrade from {version} failed: {e}"));
        assert_eq!(upgraded.persisted_version().unwrap(), CURRENT_VERSION);
        assert_eq!(
            upgraded.schema_objects().unwrap(),
            expected,
            "schema after upgrading from {version} differs from a fresh store"
        );
    }
}

#[test]
fn test_fresh_store_ignores_legacy_account_prefs() {
    let temp = tempdir().unwrap();
    let paths = paths_in(temp.path(), "prefs");
    std::fs::create_dir_all(&paths.base_dir).unwrap();
    std::fs::write(
        &paths.legacy_prefs_path,
        r#"{"local_number":"+15550001111","profile_name":"Ada\u0000Lovelace"}"#,
    )
    .unwrap();

    let db = open_or_migrate(&paths, &provider(), &no_snapshots()).unwrap();
    assert_eq!(db.persisted_version().unwrap(), CURRENT_VERSION);
    let recipients: i64 = db
        .conn()
        .query_row("SELECT COUNT(*) FROM recipient", [], |r| r.get(0))
        .unwrap();
    assert_eq!(recipients, 0);
}

#[test]
fn test_too_old_store_is_refused_untouched() {
    let temp = tempdir().unwrap();
    let paths = paths_in(temp.path(), "old");
    {
        let db = open_raw(&paths);
        db.execute_batch("CREATE TABLE sms (_id INTEGER PRIMARY KEY, body TEXT)")
            .unwrap();
        db.set_persisted_version(12).unwrap();
    }
    let before = std::fs::read(&paths.db_path).unwrap();

    let err = open_or_migrate(&paths, &provider(), &Config::default()).unwrap_err();
    assert!(err.is_unsupported_version());
    assert!(matches!(
        err,
        MigrationError::UnsupportedVersion { found: 12, minimum: 39 }
    ));
    assert_eq!(std::fs::read(&paths.db_path).unwrap(), before);
    assert!(!paths.snapshots_dir.exists());
}

#[test]
fn test_legacy_database_without_store_is_unsupported() {
    let temp = tempdir().unwrap();
    let paths = paths_in(temp.path(), "legacy");
    std::fs::create_dir_all(&paths.base_dir).unwrap();
    std::fs::write(&paths.legacy_db_path, b"old plaintext store").unwrap();

    let err = open_or_migrate(&paths, &provider(), &Config::default()).unwrap_err();
    assert!(err.is_unsupported_version());
    assert!(!paths.db_path.exists());
}

#[test]
fn test_newer_store_is_refused() {
    let temp = tempdir().unwrap();
    let paths = paths_in(temp.path(), "future");
    {
        let db = store_at(&paths, 60);
        db.set_persisted_version(CURRENT_VERSION + 5).unwrap();
    }

    let err = open_or_migrate(&paths, &provider(), &Config::default()).unwrap_err();
    assert!(matches!(err, MigrationError::FutureVersion { .. }));
}

#[test]
fn test_wrong_key_fails_to_open() {
    let temp = tempdir().unwrap();
    let paths = paths_in(temp.path(), "keyed");
    drop(open_or_migrate(&paths, &provider(), &no_snapshots()).unwrap());
    let before = std::fs::read(&paths.db_path).unwrap();

    let wrong = FixedSecretProvider::new(DatabaseSecret::new(vec![1u8; 32]));
    let err = open_or_migrate(&paths, &wrong, &no_snapshots()).unwrap_err();
    assert!(matches!(err, MigrationError::Open(_)));
    assert_eq!(std::fs::read(&paths.db_path).unwrap(), before);
}

#[test]
fn test_failed_step_rolls_back_whole_upgrade() {
    let temp = tempdir().unwrap();
    let paths = paths_in(temp.path(), "broken");
    {
        let db = store_at(&paths, 101);
        // Step 104 drops this index unconditionally.
        db.execute_batch("DROP INDEX sms_date_sent_index").unwrap();
    }

    let err = open_or_migrate(&paths, &provider(), &no_snapshots()).unwrap_err();
    assert!(matches!(err, MigrationError::StepFailed { version: 104, .. }));

    let db = open_raw(&paths);
    assert_eq!(db.persisted_version().unwrap(), 101);
    assert!(!db::table_exists(db.conn(), "emoji_search").unwrap());
    assert!(!db::table_exists(db.conn(), "sender_keys").unwrap());
    assert!(!db::table_exists(db.conn(), "pending_retry_receipts").unwrap());
}

#[test]
fn test_guarded_create_tolerates_existing_objects() {
    let temp = tempdir().unwrap();
    let paths = paths_in(temp.path(), "guarded");
    {
        let db = store_at(&paths, 48);
        db.execute_batch("CREATE INDEX part_data_index ON part (_data)")
            .unwrap();
    }

    let db = open_or_migrate(&paths, &provider(), &no_snapshots()).unwrap();
    assert_eq!(db.persisted_version().unwrap(), CURRENT_VERSION);
    assert!(db::index_exists(db.conn(), "part_data_index").unwrap());
}

#[test]
fn test_transfer_files_are_cleaned_during_upgrade() {
    let temp = tempdir().unwrap();
    let paths = paths_in(temp.path(), "files");
    drop(store_at(&paths, 51));
    std::fs::create_dir_all(&paths.parts_dir).unwrap();
    std::fs::write(paths.parts_dir.join("transfer1234.tmp"), b"half").unwrap();
    std::fs::write(paths.parts_dir.join("part5678.mms"), b"whole").unwrap();

    open_or_migrate(&paths, &provider(), &no_snapshots()).unwrap();

    assert!(!paths.parts_dir.join("transfer1234.tmp").exists());
    assert!(paths.parts_dir.join("part5678.mms").exists());
}

fn add_marker_table(ctx: &StepContext<'_>) -> anyhow::Result<()> {
    ctx.conn
        .execute_batch("CREATE TABLE marker (_id INTEGER PRIMARY KEY, note TEXT)")?;
    Ok(())
}

fn write_then_fail(ctx: &StepContext<'_>) -> anyhow::Result<()> {
    ctx.conn
        .execute("INSERT INTO marker (note) VALUES ('from side effect')", [])?;
    Err(anyhow!("blob directory unreadable"))
}

fn add_note(ctx: &StepContext<'_>) -> anyhow::Result<()> {
    ctx.conn
        .execute("INSERT INTO marker (note) VALUES ('after')", [])?;
    Ok(())
}

#[test]
fn test_side_effect_failure_is_contained() {
    let temp = tempdir().unwrap();
    let paths = paths_in(temp.path(), "contained");
    let mut db = open_raw(&paths);
    db.set_persisted_version(1).unwrap();

    let registry = VersionRegistry::new(
        1,
        vec![
            MigrationStep::new(2, "add_marker_table", StepKind::SchemaChange, add_marker_table),
            MigrationStep::new(3, "write_then_fail", StepKind::ExternalSideEffect, write_then_fail),
            MigrationStep::new(4, "add_note", StepKind::DataBackfill, add_note),
        ],
    )
    .unwrap();
    let janitor = BlobJanitor::new(&paths);
    let prefs = LegacyPrefs::default();

    let version = MigrationEngine::new(&registry, &janitor, &prefs)
        .upgrade(&mut db, 1)
        .unwrap();
    assert_eq!(version, 4);
    assert_eq!(db.persisted_version().unwrap(), 4);

    let mut notes = Vec::new();
    db.for_each_row("SELECT note FROM marker ORDER BY _id", [], |row| {
        notes.push(row.get::<_, String>(0)?);
        Ok(())
    })
    .unwrap();
    assert_eq!(notes, vec!["after".to_string()]);
}

#[test]
fn test_snapshot_taken_before_upgrade_verifies() {
    let temp = tempdir().unwrap();
    let paths = paths_in(temp.path(), "snap");
    drop(store_at(&paths, 100));

    open_or_migrate(&paths, &provider(), &Config::default()).unwrap();

    let manager = SnapshotManager::new(paths.snapshots_dir.clone());
    let snapshots = manager.list().unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].from_version, 100);
    assert_eq!(snapshots[0].to_version, CURRENT_VERSION);
    assert!(manager.verify(&snapshots[0]).unwrap());

    // The snapshot is still a store at the old version.
    let copy = Db::open(&snapshots[0].database, &secret(), Duration::from_millis(100)).unwrap();
    assert_eq!(copy.persisted_version().unwrap(), 100);
}

#[test]
fn test_reopening_current_store_takes_no_snapshot() {
    let temp = tempdir().unwrap();
    let paths = paths_in(temp.path(), "current");
    drop(open_or_migrate(&paths, &provider(), &Config::default()).unwrap());
    drop(open_or_migrate(&paths, &provider(), &Config::default()).unwrap());

    assert!(SnapshotManager::new(paths.snapshots_dir.clone())
        .list()
        .unwrap()
        .is_empty());
}

#[test]
fn test_pending_receipts_replace_on_conflict() {
    let temp = tempdir().unwrap();
    let paths = paths_in(temp.path(), "receipts");
    let db = open_or_migrate(&paths, &provider(), &no_snapshots()).unwrap();
    let receipts = PendingReceiptStore::new(&db);

    receipts.insert("+15550001", 1, 1000, 1100, 7).unwrap();
    receipts.insert("+15550002", 2, 1000, 1200, 8).unwrap();
    let replacement = receipts.insert("+15550001", 3, 1000, 1300, 9).unwrap();

    let mut all = receipts.get_all().unwrap();
    all.sort_by(|a, b| a.author.cmp(&b.author));
    assert_eq!(all.len(), 2);
    assert_eq!(all[0], replacement);
    assert_eq!(all[0].received_timestamp, 1300);

    receipts.delete(&all[1]).unwrap();
    assert_eq!(receipts.get_all().unwrap(), vec![replacement]);
}
