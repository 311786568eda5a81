use anyhow::{bail, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, info, warn};

use super::random_storage_key;
use crate::db;
use crate::files::KnownDir;
use crate::migration::executor::{backfill, create_if_missing, ObjectKind};
use crate::migration::step::StepContext;
use crate::security;

pub fn resumable_downloads(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE part ADD COLUMN transfer_file TEXT DEFAULT NULL")?;
    Ok(())
}

pub fn key_value_store(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "CREATE TABLE key_value (_id INTEGER PRIMARY KEY AUTOINCREMENT, key TEXT UNIQUE, value TEXT, type INTEGER)",
    )?;
    Ok(())
}

pub fn attachment_display_order(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE part ADD COLUMN display_order INTEGER DEFAULT 0")?;
    Ok(())
}

pub fn split_profile_names(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "ALTER TABLE recipient ADD COLUMN profile_family_name TEXT DEFAULT NULL;
         ALTER TABLE recipient ADD COLUMN profile_joined_name TEXT DEFAULT NULL;",
    )?;
    Ok(())
}

pub fn sticker_pack_order(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE sticker ADD COLUMN pack_order INTEGER DEFAULT 0")?;
    Ok(())
}

pub fn megaphones(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "CREATE TABLE megaphone (_id INTEGER PRIMARY KEY AUTOINCREMENT, event TEXT UNIQUE, seen_count INTEGER, last_seen INTEGER, finished INTEGER)",
    )?;
    Ok(())
}

pub fn megaphone_first_appearance(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE megaphone ADD COLUMN first_visible INTEGER DEFAULT 0")?;
    Ok(())
}

/// Moves the profile key from the legacy preferences onto the local
/// recipient. A registered account without a matching row is corrupt.
pub fn profile_key_to_db(ctx: &StepContext<'_>) -> Result<()> {
    let Some(local_number) = ctx.prefs.local_number.as_deref().filter(|n| !n.is_empty()) else {
        debug!("No local account, no profile key to move");
        return Ok(());
    };

    let profile_key = match ctx.prefs.profile_key_bytes()? {
        Some(key) => key,
        None => security::random_bytes::<32>().to_vec(),
    };

    let updated = ctx.conn.execute(
        "UPDATE recipient SET profile_key = ?1 WHERE phone = ?2",
        (STANDARD.encode(&profile_key), local_number),
    )?;
    if updated == 0 {
        bail!("No recipient row matches the local account; profile key not stored");
    }
    Ok(())
}

pub fn profile_key_credentials(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE recipient ADD COLUMN profile_key_credential TEXT DEFAULT NULL")?;
    Ok(())
}

pub fn attachment_file_index(ctx: &StepContext<'_>) -> Result<()> {
    create_if_missing(
        ctx.conn,
        ObjectKind::Index,
        "part_data_index",
        "CREATE INDEX part_data_index ON part (_data)",
    )?;
    Ok(())
}

pub fn storage_service_active(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "ALTER TABLE recipient ADD COLUMN group_type INTEGER DEFAULT 0;
         CREATE INDEX IF NOT EXISTS recipient_group_type_index ON recipient (group_type);
         UPDATE recipient SET group_type = 1 WHERE group_id NOT NULL AND group_id LIKE '__signal_mms_group__%';
         UPDATE recipient SET group_type = 2 WHERE group_id NOT NULL AND group_id LIKE '__textsecure_group__%';",
    )?;

    let stats = backfill(
        ctx.conn,
        "SELECT _id FROM recipient WHERE registered = 1 OR group_type = 2",
        [],
        "UPDATE recipient SET dirty = 2, storage_service_key = ?1 WHERE _id = ?2",
        |row| Ok(Some((random_storage_key(), row.get::<_, i64>(0)?))),
    )?;
    debug!("Assigned storage keys to {} recipients", stats.updated);
    Ok(())
}

pub fn groups_v2_recipient_capability(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE recipient ADD COLUMN gv2_capability INTEGER DEFAULT 0")?;
    Ok(())
}

/// Deletes interrupted download files left in the parts directory.
pub fn transfer_file_cleanup(ctx: &StepContext<'_>) -> Result<()> {
    if !ctx.janitor.exists(KnownDir::Parts) {
        warn!("Part directory did not exist. Skipping.");
        return Ok(());
    }

    let transfer_files = ctx
        .janitor
        .list(KnownDir::Parts, |name| name.starts_with("transfer"))?;
    info!("Found {} dangling transfer files.", transfer_files.len());

    let mut deleted = 0;
    for file in &transfer_files {
        match ctx.janitor.remove(file) {
            Ok(true) => deleted += 1,
            Ok(false) => {}
            Err(e) => warn!("{e:#}"),
        }
    }
    info!("Deleted {deleted} dangling transfer files.");
    Ok(())
}

pub fn profile_data_migration(ctx: &StepContext<'_>) -> Result<()> {
    let Some(local_number) = ctx.prefs.local_number.as_deref() else {
        return Ok(());
    };

    let name = ctx.prefs.profile_name();
    ctx.conn.execute(
        "UPDATE recipient SET signal_profile_name = ?1, profile_family_name = ?2, profile_joined_name = ?3 WHERE phone = ?4",
        (&name.given, &name.family, name.joined(), local_number),
    )?;
    Ok(())
}

/// Moves avatars out of the legacy directory and group avatar blobs out of
/// the groups table into the avatar store.
pub fn avatar_location_migration(ctx: &StepContext<'_>) -> Result<()> {
    let janitor = ctx.janitor;

    if janitor.exists(KnownDir::LegacyAvatars) {
        let legacy = janitor.list(KnownDir::LegacyAvatars, |_| true)?;
        info!("Preparing to migrate {} avatars.", legacy.len());

        for file in &legacy {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if name.parse::<i64>().is_err() {
                warn!("Invalid avatar name '{name}'! Skipping.");
                continue;
            }
            if let Err(e) = janitor.copy_into(file, KnownDir::Avatars, &name) {
                warn!("Failed to copy file {name}! Skipping. {e:#}");
            }
        }
    } else {
        warn!("No avatar directory files found.");
    }

    if let Err(e) = janitor.remove_dir(KnownDir::LegacyAvatars) {
        warn!("Failed to delete avatar directory. {e:#}");
    }

    db::for_each_row(ctx.conn, "SELECT recipient_id, avatar FROM groups", [], |row| {
        let recipient_id: i64 = row.get(0)?;
        let avatar: Option<Vec<u8>> = row.get(1)?;
        let name = recipient_id.to_string();

        let result = match avatar {
            Some(bytes) => janitor.store(KnownDir::Avatars, &name, &bytes).map(|_| ()),
            None => janitor
                .remove(&janitor.dir(KnownDir::Avatars).join(&name))
                .map(|_| ()),
        };
        if let Err(e) = result {
            warn!("Failed to copy avatar for {recipient_id}! Skipping. {e:#}");
        }
        Ok(())
    })?;

    ctx.conn.execute_batch(
        "UPDATE groups SET avatar_id = 0 WHERE avatar IS NULL;
         UPDATE groups SET avatar = NULL;",
    )?;
    Ok(())
}

pub fn groups_v2(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "ALTER TABLE groups ADD COLUMN master_key;
         ALTER TABLE groups ADD COLUMN revision;
         ALTER TABLE groups ADD COLUMN decrypted_group;",
    )?;
    Ok(())
}

pub fn attachment_upload_timestamp(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE part ADD COLUMN upload_timestamp DEFAULT 0")?;
    Ok(())
}

pub fn attachment_cdn_number(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE part ADD COLUMN cdn_number INTEGER DEFAULT 0")?;
    Ok(())
}

pub fn job_input_data(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE job_spec ADD COLUMN serialized_input_data TEXT DEFAULT NULL")?;
    Ok(())
}

pub fn server_timestamp(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "ALTER TABLE sms ADD COLUMN date_server INTEGER DEFAULT -1;
         CREATE INDEX IF NOT EXISTS sms_date_server_index ON sms (date_server);
         ALTER TABLE mms ADD COLUMN date_server INTEGER DEFAULT -1;
         CREATE INDEX IF NOT EXISTS mms_date_server_index ON mms (date_server);",
    )?;
    Ok(())
}
