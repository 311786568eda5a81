use anyhow::{anyhow, Result};
use log::{debug, error, info};

use super::{derive_v2_migration_id, random_storage_key, GV1_PREFIX};
use crate::migration::executor::{backfill, collect_ids, delete_ids};
use crate::migration::step::StepContext;
use crate::security;
use crate::wire;

/// Expected v2 id for every well-formed v1 group, so a later group
/// migration can match the two up.
pub fn gv1_migration(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "ALTER TABLE groups ADD COLUMN expected_v2_id TEXT DEFAULT NULL;
         ALTER TABLE groups ADD COLUMN former_v1_members TEXT DEFAULT NULL;
         CREATE UNIQUE INDEX IF NOT EXISTS expected_v2_id_index ON groups (expected_v2_id);",
    )?;

    let stats = backfill(
        ctx.conn,
        "SELECT group_id FROM groups WHERE group_id LIKE '__textsecure_group__!%' AND LENGTH(group_id) = 53",
        [],
        "UPDATE groups SET expected_v2_id = ?1 WHERE group_id = ?2",
        |row| {
            let gv1: String = row.get(0)?;
            let raw = gv1
                .strip_prefix(GV1_PREFIX)
                .and_then(security::hex_decode)
                .ok_or_else(|| anyhow!("Malformed v1 group id {gv1}"))?;
            Ok(Some((derive_v2_migration_id(&raw), gv1)))
        },
    )?;

    info!("Updated {} GV1 groups with expected GV2 IDs.", stats.updated);
    Ok(())
}

pub fn notified_timestamp(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "ALTER TABLE sms ADD COLUMN notified_timestamp INTEGER DEFAULT 0;
         ALTER TABLE mms ADD COLUMN notified_timestamp INTEGER DEFAULT 0;",
    )?;
    Ok(())
}

pub fn gv1_migration_last_seen(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "ALTER TABLE recipient ADD COLUMN last_gv1_migrate_reminder INTEGER DEFAULT 0",
    )?;
    Ok(())
}

pub fn viewed_receipts(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE mms ADD COLUMN viewed_receipt_count INTEGER DEFAULT 0")?;
    Ok(())
}

/// Repairs recipients carrying a v1 group id of the wrong length.
pub fn clean_up_gv1_ids(ctx: &StepContext<'_>) -> Result<()> {
    // REVIEW: `group_id NOT IN (SELECT group_id FROM groups)` matches nothing
    // once any group row has a NULL group_id; predicates kept as found.
    let deletable = collect_ids(
        ctx.conn,
        "SELECT _id FROM recipient
         WHERE group_id NOT IN (SELECT group_id FROM groups)
         AND group_id LIKE '__textsecure_group__!%' AND length(group_id) <> 53
         AND (_id NOT IN (SELECT recipient_ids FROM thread) OR _id IN (SELECT recipient_ids FROM thread WHERE message_count = 0))",
        [],
    )?;
    let deleted = delete_ids(ctx.conn, "recipient", &deletable)?;
    debug!("Deleted {deleted} recipients with invalid GV1 ids and no or empty threads");

    let orphaned = collect_ids(
        ctx.conn,
        "SELECT _id FROM thread WHERE message_count = 0 AND recipient_ids NOT IN (SELECT _id FROM recipient)",
        [],
    )?;
    let deleted = delete_ids(ctx.conn, "thread", &orphaned)?;
    debug!("Deleted {deleted} orphaned threads");

    let stats = backfill(
        ctx.conn,
        "SELECT _id FROM recipient
         WHERE group_id NOT IN (SELECT group_id FROM groups)
         AND group_id LIKE '__textsecure_group__!%' AND length(group_id) <> 53
         AND _id IN (SELECT recipient_ids FROM thread)",
        [],
        "UPDATE recipient SET group_id = ?1 WHERE _id = ?2",
        |row| {
            let id: i64 = row.get(0)?;
            let replacement = format!(
                "{GV1_PREFIX}{}",
                security::hex_encode(&security::random_bytes::<16>())
            );
            Ok(Some((replacement, id)))
        },
    )?;
    debug!("Replaced invalid GV1 ids on {} recipients with threads", stats.updated);
    Ok(())
}

pub fn gv1_migration_refactor(ctx: &StepContext<'_>) -> Result<()> {
    let count = ctx.conn.execute(
        "UPDATE groups SET former_v1_members = NULL WHERE former_v1_members NOT NULL",
        [],
    )?;
    info!("Cleared former_v1_members for {count} rows");
    Ok(())
}

pub fn clear_profile_key_credentials(ctx: &StepContext<'_>) -> Result<()> {
    let count = ctx.conn.execute(
        "UPDATE recipient SET profile_key_credential = NULL WHERE profile_key_credential NOT NULL",
        [],
    )?;
    info!("Cleared profile key credentials for {count} rows");
    Ok(())
}

pub fn last_reset_session_time(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE recipient ADD COLUMN last_session_reset BLOB DEFAULT NULL")?;
    Ok(())
}

pub fn wallpaper(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "ALTER TABLE recipient ADD COLUMN wallpaper BLOB DEFAULT NULL;
         ALTER TABLE recipient ADD COLUMN wallpaper_file TEXT DEFAULT NULL;",
    )?;
    Ok(())
}

pub fn about(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "ALTER TABLE recipient ADD COLUMN about TEXT DEFAULT NULL;
         ALTER TABLE recipient ADD COLUMN about_emoji TEXT DEFAULT NULL;",
    )?;
    Ok(())
}

pub fn split_system_names(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "ALTER TABLE recipient ADD COLUMN system_family_name TEXT DEFAULT NULL;
         ALTER TABLE recipient ADD COLUMN system_given_name TEXT DEFAULT NULL;
         UPDATE recipient SET system_given_name = system_display_name;",
    )?;
    Ok(())
}

pub fn payments(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "CREATE TABLE payments(_id INTEGER PRIMARY KEY, uuid TEXT DEFAULT NULL, recipient INTEGER DEFAULT 0, recipient_address TEXT DEFAULT NULL, timestamp INTEGER, note TEXT DEFAULT NULL, direction INTEGER, state INTEGER, failure_reason INTEGER, amount BLOB NOT NULL, fee BLOB NOT NULL, transaction_record BLOB DEFAULT NULL, receipt BLOB DEFAULT NULL, payment_metadata BLOB DEFAULT NULL, receipt_public_key TEXT DEFAULT NULL, block_index INTEGER DEFAULT 0, block_timestamp INTEGER DEFAULT 0, seen INTEGER, UNIQUE(uuid) ON CONFLICT ABORT);
         CREATE INDEX IF NOT EXISTS timestamp_direction_index ON payments (timestamp, direction);
         CREATE INDEX IF NOT EXISTS timestamp_index ON payments (timestamp);
         CREATE UNIQUE INDEX IF NOT EXISTS receipt_public_key_index ON payments (receipt_public_key);",
    )?;
    Ok(())
}

pub fn clean_storage_ids(ctx: &StepContext<'_>) -> Result<()> {
    // REVIEW: phone numbers without '+' and group ids of unexpected length
    // are treated as unsyncable; lengths 53 and 85 are the v1 and v2 forms.
    let count = ctx.conn.execute(
        "UPDATE recipient SET storage_service_key = NULL WHERE storage_service_key NOT NULL AND ((phone NOT NULL AND INSTR(phone, '+') = 0) OR (group_id NOT NULL AND (LENGTH(group_id) != 85 and LENGTH(group_id) != 53)))",
        [],
    )?;
    info!("There were {count} bad rows that had their storageID removed.");
    Ok(())
}

pub fn mp4_gif_support(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE part ADD COLUMN video_gif INTEGER DEFAULT 0")?;
    Ok(())
}

/// Turns on profile sharing where we already sent secure messages and flags
/// recipients sharing an active group with a profile-sharing group.
pub fn blur_avatars(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "ALTER TABLE recipient ADD COLUMN extras BLOB DEFAULT NULL;
         ALTER TABLE recipient ADD COLUMN groups_in_common INTEGER DEFAULT 0;

         UPDATE recipient SET profile_sharing = 1 WHERE _id IN (
           SELECT r._id FROM recipient AS r INNER JOIN thread AS t ON r._id = t.recipient_ids
           WHERE profile_sharing = 0 AND (
             EXISTS(SELECT 1 FROM sms WHERE thread_id = t._id AND (type & 31) = 23 AND (type & 10485760) AND (type & 131072 = 0))
             OR EXISTS(SELECT 1 FROM mms WHERE thread_id = t._id AND (msg_box & 31) = 23 AND (msg_box & 10485760) AND (msg_box & 131072 = 0))));

         UPDATE recipient SET groups_in_common = 1 WHERE _id IN (
           SELECT r._id FROM recipient AS r WHERE EXISTS(
             SELECT 1 FROM groups AS g INNER JOIN recipient AS gr ON (g.recipient_id = gr._id AND gr.profile_sharing = 1)
             WHERE g.active = 1 AND (g.members LIKE r._id || ',%' OR g.members LIKE '%,' || r._id || ',%' OR g.members LIKE '%,' || r._id)));",
    )?;
    Ok(())
}

pub fn clean_storage_ids_without_info(ctx: &StepContext<'_>) -> Result<()> {
    let count = ctx.conn.execute(
        "UPDATE recipient SET storage_service_key = NULL WHERE storage_service_key NOT NULL AND phone IS NULL AND uuid IS NULL AND group_id IS NULL",
        [],
    )?;
    info!("There were {count} bad rows that had their storageID removed due to not having any other identifier.");
    Ok(())
}

/// Undoes notification state that reactions flipped on read incoming
/// messages, and marks reactions as seen when none arrived after the last
/// notification.
pub fn clean_reaction_notifications(ctx: &StepContext<'_>) -> Result<()> {
    let mut count = ctx.conn.execute(
        "UPDATE sms SET notified = 1 WHERE notified = 0 AND read = 1 AND reactions_unread = 1 AND NOT ((type & 31) = 23 AND (type & 10485760) AND (type & 131072 = 0))",
        [],
    )?;
    count += ctx.conn.execute(
        "UPDATE mms SET notified = 1 WHERE notified = 0 AND read = 1 AND reactions_unread = 1 AND NOT ((msg_box & 31) = 23 AND (msg_box & 10485760) AND (msg_box & 131072 = 0))",
        [],
    )?;
    debug!("Resetting notified for {count} read incoming messages that were incorrectly flipped when receiving reactions");

    for table in ["sms", "mms"] {
        let stats = backfill(
            ctx.conn,
            &format!("SELECT _id, reactions, notified_timestamp FROM {table} WHERE notified = 0 AND reactions_unread = 1"),
            [],
            &format!("UPDATE {table} SET reactions_last_seen = notified_timestamp WHERE _id = ?1"),
            |row| {
                let id: i64 = row.get(0)?;
                let Some(reactions) = row.get::<_, Option<Vec<u8>>>(1)? else {
                    return Ok(None);
                };
                let notified_timestamp = row.get::<_, Option<i64>>(2)?.unwrap_or(0);

                match wire::decode_reaction_list(&reactions) {
                    Ok(list) => {
                        let newer = list
                            .iter()
                            .any(|r| i64::try_from(r.received_time).unwrap_or(i64::MAX) > notified_timestamp);
                        Ok((!newer).then_some((id,)))
                    }
                    Err(e) => {
                        error!("Unreadable reactions on {table} {id}: {e:#}");
                        Ok(None)
                    }
                }
            },
        )?;
        debug!("Updating {} records in {table}", stats.updated);
    }
    Ok(())
}

/// Rebuilds storage keys: drops them for rows that can no longer sync,
/// issues new ones for rows that need one and rotates dirty rows.
pub fn storage_service_refactor(ctx: &StepContext<'_>) -> Result<()> {
    let deleted = ctx.conn.execute(
        "UPDATE recipient SET storage_service_key = NULL WHERE storage_service_key NOT NULL AND (dirty = 3 OR group_type = 1 OR (group_type = 0 AND registered = 2))",
        [],
    )?;

    let inserted = backfill(
        ctx.conn,
        "SELECT _id FROM recipient WHERE storage_service_key IS NULL AND (dirty = 2 OR registered = 1)",
        [],
        "UPDATE recipient SET storage_service_key = ?1 WHERE _id = ?2",
        |row| Ok(Some((random_storage_key(), row.get::<_, i64>(0)?))),
    )?;

    let rotated = backfill(
        ctx.conn,
        "SELECT _id FROM recipient WHERE storage_service_key NOT NULL AND dirty = 1",
        [],
        "UPDATE recipient SET storage_service_key = ?1 WHERE _id = ?2",
        |row| Ok(Some((random_storage_key(), row.get::<_, i64>(0)?))),
    )?;

    let cleared = ctx
        .conn
        .execute("UPDATE recipient SET dirty = 0 WHERE dirty != 0", [])?;

    debug!(
        "For storage service refactor migration, there were {} inserts, {} updated, and {} deletes. Cleared the dirty status on {} rows.",
        inserted.scanned, rotated.scanned, deleted, cleared
    );
    Ok(())
}

pub fn clear_mms_storage_ids(ctx: &StepContext<'_>) -> Result<()> {
    let count = ctx.conn.execute(
        "UPDATE recipient SET storage_service_key = NULL WHERE storage_service_key NOT NULL AND (group_type = 1 OR (group_type = 0 AND phone IS NULL AND uuid IS NULL))",
        [],
    )?;
    debug!("Cleared storageIds from {count} rows. They were either MMS groups or empty contacts.");
    Ok(())
}

pub fn server_guid(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "ALTER TABLE sms ADD COLUMN server_guid TEXT DEFAULT NULL;
         ALTER TABLE mms ADD COLUMN server_guid TEXT DEFAULT NULL;",
    )?;
    Ok(())
}
