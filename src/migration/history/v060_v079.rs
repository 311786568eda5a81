use anyhow::Result;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

use crate::db;
use crate::migration::executor::{backfill, delete_ids};
use crate::migration::step::StepContext;

/// Colours a contact could be assigned before per-chat colours existed.
const LEGACY_CONTACT_COLORS: [&str; 12] = [
    "crimson",
    "vermillion",
    "burlap",
    "forest",
    "wintergreen",
    "teal",
    "blue",
    "indigo",
    "violet",
    "plum",
    "taupe",
    "steel",
];

const OBJECT_REPLACEMENT_CHARACTER: u16 = 0xFFFC;

pub fn remote_delete(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "ALTER TABLE sms ADD COLUMN remote_deleted INTEGER DEFAULT 0;
         ALTER TABLE mms ADD COLUMN remote_deleted INTEGER DEFAULT 0;",
    )?;
    Ok(())
}

/// Stable colour for a display name.
pub fn legacy_color_for(name: &str) -> &'static str {
    // REVIEW: bucketed by SHA-256 of the name, so a given name can land on a
    // different colour than older clients picked for it.
    let digest = Sha256::digest(name.as_bytes());
    let bucket = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    LEGACY_CONTACT_COLORS[bucket as usize % LEGACY_CONTACT_COLORS.len()]
}

pub fn color_migration(ctx: &StepContext<'_>) -> Result<()> {
    backfill(
        ctx.conn,
        "SELECT _id, system_display_name FROM recipient WHERE system_display_name NOT NULL AND color IS NULL",
        [],
        "UPDATE recipient SET color = ?1 WHERE _id = ?2",
        |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            Ok(Some((legacy_color_for(&name), id)))
        },
    )?;
    Ok(())
}

pub fn last_scrolled(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE thread ADD COLUMN last_scrolled INTEGER DEFAULT 0")?;
    Ok(())
}

pub fn last_profile_fetch(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE recipient ADD COLUMN last_profile_fetch INTEGER DEFAULT 0")?;
    Ok(())
}

pub fn server_delivered_timestamp(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE push ADD COLUMN server_delivered_timestamp INTEGER DEFAULT 0")?;
    Ok(())
}

/// Drops attachment files that are only ever referenced as quote thumbnails.
pub fn quote_cleanup(ctx: &StepContext<'_>) -> Result<()> {
    // REVIEW: "every row sharing the file is a quote" is the historical
    // predicate; files whose deletion fails keep their rows untouched.
    let mut candidates: Vec<String> = Vec::new();
    db::for_each_row(
        ctx.conn,
        "SELECT _data FROM (SELECT _data, MIN(quote) AS all_quotes FROM part WHERE _data NOT NULL AND data_hash NOT NULL GROUP BY _data) WHERE all_quotes = 1",
        [],
        |row| {
            candidates.push(row.get(0)?);
            Ok(())
        },
    )?;

    let mut count = 0;
    for data in &candidates {
        match ctx.janitor.remove(Path::new(data)) {
            Ok(true) => {
                ctx.conn.execute(
                    "UPDATE part SET _data = NULL, data_random = NULL, thumbnail = NULL, thumbnail_random = NULL, data_hash = NULL WHERE _data = ?1",
                    [data],
                )?;
                count += 1;
            }
            Ok(false) => warn!("[QuoteCleanup] Failed to delete {data}"),
            Err(e) => warn!("[QuoteCleanup] {e:#}"),
        }
    }

    info!("[QuoteCleanup] Cleaned up {count} quotes.");
    Ok(())
}

pub fn borderless(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE part ADD COLUMN borderless INTEGER DEFAULT 0")?;
    Ok(())
}

pub fn remapped_records(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "CREATE TABLE remapped_recipients (_id INTEGER PRIMARY KEY AUTOINCREMENT, old_id INTEGER UNIQUE, new_id INTEGER);
         CREATE TABLE remapped_threads (_id INTEGER PRIMARY KEY AUTOINCREMENT, old_id INTEGER UNIQUE, new_id INTEGER);",
    )?;
    Ok(())
}

pub fn mentions(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "CREATE TABLE mention (_id INTEGER PRIMARY KEY AUTOINCREMENT, thread_id INTEGER, message_id INTEGER, recipient_id INTEGER, range_start INTEGER, range_length INTEGER);
         CREATE INDEX IF NOT EXISTS mention_message_id_index ON mention (message_id);
         CREATE INDEX IF NOT EXISTS mention_recipient_id_thread_id_index ON mention (recipient_id, thread_id);
         ALTER TABLE mms ADD COLUMN quote_mentions BLOB DEFAULT NULL;
         ALTER TABLE mms ADD COLUMN mentions_self INTEGER DEFAULT 0;
         ALTER TABLE recipient ADD COLUMN mention_setting INTEGER DEFAULT 0;",
    )?;
    Ok(())
}

pub fn pinned_conversations(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "ALTER TABLE thread ADD COLUMN pinned INTEGER DEFAULT 0;
         CREATE INDEX IF NOT EXISTS thread_pinned_index ON thread (pinned);",
    )?;
    Ok(())
}

/// Mention settings flipped meaning: 1 used to be "always", 2 "never".
pub fn mention_global_setting_migration(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "UPDATE recipient SET mention_setting = 0 WHERE mention_setting = 1;
         UPDATE recipient SET mention_setting = 1 WHERE mention_setting = 2;",
    )?;
    Ok(())
}

pub fn unknown_storage_fields(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE recipient ADD COLUMN storage_proto TEXT DEFAULT NULL")?;
    Ok(())
}

pub fn sticker_content_type(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE sticker ADD COLUMN content_type TEXT DEFAULT NULL")?;
    Ok(())
}

pub fn sticker_emoji_in_notifications(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("ALTER TABLE part ADD COLUMN sticker_emoji TEXT DEFAULT NULL")?;
    Ok(())
}

pub fn thumbnail_cleanup(ctx: &StepContext<'_>) -> Result<()> {
    let mut thumbnails: Vec<String> = Vec::new();
    db::for_each_row(
        ctx.conn,
        "SELECT thumbnail FROM part WHERE thumbnail NOT NULL",
        [],
        |row| {
            thumbnails.push(row.get(0)?);
            Ok(())
        },
    )?;
    warn!("Found {} thumbnails to delete.", thumbnails.len());

    let mut deleted = 0;
    for thumbnail in &thumbnails {
        match ctx.janitor.remove(Path::new(thumbnail)) {
            Ok(true) => deleted += 1,
            Ok(false) => warn!("Failed to delete file! {thumbnail}"),
            Err(e) => warn!("Failed to delete file! {e:#}"),
        }
    }
    warn!("Deleted {deleted}/{} thumbnail files.", thumbnails.len());
    Ok(())
}

pub fn sticker_content_type_cleanup(ctx: &StepContext<'_>) -> Result<()> {
    let rows = ctx.conn.execute(
        "UPDATE part SET ct = 'image/webp' WHERE sticker_id NOT NULL AND (ct IS NULL OR ct = '')",
        [],
    )?;
    info!("Updated {rows} sticker attachment content types.");
    Ok(())
}

/// Removes mentions outside group v2 threads, mentions pointing at missing
/// messages or threads, and mentions whose range does not fit the body.
pub fn mention_cleanup(ctx: &StepContext<'_>) -> Result<()> {
    // REVIEW: a thread whose recipient row is missing yields NULL group_type
    // and its mentions survive the first delete; kept as found.
    ctx.conn.execute_batch(
        "DELETE FROM mention WHERE _id IN (SELECT mention._id FROM mention LEFT JOIN thread ON mention.thread_id = thread._id LEFT JOIN recipient ON thread.recipient_ids = recipient._id WHERE recipient.group_type != 3);
         DELETE FROM mention WHERE message_id NOT IN (SELECT _id FROM mms) OR thread_id NOT IN (SELECT _id FROM thread);",
    )?;

    let mut ids_to_delete = Vec::new();
    db::for_each_row(
        ctx.conn,
        "SELECT mention._id, mention.range_start, mention.range_length, mms.body FROM mention INNER JOIN mms ON mention.message_id = mms._id",
        [],
        |row| {
            let id: i64 = row.get(0)?;
            let range_start = row.get::<_, Option<i64>>(1)?.unwrap_or(0);
            let range_length = row.get::<_, Option<i64>>(2)?.unwrap_or(0);
            let body: Option<String> = row.get(3)?;

            let out_of_range = match body.as_deref() {
                None | Some("") => true,
                Some(body) => {
                    let length = body.encode_utf16().count() as i64;
                    range_start < 0
                        || range_length < 0
                        || range_start.checked_add(range_length).map_or(true, |end| end > length)
                }
            };
            if out_of_range {
                ids_to_delete.push(id);
            }
            Ok(())
        },
    )?;

    let deleted = delete_ids(ctx.conn, "mention", &ids_to_delete)?;
    debug!("Removed {deleted} mentions with invalid ranges");
    Ok(())
}

/// Removes mentions filed under the wrong thread, mentions that do not start
/// on a placeholder character, and duplicates of the same range.
pub fn mention_cleanup_v2(ctx: &StepContext<'_>) -> Result<()> {
    // REVIEW: duplicates are resolved newest-id-first, so the highest _id of
    // each (message, start, length) triple survives.
    ctx.conn.execute(
        "DELETE FROM mention WHERE _id IN (SELECT mention._id FROM mention LEFT JOIN mms ON mention.message_id = mms._id WHERE mention.thread_id != mms.thread_id)",
        [],
    )?;

    let mut ids_to_delete = Vec::new();
    let mut seen: HashSet<(i64, i64, i64)> = HashSet::new();
    db::for_each_row(
        ctx.conn,
        "SELECT mention._id, mention.message_id, mention.range_start, mention.range_length, mms.body FROM mention INNER JOIN mms ON mention.message_id = mms._id ORDER BY mention._id DESC",
        [],
        |row| {
            let id: i64 = row.get(0)?;
            let message_id: i64 = row.get(1)?;
            let range_start = row.get::<_, Option<i64>>(2)?.unwrap_or(0);
            let range_length = row.get::<_, Option<i64>>(3)?.unwrap_or(0);
            let body: Option<String> = row.get(4)?;

            let misplaced = body.as_deref().is_some_and(|body| {
                usize::try_from(range_start)
                    .ok()
                    .and_then(|start| body.encode_utf16().nth(start))
                    .is_some_and(|unit| unit != OBJECT_REPLACEMENT_CHARACTER)
            });

            if misplaced || !seen.insert((message_id, range_start, range_length)) {
                ids_to_delete.push(id);
            }
            Ok(())
        },
    )?;

    let deleted = delete_ids(ctx.conn, "mention", &ids_to_delete)?;
    debug!("Removed {deleted} misplaced or duplicate mentions");
    Ok(())
}

pub fn reaction_cleanup(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute("UPDATE sms SET reactions = NULL WHERE remote_deleted = 1", [])?;
    Ok(())
}

pub fn capabilities_refactor(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "ALTER TABLE recipient ADD COLUMN capabilities INTEGER DEFAULT 0;
         UPDATE recipient SET capabilities = 1 WHERE gv2_capability = 1;
         UPDATE recipient SET capabilities = 2 WHERE gv2_capability = -1;",
    )?;
    Ok(())
}
