use anyhow::Result;
use log::{debug, info};
use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::migration::executor::{backfill, create_if_missing, ObjectKind};
use crate::migration::step::StepContext;
use crate::wire;

/// Built-in chat colour id; custom colours get positive ids in `chat_colors`.
const BUILT_IN_CHAT_COLORS_ID: i64 = -1;

/// Legacy contact colour name to the ARGB of the built-in chat colour it became.
const CHAT_COLOR_FOR_LEGACY: [(&str, u32); 18] = [
    ("crimson", 0xFFCF163E),
    ("red", 0xFFCF163E),
    ("vermillion", 0xFFC73F0A),
    ("deep_orange", 0xFFC73F0A),
    ("burlap", 0xFF6F6A58),
    ("brown", 0xFF6F6A58),
    ("forest", 0xFF3B7845),
    ("green", 0xFF3B7845),
    ("wintergreen", 0xFF1D8663),
    ("teal", 0xFF077D92),
    ("blue", 0xFF336BA3),
    ("indigo", 0xFF6058CA),
    ("violet", 0xFF9932C8),
    ("purple", 0xFF9932C8),
    ("plum", 0xFFAA377A),
    ("taupe", 0xFF8F616A),
    ("steel", 0xFF71717F),
    ("ultramarine", 0xFF315FF4),
];

const AVATAR_COLORS: [&str; 12] = [
    "A100", "A110", "A120", "A130", "A140", "A150", "A160", "A170", "A180", "A190", "A200", "A210",
];

pub fn chat_colors(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "ALTER TABLE recipient ADD COLUMN chat_colors BLOB DEFAULT NULL;
         ALTER TABLE recipient ADD COLUMN custom_chat_colors_id INTEGER DEFAULT 0;
         CREATE TABLE chat_colors (_id INTEGER PRIMARY KEY AUTOINCREMENT,chat_colors BLOB);",
    )?;

    let mut updated = 0;
    for (legacy, argb) in CHAT_COLOR_FOR_LEGACY {
        updated += ctx.conn.execute(
            "UPDATE recipient SET chat_colors = ?1, custom_chat_colors_id = ?2 WHERE color = ?3 AND group_id is NULL",
            (wire::encode_single_chat_color(argb), BUILT_IN_CHAT_COLORS_ID, legacy),
        )?;
    }
    debug!("Assigned chat colors to {updated} contacts");
    Ok(())
}

pub fn avatar_colors(ctx: &StepContext<'_>) -> Result<()> {
    let mut rng = rand::thread_rng();
    let stats = backfill(
        ctx.conn,
        "SELECT _id FROM recipient WHERE color IS NULL",
        [],
        "UPDATE recipient SET color = ?1 WHERE _id = ?2",
        |row| {
            let color = AVATAR_COLORS.choose(&mut rng).copied().unwrap_or(AVATAR_COLORS[0]);
            Ok(Some((color, row.get::<_, i64>(0)?)))
        },
    )?;
    debug!("Assigned avatar colors to {} recipients", stats.updated);
    Ok(())
}

pub fn emoji_search(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("CREATE VIRTUAL TABLE emoji_search USING fts5(label, emoji UNINDEXED)")?;
    Ok(())
}

/// Sender key tables plus the retry receipt queue. Some stores received
/// these tables from a build that never bumped the version, so the whole
/// step is skipped when `sender_keys` is already there.
pub fn sender_key(ctx: &StepContext<'_>) -> Result<()> {
    let created = create_if_missing(
        ctx.conn,
        ObjectKind::Table,
        "sender_keys",
        "CREATE TABLE sender_keys (_id INTEGER PRIMARY KEY AUTOINCREMENT, recipient_id INTEGER NOT NULL, device INTEGER NOT NULL, distribution_id TEXT NOT NULL, record BLOB NOT NULL, created_at INTEGER NOT NULL, UNIQUE(recipient_id, device, distribution_id) ON CONFLICT REPLACE)",
    )?;
    if !created {
        info!("sender_keys already present, skipping sender key setup");
        return Ok(());
    }

    ctx.conn.execute_batch(
        "CREATE TABLE sender_key_shared (_id INTEGER PRIMARY KEY AUTOINCREMENT, distribution_id TEXT NOT NULL, address TEXT NOT NULL, device INTEGER NOT NULL, UNIQUE(distribution_id, address, device) ON CONFLICT REPLACE);
         CREATE TABLE pending_retry_receipts (_id INTEGER PRIMARY KEY AUTOINCREMENT, author TEXT NOT NULL, device INTEGER NOT NULL, sent_timestamp INTEGER NOT NULL, received_timestamp TEXT NOT NULL, thread_id INTEGER NOT NULL, UNIQUE(author, sent_timestamp) ON CONFLICT REPLACE);
         ALTER TABLE groups ADD COLUMN distribution_id TEXT DEFAULT NULL;
         CREATE UNIQUE INDEX IF NOT EXISTS group_distribution_id_index ON groups (distribution_id);",
    )?;

    let stats = backfill(
        ctx.conn,
        "SELECT group_id FROM groups WHERE LENGTH(group_id) = 85",
        [],
        "UPDATE groups SET distribution_id = ?1 WHERE group_id = ?2",
        |row| Ok(Some((Uuid::new_v4().to_string(), row.get::<_, String>(0)?))),
    )?;
    debug!("Assigned distribution ids to {} v2 groups", stats.updated);
    Ok(())
}

pub fn message_dupe_index(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "DROP INDEX sms_date_sent_index;
         CREATE INDEX sms_date_sent_index on sms(date_sent, address, thread_id);
         DROP INDEX mms_date_sent_index;
         CREATE INDEX mms_date_sent_index on mms(date, address, thread_id);",
    )?;
    Ok(())
}

pub fn message_log(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "CREATE TABLE message_send_log (_id INTEGER PRIMARY KEY, date_sent INTEGER NOT NULL, content BLOB NOT NULL, related_message_id INTEGER DEFAULT -1, is_related_message_mms INTEGER DEFAULT 0, content_hint INTEGER NOT NULL, group_id BLOB DEFAULT NULL);
         CREATE INDEX message_log_date_sent_index ON message_send_log (date_sent);
         CREATE INDEX message_log_related_message_index ON message_send_log (related_message_id, is_related_message_mms);
         CREATE TRIGGER msl_sms_delete AFTER DELETE ON sms BEGIN DELETE FROM message_send_log WHERE related_message_id = old._id AND is_related_message_mms = 0; END;
         CREATE TRIGGER msl_mms_delete AFTER DELETE ON mms BEGIN DELETE FROM message_send_log WHERE related_message_id = old._id AND is_related_message_mms = 1; END;
         CREATE TABLE message_send_log_recipients (_id INTEGER PRIMARY KEY, message_send_log_id INTEGER NOT NULL REFERENCES message_send_log (_id) ON DELETE CASCADE, recipient_id INTEGER NOT NULL, device INTEGER NOT NULL);
         CREATE INDEX message_send_log_recipients_recipient_index ON message_send_log_recipients (recipient_id, device);",
    )?;
    Ok(())
}

/// Replaces the single send log table with payload, recipient and message
/// tables.
pub fn message_log_2(ctx: &StepContext<'_>) -> Result<()> {
    ctx.conn.execute_batch(
        "DROP TABLE message_send_log;
         DROP INDEX IF EXISTS message_log_date_sent_index;
         DROP INDEX IF EXISTS message_log_related_message_index;
         DROP TRIGGER msl_sms_delete;
         DROP TRIGGER msl_mms_delete;
         DROP TABLE message_send_log_recipients;
         DROP INDEX IF EXISTS message_send_log_recipients_recipient_index;

         CREATE TABLE msl_payload (_id INTEGER PRIMARY KEY, date_sent INTEGER NOT NULL, content BLOB NOT NULL, content_hint INTEGER NOT NULL);
         CREATE INDEX msl_payload_date_sent_index ON msl_payload (date_sent);

         CREATE TABLE msl_recipient (_id INTEGER PRIMARY KEY, payload_id INTEGER NOT NULL REFERENCES msl_payload (_id) ON DELETE CASCADE, recipient_id INTEGER NOT NULL, device INTEGER NOT NULL);
         CREATE INDEX msl_recipient_recipient_index ON msl_recipient (recipient_id, device, payload_id);
         CREATE INDEX msl_recipient_payload_index ON msl_recipient (payload_id);

         CREATE TABLE msl_message (_id INTEGER PRIMARY KEY, payload_id INTEGER NOT NULL REFERENCES msl_payload (_id) ON DELETE CASCADE, message_id INTEGER NOT NULL, is_mms INTEGER NOT NULL);
         CREATE INDEX msl_message_message_index ON msl_message (message_id, is_mms, payload_id);

         CREATE TRIGGER msl_sms_delete AFTER DELETE ON sms BEGIN DELETE FROM msl_payload WHERE _id IN (SELECT payload_id FROM msl_message WHERE message_id = old._id AND is_mms = 0); END;
         CREATE TRIGGER msl_mms_delete AFTER DELETE ON mms BEGIN DELETE FROM msl_payload WHERE _id IN (SELECT payload_id FROM msl_message WHERE message_id = old._id AND is_mms = 1); END;
         CREATE TRIGGER msl_attachment_delete AFTER DELETE ON part BEGIN DELETE FROM msl_payload WHERE _id IN (SELECT payload_id FROM msl_message WHERE message_id = old.mid AND is_mms = 1); END;",
    )?;
    Ok(())
}
