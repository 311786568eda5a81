//! Every schema step since the oldest supported version, in order.
//!
//! Steps are append-only. Once a version has shipped its step body must not
//! change; fixes go into a new step.

pub mod baseline;
mod v040_v059;
mod v060_v079;
mod v080_v099;
mod v100_v106;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

use super::step::MigrationStep;
use super::step::StepKind::{DataBackfill, ExternalSideEffect, GuardedCreate, SchemaChange};
use crate::security;

pub const GV1_PREFIX: &str = "__textsecure_group__!";
pub const GV2_PREFIX: &str = "__signal_group__v2__!";

const GV2_MIGRATION_INFO: &[u8] = b"GV2 Migration";

/// Fresh random storage service key, base64 of 16 bytes.
pub(crate) fn random_storage_key() -> String {
    STANDARD.encode(security::random_bytes::<16>())
}

/// Deterministic v2 id a v1 group will move to, derived from its raw id.
pub(crate) fn derive_v2_migration_id(gv1_raw: &[u8]) -> String {
    let master_key = Sha256::new()
        .chain_update(GV2_MIGRATION_INFO)
        .chain_update(gv1_raw)
        .finalize();
    let identifier = Sha256::digest(master_key);
    format!("{GV2_PREFIX}{}", security::hex_encode(&identifier))
}

pub fn steps() -> Vec<MigrationStep> {
    use v040_v059::*;
    use v060_v079::*;
    use v080_v099::*;
    use v100_v106::*;

    vec![
        MigrationStep::new(40, "resumable_downloads", SchemaChange, resumable_downloads),
        MigrationStep::new(41, "key_value_store", SchemaChange, key_value_store),
        MigrationStep::new(42, "attachment_display_order", SchemaChange, attachment_display_order),
        MigrationStep::new(43, "split_profile_names", SchemaChange, split_profile_names),
        MigrationStep::new(44, "sticker_pack_order", SchemaChange, sticker_pack_order),
        MigrationStep::new(45, "megaphones", SchemaChange, megaphones),
        MigrationStep::new(46, "megaphone_first_appearance", SchemaChange, megaphone_first_appearance),
        MigrationStep::new(47, "profile_key_to_db", DataBackfill, profile_key_to_db),
        MigrationStep::new(48, "profile_key_credentials", SchemaChange, profile_key_credentials),
        MigrationStep::new(49, "attachment_file_index", GuardedCreate, attachment_file_index),
        MigrationStep::new(50, "storage_service_active", DataBackfill, storage_service_active),
        MigrationStep::new(51, "groups_v2_recipient_capability", SchemaChange, groups_v2_recipient_capability),
        MigrationStep::new(52, "transfer_file_cleanup", ExternalSideEffect, transfer_file_cleanup),
        MigrationStep::new(53, "profile_data_migration", DataBackfill, profile_data_migration),
        MigrationStep::new(54, "avatar_location_migration", ExternalSideEffect, avatar_location_migration),
        MigrationStep::new(55, "groups_v2", SchemaChange, groups_v2),
        MigrationStep::new(56, "attachment_upload_timestamp", SchemaChange, attachment_upload_timestamp),
        MigrationStep::new(57, "attachment_cdn_number", SchemaChange, attachment_cdn_number),
        MigrationStep::new(58, "job_input_data", SchemaChange, job_input_data),
        MigrationStep::new(59, "server_timestamp", SchemaChange, server_timestamp),
        MigrationStep::new(60, "remote_delete", SchemaChange, remote_delete),
        MigrationStep::new(61, "color_migration", DataBackfill, color_migration),
        MigrationStep::new(62, "last_scrolled", SchemaChange, last_scrolled),
        MigrationStep::new(63, "last_profile_fetch", SchemaChange, last_profile_fetch),
        MigrationStep::new(64, "server_delivered_timestamp", SchemaChange, server_delivered_timestamp),
        MigrationStep::new(65, "quote_cleanup", ExternalSideEffect, quote_cleanup),
        MigrationStep::new(66, "borderless", SchemaChange, borderless),
        MigrationStep::new(67, "remapped_records", SchemaChange, remapped_records),
        MigrationStep::new(68, "mentions", SchemaChange, mentions),
        MigrationStep::new(69, "pinned_conversations", SchemaChange, pinned_conversations),
        MigrationStep::new(70, "mention_global_setting_migration", DataBackfill, mention_global_setting_migration),
        MigrationStep::new(71, "unknown_storage_fields", SchemaChange, unknown_storage_fields),
        MigrationStep::new(72, "sticker_content_type", SchemaChange, sticker_content_type),
        MigrationStep::new(73, "sticker_emoji_in_notifications", SchemaChange, sticker_emoji_in_notifications),
        MigrationStep::new(74, "thumbnail_cleanup", ExternalSideEffect, thumbnail_cleanup),
        MigrationStep::new(75, "sticker_content_type_cleanup", DataBackfill, sticker_content_type_cleanup),
        MigrationStep::new(76, "mention_cleanup", DataBackfill, mention_cleanup),
        MigrationStep::new(77, "mention_cleanup_v2", DataBackfill, mention_cleanup_v2),
        MigrationStep::new(78, "reaction_cleanup", DataBackfill, reaction_cleanup),
        MigrationStep::new(79, "capabilities_refactor", DataBackfill, capabilities_refactor),
        MigrationStep::new(80, "gv1_migration", DataBackfill, gv1_migration),
        MigrationStep::new(81, "notified_timestamp", SchemaChange, notified_timestamp),
        MigrationStep::new(82, "gv1_migration_last_seen", SchemaChange, gv1_migration_last_seen),
        MigrationStep::new(83, "viewed_receipts", SchemaChange, viewed_receipts),
        MigrationStep::new(84, "clean_up_gv1_ids", DataBackfill, clean_up_gv1_ids),
        MigrationStep::new(85, "gv1_migration_refactor", DataBackfill, gv1_migration_refactor),
        MigrationStep::new(86, "clear_profile_key_credentials", DataBackfill, clear_profile_key_credentials),
        MigrationStep::new(87, "last_reset_session_time", SchemaChange, last_reset_session_time),
        MigrationStep::new(88, "wallpaper", SchemaChange, wallpaper),
        MigrationStep::new(89, "about", SchemaChange, about),
        MigrationStep::new(90, "split_system_names", DataBackfill, split_system_names),
        MigrationStep::new(91, "payments", SchemaChange, payments),
        MigrationStep::new(92, "clean_storage_ids", DataBackfill, clean_storage_ids),
        MigrationStep::new(93, "mp4_gif_support", SchemaChange, mp4_gif_support),
        MigrationStep::new(94, "blur_avatars", DataBackfill, blur_avatars),
        MigrationStep::new(95, "clean_storage_ids_without_info", DataBackfill, clean_storage_ids_without_info),
        MigrationStep::new(96, "clean_reaction_notifications", DataBackfill, clean_reaction_notifications),
        MigrationStep::new(97, "storage_service_refactor", DataBackfill, storage_service_refactor),
        MigrationStep::new(98, "clear_mms_storage_ids", DataBackfill, clear_mms_storage_ids),
        MigrationStep::new(99, "server_guid", SchemaChange, server_guid),
        MigrationStep::new(100, "chat_colors", DataBackfill, chat_colors),
        MigrationStep::new(101, "avatar_colors", DataBackfill, avatar_colors),
        MigrationStep::new(102, "emoji_search", SchemaChange, emoji_search),
        MigrationStep::new(103, "sender_key", GuardedCreate, sender_key),
        MigrationStep::new(104, "message_dupe_index", SchemaChange, message_dupe_index),
        MigrationStep::new(105, "message_log", SchemaChange, message_log),
        MigrationStep::new(106, "message_log_2", SchemaChange, message_log_2),
    ]
}
