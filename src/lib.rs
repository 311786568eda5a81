//! Encrypted on-device message store with a versioned schema history.
//!
//! [`open_or_migrate`] is the only way to get a [`db::Db`]: it creates the
//! store on first use and upgrades older stores before handing it out.

pub mod config;
pub mod db;
pub mod files;
pub mod keystore;
pub mod legacy_prefs;
pub mod logger;
pub mod migration;
pub mod models;
pub mod paths;
pub mod receipts;
pub mod sanitize;
pub mod secret;
pub mod security;
pub mod wire;

pub use migration::{current_schema_version, open_or_migrate, MigrationError};
