use serde::{Deserialize, Serialize};

/// A message we sent a retry receipt for and are still waiting on.
/// `(author, sent_timestamp)` identifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReceipt {
    pub id: i64,
    pub author: String,
    pub device: i32,
    pub sent_timestamp: i64,
    pub received_timestamp: i64,
    pub thread_id: i64,
}

/// Where a store stands relative to this build's schema history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaStatus {
    /// `None` when no database file exists yet.
    pub persisted: Option<u32>,
    pub current: u32,
    pub minimum: u32,
}

impl SchemaStatus {
    pub fn pending(&self) -> u32 {
        match self.persisted {
            Some(version) if version >= self.minimum => self.current.saturating_sub(version),
            _ => 0,
        }
    }
}
