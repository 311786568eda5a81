use anyhow::Result;
use rusqlite::Row;

use crate::db::Db;
use crate::models::PendingReceipt;

/// Accessor for the pending retry receipt table. Conflicts on
/// `(author, sent_timestamp)` replace the older row.
pub struct PendingReceiptStore<'a> {
    db: &'a Db,
}

impl<'a> PendingReceiptStore<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    pub fn insert(
        &self,
        author: &str,
        device: i32,
        sent_timestamp: i64,
        received_timestamp: i64,
        thread_id: i64,
    ) -> Result<PendingReceipt> {
        self.db.execute(
            "INSERT OR REPLACE INTO pending_retry_receipts
             (author, device, sent_timestamp, received_timestamp, thread_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (author, device, sent_timestamp, received_timestamp, thread_id),
        )?;

        Ok(PendingReceipt {
            id: self.db.conn().last_insert_rowid(),
            author: author.to_string(),
            device,
            sent_timestamp,
            received_timestamp,
            thread_id,
        })
    }

    pub fn get_all(&self) -> Result<Vec<PendingReceipt>> {
        let mut receipts = Vec::new();
        // received_timestamp has TEXT affinity, so integers come back as text.
        self.db.for_each_row(
            "SELECT _id, author, device, sent_timestamp,
                    CAST(received_timestamp AS INTEGER), thread_id
             FROM pending_retry_receipts",
            [],
            |row| {
                receipts.push(from_row(row)?);
                Ok(())
            },
        )?;
        Ok(receipts)
    }

    pub fn delete(&self, receipt: &PendingReceipt) -> Result<()> {
        self.db
            .execute("DELETE FROM pending_retry_receipts WHERE _id = ?1", [receipt.id])?;
        Ok(())
    }
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<PendingReceipt> {
    Ok(PendingReceipt {
        id: row.get(0)?,
        author: row.get(1)?,
        device: row.get(2)?,
        sent_timestamp: row.get(3)?,
        received_timestamp: row.get(4)?,
        thread_id: row.get(5)?,
    })
}
