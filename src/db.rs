use anyhow::{anyhow, Context, Result};
use rusqlite::{Connection, OptionalExtension, Params, Row, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::secret::DatabaseSecret;

/// The encrypted store connection. One per process, created by
/// [`crate::open_or_migrate`] and handed to consumers by reference.
#[derive(Debug)]
pub struct Db {
    conn: Connection,
    path: PathBuf,
}

/// One row of `sqlite_master`, used to compare schema shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    pub kind: String,
    pub name: String,
    pub table: String,
    pub sql: Option<String>,
}

impl Db {
    pub fn open(path: &Path, secret: &DatabaseSecret, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        let mut passphrase = secret.as_passphrase();
        let keyed = conn.pragma_update(None, "key", &passphrase);
        zeroize::Zeroize::zeroize(&mut passphrase);
        keyed?;

        // SQLCipher only notices a wrong key on the first read.
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
            .map_err(|e| anyhow!("Store could not be decrypted (wrong key or corrupt file): {e}"))?;
        conn.busy_timeout(busy_timeout)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        Ok(self.conn.execute(sql, params)?)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        Ok(self.conn.execute_batch(sql)?)
    }

    pub fn for_each_row<P, F>(&self, sql: &str, params: P, f: F) -> Result<usize>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> Result<()>,
    {
        for_each_row(&self.conn, sql, params, f)
    }

    /// Starts the exclusive write transaction every migration runs in.
    /// Dropping it without `commit` rolls everything back.
    pub fn transaction(&mut self) -> rusqlite::Result<Transaction<'_>> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
    }

    pub fn persisted_version(&self) -> Result<u32> {
        persisted_version(&self.conn)
    }

    pub fn set_persisted_version(&self, version: u32) -> Result<()> {
        Ok(set_persisted_version(&self.conn, version)?)
    }

    pub fn schema_objects(&self) -> Result<Vec<SchemaObject>> {
        schema_objects(&self.conn)
    }

    /// True when nothing but SQLite's own bookkeeping exists yet.
    pub fn is_blank(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE name NOT LIKE 'sqlite_%'",
            [],
            |row| row.get(0),
        )?;
        Ok(count == 0)
    }
}

/// Streams the rows of `sql` through `f`. The prepared statement lives only
/// for the duration of the call, so every exit path releases it.
pub fn for_each_row<P, F>(conn: &Connection, sql: &str, params: P, mut f: F) -> Result<usize>
where
    P: Params,
    F: FnMut(&Row<'_>) -> Result<()>,
{
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut seen = 0;
    while let Some(row) = rows.next()? {
        f(row)?;
        seen += 1;
    }
    Ok(seen)
}

pub fn persisted_version(conn: &Connection) -> Result<u32> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    u32::try_from(version).map_err(|_| anyhow!("Corrupt schema version {version}"))
}

pub fn set_persisted_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.pragma_update(None, "user_version", version)
}

fn object_exists(conn: &Connection, kind: &str, name: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2",
            (kind, name),
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    object_exists(conn, "table", name)
}

pub fn index_exists(conn: &Connection, name: &str) -> Result<bool> {
    object_exists(conn, "index", name)
}

pub fn trigger_exists(conn: &Connection, name: &str) -> Result<bool> {
    object_exists(conn, "trigger", name)
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut found = false;
    for_each_row(
        conn,
        "SELECT name FROM pragma_table_info(?1)",
        [table],
        |row| {
            let name: String = row.get(0)?;
            if name == column {
                found = true;
            }
            Ok(())
        },
    )?;
    Ok(found)
}

pub fn schema_objects(conn: &Connection) -> Result<Vec<SchemaObject>> {
    let mut stmt = conn.prepare(
        "SELECT type, name, tbl_name, sql FROM sqlite_master
         WHERE name NOT LIKE 'sqlite_%'
         ORDER BY type, name",
    )?;
    let objects = stmt
        .query_map([], |row| {
            Ok(SchemaObject {
                kind: row.get(0)?,
                name: row.get(1)?,
                table: row.get(2)?,
                sql: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(objects)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn test_secret() -> DatabaseSecret {
        DatabaseSecret::new(vec![7u8; 32])
    }

    pub fn open_temp(dir: &Path) -> Db {
        Db::open(&dir.join("test.db"), &test_secret(), Duration::from_millis(100)).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_version_slot_roundtrip() {
        let temp = tempdir().unwrap();
        let db = open_temp(temp.path());
        assert_eq!(db.persisted_version().unwrap(), 0);
        db.set_persisted_version(57).unwrap();
        assert_eq!(db.persisted_version().unwrap(), 57);
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let temp = tempdir().unwrap();
        {
            let db = open_temp(temp.path());
            db.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        }
        let wrong = DatabaseSecret::new(vec![8u8; 32]);
        let result = Db::open(&temp.path().join("test.db"), &wrong, Duration::from_millis(100));
        assert!(result.is_err());
    }

    #[test]
    fn test_introspection_helpers() {
        let temp = tempdir().unwrap();
        let db = open_temp(temp.path());
        assert!(db.is_blank().unwrap());
        db.execute_batch(
            "CREATE TABLE t (x INTEGER, y TEXT);
             CREATE INDEX t_x_index ON t (x);
             CREATE TRIGGER t_trim AFTER DELETE ON t BEGIN SELECT 1; END;",
        )
        .unwrap();

        let conn = db.conn();
        assert!(!db.is_blank().unwrap());
        assert!(table_exists(conn, "t").unwrap());
        assert!(!table_exists(conn, "u").unwrap());
        assert!(index_exists(conn, "t_x_index").unwrap());
        assert!(trigger_exists(conn, "t_trim").unwrap());
        assert!(column_exists(conn, "t", "y").unwrap());
        assert!(!column_exists(conn, "t", "z").unwrap());
        assert_eq!(db.schema_objects().unwrap().len(), 3);
    }

    #[test]
    fn test_for_each_row_stops_on_error() {
        let temp = tempdir().unwrap();
        let db = open_temp(temp.path());
        db.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1), (2), (3);")
            .unwrap();

        let mut visited = Vec::new();
        let result = db.for_each_row("SELECT x FROM t ORDER BY x", [], |row| {
            let x: i64 = row.get(0)?;
            if x == 2 {
                return Err(anyhow!("boom"));
            }
            visited.push(x);
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(visited, vec![1]);

        // The statement from the failed scan is gone; the connection is usable.
        db.execute("DELETE FROM t", []).unwrap();
    }
}
