//! Runs individual steps and hosts the helpers step bodies are written with.

use anyhow::Result;
use log::{debug, warn};
use rusqlite::{Connection, Params, Row};

use super::error::MigrationError;
use super::step::{MigrationStep, StepContext, StepKind};
use crate::db;

const SIDE_EFFECT_SAVEPOINT: &str = "external_side_effect";

/// Executes `step` against the open migration transaction.
///
/// Failures of schema, backfill and guarded-create steps are returned and must
/// abort the run. External side effects run inside a savepoint: if one fails,
/// its database writes are undone, the failure is logged and the run goes on.
pub fn run_step(ctx: &StepContext<'_>, step: &MigrationStep) -> Result<(), MigrationError> {
    debug!(
        "Applying migration {} ({}, {})",
        step.target_version, step.name, step.kind
    );

    match step.kind {
        StepKind::SchemaChange | StepKind::DataBackfill | StepKind::GuardedCreate => {
            (step.action)(ctx).map_err(|source| MigrationError::StepFailed {
                version: step.target_version,
                name: step.name,
                kind: step.kind,
                source,
            })
        }
        StepKind::ExternalSideEffect => run_contained(ctx, step),
    }
}

fn run_contained(ctx: &StepContext<'_>, step: &MigrationStep) -> Result<(), MigrationError> {
    ctx.conn
        .execute_batch(&format!("SAVEPOINT {SIDE_EFFECT_SAVEPOINT}"))?;

    match (step.action)(ctx) {
        Ok(()) => {
            ctx.conn
                .execute_batch(&format!("RELEASE {SIDE_EFFECT_SAVEPOINT}"))?;
        }
        Err(err) => {
            ctx.conn.execute_batch(&format!(
                "ROLLBACK TO {SIDE_EFFECT_SAVEPOINT}; RELEASE {SIDE_EFFECT_SAVEPOINT}"
            ))?;
            warn!(
                "External side effect of migration {} ({}) failed and was skipped: {:#}",
                step.target_version, step.name, err
            );
        }
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillStats {
    pub scanned: usize,
    pub updated: usize,
}

/// Scans `select`, asks `derive` for new parameters per row and applies them
/// with `update`. Rows for which `derive` returns `None` are left alone.
///
/// The full row set is read before the first write so updates never disturb
/// the scan. Any error fails the whole step.
pub fn backfill<P, T, F>(
    conn: &Connection,
    select: &str,
    params: P,
    update: &str,
    mut derive: F,
) -> Result<BackfillStats>
where
    P: Params,
    T: Params,
    F: FnMut(&Row<'_>) -> Result<Option<T>>,
{
    let mut pending = Vec::new();
    let scanned = db::for_each_row(conn, select, params, |row| {
        if let Some(values) = derive(row)? {
            pending.push(values);
        }
        Ok(())
    })?;

    let mut stmt = conn.prepare(update)?;
    let mut updated = 0;
    for values in pending {
        updated += stmt.execute(values)?;
    }

    debug!("Backfill scanned {scanned} rows and updated {updated}");
    Ok(BackfillStats { scanned, updated })
}

/// Collects the integer ids `select` yields.
pub fn collect_ids<P: Params>(conn: &Connection, select: &str, params: P) -> Result<Vec<i64>> {
    let mut ids = Vec::new();
    db::for_each_row(conn, select, params, |row| {
        ids.push(row.get(0)?);
        Ok(())
    })?;
    Ok(ids)
}

/// Deletes rows of `table` by `_id`, returning how many went away.
pub fn delete_ids(conn: &Connection, table: &str, ids: &[i64]) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut stmt = conn.prepare(&format!("DELETE FROM {table} WHERE _id = ?1"))?;
    let mut deleted = 0;
    for id in ids {
        deleted += stmt.execute([id])?;
    }
    Ok(deleted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    Index,
    Trigger,
}

/// Runs `ddl` only when `sqlite_master` has no `kind` object called `name`.
/// Returns whether anything was created.
pub fn create_if_missing(conn: &Connection, kind: ObjectKind, name: &str, ddl: &str) -> Result<bool> {
    let exists = match kind {
        ObjectKind::Table => db::table_exists(conn, name)?,
        ObjectKind::Index => db::index_exists(conn, name)?,
        ObjectKind::Trigger => db::trigger_exists(conn, name)?,
    };
    if exists {
        debug!("{name} already exists, not creating it");
        return Ok(false);
    }
    conn.execute_batch(ddl)?;
    Ok(true)
}
