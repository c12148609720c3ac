//! Versioned schema migrations.
//!
//! Applied in order at open time. Each migration runs inside its own
//! transaction together with the `schema_version` insert, so a failed
//! migration leaves no trace and an applied one is never re-run.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Result, StoreError};

/// A single schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, oldest first.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "project keys",
        sql: "CREATE TABLE IF NOT EXISTS project_keys (
                project_id TEXT PRIMARY KEY,
                salt BLOB NOT NULL,
                verification_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
    },
    Migration {
        version: 2,
        description: "environment keys",
        sql: "CREATE TABLE IF NOT EXISTS environment_keys (
                project_id TEXT NOT NULL,
                environment TEXT NOT NULL,
                salt BLOB NOT NULL,
                verification_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (project_id, environment)
            );
            CREATE INDEX IF NOT EXISTS idx_environment_keys_project
                ON environment_keys(project_id);",
    },
    Migration {
        version: 3,
        description: "per-entry kdf parameters",
        sql: "ALTER TABLE environment_keys
                ADD COLUMN kdf_algorithm TEXT NOT NULL DEFAULT 'argon2id';
            ALTER TABLE environment_keys
                ADD COLUMN kdf_iterations INTEGER NOT NULL DEFAULT 3;
            ALTER TABLE environment_keys
                ADD COLUMN kdf_memory INTEGER NOT NULL DEFAULT 65536;
            ALTER TABLE environment_keys
                ADD COLUMN kdf_parallelism INTEGER NOT NULL DEFAULT 4;",
    },
];

/// Highest version in `MIGRATIONS`.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Highest applied version, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<u32> {
    ensure_version_table(conn)?;
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Apply every migration newer than the current version.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    apply(conn, MIGRATIONS)
}

pub(crate) fn apply(conn: &mut Connection, migrations: &[Migration]) -> Result<()> {
    let current = current_version(conn)?;
    debug!(current, latest = latest_version(), "checking schema");

    for migration in migrations.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|source| StoreError::Migration {
                version: migration.version,
                source,
            })?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, strftime('%s','now'))",
            params![migration.version],
        )
        .map_err(|source| StoreError::Migration {
            version: migration.version,
            source,
        })?;
        tx.commit()?;

        info!(
            version = migration.version,
            description = migration.description,
            "applied schema migration"
        );
    }

    Ok(())
}

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        );",
    )?;
    Ok(())
}
