//! SQLite-backed key store.
//!
//! A single connection behind a mutex serializes every read and write;
//! SQLite is treated as single-writer.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::backup::Progress;
use rusqlite::{params, Connection, DatabaseName, ErrorCode, OptionalExtension, Row};
use tracing::{debug, info};

use super::{migrations, KeyStore};
use crate::core::domain::{EnvironmentKeyEntry, KdfParams, KeyEntry, Salt};
use crate::core::types::scope_key;
use crate::error::{Result, StoreError};

/// Key store persisted in an embedded SQLite database.
pub struct SqliteKeyStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteKeyStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteKeyStore {
    /// Open (or create) the database at `path` and bring its schema up to date.
    ///
    /// The parent directory is created with 0700 and the database file
    /// restricted to 0600 on Unix.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the file cannot be opened or a migration fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), "opening key store");

        let mut conn = Self::open_connection(&path)?;
        migrations::migrate(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrations::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Applied schema version.
    pub fn schema_version(&self) -> Result<u32> {
        migrations::current_version(&*self.lock()?)
    }

    fn open_connection(path: &Path) -> Result<Connection> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(StoreError::WriteFailed)?;
                // Only directories created here are made private.
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                        .map_err(StoreError::WriteFailed)?;
                }
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA busy_timeout=5000; PRAGMA secure_delete=ON;")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .map_err(StoreError::WriteFailed)?;
        }

        Ok(conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::LockPoisoned.into())
    }
}

struct ProjectRow {
    project_id: String,
    salt: Vec<u8>,
    verification_hash: String,
    created_at: i64,
    updated_at: i64,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            project_id: row.get(0)?,
            salt: row.get(1)?,
            verification_hash: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    fn into_entry(self) -> Result<KeyEntry> {
        Ok(KeyEntry {
            salt: Salt::from_slice(&self.salt)?,
            created_at: timestamp(self.created_at)?,
            updated_at: timestamp(self.updated_at)?,
            project_id: self.project_id,
            verification_hash: self.verification_hash,
        })
    }
}

struct EnvironmentRow {
    project: ProjectRow,
    environment: String,
    kdf: KdfParams,
}

impl EnvironmentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            project: ProjectRow {
                project_id: row.get(0)?,
                salt: row.get(2)?,
                verification_hash: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            },
            environment: row.get(1)?,
            kdf: KdfParams {
                algorithm: row.get(6)?,
                iterations: row.get(7)?,
                memory_kib: row.get(8)?,
                parallelism: row.get(9)?,
            },
        })
    }

    fn into_entry(self) -> Result<EnvironmentKeyEntry> {
        let base = self.project.into_entry()?;
        Ok(EnvironmentKeyEntry {
            project_id: base.project_id,
            environment: self.environment,
            salt: base.salt,
            verification_hash: base.verification_hash,
            created_at: base.created_at,
            updated_at: base.updated_at,
            kdf: self.kdf,
        })
    }
}

const ENVIRONMENT_COLUMNS: &str = "project_id, environment, salt, verification_hash, \
     created_at, updated_at, kdf_algorithm, kdf_iterations, kdf_memory, kdf_parallelism";

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", secs)).into())
}

/// How a row write treats an existing row with the same natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
    Upsert,
    InsertOnly,
}

impl SqliteKeyStore {
    fn write_project(&self, entry: &KeyEntry, mode: Write) -> Result<()> {
        let on_conflict = match mode {
            Write::Upsert => {
                "ON CONFLICT(project_id) DO UPDATE SET
                    salt = excluded.salt,
                    verification_hash = excluded.verification_hash,
                    updated_at = excluded.updated_at"
            }
            Write::InsertOnly => "",
        };

        let conn = self.lock()?;
        let result = conn.execute(
            &format!(
                "INSERT INTO project_keys
                    (project_id, salt, verification_hash, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5) {}",
                on_conflict
            ),
            params![
                entry.project_id,
                entry.salt.as_bytes().to_vec(),
                entry.verification_hash,
                entry.created_at.timestamp(),
                Utc::now().timestamp(),
            ],
        );
        insert_result(result, || entry.project_id.clone())?;
        debug!(project = %entry.project_id, ?mode, "stored project key");
        Ok(())
    }

    fn write_environment(&self, entry: &EnvironmentKeyEntry, mode: Write) -> Result<()> {
        let on_conflict = match mode {
            Write::Upsert => {
                "ON CONFLICT(project_id, environment) DO UPDATE SET
                    salt = excluded.salt,
                    verification_hash = excluded.verification_hash,
                    updated_at = excluded.updated_at,
                    kdf_algorithm = excluded.kdf_algorithm,
                    kdf_iterations = excluded.kdf_iterations,
                    kdf_memory = excluded.kdf_memory,
                    kdf_parallelism = excluded.kdf_parallelism"
            }
            Write::InsertOnly => "",
        };

        let conn = self.lock()?;
        let result = conn.execute(
            &format!(
                "INSERT INTO environment_keys ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) {}",
                ENVIRONMENT_COLUMNS, on_conflict
            ),
            params![
                entry.project_id,
                entry.environment,
                entry.salt.as_bytes().to_vec(),
                entry.verification_hash,
                entry.created_at.timestamp(),
                Utc::now().timestamp(),
                entry.kdf.algorithm,
                entry.kdf.iterations,
                entry.kdf.memory_kib,
                entry.kdf.parallelism,
            ],
        );
        insert_result(result, || scope_key(&entry.project_id, Some(&entry.environment)))?;
        debug!(
            project = %entry.project_id,
            env = %entry.environment,
            ?mode,
            "stored environment key"
        );
        Ok(())
    }
}

/// Map a primary key conflict to `StoreError::AlreadyExists`.
fn insert_result<F>(result: rusqlite::Result<usize>, id: F) -> Result<()>
where
    F: FnOnce() -> String,
{
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == ErrorCode::ConstraintViolation =>
        {
            Err(StoreError::AlreadyExists(id()).into())
        }
        Err(e) => Err(e.into()),
    }
}

impl KeyStore for SqliteKeyStore {
    fn store_key(&self, entry: &KeyEntry) -> Result<()> {
        self.write_project(entry, Write::Upsert)
    }

    fn create_key(&self, entry: &KeyEntry) -> Result<()> {
        self.write_project(entry, Write::InsertOnly)
    }

    fn get_key(&self, project_id: &str) -> Result<KeyEntry> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT project_id, salt, verification_hash, created_at, updated_at
                 FROM project_keys WHERE project_id = ?1",
                params![project_id],
                ProjectRow::from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::ProjectNotFound(project_id.to_string()))?;
        row.into_entry()
    }

    fn delete_key(&self, project_id: &str) -> Result<()> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM project_keys WHERE project_id = ?1",
            params![project_id],
        )?;
        if deleted == 0 {
            return Err(StoreError::ProjectNotFound(project_id.to_string()).into());
        }
        info!(project = %project_id, "deleted project key");
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<KeyEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT project_id, salt, verification_hash, created_at, updated_at
             FROM project_keys ORDER BY project_id",
        )?;
        let rows = stmt
            .query_map([], ProjectRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ProjectRow::into_entry).collect()
    }

    fn store_environment_key(&self, entry: &EnvironmentKeyEntry) -> Result<()> {
        self.write_environment(entry, Write::Upsert)
    }

    fn create_environment_key(&self, entry: &EnvironmentKeyEntry) -> Result<()> {
        self.write_environment(entry, Write::InsertOnly)
    }

    fn get_environment_key(
        &self,
        project_id: &str,
        environment: &str,
    ) -> Result<EnvironmentKeyEntry> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM environment_keys WHERE project_id = ?1 AND environment = ?2",
                    ENVIRONMENT_COLUMNS
                ),
                params![project_id, environment],
                EnvironmentRow::from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::EnvironmentNotFound {
                project: project_id.to_string(),
                environment: environment.to_string(),
            })?;
        row.into_entry()
    }

    fn delete_environment_key(&self, project_id: &str, environment: &str) -> Result<()> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM environment_keys WHERE project_id = ?1 AND environment = ?2",
            params![project_id, environment],
        )?;
        if deleted == 0 {
            return Err(StoreError::EnvironmentNotFound {
                project: project_id.to_string(),
                environment: environment.to_string(),
            }
            .into());
        }
        info!(project = %project_id, env = %environment, "deleted environment key");
        Ok(())
    }

    fn list_environment_keys(&self, project_id: &str) -> Result<Vec<EnvironmentKeyEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM environment_keys WHERE project_id = ?1 ORDER BY environment",
            ENVIRONMENT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![project_id], EnvironmentRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(EnvironmentRow::into_entry).collect()
    }

    fn backup(&self, dest: &Path) -> Result<()> {
        let conn = self.lock()?;
        conn.backup(DatabaseName::Main, dest, None)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dest, fs::Permissions::from_mode(0o600))
                .map_err(StoreError::WriteFailed)?;
        }

        info!(dest = %dest.display(), "key store backed up");
        Ok(())
    }

    fn restore(&self, src: &Path) -> Result<()> {
        if !src.is_file() {
            return Err(StoreError::BackupNotFound(src.display().to_string()).into());
        }

        let mut conn = self.lock()?;
        conn.restore(DatabaseName::Main, src, None::<fn(Progress)>)?;

        if let Some(path) = &self.path {
            *conn = Self::open_connection(path)?;
        }
        migrations::migrate(&mut conn)?;

        info!(src = %src.display(), "key store restored");
        Ok(())
    }
}
