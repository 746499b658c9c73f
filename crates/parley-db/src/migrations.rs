//! Embedded SQL migration runner.
//!
//! Migrations are SQL files embedded at compile time. They run sequentially
//! on startup, tracked by the `_parley_migrations` table. Each migration
//! runs exactly once. A migration that has already been applied is skipped.

use rusqlite::Connection;
use thiserror::Error;

/// A single embedded migration.
struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. New migrations are appended here.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_init",
        sql: include_str!("migrations/000_init.sql"),
    },
    Migration {
        name: "001_calls",
        sql: include_str!("migrations/001_calls.sql"),
    },
    Migration {
        name: "002_call_transcripts",
        sql: include_str!("migrations/002_call_transcripts.sql"),
    },
];

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Runs all pending migrations against the given connection.
///
/// Migrations that have already been applied (tracked in `_parley_migrations`)
/// are skipped. New migrations are applied in order and recorded.
///
/// # Errors
///
/// Returns `MigrationError` if any migration fails to execute or if the
/// migration tracking table cannot be queried.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    run_migrations_from_list(conn, MIGRATIONS)
}

const BOOTSTRAP_SQL: &str = include_str!("migrations/000_init.sql");

fn run_migrations_from_list(
    conn: &Connection,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    conn.execute_batch(BOOTSTRAP_SQL)
        .map_err(|source| MigrationError::ExecutionFailed {
            name: "_parley_migrations_bootstrap".to_string(),
            source,
        })?;

    let mut applied = 0;
    for migration in migrations {
        if is_applied(conn, migration.name)? {
            tracing::debug!(migration = migration.name, "migration already applied");
            continue;
        }

        tracing::info!(migration = migration.name, "applying migration");
        apply(conn, migration).map_err(|source| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source,
        })?;
        applied += 1;
    }

    Ok(applied)
}

fn is_applied(conn: &Connection, name: &str) -> Result<bool, MigrationError> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM _parley_migrations WHERE name = ?1",
        [name],
        |row| row.get(0),
    )
    .map_err(MigrationError::StateQuery)
}

/// Applies one migration and records it, atomically.
fn apply(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _parley_migrations (name) VALUES (?1)",
        [migration.name],
    )?;
    tx.commit()
}
