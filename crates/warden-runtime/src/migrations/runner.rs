//! Schema migrations for the coordination database.
//!
//! Only the master owns the schema, and the advisory lock keeps two nodes
//! that both believe they are master from migrating concurrently.

use std::collections::HashSet;
use std::path::Path;

use sqlx::PgPool;
use tracing::{debug, info, warn};
use warden_core::error::{Result, WardenError};

/// Advisory lock guarding schema changes ("WARDEN" in ASCII).
const MIGRATION_LOCK_ID: i64 = 0x5741_5244_454E;

/// A single migration.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Unique name, e.g. "0000_warden_internal".
    pub name: String,
    /// SQL to execute.
    pub sql: String,
}

impl Migration {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// Applies built-in and extra migrations exactly once.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations under the advisory lock.
    pub async fn run(&self, extra_migrations: Vec<Migration>) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| WardenError::Database(format!("Failed to acquire connection: {}", e)))?;

        // Session-level advisory locks belong to the connection, so lock,
        // migrate and unlock on the same one.
        debug!("Acquiring migration lock...");
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_ID)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                WardenError::Database(format!("Failed to acquire migration lock: {}", e))
            })?;

        let result = self.run_pending(&mut conn, extra_migrations).await;

        if let Err(e) = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_ID)
            .execute(&mut *conn)
            .await
        {
            warn!("Failed to release migration lock: {}", e);
        }

        result
    }

    async fn run_pending(
        &self,
        conn: &mut sqlx::PgConnection,
        extra_migrations: Vec<Migration>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS warden_migrations (
                id SERIAL PRIMARY KEY,
                name VARCHAR(255) UNIQUE NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| WardenError::Database(format!("Failed to create migrations table: {}", e)))?;

        let applied: HashSet<String> =
            sqlx::query_as::<_, (String,)>("SELECT name FROM warden_migrations")
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| {
                    WardenError::Database(format!("Failed to get applied migrations: {}", e))
                })?
                .into_iter()
                .map(|(name,)| name)
                .collect();
        debug!("Already applied migrations: {:?}", applied);

        let builtin = super::builtin::get_builtin_migrations();
        for migration in builtin.into_iter().chain(extra_migrations) {
            if !applied.contains(&migration.name) {
                apply_migration(conn, &migration).await?;
            }
        }

        Ok(())
    }
}

async fn apply_migration(conn: &mut sqlx::PgConnection, migration: &Migration) -> Result<()> {
    info!("Applying migration: {}", migration.name);

    let mut tx = sqlx::Connection::begin(&mut *conn)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?;

    for statement in split_sql_statements(&migration.sql) {
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                WardenError::Database(format!(
                    "Failed to apply migration '{}': {}",
                    migration.name, e
                ))
            })?;
    }

    sqlx::query("INSERT INTO warden_migrations (name) VALUES ($1)")
        .bind(&migration.name)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            WardenError::Database(format!(
                "Failed to record migration '{}': {}",
                migration.name, e
            ))
        })?;

    tx.commit()
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?;

    info!("Migration applied: {}", migration.name);
    Ok(())
}

/// Split SQL into statements on `;`, ignoring semicolons inside quoted
/// literals and dropping `--` line comments.
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_literal = false;

    for line in sql.lines() {
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if !in_literal && c == '-' && chars.peek() == Some(&'-') {
                break;
            }
            if c == '\'' {
                in_literal = !in_literal;
            }
            if c == ';' && !in_literal {
                push_statement(&mut statements, &current);
                current.clear();
                continue;
            }
            current.push(c);
        }
        current.push('\n');
    }

    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let stmt = raw.trim();
    if !stmt.is_empty() {
        statements.push(stmt.to_string());
    }
}

/// Load extra migrations from a directory, sorted by file name.
pub fn load_migrations_from_dir(dir: &Path) -> Result<Vec<Migration>> {
    if !dir.exists() {
        debug!("Migrations directory does not exist: {:?}", dir);
        return Ok(Vec::new());
    }

    let mut migrations = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if path.extension().map(|e| e == "sql").unwrap_or(false) {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| WardenError::Config("Invalid migration filename".into()))?
                .to_string();

            let sql = std::fs::read_to_string(&path)?;
            migrations.push(Migration::new(name, sql));
        }
    }

    migrations.sort_by(|a, b| a.name.cmp(&b.name));

    debug!("Loaded {} extra migrations", migrations.len());
    Ok(migrations)
}
