//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "core_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS user_profile (
                user_id TEXT PRIMARY KEY,
                avatar_url TEXT,
                bio TEXT,
                locale TEXT NOT NULL DEFAULT 'en',
                timezone TEXT,
                location TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                notification_settings TEXT NOT NULL DEFAULT '{}',
                personalized_settings TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_portrait (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                data TEXT NOT NULL,
                version TEXT,
                source TEXT,
                calculated_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_user_portrait_user ON user_portrait(user_id);
            CREATE INDEX IF NOT EXISTS idx_user_portrait_calculated ON user_portrait(calculated_at);

            CREATE TABLE IF NOT EXISTS user_memories (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                channel_label TEXT NOT NULL,
                ref_id TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                type TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                due_date TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                labels TEXT NOT NULL DEFAULT '[]',
                tags TEXT NOT NULL DEFAULT '[]',
                priority INTEGER NOT NULL DEFAULT 0,
                description TEXT,
                statistics TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (channel_label, ref_id)
            );
            CREATE INDEX IF NOT EXISTS idx_user_memories_user ON user_memories(user_id);
            CREATE INDEX IF NOT EXISTS idx_user_memories_type ON user_memories(type);
            CREATE INDEX IF NOT EXISTS idx_user_memories_status ON user_memories(status);
            CREATE INDEX IF NOT EXISTS idx_user_memories_priority ON user_memories(priority);

            CREATE TABLE IF NOT EXISTS inbound_messages (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                channel_label TEXT NOT NULL,
                ref_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (channel_label, ref_id)
            );
            CREATE INDEX IF NOT EXISTS idx_inbound_messages_status ON inbound_messages(status);
            CREATE INDEX IF NOT EXISTS idx_inbound_messages_user ON inbound_messages(user_id);

            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                configuration TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_agents_created_by ON agents(created_by);
        "#,
    },
    Migration {
        version: 2,
        name: "integrations",
        sql: r#"
            CREATE TABLE IF NOT EXISTS oauth_providers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                logo TEXT,
                config TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS oauth_connections (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider_id TEXT NOT NULL REFERENCES oauth_providers(id) ON DELETE CASCADE,
                credentials TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                expires_at TEXT,
                error_message TEXT,
                error_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (user_id, provider_id)
            );
            CREATE INDEX IF NOT EXISTS idx_oauth_connections_user ON oauth_connections(user_id);
            CREATE INDEX IF NOT EXISTS idx_oauth_connections_status ON oauth_connections(status);

            CREATE TABLE IF NOT EXISTS device_tokens (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                token TEXT NOT NULL,
                platform TEXT NOT NULL,
                device_name TEXT,
                last_used_at INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                is_trusted INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (user_id, device_id)
            );
            CREATE INDEX IF NOT EXISTS idx_device_tokens_user ON device_tokens(user_id);
            CREATE INDEX IF NOT EXISTS idx_device_tokens_platform ON device_tokens(platform);
        "#,
    },
    Migration {
        version: 3,
        name: "billing_jobs_invites",
        sql: r#"
            CREATE TABLE IF NOT EXISTS user_orders (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                subscription_id TEXT NOT NULL,
                plan_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                currency TEXT NOT NULL DEFAULT 'USD',
                status TEXT NOT NULL DEFAULT 'pending',
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                auto_renew INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_user_orders_user ON user_orders(user_id);
            CREATE INDEX IF NOT EXISTS idx_user_orders_status ON user_orders(status);

            CREATE TABLE IF NOT EXISTS user_jobs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                job_type TEXT NOT NULL DEFAULT 'task_generation',
                status TEXT NOT NULL DEFAULT 'pending',
                context TEXT NOT NULL DEFAULT '{}',
                result TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_user_jobs_user ON user_jobs(user_id);
            CREATE INDEX IF NOT EXISTS idx_user_jobs_status ON user_jobs(status);
            CREATE INDEX IF NOT EXISTS idx_user_jobs_type ON user_jobs(job_type);

            CREATE TABLE IF NOT EXISTS invite_codes (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                identifier TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                used_at TEXT,
                expires_at TEXT,
                created_at TEXT NOT NULL,
                created_by TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_invite_codes_status ON invite_codes(status);
            CREATE INDEX IF NOT EXISTS idx_invite_codes_identifier ON invite_codes(identifier);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist. Safe to call on
/// every startup — applied versions are skipped.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::debug!(
        version = MIGRATIONS.last().map(|m| m.version).unwrap_or(0),
        "Database migrations complete"
    );
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
