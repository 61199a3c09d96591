//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. All JSON columns are stored
//! as text; all datetimes are RFC 3339 strings.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::channels::Channel;
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::model::{
    AgentRecord, ConnectionStatus, DeviceToken, InboundMessage, InboundStatus, InviteCode,
    InviteStatus, JobStatus, MemoryRecord, MemoryStatus, MemoryType, OAuthConnection,
    OAuthProvider, UserJob, UserOrder, UserPortrait, UserProfile,
};
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_datetime(dt: Option<DateTime<Utc>>) -> libsql::Value {
    match dt {
        Some(dt) => libsql::Value::Text(dt.to_rfc3339()),
        None => libsql::Value::Null,
    }
}

/// Serialize a JSON column value.
fn to_json<T: Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// Deserialize a JSON column, falling back to `Default` on bad data.
fn from_json_or_default<T: serde::de::DeserializeOwned + Default>(s: Option<String>) -> T {
    s.as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

/// Map an execution error, detecting UNIQUE violations.
fn map_exec_err(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

fn query_err(op: &str, e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(format!("{op}: {e}"))
}

// ── Row mappers ─────────────────────────────────────────────────────

const PROFILE_COLUMNS: &str = "user_id, avatar_url, bio, locale, timezone, location, metadata, \
     notification_settings, personalized_settings, created_at, updated_at";

fn row_to_profile(row: &libsql::Row) -> Result<UserProfile, libsql::Error> {
    let location_str: Option<String> = row.get(5).ok();
    let created_str: String = row.get(9)?;
    let updated_str: String = row.get(10)?;

    Ok(UserProfile {
        user_id: row.get(0)?,
        avatar_url: row.get(1).ok(),
        bio: row.get(2).ok(),
        locale: row.get(3)?,
        timezone: row.get(4).ok(),
        location: location_str.as_deref().and_then(|s| serde_json::from_str(s).ok()),
        metadata: from_json_or_default(row.get(6).ok()),
        notification_settings: from_json_or_default(row.get(7).ok()),
        personalized_settings: from_json_or_default(row.get(8).ok()),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const PORTRAIT_COLUMNS: &str =
    "id, user_id, data, version, source, calculated_at, created_at, updated_at";

fn row_to_portrait(row: &libsql::Row) -> Result<UserPortrait, libsql::Error> {
    let calculated_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;

    Ok(UserPortrait {
        id: row.get(0)?,
        user_id: row.get(1)?,
        data: from_json_or_default(row.get(2).ok()),
        version: row.get(3).ok(),
        source: row.get(4).ok(),
        calculated_at: parse_datetime(&calculated_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const MEMORY_COLUMNS: &str = "id, user_id, channel_label, ref_id, metadata, type, title, content, \
     due_date, status, labels, tags, priority, description, statistics, created_at, updated_at";

fn row_to_memory(row: &libsql::Row) -> Result<MemoryRecord, DatabaseError> {
    let channel_str: String = row.get(2).map_err(|e| query_err("memory row", e))?;
    let channel = Channel::from_str(&channel_str)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

    let type_str: String = row.get(5).map_err(|e| query_err("memory row", e))?;
    let kind = MemoryType::parse(&type_str).ok_or_else(|| {
        DatabaseError::Serialization(format!("unknown memory type '{type_str}'"))
    })?;

    let due_str: Option<String> = row.get(8).ok();
    let status_str: String = row.get(9).map_err(|e| query_err("memory row", e))?;
    let created_str: String = row.get(15).map_err(|e| query_err("memory row", e))?;
    let updated_str: String = row.get(16).map_err(|e| query_err("memory row", e))?;

    Ok(MemoryRecord {
        id: row.get(0).map_err(|e| query_err("memory row", e))?,
        user_id: row.get(1).map_err(|e| query_err("memory row", e))?,
        channel,
        ref_id: row.get(3).map_err(|e| query_err("memory row", e))?,
        metadata: from_json_or_default(row.get(4).ok()),
        kind,
        title: row.get(6).map_err(|e| query_err("memory row", e))?,
        content: from_json_or_default(row.get(7).ok()),
        due_date: parse_optional_datetime(&due_str),
        status: MemoryStatus::parse(&status_str),
        labels: from_json_or_default(row.get(10).ok()),
        tags: from_json_or_default(row.get(11).ok()),
        priority: row.get(12).map_err(|e| query_err("memory row", e))?,
        description: row.get(13).ok(),
        statistics: from_json_or_default(row.get(14).ok()),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const INBOUND_COLUMNS: &str =
    "id, user_id, channel_label, ref_id, payload, status, error_message, created_at, updated_at";

fn row_to_inbound(row: &libsql::Row) -> Result<InboundMessage, DatabaseError> {
    let channel_str: String = row.get(2).map_err(|e| query_err("inbound row", e))?;
    let channel = Channel::from_str(&channel_str)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

    let payload_str: String = row.get(4).map_err(|e| query_err("inbound row", e))?;
    let payload: Value = serde_json::from_str(&payload_str)
        .map_err(|e| DatabaseError::Serialization(format!("inbound payload: {e}")))?;

    let status_str: String = row.get(5).map_err(|e| query_err("inbound row", e))?;
    let created_str: String = row.get(7).map_err(|e| query_err("inbound row", e))?;
    let updated_str: String = row.get(8).map_err(|e| query_err("inbound row", e))?;

    Ok(InboundMessage {
        id: row.get(0).map_err(|e| query_err("inbound row", e))?,
        user_id: row.get(1).map_err(|e| query_err("inbound row", e))?,
        channel,
        ref_id: row.get(3).map_err(|e| query_err("inbound row", e))?,
        payload,
        status: InboundStatus::parse(&status_str),
        error_message: row.get(6).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const AGENT_COLUMNS: &str =
    "id, name, description, configuration, is_active, created_by, created_at, updated_at";

fn row_to_agent(row: &libsql::Row) -> Result<AgentRecord, DatabaseError> {
    let config_str: String = row.get(3).map_err(|e| query_err("agent row", e))?;
    let configuration = serde_json::from_str(&config_str)
        .map_err(|e| DatabaseError::Serialization(format!("agent configuration: {e}")))?;

    let is_active: i64 = row.get(4).map_err(|e| query_err("agent row", e))?;
    let created_str: String = row.get(6).map_err(|e| query_err("agent row", e))?;
    let updated_str: String = row.get(7).map_err(|e| query_err("agent row", e))?;

    Ok(AgentRecord {
        id: row.get(0).map_err(|e| query_err("agent row", e))?,
        name: row.get(1).map_err(|e| query_err("agent row", e))?,
        description: row.get(2).ok(),
        configuration,
        is_active: is_active != 0,
        created_by: row.get(5).map_err(|e| query_err("agent row", e))?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const PROVIDER_COLUMNS: &str =
    "id, name, display_name, logo, config, is_active, created_at, updated_at";

fn row_to_provider(row: &libsql::Row) -> Result<OAuthProvider, DatabaseError> {
    let config_str: String = row.get(4).map_err(|e| query_err("provider row", e))?;
    let config = serde_json::from_str(&config_str)
        .map_err(|e| DatabaseError::Serialization(format!("provider config: {e}")))?;

    let is_active: i64 = row.get(5).map_err(|e| query_err("provider row", e))?;
    let created_str: String = row.get(6).map_err(|e| query_err("provider row", e))?;
    let updated_str: String = row.get(7).map_err(|e| query_err("provider row", e))?;

    Ok(OAuthProvider {
        id: row.get(0).map_err(|e| query_err("provider row", e))?,
        name: row.get(1).map_err(|e| query_err("provider row", e))?,
        display_name: row.get(2).map_err(|e| query_err("provider row", e))?,
        logo: row.get(3).ok(),
        config,
        is_active: is_active != 0,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const CONNECTION_COLUMNS: &str = "id, user_id, provider_id, credentials, status, expires_at, \
     error_message, error_count, created_at, updated_at";

fn row_to_connection(row: &libsql::Row) -> Result<OAuthConnection, libsql::Error> {
    let status_str: String = row.get(4)?;
    let expires_str: Option<String> = row.get(5).ok();
    let created_str: String = row.get(8)?;
    let updated_str: String = row.get(9)?;

    Ok(OAuthConnection {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider_id: row.get(2)?,
        credentials: from_json_or_default(row.get(3).ok()),
        status: ConnectionStatus::parse(&status_str),
        expires_at: parse_optional_datetime(&expires_str),
        error_message: row.get(6).ok(),
        error_count: row.get(7)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const DEVICE_COLUMNS: &str = "id, user_id, device_id, token, platform, device_name, last_used_at, \
     is_active, is_trusted, metadata, created_at, updated_at";

fn row_to_device(row: &libsql::Row) -> Result<DeviceToken, libsql::Error> {
    let is_active: i64 = row.get(7)?;
    let is_trusted: i64 = row.get(8)?;
    let created_str: String = row.get(10)?;
    let updated_str: String = row.get(11)?;

    Ok(DeviceToken {
        id: row.get(0)?,
        user_id: row.get(1)?,
        device_id: row.get(2)?,
        token: row.get(3)?,
        platform: row.get(4)?,
        device_name: row.get(5).ok(),
        last_used_at: row.get(6)?,
        is_active: is_active != 0,
        is_trusted: is_trusted != 0,
        metadata: from_json_or_default(row.get(9).ok()),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const ORDER_COLUMNS: &str = "id, user_id, subscription_id, plan_id, amount, currency, status, \
     start_date, end_date, auto_renew, metadata, created_at, updated_at";

fn row_to_order(row: &libsql::Row) -> Result<UserOrder, DatabaseError> {
    let amount_str: String = row.get(4).map_err(|e| query_err("order row", e))?;
    let amount: Decimal = amount_str
        .parse()
        .map_err(|e| DatabaseError::Serialization(format!("order amount '{amount_str}': {e}")))?;

    let status_str: String = row.get(6).map_err(|e| query_err("order row", e))?;
    let start_str: String = row.get(7).map_err(|e| query_err("order row", e))?;
    let end_str: String = row.get(8).map_err(|e| query_err("order row", e))?;
    let auto_renew: i64 = row.get(9).map_err(|e| query_err("order row", e))?;
    let created_str: String = row.get(11).map_err(|e| query_err("order row", e))?;
    let updated_str: String = row.get(12).map_err(|e| query_err("order row", e))?;

    Ok(UserOrder {
        id: row.get(0).map_err(|e| query_err("order row", e))?,
        user_id: row.get(1).map_err(|e| query_err("order row", e))?,
        subscription_id: row.get(2).map_err(|e| query_err("order row", e))?,
        plan_id: row.get(3).map_err(|e| query_err("order row", e))?,
        amount,
        currency: row.get(5).map_err(|e| query_err("order row", e))?,
        status: crate::store::model::OrderStatus::parse(&status_str),
        start_date: parse_datetime(&start_str),
        end_date: parse_datetime(&end_str),
        auto_renew: auto_renew != 0,
        metadata: from_json_or_default(row.get(10).ok()),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const JOB_COLUMNS: &str = "id, user_id, job_type, status, context, result, error_message, \
     created_at, updated_at, completed_at";

fn row_to_job(row: &libsql::Row) -> Result<UserJob, libsql::Error> {
    let status_str: String = row.get(3)?;
    let result_str: Option<String> = row.get(5).ok();
    let created_str: String = row.get(7)?;
    let updated_str: String = row.get(8)?;
    let completed_str: Option<String> = row.get(9).ok();

    Ok(UserJob {
        id: row.get(0)?,
        user_id: row.get(1)?,
        job_type: row.get(2)?,
        status: JobStatus::parse(&status_str),
        context: from_json_or_default(row.get(4).ok()),
        result: result_str.as_deref().and_then(|s| serde_json::from_str(s).ok()),
        error_message: row.get(6).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
        completed_at: parse_optional_datetime(&completed_str),
    })
}

const INVITE_COLUMNS: &str =
    "id, code, identifier, status, used_at, expires_at, created_at, created_by";

fn row_to_invite(row: &libsql::Row) -> Result<InviteCode, libsql::Error> {
    let status_str: String = row.get(3)?;
    let used_str: Option<String> = row.get(4).ok();
    let expires_str: Option<String> = row.get(5).ok();
    let created_str: String = row.get(6)?;

    Ok(InviteCode {
        id: row.get(0)?,
        code: row.get(1)?,
        identifier: row.get(2).ok(),
        status: InviteStatus::parse(&status_str),
        used_at: parse_optional_datetime(&used_str),
        expires_at: parse_optional_datetime(&expires_str),
        created_at: parse_datetime(&created_str),
        created_by: row.get(7).ok(),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Profiles & portraits ────────────────────────────────────────

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError> {
        let location = match &profile.location {
            Some(loc) => Some(to_json(loc)?),
            None => None,
        };
        self.conn()
            .execute(
                "INSERT INTO user_profile (user_id, avatar_url, bio, locale, timezone, location,
                    metadata, notification_settings, personalized_settings, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT (user_id) DO UPDATE SET
                    avatar_url = excluded.avatar_url,
                    bio = excluded.bio,
                    locale = excluded.locale,
                    timezone = excluded.timezone,
                    location = excluded.location,
                    metadata = excluded.metadata,
                    notification_settings = excluded.notification_settings,
                    personalized_settings = excluded.personalized_settings,
                    updated_at = excluded.updated_at",
                params![
                    profile.user_id.as_str(),
                    opt_text(profile.avatar_url.as_deref()),
                    opt_text(profile.bio.as_deref()),
                    profile.locale.as_str(),
                    opt_text(profile.timezone.as_deref()),
                    opt_text(location.as_deref()),
                    to_json(&profile.metadata)?,
                    to_json(&profile.notification_settings)?,
                    to_json(&profile.personalized_settings)?,
                    profile.created_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_exec_err("upsert_profile", e))?;
        debug!(user_id = %profile.user_id, "Profile upserted");
        Ok(())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PROFILE_COLUMNS} FROM user_profile WHERE user_id = ?1"),
                params![user_id],
            )
            .await
            .map_err(|e| query_err("get_profile", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_profile(&row).map_err(|e| query_err("get_profile row", e))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(query_err("get_profile", e)),
        }
    }

    async fn upsert_portrait(&self, portrait: &UserPortrait) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO user_portrait (id, user_id, data, version, source, calculated_at,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (id) DO UPDATE SET
                    data = excluded.data,
                    version = excluded.version,
                    source = excluded.source,
                    calculated_at = excluded.calculated_at,
                    updated_at = excluded.updated_at",
                params![
                    portrait.id.as_str(),
                    portrait.user_id.as_str(),
                    to_json(&portrait.data)?,
                    opt_text(portrait.version.as_deref()),
                    opt_text(portrait.source.as_deref()),
                    portrait.calculated_at.to_rfc3339(),
                    portrait.created_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_exec_err("upsert_portrait", e))?;
        Ok(())
    }

    async fn get_latest_portrait(
        &self,
        user_id: &str,
    ) -> Result<Option<UserPortrait>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PORTRAIT_COLUMNS} FROM user_portrait WHERE user_id = ?1
                     ORDER BY calculated_at DESC LIMIT 1"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| query_err("get_latest_portrait", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_portrait(&row).map_err(|e| query_err("get_latest_portrait row", e))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(query_err("get_latest_portrait", e)),
        }
    }

    // ── Memories ────────────────────────────────────────────────────

    async fn insert_memory(&self, record: &MemoryRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO user_memories (id, user_id, channel_label, ref_id, metadata, type,
                    title, content, due_date, status, labels, tags, priority, description,
                    statistics, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    record.id.as_str(),
                    record.user_id.as_str(),
                    record.channel.label(),
                    record.ref_id.as_str(),
                    to_json(&record.metadata)?,
                    record.kind.as_str(),
                    record.title.as_str(),
                    to_json(&record.content)?,
                    opt_datetime(record.due_date),
                    record.status.as_str(),
                    to_json(&record.labels)?,
                    to_json(&record.tags)?,
                    record.priority,
                    opt_text(record.description.as_deref()),
                    to_json(&record.statistics)?,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_exec_err("insert_memory", e))?;
        debug!(id = %record.id, channel = %record.channel, ref_id = %record.ref_id, "Memory inserted");
        Ok(())
    }

    async fn get_memory_by_ref(
        &self,
        channel: Channel,
        ref_id: &str,
    ) -> Result<Option<MemoryRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MEMORY_COLUMNS} FROM user_memories
                     WHERE channel_label = ?1 AND ref_id = ?2"
                ),
                params![channel.label(), ref_id],
            )
            .await
            .map_err(|e| query_err("get_memory_by_ref", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_memory(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(query_err("get_memory_by_ref", e)),
        }
    }

    async fn list_memories(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MEMORY_COLUMNS} FROM user_memories WHERE user_id = ?1
                     ORDER BY priority DESC, created_at DESC LIMIT ?2"
                ),
                params![user_id, limit as i64],
            )
            .await
            .map_err(|e| query_err("list_memories", e))?;

        let mut memories = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_memory(&row) {
                Ok(memory) => memories.push(memory),
                Err(e) => warn!("Skipping memory row: {e}"),
            }
        }
        Ok(memories)
    }

    async fn update_memory_status(
        &self,
        id: &str,
        status: MemoryStatus,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE user_memories SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| query_err("update_memory_status", e))?;
        Ok(())
    }

    // ── Inbound messages ────────────────────────────────────────────

    async fn enqueue_inbound(&self, message: &InboundMessage) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO inbound_messages (id, user_id, channel_label, ref_id, payload,
                    status, error_message, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    message.id.as_str(),
                    message.user_id.as_str(),
                    message.channel.label(),
                    message.ref_id.as_str(),
                    to_json(&message.payload)?,
                    message.status.as_str(),
                    opt_text(message.error_message.as_deref()),
                    message.created_at.to_rfc3339(),
                    message.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_exec_err("enqueue_inbound", e))?;
        debug!(id = %message.id, channel = %message.channel, "Inbound message queued");
        Ok(())
    }

    async fn get_pending_inbound(&self) -> Result<Vec<InboundMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {INBOUND_COLUMNS} FROM inbound_messages
                     WHERE status = 'pending' ORDER BY created_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| query_err("get_pending_inbound", e))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_inbound(&row) {
                Ok(message) => messages.push(message),
                Err(e) => warn!("Skipping inbound row: {e}"),
            }
        }
        Ok(messages)
    }

    async fn update_inbound_status(
        &self,
        id: &str,
        status: InboundStatus,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE inbound_messages SET status = ?1, error_message = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![status.as_str(), opt_text(error), Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| query_err("update_inbound_status", e))?;
        debug!(id = id, status = status.as_str(), "Inbound status updated");
        Ok(())
    }

    async fn record_inbound_error(&self, id: &str, error: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE inbound_messages SET error_message = ?1, updated_at = ?2 WHERE id = ?3",
                params![error, Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| query_err("record_inbound_error", e))?;
        Ok(())
    }

    // ── Agents ──────────────────────────────────────────────────────

    async fn upsert_agent(&self, agent: &AgentRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO agents (id, name, description, configuration, is_active,
                    created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (name) DO UPDATE SET
                    description = excluded.description,
                    configuration = excluded.configuration,
                    is_active = excluded.is_active,
                    updated_at = excluded.updated_at",
                params![
                    agent.id.as_str(),
                    agent.name.as_str(),
                    opt_text(agent.description.as_deref()),
                    to_json(&agent.configuration)?,
                    agent.is_active as i64,
                    agent.created_by.as_str(),
                    agent.created_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_exec_err("upsert_agent", e))?;
        Ok(())
    }

    async fn get_agent(&self, name: &str) -> Result<Option<AgentRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE name = ?1"),
                params![name],
            )
            .await
            .map_err(|e| query_err("get_agent", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_agent(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(query_err("get_agent", e)),
        }
    }

    // ── OAuth ───────────────────────────────────────────────────────

    async fn upsert_oauth_provider(&self, provider: &OAuthProvider) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO oauth_providers (id, name, display_name, logo, config, is_active,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (name) DO UPDATE SET
                    display_name = excluded.display_name,
                    logo = excluded.logo,
                    config = excluded.config,
                    is_active = excluded.is_active,
                    updated_at = excluded.updated_at",
                params![
                    provider.id.as_str(),
                    provider.name.as_str(),
                    provider.display_name.as_str(),
                    opt_text(provider.logo.as_deref()),
                    to_json(&provider.config)?,
                    provider.is_active as i64,
                    provider.created_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_exec_err("upsert_oauth_provider", e))?;
        Ok(())
    }

    async fn get_oauth_provider(
        &self,
        name: &str,
    ) -> Result<Option<OAuthProvider>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PROVIDER_COLUMNS} FROM oauth_providers WHERE name = ?1"),
                params![name],
            )
            .await
            .map_err(|e| query_err("get_oauth_provider", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_provider(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(query_err("get_oauth_provider", e)),
        }
    }

    async fn upsert_oauth_connection(
        &self,
        connection: &OAuthConnection,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO oauth_connections (id, user_id, provider_id, credentials, status,
                    expires_at, error_message, error_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT (user_id, provider_id) DO UPDATE SET
                    credentials = excluded.credentials,
                    status = excluded.status,
                    expires_at = excluded.expires_at,
                    error_message = excluded.error_message,
                    error_count = excluded.error_count,
                    updated_at = excluded.updated_at",
                params![
                    connection.id.as_str(),
                    connection.user_id.as_str(),
                    connection.provider_id.as_str(),
                    to_json(&connection.credentials)?,
                    connection.status.as_str(),
                    opt_datetime(connection.expires_at),
                    opt_text(connection.error_message.as_deref()),
                    connection.error_count,
                    connection.created_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_exec_err("upsert_oauth_connection", e))?;
        Ok(())
    }

    async fn get_oauth_connection(
        &self,
        user_id: &str,
        provider_id: &str,
    ) -> Result<Option<OAuthConnection>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONNECTION_COLUMNS} FROM oauth_connections
                     WHERE user_id = ?1 AND provider_id = ?2"
                ),
                params![user_id, provider_id],
            )
            .await
            .map_err(|e| query_err("get_oauth_connection", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_connection(&row).map_err(|e| query_err("get_oauth_connection row", e))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(query_err("get_oauth_connection", e)),
        }
    }

    async fn record_connection_error(
        &self,
        id: &str,
        status: ConnectionStatus,
        error: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE oauth_connections
                 SET status = ?1, error_message = ?2, error_count = error_count + 1, updated_at = ?3
                 WHERE id = ?4",
                params![status.as_str(), error, Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| query_err("record_connection_error", e))?;
        Ok(())
    }

    // ── Device tokens ───────────────────────────────────────────────

    async fn register_device(&self, device: &DeviceToken) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO device_tokens (id, user_id, device_id, token, platform, device_name,
                    last_used_at, is_active, is_trusted, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT (user_id, device_id) DO UPDATE SET
                    token = excluded.token,
                    platform = excluded.platform,
                    device_name = excluded.device_name,
                    last_used_at = excluded.last_used_at,
                    is_active = excluded.is_active,
                    is_trusted = excluded.is_trusted,
                    metadata = excluded.metadata,
                    updated_at = excluded.updated_at",
                params![
                    device.id.as_str(),
                    device.user_id.as_str(),
                    device.device_id.as_str(),
                    device.token.as_str(),
                    device.platform.as_str(),
                    opt_text(device.device_name.as_deref()),
                    device.last_used_at,
                    device.is_active as i64,
                    device.is_trusted as i64,
                    to_json(&device.metadata)?,
                    device.created_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_exec_err("register_device", e))?;
        Ok(())
    }

    async fn list_devices(&self, user_id: &str) -> Result<Vec<DeviceToken>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {DEVICE_COLUMNS} FROM device_tokens
                     WHERE user_id = ?1 AND is_active = 1 ORDER BY last_used_at DESC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| query_err("list_devices", e))?;

        let mut devices = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_device(&row) {
                Ok(device) => devices.push(device),
                Err(e) => warn!("Skipping device row: {e}"),
            }
        }
        Ok(devices)
    }

    async fn deactivate_device(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE device_tokens SET is_active = 0, updated_at = ?1
                 WHERE user_id = ?2 AND device_id = ?3",
                params![Utc::now().to_rfc3339(), user_id, device_id],
            )
            .await
            .map_err(|e| query_err("deactivate_device", e))?;
        Ok(())
    }

    // ── Orders ──────────────────────────────────────────────────────

    async fn insert_order(&self, order: &UserOrder) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO user_orders (id, user_id, subscription_id, plan_id, amount, currency,
                    status, start_date, end_date, auto_renew, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    order.id.as_str(),
                    order.user_id.as_str(),
                    order.subscription_id.as_str(),
                    order.plan_id.as_str(),
                    order.amount.to_string(),
                    order.currency.as_str(),
                    order.status.as_str(),
                    order.start_date.to_rfc3339(),
                    order.end_date.to_rfc3339(),
                    order.auto_renew as i64,
                    to_json(&order.metadata)?,
                    order.created_at.to_rfc3339(),
                    order.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_exec_err("insert_order", e))?;
        Ok(())
    }

    async fn list_orders(&self, user_id: &str) -> Result<Vec<UserOrder>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ORDER_COLUMNS} FROM user_orders
                     WHERE user_id = ?1 ORDER BY created_at DESC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| query_err("list_orders", e))?;

        let mut orders = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_order(&row) {
                Ok(order) => orders.push(order),
                Err(e) => warn!("Skipping order row: {e}"),
            }
        }
        Ok(orders)
    }

    // ── Jobs ────────────────────────────────────────────────────────

    async fn create_job(&self, job: &UserJob) -> Result<(), DatabaseError> {
        let result = match &job.result {
            Some(r) => Some(to_json(r)?),
            None => None,
        };
        self.conn()
            .execute(
                "INSERT INTO user_jobs (id, user_id, job_type, status, context, result,
                    error_message, created_at, updated_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    job.id.as_str(),
                    job.user_id.as_str(),
                    job.job_type.as_str(),
                    job.status.as_str(),
                    to_json(&job.context)?,
                    opt_text(result.as_deref()),
                    opt_text(job.error_message.as_deref()),
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                    opt_datetime(job.completed_at),
                ],
            )
            .await
            .map_err(|e| map_exec_err("create_job", e))?;
        Ok(())
    }

    async fn claim_next_job(&self, job_type: &str) -> Result<Option<UserJob>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM user_jobs
                     WHERE job_type = ?1 AND status = 'pending'
                     ORDER BY created_at ASC LIMIT 1"
                ),
                params![job_type],
            )
            .await
            .map_err(|e| query_err("claim_next_job", e))?;

        let mut job = match rows.next().await {
            Ok(Some(row)) => row_to_job(&row).map_err(|e| query_err("claim_next_job row", e))?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(query_err("claim_next_job", e)),
        };

        // Conditional update guards against a concurrent claimer.
        let affected = self
            .conn()
            .execute(
                "UPDATE user_jobs SET status = 'processing', updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![Utc::now().to_rfc3339(), job.id.as_str()],
            )
            .await
            .map_err(|e| query_err("claim_next_job", e))?;

        if affected == 0 {
            return Ok(None);
        }
        job.status = JobStatus::Processing;
        Ok(Some(job))
    }

    async fn complete_job(&self, id: &str, result: &Value) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE user_jobs SET status = 'completed', result = ?1, updated_at = ?2,
                    completed_at = ?2 WHERE id = ?3",
                params![to_json(result)?, now, id],
            )
            .await
            .map_err(|e| query_err("complete_job", e))?;
        Ok(())
    }

    async fn fail_job(&self, id: &str, error: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE user_jobs SET status = 'failed', error_message = ?1, updated_at = ?2,
                    completed_at = ?2 WHERE id = ?3",
                params![error, now, id],
            )
            .await
            .map_err(|e| query_err("fail_job", e))?;
        Ok(())
    }

    // ── Invite codes ────────────────────────────────────────────────

    async fn create_invite(&self, invite: &InviteCode) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO invite_codes (id, code, identifier, status, used_at, expires_at,
                    created_at, created_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    invite.id.as_str(),
                    invite.code.as_str(),
                    opt_text(invite.identifier.as_deref()),
                    invite.status.as_str(),
                    opt_datetime(invite.used_at),
                    opt_datetime(invite.expires_at),
                    invite.created_at.to_rfc3339(),
                    opt_text(invite.created_by.as_deref()),
                ],
            )
            .await
            .map_err(|e| map_exec_err("create_invite", e))?;
        Ok(())
    }

    async fn redeem_invite(
        &self,
        code: &str,
        identifier: &str,
    ) -> Result<InviteCode, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {INVITE_COLUMNS} FROM invite_codes WHERE code = ?1"),
                params![code],
            )
            .await
            .map_err(|e| query_err("redeem_invite", e))?;

        let invite = match rows.next().await {
            Ok(Some(row)) => row_to_invite(&row).map_err(|e| query_err("redeem_invite row", e))?,
            Ok(None) => {
                return Err(DatabaseError::NotFound {
                    entity: "invite_code".into(),
                    id: code.into(),
                });
            }
            Err(e) => return Err(query_err("redeem_invite", e)),
        };

        let now = Utc::now();
        if !invite.is_redeemable(now) {
            return Err(DatabaseError::Constraint(format!(
                "invite code {code} is not redeemable (status: {})",
                invite.status.as_str()
            )));
        }

        // Conditional update guards against a concurrent redeemer.
        let affected = self
            .conn()
            .execute(
                "UPDATE invite_codes SET status = 'used', identifier = ?1, used_at = ?2
                 WHERE code = ?3 AND status = 'active'",
                params![identifier, now.to_rfc3339(), code],
            )
            .await
            .map_err(|e| query_err("redeem_invite", e))?;

        if affected == 0 {
            return Err(DatabaseError::Constraint(format!(
                "invite code {code} was redeemed concurrently"
            )));
        }

        info!(code = code, identifier = identifier, "Invite code redeemed");
        Ok(InviteCode {
            identifier: Some(identifier.to_string()),
            status: InviteStatus::Used,
            used_at: Some(now),
            ..invite
        })
    }

    async fn expire_invites(&self) -> Result<usize, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE invite_codes SET status = 'expired'
                 WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at < ?1",
                params![Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| query_err("expire_invites", e))?;

        if count > 0 {
            info!(count, "Expired invite codes");
        }
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::{
        InboundMessage, MemoryContent, OAuthCredentials, OrderStatus, PortraitData,
    };
    use std::collections::BTreeMap;

    async fn backend() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_memory(id: &str, ref_id: &str) -> MemoryRecord {
        let now = Utc::now();
        MemoryRecord {
            id: id.into(),
            user_id: "u1".into(),
            channel: Channel::Gmail,
            ref_id: ref_id.into(),
            metadata: BTreeMap::new(),
            kind: MemoryType::Action,
            title: "Pay the invoice".into(),
            content: MemoryContent {
                text: Some("Review and pay the invoice before 18:00.".into()),
                keywords: vec!["invoice".into(), "payment".into(), "due".into()],
                summary: Some("Settle the outstanding invoice.".into()),
                suggestions: vec!["Open the billing page".into()],
                importance_rating: Some(88),
                ..Default::default()
            },
            due_date: None,
            status: MemoryStatus::Active,
            labels: vec!["intraday".into(), "high".into(), "email".into()],
            tags: vec![],
            priority: 4,
            description: None,
            statistics: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn profile_upsert_and_get() {
        let db = backend().await;

        let mut profile = UserProfile::empty("u1");
        profile.timezone = Some("Europe/Berlin".into());
        profile
            .metadata
            .insert("name".into(), Value::String("Alice".into()));
        profile.personalized_settings.exclude_keywords = vec!["Uber".into()];
        db.upsert_profile(&profile).await.unwrap();

        let loaded = db.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(loaded.timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(loaded.metadata_str("name"), Some("Alice"));
        assert_eq!(loaded.personalized_settings.exclude_keywords, vec!["Uber"]);

        // Upsert replaces
        profile.locale = "de".into();
        db.upsert_profile(&profile).await.unwrap();
        let loaded = db.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(loaded.locale, "de");

        assert!(db.get_profile("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_portrait_wins() {
        let db = backend().await;
        let now = Utc::now();

        for (id, hours_ago) in [("p-old", 5), ("p-new", 1)] {
            let portrait = UserPortrait {
                id: id.into(),
                user_id: "u1".into(),
                data: PortraitData::default(),
                version: Some("v1".into()),
                source: Some("scheduled_job".into()),
                calculated_at: now - chrono::Duration::hours(hours_ago),
                created_at: now,
                updated_at: now,
            };
            db.upsert_portrait(&portrait).await.unwrap();
        }

        let latest = db.get_latest_portrait("u1").await.unwrap().unwrap();
        assert_eq!(latest.id, "p-new");
    }

    #[tokio::test]
    async fn memory_insert_get_and_duplicate() {
        let db = backend().await;
        db.insert_memory(&make_memory("m1", "ref-1")).await.unwrap();

        let loaded = db
            .get_memory_by_ref(Channel::Gmail, "ref-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.title, "Pay the invoice");
        assert_eq!(loaded.kind, MemoryType::Action);
        assert_eq!(loaded.priority, 4);
        assert_eq!(loaded.content.importance_rating, Some(88));
        assert_eq!(loaded.content.keywords.len(), 3);

        // Same channel+ref with a different id must be rejected
        let err = db.insert_memory(&make_memory("m2", "ref-1")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn memory_list_ordered_by_priority() {
        let db = backend().await;
        let mut low = make_memory("m-low", "ref-low");
        low.priority = 1;
        let mut high = make_memory("m-high", "ref-high");
        high.priority = 5;
        db.insert_memory(&low).await.unwrap();
        db.insert_memory(&high).await.unwrap();

        let memories = db.list_memories("u1", 10).await.unwrap();
        assert_eq!(memories.len(), 2);
        assert_eq!(memories[0].id, "m-high");
    }

    #[tokio::test]
    async fn memory_status_update() {
        let db = backend().await;
        db.insert_memory(&make_memory("m1", "ref-1")).await.unwrap();
        db.update_memory_status("m1", MemoryStatus::Done).await.unwrap();

        let loaded = db
            .get_memory_by_ref(Channel::Gmail, "ref-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, MemoryStatus::Done);
    }

    #[tokio::test]
    async fn inbound_queue_lifecycle() {
        let db = backend().await;
        let msg = InboundMessage::new(
            "u1",
            Channel::Gmail,
            "mail-1",
            serde_json::json!({"snippet": "hello"}),
        );
        db.enqueue_inbound(&msg).await.unwrap();

        let pending = db.get_pending_inbound().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].ref_id, "mail-1");
        assert_eq!(pending[0].payload["snippet"], "hello");

        // Error recording keeps the message pending
        db.record_inbound_error(&msg.id, "model unavailable").await.unwrap();
        let pending = db.get_pending_inbound().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].error_message.as_deref(), Some("model unavailable"));

        db.update_inbound_status(&msg.id, InboundStatus::Processed, None)
            .await
            .unwrap();
        assert!(db.get_pending_inbound().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn inbound_duplicate_ref_rejected() {
        let db = backend().await;
        let payload = serde_json::json!({});
        db.enqueue_inbound(&InboundMessage::new("u1", Channel::Notion, "page-1", payload.clone()))
            .await
            .unwrap();
        let err = db
            .enqueue_inbound(&InboundMessage::new("u2", Channel::Notion, "page-1", payload))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn oauth_connection_unique_per_user_provider() {
        let db = backend().await;
        let now = Utc::now();
        let mut connection = OAuthConnection {
            id: "c1".into(),
            user_id: "u1".into(),
            provider_id: "google".into(),
            credentials: OAuthCredentials {
                access_token: Some("at-1".into()),
                ..Default::default()
            },
            status: ConnectionStatus::Active,
            expires_at: None,
            error_message: None,
            error_count: 0,
            created_at: now,
            updated_at: now,
        };
        db.upsert_oauth_connection(&connection).await.unwrap();

        // Same user+provider upserts in place (conflict target is the pair)
        connection.credentials.access_token = Some("at-2".into());
        db.upsert_oauth_connection(&connection).await.unwrap();

        let loaded = db
            .get_oauth_connection("u1", "google")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.credentials.access_token.as_deref(), Some("at-2"));

        db.record_connection_error("c1", ConnectionStatus::Error, "token revoked")
            .await
            .unwrap();
        let loaded = db
            .get_oauth_connection("u1", "google")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, ConnectionStatus::Error);
        assert_eq!(loaded.error_count, 1);
        assert_eq!(loaded.error_message.as_deref(), Some("token revoked"));
    }

    #[tokio::test]
    async fn device_register_and_deactivate() {
        let db = backend().await;
        let now = Utc::now();
        let device = DeviceToken {
            id: "d1".into(),
            user_id: "u1".into(),
            device_id: "iphone-1".into(),
            token: "apns-token".into(),
            platform: "ios".into(),
            device_name: Some("Alice's iPhone".into()),
            last_used_at: now.timestamp_millis(),
            is_active: true,
            is_trusted: false,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        };
        db.register_device(&device).await.unwrap();
        assert_eq!(db.list_devices("u1").await.unwrap().len(), 1);

        db.deactivate_device("u1", "iphone-1").await.unwrap();
        assert!(db.list_devices("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn order_amount_round_trips() {
        let db = backend().await;
        let now = Utc::now();
        let order = UserOrder {
            id: "ORD-2026-001".into(),
            user_id: "u1".into(),
            subscription_id: "sub-1".into(),
            plan_id: "pro".into(),
            amount: "12.50".parse().unwrap(),
            currency: "USD".into(),
            status: OrderStatus::Active,
            start_date: now,
            end_date: now + chrono::Duration::days(30),
            auto_renew: true,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        };
        db.insert_order(&order).await.unwrap();

        let orders = db.list_orders("u1").await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].amount.to_string(), "12.50");
        assert_eq!(orders[0].status, OrderStatus::Active);
        assert!(orders[0].auto_renew);
    }

    #[tokio::test]
    async fn job_lifecycle() {
        let db = backend().await;
        let now = Utc::now();
        let job = UserJob {
            id: "j1".into(),
            user_id: "u1".into(),
            job_type: "task_generation".into(),
            status: JobStatus::Pending,
            context: BTreeMap::new(),
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        db.create_job(&job).await.unwrap();

        let claimed = db.claim_next_job("task_generation").await.unwrap().unwrap();
        assert_eq!(claimed.id, "j1");
        assert_eq!(claimed.status, JobStatus::Processing);

        // No more pending jobs to claim
        assert!(db.claim_next_job("task_generation").await.unwrap().is_none());

        db.complete_job("j1", &serde_json::json!({"tasks": 3})).await.unwrap();
    }

    #[tokio::test]
    async fn invite_redeem_happy_path_and_reuse() {
        let db = backend().await;
        let invite = InviteCode::generate(Some("admin"), None);
        db.create_invite(&invite).await.unwrap();

        let redeemed = db.redeem_invite(&invite.code, "alice@example.com").await.unwrap();
        assert_eq!(redeemed.status, InviteStatus::Used);
        assert_eq!(redeemed.identifier.as_deref(), Some("alice@example.com"));

        // A used code cannot be redeemed again
        let err = db.redeem_invite(&invite.code, "bob@example.com").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn invite_unknown_code_not_found() {
        let db = backend().await;
        let err = db.redeem_invite("NOSUCHCODE", "x").await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn invite_expiry_sweep() {
        let db = backend().await;
        let expired = InviteCode::generate(None, Some(Utc::now() - chrono::Duration::hours(1)));
        let fresh = InviteCode::generate(None, Some(Utc::now() + chrono::Duration::hours(1)));
        db.create_invite(&expired).await.unwrap();
        db.create_invite(&fresh).await.unwrap();

        let count = db.expire_invites().await.unwrap();
        assert_eq!(count, 1);

        let err = db.redeem_invite(&expired.code, "x").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
        db.redeem_invite(&fresh.code, "y").await.unwrap();
    }
}
