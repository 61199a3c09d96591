//! Typed records for the persisted schema.
//!
//! JSON columns are modeled as typed structs with a `#[serde(flatten)]`
//! extension map where the original data was free-form, so forward-compatible
//! fields survive a read/write round trip without being silently dropped.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::channels::Channel;

// ── User profile ────────────────────────────────────────────────────

/// Geographic location attached to a profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Notification channel toggles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub phone: bool,
    #[serde(default)]
    pub whatsapp: bool,
}

/// Personalization preferences used as prompt context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizedSettings {
    #[serde(default)]
    pub topic_preferences: Vec<String>,
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A user's profile. Read-only context for extraction; owned by the app layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    pub locale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<UserLocation>,
    /// Free-form identity fields ("name", "email", ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub notification_settings: NotificationSettings,
    #[serde(default)]
    pub personalized_settings: PersonalizedSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// A fresh profile with defaults, for users who never completed setup.
    pub fn empty(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            avatar_url: None,
            bio: None,
            locale: "en".to_string(),
            timezone: None,
            location: None,
            metadata: BTreeMap::new(),
            notification_settings: NotificationSettings::default(),
            personalized_settings: PersonalizedSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Convenience accessor into `metadata`.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

// ── User portrait ───────────────────────────────────────────────────

/// A single computed metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Computed user statistics, keyed by metric name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortraitData {
    pub metrics: BTreeMap<String, Metric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A snapshot of dynamically computed user metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPortrait {
    pub id: String,
    pub user_id: String,
    pub data: PortraitData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub calculated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Memories ────────────────────────────────────────────────────────

/// Kind of a persisted memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Action,
    Memory,
    Fact,
    Task,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Memory => "memory",
            Self::Fact => "fact",
            Self::Task => "task",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "action" => Some(Self::Action),
            "memory" => Some(Self::Memory),
            "fact" => Some(Self::Fact),
            "task" => Some(Self::Task),
            _ => None,
        }
    }
}

/// Lifecycle status of a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    Active,
    Done,
    Ignored,
    Overridden,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Done => "done",
            Self::Ignored => "ignored",
            Self::Overridden => "overridden",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "done" => Self::Done,
            "ignored" => Self::Ignored,
            "overridden" => Self::Overridden,
            _ => Self::Active,
        }
    }
}

/// JSON content of a memory record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance_rating: Option<u8>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A persisted memory/task/fact/action record.
///
/// Unique per `(channel, ref_id)` — one record per source item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub user_id: String,
    pub channel: Channel,
    /// Channel-native id of the source item.
    pub ref_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub kind: MemoryType,
    pub title: String,
    pub content: MemoryContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub status: MemoryStatus,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub statistics: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Inbound messages ────────────────────────────────────────────────

/// Processing status of a queued inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundStatus {
    Pending,
    Processed,
    Skipped,
    Failed,
}

impl InboundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processed" => Self::Processed,
            "skipped" => Self::Skipped,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// A raw channel payload queued for extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub user_id: String,
    pub channel: Channel,
    /// Channel-native id, unique per channel.
    pub ref_id: String,
    pub payload: Value,
    pub status: InboundStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Build a new pending message for a channel payload.
    pub fn new(user_id: &str, channel: Channel, ref_id: &str, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            channel,
            ref_id: ref_id.to_string(),
            payload,
            status: InboundStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ── Agent configurations ────────────────────────────────────────────

/// A tool made available to a configured agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTool {
    pub name: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// JSON configuration of a stored agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfiguration {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f64,
    pub max_steps: u32,
    #[serde(default)]
    pub tools: Vec<AgentTool>,
}

/// A stored agent definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub configuration: AgentConfiguration,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── OAuth ───────────────────────────────────────────────────────────

/// Static configuration for an OAuth provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub scope: Vec<String>,
    pub redirect_uri: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_params: BTreeMap<String, String>,
}

/// A registered OAuth provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthProvider {
    pub id: String,
    /// Short unique name: "google", "notion", ...
    pub name: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    pub config: OAuthProviderConfig,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Tokens and metadata for a user's provider connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Connection health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Expired,
    Revoked,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "expired" => Self::Expired,
            "revoked" => Self::Revoked,
            "error" => Self::Error,
            _ => Self::Active,
        }
    }
}

/// A user's connection to an OAuth provider. Unique per `(user, provider)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConnection {
    pub id: String,
    pub user_id: String,
    pub provider_id: String,
    pub credentials: OAuthCredentials,
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub error_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Device tokens ───────────────────────────────────────────────────

/// A registered push-notification device. Unique per `(user, device)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceToken {
    pub id: String,
    pub user_id: String,
    pub device_id: String,
    pub token: String,
    /// "ios" | "android" | "web" | "desktop"
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    pub last_used_at: i64,
    pub is_active: bool,
    pub is_trusted: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Orders ──────────────────────────────────────────────────────────

/// Subscription order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "expired" => Self::Expired,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

/// A subscription order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserOrder {
    pub id: String,
    pub user_id: String,
    pub subscription_id: String,
    pub plan_id: String,
    /// Decimal amount, stored as text for precision.
    pub amount: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub auto_renew: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Jobs ────────────────────────────────────────────────────────────

/// Async job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// An async job record (task generation and the like).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserJob {
    pub id: String,
    pub user_id: String,
    pub job_type: String,
    pub status: JobStatus,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// ── Invite codes ────────────────────────────────────────────────────

/// Invite code status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    Active,
    Used,
    Expired,
    Disabled,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Expired => "expired",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "used" => Self::Used,
            "expired" => Self::Expired,
            "disabled" => Self::Disabled,
            _ => Self::Active,
        }
    }
}

/// Characters used in generated invite codes. Ambiguous glyphs excluded.
const INVITE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of generated invite codes.
const INVITE_CODE_LEN: usize = 10;

/// A single-use invite code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteCode {
    pub id: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub status: InviteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl InviteCode {
    /// Create a new active invite with a random code.
    pub fn generate(created_by: Option<&str>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            code: random_code(),
            identifier: None,
            status: InviteStatus::Active,
            used_at: None,
            expires_at,
            created_at: Utc::now(),
            created_by: created_by.map(String::from),
        }
    }

    /// Whether the code can still be redeemed at `now`.
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.status == InviteStatus::Active && self.expires_at.is_none_or(|exp| exp > now)
    }
}

fn random_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..INVITE_ALPHABET.len());
            INVITE_ALPHABET[idx] as char
        })
        .collect()
}
