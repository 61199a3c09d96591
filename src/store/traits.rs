//! Unified `Database` trait — single async interface for all persistence.

use async_trait::async_trait;
use serde_json::Value;

use crate::channels::Channel;
use crate::error::DatabaseError;
use crate::store::model::{
    AgentRecord, ConnectionStatus, DeviceToken, InboundMessage, InboundStatus, InviteCode,
    MemoryRecord, MemoryStatus, OAuthConnection, OAuthProvider, UserJob, UserOrder, UserPortrait,
    UserProfile,
};

/// Backend-agnostic database trait covering the full persisted schema.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Profiles & portraits ────────────────────────────────────────

    /// Insert or replace a user profile.
    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError>;

    /// Get a user profile by user id.
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, DatabaseError>;

    /// Insert or replace a portrait snapshot.
    async fn upsert_portrait(&self, portrait: &UserPortrait) -> Result<(), DatabaseError>;

    /// Get the most recently calculated portrait for a user.
    async fn get_latest_portrait(
        &self,
        user_id: &str,
    ) -> Result<Option<UserPortrait>, DatabaseError>;

    // ── Memories ────────────────────────────────────────────────────

    /// Insert a memory record. A duplicate `(channel, ref_id)` pair is a
    /// `Constraint` error.
    async fn insert_memory(&self, record: &MemoryRecord) -> Result<(), DatabaseError>;

    /// Look up a memory by its source channel and channel-native id.
    async fn get_memory_by_ref(
        &self,
        channel: Channel,
        ref_id: &str,
    ) -> Result<Option<MemoryRecord>, DatabaseError>;

    /// List a user's memories, highest priority first.
    async fn list_memories(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, DatabaseError>;

    /// Update a memory's lifecycle status.
    async fn update_memory_status(
        &self,
        id: &str,
        status: MemoryStatus,
    ) -> Result<(), DatabaseError>;

    // ── Inbound messages ────────────────────────────────────────────

    /// Queue a raw channel payload for extraction. A duplicate
    /// `(channel, ref_id)` pair is a `Constraint` error.
    async fn enqueue_inbound(&self, message: &InboundMessage) -> Result<(), DatabaseError>;

    /// Get all pending inbound messages, oldest first.
    async fn get_pending_inbound(&self) -> Result<Vec<InboundMessage>, DatabaseError>;

    /// Update an inbound message's status, optionally recording an error.
    async fn update_inbound_status(
        &self,
        id: &str,
        status: InboundStatus,
        error: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Record an extraction error without changing status (message stays
    /// pending and will be retried on the next tick).
    async fn record_inbound_error(&self, id: &str, error: &str) -> Result<(), DatabaseError>;

    // ── Agents ──────────────────────────────────────────────────────

    /// Insert or replace an agent definition (unique by name).
    async fn upsert_agent(&self, agent: &AgentRecord) -> Result<(), DatabaseError>;

    /// Get an agent by name.
    async fn get_agent(&self, name: &str) -> Result<Option<AgentRecord>, DatabaseError>;

    // ── OAuth ───────────────────────────────────────────────────────

    /// Insert or replace a provider definition (unique by name).
    async fn upsert_oauth_provider(&self, provider: &OAuthProvider) -> Result<(), DatabaseError>;

    /// Get a provider by name.
    async fn get_oauth_provider(&self, name: &str)
    -> Result<Option<OAuthProvider>, DatabaseError>;

    /// Insert or replace a user's connection (unique per user+provider).
    async fn upsert_oauth_connection(
        &self,
        connection: &OAuthConnection,
    ) -> Result<(), DatabaseError>;

    /// Get a user's connection to a provider.
    async fn get_oauth_connection(
        &self,
        user_id: &str,
        provider_id: &str,
    ) -> Result<Option<OAuthConnection>, DatabaseError>;

    /// Record a connection failure: bump the error count, store the message,
    /// and set the status.
    async fn record_connection_error(
        &self,
        id: &str,
        status: ConnectionStatus,
        error: &str,
    ) -> Result<(), DatabaseError>;

    // ── Device tokens ───────────────────────────────────────────────

    /// Register (or refresh) a device token, unique per user+device.
    async fn register_device(&self, device: &DeviceToken) -> Result<(), DatabaseError>;

    /// List a user's active devices.
    async fn list_devices(&self, user_id: &str) -> Result<Vec<DeviceToken>, DatabaseError>;

    /// Deactivate a device.
    async fn deactivate_device(&self, user_id: &str, device_id: &str)
    -> Result<(), DatabaseError>;

    // ── Orders ──────────────────────────────────────────────────────

    /// Insert an order.
    async fn insert_order(&self, order: &UserOrder) -> Result<(), DatabaseError>;

    /// List a user's orders, most recent first.
    async fn list_orders(&self, user_id: &str) -> Result<Vec<UserOrder>, DatabaseError>;

    // ── Jobs ────────────────────────────────────────────────────────

    /// Create a pending job.
    async fn create_job(&self, job: &UserJob) -> Result<(), DatabaseError>;

    /// Atomically claim the oldest pending job of a type, marking it
    /// processing. Returns `None` when the queue is empty.
    async fn claim_next_job(&self, job_type: &str) -> Result<Option<UserJob>, DatabaseError>;

    /// Mark a job completed with a result payload.
    async fn complete_job(&self, id: &str, result: &Value) -> Result<(), DatabaseError>;

    /// Mark a job failed with an error message.
    async fn fail_job(&self, id: &str, error: &str) -> Result<(), DatabaseError>;

    // ── Invite codes ────────────────────────────────────────────────

    /// Insert a new invite code.
    async fn create_invite(&self, invite: &InviteCode) -> Result<(), DatabaseError>;

    /// Redeem a code for an identifier. Fails with `NotFound` for unknown
    /// codes and `Constraint` for codes that are used, disabled, or expired.
    async fn redeem_invite(
        &self,
        code: &str,
        identifier: &str,
    ) -> Result<InviteCode, DatabaseError>;

    /// Mark active codes past their expiry as expired. Returns the count.
    async fn expire_invites(&self) -> Result<usize, DatabaseError>;
}
