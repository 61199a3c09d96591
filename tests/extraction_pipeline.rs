//! End-to-end tests for the extraction pipeline: enqueue an inbound channel
//! payload, run one worker pass against a stub model and an in-memory
//! database, and check the persisted memory record.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use attache::agent::{ActionExtractor, process_pending};
use attache::channels::Channel;
use attache::error::LlmError;
use attache::llm::{CompletionRequest, CompletionResponse, LlmProvider};
use attache::store::model::{InboundMessage, InboundStatus, MemoryType, UserProfile};
use attache::store::{Database, LibSqlBackend};

/// Stub provider returning a fixed response (no real API calls).
struct StubLlm {
    content: &'static str,
    fail: bool,
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if self.fail {
            return Err(LlmError::RequestFailed {
                provider: "stub".into(),
                reason: "model unavailable".into(),
            });
        }
        Ok(CompletionResponse {
            content: self.content.to_string(),
            input_tokens: 100,
            output_tokens: 50,
        })
    }
}

const ACTION_JSON: &str = r#"{
    "text": "Review and pay the invoice before 18:00.",
    "summary": "Settle the outstanding invoice.",
    "keywords": ["invoice", "payment", "due"],
    "suggestions": ["Open the billing page"],
    "labels": ["intraday", "high", "email"],
    "importanceRating": 88
}"#;

async fn setup(content: &'static str, fail: bool) -> (Arc<dyn Database>, Arc<ActionExtractor>) {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let llm = Arc::new(StubLlm { content, fail });
    let extractor = Arc::new(ActionExtractor::new(llm));
    (db, extractor)
}

fn mail_payload() -> serde_json::Value {
    json!({
        "id": "mail-1",
        "snippet": "Pay by Friday",
        "labelIds": ["INBOX", "IMPORTANT"],
        "payload": {
            "headers": [
                {"name": "Subject", "value": "Invoice Due"},
                {"name": "From", "value": "billing@vendor.com"}
            ]
        }
    })
}

#[tokio::test]
async fn pending_mail_becomes_action_memory() {
    let (db, extractor) = setup(ACTION_JSON, false).await;

    db.upsert_profile(&UserProfile::empty("u1")).await.unwrap();
    let message = InboundMessage::new("u1", Channel::Gmail, "mail-1", mail_payload());
    db.enqueue_inbound(&message).await.unwrap();

    process_pending(&db, &extractor).await;

    // The message is processed and a rated action record exists.
    assert!(db.get_pending_inbound().await.unwrap().is_empty());

    let memory = db
        .get_memory_by_ref(Channel::Gmail, "mail-1")
        .await
        .unwrap()
        .expect("memory record should exist");
    assert_eq!(memory.user_id, "u1");
    assert_eq!(memory.kind, MemoryType::Action);
    assert_eq!(memory.title, "Settle the outstanding invoice.");
    assert_eq!(memory.content.importance_rating, Some(88));
    // 88 / 20 = 4
    assert_eq!(memory.priority, 4);
    assert_eq!(memory.labels, vec!["intraday", "high", "email"]);
}

#[tokio::test]
async fn empty_mail_is_skipped_without_memory() {
    let (db, extractor) = setup(ACTION_JSON, false).await;

    let payload = json!({"id": "mail-2", "labelIds": ["INBOX"]});
    let message = InboundMessage::new("u1", Channel::Gmail, "mail-2", payload);
    db.enqueue_inbound(&message).await.unwrap();

    process_pending(&db, &extractor).await;

    assert!(db.get_pending_inbound().await.unwrap().is_empty());
    assert!(
        db.get_memory_by_ref(Channel::Gmail, "mail-2")
            .await
            .unwrap()
            .is_none()
    );

    // Re-enqueueing the same source item is still a constraint violation even
    // though it produced no memory.
    let dup = InboundMessage::new("u1", Channel::Gmail, "mail-2", json!({}));
    assert!(db.enqueue_inbound(&dup).await.is_err());
}

#[tokio::test]
async fn model_failure_leaves_message_pending() {
    let (db, extractor) = setup("", true).await;

    let message = InboundMessage::new("u1", Channel::Gmail, "mail-3", mail_payload());
    db.enqueue_inbound(&message).await.unwrap();

    process_pending(&db, &extractor).await;

    // Still pending, with the failure recorded for inspection.
    let pending = db.get_pending_inbound().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, InboundStatus::Pending);
    assert!(pending[0].error_message.is_some());
}

#[tokio::test]
async fn generic_channel_payload_flows_through() {
    let (db, extractor) = setup(ACTION_JSON, false).await;

    let payload = json!({"title": "Design review", "start": "2026-09-01T15:30:00Z"});
    let message = InboundMessage::new("u1", Channel::GoogleCalendar, "event-1", payload);
    db.enqueue_inbound(&message).await.unwrap();

    process_pending(&db, &extractor).await;

    let memory = db
        .get_memory_by_ref(Channel::GoogleCalendar, "event-1")
        .await
        .unwrap()
        .expect("memory record should exist");
    assert_eq!(memory.channel, Channel::GoogleCalendar);
    assert_eq!(memory.priority, 4);
}

#[tokio::test]
async fn on_disk_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("attache.db");

    {
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        db.upsert_profile(&UserProfile::empty("u1")).await.unwrap();
    }

    let db = LibSqlBackend::new_local(&path).await.unwrap();
    assert!(db.get_profile("u1").await.unwrap().is_some());
}

#[tokio::test]
async fn second_pass_is_a_no_op() {
    let (db, extractor) = setup(ACTION_JSON, false).await;

    let message = InboundMessage::new("u1", Channel::Gmail, "mail-4", mail_payload());
    db.enqueue_inbound(&message).await.unwrap();

    process_pending(&db, &extractor).await;
    process_pending(&db, &extractor).await;

    let memories = db.list_memories("u1", 10).await.unwrap();
    assert_eq!(memories.len(), 1);
}
