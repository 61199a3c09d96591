//! Background extraction worker.
//!
//! Timer-based loop:
//! 1. Load pending `inbound_messages` from the DB
//! 2. Load the owner's profile and latest portrait
//! 3. Run each payload through the `ActionExtractor`
//! 4. Persist the action as a memory record and mark the message processed

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::action::ActionRecord;
use crate::agent::extractor::{ActionExtractor, ExtractRequest};
use crate::store::model::{
    InboundMessage, InboundStatus, MemoryContent, MemoryRecord, MemoryStatus, MemoryType,
    UserProfile,
};
use crate::error::DatabaseError;
use crate::store::Database;

/// Spawn a background task that extracts actions from pending inbound
/// messages.
///
/// Runs once immediately, then on every interval tick. Returns a
/// `JoinHandle` and a shutdown flag; set the flag and the loop exits on its
/// next tick.
pub fn spawn_extraction_worker(
    db: Arc<dyn Database>,
    extractor: Arc<ActionExtractor>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            "Extraction worker started — processing every {}s",
            interval.as_secs()
        );

        let mut tick = tokio::time::interval(interval);

        // Run immediately on first tick
        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Extraction worker shutting down");
                return;
            }

            process_pending(&db, &extractor).await;
        }
    });

    (handle, shutdown_flag)
}

/// Run one extraction pass over all pending inbound messages.
///
/// Failures are logged and leave the message pending for the next tick; a
/// missing profile falls back to an empty one rather than blocking the queue.
pub async fn process_pending(db: &Arc<dyn Database>, extractor: &Arc<ActionExtractor>) {
    let pending = match db.get_pending_inbound().await {
        Ok(messages) => messages,
        Err(e) => {
            error!("Failed to fetch pending inbound messages: {e}");
            return;
        }
    };

    if pending.is_empty() {
        return;
    }

    info!("Processing {} pending inbound message(s)", pending.len());

    for message in &pending {
        let profile = match db.get_profile(&message.user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => UserProfile::empty(&message.user_id),
            Err(e) => {
                error!(id = %message.id, error = %e, "Failed to load profile");
                continue;
            }
        };

        let portrait = match db.get_latest_portrait(&message.user_id).await {
            Ok(portrait) => portrait,
            Err(e) => {
                warn!(id = %message.id, error = %e, "Failed to load portrait, continuing without");
                None
            }
        };

        let request = ExtractRequest {
            channel: message.channel,
            payload: &message.payload,
            profile: &profile,
            portrait: portrait.as_ref(),
        };

        match extractor.extract(request).await {
            Ok(outcome) => match outcome.action {
                Some(action) => {
                    finish_extraction(db, message, action, outcome.estimate).await;
                }
                None => {
                    debug!(id = %message.id, "No content, marking skipped");
                    set_status(db, &message.id, InboundStatus::Skipped, None).await;
                }
            },
            Err(e) => {
                error!(id = %message.id, error = %e, "Extraction failed");
                // Leave as pending — will be retried on next tick
                if let Err(e) = db.record_inbound_error(&message.id, &e.to_string()).await {
                    warn!(id = %message.id, error = %e, "Failed to record extraction error");
                }
            }
        }
    }
}

/// Persist the extracted action as a memory record and mark the message
/// processed. A conflicting record for the same source item counts as
/// already processed.
async fn finish_extraction(
    db: &Arc<dyn Database>,
    message: &InboundMessage,
    action: ActionRecord,
    estimate: u8,
) {
    let record = action_to_memory(message, action, estimate);

    match db.insert_memory(&record).await {
        Ok(()) => {
            debug!(
                id = %message.id,
                memory_id = %record.id,
                priority = record.priority,
                "Action persisted"
            );
            set_status(db, &message.id, InboundStatus::Processed, None).await;
        }
        Err(DatabaseError::Constraint(_)) => {
            debug!(id = %message.id, "Memory already exists for this source item");
            set_status(db, &message.id, InboundStatus::Processed, None).await;
        }
        Err(e) => {
            error!(id = %message.id, error = %e, "Failed to persist action");
        }
    }
}

async fn set_status(
    db: &Arc<dyn Database>,
    id: &str,
    status: InboundStatus,
    error_message: Option<&str>,
) {
    if let Err(e) = db.update_inbound_status(id, status, error_message).await {
        warn!(id = id, error = %e, "Failed to update inbound status");
    }
}

/// Build a memory record from an extracted action.
pub fn action_to_memory(
    message: &InboundMessage,
    action: ActionRecord,
    estimate: u8,
) -> MemoryRecord {
    let now = Utc::now();
    MemoryRecord {
        id: Uuid::new_v4().to_string(),
        user_id: message.user_id.clone(),
        channel: message.channel,
        ref_id: message.ref_id.clone(),
        metadata: Default::default(),
        kind: MemoryType::Action,
        title: action.summary.clone(),
        content: MemoryContent {
            text: Some(action.text),
            keywords: action.keywords,
            summary: Some(action.summary),
            suggestions: action.suggestions,
            importance_rating: Some(action.importance_rating),
            ..Default::default()
        },
        due_date: None,
        status: MemoryStatus::Active,
        labels: action.labels,
        tags: Vec::new(),
        priority: i64::from(estimate),
        description: None,
        statistics: Default::default(),
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Channel;
    use serde_json::json;

    fn make_action() -> ActionRecord {
        ActionRecord {
            text: "Review and pay the invoice before Friday.".into(),
            summary: "Settle the outstanding invoice.".into(),
            keywords: vec!["invoice".into(), "payment".into(), "due".into()],
            suggestions: vec!["Open the billing page".into()],
            labels: vec!["intraday".into(), "high".into(), "email".into()],
            importance_rating: 88,
        }
    }

    #[test]
    fn action_to_memory_maps_fields() {
        let message = InboundMessage::new("u1", Channel::Gmail, "mail-1", json!({}));
        let record = action_to_memory(&message, make_action(), 4);

        assert_eq!(record.user_id, "u1");
        assert_eq!(record.channel, Channel::Gmail);
        assert_eq!(record.ref_id, "mail-1");
        assert_eq!(record.kind, MemoryType::Action);
        assert_eq!(record.title, "Settle the outstanding invoice.");
        assert_eq!(record.priority, 4);
        assert_eq!(record.status, MemoryStatus::Active);
        assert_eq!(record.content.importance_rating, Some(88));
        assert_eq!(record.labels.len(), 3);
    }
}
