use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::gateway::{DataGateway, Direction, GatewayResult, Query};

pub mod loggable;
pub use loggable::{Loggable, Severity};

pub const ACTIVITY_LOG: &str = "activity_log";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub entity_type: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(
        entity_type: &str,
        action: &str,
        actor_id: Option<Uuid>,
        subject_id: Option<Uuid>,
        payload: T,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: format!("{entity_type}.{action}"),
            entity_type: entity_type.to_string(),
            occurred_at: Utc::now(),
            actor_id,
            subject_id,
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

/// Request context for activity logging (IP, User-Agent, etc.)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract context from Axum request headers
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self { ip, user_agent }
    }
}

/// Structured activity payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    /// The current/new state of the entity
    #[serde(rename = "new")]
    pub current: Value,
    /// The previous state (for update/delete operations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    /// Request context (IP, User-Agent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    /// Severity level for retention policy
    pub severity: Severity,
}

pub fn log_activity<T: Loggable>(event_bus: &EventBus, action: &str, actor_id: Option<Uuid>, entity: &T) {
    log_activity_with_context(event_bus, action, actor_id, entity, None, None);
}

/// Activity logging with old/new tracking and request context.
///
/// # Arguments
/// * `event_bus` - The event bus to send the event to.
/// * `action` - The action performed (e.g., "submitted", "approved", "access_updated").
/// * `actor_id` - The employee who performed the action.
/// * `entity` - The current/new entity state.
/// * `old_entity` - Optional previous entity state.
/// * `context` - Optional request context (IP, User-Agent).
pub fn log_activity_with_context<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
    old_entity: Option<&T>,
    context: Option<RequestContext>,
) {
    let severity = entity.severity_for_action(action);
    let payload = ActivityPayload {
        current: serde_json::to_value(entity).unwrap_or_default(),
        old: old_entity.map(|e| serde_json::to_value(e).unwrap_or_default()),
        context,
        severity,
    };

    let event = DomainEvent::new(
        T::entity_type(),
        action,
        actor_id,
        Some(entity.subject_id()),
        serde_json::to_value(&payload).unwrap_or_default(),
    );

    // Fire and forget - having no subscribers must not break the caller
    let _ = event_bus.send(serde_json::to_value(event).unwrap_or_default());
}

fn describe(name: &str) -> &'static str {
    match name {
        "approval_request.submitted" => "Approval request submitted",
        "approval_request.approved" => "Approval request approved",
        "approval_request.rejected" => "Approval request rejected",
        "approval_request.target_deleted" => "Deletion request carried out",
        "approval_request.notified" => "Approval notification sent",
        "employee.registered" => "New employee registered",
        "employee.access_updated" => "Employee access updated",
        _ => "System event",
    }
}

/// Hash link for an activity entry: SHA256(prev_hash || payload).
pub fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

async fn last_entry(gateway: &dyn DataGateway) -> GatewayResult<(u64, Option<String>)> {
    let last = gateway
        .read(ACTIVITY_LOG, &Query::new().order_by("sequence", Direction::Desc).limit(1))
        .await?;

    Ok(match last.first() {
        Some(record) => (
            record.data.get("sequence").and_then(Value::as_u64).unwrap_or(0),
            record.data.get("hash").and_then(Value::as_str).map(String::from),
        ),
        None => (0, None),
    })
}

/// Persist every published event into the activity log, hash-chained in arrival order.
pub async fn start_activity_listener(mut rx: broadcast::Receiver<Value>, gateway: Arc<dyn DataGateway>) {
    tracing::info!("Activity listener started");

    let (mut sequence, mut prev_hash) = match last_entry(gateway.as_ref()).await {
        Ok(last) => last,
        Err(e) => {
            tracing::error!("Failed to load activity log head: {}", e);
            (0, None)
        }
    };

    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "activity listener lagged, events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let name = event.get("name").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
        let severity = event
            .get("payload")
            .and_then(|p| p.get("severity"))
            .and_then(|s| s.as_str())
            .unwrap_or("important")
            .to_string();

        let payload_str = serde_json::to_string(&event).unwrap_or_default();
        let hash = chain_hash(prev_hash.as_deref(), &payload_str);

        let entry = json!({
            "sequence": sequence + 1,
            "event_name": name,
            "description": describe(&name),
            "actor_id": event.get("actor_id").cloned().unwrap_or(Value::Null),
            "subject_id": event.get("subject_id").cloned().unwrap_or(Value::Null),
            "occurred_at": event.get("occurred_at").cloned().unwrap_or(Value::Null),
            "severity": severity,
            "properties": event,
            "prev_hash": prev_hash,
            "hash": hash,
        });

        match gateway.write(ACTIVITY_LOG, None, entry).await {
            Ok(_) => {
                sequence += 1;
                prev_hash = Some(hash);
            }
            Err(e) => tracing::error!("Failed to save activity log: {}", e),
        }
    }

    tracing::info!("Activity listener stopped");
}
