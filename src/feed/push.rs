use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

use super::{ChangeCallback, ChangeFeed, ChangeNotice, Subscription};
use crate::events::EventBus;

/// Push delivery: one notice per domain event of the watched entity type.
#[derive(Debug, Clone)]
pub struct PushFeed {
    bus: EventBus,
    entity_type: String,
}

impl PushFeed {
    pub fn new(bus: EventBus, entity_type: &str) -> Self {
        Self {
            bus,
            entity_type: entity_type.to_string(),
        }
    }
}

impl ChangeFeed for PushFeed {
    fn subscribe(&self, on_change: ChangeCallback) -> Subscription {
        let stopped = Arc::new(AtomicBool::new(false));
        let mut rx = self.bus.subscribe();
        let entity_type = self.entity_type.clone();

        let task = {
            let stopped = Arc::clone(&stopped);
            async move {
                loop {
                    let relevant = match rx.recv().await {
                        Ok(event) => event.get("entity_type").and_then(Value::as_str) == Some(entity_type.as_str()),
                        // missed events may have been relevant
                        Err(RecvError::Lagged(_)) => true,
                        Err(RecvError::Closed) => break,
                    };

                    if stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    if relevant {
                        on_change(ChangeNotice {
                            source: entity_type.clone(),
                            fingerprint: None,
                        });
                    }
                }
            }
        };

        Subscription::spawn(stopped, task)
    }
}
