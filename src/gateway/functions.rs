//! Named remote functions reachable through [`DataGateway::invoke`](super::DataGateway::invoke).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{GatewayError, GatewayResult};

pub const SEND_NOTIFICATION: &str = "send-notification";

#[async_trait]
pub trait RemoteFunction: Send + Sync {
    async fn call(&self, payload: Value) -> GatewayResult<Value>;
}

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn RemoteFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in notification outbox under [`SEND_NOTIFICATION`].
    pub fn with_defaults(outbox: NotificationOutbox) -> Self {
        Self::new().register(SEND_NOTIFICATION, outbox)
    }

    pub fn register(mut self, name: &str, function: impl RemoteFunction + 'static) -> Self {
        self.functions.insert(name.to_string(), Arc::new(function));
        self
    }

    pub async fn invoke(&self, name: &str, payload: Value) -> GatewayResult<Value> {
        let function = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownFunction(name.to_string()))?;
        tracing::debug!(function = %name, "invoking remote function");
        function.call(payload).await
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry").field("functions", &names).finish()
    }
}

/// Notification sink: logs each message and keeps the most recent ones for
/// inspection (SMS/e-mail delivery is an external provider's job). Holds at most
/// `capacity` payloads; older ones are dropped.
#[derive(Debug, Clone)]
pub struct NotificationOutbox {
    inner: Arc<Mutex<OutboxState>>,
}

#[derive(Debug)]
struct OutboxState {
    recent: VecDeque<Value>,
    capacity: usize,
    total: u64,
}

pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

impl Default for NotificationOutbox {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_OUTBOX_CAPACITY)
    }
}

impl NotificationOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(OutboxState {
                recent: VecDeque::with_capacity(capacity),
                capacity,
                total: 0,
            })),
        }
    }

    /// Most recent payloads, oldest first.
    pub fn sent(&self) -> Vec<Value> {
        self.inner
            .lock()
            .map(|state| state.recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of notifications accepted since startup, including dropped ones.
    pub fn total(&self) -> u64 {
        self.inner.lock().map(|state| state.total).unwrap_or_default()
    }
}

#[async_trait]
impl RemoteFunction for NotificationOutbox {
    async fn call(&self, payload: Value) -> GatewayResult<Value> {
        let recipient = payload
            .get("recipient_id")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::invalid("notification requires recipient_id"))?
            .to_string();

        tracing::info!(recipient = %recipient, "notification queued");

        let mut state = self
            .inner
            .lock()
            .map_err(|_| GatewayError::transient("notification outbox poisoned"))?;
        if state.recent.len() == state.capacity {
            state.recent.pop_front();
        }
        state.recent.push_back(payload);
        state.total += 1;

        Ok(json!({ "queued": true, "recipient_id": recipient, "position": state.total }))
    }
}
