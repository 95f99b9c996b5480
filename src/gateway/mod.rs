//! Data Access Gateway
//!
//! A uniform interface over the record store and the named remote functions the
//! rest of the crate talks to. Two backends exist:
//! - `memory`: `HashMap`s behind a `tokio::sync::RwLock`, for tests and local runs
//! - `sqlite`: a single `records` table holding JSON documents, via `sqlx`
//!
//! Records are JSON objects grouped into collections. Updates through
//! [`DataGateway::conditional_update`] use JSON merge-patch semantics and only
//! apply when every expected field still holds the expected value at write time.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub mod functions;
pub mod memory;
pub mod sqlite;

pub use functions::{FunctionRegistry, NotificationOutbox, RemoteFunction, SEND_NOTIFICATION};
pub use memory::MemoryGateway;
pub use sqlite::SqliteGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("unknown remote function `{0}`")]
    UnknownFunction(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("transient backend failure: {0}")]
    Transient(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl GatewayError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Whether a caller may reasonably retry the same operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Database(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Deserialize the document into a typed value. The record id is injected as
    /// the `id` field so entity structs don't need to duplicate it in storage.
    pub fn decode<T: DeserializeOwned>(&self) -> GatewayResult<T> {
        let mut data = self.data.clone();
        if let Value::Object(map) = &mut data {
            map.insert("id".to_string(), Value::String(self.id.clone()));
        }
        Ok(serde_json::from_value(data)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Read query: equality filters, an optional ordering and a limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op: FilterOp::Eq,
            value: value.into(),
        });
        self
    }

    pub fn ne(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op: FilterOp::Ne,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self) -> GatewayResult<()> {
        for filter in &self.filters {
            validate_field(&filter.field)?;
        }
        if let Some(order) = &self.order {
            validate_field(&order.field)?;
        }
        Ok(())
    }
}

/// Result of a compare-and-set update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Applied(Record),
    Conflict,
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

#[async_trait]
pub trait DataGateway: Send + Sync {
    async fn read(&self, collection: &str, query: &Query) -> GatewayResult<Vec<Record>>;

    async fn get(&self, collection: &str, id: &str) -> GatewayResult<Option<Record>>;

    /// Insert when `id` is `None`, otherwise replace (or create) the record with that id.
    async fn write(&self, collection: &str, id: Option<&str>, payload: Value) -> GatewayResult<Record>;

    /// Apply `patch` only if every field in `expected` currently equals the given value.
    /// Returns `NotFound` when the record does not exist.
    async fn conditional_update(
        &self,
        collection: &str,
        id: &str,
        expected: &Value,
        patch: &Value,
    ) -> GatewayResult<UpdateOutcome>;

    /// Returns whether a record was removed.
    async fn delete(&self, collection: &str, id: &str) -> GatewayResult<bool>;

    async fn invoke(&self, function: &str, payload: Value) -> GatewayResult<Value>;

    async fn health_check(&self) -> GatewayResult<()>;

    fn backend_name(&self) -> &'static str;
}

/// Typed convenience layer shared by every gateway consumer.
pub async fn get_as<T: DeserializeOwned>(
    gateway: &dyn DataGateway,
    collection: &str,
    id: &str,
) -> GatewayResult<Option<T>> {
    match gateway.get(collection, id).await? {
        Some(record) => record.decode().map(Some),
        None => Ok(None),
    }
}

pub async fn write_as<T: Serialize>(
    gateway: &dyn DataGateway,
    collection: &str,
    id: &str,
    entity: &T,
) -> GatewayResult<Record> {
    let mut payload = serde_json::to_value(entity)?;
    if let Value::Object(map) = &mut payload {
        map.remove("id");
    }
    gateway.write(collection, Some(id), payload).await
}

/// Backends selectable through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBackend {
    Memory,
    Sqlite,
}

impl DataBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "memory" | "mem" => Some(Self::Memory),
            "sqlite" | "sql" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// Build the configured gateway. The sqlite backend runs embedded migrations on connect.
pub async fn connect(
    backend: DataBackend,
    database_url: Option<&str>,
    functions: FunctionRegistry,
) -> anyhow::Result<Arc<dyn DataGateway>> {
    match backend {
        DataBackend::Memory => {
            tracing::info!("using in-memory data gateway");
            Ok(Arc::new(MemoryGateway::new(functions)))
        }
        DataBackend::Sqlite => {
            let url = database_url
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set for the sqlite backend"))?;
            let pool = crate::db::init(url).await?;
            tracing::info!("using sqlite data gateway");
            Ok(Arc::new(SqliteGateway::new(pool, functions)))
        }
    }
}

pub(crate) fn validate_field(name: &str) -> GatewayResult<()> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(GatewayError::invalid(format!("invalid field name `{name}`")))
    }
}

pub(crate) fn validate_collection(name: &str) -> GatewayResult<()> {
    validate_field(name).map_err(|_| GatewayError::invalid(format!("invalid collection name `{name}`")))
}

pub(crate) fn expected_fields(expected: &Value) -> GatewayResult<Vec<(&str, &Value)>> {
    let map = expected
        .as_object()
        .ok_or_else(|| GatewayError::invalid("expected state must be a JSON object"))?;
    let mut fields = Vec::with_capacity(map.len());
    for (field, value) in map {
        validate_field(field)?;
        fields.push((field.as_str(), value));
    }
    Ok(fields)
}

/// RFC 7396 merge patch: objects merge recursively, `null` removes a key.
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }

    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                let slot = target_map.entry(key.clone()).or_insert(Value::Null);
                merge_patch(slot, value);
            }
        }
    }
}
