//! In-memory implementation of the data gateway.
//!
//! Not durable: all state is lost on process restart. Mutations take the write
//! lock for their whole read-compare-write sequence, which is what makes
//! `conditional_update` atomic within one process.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    expected_fields, merge_patch, validate_collection, DataGateway, Direction, FilterOp,
    FunctionRegistry, GatewayError, GatewayResult, Query, Record, UpdateOutcome,
};

type Collection = HashMap<String, Record>;

#[derive(Debug, Default)]
pub struct MemoryGateway {
    collections: RwLock<HashMap<String, Collection>>,
    functions: FunctionRegistry,
}

impl MemoryGateway {
    pub fn new(functions: FunctionRegistry) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            functions,
        }
    }
}

fn field_value<'a>(record: &'a Record, field: &str) -> Option<&'a Value> {
    if field == "id" {
        return None;
    }
    record.data.get(field)
}

fn matches(record: &Record, query: &Query) -> bool {
    query.filters.iter().all(|filter| {
        let id_value;
        let actual = if filter.field == "id" {
            id_value = Value::String(record.id.clone());
            Some(&id_value)
        } else {
            field_value(record, &filter.field)
        };
        let equal = actual.unwrap_or(&Value::Null) == &filter.value;
        match filter.op {
            FilterOp::Eq => equal,
            FilterOp::Ne => !equal,
        }
    })
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values used for `order_by`: nulls first, then by type,
/// numbers numerically, strings lexically.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[async_trait]
impl DataGateway for MemoryGateway {
    async fn read(&self, collection: &str, query: &Query) -> GatewayResult<Vec<Record>> {
        validate_collection(collection)?;
        query.validate()?;

        let collections = self.collections.read().await;
        let mut records: Vec<Record> = collections
            .get(collection)
            .map(|records| records.values().filter(|r| matches(r, query)).cloned().collect())
            .unwrap_or_default();

        match &query.order {
            Some(order) => records.sort_by(|a, b| {
                let null = Value::Null;
                let left = field_value(a, &order.field).unwrap_or(&null);
                let right = field_value(b, &order.field).unwrap_or(&null);
                let ordering = compare_values(left, right).then_with(|| a.id.cmp(&b.id));
                match order.direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                }
            }),
            None => records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))),
        }

        if let Some(limit) = query.limit {
            records.truncate(limit);
        }

        Ok(records)
    }

    async fn get(&self, collection: &str, id: &str) -> GatewayResult<Option<Record>> {
        validate_collection(collection)?;
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|records| records.get(id)).cloned())
    }

    async fn write(&self, collection: &str, id: Option<&str>, payload: Value) -> GatewayResult<Record> {
        validate_collection(collection)?;
        if !payload.is_object() {
            return Err(GatewayError::invalid("record payload must be a JSON object"));
        }

        let id = id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();

        let mut collections = self.collections.write().await;
        let records = collections.entry(collection.to_string()).or_default();
        let created_at = records.get(&id).map(|existing| existing.created_at).unwrap_or(now);

        let record = Record {
            id: id.clone(),
            data: payload,
            created_at,
            updated_at: now,
        };
        records.insert(id, record.clone());

        Ok(record)
    }

    async fn conditional_update(
        &self,
        collection: &str,
        id: &str,
        expected: &Value,
        patch: &Value,
    ) -> GatewayResult<UpdateOutcome> {
        validate_collection(collection)?;
        let expected = expected_fields(expected)?;

        let mut collections = self.collections.write().await;
        let record = collections
            .get_mut(collection)
            .and_then(|records| records.get_mut(id))
            .ok_or_else(|| GatewayError::not_found(format!("{collection}/{id}")))?;

        let current_matches = expected
            .iter()
            .all(|(field, value)| record.data.get(*field).unwrap_or(&Value::Null) == *value);
        if !current_matches {
            return Ok(UpdateOutcome::Conflict);
        }

        merge_patch(&mut record.data, patch);
        record.updated_at = Utc::now();

        Ok(UpdateOutcome::Applied(record.clone()))
    }

    async fn delete(&self, collection: &str, id: &str) -> GatewayResult<bool> {
        validate_collection(collection)?;
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .map(|records| records.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn invoke(&self, function: &str, payload: Value) -> GatewayResult<Value> {
        self.functions.invoke(function, payload).await
    }

    async fn health_check(&self) -> GatewayResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
