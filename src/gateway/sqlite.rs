use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{
    expected_fields, validate_collection, DataGateway, Direction, FilterOp, FunctionRegistry,
    GatewayError, GatewayResult, Query, Record, UpdateOutcome,
};

const RECORD_COLUMNS: &str = "id, data, created_at, updated_at";

/// Gateway over a single `records(collection, id, data, created_at, updated_at)` table.
/// Documents are stored as JSON text and queried with SQLite's JSON1 functions.
#[derive(Debug, Clone)]
pub struct SqliteGateway {
    pool: SqlitePool,
    functions: FunctionRegistry,
}

impl SqliteGateway {
    pub fn new(pool: SqlitePool, functions: FunctionRegistry) -> Self {
        Self { pool, functions }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn json_path(field: &str) -> String {
    format!("$.{field}")
}

fn record_from_row(row: &SqliteRow) -> GatewayResult<Record> {
    let data: String = row.try_get("data")?;
    Ok(Record {
        id: row.try_get("id")?,
        data: serde_json::from_str(&data)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Appends one predicate per expected field and returns the values to bind, in order.
fn push_field_predicates<'a>(
    sql: &mut String,
    fields: impl IntoIterator<Item = (&'a str, &'a Value, FilterOp)>,
) -> GatewayResult<Vec<String>> {
    let mut binds = Vec::new();
    for (field, value, op) in fields {
        if field == "id" {
            sql.push_str(match op {
                FilterOp::Eq => " AND id = ?",
                FilterOp::Ne => " AND id <> ?",
            });
            binds.push(scalar_text(value));
            continue;
        }

        // json_extract on both sides so strings, numbers, booleans and null compare as SQL values
        sql.push_str(match op {
            FilterOp::Eq => " AND json_extract(data, ?) IS json_extract(?, '$')",
            FilterOp::Ne => " AND json_extract(data, ?) IS NOT json_extract(?, '$')",
        });
        binds.push(json_path(field));
        binds.push(serde_json::to_string(value)?);
    }
    Ok(binds)
}

#[async_trait]
impl DataGateway for SqliteGateway {
    async fn read(&self, collection: &str, query: &Query) -> GatewayResult<Vec<Record>> {
        validate_collection(collection)?;
        query.validate()?;

        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE collection = ?");
        let mut binds = vec![collection.to_string()];
        binds.extend(push_field_predicates(
            &mut sql,
            query
                .filters
                .iter()
                .map(|f| (f.field.as_str(), &f.value, f.op)),
        )?);

        match &query.order {
            Some(order) => {
                let direction = match order.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                if order.field == "id" {
                    sql.push_str(&format!(" ORDER BY id {direction}"));
                } else {
                    sql.push_str(&format!(" ORDER BY json_extract(data, ?) {direction}, id {direction}"));
                    binds.push(json_path(&order.field));
                }
            }
            None => sql.push_str(" ORDER BY created_at ASC, id ASC"),
        }

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut statement = sqlx::query(&sql);
        for bind in &binds {
            statement = statement.bind(bind.as_str());
        }

        let rows = statement.fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn get(&self, collection: &str, id: &str) -> GatewayResult<Option<Record>> {
        validate_collection(collection)?;
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE collection = ? AND id = ?"
        ))
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn write(&self, collection: &str, id: Option<&str>, payload: Value) -> GatewayResult<Record> {
        validate_collection(collection)?;
        if !payload.is_object() {
            return Err(GatewayError::invalid("record payload must be a JSON object"));
        }

        let id = id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        let data = serde_json::to_string(&payload)?;

        // RETURNING statements are stepped to completion so the write has committed before returning
        let rows = sqlx::query(&format!(
            r#"
            INSERT INTO records (collection, id, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(collection)
        .bind(&id)
        .bind(&data)
        .bind(now)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let row = rows
            .first()
            .ok_or_else(|| GatewayError::transient(format!("upsert of {collection}/{id} returned no row")))?;
        record_from_row(row)
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

        let mut sql = String::from(
            "UPDATE records SET data = json_patch(data, ?), updated_at = ? WHERE collection = ? AND id = ?",
        );
        let predicate_binds = push_field_predicates(
            &mut sql,
            expected.iter().map(|(field, value)| (*field, *value, FilterOp::Eq)),
        )?;
        sql.push_str(&format!(" RETURNING {RECORD_COLUMNS}"));

        let mut statement = sqlx::query(&sql)
            .bind(serde_json::to_string(patch)?)
            .bind(Utc::now())
            .bind(collection)
            .bind(id);
        for bind in &predicate_binds {
            statement = statement.bind(bind.as_str());
        }

        // A single UPDATE is atomic, so two racing writers cannot both match the expected state.
        let rows = statement.fetch_all(&self.pool).await?;
        match rows.first() {
            Some(row) => Ok(UpdateOutcome::Applied(record_from_row(row)?)),
            None => {
                let exists = sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(1) FROM records WHERE collection = ? AND id = ?",
                )
                .bind(collection)
                .bind(id)
                .fetch_one(&self.pool)
                .await?;

                if exists == 0 {
                    Err(GatewayError::not_found(format!("{collection}/{id}")))
                } else {
                    Ok(UpdateOutcome::Conflict)
                }
            }
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> GatewayResult<bool> {
        validate_collection(collection)?;
        let result = sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn invoke(&self, function: &str, payload: Value) -> GatewayResult<Value> {
        self.functions.invoke(function, payload).await
    }

    async fn health_check(&self) -> GatewayResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
