#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use ops_desk::authz::{Permission, Role};
use ops_desk::create_app;
use ops_desk::gateway::{DataGateway, FunctionRegistry, NotificationOutbox, SqliteGateway};
use ops_desk::identity::{AccessUpdate, EmployeeDirectory};

pub struct TestApp {
    pub app: Router,
    pub gateway: Arc<dyn DataGateway>,
    pub directory: EmployeeDirectory,
    pub outbox: NotificationOutbox,
    _dir: TempDir,
}

pub async fn spawn_app() -> Result<TestApp> {
    // create temp dir and sqlite db
    let dir = tempdir()?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    // run migrations
    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    let outbox = NotificationOutbox::new();
    let gateway: Arc<dyn DataGateway> =
        Arc::new(SqliteGateway::new(pool, FunctionRegistry::with_defaults(outbox.clone())));

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(Arc::clone(&gateway)).await?;

    Ok(TestApp {
        app,
        directory: EmployeeDirectory::new(Arc::clone(&gateway)),
        gateway,
        outbox,
        _dir: dir,
    })
}

impl TestApp {
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let resp = self.app.clone().oneshot(req).await?;
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
        Ok((status, value))
    }

    /// Register an employee and return their token and id.
    pub async fn register(&self, name: &str, email: &str) -> Result<(String, Uuid)> {
        let (status, body) = self
            .request(
                "POST",
                "/auth/register",
                None,
                Some(json!({
                    "name": name,
                    "email": email,
                    "password": "password123",
                    "department": "Operations"
                })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");

        let token = body["token"].as_str().unwrap_or_default().to_string();
        let id: Uuid = serde_json::from_value(body["employee"]["id"].clone())?;
        Ok((token, id))
    }

    pub async fn grant(&self, id: Uuid, role: Role, permissions: &[Permission]) -> Result<()> {
        let update = AccessUpdate {
            role: Some(role),
            permissions: Some(permissions.iter().copied().collect()),
            status: None,
        };
        self.directory.set_access(id, &update).await?;
        Ok(())
    }

    /// Register an employee holding `role`.
    pub async fn employee_with_role(&self, name: &str, email: &str, role: Role) -> Result<(String, Uuid)> {
        let (token, id) = self.register(name, email).await?;
        self.grant(id, role, &[]).await?;
        Ok((token, id))
    }
}
