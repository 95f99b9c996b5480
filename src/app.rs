use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::approvals::ApprovalWorkflow;
use crate::authz::{DefaultPolicyEvaluator, PolicyEvaluator};
use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::feed::DEFAULT_POLL_INTERVAL;
use crate::gateway::DataGateway;
use crate::identity::EmployeeDirectory;
use crate::jwt::JwtConfig;
use crate::routes::{approvals, auth, deletions, employees, health};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn DataGateway>,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
    pub directory: EmployeeDirectory,
    pub workflow: ApprovalWorkflow,
    pub policy: Arc<dyn PolicyEvaluator>,
    pub poll_interval: Duration,
}

impl AppState {
    pub fn new(gateway: Arc<dyn DataGateway>, jwt: JwtConfig, event_bus: EventBus, poll_interval: Duration) -> Self {
        Self {
            directory: EmployeeDirectory::new(Arc::clone(&gateway)),
            workflow: ApprovalWorkflow::new(Arc::clone(&gateway), event_bus.clone()),
            policy: Arc::new(DefaultPolicyEvaluator::new()),
            gateway,
            jwt: Arc::new(jwt),
            event_bus,
            poll_interval,
        }
    }
}

pub async fn create_app(gateway: Arc<dyn DataGateway>) -> Result<Router, AppError> {
    create_app_with_interval(gateway, DEFAULT_POLL_INTERVAL).await
}

/// Build the router and start the activity listener that persists domain events.
pub async fn create_app_with_interval(
    gateway: Arc<dyn DataGateway>,
    poll_interval: Duration,
) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let (event_bus, activity_rx) = init_event_bus();
    tokio::spawn(start_activity_listener(activity_rx, Arc::clone(&gateway)));

    let state = AppState::new(gateway, jwt_config, event_bus, poll_interval);
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me));

    let employee_routes = Router::new().route("/:id/access", put(employees::set_access));

    let approval_routes = Router::new()
        .route("/", get(approvals::list_requests).post(approvals::submit_request))
        .route("/pending", get(approvals::pending_requests))
        .route("/fingerprint", get(approvals::fingerprint))
        .route("/:id", get(approvals::get_request))
        .route("/:id/decision", post(approvals::decide_request))
        .route("/:id/notify", post(approvals::resend_notification));

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/employees", employee_routes)
        .nest("/approvals", approval_routes)
        .route("/deletions", post(deletions::submit_deletion))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
