use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{approvals, authz, models, routes};

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::auth::register,
		routes::auth::login,
		routes::auth::me,
		routes::employees::set_access,
		routes::approvals::list_requests,
		routes::approvals::submit_request,
		routes::approvals::pending_requests,
		routes::approvals::fingerprint,
		routes::approvals::get_request,
		routes::approvals::decide_request,
		routes::approvals::resend_notification,
		routes::deletions::submit_deletion
	),
	components(
		schemas(
			routes::health::HealthResponse,
			models::employee::EmployeeProfile,
			models::employee::AuthResponse,
			models::employee::LoginRequest,
			models::employee::RegisterRequest,
			models::employee::AccessRequest,
			models::approval::DecisionRequest,
			models::approval::FingerprintResponse,
			models::approval::NotificationReceipt,
			authz::Role,
			authz::EmployeeStatus,
			authz::CapabilityFlags,
			approvals::ApprovalRequest,
			approvals::NewApprovalRequest,
			approvals::NewDeletionRequest,
			approvals::DeletionTarget,
			approvals::RequestKind,
			approvals::RequestStatus,
			approvals::DecisionKind
		)
	),
	tags(
		(name = "Health", description = "Service health"),
		(name = "Auth", description = "Registration, login and the current profile"),
		(name = "Employees", description = "Employee access management"),
		(name = "Approvals", description = "Approval and deletion requests")
	)
)]
pub struct ApiDoc;

/// Operations callable without a bearer token.
const PUBLIC_OPERATIONS: [(&str, &str); 3] = [
	("/api/health", "get"),
	("/auth/register", "post"),
	("/auth/login", "post"),
];

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(&ApiDoc::openapi())?;
	let root = doc
		.as_object_mut()
		.ok_or_else(|| anyhow::anyhow!("OpenAPI root must be an object"))?;

	ensure_security_components(root);
	ensure_global_security(root);
	mark_public_operations(root);
	ensure_servers(root, port);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = {
		let doc_json = Arc::clone(&doc_json);
		get(move || {
			let doc_json = Arc::clone(&doc_json);
			async move { Json((*doc_json).clone()) }
		})
	};

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}

fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Map<String, Value>> {
	let slot = map.entry(key.to_string()).or_insert_with(|| Value::Object(Map::new()));
	if !slot.is_object() {
		*slot = Value::Object(Map::new());
	}
	slot.as_object_mut()
}

fn ensure_security_components(root: &mut Map<String, Value>) {
	let Some(schemes) = object_entry(root, "components").and_then(|c| object_entry(c, "securitySchemes")) else {
		return;
	};

	schemes.insert(
		"bearerAuth".to_string(),
		json!({
			"type": "http",
			"scheme": "bearer",
			"bearerFormat": "JWT"
		}),
	);
}

fn ensure_global_security(root: &mut Map<String, Value>) {
	root
		.entry("security")
		.or_insert_with(|| json!([{ "bearerAuth": [] }]));
}

fn mark_public_operations(root: &mut Map<String, Value>) {
	let Some(paths) = root.get_mut("paths").and_then(Value::as_object_mut) else {
		return;
	};
	for (path, method) in PUBLIC_OPERATIONS {
		if let Some(operation) = paths.get_mut(path).and_then(|item| item.get_mut(method)) {
			operation["security"] = json!([]);
		}
	}
}

fn ensure_servers(root: &mut Map<String, Value>, port: u16) {
	let server_url = format!("http://localhost:{}", port);

	match root.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr.iter().any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			root.insert("servers".to_string(), json!([{ "url": server_url }]));
		}
	}
}
