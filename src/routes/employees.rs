use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::approvals::DenyReason;
use crate::authz::{parse_permissions, resolve, EmployeeStatus, Role};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::identity::AccessUpdate;
use crate::jwt::CurrentPrincipal;
use crate::models::employee::{AccessRequest, EmployeeProfile};

#[utoipa::path(
    put,
    path = "/employees/{id}/access",
    tag = "Employees",
    params(("id" = Uuid, Path, description = "Employee id")),
    request_body = AccessRequest,
    responses(
        (status = 200, description = "Access updated", body = EmployeeProfile),
        (status = 400, description = "Unknown role or permission, or an administrator locking themselves out"),
        (status = 403, description = "Caller is not an administrator"),
        (status = 404, description = "Employee not found")
    )
)]
pub async fn set_access(
    State(state): State<AppState>,
    CurrentPrincipal(actor): CurrentPrincipal,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<AccessRequest>,
) -> AppResult<Json<EmployeeProfile>> {
    if !actor.is_active() {
        return Err(AppError::Denied(DenyReason::NotAuthenticated));
    }
    if !resolve(Some(&actor)).is_admin {
        return Err(AppError::forbidden("only administrators can change employee access"));
    }

    let role = payload
        .role
        .as_deref()
        .map(|raw| Role::parse(raw).ok_or_else(|| AppError::bad_request(format!("unknown role `{raw}`"))))
        .transpose()?;
    let permissions = payload
        .permissions
        .as_ref()
        .map(|raw| parse_permissions(raw.iter().map(String::as_str)))
        .transpose()
        .map_err(|e| AppError::bad_request(e.to_string()))?;

    if id == actor.id && role.is_some_and(|r| r != Role::Administrator) {
        return Err(AppError::bad_request("administrators cannot remove their own administrator role"));
    }
    if id == actor.id && payload.status == Some(EmployeeStatus::Inactive) {
        return Err(AppError::bad_request("administrators cannot deactivate themselves"));
    }

    let update = AccessUpdate {
        role,
        permissions,
        status: payload.status,
    };
    let change = state.directory.set_access(id, &update).await?;

    if change.changed() {
        log_activity_with_context(
            &state.event_bus,
            "access_updated",
            Some(actor.id),
            &change.after,
            Some(&change.before),
            Some(RequestContext::from_headers(&headers)),
        );
    }

    Ok(Json(EmployeeProfile::from(&change.after)))
}
