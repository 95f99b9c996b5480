use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::Principal;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::identity::Account;
use crate::jwt::CurrentPrincipal;
use crate::models::employee::{AuthResponse, EmployeeProfile, LoginRequest, RegisterRequest};
use crate::utils::{hash_password, verify_password};

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Employee registered", body = AuthResponse),
        (status = 400, description = "Invalid name, email or password"),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name is required"));
    }
    if !payload.email.contains('@') {
        return Err(AppError::bad_request("email is invalid"));
    }
    if state.directory.find_account(&payload.email).await?.is_some() {
        return Err(AppError::conflict("email already in use"));
    }

    let password_hash = hash_password(&payload.password)?;
    let mut employee = Principal::new(Uuid::new_v4(), name, payload.email.as_str())
        .with_department(payload.department.trim());
    employee.position = payload.position.trim().to_string();

    state.directory.save(&employee).await?;
    state
        .directory
        .save_account(&Account {
            id: employee.id,
            email: payload.email,
            password_hash,
        })
        .await?;

    // re-read so the response reflects the stored, normalized profile
    let employee = state
        .directory
        .get(employee.id)
        .await?
        .ok_or_else(|| AppError::internal("registered employee was not stored"))?;

    tracing::info!(employee_id = %employee.id, "employee registered");
    log_activity_with_context(
        &state.event_bus,
        "registered",
        Some(employee.id),
        &employee,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    let token = state.jwt.encode(employee.id)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            employee: EmployeeProfile::from(&employee),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials or inactive account")
    )
)]
pub async fn login(State(state): State<AppState>, Json(payload): Json<LoginRequest>) -> AppResult<Json<AuthResponse>> {
    let account = state
        .directory
        .find_account(&payload.email)
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    if !verify_password(&payload.password, &account.password_hash)? {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let employee = state
        .directory
        .get(account.id)
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;
    if !employee.is_active() {
        return Err(AppError::unauthorized("account is inactive"));
    }

    let token = state.jwt.encode(employee.id)?;
    Ok(Json(AuthResponse {
        token,
        employee: EmployeeProfile::from(&employee),
    }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Current employee with capability flags", body = EmployeeProfile),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn me(CurrentPrincipal(principal): CurrentPrincipal) -> AppResult<Json<EmployeeProfile>> {
    Ok(Json(EmployeeProfile::from(&principal)))
}
