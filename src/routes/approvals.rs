use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::approvals::{ApprovalRequest, DenyReason, ListFilter, NewApprovalRequest, APPROVAL_REQUESTS};
use crate::authz::{permissions, resolve, Principal};
use crate::errors::{AppError, AppResult};
use crate::events::RequestContext;
use crate::feed::poller::fingerprint as collection_fingerprint;
use crate::jwt::CurrentPrincipal;
use crate::models::approval::{DecisionRequest, FingerprintResponse, NotificationReceipt};

/// Approvers and holders of `Approvals:view` see every request; everyone else only their own.
async fn sees_all_requests(state: &AppState, principal: &Principal) -> bool {
    resolve(Some(principal)).can_approve_requests || state.policy.can(principal, permissions::APPROVALS_VIEW).await
}

#[utoipa::path(
    get,
    path = "/approvals",
    tag = "Approvals",
    params(ListFilter),
    responses(
        (status = 200, description = "Approval requests, newest first", body = [ApprovalRequest]),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn list_requests(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Query(mut filter): Query<ListFilter>,
) -> AppResult<Json<Vec<ApprovalRequest>>> {
    if !principal.is_active() {
        return Err(AppError::Denied(DenyReason::NotAuthenticated));
    }
    if !sees_all_requests(&state, &principal).await {
        filter.requester_id = Some(principal.id);
    }

    let requests = state.workflow.list(&filter).await?;
    Ok(Json(requests))
}

#[utoipa::path(
    post,
    path = "/approvals",
    tag = "Approvals",
    request_body = NewApprovalRequest,
    responses(
        (status = 201, description = "Request submitted", body = ApprovalRequest),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn submit_request(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    headers: HeaderMap,
    Json(payload): Json<NewApprovalRequest>,
) -> AppResult<(StatusCode, Json<ApprovalRequest>)> {
    let request = state
        .workflow
        .submit(Some(&principal), payload, Some(RequestContext::from_headers(&headers)))
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

#[utoipa::path(
    get,
    path = "/approvals/pending",
    tag = "Approvals",
    responses(
        (status = 200, description = "Pending requests the caller may decide", body = [ApprovalRequest]),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn pending_requests(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> AppResult<Json<Vec<ApprovalRequest>>> {
    let pending = state.workflow.pending_for(Some(&principal)).await?;
    Ok(Json(pending))
}

#[utoipa::path(
    get,
    path = "/approvals/fingerprint",
    tag = "Approvals",
    responses(
        (status = 200, description = "Current fingerprint of the approval queue", body = FingerprintResponse),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn fingerprint(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> AppResult<Json<FingerprintResponse>> {
    if !principal.is_active() {
        return Err(AppError::Denied(DenyReason::NotAuthenticated));
    }

    let fingerprint =
        collection_fingerprint(state.gateway.as_ref(), APPROVAL_REQUESTS, &crate::gateway::Query::new()).await?;
    Ok(Json(FingerprintResponse {
        fingerprint,
        poll_interval_ms: state.poll_interval.as_millis() as u64,
    }))
}

#[utoipa::path(
    get,
    path = "/approvals/{id}",
    tag = "Approvals",
    params(("id" = Uuid, Path, description = "Approval request id")),
    responses(
        (status = 200, description = "Approval request", body = ApprovalRequest),
        (status = 403, description = "Request belongs to someone else"),
        (status = 404, description = "Approval request not found")
    )
)]
pub async fn get_request(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApprovalRequest>> {
    if !principal.is_active() {
        return Err(AppError::Denied(DenyReason::NotAuthenticated));
    }

    let request = state.workflow.get(id).await?;
    if request.requester_id != principal.id && !sees_all_requests(&state, &principal).await {
        return Err(AppError::forbidden("this request belongs to another employee"));
    }
    Ok(Json(request))
}

#[utoipa::path(
    post,
    path = "/approvals/{id}/decision",
    tag = "Approvals",
    params(("id" = Uuid, Path, description = "Approval request id")),
    request_body = DecisionRequest,
    responses(
        (status = 200, description = "Decision recorded", body = ApprovalRequest),
        (status = 401, description = "Not signed in or inactive"),
        (status = 403, description = "Insufficient role or own request"),
        (status = 404, description = "Approval request not found"),
        (status = 409, description = "Request already decided"),
        (status = 410, description = "Deletion target no longer exists")
    )
)]
pub async fn decide_request(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<DecisionRequest>,
) -> AppResult<Json<ApprovalRequest>> {
    let decided = state
        .workflow
        .decide(
            Some(&principal),
            id,
            payload.decision,
            payload.note,
            Some(RequestContext::from_headers(&headers)),
        )
        .await?;
    Ok(Json(decided))
}

#[utoipa::path(
    post,
    path = "/approvals/{id}/notify",
    tag = "Approvals",
    params(("id" = Uuid, Path, description = "Approval request id")),
    responses(
        (status = 200, description = "Notification queued", body = NotificationReceipt),
        (status = 403, description = "Neither requester nor decider"),
        (status = 404, description = "Approval request not found")
    )
)]
pub async fn resend_notification(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<NotificationReceipt>> {
    let receipt = state.workflow.resend_notification(Some(&principal), id).await?;
    Ok(Json(NotificationReceipt { receipt }))
}
