use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use crate::app::AppState;
use crate::approvals::{ApprovalRequest, NewDeletionRequest};
use crate::errors::AppResult;
use crate::events::RequestContext;
use crate::jwt::CurrentPrincipal;

#[utoipa::path(
    post,
    path = "/deletions",
    tag = "Approvals",
    request_body = NewDeletionRequest,
    responses(
        (status = 201, description = "Deletion request submitted", body = ApprovalRequest),
        (status = 400, description = "Reserved collection or missing reason"),
        (status = 401, description = "Not signed in"),
        (status = 410, description = "Target record does not exist")
    )
)]
pub async fn submit_deletion(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    headers: HeaderMap,
    Json(payload): Json<NewDeletionRequest>,
) -> AppResult<(StatusCode, Json<ApprovalRequest>)> {
    let request = state
        .workflow
        .submit_deletion(Some(&principal), payload, Some(RequestContext::from_headers(&headers)))
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}
