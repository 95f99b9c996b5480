mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use ops_desk::authz::Role;

#[tokio::test]
async fn approved_deletion_removes_the_target() -> Result<()> {
    let app = common::spawn_app().await?;
    app.gateway
        .write("inventory_items", Some("cement-50kg"), json!({"name": "Cement 50kg", "bags": 120}))
        .await?;

    let (clerk, clerk_id) = app.register("Clerk", "clerk@example.com").await?;
    let (approver, _) = app
        .employee_with_role("Approver", "approver@example.com", Role::Approver)
        .await?;
    let (admin, _) = app
        .employee_with_role("Admin", "admin@example.com", Role::Administrator)
        .await?;

    let (status, request) = app
        .request(
            "POST",
            "/deletions",
            Some(&clerk),
            Some(json!({"table": "inventory_items", "record_id": "cement-50kg", "reason": "Duplicate SKU"})),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "deletion request failed: {request}");
    assert_eq!(request["kind"], "deletion");
    assert_eq!(request["requester_id"], json!(clerk_id));
    assert_eq!(request["deletion"]["snapshot"]["bags"], 120);
    let id = request["id"].as_str().unwrap_or_default().to_string();

    // approvers see other requests but not deletions
    let (_, pending) = app.request("GET", "/approvals/pending", Some(&approver), None).await?;
    assert_eq!(pending.as_array().map(Vec::len), Some(0));

    let (status, body) = app
        .request(
            "POST",
            &format!("/approvals/{id}/decision"),
            Some(&approver),
            Some(json!({"decision": "approve"})),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "insufficient_role");
    assert!(app.gateway.get("inventory_items", "cement-50kg").await?.is_some());

    let (status, decided) = app
        .request(
            "POST",
            &format!("/approvals/{id}/decision"),
            Some(&admin),
            Some(json!({"decision": "approve"})),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "admin decision failed: {decided}");
    assert_eq!(decided["status"], "approved");
    assert!(app.gateway.get("inventory_items", "cement-50kg").await?.is_none());

    Ok(())
}

#[tokio::test]
async fn deletion_requests_are_validated() -> Result<()> {
    let app = common::spawn_app().await?;
    let (clerk, clerk_id) = app.register("Clerk", "clerk@example.com").await?;

    for table in ["employees", "accounts", "approval_requests", "activity_log"] {
        let (status, _) = app
            .request(
                "POST",
                "/deletions",
                Some(&clerk),
                Some(json!({"table": table, "record_id": clerk_id.to_string(), "reason": "cleanup"})),
            )
            .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{table} was accepted as a deletion target");
    }

    let (status, body) = app
        .request(
            "POST",
            "/deletions",
            Some(&clerk),
            Some(json!({"table": "vehicles", "record_id": "missing", "reason": "sold"})),
        )
        .await?;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"], "target_missing");

    app.gateway.write("vehicles", Some("kca-100"), json!({"plate": "KCA 100"})).await?;
    let (status, _) = app
        .request(
            "POST",
            "/deletions",
            Some(&clerk),
            Some(json!({"table": "vehicles", "record_id": "kca-100", "reason": "   "})),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn vanished_target_reports_gone_and_stays_pending() -> Result<()> {
    let app = common::spawn_app().await?;
    app.gateway.write("vehicles", Some("kcb-200"), json!({"plate": "KCB 200"})).await?;
    let (admin_a, _) = app
        .employee_with_role("Admin A", "a@example.com", Role::Administrator)
        .await?;
    let (admin_b, _) = app
        .employee_with_role("Admin B", "b@example.com", Role::Administrator)
        .await?;

    let (_, request) = app
        .request(
            "POST",
            "/deletions",
            Some(&admin_a),
            Some(json!({"table": "vehicles", "record_id": "kcb-200", "reason": "Written off"})),
        )
        .await?;
    let id = request["id"].as_str().unwrap_or_default().to_string();

    // the filing administrator cannot decide it
    let (status, _) = app
        .request(
            "POST",
            &format!("/approvals/{id}/decision"),
            Some(&admin_a),
            Some(json!({"decision": "approve"})),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.gateway.delete("vehicles", "kcb-200").await?;
    let (status, body) = app
        .request(
            "POST",
            &format!("/approvals/{id}/decision"),
            Some(&admin_b),
            Some(json!({"decision": "approve"})),
        )
        .await?;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"], "target_missing");

    let (_, fetched) = app
        .request("GET", &format!("/approvals/{id}"), Some(&admin_b), None)
        .await?;
    assert_eq!(fetched["status"], "pending");

    Ok(())
}
