use serde_json::Value;

#[test]
fn openapi_documents_the_approval_surface() -> anyhow::Result<()> {
    // Build the OpenAPI document the same way the server does
    let doc = ops_desk::docs::build_openapi(8000)?;
    let v = serde_json::to_value(&doc)?;

    let paths = v
        .get("paths")
        .and_then(Value::as_object)
        .expect("paths must exist");
    for path in [
        "/api/health",
        "/auth/register",
        "/auth/login",
        "/auth/me",
        "/employees/{id}/access",
        "/approvals",
        "/approvals/pending",
        "/approvals/fingerprint",
        "/approvals/{id}",
        "/approvals/{id}/decision",
        "/approvals/{id}/notify",
        "/deletions",
    ] {
        assert!(paths.contains_key(path), "OpenAPI missing path '{}'", path);
    }

    let props = v
        .get("components")
        .and_then(Value::as_object)
        .and_then(|c| c.get("schemas"))
        .and_then(Value::as_object)
        .and_then(|s| s.get("ApprovalRequest"))
        .and_then(Value::as_object)
        .and_then(|t| t.get("properties"))
        .and_then(Value::as_object)
        .expect("components.schemas.ApprovalRequest.properties must exist");

    let keys = ["kind", "requester_id", "amount", "status", "decided_by", "decided_at", "decision_note"];
    for k in &keys {
        assert!(props.contains_key(*k), "OpenAPI ApprovalRequest schema missing '{}'", k);
    }

    Ok(())
}
