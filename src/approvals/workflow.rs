use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{
    authorize, ApprovalRequest, DecisionKind, DeletionTarget, DenyReason, NewDeletionRequest, RequestKind,
    RequestStatus, WorkflowError, WorkflowResult, APPROVAL_REQUESTS,
};
use crate::authz::{resolve, Principal};
use crate::events::{log_activity, log_activity_with_context, EventBus, RequestContext};
use crate::gateway::{self, DataGateway, Direction, Query, UpdateOutcome, SEND_NOTIFICATION};

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewApprovalRequest {
    pub kind: RequestKind,
    #[schema(value_type = Option<String>, example = "1250.00")]
    pub amount: Option<Decimal>,
    pub description: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: Value,
}

impl NewApprovalRequest {
    fn validate(&self) -> WorkflowResult<()> {
        if self.kind == RequestKind::Deletion {
            return Err(WorkflowError::invalid("deletion requests must name a target record"));
        }
        if self.description.trim().is_empty() {
            return Err(WorkflowError::invalid("description is required"));
        }
        match self.amount {
            Some(amount) if amount.is_sign_negative() && !amount.is_zero() => {
                Err(WorkflowError::invalid("amount must not be negative"))
            }
            None if self.kind.requires_amount() => {
                Err(WorkflowError::invalid(format!("{} requests require an amount", self.kind.as_str())))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListFilter {
    pub status: Option<RequestStatus>,
    pub kind: Option<RequestKind>,
    pub requester_id: Option<Uuid>,
    pub limit: Option<usize>,
}

/// Request lifecycle on top of a [`DataGateway`]. Cheap to clone.
#[derive(Clone)]
pub struct ApprovalWorkflow {
    gateway: Arc<dyn DataGateway>,
    events: EventBus,
}

fn active(principal: Option<&Principal>) -> WorkflowResult<&Principal> {
    principal
        .filter(|p| p.is_active())
        .ok_or(WorkflowError::Denied(DenyReason::NotAuthenticated))
}

impl ApprovalWorkflow {
    pub fn new(gateway: Arc<dyn DataGateway>, events: EventBus) -> Self {
        Self { gateway, events }
    }

    pub fn gateway(&self) -> &Arc<dyn DataGateway> {
        &self.gateway
    }

    fn draft(requester: &Principal, kind: RequestKind) -> ApprovalRequest {
        ApprovalRequest {
            id: Uuid::new_v4(),
            kind,
            requester_id: requester.id,
            requester_name: requester.name.clone(),
            requester_department: requester.department.clone(),
            amount: None,
            description: String::new(),
            payload: Value::Null,
            deletion: None,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            decided_by: None,
            decided_at: None,
            decision_note: None,
        }
    }

    async fn store(&self, request: &ApprovalRequest) -> WorkflowResult<()> {
        gateway::write_as(self.gateway.as_ref(), APPROVAL_REQUESTS, &request.id.to_string(), request).await?;
        Ok(())
    }

    pub async fn submit(
        &self,
        principal: Option<&Principal>,
        new: NewApprovalRequest,
        context: Option<RequestContext>,
    ) -> WorkflowResult<ApprovalRequest> {
        let requester = active(principal)?;
        new.validate()?;

        let mut request = Self::draft(requester, new.kind);
        request.amount = new.amount;
        request.description = new.description.trim().to_string();
        request.payload = new.payload;
        self.store(&request).await?;

        tracing::info!(
            request_id = %request.id,
            kind = request.kind.as_str(),
            requester_id = %requester.id,
            "approval request submitted"
        );
        log_activity_with_context(&self.events, "submitted", Some(requester.id), &request, None, context);
        Ok(request)
    }

    /// File a request to delete `table/record_id`. The current record is snapshotted
    /// so the decider sees what will be removed.
    pub async fn submit_deletion(
        &self,
        principal: Option<&Principal>,
        new: NewDeletionRequest,
        context: Option<RequestContext>,
    ) -> WorkflowResult<ApprovalRequest> {
        let requester = active(principal)?;
        new.validate()?;

        let record = self
            .gateway
            .get(&new.table, &new.record_id)
            .await?
            .ok_or(WorkflowError::Denied(DenyReason::TargetMissing))?;

        let mut snapshot = record.data;
        if let Value::Object(map) = &mut snapshot {
            map.insert("id".to_string(), Value::String(record.id.clone()));
        }

        let mut request = Self::draft(requester, RequestKind::Deletion);
        request.description = format!("Delete {}/{}", new.table, record.id);
        request.deletion = Some(DeletionTarget {
            table: new.table,
            record_id: record.id,
            snapshot,
            reason: new.reason.trim().to_string(),
        });
        self.store(&request).await?;

        tracing::info!(request_id = %request.id, requester_id = %requester.id, "deletion request submitted");
        log_activity_with_context(&self.events, "submitted", Some(requester.id), &request, None, context);
        Ok(request)
    }

    pub async fn get(&self, id: Uuid) -> WorkflowResult<ApprovalRequest> {
        gateway::get_as(self.gateway.as_ref(), APPROVAL_REQUESTS, &id.to_string())
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("approval request {id}")))
    }

    /// Newest first.
    pub async fn list(&self, filter: &ListFilter) -> WorkflowResult<Vec<ApprovalRequest>> {
        let mut query = Query::new()
            .order_by("created_at", Direction::Desc)
            .limit(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT));
        if let Some(status) = filter.status {
            query = query.eq("status", status.as_str());
        }
        if let Some(kind) = filter.kind {
            query = query.eq("kind", kind.as_str());
        }
        if let Some(requester_id) = filter.requester_id {
            query = query.eq("requester_id", requester_id.to_string());
        }

        let records = self.gateway.read(APPROVAL_REQUESTS, &query).await?;
        let mut requests = Vec::with_capacity(records.len());
        for record in records {
            requests.push(record.decode()?);
        }
        Ok(requests)
    }

    /// Pending requests `principal` is allowed to decide.
    pub async fn pending_for(&self, principal: Option<&Principal>) -> WorkflowResult<Vec<ApprovalRequest>> {
        let principal = active(principal)?;
        let query = Query::new()
            .eq("status", RequestStatus::Pending.as_str())
            .order_by("created_at", Direction::Desc);

        let mut pending = Vec::new();
        for record in self.gateway.read(APPROVAL_REQUESTS, &query).await? {
            let request: ApprovalRequest = record.decode()?;
            if authorize(Some(principal), &request).is_allowed() {
                pending.push(request);
            }
        }
        Ok(pending)
    }

    /// Approve or reject a pending request.
    ///
    /// The status write only applies while the stored status is still `pending`;
    /// losing that race yields `AlreadyDecided`.
    pub async fn decide(
        &self,
        principal: Option<&Principal>,
        id: Uuid,
        decision: DecisionKind,
        note: Option<String>,
        context: Option<RequestContext>,
    ) -> WorkflowResult<ApprovalRequest> {
        let request = self.get(id).await?;
        authorize(principal, &request).into_result()?;
        let actor = active(principal)?;

        let deletion = match (decision, &request.deletion) {
            (DecisionKind::Approve, Some(target)) => {
                self.ensure_target(target).await?;
                Some(target)
            }
            (DecisionKind::Approve, None) if request.kind == RequestKind::Deletion => {
                return Err(WorkflowError::invalid("deletion request has no target"));
            }
            _ => None,
        };

        let status = decision.resulting_status();
        let patch = json!({
            "status": status,
            "decided_by": actor.id,
            "decided_at": Utc::now(),
            "decision_note": note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        });
        let expected = json!({ "status": RequestStatus::Pending });

        let decided: ApprovalRequest = match self
            .gateway
            .conditional_update(APPROVAL_REQUESTS, &id.to_string(), &expected, &patch)
            .await?
        {
            UpdateOutcome::Applied(record) => record.decode()?,
            UpdateOutcome::Conflict => {
                tracing::info!(request_id = %id, actor_id = %actor.id, "lost decision race");
                return Err(DenyReason::AlreadyDecided.into());
            }
        };

        tracing::info!(
            request_id = %id,
            actor_id = %actor.id,
            status = status.as_str(),
            "approval request decided"
        );
        log_activity_with_context(
            &self.events,
            status.as_str(),
            Some(actor.id),
            &decided,
            Some(&request),
            context,
        );

        if let Some(target) = deletion {
            let removed = match self.gateway.delete(&target.table, &target.record_id).await {
                Ok(removed) => removed,
                Err(e) => {
                    self.reopen(actor, &decided).await;
                    return Err(e.into());
                }
            };
            if !removed {
                tracing::warn!(
                    request_id = %id,
                    table = %target.table,
                    record_id = %target.record_id,
                    "deletion target vanished after approval"
                );
                return Err(DenyReason::TargetMissing.into());
            }
            tracing::info!(table = %target.table, record_id = %target.record_id, "deletion target removed");
            log_activity(&self.events, "target_deleted", Some(actor.id), &decided);
        }

        let message = format!("Your {} request was {}", decided.kind.as_str(), status.as_str());
        if let Err(e) = self.notify(actor, &decided, &message).await {
            tracing::warn!(request_id = %id, error = %e, "failed to notify requester");
        }

        Ok(decided)
    }

    /// Put an approved deletion back to pending after its target could not be removed,
    /// so the decision can be retried. Only reverts the decision `actor` just made.
    async fn reopen(&self, actor: &Principal, decided: &ApprovalRequest) {
        let expected = json!({ "status": RequestStatus::Approved, "decided_by": actor.id });
        let patch = json!({
            "status": RequestStatus::Pending,
            "decided_by": null,
            "decided_at": null,
            "decision_note": null,
        });
        match self
            .gateway
            .conditional_update(APPROVAL_REQUESTS, &decided.id.to_string(), &expected, &patch)
            .await
        {
            Ok(UpdateOutcome::Applied(record)) => {
                tracing::warn!(request_id = %decided.id, "deletion failed, request reopened");
                if let Ok(reopened) = record.decode::<ApprovalRequest>() {
                    log_activity_with_context(
                        &self.events,
                        "reopened",
                        Some(actor.id),
                        &reopened,
                        Some(decided),
                        None,
                    );
                }
            }
            Ok(UpdateOutcome::Conflict) => {
                tracing::warn!(request_id = %decided.id, "deletion failed and the decision changed underneath");
            }
            Err(e) => {
                tracing::error!(request_id = %decided.id, error = %e, "deletion failed and the request could not be reopened");
            }
        }
    }

    async fn ensure_target(&self, target: &DeletionTarget) -> WorkflowResult<()> {
        let current = self.gateway.get(&target.table, &target.record_id).await?;
        let snapshot_id = target.snapshot.get("id").and_then(Value::as_str);
        match current {
            Some(record) if snapshot_id.map_or(true, |sid| sid == record.id) => Ok(()),
            _ => Err(DenyReason::TargetMissing.into()),
        }
    }

    /// Send the requester a notification about `request` again. Allowed for the
    /// requester and for anyone with the capability to decide it.
    pub async fn resend_notification(&self, principal: Option<&Principal>, id: Uuid) -> WorkflowResult<Value> {
        let actor = active(principal)?;
        let request = self.get(id).await?;

        let flags = resolve(Some(actor));
        let capable = match request.kind {
            RequestKind::Deletion => flags.is_admin,
            _ => flags.can_approve_requests,
        };
        if actor.id != request.requester_id && !capable {
            return Err(DenyReason::InsufficientRole.into());
        }

        let message = format!(
            "Reminder: your {} request is {}",
            request.kind.as_str(),
            request.status.as_str()
        );
        self.notify(actor, &request, &message).await
    }

    async fn notify(&self, actor: &Principal, request: &ApprovalRequest, message: &str) -> WorkflowResult<Value> {
        let payload = json!({
            "recipient_id": request.requester_id,
            "request_id": request.id,
            "kind": request.kind,
            "status": request.status,
            "actor_id": actor.id,
            "message": message,
        });
        let receipt = self.gateway.invoke(SEND_NOTIFICATION, payload).await?;
        log_activity(&self.events, "notified", Some(actor.id), request);
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::authz::{Action, Module, Permission, Role};
    use crate::events::init_event_bus;
    use crate::gateway::{FunctionRegistry, GatewayError, GatewayResult, MemoryGateway, NotificationOutbox, RemoteFunction};

    struct Fixture {
        workflow: ApprovalWorkflow,
        gateway: Arc<dyn DataGateway>,
        outbox: NotificationOutbox,
        events: tokio::sync::broadcast::Receiver<Value>,
    }

    fn fixture() -> Fixture {
        let outbox = NotificationOutbox::new();
        let gateway: Arc<dyn DataGateway> = Arc::new(MemoryGateway::new(FunctionRegistry::with_defaults(outbox.clone())));
        let (bus, events) = init_event_bus();
        Fixture {
            workflow: ApprovalWorkflow::new(Arc::clone(&gateway), bus),
            gateway,
            outbox,
            events,
        }
    }

    fn employee(name: &str, role: Role) -> Principal {
        Principal::new(Uuid::new_v4(), name, format!("{}@example.com", name.to_lowercase()))
            .with_role(role)
            .with_department("Operations")
    }

    fn expense(amount: &str) -> NewApprovalRequest {
        NewApprovalRequest {
            kind: RequestKind::Expense,
            amount: Some(Decimal::from_str(amount).unwrap()),
            description: "Generator fuel".to_string(),
            payload: json!({"vendor": "Total"}),
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<Value>) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event["name"].as_str().unwrap_or_default().to_string());
        }
        names
    }

    #[tokio::test]
    async fn submit_records_requester_snapshot() {
        let mut fx = fixture();
        let user = employee("Wanjiru", Role::User);

        let request = fx.workflow.submit(Some(&user), expense("1250.50"), None).await.unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.requester_id, user.id);
        assert_eq!(request.requester_department, "Operations");

        let stored = fx.workflow.get(request.id).await.unwrap();
        assert_eq!(stored, request);
        assert_eq!(drain(&mut fx.events), vec!["approval_request.submitted"]);
    }

    #[tokio::test]
    async fn submit_validates_amounts() {
        let fx = fixture();
        let user = employee("Otieno", Role::User);

        let mut missing = expense("1");
        missing.amount = None;
        assert!(matches!(
            fx.workflow.submit(Some(&user), missing, None).await,
            Err(WorkflowError::Invalid(_))
        ));
        assert!(matches!(
            fx.workflow.submit(Some(&user), expense("-3.00"), None).await,
            Err(WorkflowError::Invalid(_))
        ));

        let other = NewApprovalRequest {
            kind: RequestKind::Other,
            amount: None,
            description: "Leave on Friday".to_string(),
            payload: Value::Null,
        };
        assert!(fx.workflow.submit(Some(&user), other, None).await.is_ok());
        assert!(matches!(
            fx.workflow.submit(None, expense("10"), None).await,
            Err(WorkflowError::Denied(DenyReason::NotAuthenticated))
        ));
    }

    #[tokio::test]
    async fn approver_decides_and_requester_is_notified() {
        let mut fx = fixture();
        let user = employee("Achieng", Role::User);
        let approver = employee("Kamau", Role::Approver);

        let request = fx.workflow.submit(Some(&user), expense("300"), None).await.unwrap();
        let decided = fx
            .workflow
            .decide(Some(&approver), request.id, DecisionKind::Approve, Some(" ok ".to_string()), None)
            .await
            .unwrap();

        assert_eq!(decided.status, RequestStatus::Approved);
        assert_eq!(decided.decided_by, Some(approver.id));
        assert!(decided.decided_at.is_some());
        assert_eq!(decided.decision_note.as_deref(), Some("ok"));

        let sent = fx.outbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["recipient_id"], json!(user.id));
        assert_eq!(sent[0]["status"], "approved");

        let names = drain(&mut fx.events);
        assert!(names.contains(&"approval_request.approved".to_string()));
        assert!(names.contains(&"approval_request.notified".to_string()));
    }

    #[tokio::test]
    async fn second_decision_is_already_decided() {
        let fx = fixture();
        let user = employee("Njeri", Role::User);
        let first = employee("Admin", Role::Administrator);
        let second = employee("Delegate", Role::AdminDelegate);

        let request = fx.workflow.submit(Some(&user), expense("50"), None).await.unwrap();
        fx.workflow
            .decide(Some(&first), request.id, DecisionKind::Reject, None, None)
            .await
            .unwrap();

        let err = fx
            .workflow
            .decide(Some(&second), request.id, DecisionKind::Approve, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Denied(DenyReason::AlreadyDecided)));
        assert_eq!(fx.workflow.get(request.id).await.unwrap().status, RequestStatus::Rejected);
    }

    #[tokio::test]
    async fn concurrent_decisions_have_one_winner() {
        let fx = fixture();
        let user = employee("Mwangi", Role::User);
        let request = fx.workflow.submit(Some(&user), expense("75"), None).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let workflow = fx.workflow.clone();
            let approver = employee(&format!("Approver{i}"), Role::Approver);
            let decision = if i % 2 == 0 { DecisionKind::Approve } else { DecisionKind::Reject };
            handles.push(tokio::spawn(async move {
                workflow.decide(Some(&approver), request.id, decision, None, None).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(WorkflowError::Denied(DenyReason::AlreadyDecided)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn requester_cannot_decide_own_request() {
        let fx = fixture();
        let approver = employee("Self", Role::Approver);
        let request = fx.workflow.submit(Some(&approver), expense("20"), None).await.unwrap();

        let err = fx
            .workflow
            .decide(Some(&approver), request.id, DecisionKind::Approve, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Denied(DenyReason::SelfApprovalForbidden)));
        assert!(fx.workflow.get(request.id).await.unwrap().is_pending());
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let fx = fixture();
        let admin = employee("Admin", Role::Administrator);
        let err = fx
            .workflow
            .decide(Some(&admin), Uuid::new_v4(), DecisionKind::Approve, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn approved_deletion_removes_target() {
        let mut fx = fixture();
        fx.gateway
            .write("inventory_items", Some("item-7"), json!({"name": "Cement", "bags": 40}))
            .await
            .unwrap();
        let requester = employee("Store", Role::Administrator);
        let decider = employee("Other", Role::Administrator);

        let request = fx
            .workflow
            .submit_deletion(
                Some(&requester),
                NewDeletionRequest {
                    table: "inventory_items".to_string(),
                    record_id: "item-7".to_string(),
                    reason: "duplicate entry".to_string(),
                },
                None,
            )
            .await
            .unwrap();
        let target = request.deletion.clone().unwrap();
        assert_eq!(target.snapshot["bags"], 40);
        assert_eq!(target.snapshot["id"], "item-7");

        let err = fx
            .workflow
            .decide(Some(&requester), request.id, DecisionKind::Approve, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Denied(DenyReason::SelfApprovalForbidden)));

        fx.workflow
            .decide(Some(&decider), request.id, DecisionKind::Approve, None, None)
            .await
            .unwrap();
        assert!(fx.gateway.get("inventory_items", "item-7").await.unwrap().is_none());
        assert!(drain(&mut fx.events).contains(&"approval_request.target_deleted".to_string()));
    }

    #[tokio::test]
    async fn deletion_needs_an_administrator_to_decide() {
        let fx = fixture();
        fx.gateway.write("vehicles", Some("kbx-1"), json!({"plate": "KBX 001"})).await.unwrap();
        let user = employee("Driver", Role::User);
        let approver = employee("Approver", Role::Approver);

        let request = fx
            .workflow
            .submit_deletion(
                Some(&user),
                NewDeletionRequest {
                    table: "vehicles".to_string(),
                    record_id: "kbx-1".to_string(),
                    reason: "sold".to_string(),
                },
                None,
            )
            .await
            .unwrap();

        let err = fx
            .workflow
            .decide(Some(&approver), request.id, DecisionKind::Approve, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Denied(DenyReason::InsufficientRole)));
        assert!(fx.gateway.get("vehicles", "kbx-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn vanished_target_leaves_request_pending() {
        let fx = fixture();
        fx.gateway.write("vehicles", Some("kbx-2"), json!({"plate": "KBX 002"})).await.unwrap();
        let user = employee("Driver", Role::User);
        let admin = employee("Admin", Role::Administrator);

        let request = fx
            .workflow
            .submit_deletion(
                Some(&user),
                NewDeletionRequest {
                    table: "vehicles".to_string(),
                    record_id: "kbx-2".to_string(),
                    reason: "scrapped".to_string(),
                },
                None,
            )
            .await
            .unwrap();
        fx.gateway.delete("vehicles", "kbx-2").await.unwrap();

        let err = fx
            .workflow
            .decide(Some(&admin), request.id, DecisionKind::Approve, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Denied(DenyReason::TargetMissing)));
        assert!(fx.workflow.get(request.id).await.unwrap().is_pending());

        // rejecting needs no target
        let rejected = fx
            .workflow
            .decide(Some(&admin), request.id, DecisionKind::Reject, None, None)
            .await
            .unwrap();
        assert_eq!(rejected.status, RequestStatus::Rejected);
    }

    #[tokio::test]
    async fn deletion_of_missing_record_is_refused_at_submit() {
        let fx = fixture();
        let user = employee("Clerk", Role::User);
        let err = fx
            .workflow
            .submit_deletion(
                Some(&user),
                NewDeletionRequest {
                    table: "vehicles".to_string(),
                    record_id: "nope".to_string(),
                    reason: "typo".to_string(),
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Denied(DenyReason::TargetMissing)));
    }

    #[tokio::test]
    async fn pending_for_excludes_own_and_out_of_scope_requests() {
        let fx = fixture();
        fx.gateway.write("vehicles", Some("kbx-3"), json!({"plate": "KBX 003"})).await.unwrap();
        let user = employee("User", Role::User);
        let approver = employee("Approver", Role::Approver);

        let theirs = fx.workflow.submit(Some(&user), expense("10"), None).await.unwrap();
        let own = fx.workflow.submit(Some(&approver), expense("11"), None).await.unwrap();
        let deletion = fx
            .workflow
            .submit_deletion(
                Some(&user),
                NewDeletionRequest {
                    table: "vehicles".to_string(),
                    record_id: "kbx-3".to_string(),
                    reason: "sold".to_string(),
                },
                None,
            )
            .await
            .unwrap();

        let ids: Vec<Uuid> = fx
            .workflow
            .pending_for(Some(&approver))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![theirs.id]);
        assert!(!ids.contains(&own.id));
        assert!(!ids.contains(&deletion.id));

        assert!(fx.workflow.pending_for(Some(&user)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_filters_by_status_and_kind() {
        let fx = fixture();
        let user = employee("User", Role::User);
        let admin = employee("Admin", Role::Administrator);

        let a = fx.workflow.submit(Some(&user), expense("1"), None).await.unwrap();
        let _b = fx.workflow.submit(Some(&user), expense("2"), None).await.unwrap();
        fx.workflow.decide(Some(&admin), a.id, DecisionKind::Approve, None, None).await.unwrap();

        let approved = fx
            .workflow
            .list(&ListFilter {
                status: Some(RequestStatus::Approved),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].id, a.id);

        let money = fx
            .workflow
            .list(&ListFilter {
                kind: Some(RequestKind::Money),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(money.is_empty());
        assert_eq!(fx.workflow.list(&ListFilter::default()).await.unwrap().len(), 2);
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Fault {
        None,
        DeleteFails,
        TargetRemovedAfterCheck,
    }

    /// Memory gateway that misbehaves around deletion targets.
    struct FaultyGateway {
        inner: MemoryGateway,
        fault: std::sync::Mutex<Fault>,
    }

    impl FaultyGateway {
        fn new(fault: Fault) -> Self {
            Self {
                inner: MemoryGateway::new(FunctionRegistry::new()),
                fault: std::sync::Mutex::new(fault),
            }
        }

        fn set(&self, fault: Fault) {
            *self.fault.lock().unwrap() = fault;
        }

        fn current(&self) -> Fault {
            *self.fault.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl DataGateway for FaultyGateway {
        async fn read(&self, collection: &str, query: &Query) -> GatewayResult<Vec<crate::gateway::Record>> {
            self.inner.read(collection, query).await
        }

        async fn get(&self, collection: &str, id: &str) -> GatewayResult<Option<crate::gateway::Record>> {
            let record = self.inner.get(collection, id).await?;
            if collection != APPROVAL_REQUESTS && self.current() == Fault::TargetRemovedAfterCheck {
                self.inner.delete(collection, id).await?;
            }
            Ok(record)
        }

        async fn write(&self, collection: &str, id: Option<&str>, payload: Value) -> GatewayResult<crate::gateway::Record> {
            self.inner.write(collection, id, payload).await
        }

        async fn conditional_update(
            &self,
            collection: &str,
            id: &str,
            expected: &Value,
            patch: &Value,
        ) -> GatewayResult<UpdateOutcome> {
            self.inner.conditional_update(collection, id, expected, patch).await
        }

        async fn delete(&self, collection: &str, id: &str) -> GatewayResult<bool> {
            if self.current() == Fault::DeleteFails {
                return Err(GatewayError::transient("database is locked"));
            }
            self.inner.delete(collection, id).await
        }

        async fn invoke(&self, function: &str, payload: Value) -> GatewayResult<Value> {
            self.inner.invoke(function, payload).await
        }

        async fn health_check(&self) -> GatewayResult<()> {
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "faulty"
        }
    }

    async fn deletion_on(gateway: &Arc<FaultyGateway>) -> (ApprovalWorkflow, ApprovalRequest) {
        gateway.write("vehicles", Some("kbx-9"), json!({"plate": "KBX 009"})).await.unwrap();
        let (bus, _rx) = init_event_bus();
        let shared: Arc<dyn DataGateway> = Arc::clone(gateway) as Arc<dyn DataGateway>;
        let workflow = ApprovalWorkflow::new(shared, bus);
        let user = employee("Driver", Role::User);
        let request = workflow
            .submit_deletion(
                Some(&user),
                NewDeletionRequest {
                    table: "vehicles".to_string(),
                    record_id: "kbx-9".to_string(),
                    reason: "written off".to_string(),
                },
                None,
            )
            .await
            .unwrap();
        (workflow, request)
    }

    #[tokio::test]
    async fn failed_target_delete_reopens_the_request() {
        let gateway = Arc::new(FaultyGateway::new(Fault::None));
        let (workflow, request) = deletion_on(&gateway).await;
        let admin = employee("Admin", Role::Administrator);

        gateway.set(Fault::DeleteFails);
        let err = workflow
            .decide(Some(&admin), request.id, DecisionKind::Approve, Some("gone".to_string()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Gateway(GatewayError::Transient(_))));

        let stored = workflow.get(request.id).await.unwrap();
        assert!(stored.is_pending());
        assert_eq!(stored.decided_by, None);
        assert_eq!(stored.decision_note, None);
        assert!(gateway.get("vehicles", "kbx-9").await.unwrap().is_some());

        gateway.set(Fault::None);
        let decided = workflow
            .decide(Some(&admin), request.id, DecisionKind::Approve, None, None)
            .await
            .unwrap();
        assert_eq!(decided.status, RequestStatus::Approved);
        assert!(gateway.get("vehicles", "kbx-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn target_removed_after_check_keeps_the_approval() {
        let gateway = Arc::new(FaultyGateway::new(Fault::None));
        let (workflow, request) = deletion_on(&gateway).await;
        let admin = employee("Admin", Role::Administrator);

        gateway.set(Fault::TargetRemovedAfterCheck);
        let err = workflow
            .decide(Some(&admin), request.id, DecisionKind::Approve, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Denied(DenyReason::TargetMissing)));

        gateway.set(Fault::None);
        let stored = workflow.get(request.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Approved);
        assert_eq!(stored.decided_by, Some(admin.id));
    }

    #[tokio::test]
    async fn list_limit_is_capped() {
        let fx = fixture();
        let user = employee("User", Role::User);
        fx.workflow.submit(Some(&user), expense("1"), None).await.unwrap();

        let all = fx
            .workflow
            .list(&ListFilter {
                limit: Some(usize::MAX),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl RemoteFunction for Unreachable {
        async fn call(&self, _payload: Value) -> GatewayResult<Value> {
            Err(GatewayError::transient("notification service unreachable"))
        }
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_the_decision() {
        let functions = FunctionRegistry::new().register(SEND_NOTIFICATION, Unreachable);
        let gateway: Arc<dyn DataGateway> = Arc::new(MemoryGateway::new(functions));
        let (bus, _rx) = init_event_bus();
        let workflow = ApprovalWorkflow::new(gateway, bus);

        let user = employee("User", Role::User);
        let finance = employee("Finance", Role::User)
            .with_permissions(vec![Permission::scoped(Module::Finance, Action::Approve)]);
        let request = workflow.submit(Some(&user), expense("5"), None).await.unwrap();

        let decided = workflow
            .decide(Some(&finance), request.id, DecisionKind::Approve, None, None)
            .await
            .unwrap();
        assert_eq!(decided.status, RequestStatus::Approved);

        // an explicit resend surfaces the failure
        let err = workflow.resend_notification(Some(&user), request.id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Gateway(GatewayError::Transient(_))));
    }

    #[tokio::test]
    async fn resend_is_limited_to_requester_and_deciders() {
        let fx = fixture();
        let user = employee("User", Role::User);
        let stranger = employee("Stranger", Role::User);
        let approver = employee("Approver", Role::Approver);
        let request = fx.workflow.submit(Some(&user), expense("5"), None).await.unwrap();

        assert!(fx.workflow.resend_notification(Some(&user), request.id).await.is_ok());
        assert!(fx.workflow.resend_notification(Some(&approver), request.id).await.is_ok());
        assert!(matches!(
            fx.workflow.resend_notification(Some(&stranger), request.id).await,
            Err(WorkflowError::Denied(DenyReason::InsufficientRole))
        ));
        assert_eq!(fx.outbox.sent().len(), 2);
    }
}
