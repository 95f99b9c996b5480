use super::{ApprovalRequest, DenyReason, RequestKind, Verdict};
use crate::authz::{resolve, Principal};

/// Decide whether `principal` may approve or reject `request`.
///
/// Checks run in order and the first failure is returned:
/// 1. signed in and active
/// 2. capability for the request's category (deletions need an administrator)
/// 3. not the requester
/// 4. still pending
pub fn authorize(principal: Option<&Principal>, request: &ApprovalRequest) -> Verdict {
    let Some(principal) = principal.filter(|p| p.is_active()) else {
        return Verdict::Deny(DenyReason::NotAuthenticated);
    };

    let flags = resolve(Some(principal));
    let capable = match request.kind {
        RequestKind::Deletion => flags.is_admin,
        RequestKind::Expense | RequestKind::Money | RequestKind::Other => flags.can_approve_requests,
    };
    if !capable {
        tracing::debug!(
            employee_id = %principal.id,
            request_id = %request.id,
            kind = request.kind.as_str(),
            "insufficient role"
        );
        return Verdict::Deny(DenyReason::InsufficientRole);
    }

    if principal.id == request.requester_id {
        return Verdict::Deny(DenyReason::SelfApprovalForbidden);
    }

    if !request.is_pending() {
        return Verdict::Deny(DenyReason::AlreadyDecided);
    }

    Verdict::Allow
}
