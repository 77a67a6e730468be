//! Transition table for the pass lifecycle.
//!
//! Every staff-triggered transition is described once here: the status it leaves, the status it
//! enters, and the roles allowed to perform it. The service consults [`authorize`] before touching
//! storage.

use serde::{Deserialize, Serialize};

use super::domain::{PassStatus, StaffRole};

/// Staff operations that move a pass through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassAction {
    ApproveAsDsa,
    ApproveAsCso,
    Reject,
    CheckOut,
    CheckIn,
}

impl PassAction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::ApproveAsDsa => "DSA approval",
            Self::ApproveAsCso => "CSO approval",
            Self::Reject => "rejection",
            Self::CheckOut => "check-out",
            Self::CheckIn => "check-in",
        }
    }

    /// Audit action recorded when the transition commits.
    pub const fn audit_action(self) -> &'static str {
        match self {
            Self::ApproveAsDsa => "pass_dsa_approved",
            Self::ApproveAsCso => "pass_cso_approved",
            Self::Reject => "pass_rejected",
            Self::CheckOut => "pass_checked_out",
            Self::CheckIn => "pass_checked_in",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub action: PassAction,
    pub from: PassStatus,
    pub to: PassStatus,
    pub roles: &'static [StaffRole],
}

const DSA: &[StaffRole] = &[StaffRole::Dsa];
const CSO_TIER: &[StaffRole] = &[StaffRole::Cso, StaffRole::AssistantCso];
const DECIDERS: &[StaffRole] = &[StaffRole::Dsa, StaffRole::Cso, StaffRole::AssistantCso];
const GATE: &[StaffRole] = &[
    StaffRole::Porter,
    StaffRole::Security,
    StaffRole::Cso,
    StaffRole::AssistantCso,
];

pub const TRANSITIONS: [TransitionRule; 6] = [
    TransitionRule {
        action: PassAction::ApproveAsDsa,
        from: PassStatus::Pending,
        to: PassStatus::DsaApproved,
        roles: DSA,
    },
    TransitionRule {
        action: PassAction::ApproveAsCso,
        from: PassStatus::DsaApproved,
        to: PassStatus::CsoApproved,
        roles: CSO_TIER,
    },
    TransitionRule {
        action: PassAction::Reject,
        from: PassStatus::Pending,
        to: PassStatus::Rejected,
        roles: DECIDERS,
    },
    TransitionRule {
        action: PassAction::Reject,
        from: PassStatus::DsaApproved,
        to: PassStatus::Rejected,
        roles: DECIDERS,
    },
    // Movement is recorded on the approved pass without changing its status.
    TransitionRule {
        action: PassAction::CheckOut,
        from: PassStatus::CsoApproved,
        to: PassStatus::CsoApproved,
        roles: GATE,
    },
    TransitionRule {
        action: PassAction::CheckIn,
        from: PassStatus::CsoApproved,
        to: PassStatus::CsoApproved,
        roles: GATE,
    },
];

/// Why the table refused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionDenied {
    #[error("role {role} may not perform {}", .action.label())]
    RoleNotPermitted { action: PassAction, role: StaffRole },
    #[error("{} is not allowed from status {from}", .action.label())]
    IllegalFromState {
        action: PassAction,
        from: PassStatus,
    },
}

/// Roles allowed to perform `action` from any state.
pub fn roles_for(action: PassAction) -> Vec<StaffRole> {
    let mut roles: Vec<StaffRole> = Vec::new();
    for rule in TRANSITIONS.iter().filter(|rule| rule.action == action) {
        for role in rule.roles {
            if !roles.contains(role) {
                roles.push(*role);
            }
        }
    }
    roles
}

/// Resolve the next status for `action` taken by `role` on a pass currently in `from`.
///
/// Role is checked before state.
pub fn authorize(
    action: PassAction,
    from: PassStatus,
    role: StaffRole,
) -> Result<PassStatus, TransitionDenied> {
    if !roles_for(action).contains(&role) {
        return Err(TransitionDenied::RoleNotPermitted { action, role });
    }

    TRANSITIONS
        .iter()
        .find(|rule| rule.action == action && rule.from == from)
        .filter(|rule| rule.roles.contains(&role))
        .map(|rule| rule.to)
        .ok_or(TransitionDenied::IllegalFromState { action, from })
}

/// Statuses from which `action` is legal at all.
#[cfg(test)]
fn sources_for(action: PassAction) -> Vec<PassStatus> {
    TRANSITIONS
        .iter()
        .filter(|rule| rule.action == action)
        .map(|rule| rule.from)
        .collect()
}
