use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::domain::{
    ApprovalStamp, MonthKey, Movement, MovementStamp, PassCategory, PassDraft, PassId,
    PassRequest, PassState, PassStatus, Rejection, StaffActor, StaffId, StaffRole, Student,
    StudentId,
};
use super::lifecycle::{authorize, PassAction, TransitionDenied};
use super::listing::{
    paginate, rank_for_review, PassListing, PassPage, PassQuery, ReviewItem, DEFAULT_PAGE_SIZE,
};
use super::quota::{QuotaDecision, QuotaExceeded, QuotaService, QuotaServiceError, QuotaSummary};
use super::repository::{
    AuditActor, AuditEvent, AuditLog, CampusDirectory, Notification, NotificationDispatcher,
    PassRepository, QuotaRepository, Recipient, RepositoryError,
};
use super::validation::{SubmissionGuard, ValidationError};

/// Service composing the transition table, quota gate, storage, and side-effect collaborators.
pub struct ExitPassService<R, N, L> {
    guard: SubmissionGuard,
    store: Arc<R>,
    notifier: Arc<N>,
    audit: Arc<L>,
    quota: QuotaService<R>,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl<R, N, L> ExitPassService<R, N, L>
where
    R: PassRepository + QuotaRepository + CampusDirectory + 'static,
    N: NotificationDispatcher + 'static,
    L: AuditLog + 'static,
{
    pub fn new(store: Arc<R>, notifier: Arc<N>, audit: Arc<L>) -> Self {
        Self::with_clock(store, notifier, audit, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<R>,
        notifier: Arc<N>,
        audit: Arc<L>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let quota = QuotaService::new(store.clone(), clock.clone());
        Self {
            guard: SubmissionGuard,
            store,
            notifier,
            audit,
            quota,
            clock,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Validate, gate on the monthly allowance, and store a new pending request.
    pub fn submit(
        &self,
        draft: PassDraft,
        student: &Student,
    ) -> Result<PassRequest, PassServiceError> {
        let notify_guardian = draft.notify_guardian;
        let details = self.guard.details_from_draft(draft)?;
        let category = details.category;

        let decision = self.quota.check_allowed(&student.id, category)?;
        if !decision.allowed {
            let refusal = self.quota.refusal(category, decision);
            info!(
                student_id = %student.id,
                category = category.label(),
                "pass submission blocked by monthly limit"
            );
            return Err(PassServiceError::QuotaExceeded(refusal));
        }

        let record = PassRequest {
            id: PassId::generate(),
            student_id: student.id.clone(),
            details,
            requested_at: self.clock.now(),
            state: PassState::Pending,
        };
        let stored = self.store.insert(record)?;
        info!(
            pass_id = %stored.id,
            student_id = %student.id,
            category = category.label(),
            "pass requested"
        );

        self.audit(
            AuditEvent::pass(
                "pass_requested",
                &stored.id,
                AuditActor::Student(student.id.clone()),
            )
            .with("pass_type", category.label())
            .with("destination", stored.details.destination.clone()),
        );

        self.notify_roles(
            &StaffRole::approval_chain(),
            &stored.id,
            "New exit pass request",
            format!(
                "{} requested a {} pass to {}.",
                student.full_name(),
                category.label(),
                stored.details.destination
            ),
        );

        if notify_guardian {
            match student.guardian_contact() {
                Some((name, phone)) => self.notify(Notification {
                    recipient: Recipient::Guardian {
                        name: name.to_string(),
                        phone: phone.to_string(),
                    },
                    pass_id: stored.id.clone(),
                    title: "Exit pass requested".to_string(),
                    body: format!(
                        "{} has requested to leave campus for {} on {} at {}.",
                        student.full_name(),
                        stored.details.destination,
                        stored.details.departure_date,
                        stored.details.departure_time
                    ),
                }),
                None => debug!(student_id = %student.id, "no guardian contact on file"),
            }
        }

        Ok(stored)
    }

    pub fn approve_as_dsa(
        &self,
        pass_id: &PassId,
        actor: &StaffActor,
        comments: Option<String>,
    ) -> Result<PassRequest, PassServiceError> {
        let stamp = self.stamp(actor, comments);
        let updated = self.transition(pass_id, actor, PassAction::ApproveAsDsa, |state| {
            match state {
                PassState::Pending => Some(PassState::DsaApproved { dsa: stamp }),
                _ => None,
            }
        })?;

        self.audit(AuditEvent::pass(
            PassAction::ApproveAsDsa.audit_action(),
            pass_id,
            AuditActor::Staff(actor.id.clone()),
        ));
        self.notify_student(
            &updated,
            "Pass forwarded to CSO",
            "Your exit pass was approved by the DSA and forwarded to the CSO.".to_string(),
        );
        self.notify_roles(
            &[StaffRole::Cso, StaffRole::AssistantCso],
            pass_id,
            "Pass awaiting CSO approval",
            format!(
                "A {} pass to {} was forwarded by the DSA.",
                updated.category().label(),
                updated.details.destination
            ),
        );

        Ok(updated)
    }

    /// Final approval. Commits the status change, then counts the grant against the
    /// student's allowance for the current month.
    pub fn approve_as_cso(
        &self,
        pass_id: &PassId,
        actor: &StaffActor,
        comments: Option<String>,
    ) -> Result<PassRequest, PassServiceError> {
        let stamp = self.stamp(actor, comments);
        let updated = self.transition(pass_id, actor, PassAction::ApproveAsCso, |state| {
            match state {
                PassState::DsaApproved { dsa } => Some(PassState::CsoApproved {
                    dsa,
                    cso: stamp,
                    movement: Movement::default(),
                }),
                _ => None,
            }
        })?;

        let month = MonthKey::local(self.clock.now());
        let grant = self
            .quota
            .record_grant(&updated.student_id, updated.category(), &month);

        self.audit(AuditEvent::pass(
            PassAction::ApproveAsCso.audit_action(),
            pass_id,
            AuditActor::Staff(actor.id.clone()),
        ));
        self.notify_student(
            &updated,
            "Pass approved",
            format!(
                "Your {} pass to {} has been approved.",
                updated.category().label(),
                updated.details.destination
            ),
        );

        match grant {
            Ok(counter) => {
                debug!(
                    pass_id = %pass_id,
                    student_id = %counter.student_id,
                    month = %counter.month,
                    short_count = counter.short_count,
                    long_count = counter.long_count,
                    "pass grant counted"
                );
                Ok(updated)
            }
            Err(source) => {
                error!(
                    pass_id = %pass_id,
                    student_id = %updated.student_id,
                    month = %month,
                    category = updated.category().label(),
                    error = %source,
                    "pass approved but grant was not counted; manual reconciliation required"
                );
                Err(PassServiceError::GrantNotRecorded {
                    pass_id: pass_id.clone(),
                    student_id: updated.student_id,
                    month,
                    category: updated.details.category,
                    source,
                })
            }
        }
    }

    pub fn reject(
        &self,
        pass_id: &PassId,
        actor: &StaffActor,
        reason: &str,
    ) -> Result<PassRequest, PassServiceError> {
        let reason = self.guard.rejection_reason(reason)?;
        let rejection = Rejection {
            by: actor.id.clone(),
            at: self.clock.now(),
            by_role: actor.role,
            reason: reason.clone(),
        };
        let updated = self.transition(pass_id, actor, PassAction::Reject, |state| match state {
            PassState::Pending | PassState::DsaApproved { .. } => {
                Some(PassState::Rejected { rejection })
            }
            _ => None,
        })?;

        self.audit(
            AuditEvent::pass(
                PassAction::Reject.audit_action(),
                pass_id,
                AuditActor::Staff(actor.id.clone()),
            )
            .with("role", actor.role.label())
            .with("reason", reason.clone()),
        );
        self.notify_student(
            &updated,
            "Pass rejected",
            format!("Your exit pass was rejected by the {}: {reason}", actor.role),
        );

        Ok(updated)
    }

    /// Record departure through the gate.
    pub fn check_out(
        &self,
        pass_id: &PassId,
        actor: &StaffActor,
    ) -> Result<PassRequest, PassServiceError> {
        let stamp = self.movement_stamp(actor);
        let updated = self.transition(pass_id, actor, PassAction::CheckOut, |state| match state {
            PassState::CsoApproved { dsa, cso, movement } if movement.checked_out.is_none() => {
                Some(PassState::CsoApproved {
                    dsa,
                    cso,
                    movement: Movement {
                        checked_out: Some(stamp),
                        checked_in: None,
                    },
                })
            }
            _ => None,
        })?;

        self.audit(AuditEvent::pass(
            PassAction::CheckOut.audit_action(),
            pass_id,
            AuditActor::Staff(actor.id.clone()),
        ));
        Ok(updated)
    }

    /// Record return through the gate. Requires a prior check-out.
    pub fn check_in(
        &self,
        pass_id: &PassId,
        actor: &StaffActor,
    ) -> Result<PassRequest, PassServiceError> {
        let stamp = self.movement_stamp(actor);
        let updated = self.transition(pass_id, actor, PassAction::CheckIn, |state| match state {
            PassState::CsoApproved { dsa, cso, movement }
                if movement.checked_out.is_some() && movement.checked_in.is_none() =>
            {
                Some(PassState::CsoApproved {
                    dsa,
                    cso,
                    movement: Movement {
                        checked_out: movement.checked_out,
                        checked_in: Some(stamp),
                    },
                })
            }
            _ => None,
        })?;

        self.audit(AuditEvent::pass(
            PassAction::CheckIn.audit_action(),
            pass_id,
            AuditActor::Staff(actor.id.clone()),
        ));
        Ok(updated)
    }

    /// Remove a request that is still pending. Only its owner may do this.
    pub fn withdraw(
        &self,
        pass_id: &PassId,
        student_id: &StudentId,
    ) -> Result<PassRequest, PassServiceError> {
        let record = self.get(pass_id)?;
        if record.student_id != *student_id {
            return Err(AccessDenied::NotOwner {
                pass_id: pass_id.clone(),
                student_id: student_id.clone(),
            }
            .into());
        }
        if record.status() != PassStatus::Pending {
            return Err(PassServiceError::InvalidTransition {
                pass_id: pass_id.clone(),
                operation: "withdrawal",
                status: record.status(),
            });
        }

        self.store
            .remove_if(pass_id, PassStatus::Pending)
            .map_err(|err| self.stale(pass_id, "withdrawal", err))?;
        info!(pass_id = %pass_id, student_id = %student_id, "pass withdrawn");

        self.audit(AuditEvent::pass(
            "pass_withdrawn",
            pass_id,
            AuditActor::Student(student_id.clone()),
        ));
        Ok(record)
    }

    pub fn get(&self, pass_id: &PassId) -> Result<PassRequest, PassServiceError> {
        self.store
            .fetch(pass_id)?
            .ok_or_else(|| PassServiceError::PassNotFound(pass_id.clone()))
    }

    pub fn student(&self, student_id: &StudentId) -> Result<Student, PassServiceError> {
        self.store
            .student(student_id)?
            .ok_or_else(|| PassServiceError::StudentNotFound(student_id.clone()))
    }

    /// Resolve a staff member; unknown ids are an access denial.
    pub fn staff(&self, staff_id: &StaffId) -> Result<StaffActor, PassServiceError> {
        self.store
            .staff(staff_id)?
            .ok_or_else(|| AccessDenied::UnknownStaff(staff_id.clone()).into())
    }

    pub fn check_allowed(
        &self,
        student_id: &StudentId,
        category: PassCategory,
    ) -> Result<QuotaDecision, PassServiceError> {
        Ok(self.quota.check_allowed(student_id, category)?)
    }

    pub fn quota_summary(&self, student_id: &StudentId) -> Result<QuotaSummary, PassServiceError> {
        Ok(self.quota.summary(student_id)?)
    }

    /// A student's own requests, newest first.
    pub fn history(&self, student_id: &StudentId) -> Result<Vec<PassRequest>, PassServiceError> {
        let mut passes = self.store.for_student(student_id)?;
        passes.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(passes)
    }

    /// Filtered, searchable, paginated staff listing.
    pub fn list(&self, query: &PassQuery) -> Result<PassPage, PassServiceError> {
        let passes = self.store.list(query.status)?;
        let listings = self.with_students(passes)?;
        Ok(paginate(listings, query, self.page_size))
    }

    /// Requests awaiting `actor`'s decision, ranked for review.
    pub fn review_queue(
        &self,
        actor: &StaffActor,
        limit: Option<usize>,
    ) -> Result<Vec<ReviewItem>, PassServiceError> {
        let status = match actor.role {
            StaffRole::Dsa => PassStatus::Pending,
            role if role.is_cso_tier() => PassStatus::DsaApproved,
            role => return Err(AccessDenied::NotReviewer(role).into()),
        };

        let passes = self.store.list(Some(status))?;
        let mut ranked = rank_for_review(self.with_students(passes)?);
        if let Some(limit) = limit {
            ranked.truncate(limit);
        }
        Ok(ranked)
    }

    fn transition<F>(
        &self,
        pass_id: &PassId,
        actor: &StaffActor,
        action: PassAction,
        apply: F,
    ) -> Result<PassRequest, PassServiceError>
    where
        F: FnOnce(PassState) -> Option<PassState>,
    {
        let record = self.get(pass_id)?;
        let from = record.status();

        let to = authorize(action, from, actor.role).map_err(|denied| match denied {
            TransitionDenied::RoleNotPermitted { action, role } => {
                PassServiceError::Unauthorized(AccessDenied::Role { action, role })
            }
            TransitionDenied::IllegalFromState { action, from } => {
                PassServiceError::InvalidTransition {
                    pass_id: pass_id.clone(),
                    operation: action.label(),
                    status: from,
                }
            }
        })?;

        let expected = record.state.clone();
        let next = apply(record.state.clone()).ok_or_else(|| PassServiceError::InvalidTransition {
            pass_id: pass_id.clone(),
            operation: action.label(),
            status: from,
        })?;
        debug_assert_eq!(next.status(), to);

        let updated = PassRequest {
            state: next,
            ..record
        };
        self.store
            .replace_if(&updated, &expected)
            .map_err(|err| self.stale(pass_id, action.label(), err))?;

        info!(
            pass_id = %pass_id,
            from = %from,
            to = %to,
            actor = %actor.id,
            role = %actor.role,
            "pass transition committed"
        );
        Ok(updated)
    }

    fn stale(
        &self,
        pass_id: &PassId,
        operation: &'static str,
        err: RepositoryError,
    ) -> PassServiceError {
        match err {
            RepositoryError::PreconditionFailed { actual } => PassServiceError::InvalidTransition {
                pass_id: pass_id.clone(),
                operation,
                status: actual,
            },
            RepositoryError::NotFound => PassServiceError::PassNotFound(pass_id.clone()),
            other => PassServiceError::Repository(other),
        }
    }

    fn stamp(&self, actor: &StaffActor, comments: Option<String>) -> ApprovalStamp {
        ApprovalStamp {
            by: actor.id.clone(),
            at: self.clock.now(),
            comments: comments
                .map(|comments| comments.trim().to_string())
                .filter(|comments| !comments.is_empty()),
        }
    }

    fn movement_stamp(&self, actor: &StaffActor) -> MovementStamp {
        MovementStamp {
            by: actor.id.clone(),
            at: self.clock.now(),
        }
    }

    fn with_students(
        &self,
        passes: Vec<PassRequest>,
    ) -> Result<Vec<PassListing>, PassServiceError> {
        let mut students: HashMap<StudentId, Option<Student>> = HashMap::new();
        let mut listings = Vec::with_capacity(passes.len());
        for pass in passes {
            let student = match students.get(&pass.student_id) {
                Some(student) => student.clone(),
                None => {
                    let student = self.store.student(&pass.student_id)?;
                    students.insert(pass.student_id.clone(), student.clone());
                    student
                }
            };
            listings.push(PassListing::new(pass, student));
        }
        Ok(listings)
    }

    fn audit(&self, event: AuditEvent) {
        let action = event.action.clone();
        if let Err(err) = self.audit.record(event) {
            warn!(%action, error = %err, "audit entry not recorded");
        }
    }

    fn notify(&self, notification: Notification) {
        let pass_id = notification.pass_id.clone();
        if let Err(err) = self.notifier.deliver(notification) {
            warn!(%pass_id, error = %err, "notification not delivered");
        }
    }

    fn notify_student(&self, pass: &PassRequest, title: &str, body: String) {
        self.notify(Notification {
            recipient: Recipient::Student {
                id: pass.student_id.clone(),
            },
            pass_id: pass.id.clone(),
            title: title.to_string(),
            body,
        });
    }

    fn notify_roles(&self, roles: &[StaffRole], pass_id: &PassId, title: &str, body: String) {
        let staff = match self.store.staff_with_roles(roles) {
            Ok(staff) => staff,
            Err(err) => {
                warn!(%pass_id, error = %err, "staff lookup failed; notifications skipped");
                return;
            }
        };
        for member in staff {
            self.notify(Notification {
                recipient: Recipient::Staff { id: member.id },
                pass_id: pass_id.clone(),
                title: title.to_string(),
                body: body.clone(),
            });
        }
    }
}

/// Why an actor may not perform an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessDenied {
    #[error("role {role} may not perform {}", .action.label())]
    Role { action: PassAction, role: StaffRole },
    #[error("student {student_id} does not own pass {pass_id}")]
    NotOwner {
        pass_id: PassId,
        student_id: StudentId,
    },
    #[error("staff member {0} is not registered")]
    UnknownStaff(StaffId),
    #[error("role {0} has no review queue")]
    NotReviewer(StaffRole),
}

/// Error raised by the exit pass service.
#[derive(Debug, thiserror::Error)]
pub enum PassServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Unauthorized(#[from] AccessDenied),
    #[error("cannot apply {operation} to pass {pass_id} in status {status}; refresh and retry")]
    InvalidTransition {
        pass_id: PassId,
        operation: &'static str,
        status: PassStatus,
    },
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),
    #[error("pass {0} not found")]
    PassNotFound(PassId),
    #[error("student {0} not found")]
    StudentNotFound(StudentId),
    #[error(
        "pass {pass_id} approved but the {} grant for {month} was not counted: {source}",
        .category.label()
    )]
    GrantNotRecorded {
        pass_id: PassId,
        student_id: StudentId,
        month: MonthKey,
        category: PassCategory,
        source: RepositoryError,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<QuotaServiceError> for PassServiceError {
    fn from(value: QuotaServiceError) -> Self {
        match value {
            QuotaServiceError::UnknownStudent(id) => Self::StudentNotFound(id),
            QuotaServiceError::Repository(err) => Self::Repository(err),
        }
    }
}
