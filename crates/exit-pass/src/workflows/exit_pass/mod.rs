//! Campus exit pass workflow.
//!
//! Students submit short or long passes, the DSA forwards them, the CSO tier grants them, and gate
//! staff record departure and return. Granted passes count against a per-month allowance.

pub mod clock;
pub mod domain;
pub mod lifecycle;
pub mod listing;
pub mod memory;
pub mod quota;
pub mod repository;
pub mod router;
pub mod service;
pub mod validation;

#[cfg(test)]
mod tests;

pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::{
    ApprovalStamp, MonthKey, Movement, MovementStamp, PassCategory, PassDetails, PassDraft,
    PassId, PassRequest, PassState, PassStatus, QuotaCounter, Rejection, ReturnSchedule,
    StaffActor, StaffId, StaffRole, Student, StudentId,
};
pub use lifecycle::{authorize, PassAction, TransitionDenied, TransitionRule, TRANSITIONS};
pub use listing::{PassListing, PassPage, PassQuery, ReviewItem, ReviewPriority};
pub use memory::{InMemoryPassStore, RecordingAuditLog, RecordingNotifier};
pub use quota::{
    QuotaDecision, QuotaExceeded, QuotaPolicy, QuotaService, QuotaServiceError, QuotaSummary,
    QuotaUsage, LONG_PASS_MONTHLY_LIMIT, SHORT_PASS_MONTHLY_LIMIT,
};
pub use repository::{
    AuditActor, AuditError, AuditEvent, AuditLog, CampusDirectory, Notification,
    NotificationDispatcher, NotifyError, PassRepository, QuotaRepository, Recipient,
    RepositoryError,
};
pub use router::exit_pass_router;
pub use service::{AccessDenied, ExitPassService, PassServiceError};
pub use validation::{SubmissionGuard, ValidationError};
