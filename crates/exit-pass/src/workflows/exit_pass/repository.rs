use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{
    MonthKey, PassCategory, PassId, PassRequest, PassState, PassStatus, QuotaCounter, StaffActor,
    StaffId, StaffRole, Student, StudentId,
};

/// Pass storage. Writes are conditional on the state the caller last read.
pub trait PassRepository: Send + Sync {
    fn insert(&self, record: PassRequest) -> Result<PassRequest, RepositoryError>;
    fn fetch(&self, id: &PassId) -> Result<Option<PassRequest>, RepositoryError>;
    /// Replace the stored record only while its state still equals `expected`.
    fn replace_if(&self, record: &PassRequest, expected: &PassState)
        -> Result<(), RepositoryError>;
    /// Delete the record only while its status still equals `expected`.
    fn remove_if(&self, id: &PassId, expected: PassStatus) -> Result<(), RepositoryError>;
    fn list(&self, status: Option<PassStatus>) -> Result<Vec<PassRequest>, RepositoryError>;
    fn for_student(&self, student_id: &StudentId) -> Result<Vec<PassRequest>, RepositoryError>;
}

/// Monthly counter storage.
pub trait QuotaRepository: Send + Sync {
    fn counter(
        &self,
        student_id: &StudentId,
        month: &MonthKey,
    ) -> Result<Option<QuotaCounter>, RepositoryError>;
    /// Atomically create-or-increment the counter field for `category`, returning the new row.
    fn increment(
        &self,
        student_id: &StudentId,
        month: &MonthKey,
        category: PassCategory,
    ) -> Result<QuotaCounter, RepositoryError>;
}

/// Read access to student and staff profiles.
pub trait CampusDirectory: Send + Sync {
    fn student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError>;
    fn staff(&self, id: &StaffId) -> Result<Option<StaffActor>, RepositoryError>;
    fn staff_with_roles(&self, roles: &[StaffRole]) -> Result<Vec<StaffActor>, RepositoryError>;
}

/// Error enumeration for storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record changed concurrently (stored status {actual})")]
    PreconditionFailed { actual: PassStatus },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Fire-and-forget message delivery.
pub trait NotificationDispatcher: Send + Sync {
    fn deliver(&self, notification: Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recipient {
    Student { id: StudentId },
    Staff { id: StaffId },
    Guardian { name: String, phone: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub pass_id: PassId,
    pub title: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Append-only audit trail.
pub trait AuditLog: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AuditActor {
    Student(StudentId),
    Staff(StaffId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: String,
    pub entity_type: String,
    pub entity_id: PassId,
    pub actor: AuditActor,
    pub metadata: BTreeMap<String, String>,
}

impl AuditEvent {
    pub fn pass(action: &str, pass_id: &PassId, actor: AuditActor) -> Self {
        Self {
            action: action.to_string(),
            entity_type: "pass".to_string(),
            entity_id: pass_id.clone(),
            actor,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}
