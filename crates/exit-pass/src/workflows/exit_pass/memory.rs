//! Process-local implementations of the storage and side-effect seams.
//!
//! Every store operation runs under one mutex, so conditional replaces and counter increments are
//! atomic with respect to each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::domain::{
    MonthKey, PassCategory, PassId, PassRequest, PassState, PassStatus, QuotaCounter, StaffActor,
    StaffId, StaffRole, Student, StudentId,
};
use super::repository::{
    AuditError, AuditEvent, AuditLog, CampusDirectory, Notification, NotificationDispatcher,
    NotifyError, PassRepository, QuotaRepository, RepositoryError,
};

#[derive(Default)]
struct Tables {
    passes: HashMap<PassId, PassRequest>,
    counters: HashMap<(StudentId, MonthKey), QuotaCounter>,
    students: HashMap<StudentId, Student>,
    staff: HashMap<StaffId, StaffActor>,
}

#[derive(Default, Clone)]
pub struct InMemoryPassStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryPassStore {
    pub fn with_student(self, student: Student) -> Self {
        self.put_student(student);
        self
    }

    pub fn with_staff(self, staff: StaffActor) -> Self {
        self.put_staff(staff);
        self
    }

    pub fn put_student(&self, student: Student) {
        self.lock().students.insert(student.id.clone(), student);
    }

    pub fn put_staff(&self, staff: StaffActor) {
        self.lock().staff.insert(staff.id.clone(), staff);
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // Each write completes in a single statement, so a poisoned lock still guards
        // consistent tables.
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PassRepository for InMemoryPassStore {
    fn insert(&self, record: PassRequest) -> Result<PassRequest, RepositoryError> {
        let mut tables = self.lock();
        if tables.passes.contains_key(&record.id) {
            return Err(RepositoryError::Conflict);
        }
        tables.passes.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn fetch(&self, id: &PassId) -> Result<Option<PassRequest>, RepositoryError> {
        Ok(self.lock().passes.get(id).cloned())
    }

    fn replace_if(
        &self,
        record: &PassRequest,
        expected: &PassState,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.lock();
        let stored = tables
            .passes
            .get_mut(&record.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.state != *expected {
            return Err(RepositoryError::PreconditionFailed {
                actual: stored.status(),
            });
        }
        *stored = record.clone();
        Ok(())
    }

    fn remove_if(&self, id: &PassId, expected: PassStatus) -> Result<(), RepositoryError> {
        let mut tables = self.lock();
        let actual = tables
            .passes
            .get(id)
            .map(PassRequest::status)
            .ok_or(RepositoryError::NotFound)?;
        if actual != expected {
            return Err(RepositoryError::PreconditionFailed { actual });
        }
        tables.passes.remove(id);
        Ok(())
    }

    fn list(&self, status: Option<PassStatus>) -> Result<Vec<PassRequest>, RepositoryError> {
        Ok(self
            .lock()
            .passes
            .values()
            .filter(|pass| status.map_or(true, |status| pass.status() == status))
            .cloned()
            .collect())
    }

    fn for_student(&self, student_id: &StudentId) -> Result<Vec<PassRequest>, RepositoryError> {
        Ok(self
            .lock()
            .passes
            .values()
            .filter(|pass| pass.student_id == *student_id)
            .cloned()
            .collect())
    }
}

impl QuotaRepository for InMemoryPassStore {
    fn counter(
        &self,
        student_id: &StudentId,
        month: &MonthKey,
    ) -> Result<Option<QuotaCounter>, RepositoryError> {
        Ok(self
            .lock()
            .counters
            .get(&(student_id.clone(), month.clone()))
            .cloned())
    }

    fn increment(
        &self,
        student_id: &StudentId,
        month: &MonthKey,
        category: PassCategory,
    ) -> Result<QuotaCounter, RepositoryError> {
        let mut tables = self.lock();
        let counter = tables
            .counters
            .entry((student_id.clone(), month.clone()))
            .or_insert_with(|| QuotaCounter::empty(student_id.clone(), month.clone()));
        counter.increment(category);
        Ok(counter.clone())
    }
}

impl CampusDirectory for InMemoryPassStore {
    fn student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError> {
        Ok(self.lock().students.get(id).cloned())
    }

    fn staff(&self, id: &StaffId) -> Result<Option<StaffActor>, RepositoryError> {
        Ok(self.lock().staff.get(id).cloned())
    }

    fn staff_with_roles(&self, roles: &[StaffRole]) -> Result<Vec<StaffActor>, RepositoryError> {
        let mut staff: Vec<StaffActor> = self
            .lock()
            .staff
            .values()
            .filter(|member| roles.contains(&member.role))
            .cloned()
            .collect();
        staff.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(staff)
    }
}

/// Notification sink that keeps every delivered message.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    delivered: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .map(|delivered| delivered.clone())
            .unwrap_or_default()
    }
}

impl NotificationDispatcher for RecordingNotifier {
    fn deliver(&self, notification: Notification) -> Result<(), NotifyError> {
        let mut delivered = self
            .delivered
            .lock()
            .map_err(|_| NotifyError::Transport("notification buffer poisoned".to_string()))?;
        delivered.push(notification);
        Ok(())
    }
}

/// Audit sink that keeps every entry in insertion order.
#[derive(Default, Clone)]
pub struct RecordingAuditLog {
    entries: Arc<Mutex<Vec<AuditEvent>>>,
}

impl RecordingAuditLog {
    pub fn entries(&self) -> Vec<AuditEvent> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl AuditLog for RecordingAuditLog {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AuditError::Unavailable("audit buffer poisoned".to_string()))?;
        entries.push(event);
        Ok(())
    }
}
