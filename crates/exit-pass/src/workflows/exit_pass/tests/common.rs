use std::sync::Arc;

use axum::response::Response;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::exit_pass::clock::FixedClock;
use crate::workflows::exit_pass::domain::{
    MonthKey, PassCategory, PassDraft, PassId, PassRequest, PassState, PassStatus, QuotaCounter,
    StaffActor, StaffId, StaffRole, Student, StudentId,
};
use crate::workflows::exit_pass::memory::{
    InMemoryPassStore, RecordingAuditLog, RecordingNotifier,
};
use crate::workflows::exit_pass::repository::{
    AuditError, AuditEvent, AuditLog, CampusDirectory, Notification, NotificationDispatcher,
    NotifyError, PassRepository, QuotaRepository, RepositoryError,
};
use crate::workflows::exit_pass::service::ExitPassService;
use crate::workflows::exit_pass::validation::SubmissionGuard;

pub(super) type TestService =
    ExitPassService<InMemoryPassStore, RecordingNotifier, RecordingAuditLog>;

/// Mid-month noon UTC keeps the local month-key stable across server time zones.
pub(super) fn mid_month(year: i32, month: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, 15, 12, 0, 0)
        .single()
        .expect("valid instant")
}

pub(super) fn now() -> DateTime<Utc> {
    mid_month(2025, 3)
}

pub(super) fn march() -> MonthKey {
    MonthKey("2025-03".to_string())
}

pub(super) fn student(id: &str) -> Student {
    Student {
        id: StudentId(id.to_string()),
        first_name: "Ada".to_string(),
        last_name: "Okafor".to_string(),
        matric_no: format!("MAT/{id}"),
        department: "Physics".to_string(),
        hostel: Some("Block C".to_string()),
        guardian_name: Some("Grace Okafor".to_string()),
        guardian_phone: Some("+2348011112222".to_string()),
        has_special_privilege: false,
    }
}

pub(super) fn privileged_student(id: &str) -> Student {
    Student {
        has_special_privilege: true,
        first_name: "Bola".to_string(),
        last_name: "Adeyemi".to_string(),
        department: "Medicine".to_string(),
        ..student(id)
    }
}

pub(super) fn staff(id: &str, role: StaffRole) -> StaffActor {
    StaffActor {
        id: StaffId(id.to_string()),
        name: format!("{role} {id}"),
        role,
    }
}

pub(super) fn dsa() -> StaffActor {
    staff("dsa-1", StaffRole::Dsa)
}

pub(super) fn cso() -> StaffActor {
    staff("cso-1", StaffRole::Cso)
}

pub(super) fn assistant_cso() -> StaffActor {
    staff("acso-1", StaffRole::AssistantCso)
}

pub(super) fn porter() -> StaffActor {
    staff("porter-1", StaffRole::Porter)
}

pub(super) fn security() -> StaffActor {
    staff("sec-1", StaffRole::Security)
}

pub(super) fn short_draft() -> PassDraft {
    PassDraft {
        category: PassCategory::Short,
        reason: "Bank visit".to_string(),
        destination: "Town centre".to_string(),
        departure_date: NaiveDate::from_ymd_opt(2025, 3, 16).expect("valid date"),
        departure_time: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
        return_date: None,
        return_time: None,
        emergency_contact_name: "Grace Okafor".to_string(),
        emergency_contact_phone: "+2348011112222".to_string(),
        notes: None,
        notify_guardian: false,
    }
}

pub(super) fn long_draft() -> PassDraft {
    PassDraft {
        category: PassCategory::Long,
        reason: "Family Emergency".to_string(),
        destination: "Enugu".to_string(),
        return_date: NaiveDate::from_ymd_opt(2025, 3, 19),
        return_time: NaiveTime::from_hms_opt(18, 0, 0),
        ..short_draft()
    }
}

pub(super) fn seeded_store() -> InMemoryPassStore {
    InMemoryPassStore::default()
        .with_student(student("stu-1"))
        .with_student(student("stu-2"))
        .with_student(privileged_student("stu-vip"))
        .with_staff(dsa())
        .with_staff(cso())
        .with_staff(assistant_cso())
        .with_staff(porter())
        .with_staff(security())
}

pub(super) fn build_service() -> (
    TestService,
    Arc<InMemoryPassStore>,
    Arc<RecordingNotifier>,
    Arc<RecordingAuditLog>,
) {
    build_service_at(now())
}

pub(super) fn build_service_at(
    at: DateTime<Utc>,
) -> (
    TestService,
    Arc<InMemoryPassStore>,
    Arc<RecordingNotifier>,
    Arc<RecordingAuditLog>,
) {
    let store = Arc::new(seeded_store());
    let notifier = Arc::new(RecordingNotifier::default());
    let audit = Arc::new(RecordingAuditLog::default());
    let service = ExitPassService::with_clock(
        store.clone(),
        notifier.clone(),
        audit.clone(),
        Arc::new(FixedClock(at)),
    );
    (service, store, notifier, audit)
}

/// Store a pass directly, bypassing validation and quota.
pub(super) fn stored_pass(
    store: &InMemoryPassStore,
    id: &str,
    owner: &str,
    reason: &str,
    requested_at: DateTime<Utc>,
) -> PassRequest {
    let details = SubmissionGuard
        .details_from_draft(PassDraft {
            reason: reason.to_string(),
            ..short_draft()
        })
        .expect("fixture draft is valid");
    let record = PassRequest {
        id: PassId(id.to_string()),
        student_id: StudentId(owner.to_string()),
        details,
        requested_at,
        state: PassState::Pending,
    };
    store.insert(record).expect("fixture inserts")
}

pub(super) fn approve_fully<N, L>(
    service: &ExitPassService<InMemoryPassStore, N, L>,
    pass_id: &PassId,
) -> PassRequest
where
    N: NotificationDispatcher + 'static,
    L: AuditLog + 'static,
{
    service
        .approve_as_dsa(pass_id, &dsa(), None)
        .expect("dsa approval succeeds");
    service
        .approve_as_cso(pass_id, &cso(), None)
        .expect("cso approval succeeds")
}

pub(super) fn status_of(store: &InMemoryPassStore, pass_id: &PassId) -> PassStatus {
    store
        .fetch(pass_id)
        .expect("fetch succeeds")
        .expect("pass present")
        .status()
}

pub(super) fn counter_of(store: &InMemoryPassStore, student_id: &str) -> Option<QuotaCounter> {
    store
        .counter(&StudentId(student_id.to_string()), &march())
        .expect("counter read succeeds")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("valid json")
}

#[derive(Default, Clone)]
pub(super) struct FailingNotifier;

impl NotificationDispatcher for FailingNotifier {
    fn deliver(&self, _notification: Notification) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("sms gateway offline".to_string()))
    }
}

#[derive(Default, Clone)]
pub(super) struct FailingAuditLog;

impl AuditLog for FailingAuditLog {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Err(AuditError::Unavailable("audit table locked".to_string()))
    }
}

/// Delegates to the in-memory store but cannot write quota counters.
#[derive(Default, Clone)]
pub(super) struct CounterOutageStore {
    pub(super) inner: InMemoryPassStore,
}

impl PassRepository for CounterOutageStore {
    fn insert(&self, record: PassRequest) -> Result<PassRequest, RepositoryError> {
        self.inner.insert(record)
    }

    fn fetch(&self, id: &PassId) -> Result<Option<PassRequest>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn replace_if(
        &self,
        record: &PassRequest,
        expected: &PassState,
    ) -> Result<(), RepositoryError> {
        self.inner.replace_if(record, expected)
    }

    fn remove_if(&self, id: &PassId, expected: PassStatus) -> Result<(), RepositoryError> {
        self.inner.remove_if(id, expected)
    }

    fn list(&self, status: Option<PassStatus>) -> Result<Vec<PassRequest>, RepositoryError> {
        self.inner.list(status)
    }

    fn for_student(&self, student_id: &StudentId) -> Result<Vec<PassRequest>, RepositoryError> {
        self.inner.for_student(student_id)
    }
}

impl QuotaRepository for CounterOutageStore {
    fn counter(
        &self,
        student_id: &StudentId,
        month: &MonthKey,
    ) -> Result<Option<QuotaCounter>, RepositoryError> {
        self.inner.counter(student_id, month)
    }

    fn increment(
        &self,
        _student_id: &StudentId,
        _month: &MonthKey,
        _category: PassCategory,
    ) -> Result<QuotaCounter, RepositoryError> {
        Err(RepositoryError::Unavailable("counter table offline".to_string()))
    }
}

impl CampusDirectory for CounterOutageStore {
    fn student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError> {
        self.inner.student(id)
    }

    fn staff(&self, id: &StaffId) -> Result<Option<StaffActor>, RepositoryError> {
        self.inner.staff(id)
    }

    fn staff_with_roles(&self, roles: &[StaffRole]) -> Result<Vec<StaffActor>, RepositoryError> {
        self.inner.staff_with_roles(roles)
    }
}
