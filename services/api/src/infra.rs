use chrono::NaiveDate;
use exit_pass::workflows::exit_pass::{
    AuditActor, AuditError, AuditEvent, AuditLog, InMemoryPassStore, Notification,
    NotificationDispatcher, NotifyError, Recipient, StaffActor, StaffId, StaffRole, Student,
    StudentId,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Delivers notifications to the service log. Stands in for an SMS/email gateway.
#[derive(Default, Clone)]
pub(crate) struct LogNotifier;

impl NotificationDispatcher for LogNotifier {
    fn deliver(&self, notification: Notification) -> Result<(), NotifyError> {
        let recipient = match &notification.recipient {
            Recipient::Student { id } => format!("student:{id}"),
            Recipient::Staff { id } => format!("staff:{id}"),
            Recipient::Guardian { phone, .. } => format!("guardian:{phone}"),
        };
        info!(
            %recipient,
            pass_id = %notification.pass_id,
            title = %notification.title,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Writes audit entries to the service log.
#[derive(Default, Clone)]
pub(crate) struct LogAuditLog;

impl AuditLog for LogAuditLog {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let actor = match &event.actor {
            AuditActor::Student(id) => format!("student:{id}"),
            AuditActor::Staff(id) => format!("staff:{id}"),
        };
        let metadata: Vec<String> = event
            .metadata
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        info!(
            action = %event.action,
            entity_type = %event.entity_type,
            entity_id = %event.entity_id,
            %actor,
            metadata = %metadata.join(" "),
            "audit entry recorded"
        );
        Ok(())
    }
}

fn student(id: &str, first: &str, last: &str, department: &str, privileged: bool) -> Student {
    Student {
        id: StudentId(id.to_string()),
        first_name: first.to_string(),
        last_name: last.to_string(),
        matric_no: format!("UNI/{}/{id}", department.to_ascii_uppercase()),
        department: department.to_string(),
        hostel: Some("Queen Amina Hall".to_string()),
        guardian_name: Some(format!("Mr. {last}")),
        guardian_phone: Some("+2348020000000".to_string()),
        has_special_privilege: privileged,
    }
}

fn staff(id: &str, name: &str, role: StaffRole) -> StaffActor {
    StaffActor {
        id: StaffId(id.to_string()),
        name: name.to_string(),
        role,
    }
}

/// Campus directory used by `serve` and `demo` until a real directory is wired in.
pub(crate) fn seeded_store() -> InMemoryPassStore {
    InMemoryPassStore::default()
        .with_student(student("stu-1001", "Amaka", "Nwosu", "Chemistry", false))
        .with_student(student("stu-1002", "Tunde", "Bakare", "Law", false))
        .with_student(student("stu-1003", "Halima", "Musa", "Medicine", true))
        .with_staff(staff("staff-dsa", "Dr. Funmi Ade", StaffRole::Dsa))
        .with_staff(staff("staff-cso", "Col. Ibrahim Sule", StaffRole::Cso))
        .with_staff(staff("staff-acso", "Mr. Peter Obi", StaffRole::AssistantCso))
        .with_staff(staff("staff-porter", "Mrs. Joy Udo", StaffRole::Porter))
        .with_staff(staff("staff-security", "Sgt. Musa Bello", StaffRole::Security))
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
