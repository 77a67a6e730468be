use std::fmt;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for a pass request, stable for the record's life.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PassId(pub String);

impl PassId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StudentId(pub String);

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StaffId(pub String);

impl fmt::Display for StaffId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pass categories with distinct monthly allowances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassCategory {
    /// Same-day return.
    Short,
    /// Overnight or longer; requires a return date and time.
    Long,
}

impl PassCategory {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Long => "long",
        }
    }
}

/// Flat status as persisted and filtered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Pending,
    DsaApproved,
    CsoApproved,
    Rejected,
}

impl PassStatus {
    pub const fn ordered() -> [Self; 4] {
        [
            Self::Pending,
            Self::DsaApproved,
            Self::CsoApproved,
            Self::Rejected,
        ]
    }

    pub const fn key(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::DsaApproved => "dsa_approved",
            Self::CsoApproved => "cso_approved",
            Self::Rejected => "rejected",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::DsaApproved => "Forwarded to CSO",
            Self::CsoApproved => "CSO Approved",
            Self::Rejected => "Rejected",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::CsoApproved | Self::Rejected)
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ordered()
            .into_iter()
            .find(|status| status.key().eq_ignore_ascii_case(value.trim()))
    }
}

impl fmt::Display for PassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StaffRole {
    #[serde(rename = "DSA")]
    Dsa,
    #[serde(rename = "CSO")]
    Cso,
    #[serde(rename = "Assistant CSO")]
    AssistantCso,
    #[serde(rename = "porter")]
    Porter,
    #[serde(rename = "Security")]
    Security,
}

impl StaffRole {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Dsa => "DSA",
            Self::Cso => "CSO",
            Self::AssistantCso => "Assistant CSO",
            Self::Porter => "porter",
            Self::Security => "Security",
        }
    }

    /// Roles that take part in the DSA → CSO approval chain.
    pub const fn approval_chain() -> [Self; 3] {
        [Self::Dsa, Self::Cso, Self::AssistantCso]
    }

    pub const fn is_cso_tier(self) -> bool {
        matches!(self, Self::Cso | Self::AssistantCso)
    }
}

impl fmt::Display for StaffRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub first_name: String,
    pub last_name: String,
    pub matric_no: String,
    pub department: String,
    pub hostel: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
    pub has_special_privilege: bool,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Guardian contact, if both name and phone are on file.
    pub fn guardian_contact(&self) -> Option<(&str, &str)> {
        let name = self.guardian_name.as_deref().map(str::trim)?;
        let phone = self.guardian_phone.as_deref().map(str::trim)?;
        if name.is_empty() || phone.is_empty() {
            return None;
        }
        Some((name, phone))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffActor {
    pub id: StaffId,
    pub name: String,
    pub role: StaffRole,
}

/// Student-supplied request before validation and quota gating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassDraft {
    pub category: PassCategory,
    pub reason: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub departure_time: NaiveTime,
    #[serde(default)]
    pub return_date: Option<NaiveDate>,
    #[serde(default)]
    pub return_time: Option<NaiveTime>,
    pub emergency_contact_name: String,
    pub emergency_contact_phone: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub notify_guardian: bool,
}

/// Return leg of a long pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnSchedule {
    pub return_date: NaiveDate,
    pub return_time: NaiveTime,
}

/// Fields fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassDetails {
    pub category: PassCategory,
    pub reason: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub departure_time: NaiveTime,
    /// Present iff `category` is `Long`.
    pub return_schedule: Option<ReturnSchedule>,
    pub emergency_contact_name: String,
    pub emergency_contact_phone: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStamp {
    pub by: StaffId,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub by: StaffId,
    pub at: DateTime<Utc>,
    pub by_role: StaffRole,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementStamp {
    pub by: StaffId,
    pub at: DateTime<Utc>,
}

/// Physical movement recorded against an approved pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub checked_out: Option<MovementStamp>,
    pub checked_in: Option<MovementStamp>,
}

/// Lifecycle position of a pass. Each variant carries only the attribution that is
/// valid in that position, so approval and rejection data never coexist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PassState {
    Pending,
    DsaApproved {
        dsa: ApprovalStamp,
    },
    CsoApproved {
        dsa: ApprovalStamp,
        cso: ApprovalStamp,
        #[serde(default)]
        movement: Movement,
    },
    Rejected {
        rejection: Rejection,
    },
}

impl PassState {
    pub fn status(&self) -> PassStatus {
        match self {
            Self::Pending => PassStatus::Pending,
            Self::DsaApproved { .. } => PassStatus::DsaApproved,
            Self::CsoApproved { .. } => PassStatus::CsoApproved,
            Self::Rejected { .. } => PassStatus::Rejected,
        }
    }
}

/// The central record of the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassRequest {
    pub id: PassId,
    pub student_id: StudentId,
    pub details: PassDetails,
    pub requested_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: PassState,
}

impl PassRequest {
    pub fn status(&self) -> PassStatus {
        self.state.status()
    }

    pub fn category(&self) -> PassCategory {
        self.details.category
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match &self.state {
            PassState::Rejected { rejection } => Some(rejection),
            _ => None,
        }
    }

    pub fn dsa_approval(&self) -> Option<&ApprovalStamp> {
        match &self.state {
            PassState::DsaApproved { dsa } | PassState::CsoApproved { dsa, .. } => Some(dsa),
            _ => None,
        }
    }

    pub fn cso_approval(&self) -> Option<&ApprovalStamp> {
        match &self.state {
            PassState::CsoApproved { cso, .. } => Some(cso),
            _ => None,
        }
    }

    pub fn movement(&self) -> Option<&Movement> {
        match &self.state {
            PassState::CsoApproved { movement, .. } => Some(movement),
            _ => None,
        }
    }
}

/// Calendar year-month bucket for quota counters, rendered `YYYY-MM`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthKey(pub String);

impl MonthKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(format!("{:04}-{:02}", date.year(), date.month()))
    }

    /// Month-key of `instant` in the server's local calendar.
    pub fn local(instant: DateTime<Utc>) -> Self {
        Self::from_date(instant.with_timezone(&Local).date_naive())
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One counter row per (student, month).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCounter {
    pub student_id: StudentId,
    pub month: MonthKey,
    pub short_count: u32,
    pub long_count: u32,
}

impl QuotaCounter {
    pub fn empty(student_id: StudentId, month: MonthKey) -> Self {
        Self {
            student_id,
            month,
            short_count: 0,
            long_count: 0,
        }
    }

    pub fn count_for(&self, category: PassCategory) -> u32 {
        match category {
            PassCategory::Short => self.short_count,
            PassCategory::Long => self.long_count,
        }
    }

    pub fn increment(&mut self, category: PassCategory) {
        match category {
            PassCategory::Short => self.short_count = self.short_count.saturating_add(1),
            PassCategory::Long => self.long_count = self.long_count.saturating_add(1),
        }
    }
}
