//! Monthly pass allowance.
//!
//! Submission only reads the counters of passes already granted this month; a counter moves only
//! when a pass reaches CSO approval. Requests still in flight are not counted at submission time,
//! so several pending requests approved later can take a student past the limit.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::clock::Clock;
use super::domain::{MonthKey, PassCategory, QuotaCounter, StudentId};
use super::repository::{CampusDirectory, QuotaRepository, RepositoryError};

pub const SHORT_PASS_MONTHLY_LIMIT: u32 = 2;
pub const LONG_PASS_MONTHLY_LIMIT: u32 = 1;

/// Per-category monthly limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaPolicy {
    pub short_limit: u32,
    pub long_limit: u32,
}

impl QuotaPolicy {
    pub const fn standard() -> Self {
        Self {
            short_limit: SHORT_PASS_MONTHLY_LIMIT,
            long_limit: LONG_PASS_MONTHLY_LIMIT,
        }
    }

    pub const fn limit_for(&self, category: PassCategory) -> u32 {
        match category {
            PassCategory::Short => self.short_limit,
            PassCategory::Long => self.long_limit,
        }
    }

    fn exceeded_reason(&self, category: PassCategory) -> String {
        let limit = self.limit_for(category);
        let noun = if limit == 1 { "pass" } else { "passes" };
        format!(
            "You have reached the maximum of {limit} {} {noun} per month.",
            category.label()
        )
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub short_count: u32,
    pub long_count: u32,
}

impl QuotaUsage {
    pub fn count_for(&self, category: PassCategory) -> u32 {
        match category {
            PassCategory::Short => self.short_count,
            PassCategory::Long => self.long_count,
        }
    }
}

impl From<&QuotaCounter> for QuotaUsage {
    fn from(counter: &QuotaCounter) -> Self {
        Self {
            short_count: counter.short_count,
            long_count: counter.long_count,
        }
    }
}

/// Answer to "may this student submit a pass of this category now?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub month: MonthKey,
    pub usage: QuotaUsage,
    pub special_privilege: bool,
}

/// Submission blocked by the monthly limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{reason}")]
pub struct QuotaExceeded {
    pub category: PassCategory,
    pub month: MonthKey,
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
    pub reason: String,
}

/// Current-month allowance view for a single student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaSummary {
    pub student_id: StudentId,
    pub month: MonthKey,
    pub special_privilege: bool,
    pub usage: QuotaUsage,
    /// `None` when the student is exempt from limits.
    pub short_remaining: Option<u32>,
    pub long_remaining: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum QuotaServiceError {
    #[error("student {0} is not registered")]
    UnknownStudent(StudentId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Reads and commits monthly counters.
pub struct QuotaService<R> {
    store: Arc<R>,
    clock: Arc<dyn Clock>,
    policy: QuotaPolicy,
}

impl<R> QuotaService<R>
where
    R: QuotaRepository + CampusDirectory + 'static,
{
    pub fn new(store: Arc<R>, clock: Arc<dyn Clock>) -> Self {
        Self::with_policy(store, clock, QuotaPolicy::standard())
    }

    pub fn with_policy(store: Arc<R>, clock: Arc<dyn Clock>, policy: QuotaPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> QuotaPolicy {
        self.policy
    }

    pub fn current_month(&self) -> MonthKey {
        MonthKey::local(self.clock.now())
    }

    pub fn check_allowed(
        &self,
        student_id: &StudentId,
        category: PassCategory,
    ) -> Result<QuotaDecision, QuotaServiceError> {
        let month = self.current_month();
        let student = self
            .store
            .student(student_id)?
            .ok_or_else(|| QuotaServiceError::UnknownStudent(student_id.clone()))?;

        if student.has_special_privilege {
            debug!(%student_id, %month, "special privilege bypasses pass limits");
            return Ok(QuotaDecision {
                allowed: true,
                reason: None,
                month,
                usage: QuotaUsage::default(),
                special_privilege: true,
            });
        }

        let usage = self.usage(student_id, &month)?;
        let used = usage.count_for(category);
        let allowed = used < self.policy.limit_for(category);
        debug!(
            %student_id,
            %month,
            category = category.label(),
            used,
            allowed,
            "pass limit checked"
        );

        Ok(QuotaDecision {
            allowed,
            reason: (!allowed).then(|| self.policy.exceeded_reason(category)),
            month,
            usage,
            special_privilege: false,
        })
    }

    /// Describe a refused decision for the caller.
    pub fn refusal(&self, category: PassCategory, decision: QuotaDecision) -> QuotaExceeded {
        let limit = self.policy.limit_for(category);
        let used = decision.usage.count_for(category);
        QuotaExceeded {
            category,
            month: decision.month,
            limit,
            used,
            remaining: limit.saturating_sub(used),
            reason: decision
                .reason
                .unwrap_or_else(|| self.policy.exceeded_reason(category)),
        }
    }

    /// Count one granted pass. Callers invoke this exactly once per pass reaching CSO approval.
    pub fn record_grant(
        &self,
        student_id: &StudentId,
        category: PassCategory,
        month: &MonthKey,
    ) -> Result<QuotaCounter, RepositoryError> {
        self.store.increment(student_id, month, category)
    }

    pub fn summary(&self, student_id: &StudentId) -> Result<QuotaSummary, QuotaServiceError> {
        let month = self.current_month();
        let student = self
            .store
            .student(student_id)?
            .ok_or_else(|| QuotaServiceError::UnknownStudent(student_id.clone()))?;
        let usage = self.usage(student_id, &month)?;

        let remaining = |category: PassCategory| {
            (!student.has_special_privilege).then(|| {
                self.policy
                    .limit_for(category)
                    .saturating_sub(usage.count_for(category))
            })
        };

        Ok(QuotaSummary {
            student_id: student_id.clone(),
            short_remaining: remaining(PassCategory::Short),
            long_remaining: remaining(PassCategory::Long),
            month,
            special_privilege: student.has_special_privilege,
            usage,
        })
    }

    fn usage(
        &self,
        student_id: &StudentId,
        month: &MonthKey,
    ) -> Result<QuotaUsage, RepositoryError> {
        Ok(self
            .store
            .counter(student_id, month)?
            .map(|counter| QuotaUsage::from(&counter))
            .unwrap_or_default())
    }
}
