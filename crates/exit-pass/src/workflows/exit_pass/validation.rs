use chrono::NaiveDateTime;

use super::domain::{PassCategory, PassDetails, PassDraft, ReturnSchedule};

/// Caller-correctable problems with a submitted draft or a staff decision.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("long passes require a return date and time")]
    MissingReturn,
    #[error("short passes must not carry a return date or time")]
    UnexpectedReturn,
    #[error("return ({returning}) must not be before departure ({departing})")]
    ReturnBeforeDeparture {
        departing: NaiveDateTime,
        returning: NaiveDateTime,
    },
    #[error("a rejection reason is required")]
    BlankRejectionReason,
}

/// Turns a student draft into the immutable part of a pass request.
#[derive(Debug, Clone, Default)]
pub struct SubmissionGuard;

impl SubmissionGuard {
    pub fn details_from_draft(&self, draft: PassDraft) -> Result<PassDetails, ValidationError> {
        let reason = required("reason", draft.reason)?;
        let destination = required("destination", draft.destination)?;
        let emergency_contact_name =
            required("emergency_contact_name", draft.emergency_contact_name)?;
        let emergency_contact_phone =
            required("emergency_contact_phone", draft.emergency_contact_phone)?;

        let return_schedule = match (draft.category, draft.return_date, draft.return_time) {
            (PassCategory::Long, Some(return_date), Some(return_time)) => {
                let departing = draft.departure_date.and_time(draft.departure_time);
                let returning = return_date.and_time(return_time);
                if returning < departing {
                    return Err(ValidationError::ReturnBeforeDeparture {
                        departing,
                        returning,
                    });
                }
                Some(ReturnSchedule {
                    return_date,
                    return_time,
                })
            }
            (PassCategory::Long, _, _) => return Err(ValidationError::MissingReturn),
            (PassCategory::Short, None, None) => None,
            (PassCategory::Short, _, _) => return Err(ValidationError::UnexpectedReturn),
        };

        let notes = draft
            .notes
            .map(|notes| notes.trim().to_string())
            .filter(|notes| !notes.is_empty());

        Ok(PassDetails {
            category: draft.category,
            reason,
            destination,
            departure_date: draft.departure_date,
            departure_time: draft.departure_time,
            return_schedule,
            emergency_contact_name,
            emergency_contact_phone,
            notes,
        })
    }

    pub fn rejection_reason(&self, reason: &str) -> Result<String, ValidationError> {
        let trimmed = reason.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::BlankRejectionReason);
        }
        Ok(trimmed.to_string())
    }
}

fn required(field: &'static str, value: String) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(trimmed.to_string())
    }
}
