use std::cmp::Reverse;

use serde::de::value::StrDeserializer;
use serde::de::IntoDeserializer;
use serde::{Deserialize, Deserializer, Serialize};

use super::domain::{PassRequest, PassStatus, Student};

/// Reasons that move a request ahead of ordinary ones in the staff queue.
pub const URGENT_REASONS: [&str; 3] = [
    "Medical Emergency",
    "Family Emergency",
    "Medical Appointment",
];

pub const DEFAULT_PAGE_SIZE: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPriority {
    Urgent,
    Normal,
}

impl ReviewPriority {
    pub fn for_reason(reason: &str) -> Self {
        let reason = reason.to_lowercase();
        if URGENT_REASONS
            .iter()
            .any(|keyword| reason.contains(&keyword.to_lowercase()))
        {
            Self::Urgent
        } else {
            Self::Normal
        }
    }
}

/// A pass joined with the owning student's profile for staff views.
#[derive(Debug, Clone, Serialize)]
pub struct PassListing {
    pub pass: PassRequest,
    pub status_label: &'static str,
    pub student: Option<Student>,
}

impl PassListing {
    pub fn new(pass: PassRequest, student: Option<Student>) -> Self {
        Self {
            status_label: pass.status().label(),
            pass,
            student,
        }
    }

    fn has_special_privilege(&self) -> bool {
        self.student
            .as_ref()
            .is_some_and(|student| student.has_special_privilege)
    }

    fn matches(&self, needle: &str) -> bool {
        let contains = |haystack: &str| haystack.to_lowercase().contains(needle);
        if contains(&self.pass.details.destination) {
            return true;
        }
        self.student.as_ref().is_some_and(|student| {
            contains(&student.first_name)
                || contains(&student.last_name)
                || contains(&student.matric_no)
                || contains(&student.department)
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewItem {
    pub priority: ReviewPriority,
    #[serde(flatten)]
    pub listing: PassListing,
}

/// Order staff review entries: special-privilege students first, then urgent reasons, then
/// newest `requested_at`.
pub fn rank_for_review(entries: Vec<PassListing>) -> Vec<ReviewItem> {
    let mut items: Vec<ReviewItem> = entries
        .into_iter()
        .map(|listing| ReviewItem {
            priority: ReviewPriority::for_reason(&listing.pass.details.reason),
            listing,
        })
        .collect();

    items.sort_by_key(|item| {
        (
            Reverse(item.listing.has_special_privilege()),
            Reverse(item.priority == ReviewPriority::Urgent),
            Reverse(item.listing.pass.requested_at),
        )
    });
    items
}

/// Staff listing filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PassQuery {
    /// `None` lists every status. Accepts `all` on the wire.
    #[serde(default, deserialize_with = "status_filter")]
    pub status: Option<PassStatus>,
    #[serde(default)]
    pub search: Option<String>,
    /// 1-based page number.
    #[serde(default)]
    pub page: Option<usize>,
}

fn status_filter<'de, D>(deserializer: D) -> Result<Option<PassStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) if value.eq_ignore_ascii_case("all") => Ok(None),
        Some(value) => {
            let value: StrDeserializer<'_, D::Error> = value.into_deserializer();
            PassStatus::deserialize(value).map(Some)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PassPage {
    pub items: Vec<PassListing>,
    pub total_count: usize,
    pub current_page: usize,
    pub page_size: usize,
}

/// Apply search, newest-first ordering, and pagination to already status-filtered listings.
pub fn paginate(mut entries: Vec<PassListing>, query: &PassQuery, page_size: usize) -> PassPage {
    let page_size = page_size.max(1);
    let current_page = query.page.unwrap_or(1).max(1);

    if let Some(needle) = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|needle| !needle.is_empty())
    {
        let needle = needle.to_lowercase();
        entries.retain(|entry| entry.matches(&needle));
    }

    entries.sort_by_key(|entry| Reverse(entry.pass.requested_at));

    let total_count = entries.len();
    let items = entries
        .into_iter()
        .skip((current_page - 1).saturating_mul(page_size))
        .take(page_size)
        .collect();

    PassPage {
        items,
        total_count,
        current_page,
        page_size,
    }
}
