//! Domain models for the IRB service.
//!
//! Enum-valued columns are stored as text; each `*Row` type mirrors the table
//! and converts into its strongly typed model.

pub mod audit_log;
pub mod automation_log;
pub mod document;
pub mod participant;
pub mod study;
pub mod user;

pub use audit_log::{AuditAction, AuditFilter, AuditLog, NewAuditLog};
pub use automation_log::{AutomationLog, AutomationOutcome};
pub use document::{Document, DocumentKind, NewDocument};
pub use participant::{
    EnrollmentStatus, NewParticipant, Participant, ParticipantFilter, ParticipantUpdate,
};
pub use study::{
    validate_date_range, NewStudy, RiskLevel, Study, StudyFilter, StudyScope, StudyStatus,
    StudyTransition, StudyUpdate,
};
pub use user::{NewUser, Role, SanitizedUser, User, UserFilter, UserUpdate};

use serde::{Deserialize, Serialize};
use service_core::error::AppError;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// A text value that does not name a known enum variant.
#[derive(Debug, thiserror::Error)]
#[error("invalid {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl From<ParseEnumError> for AppError {
    fn from(err: ParseEnumError) -> Self {
        AppError::BadRequest(anyhow::Error::new(err))
    }
}

/// Map an enum parse failure on a stored row to a database error; a bad
/// value in the table is corruption, not a client mistake.
pub(crate) fn corrupt_row(err: ParseEnumError) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("Corrupt row: {}", err))
}

/// Normalized pagination parameters (1-based page).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Page size large enough to cover a full export.
    pub fn unbounded() -> Self {
        Self {
            page: 1,
            page_size: u32::MAX,
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of results plus totals for the client's pager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, request: PageRequest) -> Self {
        let total_pages = if total <= 0 {
            0
        } else {
            let pages = (total as u64).div_ceil(u64::from(request.page_size));
            u32::try_from(pages).unwrap_or(u32::MAX)
        };

        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
            total_pages,
        }
    }

    /// Slice an already filtered, already ordered collection.
    pub fn from_vec(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len() as i64;
        let items = all
            .into_iter()
            .skip(usize::try_from(request.offset()).unwrap_or(usize::MAX))
            .take(request.page_size as usize)
            .collect();
        Self::new(items, total, request)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}
