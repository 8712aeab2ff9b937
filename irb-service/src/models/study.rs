//! Study model - a research protocol under IRB oversight.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use super::{corrupt_row, ParseEnumError};
use service_core::error::AppError;

/// Study lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyStatus {
    Draft,
    Submitted,
    Reviewed,
    Active,
    Closed,
}

impl StudyStatus {
    pub const ALL: [StudyStatus; 5] = [
        StudyStatus::Draft,
        StudyStatus::Submitted,
        StudyStatus::Reviewed,
        StudyStatus::Active,
        StudyStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StudyStatus::Draft => "draft",
            StudyStatus::Submitted => "submitted",
            StudyStatus::Reviewed => "reviewed",
            StudyStatus::Active => "active",
            StudyStatus::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StudyStatus::Closed)
    }
}

impl FromStr for StudyStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StudyStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("study status", s))
    }
}

impl std::fmt::Display for StudyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk classification assigned by the submitting researcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Minimal,
    Moderate,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Minimal => "minimal",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimal" => Ok(RiskLevel::Minimal),
            "moderate" => Ok(RiskLevel::Moderate),
            "high" => Ok(RiskLevel::High),
            _ => Err(ParseEnumError::new("risk level", s)),
        }
    }
}

/// Study entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub study_id: Uuid,
    pub protocol_number: String,
    pub title: String,
    pub description: String,
    pub principal_investigator_id: Uuid,
    pub status: StudyStatus,
    pub risk_level: RiskLevel,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub target_enrollment: i32,
    pub review_notes: Option<String>,
    pub submitted_utc: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_utc: Option<DateTime<Utc>>,
    pub approved_utc: Option<DateTime<Utc>>,
    pub closed_utc: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Study {
    /// Build a fresh draft study.
    pub fn new(input: NewStudy) -> Self {
        let now = Utc::now();
        Self {
            study_id: Uuid::new_v4(),
            protocol_number: input.protocol_number,
            title: input.title,
            description: input.description,
            principal_investigator_id: input.principal_investigator_id,
            status: StudyStatus::Draft,
            risk_level: input.risk_level,
            start_date: input.start_date,
            end_date: input.end_date,
            target_enrollment: input.target_enrollment,
            review_notes: None,
            submitted_utc: None,
            reviewed_by: None,
            reviewed_utc: None,
            approved_utc: None,
            closed_utc: None,
            created_by: input.created_by,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Apply a partial update in memory (used by the in-memory store and
    /// to validate the merged date range before persisting).
    pub fn apply_update(&mut self, update: &StudyUpdate) {
        if let Some(title) = &update.title {
            self.title = title.clone();
        }
        if let Some(description) = &update.description {
            self.description = description.clone();
        }
        if let Some(pi) = update.principal_investigator_id {
            self.principal_investigator_id = pi;
        }
        if let Some(risk) = update.risk_level {
            self.risk_level = risk;
        }
        if let Some(start) = update.start_date {
            self.start_date = start;
        }
        if let Some(end) = update.end_date {
            self.end_date = end;
        }
        if let Some(target) = update.target_enrollment {
            self.target_enrollment = target;
        }
        self.updated_utc = Utc::now();
    }

    /// Apply a planned status change in memory.
    pub fn apply_transition(&mut self, transition: &StudyTransition) {
        self.status = transition.to;
        self.updated_utc = transition.at;
        if let Some(notes) = &transition.notes {
            self.review_notes = Some(notes.clone());
        }
        match transition.to {
            StudyStatus::Submitted => self.submitted_utc = Some(transition.at),
            StudyStatus::Reviewed => {
                self.reviewed_utc = Some(transition.at);
                self.reviewed_by = Some(transition.actor_id);
            }
            StudyStatus::Active => self.approved_utc = Some(transition.at),
            StudyStatus::Closed => self.closed_utc = Some(transition.at),
            StudyStatus::Draft => {}
        }
    }

    pub fn validate_dates(&self) -> Result<(), AppError> {
        validate_date_range(self.start_date, self.end_date)
    }
}

pub fn validate_date_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<(), AppError> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => Err(AppError::bad_request(format!(
            "end_date {} is before start_date {}",
            end, start
        ))),
        _ => Ok(()),
    }
}

/// Row as stored in `studies`.
#[derive(Debug, Clone, FromRow)]
pub struct StudyRow {
    pub study_id: Uuid,
    pub protocol_number: String,
    pub title: String,
    pub description: String,
    pub principal_investigator_id: Uuid,
    pub status: String,
    pub risk_level: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub target_enrollment: i32,
    pub review_notes: Option<String>,
    pub submitted_utc: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_utc: Option<DateTime<Utc>>,
    pub approved_utc: Option<DateTime<Utc>>,
    pub closed_utc: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl TryFrom<StudyRow> for Study {
    type Error = AppError;

    fn try_from(row: StudyRow) -> Result<Self, Self::Error> {
        Ok(Self {
            study_id: row.study_id,
            protocol_number: row.protocol_number,
            title: row.title,
            description: row.description,
            principal_investigator_id: row.principal_investigator_id,
            status: row.status.parse().map_err(corrupt_row)?,
            risk_level: row.risk_level.parse().map_err(corrupt_row)?,
            start_date: row.start_date,
            end_date: row.end_date,
            target_enrollment: row.target_enrollment,
            review_notes: row.review_notes,
            submitted_utc: row.submitted_utc,
            reviewed_by: row.reviewed_by,
            reviewed_utc: row.reviewed_utc,
            approved_utc: row.approved_utc,
            closed_utc: row.closed_utc,
            created_by: row.created_by,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

/// Input for creating a study.
#[derive(Debug, Clone)]
pub struct NewStudy {
    pub protocol_number: String,
    pub title: String,
    pub description: String,
    pub principal_investigator_id: Uuid,
    pub risk_level: RiskLevel,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub target_enrollment: i32,
    pub created_by: Uuid,
}

/// Partial update of a draft study. For the date fields, `Some(None)` clears the value.
#[derive(Debug, Clone, Default)]
pub struct StudyUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub principal_investigator_id: Option<Uuid>,
    pub risk_level: Option<RiskLevel>,
    pub start_date: Option<Option<NaiveDate>>,
    pub end_date: Option<Option<NaiveDate>>,
    pub target_enrollment: Option<i32>,
}

impl StudyUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.principal_investigator_id.is_none()
            && self.risk_level.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
            && self.target_enrollment.is_none()
    }
}

/// A validated status change, applied only if the study is still in `from`.
#[derive(Debug, Clone)]
pub struct StudyTransition {
    pub study_id: Uuid,
    pub from: StudyStatus,
    pub to: StudyStatus,
    pub actor_id: Uuid,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

/// Filter for listing studies.
#[derive(Debug, Clone, Default)]
pub struct StudyFilter {
    pub status: Option<StudyStatus>,
    pub principal_investigator_id: Option<Uuid>,
    /// Case-insensitive substring of title or protocol number.
    pub search: Option<String>,
    pub scope: StudyScope,
}

/// Which studies the caller may see at all; applied on top of the filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StudyScope {
    #[default]
    All,
    /// Only studies led by this user.
    LedBy(Uuid),
    /// Studies led by this user plus every active study.
    LedByOrActive(Uuid),
}

impl StudyScope {
    pub fn includes(&self, study: &Study) -> bool {
        match *self {
            StudyScope::All => true,
            StudyScope::LedBy(user_id) => study.principal_investigator_id == user_id,
            StudyScope::LedByOrActive(user_id) => {
                study.principal_investigator_id == user_id || study.status == StudyStatus::Active
            }
        }
    }
}

impl StudyFilter {
    pub fn matches(&self, study: &Study) -> bool {
        if let Some(status) = self.status {
            if study.status != status {
                return false;
            }
        }
        if let Some(pi) = self.principal_investigator_id {
            if study.principal_investigator_id != pi {
                return false;
            }
        }
        if !self.scope.includes(study) {
            return false;
        }
        if let Some(q) = &self.search {
            let q = q.to_lowercase();
            if !study.title.to_lowercase().contains(&q)
                && !study.protocol_number.to_lowercase().contains(&q)
            {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Study {
        Study::new(NewStudy {
            protocol_number: "IRB-2025-001".to_string(),
            title: "Sleep and Memory".to_string(),
            description: String::new(),
            principal_investigator_id: Uuid::new_v4(),
            risk_level: RiskLevel::Minimal,
            start_date: None,
            end_date: None,
            target_enrollment: 40,
            created_by: Uuid::new_v4(),
        })
    }

    #[test]
    fn new_studies_start_in_draft() {
        assert_eq!(sample().status, StudyStatus::Draft);
    }

    #[test]
    fn rejects_end_before_start() {
        let start = NaiveDate::from_ymd_opt(2025, 6, 1);
        let end = NaiveDate::from_ymd_opt(2025, 5, 1);
        assert!(validate_date_range(start, end).is_err());
        assert!(validate_date_range(end, start).is_ok());
        assert!(validate_date_range(None, end).is_ok());
    }

    #[test]
    fn transition_stamps_review_metadata() {
        let mut study = sample();
        let reviewer = Uuid::new_v4();
        let at = Utc::now();
        study.apply_transition(&StudyTransition {
            study_id: study.study_id,
            from: StudyStatus::Submitted,
            to: StudyStatus::Reviewed,
            actor_id: reviewer,
            notes: Some("Consent form wording approved".to_string()),
            at,
        });
        assert_eq!(study.status, StudyStatus::Reviewed);
        assert_eq!(study.reviewed_by, Some(reviewer));
        assert_eq!(study.reviewed_utc, Some(at));
        assert_eq!(
            study.review_notes.as_deref(),
            Some("Consent form wording approved")
        );
    }

    #[test]
    fn filter_searches_title_and_protocol() {
        let study = sample();
        let by_title = StudyFilter {
            search: Some("memory".to_string()),
            ..Default::default()
        };
        let by_protocol = StudyFilter {
            search: Some("2025-001".to_string()),
            ..Default::default()
        };
        let miss = StudyFilter {
            search: Some("cardio".to_string()),
            ..Default::default()
        };
        assert!(by_title.matches(&study));
        assert!(by_protocol.matches(&study));
        assert!(!miss.matches(&study));
    }

    #[test]
    fn scope_limits_visibility() {
        let study = sample();
        let stranger = Uuid::new_v4();
        assert!(StudyScope::All.includes(&study));
        assert!(StudyScope::LedBy(study.principal_investigator_id).includes(&study));
        assert!(!StudyScope::LedBy(stranger).includes(&study));
        assert!(!StudyScope::LedByOrActive(stranger).includes(&study));

        let mut active = study.clone();
        active.status = StudyStatus::Active;
        assert!(StudyScope::LedByOrActive(stranger).includes(&active));
    }
}
