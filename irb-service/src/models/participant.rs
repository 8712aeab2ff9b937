//! Participant model - a research subject enrolled in a study.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use super::{corrupt_row, ParseEnumError};
use service_core::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    #[default]
    Screening,
    Enrolled,
    Withdrawn,
    Completed,
}

impl EnrollmentStatus {
    pub const ALL: [EnrollmentStatus; 4] = [
        EnrollmentStatus::Screening,
        EnrollmentStatus::Enrolled,
        EnrollmentStatus::Withdrawn,
        EnrollmentStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Screening => "screening",
            EnrollmentStatus::Enrolled => "enrolled",
            EnrollmentStatus::Withdrawn => "withdrawn",
            EnrollmentStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EnrollmentStatus::Withdrawn | EnrollmentStatus::Completed
        )
    }

    /// Check a status change for a participant whose consent state (after
    /// the update) is `consent_signed`.
    pub fn check_change(
        self,
        next: EnrollmentStatus,
        consent_signed: bool,
    ) -> Result<(), AppError> {
        if self == next {
            return Ok(());
        }
        if self.is_terminal() {
            return Err(AppError::conflict(format!(
                "Participant is {} and can no longer change status",
                self
            )));
        }
        if next == EnrollmentStatus::Enrolled && !consent_signed {
            return Err(AppError::bad_request(
                "Participant cannot be enrolled without signed consent",
            ));
        }
        if next == EnrollmentStatus::Screening && self != EnrollmentStatus::Screening {
            return Err(AppError::conflict(format!(
                "Participant cannot return to screening from {}",
                self
            )));
        }
        Ok(())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EnrollmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("enrollment status", s))
    }
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: Uuid,
    pub study_id: Uuid,
    pub subject_code: String,
    pub enrollment_status: EnrollmentStatus,
    pub consent_signed: bool,
    pub consent_date: Option<NaiveDate>,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: Option<String>,
    pub notes: Option<String>,
    pub enrolled_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Participant {
    pub fn new(input: NewParticipant) -> Self {
        let now = Utc::now();
        Self {
            participant_id: Uuid::new_v4(),
            study_id: input.study_id,
            subject_code: input.subject_code.trim().to_string(),
            enrollment_status: input.enrollment_status,
            consent_signed: input.consent_signed,
            consent_date: input.consent_date,
            date_of_birth: input.date_of_birth,
            sex: input.sex,
            notes: input.notes,
            enrolled_by: input.enrolled_by,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Validate and apply an update in memory.
    pub fn apply_update(&mut self, update: &ParticipantUpdate) -> Result<(), AppError> {
        let consent_signed = update.consent_signed.unwrap_or(self.consent_signed);
        if let Some(next) = update.enrollment_status {
            self.enrollment_status.check_change(next, consent_signed)?;
        } else if self.enrollment_status == EnrollmentStatus::Enrolled && !consent_signed {
            return Err(AppError::bad_request(
                "Consent cannot be revoked for an enrolled participant; withdraw them instead",
            ));
        }

        if let Some(status) = update.enrollment_status {
            self.enrollment_status = status;
        }
        self.consent_signed = consent_signed;
        if let Some(date) = update.consent_date {
            self.consent_date = date;
        }
        if let Some(dob) = update.date_of_birth {
            self.date_of_birth = dob;
        }
        if let Some(sex) = &update.sex {
            self.sex = sex.clone();
        }
        if let Some(notes) = &update.notes {
            self.notes = notes.clone();
        }
        self.updated_utc = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ParticipantRow {
    pub participant_id: Uuid,
    pub study_id: Uuid,
    pub subject_code: String,
    pub enrollment_status: String,
    pub consent_signed: bool,
    pub consent_date: Option<NaiveDate>,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: Option<String>,
    pub notes: Option<String>,
    pub enrolled_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl TryFrom<ParticipantRow> for Participant {
    type Error = AppError;

    fn try_from(row: ParticipantRow) -> Result<Self, Self::Error> {
        Ok(Self {
            participant_id: row.participant_id,
            study_id: row.study_id,
            subject_code: row.subject_code,
            enrollment_status: row.enrollment_status.parse().map_err(corrupt_row)?,
            consent_signed: row.consent_signed,
            consent_date: row.consent_date,
            date_of_birth: row.date_of_birth,
            sex: row.sex,
            notes: row.notes,
            enrolled_by: row.enrolled_by,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub study_id: Uuid,
    pub subject_code: String,
    pub enrollment_status: EnrollmentStatus,
    pub consent_signed: bool,
    pub consent_date: Option<NaiveDate>,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: Option<String>,
    pub notes: Option<String>,
    pub enrolled_by: Uuid,
}

/// Partial update; `Some(None)` clears an optional column.
#[derive(Debug, Clone, Default)]
pub struct ParticipantUpdate {
    pub enrollment_status: Option<EnrollmentStatus>,
    pub consent_signed: Option<bool>,
    pub consent_date: Option<Option<NaiveDate>>,
    pub date_of_birth: Option<Option<NaiveDate>>,
    pub sex: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct ParticipantFilter {
    pub enrollment_status: Option<EnrollmentStatus>,
}

impl ParticipantFilter {
    pub fn matches(&self, participant: &Participant) -> bool {
        self.enrollment_status
            .map_or(true, |status| participant.enrollment_status == status)
    }
}
