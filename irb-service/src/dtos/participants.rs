use chrono::NaiveDate;
use serde::Deserialize;
use validator::Validate;

use super::double_option;
use crate::models::{EnrollmentStatus, PageRequest, ParticipantFilter, ParticipantUpdate};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateParticipantRequest {
    #[validate(length(min = 1, max = 64, message = "Subject code must be 1 to 64 characters"))]
    pub subject_code: String,

    #[serde(default)]
    pub enrollment_status: EnrollmentStatus,

    #[serde(default)]
    pub consent_signed: bool,

    pub consent_date: Option<NaiveDate>,
    pub date_of_birth: Option<NaiveDate>,

    #[validate(length(max = 32))]
    pub sex: Option<String>,

    #[validate(length(max = 5000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateParticipantRequest {
    pub enrollment_status: Option<EnrollmentStatus>,

    pub consent_signed: Option<bool>,

    #[serde(default, deserialize_with = "double_option")]
    pub consent_date: Option<Option<NaiveDate>>,

    #[serde(default, deserialize_with = "double_option")]
    pub date_of_birth: Option<Option<NaiveDate>>,

    #[serde(default, deserialize_with = "double_option")]
    pub sex: Option<Option<String>>,

    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

impl From<UpdateParticipantRequest> for ParticipantUpdate {
    fn from(req: UpdateParticipantRequest) -> Self {
        ParticipantUpdate {
            enrollment_status: req.enrollment_status,
            consent_signed: req.consent_signed,
            consent_date: req.consent_date,
            date_of_birth: req.date_of_birth,
            sex: req.sex,
            notes: req.notes,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ParticipantListQuery {
    pub enrollment_status: Option<EnrollmentStatus>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ParticipantListQuery {
    pub fn filter(&self) -> ParticipantFilter {
        ParticipantFilter {
            enrollment_status: self.enrollment_status,
        }
    }

    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.page_size)
    }
}
