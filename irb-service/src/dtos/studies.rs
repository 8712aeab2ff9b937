use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::double_option;
use crate::models::{PageRequest, RiskLevel, StudyFilter, StudyStatus, StudyUpdate};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateStudyRequest {
    #[validate(length(min = 1, max = 64, message = "Protocol number must be 1 to 64 characters"))]
    pub protocol_number: String,

    #[validate(length(min = 1, max = 300, message = "Title must be 1 to 300 characters"))]
    pub title: String,

    #[serde(default)]
    #[validate(length(max = 10000))]
    pub description: String,

    /// Only admins may name someone other than themselves.
    pub principal_investigator_id: Option<Uuid>,

    #[serde(default)]
    pub risk_level: RiskLevel,

    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,

    #[serde(default)]
    #[validate(range(min = 0, max = 1000000, message = "Target enrollment must not be negative"))]
    pub target_enrollment: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateStudyRequest {
    #[validate(length(min = 1, max = 300, message = "Title must be 1 to 300 characters"))]
    pub title: Option<String>,

    #[validate(length(max = 10000))]
    pub description: Option<String>,

    pub principal_investigator_id: Option<Uuid>,

    pub risk_level: Option<RiskLevel>,

    #[serde(default, deserialize_with = "double_option")]
    pub start_date: Option<Option<NaiveDate>>,

    #[serde(default, deserialize_with = "double_option")]
    pub end_date: Option<Option<NaiveDate>>,

    #[validate(range(min = 0, max = 1000000, message = "Target enrollment must not be negative"))]
    pub target_enrollment: Option<i32>,
}

impl From<UpdateStudyRequest> for StudyUpdate {
    fn from(req: UpdateStudyRequest) -> Self {
        StudyUpdate {
            title: req.title,
            description: req.description,
            principal_investigator_id: req.principal_investigator_id,
            risk_level: req.risk_level,
            start_date: req.start_date,
            end_date: req.end_date,
            target_enrollment: req.target_enrollment,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StudyListQuery {
    pub status: Option<StudyStatus>,
    pub principal_investigator_id: Option<Uuid>,
    pub q: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl StudyListQuery {
    pub fn filter(&self) -> StudyFilter {
        StudyFilter {
            status: self.status,
            principal_investigator_id: self.principal_investigator_id,
            search: self
                .q
                .as_ref()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty()),
            ..Default::default()
        }
    }

    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.page_size)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct TransitionRequest {
    pub to: StudyStatus,

    #[validate(length(max = 10000))]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransitionOptionsResponse {
    pub current: StudyStatus,
    pub allowed: Vec<StudyStatus>,
}
