use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use super::{corrupt_row, ParseEnumError};
use service_core::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationOutcome {
    Success,
    Skipped,
    Failure,
}

impl AutomationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationOutcome::Success => "success",
            AutomationOutcome::Skipped => "skipped",
            AutomationOutcome::Failure => "failure",
        }
    }
}

impl FromStr for AutomationOutcome {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AutomationOutcome::Success),
            "skipped" => Ok(AutomationOutcome::Skipped),
            "failure" => Ok(AutomationOutcome::Failure),
            _ => Err(ParseEnumError::new("automation outcome", s)),
        }
    }
}

/// One result line of an automation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationLog {
    pub automation_id: Uuid,
    pub rule_name: String,
    pub study_id: Option<Uuid>,
    pub outcome: AutomationOutcome,
    pub message: String,
    pub created_utc: DateTime<Utc>,
}

impl AutomationLog {
    pub fn new(
        rule_name: &str,
        study_id: Option<Uuid>,
        outcome: AutomationOutcome,
        message: impl Into<String>,
    ) -> Self {
        Self {
            automation_id: Uuid::new_v4(),
            rule_name: rule_name.to_string(),
            study_id,
            outcome,
            message: message.into(),
            created_utc: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AutomationLogRow {
    pub automation_id: Uuid,
    pub rule_name: String,
    pub study_id: Option<Uuid>,
    pub outcome: String,
    pub message: String,
    pub created_utc: DateTime<Utc>,
}

impl TryFrom<AutomationLogRow> for AutomationLog {
    type Error = AppError;

    fn try_from(row: AutomationLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            automation_id: row.automation_id,
            rule_name: row.rule_name,
            study_id: row.study_id,
            outcome: row.outcome.parse().map_err(corrupt_row)?,
            message: row.message,
            created_utc: row.created_utc,
        })
    }
}
