//! Study document metadata. Content bytes are stored separately and only
//! loaded by the download endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use super::{corrupt_row, ParseEnumError};
use service_core::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Protocol,
    ConsentForm,
    Amendment,
    ApprovalLetter,
    Other,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 5] = [
        DocumentKind::Protocol,
        DocumentKind::ConsentForm,
        DocumentKind::Amendment,
        DocumentKind::ApprovalLetter,
        DocumentKind::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Protocol => "protocol",
            DocumentKind::ConsentForm => "consent_form",
            DocumentKind::Amendment => "amendment",
            DocumentKind::ApprovalLetter => "approval_letter",
            DocumentKind::Other => "other",
        }
    }
}

impl FromStr for DocumentKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("document kind", s))
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: Uuid,
    pub study_id: Uuid,
    pub kind: DocumentKind,
    pub title: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub version: i32,
    pub checksum_sha256: String,
    pub uploaded_by: Uuid,
    pub created_utc: DateTime<Utc>,
}

impl Document {
    /// Build the metadata for version `version` of an upload.
    pub fn new(input: &NewDocument, version: i32) -> Self {
        Self {
            document_id: Uuid::new_v4(),
            study_id: input.study_id,
            kind: input.kind,
            title: input.title.clone(),
            file_name: input.file_name.clone(),
            content_type: input.content_type.clone(),
            size_bytes: input.content.len() as i64,
            version,
            checksum_sha256: checksum(&input.content),
            uploaded_by: input.uploaded_by,
            created_utc: Utc::now(),
        }
    }

    pub fn is_same_series(&self, input: &NewDocument) -> bool {
        self.study_id == input.study_id && self.kind == input.kind && self.title == input.title
    }
}

pub fn checksum(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub document_id: Uuid,
    pub study_id: Uuid,
    pub kind: String,
    pub title: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub version: i32,
    pub checksum_sha256: String,
    pub uploaded_by: Uuid,
    pub created_utc: DateTime<Utc>,
}

impl TryFrom<DocumentRow> for Document {
    type Error = AppError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            document_id: row.document_id,
            study_id: row.study_id,
            kind: row.kind.parse().map_err(corrupt_row)?,
            title: row.title,
            file_name: row.file_name,
            content_type: row.content_type,
            size_bytes: row.size_bytes,
            version: row.version,
            checksum_sha256: row.checksum_sha256,
            uploaded_by: row.uploaded_by,
            created_utc: row.created_utc,
        })
    }
}

/// An upload waiting to be versioned and stored.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub study_id: Uuid,
    pub kind: DocumentKind,
    pub title: String,
    pub file_name: String,
    pub content_type: String,
    pub content: Vec<u8>,
    pub uploaded_by: Uuid,
}
