use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::UploadRecord;
use crate::model::{Label, Prediction};

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub id: Uuid,
    pub filename: String,
    pub original_filename: String,
    pub content_type: String,
    pub label: Label,
    pub confidence: f64,
    /// Confidence of the other class; the two always sum to 100.
    pub complement_confidence: f64,
    pub url: String,
    pub owner: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&UploadRecord> for AnalysisResponse {
    fn from(r: &UploadRecord) -> Self {
        Self {
            id: r.id,
            filename: r.filename.clone(),
            original_filename: r.original_filename.clone(),
            content_type: r.content_type.clone(),
            label: r.label,
            confidence: r.confidence,
            complement_confidence: Prediction {
                label: r.label,
                confidence: r.confidence,
            }
            .complement_confidence(),
            url: format!("/api/v1/uploads/{}", r.filename),
            owner: r.owner.kind(),
            created_at: r.created_at,
        }
    }
}

/// Body returned by the dashboard upload.
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    #[serde(flatten)]
    pub analysis: AnalysisResponse,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_remaining: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub items: Vec<AnalysisResponse>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct GuestQuotaResponse {
    pub limit: i64,
    pub used: i64,
    pub remaining: i64,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}
fn default_limit() -> i64 { 20 }

impl Pagination {
    pub fn clamped(&self) -> (i64, i64) {
        (self.limit.clamp(1, 100), self.offset.max(0))
    }
}
