use serde::{Deserialize, Serialize};

use crate::model::field::FieldPlacement;
use crate::model::row::Row;

/// Request payload for the bulk generation endpoint. Rows arrive already
/// parsed by the client; the template is referenced by file name (resolved in
/// the configured templates directory) or inlined as a `data:` URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub rows: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_ref: Option<String>,
    pub fields: Vec<FieldPlacement>,
}

/// Request payload for the single-document preview endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub row: Row,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_ref: Option<String>,
    pub fields: Vec<FieldPlacement>,
}

/// Request payload for the early artifact cleanup endpoint.
/// Contains the job identifier (uuid) whose archive should be deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupRequest {
    pub job_id: String,
}
