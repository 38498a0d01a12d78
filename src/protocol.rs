use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::page::ProjectId;

pub const DEFAULT_EDUCATION_LEVEL: &str = "undergraduate";
pub const KNOWN_EDUCATION_LEVELS: [&str; 3] = ["undergraduate", "graduate", "doctoral"];

pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const CSRF_HEADER: &str = "X-CSRFToken";

// Everything outside the RFC 3986 unreserved set, so a project id always stays one segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Body of `POST /research-assistant/project/{id}/analyze`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub analysis_id: String,
    pub selected_text: String,
    pub education_level: String,
}

/// Successful analysis payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub summary: String,
    pub research_topics: Vec<String>,
}

/// Failure body the endpoint returns alongside 4xx/5xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

impl ErrorPayload {
    /// Best-effort decode; `None` when the body is not the expected shape.
    pub fn from_body(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }
}

/// Returns the trigger's education level as written, or the default when the attribute is absent or blank.
pub fn resolve_education_level(attribute: Option<&str>) -> String {
    match attribute {
        Some(level) if !level.trim().is_empty() => {
            if !KNOWN_EDUCATION_LEVELS.contains(&level) {
                debug!(level, "unrecognised education level, sending as-is");
            }
            level.to_string()
        }
        _ => DEFAULT_EDUCATION_LEVEL.to_string(),
    }
}

pub fn analyze_path(project_id: &ProjectId) -> String {
    format!(
        "/research-assistant/project/{}/analyze",
        utf8_percent_encode(project_id.as_str(), PATH_SEGMENT)
    )
}
