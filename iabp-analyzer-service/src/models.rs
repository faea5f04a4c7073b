use iabp_session::{AnalysisResult, SessionParameters};
use serde::{Deserialize, Serialize};

use crate::credentials::CredentialSource;

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiKeyRequest {
    pub api_key: String,
}

/// What a client sees of its session. Never includes the key itself.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub created_at: String,
    pub password_required: bool,
    pub password_correct: bool,
    pub credential_source: Option<CredentialSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<SessionParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractionResponse {
    pub session_id: String,
    pub updated_fields: Vec<String>,
    pub parameters: SessionParameters,
    pub payload_mb: f64,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub session_id: String,
    pub analysis: AnalysisResult,
    pub disclaimer: String,
}
