use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{guard::RateLimitGuard, parameters::SessionParameters};

/// Which model call produced an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    ParameterExtraction,
    ClinicalAnalysis,
}

/// Text returned by the hosted model, kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub kind: AnalysisKind,
    pub text: String,
    pub model: String,
    pub generated_at: DateTime<Utc>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Everything one user session owns. Passed explicitly to handlers.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub parameters: SessionParameters,
    pub guard: RateLimitGuard,
    pub password_correct: bool,
    pub user_api_key: Option<String>,
    pub analysis: Option<AnalysisResult>,
}

impl SessionContext {
    pub fn new(guard: RateLimitGuard) -> Self {
        Self {
            parameters: SessionParameters::default(),
            guard,
            password_correct: false,
            user_api_key: None,
            analysis: None,
        }
    }

    pub fn set_user_api_key(&mut self, key: impl Into<String>) {
        let key = key.into();
        let key = key.trim();
        self.user_api_key = (!key.is_empty()).then(|| key.to_string());
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(RateLimitGuard::default())
    }
}
