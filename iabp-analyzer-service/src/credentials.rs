use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Where the API key for a call came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Secrets,
    User,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub value: String,
    pub source: CredentialSource,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// Pick the key to use: the deploy-time secret when present, otherwise the session's own key.
pub fn resolve(secret: Option<&str>, user: Option<&str>) -> Option<Credential> {
    let pick = |value: Option<&str>, source| {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Credential {
                value: v.to_string(),
                source,
            })
    };

    pick(secret, CredentialSource::Secrets).or_else(|| pick(user, CredentialSource::User))
}

pub fn require(secret: Option<&str>, user: Option<&str>) -> Result<Credential, AnalysisError> {
    resolve(secret, user).ok_or(AnalysisError::MissingCredential)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_takes_precedence() {
        let credential = resolve(Some("sk-secret"), Some("sk-user")).unwrap();
        assert_eq!(credential.value, "sk-secret");
        assert_eq!(credential.source, CredentialSource::Secrets);
    }

    #[test]
    fn test_user_key_used_without_secret() {
        let credential = resolve(None, Some(" sk-user ")).unwrap();
        assert_eq!(credential.value, "sk-user");
        assert_eq!(credential.source, CredentialSource::User);

        let credential = resolve(Some(""), Some("sk-user")).unwrap();
        assert_eq!(credential.source, CredentialSource::User);
    }

    #[test]
    fn test_missing_credential() {
        assert!(resolve(None, None).is_none());
        assert!(matches!(
            require(None, Some("   ")),
            Err(AnalysisError::MissingCredential)
        ));
    }

    #[test]
    fn test_debug_hides_key() {
        let credential = resolve(Some("sk-secret"), None).unwrap();
        assert!(!format!("{:?}", credential).contains("sk-secret"));
    }
}
