use tracing::{info, warn};

use crate::context::SessionContext;
use crate::error::{Result, SessionError};

/// Optional shared-password gate in front of a deployment.
///
/// With no configured password every session is open. Otherwise a session
/// must submit the password once; the result is kept in its
/// `password_correct` flag for the rest of the session.
#[derive(Debug, Clone, Default)]
pub struct PasswordGate {
    password: Option<String>,
}

impl PasswordGate {
    pub fn new(password: Option<String>) -> Self {
        Self {
            password: password.filter(|p| !p.is_empty()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.password.is_some()
    }

    /// Compare a submitted password and record the outcome on the session.
    pub fn login(&self, context: &mut SessionContext, submitted: &str) -> Result<()> {
        let Some(expected) = &self.password else {
            context.password_correct = true;
            return Ok(());
        };

        if submitted == expected {
            info!("Session unlocked");
            context.password_correct = true;
            Ok(())
        } else {
            warn!("Incorrect password submitted");
            context.password_correct = false;
            Err(SessionError::IncorrectPassword)
        }
    }

    /// Fail with `Locked` unless the session may see protected content.
    pub fn require(&self, context: &SessionContext) -> Result<()> {
        if !self.is_enabled() || context.password_correct {
            Ok(())
        } else {
            Err(SessionError::Locked)
        }
    }
}
