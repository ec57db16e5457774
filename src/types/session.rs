use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// The authenticated user as reported by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// An authenticated session: bearer credentials plus the user they belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry as a UNIX timestamp in seconds, when known.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

impl Session {
    /// Returns the bearer token, or `None` when it is empty.
    pub fn token(&self) -> Option<&str> {
        if self.access_token.is_empty() {
            None
        } else {
            Some(&self.access_token)
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    /// Returns true if the session expires within `leeway_secs` of `now`.
    pub fn is_expired(&self, now: i64, leeway_secs: i64) -> bool {
        match self.expires_at {
            Some(exp) => exp - leeway_secs <= now,
            None => false,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.access_token.zeroize();
        if let Some(refresh) = self.refresh_token.as_mut() {
            refresh.zeroize();
        }
    }
}
