use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authenticated caller as reported by the session provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Uuid,
    pub email: Option<String>,
    #[serde(default, skip_serializing)]
    pub access_token: String,
}

impl Session {
    /// Identity used by batch jobs that talk to the store with a service key.
    pub fn service(access_token: impl Into<String>) -> Self {
        Self {
            user_id: Uuid::nil(),
            email: None,
            access_token: access_token.into(),
        }
    }
}

// Keep the bearer out of logs.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}
