use serde::{Deserialize, Serialize};

/// Identity context for every transport and REST call.
///
/// Constructed by the host's authentication flow and passed explicitly
/// into the runtime and REST client constructors; the reconciler and
/// transport only ever read it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// User ID of the acting user.
    pub user_id: String,
    /// Bearer token presented to the REST API and the broker handshake.
    pub access_token: Option<String>,
}

impl Session {
    /// Build a session for `user_id` with an optional bearer token.
    pub fn new(user_id: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token,
        }
    }

    /// Whether `sender_id` is the acting user.
    pub fn is_self(&self, sender_id: &str) -> bool {
        self.user_id == sender_id
    }
}
