//! Token validator double.

use async_trait::async_trait;
use courier_core::identity::{AuthError, Identity, TokenValidator};
use courier_core::order::UserId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Validates tokens against a fixed table.
///
/// Unknown tokens are rejected with [`AuthError::InvalidToken`]. When marked
/// unreachable every call fails with [`AuthError::Transport`].
#[derive(Default)]
pub struct StaticTokenValidator {
    tokens: Mutex<HashMap<String, Identity>>,
    unreachable: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl StaticTokenValidator {
    /// Create a validator that knows no tokens.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as `user_id` with role `client`.
    #[must_use]
    pub fn with_token(self, token: impl Into<String>, user_id: UserId) -> Self {
        self.insert(token, user_id, "client");
        self
    }

    /// Accept `token` as `user_id` with `role`.
    pub fn insert(&self, token: impl Into<String>, user_id: UserId, role: impl Into<String>) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                token.into(),
                Identity {
                    user_id,
                    role: role.into(),
                },
            );
    }

    /// Fail every call with a transport error carrying `reason`.
    pub fn set_unreachable(&self, reason: Option<&str>) {
        *self.unreachable.lock().unwrap_or_else(PoisonError::into_inner) =
            reason.map(str::to_string);
    }

    /// How many times [`TokenValidator::validate_token`] was called.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate_token(&self, token: &str) -> Result<Identity, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = self
            .unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(AuthError::Transport(reason));
        }

        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::InvalidToken("token not recognised".to_string()))
    }
}
