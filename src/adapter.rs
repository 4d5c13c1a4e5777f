//! Storage adapter boundary.
//!
//! The core never talks to a database directly; the `"database"` session
//! strategy and the email/token sign-in flow go through this narrow CRUD
//! interface. The adapter (or its backing store) is responsible for
//! at-most-once semantics on [`Adapter::use_verification_token`], which must
//! be an atomic get-and-delete so a single-use token cannot be double-spent
//! under concurrent callbacks.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error, Clone)]
pub enum AdapterError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdapterUser {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
    pub email_verified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdapterAccount {
    pub user_id: String,
    /// Provider id, e.g. `github`.
    pub provider: String,
    /// The user's id at the provider.
    pub provider_account_id: String,
    /// Provider type: `oauth`, `oidc`, `email`, `credentials`, `webauthn`.
    pub account_type: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdapterSession {
    pub session_token: String,
    pub user_id: String,
    pub expires: DateTime<Utc>,
}

/// A persisted email/OTP verification token. `token` is always the hashed
/// form; the plaintext token only ever travels in the verification URL.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationToken {
    pub identifier: String,
    pub token: String,
    pub expires: DateTime<Utc>,
}

#[async_trait]
pub trait Adapter: Send + Sync {
    async fn create_user(&self, user: AdapterUser) -> Result<AdapterUser, AdapterError>;
    async fn get_user(&self, id: &str) -> Result<Option<AdapterUser>, AdapterError>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<AdapterUser>, AdapterError>;
    async fn get_user_by_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<AdapterUser>, AdapterError>;
    async fn link_account(&self, account: AdapterAccount) -> Result<(), AdapterError>;

    async fn create_session(&self, session: AdapterSession)
    -> Result<AdapterSession, AdapterError>;
    async fn get_session(&self, session_token: &str)
    -> Result<Option<AdapterSession>, AdapterError>;
    async fn update_session(&self, session: AdapterSession) -> Result<(), AdapterError>;
    async fn delete_session(&self, session_token: &str) -> Result<(), AdapterError>;

    async fn create_verification_token(
        &self,
        token: VerificationToken,
    ) -> Result<(), AdapterError>;

    /// Atomic get-and-delete: returns the token record exactly once. A
    /// second call with the same `(identifier, token)` pair must return
    /// `None`.
    async fn use_verification_token(
        &self,
        identifier: &str,
        token: &str,
    ) -> Result<Option<VerificationToken>, AdapterError>;
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, AdapterUser>,
    accounts: Vec<AdapterAccount>,
    sessions: HashMap<String, AdapterSession>,
    verification_tokens: HashMap<(String, String), VerificationToken>,
}

/// In-memory adapter for tests and demos. All operations on one record set
/// happen under a single mutex, so `use_verification_token` is atomic.
#[derive(Default)]
pub struct MemoryAdapter {
    state: Mutex<MemoryState>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn create_user(&self, user: AdapterUser) -> Result<AdapterUser, AdapterError> {
        let mut state = self.state.lock().await;
        if state.users.contains_key(&user.id) {
            return Err(AdapterError::Conflict(format!("user {}", user.id)));
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<AdapterUser>, AdapterError> {
        Ok(self.state.lock().await.users.get(id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<AdapterUser>, AdapterError> {
        Ok(self
            .state
            .lock()
            .await
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn get_user_by_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<AdapterUser>, AdapterError> {
        let state = self.state.lock().await;
        let Some(account) = state
            .accounts
            .iter()
            .find(|a| a.provider == provider && a.provider_account_id == provider_account_id)
        else {
            return Ok(None);
        };
        Ok(state.users.get(&account.user_id).cloned())
    }

    async fn link_account(&self, account: AdapterAccount) -> Result<(), AdapterError> {
        self.state.lock().await.accounts.push(account);
        Ok(())
    }

    async fn create_session(
        &self,
        session: AdapterSession,
    ) -> Result<AdapterSession, AdapterError> {
        self.state
            .lock()
            .await
            .sessions
            .insert(session.session_token.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(
        &self,
        session_token: &str,
    ) -> Result<Option<AdapterSession>, AdapterError> {
        Ok(self.state.lock().await.sessions.get(session_token).cloned())
    }

    async fn update_session(&self, session: AdapterSession) -> Result<(), AdapterError> {
        self.state
            .lock()
            .await
            .sessions
            .insert(session.session_token.clone(), session);
        Ok(())
    }

    async fn delete_session(&self, session_token: &str) -> Result<(), AdapterError> {
        self.state.lock().await.sessions.remove(session_token);
        Ok(())
    }

    async fn create_verification_token(
        &self,
        token: VerificationToken,
    ) -> Result<(), AdapterError> {
        self.state
            .lock()
            .await
            .verification_tokens
            .insert((token.identifier.clone(), token.token.clone()), token);
        Ok(())
    }

    async fn use_verification_token(
        &self,
        identifier: &str,
        token: &str,
    ) -> Result<Option<VerificationToken>, AdapterError> {
        Ok(self
            .state
            .lock()
            .await
            .verification_tokens
            .remove(&(identifier.to_string(), token.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(id: &str, email: &str) -> AdapterUser {
        AdapterUser {
            id: id.to_string(),
            name: None,
            email: Some(email.to_string()),
            image: None,
            email_verified: None,
        }
    }

    #[tokio::test]
    async fn test_user_and_account_lookup() {
        let adapter = MemoryAdapter::new();
        adapter.create_user(user("u1", "a@example.com")).await.unwrap();
        adapter
            .link_account(AdapterAccount {
                user_id: "u1".to_string(),
                provider: "github".to_string(),
                provider_account_id: "gh-42".to_string(),
                account_type: "oauth".to_string(),
                access_token: None,
                refresh_token: None,
                expires_at: None,
                scope: None,
                id_token: None,
            })
            .await
            .unwrap();

        let found = adapter
            .get_user_by_account("github", "gh-42")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "u1");
        assert!(
            adapter
                .get_user_by_account("gitlab", "gh-42")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(
            adapter
                .get_user_by_email("a@example.com")
                .await
                .unwrap()
                .unwrap()
                .id,
            "u1"
        );
    }

    #[tokio::test]
    async fn test_verification_token_single_use() {
        let adapter = MemoryAdapter::new();
        adapter
            .create_verification_token(VerificationToken {
                identifier: "a@example.com".to_string(),
                token: "hashed".to_string(),
                expires: Utc::now() + Duration::hours(1),
            })
            .await
            .unwrap();

        let first = adapter
            .use_verification_token("a@example.com", "hashed")
            .await
            .unwrap();
        assert!(first.is_some());

        let second = adapter
            .use_verification_token("a@example.com", "hashed")
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let adapter = MemoryAdapter::new();
        let session = AdapterSession {
            session_token: "tok".to_string(),
            user_id: "u1".to_string(),
            expires: Utc::now() + Duration::days(30),
        };
        adapter.create_session(session.clone()).await.unwrap();
        assert_eq!(
            adapter.get_session("tok").await.unwrap().unwrap().user_id,
            "u1"
        );
        adapter.delete_session("tok").await.unwrap();
        assert!(adapter.get_session("tok").await.unwrap().is_none());
        // Deleting again is a no-op, not an error.
        adapter.delete_session("tok").await.unwrap();
    }
}
