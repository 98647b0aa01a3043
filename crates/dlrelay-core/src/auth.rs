//! Credential gate - validates callers before any registry access

use crate::error::DlrelayError;
use async_trait::async_trait;
use dlrelay_types::Credentials;
use std::sync::Arc;
use tracing::debug;

/// Backing store for caller credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read-only lookup; `Ok(false)` for an unknown user or wrong password
    async fn verify(&self, username: &str, password: &str) -> Result<bool, DlrelayError>;
}

/// Checks caller identity against a [`CredentialStore`]
#[derive(Clone)]
pub struct CredentialGate {
    store: Arc<dyn CredentialStore>,
}

impl CredentialGate {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Authenticate a caller.
    ///
    /// Empty values are rejected with [`DlrelayError::AuthRequired`] before
    /// the store is consulted.
    pub async fn authenticate(&self, owner: &str, password: &str) -> Result<bool, DlrelayError> {
        if owner.is_empty() || password.is_empty() {
            return Err(DlrelayError::AuthRequired);
        }
        let accepted = self.store.verify(owner, password).await?;
        if !accepted {
            debug!("Credential check failed for {}", owner);
        }
        Ok(accepted)
    }

    /// Like [`authenticate`](Self::authenticate), but a mismatch is an error
    pub async fn require(&self, credentials: &Credentials) -> Result<(), DlrelayError> {
        if self
            .authenticate(&credentials.username, &credentials.password)
            .await?
        {
            Ok(())
        } else {
            Err(DlrelayError::AuthFailed)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory store that counts lookups
    #[derive(Default)]
    pub(crate) struct CountingStore {
        users: HashMap<String, String>,
        pub(crate) lookups: AtomicUsize,
    }

    impl CountingStore {
        pub(crate) fn with_user(username: &str, password: &str) -> Self {
            let mut users = HashMap::new();
            users.insert(username.to_string(), password.to_string());
            Self {
                users,
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CredentialStore for CountingStore {
        async fn verify(&self, username: &str, password: &str) -> Result<bool, DlrelayError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.users.get(username).map(|p| p == password).unwrap_or(false))
        }
    }

    #[tokio::test]
    async fn test_empty_values_short_circuit() {
        let store = Arc::new(CountingStore::with_user("bob", "secret"));
        let gate = CredentialGate::new(store.clone());

        assert!(matches!(gate.authenticate("", "x").await, Err(DlrelayError::AuthRequired)));
        assert!(matches!(gate.authenticate("x", "").await, Err(DlrelayError::AuthRequired)));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_lookup() {
        let store = Arc::new(CountingStore::with_user("bob", "secret"));
        let gate = CredentialGate::new(store.clone());

        assert!(gate.authenticate("bob", "secret").await.unwrap());
        assert!(!gate.authenticate("bob", "wrong").await.unwrap());
        assert_eq!(store.lookups.load(Ordering::SeqCst), 2);

        let err = gate.require(&Credentials::new("bob", "wrong")).await.unwrap_err();
        assert!(matches!(err, DlrelayError::AuthFailed));
    }
}
