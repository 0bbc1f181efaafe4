//! Session persistence for chat client hosts.
//!
//! The authentication flow lives outside this workspace; what hosts
//! need locally is a place to keep the resulting [`Session`] between
//! runs. [`CredentialStore`] abstracts the backing store (in-memory for
//! tests, the OS keyring behind the `os-keyring` feature) and
//! [`SessionVault`] layers typed save/load/clear of a `Session` on top.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use chat_core::Session;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialStoreError {
    #[error("credential not found")]
    NotFound,
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    #[error("credential store backend failure: {0}")]
    Backend(String),
}

pub trait CredentialStore: Send + Sync {
    fn set_credential(
        &self,
        service: &str,
        account: &str,
        value: &str,
    ) -> Result<(), CredentialStoreError>;

    fn get_credential(&self, service: &str, account: &str) -> Result<String, CredentialStoreError>;

    fn delete_credential(&self, service: &str, account: &str) -> Result<(), CredentialStoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    data: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl CredentialStore for InMemoryCredentialStore {
    fn set_credential(
        &self,
        service: &str,
        account: &str,
        value: &str,
    ) -> Result<(), CredentialStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| CredentialStoreError::Backend("poisoned lock".to_owned()))?;
        data.insert((service.to_owned(), account.to_owned()), value.to_owned());
        Ok(())
    }

    fn get_credential(&self, service: &str, account: &str) -> Result<String, CredentialStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| CredentialStoreError::Backend("poisoned lock".to_owned()))?;
        data.get(&(service.to_owned(), account.to_owned()))
            .cloned()
            .ok_or(CredentialStoreError::NotFound)
    }

    fn delete_credential(&self, service: &str, account: &str) -> Result<(), CredentialStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| CredentialStoreError::Backend("poisoned lock".to_owned()))?;
        if data
            .remove(&(service.to_owned(), account.to_owned()))
            .is_none()
        {
            return Err(CredentialStoreError::NotFound);
        }
        Ok(())
    }
}

#[cfg(feature = "os-keyring")]
#[derive(Default, Clone, Copy)]
pub struct OsKeyringCredentialStore;

#[cfg(feature = "os-keyring")]
impl CredentialStore for OsKeyringCredentialStore {
    fn set_credential(
        &self,
        service: &str,
        account: &str,
        value: &str,
    ) -> Result<(), CredentialStoreError> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|err| CredentialStoreError::Backend(err.to_string()))?;
        entry
            .set_password(value)
            .map_err(|err| CredentialStoreError::Backend(err.to_string()))
    }

    fn get_credential(&self, service: &str, account: &str) -> Result<String, CredentialStoreError> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|err| CredentialStoreError::Backend(err.to_string()))?;
        entry.get_password().map_err(|err| match err {
            keyring::Error::NoEntry => CredentialStoreError::NotFound,
            other => CredentialStoreError::Backend(other.to_string()),
        })
    }

    fn delete_credential(&self, service: &str, account: &str) -> Result<(), CredentialStoreError> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|err| CredentialStoreError::Backend(err.to_string()))?;
        entry.delete_credential().map_err(|err| match err {
            keyring::Error::NoEntry => CredentialStoreError::NotFound,
            other => CredentialStoreError::Backend(other.to_string()),
        })
    }
}

/// Errors surfaced by [`SessionVault`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionVaultError {
    /// No session has been saved for this account.
    #[error("no saved session for account '{0}'")]
    NotFound(String),
    /// The backing credential store failed.
    #[error(transparent)]
    Store(CredentialStoreError),
    /// The stored payload could not be (de)serialized.
    #[error("session payload is not valid JSON: {0}")]
    Payload(String),
}

/// Typed `Session` persistence scoped to one service name.
#[derive(Clone)]
pub struct SessionVault<S: CredentialStore> {
    store: S,
    service: String,
}

impl<S: CredentialStore> SessionVault<S> {
    /// Scope `store` to `service`; accounts are per-user keys under it.
    pub fn new(store: S, service: impl Into<String>) -> Self {
        Self {
            store,
            service: service.into(),
        }
    }

    /// Serialize and persist a session under `account`.
    pub fn save(&self, account: &str, session: &Session) -> Result<(), SessionVaultError> {
        let encoded = serde_json::to_string(session)
            .map_err(|err| SessionVaultError::Payload(err.to_string()))?;
        self.store
            .set_credential(&self.service, account, &encoded)
            .map_err(SessionVaultError::Store)
    }

    /// Load the session saved under `account`.
    pub fn load(&self, account: &str) -> Result<Session, SessionVaultError> {
        let raw = self
            .store
            .get_credential(&self.service, account)
            .map_err(|err| match err {
                CredentialStoreError::NotFound => SessionVaultError::NotFound(account.to_owned()),
                other => SessionVaultError::Store(other),
            })?;
        serde_json::from_str(&raw).map_err(|err| SessionVaultError::Payload(err.to_string()))
    }

    /// Remove the session saved under `account`; missing entries are fine.
    pub fn clear(&self, account: &str) -> Result<(), SessionVaultError> {
        match self.store.delete_credential(&self.service, account) {
            Ok(()) | Err(CredentialStoreError::NotFound) => Ok(()),
            Err(other) => Err(SessionVaultError::Store(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_round_trips_a_session() {
        let vault = SessionVault::new(InMemoryCredentialStore::default(), "chat-test");
        let session = Session::new("alice", Some("token-1".to_owned()));

        vault.save("alice", &session).expect("save should work");
        let loaded = vault.load("alice").expect("load should work");
        assert_eq!(loaded, session);
    }

    #[test]
    fn vault_reports_missing_sessions() {
        let vault = SessionVault::new(InMemoryCredentialStore::default(), "chat-test");
        let err = vault.load("nobody").expect_err("load must fail");
        assert_eq!(err, SessionVaultError::NotFound("nobody".to_owned()));
    }

    #[test]
    fn clear_is_idempotent() {
        let vault = SessionVault::new(InMemoryCredentialStore::default(), "chat-test");
        let session = Session::new("alice", None);
        vault.save("alice", &session).expect("save should work");

        vault.clear("alice").expect("clear should work");
        vault.clear("alice").expect("second clear is a no-op");
        assert!(matches!(
            vault.load("alice"),
            Err(SessionVaultError::NotFound(_))
        ));
    }

    #[test]
    fn vaults_with_different_services_are_isolated() {
        let store = InMemoryCredentialStore::default();
        let a = SessionVault::new(store.clone(), "chat-a");
        let b = SessionVault::new(store.clone(), "chat-b");

        a.save("alice", &Session::new("alice", Some("one".to_owned())))
            .expect("save a");
        b.save("alice", &Session::new("alice", Some("two".to_owned())))
            .expect("save b");

        assert_eq!(
            a.load("alice").expect("load a").access_token.as_deref(),
            Some("one")
        );
        assert_eq!(
            b.load("alice").expect("load b").access_token.as_deref(),
            Some("two")
        );
    }

    #[derive(Default)]
    struct FailingStore;

    impl CredentialStore for FailingStore {
        fn set_credential(
            &self,
            _service: &str,
            _account: &str,
            _value: &str,
        ) -> Result<(), CredentialStoreError> {
            Err(CredentialStoreError::Unavailable("mock outage".to_owned()))
        }

        fn get_credential(
            &self,
            _service: &str,
            _account: &str,
        ) -> Result<String, CredentialStoreError> {
            Err(CredentialStoreError::Unavailable("mock outage".to_owned()))
        }

        fn delete_credential(
            &self,
            _service: &str,
            _account: &str,
        ) -> Result<(), CredentialStoreError> {
            Err(CredentialStoreError::Unavailable("mock outage".to_owned()))
        }
    }

    #[test]
    fn store_outage_propagates_through_vault() {
        let vault = SessionVault::new(FailingStore, "chat-test");
        let err = vault
            .save("alice", &Session::new("alice", None))
            .expect_err("save must fail");
        assert_eq!(
            err,
            SessionVaultError::Store(CredentialStoreError::Unavailable("mock outage".to_owned()))
        );
    }
}
