// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secure storage for the cached user identity.
//!
//! Only the reporter's name and contact address live here. Crash artifacts
//! are never written to a secure store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use loom_crashreport_core::UserIdentity;
use thiserror::Error;
use tracing::{debug, warn};

pub const USER_NAME_KEY: &str = "user-name";
pub const USER_EMAIL_KEY: &str = "user-email";

#[derive(Debug, Error)]
pub enum SecureStoreError {
	#[error("secure store backend error: {0}")]
	Backend(String),
}

/// Small key/value store for secrets.
#[async_trait]
pub trait SecureStore: Send + Sync {
	async fn store(&self, key: &str, value: &str) -> Result<(), SecureStoreError>;

	async fn retrieve(&self, key: &str) -> Result<Option<String>, SecureStoreError>;

	/// Delete a value. Deleting a missing key succeeds.
	async fn delete(&self, key: &str) -> Result<(), SecureStoreError>;
}

/// In-process store. Values are lost at exit.
#[derive(Debug, Default)]
pub struct MemorySecureStore {
	values: Mutex<HashMap<String, String>>,
}

impl MemorySecureStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, SecureStoreError> {
		self
			.values
			.lock()
			.map_err(|e| SecureStoreError::Backend(e.to_string()))
	}
}

#[async_trait]
impl SecureStore for MemorySecureStore {
	async fn store(&self, key: &str, value: &str) -> Result<(), SecureStoreError> {
		self.lock()?.insert(key.to_string(), value.to_string());
		Ok(())
	}

	async fn retrieve(&self, key: &str) -> Result<Option<String>, SecureStoreError> {
		Ok(self.lock()?.get(key).cloned())
	}

	async fn delete(&self, key: &str) -> Result<(), SecureStoreError> {
		self.lock()?.remove(key);
		Ok(())
	}
}

/// OS keychain backed store.
#[cfg(feature = "keyring")]
#[derive(Debug, Clone)]
pub struct KeyringSecureStore {
	service: String,
}

#[cfg(feature = "keyring")]
impl KeyringSecureStore {
	/// `service` is usually derived from the app identifier.
	pub fn new(service: impl Into<String>) -> Self {
		Self {
			service: service.into(),
		}
	}
}

#[cfg(feature = "keyring")]
#[async_trait]
impl SecureStore for KeyringSecureStore {
	async fn store(&self, key: &str, value: &str) -> Result<(), SecureStoreError> {
		let service = self.service.clone();
		let key = key.to_string();
		let value = value.to_string();

		tokio::task::spawn_blocking(move || {
			keyring::Entry::new(&service, &key)
				.and_then(|entry| entry.set_password(&value))
				.map_err(|e| SecureStoreError::Backend(e.to_string()))
		})
		.await
		.map_err(|e| SecureStoreError::Backend(e.to_string()))?
	}

	async fn retrieve(&self, key: &str) -> Result<Option<String>, SecureStoreError> {
		let service = self.service.clone();
		let key = key.to_string();

		tokio::task::spawn_blocking(move || {
			let entry = keyring::Entry::new(&service, &key)
				.map_err(|e| SecureStoreError::Backend(e.to_string()))?;
			match entry.get_password() {
				Ok(value) => Ok(Some(value)),
				Err(keyring::Error::NoEntry) => Ok(None),
				Err(e) => Err(SecureStoreError::Backend(e.to_string())),
			}
		})
		.await
		.map_err(|e| SecureStoreError::Backend(e.to_string()))?
	}

	async fn delete(&self, key: &str) -> Result<(), SecureStoreError> {
		let service = self.service.clone();
		let key = key.to_string();

		tokio::task::spawn_blocking(move || {
			let entry = keyring::Entry::new(&service, &key)
				.map_err(|e| SecureStoreError::Backend(e.to_string()))?;
			match entry.delete_credential() {
				Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
				Err(e) => Err(SecureStoreError::Backend(e.to_string())),
			}
		})
		.await
		.map_err(|e| SecureStoreError::Backend(e.to_string()))?
	}
}

/// Read the cached identity. Backend failures yield an empty identity.
pub async fn load_cached_identity(store: &dyn SecureStore) -> UserIdentity {
	let name = retrieve_logged(store, USER_NAME_KEY).await;
	let email = retrieve_logged(store, USER_EMAIL_KEY).await;
	UserIdentity::new(name, email)
}

/// Cache an identity. Unset fields delete their key.
pub async fn cache_identity(store: &dyn SecureStore, identity: &UserIdentity) -> bool {
	let mut ok = true;
	for (key, value) in [
		(USER_NAME_KEY, identity.name.as_deref()),
		(USER_EMAIL_KEY, identity.email.as_deref()),
	] {
		let result = match value {
			Some(value) => store.store(key, value).await,
			None => store.delete(key).await,
		};
		if let Err(e) = result {
			warn!(key, error = %e, "Failed to update cached user identity");
			ok = false;
		}
	}
	debug!(has_name = identity.name.is_some(), has_email = identity.email.is_some(), "User identity cached");
	ok
}

async fn retrieve_logged(store: &dyn SecureStore, key: &str) -> Option<String> {
	match store.retrieve(key).await {
		Ok(value) => value,
		Err(e) => {
			warn!(key, error = %e, "Failed to read cached user identity");
			None
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct BrokenStore;

	#[async_trait]
	impl SecureStore for BrokenStore {
		async fn store(&self, _key: &str, _value: &str) -> Result<(), SecureStoreError> {
			Err(SecureStoreError::Backend("locked".to_string()))
		}

		async fn retrieve(&self, _key: &str) -> Result<Option<String>, SecureStoreError> {
			Err(SecureStoreError::Backend("locked".to_string()))
		}

		async fn delete(&self, _key: &str) -> Result<(), SecureStoreError> {
			Err(SecureStoreError::Backend("locked".to_string()))
		}
	}

	#[tokio::test]
	async fn memory_store_roundtrip() {
		let store = MemorySecureStore::new();
		assert_eq!(store.retrieve("k").await.unwrap(), None);
		store.store("k", "v").await.unwrap();
		assert_eq!(store.retrieve("k").await.unwrap().as_deref(), Some("v"));
		store.delete("k").await.unwrap();
		store.delete("k").await.unwrap();
		assert_eq!(store.retrieve("k").await.unwrap(), None);
	}

	#[tokio::test]
	async fn identity_cache_roundtrip() {
		let store = MemorySecureStore::new();
		let identity = UserIdentity::new(Some("Ada".to_string()), Some("ada@example.com".to_string()));
		assert!(cache_identity(&store, &identity).await);
		assert_eq!(load_cached_identity(&store).await, identity);

		let name_only = UserIdentity::new(Some("Ada".to_string()), None);
		assert!(cache_identity(&store, &name_only).await);
		assert_eq!(load_cached_identity(&store).await, name_only);
	}

	#[tokio::test]
	async fn broken_backend_degrades_to_empty_identity() {
		assert!(load_cached_identity(&BrokenStore).await.is_empty());
		assert!(!cache_identity(&BrokenStore, &UserIdentity::default()).await);
	}
}
