//! In-memory credential repository.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::credentials::{
    CredentialRepository, RepositoryError, UserCredential, UserId,
};

/// In-memory implementation of `CredentialRepository`.
///
/// Used when no database file is configured, and in tests. Records are lost
/// on restart.
#[derive(Debug, Default)]
pub struct InMemoryCredentialRepository {
    records: RwLock<HashMap<UserId, UserCredential>>,
}

impl InMemoryCredentialRepository {
    /// Create a new empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if the repository is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn find_active(&self) -> Result<Vec<UserCredential>, RepositoryError> {
        let mut active: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|c| c.active)
            .cloned()
            .collect();
        active.sort_by_key(|c| c.id);
        Ok(active)
    }

    async fn find_all(&self) -> Result<Vec<UserCredential>, RepositoryError> {
        let mut all: Vec<_> = self.records.read().values().cloned().collect();
        all.sort_by_key(|c| c.id);
        Ok(all)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<UserCredential>, RepositoryError> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn save(&self, credential: &UserCredential) -> Result<(), RepositoryError> {
        self.records
            .write()
            .insert(credential.id, credential.clone());
        Ok(())
    }

    async fn delete(&self, id: UserId) -> Result<bool, RepositoryError> {
        Ok(self.records.write().remove(&id).is_some())
    }
}
