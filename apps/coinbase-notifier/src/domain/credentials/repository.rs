//! Credential Repository Trait
//!
//! Defines the persistence abstraction for user credentials.
//! Implemented by adapters in the infrastructure layer.

use async_trait::async_trait;

use super::{UserCredential, UserId};

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Backing storage could not be read or written.
    #[error("credential storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document could not be (de)serialized.
    #[error("credential serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Repository trait for credential persistence.
///
/// This is a domain interface (port) implemented by infrastructure
/// adapters (JSON file, in-memory).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// All records with the active flag set.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    async fn find_active(&self) -> Result<Vec<UserCredential>, RepositoryError>;

    /// Every stored record.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    async fn find_all(&self) -> Result<Vec<UserCredential>, RepositoryError>;

    /// Find a record by user id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserCredential>, RepositoryError>;

    /// Insert or update a record.
    ///
    /// # Errors
    ///
    /// Returns error if persistence fails.
    async fn save(&self, credential: &UserCredential) -> Result<(), RepositoryError>;

    /// Delete a record. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns error if persistence fails.
    async fn delete(&self, id: UserId) -> Result<bool, RepositoryError>;
}
