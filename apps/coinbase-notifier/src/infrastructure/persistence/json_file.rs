//! JSON file credential repository.
//!
//! Keeps every record in memory and rewrites the whole document after each
//! mutation. The document is a JSON array of records ordered by user id.
//! Writes go to a sibling temp file first and are then renamed over the
//! target, so a crash never leaves a truncated file behind.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::credentials::{
    CredentialRepository, RepositoryError, UserCredential, UserId,
};

/// File-backed implementation of `CredentialRepository`.
#[derive(Debug)]
pub struct JsonFileCredentialRepository {
    path: PathBuf,
    records: Mutex<BTreeMap<UserId, UserCredential>>,
}

impl JsonFileCredentialRepository {
    /// Load the document at `path`. A missing file starts an empty store.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => {
                let list: Vec<UserCredential> = serde_json::from_slice(&bytes)?;
                list.into_iter().map(|c| (c.id, c)).collect()
            }
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            path = %path.display(),
            records = records.len(),
            "Credential store loaded"
        );

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Location of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &BTreeMap<UserId, UserCredential>) -> Result<(), RepositoryError> {
        let list: Vec<&UserCredential> = records.values().collect();
        let json = serde_json::to_vec_pretty(&list)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialRepository for JsonFileCredentialRepository {
    async fn find_active(&self) -> Result<Vec<UserCredential>, RepositoryError> {
        let records = self.records.lock().await;
        Ok(records.values().filter(|c| c.active).cloned().collect())
    }

    async fn find_all(&self) -> Result<Vec<UserCredential>, RepositoryError> {
        let records = self.records.lock().await;
        Ok(records.values().cloned().collect())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<UserCredential>, RepositoryError> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn save(&self, credential: &UserCredential) -> Result<(), RepositoryError> {
        let mut records = self.records.lock().await;
        let previous = records.insert(credential.id, credential.clone());

        if let Err(e) = self.persist(&records).await {
            // Keep memory and disk in agreement.
            match previous {
                Some(previous) => records.insert(credential.id, previous),
                None => records.remove(&credential.id),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, id: UserId) -> Result<bool, RepositoryError> {
        let mut records = self.records.lock().await;
        let Some(previous) = records.remove(&id) else {
            return Ok(false);
        };

        if let Err(e) = self.persist(&records).await {
            records.insert(id, previous);
            return Err(e);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, active: bool) -> UserCredential {
        UserCredential::new(UserId::new(id), format!("user{id}"))
            .with_api("key", "c2VjcmV0", "phrase")
            .with_active(active)
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileCredentialRepository::open(dir.path().join("users.json"))
            .await
            .unwrap();
        assert!(repo.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");

        {
            let repo = JsonFileCredentialRepository::open(&path).await.unwrap();
            repo.save(&record(2, true)).await.unwrap();
            repo.save(&record(1, false)).await.unwrap();
            repo.save(&record(3, true)).await.unwrap();
            assert!(repo.delete(UserId::new(3)).await.unwrap());
        }

        let reopened = JsonFileCredentialRepository::open(&path).await.unwrap();
        let all = reopened.find_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, UserId::new(1));
        assert_eq!(all[1].api_secret, "c2VjcmV0");

        let active = reopened.find_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, UserId::new(2));
    }

    #[tokio::test]
    async fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let repo = JsonFileCredentialRepository::open(&path).await.unwrap();
        repo.save(&record(1, true)).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["users.json".to_string()]);
    }

    #[tokio::test]
    async fn delete_missing_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let repo = JsonFileCredentialRepository::open(&path).await.unwrap();

        assert!(!repo.delete(UserId::new(1)).await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = JsonFileCredentialRepository::open(&path).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Serialization(_)));
    }

    #[tokio::test]
    async fn failed_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("users.json");
        let repo = JsonFileCredentialRepository::open(&path).await.unwrap();

        let err = repo.save(&record(1, true)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Io(_)));
        assert!(repo.find_by_id(UserId::new(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_username_defaults_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(
            &path,
            br#"[{"id":5,"display_name":"Eve","api_key":"k","api_secret":"s","api_passphrase":"p","active":true}]"#,
        )
        .unwrap();

        let repo = JsonFileCredentialRepository::open(&path).await.unwrap();
        let found = repo.find_by_id(UserId::new(5)).await.unwrap().unwrap();
        assert_eq!(found.username, None);
        assert!(found.active);
    }
}
