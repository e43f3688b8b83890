//! Watcher Registry
//!
//! Owns the user id → watcher map and every lifecycle transition on it.
//! Bot commands, the web settings flow and startup all go through here.
//!
//! Lifecycle operations run one at a time under an operations lock that is
//! held from the credential lookup through persistence and the watcher swap,
//! so the stored active flag always matches the map once an operation ends.
//! A second mutex guards the map itself and is only held to swap handles in
//! and out: starting a watcher spawns tasks and returns immediately, stopping
//! one only cancels a token. A replacement watcher waits for its predecessor
//! to release the connection before it dials, so one user never holds two
//! live connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::application::ports::{NotificationSink, WatcherFactory, WatcherHandle, WatcherStatus};
use crate::domain::credentials::{
    CredentialRepository, CredentialSummary, RepositoryError, UserCredential, UserId,
};
use crate::infrastructure::metrics;

/// Default cap on concurrently running watchers.
pub const DEFAULT_MAX_USERS: usize = 25;

/// Default pause between watcher starts during bulk startup.
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(1);

// =============================================================================
// Errors
// =============================================================================

/// Lifecycle failures reported to the caller.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No credential record for the user.
    #[error("no credentials stored for user {0}")]
    CredentialNotFound(UserId),

    /// Credential record has no API key.
    #[error("user {0} has no API key configured")]
    MissingApiKey(UserId),

    /// Starting another watcher would exceed the user cap.
    #[error("maximum number of watched users reached ({max})")]
    CapacityExceeded {
        /// Configured cap.
        max: usize,
    },

    /// Credential storage failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

// =============================================================================
// Configuration
// =============================================================================

/// Registry limits.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of concurrently running watchers.
    pub max_users: usize,
    /// Pause between watcher starts in [`WatcherRegistry::start_all`].
    pub startup_delay: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_users: DEFAULT_MAX_USERS,
            startup_delay: DEFAULT_STARTUP_DELAY,
        }
    }
}

/// Watcher counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    /// Watchers in the map.
    pub total: usize,
    /// Not yet connected.
    pub created: usize,
    /// Connected and subscribed.
    pub running: usize,
    /// Between connection attempts.
    pub reconnecting: usize,
    /// Halted after exhausting retries.
    pub terminated: usize,
}

// =============================================================================
// Registry
// =============================================================================

/// Per-user watcher lifecycle manager.
pub struct WatcherRegistry {
    repository: Arc<dyn CredentialRepository>,
    factory: Arc<dyn WatcherFactory>,
    sink: Arc<dyn NotificationSink>,
    config: RegistryConfig,
    operations: Mutex<()>,
    watchers: Mutex<HashMap<UserId, Box<dyn WatcherHandle>>>,
}

impl WatcherRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(
        repository: Arc<dyn CredentialRepository>,
        factory: Arc<dyn WatcherFactory>,
        sink: Arc<dyn NotificationSink>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            repository,
            factory,
            sink,
            config,
            operations: Mutex::new(()),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Configured user cap.
    #[must_use]
    pub const fn max_users(&self) -> usize {
        self.config.max_users
    }

    // -------------------------------------------------------------------------
    // Bot commands
    // -------------------------------------------------------------------------

    /// Start (or restart) watching `id` with its stored credentials and mark
    /// the record active.
    ///
    /// # Errors
    ///
    /// - `CredentialNotFound` if no record exists
    /// - `MissingApiKey` if the record has no API key
    /// - `CapacityExceeded` if the user cap is reached; nothing changes
    /// - `Repository` if storage fails
    pub async fn enable(&self, id: UserId) -> Result<CredentialSummary, RegistryError> {
        let _operation = self.operations.lock().await;

        let stored = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or(RegistryError::CredentialNotFound(id))?;
        if !stored.has_api_key() {
            return Err(RegistryError::MissingApiKey(id));
        }
        self.ensure_capacity(id).await?;

        // The slot was checked under the operations lock, so the swap below
        // cannot be refused once the record is stored.
        let credential = stored.with_active(true);
        self.repository.save(&credential).await?;
        self.replace(credential.clone()).await?;

        tracing::info!(user_id = %id, "User enabled");
        Ok(credential.summary(true))
    }

    /// Stop watching `id` and clear the stored active flag. The record stays.
    ///
    /// # Errors
    ///
    /// - `CredentialNotFound` if no record exists
    /// - `Repository` if storage fails
    pub async fn disable(&self, id: UserId) -> Result<CredentialSummary, RegistryError> {
        let _operation = self.operations.lock().await;

        let credential = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or(RegistryError::CredentialNotFound(id))?;

        let credential = credential.with_active(false);
        self.repository.save(&credential).await?;
        self.remove(id).await;

        tracing::info!(user_id = %id, "User disabled");
        Ok(credential.summary(false))
    }

    /// Stop watching `id` and delete its record.
    ///
    /// # Errors
    ///
    /// - `CredentialNotFound` if neither a watcher nor a record existed
    /// - `Repository` if storage fails
    pub async fn delete(&self, id: UserId) -> Result<(), RegistryError> {
        let _operation = self.operations.lock().await;
        self.delete_locked(id).await
    }

    async fn delete_locked(&self, id: UserId) -> Result<(), RegistryError> {
        let had_watcher = self.remove(id).await;
        let had_record = self.repository.delete(id).await?;

        if !had_watcher && !had_record {
            return Err(RegistryError::CredentialNotFound(id));
        }
        tracing::info!(user_id = %id, "User deleted");
        Ok(())
    }

    /// Summaries of records with the active flag set.
    ///
    /// # Errors
    ///
    /// Returns `Repository` if storage fails.
    pub async fn list_active(&self) -> Result<Vec<CredentialSummary>, RegistryError> {
        self.list(|c| c.active).await
    }

    /// Summaries of records with the active flag cleared.
    ///
    /// # Errors
    ///
    /// Returns `Repository` if storage fails.
    pub async fn list_inactive(&self) -> Result<Vec<CredentialSummary>, RegistryError> {
        self.list(|c| !c.active).await
    }

    /// Summaries of every record.
    ///
    /// # Errors
    ///
    /// Returns `Repository` if storage fails.
    pub async fn list_all(&self) -> Result<Vec<CredentialSummary>, RegistryError> {
        self.list(|_| true).await
    }

    // -------------------------------------------------------------------------
    // Web settings flow
    // -------------------------------------------------------------------------

    /// Apply new credentials for a user.
    ///
    /// An active record always gets a fresh watcher, even when a running one
    /// already uses identical credentials. An inactive record stops any
    /// running watcher and starts none. Nothing is persisted here.
    ///
    /// # Errors
    ///
    /// - `MissingApiKey` if the record is active without an API key
    /// - `CapacityExceeded` if the user cap is reached
    pub async fn on_settings_changed(&self, credential: UserCredential) -> Result<(), RegistryError> {
        let _operation = self.operations.lock().await;
        self.apply_settings(credential).await
    }

    async fn apply_settings(&self, credential: UserCredential) -> Result<(), RegistryError> {
        let id = credential.id;
        if !credential.active {
            self.remove(id).await;
            tracing::info!(user_id = %id, "Settings changed, watcher stopped");
            return Ok(());
        }
        if !credential.has_api_key() {
            return Err(RegistryError::MissingApiKey(id));
        }

        self.replace(credential).await?;
        tracing::info!(user_id = %id, "Settings changed, watcher restarted");
        Ok(())
    }

    /// Persist settings submitted by the user and apply them.
    ///
    /// The admin is told when a user registers for the first time. An active
    /// record is only stored once a watcher slot is known to be free, so a
    /// refused user is not picked up again by [`start_all`](Self::start_all).
    ///
    /// # Errors
    ///
    /// Same as [`on_settings_changed`](Self::on_settings_changed), plus
    /// `Repository` if storage fails. On `CapacityExceeded` nothing is stored.
    pub async fn on_settings_saved(&self, credential: UserCredential) -> Result<(), RegistryError> {
        let _operation = self.operations.lock().await;

        if credential.active && credential.has_api_key() {
            self.ensure_capacity(credential.id).await?;
        }

        let is_new = self.repository.find_by_id(credential.id).await?.is_none();
        self.repository.save(&credential).await?;

        if is_new {
            tracing::info!(user_id = %credential.id, "New user registered");
            self.notify_admin(&format!(
                "New user has successfully registered:\n{credential:?}"
            ))
            .await;
        }

        self.apply_settings(credential).await
    }

    /// Remove a user who deleted their profile.
    ///
    /// # Errors
    ///
    /// Same as [`delete`](Self::delete).
    pub async fn on_profile_deleted(&self, id: UserId) -> Result<(), RegistryError> {
        let record = {
            let _operation = self.operations.lock().await;
            let record = self.repository.find_by_id(id).await?;
            self.delete_locked(id).await?;
            record
        };

        let details = record.map_or_else(|| "unknown record".to_string(), |c| format!("{c:?}"));
        self.notify_admin(&format!(
            "User with ID ({id}) has deleted their profile:\n{details}"
        ))
        .await;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Process lifecycle
    // -------------------------------------------------------------------------

    /// Start a watcher for every active record with an API key, pausing
    /// between starts. Returns how many were started.
    ///
    /// # Errors
    ///
    /// Returns `Repository` if the active records cannot be read. Per-user
    /// failures are logged and skipped.
    pub async fn start_all(&self) -> Result<usize, RegistryError> {
        let records = self.repository.find_active().await?;
        let mut started = 0;

        for credential in records {
            if !credential.has_api_key() {
                tracing::debug!(user_id = %credential.id, "Skipping active user without API key");
                continue;
            }
            if started > 0 {
                tokio::time::sleep(self.config.startup_delay).await;
            }

            let id = credential.id;
            let _operation = self.operations.lock().await;
            match self.replace(credential).await {
                Ok(()) => started += 1,
                Err(e) => tracing::warn!(user_id = %id, error = %e, "Failed to start watcher"),
            }
        }

        tracing::info!(started, "Watchers started");
        Ok(started)
    }

    /// Stop every watcher and wait for all of them to finish.
    pub async fn shutdown(&self) {
        let _operation = self.operations.lock().await;
        let drained: Vec<_> = {
            let mut watchers = self.watchers.lock().await;
            let drained = watchers.drain().map(|(_, w)| w).collect();
            metrics::set_active_watchers(0);
            drained
        };

        for watcher in &drained {
            watcher.stop();
        }
        for watcher in &drained {
            watcher.stopped().await;
        }
        tracing::info!(stopped = drained.len(), "All watchers stopped");
    }

    /// Whether a watcher is registered for `id`.
    pub async fn is_watching(&self, id: UserId) -> bool {
        self.watchers.lock().await.contains_key(&id)
    }

    /// Status of the watcher registered for `id`.
    pub async fn status(&self, id: UserId) -> Option<WatcherStatus> {
        self.watchers.lock().await.get(&id).map(|w| w.status())
    }

    /// Watcher counts by status.
    pub async fn stats(&self) -> RegistryStats {
        let watchers = self.watchers.lock().await;
        let mut stats = RegistryStats {
            total: watchers.len(),
            ..RegistryStats::default()
        };
        for watcher in watchers.values() {
            match watcher.status() {
                WatcherStatus::Created => stats.created += 1,
                WatcherStatus::Running => stats.running += 1,
                WatcherStatus::Reconnecting { .. } => stats.reconnecting += 1,
                WatcherStatus::Terminated => stats.terminated += 1,
            }
        }
        stats
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Fail with `CapacityExceeded` if `id` has no watcher and every slot is taken.
    async fn ensure_capacity(&self, id: UserId) -> Result<(), RegistryError> {
        let mut watchers = self.watchers.lock().await;
        self.check_capacity(&mut watchers, id)
    }

    fn check_capacity(
        &self,
        watchers: &mut HashMap<UserId, Box<dyn WatcherHandle>>,
        id: UserId,
    ) -> Result<(), RegistryError> {
        // Halted watchers do not count against the cap.
        watchers.retain(|_, w| !w.status().is_terminated());

        if !watchers.contains_key(&id) && watchers.len() >= self.config.max_users {
            tracing::warn!(user_id = %id, max = self.config.max_users, "User cap reached");
            return Err(RegistryError::CapacityExceeded {
                max: self.config.max_users,
            });
        }
        Ok(())
    }

    /// Swap in a freshly started watcher for `credential.id`.
    async fn replace(&self, credential: UserCredential) -> Result<(), RegistryError> {
        let id = credential.id;
        let mut watchers = self.watchers.lock().await;
        self.check_capacity(&mut watchers, id)?;

        let previous = watchers.remove(&id);
        watchers.insert(id, self.factory.spawn(credential, previous));
        metrics::set_active_watchers(watchers.len());
        Ok(())
    }

    /// Stop and forget the watcher for `id`, waiting until it has released
    /// its connection. Returns whether one was registered.
    async fn remove(&self, id: UserId) -> bool {
        let removed = {
            let mut watchers = self.watchers.lock().await;
            let removed = watchers.remove(&id);
            metrics::set_active_watchers(watchers.len());
            removed
        };

        match removed {
            Some(watcher) => {
                watcher.stop();
                watcher.stopped().await;
                true
            }
            None => false,
        }
    }

    async fn list(
        &self,
        filter: impl Fn(&UserCredential) -> bool,
    ) -> Result<Vec<CredentialSummary>, RegistryError> {
        let mut records = self.repository.find_all().await?;
        records.retain(|c| filter(c));
        records.sort_by_key(|c| c.id);

        let watchers = self.watchers.lock().await;
        Ok(records
            .iter()
            .map(|c| c.summary(watchers.contains_key(&c.id)))
            .collect())
    }

    async fn notify_admin(&self, text: &str) {
        if let Err(e) = self.sink.send_to_admin(text).await {
            tracing::warn!(error = %e, "Failed to deliver admin message");
        }
    }
}

impl std::fmt::Debug for WatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MockNotificationSink, SinkError};
    use crate::domain::credentials::MockCredentialRepository;
    use crate::infrastructure::persistence::InMemoryCredentialRepository;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records every spawned watcher and whether it is still live.
    #[derive(Default)]
    struct FakeFactory {
        spawned: parking_lot::Mutex<Vec<(UserCredential, Arc<AtomicBool>)>>,
    }

    impl FakeFactory {
        fn live(&self, id: UserId) -> Vec<UserCredential> {
            self.spawned
                .lock()
                .iter()
                .filter(|(c, stopped)| c.id == id && !stopped.load(Ordering::SeqCst))
                .map(|(c, _)| c.clone())
                .collect()
        }

        fn spawn_count(&self) -> usize {
            self.spawned.lock().len()
        }

        fn halt(&self, id: UserId) {
            for (c, stopped) in self.spawned.lock().iter() {
                if c.id == id {
                    stopped.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    struct FakeHandle {
        user_id: UserId,
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl WatcherHandle for FakeHandle {
        fn user_id(&self) -> UserId {
            self.user_id
        }

        fn status(&self) -> WatcherStatus {
            if self.stopped.load(Ordering::SeqCst) {
                WatcherStatus::Terminated
            } else {
                WatcherStatus::Running
            }
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }

        async fn stopped(&self) {}
    }

    impl WatcherFactory for FakeFactory {
        fn spawn(
            &self,
            credential: UserCredential,
            predecessor: Option<Box<dyn WatcherHandle>>,
        ) -> Box<dyn WatcherHandle> {
            if let Some(previous) = predecessor {
                previous.stop();
            }
            let stopped = Arc::new(AtomicBool::new(false));
            let user_id = credential.id;
            self.spawned.lock().push((credential, Arc::clone(&stopped)));
            Box::new(FakeHandle { user_id, stopped })
        }
    }

    fn user(id: i64) -> UserCredential {
        UserCredential::new(UserId::new(id), format!("user{id}")).with_api(
            format!("key{id}"),
            "c2VjcmV0",
            "phrase",
        )
    }

    fn quiet_sink() -> MockNotificationSink {
        let mut sink = MockNotificationSink::new();
        sink.expect_send_to_admin().returning(|_| Ok(()));
        sink
    }

    async fn registry_with(
        records: Vec<UserCredential>,
        max_users: usize,
    ) -> (WatcherRegistry, Arc<FakeFactory>, Arc<InMemoryCredentialRepository>) {
        let repository = Arc::new(InMemoryCredentialRepository::new());
        for record in records {
            repository.save(&record).await.unwrap();
        }
        let factory = Arc::new(FakeFactory::default());
        let registry = WatcherRegistry::new(
            repository.clone(),
            factory.clone(),
            Arc::new(quiet_sink()),
            RegistryConfig {
                max_users,
                startup_delay: Duration::ZERO,
            },
        );
        (registry, factory, repository)
    }

    #[tokio::test]
    async fn enable_starts_watcher_and_persists_active() {
        let (registry, factory, repository) = registry_with(vec![user(1)], 25).await;

        let summary = registry.enable(UserId::new(1)).await.unwrap();
        assert!(summary.active);
        assert!(summary.watching);
        assert_eq!(factory.live(UserId::new(1)).len(), 1);
        assert!(registry.is_watching(UserId::new(1)).await);

        let stored = repository.find_by_id(UserId::new(1)).await.unwrap().unwrap();
        assert!(stored.active);
    }

    #[tokio::test]
    async fn enable_twice_keeps_single_live_watcher() {
        let (registry, factory, _) = registry_with(vec![user(1)], 25).await;

        registry.enable(UserId::new(1)).await.unwrap();
        registry.enable(UserId::new(1)).await.unwrap();

        assert_eq!(factory.spawn_count(), 2);
        assert_eq!(factory.live(UserId::new(1)).len(), 1);
        assert_eq!(registry.stats().await.total, 1);
    }

    #[tokio::test]
    async fn enable_unknown_user_fails() {
        let (registry, factory, _) = registry_with(vec![], 25).await;
        let err = registry.enable(UserId::new(9)).await.unwrap_err();
        assert!(matches!(err, RegistryError::CredentialNotFound(id) if id == UserId::new(9)));
        assert_eq!(factory.spawn_count(), 0);
    }

    #[tokio::test]
    async fn enable_without_api_key_fails() {
        let record = UserCredential::new(UserId::new(2), "nokey");
        let (registry, factory, repository) = registry_with(vec![record], 25).await;

        let err = registry.enable(UserId::new(2)).await.unwrap_err();
        assert!(matches!(err, RegistryError::MissingApiKey(_)));
        assert_eq!(factory.spawn_count(), 0);
        assert!(!repository.find_by_id(UserId::new(2)).await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn capacity_refuses_without_side_effects() {
        let (registry, factory, repository) =
            registry_with(vec![user(1), user(2), user(3)], 2).await;

        registry.enable(UserId::new(1)).await.unwrap();
        registry.enable(UserId::new(2)).await.unwrap();

        let err = registry.enable(UserId::new(3)).await.unwrap_err();
        assert!(matches!(err, RegistryError::CapacityExceeded { max: 2 }));
        assert_eq!(factory.spawn_count(), 2);
        assert!(!registry.is_watching(UserId::new(3)).await);
        assert!(!repository.find_by_id(UserId::new(3)).await.unwrap().unwrap().active);

        // Restarting an existing user at the cap is allowed.
        registry.enable(UserId::new(2)).await.unwrap();
        assert_eq!(registry.stats().await.total, 2);
    }

    #[tokio::test]
    async fn halted_watchers_free_capacity() {
        let (registry, factory, _) = registry_with(vec![user(1), user(2)], 1).await;

        registry.enable(UserId::new(1)).await.unwrap();
        factory.halt(UserId::new(1));
        assert_eq!(registry.stats().await.terminated, 1);

        registry.enable(UserId::new(2)).await.unwrap();
        assert!(!registry.is_watching(UserId::new(1)).await);
        assert!(registry.is_watching(UserId::new(2)).await);
    }

    #[tokio::test]
    async fn disable_then_enable_uses_latest_credentials() {
        let (registry, factory, repository) = registry_with(vec![user(1)], 25).await;

        registry.enable(UserId::new(1)).await.unwrap();
        let summary = registry.disable(UserId::new(1)).await.unwrap();
        assert!(!summary.active);
        assert!(!summary.watching);
        assert!(factory.live(UserId::new(1)).is_empty());

        let updated = user(1).with_api("rotated", "bmV3", "newphrase");
        repository.save(&updated).await.unwrap();

        registry.enable(UserId::new(1)).await.unwrap();
        let live = factory.live(UserId::new(1));
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].api_key, "rotated");
    }

    #[tokio::test]
    async fn delete_removes_watcher_and_record() {
        let (registry, factory, repository) = registry_with(vec![user(1)], 25).await;

        registry.enable(UserId::new(1)).await.unwrap();
        registry.delete(UserId::new(1)).await.unwrap();

        assert!(factory.live(UserId::new(1)).is_empty());
        assert!(repository.find_by_id(UserId::new(1)).await.unwrap().is_none());

        let err = registry.delete(UserId::new(1)).await.unwrap_err();
        assert!(matches!(err, RegistryError::CredentialNotFound(_)));
    }

    #[tokio::test]
    async fn settings_change_always_restarts() {
        let (registry, factory, _) = registry_with(vec![], 25).await;
        let credential = user(5).with_active(true);

        registry.on_settings_changed(credential.clone()).await.unwrap();
        registry.on_settings_changed(credential).await.unwrap();

        assert_eq!(factory.spawn_count(), 2);
        assert_eq!(factory.live(UserId::new(5)).len(), 1);
    }

    #[tokio::test]
    async fn inactive_settings_stop_watcher() {
        let (registry, factory, _) = registry_with(vec![], 25).await;

        registry
            .on_settings_changed(user(5).with_active(true))
            .await
            .unwrap();
        registry
            .on_settings_changed(user(5).with_active(false))
            .await
            .unwrap();

        assert!(factory.live(UserId::new(5)).is_empty());
        assert!(!registry.is_watching(UserId::new(5)).await);
    }

    #[tokio::test]
    async fn settings_saved_announces_new_users_once() {
        let mut sink = MockNotificationSink::new();
        sink.expect_send_to_admin()
            .withf(|text| text.starts_with("New user has successfully registered:"))
            .times(1)
            .returning(|_| Err(SinkError::AdminNotConfigured));

        let repository = Arc::new(InMemoryCredentialRepository::new());
        let registry = WatcherRegistry::new(
            repository.clone(),
            Arc::new(FakeFactory::default()),
            Arc::new(sink),
            RegistryConfig::default(),
        );

        let credential = user(3).with_active(true);
        registry.on_settings_saved(credential.clone()).await.unwrap();
        registry.on_settings_saved(credential).await.unwrap();

        assert!(repository.find_by_id(UserId::new(3)).await.unwrap().is_some());
        assert!(registry.is_watching(UserId::new(3)).await);
    }

    #[tokio::test]
    async fn profile_deletion_notifies_admin() {
        let mut sink = MockNotificationSink::new();
        sink.expect_send_to_admin()
            .withf(|text| text.starts_with("User with ID (4) has deleted their profile:"))
            .times(1)
            .returning(|_| Ok(()));

        let repository = Arc::new(InMemoryCredentialRepository::new());
        repository.save(&user(4)).await.unwrap();
        let registry = WatcherRegistry::new(
            repository.clone(),
            Arc::new(FakeFactory::default()),
            Arc::new(sink),
            RegistryConfig::default(),
        );

        registry.on_profile_deleted(UserId::new(4)).await.unwrap();
        assert!(repository.find_by_id(UserId::new(4)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn start_all_skips_records_without_api_key() {
        let records = vec![
            user(1).with_active(true),
            UserCredential::new(UserId::new(2), "nokey").with_active(true),
            user(3).with_active(true),
            user(4),
        ];
        let (registry, _, _) = registry_with(records, 25).await;

        let started = registry.start_all().await.unwrap();
        assert_eq!(started, 2);
        assert!(registry.is_watching(UserId::new(1)).await);
        assert!(!registry.is_watching(UserId::new(2)).await);
        assert!(registry.is_watching(UserId::new(3)).await);
        assert!(!registry.is_watching(UserId::new(4)).await);
    }

    #[tokio::test]
    async fn start_all_respects_capacity() {
        let records = (1..=4).map(|id| user(id).with_active(true)).collect();
        let (registry, _, _) = registry_with(records, 3).await;

        assert_eq!(registry.start_all().await.unwrap(), 3);
        assert_eq!(registry.stats().await.total, 3);
    }

    #[tokio::test]
    async fn listing_reports_watching_flag() {
        let records = vec![user(1).with_active(true), user(2)];
        let (registry, _, _) = registry_with(records, 25).await;
        registry.start_all().await.unwrap();

        let active = registry.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].watching);

        let inactive = registry.list_inactive().await.unwrap();
        assert_eq!(inactive.len(), 1);
        assert!(!inactive[0].watching);

        let all = registry.list_all().await.unwrap();
        assert_eq!(
            all.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![UserId::new(1), UserId::new(2)]
        );
    }

    #[tokio::test]
    async fn shutdown_stops_everything() {
        let records = (1..=3).map(|id| user(id).with_active(true)).collect();
        let (registry, factory, _) = registry_with(records, 25).await;
        registry.start_all().await.unwrap();

        registry.shutdown().await;

        assert_eq!(registry.stats().await, RegistryStats::default());
        for id in 1..=3 {
            assert!(factory.live(UserId::new(id)).is_empty());
        }
    }

    /// Repository whose writes of active records are slow.
    struct SlowActivation {
        inner: InMemoryCredentialRepository,
        delay: Duration,
    }

    #[async_trait]
    impl CredentialRepository for SlowActivation {
        async fn find_active(&self) -> Result<Vec<UserCredential>, RepositoryError> {
            self.inner.find_active().await
        }

        async fn find_all(&self) -> Result<Vec<UserCredential>, RepositoryError> {
            self.inner.find_all().await
        }

        async fn find_by_id(&self, id: UserId) -> Result<Option<UserCredential>, RepositoryError> {
            self.inner.find_by_id(id).await
        }

        async fn save(&self, credential: &UserCredential) -> Result<(), RepositoryError> {
            if credential.active {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.save(credential).await
        }

        async fn delete(&self, id: UserId) -> Result<bool, RepositoryError> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn interleaved_enable_and_disable_leave_consistent_state() {
        let repository = Arc::new(SlowActivation {
            inner: InMemoryCredentialRepository::new(),
            delay: Duration::from_millis(100),
        });
        repository.inner.save(&user(1)).await.unwrap();
        let factory = Arc::new(FakeFactory::default());
        let registry = Arc::new(WatcherRegistry::new(
            repository.clone(),
            factory.clone(),
            Arc::new(quiet_sink()),
            RegistryConfig::default(),
        ));

        let enabling = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.enable(UserId::new(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.disable(UserId::new(1)).await.unwrap();
        enabling.await.unwrap().unwrap();

        let stored = repository.find_by_id(UserId::new(1)).await.unwrap().unwrap();
        assert!(!stored.active);
        assert!(!registry.is_watching(UserId::new(1)).await);
        assert!(factory.live(UserId::new(1)).is_empty());
    }

    #[tokio::test]
    async fn failed_activation_write_starts_nothing() {
        let mut repository = MockCredentialRepository::new();
        repository
            .expect_find_by_id()
            .returning(|_| Ok(Some(user(1))));
        repository
            .expect_save()
            .returning(|_| Err(RepositoryError::Io(std::io::Error::other("read-only"))));

        let factory = Arc::new(FakeFactory::default());
        let registry = WatcherRegistry::new(
            Arc::new(repository),
            factory.clone(),
            Arc::new(quiet_sink()),
            RegistryConfig::default(),
        );

        let err = registry.enable(UserId::new(1)).await.unwrap_err();
        assert!(matches!(err, RegistryError::Repository(_)));
        assert_eq!(factory.spawn_count(), 0);
        assert!(!registry.is_watching(UserId::new(1)).await);
    }

    #[tokio::test]
    async fn settings_saved_at_capacity_stores_nothing() {
        let (registry, factory, repository) = registry_with(vec![user(1)], 1).await;
        registry.enable(UserId::new(1)).await.unwrap();

        let err = registry
            .on_settings_saved(user(2).with_active(true))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::CapacityExceeded { max: 1 }));
        assert!(repository.find_by_id(UserId::new(2)).await.unwrap().is_none());
        assert!(factory.live(UserId::new(2)).is_empty());

        // Inactive settings are still stored at the cap.
        registry.on_settings_saved(user(2)).await.unwrap();
        assert!(!repository.find_by_id(UserId::new(2)).await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn repository_failure_is_reported() {
        let mut repository = MockCredentialRepository::new();
        repository.expect_find_by_id().returning(|_| {
            Err(RepositoryError::Io(std::io::Error::other("disk gone")))
        });

        let registry = WatcherRegistry::new(
            Arc::new(repository),
            Arc::new(FakeFactory::default()),
            Arc::new(quiet_sink()),
            RegistryConfig::default(),
        );

        let err = registry.enable(UserId::new(1)).await.unwrap_err();
        assert!(matches!(err, RegistryError::Repository(_)));
    }
}
