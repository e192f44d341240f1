//! User to thread mapping
//!
//! Keeps one open support thread per user. Lookups verify cached threads
//! against the platform; a thread that is gone or archived is dropped from
//! the cache and replaced on the next `resolve_thread`.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::BridgeSettings;
use crate::error::ApiResult;
use crate::rest::ThreadApi;
use crate::types::{ActionResult, ChatUser, NewThread};

/// Posted into a thread right before it is archived
pub const RESOLUTION_NOTICE: &str =
    "🎉 This support thread has been marked as resolved and will be archived.";

/// Thread-session bridge
pub struct ThreadBridge {
    api: Arc<dyn ThreadApi>,
    settings: BridgeSettings,
    /// user id -> thread id
    threads: DashMap<String, String>,
    /// Serializes create-or-reuse per user
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ThreadBridge {
    pub fn new(api: Arc<dyn ThreadApi>, settings: BridgeSettings) -> Self {
        Self {
            api,
            settings,
            threads: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    pub fn api(&self) -> &Arc<dyn ThreadApi> {
        &self.api
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(user_id.to_string()).or_default().clone()
    }

    /// Drop the user's lock entry once nobody holds or awaits it
    ///
    /// Callers must have released their own clone of the lock.
    fn release_lock(&self, user_id: &str) {
        self.locks
            .remove_if(user_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Users currently mapped to `thread_id`
    fn owners_of(&self, thread_id: &str) -> Vec<String> {
        self.threads
            .iter()
            .filter(|entry| entry.value() == thread_id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Cached thread for a user, without remote verification
    pub fn cached_thread(&self, user_id: &str) -> Option<String> {
        self.threads.get(user_id).map(|entry| entry.value().clone())
    }

    /// Whether some user is currently mapped to `thread_id`
    pub fn owns_thread(&self, thread_id: &str) -> bool {
        self.threads.iter().any(|entry| entry.value() == thread_id)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Remove every mapping pointing at `thread_id`; returns how many
    pub fn forget_thread(&self, thread_id: &str) -> usize {
        let owners = self.owners_of(thread_id);
        let mut removed = 0;
        for user_id in &owners {
            if self
                .threads
                .remove_if(user_id, |_, mapped| mapped.as_str() == thread_id)
                .is_some()
            {
                removed += 1;
            }
            self.release_lock(user_id);
        }
        removed
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.len()
    }

    fn invalidate(&self, user_id: &str, thread_id: &str) {
        self.threads
            .remove_if(user_id, |_, mapped| mapped.as_str() == thread_id);
    }

    /// Best-effort check that a cached thread is still usable
    async fn verify(&self, thread_id: &str) -> bool {
        if !self.settings.verify_cached {
            return true;
        }
        match self.api.fetch_thread(thread_id).await {
            Ok(thread) if thread.archived => {
                debug!(thread_id, "Cached thread is archived");
                false
            }
            Ok(_) => true,
            Err(e) => {
                warn!(thread_id, error = %e, "Cached thread failed verification");
                false
            }
        }
    }

    /// Thread currently held by a user, if any. Never creates.
    pub async fn lookup_thread(&self, user_id: &str) -> Option<String> {
        self.cached_thread(user_id)?;

        let found = {
            let lock = self.user_lock(user_id);
            let _guard = lock.lock().await;
            match self.cached_thread(user_id) {
                Some(thread_id) => {
                    if self.verify(&thread_id).await {
                        Some(thread_id)
                    } else {
                        self.invalidate(user_id, &thread_id);
                        None
                    }
                }
                None => None,
            }
        };
        if found.is_none() {
            self.release_lock(user_id);
        }
        found
    }

    /// Return the user's thread, creating one if needed
    ///
    /// At most one thread is created per user even under concurrent calls.
    pub async fn resolve_thread(&self, user: &ChatUser) -> ApiResult<String> {
        let lock = self.user_lock(&user.id);
        let _guard = lock.lock().await;

        if let Some(thread_id) = self.cached_thread(&user.id) {
            if self.verify(&thread_id).await {
                debug!(user_id = %user.id, thread_id = %thread_id, "Reusing thread");
                return Ok(thread_id);
            }
            info!(user_id = %user.id, thread_id = %thread_id, "Dropping stale thread mapping");
            self.invalidate(&user.id, &thread_id);
        }

        let request = NewThread {
            name: format!("{}{}", self.settings.name_prefix, user.label()),
            auto_archive_duration: self.settings.auto_archive_minutes,
        };
        let thread = self
            .api
            .create_thread(&self.settings.channel_id, &request)
            .await?;
        info!("🧵 Created thread {} for user {}", thread.id, user.id);

        self.threads.insert(user.id.clone(), thread.id.clone());

        if let Err(e) = self
            .api
            .send_message(&thread.id, &user.intro_message(), None)
            .await
        {
            warn!(thread_id = %thread.id, error = %e, "Failed to post intro message");
        }

        Ok(thread.id)
    }

    /// Post the resolution notice and archive the thread
    ///
    /// The mapping is removed, under each owner's lock, before the remote
    /// calls start. A failed notice is logged; a failed archive is returned.
    pub async fn resolve(&self, thread_id: &str) -> ApiResult<ActionResult> {
        let owners = self.owners_of(thread_id);
        for user_id in &owners {
            let lock = self.user_lock(user_id);
            let _guard = lock.lock().await;
            self.invalidate(user_id, thread_id);
        }
        for user_id in &owners {
            self.release_lock(user_id);
        }
        debug!(thread_id, owners = owners.len(), "Resolving thread");

        if let Err(e) = self
            .api
            .send_message(thread_id, RESOLUTION_NOTICE, None)
            .await
        {
            warn!(thread_id, error = %e, "Failed to post resolution notice");
        }

        self.api.archive_thread(thread_id).await?;
        info!("✅ Thread {} resolved and archived", thread_id);

        Ok(ActionResult {
            success: true,
            message: "Thread resolved and archived".to_string(),
        })
    }

    /// Resolve whatever thread the user currently holds
    pub async fn resolve_user(&self, user_id: &str) -> ApiResult<Option<ActionResult>> {
        match self.cached_thread(user_id) {
            Some(thread_id) => self.resolve(&thread_id).await.map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::error::ApiError;
    use crate::testing::FakeApi;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn bridge_with(api: Arc<FakeApi>) -> ThreadBridge {
        ThreadBridge::new(api, BridgeConfig::new("token", "support-1").bridge())
    }

    fn jane() -> ChatUser {
        ChatUser::new("u42", "Jane").with_email("jane@example.com")
    }

    #[tokio::test]
    async fn test_resolve_thread_creates_then_reuses() {
        let api = Arc::new(FakeApi::starting_at(7));
        let bridge = bridge_with(api.clone());

        assert_eq!(bridge.resolve_thread(&jane()).await.unwrap(), "t7");
        assert_eq!(bridge.cached_thread("u42").as_deref(), Some("t7"));

        assert_eq!(bridge.resolve_thread(&jane()).await.unwrap(), "t7");
        assert_eq!(FakeApi::count(&api.creates), 1);
    }

    #[tokio::test]
    async fn test_new_thread_name_and_intro() {
        let api = Arc::new(FakeApi::new());
        let bridge = bridge_with(api.clone());

        let thread_id = bridge.resolve_thread(&jane()).await.unwrap();
        let info = api.fetch_thread(&thread_id).await.unwrap();
        assert_eq!(info.name.as_deref(), Some("Support-Jane[u42]"));

        let posted = api.posted_to(&thread_id);
        assert_eq!(posted.len(), 1);
        assert!(posted[0].contains("Email: jane@example.com"));
        assert!(posted[0].contains("ID: u42"));
    }

    #[tokio::test]
    async fn test_resolve_then_new_thread() {
        let api = Arc::new(FakeApi::new());
        let bridge = bridge_with(api.clone());

        let first = bridge.resolve_thread(&jane()).await.unwrap();
        let result = bridge.resolve(&first).await.unwrap();
        assert!(result.success);
        assert_eq!(result.message, "Thread resolved and archived");
        assert!(api.is_archived(&first));
        assert_eq!(FakeApi::count(&api.archives), 1);
        assert!(bridge.cached_thread("u42").is_none());
        assert_eq!(api.posted_to(&first).last().map(String::as_str), Some(RESOLUTION_NOTICE));

        let second = bridge.resolve_thread(&jane()).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_deleted_thread_is_replaced() {
        let api = Arc::new(FakeApi::new());
        let bridge = bridge_with(api.clone());

        let first = bridge.resolve_thread(&jane()).await.unwrap();
        api.delete_thread(&first);

        let second = bridge.resolve_thread(&jane()).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(bridge.cached_thread("u42"), Some(second));
    }

    #[tokio::test]
    async fn test_verification_error_falls_through_to_create() {
        let api = Arc::new(FakeApi::new());
        let bridge = bridge_with(api.clone());

        let first = bridge.resolve_thread(&jane()).await.unwrap();
        api.fail_fetch.store(true, Ordering::SeqCst);

        let second = bridge.resolve_thread(&jane()).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(FakeApi::count(&api.creates), 2);
    }

    #[tokio::test]
    async fn test_verification_disabled_skips_fetch() {
        let api = Arc::new(FakeApi::new());
        let mut settings = BridgeConfig::new("token", "support-1").bridge();
        settings.verify_cached = false;
        let bridge = ThreadBridge::new(api.clone(), settings);

        bridge.resolve_thread(&jane()).await.unwrap();
        bridge.resolve_thread(&jane()).await.unwrap();
        assert_eq!(FakeApi::count(&api.fetches), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_resolve_creates_one_thread() {
        let api = Arc::new(FakeApi::new());
        api.set_create_delay(Duration::from_millis(50));
        let bridge = bridge_with(api.clone());
        let user = jane();

        let (a, b) = tokio::join!(bridge.resolve_thread(&user), bridge.resolve_thread(&user));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(FakeApi::count(&api.creates), 1);
    }

    #[tokio::test]
    async fn test_create_failure_leaves_cache_empty() {
        let api = Arc::new(FakeApi::new());
        api.fail_create.store(true, Ordering::SeqCst);
        let bridge = bridge_with(api.clone());

        let err = bridge.resolve_thread(&jane()).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 500, .. }));
        assert!(bridge.cached_thread("u42").is_none());
    }

    #[tokio::test]
    async fn test_lookup_never_creates() {
        let api = Arc::new(FakeApi::new());
        let bridge = bridge_with(api.clone());

        assert!(bridge.lookup_thread("u42").await.is_none());
        let thread_id = bridge.resolve_thread(&jane()).await.unwrap();
        assert_eq!(bridge.lookup_thread("u42").await, Some(thread_id.clone()));

        api.delete_thread(&thread_id);
        assert!(bridge.lookup_thread("u42").await.is_none());
        assert!(bridge.cached_thread("u42").is_none());
        assert_eq!(FakeApi::count(&api.creates), 1);
    }

    #[tokio::test]
    async fn test_resolve_missing_thread_surfaces_error() {
        let api = Arc::new(FakeApi::new());
        let bridge = bridge_with(api.clone());

        let thread_id = bridge.resolve_thread(&jane()).await.unwrap();
        api.delete_thread(&thread_id);

        let err = bridge.resolve(&thread_id).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(bridge.cached_thread("u42").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_waits_for_in_flight_verification() {
        let api = Arc::new(FakeApi::new());
        let bridge = bridge_with(api.clone());
        let thread_id = bridge.resolve_thread(&jane()).await.unwrap();
        api.set_fetch_delay(Duration::from_millis(50));

        let user = jane();
        let (current, resolved) = tokio::join!(bridge.resolve_thread(&user), async {
            tokio::task::yield_now().await;
            bridge.resolve(&thread_id).await
        });

        // Verification finished against the live thread before it was archived
        assert_eq!(current.unwrap(), thread_id);
        assert!(resolved.unwrap().success);
        assert_eq!(
            api.calls(),
            vec![format!("fetch {}", thread_id), format!("archive {}", thread_id)]
        );
        assert_eq!(FakeApi::count(&api.creates), 1);
        assert!(bridge.cached_thread("u42").is_none());
    }

    #[tokio::test]
    async fn test_locks_released_after_resolution_and_lookup() {
        let api = Arc::new(FakeApi::new());
        let bridge = bridge_with(api.clone());

        for user in ["ghost-1", "ghost-2", "ghost-3"] {
            assert!(bridge.lookup_thread(user).await.is_none());
        }
        assert_eq!(bridge.lock_count(), 0);

        let thread_id = bridge.resolve_thread(&jane()).await.unwrap();
        assert_eq!(bridge.lock_count(), 1);
        bridge.resolve(&thread_id).await.unwrap();
        assert_eq!(bridge.lock_count(), 0);

        let thread_id = bridge.resolve_thread(&jane()).await.unwrap();
        assert_eq!(bridge.forget_thread(&thread_id), 1);
        assert_eq!(bridge.lock_count(), 0);

        // A vanished thread found on lookup releases the lock too
        let thread_id = bridge.resolve_thread(&jane()).await.unwrap();
        api.delete_thread(&thread_id);
        assert!(bridge.lookup_thread("u42").await.is_none());
        assert_eq!(bridge.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_resolve_user() {
        let api = Arc::new(FakeApi::new());
        let bridge = bridge_with(api.clone());

        assert!(bridge.resolve_user("u42").await.unwrap().is_none());

        let thread_id = bridge.resolve_thread(&jane()).await.unwrap();
        assert!(bridge.owns_thread(&thread_id));
        assert!(bridge.resolve_user("u42").await.unwrap().is_some());
        assert!(!bridge.owns_thread(&thread_id));
        assert_eq!(bridge.thread_count(), 0);
    }
}
