//! Channel lifecycle use case
//!
//! Keeps every watched scope covered by a live push-notification channel:
//! opens missing channels, renews channels about to expire, and retires
//! channels for scopes that are no longer watched.
//!
//! Drive's `resourceId` names the watched file rather than the channel, so
//! one learned for a scope is reused when a create reply is lost (the
//! retry then reports `AlreadyExists`) or a stored descriptor lacks it.
//! Without it a channel cannot be stopped remotely.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    domain::{
        ChannelDescriptor, ChannelRequest, ChannelSigner, RemoteError, ScopeId, SubscriptionId,
    },
    ports::{IChannelApi, IChannelRegistry},
};

/// Base delay for exponential backoff between create attempts
const BASE_DELAY_SECS: u64 = 1;

/// Failure to open or record a channel
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The remote channel API refused or failed the request
    #[error("Channel API error: {0}")]
    Remote(#[from] RemoteError),

    /// The channel registry could not be read or written
    #[error("Channel registry error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Tunables for channel creation and renewal
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Public URL notifications are delivered to
    pub callback_url: String,
    /// Requested channel lifetime
    pub ttl: chrono::Duration,
    /// Channels expiring within this window are renewed
    pub renewal_window: chrono::Duration,
    /// Attempts per create call, retrying transient failures
    pub max_attempts: u32,
}

/// Result of [`ChannelManager::ensure_watched`]
#[derive(Debug, Clone)]
pub enum WatchOutcome {
    /// A live channel was already registered
    AlreadyWatched(ChannelDescriptor),
    /// A new channel was opened
    Created {
        descriptor: ChannelDescriptor,
        /// A previous channel had expired without being renewed
        lapsed: bool,
    },
}

/// Summary of one [`ChannelManager::ensure_all_watched`] pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSyncReport {
    /// Scopes that had no live channel and got one
    pub created: Vec<ScopeId>,
    /// Scopes whose channel was replaced before expiring
    pub renewed: Vec<ScopeId>,
    /// Scopes no longer watched whose channel was dropped
    pub retired: Vec<ScopeId>,
    /// Scopes that went unwatched for a while and must be reconciled
    pub needs_catch_up: Vec<ScopeId>,
    /// Scopes whose channel operation failed, with the reason
    pub failed: Vec<(ScopeId, String)>,
}

impl ChannelSyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Use case managing channel creation, renewal, and retirement
pub struct ChannelManager {
    api: Arc<dyn IChannelApi>,
    registry: Arc<dyn IChannelRegistry>,
    signer: Arc<ChannelSigner>,
    settings: ChannelSettings,
    /// Last known resource id per scope
    resources: Mutex<HashMap<ScopeId, String>>,
}

impl ChannelManager {
    /// Creates a new ChannelManager
    ///
    /// # Arguments
    ///
    /// * `api` - Remote channel API
    /// * `registry` - Durable channel descriptors
    /// * `signer` - Mints the signing token of each new channel
    /// * `settings` - Callback URL, TTL, renewal window, retry budget
    pub fn new(
        api: Arc<dyn IChannelApi>,
        registry: Arc<dyn IChannelRegistry>,
        signer: Arc<ChannelSigner>,
        settings: ChannelSettings,
    ) -> Self {
        Self {
            api,
            registry,
            signer,
            settings,
            resources: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    /// Makes sure `scope` has a live channel, opening one if needed
    ///
    /// # Errors
    ///
    /// Returns an error if the channel cannot be opened or recorded
    pub async fn ensure_watched(&self, scope: &ScopeId) -> Result<WatchOutcome, ChannelError> {
        let existing = self.registry.get(scope).await?;
        match existing {
            Some(descriptor) if !descriptor.is_expired_at(Utc::now()) => {
                Ok(WatchOutcome::AlreadyWatched(descriptor))
            }
            previous => {
                let lapsed = previous.is_some();
                let descriptor = self.open_channel(scope, previous.as_ref()).await?;
                info!(scope = %scope, expires_at = %descriptor.expires_at, lapsed, "Channel opened");
                Ok(WatchOutcome::Created { descriptor, lapsed })
            }
        }
    }

    /// Replaces the scope's channel with a fresh one
    ///
    /// The new descriptor is recorded before the old channel is stopped;
    /// stopping is best effort.
    ///
    /// # Errors
    ///
    /// Returns an error if the new channel cannot be opened or recorded.
    /// The previous descriptor stays registered in that case.
    pub async fn renew(&self, scope: &ScopeId) -> Result<ChannelDescriptor, ChannelError> {
        let previous = self.registry.get(scope).await?;
        let descriptor = self.open_channel(scope, previous.as_ref()).await?;

        if let Some(previous) = previous {
            if previous.subscription_id != descriptor.subscription_id {
                self.stop_best_effort(&previous).await;
            }
        }

        info!(scope = %scope, expires_at = %descriptor.expires_at, "Channel renewed");
        Ok(descriptor)
    }

    /// Stops the scope's channel (best effort) and forgets it
    ///
    /// Returns `false` if no channel was registered.
    ///
    /// # Errors
    ///
    /// Only registry failures are reported; a failed remote stop is logged.
    pub async fn retire(&self, scope: &ScopeId) -> Result<bool, ChannelError> {
        let Some(descriptor) = self.registry.get(scope).await? else {
            return Ok(false);
        };
        self.stop_best_effort(&descriptor).await;
        self.registry.remove(scope).await?;
        info!(scope = %scope, "Channel retired");
        Ok(true)
    }

    /// Brings the registry in line with the requested scopes
    ///
    /// Failures on individual scopes are collected in the report and do
    /// not stop the pass.
    ///
    /// # Errors
    ///
    /// Returns an error only if the registry cannot be listed
    pub async fn ensure_all_watched(
        &self,
        scopes: &[ScopeId],
    ) -> Result<ChannelSyncReport, ChannelError> {
        let now = Utc::now();
        let mut report = ChannelSyncReport::default();

        let registered: HashMap<ScopeId, ChannelDescriptor> = self
            .registry
            .list_all()
            .await?
            .into_iter()
            .map(|d| (d.scope_id.clone(), d))
            .collect();
        let expiring: HashSet<ScopeId> = self
            .registry
            .list_expiring_before(now + self.settings.renewal_window)
            .await?
            .into_iter()
            .map(|d| d.scope_id)
            .collect();

        let mut wanted: HashSet<&ScopeId> = HashSet::new();
        for scope in scopes {
            if !wanted.insert(scope) {
                continue;
            }

            let live = registered
                .get(scope)
                .is_some_and(|d| !d.is_expired_at(now));

            if !live {
                match self.ensure_watched(scope).await {
                    Ok(WatchOutcome::Created { .. }) => {
                        report.created.push(scope.clone());
                        report.needs_catch_up.push(scope.clone());
                    }
                    Ok(WatchOutcome::AlreadyWatched(_)) => {}
                    Err(e) => {
                        warn!(scope = %scope, error = %e, "Failed to open channel");
                        report.failed.push((scope.clone(), e.to_string()));
                    }
                }
            } else if expiring.contains(scope) {
                match self.renew(scope).await {
                    Ok(_) => report.renewed.push(scope.clone()),
                    Err(e) => {
                        warn!(scope = %scope, error = %e, "Failed to renew channel");
                        report.failed.push((scope.clone(), e.to_string()));
                    }
                }
            }
        }

        let mut stale: Vec<&ScopeId> = registered
            .keys()
            .filter(|scope| !wanted.contains(scope))
            .collect();
        stale.sort();
        for scope in stale {
            match self.retire(scope).await {
                Ok(_) => report.retired.push(scope.clone()),
                Err(e) => {
                    warn!(scope = %scope, error = %e, "Failed to retire channel");
                    report.failed.push((scope.clone(), e.to_string()));
                }
            }
        }

        debug!(
            created = report.created.len(),
            renewed = report.renewed.len(),
            retired = report.retired.len(),
            failed = report.failed.len(),
            "Channel pass complete"
        );
        Ok(report)
    }

    /// Opens a channel and records it
    ///
    /// The subscription id and token are minted once and reused on every
    /// retry. An `AlreadyExists` reply means an earlier attempt went
    /// through, so it is accepted with the requested expiry and the scope's
    /// last known resource id.
    async fn open_channel(
        &self,
        scope: &ScopeId,
        previous: Option<&ChannelDescriptor>,
    ) -> Result<ChannelDescriptor, ChannelError> {
        if let Some(resource_id) = previous.and_then(|p| p.resource_id.as_ref()) {
            self.remember_resource(scope, resource_id).await;
        }

        let subscription_id = SubscriptionId::generate();
        let request = ChannelRequest {
            scope_id: scope.clone(),
            signing_token: self.signer.sign(scope, &subscription_id),
            subscription_id,
            callback_url: self.settings.callback_url.clone(),
            expires_at: Utc::now() + self.settings.ttl,
        };

        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;
        let descriptor = loop {
            attempt += 1;
            match self.api.create_channel(&request).await {
                Ok(descriptor) => break descriptor,
                Err(RemoteError::AlreadyExists(reason)) => {
                    let resource_id = self.known_resource(scope).await;
                    if resource_id.is_none() {
                        warn!(
                            scope = %scope,
                            %reason,
                            expires_at = %request.expires_at,
                            "Channel already exists with unknown resource id; it cannot be stopped before it expires"
                        );
                    } else {
                        debug!(scope = %scope, %reason, "Channel already exists, treating as created");
                    }
                    break request.to_descriptor(resource_id);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = match &e {
                        RemoteError::RateLimited { retry_after } => *retry_after,
                        _ => Duration::from_secs(BASE_DELAY_SECS * 2u64.pow(attempt - 1)),
                    };
                    warn!(
                        scope = %scope,
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Channel create failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        if let Some(resource_id) = &descriptor.resource_id {
            self.remember_resource(scope, resource_id).await;
        }
        self.registry.put(&descriptor).await?;
        Ok(descriptor)
    }

    async fn remember_resource(&self, scope: &ScopeId, resource_id: &str) {
        self.resources
            .lock()
            .await
            .insert(scope.clone(), resource_id.to_string());
    }

    async fn known_resource(&self, scope: &ScopeId) -> Option<String> {
        self.resources.lock().await.get(scope).cloned()
    }

    async fn stop_best_effort(&self, descriptor: &ChannelDescriptor) {
        let mut descriptor = descriptor.clone();
        if descriptor.resource_id.is_none() {
            descriptor.resource_id = self.known_resource(&descriptor.scope_id).await;
        }
        if descriptor.resource_id.is_none() {
            warn!(
                scope = %descriptor.scope_id,
                subscription = %descriptor.subscription_id,
                expires_at = %descriptor.expires_at,
                "Channel has no resource id; leaving it to expire"
            );
            return;
        }

        let descriptor = &descriptor;
        match self.api.stop_channel(descriptor).await {
            Ok(()) => debug!(scope = %descriptor.scope_id, "Channel stopped"),
            Err(RemoteError::NotFound(_)) => {
                debug!(scope = %descriptor.scope_id, "Channel already gone remotely");
            }
            Err(e) => warn!(
                scope = %descriptor.scope_id,
                subscription = %descriptor.subscription_id,
                error = %e,
                "Failed to stop channel; it will expire on its own"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::testing::{FakeChannelApi, MemoryChannelRegistry};

    struct Fixture {
        api: Arc<FakeChannelApi>,
        registry: Arc<MemoryChannelRegistry>,
        signer: Arc<ChannelSigner>,
        manager: ChannelManager,
    }

    fn fixture() -> Fixture {
        let api = Arc::new(FakeChannelApi::new());
        let registry = Arc::new(MemoryChannelRegistry::new());
        let signer = Arc::new(ChannelSigner::new("secret").unwrap());
        let manager = ChannelManager::new(
            api.clone(),
            registry.clone(),
            signer.clone(),
            ChannelSettings {
                callback_url: "https://hooks.example.com/notifications".to_string(),
                ttl: ChronoDuration::hours(24),
                renewal_window: ChronoDuration::minutes(5),
                max_attempts: 3,
            },
        );
        Fixture {
            api,
            registry,
            signer,
            manager,
        }
    }

    async fn seed(f: &Fixture, scope: &ScopeId, expires_in: ChronoDuration) -> ChannelDescriptor {
        let subscription_id = SubscriptionId::generate();
        let descriptor = ChannelDescriptor {
            scope_id: scope.clone(),
            signing_token: f.signer.sign(scope, &subscription_id),
            subscription_id,
            resource_id: Some("res".to_string()),
            expires_at: Utc::now() + expires_in,
        };
        f.registry.put(&descriptor).await.unwrap();
        descriptor
    }

    #[tokio::test]
    async fn test_ensure_watched_creates_signed_channel() {
        let f = fixture();
        let scope = ScopeId::root();

        let outcome = f.manager.ensure_watched(&scope).await.unwrap();

        let WatchOutcome::Created { descriptor, lapsed } = outcome else {
            panic!("expected a new channel");
        };
        assert!(!lapsed);
        assert_eq!(
            descriptor.signing_token,
            f.signer.sign(&scope, &descriptor.subscription_id)
        );
        assert_eq!(f.registry.get(&scope).await.unwrap(), Some(descriptor));
        assert_eq!(
            f.api.created()[0].callback_url,
            "https://hooks.example.com/notifications"
        );
    }

    #[tokio::test]
    async fn test_ensure_watched_keeps_live_channel() {
        let f = fixture();
        let scope = ScopeId::root();
        let existing = seed(&f, &scope, ChronoDuration::hours(1)).await;

        let outcome = f.manager.ensure_watched(&scope).await.unwrap();

        assert!(matches!(outcome, WatchOutcome::AlreadyWatched(d) if d == existing));
        assert!(f.api.created().is_empty());
    }

    #[tokio::test]
    async fn test_renewal_yields_strictly_later_expiry() {
        let f = fixture();
        let scope = ScopeId::root();
        let old = seed(&f, &scope, ChronoDuration::minutes(1)).await;

        let report = f.manager.ensure_all_watched(&[scope.clone()]).await.unwrap();

        assert_eq!(report.renewed, vec![scope.clone()]);
        let current = f.registry.get(&scope).await.unwrap().unwrap();
        assert!(current.expires_at > old.expires_at);
        assert_ne!(current.subscription_id, old.subscription_id);
        assert_eq!(f.api.stopped()[0].subscription_id, old.subscription_id);
    }

    #[tokio::test]
    async fn test_lapsed_channel_needs_catch_up() {
        let f = fixture();
        let scope = ScopeId::new("F1").unwrap();
        seed(&f, &scope, ChronoDuration::minutes(-10)).await;

        let report = f.manager.ensure_all_watched(&[scope.clone()]).await.unwrap();

        assert_eq!(report.created, vec![scope.clone()]);
        assert_eq!(report.needs_catch_up, vec![scope.clone()]);
        assert!(report.renewed.is_empty());
    }

    #[tokio::test]
    async fn test_unrequested_scope_is_retired_even_if_stop_fails() {
        let f = fixture();
        let kept = ScopeId::root();
        let dropped = ScopeId::new("old-folder").unwrap();
        seed(&f, &kept, ChronoDuration::hours(2)).await;
        seed(&f, &dropped, ChronoDuration::hours(2)).await;
        f.api
            .fail_next_stop(RemoteError::Transient("timeout".to_string()));

        let report = f.manager.ensure_all_watched(&[kept.clone()]).await.unwrap();

        assert_eq!(report.retired, vec![dropped.clone()]);
        assert!(report.is_clean());
        assert!(f.registry.get(&dropped).await.unwrap().is_none());
        assert!(f.registry.get(&kept).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_already_exists_counts_as_success() {
        let f = fixture();
        let scope = ScopeId::root();
        f.api
            .fail_next_create(RemoteError::AlreadyExists("channelIdNotUnique".to_string()));

        let descriptor = f.manager.renew(&scope).await.unwrap();

        let request = &f.api.created()[0];
        assert_eq!(descriptor.subscription_id, request.subscription_id);
        assert_eq!(descriptor.expires_at, request.expires_at);
        assert!(f.registry.get(&scope).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_already_exists_keeps_known_resource_id() {
        let f = fixture();
        let scope = ScopeId::new("F1").unwrap();
        let old = seed(&f, &scope, ChronoDuration::minutes(1)).await;
        f.api
            .fail_next_create(RemoteError::AlreadyExists("channelIdNotUnique".to_string()));

        let renewed = f.manager.renew(&scope).await.unwrap();
        assert_eq!(renewed.resource_id.as_deref(), Some("res"));

        // The renewed channel can still be stopped
        assert!(f.manager.retire(&scope).await.unwrap());
        let stopped = f.api.stopped();
        assert_eq!(stopped.len(), 2);
        assert_eq!(stopped[0].subscription_id, old.subscription_id);
        assert_eq!(stopped[1].subscription_id, renewed.subscription_id);
        assert_eq!(stopped[1].resource_id.as_deref(), Some("res"));
    }

    #[tokio::test]
    async fn test_descriptor_without_resource_id_is_stopped_once_learned() {
        let f = fixture();
        let scope = ScopeId::new("F1").unwrap();
        f.api
            .fail_next_create(RemoteError::AlreadyExists("channelIdNotUnique".to_string()));

        // First channel: reply lost, nothing known yet
        let first = f.manager.renew(&scope).await.unwrap();
        assert!(first.resource_id.is_none());

        // Second channel reports the id; the first is stopped with it
        let second = f.manager.renew(&scope).await.unwrap();
        assert_eq!(second.resource_id.as_deref(), Some("res-F1"));

        let stopped = f.api.stopped();
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].subscription_id, first.subscription_id);
        assert_eq!(stopped[0].resource_id.as_deref(), Some("res-F1"));
    }

    #[tokio::test]
    async fn test_unknown_resource_id_skips_remote_stop() {
        let f = fixture();
        let scope = ScopeId::new("F1").unwrap();
        f.api
            .fail_next_create(RemoteError::AlreadyExists("channelIdNotUnique".to_string()));
        f.manager.ensure_watched(&scope).await.unwrap();

        assert!(f.manager.retire(&scope).await.unwrap());

        assert!(f.api.stopped().is_empty());
        assert!(f.registry.get(&scope).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_create_retried_with_same_identity() {
        let f = fixture();
        let scope = ScopeId::root();
        f.api
            .fail_next_create(RemoteError::Transient("502".to_string()));

        f.manager.ensure_watched(&scope).await.unwrap();

        let requests = f.api.created();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_reported_per_scope() {
        let f = fixture();
        let a = ScopeId::new("A").unwrap();
        let b = ScopeId::new("B").unwrap();
        f.api
            .fail_next_create(RemoteError::Rejected("forbidden".to_string()));

        let report = f
            .manager
            .ensure_all_watched(&[a.clone(), b.clone(), a.clone()])
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, a);
        assert_eq!(report.created, vec![b]);
        assert!(!report.is_clean());
    }
}
