//! Inbound notification handling
//!
//! Turns a validated notification into a queued reconciliation. The
//! handler never touches the remote store itself; a notification is only
//! a hint that the scope should be looked at again.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use drivewatch_core::domain::{Notification, ResourceState, ScopeId, SubscriptionId};
use drivewatch_core::usecases::{NotificationError, ValidateNotificationUseCase};

use crate::dispatcher::{Enqueued, ReconcileQueue};
use crate::metrics::WatchMetrics;
use crate::scheduler::SchedulerHandle;

/// What happened to an accepted notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationDisposition {
    /// A reconciliation was queued
    Enqueued(ScopeId),
    /// A reconciliation was already pending and absorbed this one
    Coalesced(ScopeId),
    /// Channel handshake; nothing to reconcile
    SyncAcknowledged(ScopeId),
    /// Message number not newer than one already seen on the channel
    Replayed(ScopeId),
    /// Valid, but the dispatcher is no longer accepting work
    Dropped(ScopeId),
}

impl NotificationDisposition {
    pub fn scope(&self) -> &ScopeId {
        match self {
            Self::Enqueued(scope)
            | Self::Coalesced(scope)
            | Self::SyncAcknowledged(scope)
            | Self::Replayed(scope)
            | Self::Dropped(scope) => scope,
        }
    }

    /// Short label used for metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Enqueued(_) => "enqueued",
            Self::Coalesced(_) => "coalesced",
            Self::SyncAcknowledged(_) => "sync",
            Self::Replayed(_) => "replayed",
            Self::Dropped(_) => "dropped",
        }
    }
}

/// Validates notifications and feeds the reconcile queue
pub struct NotificationHandler {
    validator: ValidateNotificationUseCase,
    queue: ReconcileQueue,
    scheduler: SchedulerHandle,
    /// Highest message number seen per scope, with the channel it came on
    last_seen: DashMap<ScopeId, (SubscriptionId, u64)>,
    metrics: Arc<WatchMetrics>,
}

impl NotificationHandler {
    pub fn new(
        validator: ValidateNotificationUseCase,
        queue: ReconcileQueue,
        scheduler: SchedulerHandle,
        metrics: Arc<WatchMetrics>,
    ) -> Self {
        Self {
            validator,
            queue,
            scheduler,
            last_seen: DashMap::new(),
            metrics,
        }
    }

    /// Handles one notification
    ///
    /// A notification on an expired channel still queues a reconciliation,
    /// and a channel replacement is requested from the scheduler.
    ///
    /// # Errors
    ///
    /// Returns the validation failure for unknown scopes, superseded
    /// subscriptions, bad signatures, and registry read failures. Nothing
    /// is queued in those cases.
    pub async fn handle(
        &self,
        notification: &Notification,
    ) -> Result<NotificationDisposition, NotificationError> {
        let result = self.dispatch(notification).await;
        match &result {
            Ok(disposition) => self.metrics.record_notification(disposition.outcome()),
            Err(e) => self.metrics.record_notification(e.outcome()),
        }
        result
    }

    async fn dispatch(
        &self,
        notification: &Notification,
    ) -> Result<NotificationDisposition, NotificationError> {
        let scope = match self.validator.execute(notification).await {
            Ok(scope) => scope,
            Err(e) => match e.reconcilable_scope().cloned() {
                Some(scope) => {
                    info!(scope = %scope, "Notification on expired channel, requesting renewal");
                    self.scheduler.request_renewal(scope.clone());
                    scope
                }
                None => {
                    match &e {
                        NotificationError::Storage(_) => {
                            error!(error = %e, "Cannot validate notification");
                        }
                        NotificationError::InvalidSignature(scope) => {
                            warn!(scope = %scope, "Rejected notification with invalid signature");
                        }
                        _ => debug!(reason = e.outcome(), error = %e, "Discarded notification"),
                    }
                    return Err(e);
                }
            },
        };

        if self.is_replay(notification) {
            debug!(
                scope = %scope,
                message_number = notification.message_number,
                "Ignoring replayed notification"
            );
            return Ok(NotificationDisposition::Replayed(scope));
        }

        if notification.resource_state == ResourceState::Sync {
            debug!(scope = %scope, "Channel handshake acknowledged");
            return Ok(NotificationDisposition::SyncAcknowledged(scope));
        }

        let enqueued = if notification.resource_state.closes_channel() && !scope.is_root() {
            self.queue.enqueue_closing(scope.clone())
        } else {
            self.queue.enqueue(scope.clone())
        };

        Ok(match enqueued {
            Enqueued::Queued => NotificationDisposition::Enqueued(scope),
            Enqueued::Coalesced => NotificationDisposition::Coalesced(scope),
            Enqueued::Closed => NotificationDisposition::Dropped(scope),
        })
    }

    /// Records the message number and reports whether it was already seen
    ///
    /// Numbers restart with every channel, so a new subscription resets the
    /// high-water mark.
    fn is_replay(&self, notification: &Notification) -> bool {
        let Some(number) = notification.message_number else {
            return false;
        };

        match self.last_seen.entry(notification.scope_id.clone()) {
            Entry::Vacant(entry) => {
                entry.insert((notification.subscription_id.clone(), number));
                false
            }
            Entry::Occupied(mut entry) => {
                let (subscription, last) = entry.get_mut();
                if *subscription != notification.subscription_id {
                    *subscription = notification.subscription_id.clone();
                    *last = number;
                    false
                } else if number <= *last {
                    true
                } else {
                    *last = number;
                    false
                }
            }
        }
    }
}
