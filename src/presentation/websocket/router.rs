//! Event Router
//!
//! Resolves an envelope's scope to sessions and enqueues one dispatch per
//! target. Publishing never fails: events with no connected recipients are
//! dropped, and sessions whose queue overflows are closed without affecting
//! anyone else.

use std::sync::Arc;

use super::registry::SessionRegistry;
use super::session::{CloseReason, Dispatch, Outbound};
use crate::domain::EventEnvelope;
use crate::infrastructure::metrics;

/// Per-publish delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Sessions the dispatch was enqueued to
    pub delivered: usize,
    /// Sessions closed because their queue was full
    pub overflowed: usize,
}

#[derive(Clone)]
pub struct EventRouter {
    registry: Arc<SessionRegistry>,
}

impl EventRouter {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Fan an envelope out to every identified session in its scope.
    ///
    /// Target resolution and enqueueing happen under the registry read lock,
    /// so each publish observes one consistent index snapshot. Membership
    /// changes implied by the event apply after delivery: a removed member
    /// still receives its own removal event, a new member receives the join.
    pub fn publish(&self, envelope: EventEnvelope) -> PublishOutcome {
        let scope_kind = envelope.scope.kind();
        let membership = envelope.membership_change();
        let dispatch = Arc::new(Dispatch {
            kind: envelope.kind,
            data: envelope.payload,
        });

        let mut outcome = PublishOutcome::default();
        self.registry.for_each_target(&envelope.scope, |session| {
            if !session.is_identified() {
                return;
            }
            if session.enqueue_or_close(Outbound::Dispatch(dispatch.clone())) {
                outcome.delivered += 1;
            } else if session.close_reason() == Some(CloseReason::QueueOverflow) {
                outcome.overflowed += 1;
            }
        });

        if let Some(change) = membership {
            self.registry.apply_membership(&change);
        }

        metrics::record_published(scope_kind);
        if outcome.delivered == 0 {
            metrics::record_dropped();
        } else {
            metrics::record_dispatch(dispatch.kind.as_str(), outcome.delivered);
        }

        tracing::debug!(
            event = %dispatch.kind,
            scope = scope_kind,
            delivered = outcome.delivered,
            overflowed = outcome.overflowed,
            "Event published"
        );
        outcome
    }
}
