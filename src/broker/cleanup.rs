//! Idle-listener cleanup policy.
//!
//! After a peer detaches from an object the broker asks the policy whether the
//! connection should stay open. The default keeps every connection; hosts that
//! want timeouts or subscription-count rules plug in their own.

use crate::types::{ConnectionId, ObjectName};

/// A listener was removed in response to a RemoveObject request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerRemoved {
    pub connection: ConnectionId,
    pub object: ObjectName,
    /// Listeners the object still has.
    pub remaining_listeners: usize,
    /// Objects the connection still listens to.
    pub connection_subscriptions: usize,
}

/// What to do with the connection afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupAction {
    Retain,
    Close,
}

#[cfg_attr(test, mockall::automock)]
pub trait ListenerCleanupPolicy {
    fn on_listener_removed(&mut self, removed: &ListenerRemoved) -> CleanupAction;
}

/// Never closes anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetainConnections;

impl ListenerCleanupPolicy for RetainConnections {
    fn on_listener_removed(&mut self, _removed: &ListenerRemoved) -> CleanupAction {
        CleanupAction::Retain
    }
}

/// Closes a connection once it no longer listens to anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct CloseWhenUnsubscribed;

impl ListenerCleanupPolicy for CloseWhenUnsubscribed {
    fn on_listener_removed(&mut self, removed: &ListenerRemoved) -> CleanupAction {
        if removed.connection_subscriptions == 0 {
            CleanupAction::Close
        } else {
            CleanupAction::Retain
        }
    }
}
