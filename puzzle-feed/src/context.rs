use puzzle_auth::{AuthProvider, Session};
use puzzle_db::DocumentStore;
use puzzle_push::PushDispatcher;
use std::sync::Arc;

use crate::Error;

/// What happens to an optimistic patch whose remote write failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RollbackPolicy {
    /// Leave the patch until the next push from the store overwrites it.
    #[default]
    AwaitNextPush,
    /// Restore the pre-patch entry, unless a push already replaced the cache.
    Revert,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedConfig {
    pub rollback: RollbackPolicy,
    /// Notify every other registered device when a post is created.
    pub notify_on_post: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            rollback: RollbackPolicy::default(),
            notify_on_post: true,
        }
    }
}

/// Handles to the remote collaborators, built once at startup.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn DocumentStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub push: Arc<dyn PushDispatcher>,
    pub config: FeedConfig,
}

impl AppContext {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        auth: Arc<dyn AuthProvider>,
        push: Arc<dyn PushDispatcher>,
        config: FeedConfig,
    ) -> Self {
        Self {
            store,
            auth,
            push,
            config,
        }
    }

    pub fn session(&self) -> Result<Session, Error> {
        self.auth.current_session().ok_or(Error::NotSignedIn)
    }
}
