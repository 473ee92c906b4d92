use puzzle_ref::{RefError, UserId};
use std::sync::Arc;
use thiserror::Error as ThisError;

mod account;
mod cache;
mod context;
mod follow;
mod mutate;
mod profiles;
pub mod templates;
mod view;
#[cfg(test)]
mod testing;

pub use account::{edit_profile, load_profile, register, sign_in, ProfilePage};
pub use cache::{FeedCache, FeedSnapshot, PatchTicket};
pub use context::{AppContext, FeedConfig, RollbackPolicy};
pub use follow::{reconcile_follow, Follow, FollowState};
pub use mutate::{MutationError, MutationKind, OptimisticApplier};
pub use profiles::ProfileResolver;
pub use view::{FeedScope, FeedView};

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Failed to reach the document store, cause: {0}")]
    Store(#[from] puzzle_db::Error),
    #[error("Failed to read document, cause: {0}")]
    Document(#[from] puzzle_msg::Error),
    #[error("{0}")]
    Auth(#[from] puzzle_auth::Error),
    #[error("Invalid reference, cause: {0}")]
    Ref(#[from] RefError),
    #[error("Failed to fetch profile, cause: {0}")]
    ProfileFetch(#[source] Arc<Error>),
    #[error("Not signed in")]
    NotSignedIn,
    #[error("{collection}/{id} not found")]
    NotFound { collection: &'static str, id: String },
    #[error("Only the author can change this")]
    Forbidden,
    #[error("You can't follow yourself")]
    SelfFollow,
    #[error("Follow between {viewer} and {subject} is one-sided, cause: {source}")]
    AsymmetricFollow {
        viewer: UserId,
        subject: UserId,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// True when the referenced document or comment vanished before the write.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Store(err) => err.is_not_found(),
            Error::Document(puzzle_msg::Error::CommentNotFound) => true,
            Error::ProfileFetch(err) => err.is_not_found(),
            _ => false,
        }
    }
}
