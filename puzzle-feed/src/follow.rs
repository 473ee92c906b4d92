use log::{info, warn};
use puzzle_db::{DocumentStore, Update};
use puzzle_msg::UserProfile;
use puzzle_ref::{Collection, UserId};
use serde_json::json;

use crate::{
    mutate::{run, MutationKind},
    AppContext, Error, MutationError,
};

const USERS: &str = Collection::Users.as_str();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FollowState {
    Following,
    NotFollowing,
}

impl FollowState {
    pub fn flipped(self) -> Self {
        match self {
            FollowState::Following => FollowState::NotFollowing,
            FollowState::NotFollowing => FollowState::Following,
        }
    }

    fn from_following(following: bool) -> Self {
        if following {
            FollowState::Following
        } else {
            FollowState::NotFollowing
        }
    }

    fn edit(self, path: &str, value: &UserId) -> Update {
        match self {
            FollowState::Following => Update::new().array_union(path, json!(value)),
            FollowState::NotFollowing => Update::new().array_remove(path, json!(value)),
        }
    }
}

/// The viewer's follow relationship to one subject.
///
/// Each toggle writes the viewer's `following` list first and the subject's `followers`
/// list second. The two writes are independent, so a failure of the second leaves the
/// lists disagreeing until [`reconcile_follow`] is run.
pub struct Follow {
    ctx: AppContext,
    viewer: UserId,
    subject: UserId,
    state: FollowState,
}

impl Follow {
    /// Reads the current state from the viewer's profile.
    ///
    /// Fails with [`Error::SelfFollow`] for the viewer's own id and [`Error::NotFound`] when
    /// the subject has no profile.
    pub async fn load(ctx: &AppContext, subject: &UserId) -> Result<Self, Error> {
        let viewer = ctx.session()?.user_id;
        if &viewer == subject {
            return Err(Error::SelfFollow);
        }
        if read_profile(ctx.store.as_ref(), subject).await?.is_none() {
            return Err(Error::NotFound {
                collection: USERS,
                id: subject.to_string(),
            });
        }
        let following = read_profile(ctx.store.as_ref(), &viewer)
            .await?
            .map(|profile| profile.content.is_following(subject))
            .unwrap_or(false);

        Ok(Self {
            ctx: ctx.clone(),
            viewer,
            subject: subject.clone(),
            state: FollowState::from_following(following),
        })
    }

    pub fn state(&self) -> FollowState {
        self.state
    }

    pub fn viewer(&self) -> &UserId {
        &self.viewer
    }

    pub fn subject(&self) -> &UserId {
        &self.subject
    }

    /// Flips the local state straight away and writes both sides.
    ///
    /// If the first write fails nothing changed remotely and the local state is restored.
    /// If only the second fails, the local state keeps matching the viewer's list and the
    /// error is [`Error::AsymmetricFollow`].
    pub async fn toggle(&mut self) -> Result<FollowState, MutationError> {
        let previous = self.state;
        let target = previous.flipped();
        self.state = target;

        let result = run(MutationKind::ToggleFollow, self.write_both(target)).await;
        if let Err(err) = &result {
            if !matches!(err.source, Error::AsymmetricFollow { .. }) {
                self.state = previous;
            }
        }
        result
    }

    async fn write_both(&self, target: FollowState) -> Result<FollowState, Error> {
        let store = self.ctx.store.as_ref();

        store
            .update(
                USERS,
                self.viewer.as_str(),
                &target.edit("following", &self.subject),
            )
            .await?;
        if let Err(err) = store
            .update(
                USERS,
                self.subject.as_str(),
                &target.edit("followers", &self.viewer),
            )
            .await
        {
            return Err(Error::AsymmetricFollow {
                viewer: self.viewer.clone(),
                subject: self.subject.clone(),
                source: Box::new(err.into()),
            });
        }

        info!("{} is now {:?} {}", self.viewer, target, self.subject);
        Ok(target)
    }
}

/// Makes the subject's `followers` agree with the viewer's `following`.
///
/// The viewer's list is taken as the truth. Nothing calls this on its own.
pub async fn reconcile_follow(
    ctx: &AppContext,
    viewer: &UserId,
    subject: &UserId,
) -> Result<FollowState, Error> {
    let store = ctx.store.as_ref();
    let following = read_profile(store, viewer)
        .await?
        .ok_or_else(|| Error::NotFound {
            collection: USERS,
            id: viewer.to_string(),
        })?
        .content
        .is_following(subject);
    let state = FollowState::from_following(following);

    store
        .update(USERS, subject.as_str(), &state.edit("followers", viewer))
        .await?;
    warn!("reconciled follow of {} by {} to {:?}", subject, viewer, state);
    Ok(state)
}

async fn read_profile(
    store: &dyn DocumentStore,
    user_id: &UserId,
) -> Result<Option<UserProfile>, Error> {
    match store.get(USERS, user_id.as_str()).await? {
        Some(doc) => Ok(Some(UserProfile::from_fields(&doc.id, doc.fields)?)),
        None => Ok(None),
    }
}
