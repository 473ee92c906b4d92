use log::{info, warn};
use puzzle_auth::Session;
use puzzle_db::Update;
use puzzle_msg::{content_to_fields, ProfileContent, UserProfile};
use puzzle_ref::{Collection, PushToken, UserId};
use serde_json::json;
use std::sync::Arc;

use crate::{
    mutate::{run, MutationKind},
    AppContext, Error, FeedScope, FeedView, Follow, FollowState, MutationError, ProfileResolver,
};

const USERS: &str = Collection::Users.as_str();

/// Creates the account and its `users` document, leaving the new user signed in.
pub async fn register(
    ctx: &AppContext,
    email: &str,
    password: &str,
    push_token: Option<&PushToken>,
) -> Result<Session, Error> {
    let session = ctx.auth.sign_up(email, password).await?;

    let profile = ProfileContent::new(&session.email, push_token);
    ctx.store
        .set(
            USERS,
            session.user_id.as_str(),
            content_to_fields(&profile)?,
        )
        .await?;

    info!("registered {} as {}", session.email, session.user_id);
    Ok(session)
}

pub async fn sign_in(ctx: &AppContext, email: &str, password: &str) -> Result<Session, Error> {
    Ok(ctx.auth.sign_in(email, password).await?)
}

/// Changes the signed-in user's avatar and bio. A `None` field keeps its stored value.
pub async fn edit_profile(
    ctx: &AppContext,
    profiles: &ProfileResolver,
    avatar_url: Option<&str>,
    bio: Option<&str>,
) -> Result<(), MutationError> {
    let work = async {
        let session = ctx.session()?;
        let mut update = Update::new();
        if let Some(avatar_url) = avatar_url {
            update = update.set("avatarUrl", json!(avatar_url.trim()));
        }
        if let Some(bio) = bio {
            update = update.set("bio", json!(bio.trim()));
        }
        if update.is_empty() {
            return Ok(());
        }
        ctx.store
            .update(USERS, session.user_id.as_str(), &update)
            .await?;
        profiles.invalidate(&session.user_id);
        Ok::<(), Error>(())
    };
    run(MutationKind::EditProfile, work).await
}

/// A user's profile with their follow counts and their posts.
pub struct ProfilePage {
    pub profile: UserProfile,
    /// `None` when viewing your own profile.
    pub follow: Option<Follow>,
    pub posts: FeedView,
}

impl ProfilePage {
    pub fn follower_count(&self) -> usize {
        self.profile.content.followers.len()
    }

    pub fn following_count(&self) -> usize {
        self.profile.content.following.len()
    }

    pub fn follow_state(&self) -> Option<FollowState> {
        self.follow.as_ref().map(Follow::state)
    }

    /// Toggles the viewer's follow and keeps the shown follower count in step.
    pub async fn toggle_follow(&mut self) -> Result<Option<FollowState>, MutationError> {
        let follow = match self.follow.as_mut() {
            Some(follow) => follow,
            None => return Ok(None),
        };
        let state = follow.toggle().await?;

        let viewer = follow.viewer().clone();
        let followers = &mut self.profile.content.followers;
        match state {
            FollowState::Following => {
                followers.insert(viewer);
            }
            FollowState::NotFollowing => {
                followers.shift_remove(&viewer);
            }
        }
        self.posts.profiles().invalidate(&self.profile.id);
        Ok(Some(state))
    }
}

/// Opens a profile page. `None` if the user has no profile document.
///
/// Missing follow lists are written back as empty lists first.
pub async fn load_profile(
    ctx: &AppContext,
    profiles: Arc<ProfileResolver>,
    user_id: &UserId,
) -> Result<Option<ProfilePage>, Error> {
    let doc = match ctx.store.get(USERS, user_id.as_str()).await? {
        Some(doc) => doc,
        None => {
            warn!("no profile found for {}", user_id);
            return Ok(None);
        }
    };

    let missing = ProfileContent::missing_follow_lists(&doc.fields);
    if !missing.is_empty() {
        let update = missing
            .iter()
            .fold(Update::new(), |update, name| update.set(name, json!([])));
        ctx.store.update(USERS, user_id.as_str(), &update).await?;
        info!("normalised {:?} for {}", missing, user_id);
    }
    let profile = UserProfile::from_fields(&doc.id, doc.fields)?;

    let follow = match ctx.session() {
        Ok(session) if &session.user_id != user_id => Some(Follow::load(ctx, user_id).await?),
        _ => None,
    };
    let posts = FeedView::open(ctx, profiles, FeedScope::ByAuthor(user_id.clone())).await?;

    Ok(Some(ProfilePage {
        profile,
        follow,
        posts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{testing::Harness, FeedConfig};
    use puzzle_db::DocumentStore;
    use puzzle_ref::Tag;

    fn resolver(harness: &Harness) -> Arc<ProfileResolver> {
        Arc::new(ProfileResolver::new(harness.ctx.store.clone()))
    }

    #[tokio::test]
    async fn registration_creates_profile_document() {
        let harness = Harness::new(FeedConfig::default()).await;
        let token = PushToken::from_string("ExponentPushToken[abc]".to_string()).unwrap();
        let session = register(&harness.ctx, "New@Example.com", "puzzle123", Some(&token))
            .await
            .unwrap();

        let doc = harness
            .store
            .get(USERS, session.user_id.as_str())
            .await
            .unwrap()
            .unwrap();
        let profile = UserProfile::from_fields(&doc.id, doc.fields).unwrap();
        assert_eq!(profile.content.email, "new@example.com");
        assert_eq!(
            profile.content.avatar_url,
            "https://avatars.dicebear.com/api/initials/new%40example.com.svg"
        );
        assert_eq!(profile.content.push_token(), Some(token));
        assert!(profile.content.bio.is_empty());
    }

    #[tokio::test]
    async fn duplicate_registration_surfaces_auth_error() {
        let harness = Harness::new(FeedConfig::default()).await;
        harness.register("a@example.com").await;
        let err = register(&harness.ctx, "a@example.com", "puzzle123", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(puzzle_auth::Error::EmailInUse)));
        assert_eq!(err.to_string(), "Email is already in use");
    }

    #[tokio::test]
    async fn edit_profile_updates_and_invalidates() {
        let harness = Harness::new(FeedConfig::default()).await;
        let session = harness.register("a@example.com").await;
        let profiles = resolver(&harness);
        profiles.resolve(&session.user_id).await.unwrap();

        edit_profile(
            &harness.ctx,
            &profiles,
            Some("https://x.test/me.png"),
            Some(" Mum of two "),
        )
        .await
        .unwrap();
        assert_eq!(profiles.cached(&session.user_id), None);
        let profile = profiles.resolve(&session.user_id).await.unwrap().unwrap();
        assert_eq!(profile.content.avatar_url, "https://x.test/me.png");
        assert_eq!(profile.content.bio, "Mum of two");
    }

    #[tokio::test]
    async fn editing_only_the_bio_keeps_the_avatar() {
        let harness = Harness::new(FeedConfig::default()).await;
        let session = harness.register("a@example.com").await;
        let profiles = resolver(&harness);
        edit_profile(&harness.ctx, &profiles, Some("https://x.test/me.png"), None)
            .await
            .unwrap();

        edit_profile(&harness.ctx, &profiles, None, Some("Dad of one"))
            .await
            .unwrap();
        let profile = profiles.resolve(&session.user_id).await.unwrap().unwrap();
        assert_eq!(profile.content.avatar_url, "https://x.test/me.png");
        assert_eq!(profile.content.bio, "Dad of one");

        edit_profile(&harness.ctx, &profiles, None, None).await.unwrap();
        let profile = profiles.resolve(&session.user_id).await.unwrap().unwrap();
        assert_eq!(profile.content.bio, "Dad of one");
    }

    #[tokio::test]
    async fn profile_page_normalises_lists_and_counts_follows() {
        let harness = Harness::new(FeedConfig::default()).await;
        let subject = harness.register("b@example.com").await;
        harness
            .store
            .set(
                USERS,
                subject.user_id.as_str(),
                json!({ "email": "b@example.com" }).as_object().unwrap().clone(),
            )
            .await
            .unwrap();
        let applier = crate::OptimisticApplier::new(
            harness.ctx.clone(),
            Arc::new(crate::FeedCache::new()),
        );
        applier.add_post("by b", Tag::Therapy).await.unwrap();
        harness.register("a@example.com").await;

        let mut page = load_profile(&harness.ctx, resolver(&harness), &subject.user_id)
            .await
            .unwrap()
            .unwrap();
        let doc = harness
            .store
            .get(USERS, subject.user_id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.fields["followers"], json!([]));
        assert_eq!(doc.fields["following"], json!([]));

        assert_eq!(page.follower_count(), 0);
        assert_eq!(page.follow_state(), Some(FollowState::NotFollowing));
        assert_eq!(page.posts.posts(None).len(), 1);

        page.toggle_follow().await.unwrap();
        assert_eq!(page.follower_count(), 1);
        assert_eq!(page.follow_state(), Some(FollowState::Following));
    }

    #[tokio::test]
    async fn own_profile_has_no_follow_button() {
        let harness = Harness::new(FeedConfig::default()).await;
        let session = harness.register("a@example.com").await;
        let mut page = load_profile(&harness.ctx, resolver(&harness), &session.user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.follow_state(), None);
        assert_eq!(page.toggle_follow().await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_profile_is_none() {
        let harness = Harness::new(FeedConfig::default()).await;
        let nobody = UserId::from_string("nobody".to_string()).unwrap();
        assert!(load_profile(&harness.ctx, resolver(&harness), &nobody)
            .await
            .unwrap()
            .is_none());
    }
}
