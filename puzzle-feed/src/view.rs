use itertools::Itertools;
use log::{debug, info, warn};
use puzzle_db::{Direction, Document, Query, Subscription};
use puzzle_msg::Post;
use puzzle_ref::{Collection, Tag, UserId};
use serde_json::json;
use std::sync::Arc;

use crate::{AppContext, Error, FeedCache, FeedSnapshot, OptimisticApplier, ProfileResolver};

/// Which posts a view follows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedScope {
    All,
    ByAuthor(UserId),
}

impl FeedScope {
    fn query(&self) -> Query {
        let query = Query::collection(Collection::Posts.as_str());
        let query = match self {
            FeedScope::All => query,
            FeedScope::ByAuthor(author) => query.where_eq("authorId", json!(author)),
        };
        query.order_by("createdAt", Direction::Descending)
    }
}

/// A live feed: one subscription feeding one cache.
///
/// The subscription is cancelled exactly once, by [`FeedView::close`] or on drop.
pub struct FeedView {
    scope: FeedScope,
    subscription: Subscription,
    cache: Arc<FeedCache>,
    applier: OptimisticApplier,
    profiles: Arc<ProfileResolver>,
}

impl FeedView {
    /// Subscribes and waits for the first result set.
    pub async fn open(
        ctx: &AppContext,
        profiles: Arc<ProfileResolver>,
        scope: FeedScope,
    ) -> Result<Self, Error> {
        let subscription = ctx.store.subscribe(scope.query()).await?;
        let cache = Arc::new(FeedCache::new());
        info!("feed view opened on {:?}", scope);

        let mut view = Self {
            scope,
            subscription,
            applier: OptimisticApplier::new(ctx.clone(), cache.clone()),
            cache,
            profiles,
        };
        view.sync_next().await;
        Ok(view)
    }

    /// Waits for the next push and makes it the cache contents.
    ///
    /// `None` once the view is closed. Comment authors of the new posts are resolved
    /// before returning.
    pub async fn sync_next(&mut self) -> Option<Arc<FeedSnapshot>> {
        let documents = self.subscription.next().await?;
        self.apply(documents).await
    }

    /// Applies a push that already arrived, without waiting. Returns how many were applied.
    pub async fn sync_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Some(documents) = self.subscription.try_next() {
            self.apply(documents).await;
            applied += 1;
        }
        applied
    }

    async fn apply(&self, documents: Vec<Document>) -> Option<Arc<FeedSnapshot>> {
        let posts: Vec<Post> = documents
            .into_iter()
            .filter_map(|doc| match Post::from_fields(&doc.id, doc.fields) {
                Ok(post) => Some(post),
                Err(err) => {
                    warn!("skipping unreadable post {}: {}", doc.id, err);
                    None
                }
            })
            .collect();

        let authors: Vec<UserId> = posts
            .iter()
            .flat_map(|post| post.content.comments.iter())
            .filter_map(|comment| comment.author_id.clone())
            .unique()
            .collect();

        let snapshot = self.cache.replace(posts)?;
        debug!("prefetching {} comment authors", authors.len());
        self.profiles.prefetch(authors).await;
        Some(snapshot)
    }

    /// Posts to render: soft-deleted ones are hidden, optionally narrowed to one tag.
    pub fn posts(&self, tag: Option<Tag>) -> Vec<Post> {
        self.cache
            .snapshot()
            .posts
            .iter()
            .filter(|post| !post.content.deleted)
            .filter(|post| tag.map_or(true, |tag| post.content.tag == tag))
            .cloned()
            .collect()
    }

    pub fn scope(&self) -> &FeedScope {
        &self.scope
    }

    pub fn cache(&self) -> &Arc<FeedCache> {
        &self.cache
    }

    pub fn mutations(&self) -> &OptimisticApplier {
        &self.applier
    }

    pub fn profiles(&self) -> &Arc<ProfileResolver> {
        &self.profiles
    }

    pub fn is_open(&self) -> bool {
        self.subscription.is_active()
    }

    /// Stops delivery and freezes the cache. Safe to call more than once.
    pub fn close(&mut self) {
        if self.subscription.is_active() {
            info!("feed view closed on {:?}", self.scope);
        }
        self.subscription.unsubscribe();
        self.cache.close();
    }
}

impl Drop for FeedView {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{testing::Harness, FeedConfig};
    use puzzle_db::DocumentStore;
    use puzzle_msg::PostReaction;

    async fn open(harness: &Harness, scope: FeedScope) -> FeedView {
        let profiles = Arc::new(ProfileResolver::new(harness.ctx.store.clone()));
        FeedView::open(&harness.ctx, profiles, scope).await.unwrap()
    }

    #[tokio::test]
    async fn empty_feed_is_not_an_error() {
        let harness = Harness::new(FeedConfig::default()).await;
        let view = open(&harness, FeedScope::All).await;
        assert!(view.posts(None).is_empty());
        assert!(view.is_open());
    }

    #[tokio::test]
    async fn pushes_replace_optimistic_state() {
        let harness = Harness::new(FeedConfig::default()).await;
        harness.register("a@example.com").await;
        let mut view = open(&harness, FeedScope::All).await;

        let id = view.mutations().add_post("Hello", Tag::Win).await.unwrap();
        assert_eq!(view.posts(None).len(), 1);

        harness.store.fail_writes_to("posts", id.as_str());
        view.mutations()
            .react_to_post(&id, PostReaction::Heart)
            .await
            .unwrap_err();
        assert_eq!(view.posts(None)[0].content.total_reactions(), 1);

        let snapshot = view.sync_next().await.unwrap();
        assert_eq!(snapshot.posts[0].content.total_reactions(), 0);
        assert_eq!(view.posts(None)[0].content.total_reactions(), 0);
    }

    #[tokio::test]
    async fn filters_by_tag_and_hides_deleted() {
        let harness = Harness::new(FeedConfig::default()).await;
        harness.register("a@example.com").await;
        let mut view = open(&harness, FeedScope::All).await;

        let win = view.mutations().add_post("A win", Tag::Win).await.unwrap();
        view.mutations().add_post("Hard one", Tag::HardDay).await.unwrap();
        let gone = view.mutations().add_post("Gone", Tag::Win).await.unwrap();
        view.mutations().delete_post(&gone).await.unwrap();
        view.sync_pending().await;

        let wins = view.posts(Some(Tag::Win));
        assert_eq!(wins.len(), 1);
        assert_eq!(wins[0].id, win);
        assert_eq!(view.posts(None).len(), 2);
        assert_eq!(view.cache().snapshot().posts.len(), 3);
    }

    #[tokio::test]
    async fn author_scope_only_sees_their_posts() {
        let harness = Harness::new(FeedConfig::default()).await;
        let b = harness.register("b@example.com").await;
        let applier = OptimisticApplier::new(harness.ctx.clone(), Arc::new(FeedCache::new()));
        applier.add_post("from b", Tag::Iep).await.unwrap();
        harness.register("a@example.com").await;
        applier.add_post("from a", Tag::Iep).await.unwrap();

        let view = open(&harness, FeedScope::ByAuthor(b.user_id.clone())).await;
        let posts = view.posts(None);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].content.author_id, b.user_id);
    }

    #[tokio::test]
    async fn push_prefetches_comment_authors() {
        let harness = Harness::new(FeedConfig::default()).await;
        let a = harness.register("a@example.com").await;
        let mut view = open(&harness, FeedScope::All).await;
        let id = view.mutations().add_post("Hello", Tag::Win).await.unwrap();
        view.mutations().add_comment(&id, "first").await.unwrap();
        view.mutations().add_comment(&id, "second").await.unwrap();

        view.sync_pending().await;
        let profile = view.profiles().cached(&a.user_id).unwrap().unwrap();
        assert_eq!(profile.content.email, "a@example.com");
    }

    #[tokio::test]
    async fn unreadable_documents_are_skipped() {
        let harness = Harness::new(FeedConfig::default()).await;
        let mut view = open(&harness, FeedScope::All).await;
        harness
            .store
            .set(
                "posts",
                "broken",
                json!({ "createdAt": 5, "text": 3 }).as_object().unwrap().clone(),
            )
            .await
            .unwrap();

        let snapshot = view.sync_next().await.unwrap();
        assert!(snapshot.posts.is_empty());
    }

    #[tokio::test]
    async fn close_stops_delivery_once() {
        let harness = Harness::new(FeedConfig::default()).await;
        harness.register("a@example.com").await;
        let mut view = open(&harness, FeedScope::All).await;
        assert_eq!(harness.store.subscription_count(), 1);

        view.close();
        view.close();
        assert!(!view.is_open());
        assert_eq!(harness.store.subscription_count(), 0);

        let applier = OptimisticApplier::new(harness.ctx.clone(), Arc::new(FeedCache::new()));
        applier.add_post("after close", Tag::Win).await.unwrap();
        assert!(view.sync_next().await.is_none());
        assert!(view.posts(None).is_empty());
    }
}
