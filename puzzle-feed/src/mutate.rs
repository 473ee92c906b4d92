use chrono::{SubsecRound, Utc};
use futures::poll;
use log::{debug, info, warn};
use puzzle_auth::Session;
use puzzle_db::{Query, Update};
use puzzle_msg::{
    Comment, CommentKey, CommentReaction, Post, PostContent, PostId, PostReaction, UserProfile,
};
use puzzle_push::{dispatch, PushMessage};
use puzzle_ref::{Collection, Tag};
use serde_json::{json, Value};
use std::{fmt, future::Future, sync::Arc, task::Poll};
use thiserror::Error as ThisError;
use tokio::task::JoinHandle;

use crate::{AppContext, Error, FeedCache, PatchTicket, RollbackPolicy};

const POSTS: &str = Collection::Posts.as_str();
const USERS: &str = Collection::Users.as_str();

pub const NEW_POST_TITLE: &str = "🧩 New Post in PuzzleTogether!";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationKind {
    AddPost,
    EditPost,
    DeletePost,
    ReactToPost,
    AddComment,
    EditComment,
    DeleteComment,
    ReactToComment,
    ToggleFollow,
    EditProfile,
}

impl MutationKind {
    fn alert(&self) -> &'static str {
        match self {
            MutationKind::AddPost => "Couldn't share your post.",
            MutationKind::EditPost => "Could not update post",
            MutationKind::DeletePost => "Couldn't delete post",
            MutationKind::ReactToPost => "Could not react to post",
            MutationKind::AddComment => "Couldn't post your comment.",
            MutationKind::EditComment => "Failed to edit comment",
            MutationKind::DeleteComment => "Failed to delete comment",
            MutationKind::ReactToComment => "Could not react to comment",
            MutationKind::ToggleFollow => "Failed to update follow status",
            MutationKind::EditProfile => "Update failed",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self {
            MutationKind::AddPost => "add post",
            MutationKind::EditPost => "edit post",
            MutationKind::DeletePost => "delete post",
            MutationKind::ReactToPost => "react to post",
            MutationKind::AddComment => "add comment",
            MutationKind::EditComment => "edit comment",
            MutationKind::DeleteComment => "delete comment",
            MutationKind::ReactToComment => "react to comment",
            MutationKind::ToggleFollow => "update follow status",
            MutationKind::EditProfile => "update profile",
        };
        f.write_str(action)
    }
}

/// The result of a remote mutation that did not go through.
#[derive(Debug, ThisError)]
#[error("Failed to {kind}, cause: {source}")]
pub struct MutationError {
    pub kind: MutationKind,
    #[source]
    pub source: Error,
}

impl MutationError {
    pub fn new(kind: MutationKind, source: Error) -> Self {
        Self { kind, source }
    }

    /// Text for the blocking alert shown to the user.
    pub fn alert(&self) -> String {
        match &self.source {
            Error::Auth(err) => err.to_string(),
            Error::NotSignedIn | Error::Forbidden | Error::SelfFollow => {
                self.source.to_string()
            }
            _ => self.kind.alert().to_string(),
        }
    }

    /// The target vanished before the write; nothing is shown to the user.
    pub fn is_silent(&self) -> bool {
        self.source.is_not_found()
    }
}

/// Runs `work` and tags its failure with `kind`, logging it once.
pub(crate) async fn run<T, W>(kind: MutationKind, work: W) -> Result<T, MutationError>
where
    W: Future<Output = Result<T, Error>>,
{
    work.await.map_err(|source| {
        let err = MutationError::new(kind, source);
        if err.is_silent() {
            debug!("{}", err);
        } else {
            warn!("{}", err);
        }
        err
    })
}

/// Issues each remote write, patches the feed cache, then waits for the write to settle.
#[derive(Clone)]
pub struct OptimisticApplier {
    ctx: AppContext,
    cache: Arc<FeedCache>,
}

impl OptimisticApplier {
    pub fn new(ctx: AppContext, cache: Arc<FeedCache>) -> Self {
        Self { ctx, cache }
    }

    pub fn cache(&self) -> &Arc<FeedCache> {
        &self.cache
    }

    pub async fn add_post(&self, text: &str, tag: Tag) -> Result<PostId, MutationError> {
        run(MutationKind::AddPost, self.try_add_post(text, tag)).await
    }

    /// Only the author may edit.
    pub async fn edit_post(&self, id: &PostId, text: &str) -> Result<(), MutationError> {
        run(MutationKind::EditPost, self.try_edit_post(id, text)).await
    }

    /// Marks the post deleted. The document itself stays in the store.
    pub async fn delete_post(&self, id: &PostId) -> Result<(), MutationError> {
        run(MutationKind::DeletePost, self.try_delete_post(id)).await
    }

    pub async fn react_to_post(
        &self,
        id: &PostId,
        reaction: PostReaction,
    ) -> Result<(), MutationError> {
        run(MutationKind::ReactToPost, self.try_react_to_post(id, reaction)).await
    }

    pub async fn add_comment(&self, id: &PostId, text: &str) -> Result<CommentKey, MutationError> {
        run(MutationKind::AddComment, self.try_add_comment(id, text)).await
    }

    pub async fn edit_comment(
        &self,
        id: &PostId,
        key: &CommentKey,
        text: &str,
    ) -> Result<(), MutationError> {
        let work = self.rewrite_comments(id, key, true, |content| content.edit_comment(key, text));
        run(MutationKind::EditComment, work).await
    }

    pub async fn delete_comment(&self, id: &PostId, key: &CommentKey) -> Result<(), MutationError> {
        let work = self.rewrite_comments(id, key, true, |content| {
            content.remove_comment(key).map(|_| ())
        });
        run(MutationKind::DeleteComment, work).await
    }

    pub async fn react_to_comment(
        &self,
        id: &PostId,
        key: &CommentKey,
        reaction: CommentReaction,
    ) -> Result<(), MutationError> {
        let work = self.rewrite_comments(id, key, false, |content| {
            content.react_to_comment(key, reaction)
        });
        run(MutationKind::ReactToComment, work).await
    }

    async fn try_add_post(&self, text: &str, tag: Tag) -> Result<PostId, Error> {
        let session = self.ctx.session()?;
        let content = PostContent::new(
            &session.email,
            session.user_id.clone(),
            text,
            tag,
            Utc::now().trunc_subsecs(3),
        )?;
        let post = Post {
            id: PostId::generate(),
            content,
        };
        let fields = post.to_fields()?;

        let write = self.ctx.store.create(POSTS, Some(post.id.as_str()), fields);
        let (ticket, result) = issue_then_patch(write, || self.cache.insert(post.clone())).await;
        self.settle(ticket, result)?;
        info!("{} posted {} under {}", session.email, post.id, tag);

        if self.ctx.config.notify_on_post {
            self.notify_new_post(&session).await;
        }
        Ok(post.id)
    }

    async fn try_edit_post(&self, id: &PostId, text: &str) -> Result<(), Error> {
        let post = self.load_own_post(id).await?;
        let mut edited = post.content;
        edited.set_text(text)?;

        let update = Update::new().set("text", json!(edited.text));
        let write = self.ctx.store.update(POSTS, id.as_str(), &update);
        let (ticket, result) = issue_then_patch(write, || {
            self.cache.patch(id, |content| content.text = edited.text.clone())
        })
        .await;
        self.settle(ticket, result)
    }

    async fn try_delete_post(&self, id: &PostId) -> Result<(), Error> {
        self.load_own_post(id).await?;

        let update = Update::new().set("deleted", json!(true));
        let write = self.ctx.store.update(POSTS, id.as_str(), &update);
        let (ticket, result) = issue_then_patch(write, || self.cache.remove(id)).await;
        self.settle(ticket, result)
    }

    async fn try_react_to_post(&self, id: &PostId, reaction: PostReaction) -> Result<(), Error> {
        self.ctx.session()?;

        let update = Update::new().increment(&format!("reactions.{}", reaction.emoji()), 1);
        let write = self.ctx.store.update(POSTS, id.as_str(), &update);
        let (ticket, result) = issue_then_patch(write, || {
            self.cache.patch(id, |content| content.react(reaction))
        })
        .await;
        self.settle(ticket, result)
    }

    async fn try_add_comment(&self, id: &PostId, text: &str) -> Result<CommentKey, Error> {
        let session = self.ctx.session()?;
        let avatar = match self.ctx.store.get(USERS, session.user_id.as_str()).await? {
            Some(doc) => UserProfile::from_fields(&doc.id, doc.fields)
                .map(|profile| profile.content.avatar_url)
                .unwrap_or_default(),
            None => String::new(),
        };
        let comment = Comment::new(
            &session.email,
            session.user_id.clone(),
            &avatar,
            text,
            Utc::now().trunc_subsecs(3),
        )?;
        self.load_post(id).await?;

        let key = comment.key();
        let update = Update::new().array_union("comments", to_value(&comment)?);
        let write = self.ctx.store.update(POSTS, id.as_str(), &update);
        let (ticket, result) = issue_then_patch(write, || {
            self.cache.patch(id, |content| content.push_comment(comment.clone()))
        })
        .await;
        self.settle(ticket, result)?;
        Ok(key)
    }

    // Comments live inside the post, so every change rewrites the whole sequence.
    async fn rewrite_comments<F>(
        &self,
        id: &PostId,
        key: &CommentKey,
        author_only: bool,
        edit: F,
    ) -> Result<(), Error>
    where
        F: Fn(&mut PostContent) -> Result<(), puzzle_msg::Error>,
    {
        let session = self.ctx.session()?;
        let mut post = self.load_post(id).await?;
        if author_only {
            let comment = post
                .content
                .find_comment(key)
                .ok_or(puzzle_msg::Error::CommentNotFound)?;
            if !comment.is_authored_by(&session.user_id, &session.email) {
                return Err(Error::Forbidden);
            }
        }
        edit(&mut post.content)?;

        let update = Update::new().set("comments", to_value(&post.content.comments)?);
        let write = self.ctx.store.update(POSTS, id.as_str(), &update);
        let (ticket, result) = issue_then_patch(write, || {
            self.cache.patch(id, |content| {
                if let Err(err) = edit(content) {
                    debug!("cached post {} not patched: {}", id, err);
                }
            })
        })
        .await;
        self.settle(ticket, result)
    }

    /// Fans a notification out to every other user with a push token.
    ///
    /// Sends run in the background; the handles may be dropped or awaited.
    pub async fn notify_new_post(&self, author: &Session) -> Vec<JoinHandle<()>> {
        let users = match self.ctx.store.query(&Query::collection(USERS)).await {
            Ok(users) => users,
            Err(err) => {
                warn!("not notifying about new post, cause: {}", err);
                return Vec::new();
            }
        };

        let body = format!("{} just posted in PuzzleTogether!", author.email);
        let mut sent = Vec::new();
        for doc in users {
            if doc.id == author.user_id.as_str() {
                continue;
            }
            let profile = match UserProfile::from_fields(&doc.id, doc.fields) {
                Ok(profile) => profile,
                Err(err) => {
                    warn!("skipping unreadable user {}: {}", doc.id, err);
                    continue;
                }
            };
            if profile.content.email == author.email.as_str() {
                continue;
            }
            if let Some(to) = profile.content.push_token() {
                sent.push(dispatch(
                    self.ctx.push.clone(),
                    PushMessage {
                        to,
                        title: NEW_POST_TITLE.to_string(),
                        body: body.clone(),
                        data: json!({ "screen": "Feed" }),
                    },
                ));
            }
        }
        debug!("notified {} users about new post", sent.len());
        sent
    }

    async fn load_post(&self, id: &PostId) -> Result<Post, Error> {
        let doc = self
            .ctx
            .store
            .get(POSTS, id.as_str())
            .await?
            .ok_or_else(|| Error::NotFound {
                collection: POSTS,
                id: id.to_string(),
            })?;
        Ok(Post::from_fields(&doc.id, doc.fields)?)
    }

    async fn load_own_post(&self, id: &PostId) -> Result<Post, Error> {
        let session = self.ctx.session()?;
        let post = self.load_post(id).await?;
        if post.content.author_id != session.user_id {
            return Err(Error::Forbidden);
        }
        Ok(post)
    }

    fn settle<T>(
        &self,
        ticket: Option<PatchTicket>,
        result: Result<T, puzzle_db::Error>,
    ) -> Result<T, Error> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                if let (RollbackPolicy::Revert, Some(ticket)) = (self.ctx.config.rollback, ticket) {
                    let post_id = ticket.post_id().clone();
                    if self.cache.revert(ticket) {
                        debug!("reverted optimistic patch on {}", post_id);
                    }
                }
                Err(err.into())
            }
        }
    }
}

/// Polls `write` once so the request is on its way, applies the local patch, then waits
/// for the write to finish.
async fn issue_then_patch<T, W, P>(
    write: W,
    patch: P,
) -> (Option<PatchTicket>, Result<T, puzzle_db::Error>)
where
    W: Future<Output = Result<T, puzzle_db::Error>>,
    P: FnOnce() -> Option<PatchTicket>,
{
    let mut write = Box::pin(write);
    let issued = poll!(write.as_mut());
    let ticket = patch();
    let result = match issued {
        Poll::Ready(result) => result,
        Poll::Pending => write.await,
    };
    (ticket, result)
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, puzzle_msg::Error> {
    Ok(serde_json::to_value(value)?)
}
