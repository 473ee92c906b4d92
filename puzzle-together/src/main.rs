use clap::Parser;
use futures::future::join_all;
use log::{error, info};
use puzzle_auth::{LocalAuth, Session};
use puzzle_db::SqliteStore;
use puzzle_feed::{
    edit_profile, load_profile, reconcile_follow, register, sign_in, templates, AppContext,
    FeedCache, FeedScope, FeedView, Follow, MutationError, OptimisticApplier, ProfileResolver,
};
use puzzle_msg::{Comment, CommentKey, CommentReaction, Post, PostReaction};
use puzzle_push::{DisabledPush, ExpoPush, PushDispatcher};
use puzzle_ref::{PostId, PushToken, RefError, Tag, UserId};
use std::sync::Arc;
use thiserror::Error as ThisError;

mod config;
mod render;

use config::{Args, Command, CommentCommand, ProfileCommand};

#[derive(Debug, ThisError)]
enum Error {
    #[error("Failed to open database, cause: {0}")]
    Store(#[from] puzzle_db::Error),
    #[error("Failed to open accounts, cause: {0}")]
    Auth(#[from] puzzle_auth::Error),
    #[error("{0}")]
    Feed(#[from] puzzle_feed::Error),
    #[error("{}", .0.alert())]
    Mutation(#[from] MutationError),
    #[error("{0}")]
    Ref(#[from] RefError),
    #[error("Set --email and --password, or PUZZLE_EMAIL and PUZZLE_PASSWORD")]
    MissingCredentials,
    #[error("Post {0} not found")]
    PostNotFound(PostId),
    #[error("Comment {0} not found")]
    CommentNotFound(String),
    #[error("No story template matches {0}")]
    UnknownTemplate(String),
    #[error("Nothing to post")]
    EmptyPost,
    #[error("Database failed its integrity check")]
    Corrupt,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Error> {
    if let Command::Templates = args.command {
        for template in templates::TEMPLATES {
            println!("{}. {}\n   {}", template.id, template.title, template.content);
        }
        return Ok(());
    }

    let store = Arc::new(SqliteStore::new(&args.db).await?);
    if let Command::Check = args.command {
        if !store.check_integrity().await? {
            return Err(Error::Corrupt);
        }
        println!("ok");
        return Ok(());
    }

    let auth = Arc::new(LocalAuth::new(&args.db).await?);
    let push: Arc<dyn PushDispatcher> = if args.no_push {
        Arc::new(DisabledPush)
    } else {
        Arc::new(ExpoPush::new(args.expo_config()))
    };
    let ctx = AppContext::new(store, auth, push, args.feed_config());
    let (email, password) = credentials(&args)?;

    if let Command::Register { push_token } = &args.command {
        let push_token = push_token.clone().map(PushToken::from_string).transpose()?;
        let session = register(&ctx, email, password, push_token.as_ref()).await?;
        println!("Registered {} as {}", session.email, session.user_id);
        return Ok(());
    }

    let session = sign_in(&ctx, email, password).await?;
    info!("signed in as {}", session.email);
    let profiles = Arc::new(ProfileResolver::new(ctx.store.clone()));

    match args.command.clone() {
        Command::Post {
            text,
            tag,
            template,
        } => {
            let text = match (text, template) {
                (Some(text), _) => text,
                (None, Some(template)) => templates::find(&template)
                    .ok_or(Error::UnknownTemplate(template))?
                    .content
                    .to_string(),
                (None, None) => return Err(Error::EmptyPost),
            };
            let tag = Tag::from_string(tag)?;
            let applier = OptimisticApplier::new(ctx.clone(), Arc::new(FeedCache::new()));
            let id = applier.add_post(&text, tag).await?;
            println!("Posted {} at {}", id, id.to_page_url());
            if !args.no_push {
                join_all(applier.notify_new_post(&session).await).await;
            }
        }
        Command::Feed { tag } => {
            let tag = tag.map(Tag::from_string).transpose()?;
            let view = FeedView::open(&ctx, profiles, FeedScope::All).await?;
            let posts = view.posts(tag);
            if posts.is_empty() {
                println!("No posts yet.");
            }
            let now = chrono::Utc::now();
            for post in posts {
                println!("{}", render::post(&post, view.profiles(), now));
            }
        }
        Command::EditPost { post, text } => {
            let id = PostId::from_string(post)?;
            let applier = OptimisticApplier::new(ctx.clone(), Arc::new(FeedCache::new()));
            report(quietly(applier.edit_post(&id, &text).await)?, "Post updated");
        }
        Command::DeletePost { post } => {
            let id = PostId::from_string(post)?;
            let applier = OptimisticApplier::new(ctx.clone(), Arc::new(FeedCache::new()));
            report(quietly(applier.delete_post(&id).await)?, "Post deleted");
        }
        Command::React { post, reaction } => {
            let id = PostId::from_string(post)?;
            let reaction: PostReaction = reaction.parse()?;
            let applier = OptimisticApplier::new(ctx.clone(), Arc::new(FeedCache::new()));
            report(quietly(applier.react_to_post(&id, reaction).await)?, reaction.emoji());
        }
        Command::Comment { action } => comment(&ctx, profiles, action).await?,
        Command::Follow { user } => {
            let subject = UserId::from_string(user)?;
            let mut follow = match Follow::load(&ctx, &subject).await {
                Ok(follow) => follow,
                Err(err) if err.is_not_found() => {
                    println!("No profile found for {}", subject);
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            let state = follow.toggle().await?;
            println!("{:?} {}", state, subject);
        }
        Command::Reconcile { user } => {
            let subject = UserId::from_string(user)?;
            let state = reconcile_follow(&ctx, &session.user_id, &subject).await?;
            println!("{:?} {}", state, subject);
        }
        Command::Profile { action } => profile(&ctx, &session, profiles, action).await?,
        Command::Register { .. } | Command::Templates | Command::Check => {}
    }
    Ok(())
}

fn credentials(args: &Args) -> Result<(&str, &str), Error> {
    match (&args.email, &args.password) {
        (Some(email), Some(password)) => Ok((email, password)),
        _ => Err(Error::MissingCredentials),
    }
}

/// A mutation whose target vanished is not an error to the user.
fn quietly<T>(result: Result<T, MutationError>) -> Result<Option<T>, Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_silent() => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn report<T>(done: Option<T>, message: &str) {
    if done.is_some() {
        println!("{}", message);
    }
}

async fn comment(
    ctx: &AppContext,
    profiles: Arc<ProfileResolver>,
    action: CommentCommand,
) -> Result<(), Error> {
    let view = FeedView::open(ctx, profiles, FeedScope::All).await?;
    let mutations = view.mutations();

    match action {
        CommentCommand::Add { post, text } => {
            let id = PostId::from_string(post)?;
            report(quietly(mutations.add_comment(&id, &text).await)?, "Comment added");
        }
        CommentCommand::Edit {
            post,
            comment,
            text,
        } => {
            let (id, key) = locate_comment(&view, post, &comment)?;
            report(
                quietly(mutations.edit_comment(&id, &key, &text).await)?,
                "Comment updated",
            );
        }
        CommentCommand::Delete { post, comment } => {
            let (id, key) = locate_comment(&view, post, &comment)?;
            report(
                quietly(mutations.delete_comment(&id, &key).await)?,
                "Comment deleted",
            );
        }
        CommentCommand::React {
            post,
            comment,
            reaction,
        } => {
            let reaction: CommentReaction = reaction.parse()?;
            let (id, key) = locate_comment(&view, post, &comment)?;
            report(
                quietly(mutations.react_to_comment(&id, &key, reaction).await)?,
                reaction.emoji(),
            );
        }
    }
    Ok(())
}

fn locate_comment(
    view: &FeedView,
    post: String,
    selector: &str,
) -> Result<(PostId, CommentKey), Error> {
    let id = PostId::from_string(post)?;
    let snapshot = view.cache().snapshot();
    let post = snapshot
        .get(&id)
        .ok_or_else(|| Error::PostNotFound(id.clone()))?;
    let key = comment_key(post, selector)?;
    Ok((id, key))
}

/// Finds a comment by its 1-based position or by its id.
fn comment_key(post: &Post, selector: &str) -> Result<CommentKey, Error> {
    let comments = &post.content.comments;
    let found = match selector.parse::<usize>() {
        Ok(position) if position >= 1 => comments.get(position - 1),
        _ => comments
            .iter()
            .find(|comment| comment.id.as_ref().map(|id| id.as_str()) == Some(selector)),
    };
    found
        .map(Comment::key)
        .ok_or_else(|| Error::CommentNotFound(selector.to_string()))
}

async fn profile(
    ctx: &AppContext,
    session: &Session,
    profiles: Arc<ProfileResolver>,
    action: ProfileCommand,
) -> Result<(), Error> {
    match action {
        ProfileCommand::Show { user } => {
            let user_id = match user {
                Some(user) => UserId::from_string(user)?,
                None => session.user_id.clone(),
            };
            match load_profile(ctx, profiles, &user_id).await? {
                Some(page) => println!("{}", render::profile(&page, chrono::Utc::now())),
                None => println!("No profile found for {}", user_id),
            }
        }
        ProfileCommand::Edit { avatar_url, bio } => {
            edit_profile(ctx, &profiles, avatar_url.as_deref(), bio.as_deref()).await?;
            println!("Profile updated");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use puzzle_msg::PostContent;
    use puzzle_ref::Email;

    #[test]
    fn comments_are_found_by_position_or_id() {
        let email = Email::from_string("a@example.com".to_string()).unwrap();
        let author_id = UserId::from_string("user-a".to_string()).unwrap();
        let now = chrono::Utc.timestamp_opt(100, 0).unwrap();
        let mut content = PostContent::new(&email, author_id.clone(), "Hi", Tag::Win, now).unwrap();
        let first = Comment::new(&email, author_id.clone(), "", "one", now).unwrap();
        let second = Comment::new(&email, author_id, "", "two", now).unwrap();
        content.push_comment(first.clone());
        content.push_comment(second.clone());
        let post = Post {
            id: PostId::from_string("post-1".to_string()).unwrap(),
            content,
        };

        assert_eq!(comment_key(&post, "2").unwrap(), second.key());
        let id = first.id.clone().unwrap();
        assert_eq!(comment_key(&post, id.as_str()).unwrap(), first.key());
        assert!(matches!(
            comment_key(&post, "3"),
            Err(Error::CommentNotFound(_))
        ));
    }
}
