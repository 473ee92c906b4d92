use chrono::{DateTime, Utc};
use puzzle_feed::{ProfilePage, ProfileResolver};
use puzzle_msg::{Comment, CommentReaction, Post, PostReaction};
use std::fmt::Write;

pub const TOP_POST_BADGE: &str = "🔥 Top Post";

/// "just now", "1 minute ago", "3 days ago" and so on.
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = now.signed_duration_since(then).num_seconds();
    let (count, unit) = match seconds {
        s if s < 60 => return "just now".to_string(),
        s if s < 60 * 60 => (s / 60, "minute"),
        s if s < 60 * 60 * 24 => (s / (60 * 60), "hour"),
        s if s < 60 * 60 * 24 * 30 => (s / (60 * 60 * 24), "day"),
        s if s < 60 * 60 * 24 * 365 => (s / (60 * 60 * 24 * 30), "month"),
        s => (s / (60 * 60 * 24 * 365), "year"),
    };
    let plural = if count == 1 { "" } else { "s" };
    format!("{} {}{} ago", count, unit, plural)
}

/// Name shown next to a comment: the author's current email when known.
fn comment_author(comment: &Comment, profiles: &ProfileResolver) -> String {
    comment
        .author_id
        .as_ref()
        .and_then(|author_id| profiles.cached(author_id).flatten())
        .map(|profile| profile.content.email)
        .unwrap_or_else(|| comment.author.clone())
}

pub fn post(post: &Post, profiles: &ProfileResolver, now: DateTime<Utc>) -> String {
    let content = &post.content;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "[{}] {} · {} · {}",
        post.id,
        content.author,
        content.tag,
        relative_time(content.created_at, now)
    );
    if content.is_hot() {
        let _ = writeln!(out, "{}", TOP_POST_BADGE);
    }
    let _ = writeln!(out, "{}", content.text);

    let reactions: Vec<String> = PostReaction::ALL
        .iter()
        .map(|reaction| format!("{} {}", reaction, content.reaction_count(*reaction)))
        .collect();
    let _ = writeln!(out, "{}", reactions.join("  "));

    for (position, comment) in content.comments.iter().enumerate() {
        let edited = if comment.edited { " (edited)" } else { "" };
        let reactions: Vec<String> = CommentReaction::ALL
            .iter()
            .filter(|reaction| comment.reaction_count(**reaction) > 0)
            .map(|reaction| format!("{} {}", reaction, comment.reaction_count(*reaction)))
            .collect();
        let _ = write!(
            out,
            "  {}. {}: {}{}",
            position + 1,
            comment_author(comment, profiles),
            comment.text,
            edited
        );
        if !reactions.is_empty() {
            let _ = write!(out, "  {}", reactions.join(" "));
        }
        out.push('\n');
    }
    out
}

pub fn profile(page: &ProfilePage, now: DateTime<Utc>) -> String {
    let content = &page.profile.content;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{} ({}) {}",
        content.email,
        page.profile.id,
        page.profile.id.to_page_url()
    );
    let _ = writeln!(out, "avatar: {}", content.avatar_url);
    if !content.bio.is_empty() {
        let _ = writeln!(out, "{}", content.bio);
    }
    let _ = writeln!(
        out,
        "{} followers · {} following",
        page.follower_count(),
        page.following_count()
    );
    if let Some(state) = page.follow_state() {
        let _ = writeln!(out, "you: {:?}", state);
    }
    for post in page.posts.posts(None) {
        out.push('\n');
        out.push_str(&self::post(&post, page.posts.profiles(), now));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use puzzle_db::SqliteStore;
    use puzzle_msg::PostContent;
    use puzzle_ref::{Email, PostId, Tag, UserId};
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn relative_times() {
        let now = at(1_000_000_000);
        assert_eq!(relative_time(at(1_000_000_000 - 5), now), "just now");
        assert_eq!(relative_time(at(1_000_000_000 + 30), now), "just now");
        assert_eq!(relative_time(at(1_000_000_000 - 60), now), "1 minute ago");
        assert_eq!(relative_time(at(1_000_000_000 - 5 * 60), now), "5 minutes ago");
        assert_eq!(relative_time(at(1_000_000_000 - 3 * 3600), now), "3 hours ago");
        assert_eq!(relative_time(at(1_000_000_000 - 86400), now), "1 day ago");
        assert_eq!(
            relative_time(at(1_000_000_000 - 400 * 86400), now),
            "1 year ago"
        );
    }

    #[tokio::test]
    async fn renders_badge_and_comment_fallback_author() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let profiles = ProfileResolver::new(store);
        let email = Email::from_string("a@example.com".to_string()).unwrap();
        let author_id = UserId::from_string("user-a".to_string()).unwrap();

        let mut content =
            PostContent::new(&email, author_id.clone(), "Big win", Tag::Win, at(100)).unwrap();
        for _ in 0..5 {
            content.react(PostReaction::Heart);
        }
        content.push_comment(
            Comment::new(&email, author_id, "", "So proud", at(120)).unwrap(),
        );
        let post = Post {
            id: PostId::from_string("post-1".to_string()).unwrap(),
            content,
        };

        let out = super::post(&post, &profiles, at(100 + 120));
        assert!(out.starts_with("[post-1] a@example.com · #Win · 2 minutes ago\n"));
        assert!(out.contains(TOP_POST_BADGE));
        assert!(out.contains("💗 5  🌼 0  🔄 0"));
        assert!(out.contains("  1. a@example.com: So proud\n"));
    }
}
