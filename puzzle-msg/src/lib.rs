use chrono::{serde::ts_milliseconds, DateTime, Utc};
use indexmap::IndexSet;
use log::warn;
use puzzle_ref::{CommentId, Email, PushToken, RefError, Tag, UserId};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{serde_as, DefaultOnError, VecSkipError};
use std::{collections::BTreeMap, fmt, str::FromStr};
use thiserror::Error as ThisError;

pub use puzzle_ref::PostId;

/// A post is "hot" once its reactions add up to this many.
pub const HOT_THRESHOLD: u64 = 5;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Invalid document id, cause: {0}")]
    Id(#[from] RefError),
    #[error("Invalid document content, cause: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Document content is not an object")]
    NotAnObject,
    #[error("Comment not found")]
    CommentNotFound,
    #[error("Text is empty")]
    EmptyText,
}

/// A document as read from the store: its id plus typed content.
#[derive(Clone, Debug, PartialEq)]
pub struct Doc<Id, Content> {
    pub id: Id,
    pub content: Content,
}

pub type Post = Doc<PostId, PostContent>;
pub type UserProfile = Doc<UserId, ProfileContent>;

impl<Id, Content> Doc<Id, Content>
where
    Id: TryFrom<String, Error = RefError>,
    Content: DeserializeOwned + Serialize,
{
    pub fn from_fields(id: &str, fields: Map<String, Value>) -> Result<Self, Error> {
        let id = Id::try_from(id.to_string())?;
        let content = serde_json::from_value(Value::Object(fields))?;
        Ok(Self { id, content })
    }

    pub fn to_fields(&self) -> Result<Map<String, Value>, Error> {
        content_to_fields(&self.content)
    }
}

pub fn content_to_fields<Content: Serialize>(
    content: &Content,
) -> Result<Map<String, Value>, Error> {
    match serde_json::to_value(content)? {
        Value::Object(fields) => Ok(fields),
        _ => Err(Error::NotAnObject),
    }
}

macro_rules! reaction_enum {
    ($name:ident { $($variant:ident => ($emoji:literal, $word:literal)),+ $(,)? }) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn emoji(&self) -> &'static str {
                match self {
                    $($name::$variant => $emoji),+
                }
            }

            pub fn word(&self) -> &'static str {
                match self {
                    $($name::$variant => $word),+
                }
            }

            /// Counter map a freshly created target starts with.
            pub fn zeroed() -> BTreeMap<String, u64> {
                Self::ALL.iter().map(|r| (r.emoji().to_string(), 0)).collect()
            }
        }

        impl FromStr for $name {
            type Err = RefError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|r| r.emoji() == s || r.word().eq_ignore_ascii_case(s))
                    .ok_or_else(|| RefError::BadFormat {
                        ref_type: stringify!($name),
                        input: s.to_string(),
                    })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.emoji())
            }
        }
    };
}

reaction_enum!(PostReaction {
    Heart => ("💗", "heart"),
    Blossom => ("🌼", "blossom"),
    Repeat => ("🔄", "repeat"),
});

reaction_enum!(CommentReaction {
    Heart => ("💗", "heart"),
    Pray => ("🙏", "pray"),
    Hug => ("🤗", "hug"),
});

#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostContent {
    pub author: String,
    pub author_id: UserId,
    pub text: String,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub tag: Tag,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub reactions: BTreeMap<String, u64>,
    #[serde_as(deserialize_as = "DefaultOnError<VecSkipError<_>>")]
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub deleted: bool,
}

impl PostContent {
    pub fn new(
        author: &Email,
        author_id: UserId,
        text: &str,
        tag: Tag,
        now: DateTime<Utc>,
    ) -> Result<Self, Error> {
        let text = non_empty(text)?;
        Ok(Self {
            author: author.to_string(),
            author_id,
            text,
            tag,
            created_at: now,
            reactions: PostReaction::zeroed(),
            comments: Vec::new(),
            deleted: false,
        })
    }

    pub fn total_reactions(&self) -> u64 {
        self.reactions.values().sum()
    }

    /// Derived on every call from the current counters, never stored.
    pub fn is_hot(&self) -> bool {
        self.total_reactions() >= HOT_THRESHOLD
    }

    pub fn reaction_count(&self, reaction: PostReaction) -> u64 {
        self.reactions.get(reaction.emoji()).copied().unwrap_or(0)
    }

    pub fn react(&mut self, reaction: PostReaction) {
        *self.reactions.entry(reaction.emoji().to_string()).or_insert(0) += 1;
    }

    pub fn set_text(&mut self, text: &str) -> Result<(), Error> {
        self.text = non_empty(text)?;
        Ok(())
    }

    pub fn push_comment(&mut self, comment: Comment) {
        self.comments.push(comment);
    }

    pub fn find_comment(&self, key: &CommentKey) -> Option<&Comment> {
        self.comments.iter().find(|comment| comment.matches(key))
    }

    pub fn edit_comment(&mut self, key: &CommentKey, text: &str) -> Result<(), Error> {
        let text = non_empty(text)?;
        let comment = self
            .comments
            .iter_mut()
            .find(|comment| comment.matches(key))
            .ok_or(Error::CommentNotFound)?;
        comment.text = text;
        comment.edited = true;
        Ok(())
    }

    /// Removes the first comment matching `key` and leaves every other entry in place.
    ///
    /// Comments written before ids existed are matched on (author, text, second); two such
    /// comments with identical values cannot be told apart, and only the first is removed.
    pub fn remove_comment(&mut self, key: &CommentKey) -> Result<Comment, Error> {
        let mut matching = self
            .comments
            .iter()
            .enumerate()
            .filter(|(_, comment)| comment.matches(key))
            .map(|(index, _)| index);
        let index = matching.next().ok_or(Error::CommentNotFound)?;
        if matching.next().is_some() {
            warn!("ambiguous comment match for {:?}, removing the first", key);
        }
        Ok(self.comments.remove(index))
    }

    pub fn react_to_comment(
        &mut self,
        key: &CommentKey,
        reaction: CommentReaction,
    ) -> Result<(), Error> {
        let comment = self
            .comments
            .iter_mut()
            .find(|comment| comment.matches(key))
            .ok_or(Error::CommentNotFound)?;
        *comment
            .reactions
            .entry(reaction.emoji().to_string())
            .or_insert(0) += 1;
        Ok(())
    }
}

/// How a comment inside a post's sequence is addressed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommentKey {
    Id(CommentId),
    Legacy {
        author: String,
        text: String,
        created_at_secs: i64,
    },
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CommentId>,
    pub author: String,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<UserId>,
    #[serde(default)]
    pub avatar: String,
    pub text: String,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub reactions: BTreeMap<String, u64>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub edited: bool,
}

impl Comment {
    pub fn new(
        author: &Email,
        author_id: UserId,
        avatar: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, Error> {
        let text = non_empty(text)?;
        let avatar = if avatar.starts_with("http") {
            avatar.to_string()
        } else {
            String::new()
        };
        Ok(Self {
            id: Some(CommentId::generate()),
            author: author.to_string(),
            author_id: Some(author_id),
            avatar,
            text,
            created_at: now,
            reactions: CommentReaction::zeroed(),
            edited: false,
        })
    }

    pub fn key(&self) -> CommentKey {
        match &self.id {
            Some(id) => CommentKey::Id(id.clone()),
            None => CommentKey::Legacy {
                author: self.author.clone(),
                text: self.text.clone(),
                created_at_secs: self.created_at.timestamp(),
            },
        }
    }

    pub fn matches(&self, key: &CommentKey) -> bool {
        match key {
            CommentKey::Id(id) => self.id.as_ref() == Some(id),
            CommentKey::Legacy {
                author,
                text,
                created_at_secs,
            } => {
                &self.author == author
                    && &self.text == text
                    && self.created_at.timestamp() == *created_at_secs
            }
        }
    }

    /// Older comments only carry the author's email.
    pub fn is_authored_by(&self, user_id: &UserId, email: &Email) -> bool {
        match &self.author_id {
            Some(author_id) => author_id == user_id,
            None => self.author == email.as_str(),
        }
    }

    pub fn reaction_count(&self, reaction: CommentReaction) -> u64 {
        self.reactions.get(reaction.emoji()).copied().unwrap_or(0)
    }
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileContent {
    pub email: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub push_token: String,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub followers: IndexSet<UserId>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub following: IndexSet<UserId>,
}

impl ProfileContent {
    pub fn new(email: &Email, push_token: Option<&PushToken>) -> Self {
        Self {
            email: email.to_string(),
            avatar_url: email.to_avatar_url(),
            bio: String::new(),
            push_token: push_token.map(|t| t.to_string()).unwrap_or_default(),
            followers: IndexSet::new(),
            following: IndexSet::new(),
        }
    }

    pub fn push_token(&self) -> Option<PushToken> {
        if self.push_token.is_empty() {
            return None;
        }
        match PushToken::from_string(self.push_token.clone()) {
            Ok(token) => Some(token),
            Err(err) => {
                warn!("ignoring stored push token: {}", err);
                None
            }
        }
    }

    pub fn is_following(&self, user_id: &UserId) -> bool {
        self.following.contains(user_id)
    }

    /// Names of follow-list fields absent from (or not lists in) a stored user document.
    pub fn missing_follow_lists(fields: &Map<String, Value>) -> Vec<&'static str> {
        ["followers", "following"]
            .into_iter()
            .filter(|name| !matches!(fields.get(*name), Some(Value::Array(_))))
            .collect()
    }
}

fn non_empty(text: &str) -> Result<String, Error> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Err(Error::EmptyText)
    } else {
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn author() -> (Email, UserId) {
        (
            Email::from_string("a@example.com".to_string()).unwrap(),
            UserId::from_string("userA".to_string()).unwrap(),
        )
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn parses_post_document() {
        let fields = json!({
            "text": "Hello",
            "author": "a@example.com",
            "authorId": "userA",
            "tag": "#Win",
            "createdAt": 1_700_000_000_000i64,
            "reactions": { "💗": 3, "🌼": 2 },
            "comments": []
        });
        let post = Post::from_fields("post1", fields.as_object().unwrap().clone()).unwrap();
        assert_eq!(post.content.tag, Tag::Win);
        assert_eq!(post.content.total_reactions(), 5);
        assert!(post.content.is_hot());
        assert!(!post.content.deleted);
    }

    #[test]
    fn lenient_fields_fall_back_to_defaults() {
        let fields = json!({
            "text": "Hello",
            "author": "a@example.com",
            "authorId": "userA",
            "tag": "#Unknown",
            "createdAt": 1_700_000_000_000i64,
            "reactions": "oops",
            "comments": [
                { "author": "b@example.com", "text": "hi", "createdAt": 1_700_000_001_000i64 },
                { "text": "missing author" }
            ]
        });
        let post = Post::from_fields("post1", fields.as_object().unwrap().clone()).unwrap();
        assert_eq!(post.content.tag, Tag::Iep);
        assert!(post.content.reactions.is_empty());
        assert_eq!(post.content.comments.len(), 1);
        assert_eq!(post.content.comments[0].id, None);
    }

    #[test]
    fn rejects_bad_document_id() {
        let fields = json!({ "email": "a@example.com" });
        let result = UserProfile::from_fields("bad/id", fields.as_object().unwrap().clone());
        assert!(matches!(result, Err(Error::Id(_))));
    }

    #[test]
    fn hot_is_a_pure_function_of_counts() {
        let (email, id) = author();
        let mut post = PostContent::new(&email, id, "Hello", Tag::Win, at(0)).unwrap();
        for _ in 0..3 {
            post.react(PostReaction::Heart);
        }
        post.react(PostReaction::Blossom);
        assert!(!post.is_hot());
        post.react(PostReaction::Blossom);
        assert!(post.is_hot());
        post.reactions.insert("🌼".to_string(), 0);
        assert!(!post.is_hot());
    }

    #[test]
    fn new_post_starts_with_zeroed_reactions() {
        let (email, id) = author();
        let post = PostContent::new(&email, id, "  Hello  ", Tag::Win, at(0)).unwrap();
        assert_eq!(post.text, "Hello");
        assert_eq!(post.reactions.len(), 3);
        assert_eq!(post.total_reactions(), 0);
        assert!(PostContent::new(&email, post.author_id.clone(), "   ", Tag::Win, at(0)).is_err());
    }

    #[test]
    fn edit_comment_sets_edited_flag() {
        let (email, id) = author();
        let mut post = PostContent::new(&email, id.clone(), "Hello", Tag::Win, at(0)).unwrap();
        let comment = Comment::new(&email, id, "", "first", at(1)).unwrap();
        let key = comment.key();
        post.push_comment(comment);
        post.edit_comment(&key, "changed").unwrap();
        assert_eq!(post.comments[0].text, "changed");
        assert!(post.comments[0].edited);
    }

    #[test]
    fn remove_comment_by_id_leaves_others() {
        let (email, id) = author();
        let mut post = PostContent::new(&email, id.clone(), "Hello", Tag::Win, at(0)).unwrap();
        let first = Comment::new(&email, id.clone(), "", "same", at(1)).unwrap();
        let second = Comment::new(&email, id, "", "same", at(1)).unwrap();
        let second_key = second.key();
        post.push_comment(first.clone());
        post.push_comment(second);
        post.remove_comment(&second_key).unwrap();
        assert_eq!(post.comments, vec![first]);
    }

    #[test]
    fn remove_legacy_comment_removes_exactly_one_of_identical() {
        let (email, id) = author();
        let mut post = PostContent::new(&email, id.clone(), "Hello", Tag::Win, at(0)).unwrap();
        let mut legacy = Comment::new(&email, id, "", "dup", at(5)).unwrap();
        legacy.id = None;
        legacy.author_id = None;
        post.push_comment(legacy.clone());
        post.push_comment(legacy.clone());
        post.remove_comment(&legacy.key()).unwrap();
        assert_eq!(post.comments.len(), 1);
        assert!(matches!(
            post.remove_comment(&CommentKey::Id(CommentId::generate())),
            Err(Error::CommentNotFound)
        ));
    }

    #[test]
    fn comment_avatar_must_be_http() {
        let (email, id) = author();
        let comment = Comment::new(&email, id.clone(), "data:image/png", "hi", at(0)).unwrap();
        assert_eq!(comment.avatar, "");
        let comment = Comment::new(&email, id, "https://x.test/a.png", "hi", at(0)).unwrap();
        assert_eq!(comment.avatar, "https://x.test/a.png");
    }

    #[test]
    fn legacy_comment_authorship_uses_email() {
        let (email, id) = author();
        let mut comment = Comment::new(&email, id.clone(), "", "hi", at(0)).unwrap();
        comment.author_id = None;
        assert!(comment.is_authored_by(&UserId::from_string("other".to_string()).unwrap(), &email));
        comment.author_id = Some(id.clone());
        assert!(comment.is_authored_by(&id, &email));
    }

    #[test]
    fn profile_follow_lists() {
        let fields = json!({ "email": "a@example.com", "followers": ["x", "x", "y"] });
        let fields = fields.as_object().unwrap().clone();
        assert_eq!(ProfileContent::missing_follow_lists(&fields), vec!["following"]);
        let profile = UserProfile::from_fields("userA", fields).unwrap();
        assert_eq!(profile.content.followers.len(), 2);
        assert!(profile.content.following.is_empty());
        assert!(profile.content.push_token().is_none());
    }

    #[test]
    fn parses_reaction_words() {
        assert_eq!("heart".parse::<PostReaction>().unwrap(), PostReaction::Heart);
        assert_eq!("🙏".parse::<CommentReaction>().unwrap(), CommentReaction::Pray);
        assert!("🙏".parse::<PostReaction>().is_err());
    }
}
