use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt, str::FromStr};
use thiserror::Error as ThisError;
use urlencoding::encode;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RefError {
    #[error("Does not match as {ref_type}: {input}")]
    BadFormat {
        ref_type: &'static str,
        input: String,
    },
    #[error("Unknown tag: {0}")]
    UnknownTag(String),
}

// Document identifiers are opaque, but they end up in store keys and page routes.
fn id_regex() -> &'static Regex {
    lazy_static! {
        static ref RE: Regex = Regex::new("^[A-Za-z0-9_-]{1,128}$").unwrap();
    }
    &*RE
}

fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

macro_rules! opaque_id {
    ($name:ident, $ref_type:literal) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn from_string(string: String) -> Result<Self, RefError> {
                if !Self::is_match(string.as_str()) {
                    Err(RefError::BadFormat {
                        ref_type: $ref_type,
                        input: string,
                    })
                } else {
                    Ok(Self(string))
                }
            }

            pub fn generate() -> Self {
                Self(generate_id())
            }

            pub fn is_match(string: &str) -> bool {
                id_regex().is_match(string)
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl TryFrom<String> for $name {
            type Error = RefError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                $name::from_string(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = RefError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                $name::from_string(value.to_string())
            }
        }

        impl FromStr for $name {
            type Err = RefError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::from_string(s.to_string())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(UserId, "User");
opaque_id!(PostId, "Post");
opaque_id!(CommentId, "Comment");

impl UserId {
    pub fn to_page_url(&self) -> String {
        format!("/profile/{}", encode(self.as_str()))
    }
}

impl PostId {
    pub fn to_page_url(&self) -> String {
        format!("/feed#{}", encode(self.as_str()))
    }
}

/// Remote collections the app reads and writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    Posts,
    Users,
}

impl Collection {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Collection::Posts => "posts",
            Collection::Users => "users",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed set of topics a post can be filed under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum Tag {
    #[default]
    Iep,
    Meltdown,
    Win,
    Therapy,
    HardDay,
}

impl Tag {
    pub const ALL: [Tag; 5] = [Tag::Iep, Tag::Meltdown, Tag::Win, Tag::Therapy, Tag::HardDay];

    pub fn from_string(string: String) -> Result<Self, RefError> {
        let trimmed = string.trim();
        let wanted = trimmed.strip_prefix('#').unwrap_or(trimmed);
        Tag::ALL
            .into_iter()
            .find(|tag| tag.label().eq_ignore_ascii_case(wanted))
            .ok_or(RefError::UnknownTag(string))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Iep => "#IEP",
            Tag::Meltdown => "#Meltdown",
            Tag::Win => "#Win",
            Tag::Therapy => "#Therapy",
            Tag::HardDay => "#HardDay",
        }
    }

    fn label(&self) -> &'static str {
        &self.as_str()[1..]
    }
}

impl TryFrom<String> for Tag {
    type Error = RefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Tag::from_string(value)
    }
}

impl FromStr for Tag {
    type Err = RefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tag::from_string(s.to_string())
    }
}

impl From<Tag> for String {
    fn from(value: Tag) -> String {
        value.as_str().to_string()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    pub fn from_string(string: String) -> Result<Self, RefError> {
        let normalized = string.trim().to_lowercase();
        if !Self::is_match(normalized.as_str()) {
            Err(RefError::BadFormat {
                ref_type: "Email",
                input: string,
            })
        } else {
            Ok(Self(normalized))
        }
    }

    pub fn single_regex() -> &'static Regex {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
        }
        &*RE
    }

    pub fn is_match(string: &str) -> bool {
        Self::single_regex().is_match(string)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Generated initials avatar used until the user sets their own.
    pub fn to_avatar_url(&self) -> String {
        format!(
            "https://avatars.dicebear.com/api/initials/{}.svg",
            encode(self.as_str())
        )
    }
}

impl TryFrom<String> for Email {
    type Error = RefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Email::from_string(value)
    }
}

impl FromStr for Email {
    type Err = RefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Email::from_string(s.to_string())
    }
}

impl From<Email> for String {
    fn from(value: Email) -> String {
        value.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Device token issued by the Expo push service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct PushToken(String);

impl PushToken {
    pub fn from_string(string: String) -> Result<Self, RefError> {
        if !Self::is_match(string.as_str()) {
            Err(RefError::BadFormat {
                ref_type: "PushToken",
                input: string,
            })
        } else {
            Ok(Self(string))
        }
    }

    pub fn single_regex() -> &'static Regex {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"^Expo(nent)?PushToken\[[^\[\]\s]+\]$").unwrap();
        }
        &*RE
    }

    pub fn is_match(string: &str) -> bool {
        Self::single_regex().is_match(string)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for PushToken {
    type Error = RefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PushToken::from_string(value)
    }
}

impl FromStr for PushToken {
    type Err = RefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PushToken::from_string(s.to_string())
    }
}

impl From<PushToken> for String {
    fn from(value: PushToken) -> String {
        value.0
    }
}

impl fmt::Display for PushToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
