//! Command line arguments and their environment fallbacks.

use clap::{Parser, Subcommand, ValueEnum};
use puzzle_feed::{FeedConfig, RollbackPolicy};
use puzzle_push::{ExpoConfig, EXPO_PUSH_ENDPOINT};

/// PuzzleTogether - a shared feed for parents of autistic children
#[derive(Parser, Debug, Clone)]
#[command(name = "puzzle-together")]
#[command(about = "Post, react and comment on the PuzzleTogether feed")]
pub struct Args {
    /// SQLite database holding documents and accounts
    #[arg(long, env = "PUZZLE_DB", default_value = "puzzle-together.sqlite3")]
    pub db: String,

    /// Account email
    #[arg(long, env = "PUZZLE_EMAIL")]
    pub email: Option<String>,

    /// Account password
    #[arg(long, env = "PUZZLE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Push service endpoint
    #[arg(long, env = "PUZZLE_PUSH_ENDPOINT", default_value = EXPO_PUSH_ENDPOINT)]
    pub push_endpoint: String,

    /// Never send push notifications
    #[arg(long, env = "PUZZLE_NO_PUSH", default_value = "false")]
    pub no_push: bool,

    /// What to do with a local change whose write failed
    #[arg(long, env = "PUZZLE_ROLLBACK", value_enum, default_value_t = Rollback::Await)]
    pub rollback: Rollback,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Rollback {
    /// Keep it until the store says otherwise
    Await,
    /// Undo it straight away
    Revert,
}

impl From<Rollback> for RollbackPolicy {
    fn from(rollback: Rollback) -> Self {
        match rollback {
            Rollback::Await => RollbackPolicy::AwaitNextPush,
            Rollback::Revert => RollbackPolicy::Revert,
        }
    }
}

impl Args {
    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            rollback: self.rollback.into(),
            // Sends are awaited by the post command instead.
            notify_on_post: false,
        }
    }

    pub fn expo_config(&self) -> ExpoConfig {
        ExpoConfig {
            endpoint: self.push_endpoint.clone(),
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create an account and its profile
    Register {
        /// Expo push token of this device
        #[arg(long)]
        push_token: Option<String>,
    },
    /// Share a post
    Post {
        /// Post text; optional when a template is given
        text: Option<String>,
        /// One of #IEP, #Meltdown, #Win, #Therapy, #HardDay
        #[arg(long, default_value = "#IEP")]
        tag: String,
        /// Start from a story template, by id or title
        #[arg(long)]
        template: Option<String>,
    },
    /// Show the feed, newest first
    Feed {
        /// Only posts with this tag
        #[arg(long)]
        tag: Option<String>,
    },
    /// Replace the text of one of your posts
    EditPost { post: String, text: String },
    /// Delete one of your posts
    DeletePost { post: String },
    /// React to a post with heart, blossom or repeat
    React { post: String, reaction: String },
    /// Work with comments; COMMENT is a comment id or its 1-based position
    Comment {
        #[command(subcommand)]
        action: CommentCommand,
    },
    /// Follow or unfollow a user
    Follow { user: String },
    /// Make a user's follower list agree with your following list
    Reconcile { user: String },
    /// View or edit profiles
    Profile {
        #[command(subcommand)]
        action: ProfileCommand,
    },
    /// List the story templates
    Templates,
    /// Check the database for corruption
    Check,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CommentCommand {
    Add { post: String, text: String },
    Edit { post: String, comment: String, text: String },
    Delete { post: String, comment: String },
    /// React with heart, pray or hug
    React { post: String, comment: String, reaction: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ProfileCommand {
    /// Show a profile with its posts; your own when no user is given
    Show { user: Option<String> },
    /// Change your avatar or bio; fields not given are kept
    Edit {
        #[arg(long)]
        avatar_url: Option<String>,
        #[arg(long)]
        bio: Option<String>,
    },
}
