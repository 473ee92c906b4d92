use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use async_trait::async_trait;
use log::{debug, info};
use puzzle_db::sql::create_connection;
use puzzle_ref::{Email, UserId};
use sqlx::SqliteConnection;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error as ThisError;
use tokio::sync::Mutex;

mod sql;
use sql::*;

/// Shortest password the provider accepts.
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Email is already in use")]
    EmailInUse,
    #[error("Password should be at least 6 characters")]
    WeakPassword,
    #[error("Invalid email: {0}")]
    InvalidEmail(String),
    #[error("Failed to hash password, cause: {0}")]
    Hash(String),
    #[error("Stored account is corrupt, cause: {0}")]
    Corrupt(#[from] puzzle_ref::RefError),
    #[error("Failed to access accounts, cause: {0}")]
    Sql(#[from] sqlx::Error),
}

/// The signed-in user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub email: Email,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, Error>;

    /// Registers a new account and signs it in.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, Error>;

    async fn sign_out(&self);

    fn current_session(&self) -> Option<Session>;
}

/// [`AuthProvider`] keeping Argon2 password hashes in SQLite.
pub struct LocalAuth {
    sql: Mutex<SqliteConnection>,
    session: RwLock<Option<Session>>,
    params: Params,
}

impl LocalAuth {
    pub async fn new(sql_path: &str) -> Result<Self, Error> {
        let mut sql = create_connection(sql_path).await?;
        create_accounts_tables(&mut sql).await?;

        Ok(Self {
            sql: Mutex::new(sql),
            session: RwLock::new(None),
            params: Params::default(),
        })
    }

    pub async fn in_memory() -> Result<Self, Error> {
        Self::new("sqlite::memory:").await
    }

    /// Hashing cost for new accounts. Existing hashes keep the cost they were made with.
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    fn read_session(&self) -> RwLockReadGuard<'_, Option<Session>> {
        self.session.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_session(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        self.session.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_session(&self, session: Session) -> Session {
        *self.write_session() = Some(session.clone());
        session
    }
}

#[async_trait]
impl AuthProvider for LocalAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, Error> {
        let email = Email::from_string(email.to_string()).map_err(|_| Error::InvalidCredentials)?;

        let account = {
            let mut sql = self.sql.lock().await;
            select_account_by_email(&mut sql, email.as_str()).await?
        };
        let (id, password_hash) = account.ok_or(Error::InvalidCredentials)?;
        if !verify_password(password, &password_hash)? {
            return Err(Error::InvalidCredentials);
        }

        debug!("signed in {}", email);
        Ok(self.start_session(Session {
            user_id: UserId::from_string(id)?,
            email,
        }))
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, Error> {
        let email = Email::from_string(email.to_string())
            .map_err(|_| Error::InvalidEmail(email.to_string()))?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::WeakPassword);
        }

        let user_id = UserId::generate();
        let password_hash = hash_password(password, self.params.clone())?;
        {
            let mut sql = self.sql.lock().await;
            if !insert_account(&mut sql, user_id.as_str(), email.as_str(), &password_hash).await? {
                return Err(Error::EmailInUse);
            }
        }

        info!("registered account {} for {}", user_id, email);
        Ok(self.start_session(Session { user_id, email }))
    }

    async fn sign_out(&self) {
        if let Some(session) = self.write_session().take() {
            debug!("signed out {}", session.email);
        }
    }

    fn current_session(&self) -> Option<Session> {
        self.read_session().clone()
    }
}

fn hash_password(password: &str, params: Params) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| Error::Hash(err.to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool, Error> {
    let parsed = PasswordHash::new(hash).map_err(|err| Error::Hash(err.to_string()))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
