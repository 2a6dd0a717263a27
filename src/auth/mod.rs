//! User accounts and password authentication.
//!
//! Passwords are only ever stored as argon2 hashes; checking one is a
//! one-way comparison against the stored hash.

mod reset;

pub use reset::{RESET_TOKEN_TTL, RESET_TOKENS, ResetToken, request_reset_token, reset_password};

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::context::Context;
use crate::store::{Database, Filter, StoreError};

/// Collection holding user accounts.
pub const USERS: &str = "users";

/// Session key under which [`User::login`] stores the user id.
pub const SESSION_USER_KEY: &str = "uid";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no account named `{0}`")]
    UnknownUser(String),

    #[error("invalid password")]
    InvalidPassword,

    #[error("account with that name already exists")]
    UsernameTaken,

    #[error("reset token not found")]
    UnknownToken,

    #[error("token expired")]
    TokenExpired,

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("no session attached to this request")]
    NoSession,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub username: String,
    #[serde(rename = "password", default)]
    password_hash: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub values: Map<String, Value>,
}

impl User {
    /// Prepares a new account. Fails if `username` is taken. The account is
    /// not stored until [`User::save`].
    pub async fn new(db: &Database, username: &str, password: &str) -> Result<Self, AuthError> {
        let taken = db
            .collection(USERS)
            .count(&Filter::new().eq("username", username))
            .await?;
        if taken > 0 {
            return Err(AuthError::UsernameTaken);
        }

        let mut user = Self {
            id: Uuid::new_v4(),
            username: username.to_owned(),
            password_hash: String::new(),
            values: Map::new(),
        };
        user.set_password(password)?;
        Ok(user)
    }

    /// Hashes `password` and stores the hash on the user.
    pub fn set_password(&mut self, password: &str) -> Result<(), AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        self.password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Hash(e.to_string()))?
            .to_string();
        Ok(())
    }

    pub fn verify_password(&self, password: &str) -> bool {
        let Ok(hash) = PasswordHash::new(&self.password_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok()
    }

    pub async fn save(&self, db: &Database) -> Result<(), AuthError> {
        db.collection(USERS).upsert_id(self.id, self).await?;
        Ok(())
    }

    /// Marks the request's session as belonging to this user. The session is
    /// written back onto the response by the dispatcher.
    pub fn login(&self, ctx: &Context) -> Result<(), AuthError> {
        if !ctx.set_session_value(SESSION_USER_KEY, self.id.to_string()) {
            return Err(AuthError::NoSession);
        }
        ctx.set_user(self.clone());
        Ok(())
    }
}

/// Forgets the logged-in user of the request's session.
pub fn logout(ctx: &Context) -> Result<(), AuthError> {
    let mut session = ctx.session().ok_or(AuthError::NoSession)?;
    session.remove(SESSION_USER_KEY);
    drop(session);
    ctx.clear_user();
    Ok(())
}

pub async fn find_user(db: &Database, username: &str) -> Result<Option<User>, AuthError> {
    Ok(db
        .collection(USERS)
        .find_one(&Filter::new().eq("username", username))
        .await?)
}

pub async fn find_user_by_id(db: &Database, id: Uuid) -> Result<Option<User>, AuthError> {
    Ok(db.collection(USERS).find_one(&Filter::id(id)).await?)
}

/// Looks the user up and checks the password.
pub async fn authenticate(db: &Database, username: &str, password: &str) -> Result<User, AuthError> {
    let user = find_user(db, username)
        .await?
        .ok_or_else(|| AuthError::UnknownUser(username.to_owned()))?;
    if !user.verify_password(password) {
        return Err(AuthError::InvalidPassword);
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CookieStore, Session};
    use crate::store::Connection;
    use std::sync::Arc;

    fn db() -> Database {
        Connection::open("memory://localhost/app").unwrap().database("app")
    }

    #[tokio::test]
    async fn registered_user_authenticates() {
        let db = db();
        let user = User::new(&db, "billy", "hunter2").await.unwrap();
        user.save(&db).await.unwrap();

        let found = authenticate(&db, "billy", "hunter2").await.unwrap();
        assert_eq!(found.id, user.id);
        assert!(matches!(
            authenticate(&db, "billy", "wrong").await,
            Err(AuthError::InvalidPassword)
        ));
        assert!(matches!(
            authenticate(&db, "nanny", "hunter2").await,
            Err(AuthError::UnknownUser(_))
        ));
    }

    #[tokio::test]
    async fn password_is_never_stored_in_plaintext() {
        let db = db();
        let user = User::new(&db, "billy", "hunter2").await.unwrap();
        user.save(&db).await.unwrap();

        let raw = db.collection(USERS).raw_find(&Filter::id(user.id)).await.unwrap();
        let stored = raw[0]["password"].as_str().unwrap();
        assert_ne!(stored, "hunter2");
        assert!(stored.starts_with("$argon2"));
    }

    #[tokio::test]
    async fn duplicate_usernames_are_refused() {
        let db = db();
        User::new(&db, "billy", "a").await.unwrap().save(&db).await.unwrap();
        assert!(matches!(User::new(&db, "billy", "b").await, Err(AuthError::UsernameTaken)));
    }

    #[tokio::test]
    async fn lookup_by_id() {
        let db = db();
        let user = User::new(&db, "billy", "a").await.unwrap();
        user.save(&db).await.unwrap();
        assert_eq!(find_user_by_id(&db, user.id).await.unwrap(), Some(user));
        assert_eq!(find_user_by_id(&db, Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn login_and_logout_touch_the_session() {
        let db = db();
        let user = User::new(&db, "billy", "a").await.unwrap();
        let ctx = Context::new();
        assert!(matches!(user.login(&ctx), Err(AuthError::NoSession)));

        ctx.attach_session(Session::new("goat"), Arc::new(CookieStore::new("k")));
        user.login(&ctx).unwrap();
        assert_eq!(ctx.session_value(SESSION_USER_KEY), Some(user.id.to_string().into()));
        assert_eq!(ctx.user().map(|u| u.id), Some(user.id));

        logout(&ctx).unwrap();
        assert_eq!(ctx.session_value(SESSION_USER_KEY), None);
        assert!(ctx.user().is_none());
    }
}
