//! Password reset tokens.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{AuthError, find_user};
use crate::context::Context;
use crate::store::{Database, Filter};

/// Collection holding outstanding reset tokens.
pub const RESET_TOKENS: &str = "reset_tokens";

/// How long a reset token stays valid.
pub const RESET_TOKEN_TTL: Duration = Duration::hours(48);

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ResetToken {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub username: String,
    pub token: String,
    pub timestamp: DateTime<Utc>,
}

impl ResetToken {
    fn issue(username: &str, now: DateTime<Utc>) -> Self {
        let id = Uuid::new_v4();
        let mut hasher = Sha256::new();
        hasher.update(id.simple().to_string());
        hasher.update(now.to_rfc3339());
        hasher.update(rand::random::<[u8; 16]>());
        Self {
            id,
            username: username.to_owned(),
            token: hex::encode(hasher.finalize()),
            timestamp: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.timestamp > RESET_TOKEN_TTL
    }

    pub async fn save(&self, db: &Database) -> Result<(), AuthError> {
        db.collection(RESET_TOKENS).upsert_id(self.id, self).await?;
        Ok(())
    }

    pub async fn delete(&self, db: &Database) -> Result<(), AuthError> {
        db.collection(RESET_TOKENS).remove_id(self.id).await?;
        Ok(())
    }
}

/// Issues and stores a reset token for `username`. The account it belongs to
/// is attached to the context as the request's user.
pub async fn request_reset_token(ctx: &Context, username: &str) -> Result<ResetToken, AuthError> {
    let db = ctx.database()?;
    let user = find_user(&db, username)
        .await?
        .ok_or_else(|| AuthError::UnknownUser(username.to_owned()))?;

    let token = ResetToken::issue(&user.username, Utc::now());
    token.save(&db).await?;
    ctx.set_user(user);
    Ok(token)
}

/// Sets a new password for the account `token` was issued to. The token is
/// consumed; an expired token is deleted and refused.
pub async fn reset_password(db: &Database, token: &str, password: &str) -> Result<(), AuthError> {
    let reset: ResetToken = db
        .collection(RESET_TOKENS)
        .find_one(&Filter::new().eq("token", token))
        .await?
        .ok_or(AuthError::UnknownToken)?;

    if reset.is_expired(Utc::now()) {
        reset.delete(db).await?;
        return Err(AuthError::TokenExpired);
    }

    let mut user = find_user(db, &reset.username)
        .await?
        .ok_or_else(|| AuthError::UnknownUser(reset.username.clone()))?;
    user.set_password(password)?;
    reset.delete(db).await?;
    user.save(db).await
}
