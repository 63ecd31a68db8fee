//! Opaque refresh tokens stored as `RefreshToken` records
//!
//! Only the SHA-256 hash of a token is stored. Rotation revokes the presented
//! token and issues its replacement while holding one lock for the whole
//! store, so two concurrent rotations of the same token cannot both succeed.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::model::{Model, ModelDefinition};
use crate::query::Filters;
use crate::repository::{Entity, Repository};
use crate::store::DocumentStore;
use crate::types::{FieldDefinition, FieldType};

/// A stored refresh token. `token_hash` is the hex SHA-256 of the token the
/// client holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshToken {
    pub user_id: String,
    pub token_hash: String,
    #[serde(with = "crate::record::timestamp")]
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device_info: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Id of the token issued when this one was rotated
    #[serde(default)]
    pub replaced_by: Option<Uuid>,
}

impl RefreshToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }
}

impl Model for RefreshToken {
    const NAME: &'static str = "RefreshToken";

    fn definition() -> ModelDefinition {
        ModelDefinition::new(
            Self::NAME,
            vec![
                FieldDefinition::new("user_id", FieldType::String).not_null(),
                FieldDefinition::new("token_hash", FieldType::String)
                    .not_null()
                    .unique(),
                FieldDefinition::new("expires_at", FieldType::Timestamp).not_null(),
                FieldDefinition::new("revoked", FieldType::Boolean).default(false),
                FieldDefinition::new("revoked_at", FieldType::Timestamp),
                FieldDefinition::new("device_info", FieldType::String),
                FieldDefinition::new("user_agent", FieldType::String),
                FieldDefinition::new("replaced_by", FieldType::Uuid),
            ],
        )
        .with_plural_name("refresh_tokens")
    }
}

/// A freshly issued token. `token` is only available here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Optional client details recorded with a token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub device_info: Option<String>,
    pub user_agent: Option<String>,
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

pub struct RefreshTokenStore {
    tokens: Repository<RefreshToken>,
    rotation_lock: Mutex<()>,
}

impl RefreshTokenStore {
    /// Registers the `RefreshToken` model with the store if needed
    pub fn new(store: Arc<DocumentStore>) -> Result<Self> {
        if !store.registry().contains(RefreshToken::NAME) {
            store.registry().register_model::<RefreshToken>()?;
        }
        Ok(Self {
            tokens: Repository::new(store),
            rotation_lock: Mutex::new(()),
        })
    }

    pub async fn issue(&self, user_id: &str, ttl: Duration) -> Result<IssuedToken> {
        self.issue_with(user_id, ttl, SessionInfo::default()).await
    }

    pub async fn issue_with(
        &self,
        user_id: &str,
        ttl: Duration,
        session: SessionInfo,
    ) -> Result<IssuedToken> {
        let token = generate_token();
        let expires_at = Utc::now() + ttl;
        let entity = self
            .tokens
            .create(&RefreshToken {
                user_id: user_id.to_string(),
                token_hash: hash_token(&token),
                expires_at,
                revoked: false,
                revoked_at: None,
                device_info: session.device_info,
                user_agent: session.user_agent,
                replaced_by: None,
            })
            .await?;
        debug!(user_id, token_id = %entity.id, "Issued refresh token");
        Ok(IssuedToken {
            token,
            id: entity.id,
            expires_at,
        })
    }

    /// Exchange `token` for a new one for the same user.
    ///
    /// The old token is revoked before the new one is written. Unknown,
    /// revoked or expired tokens fail with an `Auth` error.
    pub async fn rotate(&self, token: &str, ttl: Duration) -> Result<(IssuedToken, Entity<RefreshToken>)> {
        let _guard = self.rotation_lock.lock().await;

        let Some(current) = self.find_by_hash(&hash_token(token)).await? else {
            return Err(StoreError::auth("Invalid or expired refresh token"));
        };
        let now = Utc::now();
        if current.data.revoked {
            warn!(user_id = %current.data.user_id, token_id = %current.id, "Revoked refresh token presented");
            return Err(StoreError::auth("Refresh token has been revoked"));
        }
        if current.data.is_expired_at(now) {
            return Err(StoreError::auth("Invalid or expired refresh token"));
        }

        let session = SessionInfo {
            device_info: current.data.device_info.clone(),
            user_agent: current.data.user_agent.clone(),
        };
        let revoked = self
            .tokens
            .update(current.id, revocation(now))
            .await?;
        let issued = self.issue_with(&revoked.data.user_id, ttl, session).await?;
        let revoked = self
            .tokens
            .update(revoked.id, json!({"replaced_by": issued.id.to_string()}))
            .await?;

        info!(user_id = %revoked.data.user_id, old = %revoked.id, new = %issued.id, "Rotated refresh token");
        Ok((issued, revoked))
    }

    /// The stored record for a token the client presents, if any
    pub async fn lookup(&self, token: &str) -> Result<Option<Entity<RefreshToken>>> {
        self.find_by_hash(&hash_token(token)).await
    }

    /// Revoke one token. Returns false when it is unknown or already revoked.
    pub async fn revoke(&self, token: &str) -> Result<bool> {
        let Some(current) = self.find_by_hash(&hash_token(token)).await? else {
            return Ok(false);
        };
        if current.data.revoked {
            return Ok(false);
        }
        self.tokens.update(current.id, revocation(Utc::now())).await?;
        Ok(true)
    }

    /// Revoke every active token of a user; returns how many were revoked
    pub async fn revoke_all_for_user(&self, user_id: &str) -> Result<usize> {
        let now = Utc::now();
        let mut revoked = 0;
        for token in self.active_sessions(user_id).await? {
            self.tokens.update(token.id, revocation(now)).await?;
            revoked += 1;
        }
        info!(user_id, revoked, "Revoked refresh tokens for user");
        Ok(revoked)
    }

    /// Unrevoked, unexpired tokens of a user, oldest first
    pub async fn active_sessions(&self, user_id: &str) -> Result<Vec<Entity<RefreshToken>>> {
        let filters = Filters::from([
            ("user_id".to_string(), Value::from(user_id)),
            ("revoked".to_string(), Value::Bool(false)),
        ]);
        let now = Utc::now();
        let mut sessions: Vec<_> = self
            .find(&filters)
            .await?
            .into_iter()
            .filter(|t| t.data.is_active_at(now))
            .collect();
        sessions.sort_by_key(|t| t.created_at);
        Ok(sessions)
    }

    /// Delete expired and revoked tokens; returns how many were deleted
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut deleted = 0;
        for token in self.find(&BTreeMap::new()).await? {
            if token.data.is_active_at(now) {
                continue;
            }
            self.tokens.delete(token.id).await?;
            deleted += 1;
        }
        debug!(deleted, "Cleaned up refresh tokens");
        Ok(deleted)
    }

    async fn find(&self, filters: &Filters) -> Result<Vec<Entity<RefreshToken>>> {
        let store = self.tokens.store();
        let def = store.registry().get(RefreshToken::NAME)?;
        store
            .engine()
            .find(&def, filters)
            .await?
            .into_iter()
            .map(Entity::from_record)
            .collect()
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<Entity<RefreshToken>>> {
        let filters = Filters::from([("token_hash".to_string(), Value::from(token_hash))]);
        Ok(self.find(&filters).await?.into_iter().next())
    }
}

fn revocation(now: DateTime<Utc>) -> Value {
    json!({
        "revoked": true,
        "revoked_at": crate::record::timestamp::format(&now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryObjectStore;
    use crate::config::StoreConfig;
    use crate::error::ErrorKind;
    use crate::model::ModelRegistry;

    fn setup() -> RefreshTokenStore {
        let store = DocumentStore::from_factory(
            StoreConfig::builder("auth").build(),
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(ModelRegistry::new()),
        )
        .unwrap();
        RefreshTokenStore::new(Arc::new(store)).unwrap()
    }

    // =========================================================================
    // Issue / Rotate
    // =========================================================================

    #[test]
    fn test_hash_is_sha256_hex() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(generate_token().len(), 64);
    }

    #[tokio::test]
    async fn test_issue_stores_hash_only() {
        let tokens = setup();
        let issued = tokens.issue("user-1", Duration::days(7)).await.unwrap();

        let stored = tokens.lookup(&issued.token).await.unwrap().unwrap();
        assert_eq!(stored.id, issued.id);
        assert_eq!(stored.data.token_hash, hash_token(&issued.token));
        assert_ne!(stored.data.token_hash, issued.token);
        assert!(!stored.data.revoked);
    }

    #[tokio::test]
    async fn test_rotate_revokes_old_token() {
        let tokens = setup();
        let first = tokens.issue("user-1", Duration::days(7)).await.unwrap();

        let (second, old) = tokens.rotate(&first.token, Duration::days(7)).await.unwrap();
        assert_ne!(second.token, first.token);
        assert!(old.data.revoked);
        assert_eq!(old.data.replaced_by, Some(second.id));

        let err = tokens.rotate(&first.token, Duration::days(7)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(tokens.rotate(&second.token, Duration::days(7)).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_rotation_single_winner() {
        let tokens = Arc::new(setup());
        let issued = tokens.issue("user-1", Duration::days(7)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let tokens = Arc::clone(&tokens);
            let token = issued.token.clone();
            handles.push(tokio::spawn(async move {
                tokens.rotate(&token, Duration::days(1)).await.is_ok()
            }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_rotate_rejects_unknown_and_expired() {
        let tokens = setup();
        assert!(tokens.rotate("nope", Duration::days(1)).await.is_err());

        let expired = tokens.issue("user-1", Duration::seconds(-1)).await.unwrap();
        let err = tokens.rotate(&expired.token, Duration::days(1)).await.unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    // =========================================================================
    // Revocation / Cleanup
    // =========================================================================

    #[tokio::test]
    async fn test_revoke_and_sessions() {
        let tokens = setup();
        let a = tokens.issue("user-1", Duration::days(7)).await.unwrap();
        tokens.issue("user-1", Duration::days(7)).await.unwrap();
        tokens.issue("user-2", Duration::days(7)).await.unwrap();

        assert_eq!(tokens.active_sessions("user-1").await.unwrap().len(), 2);
        assert!(tokens.revoke(&a.token).await.unwrap());
        assert!(!tokens.revoke(&a.token).await.unwrap());
        assert_eq!(tokens.active_sessions("user-1").await.unwrap().len(), 1);

        assert_eq!(tokens.revoke_all_for_user("user-1").await.unwrap(), 1);
        assert!(tokens.active_sessions("user-1").await.unwrap().is_empty());
        assert_eq!(tokens.active_sessions("user-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let tokens = setup();
        let live = tokens.issue("user-1", Duration::days(7)).await.unwrap();
        tokens.issue("user-1", Duration::seconds(-5)).await.unwrap();
        let revoked = tokens.issue("user-1", Duration::days(7)).await.unwrap();
        tokens.revoke(&revoked.token).await.unwrap();

        assert_eq!(tokens.cleanup_expired().await.unwrap(), 2);
        assert!(tokens.lookup(&live.token).await.unwrap().is_some());
        assert!(tokens.lookup(&revoked.token).await.unwrap().is_none());
    }
}
