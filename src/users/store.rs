use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::auth::password;
use crate::error::ApiError;
use crate::kv::KvStore;

/// Single collection blob holding every user record.
const USERS_KEY: &str = "av:admin:users";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    Guest,
}

/// Full record as persisted. Credential fields never leave this module
/// except through [`UserStore::verify_password`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub password_hash: String,
    pub password_salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl StoredUser {
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            active: self.active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub password: String,
    pub active: Option<bool>,
}

/// Partial update; `None` fields keep their current value. Empty strings in
/// `name`/`email`/`password` are treated as absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
    pub password: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum UserStoreError {
    #[error("Email already in use")]
    DuplicateEmail,
    #[error("User not found")]
    NotFound,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<UserStoreError> for ApiError {
    fn from(e: UserStoreError) -> Self {
        match e {
            UserStoreError::DuplicateEmail => ApiError::Conflict(e.to_string()),
            UserStoreError::NotFound => ApiError::NotFound(e.to_string()),
            UserStoreError::Backend(inner) => ApiError::Internal(inner),
        }
    }
}

/// CRUD over the user collection. Every mutation is a whole-document
/// read-modify-write; concurrent writers are last-write-wins, accepted for
/// a handful of human operators.
#[derive(Clone)]
pub struct UserStore {
    kv: Arc<dyn KvStore>,
}

impl UserStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    async fn read_all(&self) -> anyhow::Result<Vec<StoredUser>> {
        let Some(raw) = self.kv.get(USERS_KEY).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(users) => Ok(users),
            Err(e) => {
                warn!(error = %e, "user collection blob is unparsable, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    async fn write_all(&self, users: &[StoredUser]) -> anyhow::Result<()> {
        let raw = serde_json::to_string(users).context("serialize user collection")?;
        self.kv.set(USERS_KEY, &raw).await
    }

    pub async fn list(&self) -> Result<Vec<PublicUser>, UserStoreError> {
        let users = self.read_all().await?;
        Ok(users.iter().map(StoredUser::to_public).collect())
    }

    /// Never fails: a backend error reads as zero, which keeps the
    /// bootstrap path reachable through a store outage.
    pub async fn count(&self) -> usize {
        match self.read_all().await {
            Ok(users) => users.len(),
            Err(e) => {
                warn!(error = %e, "count failed, defaulting to 0");
                0
            }
        }
    }

    pub async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<StoredUser>, UserStoreError> {
        let needle = email.trim().to_lowercase();
        let users = self.read_all().await?;
        Ok(users.into_iter().find(|u| u.email.to_lowercase() == needle))
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<StoredUser>, UserStoreError> {
        let users = self.read_all().await?;
        Ok(users.into_iter().find(|u| u.id == id))
    }

    pub async fn create(&self, input: NewUser) -> Result<PublicUser, UserStoreError> {
        let users = self.read_all().await?;
        let email = input.email.trim().to_lowercase();
        if users.iter().any(|u| u.email.to_lowercase() == email) {
            return Err(UserStoreError::DuplicateEmail);
        }

        let salt = password::generate_salt();
        let password_hash = password::hash_password(&input.password, &salt)?;
        let now = OffsetDateTime::now_utc();
        let user = StoredUser {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            email,
            role: input.role,
            active: input.active.unwrap_or(true),
            created_at: now,
            updated_at: now,
            password_hash,
            password_salt: salt.as_str().to_string(),
        };

        let mut next = Vec::with_capacity(users.len() + 1);
        next.push(user.clone());
        next.extend(users);
        self.write_all(&next).await?;
        Ok(user.to_public())
    }

    pub async fn update(&self, id: Uuid, patch: UserPatch) -> Result<PublicUser, UserStoreError> {
        let mut users = self.read_all().await?;
        let idx = users
            .iter()
            .position(|u| u.id == id)
            .ok_or(UserStoreError::NotFound)?;

        let current = &users[idx];
        let mut next = current.clone();

        if let Some(name) = patch.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            next.name = name.to_string();
        }

        if let Some(email) = patch.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            let email = email.to_lowercase();
            if email != current.email.to_lowercase()
                && users.iter().any(|u| u.email.to_lowercase() == email)
            {
                return Err(UserStoreError::DuplicateEmail);
            }
            next.email = email;
        }

        if let Some(role) = patch.role {
            next.role = role;
        }
        if let Some(active) = patch.active {
            next.active = active;
        }

        // A password never changes without a fresh salt.
        if let Some(pw) = patch.password.as_deref().filter(|p| !p.is_empty()) {
            let salt = password::generate_salt();
            next.password_hash = password::hash_password(pw, &salt)?;
            next.password_salt = salt.as_str().to_string();
        }

        next.updated_at = OffsetDateTime::now_utc();
        users[idx] = next.clone();
        self.write_all(&users).await?;
        Ok(next.to_public())
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), UserStoreError> {
        let users = self.read_all().await?;
        let next: Vec<StoredUser> = users.iter().filter(|u| u.id != id).cloned().collect();
        if next.len() == users.len() {
            return Err(UserStoreError::NotFound);
        }
        self.write_all(&next).await?;
        Ok(())
    }

    /// Full record on a credential match, `None` otherwise. A record with a
    /// corrupt hash fails the match rather than the request.
    pub async fn verify_password(
        &self,
        email: &str,
        plain: &str,
    ) -> Result<Option<StoredUser>, UserStoreError> {
        let Some(user) = self.find_by_email(email).await? else {
            return Ok(None);
        };
        let ok = password::verify_password(plain, &user.password_hash).unwrap_or_else(|e| {
            warn!(email = %user.email, error = %e, "stored password hash is unusable");
            false
        });
        Ok(ok.then_some(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use async_trait::async_trait;

    fn store() -> UserStore {
        UserStore::new(Arc::new(MemoryKv::new()))
    }

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            name: "Someone".into(),
            email: email.into(),
            role,
            password: "s3cret-enough".into(),
            active: None,
        }
    }

    #[tokio::test]
    async fn create_then_verify_password() {
        let store = store();
        store
            .create(new_user("admin@example.com", Role::Admin))
            .await
            .unwrap();

        let found = store
            .verify_password("admin@example.com", "s3cret-enough")
            .await
            .unwrap();
        assert_eq!(found.unwrap().email, "admin@example.com");

        let wrong = store
            .verify_password("admin@example.com", "wrong")
            .await
            .unwrap();
        assert!(wrong.is_none());

        let unknown = store
            .verify_password("nobody@example.com", "s3cret-enough")
            .await
            .unwrap();
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn email_lookup_is_case_insensitive() {
        let store = store();
        store
            .create(new_user("Admin@Example.com", Role::Admin))
            .await
            .unwrap();
        let found = store.find_by_email("ADMIN@EXAMPLE.COM").await.unwrap();
        // stored normalized to lowercase
        assert_eq!(found.unwrap().email, "admin@example.com");
    }

    #[tokio::test]
    async fn duplicate_email_differs_only_by_case() {
        let store = store();
        store.create(new_user("A@x.com", Role::Admin)).await.unwrap();
        let err = store
            .create(new_user("a@x.com", Role::Editor))
            .await
            .unwrap_err();
        assert!(matches!(err, UserStoreError::DuplicateEmail));
        // store left unmodified
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn password_rotation_replaces_hash_and_salt() {
        let store = store();
        let created = store
            .create(new_user("admin@example.com", Role::Admin))
            .await
            .unwrap();
        let before = store.get_by_id(created.id).await.unwrap().unwrap();

        store
            .update(
                created.id,
                UserPatch {
                    password: Some("another-password".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let after = store.get_by_id(created.id).await.unwrap().unwrap();
        assert_ne!(before.password_hash, after.password_hash);
        assert_ne!(before.password_salt, after.password_salt);
        assert!(after.updated_at >= before.updated_at);

        assert!(store
            .verify_password("admin@example.com", "another-password")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .verify_password("admin@example.com", "s3cret-enough")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_email_uniqueness_excludes_self() {
        let store = store();
        let a = store.create(new_user("a@x.com", Role::Admin)).await.unwrap();
        store.create(new_user("b@x.com", Role::Editor)).await.unwrap();

        // re-saving your own email (any case) is fine
        let same = store
            .update(
                a.id,
                UserPatch {
                    email: Some("A@X.COM".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(same.email, "a@x.com");

        // taking someone else's is not
        let err = store
            .update(
                a.id,
                UserPatch {
                    email: Some("b@x.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UserStoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn update_and_remove_unknown_id_are_not_found() {
        let store = store();
        store.create(new_user("a@x.com", Role::Admin)).await.unwrap();

        let err = store
            .update(Uuid::new_v4(), UserPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UserStoreError::NotFound));

        let err = store.remove(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, UserStoreError::NotFound));
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn remove_deletes_the_record() {
        let store = store();
        let a = store.create(new_user("a@x.com", Role::Admin)).await.unwrap();
        store.remove(a.id).await.unwrap();
        assert_eq!(store.count().await, 0);
        assert!(store.get_by_id(a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_never_exposes_credentials() {
        let store = store();
        store
            .create(new_user("admin@example.com", Role::Admin))
            .await
            .unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        let json = serde_json::to_string(&listed).unwrap();
        assert!(!json.contains("passwordHash"));
        assert!(!json.contains("passwordSalt"));
        assert!(json.contains("admin@example.com"));
    }

    #[tokio::test]
    async fn unparsable_blob_reads_as_empty() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("av:admin:users", "{definitely not json").await.unwrap();
        let store = UserStore::new(kv);
        assert_eq!(store.count().await, 0);
        assert!(store.list().await.unwrap().is_empty());
    }

    struct FailingKv;

    #[async_trait]
    impl crate::kv::KvStore for FailingKv {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            anyhow::bail!("backing store unreachable")
        }
        async fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
            anyhow::bail!("backing store unreachable")
        }
        async fn del(&self, _key: &str) -> anyhow::Result<()> {
            anyhow::bail!("backing store unreachable")
        }
        async fn sadd(&self, _key: &str, _member: &str) -> anyhow::Result<()> {
            anyhow::bail!("backing store unreachable")
        }
        async fn srem(&self, _key: &str, _member: &str) -> anyhow::Result<()> {
            anyhow::bail!("backing store unreachable")
        }
        async fn smembers(&self, _key: &str) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("backing store unreachable")
        }
    }

    #[tokio::test]
    async fn count_fails_open_but_writes_propagate() {
        let store = UserStore::new(Arc::new(FailingKv));
        assert_eq!(store.count().await, 0);

        let err = store
            .create(new_user("a@x.com", Role::Admin))
            .await
            .unwrap_err();
        assert!(matches!(err, UserStoreError::Backend(_)));
    }
}
