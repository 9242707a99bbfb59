use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::{
    error::RepoError,
    repo::{refresh_from_google, UpsertOutcome, UserRepository},
    repo_types::{Credentials, IdentityState, Role, User},
};

/// In-memory user store keyed by email. One mutex serializes every
/// read-modify-write sequence, standing in for the unique index and row locks.
#[derive(Clone, Default)]
pub struct MemoryUserRepository {
    users: Arc<Mutex<HashMap<String, User>>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }

    fn new_user(email: &str, name: &str, role: Role, credentials: Credentials) -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: name.to_string(),
            role,
            credentials,
            created_at: now,
            updated_at: now,
        }
    }

    async fn insert(&self, user: User) -> Result<User, RepoError> {
        let mut users = self.users.lock().await;
        if users.contains_key(&user.email) {
            return Err(RepoError::AlreadyExists);
        }
        if let Some(google_id) = user.credentials.google_id() {
            ensure_google_id_free(&users, &user.email, google_id)?;
        }
        users.insert(user.email.clone(), user.clone());
        Ok(user)
    }
}

/// Same rule as the unique index on `google_id`.
fn ensure_google_id_free(
    users: &HashMap<String, User>,
    email: &str,
    google_id: &str,
) -> Result<(), RepoError> {
    let taken = users
        .values()
        .any(|u| u.email != email && u.credentials.google_id() == Some(google_id));
    if taken {
        return Err(RepoError::GoogleIdTaken);
    }
    Ok(())
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        Ok(self.users.lock().await.get(email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|u| u.id == id)
            .cloned())
    }

    async fn create_native(
        &self,
        email: &str,
        name: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<User, RepoError> {
        let credentials = Credentials::Native {
            password_hash: password_hash.to_string(),
        };
        self.insert(Self::new_user(email, name, role, credentials)).await
    }

    async fn create_google(
        &self,
        email: &str,
        name: &str,
        google_id: &str,
        role: Role,
    ) -> Result<User, RepoError> {
        let credentials = Credentials::Google {
            google_id: google_id.to_string(),
        };
        self.insert(Self::new_user(email, name, role, credentials)).await
    }

    async fn upsert_google(
        &self,
        email: &str,
        name: &str,
        google_id: &str,
        role: Role,
    ) -> Result<UpsertOutcome, RepoError> {
        let mut users = self.users.lock().await;
        let Some(existing) = users.get(email).cloned() else {
            ensure_google_id_free(&users, email, google_id)?;
            let credentials = Credentials::Google {
                google_id: google_id.to_string(),
            };
            let user = Self::new_user(email, name, role, credentials);
            users.insert(email.to_string(), user.clone());
            return Ok(UpsertOutcome::Created(user));
        };

        if existing.state() == IdentityState::NativeOnly {
            return Ok(UpsertOutcome::LinkRequired);
        }
        ensure_google_id_free(&users, email, google_id)?;

        let refreshed = refresh_from_google(existing, name, google_id, OffsetDateTime::now_utc());
        users.insert(email.to_string(), refreshed.clone());
        Ok(UpsertOutcome::Refreshed(refreshed))
    }

    async fn link_google(
        &self,
        email: &str,
        expected_password_hash: &str,
        google_id: &str,
    ) -> Result<User, RepoError> {
        let mut users = self.users.lock().await;
        let current = users.get(email).ok_or(RepoError::NotFound)?;
        if current.credentials.password_hash() != Some(expected_password_hash) {
            return Err(RepoError::CredentialsChanged);
        }
        ensure_google_id_free(&users, email, google_id)?;

        let user = users.get_mut(email).ok_or(RepoError::NotFound)?;
        user.credentials = user.credentials.clone().with_google_id(google_id.to_string());
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }

    async fn set_password(&self, email: &str, password_hash: &str) -> Result<(), RepoError> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(email).ok_or(RepoError::NotFound)?;
        user.credentials = user
            .credentials
            .clone()
            .with_password_hash(password_hash.to_string());
        user.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_rejects_duplicate_email() {
        let repo = MemoryUserRepository::new();
        repo.create_native("a@example.com", "A", "hash", Role::Student)
            .await
            .unwrap();
        let err = repo
            .create_google("a@example.com", "A", "g-1", Role::Student)
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::AlreadyExists));
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn emails_are_matched_exactly() {
        let repo = MemoryUserRepository::new();
        repo.create_native("Test@x.com", "T", "hash", Role::Student)
            .await
            .unwrap();
        assert!(repo.find_by_email("test@x.com").await.unwrap().is_none());
        assert!(repo.find_by_email("Test@x.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn upsert_creates_then_refreshes() {
        let repo = MemoryUserRepository::new();
        let created = match repo
            .upsert_google("g@example.com", "G", "g-1", Role::Student)
            .await
            .unwrap()
        {
            UpsertOutcome::Created(u) => u,
            other => panic!("expected Created, got {other:?}"),
        };
        assert_eq!(created.state(), IdentityState::GoogleOnly);

        let refreshed = match repo
            .upsert_google("g@example.com", "Gee", "g-1", Role::Student)
            .await
            .unwrap()
        {
            UpsertOutcome::Refreshed(u) => u,
            other => panic!("expected Refreshed, got {other:?}"),
        };
        assert_eq!(refreshed.id, created.id);
        assert_eq!(refreshed.name, "Gee");
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn upsert_leaves_native_account_untouched() {
        let repo = MemoryUserRepository::new();
        let before = repo
            .create_native("n@example.com", "N", "hash", Role::Teacher)
            .await
            .unwrap();
        let outcome = repo
            .upsert_google("n@example.com", "Other", "g-9", Role::Student)
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::LinkRequired);
        let after = repo.find_by_email("n@example.com").await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn link_and_set_password_fail_for_unknown_email() {
        let repo = MemoryUserRepository::new();
        assert!(matches!(
            repo.link_google("nobody@example.com", "h", "g").await,
            Err(RepoError::NotFound)
        ));
        assert!(matches!(
            repo.set_password("nobody@example.com", "h").await,
            Err(RepoError::NotFound)
        ));
    }

    #[tokio::test]
    async fn set_password_links_google_only_account() {
        let repo = MemoryUserRepository::new();
        repo.create_google("g@example.com", "G", "g-1", Role::Student)
            .await
            .unwrap();
        repo.set_password("g@example.com", "hash").await.unwrap();
        let user = repo.find_by_email("g@example.com").await.unwrap().unwrap();
        assert_eq!(user.state(), IdentityState::Linked);
    }

    #[tokio::test]
    async fn google_id_is_bound_to_one_account() {
        let repo = MemoryUserRepository::new();
        repo.upsert_google("old@example.com", "G", "g-1", Role::Student)
            .await
            .unwrap();

        let err = repo
            .upsert_google("renamed@example.com", "G", "g-1", Role::Student)
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::GoogleIdTaken));
        let err = repo
            .create_google("other@example.com", "O", "g-1", Role::Student)
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::GoogleIdTaken));

        repo.create_native("n@example.com", "N", "hash", Role::Teacher)
            .await
            .unwrap();
        let err = repo
            .link_google("n@example.com", "hash", "g-1")
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::GoogleIdTaken));
        assert_eq!(repo.len().await, 2);
        let native = repo.find_by_email("n@example.com").await.unwrap().unwrap();
        assert_eq!(native.state(), IdentityState::NativeOnly);
    }

    #[tokio::test]
    async fn link_requires_the_verified_password_hash() {
        let repo = MemoryUserRepository::new();
        repo.create_native("n@example.com", "N", "hash-old", Role::Student)
            .await
            .unwrap();
        repo.set_password("n@example.com", "hash-new").await.unwrap();

        let err = repo
            .link_google("n@example.com", "hash-old", "g-1")
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::CredentialsChanged));
        let user = repo.find_by_email("n@example.com").await.unwrap().unwrap();
        assert_eq!(user.state(), IdentityState::NativeOnly);

        let linked = repo
            .link_google("n@example.com", "hash-new", "g-1")
            .await
            .unwrap();
        assert_eq!(linked.state(), IdentityState::Linked);
    }
}
