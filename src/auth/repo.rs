use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::{
    error::RepoError,
    repo_types::{IdentityState, Role, User, UserRow},
};

/// Result of reconciling a Google sign-in against stored users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(User),
    Refreshed(User),
    /// The email belongs to a native-only account; nothing was written.
    LinkRequired,
}

/// Persistence for users. Every method is atomic.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError>;

    async fn create_native(
        &self,
        email: &str,
        name: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<User, RepoError>;

    async fn create_google(
        &self,
        email: &str,
        name: &str,
        google_id: &str,
        role: Role,
    ) -> Result<User, RepoError>;

    /// Create a Google-only user, or refresh an existing Google/linked one.
    /// Native-only accounts are left untouched.
    async fn upsert_google(
        &self,
        email: &str,
        name: &str,
        google_id: &str,
        role: Role,
    ) -> Result<UpsertOutcome, RepoError>;

    /// Attach `google_id` to the user, provided its password hash is still
    /// `expected_password_hash`. Otherwise `CredentialsChanged`.
    async fn link_google(
        &self,
        email: &str,
        expected_password_hash: &str,
        google_id: &str,
    ) -> Result<User, RepoError>;

    async fn set_password(&self, email: &str, password_hash: &str) -> Result<(), RepoError>;
}

/// Apply a repeat Google sign-in to an existing user. The role is kept.
pub(crate) fn refresh_from_google(
    mut user: User,
    name: &str,
    google_id: &str,
    now: OffsetDateTime,
) -> User {
    let name = name.trim();
    if !name.is_empty() && name != user.name {
        user.name = name.to_string();
    }
    user.credentials = user.credentials.with_google_id(google_id.to_string());
    user.updated_at = now;
    user
}

const GOOGLE_ID_CONSTRAINT: &str = "users_google_id_key";

fn map_unique(e: sqlx::Error) -> RepoError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            if db.constraint() == Some(GOOGLE_ID_CONSTRAINT) {
                RepoError::GoogleIdTaken
            } else {
                RepoError::AlreadyExists
            }
        }
        _ => RepoError::Database(e),
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn lock_by_email(
        tx: &mut Transaction<'_, Postgres>,
        email: &str,
    ) -> Result<Option<UserRow>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, name, role, password_hash, google_id, created_at, updated_at
            FROM users
            WHERE email = $1
            FOR UPDATE
            "#,
        )
        .bind(email)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, name, role, password_hash, google_id, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, name, role, password_hash, google_id, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn create_native(
        &self,
        email: &str,
        name: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<User, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, email, name, role, password_hash)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, email, name, role, password_hash, google_id, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(name)
        .bind(role.as_str())
        .bind(password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique)?;
        User::try_from(row)
    }

    async fn create_google(
        &self,
        email: &str,
        name: &str,
        google_id: &str,
        role: Role,
    ) -> Result<User, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, email, name, role, google_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, email, name, role, password_hash, google_id, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(name)
        .bind(role.as_str())
        .bind(google_id)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique)?;
        User::try_from(row)
    }

    async fn upsert_google(
        &self,
        email: &str,
        name: &str,
        google_id: &str,
        role: Role,
    ) -> Result<UpsertOutcome, RepoError> {
        let mut tx = self.db.begin().await?;

        let existing = match Self::lock_by_email(&mut tx, email).await? {
            Some(row) => row,
            None => {
                let inserted = sqlx::query_as::<_, UserRow>(
                    r#"
                    INSERT INTO users (id, email, name, role, google_id)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (email) DO NOTHING
                    RETURNING id, email, name, role, password_hash, google_id, created_at, updated_at
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(email)
                .bind(name)
                .bind(role.as_str())
                .bind(google_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_unique)?;

                if let Some(row) = inserted {
                    tx.commit().await?;
                    return Ok(UpsertOutcome::Created(User::try_from(row)?));
                }

                // A concurrent sign-in created the row first.
                Self::lock_by_email(&mut tx, email)
                    .await?
                    .ok_or(RepoError::NotFound)?
            }
        };

        let user = User::try_from(existing)?;
        if user.state() == IdentityState::NativeOnly {
            tx.rollback().await?;
            return Ok(UpsertOutcome::LinkRequired);
        }

        let refreshed = refresh_from_google(user, name, google_id, OffsetDateTime::now_utc());
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            UPDATE users
            SET name = $2, google_id = $3, updated_at = $4
            WHERE id = $1
            RETURNING id, email, name, role, password_hash, google_id, created_at, updated_at
            "#,
        )
        .bind(refreshed.id)
        .bind(&refreshed.name)
        .bind(google_id)
        .bind(refreshed.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique)?;
        tx.commit().await?;

        Ok(UpsertOutcome::Refreshed(User::try_from(row)?))
    }

    async fn link_google(
        &self,
        email: &str,
        expected_password_hash: &str,
        google_id: &str,
    ) -> Result<User, RepoError> {
        let mut tx = self.db.begin().await?;

        let current = Self::lock_by_email(&mut tx, email)
            .await?
            .ok_or(RepoError::NotFound)?;
        if current.password_hash.as_deref() != Some(expected_password_hash) {
            tx.rollback().await?;
            return Err(RepoError::CredentialsChanged);
        }

        let row = sqlx::query_as::<_, UserRow>(
            r#"
            UPDATE users
            SET google_id = $2, updated_at = now()
            WHERE id = $1
            RETURNING id, email, name, role, password_hash, google_id, created_at, updated_at
            "#,
        )
        .bind(current.id)
        .bind(google_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique)?;
        tx.commit().await?;

        User::try_from(row)
    }

    async fn set_password(&self, email: &str, password_hash: &str) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, updated_at = now()
            WHERE email = $1
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
