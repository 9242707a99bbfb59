use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::{
    auth::{
        error::{AuthError, RepoError, VerifyError},
        jwt::{Claims, JwtKeys},
        oauth::IdentityProvider,
        password::{hash_password, verify_credentials},
        repo::{UpsertOutcome, UserRepository},
        repo_types::{IdentityState, Role, User},
    },
    config::AdminSeed,
};

/// A freshly authenticated user together with the token issued for them.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub token: String,
}

/// Account-identity reconciliation: decides how native and Google identities
/// map onto stored users and issues tokens for them.
#[derive(Clone)]
pub struct AuthService {
    repo: Arc<dyn UserRepository>,
    provider: Arc<dyn IdentityProvider>,
    keys: JwtKeys,
}

impl AuthService {
    pub fn new(
        repo: Arc<dyn UserRepository>,
        provider: Arc<dyn IdentityProvider>,
        keys: JwtKeys,
    ) -> Self {
        Self {
            repo,
            provider,
            keys,
        }
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    pub fn provider(&self) -> &dyn IdentityProvider {
        self.provider.as_ref()
    }

    pub async fn identity_state(&self, email: &str) -> Result<IdentityState, AuthError> {
        Ok(self
            .repo
            .find_by_email(email)
            .await?
            .map_or(IdentityState::Absent, |u| u.state()))
    }

    #[instrument(skip(self, password))]
    pub async fn register_native(
        &self,
        email: &str,
        name: &str,
        password: &str,
        role: Role,
    ) -> Result<User, AuthError> {
        if role == Role::Administrator {
            warn!(email, "self-registration as administrator refused");
            return Err(AuthError::InvalidRole);
        }
        if self.repo.find_by_email(email).await?.is_some() {
            warn!(email, "email already registered");
            return Err(AuthError::AlreadyExists);
        }

        let hash = hash_password(password)?;
        // The unique index still decides if a concurrent registration won.
        let user = self.repo.create_native(email, name, &hash, role).await?;
        info!(user_id = %user.id, email, role = %user.role, "user registered");
        Ok(user)
    }

    #[instrument(skip(self, password))]
    pub async fn authenticate_native(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let user = self.repo.find_by_email(email).await?.ok_or_else(|| {
            warn!(email, "login unknown email");
            AuthError::NotFound
        })?;

        match verify_credentials(&user, password) {
            Ok(()) => {}
            Err(VerifyError::NoPasswordSet) => {
                warn!(user_id = %user.id, "login on google-only account");
                return Err(AuthError::OAuthOnly);
            }
            Err(VerifyError::Mismatch) => {
                warn!(user_id = %user.id, "login invalid password");
                return Err(AuthError::InvalidCredentials);
            }
        }

        let token = self.keys.issue(&user)?;
        info!(user_id = %user.id, "user logged in");
        Ok(Session { user, token })
    }

    /// Reconcile a verified Google identity with the stored user for `email`.
    ///
    /// A native-only account is never linked here: whoever controls the Google
    /// identity must first prove the password through [`Self::link_google_account`].
    #[instrument(skip(self))]
    pub async fn upsert_google(
        &self,
        email: &str,
        name: &str,
        google_id: &str,
        role: Role,
    ) -> Result<User, AuthError> {
        match self.repo.upsert_google(email, name, google_id, role).await? {
            UpsertOutcome::Created(user) => {
                info!(user_id = %user.id, "google user created");
                Ok(user)
            }
            UpsertOutcome::Refreshed(user) => {
                info!(user_id = %user.id, "google user refreshed");
                Ok(user)
            }
            UpsertOutcome::LinkRequired => {
                warn!(email, "google sign-in for native account requires linking");
                Err(AuthError::LinkRequired)
            }
        }
    }

    /// Exchange an authorization code and sign the resulting user in.
    #[instrument(skip(self, code))]
    pub async fn google_login(&self, code: &str) -> Result<Session, AuthError> {
        let identity = self.provider.exchange_code(code).await?;
        let name = identity
            .name
            .clone()
            .unwrap_or_else(|| email_local_part(&identity.email).to_string());
        let user = self
            .upsert_google(&identity.email, &name, &identity.external_id, Role::Student)
            .await?;
        let token = self.keys.issue(&user)?;
        Ok(Session { user, token })
    }

    #[instrument(skip(self, password, code))]
    pub async fn link_google_account(
        &self,
        email: &str,
        password: &str,
        code: &str,
    ) -> Result<User, AuthError> {
        let user = self
            .repo
            .find_by_email(email)
            .await?
            .ok_or(AuthError::NotFound)?;

        if let Err(e) = verify_credentials(&user, password) {
            warn!(user_id = %user.id, reason = %e, "link refused");
            return Err(AuthError::InvalidCredentials);
        }
        let verified_hash = user
            .credentials
            .password_hash()
            .ok_or(AuthError::InvalidCredentials)?;

        let identity = self.provider.exchange_code(code).await?;
        if identity.email != user.email {
            warn!(user_id = %user.id, "google email does not match account email");
            return Err(AuthError::EmailMismatch);
        }

        // Only commits if the password verified above is still current.
        let linked = self
            .repo
            .link_google(&user.email, verified_hash, &identity.external_id)
            .await
            .map_err(|e| {
                warn!(user_id = %user.id, error = %e, "link not applied");
                AuthError::from(e)
            })?;
        info!(user_id = %linked.id, "google account linked");
        Ok(linked)
    }

    /// Set or replace the caller's password.
    #[instrument(skip(self, principal, new_password), fields(user_id = %principal.sub))]
    pub async fn set_password(&self, principal: &Claims, new_password: &str) -> Result<(), AuthError> {
        let user = self.profile(principal).await?;
        let hash = hash_password(new_password)?;
        self.repo.set_password(&user.email, &hash).await?;
        info!(user_id = %user.id, "password set");
        Ok(())
    }

    pub async fn profile(&self, principal: &Claims) -> Result<User, AuthError> {
        self.repo
            .find_by_id(principal.sub)
            .await?
            .ok_or(AuthError::NotFound)
    }

    /// Create the configured administrator unless the email is already taken.
    #[instrument(skip(self, seed), fields(email = %seed.email))]
    pub async fn bootstrap_admin(&self, seed: &AdminSeed) -> Result<Option<User>, AuthError> {
        if self.repo.find_by_email(&seed.email).await?.is_some() {
            return Ok(None);
        }
        let hash = hash_password(&seed.password)?;
        match self
            .repo
            .create_native(&seed.email, &seed.name, &hash, Role::Administrator)
            .await
        {
            Ok(user) => {
                info!(user_id = %user.id, "administrator created");
                Ok(Some(user))
            }
            Err(RepoError::AlreadyExists) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn email_local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}
