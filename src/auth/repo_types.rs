use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::error::{AuthError, RepoError};

/// Role granted to a user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Administrator,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "administrator" => Ok(Role::Administrator),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            _ => Err(AuthError::InvalidRole),
        }
    }
}

/// How a user can authenticate. There is no variant without a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Native { password_hash: String },
    Google { google_id: String },
    Linked { password_hash: String, google_id: String },
}

impl Credentials {
    pub fn from_parts(
        password_hash: Option<String>,
        google_id: Option<String>,
    ) -> Option<Self> {
        match (password_hash, google_id) {
            (Some(password_hash), None) => Some(Credentials::Native { password_hash }),
            (None, Some(google_id)) => Some(Credentials::Google { google_id }),
            (Some(password_hash), Some(google_id)) => Some(Credentials::Linked {
                password_hash,
                google_id,
            }),
            (None, None) => None,
        }
    }

    pub fn password_hash(&self) -> Option<&str> {
        match self {
            Credentials::Native { password_hash } | Credentials::Linked { password_hash, .. } => {
                Some(password_hash)
            }
            Credentials::Google { .. } => None,
        }
    }

    pub fn google_id(&self) -> Option<&str> {
        match self {
            Credentials::Google { google_id } | Credentials::Linked { google_id, .. } => {
                Some(google_id)
            }
            Credentials::Native { .. } => None,
        }
    }

    /// Attach (or replace) the Google subject id.
    pub fn with_google_id(self, google_id: String) -> Self {
        match self {
            Credentials::Native { password_hash }
            | Credentials::Linked { password_hash, .. } => Credentials::Linked {
                password_hash,
                google_id,
            },
            Credentials::Google { .. } => Credentials::Google { google_id },
        }
    }

    /// Attach (or replace) the password hash.
    pub fn with_password_hash(self, password_hash: String) -> Self {
        match self {
            Credentials::Native { .. } => Credentials::Native { password_hash },
            Credentials::Google { google_id } | Credentials::Linked { google_id, .. } => {
                Credentials::Linked {
                    password_hash,
                    google_id,
                }
            }
        }
    }

    pub fn state(&self) -> IdentityState {
        match self {
            Credentials::Native { .. } => IdentityState::NativeOnly,
            Credentials::Google { .. } => IdentityState::GoogleOnly,
            Credentials::Linked { .. } => IdentityState::Linked,
        }
    }
}

/// Observed state of an email address.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdentityState {
    Absent,
    NativeOnly,
    GoogleOnly,
    Linked,
}

/// User record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub credentials: Credentials,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn state(&self) -> IdentityState {
        self.credentials.state()
    }
}

/// Row as stored in the `users` table.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub password_hash: Option<String>,
    pub google_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = RepoError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(|_| RepoError::Corrupt(format!("user {} has unknown role {:?}", row.id, row.role)))?;
        let credentials = Credentials::from_parts(row.password_hash, row.google_id).ok_or_else(
            || RepoError::Corrupt(format!("user {} has no authentication method", row.id)),
        )?;
        Ok(User {
            id: row.id,
            email: row.email,
            name: row.name,
            role,
            credentials,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(password_hash: Option<&str>, google_id: Option<&str>, role: &str) -> UserRow {
        let now = OffsetDateTime::now_utc();
        UserRow {
            id: Uuid::new_v4(),
            email: "row@example.com".into(),
            name: "Row".into(),
            role: role.into(),
            password_hash: password_hash.map(Into::into),
            google_id: google_id.map(Into::into),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Student".parse::<Role>().unwrap(), Role::Student);
        assert_eq!(" TEACHER ".parse::<Role>().unwrap(), Role::Teacher);
        assert!(matches!("guest".parse::<Role>(), Err(AuthError::InvalidRole)));
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Administrator).unwrap();
        assert_eq!(json, "\"administrator\"");
    }

    #[test]
    fn row_conversion_derives_state() {
        let native = User::try_from(row(Some("h"), None, "student")).unwrap();
        assert_eq!(native.state(), IdentityState::NativeOnly);

        let google = User::try_from(row(None, Some("g-1"), "student")).unwrap();
        assert_eq!(google.state(), IdentityState::GoogleOnly);

        let linked = User::try_from(row(Some("h"), Some("g-1"), "teacher")).unwrap();
        assert_eq!(linked.state(), IdentityState::Linked);
        assert_eq!(linked.role, Role::Teacher);
    }

    #[test]
    fn row_without_any_method_is_rejected() {
        let err = User::try_from(row(None, None, "student")).unwrap_err();
        assert!(matches!(err, RepoError::Corrupt(_)));
    }

    #[test]
    fn row_with_unknown_role_is_rejected() {
        let err = User::try_from(row(Some("h"), None, "janitor")).unwrap_err();
        assert!(matches!(err, RepoError::Corrupt(_)));
    }

    #[test]
    fn linking_and_setting_password_keep_the_other_method() {
        let native = Credentials::Native { password_hash: "h".into() };
        let linked = native.with_google_id("g-1".into());
        assert_eq!(linked.password_hash(), Some("h"));
        assert_eq!(linked.google_id(), Some("g-1"));

        let google = Credentials::Google { google_id: "g-2".into() };
        let linked = google.with_password_hash("h2".into());
        assert_eq!(linked.state(), IdentityState::Linked);
        assert_eq!(linked.google_id(), Some("g-2"));
    }
}
