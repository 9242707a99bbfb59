use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

/// Credentials for the administrator created at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminSeed {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub google: GoogleConfig,
    pub frontend_url: String,
    pub cors_origin: Option<String>,
    pub password_min_len: usize,
    pub admin: Option<AdminSeed>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;

        let secret = std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        if secret.trim().is_empty() {
            bail!("JWT_SECRET is empty");
        }
        let jwt = JwtConfig {
            secret,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "hybrid-auth".into()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "hybrid-auth-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(60 * 24),
        };

        let google = GoogleConfig {
            client_id: std::env::var("GOOGLE_CLIENT_ID").context("GOOGLE_CLIENT_ID is not set")?,
            client_secret: std::env::var("GOOGLE_CLIENT_SECRET")
                .context("GOOGLE_CLIENT_SECRET is not set")?,
            redirect_url: std::env::var("GOOGLE_REDIRECT_URL").unwrap_or_else(|_| {
                "http://localhost:8080/api/v1/auth/google/callback".into()
            }),
        };

        let admin = match (
            std::env::var("ADMIN_EMAIL").ok(),
            std::env::var("ADMIN_PASSWORD").ok(),
        ) {
            (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => {
                Some(AdminSeed {
                    email,
                    name: std::env::var("ADMIN_NAME").unwrap_or_else(|_| "Administrator".into()),
                    password,
                })
            }
            _ => None,
        };

        Ok(Self {
            database_url,
            jwt,
            google,
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3001".into())
                .trim_end_matches('/')
                .to_string(),
            cors_origin: std::env::var("CORS_ORIGIN").ok().filter(|v| !v.is_empty()),
            password_min_len: std::env::var("PASSWORD_MIN_LEN")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(8),
            admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: [(&str, Option<&str>); 4] = [
        ("DATABASE_URL", Some("postgres://localhost/auth")),
        ("JWT_SECRET", Some("s3cret")),
        ("GOOGLE_CLIENT_ID", Some("cid")),
        ("GOOGLE_CLIENT_SECRET", Some("csecret")),
    ];

    fn with_base<R>(extra: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let mut vars: Vec<(&str, Option<&str>)> = BASE.to_vec();
        for (key, value) in extra {
            vars.retain(|(k, _)| k != key);
            vars.push((key, *value));
        }
        for key in [
            "JWT_ISSUER",
            "JWT_AUDIENCE",
            "JWT_TTL_MINUTES",
            "FRONTEND_URL",
            "CORS_ORIGIN",
            "PASSWORD_MIN_LEN",
            "ADMIN_EMAIL",
            "ADMIN_PASSWORD",
            "ADMIN_NAME",
        ] {
            if !vars.iter().any(|(k, _)| *k == key) {
                vars.push((key, None));
            }
        }
        temp_env::with_vars(vars, f)
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = with_base(&[], AppConfig::from_env).unwrap();
        assert_eq!(cfg.jwt.issuer, "hybrid-auth");
        assert_eq!(cfg.jwt.ttl_minutes, 1440);
        assert_eq!(cfg.frontend_url, "http://localhost:3001");
        assert_eq!(cfg.password_min_len, 8);
        assert!(cfg.admin.is_none());
        assert!(cfg.cors_origin.is_none());
    }

    #[test]
    fn missing_or_empty_secret_is_fatal() {
        assert!(with_base(&[("JWT_SECRET", None)], AppConfig::from_env).is_err());
        assert!(with_base(&[("JWT_SECRET", Some("  "))], AppConfig::from_env).is_err());
    }

    #[test]
    fn missing_google_client_is_fatal() {
        assert!(with_base(&[("GOOGLE_CLIENT_ID", None)], AppConfig::from_env).is_err());
    }

    #[test]
    fn admin_seed_needs_email_and_password() {
        let cfg = with_base(&[("ADMIN_EMAIL", Some("root@example.com"))], AppConfig::from_env)
            .unwrap();
        assert!(cfg.admin.is_none());

        let cfg = with_base(
            &[
                ("ADMIN_EMAIL", Some("root@example.com")),
                ("ADMIN_PASSWORD", Some("rootpw123")),
            ],
            AppConfig::from_env,
        )
        .unwrap();
        let admin = cfg.admin.unwrap();
        assert_eq!(admin.name, "Administrator");
        assert_eq!(admin.email, "root@example.com");
    }

    #[test]
    fn frontend_url_trailing_slash_is_trimmed() {
        let cfg = with_base(
            &[("FRONTEND_URL", Some("https://app.example.com/"))],
            AppConfig::from_env,
        )
        .unwrap();
        assert_eq!(cfg.frontend_url, "https://app.example.com");
    }
}
