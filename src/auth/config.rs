use crate::auth::{AuthError, AuthResult};

/// Longest accepted token lifetime: one year.
pub const MAX_TOKEN_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// Authentication configuration loaded from environment variables.
///
/// Both signing secrets are required; a missing secret is a startup failure.
#[derive(Clone)]
pub struct AuthConfig {
    pub issuer: String,
    pub audience: String,
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub access_cookie_name: String,
    pub refresh_cookie_name: String,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub password_memory_kib: u32,
    pub password_time_cost: u32,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .field("access_cookie_name", &self.access_cookie_name)
            .field("refresh_cookie_name", &self.refresh_cookie_name)
            .field("cookie_domain", &self.cookie_domain)
            .field("cookie_secure", &self.cookie_secure)
            .finish_non_exhaustive()
    }
}

impl AuthConfig {
    pub fn from_env() -> AuthResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> AuthResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let issuer = lookup("BACKOFFICE_JWT_ISSUER").unwrap_or_else(|| "http://localhost".into());
        let audience =
            lookup("BACKOFFICE_JWT_AUDIENCE").unwrap_or_else(|| "backoffice-api".into());
        let access_token_secret = required_secret(&lookup, "BACKOFFICE_JWT_SECRET")?;
        let refresh_token_secret = required_secret(&lookup, "BACKOFFICE_JWT_REFRESH_SECRET")?;
        if access_token_secret == refresh_token_secret {
            return Err(AuthError::Config(
                "BACKOFFICE_JWT_SECRET and BACKOFFICE_JWT_REFRESH_SECRET must differ".into(),
            ));
        }
        let access_token_ttl_secs = parse_ttl(&lookup, "BACKOFFICE_ACCESS_TOKEN_TTL_SECS", 15 * 60)?;
        let refresh_token_ttl_secs =
            parse_ttl(&lookup, "BACKOFFICE_REFRESH_TOKEN_TTL_SECS", 7 * 24 * 60 * 60)?;
        let access_cookie_name =
            lookup("BACKOFFICE_ACCESS_COOKIE_NAME").unwrap_or_else(|| "token".into());
        let refresh_cookie_name =
            lookup("BACKOFFICE_REFRESH_COOKIE_NAME").unwrap_or_else(|| "refreshToken".into());
        let cookie_domain = lookup("BACKOFFICE_COOKIE_DOMAIN").filter(|d| !d.is_empty());
        let production = lookup("APP_ENV")
            .map(|env| env.eq_ignore_ascii_case("production"))
            .unwrap_or(false);
        let cookie_secure = lookup("BACKOFFICE_COOKIE_SECURE")
            .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "on"))
            .unwrap_or(production);
        let password_memory_kib =
            parse_positive(&lookup, "BACKOFFICE_PASSWORD_MEMORY_KIB", 19 * 1024)?;
        let password_time_cost = parse_positive(&lookup, "BACKOFFICE_PASSWORD_TIME_COST", 2)?;

        Ok(Self {
            issuer,
            audience,
            access_token_secret,
            refresh_token_secret,
            access_token_ttl_secs,
            refresh_token_ttl_secs,
            access_cookie_name,
            refresh_cookie_name,
            cookie_domain,
            cookie_secure,
            password_memory_kib,
            password_time_cost,
        })
    }
}

fn required_secret<F>(lookup: &F, key: &str) -> AuthResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AuthError::Config(format!("{key} is required"))),
    }
}

fn parse_positive<F, T>(lookup: &F, key: &str, default: T) -> AuthResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Default,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) if value > T::default() => Ok(value),
            _ => Err(AuthError::Config(format!(
                "{key} must be a positive integer, got '{raw}'"
            ))),
        },
    }
}

fn parse_ttl<F>(lookup: &F, key: &str, default: i64) -> AuthResult<i64>
where
    F: Fn(&str) -> Option<String>,
{
    let ttl = parse_positive(lookup, key, default)?;
    if ttl > MAX_TOKEN_TTL_SECS {
        return Err(AuthError::Config(format!(
            "{key} must be at most {MAX_TOKEN_TTL_SECS} seconds, got {ttl}"
        )));
    }
    Ok(ttl)
}
