use rocket::http::{Cookie, CookieJar, SameSite};
use time::Duration as TimeDuration;

use crate::auth::AuthConfig;
use crate::auth::jwt::SignedToken;

/// Owns the two session cookies. Nothing else in the crate writes cookies.
#[derive(Debug, Clone)]
pub struct SessionCookies {
    access_name: String,
    refresh_name: String,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
    domain: Option<String>,
    secure: bool,
}

impl SessionCookies {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            access_name: config.access_cookie_name.clone(),
            refresh_name: config.refresh_cookie_name.clone(),
            access_ttl_secs: config.access_token_ttl_secs,
            refresh_ttl_secs: config.refresh_token_ttl_secs,
            domain: config.cookie_domain.clone(),
            secure: config.cookie_secure,
        }
    }

    pub fn start_session(&self, cookies: &CookieJar<'_>, access: &SignedToken, refresh: &SignedToken) {
        self.set_access_token(cookies, access);
        cookies.add(self.build(&self.refresh_name, refresh.token.clone(), self.refresh_ttl_secs));
    }

    pub fn set_access_token(&self, cookies: &CookieJar<'_>, access: &SignedToken) {
        cookies.add(self.build(&self.access_name, access.token.clone(), self.access_ttl_secs));
    }

    /// Expires both cookies. Safe to call when no session exists.
    pub fn end_session(&self, cookies: &CookieJar<'_>) {
        for name in [&self.access_name, &self.refresh_name] {
            let mut cookie = Cookie::build((name.clone(), String::new()))
                .path("/")
                .removal()
                .build();

            if let Some(domain) = &self.domain {
                cookie.set_domain(domain.clone());
            }
            cookies.add(cookie);
        }
    }

    pub fn read_access_token(&self, cookies: &CookieJar<'_>) -> Option<String> {
        read(cookies, &self.access_name)
    }

    pub fn read_refresh_token(&self, cookies: &CookieJar<'_>) -> Option<String> {
        read(cookies, &self.refresh_name)
    }

    fn build(&self, name: &str, value: String, ttl_secs: i64) -> Cookie<'static> {
        let mut cookie = Cookie::build((name.to_string(), value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(TimeDuration::seconds(ttl_secs))
            .build();

        if let Some(domain) = &self.domain {
            cookie.set_domain(domain.clone());
        }
        cookie
    }
}

fn read(cookies: &CookieJar<'_>, name: &str) -> Option<String> {
    cookies
        .get(name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}
