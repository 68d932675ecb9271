use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

pub const COOKIE_NAME: &str = "cadence-token";

pub const COOKIE_MAX_AGE: Duration = Duration::days(7);

#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    secure: bool,
}

impl CredentialStore {
    pub fn new(secure: bool) -> Self {
        Self { secure }
    }

    /// Returns the session token carried by this browser, if any.
    pub fn token(&self, jar: &CookieJar) -> Option<String> {
        jar.get(COOKIE_NAME)
            .map(|cookie| cookie.value().to_string())
            .filter(|token| !token.is_empty())
    }

    pub fn store(&self, jar: CookieJar, token: String) -> CookieJar {
        jar.add(self.cookie(token))
    }

    /// Expires the session cookie whether or not the browser sent one.
    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        let mut cookie = self.cookie(String::new());
        cookie.make_removal();
        jar.add(cookie)
    }

    fn cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build((COOKIE_NAME, value))
            .http_only(true)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(COOKIE_MAX_AGE)
            .secure(self.secure)
            .build()
    }
}
