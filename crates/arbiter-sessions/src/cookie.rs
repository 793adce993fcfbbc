use axum_extra::extract::cookie::{Cookie, SameSite};

/// Cookie name — not a framework default.
pub const SESSION_COOKIE: &str = "arbiter_session";

/// Build the session carrier cookie: HttpOnly, SameSite=Lax, path=/,
/// Secure when the deployment is production, Max-Age = the rolling session
/// lifetime.
pub fn session_cookie(token: String, secure: bool, max_age_days: u32) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(i64::from(max_age_days)))
        .build()
}

/// An immediately-expiring cookie that clears the session on logout.
pub fn clear_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::ZERO)
        .build()
}
