use axum::http::{header, HeaderMap, HeaderValue};
use cookie::{Cookie, SameSite};

use crate::models::Session;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Backend tokens as the browser sent them.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BrowserTokens {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl BrowserTokens {
    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

pub fn read_tokens(headers: &HeaderMap) -> BrowserTokens {
    let mut tokens = BrowserTokens::default();
    for raw in headers.get_all(header::COOKIE) {
        let Ok(raw) = raw.to_str() else {
            continue;
        };
        for cookie in Cookie::split_parse(raw).flatten() {
            let value = cookie.value();
            if value.is_empty() {
                continue;
            }
            match cookie.name() {
                ACCESS_COOKIE => tokens.access = Some(value.to_string()),
                REFRESH_COOKIE => tokens.refresh = Some(value.to_string()),
                _ => {}
            }
        }
    }
    tokens
}

fn session_cookie(name: &'static str, value: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie
}

fn append(headers: &mut HeaderMap, cookie: &Cookie<'_>) {
    if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
        headers.append(header::SET_COOKIE, value);
    }
}

pub fn append_session_cookies(headers: &mut HeaderMap, session: &Session) {
    append(
        headers,
        &session_cookie(ACCESS_COOKIE, session.access_token.clone()),
    );
    append(
        headers,
        &session_cookie(REFRESH_COOKIE, session.refresh_token.clone()),
    );
}

pub fn append_cleared_cookies(headers: &mut HeaderMap) {
    for name in [ACCESS_COOKIE, REFRESH_COOKIE] {
        let mut cookie = session_cookie(name, String::new());
        cookie.make_removal();
        append(headers, &cookie);
    }
}
