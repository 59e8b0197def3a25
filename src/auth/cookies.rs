use axum::http::{header::SET_COOKIE, HeaderMap, HeaderValue};
use tracing::warn;

pub const SESSION_COOKIE: &str = "av_session";
pub const ADMIN_RECORD_COOKIE: &str = "av_admin_record";

const ADMIN_RECORD_MAX_AGE_SECS: u64 = 180 * 24 * 60 * 60;

/// Extracts a cookie from the raw `Cookie:` header. Some runtimes only hand
/// us the raw header, so parsing stays manual: semicolon-delimited pairs,
/// values percent-decoded.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for part in header.split(';') {
        let Some((k, v)) = part.trim().split_once('=') else {
            continue;
        };
        if k == name {
            return Some(percent_decode(v));
        }
    }
    None
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Some(decoded) = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                out.push(decoded);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn build_cookie(name: &str, value: &str, max_age_secs: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn session_cookie(token: &str, ttl_secs: u64, secure: bool) -> String {
    build_cookie(SESSION_COOKIE, token, ttl_secs, secure)
}

pub fn clear_session_cookie(secure: bool) -> String {
    build_cookie(SESSION_COOKIE, "", 0, secure)
}

pub fn admin_record_cookie(token: &str, secure: bool) -> String {
    build_cookie(ADMIN_RECORD_COOKIE, token, ADMIN_RECORD_MAX_AGE_SECS, secure)
}

pub fn clear_admin_record_cookie(secure: bool) -> String {
    build_cookie(ADMIN_RECORD_COOKIE, "", 0, secure)
}

/// Appends a `Set-Cookie` header. Our cookie values are JWT/base64url text,
/// so conversion cannot realistically fail; a failure is logged and dropped.
pub fn push_cookie(headers: &mut HeaderMap, cookie: String) {
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            headers.append(SET_COOKIE, value);
        }
        Err(e) => warn!(error = %e, "invalid Set-Cookie value"),
    }
}
