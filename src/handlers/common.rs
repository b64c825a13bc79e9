use crate::{config::AppConfig, errors::ApiError};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::Response;
use rand::{distributions::Alphanumeric, Rng};
use validator::Validate;

/// Validates a request payload, mapping failures to a 400 response.
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::ValidationError(e.to_string()))
}

/// Extracts the cart session id from the request's Cookie headers.
pub fn cart_session_from_headers(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == cookie_name && !value.is_empty()).then(|| value.to_string())
        })
}

/// Opaque session id for anonymous carts. 32 alphanumeric characters,
/// carrying no user information.
pub fn new_cart_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Existing session from the cookie, or a fresh one plus the Set-Cookie
/// value that must accompany the response.
pub fn ensure_cart_session(
    headers: &HeaderMap,
    config: &AppConfig,
) -> (String, Option<String>) {
    match cart_session_from_headers(headers, &config.cart_cookie_name) {
        Some(session_id) => (session_id, None),
        None => {
            let session_id = new_cart_session_id();
            let cookie = cart_session_cookie(config, &session_id);
            (session_id, Some(cookie))
        }
    }
}

/// Builds the cart session cookie: HttpOnly and SameSite=Lax always,
/// Secure outside of development.
pub fn cart_session_cookie(config: &AppConfig, value: &str) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        config.cart_cookie_name,
        value,
        config.cart_cookie_max_age_secs()
    );
    if config.is_production() {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Appends a Set-Cookie header to an already-built response.
pub fn apply_set_cookie(response: &mut Response, cookie: Option<String>) -> Result<(), ApiError> {
    if let Some(cookie) = cookie {
        let value =
            HeaderValue::from_str(&cookie).map_err(|_| ApiError::InternalServerError)?;
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    Ok(())
}
