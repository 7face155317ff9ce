//! Session token extraction and the authenticated caller.
//!
//! A token is taken from `Authorization: Bearer` first and from the session
//! cookie otherwise. Resolution goes through the auth service on every
//! request; nothing about the caller is cached.

use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE, USER_AGENT},
    HeaderMap, HeaderValue,
};
use std::net::SocketAddr;

use super::{error::ApiError, AppState};
use crate::{audit::ClientInfo, auth::ResolvedSession, error::Error, model::DenialReason};

pub const SESSION_COOKIE_NAME: &str = "sigma_session";

/// Resolve the caller's session or answer 401.
pub async fn require_auth(headers: &HeaderMap, state: &AppState) -> Result<ResolvedSession, ApiError> {
    let Some(token) = extract_session_token(headers) else {
        return Err(Error::AuthenticationDenied(DenialReason::InvalidToken).into());
    };
    state
        .auth
        .resolve_session(&token)
        .await?
        .ok_or_else(|| Error::AuthenticationDenied(DenialReason::InvalidToken).into())
}

pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let value = headers.get(COOKIE)?.to_str().ok()?;
    value.split(';').find_map(|pair| {
        let (key, val) = pair.trim().split_once('=')?;
        (key.trim() == SESSION_COOKIE_NAME && !val.trim().is_empty())
            .then(|| val.trim().to_string())
    })
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Client address plus the user agent.
///
/// `X-Forwarded-For` and `X-Real-IP` are client-controlled; they are read only
/// when `trust_proxy_headers` is set, i.e. a proxy in front overwrites them.
/// Otherwise the socket peer is the address of record.
pub fn client_info(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> ClientInfo {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    let forwarded = if trust_proxy_headers {
        header("x-forwarded-for")
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .or_else(|| header("x-real-ip"))
            .map(str::to_string)
    } else {
        None
    };
    let ip = forwarded.or_else(|| peer.map(|addr| addr.ip().to_string()));
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    ClientInfo::new(ip, user_agent)
}

/// `HttpOnly` cookie carrying the session token.
pub fn session_cookie(token: &str, max_age_seconds: i64, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub fn clear_session_cookie(secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    session_cookie("", 0, secure)
}
