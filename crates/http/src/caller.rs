//! Caller identity extraction.
//!
//! Authentication happens upstream; the gateway forwards the verified user
//! as `x-user-id` and `x-user-role`. Requests without `x-user-id` are
//! anonymous.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use libris_authz::{Caller, Role};
use libris_db::UserId;

use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Extractor for the [`Caller`] behind a request.
#[derive(Debug, Clone)]
pub struct CurrentCaller(pub Caller);

impl<S> FromRequestParts<S> for CurrentCaller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(caller) = parts.extensions.get::<Caller>() {
            return Ok(Self(caller.clone()));
        }
        let caller = caller_from_parts(parts)?;
        parts.extensions.insert(caller.clone());
        Ok(Self(caller))
    }
}

/// Build a [`Caller`] from request headers and connection info.
pub fn caller_from_parts(parts: &Parts) -> Result<Caller, AppError> {
    let ip = client_ip(parts);

    let Some(raw_id) = header_str(&parts.headers, USER_ID_HEADER) else {
        return Ok(Caller::anonymous(ip));
    };
    let user_id = raw_id
        .parse::<u64>()
        .map(UserId)
        .map_err(|_| AppError::unauthorized(format!("malformed {USER_ID_HEADER} header")))?;

    let role = match header_str(&parts.headers, USER_ROLE_HEADER) {
        Some(raw) => raw
            .parse::<Role>()
            .map_err(|err| AppError::unauthorized(err.to_string()))?,
        None => Role::Member,
    };

    Ok(Caller::user(user_id, role, ip))
}

/// First hop of `x-forwarded-for`, then `x-real-ip`, then the socket peer.
fn client_ip(parts: &Parts) -> String {
    if let Some(forwarded) = header_str(&parts.headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|ip| !ip.is_empty()) {
            return first.to_string();
        }
    }
    if let Some(real) = header_str(&parts.headers, "x-real-ip") {
        return real.to_string();
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/api/books/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn anonymous_without_user_header() {
        let caller = caller_from_parts(&parts(&[("x-real-ip", "192.0.2.7")])).unwrap();
        assert_eq!(caller, Caller::anonymous("192.0.2.7"));
    }

    #[test]
    fn forwarded_for_wins_over_real_ip() {
        let caller = caller_from_parts(&parts(&[
            ("x-user-id", "12"),
            ("x-user-role", "premium"),
            ("x-forwarded-for", "198.51.100.1, 10.0.0.1"),
            ("x-real-ip", "10.0.0.9"),
        ]))
        .unwrap();
        assert_eq!(caller.user_id, Some(UserId(12)));
        assert_eq!(caller.role, Role::Premium);
        assert_eq!(caller.ip, "198.51.100.1");
    }

    #[test]
    fn connect_info_is_the_fallback() {
        let mut parts = parts(&[]);
        parts
            .extensions
            .insert(ConnectInfo("203.0.113.5:4431".parse::<SocketAddr>().unwrap()));
        assert_eq!(caller_from_parts(&parts).unwrap().ip, "203.0.113.5");
        assert_eq!(caller_from_parts(&self::parts(&[])).unwrap().ip, "unknown");
    }

    #[test]
    fn malformed_identity_is_rejected() {
        assert!(caller_from_parts(&parts(&[("x-user-id", "abc")])).is_err());
        assert!(caller_from_parts(&parts(&[("x-user-id", "1"), ("x-user-role", "root")])).is_err());
    }
}
