//! Request throttling at the HTTP boundary.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use libris_authz::Caller;
use libris_throttle::{Decision, Policy, RateLimiter, Scope, ThrottlePolicies};

use crate::caller::caller_from_parts;
use crate::error::AppError;

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Applies [`ThrottlePolicies`] to callers through a shared [`RateLimiter`].
#[derive(Debug)]
pub struct ThrottleGate {
    limiter: Arc<RateLimiter>,
    policies: ThrottlePolicies,
}

impl ThrottleGate {
    pub fn new(limiter: Arc<RateLimiter>, policies: ThrottlePolicies) -> Self {
        Self { limiter, policies }
    }

    /// Count a request against a named scope.
    pub fn check(&self, caller: &Caller, scope: Scope) -> Result<Decision, AppError> {
        // Staff bypass every scope except the one kept for auditing.
        if caller.is_staff() && scope != Scope::Monitored {
            return Ok(Decision::unlimited());
        }
        self.apply(caller, scope, self.policies.scope(scope))
    }

    /// Count a request against the caller's membership budget.
    pub fn check_membership(&self, caller: &Caller, safe_method: bool) -> Result<Decision, AppError> {
        let policy = self.policies.membership(caller.tier(), safe_method);
        self.apply(caller, Scope::Membership, policy)
    }

    fn apply(&self, caller: &Caller, scope: Scope, policy: Policy) -> Result<Decision, AppError> {
        match policy {
            Policy::Unlimited => Ok(Decision::unlimited()),
            Policy::Deny => Err(AppError::unauthorized(
                "authentication required for this request",
            )),
            Policy::Limit(rate) => {
                // Search is budgeted per client address even for signed-in users.
                let identity = match scope {
                    Scope::Search => format!("ip:{}", caller.ip),
                    _ => caller.throttle_identity(),
                };
                let decision = self.limiter.allow_rate(&identity, scope.as_str(), rate);
                if decision.allowed {
                    Ok(decision)
                } else {
                    Err(AppError::too_many_requests(
                        scope.as_str(),
                        decision.retry_after,
                    ))
                }
            }
        }
    }
}

/// Middleware enforcing the membership scope on every request it wraps.
///
/// The resolved [`Caller`] is stored in request extensions for handlers.
pub async fn membership_throttle(
    State(gate): State<Arc<ThrottleGate>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let caller = match caller_from_parts(&parts) {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };

    let safe = parts.method.is_safe();
    let decision = match gate.check_membership(&caller, safe) {
        Ok(decision) => decision,
        Err(err) => return err.into_response(),
    };

    parts.extensions.insert(caller);
    let mut response = next.run(Request::from_parts(parts, body)).await;
    if decision.limit != u32::MAX {
        let headers = response.headers_mut();
        headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
        headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Method, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Router,
    };
    use libris_db::UserId;
    use libris_kernel::ManualClock;
    use libris_authz::Role;
    use libris_throttle::Rate;
    use tower::ServiceExt;

    fn gate(clock: &ManualClock) -> Arc<ThrottleGate> {
        let policies = ThrottlePolicies {
            anon: Rate::per_hour(2),
            member: Rate::per_hour(3),
            borrow: Rate::per_day(1),
            ..ThrottlePolicies::default()
        };
        Arc::new(ThrottleGate::new(
            Arc::new(RateLimiter::new(clock.shared())),
            policies,
        ))
    }

    fn app(gate: Arc<ThrottleGate>) -> Router {
        Router::new()
            .route("/books", get(|| async { "ok" }).post(|| async { "created" }))
            .route_layer(from_fn_with_state(gate, membership_throttle))
    }

    fn request(method: Method, user: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder()
            .method(method)
            .uri("/books")
            .header("x-real-ip", "192.0.2.1");
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn member_budget_is_enforced_with_retry_after() {
        let app = app(gate(&ManualClock::default()));

        for remaining in ["2", "1", "0"] {
            let response = app.clone().oneshot(request(Method::GET, Some("5"))).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["x-ratelimit-remaining"], remaining);
        }

        let response = app.oneshot(request(Method::GET, Some("5"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3600");
    }

    #[tokio::test]
    async fn anonymous_writes_are_refused() {
        let app = app(gate(&ManualClock::default()));
        let response = app.clone().oneshot(request(Method::POST, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(request(Method::GET, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn staff_skip_scopes_but_not_monitoring() {
        let gate = gate(&ManualClock::default());
        let staff = Caller::user(UserId(1), Role::Staff, "10.0.0.1");
        for _ in 0..5 {
            assert!(gate.check(&staff, Scope::Borrow).is_ok());
        }

        let member = Caller::user(UserId(2), Role::Member, "10.0.0.2");
        assert!(gate.check(&member, Scope::Borrow).is_ok());
        assert!(matches!(
            gate.check(&member, Scope::Borrow),
            Err(AppError::TooManyRequests { .. })
        ));

        for _ in 0..20 {
            gate.check(&staff, Scope::Monitored).unwrap();
        }
        assert!(gate.check(&staff, Scope::Monitored).is_err());
    }
}
