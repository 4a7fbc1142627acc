//! Request throttling.
//!
//! [`RateLimiter`] is a fixed-window counter keyed by `(identity, scope)`.
//! Windows start at the first request for a key and reset once a full period
//! has elapsed, so a client can send up to twice the limit across a window
//! edge. That burst is part of the contract.
//!
//! [`ThrottlePolicies`] turns configured rate strings into the limit and
//! period handed to [`RateLimiter::allow`] for each named [`Scope`].

pub mod limiter;
pub mod policy;
pub mod rate;
pub mod violations;

pub use limiter::{Decision, RateLimiter};
pub use policy::{Policy, Scope, ThrottlePolicies, Tier};
pub use rate::{Rate, RateParseError};
pub use violations::ViolationLog;
