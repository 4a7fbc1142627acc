use std::fmt;
use std::str::FromStr;

use libris_kernel::settings::ThrottleSettings;
use serde::{Deserialize, Serialize};

use crate::rate::{Rate, RateParseError};

/// Named throttle scopes. Each scope keeps its own window per identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Global per-caller budget, chosen by membership tier.
    Membership,
    /// Borrow operations per user.
    Borrow,
    /// Catalog search per caller.
    Search,
    /// Expensive endpoints whose violations are logged loudly.
    Monitored,
}

impl Scope {
    pub const ALL: [Scope; 4] = [
        Scope::Membership,
        Scope::Borrow,
        Scope::Search,
        Scope::Monitored,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Scope::Membership => "membership",
            Scope::Borrow => "borrow",
            Scope::Search => "search",
            Scope::Monitored => "monitored",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .into_iter()
            .find(|scope| scope.as_str().eq_ignore_ascii_case(raw.trim()))
            .ok_or_else(|| format!("unknown throttle scope '{raw}'"))
    }
}

/// Membership tier of a caller, used to pick the membership rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Anonymous,
    Member,
    Premium,
    Staff,
}

/// What a scope permits for a given caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Not throttled.
    Unlimited,
    /// Refused outright; the caller must authenticate first.
    Deny,
    Limit(Rate),
}

/// Parsed rates for every scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottlePolicies {
    pub enabled: bool,
    pub anon: Rate,
    pub member: Rate,
    pub premium: Rate,
    pub borrow: Rate,
    pub search: Rate,
    pub monitored: Rate,
}

impl ThrottlePolicies {
    pub fn from_settings(settings: &ThrottleSettings) -> Result<Self, RateParseError> {
        Ok(Self {
            enabled: settings.enabled,
            anon: settings.anon.parse()?,
            member: settings.member.parse()?,
            premium: settings.premium.parse()?,
            borrow: settings.borrow.parse()?,
            search: settings.search.parse()?,
            monitored: settings.monitored.parse()?,
        })
    }

    /// Membership policy for a caller. Anonymous callers may only use safe
    /// methods; staff are never throttled.
    pub fn membership(&self, tier: Tier, safe_method: bool) -> Policy {
        if !self.enabled {
            return Policy::Unlimited;
        }
        match tier {
            Tier::Staff => Policy::Unlimited,
            Tier::Premium => Policy::Limit(self.premium),
            Tier::Member => Policy::Limit(self.member),
            Tier::Anonymous if safe_method => Policy::Limit(self.anon),
            Tier::Anonymous => Policy::Deny,
        }
    }

    /// Policy for a named scope other than membership.
    pub fn scope(&self, scope: Scope) -> Policy {
        if !self.enabled {
            return Policy::Unlimited;
        }
        match scope {
            Scope::Membership => Policy::Limit(self.member),
            Scope::Borrow => Policy::Limit(self.borrow),
            Scope::Search => Policy::Limit(self.search),
            Scope::Monitored => Policy::Limit(self.monitored),
        }
    }
}

impl Default for ThrottlePolicies {
    fn default() -> Self {
        Self {
            enabled: true,
            anon: Rate::per_hour(50),
            member: Rate::per_hour(100),
            premium: Rate::per_hour(1000),
            borrow: Rate::per_day(5),
            search: Rate::per_minute(30),
            monitored: Rate::per_minute(20),
        }
    }
}
