use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateParseError {
    #[error("rate '{0}' must look like '<count>/<unit>'")]
    Format(String),
    #[error("rate '{0}' has an invalid request count")]
    Count(String),
    #[error("rate '{0}' has an unknown unit; use second, minute, hour or day")]
    Unit(String),
}

/// Requests allowed per period, written `<count>/<unit>`.
///
/// Only the first letter of the unit counts, so `5/d`, `5/day` and
/// `5/days` are the same rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub limit: u32,
    pub period: Duration,
}

impl Rate {
    pub const fn new(limit: u32, period: Duration) -> Self {
        Self { limit, period }
    }

    pub const fn per_second(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(1))
    }

    pub const fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub const fn per_hour(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(3600))
    }

    pub const fn per_day(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(86_400))
    }
}

impl FromStr for Rate {
    type Err = RateParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (count, unit) = raw
            .trim()
            .split_once('/')
            .ok_or_else(|| RateParseError::Format(raw.to_string()))?;

        let limit = count
            .trim()
            .parse::<u32>()
            .map_err(|_| RateParseError::Count(raw.to_string()))?;

        let seconds = match unit.trim().chars().next() {
            Some('s') => 1,
            Some('m') => 60,
            Some('h') => 3600,
            Some('d') => 86_400,
            _ => return Err(RateParseError::Unit(raw.to_string())),
        };

        Ok(Self::new(limit, Duration::from_secs(seconds)))
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.period.as_secs() {
            1 => write!(f, "{}/second", self.limit),
            60 => write!(f, "{}/minute", self.limit),
            3600 => write!(f, "{}/hour", self.limit),
            86_400 => write!(f, "{}/day", self.limit),
            secs => write!(f, "{}/{}s", self.limit, secs),
        }
    }
}
