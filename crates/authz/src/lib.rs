//! Who is calling and what they may do.
//!
//! Identity arrives already authenticated (see the HTTP extractor); this
//! crate only models it and answers access questions.

use std::fmt;
use std::str::FromStr;

use libris_db::UserId;
use libris_throttle::Tier;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Staff,
    Premium,
    Member,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Staff => "staff",
            Role::Premium => "premium",
            Role::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "staff" | "admin" => Ok(Role::Staff),
            "premium" => Ok(Role::Premium),
            "member" | "user" => Ok(Role::Member),
            _ => Err(UnknownRole(raw.to_string())),
        }
    }
}

/// Things a caller can ask to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ReadCatalog,
    ManageCatalog,
    Borrow,
    ViewOwnLoans,
    ViewOverdue,
    ViewStatistics,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::ReadCatalog => "read_catalog",
            Action::ManageCatalog => "manage_catalog",
            Action::Borrow => "borrow",
            Action::ViewOwnLoans => "view_own_loans",
            Action::ViewOverdue => "view_overdue",
            Action::ViewStatistics => "view_statistics",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthzError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("{role} may not {action}")]
    Forbidden { role: Role, action: &'static str },
}

/// The party behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Option<UserId>,
    pub role: Role,
    /// Client address, `"unknown"` when it cannot be determined.
    pub ip: String,
}

impl Caller {
    pub fn anonymous(ip: impl Into<String>) -> Self {
        Self {
            user_id: None,
            role: Role::Member,
            ip: ip.into(),
        }
    }

    pub fn user(user_id: UserId, role: Role, ip: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id),
            role,
            ip: ip.into(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn is_staff(&self) -> bool {
        self.is_authenticated() && self.role == Role::Staff
    }

    pub fn tier(&self) -> Tier {
        match (self.user_id, self.role) {
            (None, _) => Tier::Anonymous,
            (Some(_), Role::Staff) => Tier::Staff,
            (Some(_), Role::Premium) => Tier::Premium,
            (Some(_), Role::Member) => Tier::Member,
        }
    }

    /// Key under which this caller's throttle windows are tracked.
    pub fn throttle_identity(&self) -> String {
        match self.user_id {
            Some(id) => format!("user:{id}"),
            None => format!("ip:{}", self.ip),
        }
    }

    /// Authenticated user id or `Unauthenticated`.
    pub fn require_user(&self) -> Result<UserId, AuthzError> {
        self.user_id.ok_or(AuthzError::Unauthenticated)
    }

    /// Check `action` against the caller's role. Catalog reads are open to
    /// everyone; writes and circulation reports are staff only.
    pub fn authorize(&self, action: Action) -> Result<(), AuthzError> {
        let allowed = match action {
            Action::ReadCatalog => true,
            Action::Borrow | Action::ViewOwnLoans | Action::ViewStatistics => {
                self.require_user()?;
                true
            }
            Action::ManageCatalog | Action::ViewOverdue => {
                self.require_user()?;
                self.role == Role::Staff
            }
        };

        if allowed {
            Ok(())
        } else {
            tracing::debug!(
                user_id = ?self.user_id,
                role = %self.role,
                action = action.as_str(),
                "access denied"
            );
            Err(AuthzError::Forbidden {
                role: self.role,
                action: action.as_str(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_callers_are_keyed_by_ip() {
        let caller = Caller::anonymous("10.0.0.4");
        assert_eq!(caller.tier(), Tier::Anonymous);
        assert_eq!(caller.throttle_identity(), "ip:10.0.0.4");
        assert!(caller.authorize(Action::ReadCatalog).is_ok());
        assert_eq!(
            caller.authorize(Action::Borrow),
            Err(AuthzError::Unauthenticated)
        );
    }

    #[test]
    fn only_staff_manage_the_catalog() {
        let member = Caller::user(UserId(3), Role::Member, "10.0.0.1");
        let staff = Caller::user(UserId(1), Role::Staff, "10.0.0.2");

        assert_eq!(member.throttle_identity(), "user:3");
        assert!(matches!(
            member.authorize(Action::ManageCatalog),
            Err(AuthzError::Forbidden { role: Role::Member, .. })
        ));
        assert!(member.authorize(Action::Borrow).is_ok());
        assert!(staff.authorize(Action::ManageCatalog).is_ok());
        assert!(staff.authorize(Action::ViewOverdue).is_ok());
        assert_eq!(staff.tier(), Tier::Staff);
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!("Staff".parse::<Role>().unwrap(), Role::Staff);
        assert_eq!(" premium ".parse::<Role>().unwrap(), Role::Premium);
        assert!("librarian".parse::<Role>().is_err());
    }
}
