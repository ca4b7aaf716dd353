//! Authentication data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, net::IpAddr, str::FromStr};

use crate::device::DeviceId;
use crate::geo::BrowserLocation;
use crate::risk::RiskAssessment;
use crate::session::SessionId;

/// Account ID type
pub type AccountId = i64;

/// Account role, ordered by privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
    Superadmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }

    pub fn is_privileged(&self) -> bool {
        !matches!(self, Role::User)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "superadmin" => Ok(Role::Superadmin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Account model. `locked` is the only lock state; display status derives from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub role: Role,
    pub locked: bool,
    pub failed_login_attempts: i32,
    pub last_login_country: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn actor(&self) -> Actor {
        Actor {
            account_id: self.id,
            role: self.role,
        }
    }

    pub fn display_status(&self) -> &'static str {
        if self.locked { "locked" } else { "active" }
    }
}

/// Fields for a new account row
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub credential_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Who is performing an administrative operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub account_id: AccountId,
    pub role: Role,
}

/// Account registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub device_uuid: Option<String>,
    pub browser_location: Option<BrowserLocation>,
}

/// Login for a principal already authenticated by an identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedLogin {
    pub username: String,
    pub device_uuid: Option<String>,
    pub browser_location: Option<BrowserLocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Connection facts gathered by the transport layer
#[derive(Debug, Clone)]
pub struct LoginContext {
    pub ip: Option<IpAddr>,
    /// Raw address as recorded on the session (may be unparseable)
    pub ip_address: String,
}

impl LoginContext {
    pub fn from_ip(ip: IpAddr) -> Self {
        Self {
            ip: Some(ip),
            ip_address: ip.to_string(),
        }
    }
}

/// Access/refresh token pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

/// Successful login result
#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub role: Role,
    pub session_id: SessionId,
    pub risk: RiskAssessment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims shared by access and refresh tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: AccountId,
    pub role: Role,
    pub session_id: SessionId,
    pub device_id: Option<DeviceId>,
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated caller behind a bearer token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub actor: Actor,
    pub session_id: SessionId,
    pub device_id: Option<DeviceId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering_and_names() {
        assert!(Role::Superadmin > Role::Admin);
        assert!(Role::Admin > Role::User);
        assert_eq!("superadmin".parse::<Role>(), Ok(Role::Superadmin));
        assert!("root".parse::<Role>().is_err());
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
    }

    #[test]
    fn test_credential_hash_not_serialized() {
        let account = Account {
            id: 1,
            username: "alice".to_string(),
            credential_hash: "$argon2id$secret".to_string(),
            role: Role::User,
            locked: true,
            failed_login_attempts: 0,
            last_login_country: None,
            last_login_at: None,
            locked_at: None,
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&account).unwrap();
        assert!(!json.contains("argon2id"));
        assert_eq!(account.display_status(), "locked");
    }
}
