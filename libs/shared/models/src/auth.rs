use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// The user id as a UUID; every identity in the dispatch core is one.
    pub fn uuid(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.id)
            .map_err(|_| AppError::BadRequest("Invalid user ID format".to_string()))
    }

    pub fn user_role(&self) -> Result<UserRole, AppError> {
        self.role
            .as_deref()
            .ok_or_else(|| AppError::Forbidden("User has no role".to_string()))?
            .parse()
            .map_err(|_| AppError::Forbidden("Unrecognised user role".to_string()))
    }
}

/// Application roles. Older services called staff "employee" or "doctor" and
/// family observers "observer"; those spellings are still accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Patient,
    #[serde(alias = "employee", alias = "doctor")]
    Staff,
    #[serde(alias = "observer")]
    Family,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Patient => "patient",
            UserRole::Staff => "staff",
            UserRole::Family => "family",
            UserRole::Admin => "admin",
        }
    }

    pub fn is_staff_like(&self) -> bool {
        matches!(self, UserRole::Staff | UserRole::Admin)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role: {}", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for UserRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" => Ok(UserRole::Patient),
            "staff" | "employee" | "doctor" => Ok(UserRole::Staff),
            "family" | "observer" => Ok(UserRole::Family),
            "admin" => Ok(UserRole::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}
