use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of JWT: access or refresh.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Wire payload shared by both token kinds. Refresh tokens leave the
/// authorization lists empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RawClaims {
    pub sub: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    pub kind: TokenKind,
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Access token payload. Roles and permissions are fixed at issuance and
/// trusted until `exp`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub name: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub exp: i64,
}

impl AccessClaims {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Refresh token payload: identity only, never used for authorization.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub name: String,
    pub jti: Uuid,
    pub exp: i64,
}

impl From<RawClaims> for AccessClaims {
    fn from(c: RawClaims) -> Self {
        Self {
            sub: c.sub,
            name: c.name,
            roles: c.roles,
            permissions: c.permissions,
            exp: c.exp,
        }
    }
}

impl From<RawClaims> for RefreshClaims {
    fn from(c: RawClaims) -> Self {
        Self {
            sub: c.sub,
            name: c.name,
            jti: c.jti,
            exp: c.exp,
        }
    }
}
