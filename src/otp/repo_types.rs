use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Purpose tag: one receiver may hold live codes for several purposes at once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OtpType {
    Login,
    Register,
    ResetPassword,
    Verify,
}

impl OtpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpType::Login => "login",
            OtpType::Register => "register",
            OtpType::ResetPassword => "reset_password",
            OtpType::Verify => "verify",
        }
    }
}

impl fmt::Display for OtpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OtpType {
    type Err = ReceiverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login" => Ok(OtpType::Login),
            "register" => Ok(OtpType::Register),
            "reset_password" => Ok(OtpType::ResetPassword),
            "verify" => Ok(OtpType::Verify),
            other => Err(ReceiverError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReceiverError {
    #[error("receiver must be a phone number, email or username")]
    Invalid,
    #[error("unknown otp type: {0}")]
    UnknownType(String),
}

/// Destination of a code, parsed once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Receiver {
    Phone(String),
    Email(String),
    Username(String),
}

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref PHONE_RE: Regex = Regex::new(r"^\+?[0-9]{6,15}$").unwrap();
    static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,64}$").unwrap();
}

impl Receiver {
    pub fn parse(raw: &str) -> Result<Self, ReceiverError> {
        let trimmed = raw.trim();
        if PHONE_RE.is_match(trimmed) {
            Ok(Receiver::Phone(trimmed.to_string()))
        } else if EMAIL_RE.is_match(trimmed) {
            Ok(Receiver::Email(trimmed.to_lowercase()))
        } else if USERNAME_RE.is_match(trimmed) {
            Ok(Receiver::Username(trimmed.to_string()))
        } else {
            Err(ReceiverError::Invalid)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Receiver::Phone(v) | Receiver::Email(v) | Receiver::Username(v) => v,
        }
    }
}

impl fmt::Display for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted one-time code. `used` only ever flips false -> true.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OtpRecord {
    pub id: Uuid,
    pub receiver: String,
    #[serde(skip_serializing)]
    pub code: String,
    pub otp_type: OtpType,
    pub used: bool,
    pub send_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl OtpRecord {
    pub fn new(
        receiver: &Receiver,
        otp_type: OtpType,
        code: String,
        now: OffsetDateTime,
        ttl: std::time::Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            receiver: receiver.as_str().to_string(),
            code,
            otp_type,
            used: false,
            send_at: now,
            expires_at: now + ttl,
            created_at: now,
            updated_at: now,
        }
    }

    /// Expired once the wall clock has moved past `expires_at`.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, FromRow)]
pub struct OtpRow {
    pub id: Uuid,
    pub receiver: String,
    pub code: String,
    pub otp_type: String,
    pub used: bool,
    pub send_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<OtpRow> for OtpRecord {
    type Error = ReceiverError;

    fn try_from(r: OtpRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            receiver: r.receiver,
            code: r.code,
            otp_type: r.otp_type.parse()?,
            used: r.used,
            send_at: r.send_at,
            expires_at: r.expires_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_parses_each_variant() {
        assert_eq!(
            Receiver::parse("+15551234").unwrap(),
            Receiver::Phone("+15551234".into())
        );
        assert_eq!(
            Receiver::parse("  Someone@Example.COM ").unwrap(),
            Receiver::Email("someone@example.com".into())
        );
        assert_eq!(
            Receiver::parse("jane_doe").unwrap(),
            Receiver::Username("jane_doe".into())
        );
    }

    #[test]
    fn receiver_rejects_garbage() {
        assert_eq!(Receiver::parse(""), Err(ReceiverError::Invalid));
        assert_eq!(Receiver::parse("a b"), Err(ReceiverError::Invalid));
        assert_eq!(Receiver::parse("x"), Err(ReceiverError::Invalid));
    }

    #[test]
    fn otp_type_text_form_matches_serde() {
        for t in [
            OtpType::Login,
            OtpType::Register,
            OtpType::ResetPassword,
            OtpType::Verify,
        ] {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
            assert_eq!(t.as_str().parse::<OtpType>().unwrap(), t);
        }
        assert!("bogus".parse::<OtpType>().is_err());
    }

    #[test]
    fn record_expiry_is_strictly_after_expires_at() {
        let now = OffsetDateTime::now_utc();
        let rec = OtpRecord::new(
            &Receiver::Phone("+15551234".into()),
            OtpType::Login,
            "123456".into(),
            now,
            std::time::Duration::from_secs(120),
        );
        assert_eq!(rec.expires_at - rec.send_at, time::Duration::seconds(120));
        assert!(!rec.is_expired_at(rec.expires_at));
        assert!(rec.is_expired_at(rec.expires_at + time::Duration::seconds(1)));
    }

    #[test]
    fn code_is_not_serialized() {
        let rec = OtpRecord::new(
            &Receiver::Email("a@b.co".into()),
            OtpType::Verify,
            "QZXW".into(),
            OffsetDateTime::now_utc(),
            std::time::Duration::from_secs(60),
        );
        let json = serde_json::to_string(&rec).unwrap();
        assert!(!json.contains("QZXW"));
    }
}
