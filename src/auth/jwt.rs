use anyhow::Context;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::{AccessClaims, RawClaims, RefreshClaims, TokenKind};
use crate::config::JwtConfig;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    TokenExpired,
    #[error("wrong token kind")]
    InvalidTokenKind,
    #[error("invalid token signature")]
    SignatureInvalid,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("token signing failed: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::TokenExpired,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                TokenError::SignatureInvalid
            }
            _ => TokenError::Malformed(e.to_string()),
        }
    }
}

/// Public-key half: checks tokens without being able to mint them.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding: DecodingKey,
    issuer: String,
    audience: String,
}

impl TokenVerifier {
    pub fn from_pem(public_pem: &[u8], issuer: &str, audience: &str) -> anyhow::Result<Self> {
        Ok(Self {
            decoding: DecodingKey::from_rsa_pem(public_pem).context("parse RSA public key")?,
            issuer: issuer.to_string(),
            audience: audience.to_string(),
        })
    }

    fn decode(&self, token: &str) -> Result<RawClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<RawClaims>(token, &self.decoding, &validation)?;

        // Expiry must be strictly in the future.
        if data.claims.exp <= OffsetDateTime::now_utc().unix_timestamp() {
            return Err(TokenError::TokenExpired);
        }
        Ok(data.claims)
    }

    fn decode_kind(&self, token: &str, kind: TokenKind) -> Result<RawClaims, TokenError> {
        let claims = self.decode(token)?;
        if claims.kind != kind {
            return Err(TokenError::InvalidTokenKind);
        }
        debug!(user_id = %claims.sub, kind = ?claims.kind, "jwt verified");
        Ok(claims)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.decode_kind(token, TokenKind::Access).map(Into::into)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        self.decode_kind(token, TokenKind::Refresh).map(Into::into)
    }
}

/// Signs RS256 access and refresh tokens. The key pair is loaded once and
/// never mutated, so one issuer is shared across all requests.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    verifier: TokenVerifier,
    issuer: String,
    audience: String,
    access_ttl: TimeDuration,
    refresh_ttl: TimeDuration,
}

impl TokenIssuer {
    pub fn from_pem(private_pem: &[u8], public_pem: &[u8], cfg: &JwtConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        Ok(Self {
            encoding: EncodingKey::from_rsa_pem(private_pem).context("parse RSA private key")?,
            verifier: TokenVerifier::from_pem(public_pem, &cfg.issuer, &cfg.audience)?,
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: TimeDuration::hours(cfg.access_ttl_hours),
            refresh_ttl: TimeDuration::days(cfg.refresh_ttl_days),
        })
    }

    pub fn from_config(cfg: &JwtConfig) -> anyhow::Result<Self> {
        let private_pem = std::fs::read(&cfg.private_key_path)
            .with_context(|| format!("read private key {}", cfg.private_key_path))?;
        let public_pem = std::fs::read(&cfg.public_key_path)
            .with_context(|| format!("read public key {}", cfg.public_key_path))?;
        Self::from_pem(&private_pem, &public_pem, cfg)
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    fn sign(&self, claims: &RawClaims) -> Result<(String, OffsetDateTime), TokenError> {
        let token = encode(&Header::new(Algorithm::RS256), claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        debug!(user_id = %claims.sub, kind = ?claims.kind, "jwt signed");
        Ok((token, expires_at))
    }

    fn claims(&self, subject: Uuid, name: &str, kind: TokenKind) -> RawClaims {
        let now = OffsetDateTime::now_utc();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        RawClaims {
            sub: subject,
            name: name.to_string(),
            roles: Vec::new(),
            permissions: Vec::new(),
            kind,
            jti: Uuid::new_v4(),
            iat: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        }
    }

    pub fn issue_access_token(
        &self,
        subject: Uuid,
        name: &str,
        roles: Vec<String>,
        permissions: Vec<String>,
    ) -> Result<(String, OffsetDateTime), TokenError> {
        let mut claims = self.claims(subject, name, TokenKind::Access);
        claims.roles = roles;
        claims.permissions = permissions;
        self.sign(&claims)
    }

    /// Returns the token, its expiry and its `jti` (the refresh store key).
    pub fn issue_refresh_token(
        &self,
        subject: Uuid,
        name: &str,
    ) -> Result<(String, OffsetDateTime, Uuid), TokenError> {
        let claims = self.claims(subject, name, TokenKind::Refresh);
        let (token, expires_at) = self.sign(&claims)?;
        Ok((token, expires_at, claims.jti))
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.verifier.verify_access_token(token)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        self.verifier.verify_refresh_token(token)
    }
}
