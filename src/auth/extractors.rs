use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use super::{claims::AccessClaims, jwt::TokenVerifier};
use crate::error::ApiError;

/// Bearer access token, verified against the public key.
pub struct AuthUser(pub AccessClaims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenVerifier: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(ApiError::Unauthorized("missing Authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or(ApiError::Unauthorized("invalid auth scheme"))?;

        let claims = TokenVerifier::from_ref(state)
            .verify_access_token(token)
            .map_err(|e| {
                warn!(error = %e, "bearer token rejected");
                ApiError::from(e)
            })?;
        Ok(AuthUser(claims))
    }
}

impl AccessClaims {
    pub fn require_permission(&self, permission: &str) -> Result<(), ApiError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            warn!(user_id = %self.sub, %permission, "permission denied");
            Err(ApiError::Forbidden(permission.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::test_keys::issuer;
    use axum::http::Request;
    use uuid::Uuid;

    #[derive(Clone)]
    struct TestState(TokenVerifier);

    impl FromRef<TestState> for TokenVerifier {
        fn from_ref(s: &TestState) -> Self {
            s.0.clone()
        }
    }

    async fn extract(header: Option<&str>) -> Result<AuthUser, ApiError> {
        let state = TestState(issuer().verifier().clone());
        let mut req = Request::builder().uri("/");
        if let Some(h) = header {
            req = req.header(AUTHORIZATION, h);
        }
        let (mut parts, _) = req.body(()).unwrap().into_parts();
        AuthUser::from_request_parts(&mut parts, &state).await
    }

    #[tokio::test]
    async fn accepts_valid_bearer() {
        let (token, _) = issuer()
            .issue_access_token(Uuid::new_v4(), "a", vec![], vec!["otp.manage".into()])
            .unwrap();
        let AuthUser(claims) = extract(Some(&format!("Bearer {token}"))).await.unwrap();
        assert!(claims.require_permission("otp.manage").is_ok());
        assert!(matches!(
            claims.require_permission("user.delete"),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn rejects_missing_header_scheme_and_refresh_token() {
        assert!(matches!(extract(None).await, Err(ApiError::Unauthorized(_))));
        assert!(matches!(
            extract(Some("Basic abc")).await,
            Err(ApiError::Unauthorized(_))
        ));

        let (refresh, _, _) = issuer().issue_refresh_token(Uuid::new_v4(), "a").unwrap();
        assert!(matches!(
            extract(Some(&format!("Bearer {refresh}"))).await,
            Err(ApiError::Token(_))
        ));
    }
}
