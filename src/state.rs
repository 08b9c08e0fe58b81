use std::{sync::Arc, time::Duration};

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::{
    auth::{
        directory::RoleDirectory,
        jwt::{TokenIssuer, TokenVerifier},
        refresh_store::{PgRefreshStore, RefreshTokenStore},
        repo::{PgAuthRepo, UserStore},
    },
    config::AppConfig,
    otp::{
        delivery::DeliveryProvider,
        engine::OtpEngine,
        rate_limiter::{PgCounterStore, RateLimiter},
        repo::PgOtpStore,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub otp: Arc<OtpEngine>,
    pub issuer: Arc<TokenIssuer>,
    pub users: Arc<dyn UserStore>,
    pub directory: Arc<RoleDirectory>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
}

impl AppState {
    /// Wires the Postgres-backed stores. Fails when the key pair cannot be
    /// loaded or the OTP settings are unusable.
    pub fn init(config: &AppConfig, db: PgPool) -> anyhow::Result<Self> {
        let issuer = TokenIssuer::from_config(&config.jwt)?;

        let limiter = RateLimiter::new(
            Arc::new(PgCounterStore::new(db.clone())),
            config.otp.rate_limit,
        );
        let otp = OtpEngine::new(
            Arc::new(PgOtpStore::new(db.clone())),
            limiter,
            DeliveryProvider::from_config(&config.delivery),
            config.otp.clone(),
        )?;

        let repo = Arc::new(PgAuthRepo::new(db.clone()));
        let directory = RoleDirectory::new(
            repo.clone(),
            Duration::from_secs(config.directory_cache_ttl_seconds),
        );

        Ok(Self {
            otp: Arc::new(otp),
            issuer: Arc::new(issuer),
            users: repo,
            directory: Arc::new(directory),
            refresh_tokens: Arc::new(PgRefreshStore::new(db)),
        })
    }
}

impl FromRef<AppState> for TokenVerifier {
    fn from_ref(state: &AppState) -> Self {
        state.issuer.verifier().clone()
    }
}
