//! One-time code lifecycle: NoRecord -> Sent -> (Used | Expired).
//!
//! `Used` is reached only through a successful validation. `Expired` is a
//! wall-clock comparison at validation time; expired rows are swept lazily
//! after each successful validation.

use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use super::{
    delivery::{DeliveryChannel, DeliveryError, DeliveryProvider},
    generator::CodeGenerator,
    rate_limiter::RateLimiter,
    repo::OtpStore,
    repo_types::{OtpRecord, OtpType, Receiver},
};
use crate::{config::OtpConfig, store::StoreError};

#[derive(Debug, Error)]
pub enum OtpError {
    #[error("too many requests, wait before retrying")]
    RateLimited,
    #[error("too many codes requested for this receiver")]
    QuotaExceeded,
    #[error("code not found")]
    NotFound,
    #[error("code expired")]
    Expired,
    #[error("code already used")]
    AlreadyUsed,
    #[error("invalid code")]
    InvalidCode,
    #[error(transparent)]
    DeliveryFailed(#[from] DeliveryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct OtpEngine {
    store: Arc<dyn OtpStore>,
    limiter: RateLimiter,
    delivery: DeliveryProvider,
    generator: CodeGenerator,
    config: OtpConfig,
}

impl OtpEngine {
    pub fn new(
        store: Arc<dyn OtpStore>,
        limiter: RateLimiter,
        delivery: DeliveryProvider,
        config: OtpConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let generator = CodeGenerator::from_config(&config)?;
        Ok(Self {
            store,
            limiter,
            delivery,
            generator,
            config,
        })
    }

    /// Generates, persists and dispatches a new code.
    ///
    /// A failed dispatch leaves the record in place: it still counts against
    /// the hard cap, so delivery failures cannot be used to bypass limits.
    #[instrument(skip(self, receiver), fields(receiver = %receiver))]
    pub async fn request_code(
        &self,
        receiver: &Receiver,
        otp_type: OtpType,
    ) -> Result<OtpRecord, OtpError> {
        let key = receiver.as_str();

        if self.config.max_per_receiver > 0 {
            let issued = self.store.count_by_receiver_and_type(key, otp_type).await?;
            if issued >= self.config.max_per_receiver {
                warn!(%otp_type, issued, "otp hard limit reached");
                return Err(OtpError::QuotaExceeded);
            }
        }

        if !self.limiter.can_send(key).await? {
            warn!(%otp_type, "otp rate limited");
            return Err(OtpError::RateLimited);
        }

        let code = self.generator.generate();
        let record = OtpRecord::new(
            receiver,
            otp_type,
            code,
            OffsetDateTime::now_utc(),
            self.config.ttl(),
        );
        self.store.create(&record).await?;

        if let Err(e) = self.delivery.send(receiver, &record.code).await {
            warn!(%otp_type, error = %e, "otp delivery failed");
            return Err(e.into());
        }

        self.limiter
            .mark_send(key, self.config.rate_window())
            .await?;

        info!(%otp_type, otp_id = %record.id, "otp sent");
        Ok(record)
    }

    /// Consumes a code. Expiry is checked before the used flag and before
    /// code equality, so an expired code reports `Expired` whether or not it
    /// matched.
    #[instrument(skip(self, receiver, code), fields(receiver = %receiver))]
    pub async fn validate_code(
        &self,
        receiver: &Receiver,
        otp_type: OtpType,
        code: &str,
    ) -> Result<OtpRecord, OtpError> {
        let mut record = self
            .store
            .find_latest_matching(receiver.as_str(), otp_type, code)
            .await?
            .ok_or(OtpError::NotFound)?;

        if record.is_expired_at(OffsetDateTime::now_utc()) {
            return Err(OtpError::Expired);
        }
        if record.used {
            return Err(OtpError::AlreadyUsed);
        }
        if record.code != code {
            return Err(OtpError::InvalidCode);
        }

        match self.store.mark_used(record.id).await {
            Ok(true) => record.used = true,
            Ok(false) => {
                warn!(%otp_type, otp_id = %record.id, "otp consumed by a concurrent validation");
                return Err(OtpError::AlreadyUsed);
            }
            // rows only disappear through the expiry sweep
            Err(StoreError::NotFound) => {
                warn!(%otp_type, otp_id = %record.id, "otp swept before it could be consumed");
                return Err(OtpError::Expired);
            }
            Err(e) => return Err(e.into()),
        }

        match self.store.delete_expired().await {
            Ok(n) if n > 0 => info!(swept = n, "expired otps removed"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "expired otp sweep failed"),
        }

        info!(%otp_type, otp_id = %record.id, "otp validated");
        Ok(record)
    }

    /// Explicit sweep for operators; unlike the post-validation sweep its
    /// failure is surfaced.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<u64, OtpError> {
        let removed = self.store.delete_expired().await?;
        info!(removed, "expired otps swept");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::{
        delivery::testing::RecordingChannel,
        rate_limiter::memory::MemoryCounterStore,
        repo::memory::MemoryOtpStore,
    };
    use async_trait::async_trait;
    use std::time::Duration;
    use uuid::Uuid;

    struct Harness {
        engine: OtpEngine,
        store: Arc<MemoryOtpStore>,
        channel: Arc<RecordingChannel>,
    }

    fn harness_with(config: OtpConfig, channel: RecordingChannel) -> Harness {
        let store = Arc::new(MemoryOtpStore::new());
        let channel = Arc::new(channel);
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), config.rate_limit);
        let engine = OtpEngine::new(
            store.clone(),
            limiter,
            DeliveryProvider::Custom(channel.clone()),
            config,
        )
        .unwrap();
        Harness {
            engine,
            store,
            channel,
        }
    }

    fn scenario_config() -> OtpConfig {
        OtpConfig {
            length: 6,
            alphabet: "0123456789".into(),
            ttl_seconds: 120,
            rate_window_seconds: 60,
            rate_limit: 1,
            max_per_receiver: 0,
        }
    }

    fn phone() -> Receiver {
        Receiver::parse("+15551234").unwrap()
    }

    #[tokio::test]
    async fn full_request_validate_scenario() {
        let h = harness_with(scenario_config(), RecordingChannel::default());

        let rec = h.engine.request_code(&phone(), OtpType::Login).await.unwrap();
        assert_eq!(rec.code.len(), 6);
        assert!(rec.code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(rec.expires_at - rec.send_at, time::Duration::seconds(120));
        assert!(!rec.used);
        assert_eq!(h.channel.last_code().await, Some(rec.code.clone()));

        let again = h.engine.request_code(&phone(), OtpType::Login).await;
        assert!(matches!(again, Err(OtpError::RateLimited)));

        let ok = h
            .engine
            .validate_code(&phone(), OtpType::Login, &rec.code)
            .await
            .unwrap();
        assert!(ok.used);
        assert!(h.store.get(rec.id).await.unwrap().used);

        let replay = h
            .engine
            .validate_code(&phone(), OtpType::Login, &rec.code)
            .await;
        assert!(matches!(replay, Err(OtpError::AlreadyUsed)));
    }

    #[tokio::test]
    async fn unknown_code_is_not_found() {
        let h = harness_with(scenario_config(), RecordingChannel::default());
        h.engine.request_code(&phone(), OtpType::Login).await.unwrap();
        let res = h
            .engine
            .validate_code(&phone(), OtpType::Login, "not-a-code")
            .await;
        assert!(matches!(res, Err(OtpError::NotFound)));
    }

    #[tokio::test]
    async fn code_for_other_type_is_not_found() {
        let h = harness_with(scenario_config(), RecordingChannel::default());
        let rec = h.engine.request_code(&phone(), OtpType::Login).await.unwrap();
        let res = h
            .engine
            .validate_code(&phone(), OtpType::ResetPassword, &rec.code)
            .await;
        assert!(matches!(res, Err(OtpError::NotFound)));
    }

    #[tokio::test]
    async fn expired_code_reports_expired_and_stays_unused() {
        let h = harness_with(scenario_config(), RecordingChannel::default());
        let past = OffsetDateTime::now_utc() - time::Duration::minutes(10);
        let rec = OtpRecord::new(
            &phone(),
            OtpType::Login,
            "654321".into(),
            past,
            Duration::from_secs(120),
        );
        h.store.create(&rec).await.unwrap();

        let res = h
            .engine
            .validate_code(&phone(), OtpType::Login, "654321")
            .await;
        assert!(matches!(res, Err(OtpError::Expired)));
        assert!(!h.store.get(rec.id).await.unwrap().used);
    }

    #[tokio::test]
    async fn expired_wins_over_used() {
        let h = harness_with(scenario_config(), RecordingChannel::default());
        let past = OffsetDateTime::now_utc() - time::Duration::minutes(10);
        let mut rec = OtpRecord::new(
            &phone(),
            OtpType::Login,
            "111222".into(),
            past,
            Duration::from_secs(120),
        );
        rec.used = true;
        h.store.create(&rec).await.unwrap();

        let res = h
            .engine
            .validate_code(&phone(), OtpType::Login, "111222")
            .await;
        assert!(matches!(res, Err(OtpError::Expired)));
    }

    #[tokio::test]
    async fn successful_validation_sweeps_expired_records() {
        let h = harness_with(scenario_config(), RecordingChannel::default());
        let past = OffsetDateTime::now_utc() - time::Duration::hours(1);
        let stale = OtpRecord::new(
            &Receiver::parse("+15550000").unwrap(),
            OtpType::Verify,
            "000000".into(),
            past,
            Duration::from_secs(60),
        );
        h.store.create(&stale).await.unwrap();

        let rec = h.engine.request_code(&phone(), OtpType::Login).await.unwrap();
        h.engine
            .validate_code(&phone(), OtpType::Login, &rec.code)
            .await
            .unwrap();

        assert!(h.store.get(stale.id).await.is_none());
        assert!(h.store.get(rec.id).await.is_some());
    }

    #[tokio::test]
    async fn hard_cap_applies_regardless_of_rate_limiter() {
        let config = OtpConfig {
            rate_limit: 100,
            max_per_receiver: 2,
            ..scenario_config()
        };
        let h = harness_with(config, RecordingChannel::default());

        h.engine.request_code(&phone(), OtpType::Login).await.unwrap();
        h.engine.request_code(&phone(), OtpType::Login).await.unwrap();
        let third = h.engine.request_code(&phone(), OtpType::Login).await;
        assert!(matches!(third, Err(OtpError::QuotaExceeded)));

        // the cap is per (receiver, type)
        h.engine
            .request_code(&phone(), OtpType::ResetPassword)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_delivery_keeps_record_and_consumes_hard_cap() {
        let config = OtpConfig {
            rate_limit: 100,
            max_per_receiver: 1,
            ..scenario_config()
        };
        let h = harness_with(config, RecordingChannel::failing());

        let first = h.engine.request_code(&phone(), OtpType::Login).await;
        assert!(matches!(first, Err(OtpError::DeliveryFailed(_))));
        assert_eq!(h.store.record_count().await, 1);

        let second = h.engine.request_code(&phone(), OtpType::Login).await;
        assert!(matches!(second, Err(OtpError::QuotaExceeded)));
    }

    #[tokio::test]
    async fn receivers_hold_independent_codes_per_type() {
        let config = OtpConfig {
            rate_limit: 5,
            ..scenario_config()
        };
        let h = harness_with(config, RecordingChannel::default());
        let login = h.engine.request_code(&phone(), OtpType::Login).await.unwrap();
        let reset = h
            .engine
            .request_code(&phone(), OtpType::ResetPassword)
            .await
            .unwrap();

        h.engine
            .validate_code(&phone(), OtpType::ResetPassword, &reset.code)
            .await
            .unwrap();
        h.engine
            .validate_code(&phone(), OtpType::Login, &login.code)
            .await
            .unwrap();
    }

    /// Delegates to the memory store, with switches for failure modes the
    /// memory store cannot produce on its own.
    #[derive(Default)]
    struct Scripted {
        inner: MemoryOtpStore,
        sweep_fails: bool,
        yield_after_find: bool,
        row_gone_on_mark: bool,
    }

    #[async_trait]
    impl OtpStore for Scripted {
        async fn create(&self, record: &OtpRecord) -> Result<(), StoreError> {
            self.inner.create(record).await
        }
        async fn find_latest_matching(
            &self,
            receiver: &str,
            otp_type: OtpType,
            code: &str,
        ) -> Result<Option<OtpRecord>, StoreError> {
            let found = self.inner.find_latest_matching(receiver, otp_type, code).await;
            if self.yield_after_find {
                tokio::task::yield_now().await;
            }
            found
        }
        async fn mark_used(&self, id: Uuid) -> Result<bool, StoreError> {
            if self.row_gone_on_mark {
                return Err(StoreError::NotFound);
            }
            self.inner.mark_used(id).await
        }
        async fn count_by_receiver_and_type(
            &self,
            receiver: &str,
            otp_type: OtpType,
        ) -> Result<i64, StoreError> {
            self.inner.count_by_receiver_and_type(receiver, otp_type).await
        }
        async fn delete_expired(&self) -> Result<u64, StoreError> {
            if self.sweep_fails {
                return Err(StoreError::Unavailable("sweep down".into()));
            }
            self.inner.delete_expired().await
        }
    }

    fn engine_over(store: Scripted) -> OtpEngine {
        let config = scenario_config();
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), config.rate_limit);
        OtpEngine::new(Arc::new(store), limiter, DeliveryProvider::Noop, config).unwrap()
    }

    #[tokio::test]
    async fn sweep_failure_is_not_surfaced() {
        let engine = engine_over(Scripted {
            sweep_fails: true,
            ..Default::default()
        });

        let rec = engine.request_code(&phone(), OtpType::Login).await.unwrap();
        let ok = engine
            .validate_code(&phone(), OtpType::Login, &rec.code)
            .await
            .unwrap();
        assert!(ok.used);
    }

    #[tokio::test]
    async fn explicit_sweep_surfaces_store_errors() {
        let engine = engine_over(Scripted {
            sweep_fails: true,
            ..Default::default()
        });
        assert!(matches!(
            engine.sweep_expired().await,
            Err(OtpError::Store(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn concurrent_validations_consume_a_code_once() {
        let engine = engine_over(Scripted {
            yield_after_find: true,
            ..Default::default()
        });
        let rec = engine.request_code(&phone(), OtpType::Login).await.unwrap();

        // both lookups complete before either validation marks the record
        let receiver = phone();
        let (a, b) = tokio::join!(
            engine.validate_code(&receiver, OtpType::Login, &rec.code),
            engine.validate_code(&receiver, OtpType::Login, &rec.code),
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(OtpError::AlreadyUsed))));
    }

    #[tokio::test]
    async fn record_swept_mid_validation_reports_expired() {
        let engine = engine_over(Scripted {
            row_gone_on_mark: true,
            ..Default::default()
        });
        let rec = engine.request_code(&phone(), OtpType::Login).await.unwrap();

        let res = engine
            .validate_code(&phone(), OtpType::Login, &rec.code)
            .await;
        assert!(matches!(res, Err(OtpError::Expired)));
    }

    #[test]
    fn invalid_config_fails_at_construction() {
        let config = OtpConfig {
            alphabet: String::new(),
            ..scenario_config()
        };
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), 1);
        let res = OtpEngine::new(
            Arc::new(MemoryOtpStore::new()),
            limiter,
            DeliveryProvider::Noop,
            config,
        );
        assert!(res.is_err());
    }
}
