use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use super::repo_types::Receiver;
use crate::config::{DeliveryConfig, DeliveryKind};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery request failed: {0}")]
    Transport(String),
    #[error("provider rejected message: status {0}")]
    Rejected(u16),
    #[error("provider cannot deliver to {0}")]
    Unsupported(&'static str),
    #[error("all delivery providers failed")]
    AllFailed,
}

/// Sends a code to a receiver. Any error is fatal to that request attempt.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, receiver: &Receiver, code: &str) -> Result<(), DeliveryError>;
}

#[derive(Clone)]
pub enum DeliveryProvider {
    /// Accepts everything and sends nothing.
    Noop,
    /// Writes the code to the log. Development only.
    Log,
    Kavenegar(KavenegarSms),
    /// First success wins; fails only when every provider fails.
    Fallback(Vec<DeliveryProvider>),
    Custom(Arc<dyn DeliveryChannel>),
}

impl DeliveryProvider {
    pub fn from_config(cfg: &DeliveryConfig) -> Self {
        match cfg.kind {
            DeliveryKind::Noop => DeliveryProvider::Noop,
            DeliveryKind::Log => DeliveryProvider::Log,
            DeliveryKind::Kavenegar => DeliveryProvider::Kavenegar(KavenegarSms::new(
                &cfg.kavenegar_base_url,
                &cfg.kavenegar_api_key,
                &cfg.kavenegar_sender,
            )),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            DeliveryProvider::Noop => "noop",
            DeliveryProvider::Log => "log",
            DeliveryProvider::Kavenegar(_) => "kavenegar",
            DeliveryProvider::Fallback(_) => "fallback",
            DeliveryProvider::Custom(_) => "custom",
        }
    }
}

#[async_trait]
impl DeliveryChannel for DeliveryProvider {
    async fn send(&self, receiver: &Receiver, code: &str) -> Result<(), DeliveryError> {
        match self {
            DeliveryProvider::Noop => Ok(()),
            DeliveryProvider::Log => {
                info!(%receiver, %code, "otp code (log provider)");
                Ok(())
            }
            DeliveryProvider::Kavenegar(sms) => sms.send(receiver, code).await,
            DeliveryProvider::Fallback(providers) => {
                for p in providers {
                    match p.send(receiver, code).await {
                        Ok(()) => return Ok(()),
                        Err(e) => warn!(provider = p.name(), error = %e, "provider failed, trying next"),
                    }
                }
                Err(DeliveryError::AllFailed)
            }
            DeliveryProvider::Custom(channel) => channel.send(receiver, code).await,
        }
    }
}

/// Kavenegar SMS gateway: form POST to `/v1/{api_key}/sms/send.json`.
#[derive(Clone)]
pub struct KavenegarSms {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    sender: String,
}

impl KavenegarSms {
    pub fn new(base_url: &str, api_key: &str, sender: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            sender: sender.to_string(),
        }
    }

    async fn send(&self, receiver: &Receiver, code: &str) -> Result<(), DeliveryError> {
        let Receiver::Phone(phone) = receiver else {
            return Err(DeliveryError::Unsupported("non-phone receiver"));
        };

        let url = format!("{}/v1/{}/sms/send.json", self.base_url, self.api_key);
        let message = format!("Your OTP code is: {code}");
        let form = [
            ("receptor", phone.as_str()),
            ("message", message.as_str()),
            ("sender", self.sender.as_str()),
        ];

        let resp = self
            .client
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "kavenegar request failed");
                DeliveryError::Transport(e.to_string())
            })?;

        let status = resp.status();
        if status.as_u16() >= 400 {
            error!(%status, "kavenegar rejected sms");
            return Err(DeliveryError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}
