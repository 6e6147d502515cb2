//! Notification delivery through an HTTP web-push gateway.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use swell_core::{PushConfig, ReqwestErrorExt};
use tracing::instrument;

use crate::error::AlertError;
use crate::types::{Notification, NotificationMetadata, PushSubscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// The gateway reports the subscription is gone (404/410)
    Expired,
    /// Delivery is not configured
    Skipped,
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        notification: &Notification,
    ) -> Result<DispatchOutcome, AlertError>;
}

#[derive(Serialize)]
struct GatewayMessage<'a> {
    subscription: &'a serde_json::Value,
    notification: GatewayNotification<'a>,
}

#[derive(Serialize)]
struct GatewayNotification<'a> {
    title: &'a str,
    body: &'a str,
    data: &'a NotificationMetadata,
}

pub struct HttpPushSender {
    client: Client,
    gateway_url: String,
    token: Option<String>,
}

impl HttpPushSender {
    pub fn new(gateway_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self, AlertError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AlertError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            gateway_url: gateway_url.to_string(),
            token: token.map(str::to_string),
        })
    }

    /// `None` when no gateway is configured.
    pub fn from_config(config: &PushConfig) -> Result<Option<Self>, AlertError> {
        match config.gateway_url.as_deref() {
            Some(url) if !url.is_empty() => Self::new(
                url,
                config.gateway_token.as_deref(),
                Duration::from_secs(config.timeout_secs),
            )
            .map(Some),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl NotificationSender for HttpPushSender {
    #[instrument(skip(self, subscription, notification), fields(subscription_id = subscription.id), level = "debug")]
    async fn send(
        &self,
        subscription: &PushSubscription,
        notification: &Notification,
    ) -> Result<DispatchOutcome, AlertError> {
        let message = GatewayMessage {
            subscription: &subscription.payload,
            notification: GatewayNotification {
                title: &notification.title,
                body: &notification.body,
                data: &notification.metadata,
            },
        };

        let mut request = self.client.post(&self.gateway_url).json(&message);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AlertError::Network(e.into_network_error()))?;

        match response.status() {
            status if status.is_success() => Ok(DispatchOutcome::Delivered),
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                tracing::info!("Push subscription {} has expired", subscription.id);
                Ok(DispatchOutcome::Expired)
            }
            status => Err(AlertError::Gateway {
                status: status.as_u16(),
            }),
        }
    }
}

/// Stand-in used when no gateway is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSender;

#[async_trait]
impl NotificationSender for DisabledSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        notification: &Notification,
    ) -> Result<DispatchOutcome, AlertError> {
        tracing::debug!(
            "Push disabled, not sending '{}' to subscription {}",
            notification.title,
            subscription.id
        );
        Ok(DispatchOutcome::Skipped)
    }
}
