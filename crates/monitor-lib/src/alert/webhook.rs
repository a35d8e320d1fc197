//! HTTP callback delivery

use super::{AlertDispatcher, AlertPayload};
use crate::error::AlertError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

/// Envelope the callback endpoint expects around the payload
#[derive(Serialize)]
struct Envelope<'a> {
    json: &'a AlertPayload,
}

/// POSTs alerts as JSON to a callback URL
///
/// Only `200 OK` counts as delivered.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    url: String,
    client: Client,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(url, Client::new())
    }

    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertDispatcher for WebhookDispatcher {
    async fn dispatch(&self, payload: &AlertPayload) -> Result<(), AlertError> {
        if self.url.trim().is_empty() {
            return Err(AlertError::MissingCallback);
        }

        let response = self
            .client
            .post(&self.url)
            .json(&Envelope { json: payload })
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(AlertError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(kind = %payload.kind, url = %self.url, "Alert delivered");
        Ok(())
    }
}
