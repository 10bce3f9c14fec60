//! Shared HTTP client for Azure cognitive-service long-running operations.
//!
//! Both Document Intelligence and AI Language follow the same shape:
//! submit a request, receive `202 Accepted` with an `Operation-Location`
//! header, then poll that URL until the job reaches a terminal status.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! The whole submit-and-poll cycle is bounded by an operation timeout.

use std::time::Duration;

use anyhow::Result;
use serde_json::Value;

use crate::error::ServiceError;

/// Request payload for [`AzureClient::run`].
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(Value),
    Bytes(Vec<u8>),
}

/// Settings for an [`AzureClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub max_retries: u32,
    pub poll_interval_ms: u64,
}

pub struct AzureClient {
    http: reqwest::Client,
    api_key: String,
    max_retries: u32,
    poll_interval: Duration,
    operation_timeout_secs: u64,
}

impl AzureClient {
    /// Build a client, reading the subscription key from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the key variable is not set.
    pub fn new(settings: &ClientSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", settings.api_key_env)
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key,
            max_retries: settings.max_retries,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            operation_timeout_secs: settings.operation_timeout_secs,
        })
    }

    /// Submit a job and poll it to completion, returning the final status
    /// document.
    pub async fn run(&self, url: &str, body: RequestBody) -> Result<Value, ServiceError> {
        let secs = self.operation_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), async {
            let operation = self.submit(url, &body).await?;
            self.poll(&operation).await
        })
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout(secs)),
        }
    }

    async fn submit(&self, url: &str, body: &RequestBody) -> Result<String, ServiceError> {
        let response = self
            .send_with_retry(|| {
                let req = self
                    .http
                    .post(url)
                    .header("Ocp-Apim-Subscription-Key", &self.api_key);
                match body {
                    RequestBody::Json(v) => req.json(v),
                    RequestBody::Bytes(b) => req
                        .header("Content-Type", "application/octet-stream")
                        .body(b.clone()),
                }
            })
            .await?;

        response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| ServiceError::Protocol("missing Operation-Location header".into()))
    }

    async fn poll(&self, operation_url: &str) -> Result<Value, ServiceError> {
        loop {
            let response = self
                .send_with_retry(|| {
                    self.http
                        .get(operation_url)
                        .header("Ocp-Apim-Subscription-Key", &self.api_key)
                })
                .await?;
            let json: Value = response
                .json()
                .await
                .map_err(|e| ServiceError::Protocol(e.to_string()))?;

            let status = json
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_ascii_lowercase();
            match status.as_str() {
                "succeeded" | "partiallycompleted" | "partiallysucceeded" => return Ok(json),
                "failed" | "cancelled" => {
                    let detail = json
                        .get("error")
                        .or_else(|| json.get("errors"))
                        .cloned()
                        .unwrap_or(json);
                    return Err(ServiceError::Failed(detail));
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    /// Send a request, retrying on rate limits, server errors and network
    /// failures with exponential backoff.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, ServiceError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_err = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if is_retryable(status.as_u16()) {
                        tracing::debug!(status = status.as_u16(), attempt, "retryable service error");
                        last_err = format!("HTTP {}: {}", status, body_text);
                        continue;
                    }
                    return Err(ServiceError::Rejected {
                        status: status.as_u16(),
                        body: body_text,
                    });
                }
                Err(e) => {
                    tracing::debug!(error = %e, attempt, "service request failed");
                    last_err = e.to_string();
                }
            }
        }

        Err(ServiceError::Exhausted {
            attempts: self.max_retries + 1,
            message: last_err,
        })
    }
}

/// Delay before retry `attempt` (1-based): 1s, 2s, 4s … capped at 32s.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

fn is_retryable(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(6), Duration::from_secs(32));
        assert_eq!(backoff_delay(12), Duration::from_secs(32));
    }

    #[test]
    fn only_throttling_and_server_errors_retry() {
        assert!(is_retryable(429));
        assert!(is_retryable(503));
        assert!(!is_retryable(400));
        assert!(!is_retryable(401));
        assert!(!is_retryable(404));
    }

    #[test]
    fn missing_key_is_reported() {
        let settings = ClientSettings {
            api_key_env: "DOCSUM_TEST_KEY_THAT_IS_NOT_SET".into(),
            timeout_secs: 5,
            operation_timeout_secs: 10,
            max_retries: 0,
            poll_interval_ms: 10,
        };
        let err = AzureClient::new(&settings).err().unwrap();
        assert!(err.to_string().contains("DOCSUM_TEST_KEY_THAT_IS_NOT_SET"));
    }
}
