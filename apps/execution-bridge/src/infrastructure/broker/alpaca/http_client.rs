//! HTTP client wrapper for the Alpaca trading API.
//!
//! Reads are retried on transient failures. Writes are sent exactly once: a
//! failed submit has an unknown outcome and is resolved by the caller through
//! a client order id lookup, never by blind resending.

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::api_types::AlpacaErrorResponse;
use super::config::AlpacaConfig;
use super::error::AlpacaError;
use crate::application::services::Backoff;

/// HTTP client for the Alpaca trading API.
#[derive(Debug, Clone)]
pub struct AlpacaHttpClient {
    client: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
    read_attempts: u32,
    backoff: Backoff,
}

impl AlpacaHttpClient {
    /// Create a new HTTP client from config.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or the client cannot be built.
    pub fn new(config: &AlpacaConfig) -> Result<Self, AlpacaError> {
        if config.api_key.is_empty() || config.api_secret.is_empty() {
            return Err(AlpacaError::AuthenticationFailed(
                "API key and secret are required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AlpacaError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            base_url: config.trading_base_url().to_string(),
            read_attempts: config.read_attempts.max(1),
            backoff: Backoff::new(Duration::from_millis(100), Duration::from_secs(1)),
        })
    }

    /// GET with query parameters, retried on transient failures.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, AlpacaError> {
        let mut attempt = 0;
        loop {
            match self.send(Method::GET, path, query, None::<&()>).await {
                Err(e) if is_transient(&e) && attempt + 1 < self.read_attempts => {
                    let delay = match &e {
                        AlpacaError::RateLimited {
                            retry_after_secs: Some(secs),
                        } => Duration::from_secs(*secs),
                        _ => self.backoff.delay(attempt),
                    };
                    tracing::warn!(
                        path,
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        "Transient error on read, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// POST a JSON body. Never retried.
    pub async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AlpacaError> {
        self.send(Method::POST, path, &[], Some(body)).await
    }

    /// DELETE. Never retried.
    pub async fn delete(&self, path: &str) -> Result<(), AlpacaError> {
        let _: serde_json::Value = self.send(Method::DELETE, path, &[], None::<&()>).await?;
        Ok(())
    }

    async fn send<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<T, AlpacaError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            let text = response.text().await?;
            let text = if text.trim().is_empty() { "null" } else { &text };
            return serde_json::from_str(text).map_err(|e| AlpacaError::JsonParse(e.to_string()));
        }

        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        Err(map_error_status(&method, path, status, retry_after, &body))
    }
}

const fn is_transient(error: &AlpacaError) -> bool {
    matches!(
        error,
        AlpacaError::Network(_)
            | AlpacaError::Timeout(_)
            | AlpacaError::Unavailable { .. }
            | AlpacaError::RateLimited { .. }
    )
}

/// Map a non-success response to an error.
fn map_error_status(
    method: &Method,
    path: &str,
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> AlpacaError {
    let (code, message) = match serde_json::from_str::<AlpacaErrorResponse>(body) {
        Ok(err) => (err.code_string(), err.message),
        Err(_) => (None, body.to_string()),
    };

    match status.as_u16() {
        401 => AlpacaError::AuthenticationFailed(message),
        // Alpaca answers 403 with a reason for orders it refuses (buying power, shorting)
        403 if *method == Method::POST && !message.is_empty() => {
            AlpacaError::OrderRejected { code, message }
        }
        403 => AlpacaError::AuthenticationFailed(message),
        404 => AlpacaError::OrderNotFound {
            order_id: path.rsplit('/').next().unwrap_or(path).to_string(),
        },
        422 => AlpacaError::OrderRejected { code, message },
        429 => AlpacaError::RateLimited {
            retry_after_secs: retry_after,
        },
        408 | 500..=599 => AlpacaError::Unavailable {
            status: status.as_u16(),
            message,
        },
        other => AlpacaError::Api {
            status: other,
            code: code.unwrap_or_else(|| other.to_string()),
            message,
        },
    }
}
