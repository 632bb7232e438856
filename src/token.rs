use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Malformed token response: {0}")]
    MalformedResponse(String),
}

/// Response envelope of the credential endpoint: the token sits one
/// level down under `data`.
#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    data: TokenData,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    token: String,
}

/// Exchanges the static API key for a short-lived session token.
///
/// One POST with the key in the `x-api-key` header and an empty JSON
/// body. A non-2xx response is a hard failure: the caller aborts session
/// start and the user retries manually.
pub struct TokenProvider {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl TokenProvider {
    pub fn new(endpoint: String, api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            endpoint,
            api_key,
        }
    }

    /// Fetch a fresh session token
    pub async fn fetch(&self) -> Result<String, TokenError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&json!({}))
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TokenError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let envelope: TokenEnvelope = response
            .json()
            .await
            .map_err(|e| TokenError::MalformedResponse(e.to_string()))?;

        if envelope.data.token.is_empty() {
            return Err(TokenError::MalformedResponse(
                "empty token in response".to_string(),
            ));
        }

        log::debug!("Fetched session token ({} chars)", envelope.data.token.len());
        Ok(envelope.data.token)
    }
}
