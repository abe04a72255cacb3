//! Clients for the assessment backend and the re-engagement endpoint.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    AnalysisDocument, ApiEnvelope, AssessError, Identity, OrderDescriptor, OrderReceipt,
    SubmissionBundle, TokenGrant,
};

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(flatten)]
    envelope: ApiEnvelope,
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(flatten)]
    envelope: ApiEnvelope,
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    #[serde(flatten)]
    envelope: ApiEnvelope,
    /// Some deployments report an error inside a 200 body through this field;
    /// any non-200 value is a failure.
    status_code: Option<u16>,
    analysis: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct NudgePayload<'a> {
    phone: &'a str,
    name: &'a str,
}

// ============================================================================
// AssessClient
// ============================================================================

/// Client for the external assessment system.
///
/// One instance is constructed at process start and shared; the underlying
/// connection pool is reused across calls. Every call carries the configured
/// per-request timeout.
#[derive(Debug, Clone)]
pub struct AssessClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl AssessClient {
    /// Creates a client against the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// Exchanges identity fields for a bearer credential.
    pub async fn exchange_token(&self, identity: &Identity) -> Result<TokenGrant, AssessError> {
        const ENDPOINT: &str = "credential exchange";
        let response = self
            .http
            .post(self.url("auth/token"))
            .timeout(self.timeout)
            .json(identity)
            .send()
            .await
            .map_err(transport(ENDPOINT))?;
        let body: TokenResponse = decode(ENDPOINT, response).await?;
        if !body.envelope.is_success() {
            return Err(AssessError::Backend {
                endpoint: ENDPOINT,
                message: body.envelope.message,
            });
        }
        let token = body.token.ok_or(AssessError::Backend {
            endpoint: ENDPOINT,
            message: "success envelope carried no token".to_string(),
        })?;
        debug!(expires_at = ?body.expires_at, "bearer credential granted");
        Ok(TokenGrant {
            token,
            expires_at: body.expires_at,
        })
    }

    /// Submits the scored answer bundle for a completed session.
    pub async fn submit_answers(
        &self,
        token: &str,
        bundle: &SubmissionBundle,
    ) -> Result<ApiEnvelope, AssessError> {
        const ENDPOINT: &str = "answer submission";
        let response = self
            .http
            .post(self.url("responses"))
            .timeout(self.timeout)
            .bearer_auth(token)
            .json(bundle)
            .send()
            .await
            .map_err(transport(ENDPOINT))?;
        let envelope: ApiEnvelope = decode(ENDPOINT, response).await?;
        if !envelope.is_success() {
            return Err(AssessError::Backend {
                endpoint: ENDPOINT,
                message: envelope.message,
            });
        }
        Ok(envelope)
    }

    /// Claims the certificate for a settled session.
    pub async fn claim_certificate(
        &self,
        token: &str,
        external_ref: &str,
    ) -> Result<ApiEnvelope, AssessError> {
        const ENDPOINT: &str = "certificate claim";
        let response = self
            .http
            .post(self.url("certificates/claim"))
            .timeout(self.timeout)
            .bearer_auth(token)
            .json(&serde_json::json!({ "external_ref": external_ref }))
            .send()
            .await
            .map_err(transport(ENDPOINT))?;
        let envelope: ApiEnvelope = decode(ENDPOINT, response).await?;
        if !envelope.is_success() {
            return Err(AssessError::Backend {
                endpoint: ENDPOINT,
                message: envelope.message,
            });
        }
        Ok(envelope)
    }

    /// Creates the paid-test order and returns its identifier.
    pub async fn create_order(
        &self,
        token: &str,
        descriptor: &OrderDescriptor,
    ) -> Result<OrderReceipt, AssessError> {
        const ENDPOINT: &str = "order creation";
        let response = self
            .http
            .post(self.url("orders"))
            .timeout(self.timeout)
            .bearer_auth(token)
            .json(descriptor)
            .send()
            .await
            .map_err(transport(ENDPOINT))?;
        let body: OrderResponse = decode(ENDPOINT, response).await?;
        if !body.envelope.is_success() {
            return Err(AssessError::Backend {
                endpoint: ENDPOINT,
                message: body.envelope.message,
            });
        }
        let order_id = body.order_id.ok_or(AssessError::Backend {
            endpoint: ENDPOINT,
            message: "success envelope carried no order id".to_string(),
        })?;
        Ok(OrderReceipt { order_id })
    }

    /// Retrieves the analysis for a settled session.
    ///
    /// Besides transport and HTTP-status failures, a 200 body can embed an
    /// error through a non-200 `status_code` field; that is reported as a
    /// [`AssessError::Backend`] failure too.
    pub async fn fetch_analysis(
        &self,
        token: &str,
        external_ref: &str,
    ) -> Result<AnalysisDocument, AssessError> {
        const ENDPOINT: &str = "analysis retrieval";
        let response = self
            .http
            .get(self.url("analysis"))
            .timeout(self.timeout)
            .bearer_auth(token)
            .query(&[("external_ref", external_ref)])
            .send()
            .await
            .map_err(transport(ENDPOINT))?;
        let body: AnalysisResponse = decode(ENDPOINT, response).await?;
        if let Some(embedded) = body.status_code.filter(|code| *code != 200) {
            return Err(AssessError::Backend {
                endpoint: ENDPOINT,
                message: format!("embedded status {embedded}: {}", body.envelope.message),
            });
        }
        if !body.envelope.is_success() {
            return Err(AssessError::Backend {
                endpoint: ENDPOINT,
                message: body.envelope.message,
            });
        }
        Ok(AnalysisDocument {
            message: body.envelope.message,
            body: body.analysis,
        })
    }
}

// ============================================================================
// EngageClient
// ============================================================================

/// Client for the re-engagement endpoint.
#[derive(Debug, Clone)]
pub struct EngageClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl EngageClient {
    /// Creates a client posting to the given endpoint URL.
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }

    /// Sends a re-engagement nudge. Any 2xx status is success; the response
    /// body is not inspected.
    pub async fn send_nudge(&self, phone: &str, name: &str) -> Result<(), AssessError> {
        const ENDPOINT: &str = "re-engagement";
        let response = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&NudgePayload { phone, name })
            .send()
            .await
            .map_err(transport(ENDPOINT))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AssessError::UnexpectedStatus {
                endpoint: ENDPOINT,
                status: status.as_u16(),
            })
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn transport(endpoint: &'static str) -> impl FnOnce(reqwest::Error) -> AssessError {
    move |source| AssessError::Transport { endpoint, source }
}

async fn decode<T: serde::de::DeserializeOwned>(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<T, AssessError> {
    let status = response.status();
    if !status.is_success() {
        return Err(AssessError::UnexpectedStatus {
            endpoint,
            status: status.as_u16(),
        });
    }
    response.json().await.map_err(transport(endpoint))
}

// ============================================================================
// Tests
// ============================================================================
