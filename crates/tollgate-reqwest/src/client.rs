//! The payment client: a thin `reqwest` wrapper that discovers payment
//! demands and answers them with signed EIP-3009 authorizations.
//!
//! Two layers:
//!
//! - [`PaymentClient::check`] sends a request once and surfaces the parsed
//!   402 challenge, if any.
//! - [`PaymentClient::pay`] builds a signed payment header for the selected
//!   requirements and re-issues the request with it.

use alloy::signers::local::PrivateKeySigner;
use rand::Rng;
use reqwest::{Method, Response, StatusCode};

use tollgate::chain::Eip155ChainReferenceError;
use tollgate::eip3009::{self, DomainError};
use tollgate::timestamp::UnixTimestamp;
use tollgate::types::{
    Base64Bytes, DiscoveryResponse, EvmAddress, ExactAuthorization, ExactPayload,
    HeaderEncodeError, HexEncodedNonce, PaymentPayload, PaymentRequired, PaymentRequirements,
    Scheme, SchemePayload, X402Version2,
};

/// Request header carrying the signed payment payload.
pub const PAYMENT_SIGNATURE_HEADER: &str = "PAYMENT-SIGNATURE";

/// Default half-width of the client-chosen validity window, in seconds.
/// `validBefore` is additionally capped by the requirements' timeout.
const VALIDITY_WINDOW_SECS: u64 = 3600;

#[derive(Debug, thiserror::Error)]
pub enum PaymentClientError {
    #[error("cannot generate payment: client was created without a signing key")]
    MissingSigner,
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Network(#[from] Eip155ChainReferenceError),
    #[error("failed to read system clock")]
    Clock,
    #[error("failed to sign authorization: {0}")]
    Signing(#[from] alloy::signers::Error),
    #[error(transparent)]
    Encode(#[from] HeaderEncodeError),
    /// Transport errors are propagated to the caller unwrapped.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("failed to parse 402 response: {0}")]
    PaymentRequiredParse(#[source] serde_json::Error),
    #[error("discovery endpoint returned status {0}")]
    DiscoveryStatus(StatusCode),
}

/// Result of [`PaymentClient::check`].
#[derive(Debug)]
pub enum CheckOutcome {
    /// The server answered with something other than 402; the response is
    /// untouched.
    Passthrough(Response),
    /// The server demanded payment. The response body has been consumed to
    /// decode the challenge.
    PaymentRequired(PaymentRequired),
}

/// A client for payment-gated resources. The signing key is optional:
/// without one the client can still browse and check, but not pay.
#[derive(Debug, Clone)]
pub struct PaymentClient {
    http: reqwest::Client,
    signer: Option<PrivateKeySigner>,
}

impl PaymentClient {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self {
            http: reqwest::Client::new(),
            signer: Some(signer),
        }
    }

    /// A client that can browse and check but not generate payments.
    pub fn without_signer() -> Self {
        Self {
            http: reqwest::Client::new(),
            signer: None,
        }
    }

    /// The payer address, when a signing key is present.
    pub fn address(&self) -> Option<EvmAddress> {
        self.signer.as_ref().map(|s| EvmAddress(s.address()))
    }

    /// Fetches the discovery document from `{base_url}/.well-known/x402`.
    pub async fn browse(&self, base_url: &str) -> Result<DiscoveryResponse, PaymentClientError> {
        let url = format!("{}/.well-known/x402", base_url.trim_end_matches('/'));
        let response = self.http.get(url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(PaymentClientError::DiscoveryStatus(response.status()));
        }
        Ok(response.json().await?)
    }

    /// Sends the request once. A 402 answer is decoded into the challenge;
    /// anything else passes through unchanged.
    pub async fn check(
        &self,
        method: Method,
        url: &str,
        content_type: Option<&str>,
        body: Option<Vec<u8>>,
    ) -> Result<CheckOutcome, PaymentClientError> {
        let response = self.send(method, url, content_type, body, None).await?;
        if response.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(CheckOutcome::Passthrough(response));
        }
        let bytes = response.bytes().await?;
        let challenge: PaymentRequired =
            serde_json::from_slice(&bytes).map_err(PaymentClientError::PaymentRequiredParse)?;
        Ok(CheckOutcome::PaymentRequired(challenge))
    }

    /// Builds a signed `PAYMENT-SIGNATURE` header value for the given
    /// requirements.
    ///
    /// The validity window is `[now - 1h, now + min(1h, maxTimeoutSeconds)]`
    /// and the nonce is 32 random bytes. The authorized value equals the
    /// required amount.
    pub async fn generate_payment(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<String, PaymentClientError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or(PaymentClientError::MissingSigner)?;
        let Scheme::Exact = requirements.scheme;

        let domain = eip3009::requirements_domain(requirements)?;

        let now = UnixTimestamp::try_now()
            .map_err(|_| PaymentClientError::Clock)?
            .as_secs();
        let valid_after = now.saturating_sub(VALIDITY_WINDOW_SECS);
        let valid_before = now + VALIDITY_WINDOW_SECS.min(requirements.max_timeout_seconds);

        let nonce: [u8; 32] = rand::rng().random();
        let authorization = ExactAuthorization {
            from: EvmAddress(signer.address()),
            to: requirements.pay_to,
            value: requirements.amount,
            valid_after: UnixTimestamp(valid_after),
            valid_before: UnixTimestamp(valid_before),
            nonce: HexEncodedNonce(nonce),
        };
        let signature = eip3009::sign_authorization(signer, &authorization, &domain).await?;
        tracing::debug!(payer = %authorization.from, value = %authorization.value, "signed payment authorization");

        let payload = PaymentPayload {
            x402_version: X402Version2,
            accepted: requirements.clone(),
            payload: SchemePayload::Exact(ExactPayload {
                signature,
                authorization,
            }),
        };
        Ok(Base64Bytes::encode_json(&payload)?.to_string())
    }

    /// Generates a payment for `requirements` and re-issues the request with
    /// the `PAYMENT-SIGNATURE` header set.
    pub async fn pay(
        &self,
        method: Method,
        url: &str,
        content_type: Option<&str>,
        body: Option<Vec<u8>>,
        requirements: &PaymentRequirements,
    ) -> Result<Response, PaymentClientError> {
        let payment_header = self.generate_payment(requirements).await?;
        self.send(method, url, content_type, body, Some(payment_header))
            .await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        content_type: Option<&str>,
        body: Option<Vec<u8>>,
        payment_header: Option<String>,
    ) -> Result<Response, PaymentClientError> {
        let mut request = self.http.request(method, url);
        if let Some(content_type) = content_type {
            request = request.header(http::header::CONTENT_TYPE, content_type);
        }
        if let Some(body) = body {
            request = request.body(body);
        }
        if let Some(header) = payment_header {
            request = request.header(PAYMENT_SIGNATURE_HEADER, header);
        }
        Ok(request.send().await?)
    }
}
