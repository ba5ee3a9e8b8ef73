//! The payment gate: a per-request state machine enforcing payment before
//! response release.
//!
//! ```text
//! discovery? ── yes ─▶ serve document, no payment logic
//! protected? ── no ──▶ pass through
//! header?    ── no ──▶ 402 + PaymentRequired body + PAYMENT-REQUIRED header
//! decode     ── err ─▶ 400
//! verify     ── transport err ─▶ 502 ── invalid ─▶ 402 with reason
//! run handler into a capped buffer
//! overflow?  ── yes ─▶ 500 (no settlement)
//! 2xx?       ── no ──▶ flush buffer as-is (no settlement)
//! settle     ── transport err ─▶ 502 ── unsuccessful ─▶ 402 with reason
//! flush buffered body + PAYMENT-RESPONSE header
//! ```
//!
//! No byte of a 2xx handler response reaches the client until settlement
//! succeeds. Handlers that fail (non-2xx) are flushed without charging the
//! payer.

use axum_core::body::Body;
use axum_core::extract::Request;
use axum_core::response::Response;
use glob::{MatchOptions, Pattern};
use http::header::CONTENT_TYPE;
use http::{HeaderName, HeaderValue, StatusCode};
use http_body_util::{BodyExt, Limited};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use tower::util::BoxCloneSyncService;

use tollgate::chain::ChainId;
use tollgate::facilitator::Facilitator;
use tollgate::types::{
    Base64Bytes, DiscoveryResponse, ErrorResponse, EvmAddress, PaymentPayload, PaymentRequired,
    PaymentRequirements, ResourceInfo, SettleResponse, TransactionHash, VerifyRequest,
    VerifyResponse, X402Version2,
};

use crate::config::{DiscoveryConfig, GatewayConfig, GatewayConfigError};

/// Path of the discovery document.
pub const DISCOVERY_PATH: &str = "/.well-known/x402";

/// Response header carrying the base64-JSON 402 challenge.
pub const PAYMENT_REQUIRED_HEADER: HeaderName = HeaderName::from_static("payment-required");

/// Response header carrying the base64-JSON settlement result.
pub const PAYMENT_RESPONSE_HEADER: HeaderName = HeaderName::from_static("payment-response");

/// Classic glob semantics: `*` does not cross `/`, so `/api/*` matches
/// `/api/foo` but not `/api/foo/bar`.
const PATH_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Request extension attached to protected requests after successful
/// verification, visible to downstream handlers.
#[derive(Debug, Clone)]
pub struct PaymentContext {
    pub verified: bool,
    /// The raw `PAYMENT-SIGNATURE` header value.
    pub payment_header: String,
    pub requirements: PaymentRequirements,
}

/// Response extension attached after successful settlement.
#[derive(Debug, Clone)]
pub struct SettlementContext {
    pub transaction: Option<TransactionHash>,
    pub network: Option<ChainId>,
    pub payer: Option<EvmAddress>,
}

type Inner = BoxCloneSyncService<Request, Response, Infallible>;

/// The compiled payment gate shared across requests.
pub struct Paygate<F> {
    facilitator: F,
    header_name: HeaderName,
    protected: Vec<Pattern>,
    /// All configured protected-path strings, for the discovery document.
    protected_sources: Vec<String>,
    default_requirements: PaymentRequirements,
    /// Sorted `(key, compiled glob, requirements)` triples. Keys that are
    /// not valid globs still participate in exact matching.
    route_requirements: Vec<(String, Option<Pattern>, PaymentRequirements)>,
    route_resources: HashMap<String, ResourceInfo>,
    max_buffer_size: usize,
    discovery: Option<DiscoveryConfig>,
}

impl<F> Paygate<F>
where
    F: Facilitator,
{
    /// Compiles a gate from configuration. Invalid protected-path patterns
    /// are logged and skipped, not fatal.
    pub fn new(facilitator: F, config: GatewayConfig) -> Result<Self, GatewayConfigError> {
        config.validate()?;
        let header_name = config.payment_header_name()?;

        let mut protected = Vec::with_capacity(config.protected_paths.len());
        for source in &config.protected_paths {
            match Pattern::new(source) {
                Ok(pattern) => protected.push(pattern),
                Err(e) => {
                    tracing::warn!(pattern = %source, error = %e, "skipping invalid protected path pattern");
                }
            }
        }

        let route_requirements = config
            .route_requirements
            .into_iter()
            .map(|(key, requirements)| {
                let pattern = Pattern::new(&key).ok();
                (key, pattern, requirements)
            })
            .collect();

        Ok(Self {
            facilitator,
            header_name,
            protected,
            protected_sources: config.protected_paths,
            default_requirements: config.default_requirements,
            route_requirements,
            route_resources: config.route_resources,
            max_buffer_size: config.max_buffer_size,
            discovery: config.discovery.enabled.then_some(config.discovery),
        })
    }

    /// Whether any protected-path pattern matches `path`.
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected
            .iter()
            .any(|pattern| pattern.matches_with(path, PATH_MATCH))
    }

    /// Requirements for a path: exact route key, then first matching glob
    /// key, then the defaults.
    pub fn select_requirements(&self, path: &str) -> PaymentRequirements {
        if let Some((_, _, requirements)) = self
            .route_requirements
            .iter()
            .find(|(key, _, _)| key == path)
        {
            return requirements.clone();
        }
        for (_, pattern, requirements) in &self.route_requirements {
            if let Some(pattern) = pattern
                && pattern.matches_with(path, PATH_MATCH)
            {
                return requirements.clone();
            }
        }
        self.default_requirements.clone()
    }

    /// Runs the full state machine for one request.
    pub async fn handle_request(
        self: Arc<Self>,
        inner: Inner,
        mut req: Request,
    ) -> Result<Response, Infallible> {
        let path = req.uri().path().to_string();

        if let Some(discovery) = &self.discovery
            && path == DISCOVERY_PATH
        {
            return Ok(self.serve_discovery(discovery));
        }

        if !self.is_protected(&path) {
            return inner.oneshot(req).await;
        }

        let requirements = self.select_requirements(&path);

        let Some(header_value) = req.headers().get(&self.header_name) else {
            return Ok(self.payment_required(
                &path,
                &requirements,
                format!("{} header is required", self.header_name.as_str().to_uppercase()),
            ));
        };
        let payment_header = String::from_utf8_lossy(header_value.as_bytes()).into_owned();

        let payload: PaymentPayload = match Base64Bytes::from(header_value.as_bytes()).try_into() {
            Ok(payload) => payload,
            Err(e) => {
                return Ok(error_response(
                    StatusCode::BAD_REQUEST,
                    format!("invalid payment header: {e}"),
                ));
            }
        };

        let verify_request = VerifyRequest {
            x402_version: X402Version2,
            payment_payload: payload,
            payment_requirements: requirements.clone(),
        };

        let verdict = match self.verify_with_deadline(&verify_request).await {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(error = %e, "facilitator verification unreachable");
                return Ok(error_response(
                    StatusCode::BAD_GATEWAY,
                    format!("failed to verify payment: {e}"),
                ));
            }
        };
        if let VerifyResponse::Invalid { reason } = verdict {
            tracing::debug!(reason = %reason, "payment rejected");
            return Ok(self.payment_required(&path, &requirements, reason));
        }

        req.extensions_mut().insert(PaymentContext {
            verified: true,
            payment_header,
            requirements: requirements.clone(),
        });

        // Run the handler into a capped in-memory buffer. Nothing is flushed
        // until settlement decides the outcome.
        let response = inner.oneshot(req).await?;
        let (parts, body) = response.into_parts();
        let buffered = match Limited::new(body, self.max_buffer_size).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::warn!(
                    max_buffer_size = self.max_buffer_size,
                    error = %e,
                    "discarding response over buffer ceiling; payment not settled"
                );
                return Ok(error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "response too large to process payment".to_string(),
                ));
            }
        };

        // Handler did not fulfil: flush as-is and take no payment.
        if !parts.status.is_success() {
            return Ok(Response::from_parts(parts, Body::from(buffered)));
        }

        let settlement = match self.settle_with_deadline(&verify_request).await {
            Ok(settlement) => settlement,
            Err(e) => {
                tracing::warn!(error = %e, "facilitator settlement unreachable");
                return Ok(error_response(
                    StatusCode::BAD_GATEWAY,
                    format!("failed to settle payment: {e}"),
                ));
            }
        };
        if !settlement.success {
            let reason = settlement
                .error_reason
                .unwrap_or_else(|| "settlement unsuccessful".to_string());
            tracing::warn!(reason = %reason, "payment settlement failed");
            return Ok(self.payment_required(
                &path,
                &requirements,
                format!("payment settlement failed: {reason}"),
            ));
        }
        tracing::info!(
            tx = ?settlement.transaction,
            payer = ?settlement.payer,
            "payment settled"
        );

        let mut response = Response::from_parts(parts, Body::from(buffered));
        if let Ok(header) = Base64Bytes::encode_json(&settlement)
            && let Ok(value) = HeaderValue::from_bytes(header.as_ref())
        {
            response.headers_mut().insert(PAYMENT_RESPONSE_HEADER, value);
        }
        response.extensions_mut().insert(SettlementContext {
            transaction: settlement.transaction,
            network: settlement.network,
            payer: settlement.payer,
        });
        Ok(response)
    }

    /// Verification round trip bounded by the requirements' timeout.
    async fn verify_with_deadline(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerifyResponse, String> {
        let secs = request.payment_requirements.max_timeout_seconds;
        let fut = self.facilitator.verify(request);
        if secs == 0 {
            return fut.await.map_err(|e| e.to_string());
        }
        match tokio::time::timeout(Duration::from_secs(secs), fut).await {
            Err(_) => Err(format!("verification timed out after {secs}s")),
            Ok(result) => result.map_err(|e| e.to_string()),
        }
    }

    /// Settlement round trip bounded by the requirements' timeout.
    async fn settle_with_deadline(
        &self,
        request: &VerifyRequest,
    ) -> Result<SettleResponse, String> {
        let secs = request.payment_requirements.max_timeout_seconds;
        let fut = self.facilitator.settle(request);
        if secs == 0 {
            return fut.await.map_err(|e| e.to_string());
        }
        match tokio::time::timeout(Duration::from_secs(secs), fut).await {
            Err(_) => Err(format!("settlement timed out after {secs}s")),
            Ok(result) => result.map_err(|e| e.to_string()),
        }
    }

    /// The 402 challenge: JSON body plus the same object base64-encoded in
    /// the `PAYMENT-REQUIRED` header.
    fn payment_required(
        &self,
        path: &str,
        requirements: &PaymentRequirements,
        error: String,
    ) -> Response {
        let body = PaymentRequired {
            x402_version: X402Version2,
            error: Some(error),
            resource: Some(self.resource_info(path)),
            accepts: vec![requirements.clone()],
        };
        let mut response = json_response(StatusCode::PAYMENT_REQUIRED, &body);
        if let Ok(header) = Base64Bytes::encode_json(&body)
            && let Ok(value) = HeaderValue::from_bytes(header.as_ref())
        {
            response.headers_mut().insert(PAYMENT_REQUIRED_HEADER, value);
        }
        response
    }

    fn resource_info(&self, path: &str) -> ResourceInfo {
        let mut info = self
            .route_resources
            .get(path)
            .cloned()
            .unwrap_or_default();
        if info.url.is_empty() {
            info.url = path.to_string();
        }
        info
    }

    fn serve_discovery(&self, discovery: &DiscoveryConfig) -> Response {
        let document = DiscoveryResponse {
            version: 1,
            resources: self.protected_sources.clone(),
            ownership_proofs: (!discovery.ownership_proofs.is_empty())
                .then(|| discovery.ownership_proofs.clone()),
            instructions: discovery.instructions.clone(),
        };
        json_response(StatusCode::OK, &document)
    }
}

fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Response {
    let body = serde_json::to_vec(value).expect("serialization failed");
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("failed to construct response")
}

fn error_response(status: StatusCode, message: String) -> Response {
    json_response(status, &ErrorResponse { error: message })
}
