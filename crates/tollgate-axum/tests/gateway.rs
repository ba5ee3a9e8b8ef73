//! End-to-end middleware tests against an in-process facilitator stub.
//!
//! These pin the gate's externally observable contract: challenge shape,
//! verify-before-handler and settle-before-flush ordering, the non-2xx
//! bypass, and the buffer ceiling.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tower::ServiceExt;

use tollgate::chain::ChainId;
use tollgate::facilitator::Facilitator;
use tollgate::timestamp::UnixTimestamp;
use tollgate::types::{
    Base64Bytes, EvmAddress, EvmSignature, ExactAuthorization, ExactPayload, HexEncodedNonce,
    PaymentPayload, PaymentRequired, PaymentRequirements, Scheme, SchemePayload, SettleRequest,
    SettleResponse, SupportedResponse, TokenAmount, TransactionHash, VerifyRequest,
    VerifyResponse, X402Version2,
};
use tollgate_axum::{
    DiscoveryConfig, GatewayConfig, PaymentContext, PaymentGateLayer, SettlementContext,
};

#[derive(Debug)]
struct MockError(String);

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scripted facilitator: fixed verify/settle outcomes plus call counters.
#[derive(Clone)]
struct MockFacilitator {
    verify: Result<VerifyResponse, String>,
    settle: Result<SettleResponse, String>,
    verify_calls: Arc<AtomicUsize>,
    settle_calls: Arc<AtomicUsize>,
}

impl MockFacilitator {
    fn happy() -> Self {
        Self {
            verify: Ok(VerifyResponse::valid(payer())),
            settle: Ok(settled()),
            verify_calls: Arc::new(AtomicUsize::new(0)),
            settle_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn rejecting(reason: &str) -> Self {
        let mut mock = Self::happy();
        mock.verify = Ok(VerifyResponse::invalid(reason));
        mock
    }

    fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    fn settle_calls(&self) -> usize {
        self.settle_calls.load(Ordering::SeqCst)
    }
}

impl Facilitator for MockFacilitator {
    type Error = MockError;

    async fn verify(&self, _request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.verify.clone().map_err(MockError)
    }

    async fn settle(&self, _request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        self.settle_calls.fetch_add(1, Ordering::SeqCst);
        self.settle.clone().map_err(MockError)
    }

    async fn supported(&self) -> Result<SupportedResponse, Self::Error> {
        Ok(SupportedResponse::default())
    }
}

fn payer() -> EvmAddress {
    EvmAddress::from_str("0x1111111111111111111111111111111111111111").unwrap()
}

fn settled() -> SettleResponse {
    SettleResponse {
        success: true,
        error_reason: None,
        payer: Some(payer()),
        transaction: Some(TransactionHash([0xCD; 32])),
        network: Some(ChainId::eip155(84532)),
    }
}

fn requirements() -> PaymentRequirements {
    PaymentRequirements {
        scheme: Scheme::Exact,
        network: ChainId::eip155(84532),
        amount: TokenAmount::from(1_000_000u64),
        asset: EvmAddress::from_str("0x036CbD53842c5426634e7929541eC2318f3dCF7e").unwrap(),
        pay_to: EvmAddress::from_str("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045").unwrap(),
        max_timeout_seconds: 30,
        extra: Some(serde_json::json!({"name": "USDC", "version": "2"})),
    }
}

fn payment_header() -> String {
    let payload = PaymentPayload {
        x402_version: X402Version2,
        accepted: requirements(),
        payload: SchemePayload::Exact(ExactPayload {
            signature: EvmSignature([0x42; 65]),
            authorization: ExactAuthorization {
                from: payer(),
                to: EvmAddress::from_str("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045").unwrap(),
                value: TokenAmount::from(1_000_000u64),
                valid_after: UnixTimestamp(0),
                valid_before: UnixTimestamp(u32::MAX as u64),
                nonce: HexEncodedNonce([7; 32]),
            },
        }),
    };
    Base64Bytes::encode_json(&payload).unwrap().to_string()
}

fn config() -> GatewayConfig {
    let mut config = GatewayConfig::new("http://localhost:8403", requirements());
    config.protected_paths = vec!["/api/*".to_string()];
    config
}

fn app(mock: MockFacilitator, config: GatewayConfig, hits: Arc<AtomicUsize>) -> Router {
    let layer = PaymentGateLayer::with_facilitator(mock, config).unwrap();
    Router::new()
        .route(
            "/api/data",
            get(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                async { r#"{"data":"ok"}"# }
            }),
        )
        .route("/open", get(|| async { "free" }))
        .layer(layer)
}

async fn body_json(body: Body) -> serde_json::Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn missing_header_produces_402_challenge() {
    let mock = MockFacilitator::happy();
    let hits = Arc::new(AtomicUsize::new(0));
    let app = app(mock.clone(), config(), hits.clone());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/data")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let header = response
        .headers()
        .get("PAYMENT-REQUIRED")
        .expect("challenge header present")
        .clone();
    let body = body_json(response.into_body()).await;
    assert_eq!(body["x402Version"], 2);
    assert_eq!(body["error"], "PAYMENT-SIGNATURE header is required");
    assert_eq!(body["resource"]["url"], "/api/data");
    assert_eq!(body["accepts"][0]["amount"], "1000000");

    // the header decodes to the same challenge object
    let decoded: PaymentRequired = Base64Bytes::from(header.as_bytes()).decode_json().unwrap();
    assert_eq!(serde_json::to_value(&decoded).unwrap(), body);

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(mock.verify_calls(), 0);
    assert_eq!(mock.settle_calls(), 0);
}

#[tokio::test]
async fn malformed_header_is_bad_request() {
    let mock = MockFacilitator::happy();
    let hits = Arc::new(AtomicUsize::new(0));
    let app = app(mock.clone(), config(), hits.clone());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/data")
                .header("PAYMENT-SIGNATURE", "!!!not-base64!!!")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(mock.verify_calls(), 0);
}

#[tokio::test]
async fn rejected_verification_returns_402_without_running_handler() {
    let mock = MockFacilitator::rejecting("insufficient amount: got 500000, required 1000000");
    let hits = Arc::new(AtomicUsize::new(0));
    let app = app(mock.clone(), config(), hits.clone());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/data")
                .header("PAYMENT-SIGNATURE", payment_header())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = body_json(response.into_body()).await;
    assert_eq!(
        body["error"],
        "insufficient amount: got 500000, required 1000000"
    );
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(mock.settle_calls(), 0);
}

#[tokio::test]
async fn happy_path_settles_once_and_releases_body() {
    let mock = MockFacilitator::happy();
    let hits = Arc::new(AtomicUsize::new(0));
    let app = app(mock.clone(), config(), hits.clone());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/data")
                .header("PAYMENT-SIGNATURE", payment_header())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let header = response
        .headers()
        .get("PAYMENT-RESPONSE")
        .expect("settlement header present")
        .clone();
    let settlement = response
        .extensions()
        .get::<SettlementContext>()
        .expect("settlement context attached");
    assert_eq!(settlement.transaction, Some(TransactionHash([0xCD; 32])));
    assert_eq!(settlement.payer, Some(payer()));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], br#"{"data":"ok"}"#);

    let decoded: SettleResponse = Base64Bytes::from(header.as_bytes()).decode_json().unwrap();
    assert_eq!(decoded, settled());

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(mock.verify_calls(), 1);
    assert_eq!(mock.settle_calls(), 1);
}

#[tokio::test]
async fn failed_handler_is_flushed_without_settlement() {
    let mock = MockFacilitator::happy();
    let layer = PaymentGateLayer::with_facilitator(mock.clone(), config()).unwrap();
    let app = Router::new()
        .route(
            "/api/data",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "handler exploded") }),
        )
        .layer(layer);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/data")
                .header("PAYMENT-SIGNATURE", payment_header())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"handler exploded");
    assert_eq!(mock.verify_calls(), 1);
    assert_eq!(mock.settle_calls(), 0);
}

#[tokio::test]
async fn oversized_body_yields_500_and_no_settlement() {
    let mock = MockFacilitator::happy();
    let mut config = config();
    config.max_buffer_size = 64;
    let layer = PaymentGateLayer::with_facilitator(mock.clone(), config).unwrap();
    let app = Router::new()
        .route("/api/data", get(|| async { "x".repeat(4096) }))
        .layer(layer);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/data")
                .header("PAYMENT-SIGNATURE", payment_header())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["error"], "response too large to process payment");
    assert_eq!(mock.settle_calls(), 0);
}

#[tokio::test]
async fn unsuccessful_settlement_discards_buffered_body() {
    let mut mock = MockFacilitator::happy();
    mock.settle = Ok(SettleResponse::failure(
        "gas price too high: 200000000000 > max 100000000000",
    ));
    let hits = Arc::new(AtomicUsize::new(0));
    let app = app(mock.clone(), config(), hits.clone());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/data")
                .header("PAYMENT-SIGNATURE", payment_header())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = body_json(response.into_body()).await;
    assert_eq!(
        body["error"],
        "payment settlement failed: gas price too high: 200000000000 > max 100000000000"
    );
    // handler ran, but its body never reached the client
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn facilitator_transport_failures_are_bad_gateway() {
    let mut unreachable_verify = MockFacilitator::happy();
    unreachable_verify.verify = Err("connection refused".to_string());
    let hits = Arc::new(AtomicUsize::new(0));
    let app1 = app(unreachable_verify, config(), hits.clone());
    let response = app1
        .oneshot(
            Request::builder()
                .uri("/api/data")
                .header("PAYMENT-SIGNATURE", payment_header())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    let mut unreachable_settle = MockFacilitator::happy();
    unreachable_settle.settle = Err("connection refused".to_string());
    let app2 = app(unreachable_settle, config(), Arc::new(AtomicUsize::new(0)));
    let response = app2
        .oneshot(
            Request::builder()
                .uri("/api/data")
                .header("PAYMENT-SIGNATURE", payment_header())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn verified_payment_context_reaches_the_handler() {
    let mock = MockFacilitator::happy();
    let layer = PaymentGateLayer::with_facilitator(mock, config()).unwrap();
    let app = Router::new()
        .route(
            "/api/data",
            get(|axum::Extension(ctx): axum::Extension<PaymentContext>| async move {
                assert!(ctx.verified);
                ctx.requirements.amount.to_string()
            }),
        )
        .layer(layer);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/data")
                .header("PAYMENT-SIGNATURE", payment_header())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"1000000");
}

#[tokio::test]
async fn unprotected_paths_bypass_payment_logic() {
    let mock = MockFacilitator::happy();
    let app = app(mock.clone(), config(), Arc::new(AtomicUsize::new(0)));

    let response = app
        .oneshot(Request::builder().uri("/open").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(mock.verify_calls(), 0);
    assert_eq!(mock.settle_calls(), 0);
}

#[tokio::test]
async fn discovery_bypasses_payment_even_when_pattern_matches() {
    let mock = MockFacilitator::happy();
    let mut config = config();
    config.protected_paths = vec!["/.well-known/*".to_string(), "/api/*".to_string()];
    config.discovery = DiscoveryConfig {
        enabled: true,
        ownership_proofs: vec!["0xabcd".to_string()],
        instructions: Some("pay per request".to_string()),
    };
    let layer = PaymentGateLayer::with_facilitator(mock.clone(), config).unwrap();
    let app = Router::new()
        .route("/api/data", get(|| async { "paid" }))
        // the gate answers before this handler is ever reached
        .route("/.well-known/x402", get(|| async { "unreachable" }))
        .layer(layer);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/.well-known/x402")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["version"], 1);
    assert_eq!(body["resources"][1], "/api/*");
    assert_eq!(body["ownershipProofs"][0], "0xabcd");
    assert_eq!(body["instructions"], "pay per request");
    assert_eq!(mock.verify_calls(), 0);
}
