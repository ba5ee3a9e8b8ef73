//! HTTP endpoints of the facilitator.
//!
//! Three routes: `GET /supported`, `POST /verify`, `POST /settle`. Bodies are
//! JSON; malformed JSON is rejected with HTTP 400 by the `Json` extractor.
//! Every handled condition past parsing returns HTTP 200 with a structured
//! result, so payment rejections are data, not transport errors.

use axum::{Extension, Json, response::IntoResponse};
use std::sync::Arc;
use tracing::instrument;

use crate::facilitator_local::FacilitatorLocal;
use crate::types::{SettleRequest, VerifyRequest, VerifyResponse};

/// `GET /supported`: scheme/network pairs this facilitator processes, plus
/// its settlement signer addresses.
#[instrument(skip_all)]
pub async fn get_supported(
    Extension(facilitator): Extension<Arc<FacilitatorLocal>>,
) -> impl IntoResponse {
    Json(facilitator.supported_kinds())
}

/// `POST /verify`: run the verification pipeline against the stated
/// requirements.
///
/// Unsupported scheme/network pairs are rejected up front without touching
/// any RPC.
#[instrument(skip_all, fields(network = %body.payment_requirements.network))]
pub async fn post_verify(
    Extension(facilitator): Extension<Arc<FacilitatorLocal>>,
    Json(body): Json<VerifyRequest>,
) -> impl IntoResponse {
    let requirements = &body.payment_requirements;
    if !facilitator.is_supported(requirements.scheme, &requirements.network) {
        return Json(VerifyResponse::invalid(format!(
            "unsupported scheme-network: {}-{}",
            requirements.scheme, requirements.network
        )));
    }
    Json(facilitator.verify_payment(&body).await)
}

/// `POST /settle`: broadcast the authorized transfer on-chain.
#[instrument(skip_all, fields(network = %body.payment_requirements.network))]
pub async fn post_settle(
    Extension(facilitator): Extension<Arc<FacilitatorLocal>>,
    Json(body): Json<SettleRequest>,
) -> impl IntoResponse {
    Json(facilitator.settle_payment(&body).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainId;
    use crate::facilitator_local::FacilitatorLocal;
    use crate::provider_cache::ProviderCache;
    use crate::timestamp::UnixTimestamp;
    use crate::types::{
        EvmAddress, EvmSignature, ExactAuthorization, ExactPayload, HexEncodedNonce,
        PaymentPayload, PaymentRequirements, Scheme, SchemePayload, SupportedKind, TokenAmount,
        VerifyRequest, X402Version2,
    };
    use alloy::network::EthereumWallet;
    use alloy::primitives::address;
    use alloy::signers::local::PrivateKeySigner;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header::CONTENT_TYPE};
    use axum::routing::{get, post};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> Router {
        let signer = PrivateKeySigner::random();
        let address = EvmAddress(signer.address());
        let providers = ProviderCache::new(EthereumWallet::from(signer), Default::default());
        let facilitator = FacilitatorLocal::new(
            providers,
            vec![SupportedKind {
                x402_version: X402Version2,
                scheme: Scheme::Exact,
                network: ChainId::eip155(84532),
            }],
            address,
            100_000_000_000,
            Duration::from_secs(30),
        );
        Router::new()
            .route("/supported", get(get_supported))
            .route("/verify", post(post_verify))
            .route("/settle", post(post_settle))
            .layer(Extension(Arc::new(facilitator)))
    }

    fn verify_request(network: ChainId) -> VerifyRequest {
        let requirements = PaymentRequirements {
            scheme: Scheme::Exact,
            network: network.clone(),
            amount: TokenAmount::from(1_000_000u64),
            asset: EvmAddress(address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e")),
            pay_to: EvmAddress(address!("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045")),
            max_timeout_seconds: 300,
            extra: Some(serde_json::json!({"name": "USDC", "version": "2"})),
        };
        VerifyRequest {
            x402_version: X402Version2,
            payment_payload: PaymentPayload {
                x402_version: X402Version2,
                accepted: requirements.clone(),
                payload: SchemePayload::Exact(ExactPayload {
                    signature: EvmSignature([0x42; 65]),
                    authorization: ExactAuthorization {
                        from: EvmAddress(address!("0x1111111111111111111111111111111111111111")),
                        to: EvmAddress(address!("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045")),
                        value: TokenAmount::from(1_000_000u64),
                        valid_after: UnixTimestamp(0),
                        valid_before: UnixTimestamp(u32::MAX as u64),
                        nonce: HexEncodedNonce([7; 32]),
                    },
                }),
            },
            payment_requirements: requirements,
        }
    }

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn verify_rejects_unsupported_pair_up_front() {
        let request = verify_request(ChainId::eip155(1));
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/verify")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_vec(&request).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response.into_body()).await;
        assert_eq!(body["isValid"], false);
        assert_eq!(
            body["invalidReason"],
            "unsupported scheme-network: exact-eip155:1"
        );
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/verify")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn supported_lists_kinds_and_signers() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/supported")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response.into_body()).await;
        assert_eq!(body["kinds"][0]["scheme"], "exact");
        assert_eq!(body["kinds"][0]["network"], "eip155:84532");
        assert_eq!(body["extensions"].as_array().unwrap().len(), 0);
        assert_eq!(body["signers"]["eip155:*"].as_array().unwrap().len(), 1);
    }
}
