//! Tower layer wiring the payment gate into an axum router.
//!
//! ```rust,ignore
//! use tollgate_axum::{GatewayConfig, PaymentGateLayer};
//!
//! let config = GatewayConfig::new("https://facilitator.example", requirements);
//! let layer = PaymentGateLayer::try_new(config)?;
//! let app = Router::new().route("/api/data", get(handler)).layer(layer);
//! ```

use axum_core::extract::Request;
use axum_core::response::Response;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

use tollgate::facilitator::Facilitator;

use crate::config::{GatewayConfig, GatewayConfigError};
use crate::facilitator_client::FacilitatorClient;
use crate::paygate::Paygate;

/// A payment-enforcing middleware layer. Clone it onto as many routes as
/// needed; all clones share one gate and one facilitator client.
pub struct PaymentGateLayer<F> {
    gate: Arc<Paygate<F>>,
}

impl<F> Clone for PaymentGateLayer<F> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
        }
    }
}

impl PaymentGateLayer<FacilitatorClient> {
    /// Builds a layer talking to the remote facilitator named in the config.
    pub fn try_new(config: GatewayConfig) -> Result<Self, GatewayConfigError> {
        let facilitator = FacilitatorClient::try_from(config.facilitator_url.as_str())
            .map_err(|e| GatewayConfigError::InvalidFacilitatorUrl(e.to_string()))?;
        Self::with_facilitator(facilitator, config)
    }
}

impl<F> PaymentGateLayer<F>
where
    F: Facilitator,
{
    /// Builds a layer over any [`Facilitator`] implementation, e.g. an
    /// in-process one.
    pub fn with_facilitator(facilitator: F, config: GatewayConfig) -> Result<Self, GatewayConfigError> {
        let gate = Paygate::new(facilitator, config)?;
        Ok(Self {
            gate: Arc::new(gate),
        })
    }
}

impl<S, F> Layer<S> for PaymentGateLayer<F>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    F: Facilitator + Send + Sync + 'static,
{
    type Service = PaymentGateService<F>;

    fn layer(&self, inner: S) -> Self::Service {
        PaymentGateService {
            gate: self.gate.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// The service produced by [`PaymentGateLayer`].
pub struct PaymentGateService<F> {
    gate: Arc<Paygate<F>>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<F> Clone for PaymentGateService<F> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<F> Service<Request> for PaymentGateService<F>
where
    F: Facilitator + Send + Sync + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let gate = self.gate.clone();
        let inner = self.inner.clone();
        Box::pin(async move { gate.handle_request(inner, req).await })
    }
}
