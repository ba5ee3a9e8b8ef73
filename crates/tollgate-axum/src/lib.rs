//! Axum middleware enforcing HTTP-402 payment on protected routes.
//!
//! The gate intercepts requests to protected paths, challenges unpaid ones
//! with `402 Payment Required`, verifies submitted payment headers with a
//! facilitator, buffers the handler's response, and releases it only after
//! on-chain settlement succeeds. Non-2xx handler responses are passed
//! through without charging the payer.
//!
//! See [`GatewayConfig`] for knobs (protected path globs, per-route
//! requirements, buffer ceiling, discovery document) and
//! [`PaymentGateLayer`] for router wiring.

mod config;
pub mod facilitator_client;
mod layer;
pub mod paygate;

pub use config::{
    DEFAULT_MAX_BUFFER_SIZE, DEFAULT_PAYMENT_HEADER, DiscoveryConfig, GatewayConfig,
    GatewayConfigError,
};
pub use facilitator_client::{FacilitatorClient, FacilitatorClientError};
pub use layer::{PaymentGateLayer, PaymentGateService};
pub use paygate::{
    DISCOVERY_PATH, PAYMENT_REQUIRED_HEADER, PAYMENT_RESPONSE_HEADER, PaymentContext, Paygate,
    SettlementContext,
};
