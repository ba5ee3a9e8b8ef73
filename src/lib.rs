//! Core implementation of an HTTP-402 "pay-per-request" payment protocol.
//!
//! A resource server withholds protected responses until the client presents
//! a cryptographically-signed, on-chain-redeemable transfer authorization; a
//! trusted facilitator verifies authorizations off-chain and settles them
//! on-chain via EIP-3009 `transferWithAuthorization`.
//!
//! # Roles
//!
//! - **Facilitator**: verifies and settles payments. See [`facilitator`] for
//!   the trait and [`facilitator_local`] for the on-chain engine behind the
//!   `tollgate-facilitator` binary.
//! - **Resource server**: gates routes behind payment. The `tollgate-axum`
//!   crate provides the gateway middleware over the types defined here.
//! - **Payer**: builds signed payment headers. See the `tollgate-reqwest`
//!   crate.
//!
//! # Modules
//!
//! - [`types`] — wire data model and base64-JSON header codec.
//! - [`chain`] — CAIP-2 chain identifiers.
//! - [`eip3009`] — EIP-712 hashing, signing, and recovery for
//!   `TransferWithAuthorization`.
//! - [`provider_cache`] — lazily-dialed per-network RPC providers.
//! - [`facilitator`] / [`facilitator_local`] — the verify/settle interface
//!   and its on-chain implementation.
//! - [`handlers`] — the facilitator's HTTP endpoints.
//! - [`config`] — facilitator configuration and the env-loaded signing key.

pub mod chain;
pub mod config;
pub mod eip3009;
pub mod facilitator;
pub mod facilitator_local;
pub mod handlers;
pub mod provider_cache;
pub mod telemetry;
pub mod timestamp;
pub mod types;
