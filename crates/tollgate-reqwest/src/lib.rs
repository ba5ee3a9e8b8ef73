//! Payment client for HTTP-402 protected resources.
//!
//! Wraps `reqwest` with the two-step check/pay dance: probe a resource, read
//! its `PaymentRequired` challenge, sign an EIP-3009 transfer authorization
//! with a local key, and retry with the `PAYMENT-SIGNATURE` header.
//!
//! ```rust,ignore
//! use alloy::signers::local::PrivateKeySigner;
//! use reqwest::Method;
//! use tollgate_reqwest::{CheckOutcome, PaymentClient};
//!
//! let client = PaymentClient::new(PrivateKeySigner::random());
//! match client.check(Method::GET, url, None, None).await? {
//!     CheckOutcome::Passthrough(response) => { /* free resource */ }
//!     CheckOutcome::PaymentRequired(challenge) => {
//!         let response = client
//!             .pay(Method::GET, url, None, None, &challenge.accepts[0])
//!             .await?;
//!     }
//! }
//! ```

mod client;

pub use client::{
    CheckOutcome, PAYMENT_SIGNATURE_HEADER, PaymentClient, PaymentClientError,
};
