//! The verification and settlement interface shared by facilitator
//! implementations.
//!
//! [`FacilitatorLocal`](crate::facilitator_local::FacilitatorLocal) implements
//! it with on-chain checks; the gateway middleware implements it over HTTP
//! against a remote facilitator. Payment rejections are never errors: they
//! come back inside [`VerifyResponse`]/[`SettleResponse`]. `Self::Error` is
//! reserved for transport-level failure.

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::types::{
    SettleRequest, SettleResponse, SupportedResponse, VerifyRequest, VerifyResponse,
};

/// Asynchronous interface of a payment facilitator.
pub trait Facilitator {
    /// Transport-level error. A local facilitator is infallible; an HTTP
    /// client surfaces connection and decoding failures here.
    type Error: Debug + Display;

    /// Validates a payment payload against the stated requirements.
    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send;

    /// Broadcasts the authorized transfer on-chain.
    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send;

    /// Lists the scheme/network pairs this facilitator can process.
    fn supported(&self) -> impl Future<Output = Result<SupportedResponse, Self::Error>> + Send;
}

impl<T: Facilitator + Sync + Send> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(request)
    }

    fn supported(&self) -> impl Future<Output = Result<SupportedResponse, Self::Error>> + Send {
        self.as_ref().supported()
    }
}
