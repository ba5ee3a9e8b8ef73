//! Gateway middleware configuration.

use http::header::HeaderName;
use std::collections::{BTreeMap, HashMap};
use url::Url;

use tollgate::types::{PaymentRequirements, ResourceInfo};

/// Default request header carrying the payment payload.
pub const DEFAULT_PAYMENT_HEADER: &str = "PAYMENT-SIGNATURE";

/// Default response-buffer ceiling: 1 MiB.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Configuration of the payment gate on a resource server.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the facilitator service.
    pub facilitator_url: String,
    /// Glob patterns of paths that require payment. A request is protected
    /// if any pattern matches; an empty list protects nothing.
    pub protected_paths: Vec<String>,
    /// Requirements for protected routes without a specific entry.
    pub default_requirements: PaymentRequirements,
    /// Route-specific requirements: exact path first, then first matching
    /// glob key in lexicographic order.
    pub route_requirements: BTreeMap<String, PaymentRequirements>,
    /// Resource metadata included in 402 challenges, keyed by route.
    pub route_resources: HashMap<String, ResourceInfo>,
    /// Header name carrying the payment payload. Defaults to
    /// `PAYMENT-SIGNATURE`.
    pub payment_header_name: Option<String>,
    /// Byte ceiling for buffered handler responses. Handlers producing more
    /// get a 500 and no settlement is attempted.
    pub max_buffer_size: usize,
    /// Discovery document at `/.well-known/x402`, bypassing payment logic.
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub ownership_proofs: Vec<String>,
    pub instructions: Option<String>,
}

impl GatewayConfig {
    pub fn new(facilitator_url: impl Into<String>, default_requirements: PaymentRequirements) -> Self {
        Self {
            facilitator_url: facilitator_url.into(),
            protected_paths: Vec::new(),
            default_requirements,
            route_requirements: BTreeMap::new(),
            route_resources: HashMap::new(),
            payment_header_name: None,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            discovery: DiscoveryConfig::default(),
        }
    }

    pub fn payment_header_name(&self) -> Result<HeaderName, GatewayConfigError> {
        let name = self
            .payment_header_name
            .as_deref()
            .unwrap_or(DEFAULT_PAYMENT_HEADER);
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| GatewayConfigError::InvalidHeaderName(name.to_string()))
    }

    pub fn validate(&self) -> Result<(), GatewayConfigError> {
        if self.facilitator_url.is_empty() {
            return Err(GatewayConfigError::MissingFacilitatorUrl);
        }
        Url::parse(&self.facilitator_url)
            .map_err(|e| GatewayConfigError::InvalidFacilitatorUrl(e.to_string()))?;
        self.payment_header_name()?;
        if self.max_buffer_size == 0 {
            return Err(GatewayConfigError::ZeroBufferSize);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayConfigError {
    #[error("facilitator URL is required")]
    MissingFacilitatorUrl,
    #[error("invalid facilitator URL: {0}")]
    InvalidFacilitatorUrl(String),
    #[error("invalid payment header name {0:?}")]
    InvalidHeaderName(String),
    #[error("max buffer size must be positive")]
    ZeroBufferSize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use tollgate::chain::ChainId;
    use tollgate::types::{EvmAddress, Scheme, TokenAmount};

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network: ChainId::eip155(84532),
            amount: TokenAmount::from(1_000_000u64),
            asset: EvmAddress::from_str("0x036CbD53842c5426634e7929541eC2318f3dCF7e").unwrap(),
            pay_to: EvmAddress::from_str("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045").unwrap(),
            max_timeout_seconds: 300,
            extra: None,
        }
    }

    #[test]
    fn default_header_name_applies() {
        let config = GatewayConfig::new("http://localhost:8403", requirements());
        assert_eq!(config.payment_header_name().unwrap(), "payment-signature");
    }

    #[test]
    fn empty_protected_paths_are_allowed() {
        let config = GatewayConfig::new("http://localhost:8403", requirements());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_missing_facilitator_url() {
        let config = GatewayConfig::new("", requirements());
        assert!(matches!(
            config.validate(),
            Err(GatewayConfigError::MissingFacilitatorUrl)
        ));
    }

    #[test]
    fn rejects_unparseable_facilitator_url() {
        let config = GatewayConfig::new("not a url", requirements());
        assert!(matches!(
            config.validate(),
            Err(GatewayConfigError::InvalidFacilitatorUrl(_))
        ));
    }

    #[test]
    fn rejects_zero_buffer() {
        let mut config = GatewayConfig::new("http://localhost:8403", requirements());
        config.max_buffer_size = 0;
        assert!(matches!(
            config.validate(),
            Err(GatewayConfigError::ZeroBufferSize)
        ));
    }
}
