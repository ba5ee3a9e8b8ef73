//! CAIP-2 chain identifiers.
//!
//! Networks are addressed by `<namespace>:<reference>` strings such as
//! `eip155:8453` (Base mainnet). [`ChainId`] keeps the identifier opaque;
//! [`Eip155ChainReference`] narrows it to an EVM chain whose reference fits
//! the EIP-155 signing domain.

use alloy::primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

/// CAIP-2 namespace for EVM chains.
pub const EIP155_NAMESPACE: &str = "eip155";

/// A CAIP-2 chain identifier of the form `<namespace>:<reference>`.
///
/// The reference must parse as an unbounded non-negative decimal integer;
/// anything else is a malformed identifier.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ChainId {
    pub namespace: String,
    pub reference: String,
}

impl ChainId {
    pub fn new(namespace: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    pub fn eip155(chain_id: u64) -> Self {
        Self::new(EIP155_NAMESPACE, chain_id.to_string())
    }

    /// The chain reference as an unbounded integer.
    pub fn reference_value(&self) -> Result<U256, ChainIdError> {
        U256::from_str_radix(&self.reference, 10)
            .map_err(|_| ChainIdError::InvalidReference(self.reference.clone()))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChainIdError {
    #[error("invalid CAIP-2 chain id {0:?}: expected <namespace>:<reference>")]
    InvalidFormat(String),
    #[error("invalid CAIP-2 chain reference {0:?}: expected a non-negative integer")]
    InvalidReference(String),
}

impl FromStr for ChainId {
    type Err = ChainIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, reference) = s
            .split_once(':')
            .ok_or_else(|| ChainIdError::InvalidFormat(s.to_string()))?;
        if namespace.is_empty() || reference.is_empty() {
            return Err(ChainIdError::InvalidFormat(s.to_string()));
        }
        let is_decimal = reference.bytes().all(|b| b.is_ascii_digit());
        if !is_decimal || U256::from_str_radix(reference, 10).is_err() {
            return Err(ChainIdError::InvalidReference(reference.to_string()));
        }
        Ok(ChainId::new(namespace, reference))
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChainId::from_str(&s).map_err(de::Error::custom)
    }
}

/// A chain reference within the `eip155` namespace.
///
/// EIP-155 binds transaction signatures to a `u64` chain id, so references
/// that do not fit are rejected even though CAIP-2 itself allows them.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Eip155ChainReference(u64);

impl Eip155ChainReference {
    pub fn new(chain_id: u64) -> Self {
        Self(chain_id)
    }

    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Eip155ChainReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Eip155ChainReference> for ChainId {
    fn from(value: Eip155ChainReference) -> Self {
        ChainId::eip155(value.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Eip155ChainReferenceError {
    #[error("invalid namespace {0:?}, expected eip155")]
    InvalidNamespace(String),
    #[error("invalid eip155 chain reference {0:?}")]
    InvalidReference(String),
}

impl TryFrom<&ChainId> for Eip155ChainReference {
    type Error = Eip155ChainReferenceError;

    fn try_from(value: &ChainId) -> Result<Self, Self::Error> {
        if value.namespace != EIP155_NAMESPACE {
            return Err(Eip155ChainReferenceError::InvalidNamespace(
                value.namespace.clone(),
            ));
        }
        let chain_id: u64 = value
            .reference
            .parse()
            .map_err(|_| Eip155ChainReferenceError::InvalidReference(value.reference.clone()))?;
        Ok(Eip155ChainReference(chain_id))
    }
}

impl TryFrom<ChainId> for Eip155ChainReference {
    type Error = Eip155ChainReferenceError;

    fn try_from(value: ChainId) -> Result<Self, Self::Error> {
        Self::try_from(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_eip155_chain_id() {
        let chain_id: ChainId = "eip155:8453".parse().unwrap();
        assert_eq!(chain_id.namespace, "eip155");
        assert_eq!(chain_id.reference, "8453");
        assert_eq!(chain_id.to_string(), "eip155:8453");
        assert_eq!(chain_id.reference_value().unwrap(), U256::from(8453u64));
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(matches!(
            ChainId::from_str("eip155"),
            Err(ChainIdError::InvalidFormat(_))
        ));
    }

    #[test]
    fn rejects_empty_parts() {
        assert!(ChainId::from_str(":8453").is_err());
        assert!(ChainId::from_str("eip155:").is_err());
    }

    #[test]
    fn rejects_non_integer_reference() {
        assert!(matches!(
            ChainId::from_str("eip155:base"),
            Err(ChainIdError::InvalidReference(_))
        ));
        assert!(ChainId::from_str("eip155:-1").is_err());
    }

    #[test]
    fn serde_round_trip() {
        let original = ChainId::eip155(84532);
        let json = serde_json::to_string(&original).unwrap();
        assert_eq!(json, "\"eip155:84532\"");
        let back: ChainId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn eip155_reference_requires_namespace() {
        let chain_id = ChainId::new("cosmos", "1");
        assert!(matches!(
            Eip155ChainReference::try_from(&chain_id),
            Err(Eip155ChainReferenceError::InvalidNamespace(_))
        ));
    }

    #[test]
    fn eip155_reference_requires_u64() {
        let chain_id: ChainId = "eip155:340282366920938463463374607431768211456"
            .parse()
            .unwrap();
        assert!(matches!(
            Eip155ChainReference::try_from(&chain_id),
            Err(Eip155ChainReferenceError::InvalidReference(_))
        ));
        let ok: Eip155ChainReference = (&ChainId::eip155(8453)).try_into().unwrap();
        assert_eq!(ok.inner(), 8453);
    }
}
