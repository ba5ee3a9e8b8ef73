//! Wire types for the pay-per-request protocol.
//!
//! The key objects are [`PaymentPayload`] (what a payer submits),
//! [`PaymentRequirements`] (what a resource demands), [`PaymentRequired`]
//! (the 402 challenge), and the facilitator request/response pairs for
//! `/verify` and `/settle`.
//!
//! Payment objects travel as base64-encoded JSON inside HTTP headers:
//! `PAYMENT-SIGNATURE` on requests, `PAYMENT-REQUIRED` and `PAYMENT-RESPONSE`
//! on responses. [`Base64Bytes`] implements that envelope.

use alloy::hex;
use alloy::primitives::U256;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Debug, Display};
use std::str::FromStr;

use crate::chain::ChainId;
use crate::timestamp::UnixTimestamp;

/// Version 2 of the protocol. Serializes as the integer `2` and rejects
/// anything else on the way in.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct X402Version2;

impl X402Version2 {
    pub const VALUE: u8 = 2;
}

impl Serialize for X402Version2 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(Self::VALUE)
    }
}

impl<'de> Deserialize<'de> for X402Version2 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let num = u8::deserialize(deserializer)?;
        if num == Self::VALUE {
            Ok(X402Version2)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected version {}, got {num}",
                Self::VALUE
            )))
        }
    }
}

impl Display for X402Version2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Self::VALUE)
    }
}

/// Payment scheme tag. Only `exact` is defined: a fixed amount, one-shot
/// transfer authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Exact => write!(f, "exact"),
        }
    }
}

/// An EVM address. Wrapper around [`alloy::primitives::Address`] for typed
/// handling and 0x-prefixed hex serialization.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct EvmAddress(pub alloy::primitives::Address);

impl Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to decode EVM address")]
pub struct EvmAddressDecodingError;

impl FromStr for EvmAddress {
    type Err = EvmAddressDecodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address =
            alloy::primitives::Address::from_str(s).map_err(|_| EvmAddressDecodingError)?;
        Ok(Self(address))
    }
}

impl From<alloy::primitives::Address> for EvmAddress {
    fn from(address: alloy::primitives::Address) -> Self {
        EvmAddress(address)
    }
}

impl From<EvmAddress> for alloy::primitives::Address {
    fn from(address: EvmAddress) -> Self {
        address.0
    }
}

/// A token amount in the smallest indivisible unit, carried on the wire as a
/// decimal string of an unbounded non-negative integer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    pub fn inner(&self) -> U256 {
        self.0
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid token amount {0:?}: expected a decimal non-negative integer")]
pub struct TokenAmountParseError(String);

impl FromStr for TokenAmount {
    type Err = TokenAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TokenAmountParseError(s.to_string()));
        }
        let value =
            U256::from_str_radix(s, 10).map_err(|_| TokenAmountParseError(s.to_string()))?;
        Ok(TokenAmount(value))
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 65-byte secp256k1 signature, 0x-prefixed hex on the wire (130 hex chars).
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct EvmSignature(pub [u8; 65]);

impl Debug for EvmSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvmSignature(0x{})", hex::encode(self.0))
    }
}

impl From<[u8; 65]> for EvmSignature {
    fn from(bytes: [u8; 65]) -> Self {
        EvmSignature(bytes)
    }
}

impl<'de> Deserialize<'de> for EvmSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        static SIG_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{130}$").expect("invalid signature regex"));

        let s = String::deserialize(deserializer)?;
        if !SIG_REGEX.is_match(&s) {
            return Err(serde::de::Error::custom(
                "invalid signature format: must be 0x-prefixed and 130 hex chars",
            ));
        }
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| serde::de::Error::custom("invalid hex in signature"))?;
        let array: [u8; 65] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be exactly 65 bytes"))?;
        Ok(EvmSignature(array))
    }
}

impl Serialize for EvmSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

/// A 32-byte random authorization nonce, 0x-prefixed hex on the wire.
///
/// Opaque to the facilitator; replay prevention is delegated to the token
/// contract's authorization-nonce registry.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct HexEncodedNonce(pub [u8; 32]);

impl Debug for HexEncodedNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexEncodedNonce(0x{})", hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for HexEncodedNonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        static NONCE_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("invalid nonce regex"));

        let s = String::deserialize(deserializer)?;
        if !NONCE_REGEX.is_match(&s) {
            return Err(serde::de::Error::custom("invalid nonce format"));
        }
        let bytes =
            hex::decode(&s[2..]).map_err(|_| serde::de::Error::custom("invalid hex in nonce"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("nonce must be exactly 32 bytes"))?;
        Ok(HexEncodedNonce(array))
    }
}

impl Serialize for HexEncodedNonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

/// A 32-byte transaction hash, 0x-prefixed hex on the wire.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct TransactionHash(pub [u8; 32]);

impl Debug for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionHash(0x{})", hex::encode(self.0))
    }
}

impl Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<alloy::primitives::B256> for TransactionHash {
    fn from(value: alloy::primitives::B256) -> Self {
        TransactionHash(value.0)
    }
}

impl<'de> Deserialize<'de> for TransactionHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        static TX_HASH_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("invalid tx hash regex"));

        let s = String::deserialize(deserializer)?;
        if !TX_HASH_REGEX.is_match(&s) {
            return Err(serde::de::Error::custom("invalid transaction hash format"));
        }
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| serde::de::Error::custom("invalid hex in transaction hash"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("transaction hash must be exactly 32 bytes"))?;
        Ok(TransactionHash(array))
    }
}

impl Serialize for TransactionHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// What a protected resource demands of a payer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: ChainId,
    pub amount: TokenAmount,
    pub asset: EvmAddress,
    pub pay_to: EvmAddress,
    pub max_timeout_seconds: u64,
    /// Open mapping. Carries the EIP-712 domain `name` and `version` of the
    /// token when the scheme needs them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl PaymentRequirements {
    /// EIP-712 domain name from `extra`, when present.
    pub fn eip712_name(&self) -> Option<&str> {
        self.extra.as_ref()?.get("name")?.as_str()
    }

    /// EIP-712 domain version from `extra`, when present.
    pub fn eip712_version(&self) -> Option<&str> {
        self.extra.as_ref()?.get("version")?.as_str()
    }
}

/// A signed one-shot transfer authorization: who pays whom, how much, and in
/// which time window. `nonce` keys the authorization in the token contract.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactAuthorization {
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: HexEncodedNonce,
}

/// The `exact` scheme body: the authorization plus its EIP-712 signature.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactPayload {
    pub signature: EvmSignature,
    pub authorization: ExactAuthorization,
}

/// Scheme-specific payload body, dispatched on `accepted.scheme`.
///
/// Only `exact` exists today; new schemes slot in as additional variants
/// without rewiring the verification pipeline.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemePayload {
    Exact(ExactPayload),
}

/// The wire envelope a payer submits, base64-JSON in the `PAYMENT-SIGNATURE`
/// request header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: X402Version2,
    /// The requirements the payer believes apply.
    pub accepted: PaymentRequirements,
    pub payload: SchemePayload,
}

/// Metadata about the resource a payment unlocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// The 402 challenge: served as the response body and, base64-JSON encoded,
/// as the `PAYMENT-REQUIRED` header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub x402_version: X402Version2,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceInfo>,
    /// Acceptable payment requirements, in order of server preference.
    pub accepts: Vec<PaymentRequirements>,
}

/// Body of `POST /verify` and `POST /settle` on the facilitator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(default)]
    pub x402_version: X402Version2,
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

/// Settlement takes the same body as verification.
pub type SettleRequest = VerifyRequest;

/// Facilitator verdict on a proposed payment.
///
/// Serialized as `{isValid, payer}` or `{isValid, invalidReason}`. The reason
/// string is wire-visible and human-readable.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyResponse {
    Valid { payer: EvmAddress },
    Invalid { reason: String },
}

impl VerifyResponse {
    pub fn valid(payer: EvmAddress) -> Self {
        VerifyResponse::Valid { payer }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        VerifyResponse::Invalid {
            reason: reason.into(),
        }
    }
}

impl Serialize for VerifyResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("VerifyResponse", 2)?;
        match self {
            VerifyResponse::Valid { payer } => {
                s.serialize_field("isValid", &true)?;
                s.serialize_field("payer", payer)?;
            }
            VerifyResponse::Invalid { reason } => {
                s.serialize_field("isValid", &false)?;
                s.serialize_field("invalidReason", reason)?;
            }
        }
        s.end()
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            is_valid: bool,
            #[serde(default)]
            payer: Option<EvmAddress>,
            #[serde(default)]
            invalid_reason: Option<String>,
        }

        let raw = Raw::deserialize(deserializer)?;
        match (raw.is_valid, raw.payer, raw.invalid_reason) {
            (true, Some(payer), None) => Ok(VerifyResponse::Valid { payer }),
            (false, _, Some(reason)) => Ok(VerifyResponse::Invalid { reason }),
            (true, None, _) => Err(serde::de::Error::custom(
                "`payer` must be present when `isValid` is true",
            )),
            (true, _, Some(_)) => Err(serde::de::Error::custom(
                "`invalidReason` must be absent when `isValid` is true",
            )),
            (false, _, None) => Err(serde::de::Error::custom(
                "`invalidReason` must be present when `isValid` is false",
            )),
        }
    }
}

/// Facilitator result of an on-chain settlement attempt. Also carried
/// base64-JSON in the `PAYMENT-RESPONSE` header on a settled 2xx.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<EvmAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<ChainId>,
}

impl SettleResponse {
    pub fn failure(reason: impl Into<String>) -> Self {
        SettleResponse {
            success: false,
            error_reason: Some(reason.into()),
            payer: None,
            transaction: None,
            network: None,
        }
    }
}

/// One scheme/network pair a facilitator can process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedKind {
    #[serde(default)]
    pub x402_version: X402Version2,
    pub scheme: Scheme,
    pub network: ChainId,
}

/// Response of `GET /supported`: accepted kinds plus the facilitator's
/// settlement signer addresses keyed by namespace pattern (e.g. `eip155:*`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    pub kinds: Vec<SupportedKind>,
    pub extensions: Vec<String>,
    pub signers: BTreeMap<String, Vec<EvmAddress>>,
}

/// Discovery document served at `/.well-known/x402`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    pub version: u32,
    pub resources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ownership_proofs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Plain error body for conditions with no structured protocol response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}

/// Bytes of a base64 encoding of some other bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes<'a>(pub Cow<'a, [u8]>);

/// Error decoding a base64-JSON header into a protocol object. No partial
/// result is produced.
#[derive(Debug, thiserror::Error)]
pub enum HeaderDecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error encoding a protocol object into a base64-JSON header.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode header payload: {0}")]
pub struct HeaderEncodeError(#[from] serde_json::Error);

impl Base64Bytes<'_> {
    /// Decode the base64 string bytes into the raw binary payload.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(&self.0)
    }

    /// Encode raw binary input into base64 string bytes.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Base64Bytes<'static> {
        let encoded = b64.encode(input.as_ref());
        Base64Bytes(Cow::Owned(encoded.into_bytes()))
    }

    /// Decode base64, then JSON, into a protocol object.
    pub fn decode_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, HeaderDecodeError> {
        let decoded = self.decode()?;
        Ok(serde_json::from_slice(&decoded)?)
    }

    /// Encode a protocol object as JSON, then base64.
    pub fn encode_json<T: Serialize>(value: &T) -> Result<Base64Bytes<'static>, HeaderEncodeError> {
        let json = serde_json::to_vec(value)?;
        Ok(Base64Bytes::encode(json))
    }
}

impl AsRef<[u8]> for Base64Bytes<'_> {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<'a> From<&'a [u8]> for Base64Bytes<'a> {
    fn from(slice: &'a [u8]) -> Self {
        Base64Bytes(Cow::Borrowed(slice))
    }
}

impl Display for Base64Bytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.0.as_ref()))
    }
}

impl TryFrom<Base64Bytes<'_>> for PaymentPayload {
    type Error = HeaderDecodeError;

    fn try_from(value: Base64Bytes) -> Result<Self, Self::Error> {
        value.decode_json()
    }
}

impl TryFrom<Base64Bytes<'_>> for PaymentRequired {
    type Error = HeaderDecodeError;

    fn try_from(value: Base64Bytes) -> Result<Self, Self::Error> {
        value.decode_json()
    }
}

impl TryFrom<Base64Bytes<'_>> for SettleResponse {
    type Error = HeaderDecodeError;

    fn try_from(value: Base64Bytes) -> Result<Self, Self::Error> {
        value.decode_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network: ChainId::eip155(84532),
            amount: "1000000".parse().unwrap(),
            asset: EvmAddress(address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e")),
            pay_to: EvmAddress(address!("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045")),
            max_timeout_seconds: 300,
            extra: Some(serde_json::json!({"name": "USDC", "version": "2"})),
        }
    }

    fn payload() -> PaymentPayload {
        PaymentPayload {
            x402_version: X402Version2,
            accepted: requirements(),
            payload: SchemePayload::Exact(ExactPayload {
                signature: EvmSignature([0x42; 65]),
                authorization: ExactAuthorization {
                    from: EvmAddress(address!("0x1111111111111111111111111111111111111111")),
                    to: EvmAddress(address!("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045")),
                    value: "1000000".parse().unwrap(),
                    valid_after: UnixTimestamp(1_700_000_000),
                    valid_before: UnixTimestamp(1_700_003_600),
                    nonce: HexEncodedNonce([7; 32]),
                },
            }),
        }
    }

    #[test]
    fn payment_payload_header_round_trip() {
        let original = payload();
        let header = Base64Bytes::encode_json(&original).unwrap();
        let decoded: PaymentPayload = header.try_into().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn payment_payload_wire_field_names() {
        let json = serde_json::to_value(payload()).unwrap();
        assert_eq!(json["x402Version"], 2);
        assert_eq!(json["accepted"]["scheme"], "exact");
        assert_eq!(json["accepted"]["network"], "eip155:84532");
        assert_eq!(json["accepted"]["amount"], "1000000");
        assert_eq!(json["accepted"]["maxTimeoutSeconds"], 300);
        let auth = &json["payload"]["authorization"];
        assert_eq!(auth["validAfter"], 1_700_000_000u64);
        assert_eq!(auth["validBefore"], 1_700_003_600u64);
        assert_eq!(auth["value"], "1000000");
        assert!(
            json["payload"]["signature"]
                .as_str()
                .unwrap()
                .starts_with("0x")
        );
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        let bogus = Base64Bytes::from(&b"not-base64!!"[..]);
        let result: Result<PaymentPayload, _> = bogus.try_into();
        assert!(matches!(result, Err(HeaderDecodeError::Base64(_))));
    }

    #[test]
    fn decode_rejects_invalid_json() {
        let header = Base64Bytes::encode(b"{\"x402Version\": 2");
        let result: Result<PaymentPayload, _> = header.try_into();
        assert!(matches!(result, Err(HeaderDecodeError::Json(_))));
    }

    #[test]
    fn rejects_wrong_protocol_version() {
        let mut json = serde_json::to_value(payload()).unwrap();
        json["x402Version"] = serde_json::json!(1);
        let result: Result<PaymentPayload, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }

    #[test]
    fn token_amount_rejects_non_decimal() {
        assert!("".parse::<TokenAmount>().is_err());
        assert!("0x10".parse::<TokenAmount>().is_err());
        assert!("-3".parse::<TokenAmount>().is_err());
        assert!("12ab".parse::<TokenAmount>().is_err());
        assert_eq!(
            "1000000".parse::<TokenAmount>().unwrap(),
            TokenAmount::from(1_000_000u64)
        );
    }

    #[test]
    fn token_amount_zero_is_valid() {
        let zero: TokenAmount = "0".parse().unwrap();
        assert_eq!(zero.inner(), U256::ZERO);
    }

    #[test]
    fn signature_rejects_wrong_length() {
        let result: Result<EvmSignature, _> = serde_json::from_str("\"0x1234\"");
        assert!(result.is_err());
    }

    #[test]
    fn nonce_requires_exact_width() {
        let short: Result<HexEncodedNonce, _> = serde_json::from_str("\"0xabcd\"");
        assert!(short.is_err());
        let ok: HexEncodedNonce =
            serde_json::from_str(&format!("\"0x{}\"", "07".repeat(32))).unwrap();
        assert_eq!(ok.0, [7; 32]);
    }

    #[test]
    fn verify_response_serde_both_arms() {
        let valid = VerifyResponse::valid(EvmAddress(address!(
            "0x1111111111111111111111111111111111111111"
        )));
        let json = serde_json::to_value(&valid).unwrap();
        assert_eq!(json["isValid"], true);
        assert!(json.get("invalidReason").is_none());
        let back: VerifyResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, valid);

        let invalid = VerifyResponse::invalid("insufficient amount: got 500000, required 1000000");
        let json = serde_json::to_value(&invalid).unwrap();
        assert_eq!(json["isValid"], false);
        assert_eq!(
            json["invalidReason"],
            "insufficient amount: got 500000, required 1000000"
        );
        let back: VerifyResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, invalid);
    }

    #[test]
    fn verify_response_rejects_inconsistent_fields() {
        let missing_reason: Result<VerifyResponse, _> =
            serde_json::from_str(r#"{"isValid": false}"#);
        assert!(missing_reason.is_err());
        let missing_payer: Result<VerifyResponse, _> = serde_json::from_str(r#"{"isValid": true}"#);
        assert!(missing_payer.is_err());
    }

    #[test]
    fn settle_response_failure_omits_empty_fields() {
        let failure = SettleResponse::failure("gas price too high: 200 > max 100");
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errorReason"], "gas price too high: 200 > max 100");
        assert!(json.get("transaction").is_none());
        assert!(json.get("payer").is_none());
    }

    #[test]
    fn settle_response_header_round_trip() {
        let response = SettleResponse {
            success: true,
            error_reason: None,
            payer: Some(EvmAddress(address!(
                "0x1111111111111111111111111111111111111111"
            ))),
            transaction: Some(TransactionHash([0xAB; 32])),
            network: Some(ChainId::eip155(84532)),
        };
        let header = Base64Bytes::encode_json(&response).unwrap();
        let decoded: SettleResponse = header.try_into().unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn payment_required_round_trip_with_resource() {
        let required = PaymentRequired {
            x402_version: X402Version2,
            error: Some("PAYMENT-SIGNATURE header is required".to_string()),
            resource: Some(ResourceInfo {
                url: "/api/data".to_string(),
                description: None,
                mime_type: None,
            }),
            accepts: vec![requirements()],
        };
        let header = Base64Bytes::encode_json(&required).unwrap();
        let decoded: PaymentRequired = header.try_into().unwrap();
        assert_eq!(decoded, required);
        let json = serde_json::to_value(&required).unwrap();
        assert_eq!(json["resource"]["url"], "/api/data");
    }

    #[test]
    fn supported_response_shape() {
        let mut signers = BTreeMap::new();
        signers.insert(
            "eip155:*".to_string(),
            vec![EvmAddress(address!(
                "0x2222222222222222222222222222222222222222"
            ))],
        );
        let supported = SupportedResponse {
            kinds: vec![SupportedKind {
                x402_version: X402Version2,
                scheme: Scheme::Exact,
                network: ChainId::eip155(84532),
            }],
            extensions: vec![],
            signers,
        };
        let json = serde_json::to_value(&supported).unwrap();
        assert_eq!(json["kinds"][0]["network"], "eip155:84532");
        assert_eq!(json["kinds"][0]["x402Version"], 2);
        assert!(json["signers"]["eip155:*"].is_array());
    }
}
