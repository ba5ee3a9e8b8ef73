//! EIP-712 hashing and signing for EIP-3009 `TransferWithAuthorization`.
//!
//! The typed-data domain is
//! `EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)`
//! where `name`/`version` come from the payment requirements' `extra` mapping,
//! `chainId` from the CAIP-2 network, and `verifyingContract` is the token
//! contract. The final digest is
//! `keccak256("\x19\x01" || domainSeparator || structHash)`, produced by the
//! `sol!`-generated struct below.

use alloy::primitives::{Address, B256, FixedBytes, Signature, SignatureError};
use alloy::signers::Signer;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::{Eip712Domain, SolStruct, eip712_domain};

use crate::chain::{Eip155ChainReference, Eip155ChainReferenceError};
use crate::types::{EvmSignature, ExactAuthorization, PaymentRequirements};

sol! {
    /// EIP-3009 transfer authorization message (EIP-712 primary type).
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

/// Error constructing the EIP-712 domain from payment requirements.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("missing EIP-712 domain name in extra field")]
    MissingName,
    #[error("missing EIP-712 domain version in extra field")]
    MissingVersion,
    #[error(transparent)]
    Chain(#[from] Eip155ChainReferenceError),
}

/// Builds the EIP-712 domain for a token deployment.
pub fn token_domain(
    name: &str,
    version: &str,
    chain: Eip155ChainReference,
    asset: Address,
) -> Eip712Domain {
    eip712_domain! {
        name: name.to_string(),
        version: version.to_string(),
        chain_id: chain.inner(),
        verifying_contract: asset,
    }
}

/// Derives the EIP-712 domain from [`PaymentRequirements`]: `extra.name` and
/// `extra.version` are mandatory for the `exact` scheme.
pub fn requirements_domain(
    requirements: &PaymentRequirements,
) -> Result<Eip712Domain, DomainError> {
    let name = requirements.eip712_name().ok_or(DomainError::MissingName)?;
    let version = requirements
        .eip712_version()
        .ok_or(DomainError::MissingVersion)?;
    let chain = Eip155ChainReference::try_from(&requirements.network)?;
    Ok(token_domain(name, version, chain, requirements.asset.0))
}

fn as_sol_struct(authorization: &ExactAuthorization) -> TransferWithAuthorization {
    TransferWithAuthorization {
        from: authorization.from.0,
        to: authorization.to.0,
        value: authorization.value.into(),
        validAfter: authorization.valid_after.into(),
        validBefore: authorization.valid_before.into(),
        nonce: FixedBytes(authorization.nonce.0),
    }
}

/// The EIP-712 digest an authorization signature commits to.
pub fn signing_hash(authorization: &ExactAuthorization, domain: &Eip712Domain) -> B256 {
    as_sol_struct(authorization).eip712_signing_hash(domain)
}

/// Signs an authorization with a local key. The returned signature carries
/// `v` offset to `{27, 28}`.
pub async fn sign_authorization(
    signer: &PrivateKeySigner,
    authorization: &ExactAuthorization,
    domain: &Eip712Domain,
) -> Result<EvmSignature, alloy::signers::Error> {
    let hash = signing_hash(authorization, domain);
    let signature = signer.sign_hash(&hash).await?;
    Ok(EvmSignature::from(signature.as_bytes()))
}

/// Error recovering the signer of an authorization.
#[derive(Debug, thiserror::Error)]
pub enum RecoverError {
    #[error("invalid signature: {0}")]
    Malformed(#[from] SignatureError),
    #[error("invalid signature recovery id: {0}")]
    RecoveryId(u8),
}

/// Recovers the address that signed an authorization. `v` is normalized to
/// `{0, 1}` before elliptic recovery; both raw and Ethereum-offset recovery
/// ids are accepted on the wire.
pub fn recover_signer(
    authorization: &ExactAuthorization,
    signature: &EvmSignature,
    domain: &Eip712Domain,
) -> Result<Address, RecoverError> {
    let split = split_signature(signature)?;
    let parity = split.v == 28;
    let signature = Signature::from_scalars_and_parity(split.r, split.s, parity);
    let hash = signing_hash(authorization, domain);
    Ok(signature.recover_address_from_prehash(&hash)?)
}

/// Signature components for the on-chain `transferWithAuthorization` call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SplitSignature {
    /// Recovery id, normalized to `{27, 28}`.
    pub v: u8,
    pub r: B256,
    pub s: B256,
}

/// Splits a 65-byte signature into `(v, r, s)`, normalizing the recovery id
/// from `{0, 1, 27, 28}` to `{27, 28}`.
pub fn split_signature(signature: &EvmSignature) -> Result<SplitSignature, RecoverError> {
    let bytes = &signature.0;
    let r = B256::from_slice(&bytes[..32]);
    let s = B256::from_slice(&bytes[32..64]);
    let v = match bytes[64] {
        0 | 27 => 27,
        1 | 28 => 28,
        other => return Err(RecoverError::RecoveryId(other)),
    };
    Ok(SplitSignature { v, r, s })
}
