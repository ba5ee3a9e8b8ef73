//! On-chain verification and settlement engine.
//!
//! [`FacilitatorLocal`] backs the facilitator's `/verify` and `/settle`
//! endpoints. Verification is a fixed six-stage pipeline over an `exact`
//! authorization; the first failing stage short-circuits and its message
//! becomes the wire-visible `invalidReason`:
//!
//! 1. EIP-712 signature recovery against `authorization.from`
//! 2. `balanceOf(from)` on the token contract at the latest block
//! 3. `authorization.value >= requirements.amount`
//! 4. `validAfter <= now <= validBefore`
//! 5. `authorization.to == requirements.payTo`
//! 6. dry-run `transferWithAuthorization` via `eth_call`
//!
//! Settlement re-runs the fund-loss-critical checks (signature recovery and
//! the dry-run), then broadcasts a legacy transaction under a gas-price
//! ceiling. The transaction hash is returned as soon as the node accepts the
//! broadcast; inclusion monitoring is out of scope.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, FixedBytes, U256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use alloy::sol_types::SolCall;
use std::convert::Infallible;
use std::time::Duration;
use tracing::instrument;

use crate::chain::{ChainId, Eip155ChainReference};
use crate::eip3009::{
    DomainError, RecoverError, recover_signer, requirements_domain, split_signature,
};
use crate::facilitator::Facilitator;
use crate::provider_cache::{InnerProvider, ProviderCache, ProviderCacheError};
use crate::timestamp::UnixTimestamp;
use crate::types::{
    EvmAddress, ExactAuthorization, ExactPayload, Scheme, SchemePayload, SettleRequest,
    SettleResponse, SupportedKind, SupportedResponse, TokenAmount, TransactionHash, VerifyRequest,
    VerifyResponse,
};

sol! {
    #[sol(rpc)]
    interface IEip3009 {
        function balanceOf(address account) external view returns (uint256);
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
    }
}

/// A verification stage rejection. The `Display` form is the reason string
/// the payer sees.
#[derive(Debug, thiserror::Error)]
enum PaymentCheckError {
    #[error("failed to connect to network: {0}")]
    Network(#[from] ProviderCacheError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Signature(#[from] RecoverError),
    #[error("signature mismatch: recovered {recovered}, expected {expected}")]
    SignatureMismatch { recovered: Address, expected: Address },
    #[error("failed to call balanceOf: {0}")]
    BalanceCall(String),
    #[error("insufficient balance: has {has}, needs {needs}")]
    InsufficientBalance { has: U256, needs: U256 },
    #[error("insufficient amount: got {got}, required {required}")]
    InsufficientAmount {
        got: TokenAmount,
        required: TokenAmount,
    },
    #[error("payment not yet valid (valid after {0})")]
    NotYetValid(UnixTimestamp),
    #[error("payment expired (valid before {0})")]
    Expired(UnixTimestamp),
    #[error("recipient mismatch: got {got}, expected {expected}")]
    RecipientMismatch { got: EvmAddress, expected: EvmAddress },
    #[error("transaction would fail: {0}")]
    Simulation(String),
    #[error("failed to read system clock")]
    Clock,
}

/// A settlement failure. The `Display` form is the wire-visible `errorReason`.
#[derive(Debug, thiserror::Error)]
enum SettlementError {
    #[error(transparent)]
    Check(#[from] PaymentCheckError),
    #[error("failed to get nonce: {0}")]
    Nonce(String),
    #[error("failed to get gas price: {0}")]
    GasPrice(String),
    #[error("gas price too high: {got} > max {max}")]
    GasPriceTooHigh { got: u128, max: u128 },
    #[error("failed to estimate gas: {0}")]
    GasEstimate(String),
    #[error("failed to send transaction: {0}")]
    Send(String),
}

/// Facilitator engine over a per-network provider cache and a single
/// settlement signing key.
pub struct FacilitatorLocal {
    providers: ProviderCache,
    supported: Vec<SupportedKind>,
    signer_address: EvmAddress,
    max_gas_price: u128,
    settle_timeout: Duration,
}

impl FacilitatorLocal {
    pub fn new(
        providers: ProviderCache,
        supported: Vec<SupportedKind>,
        signer_address: EvmAddress,
        max_gas_price: u128,
        settle_timeout: Duration,
    ) -> Self {
        Self {
            providers,
            supported,
            signer_address,
            max_gas_price,
            settle_timeout,
        }
    }

    /// Whether a scheme/network pair is in the configured supported set.
    pub fn is_supported(&self, scheme: Scheme, network: &ChainId) -> bool {
        self.supported
            .iter()
            .any(|kind| kind.scheme == scheme && &kind.network == network)
    }

    /// The provider cache backing this engine.
    pub fn providers(&self) -> &ProviderCache {
        &self.providers
    }

    /// Runs the verification pipeline. Never fails: rejections are carried
    /// in the response.
    #[instrument(skip_all, fields(network = %request.payment_requirements.network))]
    pub async fn verify_payment(&self, request: &VerifyRequest) -> VerifyResponse {
        match self.check_payment(request).await {
            Ok(payer) => VerifyResponse::valid(payer.into()),
            Err(err) => {
                tracing::debug!(reason = %err, "payment verification rejected");
                VerifyResponse::invalid(err.to_string())
            }
        }
    }

    /// Settles a payment on-chain, bounded by the configured transaction
    /// deadline. Never fails: unsuccessful outcomes are carried in the
    /// response.
    #[instrument(skip_all, fields(network = %request.payment_requirements.network))]
    pub async fn settle_payment(&self, request: &SettleRequest) -> SettleResponse {
        let SchemePayload::Exact(exact) = &request.payment_payload.payload;
        let payer = exact.authorization.from;
        let network = request.payment_requirements.network.clone();

        let outcome = tokio::time::timeout(self.settle_timeout, self.send_settlement(request));
        match outcome.await {
            Err(_) => SettleResponse::failure(format!(
                "settlement timed out after {}s",
                self.settle_timeout.as_secs()
            )),
            Ok(Err(err)) => {
                tracing::warn!(reason = %err, "settlement failed");
                SettleResponse::failure(err.to_string())
            }
            Ok(Ok(transaction)) => {
                tracing::info!(tx = %transaction, payer = %payer, "settlement broadcast");
                SettleResponse {
                    success: true,
                    error_reason: None,
                    payer: Some(payer),
                    transaction: Some(transaction),
                    network: Some(network),
                }
            }
        }
    }

    /// The facilitator's capability document.
    pub fn supported_kinds(&self) -> SupportedResponse {
        let mut signers = std::collections::BTreeMap::new();
        signers.insert("eip155:*".to_string(), vec![self.signer_address]);
        SupportedResponse {
            kinds: self.supported.clone(),
            extensions: vec![],
            signers,
        }
    }

    async fn check_payment(&self, request: &VerifyRequest) -> Result<Address, PaymentCheckError> {
        let requirements = &request.payment_requirements;
        let SchemePayload::Exact(exact) = &request.payment_payload.payload;
        let authorization = &exact.authorization;

        // Stage 1: signature recovery (pure, runs before any RPC)
        let domain = requirements_domain(requirements)?;
        let recovered = recover_signer(authorization, &exact.signature, &domain)?;
        if recovered != authorization.from.0 {
            return Err(PaymentCheckError::SignatureMismatch {
                recovered,
                expected: authorization.from.0,
            });
        }

        let provider = self.providers.by_network(&requirements.network).await?;
        let contract = IEip3009::new(requirements.asset.0, &provider);

        // Stage 2: balance at the latest block
        let balance = contract
            .balanceOf(authorization.from.0)
            .call()
            .await
            .map_err(|e| PaymentCheckError::BalanceCall(e.to_string()))?;
        let value: U256 = authorization.value.into();
        if balance < value {
            return Err(PaymentCheckError::InsufficientBalance {
                has: balance,
                needs: value,
            });
        }

        // Stage 3: amount
        assert_amount(authorization.value, requirements.amount)?;

        // Stage 4: time window
        let now = UnixTimestamp::try_now().map_err(|_| PaymentCheckError::Clock)?;
        assert_time_window(now, authorization)?;

        // Stage 5: parameter match
        assert_recipient(authorization.to, requirements.pay_to)?;

        // Stage 6: dry-run
        simulate_transfer(&contract, exact).await?;

        Ok(authorization.from.0)
    }

    async fn send_settlement(
        &self,
        request: &SettleRequest,
    ) -> Result<TransactionHash, SettlementError> {
        let requirements = &request.payment_requirements;
        let SchemePayload::Exact(exact) = &request.payment_payload.payload;
        let authorization = &exact.authorization;

        // Critical re-checks: signature recovery and the dry-run. The full
        // pipeline already ran on /verify.
        let domain = requirements_domain(requirements).map_err(PaymentCheckError::from)?;
        let recovered = recover_signer(authorization, &exact.signature, &domain)
            .map_err(PaymentCheckError::from)?;
        if recovered != authorization.from.0 {
            return Err(PaymentCheckError::SignatureMismatch {
                recovered,
                expected: authorization.from.0,
            }
            .into());
        }

        let provider = self
            .providers
            .by_network(&requirements.network)
            .await
            .map_err(PaymentCheckError::from)?;
        let contract = IEip3009::new(requirements.asset.0, &provider);
        simulate_transfer(&contract, exact).await?;

        let chain = Eip155ChainReference::try_from(&requirements.network)
            .map_err(|e| PaymentCheckError::from(DomainError::from(e)))?;
        let calldata = transfer_calldata(exact).map_err(PaymentCheckError::from)?;

        let nonce = provider
            .get_transaction_count(self.signer_address.0)
            .pending()
            .await
            .map_err(|e| SettlementError::Nonce(e.to_string()))?;

        let gas_price = provider
            .get_gas_price()
            .await
            .map_err(|e| SettlementError::GasPrice(e.to_string()))?;
        if gas_price > self.max_gas_price {
            return Err(SettlementError::GasPriceTooHigh {
                got: gas_price,
                max: self.max_gas_price,
            });
        }

        let mut txr = TransactionRequest::default()
            .with_from(self.signer_address.0)
            .with_to(requirements.asset.0)
            .with_value(U256::ZERO)
            .with_input(calldata)
            .with_nonce(nonce)
            .with_gas_price(gas_price)
            .with_chain_id(chain.inner());
        let gas_limit = provider
            .estimate_gas(txr.clone())
            .await
            .map_err(|e| SettlementError::GasEstimate(e.to_string()))?;
        txr.set_gas_limit(gas_limit);

        let pending = provider
            .send_transaction(txr)
            .await
            .map_err(|e| SettlementError::Send(e.to_string()))?;
        Ok((*pending.tx_hash()).into())
    }
}

/// Stage 3: the authorized value must cover the required amount.
fn assert_amount(got: TokenAmount, required: TokenAmount) -> Result<(), PaymentCheckError> {
    if got < required {
        return Err(PaymentCheckError::InsufficientAmount { got, required });
    }
    Ok(())
}

/// Stage 4: `now` must lie in the closed interval
/// `[valid_after, valid_before]`.
fn assert_time_window(
    now: UnixTimestamp,
    authorization: &ExactAuthorization,
) -> Result<(), PaymentCheckError> {
    if now < authorization.valid_after {
        return Err(PaymentCheckError::NotYetValid(authorization.valid_after));
    }
    if now > authorization.valid_before {
        return Err(PaymentCheckError::Expired(authorization.valid_before));
    }
    Ok(())
}

/// Stage 5: the authorization recipient must be the configured payee.
/// Asset and caller binding are deliberately left to the token contract.
fn assert_recipient(got: EvmAddress, expected: EvmAddress) -> Result<(), PaymentCheckError> {
    if got != expected {
        return Err(PaymentCheckError::RecipientMismatch { got, expected });
    }
    Ok(())
}

fn transfer_call(exact: &ExactPayload) -> Result<IEip3009::transferWithAuthorizationCall, RecoverError> {
    let authorization = &exact.authorization;
    let split = split_signature(&exact.signature)?;
    Ok(IEip3009::transferWithAuthorizationCall {
        from: authorization.from.0,
        to: authorization.to.0,
        value: authorization.value.into(),
        validAfter: authorization.valid_after.into(),
        validBefore: authorization.valid_before.into(),
        nonce: FixedBytes(authorization.nonce.0),
        v: split.v,
        r: split.r,
        s: split.s,
    })
}

fn transfer_calldata(exact: &ExactPayload) -> Result<Vec<u8>, RecoverError> {
    Ok(transfer_call(exact)?.abi_encode())
}

/// Stage 6: off-chain `eth_call` of the exact transfer at the latest block,
/// surfacing the EVM revert reason before any gas is spent.
async fn simulate_transfer(
    contract: &IEip3009::IEip3009Instance<&InnerProvider>,
    exact: &ExactPayload,
) -> Result<(), PaymentCheckError> {
    let call = transfer_call(exact)?;
    contract
        .transferWithAuthorization(
            call.from,
            call.to,
            call.value,
            call.validAfter,
            call.validBefore,
            call.nonce,
            call.v,
            call.r,
            call.s,
        )
        .call()
        .await
        .map_err(|e| PaymentCheckError::Simulation(e.to_string()))?;
    Ok(())
}

impl Facilitator for FacilitatorLocal {
    type Error = Infallible;

    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        Ok(self.verify_payment(request).await)
    }

    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        Ok(self.settle_payment(request).await)
    }

    async fn supported(&self) -> Result<SupportedResponse, Self::Error> {
        Ok(self.supported_kinds())
    }
}
