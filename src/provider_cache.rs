//! Per-network Ethereum provider cache.
//!
//! Holds one provider per configured CAIP-2 network, shared by balance reads,
//! call simulations, and settlement broadcasts. Providers are built lazily on
//! first use; concurrent callers share a single instance per network and the
//! build is serialized under the write half of a reader/writer lock.
//!
//! Providers are owned by the cache. Callers receive cheap clones and never
//! close them; [`ProviderCache::close_all`] empties the map, and a subsequent
//! lookup re-dials.

use alloy::network::EthereumWallet;
use alloy::providers::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy::providers::{Identity, ProviderBuilder, RootProvider};
use std::collections::HashMap;
use tokio::sync::RwLock;
use url::Url;

use crate::chain::ChainId;

/// The fully composed Ethereum provider used throughout the facilitator.
///
/// Fillers supply gas, blob gas, nonce, and chain id defaults when the caller
/// leaves them unset; the wallet filler signs outgoing transactions with the
/// facilitator key (EIP-155, bound to the target chain id).
pub type InnerProvider = FillProvider<
    JoinFill<
        JoinFill<
            Identity,
            JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
        >,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider,
>;

#[derive(Debug, thiserror::Error)]
pub enum ProviderCacheError {
    #[error("network not configured: {0}")]
    UnknownNetwork(ChainId),
}

/// A cache of per-network providers with signing capability.
pub struct ProviderCache {
    wallet: EthereumWallet,
    rpc_urls: HashMap<ChainId, Url>,
    providers: RwLock<HashMap<ChainId, InnerProvider>>,
}

impl ProviderCache {
    /// Creates an empty cache over the configured RPC endpoints. No
    /// connection is made until a network is first used.
    pub fn new(wallet: EthereumWallet, rpc_urls: HashMap<ChainId, Url>) -> Self {
        Self {
            wallet,
            rpc_urls,
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// Networks this cache can serve.
    pub fn networks(&self) -> impl Iterator<Item = &ChainId> {
        self.rpc_urls.keys()
    }

    /// Returns the provider for `network`, building it on first use.
    ///
    /// Fast path is a read lock over the map. On miss, the map is re-checked
    /// under the write lock before inserting so racing callers end up sharing
    /// one provider.
    pub async fn by_network(&self, network: &ChainId) -> Result<InnerProvider, ProviderCacheError> {
        {
            let providers = self.providers.read().await;
            if let Some(provider) = providers.get(network) {
                return Ok(provider.clone());
            }
        }

        let mut providers = self.providers.write().await;
        if let Some(provider) = providers.get(network) {
            return Ok(provider.clone());
        }

        let rpc_url = self
            .rpc_urls
            .get(network)
            .ok_or_else(|| ProviderCacheError::UnknownNetwork(network.clone()))?;
        let provider = self.dial(rpc_url);
        providers.insert(network.clone(), provider.clone());
        tracing::info!(network = %network, rpc_url = %rpc_url, "connected RPC provider");
        Ok(provider)
    }

    /// Pre-dials every configured network.
    pub async fn init_all(&self) -> Result<(), ProviderCacheError> {
        for network in self.rpc_urls.keys() {
            self.by_network(network).await?;
        }
        Ok(())
    }

    /// Drops all providers and empties the map. Later lookups re-dial.
    pub async fn close_all(&self) {
        let mut providers = self.providers.write().await;
        providers.clear();
    }

    fn dial(&self, rpc_url: &Url) -> InnerProvider {
        ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .connect_http(rpc_url.clone())
    }
}
