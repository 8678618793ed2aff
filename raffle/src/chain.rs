//! Networks the front-end is configured for.

use alloy::primitives::TxHash;

/// A known EVM network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chain {
    /// EIP-155 chain id.
    pub id: u64,
    /// Display name.
    pub name: &'static str,
    /// Block explorer base URL, without a trailing slash.
    pub explorer: &'static str,
}

impl Chain {
    /// Explorer page of transaction `hash`.
    #[must_use]
    pub fn tx_url(&self, hash: &TxHash) -> String {
        format!("{}/tx/{hash:#x}", self.explorer)
    }
}

/// Ethereum mainnet.
pub const ETHEREUM: Chain = Chain {
    id: 1,
    name: "Ethereum",
    explorer: "https://etherscan.io",
};

/// Polygon PoS.
pub const POLYGON: Chain = Chain {
    id: 137,
    name: "Polygon",
    explorer: "https://polygonscan.com",
};

/// Sepolia testnet, where the raffle is deployed.
pub const SEPOLIA: Chain = Chain {
    id: 11_155_111,
    name: "Sepolia",
    explorer: "https://sepolia.etherscan.io",
};

/// All configured chains.
pub const KNOWN_CHAINS: [Chain; 3] = [ETHEREUM, POLYGON, SEPOLIA];

/// Look a chain up by id.
#[must_use]
pub fn find_chain(id: u64) -> Option<&'static Chain> {
    KNOWN_CHAINS.iter().find(|c| c.id == id)
}

/// Display name for `id`, falling back to `Chain <id>`.
#[must_use]
pub fn network_name(id: u64) -> String {
    find_chain(id).map_or_else(|| format!("Chain {id}"), |c| c.name.to_string())
}
