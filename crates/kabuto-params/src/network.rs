//! Chain family and network definitions

use serde::{Deserialize, Serialize};

/// BIP-44 coin type registered for Cardano
pub const CARDANO_COIN_TYPE: u32 = 1815;

/// BIP-44 coin type registered for Ergo
pub const ERGO_COIN_TYPE: u32 = 429;

/// Default gap limit for address scanning
pub const DEFAULT_GAP_LIMIT: u32 = 20;

/// Chain index reserved for chimeric (staking) keys under CIP-1852
pub const CHIMERIC_CHAIN_INDEX: u32 = 2;

/// Address index of the staking key on the chimeric chain
pub const STAKING_KEY_INDEX: u32 = 0;

/// Page size for windowed transaction-history fetches
pub const HISTORY_PAGE_SIZE: usize = 50;

/// Supported chain families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainFamily {
    /// Cardano and Cardano-derived networks
    Cardano,
    /// Ergo-compatible networks
    Ergo,
}

/// Network type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkType {
    /// Mainnet
    Mainnet,
    /// Testnet
    Testnet,
}

/// Hierarchical derivation purpose selecting the address strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DerivationPurpose {
    /// Legacy BIP-44 derivation (`m/44'/...`)
    Bip44,
    /// CIP-1852 derivation with payment + staking keys (`m/1852'/...`)
    Cip1852,
}

impl DerivationPurpose {
    /// Hardened purpose index used as the first path segment
    pub const fn index(&self) -> u32 {
        match self {
            DerivationPurpose::Bip44 => 44,
            DerivationPurpose::Cip1852 => 1852,
        }
    }
}

/// Metadata for a chain's native fungible unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Display ticker
    pub ticker: &'static str,
    /// Decimal places of the smallest unit
    pub decimals: u32,
}

/// Network configuration
#[derive(Debug, Clone)]
pub struct Network {
    /// Network type
    pub network_type: NetworkType,
    /// Chain family
    pub chain_family: ChainFamily,
    /// Human-readable name
    pub name: &'static str,
    /// Coin type (BIP-44)
    pub coin_type: u32,
    /// Protocol magic (Cardano) or address prefix byte (Ergo)
    pub protocol_magic: u32,
    /// Bech32 prefix for base addresses, if the family uses bech32
    pub bech32_hrp: Option<&'static str>,
    /// Depth at which a block is considered final
    pub finality_depth: u32,
    /// Address gap limit for usage scanning
    pub gap_limit: u32,
    /// Native token metadata
    pub default_token: TokenInfo,
}

impl Network {
    /// Get Cardano mainnet parameters
    pub const fn cardano_mainnet() -> Self {
        Self {
            network_type: NetworkType::Mainnet,
            chain_family: ChainFamily::Cardano,
            name: "cardano-mainnet",
            coin_type: CARDANO_COIN_TYPE,
            protocol_magic: 764_824_073,
            bech32_hrp: Some("addr"),
            finality_depth: 2_160,
            gap_limit: DEFAULT_GAP_LIMIT,
            default_token: TokenInfo {
                ticker: "ADA",
                decimals: 6,
            },
        }
    }

    /// Get Cardano testnet parameters
    pub const fn cardano_testnet() -> Self {
        Self {
            network_type: NetworkType::Testnet,
            chain_family: ChainFamily::Cardano,
            name: "cardano-testnet",
            coin_type: CARDANO_COIN_TYPE,
            protocol_magic: 1_097_911_063,
            bech32_hrp: Some("addr_test"),
            finality_depth: 2_160,
            gap_limit: DEFAULT_GAP_LIMIT,
            default_token: TokenInfo {
                ticker: "TADA",
                decimals: 6,
            },
        }
    }

    /// Get Ergo mainnet parameters
    pub const fn ergo_mainnet() -> Self {
        Self {
            network_type: NetworkType::Mainnet,
            chain_family: ChainFamily::Ergo,
            name: "ergo-mainnet",
            coin_type: ERGO_COIN_TYPE,
            // Ergo encodes the network in the address prefix byte: 0x00 for mainnet P2PK.
            protocol_magic: 0x00,
            bech32_hrp: None,
            finality_depth: 720,
            gap_limit: DEFAULT_GAP_LIMIT,
            default_token: TokenInfo {
                ticker: "ERG",
                decimals: 9,
            },
        }
    }

    /// Get Ergo testnet parameters
    pub const fn ergo_testnet() -> Self {
        Self {
            network_type: NetworkType::Testnet,
            chain_family: ChainFamily::Ergo,
            name: "ergo-testnet",
            coin_type: ERGO_COIN_TYPE,
            // 0x10 prefix nibble marks testnet P2PK addresses.
            protocol_magic: 0x10,
            bech32_hrp: None,
            finality_depth: 720,
            gap_limit: DEFAULT_GAP_LIMIT,
            default_token: TokenInfo {
                ticker: "TERG",
                decimals: 9,
            },
        }
    }

    /// Get network by chain family and network type
    pub const fn from_parts(family: ChainFamily, network_type: NetworkType) -> Self {
        match (family, network_type) {
            (ChainFamily::Cardano, NetworkType::Mainnet) => Self::cardano_mainnet(),
            (ChainFamily::Cardano, NetworkType::Testnet) => Self::cardano_testnet(),
            (ChainFamily::Ergo, NetworkType::Mainnet) => Self::ergo_mainnet(),
            (ChainFamily::Ergo, NetworkType::Testnet) => Self::ergo_testnet(),
        }
    }

    /// Check whether the given derivation purpose is valid on this network
    pub const fn supports_purpose(&self, purpose: DerivationPurpose) -> bool {
        match (self.chain_family, purpose) {
            // Ergo follows EIP-3, which is BIP-44 shaped; chimeric keys are Cardano-only.
            (ChainFamily::Ergo, DerivationPurpose::Cip1852) => false,
            _ => true,
        }
    }

    /// Check if a block at `height` is final relative to the current tip
    pub const fn is_final(&self, height: u64, tip_height: u64) -> bool {
        tip_height >= height && tip_height - height >= self.finality_depth as u64
    }
}
