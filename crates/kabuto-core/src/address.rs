//! Address generation for the supported chain families
//!
//! Two strategies are supported, selected by the wallet's derivation
//! purpose. Legacy (BIP-44) wallets encode a hash of the chain public key
//! in base58 with a checksum tail; CIP-1852 wallets combine a payment
//! credential with the account's stake credential into a bech32 base
//! address. Ergo-compatible wallets use P2PK addresses: base58 over
//! prefix byte, public key, and a blake2b checksum.

use crate::derivation::ChainIndex;
use crate::error::{DerivationError, Result};
use crate::keys::AccountDeriver;
use bech32::{Bech32, Hrp};
use kabuto_params::{ChainFamily, DerivationPurpose, NetworkType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};

/// Shelley base-address header: address type 0 (payment key + stake key)
/// in the high nibble, network id in the low nibble.
const BASE_ADDRESS_TYPE: u8 = 0b0000_0000;

/// Ergo P2PK address-type byte, added to the network prefix.
const ERGO_P2PK_TYPE: u8 = 0x01;

/// Length of the truncated checksum tail on base58 addresses
const CHECKSUM_LEN: usize = 4;

/// Address representation produced for a derivation slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressKind {
    /// Legacy single-key address (BIP-44 Cardano)
    Byron,
    /// Base address carrying payment and stake credentials (CIP-1852)
    Base,
    /// Pay-to-public-key address (Ergo-compatible chains)
    ErgoP2pk,
}

/// A generated address: display text plus the raw bytes persisted in rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Encoded address string shown to users and sent to remotes
    pub text: String,
    /// Raw byte representation stored alongside the row
    pub raw: Vec<u8>,
    /// Address strategy that produced this address
    pub kind: AddressKind,
}

fn blake2b224(data: &[u8]) -> [u8; 28] {
    let hash = blake2b_simd::Params::new()
        .hash_length(28)
        .to_state()
        .update(data)
        .finalize();
    let mut out = [0u8; 28];
    out.copy_from_slice(hash.as_bytes());
    out
}

fn blake2b256(data: &[u8]) -> [u8; 32] {
    let hash = blake2b_simd::Params::new()
        .hash_length(32)
        .to_state()
        .update(data)
        .finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(hash.as_bytes());
    out
}

fn base58_with_checksum(body: &[u8]) -> (String, Vec<u8>) {
    let checksum = blake2b256(body);
    let mut raw = body.to_vec();
    raw.extend_from_slice(&checksum[..CHECKSUM_LEN]);
    (bs58::encode(&raw).into_string(), raw)
}

/// Generate the address for one (chain, index) slot of an account.
///
/// The strategy is selected by the account's derivation purpose and chain
/// family; an account that cannot express the requested combination fails
/// with a `DerivationError` naming the violated precondition.
pub fn generate_address(
    deriver: &AccountDeriver,
    chain: ChainIndex,
    index: u32,
) -> Result<Address> {
    let key = deriver.derive_key(chain, index)?;
    let public = key.public_bytes();

    match (deriver.network().chain_family, deriver.purpose()) {
        (ChainFamily::Cardano, DerivationPurpose::Bip44) => Ok(byron_address(&public)),
        (ChainFamily::Cardano, DerivationPurpose::Cip1852) => {
            let staking = deriver.staking_key().ok_or_else(|| {
                DerivationError::MissingStakingKey(
                    "base address requires the account staking key".to_string(),
                )
            })?;
            Ok(base_address(
                &public,
                &staking.public_bytes(),
                deriver.network().network_type,
                deriver.network().bech32_hrp.ok_or_else(|| {
                    DerivationError::UnsupportedAddressKind(
                        "network defines no bech32 prefix".to_string(),
                    )
                })?,
            ))
        }
        (ChainFamily::Ergo, DerivationPurpose::Bip44) => Ok(ergo_p2pk_address(
            &public,
            deriver.network().protocol_magic as u8,
        )),
        (ChainFamily::Ergo, DerivationPurpose::Cip1852) => Err(
            DerivationError::UnsupportedAddressKind(
                "CIP-1852 addresses are not defined for Ergo-compatible chains".to_string(),
            )
            .into(),
        ),
    }
}

/// Legacy Byron-style address: base58 over the double-hashed public key
/// with a blake2b checksum tail.
fn byron_address(public: &[u8; 32]) -> Address {
    let sha = Sha512_256::digest(public);
    let root = blake2b224(&sha);
    let (text, raw) = base58_with_checksum(&root);
    Address {
        text,
        raw,
        kind: AddressKind::Byron,
    }
}

/// Shelley base address: header byte, payment credential, stake credential.
fn base_address(
    payment_public: &[u8; 32],
    stake_public: &[u8; 32],
    network_type: NetworkType,
    hrp: &str,
) -> Address {
    let network_id: u8 = match network_type {
        NetworkType::Mainnet => 1,
        NetworkType::Testnet => 0,
    };
    let mut raw = Vec::with_capacity(57);
    raw.push(BASE_ADDRESS_TYPE | network_id);
    raw.extend_from_slice(&blake2b224(payment_public));
    raw.extend_from_slice(&blake2b224(stake_public));

    let hrp = Hrp::parse(hrp).expect("network bech32 prefixes are static and valid");
    let text = bech32::encode::<Bech32>(hrp, &raw)
        .expect("bech32 encoding of a 57-byte payload cannot fail");
    Address {
        text,
        raw,
        kind: AddressKind::Base,
    }
}

/// Ergo P2PK address: prefix byte, public key, blake2b checksum, base58.
fn ergo_p2pk_address(public: &[u8; 32], network_prefix: u8) -> Address {
    let mut body = Vec::with_capacity(33);
    body.push(network_prefix + ERGO_P2PK_TYPE);
    body.extend_from_slice(public);
    let (text, raw) = base58_with_checksum(&body);
    Address {
        text,
        raw,
        kind: AddressKind::ErgoP2pk,
    }
}

impl Address {
    /// Cheap structural validation of the encoded form
    pub fn validate(&self) -> Result<()> {
        let ok = match self.kind {
            AddressKind::Byron => {
                self.raw.len() == 28 + CHECKSUM_LEN && bs58::decode(&self.text).into_vec().is_ok()
            }
            AddressKind::Base => self.raw.len() == 57 && self.text.starts_with("addr"),
            AddressKind::ErgoP2pk => self.raw.len() == 33 + CHECKSUM_LEN,
        };
        if ok {
            Ok(())
        } else {
            Err(crate::Error::InvalidAddress(self.text.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::RootKey;
    use kabuto_params::Network;

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn deriver(network: Network, purpose: DerivationPurpose) -> AccountDeriver {
        RootKey::from_mnemonic(PHRASE, "")
            .unwrap()
            .derive_account(&network, purpose, 0)
            .unwrap()
    }

    #[test]
    fn test_base_address_shape() {
        let d = deriver(Network::cardano_mainnet(), DerivationPurpose::Cip1852);
        let addr = generate_address(&d, ChainIndex::External, 0).unwrap();
        assert_eq!(addr.kind, AddressKind::Base);
        assert_eq!(addr.raw.len(), 57);
        assert_eq!(addr.raw[0], 0x01);
        assert!(addr.text.starts_with("addr1"));
        addr.validate().unwrap();
    }

    #[test]
    fn test_testnet_base_address_prefix() {
        let d = deriver(Network::cardano_testnet(), DerivationPurpose::Cip1852);
        let addr = generate_address(&d, ChainIndex::External, 0).unwrap();
        assert_eq!(addr.raw[0], 0x00);
        assert!(addr.text.starts_with("addr_test1"));
    }

    #[test]
    fn test_byron_address_shape() {
        let d = deriver(Network::cardano_mainnet(), DerivationPurpose::Bip44);
        let addr = generate_address(&d, ChainIndex::External, 0).unwrap();
        assert_eq!(addr.kind, AddressKind::Byron);
        assert_eq!(addr.raw.len(), 32);
        addr.validate().unwrap();
    }

    #[test]
    fn test_ergo_p2pk_address_shape() {
        let d = deriver(Network::ergo_mainnet(), DerivationPurpose::Bip44);
        let addr = generate_address(&d, ChainIndex::External, 0).unwrap();
        assert_eq!(addr.kind, AddressKind::ErgoP2pk);
        assert_eq!(addr.raw.len(), 37);
        assert_eq!(addr.raw[0], 0x01);
        addr.validate().unwrap();
    }

    #[test]
    fn test_addresses_differ_per_slot() {
        let d = deriver(Network::cardano_mainnet(), DerivationPurpose::Cip1852);
        let a0 = generate_address(&d, ChainIndex::External, 0).unwrap();
        let a1 = generate_address(&d, ChainIndex::External, 1).unwrap();
        let c0 = generate_address(&d, ChainIndex::Internal, 0).unwrap();
        assert_ne!(a0.text, a1.text);
        assert_ne!(a0.text, c0.text);
    }

    #[test]
    fn test_same_slot_same_address() {
        let d = deriver(Network::cardano_mainnet(), DerivationPurpose::Cip1852);
        let a = generate_address(&d, ChainIndex::External, 4).unwrap();
        let b = generate_address(&d, ChainIndex::External, 4).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_base_addresses_share_stake_credential() {
        let d = deriver(Network::cardano_mainnet(), DerivationPurpose::Cip1852);
        let a0 = generate_address(&d, ChainIndex::External, 0).unwrap();
        let a1 = generate_address(&d, ChainIndex::External, 1).unwrap();
        // payment credential differs, stake credential (last 28 bytes) is shared
        assert_ne!(a0.raw[1..29], a1.raw[1..29]);
        assert_eq!(a0.raw[29..], a1.raw[29..]);
    }
}
