//! Key derivation and management
//!
//! Implements HD wallet key derivation over Ed25519 for the supported
//! chain families. A root key is obtained from a BIP-39 mnemonic; child
//! keys are derived with HMAC-SHA-512 over the parent chain code, with
//! distinct domain bytes for hardened and non-hardened steps. Derivation
//! is a pure function: the same root key and path always produce
//! byte-identical child keys.

use crate::derivation::{ChainIndex, ChildIndex, DerivationPath};
use crate::error::{DerivationError, Result};
use bip39::{Language, Mnemonic};
use ed25519_dalek::SigningKey;
use hmac::{Hmac, Mac};
use kabuto_params::{DerivationPurpose, Network, STAKING_KEY_INDEX};
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha512 = Hmac<Sha512>;

/// HMAC key for master-key generation from a seed
const MASTER_KEY_DOMAIN: &[u8] = b"ed25519 seed";

/// Domain byte for hardened child derivation
const HARDENED_CHILD_DOMAIN: u8 = 0x00;

/// Domain byte for non-hardened child derivation
const SOFT_CHILD_DOMAIN: u8 = 0x02;

/// An extended secret key: 32-byte Ed25519 secret plus 32-byte chain code
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ExtendedSecretKey {
    secret: [u8; 32],
    chain_code: [u8; 32],
}

impl ExtendedSecretKey {
    /// Secret key bytes
    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }

    /// Chain code bytes
    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    /// Ed25519 public key for this secret
    pub fn public_bytes(&self) -> [u8; 32] {
        let signing = SigningKey::from_bytes(&self.secret);
        signing.verifying_key().to_bytes()
    }

    /// Derive one child key.
    ///
    /// Hardened steps commit to the parent secret; non-hardened steps
    /// commit to the parent public key. Both feed the parent chain code
    /// as the HMAC key, so sibling derivations never collide.
    pub fn derive_child(&self, step: ChildIndex) -> Self {
        let mut mac = HmacSha512::new_from_slice(&self.chain_code)
            .expect("HMAC accepts any key length");
        if step.is_hardened() {
            mac.update(&[HARDENED_CHILD_DOMAIN]);
            mac.update(&self.secret);
        } else {
            mac.update(&[SOFT_CHILD_DOMAIN]);
            mac.update(&self.public_bytes());
        }
        mac.update(&step.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let mut secret = [0u8; 32];
        let mut chain_code = [0u8; 32];
        secret.copy_from_slice(&digest[..32]);
        chain_code.copy_from_slice(&digest[32..]);
        Self { secret, chain_code }
    }

    /// Derive along a full path
    pub fn derive_path(&self, path: &DerivationPath) -> Self {
        let mut key = self.clone();
        for step in path.steps() {
            key = key.derive_child(*step);
        }
        key
    }
}

/// Root key for a recovered seed
#[derive(Clone)]
pub struct RootKey {
    master: ExtendedSecretKey,
}

impl RootKey {
    /// Recover the root key from a BIP-39 mnemonic and optional passphrase
    pub fn from_mnemonic(phrase: &str, passphrase: &str) -> Result<Self> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
            .map_err(|e| DerivationError::InvalidMnemonic(e.to_string()))?;
        let seed = mnemonic.to_seed(passphrase);
        Ok(Self::from_seed(&seed))
    }

    /// Build the master extended key from raw seed bytes
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut mac = HmacSha512::new_from_slice(MASTER_KEY_DOMAIN)
            .expect("HMAC accepts any key length");
        mac.update(seed);
        let digest = mac.finalize().into_bytes();

        let mut secret = [0u8; 32];
        let mut chain_code = [0u8; 32];
        secret.copy_from_slice(&digest[..32]);
        chain_code.copy_from_slice(&digest[32..]);
        Self {
            master: ExtendedSecretKey { secret, chain_code },
        }
    }

    /// Generate a new random mnemonic
    ///
    /// # Arguments
    /// * `word_count` - Number of words (12, 15, 18, 21, or 24). Defaults to 15.
    pub fn generate_mnemonic(word_count: Option<u32>) -> String {
        let word_count = word_count.unwrap_or(15);
        let entropy_size = match word_count {
            12 => 16,
            15 => 20,
            18 => 24,
            21 => 28,
            24 => 32,
            _ => 20,
        };

        let mut entropy = vec![0u8; entropy_size];
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut entropy);

        let mnemonic = Mnemonic::from_entropy(&entropy)
            .expect("entropy sizes above are all valid");
        mnemonic.to_string()
    }

    /// Access the master extended key
    pub fn master(&self) -> &ExtendedSecretKey {
        &self.master
    }

    /// Derive the account-level key material for one wallet account
    pub fn derive_account(
        &self,
        network: &Network,
        purpose: DerivationPurpose,
        account_index: u32,
    ) -> Result<AccountDeriver> {
        if !network.supports_purpose(purpose) {
            return Err(DerivationError::UnsupportedAddressKind(format!(
                "{purpose:?} derivation on {}",
                network.name
            ))
            .into());
        }

        let prefix = DerivationPath::account_prefix(
            purpose.index(),
            network.coin_type,
            account_index,
        )?;
        let account_key = self.master.derive_path(&prefix);

        // CIP-1852 wallets carry a staking key on the chimeric chain;
        // BIP-44 wallets have no stake credential.
        let staking_key = match purpose {
            DerivationPurpose::Cip1852 => {
                let chimeric = ChildIndex::normal(kabuto_params::CHIMERIC_CHAIN_INDEX)?;
                let stake_index = ChildIndex::normal(STAKING_KEY_INDEX)?;
                Some(account_key.derive_child(chimeric).derive_child(stake_index))
            }
            DerivationPurpose::Bip44 => None,
        };

        Ok(AccountDeriver {
            network: network.clone(),
            purpose,
            account_index,
            account_key,
            staking_key,
            account_path: prefix,
        })
    }
}

/// Account-level deriver: produces per-chain, per-index keys and paths.
///
/// This is the only key material the synchronization layer ever sees; the
/// root key never leaves the caller.
#[derive(Clone)]
pub struct AccountDeriver {
    network: Network,
    purpose: DerivationPurpose,
    account_index: u32,
    account_key: ExtendedSecretKey,
    staking_key: Option<ExtendedSecretKey>,
    account_path: DerivationPath,
}

impl AccountDeriver {
    /// Network this account derives for
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Derivation purpose (address strategy selector)
    pub fn purpose(&self) -> DerivationPurpose {
        self.purpose
    }

    /// Account index within the wallet
    pub fn account_index(&self) -> u32 {
        self.account_index
    }

    /// Account public key bytes (plate and duplicate-detection material)
    pub fn account_public(&self) -> [u8; 32] {
        self.account_key.public_bytes()
    }

    /// Account chain code bytes
    pub fn account_chain_code(&self) -> &[u8; 32] {
        self.account_key.chain_code()
    }

    /// Staking key, present only for CIP-1852 accounts
    pub fn staking_key(&self) -> Option<&ExtendedSecretKey> {
        self.staking_key.as_ref()
    }

    /// Derive the key for one (chain, index) slot
    pub fn derive_key(&self, chain: ChainIndex, index: u32) -> Result<ExtendedSecretKey> {
        let chain_step = ChildIndex::normal(chain.number())?;
        let index_step = ChildIndex::normal(index)?;
        Ok(self
            .account_key
            .derive_child(chain_step)
            .derive_child(index_step))
    }

    /// Full derivation path for one (chain, index) slot
    pub fn path_for(&self, chain: ChainIndex, index: u32) -> Result<DerivationPath> {
        Ok(self
            .account_path
            .child(ChildIndex::normal(chain.number())?)
            .child(ChildIndex::normal(index)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kabuto_params::{ChainFamily, NetworkType};
    use proptest::prelude::*;

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_root_key_rejects_bad_mnemonic() {
        let result = RootKey::from_mnemonic("not a valid phrase at all", "");
        assert!(matches!(
            result,
            Err(crate::Error::Derivation(DerivationError::InvalidMnemonic(_)))
        ));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let root_a = RootKey::from_mnemonic(PHRASE, "").unwrap();
        let root_b = RootKey::from_mnemonic(PHRASE, "").unwrap();

        let net = Network::cardano_mainnet();
        let deriver_a = root_a
            .derive_account(&net, DerivationPurpose::Cip1852, 0)
            .unwrap();
        let deriver_b = root_b
            .derive_account(&net, DerivationPurpose::Cip1852, 0)
            .unwrap();

        let key_a = deriver_a.derive_key(ChainIndex::External, 4).unwrap();
        let key_b = deriver_b.derive_key(ChainIndex::External, 4).unwrap();
        assert_eq!(key_a.secret_bytes(), key_b.secret_bytes());
        assert_eq!(key_a.chain_code(), key_b.chain_code());
        assert_eq!(key_a.public_bytes(), key_b.public_bytes());
    }

    #[test]
    fn test_passphrase_changes_keys() {
        let root_a = RootKey::from_mnemonic(PHRASE, "").unwrap();
        let root_b = RootKey::from_mnemonic(PHRASE, "trezor").unwrap();
        assert_ne!(
            root_a.master().secret_bytes(),
            root_b.master().secret_bytes()
        );
    }

    #[test]
    fn test_hardened_and_soft_children_differ() {
        let root = RootKey::from_mnemonic(PHRASE, "").unwrap();
        let hardened = root
            .master()
            .derive_child(ChildIndex::hardened(7).unwrap());
        let soft = root.master().derive_child(ChildIndex::normal(7).unwrap());
        assert_ne!(hardened.secret_bytes(), soft.secret_bytes());
    }

    #[test]
    fn test_cip1852_account_has_staking_key() {
        let root = RootKey::from_mnemonic(PHRASE, "").unwrap();
        let net = Network::cardano_mainnet();

        let shelley = root
            .derive_account(&net, DerivationPurpose::Cip1852, 0)
            .unwrap();
        assert!(shelley.staking_key().is_some());

        let byron = root
            .derive_account(&net, DerivationPurpose::Bip44, 0)
            .unwrap();
        assert!(byron.staking_key().is_none());
    }

    #[test]
    fn test_ergo_rejects_cip1852() {
        let root = RootKey::from_mnemonic(PHRASE, "").unwrap();
        let net = Network::ergo_mainnet();
        let result = root.derive_account(&net, DerivationPurpose::Cip1852, 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_accounts_are_independent() {
        let root = RootKey::from_mnemonic(PHRASE, "").unwrap();
        let net = Network::cardano_mainnet();
        let acc0 = root
            .derive_account(&net, DerivationPurpose::Cip1852, 0)
            .unwrap();
        let acc1 = root
            .derive_account(&net, DerivationPurpose::Cip1852, 1)
            .unwrap();
        assert_ne!(acc0.account_public(), acc1.account_public());
    }

    #[test]
    fn test_path_for_slot() {
        let root = RootKey::from_mnemonic(PHRASE, "").unwrap();
        let net = Network::cardano_mainnet();
        let deriver = root
            .derive_account(&net, DerivationPurpose::Cip1852, 0)
            .unwrap();
        let path = deriver.path_for(ChainIndex::External, 4).unwrap();
        assert_eq!(path.to_string(), "m/1852'/1815'/0'/0/4");
    }

    #[test]
    fn test_generated_mnemonic_round_trips() {
        let phrase = RootKey::generate_mnemonic(Some(15));
        assert_eq!(phrase.split_whitespace().count(), 15);
        RootKey::from_mnemonic(&phrase, "").unwrap();
    }

    proptest! {
        #[test]
        fn prop_sibling_keys_never_collide(a in 0u32..1000, b in 0u32..1000) {
            prop_assume!(a != b);
            let root = RootKey::from_mnemonic(PHRASE, "").unwrap();
            let net = Network::from_parts(ChainFamily::Cardano, NetworkType::Mainnet);
            let deriver = root
                .derive_account(&net, DerivationPurpose::Cip1852, 0)
                .unwrap();
            let key_a = deriver.derive_key(ChainIndex::External, a).unwrap();
            let key_b = deriver.derive_key(ChainIndex::External, b).unwrap();
            prop_assert_ne!(key_a.secret_bytes(), key_b.secret_bytes());
        }
    }
}
