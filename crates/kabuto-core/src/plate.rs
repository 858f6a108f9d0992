//! Checksum plates
//!
//! A plate is a short human-verifiable checksum derived from an account's
//! public key, shown to users so they can confirm a restore produced the
//! wallet they expect. The text form is four letters and four digits,
//! e.g. `XLBS-6706`; the accompanying seed drives a deterministic
//! identicon in the UI layer.

use crate::keys::AccountDeriver;
use serde::{Deserialize, Serialize};

const PLATE_HASH_PERSONALIZATION: &[u8; 16] = b"kabuto_plate_tag";

/// Human-verifiable account checksum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plate {
    /// Display text, `AAAA-0000` shape
    pub text: String,
    /// Seed for the UI identicon
    pub image_seed: u64,
}

/// Compute the plate for an account.
///
/// The hash commits to both the account public key and its chain code, so
/// two accounts agree on a plate only if they agree on the full extended
/// public material.
pub fn plate_for_account(deriver: &AccountDeriver) -> Plate {
    plate_from_parts(&deriver.account_public(), deriver.account_chain_code())
}

/// Plate from raw account material (used by the duplicate detector, which
/// compares candidates against stored rows without a live deriver).
pub fn plate_from_parts(account_public: &[u8; 32], chain_code: &[u8; 32]) -> Plate {
    let hash = blake2b_simd::Params::new()
        .hash_length(32)
        .personal(PLATE_HASH_PERSONALIZATION)
        .to_state()
        .update(account_public)
        .update(chain_code)
        .finalize();
    let bytes = hash.as_bytes();

    let letters: String = bytes[..4]
        .iter()
        .map(|b| char::from(b'A' + (b % 26)))
        .collect();
    let digits = u16::from_be_bytes([bytes[4], bytes[5]]) % 10_000;

    let mut seed_bytes = [0u8; 8];
    seed_bytes.copy_from_slice(&bytes[6..14]);

    Plate {
        text: format!("{letters}-{digits:04}"),
        image_seed: u64::from_be_bytes(seed_bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::RootKey;
    use kabuto_params::{DerivationPurpose, Network};

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_plate_shape() {
        let root = RootKey::from_mnemonic(PHRASE, "").unwrap();
        let deriver = root
            .derive_account(&Network::cardano_mainnet(), DerivationPurpose::Cip1852, 0)
            .unwrap();
        let plate = plate_for_account(&deriver);

        let (letters, digits) = plate.text.split_once('-').unwrap();
        assert_eq!(letters.len(), 4);
        assert!(letters.chars().all(|c| c.is_ascii_uppercase()));
        assert_eq!(digits.len(), 4);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_plate_deterministic() {
        let root = RootKey::from_mnemonic(PHRASE, "").unwrap();
        let deriver = root
            .derive_account(&Network::cardano_mainnet(), DerivationPurpose::Cip1852, 0)
            .unwrap();
        assert_eq!(plate_for_account(&deriver), plate_for_account(&deriver));
    }

    #[test]
    fn test_plate_distinguishes_accounts_and_purposes() {
        let root = RootKey::from_mnemonic(PHRASE, "").unwrap();
        let net = Network::cardano_mainnet();
        let shelley0 = root
            .derive_account(&net, DerivationPurpose::Cip1852, 0)
            .unwrap();
        let shelley1 = root
            .derive_account(&net, DerivationPurpose::Cip1852, 1)
            .unwrap();
        let byron0 = root
            .derive_account(&net, DerivationPurpose::Bip44, 0)
            .unwrap();

        assert_ne!(
            plate_for_account(&shelley0).text,
            plate_for_account(&shelley1).text
        );
        assert_ne!(
            plate_for_account(&shelley0).text,
            plate_for_account(&byron0).text
        );
    }
}
