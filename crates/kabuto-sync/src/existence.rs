//! Duplicate-wallet detection and restore previews
//!
//! Before a restore triggers any address scanning, the candidate
//! phrase's plate material is derived and compared against stored
//! wallets; a match blocks the expensive path entirely.

use crate::error::Result;
use kabuto_core::{
    generate_address, plate_for_account, AccountDeriver, ChainIndex, Plate, RootKey,
};
use kabuto_params::{DerivationPurpose, Network};
use kabuto_storage_sqlite::models::purpose_as_str;
use kabuto_storage_sqlite::{Repository, WalletRow};

/// What a restore-verification screen shows before committing
#[derive(Debug, Clone)]
pub struct RestorePreview {
    /// Checksum plate for the candidate account
    pub plate: Plate,
    /// First few receive addresses the account would own
    pub sample_addresses: Vec<String>,
}

/// The stored comparison material for an account: public key ‖ chain code
pub fn deriver_material(deriver: &AccountDeriver) -> Vec<u8> {
    let mut material = Vec::with_capacity(64);
    material.extend_from_slice(&deriver.account_public());
    material.extend_from_slice(deriver.account_chain_code());
    material
}

/// Derive the plate and sample addresses a restore would produce
pub fn generate_plates(
    phrase: &str,
    passphrase: &str,
    account_index: u32,
    purpose: DerivationPurpose,
    network: &Network,
    sample_count: u32,
) -> Result<RestorePreview> {
    let root = RootKey::from_mnemonic(phrase, passphrase)?;
    let deriver = root.derive_account(network, purpose, account_index)?;
    let plate = plate_for_account(&deriver);

    let mut sample_addresses = Vec::with_capacity(sample_count as usize);
    for index in 0..sample_count {
        let address = generate_address(&deriver, ChainIndex::External, index)?;
        sample_addresses.push(address.text);
    }

    Ok(RestorePreview {
        plate,
        sample_addresses,
    })
}

/// Compare a candidate account against stored wallets.
///
/// The plate narrows the search; the full public material decides, so a
/// plate collision can never produce a false match.
pub fn find_match(
    repo: &Repository<'_>,
    plate: &Plate,
    deriver: &AccountDeriver,
    purpose: DerivationPurpose,
    account_index: u32,
) -> kabuto_storage_sqlite::Result<Option<WalletRow>> {
    let material = deriver_material(deriver);
    let candidates =
        repo.find_wallets_by_plate(&plate.text, purpose_as_str(purpose), account_index)?;
    Ok(candidates
        .into_iter()
        .find(|wallet| wallet.public_deriver == material))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_generate_plates_deterministic() {
        let net = Network::cardano_mainnet();
        let a = generate_plates(PHRASE, "", 0, DerivationPurpose::Cip1852, &net, 3).unwrap();
        let b = generate_plates(PHRASE, "", 0, DerivationPurpose::Cip1852, &net, 3).unwrap();
        assert_eq!(a.plate, b.plate);
        assert_eq!(a.sample_addresses, b.sample_addresses);
        assert_eq!(a.sample_addresses.len(), 3);
    }

    #[test]
    fn test_generate_plates_differ_per_account() {
        let net = Network::cardano_mainnet();
        let a = generate_plates(PHRASE, "", 0, DerivationPurpose::Cip1852, &net, 1).unwrap();
        let b = generate_plates(PHRASE, "", 1, DerivationPurpose::Cip1852, &net, 1).unwrap();
        assert_ne!(a.plate.text, b.plate.text);
        assert_ne!(a.sample_addresses, b.sample_addresses);
    }

    #[test]
    fn test_find_match_requires_full_material() {
        let db = kabuto_storage_sqlite::Database::open_in_memory().unwrap();
        let repo = Repository::new(&db);
        let net = Network::cardano_mainnet();
        let root = RootKey::from_mnemonic(PHRASE, "").unwrap();
        let deriver = root
            .derive_account(&net, DerivationPurpose::Cip1852, 0)
            .unwrap();
        let plate = plate_for_account(&deriver);

        // Same plate text stored, but different public material: no match.
        repo.insert_wallet(
            "impostor",
            "Cardano",
            "Mainnet",
            "Cip1852",
            0,
            &plate.text,
            &[0u8; 64],
        )
        .unwrap();
        assert!(find_match(&repo, &plate, &deriver, DerivationPurpose::Cip1852, 0)
            .unwrap()
            .is_none());

        // The genuine material matches.
        repo.insert_wallet(
            "genuine",
            "Cardano",
            "Mainnet",
            "Cip1852",
            0,
            &plate.text,
            &deriver_material(&deriver),
        )
        .unwrap();
        let found = find_match(&repo, &plate, &deriver, DerivationPurpose::Cip1852, 0)
            .unwrap()
            .unwrap();
        assert_eq!(found.name, "genuine");
    }
}
