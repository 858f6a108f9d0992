//! Multi-asset token values
//!
//! Outputs carry a list of per-token amounts. The chain's native unit is
//! the default token; everything else is identified by its policy and
//! asset name and deduplicated by a fixed-width content fingerprint.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Length of a token content fingerprint in bytes
pub const TOKEN_FINGERPRINT_LEN: usize = 20;

const FINGERPRINT_PERSONALIZATION: &[u8; 16] = b"kabuto_token_fpr";

/// Identity of a non-default asset: minting policy plus asset name
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AssetId {
    /// Minting policy (or token-box id on Ergo-compatible chains)
    pub policy: Vec<u8>,
    /// Asset name within the policy
    pub name: Vec<u8>,
}

/// A fungible unit tracked per output
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum TokenId {
    /// The chain's native fungible unit
    Default,
    /// Any other asset
    Asset(AssetId),
}

impl TokenId {
    /// Build an asset token id
    pub fn asset(policy: impl Into<Vec<u8>>, name: impl Into<Vec<u8>>) -> Self {
        TokenId::Asset(AssetId {
            policy: policy.into(),
            name: name.into(),
        })
    }

    /// Whether this is the chain's default token
    pub fn is_default(&self) -> bool {
        matches!(self, TokenId::Default)
    }

    /// Fixed-width content fingerprint used as the deduplication key in
    /// token rows. Length-prefixing the parts keeps distinct
    /// (policy, name) splits from colliding.
    pub fn fingerprint(&self) -> [u8; TOKEN_FINGERPRINT_LEN] {
        let mut state = blake2b_simd::Params::new()
            .hash_length(TOKEN_FINGERPRINT_LEN)
            .personal(FINGERPRINT_PERSONALIZATION)
            .to_state();
        match self {
            TokenId::Default => {
                state.update(b"default");
            }
            TokenId::Asset(asset) => {
                state.update(&(asset.policy.len() as u32).to_be_bytes());
                state.update(&asset.policy);
                state.update(&(asset.name.len() as u32).to_be_bytes());
                state.update(&asset.name);
            }
        }
        let hash = state.finalize();
        let mut out = [0u8; TOKEN_FINGERPRINT_LEN];
        out.copy_from_slice(hash.as_bytes());
        out
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenId::Default => write!(f, "default"),
            TokenId::Asset(asset) => write!(
                f,
                "{}.{}",
                hex::encode(&asset.policy),
                hex::encode(&asset.name)
            ),
        }
    }
}

/// A per-token amount map with checked arithmetic.
///
/// Zero entries are pruned on subtraction so that value equality matches
/// economic equality.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MultiTokenValue {
    amounts: BTreeMap<TokenId, u64>,
}

impl MultiTokenValue {
    /// Empty value
    pub fn new() -> Self {
        Self::default()
    }

    /// Value holding only the default token
    pub fn from_default(amount: u64) -> Self {
        let mut value = Self::new();
        if amount > 0 {
            value.amounts.insert(TokenId::Default, amount);
        }
        value
    }

    /// Amount of the default token
    pub fn default_amount(&self) -> u64 {
        self.amounts.get(&TokenId::Default).copied().unwrap_or(0)
    }

    /// Amount of an arbitrary token
    pub fn amount_of(&self, token: &TokenId) -> u64 {
        self.amounts.get(token).copied().unwrap_or(0)
    }

    /// Non-default entries, in stable (ordered) iteration order
    pub fn non_default_entries(&self) -> impl Iterator<Item = (&TokenId, u64)> {
        self.amounts
            .iter()
            .filter(|(token, _)| !token.is_default())
            .map(|(token, amount)| (token, *amount))
    }

    /// All entries
    pub fn entries(&self) -> impl Iterator<Item = (&TokenId, u64)> {
        self.amounts.iter().map(|(token, amount)| (token, *amount))
    }

    /// True if no token has a positive amount
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    /// Add an amount of one token
    pub fn checked_add(&mut self, token: TokenId, amount: u64) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let entry = self.amounts.entry(token).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| Error::AmountOverflow(format!("adding {amount}")))?;
        Ok(())
    }

    /// Subtract an amount of one token
    pub fn checked_sub(&mut self, token: &TokenId, amount: u64) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let held = self.amount_of(token);
        let remaining = held.checked_sub(amount).ok_or_else(|| {
            Error::AmountUnderflow(format!("subtracting {amount} from {held}"))
        })?;
        if remaining == 0 {
            self.amounts.remove(token);
        } else {
            self.amounts.insert(token.clone(), remaining);
        }
        Ok(())
    }

    /// Merge another value into this one
    pub fn checked_merge(&mut self, other: &MultiTokenValue) -> Result<()> {
        for (token, amount) in other.entries() {
            self.checked_add(token.clone(), amount)?;
        }
        Ok(())
    }
}
