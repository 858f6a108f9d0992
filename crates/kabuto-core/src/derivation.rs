//! Hierarchical derivation paths
//!
//! Paths are sequences of 31-bit indices; the top bit marks a hardened
//! step. Display follows the usual `m/44'/1815'/0'/0/4` notation.

use crate::error::{DerivationError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bit marking a hardened derivation step
pub const HARDENED_BIT: u32 = 0x8000_0000;

/// A single derivation step: a 31-bit index, optionally hardened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChildIndex(u32);

impl ChildIndex {
    /// Create a non-hardened child index
    pub fn normal(index: u32) -> Result<Self> {
        if index & HARDENED_BIT != 0 {
            return Err(DerivationError::IndexOutOfRange(index).into());
        }
        Ok(Self(index))
    }

    /// Create a hardened child index
    pub fn hardened(index: u32) -> Result<Self> {
        if index & HARDENED_BIT != 0 {
            return Err(DerivationError::IndexOutOfRange(index).into());
        }
        Ok(Self(index | HARDENED_BIT))
    }

    /// Raw value including the hardened bit
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Index without the hardened bit
    pub const fn index(&self) -> u32 {
        self.0 & !HARDENED_BIT
    }

    /// Whether this step is hardened
    pub const fn is_hardened(&self) -> bool {
        self.0 & HARDENED_BIT != 0
    }

    /// Serialize the raw value big-endian, as fed into the derivation HMAC
    pub const fn to_be_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for ChildIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_hardened() {
            write!(f, "{}'", self.index())
        } else {
            write!(f, "{}", self.index())
        }
    }
}

/// Chain role within an account: receive vs. change addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainIndex {
    /// Receive (external) chain
    External,
    /// Change (internal) chain
    Internal,
}

impl ChainIndex {
    /// Chain number used in the derivation path
    pub const fn number(&self) -> u32 {
        match self {
            ChainIndex::External => 0,
            ChainIndex::Internal => 1,
        }
    }

    /// Both chains, in path order
    pub const fn both() -> [ChainIndex; 2] {
        [ChainIndex::External, ChainIndex::Internal]
    }
}

impl fmt::Display for ChainIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainIndex::External => write!(f, "external"),
            ChainIndex::Internal => write!(f, "internal"),
        }
    }
}

/// An ordered sequence of derivation steps
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DerivationPath(Vec<ChildIndex>);

impl DerivationPath {
    /// Empty path (the root)
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from explicit steps
    pub fn new(steps: Vec<ChildIndex>) -> Self {
        Self(steps)
    }

    /// The standard account-level prefix: `purpose'/coin'/account'`
    pub fn account_prefix(purpose: u32, coin_type: u32, account: u32) -> Result<Self> {
        Ok(Self(vec![
            ChildIndex::hardened(purpose)?,
            ChildIndex::hardened(coin_type)?,
            ChildIndex::hardened(account)?,
        ]))
    }

    /// Append a step, returning the extended path
    pub fn child(&self, step: ChildIndex) -> Self {
        let mut steps = self.0.clone();
        steps.push(step);
        Self(steps)
    }

    /// Steps in order
    pub fn steps(&self) -> &[ChildIndex] {
        &self.0
    }

    /// Number of steps
    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for step in &self.0 {
            write!(f, "/{}", step)?;
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('/');
        match parts.next() {
            Some("m") => {}
            _ => {
                return Err(DerivationError::InvalidPath(format!(
                    "path must start with 'm': {s}"
                ))
                .into())
            }
        }
        let mut steps = Vec::new();
        for part in parts {
            let (digits, hardened) = match part.strip_suffix('\'') {
                Some(d) => (d, true),
                None => (part, false),
            };
            let index: u32 = digits.parse().map_err(|_| {
                DerivationError::InvalidPath(format!("bad path segment: {part}"))
            })?;
            steps.push(if hardened {
                ChildIndex::hardened(index)?
            } else {
                ChildIndex::normal(index)?
            });
        }
        Ok(Self(steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hardened_bit() {
        let idx = ChildIndex::hardened(44).unwrap();
        assert!(idx.is_hardened());
        assert_eq!(idx.index(), 44);
        assert_eq!(idx.raw(), 44 | HARDENED_BIT);

        let idx = ChildIndex::normal(4).unwrap();
        assert!(!idx.is_hardened());
        assert_eq!(idx.raw(), 4);
    }

    #[test]
    fn test_index_out_of_range_rejected() {
        assert!(ChildIndex::normal(HARDENED_BIT).is_err());
        assert!(ChildIndex::hardened(HARDENED_BIT | 7).is_err());
    }

    #[test]
    fn test_path_display() {
        let path = DerivationPath::account_prefix(1852, 1815, 0)
            .unwrap()
            .child(ChildIndex::normal(0).unwrap())
            .child(ChildIndex::normal(4).unwrap());
        assert_eq!(path.to_string(), "m/1852'/1815'/0'/0/4");
    }

    #[test]
    fn test_path_parse() {
        let path: DerivationPath = "m/44'/429'/0'/0/19".parse().unwrap();
        assert_eq!(path.depth(), 5);
        assert!(path.steps()[0].is_hardened());
        assert!(!path.steps()[4].is_hardened());
        assert_eq!(path.steps()[4].index(), 19);
    }

    #[test]
    fn test_path_parse_rejects_garbage() {
        assert!("44'/1815'".parse::<DerivationPath>().is_err());
        assert!("m/abc".parse::<DerivationPath>().is_err());
    }

    proptest! {
        #[test]
        fn prop_path_display_parse_round_trip(
            segs in prop::collection::vec((0u32..HARDENED_BIT, any::<bool>()), 0..8)
        ) {
            let steps: Vec<ChildIndex> = segs
                .iter()
                .map(|(i, h)| {
                    if *h {
                        ChildIndex::hardened(*i).unwrap()
                    } else {
                        ChildIndex::normal(*i).unwrap()
                    }
                })
                .collect();
            let path = DerivationPath::new(steps);
            let parsed: DerivationPath = path.to_string().parse().unwrap();
            prop_assert_eq!(parsed, path);
        }
    }
}
