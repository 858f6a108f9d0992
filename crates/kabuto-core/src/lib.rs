//! Kabuto wallet core
//!
//! This crate implements the pure domain logic of the wallet engine:
//! hierarchical key derivation, address generation for the supported
//! chain families, checksum plates, and multi-asset values. Nothing in
//! this crate performs I/O or persists state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod derivation;
pub mod error;
pub mod keys;
pub mod plate;
pub mod values;

pub use address::{generate_address, Address, AddressKind};
pub use derivation::{ChainIndex, ChildIndex, DerivationPath, HARDENED_BIT};
pub use error::{DerivationError, Error, Result};
pub use keys::{AccountDeriver, ExtendedSecretKey, RootKey};
pub use plate::{plate_for_account, Plate};
pub use values::{AssetId, MultiTokenValue, TokenId, TOKEN_FINGERPRINT_LEN};
